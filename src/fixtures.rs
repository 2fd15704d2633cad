//! Shared test fixtures.

use flate2::Compression;
use flate2::write::GzEncoder;
use geodb_config::Settings;
use std::io::{self, Write};
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use tar::{Builder, EntryType, Header};

pub(crate) const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Settings rooted at `dir` with a short watcher pause.
pub(crate) fn settings(dir: &Path) -> Settings {
    Settings { watch_debounce_ms: 10, max_retry_interval_secs: 60, ..Settings::default().with_cache_dir(dir) }
}

/// Gzip tarball of `(name, contents)` pairs; names ending in `/` become
/// directories.
pub(crate) fn tar_gz(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = Builder::new(Vec::new());
    for (name, contents) in entries {
        let mut header = Header::new_gnu();
        header.set_path(name).unwrap();
        if name.ends_with('/') {
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            header.set_cksum();
            builder.append(&header, io::empty()).unwrap();
        } else {
            header.set_entry_type(EntryType::Regular);
            header.set_size(contents.len() as u64);
            header.set_cksum();
            builder.append(&header, contents.as_bytes()).unwrap();
        }
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&builder.into_inner().unwrap()).unwrap();
    encoder.finish().unwrap()
}

/// Gzip tarball holding a single symlink `name -> link`.
pub(crate) fn symlink_tar_gz(name: &str, link: &str) -> Vec<u8> {
    let mut builder = Builder::new(Vec::new());
    let mut header = Header::new_gnu();
    header.set_path(name).unwrap();
    header.set_entry_type(EntryType::Symlink);
    header.set_link_name(link).unwrap();
    header.set_size(0);
    header.set_cksum();
    builder.append(&header, io::empty()).unwrap();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&builder.into_inner().unwrap()).unwrap();
    encoder.finish().unwrap()
}
