//! Remote archive sources.
//!
//! A [`Source`] answers two questions for the update loop: *is the copy on
//! disk out of date?* and *give me a fresh one*. The production
//! implementation is [`HttpSource`](source::HttpSource), which decides
//! staleness from a `HEAD` request and streams the archive with `GET`.

pub mod error;
mod meta;
pub mod source;

pub use crate::meta::{LocalMeta, RemoteMeta};
pub use crate::source::{Source, download_path};
use std::sync::Arc;

pub type SourceHandle = Arc<dyn Source>;
