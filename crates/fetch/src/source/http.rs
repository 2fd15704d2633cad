//! HTTP(S) archive source.

use super::{Source, download_path};
use crate::error::{ErrorKind, Result};
use crate::meta::{LocalMeta, RemoteMeta};
use async_trait::async_trait;
use exn::ResultExt;
use reqwest::{Client, Response};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

/// Fetches archives from a single URL.
///
/// Staleness is decided with a `HEAD` request (see
/// [`RemoteMeta::is_newer_than`]); downloads are streamed to disk chunk by
/// chunk.
#[derive(Debug, Clone)]
pub struct HttpSource {
    url: String,
    client: Client,
}

impl HttpSource {
    /// Create a source for `url` whose requests (body included) give up
    /// after `timeout`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .or_raise(|| ErrorKind::Client)?;
        Ok(Self::with_client(url, client))
    }

    /// Use a preconfigured client (proxies, custom roots...).
    pub fn with_client(url: impl Into<String>, client: Client) -> Self {
        Self { url: url.into(), client }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn transport(&self) -> ErrorKind {
        ErrorKind::Transport(self.url.clone())
    }

    async fn stream_to(&self, mut response: Response, path: &Path) -> Result<u64> {
        let mut file = tokio::fs::File::create(path).await.or_raise(|| ErrorKind::Io)?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await.or_raise(|| self.transport())? {
            file.write_all(&chunk).await.or_raise(|| ErrorKind::Io)?;
            written += chunk.len() as u64;
        }
        file.flush().await.or_raise(|| ErrorKind::Io)?;
        file.sync_all().await.or_raise(|| ErrorKind::Io)?;
        Ok(written)
    }
}

fn require_success(response: Response) -> Result<Response> {
    let status = response.status();
    if !status.is_success() {
        exn::bail!(ErrorKind::Status(status.as_u16()));
    }
    Ok(response)
}

#[async_trait]
impl Source for HttpSource {
    fn name(&self) -> &str {
        &self.url
    }

    #[instrument(skip_all, fields(url = %self.url, cached = %cached.display()))]
    async fn needs_update(&self, cached: &Path) -> Result<bool> {
        let Some(local) = LocalMeta::read(cached).await else {
            tracing::debug!("No cached archive");
            return Ok(true);
        };
        let response = self.client.head(&self.url).send().await.or_raise(|| self.transport())?;
        let remote = RemoteMeta::from_headers(require_success(response)?.headers())?;
        let stale = remote.is_newer_than(&local);
        tracing::debug!(
            stale,
            local_size = local.size,
            remote_size = ?remote.content_length,
            remote_modified = ?remote.last_modified,
            "Compared cached archive with remote"
        );
        Ok(stale)
    }

    #[instrument(skip_all, fields(url = %self.url, dir = %dir.display()))]
    async fn download(&self, dir: &Path) -> Result<PathBuf> {
        let response = self.client.get(&self.url).send().await.or_raise(|| self.transport())?;
        let response = require_success(response)?;
        tokio::fs::create_dir_all(dir).await.or_raise(|| ErrorKind::Io)?;
        let path = download_path(dir);
        match self.stream_to(response, &path).await {
            Ok(bytes) => {
                tracing::info!(path = %path.display(), bytes, "Downloaded archive");
                Ok(path)
            },
            Err(e) => {
                _ = tokio::fs::remove_file(&path).await;
                Err(e)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::format_http_date;
    use std::fs;
    use time::OffsetDateTime;
    use time::macros::datetime;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ARCHIVE: &[u8] = b"pretend this is a gzip tarball";

    fn source(server: &MockServer) -> HttpSource {
        HttpSource::new(format!("{}/db.tar.gz", server.uri()), Duration::from_secs(5)).unwrap()
    }

    /// Write `data` as the cached archive with a whole-second mtime.
    fn cached_archive(dir: &Path, data: &[u8], modified: OffsetDateTime) -> PathBuf {
        let path = dir.join("db.tar.gz");
        fs::write(&path, data).unwrap();
        let file = fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(modified.into()).unwrap();
        path
    }

    async fn mount_head(server: &MockServer, modified: OffsetDateTime, body_len: usize) {
        Mock::given(method("HEAD"))
            .and(path("/db.tar.gz"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Last-Modified", format_http_date(modified).as_str())
                    .set_body_bytes(vec![0u8; body_len]),
            )
            .mount(server)
            .await;
    }

    fn leftovers(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().starts_with("_geodb."))
            .count()
    }

    #[tokio::test]
    async fn test_missing_cache_needs_update_without_request() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;
        let temp = tempfile::tempdir().unwrap();

        assert!(source(&server).needs_update(&temp.path().join("db.tar.gz")).await.unwrap());
    }

    #[tokio::test]
    async fn test_same_date_and_size_is_up_to_date() {
        let server = MockServer::start().await;
        let modified = datetime!(2024-03-05 12:00:00 UTC);
        mount_head(&server, modified, ARCHIVE.len()).await;
        let temp = tempfile::tempdir().unwrap();
        let cached = cached_archive(temp.path(), ARCHIVE, modified);

        assert!(!source(&server).needs_update(&cached).await.unwrap());
    }

    #[tokio::test]
    async fn test_newer_remote_needs_update() {
        let server = MockServer::start().await;
        mount_head(&server, datetime!(2024-03-06 00:00:00 UTC), ARCHIVE.len()).await;
        let temp = tempfile::tempdir().unwrap();
        let cached = cached_archive(temp.path(), ARCHIVE, datetime!(2024-03-05 12:00:00 UTC));

        assert!(source(&server).needs_update(&cached).await.unwrap());
    }

    #[tokio::test]
    async fn test_different_size_needs_update() {
        let server = MockServer::start().await;
        let modified = datetime!(2024-03-05 12:00:00 UTC);
        mount_head(&server, modified, ARCHIVE.len() + 1).await;
        let temp = tempfile::tempdir().unwrap();
        let cached = cached_archive(temp.path(), ARCHIVE, modified);

        assert!(source(&server).needs_update(&cached).await.unwrap());
    }

    #[tokio::test]
    async fn test_head_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD")).respond_with(ResponseTemplate::new(503)).mount(&server).await;
        let temp = tempfile::tempdir().unwrap();
        let cached = cached_archive(temp.path(), ARCHIVE, datetime!(2024-03-05 12:00:00 UTC));

        let err = source(&server).needs_update(&cached).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Status(503));
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let port = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}/db.tar.gz");
        let source = HttpSource::new(url.clone(), Duration::from_secs(5)).unwrap();
        let temp = tempfile::tempdir().unwrap();
        let cached = cached_archive(temp.path(), ARCHIVE, datetime!(2024-03-05 12:00:00 UTC));

        let err = source.needs_update(&cached).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Transport(url));
    }

    #[tokio::test]
    async fn test_download_streams_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/db.tar.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(ARCHIVE))
            .expect(1)
            .mount(&server)
            .await;
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("cache");

        let downloaded = source(&server).download(&dir).await.unwrap();

        assert_eq!(downloaded.parent(), Some(dir.as_path()));
        assert_eq!(fs::read(&downloaded).unwrap(), ARCHIVE);
    }

    #[tokio::test]
    async fn test_download_error_status_leaves_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(404)).mount(&server).await;
        let temp = tempfile::tempdir().unwrap();

        let err = source(&server).download(temp.path()).await.unwrap_err();

        assert_eq!(*err, ErrorKind::Status(404));
        assert_eq!(leftovers(temp.path()), 0);
    }
}
