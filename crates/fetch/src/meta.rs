//! Staleness Metadata
//!
//! The cached archive on disk is compared against what the server advertises
//! for the same URL. A download is needed when either the server's copy was
//! modified after ours or the sizes disagree.

use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use reqwest::header::{CONTENT_LENGTH, HeaderMap, LAST_MODIFIED};
use std::path::Path;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

/// IMF-fixdate, the only `Last-Modified` form servers are allowed to send.
const HTTP_DATE: &[BorrowedFormatItem<'_>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// Size and modification time of the cached archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalMeta {
    pub size: u64,
    pub modified: OffsetDateTime,
}

impl LocalMeta {
    /// Stat `path`. Any failure (usually: nothing cached yet) yields `None`.
    pub async fn read(path: &Path) -> Option<Self> {
        let metadata = tokio::fs::metadata(path).await.ok()?;
        let modified = metadata.modified().ok()?;
        Some(Self { size: metadata.len(), modified: OffsetDateTime::from(modified) })
    }
}

/// What the server reports about the archive in response to `HEAD`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteMeta {
    pub last_modified: Option<OffsetDateTime>,
    pub content_length: Option<u64>,
}

impl RemoteMeta {
    /// Read `Last-Modified` and `Content-Length` from response headers.
    ///
    /// Absent headers are `None`; present but malformed ones are an
    /// [`InvalidHeader`](ErrorKind::InvalidHeader) error.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self> {
        let last_modified = headers
            .get(LAST_MODIFIED)
            .map(|value| {
                let text = value.to_str().or_raise(|| ErrorKind::InvalidHeader("Last-Modified"))?;
                parse_http_date(text)
            })
            .transpose()?;
        let content_length = headers
            .get(CONTENT_LENGTH)
            .map(|value| {
                value
                    .to_str()
                    .ok()
                    .and_then(|text| text.trim().parse::<u64>().ok())
                    .ok_or_raise(|| ErrorKind::InvalidHeader("Content-Length"))
            })
            .transpose()?;
        Ok(Self { last_modified, content_length })
    }

    /// Returns `true` if the remote archive should replace `local`.
    ///
    /// A strictly later `Last-Modified` wins outright. Otherwise the sizes
    /// must match exactly; a missing `Content-Length` never matches.
    #[must_use]
    pub fn is_newer_than(&self, local: &LocalMeta) -> bool {
        if let Some(modified) = self.last_modified
            && modified > local.modified
        {
            return true;
        }
        self.content_length != Some(local.size)
    }
}

/// Parse an IMF-fixdate such as `Tue, 15 Nov 1994 08:12:31 GMT`.
pub(crate) fn parse_http_date(text: &str) -> Result<OffsetDateTime> {
    PrimitiveDateTime::parse(text.trim(), HTTP_DATE)
        .map(PrimitiveDateTime::assume_utc)
        .or_raise(|| ErrorKind::InvalidHeader("Last-Modified"))
}

/// Format `at` as an IMF-fixdate.
#[cfg(test)]
pub(crate) fn format_http_date(at: OffsetDateTime) -> String {
    at.to_offset(time::UtcOffset::UTC).format(HTTP_DATE).unwrap_or_default()
}
