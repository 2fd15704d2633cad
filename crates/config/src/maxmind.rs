//! MaxMind download endpoint.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use url::Url;

/// Host serving both the free GeoLite2 and the paid GeoIP2 editions.
pub const DEFAULT_MAXMIND_HOST: &str = "download.maxmind.com";

/// Build the archive download URL for a MaxMind `edition_id` (for example
/// `GeoLite2-City` or `GeoIP2-City`) on `host`.
///
/// ```
/// let url = geodb_config::maxmind_update_url("download.maxmind.com", "GeoLite2-City", "s3cr3t").unwrap();
/// assert_eq!(
///     url.as_str(),
///     "https://download.maxmind.com/app/geoip_download?edition_id=GeoLite2-City&date=&license_key=s3cr3t&suffix=tar.gz"
/// );
/// ```
pub fn maxmind_update_url(host: &str, edition_id: &str, license_key: &str) -> Result<Url> {
    let mut url = Url::parse(&format!("https://{host}/app/geoip_download")).or_raise(|| ErrorKind::InvalidUrl)?;
    url.query_pairs_mut()
        .append_pair("edition_id", edition_id)
        .append_pair("date", "")
        .append_pair("license_key", license_key)
        .append_pair("suffix", "tar.gz");
    Ok(url)
}
