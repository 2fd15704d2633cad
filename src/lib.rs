//! Self-refreshing IP geolocation database.
//!
//! A [`Database`] answers lookups from a locally stored database file while
//! keeping that file current in the background:
//!
//! - **Local files** opened with [`Database::open`] are watched, and every
//!   completed replacement of the file is loaded and swapped in.
//! - **Remote archives** opened with [`Database::open_url`] are checked
//!   periodically (`HEAD`), downloaded when stale, extracted with
//!   [`geodb_archive`] and atomically installed into the cache directory.
//!   Failed updates are retried with exponential backoff.
//!
//! Lookups never block on downloads or file swaps and never see a partially
//! written database.
//!
//! ```no_run
//! use geodb::{City, Database, Settings};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load(None)?;
//! let url = geodb::maxmind_update_url("download.maxmind.com", "GeoLite2-City", "LICENSE_KEY")?;
//! let db: Database = Database::open_url(url.as_str(), &settings).await?;
//! if let Some(city) = db.lookup::<City>("192.0.2.1".parse()?)? {
//!     println!("{:?}", city.name());
//! }
//! # Ok(())
//! # }
//! ```

mod db;
pub mod error;
mod mailbox;
pub mod reader;
mod update;
mod watch;

#[cfg(test)]
mod fixtures;

pub use crate::db::Database;
pub use crate::mailbox::Mailbox;
pub use crate::reader::{City, MaxMindReader, Reader};
pub use geodb_config::{Settings, maxmind_update_url};
pub use geodb_fetch::source::HttpSource;
#[cfg(feature = "mock")]
pub use geodb_fetch::source::MockSource;
pub use geodb_fetch::{Source, SourceHandle};
