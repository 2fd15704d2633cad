//! Configuration for geodb.
//!
//! Settings are layered, later sources overriding earlier ones:
//!
//! 1. Built-in defaults ([`Settings::default`])
//! 2. An optional file, format chosen by extension (`toml`, `yaml`/`yml`,
//!    `json`)
//! 3. Environment variables prefixed with `GEODB_`, e.g.
//!    `GEODB_UPDATE_INTERVAL_SECS=3600`
//!
//! The result is validated before it is returned.

pub mod error;
mod maxmind;

pub use crate::maxmind::{DEFAULT_MAXMIND_HOST, maxmind_update_url};
use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "GEODB_";
const DATABASE_FILE: &str = "db.mmdb";
const ARCHIVE_FILE: &str = "db.tar.gz";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory holding the installed database and the cached archive of
    /// URL-backed handles.
    pub cache_dir: PathBuf,
    /// Pause between successful update checks.
    pub update_interval_secs: u64,
    /// Ceiling for the exponential retry delay after failed updates.
    pub max_retry_interval_secs: u64,
    /// Pause after each processed file watcher event.
    pub watch_debounce_ms: u64,
    /// Timeout applied to each HTTP request, body included.
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            update_interval_secs: 24 * 60 * 60,
            max_retry_interval_secs: 60 * 60,
            watch_debounce_ms: 1000,
            request_timeout_secs: 5 * 60,
        }
    }
}

fn default_cache_dir() -> PathBuf {
    ProjectDirs::from("", "", "geodb")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("geodb"))
}

impl Settings {
    /// Load settings from defaults, an optional `file`, and the environment.
    ///
    /// # Errors
    /// - [`NotFound`](ErrorKind::NotFound) if `file` is given but missing.
    /// - [`UnsupportedFormat`](ErrorKind::UnsupportedFormat) for unknown
    ///   file extensions.
    /// - [`Parse`](ErrorKind::Parse) for malformed sources.
    /// - [`Invalid`](ErrorKind::Invalid) if validation fails.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(path) = file {
            if !path.is_file() {
                exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
            }
            figment = match path.extension().and_then(|ext| ext.to_str()) {
                Some("toml") => figment.merge(Toml::file(path)),
                Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
            };
            tracing::debug!(path = %path.display(), "Loaded configuration file");
        }
        let settings: Settings =
            figment.merge(Env::prefixed(ENV_PREFIX)).extract().or_raise(|| ErrorKind::Parse)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.update_interval_secs == 0 {
            exn::bail!(ErrorKind::Invalid("update_interval_secs must be greater than zero"));
        }
        if self.max_retry_interval_secs == 0 {
            exn::bail!(ErrorKind::Invalid("max_retry_interval_secs must be greater than zero"));
        }
        if self.request_timeout_secs == 0 {
            exn::bail!(ErrorKind::Invalid("request_timeout_secs must be greater than zero"));
        }
        if self.cache_dir.as_os_str().is_empty() {
            exn::bail!(ErrorKind::Invalid("cache_dir must not be empty"));
        }
        Ok(())
    }

    /// Use `dir` for the database and archive of URL-backed handles.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Installed database of URL-backed handles.
    pub fn database_path(&self) -> PathBuf {
        self.cache_dir.join(DATABASE_FILE)
    }

    /// Last downloaded archive, kept for change detection.
    pub fn archive_path(&self) -> PathBuf {
        self.cache_dir.join(ARCHIVE_FILE)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    pub fn max_retry_interval(&self) -> Duration {
        Duration::from_secs(self.max_retry_interval_secs)
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
