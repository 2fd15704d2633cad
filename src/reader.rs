//! Database reader boundary.
//!
//! The binary search through the database is not done here; a [`Reader`]
//! wraps whichever library understands the file format. [`MaxMindReader`]
//! is the production implementation.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;

/// A loaded, immutable database snapshot.
///
/// Readers are never mutated after [`open`](Reader::open); a newer snapshot
/// means a new reader. Dropping the reader releases its resources.
pub trait Reader: Send + Sync + Sized + 'static {
    /// Load the database file at `path`.
    fn open(path: &Path) -> Result<Self>;

    /// Decode the record for `ip` into `T`. `Ok(None)` means the address is
    /// not in the database.
    fn lookup<T: DeserializeOwned>(&self, ip: IpAddr) -> Result<Option<T>>;
}

/// MaxMind DB (`.mmdb`) reader, holding the whole file in memory.
pub struct MaxMindReader {
    inner: maxminddb::Reader<Vec<u8>>,
}

impl MaxMindReader {
    /// Seconds since the epoch at which the database was built.
    pub fn build_epoch(&self) -> u64 {
        self.inner.metadata.build_epoch
    }

    pub fn database_type(&self) -> &str {
        &self.inner.metadata.database_type
    }
}

impl Reader for MaxMindReader {
    fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).or_raise(|| ErrorKind::Open(path.to_path_buf()))?;
        let inner = maxminddb::Reader::from_source(bytes).or_raise(|| ErrorKind::Open(path.to_path_buf()))?;
        tracing::debug!(
            path = %path.display(),
            database_type = %inner.metadata.database_type,
            build_epoch = inner.metadata.build_epoch,
            "Opened database"
        );
        Ok(Self { inner })
    }

    fn lookup<T: DeserializeOwned>(&self, ip: IpAddr) -> Result<Option<T>> {
        let result = self.inner.lookup(ip).or_raise(|| ErrorKind::Lookup)?;
        if !result.has_data() {
            return Ok(None);
        }
        result.decode::<T>().or_raise(|| ErrorKind::Lookup)
    }
}

/// Localised names keyed by language code (`en`, `de`, `zh-CN`...).
pub type Names = BTreeMap<String, String>;

/// The default City record: where an address is, as precisely as the
/// database knows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct City {
    pub continent: Continent,
    pub country: Country,
    pub subdivisions: Vec<Subdivision>,
    pub city: Place,
    pub location: Location,
    pub postal: Postal,
}

impl City {
    /// English name of the city, if known.
    pub fn name(&self) -> Option<&str> {
        self.city.names.get("en").map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Continent {
    pub code: Option<String>,
    pub geoname_id: Option<u32>,
    pub names: Names,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Country {
    pub geoname_id: Option<u32>,
    pub iso_code: Option<String>,
    pub is_in_european_union: Option<bool>,
    pub names: Names,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Subdivision {
    pub geoname_id: Option<u32>,
    pub iso_code: Option<String>,
    pub names: Names,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Place {
    pub geoname_id: Option<u32>,
    pub names: Names,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Location {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy_radius: Option<u16>,
    pub metro_code: Option<u16>,
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Postal {
    pub code: Option<String>,
}
