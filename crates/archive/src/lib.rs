//! Database archive installation.
//!
//! Vendors distribute the geolocation database as a gzip-compressed tar
//! archive containing the compiled database next to licence files and
//! readmes. This crate provides:
//!
//! - **Extraction** of the first entry that looks like a database
//!   ([`install`]), streamed straight to disk without buffering the whole
//!   archive in memory
//! - **Atomic placement** of a finished file over the live one
//!   ([`atomic_replace`]), keeping the previous snapshot as a `.bak` sibling
//!
//! Everything here is blocking I/O. Async callers should run it inside
//! [`spawn_blocking`](https://docs.rs/tokio/latest/tokio/task/fn.spawn_blocking.html).

pub mod error;
mod install;
mod replace;

pub use crate::install::{DATABASE_MARKERS, install, is_database_entry};
pub use crate::replace::{atomic_replace, backup_path};
