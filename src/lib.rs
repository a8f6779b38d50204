#![forbid(unsafe_code)]
//! An embedded, single-node, MongoDB-wire-compatible document database:
//! paged storage with write-ahead logging, B+Tree indexes, a BSON catalog,
//! a session/lock-based transaction manager, and a MongoDB query/update
//! engine, fronted by OP_MSG/OP_QUERY wire framing.

pub mod btree;
pub mod catalog;
pub mod collection;
pub mod config;
pub mod cursor;
pub mod database;
pub mod errors;
pub mod fsutil;
pub mod index;
pub mod keystring;
pub mod query;
pub mod storage;
pub mod transaction;
pub mod utils;
pub mod wire;

pub use utils::feature_flags;
pub use utils::logger;

#[cfg(test)]
pub mod test_support;

pub use config::EngineOptions;
pub use database::Database;
pub use errors::{DbError, DbResult};

/// Initializes process-wide logging. Should be called once before opening
/// a [`Database`], typically from the `monodb` binary's `main`.
///
/// # Errors
/// Returns an error if the logger fails to initialize.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    logger::init()?;
    Ok(())
}
