//! Engine-wide configuration, following the teacher crate's
//! `cache::CacheConfig` pattern: explicit defaults, builder-style overrides,
//! no implicit global mutable state.

use std::time::Duration;

/// Tunables for a single [`crate::database::Database`] instance.
///
/// Constructed with [`EngineOptions::default`] and adjusted with the
/// builder methods before being passed to
/// [`crate::database::Database::open_with_options`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Page size in bytes. Fixed at 4096 per the on-disk format; exposed
    /// here only so tests can sanity-check it against the constant.
    pub page_size: usize,
    /// WAL file is truncated back to the header once it exceeds this size.
    pub wal_truncate_threshold: u64,
    /// Bytes retained in the WAL file immediately after a truncation.
    pub wal_truncate_retain: u64,
    /// Idle cursors are reaped after this TTL.
    pub cursor_ttl: Duration,
    /// Maximum documents accepted in a single `insert` command batch.
    pub max_write_batch_size: usize,
    /// Lock manager: how long `acquire` blocks before giving up (independent
    /// of deadlock detection, which fires immediately on a detected cycle).
    pub lock_timeout: Duration,
    /// Page cache capacity (number of 4KiB pages held in memory).
    pub page_cache_capacity: usize,
    /// Maximum BSON document size accepted on insert/update, mirroring
    /// MongoDB's 16MiB document size limit.
    pub max_document_size: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            page_size: crate::storage::constants::PAGE_SIZE,
            wal_truncate_threshold: 64 * 1024 * 1024,
            wal_truncate_retain: 4 * 1024 * 1024,
            cursor_ttl: Duration::from_secs(600),
            max_write_batch_size: 1000,
            lock_timeout: Duration::from_secs(5),
            page_cache_capacity: 256,
            max_document_size: 16 * 1024 * 1024,
        }
    }
}

impl EngineOptions {
    #[must_use]
    pub fn with_cursor_ttl(mut self, ttl: Duration) -> Self {
        self.cursor_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_write_batch_size(mut self, n: usize) -> Self {
        self.max_write_batch_size = n;
        self
    }

    #[must_use]
    pub fn with_page_cache_capacity(mut self, n: usize) -> Self {
        self.page_cache_capacity = n;
        self
    }
}
