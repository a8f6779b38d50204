//! Cursor manager (L6): holds the materialized result set of a `find`/
//! `aggregate` too large to return in one batch, and the `getMore`/
//! `killCursors` machinery to page through it, with an idle-TTL sweep
//! mirroring `mongod`'s cursor timeout. Grounded on the teacher's
//! `query/cursor.rs` (`Cursor{ids/docs, pos}`, an `advance`-driven
//! iterator), generalized from a single-collection in-memory cursor to a
//! TTL-tracked table of many concurrent cursors behind one manager, in the
//! shape of the teacher's `cache::core` "one owner, many named handles"
//! pattern.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};

use bson::Document;
use parking_lot::Mutex;

use crate::errors::{DbError, DbResult};
use crate::storage::constants::DEFAULT_BATCH_SIZE;

struct OpenCursor {
    ns: String,
    docs: Vec<Document>,
    pos: usize,
    last_used: Instant,
}

impl OpenCursor {
    fn take_batch(&mut self, n: usize) -> Vec<Document> {
        let end = (self.pos + n).min(self.docs.len());
        let batch = self.docs[self.pos..end].to_vec();
        self.pos = end;
        batch
    }

    fn exhausted(&self) -> bool {
        self.pos >= self.docs.len()
    }
}

/// Owns every open cursor, keyed by a process-unique, never-reused id.
/// `0` is reserved (per the wire protocol) to mean "no cursor" — a `find`
/// whose first batch exhausts the result set never receives an id.
pub struct CursorManager {
    next_id: AtomicU64,
    cursors: Mutex<HashMap<u64, OpenCursor>>,
    ttl: Duration,
}

impl CursorManager {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        // Start ids at 1: 0 is reserved to mean "cursor exhausted, do not track".
        Self { next_id: AtomicU64::new(1), cursors: Mutex::new(HashMap::new()), ttl }
    }

    /// Materializes `docs` as a cursor on `ns` and returns the first batch
    /// plus the cursor id to use for subsequent `getMore`s, or `0` if the
    /// first batch exhausted the whole result set.
    pub fn open(&self, ns: &str, docs: Vec<Document>, batch_size: usize) -> (u64, Vec<Document>) {
        let batch_size = if batch_size == 0 { DEFAULT_BATCH_SIZE } else { batch_size };
        let mut cursor = OpenCursor { ns: ns.to_string(), docs, pos: 0, last_used: Instant::now() };
        let batch = cursor.take_batch(batch_size);
        if cursor.exhausted() {
            return (0, batch);
        }
        let id = self.next_id.fetch_add(1, AtomicOrdering::Relaxed);
        self.cursors.lock().insert(id, cursor);
        (id, batch)
    }

    /// Returns the next batch for `id`, and whether the cursor was
    /// exhausted (and therefore removed) by this call.
    ///
    /// # Errors
    /// Returns `DbError::CursorNotFound` if `id` is unknown (already
    /// exhausted, killed, or reaped by TTL).
    pub fn get_more(&self, id: u64, ns: &str, batch_size: usize) -> DbResult<(Vec<Document>, bool)> {
        let batch_size = if batch_size == 0 { DEFAULT_BATCH_SIZE } else { batch_size };
        let mut cursors = self.cursors.lock();
        let cursor = cursors.get_mut(&id).ok_or(DbError::CursorNotFound(id))?;
        if cursor.ns != ns {
            return Err(DbError::IllegalOperation(format!("cursor {id} belongs to a different namespace")));
        }
        cursor.last_used = Instant::now();
        let batch = cursor.take_batch(batch_size);
        let done = cursor.exhausted();
        if done {
            cursors.remove(&id);
        }
        Ok((batch, done))
    }

    /// Kills the listed cursor ids, returning the subset that actually
    /// existed (the rest are reported `cursorsNotFound` by the caller).
    pub fn kill(&self, ids: &[u64]) -> Vec<u64> {
        let mut cursors = self.cursors.lock();
        ids.iter().copied().filter(|id| cursors.remove(id).is_some()).collect()
    }

    /// Removes and returns the ids of every cursor idle longer than the
    /// manager's configured TTL. Intended to be called periodically by the
    /// owning [`crate::database::Database`].
    pub fn reap_expired(&self) -> Vec<u64> {
        let mut cursors = self.cursors.lock();
        let now = Instant::now();
        let expired: Vec<u64> =
            cursors.iter().filter(|(_, c)| now.duration_since(c.last_used) > self.ttl).map(|(id, _)| *id).collect();
        for id in &expired {
            cursors.remove(id);
        }
        expired
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.cursors.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn docs(n: usize) -> Vec<Document> {
        (0..n).map(|i| doc! {"n": i as i32}).collect()
    }

    #[test]
    fn small_result_set_returns_no_cursor() {
        let mgr = CursorManager::new(Duration::from_secs(60));
        let (id, batch) = mgr.open("db.c", docs(3), 10);
        assert_eq!(id, 0);
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn large_result_set_pages_via_get_more() {
        let mgr = CursorManager::new(Duration::from_secs(60));
        let (id, first) = mgr.open("db.c", docs(10), 4);
        assert_ne!(id, 0);
        assert_eq!(first.len(), 4);
        let (second, done) = mgr.get_more(id, "db.c", 4).unwrap();
        assert_eq!(second.len(), 4);
        assert!(!done);
        let (third, done) = mgr.get_more(id, "db.c", 4).unwrap();
        assert_eq!(third.len(), 2);
        assert!(done);
        assert!(mgr.get_more(id, "db.c", 4).is_err());
    }

    #[test]
    fn kill_cursor_removes_it() {
        let mgr = CursorManager::new(Duration::from_secs(60));
        let (id, _) = mgr.open("db.c", docs(10), 2);
        let killed = mgr.kill(&[id, 999]);
        assert_eq!(killed, vec![id]);
        assert!(mgr.get_more(id, "db.c", 2).is_err());
    }

    #[test]
    fn reap_expired_removes_idle_cursors() {
        let mgr = CursorManager::new(Duration::from_millis(0));
        let (id, _) = mgr.open("db.c", docs(10), 2);
        std::thread::sleep(Duration::from_millis(5));
        let expired = mgr.reap_expired();
        assert_eq!(expired, vec![id]);
    }
}
