//! Session registry backing `startTransaction`/`commitTransaction`/
//! `abortTransaction`/`endSessions`/`refreshSessions`, keyed by the
//! driver-supplied `lsid` (a BSON binary UUID). Grounded on
//! [`crate::cursor::CursorManager`]'s TTL-sweep shape, generalized from
//! cursor handles to at-most-one-active-transaction-per-session entries.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::errors::{DbError, DbResult};
use crate::transaction::lock::LockManager;
use crate::transaction::{Transaction, TransactionManager};

struct SessionEntry {
    last_used: Instant,
    active: Option<Transaction>,
}

/// Owns every known session's at-most-one active transaction. A session
/// with no active transaction still occupies an entry between
/// `refreshSessions` calls, mirroring `mongod`'s session cache.
#[derive(Default)]
pub struct SessionManager {
    sessions: Mutex<HashMap<Vec<u8>, SessionEntry>>,
}

impl SessionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn touch<'a>(sessions: &'a mut HashMap<Vec<u8>, SessionEntry>, lsid: &[u8]) -> &'a mut SessionEntry {
        sessions.entry(lsid.to_vec()).or_insert_with(|| SessionEntry { last_used: Instant::now(), active: None })
    }

    /// Starts a new transaction on `lsid`, erroring if one is already
    /// active (MongoDB rejects nested `startTransaction` on the same
    /// session).
    ///
    /// # Errors
    /// Returns `DbError::IllegalOperation` if a transaction is already
    /// active on this session.
    pub fn start_transaction(&self, lsid: &[u8], mgr: &TransactionManager) -> DbResult<()> {
        let mut sessions = self.sessions.lock();
        let entry = Self::touch(&mut sessions, lsid);
        entry.last_used = Instant::now();
        if entry.active.is_some() {
            return Err(DbError::IllegalOperation("transaction already in progress on this session".into()));
        }
        entry.active = Some(mgr.begin());
        Ok(())
    }

    /// Runs `f` against the session's active transaction, if any.
    pub fn with_active<R>(&self, lsid: &[u8], f: impl FnOnce(&mut Transaction) -> R) -> Option<R> {
        let mut sessions = self.sessions.lock();
        let entry = sessions.get_mut(lsid)?;
        entry.last_used = Instant::now();
        entry.active.as_mut().map(f)
    }

    /// Commits the session's active transaction: releases its locks and
    /// clears the undo log (nothing to reverse once committed).
    ///
    /// # Errors
    /// Returns `DbError::IllegalOperation` if no transaction is active.
    pub fn commit_transaction(&self, lsid: &[u8], locks: &LockManager) -> DbResult<()> {
        let mut sessions = self.sessions.lock();
        let entry = sessions.get_mut(lsid).ok_or_else(|| DbError::IllegalOperation("no such session".into()))?;
        entry.last_used = Instant::now();
        let txn = entry.active.take().ok_or_else(|| DbError::IllegalOperation("no transaction in progress".into()))?;
        locks.release_all(txn.id);
        Ok(())
    }

    /// Takes the session's active transaction so the caller can replay its
    /// undo log in reverse, then releases its locks.
    ///
    /// # Errors
    /// Returns `DbError::IllegalOperation` if no transaction is active.
    pub fn abort_transaction(&self, lsid: &[u8], locks: &LockManager) -> DbResult<Transaction> {
        let mut sessions = self.sessions.lock();
        let entry = sessions.get_mut(lsid).ok_or_else(|| DbError::IllegalOperation("no such session".into()))?;
        entry.last_used = Instant::now();
        let txn = entry.active.take().ok_or_else(|| DbError::IllegalOperation("no transaction in progress".into()))?;
        locks.release_all(txn.id);
        Ok(txn)
    }

    /// Refreshes a batch of sessions' TTL without touching their
    /// transaction state, per the `refreshSessions` command.
    pub fn refresh_sessions(&self, lsids: &[Vec<u8>]) {
        let mut sessions = self.sessions.lock();
        for lsid in lsids {
            Self::touch(&mut sessions, lsid).last_used = Instant::now();
        }
    }

    /// Ends (forgets) a batch of sessions, per the `endSessions` command.
    /// Does not release in-progress transaction locks (callers are
    /// expected to abort first).
    pub fn end_sessions(&self, lsids: &[Vec<u8>]) {
        let mut sessions = self.sessions.lock();
        for lsid in lsids {
            sessions.remove(lsid);
        }
    }

    /// Returns the lsids of every session idle longer than `ttl`, without
    /// removing them (callers decide whether to abort an active
    /// transaction before ending the session).
    #[must_use]
    pub fn expired(&self, ttl: Duration) -> Vec<Vec<u8>> {
        let sessions = self.sessions.lock();
        let now = Instant::now();
        sessions.iter().filter(|(_, e)| now.duration_since(e.last_used) > ttl).map(|(k, _)| k.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_commit_round_trip() {
        let sessions = SessionManager::new();
        let mgr = TransactionManager::new();
        let lsid = vec![1, 2, 3];
        sessions.start_transaction(&lsid, &mgr).unwrap();
        assert!(sessions.start_transaction(&lsid, &mgr).is_err());
        sessions.commit_transaction(&lsid, &mgr.locks).unwrap();
        assert!(sessions.commit_transaction(&lsid, &mgr.locks).is_err());
    }

    #[test]
    fn abort_returns_transaction_for_undo_replay() {
        let sessions = SessionManager::new();
        let mgr = TransactionManager::new();
        let lsid = vec![9];
        sessions.start_transaction(&lsid, &mgr).unwrap();
        sessions.with_active(&lsid, |t| t.record_insert("c", bson::Bson::Int32(1)));
        let txn = sessions.abort_transaction(&lsid, &mgr.locks).unwrap();
        assert_eq!(txn.undo.len(), 1);
    }
}
