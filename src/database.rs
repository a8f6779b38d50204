//! Database facade (L6/L7): owns the single [`Pager`] shared by every
//! collection, the [`Catalog`], the [`CursorManager`], and the
//! [`TransactionManager`], and dispatches MongoDB wire commands
//! (`insert`/`find`/`update`/`delete`/`findAndModify`/`aggregate`/
//! `createIndexes`/transaction commands/server-status commands) against
//! them. Grounded on the teacher's `Database` facade in `lib.rs`/`api.rs`
//! (one struct owning every subsystem behind its own lock, with a single
//! public entry point per operation), generalized here from the teacher's
//! direct method calls to a `run_command` dispatcher mirroring `mongod`'s
//! command surface, since wire clients send commands, not direct API calls.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bson::{doc, Bson, Document};
use parking_lot::{Mutex, RwLock};

use crate::catalog::{Catalog, CollectionInfo};
use crate::collection::Collection;
use crate::config::EngineOptions;
use crate::cursor::CursorManager;
use crate::errors::{DbError, DbResult};
use crate::storage::pager::Pager;
use crate::transaction::{LockMode, SessionManager, TransactionManager};

const MAX_NAMESPACE_LEN: usize = 255;

/// An open database: one data file, one pager, many collections. Safe to
/// share across threads via `Arc<Database>`; every method takes `&self`
/// and synchronizes internally.
pub struct Database {
    path: PathBuf,
    pager: Mutex<Pager>,
    collections: RwLock<HashMap<String, Arc<Mutex<Collection>>>>,
    catalog_page_id: Mutex<u32>,
    cursors: CursorManager,
    sessions: SessionManager,
    txn_manager: TransactionManager,
    options: EngineOptions,
}

impl Database {
    /// Opens (or creates) the database file at `path` with default
    /// [`EngineOptions`].
    ///
    /// # Errors
    /// Returns `DbError` on I/O failure or a corrupted file/catalog.
    pub fn open(path: &Path) -> DbResult<Self> {
        Self::open_with_options(path, EngineOptions::default())
    }

    /// Opens (or creates) the database file at `path` with explicit
    /// tuning options, loading the catalog and materializing a
    /// [`Collection`] for every entry it describes.
    ///
    /// # Errors
    /// Returns `DbError` on I/O failure or a corrupted file/catalog.
    pub fn open_with_options(path: &Path, options: EngineOptions) -> DbResult<Self> {
        let mut pager = Pager::open(path, options.page_cache_capacity)?;
        let catalog_page_id = pager.catalog_page_id();
        let catalog = Catalog::load(&mut pager, catalog_page_id)?;

        let mut collections = HashMap::new();
        for info in catalog.collections {
            collections.insert(info.name.clone(), Arc::new(Mutex::new(Collection::new(info))));
        }

        Ok(Self {
            path: path.to_path_buf(),
            pager: Mutex::new(pager),
            collections: RwLock::new(collections),
            catalog_page_id: Mutex::new(catalog_page_id),
            cursors: CursorManager::new(options.cursor_ttl),
            sessions: SessionManager::new(),
            txn_manager: TransactionManager::new(),
            options,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn validate_namespace(name: &str) -> DbResult<()> {
        if name.is_empty() || name.len() > MAX_NAMESPACE_LEN {
            return Err(DbError::InvalidNamespace(format!("invalid collection name length: {name}")));
        }
        if name.starts_with("system.") || name.contains('$') || name.contains('\0') || name.trim().is_empty() {
            return Err(DbError::InvalidNamespace(format!("invalid collection name: {name}")));
        }
        Ok(())
    }

    fn persist_catalog(&self, pager: &mut Pager) -> DbResult<()> {
        let collections = self.collections.read();
        let infos: Vec<CollectionInfo> = collections.values().map(|c| c.lock().to_info()).collect();
        let catalog = Catalog { collections: infos };
        let mut root = self.catalog_page_id.lock();
        let new_root = catalog.save(pager, *root)?;
        if new_root != *root {
            pager.set_catalog_page_id(new_root)?;
            *root = new_root;
        }
        pager.flush()?;
        Ok(())
    }

    /// Gets an existing collection, or creates an empty one, mirroring
    /// MongoDB's implicit-creation-on-first-write behavior.
    ///
    /// # Errors
    /// Returns `DbError::InvalidNamespace` for a malformed collection name.
    pub fn collection(&self, name: &str) -> DbResult<Arc<Mutex<Collection>>> {
        Self::validate_namespace(name)?;
        if let Some(existing) = self.collections.read().get(name) {
            return Ok(Arc::clone(existing));
        }
        let mut collections = self.collections.write();
        if let Some(existing) = collections.get(name) {
            return Ok(Arc::clone(existing));
        }
        let info = CollectionInfo { name: name.to_string(), first_page_id: 0, last_page_id: 0, document_count: 0, indexes: vec![] };
        let coll = Arc::new(Mutex::new(Collection::new(info)));
        collections.insert(name.to_string(), Arc::clone(&coll));
        drop(collections);
        let mut pager = self.pager.lock();
        coll.lock().create_index(&mut pager, "_id_", vec![("_id".to_string(), 1)], true)?;
        self.persist_catalog(&mut pager)?;
        Ok(coll)
    }

    #[must_use]
    pub fn get_collection(&self, name: &str) -> Option<Arc<Mutex<Collection>>> {
        self.collections.read().get(name).cloned()
    }

    /// Drops a collection and its catalog entry. The underlying pages are
    /// not reclaimed into the free list here; per spec.md's simplified WAL
    /// model, space is only reused on next `createIndex`/insert growth of
    /// another collection via the pager's own free list — a cheaper and
    /// safer default than walking the chain at drop time.
    ///
    /// # Errors
    /// Returns `DbError` on I/O failure while persisting the catalog.
    pub fn drop_collection(&self, name: &str) -> DbResult<bool> {
        let removed = self.collections.write().remove(name).is_some();
        if removed {
            let mut pager = self.pager.lock();
            self.persist_catalog(&mut pager)?;
        }
        Ok(removed)
    }

    #[must_use]
    pub fn list_collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Walks every collection's page chain and every index's B+Tree,
    /// returning a summary document for the `validate` command.
    ///
    /// # Errors
    /// Returns `DbError` describing the first inconsistency found.
    pub fn validate_all(&self) -> DbResult<Document> {
        let mut pager = self.pager.lock();
        let collections = self.collections.read();
        let mut report = Document::new();
        let mut total_docs = 0u64;
        for (name, coll) in collections.iter() {
            let count = coll.lock().validate(&mut pager)?;
            report.insert(name.clone(), Bson::Int64(count as i64));
            total_docs += count;
        }
        Ok(doc! { "ok": 1.0, "nCollections": collections.len() as i64, "nRecords": total_docs as i64, "collections": report })
    }

    /// Reaps idle cursors and sessions. Intended to be called periodically
    /// by the server loop (`monodb serve`), not on every request.
    pub fn sweep_idle(&self) {
        self.cursors.reap_expired();
        for lsid in self.sessions.expired(self.options.lock_timeout.max(std::time::Duration::from_secs(30))) {
            let _ = self.sessions.abort_transaction(&lsid, &self.txn_manager.locks);
            self.sessions.end_sessions(&[lsid]);
        }
    }

    /// Dispatches a single MongoDB command document to the matching
    /// handler, returning the command's reply document (always containing
    /// `ok`). Errors are *not* turned into `{ok: 0}` here — callers at the
    /// wire layer do that, since only they know whether the command was a
    /// "hello" handshake (which must always reply `ok: 1`) or this is a
    /// genuine failure.
    ///
    /// # Errors
    /// Returns `DbError::CommandNotFound` for an unrecognized command, or
    /// the underlying error from whichever handler ran.
    pub fn run_command(&self, db_name: &str, cmd: &Document) -> DbResult<Document> {
        let Some((command_name, _)) = cmd.iter().next() else {
            return Err(DbError::BadValue("empty command document".into()));
        };
        match command_name.as_str() {
            "ping" => Ok(doc! { "ok": 1.0 }),
            "hello" | "ismaster" | "isMaster" => Ok(doc! {
                "ismaster": true,
                "maxBsonObjectSize": self.options.max_document_size as i64,
                "maxMessageSizeBytes": 48_000_000i64,
                "maxWriteBatchSize": self.options.max_write_batch_size as i64,
                "minWireVersion": 0,
                "maxWireVersion": 17,
                "readOnly": false,
                "ok": 1.0,
            }),
            "buildInfo" | "buildinfo" => Ok(doc! {
                "version": "7.0.0-monodb",
                "versionArray": [7i32, 0i32, 0i32, 0i32],
                "bits": 64i32,
                "maxBsonObjectSize": self.options.max_document_size as i64,
                "ok": 1.0,
            }),
            "listCollections" => self.cmd_list_collections(),
            "insert" => self.cmd_insert(cmd),
            "find" => self.cmd_find(db_name, cmd),
            "getMore" => self.cmd_get_more(db_name, cmd),
            "killCursors" => self.cmd_kill_cursors(cmd),
            "update" => self.cmd_update(cmd),
            "delete" => self.cmd_delete(cmd),
            "count" => self.cmd_count(cmd),
            "distinct" => self.cmd_distinct(cmd),
            "drop" => self.cmd_drop(cmd),
            "createIndexes" => self.cmd_create_indexes(cmd),
            "listIndexes" => self.cmd_list_indexes(cmd),
            "dropIndexes" => self.cmd_drop_indexes(cmd),
            "aggregate" => self.cmd_aggregate(db_name, cmd),
            "findAndModify" | "findandmodify" => self.cmd_find_and_modify(cmd),
            "validate" => self.cmd_validate(cmd),
            "dbStats" => self.cmd_db_stats(),
            "collStats" => self.cmd_coll_stats(cmd),
            "serverStatus" => Ok(doc! { "ok": 1.0, "uptimeEstimate": 0i64, "connections": doc! {"current": 1i32} }),
            "connectionStatus" => Ok(doc! { "ok": 1.0, "authInfo": doc! { "authenticatedUsers": Bson::Array(vec![]) } }),
            "explain" => self.cmd_explain(cmd),
            "startTransaction" => self.cmd_start_transaction(cmd),
            "commitTransaction" => self.cmd_commit_transaction(cmd),
            "abortTransaction" => self.cmd_abort_transaction(cmd),
            "endSessions" => self.cmd_end_sessions(cmd),
            "refreshSessions" => self.cmd_refresh_sessions(cmd),
            other => Err(DbError::CommandNotFound(other.to_string())),
        }
    }

    fn target_collection(cmd: &Document, key: &str) -> DbResult<String> {
        match cmd.get_str(key) {
            Ok(s) => Ok(s.to_string()),
            Err(_) => Err(DbError::BadValue(format!("command missing string field '{key}'"))),
        }
    }

    fn lsid_bytes(cmd: &Document) -> Option<Vec<u8>> {
        let session = cmd.get_document("lsid").ok()?;
        match session.get("id")? {
            Bson::Binary(b) => Some(b.bytes.clone()),
            other => bson::to_vec(other).ok(),
        }
    }

    fn cmd_list_collections(&self) -> DbResult<Document> {
        let batch: Vec<Bson> = self
            .list_collections()
            .into_iter()
            .map(|name| Bson::Document(doc! { "name": name, "type": "collection" }))
            .collect();
        Ok(doc! { "ok": 1.0, "cursor": doc! { "id": 0i64, "firstBatch": batch } })
    }

    fn cmd_insert(&self, cmd: &Document) -> DbResult<Document> {
        let name = Self::target_collection(cmd, "insert")?;
        let docs: Vec<Document> = cmd
            .get_array("documents")
            .map_err(|_| DbError::BadValue("insert requires a 'documents' array".into()))?
            .iter()
            .filter_map(|b| b.as_document().cloned())
            .collect();
        let coll = self.collection(&name)?;
        let lsid = Self::lsid_bytes(cmd);
        let txn_id = self.active_txn_id(lsid.as_deref());
        if let Some(txn_id) = txn_id {
            self.acquire_lock(txn_id, &Self::lock_resource(&name), LockMode::Exclusive)?;
        }
        let mut pager = self.pager.lock();
        let mut guard = coll.lock();
        let result = if let Some(lsid) = lsid.as_deref().filter(|_| txn_id.is_some()) {
            self.sessions
                .with_active(lsid, |txn| {
                    guard.insert_many_txn(
                        &mut pager,
                        docs,
                        self.options.max_write_batch_size,
                        self.options.max_document_size,
                        &mut txn.undo,
                        &name,
                    )
                })
                .unwrap_or_else(|| Err(DbError::IllegalOperation("no transaction in progress".into())))
        } else {
            guard.insert_many(&mut pager, docs, self.options.max_write_batch_size, self.options.max_document_size)
        };
        drop(guard);
        match result {
            Ok(ids) => {
                self.persist_catalog(&mut pager)?;
                Ok(doc! { "ok": 1.0, "n": ids.len() as i32 })
            }
            Err(e) => {
                self.persist_catalog(&mut pager)?;
                Err(e)
            }
        }
    }

    fn cmd_find(&self, db_name: &str, cmd: &Document) -> DbResult<Document> {
        let name = Self::target_collection(cmd, "find")?;
        let Some(coll) = self.get_collection(&name) else {
            return Ok(doc! { "ok": 1.0, "cursor": doc! { "id": 0i64, "firstBatch": Bson::Array(vec![]), "ns": format!("{db_name}.{name}") } });
        };
        let filter = cmd.get_document("filter").ok().cloned().unwrap_or_default();
        let sort = cmd.get_document("sort").ok().cloned();
        let projection = cmd.get_document("projection").ok().cloned();
        let skip = cmd.get_i64("skip").unwrap_or(0).max(0) as u64;
        let limit = cmd.get_i64("limit").unwrap_or(0).max(0) as u64;
        let batch_size = cmd.get_i64("batchSize").unwrap_or(0).max(0) as usize;

        let mut pager = self.pager.lock();
        let docs = coll.lock().find(&mut pager, &filter, sort.as_ref(), skip, limit, projection.as_ref())?;
        drop(pager);

        let ns = format!("{db_name}.{name}");
        let (cursor_id, first_batch) = self.cursors.open(&ns, docs, batch_size);
        Ok(doc! { "ok": 1.0, "cursor": doc! { "id": cursor_id as i64, "ns": ns, "firstBatch": first_batch } })
    }

    fn cmd_get_more(&self, db_name: &str, cmd: &Document) -> DbResult<Document> {
        let cursor_id = cmd.get_i64("getMore").map_err(|_| DbError::BadValue("getMore requires an int64 cursor id".into()))?;
        let coll_name = Self::target_collection(cmd, "collection")?;
        let batch_size = cmd.get_i64("batchSize").unwrap_or(0).max(0) as usize;
        let ns = format!("{db_name}.{coll_name}");
        let (batch, done) = self.cursors.get_more(cursor_id as u64, &ns, batch_size)?;
        let id = if done { 0 } else { cursor_id };
        Ok(doc! { "ok": 1.0, "cursor": doc! { "id": id, "ns": ns, "nextBatch": batch } })
    }

    fn cmd_kill_cursors(&self, cmd: &Document) -> DbResult<Document> {
        let ids: Vec<u64> = cmd
            .get_array("cursors")
            .map_err(|_| DbError::BadValue("killCursors requires a 'cursors' array".into()))?
            .iter()
            .filter_map(Bson::as_i64)
            .map(|i| i as u64)
            .collect();
        let killed = self.cursors.kill(&ids);
        let not_found: Vec<Bson> = ids.iter().filter(|id| !killed.contains(id)).map(|id| Bson::Int64(*id as i64)).collect();
        let killed: Vec<Bson> = killed.into_iter().map(|id| Bson::Int64(id as i64)).collect();
        Ok(doc! { "ok": 1.0, "cursorsKilled": killed, "cursorsNotFound": not_found, "cursorsAlive": Bson::Array(vec![]), "cursorsUnknown": Bson::Array(vec![]) })
    }

    fn cmd_update(&self, cmd: &Document) -> DbResult<Document> {
        let name = Self::target_collection(cmd, "update")?;
        let updates = cmd.get_array("updates").map_err(|_| DbError::BadValue("update requires an 'updates' array".into()))?;
        let coll = self.collection(&name)?;
        let lsid = Self::lsid_bytes(cmd);
        let txn_id = self.active_txn_id(lsid.as_deref());
        if let Some(txn_id) = txn_id {
            self.acquire_lock(txn_id, &Self::lock_resource(&name), LockMode::Exclusive)?;
        }
        let mut pager = self.pager.lock();
        let mut guard = coll.lock();
        let mut n_matched = 0i64;
        let mut n_modified = 0i64;
        let mut upserted = Vec::new();
        for entry in updates {
            let Some(spec) = entry.as_document() else { continue };
            let filter = spec.get_document("q").ok().cloned().unwrap_or_default();
            let update_doc = spec.get_document("u").ok().cloned().unwrap_or_default();
            let multi = spec.get_bool("multi").unwrap_or(false);
            let upsert = spec.get_bool("upsert").unwrap_or(false);
            let report = if let Some(lsid) = lsid.as_deref().filter(|_| txn_id.is_some()) {
                self.sessions
                    .with_active(lsid, |txn| {
                        guard.update_txn(
                            &mut pager,
                            &filter,
                            &update_doc,
                            multi,
                            upsert,
                            self.options.max_document_size,
                            &mut txn.undo,
                            &name,
                        )
                    })
                    .unwrap_or_else(|| Err(DbError::IllegalOperation("no transaction in progress".into())))?
            } else {
                guard.update(&mut pager, &filter, &update_doc, multi, upsert, self.options.max_document_size)?
            };
            n_matched += report.matched as i64;
            n_modified += report.modified as i64;
            if let Some(id) = report.upserted_id {
                upserted.push(Bson::Document(doc! { "index": 0i32, "_id": id }));
            }
        }
        drop(guard);
        self.persist_catalog(&mut pager)?;
        Ok(doc! { "ok": 1.0, "n": n_matched, "nModified": n_modified, "upserted": upserted })
    }

    fn cmd_delete(&self, cmd: &Document) -> DbResult<Document> {
        let name = Self::target_collection(cmd, "delete")?;
        let deletes = cmd.get_array("deletes").map_err(|_| DbError::BadValue("delete requires a 'deletes' array".into()))?;
        let coll = self.collection(&name)?;
        let lsid = Self::lsid_bytes(cmd);
        let txn_id = self.active_txn_id(lsid.as_deref());
        if let Some(txn_id) = txn_id {
            self.acquire_lock(txn_id, &Self::lock_resource(&name), LockMode::Exclusive)?;
        }
        let mut pager = self.pager.lock();
        let mut guard = coll.lock();
        let mut n = 0i64;
        for entry in deletes {
            let Some(spec) = entry.as_document() else { continue };
            let filter = spec.get_document("q").ok().cloned().unwrap_or_default();
            let limit = spec.get_i32("limit").unwrap_or(0);
            let report = if let Some(lsid) = lsid.as_deref().filter(|_| txn_id.is_some()) {
                self.sessions
                    .with_active(lsid, |txn| guard.delete_txn(&mut pager, &filter, limit == 0, &mut txn.undo, &name))
                    .unwrap_or_else(|| Err(DbError::IllegalOperation("no transaction in progress".into())))?
            } else {
                guard.delete(&mut pager, &filter, limit == 0)?
            };
            n += report.deleted as i64;
        }
        drop(guard);
        self.persist_catalog(&mut pager)?;
        Ok(doc! { "ok": 1.0, "n": n })
    }

    fn cmd_count(&self, cmd: &Document) -> DbResult<Document> {
        let name = Self::target_collection(cmd, "count")?;
        let Some(coll) = self.get_collection(&name) else { return Ok(doc! { "ok": 1.0, "n": 0i64 }) };
        let filter = cmd.get_document("query").ok().cloned().unwrap_or_default();
        let mut pager = self.pager.lock();
        let n = coll.lock().count(&mut pager, &filter)?;
        Ok(doc! { "ok": 1.0, "n": n as i64 })
    }

    fn cmd_distinct(&self, cmd: &Document) -> DbResult<Document> {
        let name = Self::target_collection(cmd, "distinct")?;
        let field = cmd.get_str("key").map_err(|_| DbError::BadValue("distinct requires a 'key' field".into()))?;
        let Some(coll) = self.get_collection(&name) else { return Ok(doc! { "ok": 1.0, "values": Bson::Array(vec![]) }) };
        let filter = cmd.get_document("query").ok().cloned().unwrap_or_default();
        let mut pager = self.pager.lock();
        let values = coll.lock().distinct(&mut pager, field, &filter)?;
        Ok(doc! { "ok": 1.0, "values": values })
    }

    fn cmd_drop(&self, cmd: &Document) -> DbResult<Document> {
        let name = Self::target_collection(cmd, "drop")?;
        if self.drop_collection(&name)? {
            Ok(doc! { "ok": 1.0, "ns": name })
        } else {
            Err(DbError::NoSuchCollection(name))
        }
    }

    fn cmd_create_indexes(&self, cmd: &Document) -> DbResult<Document> {
        let name = Self::target_collection(cmd, "createIndexes")?;
        let specs = cmd.get_array("indexes").map_err(|_| DbError::BadValue("createIndexes requires an 'indexes' array".into()))?;
        let coll = self.collection(&name)?;
        let mut pager = self.pager.lock();
        let mut guard = coll.lock();
        let mut created = 0i32;
        for spec in specs {
            let Some(spec) = spec.as_document() else { continue };
            let key_doc = spec.get_document("key").map_err(|_| DbError::BadValue("index spec missing 'key'".into()))?;
            let index_name = spec.get_str("name").map_err(|_| DbError::BadValue("index spec missing 'name'".into()))?;
            let unique = spec.get_bool("unique").unwrap_or(false);
            let keys: Vec<(String, i32)> =
                key_doc.iter().map(|(k, v)| (k.clone(), v.as_i32().or_else(|| v.as_i64().map(|n| n as i32)).unwrap_or(1))).collect();
            guard.create_index(&mut pager, index_name, keys, unique)?;
            created += 1;
        }
        let after = guard.indexes.names().len() as i32;
        drop(guard);
        self.persist_catalog(&mut pager)?;
        Ok(doc! { "ok": 1.0, "numIndexesAfter": after, "createdCollectionAutomatically": false, "numIndexesBefore": after - created })
    }

    fn cmd_drop_indexes(&self, cmd: &Document) -> DbResult<Document> {
        let name = Self::target_collection(cmd, "dropIndexes")?;
        let coll = self.get_collection(&name).ok_or_else(|| DbError::NoSuchCollection(name.clone()))?;
        let mut pager = self.pager.lock();
        let mut guard = coll.lock();
        let before = guard.indexes.names().len() as i32;
        match cmd.get("index") {
            Some(Bson::String(s)) if s == "*" => {
                for n in guard.indexes.names() {
                    if n != "_id_" {
                        let _ = guard.drop_index(&n);
                    }
                }
            }
            Some(Bson::String(s)) => guard.drop_index(s)?,
            Some(Bson::Array(names)) => {
                for n in names {
                    if let Some(n) = n.as_str() {
                        guard.drop_index(n)?;
                    }
                }
            }
            Some(Bson::Document(key_doc)) => {
                let keys: Vec<(String, i32)> = key_doc
                    .iter()
                    .map(|(k, v)| (k.clone(), v.as_i32().or_else(|| v.as_i64().map(|n| n as i32)).unwrap_or(1)))
                    .collect();
                let target = guard.indexes.iter().find(|idx| idx.keys == keys).map(|idx| idx.name.clone());
                match target {
                    Some(n) => guard.drop_index(&n)?,
                    None => return Err(DbError::BadValue("can't find index with the specified key".into())),
                }
            }
            _ => return Err(DbError::BadValue("dropIndexes requires an 'index' field".into())),
        }
        drop(guard);
        self.persist_catalog(&mut pager)?;
        Ok(doc! { "ok": 1.0, "nIndexesWas": before })
    }

    fn cmd_list_indexes(&self, cmd: &Document) -> DbResult<Document> {
        let name = Self::target_collection(cmd, "listIndexes")?;
        let coll = self.get_collection(&name).ok_or_else(|| DbError::NoSuchCollection(name.clone()))?;
        let guard = coll.lock();
        let batch: Vec<Bson> = guard
            .indexes
            .names()
            .into_iter()
            .filter_map(|n| guard.indexes.get(&n).map(|idx| {
                let key_doc: Document = idx.keys.iter().map(|(k, d)| (k.clone(), Bson::Int32(*d))).collect();
                Bson::Document(doc! { "name": idx.name.clone(), "key": key_doc, "unique": idx.unique })
            }))
            .collect();
        Ok(doc! { "ok": 1.0, "cursor": doc! { "id": 0i64, "firstBatch": batch } })
    }

    fn cmd_aggregate(&self, db_name: &str, cmd: &Document) -> DbResult<Document> {
        let name = Self::target_collection(cmd, "aggregate")?;
        let pipeline: Vec<Document> =
            cmd.get_array("pipeline").map_err(|_| DbError::BadValue("aggregate requires a 'pipeline' array".into()))?
                .iter().filter_map(|b| b.as_document().cloned()).collect();
        let coll = self.get_collection(&name).ok_or_else(|| DbError::NoSuchCollection(name.clone()))?;
        let mut pager = self.pager.lock();
        let input = coll.lock().find(&mut pager, &doc! {}, None, 0, 0, None)?;
        drop(pager);
        let output = crate::query::aggregate::run_pipeline(input, &pipeline)?;
        let ns = format!("{db_name}.{name}");
        let (cursor_id, first_batch) = self.cursors.open(&ns, output, 0);
        Ok(doc! { "ok": 1.0, "cursor": doc! { "id": cursor_id as i64, "ns": ns, "firstBatch": first_batch } })
    }

    fn cmd_find_and_modify(&self, cmd: &Document) -> DbResult<Document> {
        let name = Self::target_collection(cmd, "findAndModify").or_else(|_| Self::target_collection(cmd, "findandmodify"))?;
        let filter = cmd.get_document("query").ok().cloned().unwrap_or_default();
        let sort = cmd.get_document("sort").ok().cloned();
        let update_doc = cmd.get_document("update").ok().cloned();
        let remove = cmd.get_bool("remove").unwrap_or(false);
        let upsert = cmd.get_bool("upsert").unwrap_or(false);
        let return_new = cmd.get_bool("new").unwrap_or(false);
        let coll = self.collection(&name)?;
        let mut pager = self.pager.lock();
        let result = coll.lock().find_and_modify(
            &mut pager,
            &filter,
            sort.as_ref(),
            update_doc.as_ref(),
            remove,
            upsert,
            return_new,
            self.options.max_document_size,
        )?;
        self.persist_catalog(&mut pager)?;
        Ok(doc! { "ok": 1.0, "value": result.map(Bson::Document).unwrap_or(Bson::Null), "lastErrorObject": doc! { "n": 1i32 } })
    }

    fn cmd_validate(&self, cmd: &Document) -> DbResult<Document> {
        let name = Self::target_collection(cmd, "validate")?;
        let coll = self.get_collection(&name).ok_or_else(|| DbError::NoSuchCollection(name.clone()))?;
        let mut pager = self.pager.lock();
        let n = coll.lock().validate(&mut pager)?;
        Ok(doc! { "ok": 1.0, "ns": name, "valid": true, "nrecords": n as i64 })
    }

    fn cmd_db_stats(&self) -> DbResult<Document> {
        let pager = self.pager.lock();
        let collections = self.collections.read();
        let total_docs: u64 = collections.values().map(|c| c.lock().document_count()).sum();
        Ok(doc! {
            "ok": 1.0,
            "collections": collections.len() as i64,
            "objects": total_docs as i64,
            "dataSize": (pager.page_count() as i64) * (self.options.page_size as i64),
        })
    }

    fn cmd_coll_stats(&self, cmd: &Document) -> DbResult<Document> {
        let name = Self::target_collection(cmd, "collStats")?;
        let coll = self.get_collection(&name).ok_or_else(|| DbError::NoSuchCollection(name.clone()))?;
        let guard = coll.lock();
        Ok(doc! { "ok": 1.0, "ns": name, "count": guard.document_count() as i64, "nindexes": guard.indexes.names().len() as i32 })
    }

    fn cmd_explain(&self, cmd: &Document) -> DbResult<Document> {
        let inner = cmd.get_document("explain").map_err(|_| DbError::BadValue("explain requires an inner command document".into()))?;
        let name = inner.get_str("find").or_else(|_| inner.get_str("aggregate")).unwrap_or("").to_string();
        Ok(doc! {
            "ok": 1.0,
            "queryPlanner": doc! {
                "namespace": name,
                "winningPlan": doc! { "stage": "COLLSCAN" },
            },
        })
    }

    fn cmd_start_transaction(&self, cmd: &Document) -> DbResult<Document> {
        let lsid = Self::lsid_bytes(cmd).ok_or_else(|| DbError::BadValue("startTransaction requires lsid".into()))?;
        self.sessions.start_transaction(&lsid, &self.txn_manager)?;
        Ok(doc! { "ok": 1.0 })
    }

    fn cmd_commit_transaction(&self, cmd: &Document) -> DbResult<Document> {
        let lsid = Self::lsid_bytes(cmd).ok_or_else(|| DbError::BadValue("commitTransaction requires lsid".into()))?;
        self.sessions.commit_transaction(&lsid, &self.txn_manager.locks)?;
        Ok(doc! { "ok": 1.0 })
    }

    /// Aborts the session's active transaction and replays its undo log in
    /// reverse against live collection state, restoring every document to
    /// its pre-transaction image.
    ///
    /// # Errors
    /// Returns `DbError::IllegalOperation` if no transaction is active.
    fn cmd_abort_transaction(&self, cmd: &Document) -> DbResult<Document> {
        let lsid = Self::lsid_bytes(cmd).ok_or_else(|| DbError::BadValue("abortTransaction requires lsid".into()))?;
        let txn = self.sessions.abort_transaction(&lsid, &self.txn_manager.locks)?;
        let mut pager = self.pager.lock();
        for undo in txn.undo.iter().rev() {
            let Some(coll) = self.get_collection(&undo.collection) else { continue };
            let mut guard = coll.lock();
            let id_filter = doc! { "_id": undo.doc_id.clone() };
            match &undo.op {
                crate::transaction::UndoOp::Insert => {
                    let _ = guard.delete(&mut pager, &id_filter, false);
                }
                crate::transaction::UndoOp::Update => {
                    if let Some(old) = &undo.old_doc {
                        let _ = guard.update(&mut pager, &id_filter, old, false, false, self.options.max_document_size);
                    }
                }
                crate::transaction::UndoOp::Delete => {
                    if let Some(old) = &undo.old_doc {
                        let _ = guard.insert_many(&mut pager, vec![old.clone()], self.options.max_write_batch_size, self.options.max_document_size);
                    }
                }
            }
        }
        self.persist_catalog(&mut pager)?;
        Ok(doc! { "ok": 1.0 })
    }

    fn cmd_end_sessions(&self, cmd: &Document) -> DbResult<Document> {
        if let Some(ids) = cmd.get_array("endSessions").ok().or_else(|| cmd.get_array("ids").ok()) {
            let lsids: Vec<Vec<u8>> = ids
                .iter()
                .filter_map(|b| b.as_document())
                .filter_map(|d| match d.get("id") {
                    Some(Bson::Binary(bin)) => Some(bin.bytes.clone()),
                    _ => None,
                })
                .collect();
            self.sessions.end_sessions(&lsids);
        }
        Ok(doc! { "ok": 1.0 })
    }

    fn cmd_refresh_sessions(&self, cmd: &Document) -> DbResult<Document> {
        if let Some(ids) = cmd.get_array("refreshSessions").ok().or_else(|| cmd.get_array("ids").ok()) {
            let lsids: Vec<Vec<u8>> = ids
                .iter()
                .filter_map(|b| b.as_document())
                .filter_map(|d| match d.get("id") {
                    Some(Bson::Binary(bin)) => Some(bin.bytes.clone()),
                    _ => None,
                })
                .collect();
            self.sessions.refresh_sessions(&lsids);
        }
        Ok(doc! { "ok": 1.0 })
    }

    /// The session's active transaction id, if `lsid` names a session with
    /// one in progress. `None` means the write should run in the ordinary
    /// (non-transactional, no lock, no undo log) path.
    fn active_txn_id(&self, lsid: Option<&[u8]>) -> Option<u64> {
        let lsid = lsid?;
        self.sessions.with_active(lsid, |t| t.id)
    }

    /// The lock-manager resource name guarding writes to collection `name`.
    fn lock_resource(name: &str) -> String {
        format!("collection:{name}")
    }

    /// Acquires `mode` on the named resource for `txn`, blocking (with a
    /// bounded retry loop honoring `EngineOptions::lock_timeout`) rather
    /// than failing immediately on contention. Exposed for callers that
    /// run write operations inside an explicit transaction.
    ///
    /// # Errors
    /// Returns `DbError::DeadlockDetected` immediately on a detected cycle,
    /// or `DbError::IllegalOperation` if the timeout elapses first.
    pub fn acquire_lock(&self, txn: u64, resource: &str, mode: LockMode) -> DbResult<()> {
        let deadline = std::time::Instant::now() + self.options.lock_timeout;
        loop {
            if self.txn_manager.locks.try_acquire(txn, resource, mode)? {
                return Ok(());
            }
            if std::time::Instant::now() >= deadline {
                return Err(DbError::IllegalOperation(format!("timed out waiting for lock on {resource}")));
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use tempfile::tempdir;

    fn open_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(&dir.path().join("t.db")).unwrap();
        (db, dir)
    }

    #[test]
    fn ping_and_hello_always_succeed() {
        let (db, _dir) = open_db();
        assert_eq!(db.run_command("test", &doc! {"ping": 1}).unwrap().get_f64("ok").unwrap(), 1.0);
        assert!(db.run_command("test", &doc! {"hello": 1}).unwrap().get_bool("ismaster").unwrap());
    }

    #[test]
    fn insert_then_find_round_trips_through_run_command() {
        let (db, _dir) = open_db();
        let insert_reply = db.run_command("test", &doc! {"insert": "users", "documents": [doc!{"name": "ada"}]}).unwrap();
        assert_eq!(insert_reply.get_i32("n").unwrap(), 1);
        let find_reply = db.run_command("test", &doc! {"find": "users", "filter": {}}).unwrap();
        let cursor = find_reply.get_document("cursor").unwrap();
        let batch = cursor.get_array("firstBatch").unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn create_index_then_duplicate_insert_fails() {
        let (db, _dir) = open_db();
        db.run_command("test", &doc! {"createIndexes": "users", "indexes": [doc!{"key": {"email": 1i32}, "name": "email_1", "unique": true}]}).unwrap();
        db.run_command("test", &doc! {"insert": "users", "documents": [doc!{"email": "a@x.com"}]}).unwrap();
        let err = db.run_command("test", &doc! {"insert": "users", "documents": [doc!{"email": "a@x.com"}]});
        assert!(err.is_err());
    }

    #[test]
    fn drop_indexes_allows_duplicate_after_removal() {
        let (db, _dir) = open_db();
        db.run_command("test", &doc! {"createIndexes": "users", "indexes": [doc!{"key": {"email": 1i32}, "name": "email_1", "unique": true}]}).unwrap();
        db.run_command("test", &doc! {"insert": "users", "documents": [doc!{"email": "a@x.com"}]}).unwrap();
        let listed = db.run_command("test", &doc! {"listIndexes": "users"}).unwrap();
        let names: Vec<&str> = listed.get_document("cursor").unwrap().get_array("firstBatch").unwrap().iter()
            .filter_map(|b| b.as_document().and_then(|d| d.get_str("name").ok())).collect();
        assert!(names.contains(&"email_1"));

        let drop_reply = db.run_command("test", &doc! {"dropIndexes": "users", "index": "email_1"}).unwrap();
        assert_eq!(drop_reply.get_f64("ok").unwrap(), 1.0);

        // the unique constraint is gone, so a second document with the same
        // email now inserts without conflict.
        db.run_command("test", &doc! {"insert": "users", "documents": [doc!{"email": "a@x.com"}]}).unwrap();
        let count = db.run_command("test", &doc! {"count": "users", "query": {}}).unwrap();
        assert_eq!(count.get_i64("n").unwrap(), 2);

        // the _id_ index can never be dropped.
        let err = db.run_command("test", &doc! {"dropIndexes": "users", "index": "_id_"});
        assert!(err.is_err());
    }

    #[test]
    fn drop_collection_removes_it_from_listing() {
        let (db, _dir) = open_db();
        db.collection("a").unwrap();
        db.collection("b").unwrap();
        assert_eq!(db.list_collections(), vec!["a".to_string(), "b".to_string()]);
        assert!(db.drop_collection("a").unwrap());
        assert_eq!(db.list_collections(), vec!["b".to_string()]);
    }

    #[test]
    fn reopen_recovers_catalog_and_documents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.db");
        {
            let db = Database::open(&path).unwrap();
            db.run_command("test", &doc! {"insert": "users", "documents": [doc!{"name": "ada"}]}).unwrap();
        }
        let db2 = Database::open(&path).unwrap();
        assert_eq!(db2.list_collections(), vec!["users".to_string()]);
        let reply = db2.run_command("test", &doc! {"count": "users", "query": {}}).unwrap();
        assert_eq!(reply.get_i64("n").unwrap(), 1);
    }

    #[test]
    fn transaction_abort_restores_pre_image() {
        let (db, _dir) = open_db();
        db.run_command("test", &doc! {"insert": "users", "documents": [doc!{"_id": 1i32, "n": 1i32}]}).unwrap();
        let lsid = doc! { "id": Bson::Binary(bson::Binary { subtype: bson::spec::BinarySubtype::Uuid, bytes: vec![1, 2, 3] }) };
        db.run_command("test", &doc! {"startTransaction": 1, "lsid": lsid.clone()}).unwrap();
        db.sessions.with_active(&[1, 2, 3], |t| t.record_update("users", Bson::Int32(1), doc! {"_id": 1i32, "n": 1i32}));
        let coll = db.collection("users").unwrap();
        {
            let mut pager = db.pager.lock();
            coll.lock().update(&mut pager, &doc! {"_id": 1i32}, &doc! {"$set": {"n": 99i32}}, false, false, 16_000_000).unwrap();
        }
        db.run_command("test", &doc! {"abortTransaction": 1, "lsid": lsid}).unwrap();
        let found = {
            let mut pager = db.pager.lock();
            coll.lock().find(&mut pager, &doc! {}, None, 0, 0, None).unwrap()
        };
        assert_eq!(found[0].get_i32("n").unwrap(), 1);
    }

    #[test]
    fn command_dispatch_wires_writes_through_the_active_transaction() {
        let (db, _dir) = open_db();
        db.run_command("test", &doc! {"insert": "users", "documents": [doc!{"_id": 1i32, "n": 1i32}, doc!{"_id": 2i32, "n": 2i32}]}).unwrap();

        let lsid = doc! { "id": Bson::Binary(bson::Binary { subtype: bson::spec::BinarySubtype::Uuid, bytes: vec![9, 9, 9] }) };
        db.run_command("test", &doc! {"startTransaction": 1, "lsid": lsid.clone(), "txnNumber": 1i64}).unwrap();

        // update, delete, and a fresh insert, all addressed to the session's
        // active transaction via lsid/txnNumber.
        db.run_command(
            "test",
            &doc! {"update": "users", "updates": [doc!{"q": {"_id": 1i32}, "u": {"$set": {"n": 100i32}}}], "lsid": lsid.clone(), "txnNumber": 1i64},
        )
        .unwrap();
        db.run_command("test", &doc! {"delete": "users", "deletes": [doc!{"q": {"_id": 2i32}, "limit": 1i32}], "lsid": lsid.clone(), "txnNumber": 1i64}).unwrap();
        db.run_command("test", &doc! {"insert": "users", "documents": [doc!{"_id": 3i32, "n": 3i32}], "lsid": lsid.clone(), "txnNumber": 1i64}).unwrap();

        // mid-transaction, the writes are visible.
        let mid = db.run_command("test", &doc! {"count": "users", "query": {}}).unwrap();
        assert_eq!(mid.get_i64("n").unwrap(), 2);

        db.run_command("test", &doc! {"abortTransaction": 1, "lsid": lsid}).unwrap();

        // the update, delete, and insert all rolled back.
        let coll = db.collection("users").unwrap();
        let mut pager = db.pager.lock();
        let mut found = coll.lock().find(&mut pager, &doc! {}, None, 0, 0, None).unwrap();
        drop(pager);
        found.sort_by_key(|d| d.get_i32("_id").unwrap());
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].get_i32("n").unwrap(), 1);
        assert_eq!(found[1].get_i32("n").unwrap(), 2);
    }

    #[test]
    fn command_dispatch_without_lsid_still_writes_directly() {
        let (db, _dir) = open_db();
        db.run_command("test", &doc! {"insert": "users", "documents": [doc!{"_id": 1i32, "n": 1i32}]}).unwrap();
        db.run_command("test", &doc! {"update": "users", "updates": [doc!{"q": {"_id": 1i32}, "u": {"$set": {"n": 2i32}}}]}).unwrap();
        db.run_command("test", &doc! {"delete": "users", "deletes": [doc!{"q": {"_id": 1i32}, "limit": 1i32}]}).unwrap();
        let count = db.run_command("test", &doc! {"count": "users", "query": {}}).unwrap();
        assert_eq!(count.get_i64("n").unwrap(), 0);
    }
}
