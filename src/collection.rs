//! Collection (L4): document CRUD over a chain of data pages, index
//! maintenance through [`crate::index::IndexManager`], and the MongoDB
//! command surface (`find`, `insert`, `update`, `delete`, `findAndModify`,
//! `distinct`, `createIndexes`) built on top of [`crate::query`]'s filter/
//! sort/projection/update primitives. Per spec.md §1 there is no query
//! planner: every read is a full scan of the collection's page chain, so
//! `explain` always reports a collection scan.
//!
//! Grounded on the teacher's `collection/core.rs` (`Collection` owning its
//! storage/index state behind locks) and `collection/ops.rs` (CRUD entry
//! points dispatching into `query::exec`), generalized from the teacher's
//! page-cache-backed `StorageEngine` trait object to this crate's own
//! `Pager`/`SlottedPage` data-page format, since indexes here exist only to
//! enforce uniqueness rather than to plan an access path.

use std::collections::BTreeMap as StdBTreeMap;

use bson::oid::ObjectId;
use bson::{Bson, Document};

use crate::catalog::CollectionInfo;
use crate::errors::{DbError, DbResult};
use crate::index::IndexManager;
use crate::keystring;
use crate::query::{filter, projection, sort, update};
use crate::storage::page::{Page, PageType};
use crate::storage::pager::Pager;
use crate::storage::slotted_page::SlottedPage;
use crate::transaction::{UndoOp, UndoRecord};

#[derive(Debug, Clone, Copy)]
struct RecordLoc {
    page_id: u32,
    slot: u16,
}

#[derive(Debug, Default, Clone)]
pub struct UpdateReport {
    pub matched: u64,
    pub modified: u64,
    pub upserted_id: Option<Bson>,
}

#[derive(Debug, Default, Clone)]
pub struct DeleteReport {
    pub deleted: u64,
}

/// One collection's metadata and indexes. Holds no reference to the
/// [`Pager`]; every method that touches storage takes `&mut Pager`
/// explicitly, since the whole database shares one data file and one
/// pager instance (owned by [`crate::database::Database`]).
pub struct Collection {
    info: CollectionInfo,
    pub indexes: IndexManager,
}

impl Collection {
    #[must_use]
    pub fn new(info: CollectionInfo) -> Self {
        let indexes = IndexManager::from_infos(&info.indexes);
        Self { info, indexes }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.info.name
    }

    #[must_use]
    pub fn document_count(&self) -> u64 {
        self.info.document_count
    }

    /// Snapshots this collection's catalog entry, refreshing the index
    /// metadata from the live index set.
    #[must_use]
    pub fn to_info(&self) -> CollectionInfo {
        let mut info = self.info.clone();
        info.indexes = self.indexes.to_infos();
        info
    }

    fn scan(&self, pager: &mut Pager) -> DbResult<Vec<(RecordLoc, Document)>> {
        let mut out = Vec::new();
        let mut page_id = self.info.first_page_id;
        while page_id != 0 {
            let page = pager.read_page(page_id)?;
            let item_count = page.item_count;
            let mut data = page.data.clone();
            let slotted = SlottedPage::new(&mut data);
            for slot in 0..item_count {
                if let Some(bytes) = slotted.get(item_count, slot) {
                    let doc: Document = bson::from_slice(&bytes)?;
                    out.push((RecordLoc { page_id, slot }, doc));
                }
            }
            page_id = page.next_page_id;
        }
        Ok(out)
    }

    /// Scans for documents matching `filter`, applying `sort`/`skip`/
    /// `limit`/`projection` in that order (matching `find`'s documented
    /// option ordering).
    ///
    /// # Errors
    /// Returns `DbError` on a corrupted page chain or BSON decode failure.
    pub fn find(
        &self,
        pager: &mut Pager,
        filter_doc: &Document,
        sort_doc: Option<&Document>,
        skip: u64,
        limit: u64,
        proj: Option<&Document>,
    ) -> DbResult<Vec<Document>> {
        let mut docs: Vec<Document> =
            self.scan(pager)?.into_iter().map(|(_, d)| d).filter(|d| filter::matches(d, filter_doc)).collect();
        if let Some(s) = sort_doc {
            sort::sort_documents(&mut docs, s);
        }
        let skipped = docs.into_iter().skip(skip as usize);
        let limited: Vec<Document> =
            if limit == 0 { skipped.collect() } else { skipped.take(limit as usize).collect() };
        Ok(match proj {
            Some(p) => limited.iter().map(|d| projection::apply(d, p)).collect(),
            None => limited,
        })
    }

    /// # Errors
    /// Returns `DbError` on a corrupted page chain.
    pub fn count(&self, pager: &mut Pager, filter_doc: &Document) -> DbResult<u64> {
        Ok(self.scan(pager)?.into_iter().filter(|(_, d)| filter::matches(d, filter_doc)).count() as u64)
    }

    /// Deduplicated values of `field` across documents matching `filter`,
    /// keyed by canonical [`keystring`] bytes rather than a debug-format
    /// string, so values that print identically but differ in BSON type
    /// (e.g. `Int32(1)` vs `Double(1.0)`, which MongoDB treats as equal)
    /// collapse into one entry while genuinely distinct values never
    /// collide on formatting coincidence.
    ///
    /// # Errors
    /// Returns `DbError` on a corrupted page chain.
    pub fn distinct(&self, pager: &mut Pager, field: &str, filter_doc: &Document) -> DbResult<Vec<Bson>> {
        let mut seen: StdBTreeMap<Vec<u8>, Bson> = StdBTreeMap::new();
        for (_, doc) in self.scan(pager)?.into_iter().filter(|(_, d)| filter::matches(d, filter_doc)) {
            let value = crate::catalog::get_dotted(&doc, field);
            if matches!(value, Bson::Null) && !doc.contains_key(field) {
                continue;
            }
            if let Ok(key) = keystring::distinct_key(&value) {
                seen.entry(key).or_insert(value);
            }
        }
        Ok(seen.into_values().collect())
    }

    fn ensure_id(doc: &mut Document) -> DbResult<()> {
        match doc.get("_id") {
            Some(Bson::Array(_)) => Err(DbError::InvalidIdField("_id cannot be an array".into())),
            Some(Bson::RegularExpression(_)) => Err(DbError::InvalidIdField("_id cannot be a regular expression".into())),
            Some(Bson::Null) => Err(DbError::InvalidIdField("_id cannot be null".into())),
            Some(_) => Ok(()),
            None => {
                doc.insert("_id", Bson::ObjectId(ObjectId::new()));
                Ok(())
            }
        }
    }

    fn append_record(&mut self, pager: &mut Pager, bytes: &[u8]) -> DbResult<RecordLoc> {
        if self.info.last_page_id != 0 {
            let mut page = pager.read_page(self.info.last_page_id)?;
            let item_count = page.item_count;
            let slot = {
                let mut slotted = SlottedPage::new(&mut page.data);
                slotted.insert(item_count, bytes)
            };
            if let Some(slot) = slot {
                page.item_count += 1;
                let page_id = page.page_id;
                pager.write_page(page)?;
                return Ok(RecordLoc { page_id, slot });
            }
        }
        self.append_new_page(pager, bytes)
    }

    fn append_new_page(&mut self, pager: &mut Pager, bytes: &[u8]) -> DbResult<RecordLoc> {
        let mut page = pager.allocate_page(PageType::Data)?;
        let slot = {
            let mut slotted = SlottedPage::new(&mut page.data);
            slotted.insert(0, bytes).ok_or(DbError::OutOfSpace)?
        };
        page.item_count = 1;
        let page_id = page.page_id;
        if self.info.first_page_id == 0 {
            self.info.first_page_id = page_id;
        } else {
            let mut old_last = pager.read_page(self.info.last_page_id)?;
            old_last.next_page_id = page_id;
            pager.write_page(old_last)?;
            page.prev_page_id = self.info.last_page_id;
        }
        self.info.last_page_id = page_id;
        pager.write_page(page)?;
        Ok(RecordLoc { page_id, slot })
    }

    fn write_slot(&mut self, pager: &mut Pager, loc: RecordLoc, bytes: &[u8]) -> DbResult<bool> {
        let mut page = pager.read_page(loc.page_id)?;
        let item_count = page.item_count;
        let ok = {
            let mut slotted = SlottedPage::new(&mut page.data);
            slotted.update(item_count, loc.slot, bytes)
        };
        if ok {
            pager.write_page(page)?;
        }
        Ok(ok)
    }

    fn delete_slot(&mut self, pager: &mut Pager, loc: RecordLoc) -> DbResult<()> {
        let mut page = pager.read_page(loc.page_id)?;
        let item_count = page.item_count;
        {
            let mut slotted = SlottedPage::new(&mut page.data);
            slotted.delete(item_count, loc.slot);
        }
        pager.write_page(page)?;
        Ok(())
    }

    /// Inserts `docs`, auto-generating `_id` where absent. Stops and
    /// returns the error from the first document that fails (a unique
    /// index violation, an oversized document, or a malformed `_id`);
    /// documents already inserted before the failure remain in place, per
    /// MongoDB's `insertMany` (non-ordered-transaction) semantics.
    ///
    /// # Errors
    /// Returns `DbError::BadValue` if `docs.len()` exceeds `max_batch`, or
    /// the first per-document insert failure.
    pub fn insert_many(
        &mut self,
        pager: &mut Pager,
        mut docs: Vec<Document>,
        max_batch: usize,
        max_doc_size: usize,
    ) -> DbResult<Vec<Bson>> {
        if docs.len() > max_batch {
            return Err(DbError::BadValue(format!("insert batch of {} exceeds max_write_batch_size {max_batch}", docs.len())));
        }
        let mut ids = Vec::with_capacity(docs.len());
        for doc in docs.drain(..) {
            ids.push(self.insert_one(pager, doc, max_doc_size)?);
        }
        Ok(ids)
    }

    /// Transactional variant of [`Self::insert_many`]: identical insert
    /// behavior, but appends an [`UndoRecord`] to `undo` for every document
    /// that lands, so an `abortTransaction` can delete them back out.
    ///
    /// # Errors
    /// Same as [`Self::insert_many`].
    pub fn insert_many_txn(
        &mut self,
        pager: &mut Pager,
        docs: Vec<Document>,
        max_batch: usize,
        max_doc_size: usize,
        undo: &mut Vec<UndoRecord>,
        coll_name: &str,
    ) -> DbResult<Vec<Bson>> {
        let ids = self.insert_many(pager, docs, max_batch, max_doc_size)?;
        for id in &ids {
            undo.push(UndoRecord { op: UndoOp::Insert, collection: coll_name.to_string(), doc_id: id.clone(), old_doc: None });
        }
        Ok(ids)
    }

    fn insert_one(&mut self, pager: &mut Pager, mut doc: Document, max_doc_size: usize) -> DbResult<Bson> {
        Self::ensure_id(&mut doc)?;
        let bytes = bson::to_vec(&doc)?;
        if bytes.len() > max_doc_size {
            return Err(DbError::BadValue(format!("document size {} exceeds max_document_size {max_doc_size}", bytes.len())));
        }
        let loc = self.append_record(pager, &bytes)?;
        if let Err(e) = self.indexes.check_and_insert_document(pager, &doc) {
            self.delete_slot(pager, loc)?;
            return Err(map_index_error(e));
        }
        self.info.document_count += 1;
        Ok(doc.get("_id").cloned().unwrap_or(Bson::Null))
    }

    /// Applies `update_doc` (an operator document, or a full replacement
    /// document if it has no `$`-prefixed keys) to every document matching
    /// `filter_doc`, or just the first when `multi` is false. Performs an
    /// upsert insert when nothing matched and `upsert` is true.
    ///
    /// # Errors
    /// Returns `DbError` from a malformed update document or an index
    /// constraint violation on the updated/upserted document.
    pub fn update(
        &mut self,
        pager: &mut Pager,
        filter_doc: &Document,
        update_doc: &Document,
        multi: bool,
        upsert: bool,
        max_doc_size: usize,
    ) -> DbResult<UpdateReport> {
        let candidates: Vec<(RecordLoc, Document)> =
            self.scan(pager)?.into_iter().filter(|(_, d)| filter::matches(d, filter_doc)).collect();

        let mut report = UpdateReport::default();
        let targets: Vec<(RecordLoc, Document)> = if multi { candidates } else { candidates.into_iter().take(1).collect() };

        if targets.is_empty() {
            if upsert {
                let mut seed = filter_seed_document(filter_doc);
                let is_operator = update::is_operator_update(update_doc);
                if is_operator {
                    update::apply_update(&mut seed, update_doc, true)?;
                } else {
                    seed = update_doc.clone();
                }
                let id = self.insert_one(pager, seed, max_doc_size)?;
                report.upserted_id = Some(id);
            }
            return Ok(report);
        }

        for (loc, old_doc) in targets {
            report.matched += 1;
            let mut new_doc = old_doc.clone();
            let changed = if update::is_operator_update(update_doc) {
                update::apply_update(&mut new_doc, update_doc, false)?
            } else {
                new_doc = update_doc.clone();
                new_doc.insert("_id", old_doc.get("_id").cloned().unwrap_or(Bson::Null));
                new_doc != old_doc
            };
            if !changed {
                continue;
            }
            let bytes = bson::to_vec(&new_doc)?;
            if bytes.len() > max_doc_size {
                return Err(DbError::BadValue(format!("document size {} exceeds max_document_size {max_doc_size}", bytes.len())));
            }
            if let Err(e) = self.indexes.check_and_update_document(pager, &old_doc, &new_doc) {
                return Err(map_index_error(e));
            }
            if !self.write_slot(pager, loc, &bytes)? {
                // Grown past the page's remaining room: relocate the record.
                self.delete_slot(pager, loc)?;
                self.append_record(pager, &bytes)?;
            }
            report.modified += 1;
        }
        Ok(report)
    }

    /// Transactional variant of [`Self::update`]: identical matching/apply
    /// behavior, but appends an [`UndoRecord`] (the pre-image) to `undo` for
    /// every document actually modified, and an insert undo entry for an
    /// upsert, so an `abortTransaction` can restore prior state.
    ///
    /// # Errors
    /// Same as [`Self::update`].
    #[allow(clippy::too_many_arguments)]
    pub fn update_txn(
        &mut self,
        pager: &mut Pager,
        filter_doc: &Document,
        update_doc: &Document,
        multi: bool,
        upsert: bool,
        max_doc_size: usize,
        undo: &mut Vec<UndoRecord>,
        coll_name: &str,
    ) -> DbResult<UpdateReport> {
        let candidates: Vec<(RecordLoc, Document)> =
            self.scan(pager)?.into_iter().filter(|(_, d)| filter::matches(d, filter_doc)).collect();

        let mut report = UpdateReport::default();
        let targets: Vec<(RecordLoc, Document)> = if multi { candidates } else { candidates.into_iter().take(1).collect() };

        if targets.is_empty() {
            if upsert {
                let mut seed = filter_seed_document(filter_doc);
                let is_operator = update::is_operator_update(update_doc);
                if is_operator {
                    update::apply_update(&mut seed, update_doc, true)?;
                } else {
                    seed = update_doc.clone();
                }
                let id = self.insert_one(pager, seed, max_doc_size)?;
                undo.push(UndoRecord { op: UndoOp::Insert, collection: coll_name.to_string(), doc_id: id.clone(), old_doc: None });
                report.upserted_id = Some(id);
            }
            return Ok(report);
        }

        for (loc, old_doc) in targets {
            report.matched += 1;
            let mut new_doc = old_doc.clone();
            let changed = if update::is_operator_update(update_doc) {
                update::apply_update(&mut new_doc, update_doc, false)?
            } else {
                new_doc = update_doc.clone();
                new_doc.insert("_id", old_doc.get("_id").cloned().unwrap_or(Bson::Null));
                new_doc != old_doc
            };
            if !changed {
                continue;
            }
            let bytes = bson::to_vec(&new_doc)?;
            if bytes.len() > max_doc_size {
                return Err(DbError::BadValue(format!("document size {} exceeds max_document_size {max_doc_size}", bytes.len())));
            }
            if let Err(e) = self.indexes.check_and_update_document(pager, &old_doc, &new_doc) {
                return Err(map_index_error(e));
            }
            if !self.write_slot(pager, loc, &bytes)? {
                self.delete_slot(pager, loc)?;
                self.append_record(pager, &bytes)?;
            }
            let doc_id = old_doc.get("_id").cloned().unwrap_or(Bson::Null);
            undo.push(UndoRecord { op: UndoOp::Update, collection: coll_name.to_string(), doc_id, old_doc: Some(old_doc) });
            report.modified += 1;
        }
        Ok(report)
    }

    /// Deletes every document matching `filter_doc`, or just the first
    /// when `multi` is false.
    ///
    /// # Errors
    /// Returns `DbError` on a corrupted page chain or index failure.
    pub fn delete(&mut self, pager: &mut Pager, filter_doc: &Document, multi: bool) -> DbResult<DeleteReport> {
        let candidates: Vec<(RecordLoc, Document)> =
            self.scan(pager)?.into_iter().filter(|(_, d)| filter::matches(d, filter_doc)).collect();
        let targets: Vec<(RecordLoc, Document)> = if multi { candidates } else { candidates.into_iter().take(1).collect() };

        let mut report = DeleteReport::default();
        for (loc, doc) in targets {
            self.indexes.remove_document(pager, &doc)?;
            self.delete_slot(pager, loc)?;
            self.info.document_count = self.info.document_count.saturating_sub(1);
            report.deleted += 1;
        }
        Ok(report)
    }

    /// Transactional variant of [`Self::delete`]: identical matching/delete
    /// behavior, but appends an [`UndoRecord`] (the pre-image) to `undo` for
    /// every document removed, so an `abortTransaction` can reinsert them.
    ///
    /// # Errors
    /// Same as [`Self::delete`].
    pub fn delete_txn(
        &mut self,
        pager: &mut Pager,
        filter_doc: &Document,
        multi: bool,
        undo: &mut Vec<UndoRecord>,
        coll_name: &str,
    ) -> DbResult<DeleteReport> {
        let candidates: Vec<(RecordLoc, Document)> =
            self.scan(pager)?.into_iter().filter(|(_, d)| filter::matches(d, filter_doc)).collect();
        let targets: Vec<(RecordLoc, Document)> = if multi { candidates } else { candidates.into_iter().take(1).collect() };

        let mut report = DeleteReport::default();
        for (loc, doc) in targets {
            self.indexes.remove_document(pager, &doc)?;
            self.delete_slot(pager, loc)?;
            self.info.document_count = self.info.document_count.saturating_sub(1);
            let doc_id = doc.get("_id").cloned().unwrap_or(Bson::Null);
            undo.push(UndoRecord { op: UndoOp::Delete, collection: coll_name.to_string(), doc_id, old_doc: Some(doc) });
            report.deleted += 1;
        }
        Ok(report)
    }

    /// `findAndModify`: locates the first document matching `filter_doc`
    /// (after `sort_doc` if given), then either removes it or applies
    /// `update_doc`, returning the pre- or post-image per `return_new`.
    ///
    /// # Errors
    /// Returns `DbError` from a malformed update document or index
    /// violation.
    #[allow(clippy::too_many_arguments)]
    pub fn find_and_modify(
        &mut self,
        pager: &mut Pager,
        filter_doc: &Document,
        sort_doc: Option<&Document>,
        update_doc: Option<&Document>,
        remove: bool,
        upsert: bool,
        return_new: bool,
        max_doc_size: usize,
    ) -> DbResult<Option<Document>> {
        let mut candidates: Vec<(RecordLoc, Document)> =
            self.scan(pager)?.into_iter().filter(|(_, d)| filter::matches(d, filter_doc)).collect();
        if let Some(s) = sort_doc {
            candidates.sort_by(|a, b| sort::compare_docs(&a.1, &b.1, &sort::parse_sort_spec(s)));
        }

        let Some((loc, old_doc)) = candidates.into_iter().next() else {
            if remove {
                return Ok(None);
            }
            if upsert {
                if let Some(update_doc) = update_doc {
                    let mut seed = filter_seed_document(filter_doc);
                    if update::is_operator_update(update_doc) {
                        update::apply_update(&mut seed, update_doc, true)?;
                    } else {
                        seed = update_doc.clone();
                    }
                    self.insert_one(pager, seed.clone(), max_doc_size)?;
                    return Ok(if return_new { Some(seed) } else { None });
                }
            }
            return Ok(None);
        };

        if remove {
            self.indexes.remove_document(pager, &old_doc)?;
            self.delete_slot(pager, loc)?;
            self.info.document_count = self.info.document_count.saturating_sub(1);
            return Ok(Some(old_doc));
        }

        let Some(update_doc) = update_doc else { return Ok(Some(old_doc)) };
        let mut new_doc = old_doc.clone();
        if update::is_operator_update(update_doc) {
            update::apply_update(&mut new_doc, update_doc, false)?;
        } else {
            new_doc = update_doc.clone();
            new_doc.insert("_id", old_doc.get("_id").cloned().unwrap_or(Bson::Null));
        }
        let bytes = bson::to_vec(&new_doc)?;
        if bytes.len() > max_doc_size {
            return Err(DbError::BadValue(format!("document size {} exceeds max_document_size {max_doc_size}", bytes.len())));
        }
        if let Err(e) = self.indexes.check_and_update_document(pager, &old_doc, &new_doc) {
            return Err(map_index_error(e));
        }
        if !self.write_slot(pager, loc, &bytes)? {
            self.delete_slot(pager, loc)?;
            self.append_record(pager, &bytes)?;
        }
        Ok(Some(if return_new { new_doc } else { old_doc }))
    }

    /// Builds `name` over every current document, per
    /// [`IndexManager::create_index`]'s atomic all-or-nothing contract.
    ///
    /// # Errors
    /// Returns `DbError::BTree` wrapping `DuplicateKey` if `unique` and two
    /// existing documents collide on the new index's key.
    pub fn create_index(&mut self, pager: &mut Pager, name: &str, keys: Vec<(String, i32)>, unique: bool) -> DbResult<()> {
        let docs: Vec<Document> = self.scan(pager)?.into_iter().map(|(_, d)| d).collect();
        self.indexes.create_index(pager, name, keys, unique, docs.into_iter())?;
        Ok(())
    }

    /// Drops the named index. `_id_` may never be dropped.
    ///
    /// # Errors
    /// Returns `DbError::BadValue` for `_id_` or an unknown index name.
    pub fn drop_index(&mut self, name: &str) -> DbResult<()> {
        if name == "_id_" {
            return Err(DbError::BadValue("cannot drop the _id_ index".into()));
        }
        if self.indexes.drop_index(name).is_none() {
            return Err(DbError::BadValue(format!("index not found with name [{name}]")));
        }
        Ok(())
    }

    /// Walks the page chain checking structural invariants (valid page
    /// types, a terminating chain, decodable BSON in every live slot), and
    /// each index's B+Tree integrity. Returns the number of documents
    /// scanned.
    ///
    /// # Errors
    /// Returns `DbError` describing the first inconsistency found.
    pub fn validate(&self, pager: &mut Pager) -> DbResult<u64> {
        let mut page_id = self.info.first_page_id;
        let mut seen = std::collections::HashSet::new();
        let mut count = 0u64;
        while page_id != 0 {
            if !seen.insert(page_id) {
                return Err(DbError::InternalError(format!("collection {} has a cyclic page chain at page {page_id}", self.info.name)));
            }
            let page = pager.read_page(page_id)?;
            if page.page_type != PageType::Data {
                return Err(DbError::InternalError(format!("page {page_id} in collection {} has non-data type", self.info.name)));
            }
            let item_count = page.item_count;
            let mut data = page.data.clone();
            let slotted = SlottedPage::new(&mut data);
            for slot in 0..item_count {
                if let Some(bytes) = slotted.get(item_count, slot) {
                    let _: Document = bson::from_slice(&bytes)?;
                    count += 1;
                }
            }
            page_id = page.next_page_id;
        }
        for index in self.indexes.iter() {
            index.tree.check_tree_integrity(pager).map_err(DbError::from)?;
        }
        Ok(count)
    }
}

fn map_index_error(e: crate::index::IndexCheckError) -> DbError {
    match e {
        crate::index::IndexCheckError::Duplicate(v) => {
            DbError::duplicate_key(&v.index_name, &format!("{:?}", v.key_value))
        }
        crate::index::IndexCheckError::Storage(be) => DbError::from(be),
    }
}

/// Seeds an upsert's new document from the equality clauses of its filter
/// (MongoDB copies `field: value` and `field: {$eq: value}` clauses from
/// the filter into the inserted document; operator clauses that aren't a
/// plain equality are skipped).
fn filter_seed_document(filter_doc: &Document) -> Document {
    let mut seed = Document::new();
    for (key, value) in filter_doc {
        if key.starts_with('$') {
            continue;
        }
        match value {
            Bson::Document(d) if d.keys().all(|k| k.starts_with('$')) => {
                if let Some(eq) = d.get("$eq") {
                    seed.insert(key.clone(), eq.clone());
                }
            }
            other => {
                seed.insert(key.clone(), other.clone());
            }
        }
    }
    seed
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use tempfile::tempdir;

    fn fresh(name: &str) -> (Pager, Collection, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let pager = Pager::open(&dir.path().join("t.db"), 64).unwrap();
        let info = CollectionInfo { name: name.to_string(), first_page_id: 0, last_page_id: 0, document_count: 0, indexes: vec![] };
        (pager, Collection::new(info), dir)
    }

    #[test]
    fn insert_and_find_round_trip() {
        let (mut pager, mut coll, _dir) = fresh("t");
        coll.insert_many(&mut pager, vec![doc! {"a": 1}, doc! {"a": 2}], 1000, 16_000_000).unwrap();
        let found = coll.find(&mut pager, &doc! {}, None, 0, 0, None).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|d| d.contains_key("_id")));
    }

    #[test]
    fn update_many_applies_operators() {
        let (mut pager, mut coll, _dir) = fresh("t");
        coll.insert_many(&mut pager, vec![doc! {"n": 1}, doc! {"n": 2}], 1000, 16_000_000).unwrap();
        let report = coll.update(&mut pager, &doc! {}, &doc! {"$inc": {"n": 10}}, true, false, 16_000_000).unwrap();
        assert_eq!(report.modified, 2);
        let found = coll.find(&mut pager, &doc! {}, Some(&doc! {"n": 1}), 0, 0, None).unwrap();
        assert_eq!(found[0].get_i32("n").unwrap(), 11);
    }

    #[test]
    fn upsert_inserts_when_no_match() {
        let (mut pager, mut coll, _dir) = fresh("t");
        let report = coll.update(&mut pager, &doc! {"sku": "abc"}, &doc! {"$set": {"qty": 5}}, false, true, 16_000_000).unwrap();
        assert!(report.upserted_id.is_some());
        let found = coll.find(&mut pager, &doc! {}, None, 0, 0, None).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get_str("sku").unwrap(), "abc");
        assert_eq!(found[0].get_i32("qty").unwrap(), 5);
    }

    #[test]
    fn delete_removes_matching_documents() {
        let (mut pager, mut coll, _dir) = fresh("t");
        coll.insert_many(&mut pager, vec![doc! {"n": 1}, doc! {"n": 2}], 1000, 16_000_000).unwrap();
        let report = coll.delete(&mut pager, &doc! {"n": 1}, false).unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(coll.count(&mut pager, &doc! {}).unwrap(), 1);
    }

    #[test]
    fn unique_index_rejects_duplicate_insert_and_rolls_back_record() {
        let (mut pager, mut coll, _dir) = fresh("t");
        coll.create_index(&mut pager, "email_1", vec![("email".into(), 1)], true).unwrap();
        coll.insert_many(&mut pager, vec![doc! {"email": "a@x.com"}], 1000, 16_000_000).unwrap();
        let err = coll.insert_many(&mut pager, vec![doc! {"email": "a@x.com"}], 1000, 16_000_000);
        assert!(err.is_err());
        assert_eq!(coll.count(&mut pager, &doc! {}).unwrap(), 1);
    }

    #[test]
    fn duplicate_key_error_names_the_violating_index_not_id() {
        let (mut pager, mut coll, _dir) = fresh("t");
        coll.create_index(&mut pager, "_id_", vec![("_id".into(), 1)], true).unwrap();
        coll.create_index(&mut pager, "email_1", vec![("email".into(), 1)], true).unwrap();
        coll.insert_many(&mut pager, vec![doc! {"_id": 1i32, "email": "a@x.com"}], 1000, 16_000_000).unwrap();

        // A different _id, so only the email_1 index collides.
        let err = coll.insert_many(&mut pager, vec![doc! {"_id": 2i32, "email": "a@x.com"}], 1000, 16_000_000).unwrap_err();
        match err {
            DbError::DuplicateKey { key_pattern, key_value } => {
                assert_eq!(key_pattern, "email_1");
                assert!(key_value.contains("a@x.com"));
            }
            other => panic!("expected DuplicateKey, got {other:?}"),
        }
        // The _id_ index must have been rolled back along with the record.
        assert_eq!(coll.count(&mut pager, &doc! {}).unwrap(), 1);
    }

    #[test]
    fn insert_many_txn_appends_insert_undo_for_every_document() {
        let (mut pager, mut coll, _dir) = fresh("t");
        let mut undo = Vec::new();
        let ids = coll
            .insert_many_txn(&mut pager, vec![doc! {"a": 1}, doc! {"a": 2}], 1000, 16_000_000, &mut undo, "t")
            .unwrap();
        assert_eq!(undo.len(), 2);
        for (id, rec) in ids.iter().zip(undo.iter()) {
            assert!(matches!(rec.op, UndoOp::Insert));
            assert_eq!(&rec.collection, "t");
            assert_eq!(&rec.doc_id, id);
            assert!(rec.old_doc.is_none());
        }
    }

    #[test]
    fn update_txn_records_pre_image_and_upsert_records_insert() {
        let (mut pager, mut coll, _dir) = fresh("t");
        coll.insert_many(&mut pager, vec![doc! {"_id": 1i32, "a": 1}], 1000, 16_000_000).unwrap();

        let mut undo = Vec::new();
        coll.update_txn(&mut pager, &doc! {"_id": 1i32}, &doc! {"$set": {"a": 2}}, false, false, 16_000_000, &mut undo, "t")
            .unwrap();
        assert_eq!(undo.len(), 1);
        match &undo[0] {
            UndoRecord { op: UndoOp::Update, collection, doc_id, old_doc: Some(old) } => {
                assert_eq!(collection, "t");
                assert_eq!(doc_id, &Bson::Int32(1));
                assert_eq!(old.get_i32("a").unwrap(), 1);
            }
            other => panic!("expected Update undo record, got {other:?}"),
        }

        let mut undo = Vec::new();
        let report = coll
            .update_txn(&mut pager, &doc! {"_id": 99i32}, &doc! {"$set": {"a": 9}}, false, true, 16_000_000, &mut undo, "t")
            .unwrap();
        assert!(report.upserted_id.is_some());
        assert_eq!(undo.len(), 1);
        assert!(matches!(undo[0].op, UndoOp::Insert));
        assert!(undo[0].old_doc.is_none());
    }

    #[test]
    fn delete_txn_records_removed_document_as_pre_image() {
        let (mut pager, mut coll, _dir) = fresh("t");
        coll.insert_many(&mut pager, vec![doc! {"_id": 1i32, "a": 1}], 1000, 16_000_000).unwrap();

        let mut undo = Vec::new();
        let report = coll.delete_txn(&mut pager, &doc! {"_id": 1i32}, false, &mut undo, "t").unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(undo.len(), 1);
        match &undo[0] {
            UndoRecord { op: UndoOp::Delete, collection, doc_id, old_doc: Some(old) } => {
                assert_eq!(collection, "t");
                assert_eq!(doc_id, &Bson::Int32(1));
                assert_eq!(old.get_i32("a").unwrap(), 1);
            }
            other => panic!("expected Delete undo record, got {other:?}"),
        }
        assert_eq!(coll.count(&mut pager, &doc! {}).unwrap(), 0);
    }

    #[test]
    fn distinct_dedupes_by_canonical_value() {
        let (mut pager, mut coll, _dir) = fresh("t");
        coll.insert_many(&mut pager, vec![doc! {"n": 1}, doc! {"n": 1.0}, doc! {"n": 2}], 1000, 16_000_000).unwrap();
        let values = coll.distinct(&mut pager, "n", &doc! {}).unwrap();
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn validate_counts_documents_and_checks_indexes() {
        let (mut pager, mut coll, _dir) = fresh("t");
        coll.create_index(&mut pager, "_id_", vec![("_id".into(), 1)], true).unwrap();
        coll.insert_many(&mut pager, vec![doc! {"n": 1}, doc! {"n": 2}, doc! {"n": 3}], 1000, 16_000_000).unwrap();
        assert_eq!(coll.validate(&mut pager).unwrap(), 3);
    }
}
