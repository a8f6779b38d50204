//! Index engine (L5): wraps a [`BTree`] with the `{name, keys, unique}`
//! metadata from the catalog and the key-encoding rules from
//! [`crate::keystring`]. Per spec.md §1 the engine always scans
//! collections for queries; indexes exist purely to enforce uniqueness
//! and to report via `listIndexes`/`explain`, never as an access path.
//!
//! Grounded on the teacher's `cache` module for the "one manager owns many
//! named handles behind a lock" shape, generalized here from a page cache
//! to a per-collection index set.

use std::collections::HashMap;

use bson::{Bson, Document};

use crate::btree::{BTree, BTreeError};
use crate::catalog::{get_dotted, IndexInfo};
use crate::keystring::{self, Direction};
use crate::storage::pager::Pager;

/// A single named index: B+Tree root plus the field/direction/uniqueness
/// metadata needed to derive keys from documents.
#[derive(Debug, Clone)]
pub struct Index {
    pub name: String,
    pub keys: Vec<(String, i32)>,
    pub unique: bool,
    pub tree: BTree,
}

/// Which index rejected a write and the key value it collided on, so a
/// `DuplicateKey` error can name the actual offending index/keyPattern
/// instead of assuming `_id_`.
#[derive(Debug, Clone)]
pub struct IndexViolation {
    pub index_name: String,
    pub key_value: Document,
}

/// Either a unique-constraint violation (with enough context to attribute
/// it to the right index) or an underlying storage failure.
#[derive(Debug)]
pub enum IndexCheckError {
    Duplicate(IndexViolation),
    Storage(BTreeError),
}

impl Index {
    #[must_use]
    pub fn from_info(info: &IndexInfo) -> Self {
        Self { name: info.name.clone(), keys: info.keys.clone(), unique: info.unique, tree: BTree::open(info.root_page_id) }
    }

    #[must_use]
    pub fn to_info(&self) -> IndexInfo {
        IndexInfo { name: self.name.clone(), keys: self.keys.clone(), unique: self.unique, root_page_id: self.tree.root_page_id }
    }

    /// Encodes this index's compound key for `doc`, per spec.md §3's
    /// `encodeIndexEntryKey`. For non-unique indexes, appends the `_id`
    /// disambiguator so every B+Tree entry still has a distinct key.
    /// Unsupported field types (Decimal128, JS code, symbols) fall back to
    /// a `Bson::Null` encoding rather than failing the whole insert, since
    /// indexes here are uniqueness aids, not the query path.
    #[must_use]
    pub fn encode_key(&self, doc: &Document) -> Vec<u8> {
        let fields: Vec<(Bson, Direction)> = self
            .keys
            .iter()
            .map(|(path, dir)| (get_dotted(doc, path), Direction::from_i32(*dir)))
            .collect();
        let mut key = keystring::encode_compound(&fields)
            .unwrap_or_else(|_| keystring::encode_compound(&[(Bson::Null, Direction::Ascending)]).unwrap_or_default());
        if !self.unique {
            if let Some(id) = doc.get("_id") {
                key = keystring::with_id_disambiguator(key, id);
            }
        }
        key
    }

    /// Inserts `doc`'s key into the tree, value is `{_id: doc._id}`.
    ///
    /// # Errors
    /// Returns `BTreeError::DuplicateKey` if `unique` and the key exists.
    pub fn insert_document(&mut self, pager: &mut Pager, doc: &Document) -> Result<(), BTreeError> {
        let key = self.encode_key(doc);
        let value_doc = bson::doc! { "_id": doc.get("_id").cloned().unwrap_or(Bson::Null) };
        let value = bson::to_vec(&value_doc).map_err(|e| BTreeError::PageCorrupted(e.to_string()))?;
        self.tree.insert(pager, key, value, self.unique)
    }

    /// Removes `doc`'s key from the tree. No-op if absent (tolerant of
    /// catalog/data drift during crash recovery).
    ///
    /// # Errors
    /// Returns `BTreeError` on storage failure.
    pub fn remove_document(&mut self, pager: &mut Pager, doc: &Document) -> Result<(), BTreeError> {
        let key = self.encode_key(doc);
        self.tree.delete(pager, &key)?;
        Ok(())
    }

    /// Builds the `{field: value, ...}` document describing `doc`'s key in
    /// this index, for attributing a `DuplicateKey` error to the field(s)
    /// that actually collided rather than to `_id`.
    #[must_use]
    pub fn key_value_doc(&self, doc: &Document) -> Document {
        self.keys.iter().map(|(path, _)| (path.clone(), get_dotted(doc, path))).collect()
    }

    /// Re-keys `old` to `new` (delete-then-insert, mirroring an update
    /// that changes an indexed field).
    ///
    /// # Errors
    /// Returns `BTreeError::DuplicateKey` if `unique` and the new key
    /// collides with an existing entry other than `old` itself.
    pub fn update_document(&mut self, pager: &mut Pager, old: &Document, new: &Document) -> Result<(), BTreeError> {
        let old_key = self.encode_key(old);
        let new_key = self.encode_key(new);
        if old_key == new_key {
            return Ok(());
        }
        self.tree.delete(pager, &old_key)?;
        let value_doc = bson::doc! { "_id": new.get("_id").cloned().unwrap_or(Bson::Null) };
        let value = bson::to_vec(&value_doc).map_err(|e| BTreeError::PageCorrupted(e.to_string()))?;
        if let Err(e) = self.tree.insert(pager, new_key, value, self.unique) {
            // Roll back: restore the old entry so the index stays consistent
            // with the (unchanged-on-disk) document on failure.
            let old_value_doc = bson::doc! { "_id": old.get("_id").cloned().unwrap_or(Bson::Null) };
            let old_value = bson::to_vec(&old_value_doc).unwrap_or_default();
            let _ = self.tree.insert(pager, old_key, old_value, self.unique);
            return Err(e);
        }
        Ok(())
    }
}

/// Owns every index for one collection and serializes index-structure
/// mutations through `&mut self`, mirroring the teacher's single-writer
/// cache discipline generalized from pages to index trees.
#[derive(Debug, Default)]
pub struct IndexManager {
    indexes: HashMap<String, Index>,
}

impl IndexManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_infos(infos: &[IndexInfo]) -> Self {
        let mut indexes = HashMap::new();
        for info in infos {
            indexes.insert(info.name.clone(), Index::from_info(info));
        }
        Self { indexes }
    }

    #[must_use]
    pub fn to_infos(&self) -> Vec<IndexInfo> {
        self.indexes.values().map(Index::to_info).collect()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Index> {
        self.indexes.get(name)
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indexes.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Index> {
        self.indexes.values_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Index> {
        self.indexes.values()
    }

    /// Creates a new index named `name`, building it over every document
    /// `documents` supplies. Rolls back (drops the freshly allocated tree)
    /// if any document fails the unique constraint, matching spec.md
    /// §4.5's atomic `createIndex` contract.
    ///
    /// # Errors
    /// Returns `BTreeError::DuplicateKey` if `unique` and two documents
    /// collide on the index's key.
    pub fn create_index(
        &mut self,
        pager: &mut Pager,
        name: &str,
        keys: Vec<(String, i32)>,
        unique: bool,
        documents: impl Iterator<Item = Document>,
    ) -> Result<(), BTreeError> {
        if self.indexes.contains_key(name) {
            return Ok(());
        }
        let tree = BTree::create(pager)?;
        let mut index = Index { name: name.to_string(), keys, unique, tree };
        for doc in documents {
            index.insert_document(pager, &doc)?;
        }
        self.indexes.insert(name.to_string(), index);
        Ok(())
    }

    /// Drops the named index. `_id_` may not be dropped; callers are
    /// expected to have already rejected that at the command layer.
    pub fn drop_index(&mut self, name: &str) -> Option<Index> {
        self.indexes.remove(name)
    }

    /// Atomically inserts `doc` into every index, rolling back (in LIFO
    /// order) any index already updated if a later one rejects the
    /// document for a unique-constraint violation. This is the primitive
    /// `Collection::insert_document` calls after writing the record to the
    /// data page.
    ///
    /// # Errors
    /// Returns [`IndexCheckError::Duplicate`] naming the index/key value
    /// that collided, or [`IndexCheckError::Storage`] on a lower-level
    /// failure. Either way, on error no index is left holding an entry for
    /// `doc`.
    pub fn check_and_insert_document(&mut self, pager: &mut Pager, doc: &Document) -> Result<(), IndexCheckError> {
        let mut applied: Vec<&str> = Vec::new();
        let mut names = self.names();
        names.sort();
        for name in &names {
            let index = self.indexes.get_mut(name).expect("name came from self.indexes keys");
            match index.insert_document(pager, doc) {
                Ok(()) => applied.push(name),
                Err(e) => {
                    let violation = match e {
                        BTreeError::DuplicateKey => {
                            Some(IndexViolation { index_name: index.name.clone(), key_value: index.key_value_doc(doc) })
                        }
                        _ => None,
                    };
                    for applied_name in applied.iter().rev() {
                        if let Some(idx) = self.indexes.get_mut(*applied_name) {
                            let _ = idx.remove_document(pager, doc);
                        }
                    }
                    return Err(match violation {
                        Some(v) => IndexCheckError::Duplicate(v),
                        None => IndexCheckError::Storage(e),
                    });
                }
            }
        }
        Ok(())
    }

    /// Removes `doc` from every index. Used on delete and as the
    /// old-document half of an update.
    ///
    /// # Errors
    /// Returns `BTreeError` on storage failure.
    pub fn remove_document(&mut self, pager: &mut Pager, doc: &Document) -> Result<(), BTreeError> {
        for index in self.indexes.values_mut() {
            index.remove_document(pager, doc)?;
        }
        Ok(())
    }

    /// Re-keys `old` to `new` across every index, rolling back applied
    /// indexes in LIFO order if a later one rejects `new`.
    ///
    /// # Errors
    /// Returns [`IndexCheckError::Duplicate`] naming the index/key value
    /// that collided, or [`IndexCheckError::Storage`] on a lower-level
    /// failure.
    pub fn check_and_update_document(&mut self, pager: &mut Pager, old: &Document, new: &Document) -> Result<(), IndexCheckError> {
        let mut applied: Vec<&str> = Vec::new();
        let mut names = self.names();
        names.sort();
        for name in &names {
            let index = self.indexes.get_mut(name).expect("name came from self.indexes keys");
            match index.update_document(pager, old, new) {
                Ok(()) => applied.push(name),
                Err(e) => {
                    let violation = match e {
                        BTreeError::DuplicateKey => {
                            Some(IndexViolation { index_name: index.name.clone(), key_value: index.key_value_doc(new) })
                        }
                        _ => None,
                    };
                    for applied_name in applied.iter().rev() {
                        if let Some(idx) = self.indexes.get_mut(*applied_name) {
                            let _ = idx.update_document(pager, new, old);
                        }
                    }
                    return Err(match violation {
                        Some(v) => IndexCheckError::Duplicate(v),
                        None => IndexCheckError::Storage(e),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn unique_index_rejects_duplicate_and_rolls_back() {
        let dir = tempdir().unwrap();
        let mut pager = Pager::open(&dir.path().join("t.db"), 32).unwrap();
        let mut mgr = IndexManager::new();
        mgr.create_index(&mut pager, "_id_", vec![("_id".into(), 1)], true, std::iter::empty()).unwrap();
        mgr.create_index(&mut pager, "email_1", vec![("email".into(), 1)], true, std::iter::empty()).unwrap();

        let d1 = bson::doc! {"_id": 1, "email": "a@example.com"};
        mgr.check_and_insert_document(&mut pager, &d1).unwrap();

        let d2 = bson::doc! {"_id": 2, "email": "a@example.com"};
        match mgr.check_and_insert_document(&mut pager, &d2) {
            Err(IndexCheckError::Duplicate(v)) => {
                assert_eq!(v.index_name, "email_1");
                assert_eq!(v.key_value.get_str("email").unwrap(), "a@example.com");
            }
            other => panic!("expected a Duplicate violation on email_1, got {other:?}"),
        }

        // _id_ must have been rolled back: inserting _id 2 under a
        // different email should now succeed.
        let d3 = bson::doc! {"_id": 2, "email": "b@example.com"};
        mgr.check_and_insert_document(&mut pager, &d3).unwrap();
    }

    #[test]
    fn non_unique_index_allows_duplicates_via_id_disambiguator() {
        let dir = tempdir().unwrap();
        let mut pager = Pager::open(&dir.path().join("t.db"), 32).unwrap();
        let mut mgr = IndexManager::new();
        mgr.create_index(&mut pager, "status_1", vec![("status".into(), 1)], false, std::iter::empty()).unwrap();
        let d1 = bson::doc! {"_id": 1, "status": "ok"};
        let d2 = bson::doc! {"_id": 2, "status": "ok"};
        mgr.check_and_insert_document(&mut pager, &d1).unwrap();
        mgr.check_and_insert_document(&mut pager, &d2).unwrap();
    }
}
