//! L0: byte-level primitives shared by the pager, WAL and slotted-page
//! layers. Grounded on `nfvdat-kv-store/src/config.rs`'s page-size/magic
//! constant module.

/// Fixed page size. The format is not negotiable at runtime; `EngineOptions`
/// only carries this around so tests can assert against it.
pub const PAGE_SIZE: usize = 4096;

/// Page header is 24 bytes: pageId(4) type(1) flags(1) itemCount(2)
/// freeSpace(2) nextPageId(4) prevPageId(4) checksum(4) = 22... padded to 24
/// with 2 reserved bytes for alignment, per spec.md §3.
pub const PAGE_HEADER_SIZE: usize = 24;
pub const PAGE_DATA_SIZE: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

/// File header is 64 bytes, per spec.md §3.
pub const FILE_HEADER_SIZE: usize = 64;

pub const FILE_MAGIC: [u8; 4] = *b"MONO";
pub const FILE_VERSION: u32 = 1;

pub const WAL_MAGIC: [u8; 4] = *b"WALM";
pub const WAL_VERSION: u32 = 1;
pub const WAL_HEADER_SIZE: usize = 32;
pub const WAL_RECORD_HEADER_SIZE: usize = 20;

/// The invalid/null page id. Page 0 holds the meta page, so 0 doubles as a
/// null pointer everywhere a page id is optional (free-list tail, sibling
/// links, catalog chain terminators).
pub const INVALID_PAGE_ID: u32 = 0;

/// B+Tree order: a node holds at most `ORDER - 1` keys before splitting.
pub const BTREE_ORDER: usize = 50;

/// Catalog multi-page chain magic.
pub const CATALOG_MULTI_PAGE_MAGIC: [u8; 4] = *b"MPCT";

/// Default cursor batch size, matching MongoDB's default `firstBatch` size.
pub const DEFAULT_BATCH_SIZE: usize = 101;
