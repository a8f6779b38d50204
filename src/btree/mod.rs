//! B+Tree index engine (L2): order-50, byte-comparable keys over pages
//! owned by the pager. See [`tree`] for the algorithm and [`node`] for the
//! on-page node format.

pub mod node;
pub mod tree;

pub use node::{BTreeNode, NodeBody};
pub use tree::BTree;

use thiserror::Error;

use crate::storage::pager::PagerError;

#[derive(Debug, Error)]
pub enum BTreeError {
    #[error("pager error: {0}")]
    Pager(#[from] PagerError),
    #[error("page corrupted: {0}")]
    PageCorrupted(String),
    #[error("duplicate key")]
    DuplicateKey,
}
