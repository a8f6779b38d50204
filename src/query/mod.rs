//! Query engine (L5): the MongoDB-compatible filter matcher, sort/
//! projection, update-operator application, and aggregation pipeline, all
//! operating on raw BSON documents rather than a parsed query plan. Per
//! spec.md §1 the engine never builds an index-backed access path here —
//! `Collection::find`/`update`/`delete` always perform a full collection
//! scan and hand each candidate document to [`filter::matches`].

pub mod aggregate;
pub mod compare;
pub mod filter;
pub mod projection;
pub mod sort;
pub mod update;

pub use filter::matches;
pub use update::{apply_update, is_operator_update};
