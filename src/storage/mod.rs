//! Paged storage layer: fixed-size pages, the write-ahead log, the pager
//! that ties them together, and the slotted-page record format built on
//! top of a single page's data area.

pub mod constants;
pub mod crc;
pub mod page;
pub mod pager;
pub mod slotted_page;
pub mod wal;

pub use page::{FileHeader, Page, PageType};
pub use pager::{Pager, PagerError};
pub use wal::{Wal, WalError};
