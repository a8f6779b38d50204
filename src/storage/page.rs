//! Page (L0/L1): the 4096-byte fixed-size unit of the data file, and the
//! 64-byte file header that precedes all pages. Byte layouts are bit-exact
//! contracts (spec.md §3) and are hand-packed with `to_le_bytes`/
//! `from_le_bytes`, in the manner of `nfvdat-kv-store/src/pagedata.rs` and
//! `disk.rs`, rather than derived `serde`/`bincode` framing.

use crate::storage::constants::{
    FILE_HEADER_SIZE, FILE_MAGIC, FILE_VERSION, PAGE_DATA_SIZE, PAGE_HEADER_SIZE, PAGE_SIZE,
};
use crate::storage::crc::xor_fold_u32;
use crate::storage::pager::PagerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    Free = 0,
    Meta = 1,
    Catalog = 2,
    Data = 3,
    Index = 4,
    Overflow = 5,
    FreeList = 6,
}

impl PageType {
    #[must_use]
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => PageType::Free,
            1 => PageType::Meta,
            2 => PageType::Catalog,
            3 => PageType::Data,
            4 => PageType::Index,
            5 => PageType::Overflow,
            6 => PageType::FreeList,
            _ => return None,
        })
    }
}

/// An in-memory view of one 4096-byte page: a 24-byte header plus 4072
/// bytes of data.
#[derive(Clone)]
pub struct Page {
    pub page_id: u32,
    pub page_type: PageType,
    pub flags: u8,
    pub item_count: u16,
    pub free_space: u16,
    pub next_page_id: u32,
    pub prev_page_id: u32,
    pub data: Box<[u8; PAGE_DATA_SIZE]>,
}

impl Page {
    #[must_use]
    pub fn new(page_id: u32, page_type: PageType) -> Self {
        Self {
            page_id,
            page_type,
            flags: 0,
            item_count: 0,
            free_space: PAGE_DATA_SIZE as u16,
            next_page_id: 0,
            prev_page_id: 0,
            data: Box::new([0u8; PAGE_DATA_SIZE]),
        }
    }

    #[must_use]
    pub fn checksum(&self) -> u32 {
        xor_fold_u32(self.data.as_ref())
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; PAGE_SIZE] {
        let mut buf = [0u8; PAGE_SIZE];
        buf[0..4].copy_from_slice(&self.page_id.to_le_bytes());
        buf[4] = self.page_type as u8;
        buf[5] = self.flags;
        buf[6..8].copy_from_slice(&self.item_count.to_le_bytes());
        buf[8..10].copy_from_slice(&self.free_space.to_le_bytes());
        buf[10..14].copy_from_slice(&self.next_page_id.to_le_bytes());
        buf[14..18].copy_from_slice(&self.prev_page_id.to_le_bytes());
        buf[18..22].copy_from_slice(&self.checksum().to_le_bytes());
        // buf[22..24] reserved, left zero.
        buf[PAGE_HEADER_SIZE..].copy_from_slice(self.data.as_ref());
        buf
    }

    /// Parses a page from its on-disk bytes, validating that the stored
    /// page id matches `expected_id` and that the checksum validates.
    ///
    /// # Errors
    /// Returns `PagerError::ChecksumMismatch`/`PageCorrupted` on a bad page.
    pub fn from_bytes(bytes: &[u8; PAGE_SIZE], expected_id: u32) -> Result<Self, PagerError> {
        let page_id = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        if page_id != expected_id {
            return Err(PagerError::PageCorrupted(format!(
                "page id mismatch: on-disk {page_id}, expected {expected_id}"
            )));
        }
        let page_type = PageType::from_u8(bytes[4])
            .ok_or_else(|| PagerError::PageCorrupted(format!("unknown page type {}", bytes[4])))?;
        let flags = bytes[5];
        let item_count = u16::from_le_bytes(bytes[6..8].try_into().unwrap());
        let free_space = u16::from_le_bytes(bytes[8..10].try_into().unwrap());
        let next_page_id = u32::from_le_bytes(bytes[10..14].try_into().unwrap());
        let prev_page_id = u32::from_le_bytes(bytes[14..18].try_into().unwrap());
        let stored_checksum = u32::from_le_bytes(bytes[18..22].try_into().unwrap());

        let mut data = Box::new([0u8; PAGE_DATA_SIZE]);
        data.copy_from_slice(&bytes[PAGE_HEADER_SIZE..]);

        let computed = xor_fold_u32(data.as_ref());
        if computed != stored_checksum {
            return Err(PagerError::ChecksumMismatch(page_id));
        }

        Ok(Self {
            page_id,
            page_type,
            flags,
            item_count,
            free_space,
            next_page_id,
            prev_page_id,
            data,
        })
    }
}

/// The 64-byte file header preceding all pages.
#[derive(Debug, Clone, Copy)]
pub struct FileHeader {
    pub page_size: u32,
    pub page_count: u32,
    pub free_list_head: u32,
    pub meta_page_id: u32,
    pub catalog_page_id: u32,
    pub create_time: u64,
    pub modify_time: u64,
}

impl FileHeader {
    #[must_use]
    pub fn new() -> Self {
        let now = now_unix();
        Self {
            page_size: PAGE_SIZE as u32,
            page_count: 1, // page 0 (meta) always exists
            free_list_head: 0,
            meta_page_id: 0,
            catalog_page_id: 0,
            create_time: now,
            modify_time: now,
        }
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; FILE_HEADER_SIZE] {
        let mut buf = [0u8; FILE_HEADER_SIZE];
        buf[0..4].copy_from_slice(&FILE_MAGIC);
        buf[4..8].copy_from_slice(&FILE_VERSION.to_le_bytes());
        buf[8..12].copy_from_slice(&self.page_size.to_le_bytes());
        buf[12..16].copy_from_slice(&self.page_count.to_le_bytes());
        buf[16..20].copy_from_slice(&self.free_list_head.to_le_bytes());
        buf[20..24].copy_from_slice(&self.meta_page_id.to_le_bytes());
        buf[24..28].copy_from_slice(&self.catalog_page_id.to_le_bytes());
        buf[28..36].copy_from_slice(&self.create_time.to_le_bytes());
        buf[36..44].copy_from_slice(&self.modify_time.to_le_bytes());
        // buf[44..64] reserved, left zero.
        buf
    }

    /// # Errors
    /// Returns `PagerError::InvalidMagic`/`InvalidVersion`/`FileCorrupted` on
    /// a malformed header.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PagerError> {
        if bytes.len() < FILE_HEADER_SIZE {
            return Err(PagerError::FileCorrupted("file header truncated".into()));
        }
        if bytes[0..4] != FILE_MAGIC {
            return Err(PagerError::InvalidMagic);
        }
        let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        if version != FILE_VERSION {
            return Err(PagerError::InvalidVersion(version));
        }
        let page_size = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        if page_size as usize != PAGE_SIZE {
            return Err(PagerError::FileCorrupted(format!(
                "unsupported page size {page_size}"
            )));
        }
        Ok(Self {
            page_size,
            page_count: u32::from_le_bytes(bytes[12..16].try_into().unwrap()),
            free_list_head: u32::from_le_bytes(bytes[16..20].try_into().unwrap()),
            meta_page_id: u32::from_le_bytes(bytes[20..24].try_into().unwrap()),
            catalog_page_id: u32::from_le_bytes(bytes[24..28].try_into().unwrap()),
            create_time: u64::from_le_bytes(bytes[28..36].try_into().unwrap()),
            modify_time: u64::from_le_bytes(bytes[36..44].try_into().unwrap()),
        })
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_round_trips() {
        let mut page = Page::new(7, PageType::Data);
        page.data[0] = 0xAB;
        page.item_count = 3;
        let bytes = page.to_bytes();
        let parsed = Page::from_bytes(&bytes, 7).unwrap();
        assert_eq!(parsed.page_id, 7);
        assert_eq!(parsed.page_type, PageType::Data);
        assert_eq!(parsed.item_count, 3);
        assert_eq!(parsed.data[0], 0xAB);
    }

    #[test]
    fn page_id_mismatch_is_rejected() {
        let page = Page::new(1, PageType::Data);
        let bytes = page.to_bytes();
        assert!(Page::from_bytes(&bytes, 2).is_err());
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let page = Page::new(1, PageType::Data);
        let mut bytes = page.to_bytes();
        bytes[PAGE_HEADER_SIZE] ^= 0xFF;
        assert!(matches!(
            Page::from_bytes(&bytes, 1),
            Err(PagerError::ChecksumMismatch(1))
        ));
    }

    #[test]
    fn file_header_round_trips() {
        let header = FileHeader { page_count: 5, free_list_head: 2, catalog_page_id: 1, ..FileHeader::new() };
        let bytes = header.to_bytes();
        let parsed = FileHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.page_count, 5);
        assert_eq!(parsed.free_list_head, 2);
        assert_eq!(parsed.catalog_page_id, 1);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = FileHeader::new().to_bytes();
        bytes[0] = b'X';
        assert!(matches!(FileHeader::from_bytes(&bytes), Err(PagerError::InvalidMagic)));
    }
}
