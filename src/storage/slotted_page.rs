//! Slotted page (L2): variable-length record storage inside a single
//! page's data area, per spec.md §4.3. The slot directory grows forward
//! from the start of the data area; record bytes grow backward from the
//! end. Grounded on `small-db-small-db/src/btree/page/leaf_page.rs` for the
//! split-directory-from-data layout idea, reimplemented against this
//! crate's byte-exact slot format (4-byte offset + 4-byte length per slot,
//! a zero-length/zero-offset slot marking a tombstoned record).

use crate::storage::constants::PAGE_DATA_SIZE;

const SLOT_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub offset: u32,
    pub length: u32,
}

impl Slot {
    const TOMBSTONE: Slot = Slot { offset: 0, length: 0 };

    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.length == 0
    }
}

/// A read/write view over a page's data area (`[u8; PAGE_DATA_SIZE]`)
/// implementing the slot directory / free-space-in-the-middle layout.
pub struct SlottedPage<'a> {
    data: &'a mut [u8; PAGE_DATA_SIZE],
}

impl<'a> SlottedPage<'a> {
    #[must_use]
    pub fn new(data: &'a mut [u8; PAGE_DATA_SIZE]) -> Self {
        Self { data }
    }

    fn slot_count_raw(&self, item_count: u16) -> usize {
        item_count as usize
    }

    fn slot_at(&self, index: usize) -> Slot {
        let start = index * SLOT_SIZE;
        let offset = u32::from_le_bytes(self.data[start..start + 4].try_into().unwrap());
        let length = u32::from_le_bytes(self.data[start + 4..start + 8].try_into().unwrap());
        Slot { offset, length }
    }

    fn set_slot(&mut self, index: usize, slot: Slot) {
        let start = index * SLOT_SIZE;
        self.data[start..start + 4].copy_from_slice(&slot.offset.to_le_bytes());
        self.data[start + 4..start + 8].copy_from_slice(&slot.length.to_le_bytes());
    }

    /// Lowest byte offset (within the data area) currently occupied by a
    /// live record; records are packed downward from `PAGE_DATA_SIZE`.
    fn records_low_water_mark(&self, item_count: u16) -> usize {
        (0..self.slot_count_raw(item_count))
            .map(|i| self.slot_at(i))
            .filter(|s| !s.is_tombstone())
            .map(|s| s.offset as usize)
            .min()
            .unwrap_or(PAGE_DATA_SIZE)
    }

    /// Bytes available for a new slot entry plus its record body, given
    /// the page's current `item_count`.
    #[must_use]
    pub fn free_space(&self, item_count: u16) -> usize {
        let directory_end = self.slot_count_raw(item_count) * SLOT_SIZE;
        let low_water = self.records_low_water_mark(item_count);
        low_water.saturating_sub(directory_end)
    }

    /// Reads the record stored in `slot_index`, or `None` if the slot does
    /// not exist or is tombstoned.
    #[must_use]
    pub fn get(&self, item_count: u16, slot_index: u16) -> Option<Vec<u8>> {
        let idx = slot_index as usize;
        if idx >= self.slot_count_raw(item_count) {
            return None;
        }
        let slot = self.slot_at(idx);
        if slot.is_tombstone() {
            return None;
        }
        let start = slot.offset as usize;
        let end = start + slot.length as usize;
        Some(self.data[start..end].to_vec())
    }

    /// Inserts `record` as a new slot, appending to the slot directory and
    /// packing the record bytes just above the current low-water mark.
    /// Returns the new slot index, or `None` if there isn't enough free
    /// space (a full SLOT_SIZE-byte directory entry plus the record body).
    pub fn insert(&mut self, item_count: u16, record: &[u8]) -> Option<u16> {
        let needed = SLOT_SIZE + record.len();
        if self.free_space(item_count) < needed {
            return None;
        }
        let low_water = self.records_low_water_mark(item_count);
        let new_offset = low_water - record.len();
        self.data[new_offset..new_offset + record.len()].copy_from_slice(record);

        let index = self.slot_count_raw(item_count);
        self.set_slot(index, Slot { offset: new_offset as u32, length: record.len() as u32 });
        Some(index as u16)
    }

    /// Replaces the record at `slot_index` in place if `record` fits in
    /// the existing slot's footprint, and relocates it (packing a fresh
    /// copy just above the low-water mark) otherwise. The old bytes of a
    /// relocated record are left as internal fragmentation until the next
    /// `compact`.
    pub fn update(&mut self, item_count: u16, slot_index: u16, record: &[u8]) -> bool {
        let idx = slot_index as usize;
        if idx >= self.slot_count_raw(item_count) {
            return false;
        }
        let slot = self.slot_at(idx);
        if slot.is_tombstone() {
            return false;
        }
        if record.len() as u32 <= slot.length {
            let start = slot.offset as usize;
            self.data[start..start + record.len()].copy_from_slice(record);
            self.set_slot(idx, Slot { offset: slot.offset, length: record.len() as u32 });
            return true;
        }
        let needed = record.len();
        if self.free_space(item_count) < needed {
            return false;
        }
        let low_water = self.records_low_water_mark(item_count);
        let new_offset = low_water - record.len();
        self.data[new_offset..new_offset + record.len()].copy_from_slice(record);
        self.set_slot(idx, Slot { offset: new_offset as u32, length: record.len() as u32 });
        true
    }

    /// Tombstones the slot at `slot_index` without reclaiming its bytes;
    /// the space is reclaimed on the next `compact`.
    pub fn delete(&mut self, item_count: u16, slot_index: u16) -> bool {
        let idx = slot_index as usize;
        if idx >= self.slot_count_raw(item_count) {
            return false;
        }
        if self.slot_at(idx).is_tombstone() {
            return false;
        }
        self.set_slot(idx, Slot::TOMBSTONE);
        true
    }

    /// Repacks all live records against the low-water mark, eliminating
    /// fragmentation left by in-place growth or deletion. Tombstoned slots
    /// are left in the directory (to preserve slot indices referenced by
    /// the B+Tree) but their offset/length stay zeroed.
    pub fn compact(&mut self, item_count: u16) {
        let mut entries: Vec<(usize, Slot)> = (0..self.slot_count_raw(item_count))
            .map(|i| (i, self.slot_at(i)))
            .filter(|(_, s)| !s.is_tombstone())
            .collect();
        // Pack from the end of the data area downward, preserving
        // relative order to keep the operation stable (not strictly
        // required, but matches the teacher's deterministic-layout style).
        entries.sort_by_key(|(_, s)| std::cmp::Reverse(s.offset));

        let mut cursor = PAGE_DATA_SIZE;
        let mut staging = vec![0u8; PAGE_DATA_SIZE];
        for (idx, slot) in &entries {
            let start = slot.offset as usize;
            let end = start + slot.length as usize;
            let new_start = cursor - slot.length as usize;
            staging[new_start..cursor].copy_from_slice(&self.data[start..end]);
            self.set_slot(*idx, Slot { offset: new_start as u32, length: slot.length });
            cursor = new_start;
        }
        self.data[cursor..PAGE_DATA_SIZE].copy_from_slice(&staging[cursor..PAGE_DATA_SIZE]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_round_trips() {
        let mut buf = Box::new([0u8; PAGE_DATA_SIZE]);
        let mut page = SlottedPage::new(&mut buf);
        let idx = page.insert(0, b"hello").unwrap();
        assert_eq!(idx, 0);
        assert_eq!(page.get(1, idx).unwrap(), b"hello");
    }

    #[test]
    fn update_in_place_when_shrinking() {
        let mut buf = Box::new([0u8; PAGE_DATA_SIZE]);
        let mut page = SlottedPage::new(&mut buf);
        let idx = page.insert(0, b"hello world").unwrap();
        assert!(page.update(1, idx, b"hi"));
        assert_eq!(page.get(1, idx).unwrap(), b"hi");
    }

    #[test]
    fn update_relocates_when_growing() {
        let mut buf = Box::new([0u8; PAGE_DATA_SIZE]);
        let mut page = SlottedPage::new(&mut buf);
        let idx = page.insert(0, b"hi").unwrap();
        let item_count = 1;
        assert!(page.update(item_count, idx, b"a much longer record body"));
        assert_eq!(page.get(item_count, idx).unwrap(), b"a much longer record body");
    }

    #[test]
    fn delete_tombstones_slot() {
        let mut buf = Box::new([0u8; PAGE_DATA_SIZE]);
        let mut page = SlottedPage::new(&mut buf);
        let idx = page.insert(0, b"gone").unwrap();
        assert!(page.delete(1, idx));
        assert!(page.get(1, idx).is_none());
    }

    #[test]
    fn compact_reclaims_fragmentation() {
        let mut buf = Box::new([0u8; PAGE_DATA_SIZE]);
        let mut page = SlottedPage::new(&mut buf);
        let i0 = page.insert(0, b"one").unwrap();
        let i1 = page.insert(1, b"two").unwrap();
        page.delete(2, i0);
        page.compact(2);
        assert_eq!(page.get(2, i1).unwrap(), b"two");
        assert!(page.get(2, i0).is_none());
    }

    #[test]
    fn insert_fails_when_full() {
        let mut buf = Box::new([0u8; PAGE_DATA_SIZE]);
        let mut page = SlottedPage::new(&mut buf);
        let big = vec![1u8; PAGE_DATA_SIZE];
        assert!(page.insert(0, &big).is_none());
    }
}
