//! Write-ahead log (L1): a redo-only log of full page images, appended
//! before the corresponding page is written back to the data file.
//! Grounded on the teacher's `recovery/wasp/wal.rs` (segment-based WAL,
//! CRC-checked records) and `nfvdat-kv-store/src/disk.rs` (hand-packed
//! record header), adapted from the teacher's shadow-paging design to a
//! redo-log design per spec.md §4.1.
//!
//! Record layout (20-byte header + payload):
//! `{lsn: u64, pageId: u32, len: u32, crc32: u32}` followed by `len` bytes
//! of the full `PAGE_SIZE`-byte post-image of the page — header (type,
//! flags, itemCount, nextPageId, prevPageId, checksum) included, not just
//! the data area. Logging the header is what lets recovery reconstruct a
//! page's type and chain pointers when the data-file write that would have
//! carried them never lands before a crash (spec.md §4.2's `pageWrite` is
//! defined over "full 4096 bytes"; a data-area-only record cannot redo a
//! type change such as a freed page being reused as an index page).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::storage::constants::{
    PAGE_SIZE, WAL_HEADER_SIZE, WAL_MAGIC, WAL_RECORD_HEADER_SIZE, WAL_VERSION,
};
use crate::storage::crc::crc32;

#[derive(Debug, Error)]
pub enum WalError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WAL corrupted: {0}")]
    Corrupted(String),
}

/// One durable redo record: "page `page_id`'s full on-disk image (header
/// and data area) is now `data`".
#[derive(Debug, Clone)]
pub struct WalRecord {
    pub lsn: u64,
    pub page_id: u32,
    pub data: Vec<u8>,
}

/// Append-only log file plus the in-memory tail state needed to assign
/// monotonic LSNs and drive truncation.
pub struct Wal {
    path: PathBuf,
    file: File,
    next_lsn: u64,
}

impl Wal {
    /// Opens (creating if absent) the WAL file at `path`, writing a fresh
    /// header if the file is new.
    ///
    /// # Errors
    /// Returns `WalError::Io` on filesystem failure, or
    /// `WalError::Corrupted` if an existing file has a bad header.
    pub fn open(path: &Path) -> Result<Self, WalError> {
        let is_new = !path.exists();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if is_new {
            file.write_all(&Self::header_bytes())?;
            file.sync_all()?;
            Ok(Self { path: path.to_path_buf(), file, next_lsn: 1 })
        } else {
            let mut header = [0u8; WAL_HEADER_SIZE];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut header)?;
            if header[0..4] != WAL_MAGIC {
                return Err(WalError::Corrupted("bad WAL magic".into()));
            }
            let version = u32::from_le_bytes(header[4..8].try_into().unwrap());
            if version != WAL_VERSION {
                return Err(WalError::Corrupted(format!("unsupported WAL version {version}")));
            }
            let mut wal = Self { path: path.to_path_buf(), file, next_lsn: 1 };
            let records = wal.scan_all()?;
            wal.next_lsn = records.last().map_or(1, |r| r.lsn + 1);
            Ok(wal)
        }
    }

    fn header_bytes() -> [u8; WAL_HEADER_SIZE] {
        let mut buf = [0u8; WAL_HEADER_SIZE];
        buf[0..4].copy_from_slice(&WAL_MAGIC);
        buf[4..8].copy_from_slice(&WAL_VERSION.to_le_bytes());
        // buf[8..32] reserved, left zero.
        buf
    }

    /// Appends a redo record for `page_id` carrying `data` (exactly
    /// `PAGE_SIZE` bytes — the full on-disk page image, header included)
    /// and fsyncs before returning, matching the teacher's WAL-before-page
    /// write-ordering contract.
    ///
    /// # Errors
    /// Returns `WalError::Io` on filesystem failure.
    pub fn append(&mut self, page_id: u32, data: &[u8]) -> Result<u64, WalError> {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        let lsn = self.next_lsn;
        let checksum = crc32(data);

        let mut header = [0u8; WAL_RECORD_HEADER_SIZE];
        header[0..8].copy_from_slice(&lsn.to_le_bytes());
        header[8..12].copy_from_slice(&page_id.to_le_bytes());
        header[12..16].copy_from_slice(&(data.len() as u32).to_le_bytes());
        header[16..20].copy_from_slice(&checksum.to_le_bytes());

        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(&header)?;
        self.file.write_all(data)?;
        self.file.sync_data()?;

        self.next_lsn += 1;
        Ok(lsn)
    }

    /// Reads every well-formed record in the log, in LSN order. A record
    /// whose trailing bytes are short (a torn write from a crash mid-append)
    /// or whose CRC fails to validate stops the scan at that point, the
    /// way a redo-only recovery driver tolerates a torn tail.
    ///
    /// # Errors
    /// Returns `WalError::Io` on filesystem failure.
    pub fn scan_all(&mut self) -> Result<Vec<WalRecord>, WalError> {
        let mut records = Vec::new();
        self.file.seek(SeekFrom::Start(WAL_HEADER_SIZE as u64))?;
        loop {
            let mut header = [0u8; WAL_RECORD_HEADER_SIZE];
            match self.file.read_exact(&mut header) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let lsn = u64::from_le_bytes(header[0..8].try_into().unwrap());
            let page_id = u32::from_le_bytes(header[8..12].try_into().unwrap());
            let len = u32::from_le_bytes(header[12..16].try_into().unwrap()) as usize;
            let crc = u32::from_le_bytes(header[16..20].try_into().unwrap());

            let mut data = vec![0u8; len];
            match self.file.read_exact(&mut data) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            if crc32(&data) != crc {
                break;
            }
            records.push(WalRecord { lsn, page_id, data });
        }
        Ok(records)
    }

    /// Replays all records from `from_lsn` (inclusive) onward, invoking
    /// `apply` with each page's post-image. Used at startup to redo any
    /// records not yet reflected in the data file.
    ///
    /// # Errors
    /// Returns `WalError::Io` on filesystem failure.
    pub fn redo_from<F: FnMut(u32, &[u8]) -> std::io::Result<()>>(
        &mut self,
        from_lsn: u64,
        mut apply: F,
    ) -> Result<(), WalError> {
        for record in self.scan_all()? {
            if record.lsn >= from_lsn {
                apply(record.page_id, &record.data)?;
            }
        }
        Ok(())
    }

    /// Truncates the log back to an empty header, discarding all records.
    /// Callers must only do this once every live record has been
    /// checkpointed into the data file.
    ///
    /// # Errors
    /// Returns `WalError::Io` on filesystem failure.
    pub fn truncate(&mut self) -> Result<(), WalError> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&Self::header_bytes())?;
        self.file.sync_all()?;
        Ok(())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current on-disk size, used to decide whether a checkpoint should
    /// truncate the log per `EngineOptions::wal_truncate_threshold`.
    ///
    /// # Errors
    /// Returns `WalError::Io` on filesystem failure.
    pub fn len_bytes(&self) -> Result<u64, WalError> {
        Ok(self.file.metadata()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_and_scan_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wal");
        let mut wal = Wal::open(&path).unwrap();

        let data = vec![0xAB; PAGE_SIZE];
        let lsn1 = wal.append(5, &data).unwrap();
        let lsn2 = wal.append(6, &data).unwrap();
        assert_eq!(lsn1 + 1, lsn2);

        let records = wal.scan_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].page_id, 5);
        assert_eq!(records[1].page_id, 6);
    }

    #[test]
    fn reopen_resumes_lsn_sequence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wal");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(1, &vec![0u8; PAGE_SIZE]).unwrap();
        }
        let wal = Wal::open(&path).unwrap();
        assert_eq!(wal.next_lsn, 2);
    }

    #[test]
    fn truncate_empties_the_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wal");
        let mut wal = Wal::open(&path).unwrap();
        wal.append(1, &vec![0u8; PAGE_SIZE]).unwrap();
        wal.truncate().unwrap();
        assert!(wal.scan_all().unwrap().is_empty());
    }

    #[test]
    fn torn_tail_record_is_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wal");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(1, &vec![0u8; PAGE_SIZE]).unwrap();
        }
        // Simulate a crash mid-append: truncate off the last few bytes.
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        let full_len = file.metadata().unwrap().len();
        file.set_len(full_len - 10).unwrap();

        let mut wal = Wal::open(&path).unwrap();
        assert!(wal.scan_all().unwrap().is_empty());
    }
}
