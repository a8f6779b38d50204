//! Checksum helpers. Two distinct algorithms are used in this crate and must
//! never be cross-applied (spec.md §9, Open Question (3)): `crc32` (via the
//! teacher's existing `crc32fast` dependency) for on-disk pages and WAL
//! records, and `crc32c` (added per `nfvdat-kv-store`, which already depends
//! on it for its own page checksums) for the OP_MSG wire checksum only.

/// CRC32 (ISO-HDLC / "crc32" as used by zlib), matching spec.md's page and
/// WAL record checksums.
#[must_use]
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// CRC32C (Castagnoli), matching the OP_MSG `checksumPresent` trailer.
#[must_use]
pub fn crc32c(data: &[u8]) -> u32 {
    crc32c::crc32c(data)
}

/// XOR-fold a buffer viewed as little-endian u32 words, tail padded with
/// zero. This is the page-data checksum spec.md §3 mandates (distinct from
/// the CRC32 used for WAL records).
#[must_use]
pub fn xor_fold_u32(data: &[u8]) -> u32 {
    let mut acc: u32 = 0;
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        acc ^= word;
    }
    let rem = chunks.remainder();
    if !rem.is_empty() {
        let mut buf = [0u8; 4];
        buf[..rem.len()].copy_from_slice(rem);
        acc ^= u32::from_le_bytes(buf);
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_fold_empty_is_zero() {
        assert_eq!(xor_fold_u32(&[]), 0);
    }

    #[test]
    fn xor_fold_matches_manual_two_words() {
        let data = [1u8, 0, 0, 0, 2, 0, 0, 0];
        assert_eq!(xor_fold_u32(&data), 1 ^ 2);
    }

    #[test]
    fn xor_fold_pads_tail_with_zero() {
        let data = [0xFFu8, 0x00, 0x00];
        assert_eq!(xor_fold_u32(&data), 0x0000_00FF);
    }

    #[test]
    fn crc32_and_crc32c_differ() {
        let data = b"monodb";
        assert_ne!(crc32(data), crc32c(data));
    }
}
