//! `OP_MSG` (opcode 2013) section parsing and encoding: the one opcode
//! every modern driver uses for commands, per spec.md §5. A message is
//! `flagBits` followed by one or more sections (kind 0 = a single BSON
//! body document, kind 1 = a named document sequence) and an optional
//! trailing CRC32C checksum. Grounded on the teacher's `wasp.rs`
//! length-prefixed record layout, generalized from one flat record to the
//! wire protocol's section-kind framing.

use bson::Document;

use super::WireError;

pub const FLAG_CHECKSUM_PRESENT: u32 = 1;
pub const FLAG_MORE_TO_COME: u32 = 1 << 1;
pub const FLAG_EXHAUST_ALLOWED: u32 = 1 << 16;

/// Of the low 16 bits (the "required" flags, positions 0-15), only these
/// are recognized; any other low-bit flag is a protocol violation. The
/// high 16 bits are advisory per spec.md §4.12 and are never validated,
/// so an unrecognized bit there (e.g. a future driver capability flag)
/// must not fail the parse.
const KNOWN_REQUIRED_FLAGS: u32 = FLAG_CHECKSUM_PRESENT | FLAG_MORE_TO_COME;
const REQUIRED_FLAGS_MASK: u32 = 0x0000_FFFF;

#[derive(Debug, Clone)]
pub struct OpMsg {
    pub flag_bits: u32,
    pub body: Document,
    pub sequences: Vec<(String, Vec<Document>)>,
}

impl OpMsg {
    /// Looks up a document sequence (kind 1 section) by its identifier,
    /// the shape `insert`/`update`/`delete` commands use to carry their
    /// `documents`/`updates`/`deletes` arrays out-of-line from the body.
    #[must_use]
    pub fn sequence(&self, identifier: &str) -> Option<&[Document]> {
        self.sequences.iter().find(|(id, _)| id == identifier).map(|(_, docs)| docs.as_slice())
    }
}

/// Decodes the payload that follows the 16-byte message header (i.e.
/// `flagBits` onward) of an `OP_MSG` message.
///
/// # Errors
/// Returns `WireError` on truncation, an unsupported flag bit, an
/// unsupported section kind, or a checksum mismatch.
pub fn decode(payload: &[u8]) -> Result<OpMsg, WireError> {
    if payload.len() < 4 {
        return Err(WireError::Truncated { expected: 4, actual: payload.len() });
    }
    let flag_bits = u32::from_le_bytes(payload[0..4].try_into().unwrap());
    if flag_bits & REQUIRED_FLAGS_MASK & !KNOWN_REQUIRED_FLAGS != 0 {
        return Err(WireError::UnsupportedFlags(flag_bits));
    }
    let checksum_present = flag_bits & FLAG_CHECKSUM_PRESENT != 0;

    let sections_end = if checksum_present {
        if payload.len() < 8 {
            return Err(WireError::Truncated { expected: 8, actual: payload.len() });
        }
        let end = payload.len() - 4;
        let expected = u32::from_le_bytes(payload[end..].try_into().unwrap());
        let actual = crc32c::crc32c(&payload[..end]);
        if expected != actual {
            return Err(WireError::ChecksumMismatch { expected, actual });
        }
        end
    } else {
        payload.len()
    };

    let mut cursor = 4usize;
    let mut body: Option<Document> = None;
    let mut sequences = Vec::new();

    while cursor < sections_end {
        let kind = payload[cursor];
        cursor += 1;
        match kind {
            0 => {
                let (doc, consumed) = read_bson_document(payload, cursor)?;
                body = Some(doc);
                cursor += consumed;
            }
            1 => {
                if cursor + 4 > sections_end {
                    return Err(WireError::Truncated { expected: cursor + 4, actual: sections_end });
                }
                let section_size = i32::from_le_bytes(payload[cursor..cursor + 4].try_into().unwrap()) as usize;
                let section_end = cursor + section_size;
                if section_end > sections_end {
                    return Err(WireError::Truncated { expected: section_end, actual: sections_end });
                }
                let mut p = cursor + 4;
                let (identifier, id_len) = read_cstring(payload, p)?;
                p += id_len;
                let mut docs = Vec::new();
                while p < section_end {
                    let (doc, consumed) = read_bson_document(payload, p)?;
                    docs.push(doc);
                    p += consumed;
                }
                sequences.push((identifier, docs));
                cursor = section_end;
            }
            other => return Err(WireError::UnsupportedSectionKind(other)),
        }
    }

    let body = body.ok_or(WireError::MissingBody)?;
    Ok(OpMsg { flag_bits, body, sequences })
}

/// Encodes a reply `OP_MSG` payload (flagBits + a single kind-0 body
/// section, no checksum). Servers are not required to checksum replies;
/// we omit it to keep replies simple, matching `mongod`'s default
/// behavior when the request didn't request one.
///
/// # Errors
/// Returns `WireError::Encode` if `body` fails to serialize.
pub fn encode_reply(flag_bits: u32, body: &Document) -> Result<Vec<u8>, WireError> {
    let mut out = Vec::new();
    out.extend_from_slice(&flag_bits.to_le_bytes());
    out.push(0u8);
    let doc_bytes = bson::to_vec(body).map_err(|e| WireError::Encode(e.to_string()))?;
    out.extend_from_slice(&doc_bytes);
    Ok(out)
}

fn read_bson_document(payload: &[u8], at: usize) -> Result<(Document, usize), WireError> {
    if at + 4 > payload.len() {
        return Err(WireError::Truncated { expected: at + 4, actual: payload.len() });
    }
    let len = i32::from_le_bytes(payload[at..at + 4].try_into().unwrap()) as usize;
    if len < 5 || at + len > payload.len() {
        return Err(WireError::Truncated { expected: at + len, actual: payload.len() });
    }
    let doc = bson::from_slice(&payload[at..at + len]).map_err(|e| WireError::Decode(e.to_string()))?;
    Ok((doc, len))
}

fn read_cstring(payload: &[u8], at: usize) -> Result<(String, usize), WireError> {
    let end = payload[at..].iter().position(|&b| b == 0).ok_or(WireError::Truncated { expected: at + 1, actual: payload.len() })?;
    let s = String::from_utf8(payload[at..at + end].to_vec()).map_err(|_| WireError::Decode("non-UTF-8 cstring".into()))?;
    Ok((s, end + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn encode_body_section(doc: &Document) -> Vec<u8> {
        let mut out = vec![0u8; 4];
        out.push(0u8);
        out.extend_from_slice(&bson::to_vec(doc).unwrap());
        out
    }

    #[test]
    fn decodes_single_body_section() {
        let body = doc! {"ping": 1};
        let payload = encode_body_section(&body);
        let msg = decode(&payload).unwrap();
        assert_eq!(msg.body, body);
        assert!(msg.sequences.is_empty());
    }

    #[test]
    fn decodes_document_sequence_section() {
        let mut out = vec![0u8; 4];
        out.push(0u8);
        out.extend_from_slice(&bson::to_vec(&doc! {"insert": "c"}).unwrap());
        out.push(1u8);
        let section_start = out.len();
        out.extend_from_slice(&[0u8; 4]);
        out.extend_from_slice(b"documents\0");
        let d1 = bson::to_vec(&doc! {"a": 1}).unwrap();
        let d2 = bson::to_vec(&doc! {"a": 2}).unwrap();
        out.extend_from_slice(&d1);
        out.extend_from_slice(&d2);
        let section_size = (out.len() - section_start) as i32;
        out[section_start..section_start + 4].copy_from_slice(&section_size.to_le_bytes());

        let msg = decode(&out).unwrap();
        let docs = msg.sequence("documents").unwrap();
        assert_eq!(docs.len(), 2);
    }

    #[test]
    fn checksum_mismatch_is_rejected() {
        let body = doc! {"ping": 1};
        let mut payload = encode_body_section(&body);
        payload[0] = FLAG_CHECKSUM_PRESENT as u8;
        payload.extend_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        assert!(matches!(decode(&payload), Err(WireError::ChecksumMismatch { .. })));
    }

    #[test]
    fn unknown_low_bit_flag_is_rejected() {
        let body = doc! {"ping": 1};
        let mut payload = encode_body_section(&body);
        payload[0..4].copy_from_slice(&(1u32 << 5).to_le_bytes());
        assert!(matches!(decode(&payload), Err(WireError::UnsupportedFlags(_))));
    }

    #[test]
    fn unknown_high_bit_flag_is_advisory_and_accepted() {
        let body = doc! {"ping": 1};
        let mut payload = encode_body_section(&body);
        payload[0..4].copy_from_slice(&(1u32 << 20).to_le_bytes());
        assert!(decode(&payload).is_ok());
    }
}
