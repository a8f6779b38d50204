//! Legacy `OP_QUERY`/`OP_REPLY` framing (opcodes 2004/1). Modern drivers
//! only ever send `OP_QUERY` once, against the pseudo-namespace
//! `<db>.$cmd`, to perform the initial `hello`/`isMaster` handshake before
//! negotiating up to `OP_MSG`; this module exists solely to decode that
//! one message shape and reply in kind, per spec.md §5's restricted
//! support window. Grounded on the teacher's `wasp.rs` manual byte-layout
//! idiom, adapted to the wire protocol's little-endian, cstring/BSON
//! mixed framing rather than the teacher's fixed-width page header.

use bson::Document;

use super::WireError;

#[derive(Debug, Clone)]
pub struct LegacyQuery {
    pub flags: i32,
    pub full_collection_name: String,
    pub number_to_skip: i32,
    pub number_to_return: i32,
    pub query: Document,
}

/// Decodes the payload (everything after the 16-byte header) of a legacy
/// `OP_QUERY` message.
///
/// # Errors
/// Returns `WireError::Truncated`/`WireError::Decode` on a malformed
/// message.
pub fn decode_query(payload: &[u8]) -> Result<LegacyQuery, WireError> {
    if payload.len() < 4 {
        return Err(WireError::Truncated { expected: 4, actual: payload.len() });
    }
    let flags = i32::from_le_bytes(payload[0..4].try_into().unwrap());
    let mut cursor = 4usize;
    let (full_collection_name, consumed) = read_cstring(payload, cursor)?;
    cursor += consumed;
    if cursor + 8 > payload.len() {
        return Err(WireError::Truncated { expected: cursor + 8, actual: payload.len() });
    }
    let number_to_skip = i32::from_le_bytes(payload[cursor..cursor + 4].try_into().unwrap());
    let number_to_return = i32::from_le_bytes(payload[cursor + 4..cursor + 8].try_into().unwrap());
    cursor += 8;
    if cursor + 4 > payload.len() {
        return Err(WireError::Truncated { expected: cursor + 4, actual: payload.len() });
    }
    let len = i32::from_le_bytes(payload[cursor..cursor + 4].try_into().unwrap()) as usize;
    if cursor + len > payload.len() {
        return Err(WireError::Truncated { expected: cursor + len, actual: payload.len() });
    }
    let query = bson::from_slice(&payload[cursor..cursor + len]).map_err(|e| WireError::Decode(e.to_string()))?;
    Ok(LegacyQuery { flags, full_collection_name, number_to_skip, number_to_return, query })
}

/// Encodes a legacy `OP_REPLY` payload carrying exactly one document, the
/// shape a `hello` handshake reply takes.
///
/// # Errors
/// Returns `WireError::Encode` if `doc` fails to serialize.
pub fn encode_reply(doc: &Document) -> Result<Vec<u8>, WireError> {
    let mut out = Vec::new();
    out.extend_from_slice(&0i32.to_le_bytes()); // responseFlags
    out.extend_from_slice(&0i64.to_le_bytes()); // cursorID
    out.extend_from_slice(&0i32.to_le_bytes()); // startingFrom
    out.extend_from_slice(&1i32.to_le_bytes()); // numberReturned
    out.extend_from_slice(&bson::to_vec(doc).map_err(|e| WireError::Encode(e.to_string()))?);
    Ok(out)
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

    #[test]
    fn decodes_hello_handshake_query() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&0i32.to_le_bytes());
        payload.extend_from_slice(b"test.$cmd\0");
        payload.extend_from_slice(&0i32.to_le_bytes());
        payload.extend_from_slice(&(-1i32).to_le_bytes());
        payload.extend_from_slice(&bson::to_vec(&doc! {"isMaster": 1}).unwrap());
        let q = decode_query(&payload).unwrap();
        assert_eq!(q.full_collection_name, "test.$cmd");
        assert_eq!(q.number_to_return, -1);
        assert_eq!(q.query.get_i32("isMaster").unwrap(), 1);
    }

    #[test]
    fn reply_round_trips_through_decode() {
        let reply = encode_reply(&doc! {"ismaster": true, "ok": 1.0}).unwrap();
        assert_eq!(i32::from_le_bytes(reply[16..20].try_into().unwrap()), 1);
    }
}
