//! Wire protocol (L7): MongoDB wire framing, per spec.md §5. Supports
//! `OP_MSG` (the only opcode modern drivers send after the initial
//! handshake) and legacy `OP_QUERY`/`OP_REPLY` (the `<db>.$cmd` `hello`
//! handshake only). `OP_COMPRESSED` is detected and rejected rather than
//! decompressed, since wire compression is out of scope.
//!
//! Grounded on the teacher's `wasp.rs` for the manual length-prefixed
//! byte-layout style (no external framing crate), generalized from a
//! single on-disk record format to the wire protocol's several message
//! shapes; the section/opcode constants themselves come directly from the
//! MongoDB wire protocol specification this crate targets.

pub mod header;
pub mod legacy;
pub mod msg;
pub mod server;

use bson::Document;
use thiserror::Error;

pub use header::{MessageHeader, HEADER_LEN};
pub use msg::OpMsg;

pub const OP_REPLY: i32 = 1;
pub const OP_QUERY: i32 = 2004;
pub const OP_COMPRESSED: i32 = 2012;
pub const OP_MSG: i32 = 2013;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("truncated message: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("unsupported opcode {0}")]
    UnsupportedOpcode(i32),
    #[error("OP_COMPRESSED is not supported")]
    Compressed,
    #[error("unsupported OP_MSG flag bits: {0:#x}")]
    UnsupportedFlags(u32),
    #[error("unsupported OP_MSG section kind {0}")]
    UnsupportedSectionKind(u8),
    #[error("OP_MSG message has no kind-0 body section")]
    MissingBody,
    #[error("checksum mismatch: expected {expected:#x}, computed {actual:#x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("BSON decode error: {0}")]
    Decode(String),
    #[error("BSON encode error: {0}")]
    Encode(String),
}

/// A fully decoded incoming message: its header plus the opcode-specific
/// payload.
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    Msg(OpMsg),
    LegacyQuery(legacy::LegacyQuery),
}

/// Decodes a complete wire message (header included) into an
/// [`IncomingMessage`], or rejects it outright.
///
/// # Errors
/// Returns `WireError::Compressed` for `OP_COMPRESSED`,
/// `WireError::UnsupportedOpcode` for anything else unrecognized, or a
/// framing error from the opcode-specific decoder.
pub fn decode_message(bytes: &[u8]) -> Result<(MessageHeader, IncomingMessage), WireError> {
    let header = MessageHeader::from_bytes(bytes)?;
    let payload = &bytes[HEADER_LEN..];
    match header.op_code {
        OP_MSG => Ok((header, IncomingMessage::Msg(msg::decode(payload)?))),
        OP_QUERY => Ok((header, IncomingMessage::LegacyQuery(legacy::decode_query(payload)?))),
        OP_COMPRESSED => Err(WireError::Compressed),
        other => Err(WireError::UnsupportedOpcode(other)),
    }
}

/// Encodes a complete `OP_MSG` reply (header included) responding to
/// `request_id`.
///
/// # Errors
/// Returns `WireError::Encode` if `body` fails to serialize.
pub fn encode_msg_reply(request_id: i32, response_to: i32, body: &Document) -> Result<Vec<u8>, WireError> {
    let payload = msg::encode_reply(0, body)?;
    let message_length = (HEADER_LEN + payload.len()) as i32;
    let header = MessageHeader { message_length, request_id, response_to, op_code: OP_MSG };
    let mut out = Vec::with_capacity(message_length as usize);
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Encodes a complete legacy `OP_REPLY` (header included) responding to
/// `request_id`, for the one-shot `hello` handshake over `OP_QUERY`.
///
/// # Errors
/// Returns `WireError::Encode` if `body` fails to serialize.
pub fn encode_legacy_reply(request_id: i32, response_to: i32, body: &Document) -> Result<Vec<u8>, WireError> {
    let payload = legacy::encode_reply(body)?;
    let message_length = (HEADER_LEN + payload.len()) as i32;
    let header = MessageHeader { message_length, request_id, response_to, op_code: OP_REPLY };
    let mut out = Vec::with_capacity(message_length as usize);
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn op_compressed_is_rejected() {
        let header = MessageHeader { message_length: 16, request_id: 1, response_to: 0, op_code: OP_COMPRESSED };
        let bytes = header.to_bytes();
        assert!(matches!(decode_message(&bytes), Err(WireError::Compressed)));
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let header = MessageHeader { message_length: 16, request_id: 1, response_to: 0, op_code: 9999 };
        let bytes = header.to_bytes();
        assert!(matches!(decode_message(&bytes), Err(WireError::UnsupportedOpcode(9999))));
    }

    #[test]
    fn encode_then_decode_op_msg_round_trips() {
        let body = doc! {"ok": 1.0};
        let bytes = encode_msg_reply(2, 1, &body).unwrap();
        let (header, msg) = decode_message(&bytes).unwrap();
        assert_eq!(header.op_code, OP_MSG);
        assert_eq!(header.response_to, 1);
        match msg {
            IncomingMessage::Msg(m) => assert_eq!(m.body, body),
            IncomingMessage::LegacyQuery(_) => panic!("expected Msg"),
        }
    }
}
