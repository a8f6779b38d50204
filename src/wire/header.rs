//! The 16-byte `MsgHeader` common to every MongoDB wire protocol message,
//! per spec.md §5. Grounded on the teacher's `wasp.rs` manual
//! `to_bytes`/`from_bytes` byte-layout idiom (see `Manifest::to_bytes`),
//! generalized here to little-endian wire integers rather than the
//! teacher's native-endian page layout, since the wire format is a network
//! protocol with a fixed byte order.

use super::WireError;

pub const HEADER_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_length: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub op_code: i32,
}

impl MessageHeader {
    #[must_use]
    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&self.message_length.to_le_bytes());
        buf[4..8].copy_from_slice(&self.request_id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.response_to.to_le_bytes());
        buf[12..16].copy_from_slice(&self.op_code.to_le_bytes());
        buf
    }

    /// # Errors
    /// Returns `WireError::Truncated` if `bytes` is shorter than
    /// [`HEADER_LEN`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < HEADER_LEN {
            return Err(WireError::Truncated { expected: HEADER_LEN, actual: bytes.len() });
        }
        Ok(Self {
            message_length: i32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            request_id: i32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            response_to: i32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            op_code: i32::from_le_bytes(bytes[12..16].try_into().unwrap()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let h = MessageHeader { message_length: 123, request_id: 7, response_to: 0, op_code: super::super::OP_MSG };
        let bytes = h.to_bytes();
        let back = MessageHeader::from_bytes(&bytes).unwrap();
        assert_eq!(h, back);
    }

    #[test]
    fn truncated_header_is_rejected() {
        assert!(MessageHeader::from_bytes(&[0u8; 8]).is_err());
    }
}
