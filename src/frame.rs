//! MBAP frame encoding and framed reads
//!
//! Modbus/TCP frame structure:
//!
//! | Offset | Size | Field | Notes |
//! |--------|------|-------|-------|
//! | 0 | 2 | Transaction ID | big-endian, echoed by the device |
//! | 2 | 2 | Protocol ID | always `0x0000` |
//! | 4 | 2 | Length | big-endian, bytes remaining including Unit ID |
//! | 6 | 1 | Unit ID | always `0x01` here |
//! | 7 | n | PDU | function code + payload |

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use crate::constants::{EXCEPTION_FLAG, MAX_MBAP_LENGTH, MBAP_HEADER_LEN, PROTOCOL_ID, UNIT_ID};
use crate::error::{RelayError, RelayResult};

/// The 7-byte MBAP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    /// Bytes remaining after the Length field itself, i.e. Unit ID + PDU.
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    /// Header for an outgoing request. `pdu_len` is the PDU byte count;
    /// the Length field counts one extra byte for the Unit ID.
    #[inline]
    pub fn request(transaction_id: u16, pdu_len: usize) -> Self {
        Self {
            transaction_id,
            protocol_id: PROTOCOL_ID,
            length: pdu_len as u16 + 1,
            unit_id: UNIT_ID,
        }
    }

    /// Encode the header big-endian into its 7-byte wire form.
    pub fn encode(&self) -> [u8; MBAP_HEADER_LEN] {
        let mut buf = [0u8; MBAP_HEADER_LEN];
        buf[0..2].copy_from_slice(&self.transaction_id.to_be_bytes());
        buf[2..4].copy_from_slice(&self.protocol_id.to_be_bytes());
        buf[4..6].copy_from_slice(&self.length.to_be_bytes());
        buf[6] = self.unit_id;
        buf
    }

    /// Decode a header from its 7-byte wire form.
    pub fn decode(buf: &[u8; MBAP_HEADER_LEN]) -> Self {
        Self {
            transaction_id: u16::from_be_bytes([buf[0], buf[1]]),
            protocol_id: u16::from_be_bytes([buf[2], buf[3]]),
            length: u16::from_be_bytes([buf[4], buf[5]]),
            unit_id: buf[6],
        }
    }
}

/// A complete MBAP frame: header plus the PDU bytes that follow the Unit ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: MbapHeader,
    /// Function code byte followed by function-specific bytes.
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(header: MbapHeader, payload: Vec<u8>) -> Self {
        Self { header, payload }
    }

    /// Full wire form: 7 header bytes followed by the payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(MBAP_HEADER_LEN + self.payload.len());
        bytes.extend_from_slice(&self.header.encode());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Function code, if the payload is non-empty.
    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        self.payload.first().copied()
    }

    /// If this frame is a Modbus exception reply, return
    /// `(function_code, exception_code)`.
    pub fn exception(&self) -> Option<(u8, u8)> {
        match (self.payload.first(), self.payload.get(1)) {
            (Some(&fc), Some(&code)) if fc & EXCEPTION_FLAG != 0 => Some((fc, code)),
            _ => None,
        }
    }

    /// Read one frame: exactly 7 header bytes, then exactly `Length - 1`
    /// payload bytes. Short reads surface as transport errors.
    pub async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> RelayResult<Frame> {
        let mut header_buf = [0u8; MBAP_HEADER_LEN];
        reader.read_exact(&mut header_buf).await?;
        let header = MbapHeader::decode(&header_buf);

        if header.length == 0 {
            return Err(RelayError::frame("header declares zero-length body"));
        }
        if header.length as usize > MAX_MBAP_LENGTH {
            return Err(RelayError::frame(format!(
                "header declares {} body bytes (max {})",
                header.length, MAX_MBAP_LENGTH
            )));
        }

        // The Unit ID is part of the 7 bytes already consumed, but the
        // protocol counts it in Length.
        let mut payload = vec![0u8; header.length as usize - 1];
        reader.read_exact(&mut payload).await?;

        // Always true for exact reads; kept as an invariant for any future
        // buffered read path.
        if header.length as usize != payload.len() + 1 {
            return Err(RelayError::frame(format!(
                "header length {} disagrees with payload length {}",
                header.length,
                payload.len()
            )));
        }

        debug!(
            transaction_id = header.transaction_id,
            length = header.length,
            "frame received"
        );

        Ok(Frame { header, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        let header = MbapHeader::request(0x1234, 5);
        assert_eq!(header.length, 6);
        assert_eq!(header.protocol_id, 0x0000);
        assert_eq!(header.unit_id, 0x01);

        let encoded = header.encode();
        assert_eq!(encoded, [0x12, 0x34, 0x00, 0x00, 0x00, 0x06, 0x01]);
        assert_eq!(MbapHeader::decode(&encoded), header);
    }

    #[test]
    fn test_frame_wire_form() {
        let frame = Frame::new(
            MbapHeader::request(1, 5),
            vec![0x05, 0x00, 0x00, 0x55, 0x00],
        );
        assert_eq!(
            frame.to_bytes(),
            vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x05, 0x00, 0x00, 0x55, 0x00]
        );
    }

    #[test]
    fn test_exception_detection() {
        let frame = Frame::new(MbapHeader::request(1, 2), vec![0x85, 0x02]);
        assert_eq!(frame.exception(), Some((0x85, 0x02)));

        let normal = Frame::new(MbapHeader::request(1, 5), vec![0x05, 0, 0, 0, 0]);
        assert_eq!(normal.exception(), None);
    }

    #[tokio::test]
    async fn test_read_frame() {
        let bytes: Vec<u8> = vec![
            0x00, 0x07, 0x00, 0x00, 0x00, 0x04, 0x01, // header, length 4
            0x01, 0x01, 0x06, // FC01, byte count, bits
        ];
        let mut reader = std::io::Cursor::new(bytes);
        let frame = Frame::read(&mut reader).await.unwrap();
        assert_eq!(frame.header.transaction_id, 7);
        assert_eq!(frame.payload, vec![0x01, 0x01, 0x06]);
    }

    #[tokio::test]
    async fn test_read_frame_short_body() {
        // Header promises 4 body bytes but only 1 follows.
        let bytes: Vec<u8> = vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x04, 0x01, 0x01];
        let mut reader = std::io::Cursor::new(bytes);
        let err = Frame::read(&mut reader).await.unwrap_err();
        assert!(matches!(err, RelayError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_read_frame_zero_length() {
        let bytes: Vec<u8> = vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x01];
        let mut reader = std::io::Cursor::new(bytes);
        let err = Frame::read(&mut reader).await.unwrap_err();
        assert!(matches!(err, RelayError::Frame { .. }));
    }
}
