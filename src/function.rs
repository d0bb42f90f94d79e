//! Modbus function layer
//!
//! Each function code the controller speaks is a [`Request`] implementation
//! with three responsibilities: build its PDU bytes, validate the shape of
//! the device's reply against the request, and parse the reply into a typed
//! result.
//!
//! | Code | Function | Reply validation | Parsed result |
//! |------|----------|------------------|---------------|
//! | 0x05 | Write Single Coil | byte-for-byte echo of the request | none |
//! | 0x01 | Read Coils | transaction ID + function code + length | [`CoilStates`] |

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::FC_READ_COILS;
use crate::error::{RelayError, RelayResult};
use crate::frame::Frame;
use crate::pdu::{CoilAction, ModbusPdu, PduBuilder};

/// One Modbus request/response exchange, described declaratively.
///
/// The transport drives the lifecycle: it frames the PDU from
/// [`Request::pdu`], performs the exchange, checks for exception replies,
/// then hands request and response frames to [`Request::validate`] and
/// finally [`Request::parse`].
pub trait Request {
    /// The typed result extracted from a valid response.
    type Output;

    /// Build the PDU for this request (function code byte first).
    fn pdu(&self) -> RelayResult<ModbusPdu>;

    /// Enforce the reply's shape. Runs after exception detection, so
    /// implementations see only non-exception frames.
    fn validate(&self, request: &Frame, response: &Frame) -> RelayResult<()>;

    /// Extract the semantic payload from a validated response.
    fn parse(&self, response: &Frame) -> RelayResult<Self::Output>;
}

// ============================================================================
// Write Single Coil (FC05)
// ============================================================================

/// Write Single Coil request: drive one relay on, off, or toggle it.
#[derive(Debug, Clone, Copy)]
pub struct WriteSingleCoil {
    /// 0-based coil address on the wire.
    pub address: u16,
    pub action: CoilAction,
}

impl WriteSingleCoil {
    pub fn new(address: u16, action: CoilAction) -> Self {
        Self { address, action }
    }
}

impl Request for WriteSingleCoil {
    type Output = ();

    fn pdu(&self) -> RelayResult<ModbusPdu> {
        PduBuilder::write_single_coil(self.address, self.action)
    }

    /// Relay boards acknowledge FC05 by echoing the request byte-for-byte,
    /// header included. Every differing byte is recorded; all differences
    /// accumulate into one error.
    fn validate(&self, request: &Frame, response: &Frame) -> RelayResult<()> {
        let request_bytes = request.to_bytes();
        let response_bytes = response.to_bytes();

        let mut mismatches = Vec::new();
        if request_bytes.len() != response_bytes.len() {
            mismatches.push(format!(
                "response length {} does not match request length {}",
                response_bytes.len(),
                request_bytes.len()
            ));
        } else {
            for (i, (req, resp)) in request_bytes.iter().zip(response_bytes.iter()).enumerate() {
                if req != resp {
                    mismatches.push(format!(
                        "byte {i} mismatch: request 0x{req:02X}, response 0x{resp:02X}"
                    ));
                }
            }
        }

        if mismatches.is_empty() {
            Ok(())
        } else {
            Err(RelayError::EchoMismatch { mismatches })
        }
    }

    fn parse(&self, _response: &Frame) -> RelayResult<()> {
        Ok(())
    }
}

// ============================================================================
// Read Coils (FC01)
// ============================================================================

/// Decoded coil states keyed by 1-based relay index ("1", "2", ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoilStates {
    pub coils: BTreeMap<String, bool>,
}

/// Read Coils request over a contiguous address range.
#[derive(Debug, Clone, Copy)]
pub struct ReadCoils {
    pub start_address: u16,
    pub quantity: u16,
}

impl ReadCoils {
    pub fn new(start_address: u16, quantity: u16) -> Self {
        Self {
            start_address,
            quantity,
        }
    }

    /// Reply payload length: function code, byte count, then the packed
    /// bit field.
    #[inline]
    fn expected_payload_len(&self) -> usize {
        2 + (self.quantity as usize).div_ceil(8)
    }
}

impl Request for ReadCoils {
    type Output = CoilStates;

    fn pdu(&self) -> RelayResult<ModbusPdu> {
        PduBuilder::read_coils(self.start_address, self.quantity)
    }

    fn validate(&self, request: &Frame, response: &Frame) -> RelayResult<()> {
        let mut problems = Vec::new();

        if response.header.transaction_id != request.header.transaction_id {
            problems.push(format!(
                "response transaction ID {:#06x} does not match request transaction ID {:#06x}",
                response.header.transaction_id, request.header.transaction_id
            ));
        }

        match response.function_code() {
            Some(FC_READ_COILS) => {}
            Some(fc) => problems.push(format!(
                "unexpected function code: {fc:02X}; expected {FC_READ_COILS:02X}"
            )),
            None => problems.push("empty response payload".to_string()),
        }

        let expected = self.expected_payload_len();
        if response.payload.len() != expected {
            problems.push(format!(
                "response payload length is {}, expected {} for {} coils",
                response.payload.len(),
                expected,
                self.quantity
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(RelayError::InvalidResponse { problems })
        }
    }

    /// Unpack the bit field. Coil `i` of the request lands at byte
    /// `2 + i/8`, bit `i%8` (least significant bit first), and is reported
    /// under the 1-based key `i+1`.
    fn parse(&self, response: &Frame) -> RelayResult<CoilStates> {
        let mut coils = BTreeMap::new();
        for i in 0..self.quantity as usize {
            let byte_index = 2 + i / 8;
            let bit_index = i % 8;
            let byte = response.payload.get(byte_index).ok_or_else(|| {
                RelayError::frame(format!(
                    "coil bit field truncated at byte {byte_index} of {}",
                    response.payload.len()
                ))
            })?;
            coils.insert((i + 1).to_string(), (byte >> bit_index) & 1 != 0);
        }
        Ok(CoilStates { coils })
    }
}
