//! Optimized Modbus PDU data structure
//!
//! Use a fixed-size stack array to avoid heap allocation on the request path.

use tracing::debug;

use crate::constants::{
    COIL_VALUE_OFF, COIL_VALUE_ON, COIL_VALUE_TOGGLE, EXCEPTION_FLAG, FC_READ_COILS,
    FC_WRITE_SINGLE_COIL, MAX_PDU_SIZE,
};
use crate::error::{RelayError, RelayResult};

/// PDU buffer with a stack-allocated fixed array.
#[derive(Debug, Clone)]
pub struct ModbusPdu {
    /// Fixed-size buffer (stack)
    data: [u8; MAX_PDU_SIZE],
    /// Actual data length
    len: usize,
}

impl ModbusPdu {
    /// Create an empty PDU
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    /// Create a PDU from a byte slice
    #[inline]
    pub fn from_slice(data: &[u8]) -> RelayResult<Self> {
        if data.len() > MAX_PDU_SIZE {
            return Err(RelayError::frame(format!(
                "PDU too large: {} bytes (max {})",
                data.len(),
                MAX_PDU_SIZE
            )));
        }

        let mut pdu = Self::new();
        pdu.data[..data.len()].copy_from_slice(data);
        pdu.len = data.len();
        Ok(pdu)
    }

    /// Push a single byte
    #[inline]
    pub fn push(&mut self, byte: u8) -> RelayResult<()> {
        if self.len >= MAX_PDU_SIZE {
            return Err(RelayError::frame("PDU buffer full"));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Push u16 in big-endian
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> RelayResult<()> {
        self.push((value >> 8) as u8)?;
        self.push((value & 0xFF) as u8)?;
        Ok(())
    }

    /// Get immutable data slice
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Get current length
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get function code (first byte)
    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        if self.len > 0 {
            Some(self.data[0])
        } else {
            None
        }
    }

    /// Check if exception response
    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function_code()
            .map(|fc| fc & EXCEPTION_FLAG != 0)
            .unwrap_or(false)
    }

    /// Get exception code
    #[inline]
    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() && self.len > 1 {
            Some(self.data[1])
        } else {
            None
        }
    }

    /// Get human-readable function code description
    pub fn function_code_description(fc: u8) -> &'static str {
        match fc & !EXCEPTION_FLAG {
            FC_READ_COILS => "Read Coils",
            FC_WRITE_SINGLE_COIL => "Write Single Coil",
            _ => "Unknown Function",
        }
    }
}

impl Default for ModbusPdu {
    fn default() -> Self {
        Self::new()
    }
}

/// Coil write action carried by a Write Single Coil request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoilAction {
    /// Switch the coil on (`0xFF00`).
    On,
    /// Switch the coil off (`0x0000`).
    Off,
    /// Toggle the coil (`0x5500`, vendor extension).
    Toggle,
}

impl CoilAction {
    /// The 16-bit value written into the FC05 PDU.
    #[inline]
    pub fn wire_value(self) -> u16 {
        match self {
            CoilAction::On => COIL_VALUE_ON,
            CoilAction::Off => COIL_VALUE_OFF,
            CoilAction::Toggle => COIL_VALUE_TOGGLE,
        }
    }
}

/// PDU builder for the two coil operations.
pub struct PduBuilder;

impl PduBuilder {
    /// Build a Read Coils request PDU (FC01).
    ///
    /// # Arguments
    /// * `start_address` - First coil address to read
    /// * `quantity` - Number of coils to read
    pub fn read_coils(start_address: u16, quantity: u16) -> RelayResult<ModbusPdu> {
        let mut pdu = ModbusPdu::new();
        pdu.push(FC_READ_COILS)?;
        pdu.push_u16(start_address)?;
        pdu.push_u16(quantity)?;
        debug!(
            "PDU built: FC={:02X} (Read Coils), start={}, quantity={}",
            FC_READ_COILS, start_address, quantity
        );
        Ok(pdu)
    }

    /// Build a Write Single Coil request PDU (FC05).
    ///
    /// # Arguments
    /// * `address` - Coil address
    /// * `action` - On, off, or toggle
    pub fn write_single_coil(address: u16, action: CoilAction) -> RelayResult<ModbusPdu> {
        let mut pdu = ModbusPdu::new();
        pdu.push(FC_WRITE_SINGLE_COIL)?;
        pdu.push_u16(address)?;
        pdu.push_u16(action.wire_value())?;
        debug!(
            "PDU built: FC={:02X} (Write Single Coil), address={}, action={:?}",
            FC_WRITE_SINGLE_COIL, address, action
        );
        Ok(pdu)
    }
}
