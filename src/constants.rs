//! Modbus/TCP protocol constants used by the relay controller
//!
//! These constants are derived from the official Modbus specification,
//! narrowed to the two function codes relay boards actually speak
//! (Read Coils and Write Single Coil).

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Modbus MBAP header length for TCP.
/// Format: Transaction ID(2) + Protocol ID(2) + Length(2) + Unit ID(1) = 7 bytes.
/// The Length field counts the Unit ID plus everything after it, so a frame
/// is `MBAP_HEADER_LEN + (Length - 1)` bytes on the wire.
pub const MBAP_HEADER_LEN: usize = 7;

/// Maximum PDU (Protocol Data Unit) size per Modbus specification.
/// Inherited from the RS485 ADU limit:
/// 256 bytes - Slave Address (1 byte) - CRC (2 bytes) = 253 bytes.
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum MBAP Length field value (Unit ID + PDU).
/// Used for validating the Length field of incoming frames.
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// Protocol ID for Modbus/TCP. Always zero.
pub const PROTOCOL_ID: u16 = 0x0000;

/// Unit ID used by this controller. Ethernet relay boards are single-unit
/// devices; sub-device addressing is always `0x01`.
pub const UNIT_ID: u8 = 0x01;

// ============================================================================
// Function Codes
// ============================================================================

/// Read Coils (FC01)
pub const FC_READ_COILS: u8 = 0x01;

/// Write Single Coil (FC05)
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;

/// Exception responses set the top bit of the echoed function code.
pub const EXCEPTION_FLAG: u8 = 0x80;

// ============================================================================
// Coil Operation Limits
// ============================================================================

/// Maximum number of coils for FC01 (Read Coils).
///
/// Calculation for response PDU:
/// - Function Code: 1 byte
/// - Byte Count: 1 byte
/// - Coil Data: ceil(N / 8) bytes
/// - Total: 1 + 1 + ceil(N / 8) <= 253, spec rounds to N <= 2000
pub const MAX_READ_COILS: u16 = 2000;

// ============================================================================
// Write Single Coil Values
// ============================================================================

/// FC05 value for switching a coil on.
pub const COIL_VALUE_ON: u16 = 0xFF00;

/// FC05 value for switching a coil off.
pub const COIL_VALUE_OFF: u16 = 0x0000;

/// FC05 value for toggling a coil. Non-standard, but implemented by the
/// common Ethernet relay board firmwares this controller targets.
pub const COIL_VALUE_TOGGLE: u16 = 0x5500;

// ============================================================================
// Modbus Exception Codes
// ============================================================================

/// Illegal Function
pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;

/// Illegal Data Address
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;

/// Illegal Data Value
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;

/// Slave Device Failure
pub const EXCEPTION_SLAVE_DEVICE_FAILURE: u8 = 0x04;

/// Acknowledge
pub const EXCEPTION_ACKNOWLEDGE: u8 = 0x05;

/// Slave Device Busy
pub const EXCEPTION_SLAVE_DEVICE_BUSY: u8 = 0x06;

/// Memory Parity Error
pub const EXCEPTION_MEMORY_PARITY_ERROR: u8 = 0x08;

/// Gateway Path Unavailable
pub const EXCEPTION_GATEWAY_PATH_UNAVAILABLE: u8 = 0x0A;

/// Gateway Target Device Failed to Respond
pub const EXCEPTION_GATEWAY_TARGET_FAILED: u8 = 0x0B;

// ============================================================================
// Timing Defaults
// ============================================================================

/// Default TCP connect timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

/// Default per-read deadline in milliseconds. A device that stops answering
/// surfaces a timeout error instead of wedging its executor.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 5000;

/// Default pacing delay after each exchange, in milliseconds. Cheap relay
/// boards drop frames that arrive back-to-back.
pub const DEFAULT_PACING_MS: u64 = 5;
