//! # Relaysrv - Modbus/TCP Relay Board Controller
//!
//! A controller for Ethernet-attached relay boards that speak Modbus/TCP.
//! Users author declarative *programs* - sequences of relay on/off/toggle
//! command groups with loop counts and inter-group delays - and relaysrv
//! executes them against a target device, validating every device reply
//! against the request.
//!
//! ## Features
//!
//! - **Wire codec and client**: MBAP framing, per-process transaction-ID
//!   sequencing, blocking request/response exchange with echo validation and
//!   exception decoding
//! - **Relay-count discovery**: binary search over the coil address space,
//!   memoized per device
//! - **Program executor**: deterministic interpreter over nested command
//!   groups with looping and pacing semantics
//! - **Program registry**: concurrency-safe table with directory scan, lazy
//!   disk loads, and mtime-based reload
//! - **HTTP facade**: `/run`, `/programs`, and `/status` endpoints with CORS
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Use |
//! |------|----------|-----|
//! | 0x01 | Read Coils | status reads, relay-count discovery |
//! | 0x05 | Write Single Coil | on / off / toggle commands |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relaysrv::context::ClientContext;
//! use relaysrv::executor::run_program;
//! use relaysrv::program::parse_program;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> relaysrv::error::RelayResult<()> {
//!     let program = parse_program(
//!         br#"{"address":"192.168.1.50:502","commands":[[{"command":"toggle","relay":1}]]}"#,
//!     )?;
//!
//!     let context = Arc::new(ClientContext::new());
//!     run_program(&program, context, &CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Modbus protocol constants
pub mod constants;

/// Stack-allocated PDU buffer and builders
pub mod pdu;

/// MBAP frame encoding and framed reads
pub mod frame;

/// Function-code layer: request building, validation, parsing
pub mod function;

/// Process-wide client state (transaction IDs, relay-count cache)
pub mod context;

/// TCP transport and the request/response exchange
pub mod transport;

/// Relay-count discovery and device status reads
pub mod probe;

// ============================================================================
// Program layer
// ============================================================================

/// Program model and JSON ingestion
pub mod program;

/// Program executor
pub mod executor;

/// Program registry
pub mod registry;

// ============================================================================
// Service layer
// ============================================================================

/// Environment-derived server configuration
pub mod config;

/// HTTP facade
pub mod server;

/// Logging initialization
pub mod logging;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Error handling ===
pub use error::{RelayError, RelayResult};

// === Wire layer ===
pub use frame::{Frame, MbapHeader};
pub use function::{CoilStates, ReadCoils, Request, WriteSingleCoil};
pub use pdu::{CoilAction, ModbusPdu, PduBuilder};

// === Client ===
pub use context::ClientContext;
pub use probe::{discover_relay_count, read_device_status, relay_count};
pub use transport::{TcpTransport, TransportOptions, TransportStats};

// === Programs ===
pub use executor::run_program;
pub use program::{parse_program, parse_program_from_file, slugify_filename, Command, Program};
pub use registry::ProgramRegistry;

// === Service ===
pub use config::ServerConfig;
pub use server::{RunResponse, Server};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
