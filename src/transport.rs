//! TCP transport for Modbus exchanges
//!
//! Owns one connection to one relay board and drives the blocking
//! request/response cycle: frame the PDU, allocate a transaction ID, write,
//! read the framed reply, surface exception replies, then run the request's
//! validator and parser.
//!
//! Connections are not pooled and not shared between concurrently running
//! programs; each program run opens its own transport and drops it on exit.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::constants::{DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_PACING_MS, DEFAULT_READ_TIMEOUT_MS};
use crate::context::ClientContext;
use crate::error::{RelayError, RelayResult};
use crate::frame::{Frame, MbapHeader};
use crate::function::Request;

/// Per-connection tuning knobs.
///
/// # Example
///
/// ```rust
/// use relaysrv::transport::TransportOptions;
/// use std::time::Duration;
///
/// let options = TransportOptions::new()
///     .with_pacing(Duration::from_millis(10))
///     .with_read_timeout(Duration::from_secs(2));
/// assert_eq!(options.pacing, Duration::from_millis(10));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportOptions {
    /// TCP connect deadline.
    pub connect_timeout: Duration,
    /// Deadline for each framed read.
    pub read_timeout: Duration,
    /// Delay inserted after every successful exchange. Cheap relay boards
    /// drop frames that arrive back-to-back; zero disables pacing.
    pub pacing: Duration,
}

impl TransportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the TCP connect deadline.
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Set the per-read deadline.
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Set the inter-exchange pacing delay.
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            pacing: Duration::from_millis(DEFAULT_PACING_MS),
        }
    }
}

/// Counters for one connection's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// One TCP connection to a relay board.
pub struct TcpTransport {
    stream: TcpStream,
    address: String,
    options: TransportOptions,
    context: Arc<ClientContext>,
    stats: TransportStats,
}

impl TcpTransport {
    /// Dial `address` (`host:port`) with the configured connect timeout.
    pub async fn connect(
        address: &str,
        context: Arc<ClientContext>,
        options: TransportOptions,
        cancel: &CancellationToken,
    ) -> RelayResult<Self> {
        debug!(address, "connecting");

        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RelayError::Cancelled),
            connected = timeout(options.connect_timeout, TcpStream::connect(address)) => {
                match connected {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(e)) => {
                        return Err(RelayError::connection(format!(
                            "failed to connect to {address}: {e}"
                        )))
                    }
                    Err(_) => {
                        return Err(RelayError::timeout(
                            format!("connecting to {address}"),
                            options.connect_timeout.as_millis() as u64,
                        ))
                    }
                }
            }
        };

        // Command frames are tiny; never let Nagle batch them.
        stream.set_nodelay(true)?;

        debug!(address, "connected");
        Ok(Self {
            stream,
            address: address.to_string(),
            options,
            context,
            stats: TransportStats::default(),
        })
    }

    /// The `host:port` this transport dialed.
    #[inline]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The shared client context this transport allocates IDs from.
    #[inline]
    pub fn context(&self) -> &Arc<ClientContext> {
        &self.context
    }

    /// Counters for this connection.
    #[inline]
    pub fn stats(&self) -> TransportStats {
        self.stats
    }

    /// Execute one exchange: frame, write, read, check exception, validate,
    /// parse. Returns the request frame (callers log or compare it) and the
    /// typed result.
    pub async fn send<R: Request>(
        &mut self,
        request: &R,
        cancel: &CancellationToken,
    ) -> RelayResult<(Frame, R::Output)> {
        let pdu = request.pdu()?;
        let header = MbapHeader::request(self.context.next_transaction_id(), pdu.len());
        let request_frame = Frame::new(header, pdu.as_slice().to_vec());
        let request_bytes = request_frame.to_bytes();

        debug!(
            address = %self.address,
            transaction_id = header.transaction_id,
            payload = ?request_frame.payload,
            "sending"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RelayError::Cancelled),
            written = self.stream.write_all(&request_bytes) => written?,
        }
        self.stats.requests_sent += 1;
        self.stats.bytes_sent += request_bytes.len() as u64;

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RelayError::Cancelled),
            read = timeout(self.options.read_timeout, Frame::read(&mut self.stream)) => {
                match read {
                    Ok(frame) => frame?,
                    Err(_) => {
                        return Err(RelayError::timeout(
                            format!("waiting for reply from {}", self.address),
                            self.options.read_timeout.as_millis() as u64,
                        ))
                    }
                }
            }
        };
        self.stats.responses_received += 1;
        self.stats.bytes_received += (7 + response.payload.len()) as u64;

        if let Some((function, code)) = response.exception() {
            debug!(function, code, "got an exception response");
            return Err(RelayError::Exception { function, code });
        }

        request.validate(&request_frame, &response)?;
        let output = request.parse(&response)?;

        if !self.options.pacing.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RelayError::Cancelled),
                _ = tokio::time::sleep(self.options.pacing) => {}
            }
        }

        Ok((request_frame, output))
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("address", &self.address)
            .field("stats", &self.stats)
            .finish()
    }
}
