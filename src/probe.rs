//! Relay-count discovery
//!
//! Relay boards do not advertise how many relays they carry, but they do
//! answer Read Coils with exception 0x02 (Illegal Data Address) for any
//! address past the last relay. That makes validity a monotone predicate
//! over the 16-bit coil address space, so the count falls out of a binary
//! search: at most 17 single-coil reads for the whole space.
//!
//! Discovered counts are memoized per device address in the shared
//! [`ClientContext`]; later status queries skip discovery entirely.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::context::ClientContext;
use crate::error::{RelayError, RelayResult};
use crate::function::{CoilStates, ReadCoils};
use crate::transport::{TcpTransport, TransportOptions};

/// Relay count for the transport's device, from cache or discovery.
pub async fn relay_count(
    transport: &mut TcpTransport,
    cancel: &CancellationToken,
) -> RelayResult<u16> {
    let address = transport.address().to_string();
    if let Some(count) = transport.context().cached_relay_count(&address) {
        debug!(%address, count, "relay count cache hit");
        return Ok(count);
    }

    let count = discover_relay_count(transport, cancel).await?;
    transport.context().remember_relay_count(&address, count);
    Ok(count)
}

/// Discover the number of relays on a device by binary search over the coil
/// address space, probing one coil at a time.
///
/// A readable address moves the search up; exception 0x02 moves it down; any
/// other failure aborts discovery, annotated with the failing address and
/// the pass counter. Devices whose valid addresses are not a prefix of the
/// address space cannot be discovered this way.
pub async fn discover_relay_count(
    transport: &mut TcpTransport,
    cancel: &CancellationToken,
) -> RelayResult<u16> {
    let address = transport.address().to_string();
    debug!(%address, "starting relay count discovery");

    // Signed bounds: `high` must be able to go below zero on an empty
    // device, and `high + 1` above 0xFFFF when every address is valid.
    let mut low: i32 = 0;
    let mut high: i32 = 0xFFFF;
    let mut pass = 0u32;

    while low <= high {
        let mid = low + (high - low) / 2;
        pass += 1;
        debug!(%address, coil = mid, pass, "probing coil presence");

        match transport.send(&ReadCoils::new(mid as u16, 1), cancel).await {
            Ok(_) => low = mid + 1,
            Err(err) if err.is_illegal_data_address() => high = mid - 1,
            Err(err) => {
                return Err(RelayError::context(
                    format!("relay count discovery at address {mid} (pass {pass})"),
                    err,
                ));
            }
        }
    }

    let count = high + 1;
    debug!(%address, count, requests_made = pass, "discovered relay count");
    u16::try_from(count).map_err(|_| {
        RelayError::validation(format!(
            "device reports {count} readable coils, more than a 16-bit count can hold"
        ))
    })
}

/// Read the state of every relay on a device: connect, resolve the relay
/// count, then issue one Read Coils covering the whole bank.
pub async fn read_device_status(
    address: &str,
    context: Arc<ClientContext>,
    options: TransportOptions,
    cancel: &CancellationToken,
) -> RelayResult<CoilStates> {
    let mut transport = TcpTransport::connect(address, context, options, cancel).await?;

    let count = relay_count(&mut transport, cancel)
        .await
        .map_err(|err| RelayError::context(format!("failed to get relay count for {address}"), err))?;

    if count == 0 {
        return Ok(CoilStates::default());
    }

    let (_, states) = transport
        .send(&ReadCoils::new(0, count), cancel)
        .await
        .map_err(|err| {
            RelayError::context(format!("failed to read relay states for {address}"), err)
        })?;
    Ok(states)
}
