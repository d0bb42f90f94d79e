//! Process-wide client state
//!
//! The transaction-ID sequence and the relay-count cache are owned by one
//! [`ClientContext`] constructed at startup and passed explicitly to every
//! transport. Keeping them out of module globals keeps tests hermetic and
//! lets one process drive several independent clients.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::RwLock;

/// Monotonic, wrapping transaction-ID sequence.
///
/// The first issued ID is 1; the counter wraps past `0xFFFF` back to 1 and
/// never issues 0, so an all-zero transaction ID in a reply always means a
/// device fault.
#[derive(Debug, Default)]
pub struct TransactionSequence(AtomicU16);

impl TransactionSequence {
    pub fn new() -> Self {
        Self(AtomicU16::new(0))
    }

    /// Allocate the next transaction ID.
    pub fn next(&self) -> u16 {
        let previous = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                Some(if v == u16::MAX { 1 } else { v + 1 })
            });
        // The closure always returns Some, so fetch_update cannot fail.
        let previous = match previous {
            Ok(v) | Err(v) => v,
        };
        if previous == u16::MAX {
            1
        } else {
            previous + 1
        }
    }
}

/// Shared state for all Modbus clients in the process: the transaction-ID
/// sequence and the relay-count cache (`address -> coil count`, populated on
/// first successful discovery, never evicted).
#[derive(Debug, Default)]
pub struct ClientContext {
    transactions: TransactionSequence,
    relay_counts: RwLock<HashMap<String, u16>>,
}

impl ClientContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a transaction ID for an outgoing request.
    #[inline]
    pub fn next_transaction_id(&self) -> u16 {
        self.transactions.next()
    }

    /// Previously discovered relay count for a device address.
    pub fn cached_relay_count(&self, address: &str) -> Option<u16> {
        let counts = self
            .relay_counts
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        counts.get(address).copied()
    }

    /// Memoize a discovered relay count. Counts are immutable once written;
    /// a concurrent duplicate insert of the same value is harmless.
    pub fn remember_relay_count(&self, address: &str, count: u16) {
        let mut counts = self
            .relay_counts
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        counts.entry(address.to_string()).or_insert(count);
    }
}
