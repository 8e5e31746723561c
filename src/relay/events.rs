//! Edge event aggregator
//!
//! Bridges GPIO edge handlers to the dispatch task. One bit per source: bits
//! `0..MAX_PORTS` are relay ports, [`RESET_BIT`] is the reset button. Setting a
//! bit is a single atomic OR plus a wake-up, safe to call from the GPIO
//! interrupt thread. Bits stay set until the dispatch task clears them.

use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::Notify;

/// Aggregator bit of the reset button
pub const RESET_BIT: u8 = 6;

/// Snapshot of the aggregator bits
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EventBits(u32);

impl EventBits {
    pub fn contains(self, bit: u8) -> bool {
        self.0 & (1 << bit) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Default)]
pub struct EventAggregator {
    bits: AtomicU32,
    notify: Notify,
}

impl EventAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `bit` as pending and wakes the waiter
    pub fn set(&self, bit: u8) {
        self.bits.fetch_or(1 << bit, Ordering::AcqRel);
        self.notify.notify_one();
    }

    pub fn clear(&self, bit: u8) {
        self.bits.fetch_and(!(1 << bit), Ordering::AcqRel);
    }

    pub fn snapshot(&self) -> EventBits {
        EventBits(self.bits.load(Ordering::Acquire))
    }

    /// Waits until any bit in `mask` is set. Bits are left untouched.
    pub async fn wait_any(&self, mask: u32) -> EventBits {
        loop {
            let bits = self.bits.load(Ordering::Acquire) & mask;
            if bits != 0 {
                return EventBits(bits);
            }
            self.notify.notified().await;
        }
    }
}

/// Watch mask for the given port bits plus the reset bit
pub fn watch_mask(ports: impl IntoIterator<Item = u8>) -> u32 {
    ports
        .into_iter()
        .fold(1 << RESET_BIT, |mask, bit| mask | (1 << bit))
}
