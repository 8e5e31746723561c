//! Relay/button subsystem
//!
//! Physical side of a node: up to six relay/button pairs plus a reset button.
//!
//! 1. [`board`] - pin-level trait, implemented by [`rpi`] and [`sim`]
//! 2. [`events`] - bitset that edge handlers write and the dispatch task reads
//! 3. [`controller`] - port array, boot probe, idempotent relay primitives
//! 4. [`dispatch`] - debounced button handling task
//! 5. [`reset`] - long-press factory reset
//!
//! ```text
//! Button edge ──► EdgeHandler ──► EventAggregator ──► dispatch ──► Controller
//!                (GPIO thread)     (atomic bits)       (task)      + Registry + telemetry
//! ```

pub mod board;
pub mod controller;
pub mod dispatch;
pub mod events;
pub mod reset;
pub mod rpi;
pub mod sim;

pub use board::{GpioError, Level, PinBank};
pub use controller::{RelayController, ToggleOutcome};
pub use events::{EventAggregator, RESET_BIT};

use serde::{Deserialize, Serialize};

pub const MAX_PORTS: usize = 6;

/// BCM pin pairs of the stock six-port board
pub const DEFAULT_PORTS: [PortPins; MAX_PORTS] = [
    PortPins { relay: 16, button: 17 },
    PortPins { relay: 18, button: 19 },
    PortPins { relay: 22, button: 23 },
    PortPins { relay: 25, button: 26 },
    PortPins { relay: 27, button: 14 },
    PortPins { relay: 32, button: 33 },
];

pub const DEFAULT_RESET_PIN: u8 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortPins {
    pub relay: u8,
    pub button: u8,
}

/// Relay state; `Unknown` only ever for unpopulated ports
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortState {
    Unknown,
    Off,
    On,
}

impl PortState {
    pub fn from_on(on: bool) -> Self {
        if on {
            PortState::On
        } else {
            PortState::Off
        }
    }

    pub fn as_bool(self) -> Option<bool> {
        match self {
            PortState::Unknown => None,
            PortState::Off => Some(false),
            PortState::On => Some(true),
        }
    }

    pub fn flipped(self) -> Self {
        match self {
            PortState::Unknown => PortState::Unknown,
            PortState::Off => PortState::On,
            PortState::On => PortState::Off,
        }
    }
}

/// Channel name of the port at `index` (zero based): `relay_1` .. `relay_6`
pub fn channel_name(index: usize) -> String {
    format!("relay_{}", index + 1)
}

/// One relay + button pair
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayPort {
    index: usize,
    relay_pin: u8,
    button_pin: u8,
    channel: String,
    populated: bool,
    state: PortState,
    in_progress: bool,
}

impl RelayPort {
    pub(crate) fn new(index: usize, pins: PortPins) -> Self {
        Self {
            index,
            relay_pin: pins.relay,
            button_pin: pins.button,
            channel: channel_name(index),
            populated: false,
            state: PortState::Unknown,
            in_progress: false,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn relay_pin(&self) -> u8 {
        self.relay_pin
    }

    pub fn button_pin(&self) -> u8 {
        self.button_pin
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn is_populated(&self) -> bool {
        self.populated
    }

    pub fn state(&self) -> PortState {
        self.state
    }

    pub fn in_progress(&self) -> bool {
        self.in_progress
    }
}
