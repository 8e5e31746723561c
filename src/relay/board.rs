//! Pin-level hardware abstraction
//!
//! The controller only needs a handful of operations on numbered pins; the
//! [`PinBank`] trait is that seam. `rpi` backs it with `rppal`, `sim` with an
//! in-memory board for development machines and tests.

use std::fmt;

/// Logic level of a pin. Buttons are active-low: `Low` means asserted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn is_asserted(self) -> bool {
        self == Level::Low
    }

    pub fn from_on(on: bool) -> Self {
        if on {
            Level::High
        } else {
            Level::Low
        }
    }

    pub fn is_high(self) -> bool {
        self == Level::High
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Low => f.write_str("low"),
            Level::High => f.write_str("high"),
        }
    }
}

/// Called on a falling edge. Runs outside the async runtime and must only
/// record the event: no I/O, no allocation, no blocking.
pub type EdgeHandler = Box<dyn FnMut() + Send + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum GpioError {
    #[error("Failed to open GPIO controller: {0}")]
    Init(String),

    #[error("Pin {pin}: {reason}")]
    Pin { pin: u8, reason: String },

    #[error("Pin {0} is not configured")]
    Unconfigured(u8),

    #[error("Pin {pin} is not usable as {wanted}")]
    WrongMode { pin: u8, wanted: &'static str },

    #[error("Invalid port layout: {0}")]
    Layout(String),
}

pub trait PinBank: Send + Sync {
    /// Configures `pin` as a push-pull output at `level`
    fn configure_output(&self, pin: u8, level: Level) -> Result<(), GpioError>;

    /// Configures `pin` as an input with pull-up
    fn configure_input(&self, pin: u8) -> Result<(), GpioError>;

    /// Reads an input, or the driven level of an output
    fn read(&self, pin: u8) -> Result<Level, GpioError>;

    fn write(&self, pin: u8, level: Level) -> Result<(), GpioError>;

    /// Installs a falling-edge handler on an input pin
    fn on_falling_edge(&self, pin: u8, handler: EdgeHandler) -> Result<(), GpioError>;
}
