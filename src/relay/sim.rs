//! In-memory relay board
//!
//! Stands in for real hardware on development machines and in tests. A button
//! is either wired (a module is plugged into its port) or floating. During the
//! boot probe a wired button line holds the low level it was driven to until it
//! is first sampled, a floating one is pulled straight up; after that sample a
//! wired button idles high until `press` pulls it low.

use super::board::{EdgeHandler, GpioError, Level, PinBank};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Default)]
struct SimState {
    levels: HashMap<u8, Level>,
    inputs: HashSet<u8>,
    wired: HashSet<u8>,
    probing: HashSet<u8>,
    handlers: HashMap<u8, Vec<EdgeHandler>>,
}

impl SimState {
    fn fire(&mut self, pin: u8) {
        if let Some(handlers) = self.handlers.get_mut(&pin) {
            for handler in handlers.iter_mut() {
                handler();
            }
        }
    }
}

#[derive(Default)]
pub struct SimulatedBoard {
    state: Mutex<SimState>,
}

impl SimulatedBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Board with modules plugged into the given button pins
    pub fn with_wired_buttons(buttons: &[u8]) -> Self {
        let board = Self::new();
        for pin in buttons {
            board.wire_button(*pin);
        }
        board
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        // A panicking test thread must not wedge every later access
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn wire_button(&self, pin: u8) {
        self.state().wired.insert(pin);
    }

    /// Pulls a button low, firing edge handlers on a high-to-low transition
    pub fn press(&self, pin: u8) {
        let mut state = self.state();
        let previous = state.levels.insert(pin, Level::Low);
        if previous != Some(Level::Low) {
            state.fire(pin);
        }
    }

    pub fn release(&self, pin: u8) {
        self.state().levels.insert(pin, Level::High);
    }

    /// Fires the edge handlers without changing the level (contact bounce)
    pub fn bounce(&self, pin: u8) {
        self.state().fire(pin);
    }

    pub fn level(&self, pin: u8) -> Option<Level> {
        self.state().levels.get(&pin).copied()
    }
}

impl PinBank for SimulatedBoard {
    fn configure_output(&self, pin: u8, level: Level) -> Result<(), GpioError> {
        let mut state = self.state();
        state.inputs.remove(&pin);
        state.probing.remove(&pin);
        state.levels.insert(pin, level);
        Ok(())
    }

    fn configure_input(&self, pin: u8) -> Result<(), GpioError> {
        let mut state = self.state();
        state.inputs.insert(pin);
        if state.wired.contains(&pin) {
            state.probing.insert(pin);
        } else {
            state.levels.insert(pin, Level::High);
        }
        Ok(())
    }

    fn read(&self, pin: u8) -> Result<Level, GpioError> {
        let mut state = self.state();
        let level = *state.levels.get(&pin).ok_or(GpioError::Unconfigured(pin))?;
        if state.probing.remove(&pin) {
            debug!("Simulated pin {} probed {}", pin, level);
            state.levels.insert(pin, Level::High);
        }
        Ok(level)
    }

    fn write(&self, pin: u8, level: Level) -> Result<(), GpioError> {
        let mut state = self.state();
        if state.inputs.contains(&pin) {
            return Err(GpioError::WrongMode {
                pin,
                wanted: "output",
            });
        }
        state.levels.insert(pin, level);
        Ok(())
    }

    fn on_falling_edge(&self, pin: u8, handler: EdgeHandler) -> Result<(), GpioError> {
        let mut state = self.state();
        if !state.inputs.contains(&pin) {
            return Err(GpioError::WrongMode {
                pin,
                wanted: "input",
            });
        }
        state.handlers.entry(pin).or_default().push(handler);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn probe_distinguishes_wired_from_floating() {
        let board = SimulatedBoard::with_wired_buttons(&[17]);
        for pin in [17, 19] {
            board.configure_output(pin, Level::Low).unwrap();
            board.configure_input(pin).unwrap();
        }
        assert_eq!(board.read(17).unwrap(), Level::Low);
        assert_eq!(board.read(19).unwrap(), Level::High);
        // wired button idles high once probed
        assert_eq!(board.read(17).unwrap(), Level::High);
    }

    #[test]
    fn press_fires_only_on_falling_edge() {
        let board = SimulatedBoard::new();
        board.configure_input(17).unwrap();
        let edges = Arc::new(AtomicUsize::new(0));
        let counter = edges.clone();
        board
            .on_falling_edge(
                17,
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        board.press(17);
        board.press(17);
        assert_eq!(edges.load(Ordering::SeqCst), 1);
        board.bounce(17);
        assert_eq!(edges.load(Ordering::SeqCst), 2);
        board.release(17);
        board.press(17);
        assert_eq!(edges.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn inputs_reject_writes() {
        let board = SimulatedBoard::new();
        board.configure_input(4).unwrap();
        assert!(board.write(4, Level::High).is_err());
    }
}
