use super::board::{GpioError, Level, PinBank};
use super::events::{watch_mask, EventAggregator, RESET_BIT};
use super::{PortPins, PortState, RelayPort, MAX_PORTS};
use crate::device::{ChannelRegistry, ChannelSpec, RegistryError};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Result of one debounced pass over a port's button
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// Press confirmed, relay flipped
    Toggled { channel: String, on: bool },
    /// Still held from a press that already toggled
    Held,
    /// Release of a press that toggled
    Released,
    /// Asserted on first read but gone after the debounce delay
    Bounced,
    /// Neither asserted nor in progress
    Idle,
    /// Port has no module plugged in
    Unpopulated,
}

impl ToggleOutcome {
    /// Whether the dispatch task should drop the port's event bit
    pub fn settles(&self) -> bool {
        matches!(
            self,
            ToggleOutcome::Released
                | ToggleOutcome::Bounced
                | ToggleOutcome::Idle
                | ToggleOutcome::Unpopulated
        )
    }
}

pub struct RelayController {
    board: Arc<dyn PinBank>,
    ports: Mutex<Vec<RelayPort>>,
    reset_pin: u8,
}

impl RelayController {
    pub fn new(
        board: Arc<dyn PinBank>,
        layout: &[PortPins],
        reset_pin: u8,
    ) -> Result<Self, GpioError> {
        if layout.len() > MAX_PORTS {
            return Err(GpioError::Layout(format!(
                "{} ports configured, at most {} supported",
                layout.len(),
                MAX_PORTS
            )));
        }
        let ports = layout
            .iter()
            .enumerate()
            .map(|(index, pins)| RelayPort::new(index, *pins))
            .collect();

        Ok(Self {
            board,
            ports: Mutex::new(ports),
            reset_pin,
        })
    }

    /// Boot probe. Drives every relay and button line low, then releases each
    /// button to a pulled-up input: a line that still reads low has a module
    /// holding it and marks the port populated. Installs edge handlers for the
    /// populated buttons and the reset button. Returns the populated count.
    pub async fn detect(
        &self,
        events: &Arc<EventAggregator>,
        settle: Duration,
    ) -> Result<usize, GpioError> {
        let pins: Vec<(u8, u8)> = {
            let ports = self.ports.lock().await;
            ports.iter().map(|p| (p.relay_pin, p.button_pin)).collect()
        };

        for (relay, _) in &pins {
            self.board.configure_output(*relay, Level::Low)?;
        }
        for (_, button) in &pins {
            self.board.configure_output(*button, Level::Low)?;
        }
        sleep(settle).await;

        let mut probed = Vec::with_capacity(pins.len());
        for (relay, button) in &pins {
            self.board.configure_input(*button)?;
            sleep(settle).await;
            let populated = self.board.read(*button)?.is_asserted();
            let state = if populated {
                PortState::from_on(self.board.read(*relay)?.is_high())
            } else {
                PortState::Unknown
            };
            probed.push((populated, state));
        }

        let mut count = 0;
        let mut ports = self.ports.lock().await;
        for (port, (populated, state)) in ports.iter_mut().zip(probed) {
            port.populated = populated;
            port.state = state;
            port.in_progress = false;
            if populated {
                count += 1;
                info!("Port {} populated ({:?})", port.channel, state);
                let events = events.clone();
                let bit = port.index as u8;
                self.board
                    .on_falling_edge(port.button_pin, Box::new(move || events.set(bit)))?;
            } else {
                info!("Port {} empty", port.channel);
            }
        }
        drop(ports);

        self.board.configure_input(self.reset_pin)?;
        let events = events.clone();
        self.board
            .on_falling_edge(self.reset_pin, Box::new(move || events.set(RESET_BIT)))?;

        Ok(count)
    }

    /// Adds one boolean channel per port. Only populated ports are commandable.
    pub async fn register_channels(
        &self,
        registry: &mut ChannelRegistry,
    ) -> Result<(), RegistryError> {
        let ports = self.ports.lock().await;
        for port in ports.iter() {
            registry.add_channel(&port.channel, port.populated, ChannelSpec::Boolean)?;
            registry.set_value(&port.channel, port.state.as_bool().unwrap_or(false))?;
        }
        Ok(())
    }

    pub async fn ports(&self) -> Vec<RelayPort> {
        self.ports.lock().await.clone()
    }

    pub async fn populated_count(&self) -> usize {
        self.ports
            .lock()
            .await
            .iter()
            .filter(|p| p.populated)
            .count()
    }

    /// Aggregator bits the dispatch task waits on
    pub async fn watch_mask(&self) -> u32 {
        let ports = self.ports.lock().await;
        watch_mask(
            ports
                .iter()
                .filter(|p| p.populated)
                .map(|p| p.index as u8),
        )
    }

    pub fn reset_asserted(&self) -> Result<bool, GpioError> {
        Ok(self.board.read(self.reset_pin)?.is_asserted())
    }

    /// Drives the relay on `relay_pin` to `on`. Writes only when the physical
    /// level differs; empty ports are left alone. Returns the resulting state.
    pub async fn set_relay(&self, relay_pin: u8, on: bool) -> Result<PortState, GpioError> {
        let mut ports = self.ports.lock().await;
        let port = ports
            .iter_mut()
            .find(|p| p.relay_pin == relay_pin)
            .ok_or(GpioError::Unconfigured(relay_pin))?;

        if !port.populated {
            debug!("Ignoring {} on empty port {}", on, port.channel);
            return Ok(port.state);
        }

        let target = Level::from_on(on);
        if self.board.read(relay_pin)? != target {
            self.board.write(relay_pin, target)?;
            port.state = PortState::from_on(on);
            debug!("Relay {} -> {}", port.channel, target);
        }
        Ok(port.state)
    }

    pub async fn turn_on(&self, relay_pin: u8) -> Result<PortState, GpioError> {
        self.set_relay(relay_pin, true).await
    }

    pub async fn turn_off(&self, relay_pin: u8) -> Result<PortState, GpioError> {
        self.set_relay(relay_pin, false).await
    }

    pub async fn turn_all_on(&self) -> Result<(), GpioError> {
        self.set_all(true).await
    }

    pub async fn turn_all_off(&self) -> Result<(), GpioError> {
        self.set_all(false).await
    }

    async fn set_all(&self, on: bool) -> Result<(), GpioError> {
        let pins: Vec<u8> = {
            let ports = self.ports.lock().await;
            ports
                .iter()
                .filter(|p| p.populated)
                .map(|p| p.relay_pin)
                .collect()
        };
        for pin in pins {
            self.set_relay(pin, on).await?;
        }
        Ok(())
    }

    /// Applies a `{channel: bool}` map to the populated ports it names.
    /// Returns the `(channel, state)` pairs that were applied.
    pub async fn apply_command(&self, channels: &Map<String, Value>) -> Vec<(String, bool)> {
        let targets: Vec<(u8, String, bool)> = {
            let ports = self.ports.lock().await;
            ports
                .iter()
                .filter_map(|port| {
                    let on = channels.get(&port.channel).and_then(Value::as_bool)?;
                    if port.populated {
                        Some((port.relay_pin, port.channel.clone(), on))
                    } else {
                        debug!("Command for empty port {} dropped", port.channel);
                        None
                    }
                })
                .collect()
        };

        let mut applied = Vec::with_capacity(targets.len());
        for (pin, channel, on) in targets {
            match self.set_relay(pin, on).await {
                Ok(state) => {
                    if let Some(on) = state.as_bool() {
                        applied.push((channel, on));
                    }
                }
                Err(e) => warn!("Failed to drive {}: {}", channel, e),
            }
        }
        applied
    }

    /// One debounced pass over the button of port `index`.
    ///
    /// A fresh press is confirmed by a second read after `debounce`; only then
    /// is the relay flipped and the port marked in progress. The in-progress
    /// mark clears once the button is seen released, so holding a button never
    /// toggles twice.
    pub async fn toggle_port(
        &self,
        index: usize,
        debounce: Duration,
    ) -> Result<ToggleOutcome, GpioError> {
        let (button, in_progress) = {
            let ports = self.ports.lock().await;
            let port = ports
                .get(index)
                .ok_or_else(|| GpioError::Layout(format!("no port {}", index)))?;
            if !port.populated {
                return Ok(ToggleOutcome::Unpopulated);
            }
            (port.button_pin, port.in_progress)
        };

        let pressed = self.board.read(button)?.is_asserted();
        match (pressed, in_progress) {
            (true, false) => {
                sleep(debounce).await;
                if !self.board.read(button)?.is_asserted() {
                    debug!("Port {} bounced", index);
                    return Ok(ToggleOutcome::Bounced);
                }

                let mut ports = self.ports.lock().await;
                let port = &mut ports[index];
                if port.in_progress {
                    return Ok(ToggleOutcome::Held);
                }
                let next = port.state.flipped();
                let on = next == PortState::On;
                self.board.write(port.relay_pin, Level::from_on(on))?;
                port.state = next;
                port.in_progress = true;
                info!("Button toggled {} -> {}", port.channel, on);
                Ok(ToggleOutcome::Toggled {
                    channel: port.channel.clone(),
                    on,
                })
            }
            (false, true) => {
                sleep(debounce).await;
                let mut ports = self.ports.lock().await;
                ports[index].in_progress = false;
                Ok(ToggleOutcome::Released)
            }
            (true, true) => Ok(ToggleOutcome::Held),
            (false, false) => Ok(ToggleOutcome::Idle),
        }
    }
}
