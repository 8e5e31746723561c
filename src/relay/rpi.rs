//! `rppal` backend for Raspberry Pi class boards

use super::board::{EdgeHandler, GpioError, Level, PinBank};
use rppal::gpio::{Gpio, InputPin, Level as RpLevel, OutputPin, Trigger};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

enum Slot {
    Output(OutputPin),
    Input(InputPin),
}

pub struct RppalBoard {
    gpio: Gpio,
    pins: Mutex<HashMap<u8, Slot>>,
}

impl RppalBoard {
    pub fn open() -> Result<Self, GpioError> {
        let gpio = Gpio::new().map_err(|e| GpioError::Init(e.to_string()))?;
        info!("Opened GPIO controller");
        Ok(Self {
            gpio,
            pins: Mutex::new(HashMap::new()),
        })
    }

    fn pins(&self) -> Result<MutexGuard<'_, HashMap<u8, Slot>>, GpioError> {
        self.pins
            .lock()
            .map_err(|_| GpioError::Init("pin table lock poisoned".into()))
    }

    fn claim(&self, pin: u8) -> Result<rppal::gpio::Pin, GpioError> {
        self.gpio.get(pin).map_err(|e| GpioError::Pin {
            pin,
            reason: e.to_string(),
        })
    }
}

fn to_rppal(level: Level) -> RpLevel {
    match level {
        Level::Low => RpLevel::Low,
        Level::High => RpLevel::High,
    }
}

fn from_rppal(level: RpLevel) -> Level {
    match level {
        RpLevel::Low => Level::Low,
        RpLevel::High => Level::High,
    }
}

impl PinBank for RppalBoard {
    fn configure_output(&self, pin: u8, level: Level) -> Result<(), GpioError> {
        let mut pins = self.pins()?;
        // Release any previous mode before claiming the pin again
        pins.remove(&pin);

        let raw = self.claim(pin)?;
        let mut output = match level {
            Level::Low => raw.into_output_low(),
            Level::High => raw.into_output_high(),
        };
        output.set_reset_on_drop(false);
        debug!("Pin {} -> output {}", pin, level);
        pins.insert(pin, Slot::Output(output));
        Ok(())
    }

    fn configure_input(&self, pin: u8) -> Result<(), GpioError> {
        let mut pins = self.pins()?;
        pins.remove(&pin);

        let mut input = self.claim(pin)?.into_input_pullup();
        input.set_reset_on_drop(false);
        debug!("Pin {} -> input (pull-up)", pin);
        pins.insert(pin, Slot::Input(input));
        Ok(())
    }

    fn read(&self, pin: u8) -> Result<Level, GpioError> {
        let pins = self.pins()?;
        match pins.get(&pin) {
            Some(Slot::Input(input)) => Ok(from_rppal(input.read())),
            Some(Slot::Output(output)) => Ok(if output.is_set_high() {
                Level::High
            } else {
                Level::Low
            }),
            None => Err(GpioError::Unconfigured(pin)),
        }
    }

    fn write(&self, pin: u8, level: Level) -> Result<(), GpioError> {
        let mut pins = self.pins()?;
        match pins.get_mut(&pin) {
            Some(Slot::Output(output)) => {
                output.write(to_rppal(level));
                Ok(())
            }
            Some(Slot::Input(_)) => Err(GpioError::WrongMode {
                pin,
                wanted: "output",
            }),
            None => Err(GpioError::Unconfigured(pin)),
        }
    }

    fn on_falling_edge(&self, pin: u8, mut handler: EdgeHandler) -> Result<(), GpioError> {
        let mut pins = self.pins()?;
        match pins.get_mut(&pin) {
            Some(Slot::Input(input)) => input
                .set_async_interrupt(Trigger::FallingEdge, None, move |_event| handler())
                .map_err(|e| GpioError::Pin {
                    pin,
                    reason: e.to_string(),
                }),
            Some(Slot::Output(_)) => Err(GpioError::WrongMode {
                pin,
                wanted: "input",
            }),
            None => Err(GpioError::Unconfigured(pin)),
        }
    }
}
