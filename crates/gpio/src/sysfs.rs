//! Linux sysfs pin backend (`hardware` feature).
//!
//! Exports each pin on first configuration and keeps the handle for the
//! life of the process. The sysfs interface has no pull-resistor control;
//! limit inputs rely on the board's external pull-ups, and the requested
//! pull is logged so a misconfiguration is at least visible.

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use sysfs_gpio::{Direction, Pin};
use tracing::{info, warn};

use crate::{Level, PinBackend, PinError, Pull};

pub struct SysfsBackend {
    pins: Mutex<HashMap<u8, Pin>>,
}

impl SysfsBackend {
    pub fn new() -> Self {
        Self { pins: Mutex::new(HashMap::new()) }
    }

    fn export(&self, pin: u8) -> Result<Pin, PinError> {
        let mut pins = self.pins.lock();
        if let Some(handle) = pins.get(&pin) {
            return Ok(*handle);
        }
        let handle = Pin::new(pin as u64);
        handle
            .export()
            .map_err(|e| PinError::Backend(format!("export pin {}: {}", pin, e)))?;
        // udev needs a moment to fix up permissions on the new node.
        thread::sleep(Duration::from_millis(10));
        pins.insert(pin, handle);
        Ok(handle)
    }

    fn handle(&self, pin: u8) -> Result<Pin, PinError> {
        self.pins
            .lock()
            .get(&pin)
            .copied()
            .ok_or_else(|| PinError::Backend(format!("pin {} was never configured", pin)))
    }
}

impl Default for SysfsBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PinBackend for SysfsBackend {
    fn read(&self, pin: u8) -> Result<Level, PinError> {
        let value = self
            .handle(pin)?
            .get_value()
            .map_err(|e| PinError::Backend(format!("read pin {}: {}", pin, e)))?;
        Ok(if value == 0 { Level::Low } else { Level::High })
    }

    fn write(&self, pin: u8, level: Level) -> Result<(), PinError> {
        self.handle(pin)?
            .set_value(level.bit())
            .map_err(|e| PinError::Backend(format!("write pin {}: {}", pin, e)))
    }

    fn configure_inputs(&self, pins: &[u8], pull: Pull) -> Result<(), PinError> {
        if pull != Pull::Off {
            warn!(?pull, "sysfs cannot program pull resistors; relying on board wiring");
        }
        for &pin in pins {
            let handle = self.export(pin)?;
            handle
                .set_direction(Direction::In)
                .map_err(|e| PinError::Backend(format!("input mode pin {}: {}", pin, e)))?;
            info!(pin, "configured as input");
        }
        Ok(())
    }

    fn configure_outputs(&self, pins: &[u8], initial: Option<Level>) -> Result<(), PinError> {
        for &pin in pins {
            let handle = self.export(pin)?;
            let direction = match initial {
                Some(Level::High) => Direction::High,
                Some(Level::Low) => Direction::Low,
                None => Direction::Out,
            };
            handle
                .set_direction(direction)
                .map_err(|e| PinError::Backend(format!("output mode pin {}: {}", pin, e)))?;
            info!(pin, ?initial, "configured as output");
        }
        Ok(())
    }
}
