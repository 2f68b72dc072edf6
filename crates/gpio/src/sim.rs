//! In-memory pin backend.
//!
//! Stands in for the real GPIO block on development machines and in tests:
//! levels live in a per-pin atomic table, inputs configured with a pull-up
//! read HIGH (matching how limit switches idle on the real board), and
//! rising edges on outputs are counted so tests can assert exact pulse
//! totals. `drive_input` lets a test play a limit switch or estop line.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use parking_lot::Mutex;

use crate::{Level, PinBackend, PinError, Pull, PIN_COUNT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Unconfigured,
    Input,
    Output,
}

pub struct SimBackend {
    levels: [AtomicU8; PIN_COUNT],
    edges: [AtomicU64; PIN_COUNT],
    modes: Mutex<[Mode; PIN_COUNT]>,
}

impl SimBackend {
    pub fn new() -> Self {
        Self {
            levels: std::array::from_fn(|_| AtomicU8::new(0)),
            edges: std::array::from_fn(|_| AtomicU64::new(0)),
            modes: Mutex::new([Mode::Unconfigured; PIN_COUNT]),
        }
    }

    /// Sets an input pin's level directly, as the external world would.
    pub fn drive_input(&self, pin: u8, level: Level) {
        if (pin as usize) < PIN_COUNT {
            self.levels[pin as usize].store(level.bit(), Ordering::SeqCst);
        }
    }

    /// Current stored level of a pin.
    pub fn level(&self, pin: u8) -> Level {
        match self.levels[pin as usize].load(Ordering::SeqCst) {
            0 => Level::Low,
            _ => Level::High,
        }
    }

    /// Number of LOW -> HIGH transitions written to an output pin.
    pub fn rising_edges(&self, pin: u8) -> u64 {
        self.edges[pin as usize].load(Ordering::SeqCst)
    }
}

impl Default for SimBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PinBackend for SimBackend {
    fn read(&self, pin: u8) -> Result<Level, PinError> {
        Ok(self.level(pin))
    }

    fn write(&self, pin: u8, level: Level) -> Result<(), PinError> {
        if self.modes.lock()[pin as usize] != Mode::Output {
            return Err(PinError::NotOutput(pin));
        }
        let prev = self.levels[pin as usize].swap(level.bit(), Ordering::SeqCst);
        if prev == 0 && level == Level::High {
            self.edges[pin as usize].fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn configure_inputs(&self, pins: &[u8], pull: Pull) -> Result<(), PinError> {
        let mut modes = self.modes.lock();
        for &pin in pins {
            modes[pin as usize] = Mode::Input;
            // An idle input follows its pull resistor.
            let level = match pull {
                Pull::Up => Level::High,
                Pull::Down | Pull::Off => Level::Low,
            };
            self.levels[pin as usize].store(level.bit(), Ordering::SeqCst);
        }
        Ok(())
    }

    fn configure_outputs(&self, pins: &[u8], initial: Option<Level>) -> Result<(), PinError> {
        let mut modes = self.modes.lock();
        for &pin in pins {
            modes[pin as usize] = Mode::Output;
            if let Some(level) = initial {
                self.levels[pin as usize].store(level.bit(), Ordering::SeqCst);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pull_up_inputs_idle_high() {
        let sim = SimBackend::new();
        sim.configure_inputs(&[5, 6], Pull::Up).unwrap();
        sim.configure_inputs(&[13], Pull::Down).unwrap();

        assert_eq!(sim.read(5).unwrap(), Level::High);
        assert_eq!(sim.read(6).unwrap(), Level::High);
        assert_eq!(sim.read(13).unwrap(), Level::Low);
    }

    #[test]
    fn writes_require_output_mode() {
        let sim = SimBackend::new();
        assert_eq!(sim.write(17, Level::High), Err(PinError::NotOutput(17)));

        sim.configure_inputs(&[17], Pull::Off).unwrap();
        assert_eq!(sim.write(17, Level::High), Err(PinError::NotOutput(17)));

        sim.configure_outputs(&[17], Some(Level::Low)).unwrap();
        assert!(sim.write(17, Level::High).is_ok());
    }

    #[test]
    fn driven_inputs_are_visible_to_reads() {
        let sim = SimBackend::new();
        sim.configure_inputs(&[6], Pull::Up).unwrap();
        assert_eq!(sim.read(6).unwrap(), Level::High);

        sim.drive_input(6, Level::Low);
        assert_eq!(sim.read(6).unwrap(), Level::Low);
    }

    #[test]
    fn edge_counter_ignores_repeated_highs() {
        let sim = SimBackend::new();
        sim.configure_outputs(&[27], Some(Level::Low)).unwrap();

        sim.write(27, Level::High).unwrap();
        sim.write(27, Level::High).unwrap();
        sim.write(27, Level::Low).unwrap();
        sim.write(27, Level::High).unwrap();

        assert_eq!(sim.rising_edges(27), 2);
    }
}
