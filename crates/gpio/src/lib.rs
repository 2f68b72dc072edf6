//! # GPIO Pin Oracle
//!
//! A thin, validated hardware abstraction for the digital pins a stepper
//! controller touches: read and write levels, configure direction and pull
//! resistors, and pulse a step pin.
//!
//! Every call validates the pin against the platform-approved BCM set.
//! The oracle carries a process-wide `output_lockout` flag which, when set,
//! turns all writes and mode changes into no-ops while reads proceed —
//! used for dry runs against real configs without moving hardware.
//!
//! Backends implement [`PinBackend`]. The default [`sim::SimBackend`] is an
//! in-memory pin store for tests and non-target platforms; the
//! `hardware` feature adds a Linux sysfs implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

pub mod sim;
#[cfg(feature = "hardware")]
pub mod sysfs;

pub use sim::SimBackend;

/// BCM pin numbers valid for control assignment on the target board.
pub const BCM_PINS: &[u8] = &[
    2, 3, 4, 17, 27, 22, 10, 9, 11, 5, 6, 13, 19, 26, 14, 15, 18, 23, 24, 25, 8, 7, 12, 16, 20, 21,
];

/// Size of the backend pin tables; BCM numbering tops out at 27 here.
pub(crate) const PIN_COUNT: usize = 28;

/// A digital logic level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    /// Maps a config-file 0/1 value onto a level.
    pub fn from_bit(bit: u8) -> Option<Self> {
        match bit {
            0 => Some(Level::Low),
            1 => Some(Level::High),
            _ => None,
        }
    }

    pub fn bit(self) -> u8 {
        match self {
            Level::Low => 0,
            Level::High => 1,
        }
    }
}

/// Pull-resistor configuration for input pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    Off,
    Up,
    Down,
}

/// Errors surfaced by the pin oracle. These are configuration faults, not
/// transient conditions; the oracle never retries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PinError {
    #[error("pin {0} is not in the platform pin set")]
    InvalidPin(u8),
    #[error("pin {0} is not configured as an output")]
    NotOutput(u8),
    #[error("gpio backend failure: {0}")]
    Backend(String),
}

/// The operations a pin backend must provide. All calls receive pins that
/// already passed set validation, except test hooks on concrete backends.
pub trait PinBackend: Send + Sync {
    fn read(&self, pin: u8) -> Result<Level, PinError>;
    fn write(&self, pin: u8, level: Level) -> Result<(), PinError>;
    fn configure_inputs(&self, pins: &[u8], pull: Pull) -> Result<(), PinError>;
    fn configure_outputs(&self, pins: &[u8], initial: Option<Level>) -> Result<(), PinError>;
}

/// Validated front door to the pin backend.
pub struct PinOracle {
    backend: Arc<dyn PinBackend>,
    lockout: AtomicBool,
}

impl PinOracle {
    pub fn new(backend: Arc<dyn PinBackend>) -> Self {
        Self { backend, lockout: AtomicBool::new(false) }
    }

    /// Builds an oracle over a fresh simulator backend, returning the
    /// backend handle so tests can play input pins.
    pub fn simulated() -> (Self, Arc<SimBackend>) {
        let backend = Arc::new(SimBackend::new());
        (Self::new(backend.clone()), backend)
    }

    /// When set, output writes and mode changes become no-ops.
    pub fn set_lockout(&self, on: bool) {
        tracing::info!(on, "output lockout");
        self.lockout.store(on, Ordering::SeqCst);
    }

    pub fn lockout(&self) -> bool {
        self.lockout.load(Ordering::SeqCst)
    }

    pub fn read(&self, pin: u8) -> Result<Level, PinError> {
        ensure_valid(pin)?;
        self.backend.read(pin)
    }

    pub fn write(&self, pin: u8, level: Level) -> Result<(), PinError> {
        ensure_valid(pin)?;
        if self.lockout() {
            return Ok(());
        }
        self.backend.write(pin, level)
    }

    pub fn configure_inputs(&self, pins: &[u8], pull: Pull) -> Result<(), PinError> {
        for &pin in pins {
            ensure_valid(pin)?;
        }
        if self.lockout() {
            return Ok(());
        }
        self.backend.configure_inputs(pins, pull)
    }

    pub fn configure_outputs(&self, pins: &[u8], initial: Option<Level>) -> Result<(), PinError> {
        for &pin in pins {
            ensure_valid(pin)?;
        }
        if self.lockout() {
            return Ok(());
        }
        self.backend.configure_outputs(pins, initial)
    }

    /// Drives `pin` HIGH, holds it for `width`, then drives it LOW.
    /// A zero width skips the hold entirely; the level still toggles.
    pub fn pulse(&self, pin: u8, width: Duration) -> Result<(), PinError> {
        self.write(pin, Level::High)?;
        if !width.is_zero() {
            // Spin rather than yield: widths are sub-millisecond and the
            // scheduler cannot be trusted at that granularity.
            let start = Instant::now();
            while start.elapsed() < width {}
        }
        self.write(pin, Level::Low)
    }
}

fn ensure_valid(pin: u8) -> Result<(), PinError> {
    if BCM_PINS.contains(&pin) {
        Ok(())
    } else {
        Err(PinError::InvalidPin(pin))
    }
}
