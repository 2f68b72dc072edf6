//! Motor state types and the shared motion context.
//!
//! `MotorState` is stored in an atomic by the owning control thread and
//! read without coordination by status queries; snapshots may therefore be
//! torn across fields, which is acceptable — status is informational and
//! must never block the control loop.

use std::sync::atomic::{AtomicBool, Ordering};

use gpio::PinOracle;
use parking_lot::FairMutex;
use serde::Serialize;

use crate::registry::MotorRegistry;

/// Lifecycle state of one motor axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum MotorState {
    Uninitialized = 0,
    Disabled = 1,
    Idle = 2,
    Moving = 3,
    Homing = 4,
    Error = 5,
    /// Reserved fault sink; never entered by the current controller.
    Hardkill = 6,
    Unknown = 7,
}

impl MotorState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => MotorState::Uninitialized,
            1 => MotorState::Disabled,
            2 => MotorState::Idle,
            3 => MotorState::Moving,
            4 => MotorState::Homing,
            5 => MotorState::Error,
            6 => MotorState::Hardkill,
            _ => MotorState::Unknown,
        }
    }

    /// True while the control thread is executing motion.
    pub fn is_moving(self) -> bool {
        matches!(self, MotorState::Moving | MotorState::Homing)
    }
}

/// Travel direction of an axis. UP increments position, DOWN decrements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Direction {
    Down = 0,
    Up = 1,
}

impl Direction {
    pub fn from_bit(bit: u8) -> Option<Self> {
        match bit {
            0 => Some(Direction::Down),
            1 => Some(Direction::Up),
            _ => None,
        }
    }

    pub fn bit(self) -> u8 {
        self as u8
    }

    /// The level written to the direction pin.
    pub fn level(self) -> gpio::Level {
        match self {
            Direction::Down => gpio::Level::Low,
            Direction::Up => gpio::Level::High,
        }
    }

    pub fn flip(self) -> Self {
        match self {
            Direction::Down => Direction::Up,
            Direction::Up => Direction::Down,
        }
    }
}

/// One motor's status snapshot, as served by the HTTP surface.
///
/// Fields past the limit switches are omitted until the motor has been
/// initialized, when they start carrying meaning.
#[derive(Debug, Clone, Serialize)]
pub struct MotorStatus {
    pub uuid: String,
    pub name: String,
    pub fname: String,
    pub state: MotorState,
    pub thread_on: bool,
    pub lim_up: bool,
    pub lim_dn: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pos: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jerk: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vel: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acc: Option<f64>,
}

/// Process-wide motion resources shared by every motor.
///
/// The arbiter is the only globally contended primitive during steady
/// state: a motor holds it for the entire duration of one move or homing
/// sequence, and its FIFO fairness keeps late-arriving motors from
/// starving. It must never be acquired from an HTTP handler.
pub struct SharedMotion {
    pub gpio: PinOracle,
    pub arbiter: FairMutex<()>,
    emergency_stop: AtomicBool,
}

impl SharedMotion {
    pub fn new(gpio: PinOracle) -> Self {
        Self {
            gpio,
            arbiter: FairMutex::new(()),
            emergency_stop: AtomicBool::new(false),
        }
    }

    pub fn set_emergency_stop(&self, on: bool) {
        self.emergency_stop.store(on, Ordering::SeqCst);
    }

    pub fn emergency_stop(&self) -> bool {
        self.emergency_stop.load(Ordering::SeqCst)
    }
}

/// Everything the HTTP surface needs, built once at startup and injected
/// into handlers; tests construct a fresh context per case.
pub struct AppContext {
    pub registry: MotorRegistry,
    pub shared: std::sync::Arc<SharedMotion>,
    /// The config document as loaded, served verbatim by `/config/`.
    pub raw_config: serde_json::Value,
}
