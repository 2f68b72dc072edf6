//! Interlock evaluation.
//!
//! An interlock is any condition that must prevent motion: the global
//! emergency stop, or a limit switch engaged at its configured hit level.
//! Evaluation order is fixed — emergency stop first, then the upper limit,
//! then the lower — and that order is also the verdict precedence.

use thiserror::Error;
use tracing::{error, warn};

use crate::motor::Motor;
use crate::state::Direction;

/// Outcome of an interlock evaluation. The derived ordering is the
/// precedence: `Estop > LimitUp > LimitDown > Ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verdict {
    Ok,
    LimitDown,
    LimitUp,
    Estop,
}

impl Verdict {
    /// Short wire code, also used as the abort reason.
    pub fn code(self) -> &'static str {
        match self {
            Verdict::Ok => "OK",
            Verdict::LimitDown => "DN",
            Verdict::LimitUp => "UP",
            Verdict::Estop => "ESTOP",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Raised out of the motion executor when an interlock trips (or, during
/// homing backoff, when the latched interlock releases). Contained by the
/// control loop; the motor stays recoverable via a forced enable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct MoveAbort {
    pub reason: String,
}

impl MoveAbort {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

impl From<Verdict> for MoveAbort {
    fn from(verdict: Verdict) -> Self {
        Self::new(verdict.code())
    }
}

/// Samples the motor's interlocks. Limit pins are read twice and must
/// agree at the hit level, filtering single-sample transients. `silent`
/// suppresses the warning logs (used by the executor's per-step polling).
pub fn check(motor: &Motor, silent: bool) -> Verdict {
    if motor.shared().emergency_stop() {
        if !silent {
            warn!(motor = %motor.uuid(), "ESTOP interlock active");
        }
        return Verdict::Estop;
    }

    let d = motor.descriptor();
    let Some((up, up2)) = sample_twice(motor, d.pin_lim_up) else {
        return Verdict::Estop;
    };
    if up == d.lim_up_hit && up2 == d.lim_up_hit {
        if !silent {
            warn!(motor = %motor.uuid(), "upper limit engaged");
        }
        return Verdict::LimitUp;
    }
    let Some((dn, dn2)) = sample_twice(motor, d.pin_lim_dn) else {
        return Verdict::Estop;
    };
    if dn == d.lim_dn_hit && dn2 == d.lim_dn_hit {
        if !silent {
            warn!(motor = %motor.uuid(), hit_level = d.lim_dn_hit.bit(), "lower limit engaged");
        }
        return Verdict::LimitDown;
    }
    Verdict::Ok
}

/// Raise-on-fail wrapper used by unforced moves.
pub fn require_clear(motor: &Motor) -> Result<(), MoveAbort> {
    match check(motor, false) {
        Verdict::Ok => Ok(()),
        verdict => Err(MoveAbort::from(verdict)),
    }
}

/// Reads a limit pin twice. A read failure yields no sample, which the
/// caller evaluates as `Estop` — a limit whose state is unknowable must
/// block motion.
fn sample_twice(motor: &Motor, pin: u8) -> Option<(gpio::Level, gpio::Level)> {
    let gpio = &motor.shared().gpio;
    match (gpio.read(pin), gpio.read(pin)) {
        (Ok(a), Ok(b)) => Some((a, b)),
        (Err(e), _) | (_, Err(e)) => {
            error!(motor = %motor.uuid(), pin, %e, "limit pin read failed");
            None
        }
    }
}

/// True when the limit in the given travel direction is engaged.
/// Single-sample: used for status reporting, not motion gating.
pub fn limit_reached(motor: &Motor, direction: Direction) -> bool {
    let d = motor.descriptor();
    let (pin, hit) = match direction {
        Direction::Up => (d.pin_lim_up, d.lim_up_hit),
        Direction::Down => (d.pin_lim_dn, d.lim_dn_hit),
    };
    motor.shared().gpio.read(pin).map(|level| level == hit).unwrap_or(false)
}
