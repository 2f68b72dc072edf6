//! Trapezoidal step-delay profile generation.
//!
//! The profile is computed per step with a Taylor-series approximation of
//! the ideal constant-acceleration ramp: the delay before step `i` of the
//! ramp is `t0 * (sqrt(i+1) - sqrt(i))` with `t0 = sqrt(2 / accel)`, which
//! converges on `1 / sqrt(2 * accel * i)` without needing a square root
//! per step on the way down — the ramp-down side uses the cheaper
//! recurrence `d -= 2d / (4(i - n) + 1)` anchored at the endpoint.

use tracing::{debug, warn};

use crate::error::ProfileError;

/// Upper bound on jerk, velocity and acceleration values, in steps/s units.
pub const KINEMATIC_LIMIT: f64 = 20_000.0;

/// Kinematic limits for one move, in steps, steps/s and steps/s².
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kinematics {
    /// Instantaneous start/stop rate floor. Carried for configuration
    /// completeness; the Taylor ramp subsumes it.
    pub jerk: f64,
    /// Cruise velocity in steps per second.
    pub velocity: f64,
    /// Acceleration in steps per second squared.
    pub acceleration: f64,
}

impl Kinematics {
    pub fn new(jerk: f64, velocity: f64, acceleration: f64) -> Result<Self, ProfileError> {
        let kin = Self { jerk, velocity, acceleration };
        kin.validate()?;
        Ok(kin)
    }

    /// Checks the limits without constructing a profile.
    pub fn validate(&self) -> Result<(), ProfileError> {
        let in_range = |v: f64| v.is_finite() && (0.0..KINEMATIC_LIMIT).contains(&v);
        if !in_range(self.jerk) || !in_range(self.velocity) || !in_range(self.acceleration) {
            return Err(ProfileError::InvalidKinematics);
        }
        if self.velocity <= 0.0 || self.acceleration <= 0.0 {
            return Err(ProfileError::InvalidKinematics);
        }
        Ok(())
    }
}

/// Phase of the velocity profile the iterator is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    RampUp,
    Cruise,
    RampDown,
}

/// A lazy, finite sequence of inter-step delays in seconds.
///
/// Yields exactly `steps` delays. The delay yielded for a step is the time
/// to wait *after* emitting that step's pulse. When the move ends while
/// still ramping down, the terminal delay is zero — there is nothing left
/// to pace after the final pulse.
#[derive(Debug, Clone)]
pub struct DelayProfile {
    total: u32,
    step: u32,
    phase: Phase,
    /// Initial delay seed `sqrt(2 / accel)`.
    t0: f64,
    /// Cruise-floor delay `1 / velocity`.
    d_min: f64,
    /// Step index at which deceleration must begin.
    slowdown_step: u32,
    /// Ramp length needed to reach cruise velocity.
    steps_to_cruise: u32,
    delay: f64,
}

impl DelayProfile {
    /// Plans a profile of `steps` delays under the given limits.
    pub fn new(steps: u32, kin: &Kinematics) -> Result<Self, ProfileError> {
        if steps == 0 {
            return Err(ProfileError::ZeroLength);
        }
        kin.validate()?;

        let t0 = (2.0 / kin.acceleration).sqrt();
        let d_min = 1.0 / kin.velocity;
        let steps_to_cruise = (kin.velocity * kin.velocity / (2.0 * kin.acceleration)) as u32;

        let slowdown_step = if steps < 2 * steps_to_cruise {
            // Cruise speed is unreachable; turn around halfway.
            steps / 2 + 1
        } else {
            steps - steps_to_cruise + 1
        };

        debug!(
            steps,
            steps_to_cruise,
            slowdown_step,
            initial_delay_ms = t0 * 1e3,
            min_delay_ms = d_min * 1e3,
            "planned delay profile"
        );

        Ok(Self {
            total: steps,
            step: 0,
            phase: Phase::RampUp,
            t0,
            d_min,
            slowdown_step,
            steps_to_cruise,
            delay: 0.676 * t0,
        })
    }

    /// Ramp length needed to reach cruise velocity; moves shorter than
    /// twice this never cruise.
    pub fn steps_to_cruise(&self) -> u32 {
        self.steps_to_cruise
    }

    /// The cruise-floor delay `1 / velocity`.
    pub fn min_delay(&self) -> f64 {
        self.d_min
    }

    /// The ramp seed delay `sqrt(2 / acceleration)`.
    pub fn initial_delay(&self) -> f64 {
        self.t0
    }

    /// Total number of delays this profile yields.
    pub fn len(&self) -> u32 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

impl Iterator for DelayProfile {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        if self.step >= self.total {
            return None;
        }
        self.step += 1;
        let i = self.step;

        match self.phase {
            Phase::RampUp => {
                let n = i as f64;
                self.delay = self.t0 * ((n + 1.0).sqrt() - n.sqrt());
                if self.delay < self.d_min {
                    debug!(step = i, "ramp-up reached cruise floor");
                    self.delay = self.d_min;
                    self.phase = Phase::Cruise;
                }
                if i == self.slowdown_step {
                    // Turnaround before the ramp finished: triangle profile.
                    debug!(step = i, "ramp-down start");
                    self.phase = Phase::RampDown;
                }
            }
            Phase::Cruise => {
                if i == self.slowdown_step {
                    debug!(step = i, "ramp-down start");
                    self.phase = Phase::RampDown;
                }
            }
            Phase::RampDown => {
                if i == self.total {
                    return Some(0.0);
                }
                self.delay -= 2.0 * self.delay / (4.0 * (i as f64 - self.total as f64) + 1.0);
            }
        }

        if self.delay > self.t0 || self.delay < 0.0 {
            warn!(step = i, delay = self.delay, "anomalous step delay");
        }
        Some(self.delay)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.total - self.step) as usize;
        (left, Some(left))
    }
}

impl ExactSizeIterator for DelayProfile {}

/// Collects a full profile into a `Vec`, mostly for tests and benches.
pub fn plan_to_vec(steps: u32, kin: &Kinematics) -> Result<Vec<f64>, ProfileError> {
    Ok(DelayProfile::new(steps, kin)?.collect())
}
