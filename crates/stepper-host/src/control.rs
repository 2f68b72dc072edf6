//! Per-motor control thread: command dispatch, the step executor, and the
//! two-phase homing sequence.
//!
//! The executor busy-waits on a monotonic clock between pulses. It must
//! not yield: scheduler latency at millisecond granularity would wreck
//! pulse timing on a general-purpose kernel. The only cooperative wait in
//! this thread is the 50 ms command dequeue, which keeps shutdown
//! responsive.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use gpio::Level;
use motion::{DelayProfile, Kinematics};
use tracing::{debug, error, info, info_span, warn};

use crate::interlock::{self, MoveAbort, Verdict};
use crate::motor::{Command, Motor};
use crate::state::{Direction, MotorState};

/// Command dequeue timeout; bounds shutdown latency.
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(50);

/// Settle time between the homing phases.
const HOMING_SETTLE: Duration = Duration::from_millis(100);

/// Step bound for the homing backoff phase.
const BACKOFF_STEP_BOUND: u32 = 3600 * 10;

/// How the executor finished when it was not aborted by an interlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepOutcome {
    /// All planned steps were emitted.
    Complete,
    /// The stop flag was observed; the queue has been drained.
    Stopped,
    /// Stop-on-release was requested but no interlock was latched.
    NotLatched,
}

/// Control-thread entry point. Exits when the motor's `thread_on` clears.
pub(crate) fn run(motor: Arc<Motor>) {
    let span = info_span!("motor", uuid = %motor.uuid());
    let _guard = span.enter();
    info!("control thread starting up");

    while motor.thread_on() {
        let cmd = match motor.recv_command(DEQUEUE_TIMEOUT) {
            Ok(cmd) => cmd,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        info!(?cmd, "thread command");
        match cmd {
            Command::Move { dir, steps, force } => handle_move(&motor, dir, steps, force),
            Command::Home { dir } => handle_home(&motor, dir),
            Command::Enable { force } => handle_enable(&motor, force),
            Command::Disable => handle_disable(&motor),
        }
    }
    debug!("control thread stopping gracefully");
}

fn handle_move(motor: &Motor, dir: Direction, steps: u32, force: bool) {
    let verdict = interlock::check(motor, false);
    if verdict != Verdict::Ok {
        if force {
            warn!(%verdict, "forced move with active interlock - this is dangerous");
        } else {
            warn!(%verdict, "interlock fail - move ignored");
            motor.done_event().set();
            return;
        }
    }

    // Only this motor may emit pulses until the whole move is over.
    let _arbiter = motor.shared().arbiter.lock();
    info!(steps, dir = dir.bit(), "move");

    if dir != motor.direction() {
        set_direction(motor, dir);
        debug!(dir = dir.bit(), "direction changed");
    } else {
        debug!(dir = dir.bit(), "direction already correct");
    }

    if steps == 0 {
        debug!("not moving since step count is 0");
    } else {
        if motor.state() == MotorState::Disabled {
            if motor.descriptor().auto_enable {
                enable_direct(motor);
            } else {
                warn!("not enabled, ignoring move command");
                motor.done_event().set();
                return;
            }
        }
        motor.set_state(MotorState::Moving);
        let kin = motor.kinematics();
        match plan_and_run(motor, steps, &kin, force, false) {
            Ok(outcome) => info!(?outcome, "motion finished"),
            Err(abort) => {
                warn!(%abort, "move aborted by interlock");
                motor.set_error(-2);
            }
        }
        motor.set_state(MotorState::Idle);
    }

    if motor.descriptor().auto_disable {
        disable_direct(motor);
    }
    motor.done_event().set();
}

fn handle_home(motor: &Motor, dir: Direction) {
    let verdict = interlock::check(motor, false);
    if verdict != Verdict::Ok {
        warn!(%verdict, "interlock fail - homing ignored");
        motor.done_event().set();
        return;
    }

    let _arbiter = motor.shared().arbiter.lock();
    info!(dir = dir.bit(), "homing");

    if dir != motor.direction() {
        set_direction(motor, dir);
        debug!(dir = dir.bit(), "direction changed");
    }
    motor.set_state(MotorState::Homing);

    // Phase 1: seek the limit at move speed. Hitting it is the success
    // path; running the full axis length without a hit is a fault.
    let kin = motor.kinematics();
    let start_pos = motor.position();
    match plan_and_run(motor, motor.descriptor().axis_length, &kin, false, false) {
        Err(abort) => {
            info!(%abort, steps = motor.position() - start_pos, "limit hit, backing off");
        }
        Ok(StepOutcome::Stopped) => {
            warn!("homing interrupted by stop");
            motor.set_state(MotorState::Idle);
            motor.done_event().set();
            return;
        }
        Ok(_) => {
            warn!("did not hit a limit within the axis length");
            motor.set_error(-2);
            motor.set_state(MotorState::Idle);
            motor.done_event().set();
            return;
        }
    }
    std::thread::sleep(HOMING_SETTLE);

    // Phase 2: creep back out of the switch until it releases. That
    // release point becomes the new origin.
    let backoff = Kinematics {
        jerk: 0.0,
        velocity: kin.velocity / 10.0,
        acceleration: kin.acceleration / 5.0,
    };
    set_direction(motor, dir.flip());
    debug!(dir = motor.direction().bit(), "direction reversed for backoff");
    let start_pos = motor.position();
    match plan_and_run(motor, BACKOFF_STEP_BOUND, &backoff, true, true) {
        Err(_) => {
            info!(steps = motor.position() - start_pos, "limit released, this is the new zero");
            motor.set_position(0);
            motor.set_homed(true);
        }
        Ok(outcome) => {
            error!(?outcome, "interlock release backoff failed");
            motor.set_error(-2);
        }
    }

    info!("homing finished");
    motor.set_state(MotorState::Idle);
    motor.done_event().set();
}

fn handle_enable(motor: &Motor, force: bool) {
    let verdict = interlock::check(motor, false);
    if verdict != Verdict::Ok && !force {
        warn!(%verdict, "interlock fail, enable ignored");
        return;
    }
    let error = motor.error();
    if error != 0 {
        if force {
            debug!(error, "error cleared");
            motor.set_error(0);
        } else {
            warn!(error, "error code present, enable ignored (use force to clear)");
            return;
        }
    }
    let _arbiter = motor.shared().arbiter.lock();
    enable_direct(motor);
}

fn handle_disable(motor: &Motor) {
    let verdict = interlock::check(motor, false);
    if verdict != Verdict::Ok {
        warn!(%verdict, "interlock active, proceeding with disable anyway");
    }
    let _arbiter = motor.shared().arbiter.lock();
    disable_direct(motor);
}

/// Plans the delay profile and feeds it to the executor.
fn plan_and_run(
    motor: &Motor,
    steps: u32,
    kin: &Kinematics,
    override_interlocks: bool,
    stop_on_release: bool,
) -> Result<StepOutcome, MoveAbort> {
    let profile = DelayProfile::new(steps, kin)
        .map_err(|e| MoveAbort::new(format!("profile planning failed: {}", e)))?;
    execute_steps(motor, profile, override_interlocks, stop_on_release)
}

/// The inner loop: one interlock check, one pulse, one position update and
/// one busy-wait per planned step.
fn execute_steps(
    motor: &Motor,
    profile: DelayProfile,
    override_interlocks: bool,
    stop_on_release: bool,
) -> Result<StepOutcome, MoveAbort> {
    let d = motor.descriptor();
    let gpio = &motor.shared().gpio;

    let mut latched = Verdict::Ok;
    if override_interlocks && stop_on_release {
        latched = interlock::check(motor, true);
        if latched == Verdict::Ok {
            warn!("stop on interlock release requested but no interlock is active");
            return Ok(StepOutcome::NotLatched);
        }
        info!(%latched, "awaiting release from interlock");
    }

    let delta: i64 = match motor.direction() {
        Direction::Up => 1,
        Direction::Down => -1,
    };
    let total = profile.len();

    for (idx, delay) in profile.enumerate() {
        let step = idx as u32 + 1;

        if override_interlocks {
            let verdict = interlock::check(motor, true);
            if stop_on_release && verdict == Verdict::Ok {
                debug!(%latched, "interlock release detected - stopping");
                return Err(MoveAbort::new("released"));
            }
            // Otherwise the verdict is advisory; a forced move proceeds.
        } else {
            interlock::require_clear(motor)?;
        }

        gpio.pulse(d.pin_step, Duration::ZERO)
            .map_err(|e| MoveAbort::new(format!("step pin failure: {}", e)))?;
        motor.add_position(delta);

        let start = Instant::now();
        while start.elapsed().as_secs_f64() < delay {
            if motor.stop_requested() {
                warn!("stop command detected");
                motor.drain_queue();
                motor.clear_stop();
                return Ok(StepOutcome::Stopped);
            }
        }
        if step % 1000 == 0 {
            debug!(step, total, delay_ms = delay * 1e3, "stepping");
        }
    }
    Ok(StepOutcome::Complete)
}

/// Writes the direction pin and mirrors it into the motor state. State
/// stays untouched: a direction flip is not observable motion.
fn set_direction(motor: &Motor, dir: Direction) {
    if let Err(e) = motor.shared().gpio.write(motor.descriptor().pin_dir, dir.level()) {
        error!(%e, "direction pin write failed");
        return;
    }
    motor.set_direction_value(dir);
}

/// Drives the enable pin active (low). Caller must hold the arbiter.
fn enable_direct(motor: &Motor) {
    info!("enabling driver");
    if let Err(e) = motor.shared().gpio.write(motor.descriptor().pin_enable, Level::Low) {
        error!(%e, "enable pin write failed");
        return;
    }
    motor.set_state(MotorState::Idle);
}

/// Drives the enable pin inactive (high). Caller must hold the arbiter.
fn disable_direct(motor: &Motor) {
    info!("disabling driver");
    if let Err(e) = motor.shared().gpio.write(motor.descriptor().pin_enable, Level::High) {
        error!(%e, "disable pin write failed");
        return;
    }
    motor.set_state(MotorState::Disabled);
}
