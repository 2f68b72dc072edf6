//! End-to-end motor scenarios against the pin simulator.
//!
//! The simulator backend plays the role of the board: limit switches are
//! driven from helper threads the way the physical axis would engage and
//! release them, and the step pin's rising-edge counter gives exact pulse
//! totals.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use gpio::{Level, PinOracle, SimBackend};
use motion::Kinematics;
use stepper_host::interlock::{self, Verdict};
use stepper_host::motor::{Admission, Motor, MotorDescriptor};
use stepper_host::state::{Direction, MotorState, SharedMotion};

/// dir, step, enable, sleep, limit-up, limit-down
const PINS: [u8; 6] = [17, 27, 22, 10, 5, 6];
const STEP_PIN: u8 = 27;
const LIM_UP_PIN: u8 = 5;
const LIM_DN_PIN: u8 = 6;

fn descriptor(pins: [u8; 6], uuid: &str, auto_disable: bool) -> MotorDescriptor {
    MotorDescriptor {
        uuid: uuid.into(),
        short_name: format!("sn-{}", uuid),
        friendly_name: format!("axis {}", uuid),
        pin_dir: pins[0],
        pin_step: pins[1],
        pin_enable: pins[2],
        pin_sleep: pins[3],
        pin_lim_up: pins[4],
        pin_lim_dn: pins[5],
        lim_up_hit: Level::Low,
        lim_dn_hit: Level::Low,
        step_size: 1.0,
        pulse_width: Duration::ZERO,
        step_gap: Duration::ZERO,
        auto_enable: true,
        auto_disable,
        axis_length: 864_000,
    }
}

fn kin() -> Kinematics {
    Kinematics { jerk: 100.0, velocity: 2000.0, acceleration: 1000.0 }
}

/// A fresh context with one initialized motor.
fn spawn_motor(auto_disable: bool) -> (Arc<Motor>, Arc<SimBackend>) {
    let (oracle, sim) = PinOracle::simulated();
    let shared = Arc::new(SharedMotion::new(oracle));
    let motor = Motor::new(descriptor(PINS, "m1", auto_disable), kin(), shared);
    motor.initialize().unwrap();
    (motor, sim)
}

fn wait_until(cond: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

#[test]
fn blocking_move_steps_the_exact_count() {
    let (motor, sim) = spawn_motor(false);

    let result = motor.command_move(Direction::Up, 500, true, false);

    assert_eq!(result, Admission::Done);
    assert_eq!(motor.position(), 500);
    assert_eq!(sim.rising_edges(STEP_PIN), 500);
    assert_eq!(motor.state(), MotorState::Idle);
    assert_eq!(motor.error(), 0);
    motor.shutdown();
}

#[test]
fn down_move_decrements_position() {
    let (motor, sim) = spawn_motor(false);

    assert_eq!(motor.command_move(Direction::Down, 120, true, false), Admission::Done);

    assert_eq!(motor.position(), -120);
    assert_eq!(sim.rising_edges(STEP_PIN), 120);
    motor.shutdown();
}

#[test]
fn move_into_engaged_limit_is_skipped_without_pulses() {
    let (motor, sim) = spawn_motor(false);
    sim.drive_input(LIM_UP_PIN, Level::Low); // engaged before the command

    // The control loop's pre-check drops the command; the completion
    // event is still signalled so the blocking caller returns.
    let result = motor.command_move(Direction::Up, 500, true, false);

    assert_eq!(result, Admission::Done);
    assert_eq!(motor.position(), 0);
    assert_eq!(sim.rising_edges(STEP_PIN), 0);
    assert_eq!(motor.error(), 0);
    motor.shutdown();
}

#[test]
fn limit_hit_mid_move_aborts_with_error() {
    let (motor, sim) = spawn_motor(false);

    // Engage the switch once the ramp is underway, so the abort comes
    // from the executor's per-step check rather than the pre-check.
    let switch = sim.clone();
    let watcher = motor.clone();
    let trip = thread::spawn(move || {
        while watcher.state() != MotorState::Moving {
            thread::sleep(Duration::from_millis(1));
        }
        thread::sleep(Duration::from_millis(20));
        switch.drive_input(LIM_UP_PIN, Level::Low);
    });
    let result = motor.command_move(Direction::Up, 500, true, false);
    trip.join().unwrap();

    assert_eq!(result, Admission::Failed);
    assert_eq!(motor.error(), -2);
    assert_eq!(motor.state(), MotorState::Idle);
    assert!(motor.position() < 500, "move should have aborted early");
    assert!(sim.rising_edges(STEP_PIN) < 500);
    motor.shutdown();
}

#[test]
fn stop_interrupts_within_one_inter_step_delay() {
    let (motor, _sim) = spawn_motor(false);

    assert_eq!(motor.command_move(Direction::Up, 10_000, false, false), Admission::Queued);
    assert!(wait_until(|| motor.state() == MotorState::Moving, Duration::from_secs(1)));
    thread::sleep(Duration::from_millis(100));

    let stopped_at = Instant::now();
    assert!(motor.stop());
    assert!(wait_until(|| motor.state() == MotorState::Idle, Duration::from_secs(1)));
    // Early-ramp delays are tens of milliseconds at most; the executor
    // must notice the stop within one of them.
    assert!(stopped_at.elapsed() < Duration::from_millis(250));

    let pos = motor.position();
    assert!(pos > 0 && pos < 10_000, "position was {}", pos);
    assert_eq!(motor.dump_state().queue, Some(0));
    assert_eq!(motor.error(), 0);
    motor.shutdown();
}

#[test]
fn queue_overflow_fails_the_101st_command() {
    let (motor, _sim) = spawn_motor(false);

    assert_eq!(motor.command_move(Direction::Up, 10_000, false, false), Admission::Queued);
    assert!(wait_until(|| motor.state() == MotorState::Moving, Duration::from_secs(1)));

    for i in 0..100 {
        assert_eq!(
            motor.command_move(Direction::Up, 1, false, false),
            Admission::Queued,
            "command {} should queue",
            i
        );
    }
    assert_eq!(motor.command_move(Direction::Up, 1, false, false), Admission::Fail);

    assert!(motor.stop());
    assert!(wait_until(|| motor.state() == MotorState::Idle, Duration::from_secs(1)));
    motor.shutdown();
}

#[test]
fn oversized_move_is_rejected_at_admission() {
    let (motor, sim) = spawn_motor(false);
    assert_eq!(motor.command_move(Direction::Up, 100_000, false, false), Admission::Rejected);
    assert_eq!(sim.rising_edges(STEP_PIN), 0);
    motor.shutdown();
}

#[test]
fn homing_seeks_limit_and_rezeroes() {
    let (motor, sim) = spawn_motor(false);

    // Homing is only admitted from IDLE.
    assert_eq!(motor.enable(false), Admission::Queued);
    assert!(wait_until(|| motor.state() == MotorState::Idle, Duration::from_secs(1)));

    // Play the axis: the switch engages during the seek and releases
    // again once the backoff has crept out of it.
    let switch = sim.clone();
    let watcher = motor.clone();
    let axis = thread::spawn(move || {
        while watcher.state() != MotorState::Homing {
            thread::sleep(Duration::from_millis(1));
        }
        thread::sleep(Duration::from_millis(100));
        switch.drive_input(LIM_DN_PIN, Level::Low);
        thread::sleep(Duration::from_millis(400));
        switch.drive_input(LIM_DN_PIN, Level::High);
    });
    let result = motor.home(Direction::Down);
    axis.join().unwrap();

    assert_eq!(result, Admission::Done);
    assert!(motor.homed());
    assert_eq!(motor.position(), 0);
    assert_eq!(motor.error(), 0);
    assert_eq!(motor.state(), MotorState::Idle);
    assert_eq!(interlock::check(&motor, true), Verdict::Ok);
    motor.shutdown();
}

#[test]
fn homing_with_queued_commands_is_rejected() {
    let (motor, _sim) = spawn_motor(false);

    assert_eq!(motor.command_move(Direction::Up, 10_000, false, false), Admission::Queued);
    assert!(wait_until(|| motor.state() == MotorState::Moving, Duration::from_secs(1)));
    assert_eq!(motor.command_move(Direction::Up, 10, false, false), Admission::Queued);

    assert_eq!(motor.home(Direction::Down), Admission::Rejected);

    assert!(motor.stop());
    assert!(wait_until(|| motor.state() == MotorState::Idle, Duration::from_secs(1)));
    motor.shutdown();
}

#[test]
fn forced_enable_clears_error_and_recovers() {
    // auto_disable so the abort parks the motor in DISABLED, where a
    // forced enable is admissible.
    let (motor, sim) = spawn_motor(true);

    let switch = sim.clone();
    let watcher = motor.clone();
    let trip = thread::spawn(move || {
        while watcher.state() != MotorState::Moving {
            thread::sleep(Duration::from_millis(1));
        }
        thread::sleep(Duration::from_millis(20));
        switch.drive_input(LIM_UP_PIN, Level::Low);
    });
    assert_eq!(motor.command_move(Direction::Up, 500, true, false), Admission::Failed);
    trip.join().unwrap();
    assert_eq!(motor.error(), -2);
    assert_eq!(motor.state(), MotorState::Disabled);

    sim.drive_input(LIM_UP_PIN, Level::High); // back off the switch by hand

    // A plain enable must refuse to clear the latched error.
    assert_eq!(motor.enable(false), Admission::Queued);
    thread::sleep(Duration::from_millis(200));
    assert_eq!(motor.state(), MotorState::Disabled);
    assert_eq!(motor.error(), -2);

    // A forced enable clears it and the motor accepts moves again.
    assert_eq!(motor.enable(true), Admission::Queued);
    assert!(wait_until(|| motor.state() == MotorState::Idle, Duration::from_secs(1)));
    assert_eq!(motor.error(), 0);

    let before = motor.position();
    assert_eq!(motor.command_move(Direction::Up, 50, true, false), Admission::Done);
    assert_eq!(motor.position(), before + 50);
    motor.shutdown();
}

#[test]
fn queued_moves_execute_in_order() {
    let (motor, _sim) = spawn_motor(false);

    assert_eq!(motor.command_move(Direction::Up, 50, false, false), Admission::Queued);
    assert_eq!(motor.command_move(Direction::Down, 20, false, false), Admission::Queued);
    assert_eq!(motor.command_move(Direction::Up, 10, false, false), Admission::Queued);

    assert!(wait_until(
        || motor.position() == 40 && motor.state() == MotorState::Idle,
        Duration::from_secs(10)
    ));
    motor.shutdown();
}

#[test]
fn only_one_motor_emits_pulses_at_a_time() {
    let (oracle, _sim) = PinOracle::simulated();
    let shared = Arc::new(SharedMotion::new(oracle));
    let m1 = Motor::new(descriptor(PINS, "m1", false), kin(), shared.clone());
    let m2 = Motor::new(descriptor([2, 3, 4, 9, 11, 13], "m2", false), kin(), shared.clone());
    m1.initialize().unwrap();
    m2.initialize().unwrap();

    let overlap = Arc::new(AtomicBool::new(false));
    let sampling = Arc::new(AtomicBool::new(true));
    let sampler = {
        let (m1, m2) = (m1.clone(), m2.clone());
        let (overlap, sampling) = (overlap.clone(), sampling.clone());
        thread::spawn(move || {
            while sampling.load(Ordering::Relaxed) {
                if m1.is_moving() && m2.is_moving() {
                    overlap.store(true, Ordering::Relaxed);
                }
                thread::sleep(Duration::from_micros(200));
            }
        })
    };

    let t1 = {
        let m = m1.clone();
        thread::spawn(move || m.command_move(Direction::Up, 600, true, false))
    };
    let t2 = {
        let m = m2.clone();
        thread::spawn(move || m.command_move(Direction::Up, 600, true, false))
    };
    assert_eq!(t1.join().unwrap(), Admission::Done);
    assert_eq!(t2.join().unwrap(), Admission::Done);
    sampling.store(false, Ordering::Relaxed);
    sampler.join().unwrap();

    assert!(!overlap.load(Ordering::Relaxed), "both motors were moving at once");
    assert_eq!(m1.position(), 600);
    assert_eq!(m2.position(), 600);
    m1.shutdown();
    m2.shutdown();
}

#[test]
fn interlock_precedence_is_estop_then_up_then_down() {
    let (motor, sim) = spawn_motor(false);

    assert_eq!(interlock::check(&motor, true), Verdict::Ok);

    sim.drive_input(LIM_DN_PIN, Level::Low);
    assert_eq!(interlock::check(&motor, true), Verdict::LimitDown);

    sim.drive_input(LIM_UP_PIN, Level::Low);
    assert_eq!(interlock::check(&motor, true), Verdict::LimitUp);

    motor.shared().set_emergency_stop(true);
    assert_eq!(interlock::check(&motor, true), Verdict::Estop);

    assert!(Verdict::Estop > Verdict::LimitUp);
    assert!(Verdict::LimitUp > Verdict::LimitDown);
    assert!(Verdict::LimitDown > Verdict::Ok);
    motor.shutdown();
}

#[test]
fn status_snapshot_grows_after_initialization() {
    let (oracle, _sim) = PinOracle::simulated();
    let shared = Arc::new(SharedMotion::new(oracle));
    let motor = Motor::new(descriptor(PINS, "m1", false), kin(), shared);

    let status = motor.dump_state();
    assert_eq!(status.state, MotorState::Uninitialized);
    assert!(status.pos.is_none());

    motor.initialize().unwrap();
    let status = motor.dump_state();
    assert_eq!(status.state, MotorState::Disabled);
    assert_eq!(status.pos, Some(0));
    assert_eq!(status.queue, Some(0));
    assert_eq!(status.vel, Some(2000.0));
    assert!(status.thread_on);
    assert!(!status.lim_up && !status.lim_dn);

    assert!(motor.shutdown());
    assert!(!motor.dump_state().thread_on);
}
