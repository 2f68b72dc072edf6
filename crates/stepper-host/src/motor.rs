//! One stepper motor axis: immutable descriptor, live state, and the
//! public command-admission API consumed by the HTTP surface.
//!
//! All admission methods validate and enqueue; actual motion happens on
//! the motor's own control thread (see `control`). Status fields are plain
//! atomics written only by that thread and read relaxed by everyone else.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Context;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use gpio::{Level, Pull};
use motion::Kinematics;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::control;
use crate::interlock;
use crate::state::{Direction, MotorState, MotorStatus, SharedMotion};
use crate::sync::Event;

/// Upper bound (exclusive) on the step count of a single move command.
pub const MAX_MOVE_STEPS: u32 = 100_000;

/// Capacity of the per-motor command queue.
pub const COMMAND_QUEUE_DEPTH: usize = 100;

/// Grace period for the control thread to exit on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Immutable identity, wiring and policy of one motor.
#[derive(Debug, Clone)]
pub struct MotorDescriptor {
    pub uuid: String,
    pub short_name: String,
    pub friendly_name: String,
    pub pin_dir: u8,
    pub pin_step: u8,
    pub pin_enable: u8,
    pub pin_sleep: u8,
    pub pin_lim_up: u8,
    pub pin_lim_dn: u8,
    /// Level at which the respective limit switch reads as engaged.
    pub lim_up_hit: Level,
    pub lim_dn_hit: Level,
    /// Step size factor, 1/microsteps.
    pub step_size: f64,
    /// Configured step-pulse hold time. Carried for the record; the
    /// executor emits zero-width pulses and paces purely by profile delay.
    pub pulse_width: Duration,
    pub step_gap: Duration,
    pub auto_enable: bool,
    pub auto_disable: bool,
    /// Homing phase-1 step bound; at least the physical axis length.
    pub axis_length: u32,
}

impl MotorDescriptor {
    /// All six control pins, in a fixed order.
    pub fn pins(&self) -> [u8; 6] {
        [
            self.pin_dir,
            self.pin_step,
            self.pin_enable,
            self.pin_sleep,
            self.pin_lim_up,
            self.pin_lim_dn,
        ]
    }

    /// Sanity-checks the wiring and timing figures.
    pub fn validate(&self) -> anyhow::Result<()> {
        for pin in self.pins() {
            anyhow::ensure!(
                gpio::BCM_PINS.contains(&pin),
                "pin {} is not in the platform pin set",
                pin
            );
        }
        let mut pins = self.pins();
        pins.sort_unstable();
        anyhow::ensure!(
            pins.windows(2).all(|w| w[0] != w[1]),
            "control pins must be mutually distinct"
        );
        anyhow::ensure!(
            self.pulse_width < Duration::from_secs(1) && self.step_gap < Duration::from_secs(1),
            "step timing must be below one second"
        );
        anyhow::ensure!(self.step_size > 0.0, "step size must be positive");
        anyhow::ensure!(self.axis_length > 0, "axis length must be positive");
        Ok(())
    }
}

/// Commands dequeued by the control thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Move { dir: Direction, steps: u32, force: bool },
    Home { dir: Direction },
    Enable { force: bool },
    Disable,
}

/// Admission verdict returned to the caller as a plain string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Blocking command finished cleanly.
    Done,
    /// Blocking command finished with an error, or could not block.
    Failed,
    /// Command accepted into the queue.
    Queued,
    /// Queue full.
    Fail,
    /// Refused at admission; no state change.
    Rejected,
}

impl Admission {
    pub fn as_str(self) -> &'static str {
        match self {
            Admission::Done => "Done",
            Admission::Failed => "Failed",
            Admission::Queued => "Queued",
            Admission::Fail => "Fail",
            Admission::Rejected => "Rejected",
        }
    }
}

impl std::fmt::Display for Admission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One motor axis. Constructed from a validated descriptor, registered,
/// then `initialize`d, which claims the pins and starts the control
/// thread.
pub struct Motor {
    descriptor: MotorDescriptor,
    shared: Arc<SharedMotion>,
    kinematics: Mutex<Kinematics>,

    state: AtomicU8,
    direction: AtomicU8,
    position: AtomicI64,
    homed: AtomicBool,
    error: AtomicI32,
    thread_on: AtomicBool,
    stop_event: AtomicBool,
    done_event: Event,

    cmd_tx: Sender<Command>,
    cmd_rx: Receiver<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Motor {
    pub fn new(
        descriptor: MotorDescriptor,
        kinematics: Kinematics,
        shared: Arc<SharedMotion>,
    ) -> Arc<Self> {
        let (cmd_tx, cmd_rx) = bounded(COMMAND_QUEUE_DEPTH);
        info!(
            name = %descriptor.short_name,
            uuid = %descriptor.uuid,
            fname = %descriptor.friendly_name,
            pins = ?descriptor.pins(),
            ?kinematics,
            "new stepper"
        );
        Arc::new(Self {
            descriptor,
            shared,
            kinematics: Mutex::new(kinematics),
            state: AtomicU8::new(MotorState::Uninitialized as u8),
            direction: AtomicU8::new(Direction::Up as u8),
            position: AtomicI64::new(0),
            homed: AtomicBool::new(false),
            error: AtomicI32::new(0),
            thread_on: AtomicBool::new(false),
            stop_event: AtomicBool::new(false),
            done_event: Event::new(),
            cmd_tx,
            cmd_rx,
            worker: Mutex::new(None),
        })
    }

    // --- Identity & snapshots -------------------------------------------

    pub fn descriptor(&self) -> &MotorDescriptor {
        &self.descriptor
    }

    pub fn uuid(&self) -> &str {
        &self.descriptor.uuid
    }

    pub fn shared(&self) -> &SharedMotion {
        &self.shared
    }

    pub fn state(&self) -> MotorState {
        MotorState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub fn is_moving(&self) -> bool {
        self.state().is_moving()
    }

    pub fn position(&self) -> i64 {
        self.position.load(Ordering::Relaxed)
    }

    pub fn direction(&self) -> Direction {
        Direction::from_bit(self.direction.load(Ordering::Relaxed)).unwrap_or(Direction::Up)
    }

    pub fn homed(&self) -> bool {
        self.homed.load(Ordering::Relaxed)
    }

    pub fn error(&self) -> i32 {
        self.error.load(Ordering::Relaxed)
    }

    pub fn kinematics(&self) -> Kinematics {
        *self.kinematics.lock()
    }

    /// Uncoordinated field-by-field snapshot. Individual fields are
    /// word-sized so each read is consistent on its own; the composite may
    /// be torn, which status consumers accept.
    pub fn dump_state(&self) -> MotorStatus {
        let state = self.state();
        let mut status = MotorStatus {
            uuid: self.descriptor.uuid.clone(),
            name: self.descriptor.short_name.clone(),
            fname: self.descriptor.friendly_name.clone(),
            state,
            thread_on: self.thread_on.load(Ordering::Relaxed),
            lim_up: interlock::limit_reached(self, Direction::Up),
            lim_dn: interlock::limit_reached(self, Direction::Down),
            pos: None,
            dir: None,
            queue: None,
            homed: None,
            error: None,
            jerk: None,
            vel: None,
            acc: None,
        };
        if !matches!(state, MotorState::Uninitialized | MotorState::Unknown) {
            let kin = self.kinematics();
            status.pos = Some(self.position());
            status.dir = Some(self.direction().bit());
            status.queue = Some(self.cmd_rx.len());
            status.homed = Some(self.homed());
            status.error = Some(self.error());
            status.jerk = Some(kin.jerk);
            status.vel = Some(kin.velocity);
            status.acc = Some(kin.acceleration);
        }
        status
    }

    // --- Lifecycle ------------------------------------------------------

    /// Claims the motor's pins, samples the driver's prior state, and
    /// starts the control thread. The motor comes up DISABLED.
    pub fn initialize(self: &Arc<Self>) -> anyhow::Result<()> {
        let d = &self.descriptor;
        info!(motor = %d.short_name, "starting initialization");
        let gpio = &self.shared.gpio;

        // Step and direction go low immediately.
        gpio.configure_outputs(&[d.pin_dir, d.pin_step], Some(Level::Low))
            .context("claiming step/dir pins")?;
        // Sample the driver control pins before claiming them; the
        // hardware may carry state from a previous run.
        gpio.configure_inputs(&[d.pin_enable, d.pin_sleep], Pull::Off)
            .context("sampling enable/sleep pins")?;
        let direction = match gpio.read(d.pin_dir).context("reading direction pin")? {
            Level::High => Direction::Up,
            Level::Low => Direction::Down,
        };
        let enabled = gpio.read(d.pin_enable).context("reading enable pin")? == Level::Low;
        let awake = gpio.read(d.pin_sleep).context("reading sleep pin")? == Level::Low;
        if !awake || !enabled {
            warn!(motor = %d.short_name, enabled, awake, "motor driver is asleep or disabled");
        }
        self.direction.store(direction as u8, Ordering::Relaxed);
        self.position.store(0, Ordering::Relaxed);

        // Now drive the control pins to their inactive levels and put the
        // limit inputs on their pull-ups.
        gpio.configure_outputs(&[d.pin_enable, d.pin_sleep], Some(Level::High))
            .context("claiming enable/sleep pins")?;
        gpio.configure_inputs(&[d.pin_lim_up, d.pin_lim_dn], Pull::Up)
            .context("claiming limit pins")?;
        info!(
            motor = %d.short_name,
            dir = direction.bit(),
            enabled,
            awake,
            "motor initialized"
        );

        self.thread_on.store(true, Ordering::SeqCst);
        let motor = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name(format!("motor-{}", d.uuid))
            .spawn(move || control::run(motor))
            .context("spawning control thread")?;
        *self.worker.lock() = Some(handle);

        self.set_state(MotorState::Disabled);
        Ok(())
    }

    /// Stops any motion, asks the control thread to exit, and waits up to
    /// the grace period. Returns false if the thread failed to stop.
    pub fn shutdown(&self) -> bool {
        info!(motor = %self.descriptor.short_name, "shutdown initiated");
        if self.is_moving() {
            self.stop_event.store(true, Ordering::SeqCst);
        }
        self.thread_on.store(false, Ordering::SeqCst);

        let handle = self.worker.lock().take();
        let Some(handle) = handle else {
            return true;
        };
        let deadline = Instant::now() + SHUTDOWN_GRACE;
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        if handle.is_finished() {
            let _ = handle.join();
            true
        } else {
            error!(motor = %self.descriptor.short_name, "control thread did not shut down in time");
            false
        }
    }

    // --- Command admission ----------------------------------------------

    /// Validates and enqueues a move.
    ///
    /// Blocking commands may not be queued behind other work; forced
    /// commands flush the queue first. With `block`, waits for the control
    /// thread's completion signal and reports per the resulting error.
    pub fn command_move(&self, dir: Direction, steps: u32, block: bool, force: bool) -> Admission {
        if steps >= MAX_MOVE_STEPS {
            warn!(steps, "move step count out of range");
            return Admission::Rejected;
        }
        let busy = self.is_moving() || !self.cmd_rx.is_empty();
        if busy && block {
            warn!("blocking commands cannot be queued, ignoring");
            return Admission::Failed;
        }
        if busy && force {
            warn!(queued = self.cmd_rx.len(), "forced command flushes the queue");
            self.drain_queue();
        }

        let cmd = Command::Move { dir, steps, force };
        if self.is_moving() {
            debug!("another move running - command will be queued");
            return self.enqueue(cmd);
        }
        if block {
            self.done_event.clear();
            if self.enqueue(cmd) == Admission::Fail {
                return Admission::Fail;
            }
            debug!("awaiting move completion");
            self.done_event.wait();
            if self.error() != 0 {
                Admission::Failed
            } else {
                Admission::Done
            }
        } else {
            self.enqueue(cmd)
        }
    }

    /// Runs the homing sequence, blocking until it finishes. Only admitted
    /// from IDLE with an empty queue.
    pub fn home(&self, dir: Direction) -> Admission {
        if !self.cmd_rx.is_empty() {
            warn!("attempt to home with queued commands");
            return Admission::Rejected;
        }
        if self.state() != MotorState::Idle {
            warn!(state = ?self.state(), "attempt to home outside IDLE");
            return Admission::Rejected;
        }
        self.done_event.clear();
        if self.enqueue(Command::Home { dir }) == Admission::Fail {
            return Admission::Fail;
        }
        self.done_event.wait();
        if self.error() != 0 {
            Admission::Failed
        } else {
            Admission::Done
        }
    }

    /// Queues driver enablement. `force` additionally clears a latched
    /// error code and overrides active interlocks.
    pub fn enable(&self, force: bool) -> Admission {
        if self.state() == MotorState::Idle {
            warn!("attempt to enable an already idle motor");
            return Admission::Rejected;
        }
        if !self.cmd_rx.is_empty() {
            warn!("attempt to enable with queued commands");
            return Admission::Rejected;
        }
        self.enqueue(Command::Enable { force })
    }

    /// Queues driver disablement; only valid from IDLE.
    pub fn disable(&self) -> Admission {
        if self.state() != MotorState::Idle {
            warn!(state = ?self.state(), "attempt to disable a non-idle motor");
            return Admission::Rejected;
        }
        if !self.cmd_rx.is_empty() {
            warn!("attempt to disable with queued commands");
            return Admission::Rejected;
        }
        self.enqueue(Command::Disable)
    }

    /// Signals the executor to stop the current motion. The flag is
    /// checked on every spin of the busy-wait, so the stop takes effect
    /// within one inter-step delay.
    pub fn stop(&self) -> bool {
        if self.is_moving() {
            self.stop_event.store(true, Ordering::SeqCst);
            true
        } else {
            warn!("attempt to stop a non-moving motor");
            false
        }
    }

    /// Replaces the kinematic limits; admitted only while the motor
    /// cannot be moving under the old ones.
    pub fn update_kinematics(&self, kin: Kinematics) -> bool {
        if kin.validate().is_err() {
            warn!(?kin, "rejected kinematics update");
            return false;
        }
        match self.state() {
            MotorState::Idle | MotorState::Disabled => {
                info!(?kin, "motion parameters changed");
                *self.kinematics.lock() = kin;
                true
            }
            state => {
                warn!(?state, "kinematics update refused in this state");
                false
            }
        }
    }

    fn enqueue(&self, cmd: Command) -> Admission {
        match self.cmd_tx.try_send(cmd) {
            Ok(()) => Admission::Queued,
            Err(_) => {
                warn!(?cmd, "command queue full");
                Admission::Fail
            }
        }
    }

    // --- Control-thread interface ---------------------------------------

    pub(crate) fn recv_command(&self, timeout: Duration) -> Result<Command, RecvTimeoutError> {
        self.cmd_rx.recv_timeout(timeout)
    }

    pub(crate) fn thread_on(&self) -> bool {
        self.thread_on.load(Ordering::SeqCst)
    }

    pub(crate) fn set_state(&self, state: MotorState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    pub(crate) fn set_direction_value(&self, dir: Direction) {
        self.direction.store(dir as u8, Ordering::Relaxed);
    }

    pub(crate) fn add_position(&self, delta: i64) {
        self.position.fetch_add(delta, Ordering::Relaxed);
    }

    pub(crate) fn set_position(&self, position: i64) {
        self.position.store(position, Ordering::Relaxed);
    }

    pub(crate) fn set_homed(&self, homed: bool) {
        self.homed.store(homed, Ordering::Relaxed);
    }

    pub(crate) fn set_error(&self, code: i32) {
        self.error.store(code, Ordering::Relaxed);
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop_event.load(Ordering::Relaxed)
    }

    pub(crate) fn clear_stop(&self) {
        self.stop_event.store(false, Ordering::SeqCst);
    }

    pub(crate) fn drain_queue(&self) {
        while self.cmd_rx.try_recv().is_ok() {}
    }

    pub(crate) fn done_event(&self) -> &Event {
        &self.done_event
    }
}
