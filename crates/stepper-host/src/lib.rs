//! # Stepper Host
//!
//! Host process for a rack of bipolar stepper motors hung off a
//! single-board computer's GPIO header. Each motor is an independently
//! commandable axis with safety interlocks, position tracking, homing and
//! trapezoidal motion profiles; commands arrive over a small HTTP surface.
//!
//! ## Concurrency
//!
//! Every motor owns a dedicated OS thread that dequeues commands and emits
//! step pulses under busy-wait timing — an async runtime cannot hold
//! microsecond-scale pacing, so only the HTTP surface runs on the actix
//! runtime. A process-wide fair mutex (the motion arbiter) guarantees that
//! at most one motor is stepping at any instant.

pub mod api;
pub mod config;
mod control;
pub mod interlock;
pub mod motor;
pub mod registry;
pub mod state;
pub mod sync;
