//! # Motion Crate
//!
//! A deterministic step-delay profile generator for stepper motor axes.
//!
//! Given a step count and kinematic limits, [`DelayProfile`] lazily yields
//! the inter-step delay (in seconds) for every step of a symmetric
//! trapezoidal velocity profile: a Taylor-series ramp up to cruise speed,
//! a constant-delay cruise, and a mirrored ramp down to rest. Short moves
//! that cannot reach cruise speed degenerate into a triangle profile.
//!
//! The planner is pure — no clocks, no I/O — so its output fully
//! determines motion timing and is directly testable.

pub mod error;
pub mod profile;

// Re-export core types for easier access
pub use error::ProfileError;
pub use profile::{plan_to_vec, DelayProfile, Kinematics};
