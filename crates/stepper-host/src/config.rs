//! Configuration loading.
//!
//! The config is a JSON document with a compatibility gate and one entry
//! per motor, keyed by short name. Motors are instantiated in ascending
//! uuid order. Launcher exit codes: 3 for an incompatible document, 4 for
//! anything else wrong with it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use gpio::Level;
use motion::Kinematics;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::motor::{Motor, MotorDescriptor};
use crate::registry::MotorRegistry;
use crate::state::SharedMotion;

/// Config documents must declare compatibility with this major version.
pub const VERSION_MAJOR: u32 = 1;
pub const VERSION_MINOR: u32 = 0;

/// Default homing bound: 3 in of travel at 80 tpi and 3600 steps/rev.
const DEFAULT_AXIS_LENGTH: u32 = 3 * 80 * 3600;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config declares compatible_with = {found}, this build needs {expected}")]
    Incompatible { expected: u32, found: u32 },
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// The whole config document.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub compatible_with: u32,
    #[serde(default)]
    pub motors: HashMap<String, MotorEntry>,
}

/// One motor's section, keyed by its short name.
#[derive(Debug, Clone, Deserialize)]
pub struct MotorEntry {
    pub uuid: String,
    pub friendly_name: String,
    pub pin_direction: u8,
    pub pin_step: u8,
    pub pin_enable: u8,
    pub pin_sleep: u8,
    pub pin_lim_up: u8,
    pub pin_lim_dn: u8,
    pub lim_up_state: u8,
    pub lim_dn_state: u8,
    pub step_size: f64,
    /// Milliseconds.
    pub step_pulse_time: f64,
    /// Milliseconds.
    pub step_delay_time: f64,
    pub autoenable: bool,
    pub autodisable: bool,
    pub jerk: f64,
    pub velocity: f64,
    pub acceleration: f64,
    #[serde(default = "default_axis_length")]
    pub axis_length: u32,
}

fn default_axis_length() -> u32 {
    DEFAULT_AXIS_LENGTH
}

/// Loads and gates the config document; also returns the raw value for
/// the `/config/` dump endpoint.
pub fn load(path: &Path) -> Result<(AppConfig, serde_json::Value), ConfigError> {
    let text = std::fs::read_to_string(path)?;
    let raw: serde_json::Value = serde_json::from_str(&text)?;
    let config: AppConfig = serde_json::from_value(raw.clone())?;
    if config.compatible_with != VERSION_MAJOR {
        return Err(ConfigError::Incompatible {
            expected: VERSION_MAJOR,
            found: config.compatible_with,
        });
    }
    if config.motors.is_empty() {
        warn!("no motors found in config file");
    }
    Ok((config, raw))
}

/// Builds one motor's descriptor and kinematics from its config section.
pub fn build_motor_parts(
    short_name: &str,
    entry: &MotorEntry,
) -> anyhow::Result<(MotorDescriptor, Kinematics)> {
    let lim_up_hit = Level::from_bit(entry.lim_up_state)
        .with_context(|| format!("motor '{}': lim_up_state must be 0 or 1", short_name))?;
    let lim_dn_hit = Level::from_bit(entry.lim_dn_state)
        .with_context(|| format!("motor '{}': lim_dn_state must be 0 or 1", short_name))?;
    anyhow::ensure!(
        (0.0..1000.0).contains(&entry.step_pulse_time)
            && (0.0..1000.0).contains(&entry.step_delay_time),
        "motor '{}': step timing must be in [0, 1000) ms",
        short_name
    );

    let descriptor = MotorDescriptor {
        uuid: entry.uuid.clone(),
        short_name: short_name.to_string(),
        friendly_name: entry.friendly_name.clone(),
        pin_dir: entry.pin_direction,
        pin_step: entry.pin_step,
        pin_enable: entry.pin_enable,
        pin_sleep: entry.pin_sleep,
        pin_lim_up: entry.pin_lim_up,
        pin_lim_dn: entry.pin_lim_dn,
        lim_up_hit,
        lim_dn_hit,
        step_size: entry.step_size,
        pulse_width: Duration::from_secs_f64(entry.step_pulse_time / 1000.0),
        step_gap: Duration::from_secs_f64(entry.step_delay_time / 1000.0),
        auto_enable: entry.autoenable,
        auto_disable: entry.autodisable,
        axis_length: entry.axis_length,
    };
    descriptor
        .validate()
        .with_context(|| format!("motor '{}'", short_name))?;

    let kinematics = Kinematics::new(entry.jerk, entry.velocity, entry.acceleration)
        .map_err(|e| anyhow::anyhow!("motor '{}': {}", short_name, e))?;
    Ok((descriptor, kinematics))
}

/// Instantiates and registers every configured motor, in ascending uuid
/// order.
pub fn build_registry(
    config: &AppConfig,
    shared: &Arc<SharedMotion>,
) -> anyhow::Result<MotorRegistry> {
    let mut registry = MotorRegistry::new();
    let mut entries: Vec<(&String, &MotorEntry)> = config.motors.iter().collect();
    entries.sort_by(|a, b| a.1.uuid.cmp(&b.1.uuid));

    for (short_name, entry) in entries {
        let (descriptor, kinematics) = build_motor_parts(short_name, entry)?;
        let motor = Motor::new(descriptor, kinematics, shared.clone());
        registry.register(motor)?;
    }
    Ok(registry)
}
