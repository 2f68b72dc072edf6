//! Process-wide motor registry.
//!
//! Keeps motors in insertion order and enforces that `uuid`, `short_name`
//! and `friendly_name` are each unique across the set, and that no pin is
//! assigned twice. Rejection leaves the registry untouched.

use std::sync::Arc;

use gpio::Level;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::motor::Motor;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("motor '{uuid}' repeats a name attribute of motor '{other}'")]
    DuplicateName { uuid: String, other: String },
    #[error("pin {pin} of motor '{uuid}' is already assigned to motor '{other}'")]
    PinInUse { pin: u8, uuid: String, other: String },
}

#[derive(Default)]
pub struct MotorRegistry {
    motors: Vec<Arc<Motor>>,
}

impl MotorRegistry {
    pub fn new() -> Self {
        Self { motors: Vec::new() }
    }

    /// Adds a motor. Motors are disabled on creation, so registration can
    /// happen before `initialize`.
    pub fn register(&mut self, motor: Arc<Motor>) -> Result<(), RegistryError> {
        let nd = motor.descriptor();
        for prev in &self.motors {
            let pd = prev.descriptor();
            if pd.uuid == nd.uuid
                || pd.short_name == nd.short_name
                || pd.friendly_name == nd.friendly_name
            {
                return Err(RegistryError::DuplicateName {
                    uuid: nd.uuid.clone(),
                    other: pd.uuid.clone(),
                });
            }
            for pin in nd.pins() {
                if pd.pins().contains(&pin) {
                    return Err(RegistryError::PinInUse {
                        pin,
                        uuid: nd.uuid.clone(),
                        other: pd.uuid.clone(),
                    });
                }
            }
        }
        debug!(uuid = %nd.uuid, fname = %nd.friendly_name, "added motor to the control list");
        self.motors.push(motor);
        Ok(())
    }

    pub fn get(&self, uuid: &str) -> Option<&Arc<Motor>> {
        self.motors.iter().find(|m| m.uuid() == uuid)
    }

    /// Motors in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Motor>> {
        self.motors.iter()
    }

    pub fn len(&self) -> usize {
        self.motors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.motors.is_empty()
    }

    /// Claims pins and starts control threads for every motor.
    pub fn initialize_all(&self) -> anyhow::Result<()> {
        for motor in &self.motors {
            motor.initialize()?;
        }
        Ok(())
    }

    /// Stops and joins every control thread, then forces all driver
    /// enable pins inactive regardless of prior state.
    pub fn shutdown_all(&self) {
        info!("shutting down motors");
        for motor in &self.motors {
            if !motor.shutdown() {
                warn!(uuid = %motor.uuid(), "continuing shutdown despite stuck control thread");
            }
        }
        for motor in &self.motors {
            let d = motor.descriptor();
            let _ = motor
                .shared()
                .gpio
                .configure_outputs(&[d.pin_enable], Some(Level::High));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::MotorDescriptor;
    use crate::state::SharedMotion;
    use gpio::PinOracle;
    use motion::Kinematics;
    use std::time::Duration;

    fn descriptor(uuid: &str, name: &str, fname: &str, pins: [u8; 6]) -> MotorDescriptor {
        MotorDescriptor {
            uuid: uuid.into(),
            short_name: name.into(),
            friendly_name: fname.into(),
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
            auto_enable: false,
            auto_disable: false,
            axis_length: 864_000,
        }
    }

    fn motor(uuid: &str, name: &str, fname: &str, pins: [u8; 6]) -> Arc<Motor> {
        let (oracle, _) = PinOracle::simulated();
        let shared = Arc::new(SharedMotion::new(oracle));
        let kin = Kinematics { jerk: 100.0, velocity: 2000.0, acceleration: 1000.0 };
        Motor::new(descriptor(uuid, name, fname, pins), kin, shared)
    }

    #[test]
    fn registration_preserves_order() {
        let mut registry = MotorRegistry::new();
        registry.register(motor("m1", "x", "axis x", [17, 27, 22, 10, 5, 6])).unwrap();
        registry.register(motor("m2", "y", "axis y", [2, 3, 4, 9, 11, 13])).unwrap();

        let order: Vec<&str> = registry.iter().map(|m| m.uuid()).collect();
        assert_eq!(order, ["m1", "m2"]);
        assert!(registry.get("m2").is_some());
        assert!(registry.get("m3").is_none());
    }

    #[test]
    fn duplicate_names_are_rejected_without_side_effect() {
        let mut registry = MotorRegistry::new();
        registry.register(motor("m1", "x", "axis x", [17, 27, 22, 10, 5, 6])).unwrap();

        // Same uuid
        let err = registry
            .register(motor("m1", "y", "axis y", [2, 3, 4, 9, 11, 13]))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName { .. }));

        // Same short name
        assert!(registry
            .register(motor("m2", "x", "axis y", [2, 3, 4, 9, 11, 13]))
            .is_err());

        // Same friendly name
        assert!(registry
            .register(motor("m2", "y", "axis x", [2, 3, 4, 9, 11, 13]))
            .is_err());

        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn overlapping_pins_are_rejected() {
        let mut registry = MotorRegistry::new();
        registry.register(motor("m1", "x", "axis x", [17, 27, 22, 10, 5, 6])).unwrap();

        let err = registry
            .register(motor("m2", "y", "axis y", [2, 3, 4, 9, 11, 17]))
            .unwrap_err();
        assert!(matches!(err, RegistryError::PinInUse { pin: 17, .. }));
        assert_eq!(registry.len(), 1);
    }
}
