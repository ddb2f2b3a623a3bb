//! Common types and traits for hardware-facing components.

use chrono::NaiveDateTime;
use thiserror::Error;

/// Instantaneous readings from the solar/battery monitoring hardware.
///
/// # Fields
/// * `solar_power_w` - Raw solar power reading (W, before scaling)
/// * `battery_voltage_v` - Battery bus voltage (V)
/// * `battery_current_a` - Battery current (A)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorSnapshot {
    pub solar_power_w: f64,
    pub battery_voltage_v: f64,
    pub battery_current_a: f64,
}

/// Sensor read failures.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("sensor unavailable: {0}")]
    Unavailable(String),
    #[error("sensor returned an invalid value: {0}")]
    InvalidValue(String),
}

/// Trait for anything that can report a [`SensorSnapshot`] on demand.
///
/// Real hardware drivers and the mock monitor share this interface so the
/// orchestrator can run unchanged on and off the device.
pub trait SensorSource {
    /// Reads a snapshot for the simulated instant `at`.
    ///
    /// # Errors
    ///
    /// Returns a `SensorError` if the hardware cannot be read. Callers
    /// degrade to [`SensorSnapshot::default`] in that case.
    fn read(&mut self, at: NaiveDateTime) -> Result<SensorSnapshot, SensorError>;

    /// Returns a human-readable type name for the sensor.
    fn sensor_type(&self) -> &'static str;
}
