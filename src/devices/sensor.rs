use chrono::{NaiveDateTime, Timelike};
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::devices::types::{SensorError, SensorSnapshot, SensorSource};

/// Nominal voltage reported by the mock battery bus.
const MOCK_BATTERY_VOLTAGE_V: f64 = 3.7;

/// Raw panel power at peak output (W) before scaling.
const MOCK_PEAK_POWER_W: f64 = 5.0;

/// Simulated solar monitor producing a bell-shaped daily profile.
///
/// Output follows `exp(-((h - 12) / 6)^2)` between 06:00 and 18:00 of the
/// simulated timestamp and is zero at night. A seeded `StdRng` applies up to
/// ±`variation` multiplicative noise so runs are reproducible.
#[derive(Debug, Clone)]
pub struct MockSensor {
    /// Relative noise amplitude (0.1 = ±10%).
    pub variation: f64,

    rng: StdRng,
}

impl MockSensor {
    /// Creates a mock sensor with ±10% noise.
    ///
    /// # Arguments
    ///
    /// * `seed` - Random seed for reproducible noise generation
    pub fn new(seed: u64) -> Self {
        Self::with_variation(seed, 0.1)
    }

    /// Creates a mock sensor with a custom noise amplitude.
    pub fn with_variation(seed: u64, variation: f64) -> Self {
        Self {
            variation: variation.clamp(0.0, 1.0),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Noise-free normalised output (0.0 to 1.0) at hour-of-day `hour`.
    pub fn daylight_output(hour: f64) -> f64 {
        if !(6.0..=18.0).contains(&hour) {
            return 0.0;
        }
        let x = (hour - 12.0) / 6.0;
        (-x * x).exp()
    }
}

impl SensorSource for MockSensor {
    fn read(&mut self, at: NaiveDateTime) -> Result<SensorSnapshot, SensorError> {
        let hour = f64::from(at.hour()) + f64::from(at.minute()) / 60.0;
        let noise = 1.0 + (self.rng.random::<f64>() - 0.5) * 2.0 * self.variation;
        let output = Self::daylight_output(hour) * noise;

        Ok(SensorSnapshot {
            solar_power_w: output * MOCK_PEAK_POWER_W,
            battery_voltage_v: MOCK_BATTERY_VOLTAGE_V,
            battery_current_a: output * 0.3,
        })
    }

    fn sensor_type(&self) -> &'static str {
        "MockSolarMonitor"
    }
}

/// Sensor returning the same snapshot on every read.
///
/// Used when no monitor is attached and in tests that need exact generation.
#[derive(Debug, Clone, Default)]
pub struct FixedSensor {
    snapshot: SensorSnapshot,
}

impl FixedSensor {
    pub fn new(snapshot: SensorSnapshot) -> Self {
        Self { snapshot }
    }
}

impl SensorSource for FixedSensor {
    fn read(&mut self, _at: NaiveDateTime) -> Result<SensorSnapshot, SensorError> {
        let s = self.snapshot;
        if !s.solar_power_w.is_finite() || s.solar_power_w < 0.0 {
            return Err(SensorError::InvalidValue(format!(
                "solar power {} W",
                s.solar_power_w
            )));
        }
        Ok(s)
    }

    fn sensor_type(&self) -> &'static str {
        "FixedSensor"
    }
}
