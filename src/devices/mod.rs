//! Hardware-facing components of a prosumer household.

/// Household battery storage model.
pub mod battery;
/// Solar monitor implementations.
pub mod sensor;
pub mod types;

// Re-export the main types for convenience
pub use battery::{Battery, BatteryError};
pub use sensor::{FixedSensor, MockSensor};
pub use types::{SensorError, SensorSnapshot, SensorSource};
