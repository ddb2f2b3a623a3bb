//! TOML-based node configuration and preset definitions.

use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::devices::{Battery, BatteryError};
use crate::io::demand::{DataFilter, Timescale};
use crate::pricing::GridTariff;
use crate::sim::types::{Role, SolarScaling};

/// Top-level node configuration parsed from TOML.
///
/// All fields have defaults describing a standalone prosumer. Load from TOML
/// with [`NodeConfig::from_toml_file`] or start from a preset with
/// [`NodeConfig::from_preset`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// Identity and networking of this node.
    #[serde(default)]
    pub node: NodeSection,
    /// Demand data and replay speed.
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Grid tariff.
    #[serde(default)]
    pub trading: TradingConfig,
    /// Battery parameters (prosumer only).
    #[serde(default)]
    pub battery: BatteryConfig,
    /// Solar sensor parameters (prosumer only).
    #[serde(default)]
    pub sensor: SensorConfig,
    /// Status display.
    #[serde(default)]
    pub display: DisplayConfig,
}

/// Identity and networking of this node.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeSection {
    /// `"prosumer"` or `"consumer"`.
    pub role: Role,
    /// Identifier sent to the counterpart in the `x-peer-id` header.
    pub node_id: String,
    /// Address this node's sync service binds to.
    pub listen: String,
    /// Base URL of the counterpart's sync service; empty runs standalone.
    pub peer_url: String,
    /// Base URL to read counterpart status from; empty means this node's own
    /// sync service on loopback.
    pub status_url: String,
    /// Timeout for every peer request (ms).
    pub request_timeout_ms: u64,
    /// How long to wait for the counterpart's END after finishing (s).
    pub wait_for_peer_secs: u64,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            role: Role::Prosumer,
            node_id: "prosumer".to_string(),
            listen: "0.0.0.0:5000".to_string(),
            peer_url: String::new(),
            status_url: String::new(),
            request_timeout_ms: 2000,
            wait_for_peer_secs: 30,
        }
    }
}

/// Demand data and replay speed.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Path to the half-hourly demand CSV.
    pub data_file: String,
    /// Household identifier (`LCLid`) to replay.
    pub household: String,
    /// First day to replay (`YYYY-MM-DD`).
    pub start_date: String,
    /// Replay window: `d`, `w`, `m` or `y`.
    pub timescale: String,
    /// Simulated seconds per wall-clock second.
    pub speedup: f64,
    /// Length of one timestep (minutes).
    pub interval_minutes: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            data_file: "data/halfhourly.csv".to_string(),
            household: "MAC000002".to_string(),
            start_date: "2013-01-01".to_string(),
            timescale: "d".to_string(),
            speedup: 300.0,
            interval_minutes: 30,
        }
    }
}

/// Grid tariff (currency/kWh).
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TradingConfig {
    pub grid_buy_price: f64,
    pub grid_sell_price: f64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        let tariff = GridTariff::default();
        Self {
            grid_buy_price: tariff.buy,
            grid_sell_price: tariff.sell,
        }
    }
}

/// Battery storage parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatteryConfig {
    /// Total energy capacity (kWh).
    pub capacity_kwh: f64,
    /// Initial state of charge (0.0–1.0).
    pub initial_soc: f64,
    /// Usable fraction of capacity (0.0–1.0).
    pub depth_of_discharge: f64,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            capacity_kwh: 5.0,
            initial_soc: 0.5,
            depth_of_discharge: 0.8,
        }
    }
}

/// Solar sensor parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SensorConfig {
    /// Multiplier from panel-scale to household-scale power.
    pub scale_factor: f64,
    /// Seed for the mock sensor's noise.
    pub seed: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            scale_factor: 8000.0,
            seed: 42,
        }
    }
}

/// Status display parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DisplayConfig {
    /// Updates buffered before new ones are dropped.
    pub queue_capacity: usize,
    /// Characters per display line.
    pub columns: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 32,
            columns: 16,
        }
    }
}

/// Configuration error with field path and constraint description.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("config error: {field}: {message}")]
pub struct ConfigError {
    /// Dotted field path (e.g., `"battery.capacity_kwh"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl ConfigError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl NodeConfig {
    /// Prosumer half of a local pair (consumer expected on port 5001).
    pub fn prosumer() -> Self {
        Self {
            node: NodeSection {
                peer_url: "http://127.0.0.1:5001".to_string(),
                ..NodeSection::default()
            },
            ..Self::default()
        }
    }

    /// Consumer half of a local pair (prosumer expected on port 5000).
    pub fn consumer() -> Self {
        Self {
            node: NodeSection {
                role: Role::Consumer,
                node_id: "consumer".to_string(),
                listen: "0.0.0.0:5001".to_string(),
                peer_url: "http://127.0.0.1:5000".to_string(),
                ..NodeSection::default()
            },
            simulation: SimulationConfig {
                household: "MAC000003".to_string(),
                ..SimulationConfig::default()
            },
            ..Self::default()
        }
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["prosumer", "consumer"];

    /// Loads a configuration from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "prosumer" => Ok(Self::prosumer()),
            "consumer" => Ok(Self::consumer()),
            _ => Err(ConfigError::new(
                "preset",
                format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            )),
        }
    }

    /// Parses a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::new("config", format!("cannot read \"{}\": {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::new("toml", e.to_string()))
    }

    /// # Errors
    ///
    /// Returns a `ConfigError` if `node.listen` is not a socket address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.node.listen.parse().map_err(|_| {
            ConfigError::new(
                "node.listen",
                format!("\"{}\" is not a socket address", self.node.listen),
            )
        })
    }

    /// Counterpart URL, or `None` when running standalone.
    pub fn peer_url(&self) -> Option<&str> {
        Some(self.node.peer_url.trim()).filter(|u| !u.is_empty())
    }

    /// Where counterpart status is read from, given the bound address.
    pub fn status_url(&self, bound: SocketAddr) -> String {
        match self.node.status_url.trim() {
            "" => format!("http://127.0.0.1:{}", bound.port()),
            url => url.to_string(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.node.request_timeout_ms)
    }

    pub fn wait_for_peer(&self) -> Duration {
        Duration::from_secs(self.node.wait_for_peer_secs)
    }

    pub fn tariff(&self) -> GridTariff {
        GridTariff::new(self.trading.grid_buy_price, self.trading.grid_sell_price)
    }

    pub fn solar_scaling(&self) -> SolarScaling {
        SolarScaling {
            scale_factor: self.sensor.scale_factor,
            interval_hours: f64::from(self.simulation.interval_minutes) / 60.0,
        }
    }

    /// # Errors
    ///
    /// Returns a `ConfigError` if the timescale or start date is invalid.
    pub fn data_filter(&self) -> Result<DataFilter, ConfigError> {
        let sim = &self.simulation;
        let timescale: Timescale = sim
            .timescale
            .parse()
            .map_err(|e: crate::io::demand::DataError| ConfigError::new("simulation.timescale", e.to_string()))?;
        DataFilter::new(&sim.household, &sim.start_date, timescale)
            .map_err(|e| ConfigError::new("simulation.start_date", e.to_string()))
    }

    /// # Errors
    ///
    /// Returns a `BatteryError` if the battery parameters are invalid.
    pub fn build_battery(&self) -> Result<Battery, BatteryError> {
        let b = &self.battery;
        Battery::new(b.capacity_kwh, b.initial_soc, b.depth_of_discharge)
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        let n = &self.node;
        if n.node_id.trim().is_empty() || !n.node_id.bytes().all(|b| b.is_ascii_graphic()) {
            errors.push(ConfigError::new(
                "node.node_id",
                "must be non-empty printable ASCII without spaces",
            ));
        }
        if let Err(e) = self.listen_addr() {
            errors.push(e);
        }
        for (field, url) in [("node.peer_url", &n.peer_url), ("node.status_url", &n.status_url)] {
            let url = url.trim();
            if !url.is_empty() && !(url.starts_with("http://") || url.starts_with("https://")) {
                errors.push(ConfigError::new(
                    field,
                    format!("must be an http(s) URL, got \"{url}\""),
                ));
            }
        }
        if !(1..=5000).contains(&n.request_timeout_ms) {
            errors.push(ConfigError::new(
                "node.request_timeout_ms",
                "must be in [1, 5000]",
            ));
        }

        let s = &self.simulation;
        if s.data_file.trim().is_empty() {
            errors.push(ConfigError::new("simulation.data_file", "must not be empty"));
        }
        if s.household.trim().is_empty() {
            errors.push(ConfigError::new("simulation.household", "must not be empty"));
        }
        if let Err(e) = self.data_filter() {
            errors.push(e);
        }
        if !(s.speedup.is_finite() && s.speedup > 0.0) {
            errors.push(ConfigError::new("simulation.speedup", "must be > 0"));
        }
        if s.interval_minutes == 0 {
            errors.push(ConfigError::new("simulation.interval_minutes", "must be > 0"));
        }

        let t = &self.trading;
        if !(t.grid_buy_price.is_finite() && t.grid_buy_price > 0.0) {
            errors.push(ConfigError::new("trading.grid_buy_price", "must be > 0"));
        }
        if !(t.grid_sell_price.is_finite() && t.grid_sell_price > 0.0) {
            errors.push(ConfigError::new("trading.grid_sell_price", "must be > 0"));
        }
        if t.grid_sell_price > t.grid_buy_price {
            errors.push(ConfigError::new(
                "trading.grid_sell_price",
                "must be <= trading.grid_buy_price",
            ));
        }

        if self.node.role == Role::Prosumer {
            if let Err(e) = self.build_battery() {
                let field = match e {
                    BatteryError::InvalidCapacity(_) => "battery.capacity_kwh",
                    BatteryError::InvalidSoc(_) => "battery.initial_soc",
                    _ => "battery.depth_of_discharge",
                };
                errors.push(ConfigError::new(field, e.to_string()));
            }
            let sc = self.sensor.scale_factor;
            if !(sc.is_finite() && sc >= 0.0) {
                errors.push(ConfigError::new("sensor.scale_factor", "must be >= 0"));
            }
        }

        let d = &self.display;
        if d.queue_capacity == 0 {
            errors.push(ConfigError::new("display.queue_capacity", "must be > 0"));
        }
        if d.columns == 0 {
            errors.push(ConfigError::new("display.columns", "must be > 0"));
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid() {
        for name in NodeConfig::PRESETS {
            let cfg = NodeConfig::from_preset(name).unwrap();
            let errors = cfg.validate();
            assert!(errors.is_empty(), "{name} should be valid: {errors:?}");
        }
    }

    #[test]
    fn from_preset_unknown() {
        let e = NodeConfig::from_preset("nonexistent").unwrap_err();
        assert!(e.message.contains("unknown preset"));
    }

    #[test]
    fn presets_point_at_each_other() {
        let p = NodeConfig::prosumer();
        let c = NodeConfig::consumer();
        assert_eq!(p.node.role, Role::Prosumer);
        assert_eq!(c.node.role, Role::Consumer);
        assert_eq!(
            p.peer_url().map(|u| u.ends_with(":5001")),
            Some(true)
        );
        assert_eq!(c.listen_addr().map(|a| a.port()), Ok(5001));
    }

    #[test]
    fn default_is_standalone() {
        let cfg = NodeConfig::default();
        assert!(cfg.peer_url().is_none());
        let bound: SocketAddr = "0.0.0.0:5000".parse().unwrap();
        assert_eq!(cfg.status_url(bound), "http://127.0.0.1:5000");
    }

    #[test]
    fn valid_toml_parses() {
        let toml = r#"
[node]
role = "consumer"
node_id = "pi-2"
listen = "0.0.0.0:5000"
peer_url = "http://10.126.46.162:5000"
request_timeout_ms = 3000

[simulation]
data_file = "data/halfhourly_dataset.csv"
household = "MAC000150"
start_date = "2013-06-01"
timescale = "w"
speedup = 600.0

[trading]
grid_buy_price = 0.30
grid_sell_price = 0.04
"#;
        let cfg = NodeConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.node.role, Role::Consumer);
        assert_eq!(cfg.node.node_id, "pi-2");
        assert_eq!(cfg.simulation.speedup, 600.0);
        assert_eq!(cfg.simulation.interval_minutes, 30);
        assert_eq!(cfg.tariff().buy, 0.30);
        assert_eq!(cfg.data_filter().unwrap().timescale, Timescale::Week);
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn unknown_field_rejected() {
        let toml = r#"
[battery]
capacity_kwh = 5.0
unknown_field = 42
"#;
        assert!(NodeConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn unknown_role_rejected() {
        let toml = "[node]\nrole = \"grid\"\n";
        assert!(NodeConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn zero_capacity_fails_validation() {
        let mut cfg = NodeConfig::prosumer();
        cfg.battery.capacity_kwh = 0.0;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "battery.capacity_kwh"));
    }

    #[test]
    fn consumer_ignores_battery_section() {
        let mut cfg = NodeConfig::consumer();
        cfg.battery.capacity_kwh = 0.0;
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn multiple_errors_reported() {
        let mut cfg = NodeConfig::prosumer();
        cfg.node.request_timeout_ms = 60_000;
        cfg.simulation.timescale = "fortnight".into();
        cfg.simulation.speedup = 0.0;
        cfg.trading.grid_sell_price = 0.5;
        cfg.node.listen = "nowhere".into();
        let fields: Vec<String> = cfg.validate().into_iter().map(|e| e.field).collect();
        for expected in [
            "node.request_timeout_ms",
            "simulation.timescale",
            "simulation.speedup",
            "trading.grid_sell_price",
            "node.listen",
        ] {
            assert!(fields.iter().any(|f| f == expected), "missing {expected}: {fields:?}");
        }
    }

    #[test]
    fn scaling_uses_interval() {
        let cfg = NodeConfig::default();
        let scaling = cfg.solar_scaling();
        assert_eq!(scaling.interval_hours, 0.5);
        assert_eq!(scaling.scale_factor, 8000.0);
    }
}
