//! Core simulation types: roles, per-timestep readings, trades, and step records.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::devices::SensorSnapshot;
use crate::error::SimError;

use super::trading::Settlement;

/// Which household this node simulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Household with solar generation and battery storage.
    Prosumer,
    /// Demand-only household.
    Consumer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prosumer => "prosumer",
            Self::Consumer => "consumer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "prosumer" => Ok(Self::Prosumer),
            "consumer" => Ok(Self::Consumer),
            other => Err(format!(
                "unknown role \"{other}\", expected \"prosumer\" or \"consumer\""
            )),
        }
    }
}

/// One row of the demand data source: a timestamp and the demand recorded for it.
///
/// `demand_kwh` is `None` when the source value was missing or unusable.
#[derive(Debug, Clone, PartialEq)]
pub struct DemandRecord {
    pub timestamp: NaiveDateTime,
    pub demand_kwh: Option<f64>,
}

impl DemandRecord {
    pub fn new(timestamp: NaiveDateTime, demand_kwh: f64) -> Self {
        Self {
            timestamp,
            demand_kwh: Some(demand_kwh),
        }
    }

    pub fn missing(timestamp: NaiveDateTime) -> Self {
        Self {
            timestamp,
            demand_kwh: None,
        }
    }
}

/// Immutable per-timestep energy fact shared by both roles.
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyReading {
    /// Timestep this reading belongs to.
    pub timestamp: NaiveDateTime,
    /// Energy demanded in this timestep (kWh, >= 0).
    pub demand: f64,
    /// Net balance `generation - demand` (kWh, signed).
    pub balance: f64,
}

impl EnergyReading {
    /// Builds a consumer reading (no generation, so `balance = -demand`).
    ///
    /// # Errors
    ///
    /// Returns `SimError::InvalidReading` if `demand` is negative or not finite.
    pub fn consumer(timestamp: NaiveDateTime, demand: f64) -> Result<Self, SimError> {
        check_energy(timestamp, "demand", demand)?;
        Ok(Self {
            timestamp,
            demand,
            balance: -demand,
        })
    }
}

/// Prosumer reading: demand plus generation, battery and sensor context.
#[derive(Debug, Clone, PartialEq)]
pub struct ProsumerReading {
    /// Common reading fields; `balance = generation - demand`.
    pub base: EnergyReading,
    /// Solar energy generated in this timestep (kWh, >= 0).
    pub generation: f64,
    /// Battery state of charge when the reading was taken (0.0 to 1.0).
    pub battery_soc: f64,
    /// Instantaneous scaled solar power (W).
    pub solar_power: f64,
    /// Battery bus voltage (V).
    pub battery_voltage: f64,
}

impl ProsumerReading {
    /// Combines a demand value, a sensor snapshot and the battery SOC.
    ///
    /// # Arguments
    ///
    /// * `timestamp` - Timestep of the reading
    /// * `demand` - Demand for the timestep (kWh)
    /// * `snapshot` - Sensor snapshot taken for the timestep
    /// * `scaling` - Conversion from raw sensor power to household energy
    /// * `battery_soc` - Current battery SOC
    ///
    /// # Errors
    ///
    /// Returns `SimError::InvalidReading` if demand or derived generation is
    /// negative or not finite.
    pub fn new(
        timestamp: NaiveDateTime,
        demand: f64,
        snapshot: &SensorSnapshot,
        scaling: SolarScaling,
        battery_soc: f64,
    ) -> Result<Self, SimError> {
        check_energy(timestamp, "demand", demand)?;
        let solar_power = snapshot.solar_power_w * scaling.scale_factor;
        let generation = scaling.energy_kwh(snapshot.solar_power_w);
        check_energy(timestamp, "generation", generation)?;

        Ok(Self {
            base: EnergyReading {
                timestamp,
                demand,
                balance: generation - demand,
            },
            generation,
            battery_soc,
            solar_power,
            battery_voltage: snapshot.battery_voltage_v,
        })
    }
}

/// Converts raw sensor power into household-scale energy per timestep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolarScaling {
    /// Multiplier from panel-scale to household-scale power.
    pub scale_factor: f64,
    /// Duration of one timestep in hours.
    pub interval_hours: f64,
}

impl SolarScaling {
    /// Household energy (kWh) over one interval for raw sensor power `raw_w`.
    pub fn energy_kwh(&self, raw_w: f64) -> f64 {
        raw_w * self.scale_factor * self.interval_hours / 1000.0
    }
}

fn check_energy(timestamp: NaiveDateTime, field: &'static str, value: f64) -> Result<(), SimError> {
    if !value.is_finite() || value < 0.0 {
        return Err(SimError::InvalidReading {
            timestamp,
            reason: format!("{field} must be a finite value >= 0, got {value}"),
        });
    }
    Ok(())
}

/// Role-tagged reading produced once per timestep.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Consumer(EnergyReading),
    Prosumer(ProsumerReading),
}

impl Reading {
    pub fn role(&self) -> Role {
        match self {
            Self::Consumer(_) => Role::Consumer,
            Self::Prosumer(_) => Role::Prosumer,
        }
    }

    /// Common fields of the reading.
    pub fn base(&self) -> &EnergyReading {
        match self {
            Self::Consumer(r) => r,
            Self::Prosumer(r) => &r.base,
        }
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.base().timestamp
    }

    pub fn demand(&self) -> f64 {
        self.base().demand
    }

    pub fn balance(&self) -> f64 {
        self.base().balance
    }

    /// Generation for the timestep (0 for consumers).
    pub fn generation(&self) -> f64 {
        match self {
            Self::Consumer(_) => 0.0,
            Self::Prosumer(r) => r.generation,
        }
    }

    /// Battery SOC at reading time (`None` for consumers).
    pub fn battery_soc(&self) -> Option<f64> {
        match self {
            Self::Consumer(_) => None,
            Self::Prosumer(r) => Some(r.battery_soc),
        }
    }
}

/// Result of one settlement, as reported to the peer.
///
/// `amount > 0` means this party sold that much to the peer. A negative
/// amount is the deficit this party had to cover, bought from the peer when
/// a peer trade happened and otherwise from battery or grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeData {
    /// Traded energy (kWh, signed).
    pub amount: f64,
    /// Price applied to the trade (currency/kWh).
    pub price: f64,
    /// Grid import price in force for this timestep.
    pub grid_buy_price: f64,
    /// Grid export price in force for this timestep.
    pub grid_sell_price: f64,
}

impl TradeData {
    /// Total value of the trade (`|amount| * price`).
    pub fn value(&self) -> f64 {
        self.amount.abs() * self.price
    }
}

impl fmt::Display for TradeData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.amount > 0.0 { "Selling" } else { "Buying" };
        write!(
            f,
            "{verb} {:.3} kWh at £{:.3}/kWh (Total: £{:.3})",
            self.amount.abs(),
            self.price,
            self.value()
        )
    }
}

/// Complete record of one simulated timestep.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// Timestep index within the run.
    pub timestep: usize,
    /// The reading the step settled.
    pub reading: Reading,
    /// Whether the demand value was missing and a zero-reading was substituted.
    pub substituted: bool,
    /// Whether a counterpart status was available for this step.
    pub peer_available: bool,
    /// Settlement decided by the trading manager.
    pub settlement: Settlement,
    /// Battery SOC after the settlement (prosumer only).
    pub battery_soc: Option<f64>,
}

impl fmt::Display for StepResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.settlement;
        write!(
            f,
            "[{}] {} Demand={:.3} kWh, Gen={:.3} kWh, Balance={:.3} kWh, \
             Peer(sold={:.3}, bought={:.3}), Battery(in={:.3}, out={:.3}), \
             Grid(export={:.3}, import={:.3}), Price={:.3}",
            self.timestep,
            self.reading.timestamp(),
            self.reading.demand(),
            self.reading.generation(),
            self.reading.balance(),
            s.sold_to_peer,
            s.bought_from_peer,
            s.to_battery,
            s.from_battery,
            s.to_grid,
            s.from_grid,
            s.trade.price,
        )?;
        if let Some(soc) = self.battery_soc {
            write!(f, ", SoC={:.1}%", soc * 100.0)?;
        }
        if !self.peer_available {
            write!(f, " (standalone)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2013, 1, 1)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .expect("valid timestamp")
    }

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("Prosumer".parse::<Role>(), Ok(Role::Prosumer));
        assert_eq!("consumer".parse::<Role>(), Ok(Role::Consumer));
        assert!("grid".parse::<Role>().is_err());
    }

    #[test]
    fn consumer_balance_is_negative_demand() {
        let r = EnergyReading::consumer(ts(), 0.4).expect("valid");
        assert_eq!(r.balance, -0.4);
    }

    #[test]
    fn consumer_rejects_negative_demand() {
        assert!(EnergyReading::consumer(ts(), -0.1).is_err());
        assert!(EnergyReading::consumer(ts(), f64::NAN).is_err());
    }

    #[test]
    fn prosumer_generation_scales_sensor_power() {
        let snapshot = SensorSnapshot {
            solar_power_w: 0.5,
            battery_voltage_v: 3.7,
            battery_current_a: 0.1,
        };
        let scaling = SolarScaling {
            scale_factor: 8000.0,
            interval_hours: 0.5,
        };
        // 0.5 W * 8000 = 4000 W over half an hour = 2 kWh
        let r = ProsumerReading::new(ts(), 0.5, &snapshot, scaling, 0.5).expect("valid");
        assert!((r.generation - 2.0).abs() < 1e-12);
        assert!((r.base.balance - 1.5).abs() < 1e-12);
        assert_eq!(r.solar_power, 4000.0);
        assert_eq!(r.battery_voltage, 3.7);
    }

    #[test]
    fn reading_accessors_cover_both_roles() {
        let consumer = Reading::Consumer(EnergyReading::consumer(ts(), 1.0).expect("valid"));
        assert_eq!(consumer.role(), Role::Consumer);
        assert_eq!(consumer.generation(), 0.0);
        assert_eq!(consumer.battery_soc(), None);
    }

    #[test]
    fn trade_display_reports_total() {
        let trade = TradeData {
            amount: -2.0,
            price: 0.15,
            grid_buy_price: 0.25,
            grid_sell_price: 0.05,
        };
        assert_eq!(
            trade.to_string(),
            "Buying 2.000 kWh at £0.150/kWh (Total: £0.300)"
        );
    }
}
