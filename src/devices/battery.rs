use thiserror::Error;

/// Battery configuration and accounting errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BatteryError {
    #[error("battery capacity must be > 0 kWh, got {0}")]
    InvalidCapacity(f64),
    #[error("state of charge must be in [0, 1], got {0}")]
    InvalidSoc(f64),
    #[error("depth of discharge must be in [0, 1], got {0}")]
    InvalidDepthOfDischarge(f64),
    #[error("energy flow must be finite, got {0} kWh")]
    NonFiniteEnergy(f64),
}

/// Household battery tracked as an energy ledger over its state of charge.
///
/// `Battery` is the sole owner of the prosumer's SOC. Only [`Battery::charge`]
/// and [`Battery::discharge`] mutate it, and both take `&mut self`, so the
/// borrow checker enforces the single-writer discipline.
///
/// # Invariants
/// - `0 <= soc <= 1` after every call
/// - `discharge` never draws the SOC below `1 - depth_of_discharge`
///   (an initial SOC already below that floor is left untouched)
#[derive(Debug, Clone)]
pub struct Battery {
    /// Usable energy capacity in kilowatt-hours.
    capacity_kwh: f64,

    /// State of charge as a fraction (0.0 to 1.0).
    soc: f64,

    /// Maximum fraction of capacity that may be drawn down.
    depth_of_discharge: f64,
}

impl Battery {
    /// Creates a battery with the given capacity, initial SOC, and depth of discharge.
    ///
    /// # Arguments
    ///
    /// * `capacity_kwh` - Battery capacity in kWh (must be > 0)
    /// * `soc` - Initial state of charge as a fraction (0.0 to 1.0)
    /// * `depth_of_discharge` - Drawable fraction of capacity (0.0 to 1.0)
    ///
    /// # Errors
    ///
    /// Returns a `BatteryError` if capacity is zero/negative/non-finite, or if
    /// SOC or depth of discharge lie outside `[0, 1]`.
    pub fn new(capacity_kwh: f64, soc: f64, depth_of_discharge: f64) -> Result<Self, BatteryError> {
        if !capacity_kwh.is_finite() || capacity_kwh <= 0.0 {
            return Err(BatteryError::InvalidCapacity(capacity_kwh));
        }
        if !(0.0..=1.0).contains(&soc) {
            return Err(BatteryError::InvalidSoc(soc));
        }
        if !(0.0..=1.0).contains(&depth_of_discharge) {
            return Err(BatteryError::InvalidDepthOfDischarge(depth_of_discharge));
        }

        Ok(Self {
            capacity_kwh,
            soc,
            depth_of_discharge,
        })
    }

    pub fn capacity_kwh(&self) -> f64 {
        self.capacity_kwh
    }

    pub fn soc(&self) -> f64 {
        self.soc
    }

    pub fn depth_of_discharge(&self) -> f64 {
        self.depth_of_discharge
    }

    /// Lowest SOC that discharging may reach.
    pub fn min_soc(&self) -> f64 {
        1.0 - self.depth_of_discharge
    }

    /// Stores as much of `excess_kwh` as the remaining headroom allows.
    ///
    /// # Returns
    ///
    /// `(new_soc, energy_to_grid)` where `energy_to_grid` is the part of the
    /// excess that did not fit. Negative input is treated as zero.
    ///
    /// # Errors
    ///
    /// Returns `BatteryError::NonFiniteEnergy` for NaN or infinite input; the
    /// SOC is left untouched.
    pub fn charge(&mut self, excess_kwh: f64) -> Result<(f64, f64), BatteryError> {
        let excess = non_negative(excess_kwh)?;

        let max_charge = self.capacity_kwh * (1.0 - self.soc);
        let to_battery = excess.min(max_charge.max(0.0));
        let to_grid = excess - to_battery;

        self.soc = (self.soc + to_battery / self.capacity_kwh).min(1.0);

        Ok((self.soc, to_grid))
    }

    /// Supplies as much of `needed_kwh` as the SOC floor allows.
    ///
    /// # Returns
    ///
    /// `(new_soc, energy_from_grid)` where `energy_from_grid` is the shortfall
    /// the battery could not cover. Negative input is treated as zero.
    ///
    /// # Errors
    ///
    /// Returns `BatteryError::NonFiniteEnergy` for NaN or infinite input; the
    /// SOC is left untouched.
    pub fn discharge(&mut self, needed_kwh: f64) -> Result<(f64, f64), BatteryError> {
        let needed = non_negative(needed_kwh)?;

        let min_soc = self.min_soc();
        // SOC may start below the floor; nothing is available then.
        let available = ((self.soc - min_soc) * self.capacity_kwh).max(0.0);
        let from_battery = needed.min(available);
        let from_grid = needed - from_battery;

        if from_battery > 0.0 {
            self.soc = (self.soc - from_battery / self.capacity_kwh).max(min_soc);
        }

        Ok((self.soc, from_grid))
    }
}

fn non_negative(energy_kwh: f64) -> Result<f64, BatteryError> {
    if !energy_kwh.is_finite() {
        return Err(BatteryError::NonFiniteEnergy(energy_kwh));
    }
    Ok(energy_kwh.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn battery(capacity_kwh: f64, soc: f64, dod: f64) -> Battery {
        Battery::new(capacity_kwh, soc, dod).expect("valid battery")
    }

    #[test]
    fn test_new_battery() {
        let b = battery(5.0, 0.5, 0.8);
        assert_eq!(b.capacity_kwh(), 5.0);
        assert_eq!(b.soc(), 0.5);
        assert_eq!(b.depth_of_discharge(), 0.8);
        assert!((b.min_soc() - 0.2).abs() < EPS);
    }

    #[test]
    fn test_invalid_capacity() {
        assert_eq!(
            Battery::new(0.0, 0.5, 0.8).unwrap_err(),
            BatteryError::InvalidCapacity(0.0)
        );
        assert!(Battery::new(-1.0, 0.5, 0.8).is_err());
        assert!(Battery::new(f64::NAN, 0.5, 0.8).is_err());
    }

    #[test]
    fn test_invalid_soc_and_dod() {
        assert!(matches!(
            Battery::new(5.0, 1.1, 0.8),
            Err(BatteryError::InvalidSoc(_))
        ));
        assert!(matches!(
            Battery::new(5.0, -0.1, 0.8),
            Err(BatteryError::InvalidSoc(_))
        ));
        assert!(matches!(
            Battery::new(5.0, 0.5, 1.5),
            Err(BatteryError::InvalidDepthOfDischarge(_))
        ));
    }

    #[test]
    fn test_discharge_floor_limits_supply() {
        // available = (0.5 - 0.2) * 5 = 1.5 kWh
        let mut b = battery(5.0, 0.5, 0.8);
        let (soc, from_grid) = b.discharge(3.0).expect("finite");
        assert!((from_grid - 1.5).abs() < EPS);
        assert!((soc - 0.2).abs() < EPS);
        assert!((b.soc() - 0.2).abs() < EPS);
    }

    #[test]
    fn test_charge_headroom_limits_storage() {
        // headroom = (1 - 0.9) * 10 = 1 kWh
        let mut b = battery(10.0, 0.9, 0.8);
        let (soc, to_grid) = b.charge(3.0).expect("finite");
        assert!((to_grid - 2.0).abs() < EPS);
        assert!((soc - 1.0).abs() < EPS);
    }

    #[test]
    fn test_partial_charge_fits() {
        let mut b = battery(10.0, 0.5, 0.8);
        let (soc, to_grid) = b.charge(2.0).expect("finite");
        assert_eq!(to_grid, 0.0);
        assert!((soc - 0.7).abs() < EPS);
    }

    #[test]
    fn test_zero_flows_leave_soc_unchanged() {
        let mut b = battery(5.0, 0.42, 0.8);
        assert_eq!(b.charge(0.0).expect("finite"), (0.42, 0.0));
        assert_eq!(b.discharge(0.0).expect("finite"), (0.42, 0.0));
        assert_eq!(b.soc(), 0.42);
    }

    #[test]
    fn test_soc_below_floor_supplies_nothing() {
        let mut b = battery(5.0, 0.1, 0.8);
        let (soc, from_grid) = b.discharge(1.0).expect("finite");
        assert_eq!(from_grid, 1.0);
        assert_eq!(soc, 0.1);
    }

    #[test]
    fn test_non_finite_energy_rejected() {
        let mut b = battery(5.0, 0.5, 0.8);
        assert!(matches!(
            b.charge(f64::NAN),
            Err(BatteryError::NonFiniteEnergy(_))
        ));
        assert!(b.discharge(f64::INFINITY).is_err());
        assert_eq!(b.soc(), 0.5);
    }

    #[test]
    fn test_bounds_hold_over_many_cycles() {
        let mut b = battery(5.0, 0.5, 0.8);
        let flows = [0.3, 2.7, 9.0, 0.01, 4.4, 1.2, 0.0, 6.5];
        for (i, kwh) in flows.iter().cycle().take(64).enumerate() {
            if i % 3 == 0 {
                let (soc, _) = b.discharge(*kwh).expect("finite");
                assert!(soc >= b.min_soc() - EPS);
            } else {
                let (soc, _) = b.charge(*kwh).expect("finite");
                assert!(soc <= 1.0 + EPS);
            }
        }
    }
}
