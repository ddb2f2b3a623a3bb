//! Peer-to-peer clearing price derived from the supply-demand ratio.

use serde::{Deserialize, Serialize};

/// Grid import/export prices bounding every peer-to-peer trade.
///
/// # Examples
///
/// ```
/// use p2p_energy_sim::pricing::GridTariff;
///
/// let tariff = GridTariff::new(0.25, 0.05);
/// assert!((tariff.price(5.0, 10.0) - 0.15).abs() < 1e-12);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridTariff {
    /// Price paid per kWh bought from the grid.
    pub buy: f64,
    /// Price received per kWh sold to the grid.
    pub sell: f64,
}

impl GridTariff {
    /// Creates a tariff from the grid buy and sell prices.
    pub fn new(buy: f64, sell: f64) -> Self {
        Self { buy, sell }
    }

    /// Clearing price for the given aggregate demand and supply.
    pub fn price(&self, total_demand: f64, total_supply: f64) -> f64 {
        clearing_price(total_demand, total_supply, self.buy, self.sell)
    }
}

impl Default for GridTariff {
    fn default() -> Self {
        Self::new(0.25, 0.05)
    }
}

/// Computes the peer-to-peer clearing price.
///
/// The price moves linearly from `sell_grid_price` (supply dominates) to
/// `buy_grid_price` (demand meets or exceeds supply) with the supply-demand
/// ratio `SDR = total_demand / total_supply`.
///
/// - `total_supply <= 0` → `buy_grid_price`
/// - `SDR <= 0` → `sell_grid_price`
/// - `SDR >= 1` → `buy_grid_price`
/// - otherwise → `sell·(1 − SDR) + buy·SDR`
///
/// # Arguments
///
/// * `total_demand` - Aggregate demand of both parties (kWh)
/// * `total_supply` - Aggregate generation available for trade (kWh)
/// * `buy_grid_price` - Grid import price (currency/kWh)
/// * `sell_grid_price` - Grid export price (currency/kWh)
pub fn clearing_price(
    total_demand: f64,
    total_supply: f64,
    buy_grid_price: f64,
    sell_grid_price: f64,
) -> f64 {
    if total_supply.is_nan() || total_supply <= 0.0 {
        return buy_grid_price;
    }

    let sdr = total_demand / total_supply;
    if sdr <= 0.0 || sdr.is_nan() {
        sell_grid_price
    } else if sdr >= 1.0 {
        buy_grid_price
    } else {
        sell_grid_price * (1.0 - sdr) + buy_grid_price * sdr
    }
}
