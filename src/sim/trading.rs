//! Per-timestep settlement between the local household and its peer.

use crate::devices::{Battery, BatteryError};
use crate::pricing::GridTariff;
use crate::sync::types::PeerStatus;

use super::types::{EnergyReading, ProsumerReading, Reading, TradeData};

/// How one timestep's balance was covered.
///
/// Surplus identity: `sold_to_peer + to_battery + to_grid == surplus`.
/// Deficit identity: `bought_from_peer + from_battery + from_grid == deficit`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settlement {
    /// Trade record reported to the peer.
    pub trade: TradeData,
    /// Clearing price computed for the timestep (currency/kWh).
    pub clearing_price: f64,
    /// Energy sold to the peer (kWh).
    pub sold_to_peer: f64,
    /// Energy bought from the peer (kWh).
    pub bought_from_peer: f64,
    /// Energy stored in the battery (kWh).
    pub to_battery: f64,
    /// Energy drawn from the battery (kWh).
    pub from_battery: f64,
    /// Energy exported to the grid (kWh).
    pub to_grid: f64,
    /// Energy imported from the grid (kWh).
    pub from_grid: f64,
}

impl Settlement {
    fn empty(trade: TradeData, clearing_price: f64) -> Self {
        Self {
            trade,
            clearing_price,
            sold_to_peer: 0.0,
            bought_from_peer: 0.0,
            to_battery: 0.0,
            from_battery: 0.0,
            to_grid: 0.0,
            from_grid: 0.0,
        }
    }

    /// Net money paid this timestep (negative means net income).
    pub fn net_cost(&self) -> f64 {
        let peer_price = self.trade.price;
        self.from_grid * self.trade.grid_buy_price + self.bought_from_peer * peer_price
            - self.sold_to_peer * peer_price
            - self.to_grid * self.trade.grid_sell_price
    }
}

/// Decides each timestep how a balance is split between peer, battery and grid.
#[derive(Debug, Clone, Copy)]
pub struct TradingManager {
    tariff: GridTariff,
}

impl TradingManager {
    pub fn new(tariff: GridTariff) -> Self {
        Self { tariff }
    }

    pub fn tariff(&self) -> GridTariff {
        self.tariff
    }

    /// Settles a reading against the counterpart's last known status.
    ///
    /// `peer` is `None` when no status could be fetched; the settlement is
    /// then made against the grid (and battery) only.
    ///
    /// # Errors
    ///
    /// Returns a `BatteryError` if a battery flow is not finite.
    pub fn settle(
        &self,
        reading: &Reading,
        peer: Option<&PeerStatus>,
        battery: Option<&mut Battery>,
    ) -> Result<Settlement, BatteryError> {
        match reading {
            Reading::Prosumer(r) => self.settle_prosumer(r, peer, battery),
            Reading::Consumer(r) => Ok(self.settle_consumer(r, peer)),
        }
    }

    fn settle_prosumer(
        &self,
        reading: &ProsumerReading,
        peer: Option<&PeerStatus>,
        battery: Option<&mut Battery>,
    ) -> Result<Settlement, BatteryError> {
        let peer_demand = peer.and_then(|p| finite(p.demand)).unwrap_or(0.0).max(0.0);
        let total_demand = reading.base.demand + peer_demand;
        let price = self.tariff.price(total_demand, reading.generation);
        let balance = reading.base.balance;

        if balance >= 0.0 {
            let peer_deficit = peer
                .and_then(|p| finite(p.balance))
                .filter(|b| *b < 0.0)
                .map(f64::abs);

            let (trade_amount, trade) = match peer_deficit {
                Some(deficit) => {
                    let amount = balance.min(deficit);
                    (amount, self.trade(amount, price))
                }
                None => (0.0, self.trade(0.0, self.tariff.sell)),
            };

            let mut settlement = Settlement::empty(trade, price);
            settlement.sold_to_peer = trade_amount;

            let remaining = balance - trade_amount;
            let (to_battery, to_grid) = match battery {
                Some(b) => {
                    let (_, to_grid) = b.charge(remaining)?;
                    (remaining - to_grid, to_grid)
                }
                None => (0.0, remaining),
            };
            settlement.to_battery = to_battery;
            settlement.to_grid = to_grid;
            Ok(settlement)
        } else {
            let deficit = -balance;
            let trade = self.trade(-deficit, self.tariff.buy);
            let mut settlement = Settlement::empty(trade, price);

            let (from_battery, from_grid) = match battery {
                Some(b) => {
                    let (_, from_grid) = b.discharge(deficit)?;
                    (deficit - from_grid, from_grid)
                }
                None => (0.0, deficit),
            };
            settlement.from_battery = from_battery;
            settlement.from_grid = from_grid;
            Ok(settlement)
        }
    }

    fn settle_consumer(&self, reading: &EnergyReading, peer: Option<&PeerStatus>) -> Settlement {
        let deficit = (-reading.balance).max(0.0);

        let offer = peer.and_then(|p| {
            let available = finite(p.balance).filter(|b| *b >= 0.0)?;
            let price = finite(p.peer_price).filter(|p| *p > 0.0)?;
            Some((available, price))
        });

        if let Some((available, peer_price)) = offer {
            let amount = available.min(deficit);
            if amount > 0.0 {
                let mut settlement =
                    Settlement::empty(self.trade(-amount, peer_price), peer_price);
                settlement.bought_from_peer = amount;
                settlement.from_grid = deficit - amount;
                return settlement;
            }
        }

        let mut settlement = Settlement::empty(self.trade(-deficit, self.tariff.buy), self.tariff.buy);
        settlement.from_grid = deficit;
        settlement
    }

    fn trade(&self, amount: f64, price: f64) -> TradeData {
        TradeData {
            amount,
            price,
            grid_buy_price: self.tariff.buy,
            grid_sell_price: self.tariff.sell,
        }
    }
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveDateTime};

    use super::*;
    use crate::devices::SensorSnapshot;
    use crate::sim::types::SolarScaling;

    const EPS: f64 = 1e-9;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2013, 1, 1)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .expect("valid timestamp")
    }

    /// Prosumer reading with exact generation (scale 1000, 1h interval → W == kWh).
    fn prosumer(demand: f64, generation: f64, soc: f64) -> Reading {
        let snapshot = SensorSnapshot {
            solar_power_w: generation,
            battery_voltage_v: 3.7,
            battery_current_a: 0.0,
        };
        let scaling = SolarScaling {
            scale_factor: 1000.0,
            interval_hours: 1.0,
        };
        Reading::Prosumer(ProsumerReading::new(ts(), demand, &snapshot, scaling, soc).expect("valid"))
    }

    fn consumer(demand: f64) -> Reading {
        Reading::Consumer(EnergyReading::consumer(ts(), demand).expect("valid"))
    }

    fn manager() -> TradingManager {
        TradingManager::new(GridTariff::new(0.25, 0.05))
    }

    fn peer(demand: f64, balance: f64) -> PeerStatus {
        PeerStatus {
            demand: Some(demand),
            balance: Some(balance),
            ..PeerStatus::default()
        }
    }

    fn assert_surplus_conserved(s: &Settlement, surplus: f64) {
        assert!((s.sold_to_peer + s.to_battery + s.to_grid - surplus).abs() < EPS);
    }

    fn assert_deficit_conserved(s: &Settlement, deficit: f64) {
        assert!((s.bought_from_peer + s.from_battery + s.from_grid - deficit).abs() < EPS);
    }

    #[test]
    fn prosumer_sells_to_peer_in_deficit() {
        // balance = 3 - 1 = 2, peer deficit 1 → sell 1, remaining 1 to battery
        let mut battery = Battery::new(5.0, 0.5, 0.8).expect("valid");
        let reading = prosumer(1.0, 3.0, 0.5);
        let status = peer(1.0, -1.0);

        let s = manager()
            .settle(&reading, Some(&status), Some(&mut battery))
            .expect("finite");

        // total demand 2, supply 3 → SDR 2/3
        let expected_price = 0.05 * (1.0 / 3.0) + 0.25 * (2.0 / 3.0);
        assert!((s.trade.amount - 1.0).abs() < EPS);
        assert!((s.trade.price - expected_price).abs() < EPS);
        assert!((s.sold_to_peer - 1.0).abs() < EPS);
        assert!((s.to_battery - 1.0).abs() < EPS);
        assert_eq!(s.to_grid, 0.0);
        assert!((battery.soc() - 0.7).abs() < EPS);
        assert_surplus_conserved(&s, 2.0);
    }

    #[test]
    fn prosumer_surplus_overflows_to_grid() {
        let mut battery = Battery::new(5.0, 0.9, 0.8).expect("valid");
        let reading = prosumer(0.0, 2.0, 0.9);

        let s = manager()
            .settle(&reading, Some(&peer(0.5, -0.5)), Some(&mut battery))
            .expect("finite");

        assert!((s.sold_to_peer - 0.5).abs() < EPS);
        assert!((s.to_battery - 0.5).abs() < EPS);
        assert!((s.to_grid - 1.0).abs() < EPS);
        assert!((battery.soc() - 1.0).abs() < EPS);
        assert_surplus_conserved(&s, 2.0);
    }

    #[test]
    fn prosumer_no_trade_when_both_have_surplus() {
        let mut battery = Battery::new(5.0, 0.5, 0.8).expect("valid");
        let reading = prosumer(0.5, 1.5, 0.5);

        let s = manager()
            .settle(&reading, Some(&peer(0.0, 0.3)), Some(&mut battery))
            .expect("finite");

        assert_eq!(s.trade.amount, 0.0);
        assert_eq!(s.trade.price, 0.05);
        assert_eq!(s.sold_to_peer, 0.0);
        assert!((s.to_battery - 1.0).abs() < EPS);
        assert_surplus_conserved(&s, 1.0);
    }

    #[test]
    fn prosumer_deficit_draws_battery_then_grid() {
        // available = (0.5 - 0.2) * 5 = 1.5; deficit 3 → 1.5 battery + 1.5 grid
        let mut battery = Battery::new(5.0, 0.5, 0.8).expect("valid");
        let reading = prosumer(3.0, 0.0, 0.5);

        let s = manager()
            .settle(&reading, Some(&peer(1.0, -1.0)), Some(&mut battery))
            .expect("finite");

        assert!((s.trade.amount + 3.0).abs() < EPS);
        assert_eq!(s.trade.price, 0.25);
        assert!((s.from_battery - 1.5).abs() < EPS);
        assert!((s.from_grid - 1.5).abs() < EPS);
        assert!((battery.soc() - 0.2).abs() < EPS);
        assert_deficit_conserved(&s, 3.0);
        // no generation → clearing price collapses to grid buy
        assert_eq!(s.clearing_price, 0.25);
    }

    #[test]
    fn prosumer_without_peer_settles_against_battery_and_grid() {
        let mut battery = Battery::new(5.0, 0.5, 0.8).expect("valid");
        let reading = prosumer(0.5, 2.5, 0.5);

        let s = manager()
            .settle(&reading, None, Some(&mut battery))
            .expect("finite");

        assert_eq!(s.sold_to_peer, 0.0);
        assert_eq!(s.trade.price, 0.05);
        assert!((s.to_battery - 2.0).abs() < EPS);
        assert_surplus_conserved(&s, 2.0);
    }

    #[test]
    fn consumer_buys_from_peer_at_peer_price() {
        let status = PeerStatus {
            peer_price: Some(0.15),
            ..peer(1.0, 2.0)
        };
        let s = manager().settle(&consumer(1.0), Some(&status), None).expect("no battery");

        assert!((s.trade.amount + 1.0).abs() < EPS);
        assert_eq!(s.trade.price, 0.15);
        assert!((s.bought_from_peer - 1.0).abs() < EPS);
        assert_eq!(s.from_grid, 0.0);
        assert_deficit_conserved(&s, 1.0);
    }

    #[test]
    fn consumer_shortfall_comes_from_grid() {
        let status = PeerStatus {
            peer_price: Some(0.2),
            ..peer(0.2, 0.4)
        };
        let s = manager().settle(&consumer(1.0), Some(&status), None).expect("no battery");

        assert!((s.bought_from_peer - 0.4).abs() < EPS);
        assert!((s.from_grid - 0.6).abs() < EPS);
        assert!((s.trade.amount + 0.4).abs() < EPS);
        assert_deficit_conserved(&s, 1.0);
    }

    #[test]
    fn consumer_without_peer_price_buys_from_grid() {
        let s = manager()
            .settle(&consumer(0.8), Some(&peer(0.1, 2.0)), None)
            .expect("no battery");

        assert_eq!(s.bought_from_peer, 0.0);
        assert!((s.from_grid - 0.8).abs() < EPS);
        assert!((s.trade.amount + 0.8).abs() < EPS);
        assert_eq!(s.trade.price, 0.25);
    }

    #[test]
    fn consumer_with_peer_in_deficit_buys_from_grid() {
        let status = PeerStatus {
            peer_price: Some(0.25),
            ..peer(2.0, -1.0)
        };
        let s = manager().settle(&consumer(0.5), Some(&status), None).expect("no battery");
        assert_eq!(s.bought_from_peer, 0.0);
        assert!((s.from_grid - 0.5).abs() < EPS);
    }

    #[test]
    fn both_sides_agree_on_trade() {
        // Prosumer: demand 1, generation 3 → surplus 2; consumer deficit 1.
        let mut battery = Battery::new(5.0, 0.5, 0.8).expect("valid");
        let prosumer_reading = prosumer(1.0, 3.0, 0.5);
        let consumer_reading = consumer(1.0);

        let consumer_status = peer(1.0, -1.0);
        let p = manager()
            .settle(&prosumer_reading, Some(&consumer_status), Some(&mut battery))
            .expect("finite");

        let prosumer_status = PeerStatus {
            peer_price: Some(p.clearing_price),
            ..peer(1.0, 2.0)
        };
        let c = manager()
            .settle(&consumer_reading, Some(&prosumer_status), None)
            .expect("no battery");

        assert!((p.trade.amount - 1.0).abs() < EPS);
        assert!((c.trade.amount + 1.0).abs() < EPS);
        assert!((p.trade.price - c.trade.price).abs() < EPS);
        assert!((p.sold_to_peer - c.bought_from_peer).abs() < EPS);
    }

    #[test]
    fn net_cost_accounts_for_all_flows() {
        let status = PeerStatus {
            peer_price: Some(0.2),
            ..peer(0.2, 0.4)
        };
        let s = manager().settle(&consumer(1.0), Some(&status), None).expect("no battery");
        // 0.4 * 0.2 from peer + 0.6 * 0.25 from grid
        assert!((s.net_cost() - (0.08 + 0.15)).abs() < EPS);
    }
}
