//! Post-hoc settlement summary computed from the step ledger.

use std::fmt;

use super::types::StepResult;

/// Aggregate totals over a complete run.
///
/// Computed from `Vec<StepResult>` so the summary always agrees with the
/// exported ledger.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettlementReport {
    /// Number of settled timesteps.
    pub steps: usize,
    /// Steps where a zero-reading replaced missing demand.
    pub substituted_steps: usize,
    /// Steps settled with a counterpart status available.
    pub peer_steps: usize,
    /// Total demand (kWh).
    pub demand_kwh: f64,
    /// Total generation (kWh).
    pub generation_kwh: f64,
    /// Energy sold to the peer (kWh).
    pub sold_to_peer_kwh: f64,
    /// Energy bought from the peer (kWh).
    pub bought_from_peer_kwh: f64,
    /// Energy stored in the battery (kWh).
    pub battery_in_kwh: f64,
    /// Energy drawn from the battery (kWh).
    pub battery_out_kwh: f64,
    /// Energy exported to the grid (kWh).
    pub grid_export_kwh: f64,
    /// Energy imported from the grid (kWh).
    pub grid_import_kwh: f64,
    /// Net money paid over the run (negative means net income).
    pub net_cost: f64,
    /// SOC after the last step (prosumer only).
    pub final_soc: Option<f64>,
}

impl SettlementReport {
    /// Sums every flow in `results`.
    pub fn from_results(results: &[StepResult]) -> Self {
        let mut report = results.iter().fold(Self::default(), |mut acc, r| {
            let s = &r.settlement;
            acc.steps += 1;
            acc.substituted_steps += usize::from(r.substituted);
            acc.peer_steps += usize::from(r.peer_available);
            acc.demand_kwh += r.reading.demand();
            acc.generation_kwh += r.reading.generation();
            acc.sold_to_peer_kwh += s.sold_to_peer;
            acc.bought_from_peer_kwh += s.bought_from_peer;
            acc.battery_in_kwh += s.to_battery;
            acc.battery_out_kwh += s.from_battery;
            acc.grid_export_kwh += s.to_grid;
            acc.grid_import_kwh += s.from_grid;
            acc.net_cost += s.net_cost();
            acc
        });
        report.final_soc = results.last().and_then(|r| r.battery_soc);
        report
    }

    /// Share of demand not covered by the grid (0 when there was no demand).
    pub fn self_sufficiency(&self) -> f64 {
        if self.demand_kwh > 0.0 {
            (1.0 - self.grid_import_kwh / self.demand_kwh).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

impl fmt::Display for SettlementReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Settlement Report ---")?;
        writeln!(
            f,
            "Timesteps:             {} ({} with peer, {} substituted)",
            self.steps, self.peer_steps, self.substituted_steps
        )?;
        writeln!(f, "Demand:                {:.3} kWh", self.demand_kwh)?;
        writeln!(f, "Generation:            {:.3} kWh", self.generation_kwh)?;
        writeln!(
            f,
            "Peer trade:            {:.3} kWh sold, {:.3} kWh bought",
            self.sold_to_peer_kwh, self.bought_from_peer_kwh
        )?;
        writeln!(
            f,
            "Battery:               {:.3} kWh in, {:.3} kWh out",
            self.battery_in_kwh, self.battery_out_kwh
        )?;
        writeln!(
            f,
            "Grid:                  {:.3} kWh import, {:.3} kWh export",
            self.grid_import_kwh, self.grid_export_kwh
        )?;
        writeln!(f, "Self-sufficiency:      {:.1}%", self.self_sufficiency() * 100.0)?;
        if let Some(soc) = self.final_soc {
            writeln!(f, "Final SoC:             {:.1}%", soc * 100.0)?;
        }
        write!(f, "Net cost:              £{:.3}", self.net_cost)
    }
}
