//! CSV export of the settlement ledger.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::sim::types::StepResult;

/// Ledger column header.
const HEADER: &str = "timestep,timestamp,role,demand_kwh,generation_kwh,balance_kwh,\
                       trade_amount_kwh,trade_price,clearing_price,sold_to_peer_kwh,\
                       bought_from_peer_kwh,to_battery_kwh,from_battery_kwh,\
                       to_grid_kwh,from_grid_kwh,battery_soc,net_cost,peer_available,substituted";

/// Exports the settlement ledger to a CSV file at `path`.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_csv(results: &[StepResult], path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let buf = io::BufWriter::new(file);
    write_csv(results, buf)
}

/// Writes the settlement ledger as CSV to any writer.
///
/// Output is deterministic for identical inputs. `battery_soc` is empty for
/// consumer rows.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_csv(results: &[StepResult], writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);

    wtr.write_record(HEADER.split(',').map(str::trim))?;

    for r in results {
        let s = &r.settlement;
        wtr.write_record(&[
            r.timestep.to_string(),
            r.reading.timestamp().format("%Y-%m-%dT%H:%M:%S").to_string(),
            r.reading.role().to_string(),
            format!("{:.4}", r.reading.demand()),
            format!("{:.4}", r.reading.generation()),
            format!("{:.4}", r.reading.balance()),
            format!("{:.4}", s.trade.amount),
            format!("{:.4}", s.trade.price),
            format!("{:.4}", s.clearing_price),
            format!("{:.4}", s.sold_to_peer),
            format!("{:.4}", s.bought_from_peer),
            format!("{:.4}", s.to_battery),
            format!("{:.4}", s.from_battery),
            format!("{:.4}", s.to_grid),
            format!("{:.4}", s.from_grid),
            r.battery_soc.map(|soc| format!("{soc:.4}")).unwrap_or_default(),
            format!("{:.4}", s.net_cost()),
            r.peer_available.to_string(),
            r.substituted.to_string(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
