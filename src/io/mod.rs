/// Demand data source.
pub mod demand;
/// Settlement ledger export.
pub mod export;
