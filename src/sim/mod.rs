/// Timestep driver and pacing.
pub mod clock;
pub mod engine;
pub mod kpi;
/// Failure policy for external calls.
pub mod policy;
pub mod trading;
pub mod types;
