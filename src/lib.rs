//! Peer-to-peer energy trading between a prosumer and a consumer household.

pub mod cli;
pub mod config;
pub mod devices;
pub mod display;
pub mod error;
pub mod io;
/// Clearing price between the grid tariffs.
pub mod pricing;
/// Simulation engine, settlement and timestep driver.
pub mod sim;
/// Peer sync service and client.
pub mod sync;
pub mod telemetry;
