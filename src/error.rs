//! Crate-level error type.

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::config::ConfigError;
use crate::devices::BatteryError;
use crate::io::demand::DataError;
use crate::sim::policy::ExternalCall;

/// Errors that stop a step or a whole run.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid configuration: {}", join_config_errors(.0))]
    Config(Vec<ConfigError>),

    #[error("no demand readings for household \"{household}\" in the requested range")]
    EmptyInput { household: String },

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Battery(#[from] BatteryError),

    #[error("invalid reading at {timestamp}: {reason}")]
    InvalidReading {
        timestamp: NaiveDateTime,
        reason: String,
    },

    #[error("{call} failed and the run cannot continue: {reason}")]
    Aborted { call: ExternalCall, reason: String },

    #[error("sync service I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SimError {
    /// Whether this error must end the run rather than just the current step.
    pub fn aborts_run(&self) -> bool {
        !matches!(self, Self::InvalidReading { .. })
    }
}

fn join_config_errors(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
