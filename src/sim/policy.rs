//! Failure policy for every external call the orchestrator makes.
//!
//! Each call result is classified into a [`CallOutcome`] and resolved through
//! one table, [`policy_for`], instead of ad-hoc fallbacks at each call site.
//! Transient failures always continue; fatal ones continue or abort the run
//! according to the table.

use std::fmt;

use tracing::{debug, error, warn};

use crate::devices::{BatteryError, SensorError};
use crate::error::SimError;

/// External interactions made while driving the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalCall {
    /// Read the counterpart's status from the sync service.
    FetchPeerStatus,
    /// Push this node's status and trade to the counterpart.
    PushPeerStatus,
    /// Send a START / timestamp / END marker to the counterpart.
    SyncTimestamp,
    /// Read the solar/battery sensor.
    ReadSensor,
    /// Apply the settlement's battery flows.
    ApplySettlement,
    /// Load the demand sequence before the run.
    LoadDemand,
}

impl fmt::Display for ExternalCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FetchPeerStatus => "fetch peer status",
            Self::PushPeerStatus => "push peer status",
            Self::SyncTimestamp => "sync timestamp",
            Self::ReadSensor => "read sensor",
            Self::ApplySettlement => "apply settlement",
            Self::LoadDemand => "load demand data",
        };
        f.write_str(name)
    }
}

/// What to do when a call fails fatally.
///
/// Only calls made before the loop starts may abort the run; inside the loop
/// the worst outcome is skipping one timestep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnFailure {
    /// Log and carry on with a fallback value.
    Continue,
    /// Stop the run.
    AbortRun,
}

/// The policy table.
pub const fn policy_for(call: ExternalCall) -> OnFailure {
    match call {
        ExternalCall::FetchPeerStatus
        | ExternalCall::PushPeerStatus
        | ExternalCall::SyncTimestamp
        | ExternalCall::ReadSensor
        | ExternalCall::ApplySettlement => OnFailure::Continue,
        ExternalCall::LoadDemand => OnFailure::AbortRun,
    }
}

/// Classified result of one external call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome<T> {
    Ok(T),
    /// Expected to clear up by itself (timeouts, refused connections, 5xx).
    Transient(String),
    /// Will not clear up by retrying (bad data, misconfiguration).
    Fatal(String),
}

/// Errors that know whether they are transient.
pub trait Classify {
    fn is_transient(&self) -> bool;
}

impl Classify for SensorError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl Classify for BatteryError {
    fn is_transient(&self) -> bool {
        false
    }
}

impl<T> CallOutcome<T> {
    /// Classifies a `Result` using the error's own [`Classify`] impl.
    pub fn from_result<E>(result: Result<T, E>) -> Self
    where
        E: Classify + fmt::Display,
    {
        match result {
            Ok(v) => Self::Ok(v),
            Err(e) if e.is_transient() => Self::Transient(e.to_string()),
            Err(e) => Self::Fatal(e.to_string()),
        }
    }
}

/// Resolves an outcome through the policy table.
///
/// # Returns
///
/// * `Ok(Some(v))` - the call succeeded
/// * `Ok(None)` - the call failed and the caller should use its fallback
///
/// # Errors
///
/// Returns `SimError::Aborted` when a fatal failure hits an `AbortRun` call.
pub fn resolve<T>(call: ExternalCall, outcome: CallOutcome<T>) -> Result<Option<T>, SimError> {
    match outcome {
        CallOutcome::Ok(v) => Ok(Some(v)),
        CallOutcome::Transient(reason) => {
            debug!(%call, %reason, "call failed, continuing (normal when running standalone)");
            Ok(None)
        }
        CallOutcome::Fatal(reason) => match policy_for(call) {
            OnFailure::Continue => {
                warn!(%call, %reason, "call failed, continuing with fallback");
                Ok(None)
            }
            OnFailure::AbortRun => {
                error!(%call, %reason, "call failed, aborting run");
                Err(SimError::Aborted { call, reason })
            }
        },
    }
}
