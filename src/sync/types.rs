//! JSON bodies exchanged between peers.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::io::demand::parse_timestamp;
use crate::sim::trading::Settlement;
use crate::sim::types::Reading;

/// Most recently received snapshot of a counterpart.
///
/// Every field is optional so a push may carry only part of the picture;
/// [`PeerStatus::merge`] applies it field by field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demand: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_soc: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buy_grid_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sell_grid_price: Option<f64>,
}

impl PeerStatus {
    /// Status this node advertises after settling `reading`.
    pub fn from_step(reading: &Reading, settlement: &Settlement) -> Self {
        Self {
            timestamp: Some(reading.timestamp().format("%Y-%m-%dT%H:%M:%S").to_string()),
            demand: Some(reading.demand()),
            balance: Some(reading.balance()),
            generation: Some(reading.generation()),
            battery_soc: reading.battery_soc(),
            trade_amount: Some(settlement.trade.amount),
            peer_price: Some(settlement.clearing_price),
            buy_grid_price: Some(settlement.trade.grid_buy_price),
            sell_grid_price: Some(settlement.trade.grid_sell_price),
        }
    }

    /// Parsed `timestamp`, if present and well-formed.
    pub fn timestamp_at(&self) -> Option<NaiveDateTime> {
        self.timestamp.as_deref().and_then(parse_timestamp)
    }

    /// Overwrites each field that `update` carries (last write wins).
    pub fn merge(&mut self, update: PeerStatus) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }
        take(&mut self.timestamp, update.timestamp);
        take(&mut self.demand, update.demand);
        take(&mut self.balance, update.balance);
        take(&mut self.generation, update.generation);
        take(&mut self.battery_soc, update.battery_soc);
        take(&mut self.trade_amount, update.trade_amount);
        take(&mut self.peer_price, update.peer_price);
        take(&mut self.buy_grid_price, update.buy_grid_price);
        take(&mut self.sell_grid_price, update.sell_grid_price);
    }
}

/// `POST /sync` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    /// `"START"`, `"END"` or an ISO-8601 timestamp.
    pub timestamp: String,
}

/// Coarse phase reported by `GET /status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimStatus {
    NotStarted,
    Starting,
    InProgress,
    Completed,
}

/// `GET /status` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: SimStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_timestamp: Option<String>,
}

/// Plain `{status: ...}` acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    pub status: String,
}

impl Ack {
    pub fn new(status: &str) -> Self {
        Self {
            status: status.to_string(),
        }
    }
}

/// Error body returned with 4xx responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Query parameters for `GET /peer-status`.
#[derive(Debug, Default, Deserialize)]
pub struct PeerQuery {
    /// Identifier of the peer whose status should be returned.
    pub peer: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_parses_both_layouts() {
        let mut status = PeerStatus {
            timestamp: Some("2013-01-01T00:30:00".to_string()),
            ..PeerStatus::default()
        };
        let at = status.timestamp_at().unwrap();
        assert_eq!(at.format("%H:%M").to_string(), "00:30");

        status.timestamp = Some("2013-01-01 00:30:00".to_string());
        assert_eq!(status.timestamp_at(), Some(at));

        status.timestamp = Some("START".to_string());
        assert!(status.timestamp_at().is_none());
        assert!(PeerStatus::default().timestamp_at().is_none());
    }

    #[test]
    fn merge_is_last_write_wins_per_field() {
        let mut stored = PeerStatus {
            demand: Some(1.0),
            balance: Some(-1.0),
            ..PeerStatus::default()
        };
        stored.merge(PeerStatus {
            balance: Some(-0.5),
            peer_price: Some(0.2),
            ..PeerStatus::default()
        });

        assert_eq!(stored.demand, Some(1.0));
        assert_eq!(stored.balance, Some(-0.5));
        assert_eq!(stored.peer_price, Some(0.2));
    }

    #[test]
    fn absent_fields_are_omitted_from_json() {
        let status = PeerStatus {
            demand: Some(0.4),
            balance: Some(-0.4),
            ..PeerStatus::default()
        };
        let json = serde_json::to_value(&status).expect("serializable");
        assert_eq!(json, serde_json::json!({"demand": 0.4, "balance": -0.4}));
    }

    #[test]
    fn status_uses_snake_case() {
        let body = StatusResponse {
            status: SimStatus::InProgress,
            current_timestamp: Some("2013-01-01T00:30:00".into()),
        };
        let json = serde_json::to_value(&body).expect("serializable");
        assert_eq!(json["status"], "in_progress");
    }
}
