//! Sync service state: received peer statuses and the timestep barrier.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveDateTime;
use tokio::sync::{Mutex, RwLock, watch};
use tracing::{debug, info};

use super::types::{PeerStatus, SimStatus, StatusResponse};

const START: &str = "START";
const END: &str = "END";

/// Accepted timestamp layouts, tried in order.
const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// One value of the `POST /sync` protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMarker {
    Start,
    At(NaiveDateTime),
    End,
}

impl FromStr for SyncMarker {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            START => Ok(Self::Start),
            END => Ok(Self::End),
            _ => TIMESTAMP_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(Self::At)
                .ok_or_else(|| format!("invalid sync timestamp \"{s}\"")),
        }
    }
}

impl fmt::Display for SyncMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => f.write_str(START),
            Self::At(ts) => write!(f, "{}", ts.format("%Y-%m-%dT%H:%M:%S")),
            Self::End => f.write_str(END),
        }
    }
}

/// Forward-only sync state machine: unset → START → timestamps → END.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncState {
    #[default]
    NotStarted,
    Starting,
    InProgress(NaiveDateTime),
    Completed,
}

impl SyncState {
    /// Applies `marker`, returning whether the state moved.
    ///
    /// Anything that would move the state backwards (a repeated or older
    /// timestamp, START after progress, anything after END) is ignored.
    pub fn advance(&mut self, marker: SyncMarker) -> bool {
        let next = match (*self, marker) {
            (Self::Completed, _) => None,
            (_, SyncMarker::End) => Some(Self::Completed),
            (Self::NotStarted, SyncMarker::Start) => Some(Self::Starting),
            (_, SyncMarker::Start) => None,
            (Self::NotStarted | Self::Starting, SyncMarker::At(ts)) => Some(Self::InProgress(ts)),
            (Self::InProgress(current), SyncMarker::At(ts)) if ts > current => {
                Some(Self::InProgress(ts))
            }
            (Self::InProgress(_), SyncMarker::At(_)) => None,
        };
        match next {
            Some(state) => {
                *self = state;
                true
            }
            None => false,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Read-only view reported by `GET /status`.
    pub fn report(&self) -> StatusResponse {
        let (status, current_timestamp) = match self {
            Self::NotStarted => (SimStatus::NotStarted, None),
            Self::Starting => (SimStatus::Starting, Some(START.to_string())),
            Self::InProgress(ts) => (
                SimStatus::InProgress,
                Some(SyncMarker::At(*ts).to_string()),
            ),
            Self::Completed => (SimStatus::Completed, Some(END.to_string())),
        };
        StatusResponse {
            status,
            current_timestamp,
        }
    }
}

#[derive(Debug, Default)]
struct PeerTable {
    entries: HashMap<String, PeerStatus>,
    latest: Option<String>,
}

/// State owned by one node's sync service.
///
/// Peer statuses sit behind a single `RwLock`, so writes for any key are
/// applied one at a time and in arrival order. The sync state has its own
/// lock; the completion flag is a `watch` channel that flips to `true` once.
#[derive(Debug)]
pub struct SyncService {
    peers: RwLock<PeerTable>,
    sync: Mutex<SyncState>,
    completed: watch::Sender<bool>,
}

impl Default for SyncService {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncService {
    pub fn new() -> Self {
        let (completed, _) = watch::channel(false);
        Self {
            peers: RwLock::new(PeerTable::default()),
            sync: Mutex::new(SyncState::default()),
            completed,
        }
    }

    /// Merges `update` into the status stored for `key`.
    ///
    /// Returns the merged status.
    pub async fn update_status(&self, key: &str, update: PeerStatus) -> PeerStatus {
        let mut table = self.peers.write().await;
        let entry = table.entries.entry(key.to_string()).or_default();
        entry.merge(update);
        let merged = entry.clone();
        table.latest = Some(key.to_string());
        debug!(peer = key, ?merged.timestamp, "peer status updated");
        merged
    }

    /// Status stored for `key`, or for the most recent writer when `None`.
    pub async fn status_for(&self, key: Option<&str>) -> Option<PeerStatus> {
        let table = self.peers.read().await;
        let key = match key {
            Some(k) => k,
            None => table.latest.as_deref()?,
        };
        table.entries.get(key).cloned()
    }

    /// Applies a sync marker; returns whether the state moved.
    pub async fn advance(&self, marker: SyncMarker) -> bool {
        let mut state = self.sync.lock().await;
        let moved = state.advance(marker);
        if !moved {
            debug!(%marker, current = ?*state, "sync marker ignored");
            return false;
        }
        match marker {
            SyncMarker::Start => info!("peer simulation started"),
            SyncMarker::End => {
                info!("peer simulation completed");
                self.completed.send_if_modified(|done| {
                    if *done {
                        false
                    } else {
                        *done = true;
                        true
                    }
                });
            }
            SyncMarker::At(_) => debug!(%marker, "sync timestamp advanced"),
        }
        true
    }

    pub async fn state(&self) -> SyncState {
        *self.sync.lock().await
    }

    pub async fn status(&self) -> StatusResponse {
        self.sync.lock().await.report()
    }

    pub fn is_completed(&self) -> bool {
        *self.completed.borrow()
    }

    /// Receiver for the completion flag.
    pub fn subscribe_completed(&self) -> watch::Receiver<bool> {
        self.completed.subscribe()
    }

    /// Waits up to `timeout` for END; returns whether it arrived.
    pub async fn wait_completed(&self, timeout: Duration) -> bool {
        let mut rx = self.completed.subscribe();
        match tokio::time::timeout(timeout, rx.wait_for(|done| *done)).await {
            Ok(result) => result.is_ok(),
            Err(_) => false,
        }
    }
}
