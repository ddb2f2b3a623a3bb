//! Shared test fixtures for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, NaiveDateTime};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use p2p_energy_sim::devices::{Battery, FixedSensor, SensorSnapshot};
use p2p_energy_sim::sim::engine::EngineSettings;
use p2p_energy_sim::sim::trading::Settlement;
use p2p_energy_sim::sim::types::{DemandRecord, SolarScaling};
use p2p_energy_sim::sync::{self, PeerError, PeerLink, PeerStatus, SyncMarker, SyncService};

pub const EPS: f64 = 1e-9;

/// Midnight, 1 January 2013.
pub fn t0() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2013, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .expect("valid timestamp")
}

/// Half-hourly records starting at [`t0`].
pub fn half_hourly(demands: &[Option<f64>]) -> Vec<DemandRecord> {
    demands
        .iter()
        .enumerate()
        .map(|(i, d)| DemandRecord {
            timestamp: t0() + chrono::Duration::minutes(30 * i as i64),
            demand_kwh: *d,
        })
        .collect()
}

/// Settings with no pacing and 1 W raw = 1 kWh per step.
pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        speedup: 1e9,
        scaling: SolarScaling {
            scale_factor: 1000.0,
            interval_hours: 1.0,
        },
        display_columns: 16,
    }
}

/// Default battery (5 kWh, 50% SOC, 80% depth of discharge).
pub fn default_battery() -> Battery {
    Battery::new(5.0, 0.5, 0.8).expect("valid battery")
}

/// Sensor producing `kwh` of generation per step under [`fast_settings`].
pub fn fixed_sensor(kwh: f64) -> FixedSensor {
    FixedSensor::new(SensorSnapshot {
        solar_power_w: kwh,
        battery_voltage_v: 3.7,
        battery_current_a: 0.0,
    })
}

/// Timestamp in the layout peers exchange.
pub fn stamp(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Surplus identity: sold + stored + exported == surplus.
pub fn surplus_conserved(s: &Settlement, surplus: f64) -> bool {
    (s.sold_to_peer + s.to_battery + s.to_grid - surplus).abs() < EPS
}

/// Deficit identity: bought + drawn + imported == deficit.
pub fn deficit_conserved(s: &Settlement, deficit: f64) -> bool {
    (s.bought_from_peer + s.from_battery + s.from_grid - deficit).abs() < EPS
}

/// Peer link returning a fixed status and recording everything sent to it.
///
/// Unless `frozen`, the returned status is stamped with the last timestamp
/// marker this node sent (or [`t0`] before the first one), like a counterpart
/// running in step with it.
#[derive(Default)]
pub struct RecordingPeer {
    pub status: Option<PeerStatus>,
    pub frozen: bool,
    pub pushed: Mutex<Vec<PeerStatus>>,
    pub markers: Mutex<Vec<SyncMarker>>,
}

impl RecordingPeer {
    pub fn with_status(status: PeerStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Returns `status` exactly as given on every fetch.
    pub fn frozen(status: PeerStatus) -> Self {
        Self {
            status: Some(status),
            frozen: true,
            ..Self::default()
        }
    }

    fn last_step(&self) -> NaiveDateTime {
        self.markers
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find_map(|m| match m {
                SyncMarker::At(ts) => Some(*ts),
                _ => None,
            })
            .unwrap_or_else(t0)
    }

    pub fn markers(&self) -> Vec<SyncMarker> {
        self.markers.lock().unwrap().clone()
    }

    pub fn pushed(&self) -> Vec<PeerStatus> {
        self.pushed.lock().unwrap().clone()
    }
}

impl PeerLink for RecordingPeer {
    async fn fetch_status(&self) -> Result<PeerStatus, PeerError> {
        let mut status = self.status.clone().ok_or(PeerError::Status(404))?;
        if !self.frozen {
            status.timestamp = Some(stamp(self.last_step()));
        }
        Ok(status)
    }

    async fn push_status(&self, status: &PeerStatus) -> Result<(), PeerError> {
        self.pushed.lock().unwrap().push(status.clone());
        Ok(())
    }

    async fn sync(&self, marker: SyncMarker) -> Result<(), PeerError> {
        self.markers.lock().unwrap().push(marker);
        Ok(())
    }
}

/// A sync service serving on an ephemeral loopback port.
pub struct RunningService {
    pub service: Arc<SyncService>,
    pub addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<std::io::Result<()>>,
}

impl RunningService {
    pub async fn start() -> Self {
        let service = Arc::new(SyncService::new());
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
        let addr = listener.local_addr().expect("bound address");
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(sync::serve(Arc::clone(&service), listener, async move {
            stopped.await.ok();
        }));
        Self {
            service,
            addr,
            stop,
            task,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn shutdown(self) {
        self.stop.send(()).ok();
        self.task.await.expect("server task").expect("server result");
    }
}
