//! Simulation engine that drives the per-timestep settlement loop.

use std::future::Future;
use std::pin::Pin;

use chrono::NaiveDateTime;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::devices::{Battery, SensorSource};
use crate::display::{self, DisplayHandle};
use crate::error::SimError;
use crate::pricing::GridTariff;
use crate::sync::{PeerLink, PeerStatus, SyncMarker};

use super::clock::{Clock, Pacer};
use super::policy::{CallOutcome, ExternalCall, resolve};
use super::trading::TradingManager;
use super::types::{
    DemandRecord, EnergyReading, ProsumerReading, Reading, Role, SolarScaling, StepResult,
    TradeData,
};

/// Fixed parameters of a run.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Simulated seconds per wall-clock second.
    pub speedup: f64,
    /// Conversion from raw sensor power to household energy.
    pub scaling: SolarScaling,
    /// Display line width.
    pub display_columns: usize,
}

/// Mutable state threaded through the loop.
#[derive(Debug, Default)]
pub struct SimState {
    /// Prosumer battery; `None` for a consumer.
    pub battery: Option<Battery>,
    /// Trade reported for the most recent settled step.
    pub last_trade: Option<TradeData>,
    /// Steps that produced a result.
    pub settled: usize,
    /// Steps skipped because of a step-level error.
    pub skipped: usize,
    /// Steps settled without a counterpart status.
    pub peer_misses: usize,
    /// Timestamp of the most recently attempted step.
    pub last_timestamp: Option<NaiveDateTime>,
}

/// What a finished run produced.
#[derive(Debug)]
pub struct RunOutput {
    pub results: Vec<StepResult>,
    /// Whether the run was stopped by the shutdown signal.
    pub interrupted: bool,
}

/// Simulation engine owning the trading state, peer link and sensor.
///
/// Generic over `P: PeerLink` and `S: SensorSource` for static dispatch.
pub struct Engine<P: PeerLink, S: SensorSource> {
    settings: EngineSettings,
    trading: TradingManager,
    state: SimState,
    peer: P,
    sensor: S,
    display: Option<DisplayHandle>,
    /// Latched once the counterpart has sent END.
    peer_done: Option<watch::Receiver<bool>>,
}

impl<P: PeerLink, S: SensorSource> Engine<P, S> {
    /// Creates a prosumer engine owning `battery`.
    pub fn prosumer(
        settings: EngineSettings,
        tariff: GridTariff,
        battery: Battery,
        peer: P,
        sensor: S,
    ) -> Self {
        Self::with_state(
            settings,
            tariff,
            SimState {
                battery: Some(battery),
                ..SimState::default()
            },
            peer,
            sensor,
        )
    }

    /// Creates a consumer engine; `sensor` is never read.
    pub fn consumer(settings: EngineSettings, tariff: GridTariff, peer: P, sensor: S) -> Self {
        Self::with_state(settings, tariff, SimState::default(), peer, sensor)
    }

    fn with_state(
        settings: EngineSettings,
        tariff: GridTariff,
        state: SimState,
        peer: P,
        sensor: S,
    ) -> Self {
        Self {
            settings,
            trading: TradingManager::new(tariff),
            state,
            peer,
            sensor,
            display: None,
            peer_done: None,
        }
    }

    /// Attaches a display fed on every step.
    pub fn with_display(mut self, display: DisplayHandle) -> Self {
        self.display = Some(display);
        self
    }

    /// Stops trading with the counterpart once `done` turns `true`.
    ///
    /// Pass [`SyncService::subscribe_completed`](crate::sync::SyncService::subscribe_completed)
    /// of this node's own sync service.
    pub fn with_peer_completion(mut self, done: watch::Receiver<bool>) -> Self {
        self.peer_done = Some(done);
        self
    }

    pub fn role(&self) -> Role {
        if self.state.battery.is_some() {
            Role::Prosumer
        } else {
            Role::Consumer
        }
    }

    pub fn state(&self) -> &SimState {
        &self.state
    }

    pub fn peer(&self) -> &P {
        &self.peer
    }

    pub fn battery(&self) -> Option<&Battery> {
        self.state.battery.as_ref()
    }

    /// Builds this timestep's reading, substituting zero demand if missing.
    fn build_reading(&mut self, record: &DemandRecord) -> Result<(Reading, bool), SimError> {
        let ts = record.timestamp;
        let (demand, substituted) = match record.demand_kwh {
            Some(d) => (d, false),
            None => {
                warn!(%ts, "missing demand value, substituting zero reading");
                (0.0, true)
            }
        };

        let reading = match &self.state.battery {
            None => Reading::Consumer(EnergyReading::consumer(ts, demand)?),
            Some(battery) => {
                let soc = battery.soc();
                let snapshot = resolve(
                    ExternalCall::ReadSensor,
                    CallOutcome::from_result(self.sensor.read(ts)),
                )?
                .unwrap_or_default();
                Reading::Prosumer(ProsumerReading::new(
                    ts,
                    demand,
                    &snapshot,
                    self.settings.scaling,
                    soc,
                )?)
            }
        };
        Ok((reading, substituted))
    }

    /// Executes one timestep.
    ///
    /// # Errors
    ///
    /// Returns `SimError::InvalidReading` for a bad reading (the caller skips
    /// the step) or `SimError::Aborted` when the failure policy ends the run.
    pub async fn step(&mut self, timestep: usize, record: &DemandRecord) -> Result<StepResult, SimError> {
        let not_before = self
            .state
            .last_timestamp
            .replace(record.timestamp)
            .unwrap_or(record.timestamp);

        // 1. Reading
        let (reading, substituted) = self.build_reading(record)?;
        let ts = reading.timestamp();

        // 2. Counterpart status
        let peer = resolve(
            ExternalCall::FetchPeerStatus,
            CallOutcome::from_result(self.peer.fetch_status().await),
        )?
        .filter(|status| self.is_current(status, not_before));
        if peer.is_none() {
            self.state.peer_misses += 1;
        }

        // 3. Settlement and battery update
        let settled = self
            .trading
            .settle(&reading, peer.as_ref(), self.state.battery.as_mut());
        let settlement = resolve(ExternalCall::ApplySettlement, CallOutcome::from_result(settled))?
            .ok_or_else(|| SimError::InvalidReading {
                timestamp: ts,
                reason: "settlement could not be applied".to_string(),
            })?;
        let battery_soc = self.state.battery.as_ref().map(Battery::soc);
        self.state.last_trade = Some(settlement.trade);

        info!(step = timestep, %ts, "{}", settlement.trade);
        self.show(&reading, &settlement.trade);

        // 4. Report to the counterpart
        let status = PeerStatus::from_step(&reading, &settlement);
        resolve(
            ExternalCall::PushPeerStatus,
            CallOutcome::from_result(self.peer.push_status(&status).await),
        )?;
        self.sync(SyncMarker::At(ts)).await?;

        self.state.settled += 1;
        Ok(StepResult {
            timestep,
            reading,
            substituted,
            peer_available: peer.is_some(),
            settlement,
            battery_soc,
        })
    }

    /// Whether `status` may be traded against this step.
    ///
    /// A finished counterpart, or a status with no timestamp or one older than
    /// the previous step, counts as no counterpart.
    fn is_current(&self, status: &PeerStatus, not_before: NaiveDateTime) -> bool {
        if self.peer_done.as_ref().is_some_and(|done| *done.borrow()) {
            debug!("counterpart has finished, settling without it");
            return false;
        }
        match status.timestamp_at() {
            Some(at) if at >= not_before => true,
            at => {
                warn!(status_at = ?at, %not_before, "stale counterpart status ignored");
                false
            }
        }
    }

    fn show(&self, reading: &Reading, trade: &TradeData) {
        if let Some(handle) = &self.display {
            let columns = self.settings.display_columns;
            handle.post(display::energy_status(reading, columns));
            handle.post(display::trade_info(trade, columns));
        }
    }

    async fn sync(&self, marker: SyncMarker) -> Result<(), SimError> {
        resolve(
            ExternalCall::SyncTimestamp,
            CallOutcome::from_result(self.peer.sync(marker).await),
        )?;
        Ok(())
    }

    /// Runs every record in order, pacing steps by the configured speedup.
    ///
    /// Stops early when `shutdown` resolves. Whatever the exit path, END is
    /// sent to the counterpart and the display is released before returning.
    ///
    /// # Errors
    ///
    /// Returns the first error the failure policy treats as fatal.
    pub async fn run<F>(&mut self, records: &[DemandRecord], shutdown: F) -> Result<RunOutput, SimError>
    where
        F: Future<Output = ()>,
    {
        let mut shutdown = std::pin::pin!(shutdown);
        let outcome = self.drive(records, shutdown.as_mut()).await;

        if let Err(e) = self.sync(SyncMarker::End).await {
            warn!(error = %e, "could not send END");
        }
        if let Some(handle) = self.display.take() {
            handle.release().await;
        }
        info!(
            role = %self.role(),
            settled = self.state.settled,
            skipped = self.state.skipped,
            peer_misses = self.state.peer_misses,
            "simulation finished"
        );
        outcome
    }

    async fn drive<F>(&mut self, records: &[DemandRecord], mut shutdown: Pin<&mut F>) -> Result<RunOutput, SimError>
    where
        F: Future<Output = ()>,
    {
        self.sync(SyncMarker::Start).await?;

        let mut results = Vec::with_capacity(records.len());
        let Some(first) = records.first() else {
            return Ok(RunOutput {
                results,
                interrupted: false,
            });
        };
        let pacer = Pacer::start(first.timestamp, self.settings.speedup);
        info!(role = %self.role(), steps = records.len(), speedup = self.settings.speedup, "simulation started");

        let mut clock = Clock::new(records);
        while let Some((timestep, record)) = clock.tick() {
            match self.step(timestep, record).await {
                Ok(result) => results.push(result),
                Err(e) if e.aborts_run() => return Err(e),
                Err(e) => {
                    self.state.skipped += 1;
                    warn!(step = timestep, error = %e, "timestep skipped");
                }
            }

            let next: Option<NaiveDateTime> = records.get(timestep + 1).map(|r| r.timestamp);
            let delay = next.map_or(std::time::Duration::ZERO, |ts| pacer.delay_now(ts));
            debug!(?delay, "waiting for next timestep");
            tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!(step = timestep, "interrupted, stopping simulation");
                    return Ok(RunOutput { results, interrupted: true });
                }
                () = tokio::time::sleep(delay) => {}
            }
        }

        Ok(RunOutput {
            results,
            interrupted: false,
        })
    }
}
