//! Status display fed through a bounded queue.
//!
//! The timestep loop only ever calls [`DisplayHandle::post`], which never
//! waits: when the queue is full the update is dropped. A worker task drains
//! the queue into a [`DisplaySink`].

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::sim::types::{Reading, TradeData};

/// Anything that can show a few short lines of text.
pub trait DisplaySink: Send + 'static {
    fn show(&mut self, lines: &[String]);
    fn clear(&mut self);
}

/// Sink that writes display lines to the log.
#[derive(Debug, Clone)]
pub struct ConsoleDisplay {
    columns: usize,
}

impl ConsoleDisplay {
    pub fn new(columns: usize) -> Self {
        Self { columns }
    }
}

impl DisplaySink for ConsoleDisplay {
    fn show(&mut self, lines: &[String]) {
        let text = lines
            .iter()
            .map(|l| fit(l, self.columns))
            .collect::<Vec<_>>()
            .join(" | ");
        info!(target: "display", "{text}");
    }

    fn clear(&mut self) {
        debug!(target: "display", "cleared");
    }
}

/// Cuts `line` to at most `columns` characters.
pub fn fit(line: &str, columns: usize) -> String {
    line.chars().take(columns).collect()
}

/// Energy status screen for a reading.
pub fn energy_status(reading: &Reading, columns: usize) -> Vec<String> {
    let lines = match reading {
        Reading::Prosumer(r) => vec![
            format!("D:{:.2} G:{:.2}", r.base.demand, r.generation),
            format!("Bat:{:.0}%", r.battery_soc * 100.0),
        ],
        Reading::Consumer(r) => vec![format!("Demand:{:.2}kWh", r.demand)],
    };
    lines.iter().map(|l| fit(l, columns)).collect()
}

/// Trade screen for a settlement result.
pub fn trade_info(trade: &TradeData, columns: usize) -> Vec<String> {
    [
        format!("Trade:{:.2}kWh", trade.amount),
        format!("Price:£{:.2}", trade.price),
    ]
    .iter()
    .map(|l| fit(l, columns))
    .collect()
}

/// Owner of the display worker.
pub struct DisplayHandle {
    tx: mpsc::Sender<Vec<String>>,
    worker: JoinHandle<()>,
}

impl DisplayHandle {
    /// Spawns a worker draining a queue of `capacity` updates into `sink`.
    pub fn spawn<D: DisplaySink>(mut sink: D, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Vec<String>>(capacity.max(1));
        let worker = tokio::spawn(async move {
            while let Some(lines) = rx.recv().await {
                sink.show(&lines);
            }
            sink.clear();
        });
        Self { tx, worker }
    }

    /// Queues an update; returns `false` if it was dropped.
    pub fn post(&self, lines: Vec<String>) -> bool {
        match self.tx.try_send(lines) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("display queue full, update dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Closes the queue, lets the worker show what is left, then clears.
    pub async fn release(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            warn!(error = %e, "display worker ended abnormally");
        }
    }
}
