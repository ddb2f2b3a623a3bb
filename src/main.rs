//! P2P energy trading node: CLI wiring, sync service and simulation run.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use p2p_energy_sim::cli::{self, CliOptions};
use p2p_energy_sim::config::NodeConfig;
use p2p_energy_sim::devices::{FixedSensor, MockSensor};
use p2p_energy_sim::display::{ConsoleDisplay, DisplayHandle};
use p2p_energy_sim::error::SimError;
use p2p_energy_sim::io::demand::load_demand_csv;
use p2p_energy_sim::io::export::export_csv;
use p2p_energy_sim::sim::engine::{Engine, EngineSettings};
use p2p_energy_sim::sim::kpi::SettlementReport;
use p2p_energy_sim::sim::policy::{CallOutcome, ExternalCall, resolve};
use p2p_energy_sim::sim::types::Role;
use p2p_energy_sim::sync::{self, HttpPeerLink, SyncService};
use p2p_energy_sim::telemetry;

fn load_config(opts: &CliOptions) -> anyhow::Result<NodeConfig> {
    let mut cfg = match (&opts.config, &opts.preset) {
        (Some(path), _) => NodeConfig::from_toml_file(path)?,
        (None, Some(name)) => NodeConfig::from_preset(name)?,
        (None, None) => NodeConfig::default(),
    };
    opts.apply(&mut cfg);
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();

    let opts = cli::parse_args().map_err(anyhow::Error::msg)?;
    if opts.help {
        cli::print_usage();
        return Ok(());
    }

    let cfg = load_config(&opts)?;
    let errors = cfg.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!("{e}");
        }
        return Err(SimError::Config(errors).into());
    }

    // Demand data; an empty sequence is a configuration error.
    let filter = cfg.data_filter()?;
    let loaded = load_demand_csv(Path::new(&cfg.simulation.data_file), &filter);
    let records = resolve(ExternalCall::LoadDemand, CallOutcome::from_result(loaded))?
        .unwrap_or_default();
    if records.is_empty() {
        return Err(SimError::EmptyInput {
            household: cfg.simulation.household.clone(),
        }
        .into());
    }

    info!(
        role = %cfg.node.role,
        node_id = %cfg.node.node_id,
        household = %cfg.simulation.household,
        start = %cfg.simulation.start_date,
        timescale = %cfg.simulation.timescale,
        speedup = cfg.simulation.speedup,
        "configuration loaded"
    );

    // Everything that can be rejected is built before the service starts.
    let battery = match cfg.node.role {
        Role::Prosumer => Some(cfg.build_battery()?),
        Role::Consumer => None,
    };

    // Sync service
    let service = Arc::new(SyncService::new());
    let addr = cfg.listen_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind sync service to {addr}"))?;
    let bound = listener.local_addr()?;

    let link = HttpPeerLink::new(
        &cfg.node.node_id,
        cfg.peer_url(),
        &cfg.status_url(bound),
        cfg.request_timeout(),
    )?;
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(sync::serve(Arc::clone(&service), listener, async move {
        stop_rx.await.ok();
    }));
    let standalone = link.is_standalone();
    if standalone {
        warn!("no peer configured, trading against the grid only");
    }

    let display = DisplayHandle::spawn(
        ConsoleDisplay::new(cfg.display.columns),
        cfg.display.queue_capacity,
    );
    let settings = EngineSettings {
        speedup: cfg.simulation.speedup,
        scaling: cfg.solar_scaling(),
        display_columns: cfg.display.columns,
    };

    let output = match battery {
        Some(battery) => {
            let sensor = MockSensor::new(cfg.sensor.seed);
            let mut engine = Engine::prosumer(settings, cfg.tariff(), battery, link, sensor)
                .with_display(display)
                .with_peer_completion(service.subscribe_completed());
            engine.run(&records, telemetry::shutdown_signal()).await
        }
        None => {
            let mut engine = Engine::consumer(settings, cfg.tariff(), link, FixedSensor::default())
                .with_display(display)
                .with_peer_completion(service.subscribe_completed());
            engine.run(&records, telemetry::shutdown_signal()).await
        }
    };

    // Keep serving until the counterpart has sent END as well.
    if !standalone && output.as_ref().is_ok_and(|o| !o.interrupted) && !service.is_completed() {
        info!(timeout = ?cfg.wait_for_peer(), "waiting for peer to finish");
        if !service.wait_completed(cfg.wait_for_peer()).await {
            warn!("peer did not finish in time");
        }
    }
    stop_tx.send(()).ok();
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "sync service stopped with an error"),
        Err(e) => warn!(error = %e, "sync service task failed"),
    }

    let output = output?;
    for r in &output.results {
        println!("{r}");
    }
    println!("{}", SettlementReport::from_results(&output.results));

    if let Some(path) = &opts.ledger_out {
        export_csv(&output.results, path)
            .with_context(|| format!("failed to write ledger to {}", path.display()))?;
        info!(path = %path.display(), rows = output.results.len(), "ledger exported");
    }

    if output.interrupted {
        warn!(steps = output.results.len(), "simulation interrupted");
    }
    Ok(())
}
