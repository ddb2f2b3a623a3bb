use std::env;
use std::path::PathBuf;

use crate::config::NodeConfig;
use crate::sim::types::Role;

/// Command-line options; every override is applied on top of the config.
#[derive(Debug, Default)]
pub struct CliOptions {
    pub config: Option<PathBuf>,
    pub preset: Option<String>,
    pub role: Option<Role>,
    pub data: Option<String>,
    pub household: Option<String>,
    pub start_date: Option<String>,
    pub timescale: Option<String>,
    pub speed: Option<f64>,
    pub listen: Option<String>,
    pub peer_url: Option<String>,
    pub ledger_out: Option<PathBuf>,
    pub help: bool,
}

pub fn parse_args() -> Result<CliOptions, String> {
    let args: Vec<String> = env::args().skip(1).collect();
    parse_args_from(args)
}

pub fn parse_args_from(args: Vec<String>) -> Result<CliOptions, String> {
    let mut opts = CliOptions::default();
    let mut i = 0usize;

    while i < args.len() {
        let flag = args[i].as_str();
        if flag == "--help" || flag == "-h" {
            opts.help = true;
            i += 1;
            continue;
        }
        i += 1;
        let value = args.next_or_err(i, &format!("missing value for {flag}"))?;
        match flag {
            "--config" => set_once(&mut opts.config, flag, PathBuf::from(value))?,
            "--preset" => set_once(&mut opts.preset, flag, value.to_string())?,
            "--role" => set_once(&mut opts.role, flag, value.parse::<Role>()?)?,
            "--data" => set_once(&mut opts.data, flag, value.to_string())?,
            "--household" => set_once(&mut opts.household, flag, value.to_string())?,
            "--start-date" => set_once(&mut opts.start_date, flag, value.to_string())?,
            "--timescale" => set_once(&mut opts.timescale, flag, value.to_string())?,
            "--speed" => {
                let speed = value
                    .parse::<f64>()
                    .map_err(|_| format!("invalid value for --speed: \"{value}\""))?;
                set_once(&mut opts.speed, flag, speed)?;
            }
            "--listen" => set_once(&mut opts.listen, flag, value.to_string())?,
            "--peer-url" => set_once(&mut opts.peer_url, flag, value.to_string())?,
            "--ledger-out" => set_once(&mut opts.ledger_out, flag, PathBuf::from(value))?,
            other => return Err(format!("unknown argument: {other}")),
        }
        i += 1;
    }

    if opts.config.is_some() && opts.preset.is_some() {
        return Err(
            "arguments `--config` and `--preset` are mutually exclusive; choose one source"
                .to_string(),
        );
    }

    Ok(opts)
}

fn set_once<T>(slot: &mut Option<T>, flag: &str, value: T) -> Result<(), String> {
    if slot.replace(value).is_some() {
        return Err(format!("{flag} provided more than once"));
    }
    Ok(())
}

impl CliOptions {
    /// Applies the command-line overrides to `cfg`.
    pub fn apply(&self, cfg: &mut NodeConfig) {
        if let Some(role) = self.role {
            cfg.node.role = role;
            cfg.node.node_id = role.to_string();
        }
        let sim = &mut cfg.simulation;
        for (slot, value) in [
            (&mut sim.data_file, &self.data),
            (&mut sim.household, &self.household),
            (&mut sim.start_date, &self.start_date),
            (&mut sim.timescale, &self.timescale),
            (&mut cfg.node.listen, &self.listen),
            (&mut cfg.node.peer_url, &self.peer_url),
        ] {
            if let Some(v) = value {
                slot.clone_from(v);
            }
        }
        if let Some(speed) = self.speed {
            cfg.simulation.speedup = speed;
        }
    }
}

trait SliceArgExt {
    fn next_or_err(&self, index: usize, err: &str) -> Result<&str, String>;
}

impl SliceArgExt for [String] {
    fn next_or_err(&self, index: usize, err: &str) -> Result<&str, String> {
        self.get(index)
            .map(String::as_str)
            .ok_or_else(|| err.to_string())
    }
}

pub fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  p2p-energy-sim [--config <path> | --preset <prosumer|consumer>] [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --role <prosumer|consumer>   household role");
    eprintln!("  --data <path>                half-hourly demand CSV");
    eprintln!("  --household <id>             LCLid to replay");
    eprintln!("  --start-date <YYYY-MM-DD>    first day to replay");
    eprintln!("  --timescale <d|w|m|y>        replay window");
    eprintln!("  --speed <factor>             simulation speedup");
    eprintln!("  --listen <addr:port>         sync service address");
    eprintln!("  --peer-url <url>             counterpart sync service (empty: standalone)");
    eprintln!("  --ledger-out <path>          write the settlement ledger as CSV");
}
