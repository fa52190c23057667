use std::{path::PathBuf, process::ExitCode};

use clap::{ArgAction, Parser};
use lamport_relay::{
    sim::{Simulation, SimulationError},
    SimulationConfig, SimulationReport,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Runs a network of Lamport-clocked workers that talk through a central
/// router on loopback TCP.
#[derive(Debug, Parser)]
#[command(name = "lamport-relay", version)]
struct Args {
    /// TOML file to read settings from. Flags override it.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Workers in a random topology.
    #[arg(short, long)]
    nodes: Option<u16>,
    /// Messages each worker sends in a random topology.
    #[arg(short, long)]
    messages: Option<u32>,
    /// Upper bound for random send delays.
    #[arg(long)]
    max_delay_ms: Option<u64>,
    /// Router port; worker `i` listens on this plus `i`. 0 picks free ports.
    #[arg(short, long)]
    port_offset: Option<u16>,
    /// Seed for the random topology.
    #[arg(short, long)]
    seed: Option<u64>,
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    /// Instruction scripts, one worker each, named after the worker's id.
    scripts: Vec<PathBuf>,
}

impl Args {
    fn settings(&self) -> Result<SimulationConfig, SimulationError> {
        let mut config = match &self.config {
            Some(path) => SimulationConfig::load(path)?,
            None => SimulationConfig::default(),
        };
        if let Some(nodes) = self.nodes {
            config.nodes = nodes;
        }
        if let Some(messages) = self.messages {
            config.messages_per_node = messages;
        }
        if let Some(max_delay_ms) = self.max_delay_ms {
            config.max_delay_ms = max_delay_ms;
        }
        if let Some(port_offset) = self.port_offset {
            config.port_offset = port_offset;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if !self.scripts.is_empty() {
            config.scripts = self.scripts.clone();
        }
        Ok(config)
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn summarize(report: &SimulationReport) {
    let router = &report.router;
    info!(
        done = router.done,
        forwarded = router.forwarded,
        unroutable = router.unroutable,
        failed = router.failed_forwards,
        closed = router.closed,
        clock = router.clock,
        "router"
    );
    for worker in &report.workers {
        let (sent, failed) = worker
            .sends
            .map_or((0, 0), |s| (s.completed, s.failed));
        info!(
            peer = %worker.id,
            clock = worker.clock,
            received = worker.received.len(),
            sent,
            failed,
            "worker"
        );
    }
    info!(delivered = report.delivered(), "simulation finished");
}

async fn run(args: Args) -> Result<SimulationReport, SimulationError> {
    let sim = Simulation::from_config(args.settings()?)?;
    sim.run().await
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    tokio::select! {
        result = run(args) => match result {
            Ok(report) => {
                summarize(&report);
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(error = %e, "simulation failed");
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted");
            ExitCode::from(130)
        }
    }
}
