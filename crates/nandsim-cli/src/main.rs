//! nandsim trace driver.

mod trace;
mod workload;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use nandsim_core::{CoreError, Simulation};
use nandsim_device::SimConfig;

use trace::TraceOp;
use workload::Pattern;

#[derive(Parser)]
#[command(name = "nandsim", about = "Discrete-event NAND flash simulator")]
struct Cli {
    /// Configuration file (TOML or JSON); defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a trace file against the simulator.
    Run {
        /// Trace file: one `R/W/T <addr>` per line.
        trace: PathBuf,
    },
    /// Drive a generated workload.
    Synth {
        /// Number of operations to generate.
        #[arg(long, default_value_t = 10_000)]
        ops: u64,
        /// Workload shape.
        #[arg(long, value_enum, default_value_t = Pattern::Mixed)]
        pattern: Pattern,
        /// RNG seed.
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Fraction of operations that trim a page.
        #[arg(long, default_value_t = 0.02)]
        trim_ratio: f64,
    },
}

/// Driver-level counters, reported alongside the simulator's own.
#[derive(Debug, Default)]
struct DriveStats {
    ops: u64,
    unmapped_reads: u64,
    rejected_writes: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => SimConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SimConfig::default(),
    };
    tracing::info!(
        blocks = config.geometry.num_blocks(),
        pages = config.geometry.total_pages(),
        "simulator starting"
    );

    let mut sim = Simulation::new(config.clone())?;
    let ops = match cli.command {
        Command::Run { trace } => {
            let contents = std::fs::read_to_string(&trace)
                .with_context(|| format!("reading trace {}", trace.display()))?;
            trace::parse(&contents)?
        }
        Command::Synth {
            ops,
            pattern,
            seed,
            trim_ratio,
        } => workload::generate(pattern, ops, config.geometry.total_pages(), seed, trim_ratio),
    };

    let stats = drive(&mut sim, &ops)?;
    sim.run_to_quiesce()?;

    let report = json!({
        "driver": {
            "ops": stats.ops,
            "unmapped_reads": stats.unmapped_reads,
            "rejected_writes": stats.rejected_writes,
        },
        "simulator": sim.report(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Applies a trace, reclaiming space once and retrying when a write finds
/// no capacity.
fn drive(sim: &mut Simulation, ops: &[TraceOp]) -> Result<DriveStats> {
    let mut stats = DriveStats::default();
    for &op in ops {
        stats.ops += 1;
        match op {
            TraceOp::Read(addr) => match sim.read(addr) {
                Ok(_) => {}
                Err(CoreError::UnmappedRead { .. }) => stats.unmapped_reads += 1,
                Err(other) => return Err(other.into()),
            },
            TraceOp::Write(addr, payload) => match sim.write(addr, payload) {
                Ok(()) => {}
                Err(CoreError::NoFreeCapacity | CoreError::NoFreeBlock { .. }) => {
                    sim.trigger_gc()?;
                    sim.run_to_quiesce()?;
                    match sim.write(addr, payload) {
                        Ok(()) => {}
                        Err(CoreError::NoFreeCapacity | CoreError::NoFreeBlock { .. }) => {
                            stats.rejected_writes += 1;
                            tracing::warn!(addr, "write rejected, device full");
                        }
                        Err(other) => return Err(other.into()),
                    }
                }
                Err(other) => return Err(other.into()),
            },
            TraceOp::Trim(addr) => match sim.trim(addr) {
                Ok(()) => {}
                Err(other) => return Err(other.into()),
            },
        }
    }
    Ok(stats)
}
