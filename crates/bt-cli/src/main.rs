//! bt-sim: runs behavior tree agents headless.
//!
//! Loads an engine config, starts the guard demo on every agent and ticks
//! them for a fixed number of frames:
//! - `bt-sim --ticks 600 --agents 8` runs a longer simulation
//! - `bt-sim --trace-out trace.json` dumps agent 0's engine trace

mod demo;

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use bt_core::TickContext;
use bt_engine::{BehaviorTreeComponent, EngineConfig};
use bt_tools::TraceLog;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use demo::SimWorld;

#[derive(Parser)]
#[command(name = "bt-sim")]
#[command(about = "Run behavior tree agents headless", version)]
struct Cli {
    /// Engine config (YAML); defaults are used when the file is missing
    #[arg(short, long, default_value = "bt-sim.yaml")]
    config: PathBuf,

    /// Number of frames to simulate
    #[arg(short, long, default_value_t = 200)]
    ticks: u64,

    /// Number of agents
    #[arg(short, long, default_value_t = 4)]
    agents: u64,

    /// Seconds per frame
    #[arg(long, default_value_t = 0.1)]
    dt: f32,

    /// Write agent 0's trace events as JSON
    #[arg(long)]
    trace_out: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    fmt().with_env_filter(filter).with_target(false).init();

    let mut config = EngineConfig::load_or_default(&cli.config)?;
    if config.default_tree.is_none() {
        config.default_tree = Some(demo::GUARD.to_string());
    }
    tracing::info!(
        config = %cli.config.display(),
        tree = ?config.default_tree,
        mode = ?config.execution_mode,
        "Loaded engine config"
    );

    let trees = Rc::new(demo::tree_manager(config.service));
    let trace = Rc::new(RefCell::new(TraceLog::default()));
    let mut world = SimWorld::new(config.seed);

    let mut agents: Vec<BehaviorTreeComponent<SimWorld>> = (0..cli.agents)
        .map(|agent| {
            let comp = BehaviorTreeComponent::<SimWorld>::new(agent, trees.clone(), config.clone());
            if agent == 0 {
                comp.with_trace(trace.clone())
            } else {
                comp
            }
        })
        .collect();

    for comp in &mut agents {
        if !comp.start_logic(&mut world) {
            bail!("agent {} could not start {:?}", comp.agent(), config.default_tree);
        }
    }

    for tick in 0..cli.ticks {
        let ctx = TickContext::new(tick, cli.dt).with_seed(config.seed);
        for comp in &mut agents {
            comp.tick(&ctx, &mut world);
        }
    }

    let stats = world.stats;
    tracing::info!(
        ticks = cli.ticks,
        agents = cli.agents,
        patrol_legs = stats.patrol_legs,
        escapes = stats.escapes,
        alarms = stats.alarms,
        "Simulation finished"
    );

    for comp in &agents {
        println!(
            "agent {}: task {} | trees {}",
            comp.agent(),
            comp.describe_active_tasks(),
            comp.describe_active_trees()
        );
        if cli.verbose {
            print!("{}", comp.debug_info_string());
        }
    }
    println!(
        "patrol legs: {}, escapes: {}, alarms: {}, tree builds: {}",
        stats.patrol_legs,
        stats.escapes,
        stats.alarms,
        trees.build_count()
    );

    if let Some(path) = cli.trace_out {
        let json = serde_json::to_string_pretty(&*trace.borrow()).context("Failed to serialize trace")?;
        std::fs::write(&path, json).with_context(|| format!("Failed to write trace to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Wrote trace");
    }

    Ok(())
}
