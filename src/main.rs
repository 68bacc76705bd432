//! Thrips outbreak simulator command line.

mod analysis;
mod config;
mod engine;
mod error;
mod grid;
mod manager;
mod metrics;
mod model;
mod stats;
mod weather;

use crate::manager::Manager;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version, about)]
struct CLI {
    #[arg(long)]
    sim_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Create,

    Resume {
        #[arg(long)]
        run_idx: usize,
    },

    Analyze,

    Compare {
        #[arg(long)]
        run_idx: usize,
    },

    Capture {
        #[arg(long)]
        run_idx: usize,
    },

    Report {
        #[arg(long)]
        run_idx: usize,
    },

    Reset {
        #[arg(long)]
        run_idx: usize,
    },

    Clean,
}

fn main() {
    env_logger::Builder::new()
        .format_timestamp_millis()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    if let Err(error) = run_cli() {
        log::error!("{error:#?}");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<()> {
    let args = CLI::parse();
    log::info!("{args:#?}");

    let mgr = Manager::new(args.sim_dir).context("failed to construct mgr")?;

    match args.command {
        Command::Create => mgr.create_run()?,
        Command::Resume { run_idx } => mgr.resume_run(run_idx)?,
        Command::Analyze => mgr.analyze_sim()?,
        Command::Compare { run_idx } => mgr.compare_run(run_idx)?,
        Command::Capture { run_idx } => mgr.capture_run(run_idx)?,
        Command::Report { run_idx } => mgr.report_run(run_idx)?,
        Command::Reset { run_idx } => mgr.reset_run(run_idx)?,
        Command::Clean => mgr.clean_sim()?,
    }

    Ok(())
}
