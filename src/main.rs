mod addressable;
mod age_weight;
mod config;
mod derived;
mod engine;
mod manager;
mod partition;
mod penalty;
mod process;
mod report;
mod selectivity;
mod table;

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
    Run {
        /// Parameter override, e.g. `process[mort].max_f=3.0`.
        #[arg(long = "set", value_parser = parse_override)]
        overrides: Vec<(String, f64)>,
    },

    Summary {
        #[arg(long)]
        run_idx: usize,
    },

    Clean,
}

fn parse_override(arg: &str) -> Result<(String, f64)> {
    let (path, value) = arg
        .rsplit_once('=')
        .context("override must be <parameter>=<value>")?;
    let value = value
        .trim()
        .parse()
        .with_context(|| format!("invalid override value {value:?}"))?;
    Ok((path.trim().to_string(), value))
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
        Command::Run { overrides } => mgr.run_model(&overrides)?,
        Command::Summary { run_idx } => mgr.summarize_run(run_idx)?,
        Command::Clean => mgr.clean_sim()?,
    }

    Ok(())
}
