// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Eclipse attack simulations.
//!
//! Runs a Monte-Carlo sweep over honest address counts, attacker address counts
//! and churn rates, then writes the resulting eclipse counts to a file.
//! The configuration is read from an optional TOML file, see [`SimulationConfig`].
//!
//! Pressing Ctrl-C cancels the sweep between trials,
//! the rounds completed so far are still written out.

mod output;

use std::path::PathBuf;

use clap::Parser;
use color_eyre::Result;
use eclipse::logging::{self, LogStyle};
use eclipse::{SimulationConfig, Sweep};
use log::{info, warn};

use self::output::{OutputFormat, log_summary, write_surface};

/// Monte-Carlo simulation of eclipse attacks.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// TOML file to read the simulation configuration from.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Overrides the number of trials.
    #[arg(short, long)]
    trials: Option<usize>,
    /// Overrides the master seed.
    #[arg(short, long)]
    seed: Option<u64>,
    /// File to write the result surface to.
    #[arg(short, long, default_value = "data/output/simulations/eclipse.csv")]
    output: PathBuf,
    /// Format of the output file.
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Csv)]
    format: OutputFormat,
    /// Logs with timestamps and full module paths.
    #[arg(long)]
    full_log: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // enable fancy `color_eyre` error messages
    color_eyre::install()?;

    let args = Args::parse();
    let log_style = if args.full_log {
        LogStyle::Full
    } else {
        LogStyle::Compact
    };
    logging::enable_logforth(log_style);

    let mut config = match &args.config {
        Some(path) => SimulationConfig::from_file(path)?,
        None => SimulationConfig::default(),
    };
    if let Some(trials) = args.trials {
        config.trials = trials;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }

    let sweep = Sweep::new(&config)?;
    let cancel_token = sweep.get_cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("cancelling sweep");
            cancel_token.cancel();
        }
    });

    let report = tokio::task::spawn_blocking(move || sweep.run()).await??;
    log_summary(&report);

    write_surface(&report.surface, &args.output, args.format)?;
    info!("results written to {}", args.output.display());

    Ok(())
}
