// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Output of simulation results.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use clap::ValueEnum;
use color_eyre::Result;
use eclipse::{ResultSurface, SweepReport};
use log::info;

/// File format for the result surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Csv,
    Json,
}

/// Writes all rows of `surface` to `path`, creating parent directories as needed.
pub fn write_surface(surface: &ResultSurface, path: &Path, format: OutputFormat) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match format {
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_path(path)?;
            surface.write_csv(&mut writer)?;
        }
        OutputFormat::Json => {
            let writer = BufWriter::new(File::create(path)?);
            serde_json::to_writer_pretty(writer, &surface.rows())?;
        }
    }
    Ok(())
}

/// Logs the overall eclipse rate for each churn rate.
pub fn log_summary(report: &SweepReport) {
    info!("completed {} rounds", report.rounds);
    for churn in report.surface.churn_rates() {
        let Some(cells) = report.surface.bucket(churn) else {
            continue;
        };
        let rounds: u64 = cells.values().map(|c| c.trials).sum();
        let eclipses = report.surface.total_eclipses(churn);
        info!(
            "p={:>3}%: {eclipses}/{rounds} eclipsed over {} cells",
            (churn * 100.0).round(),
            cells.len(),
        );
    }
}
