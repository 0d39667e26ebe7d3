// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Logging setup based on [`logforth`].
//!
//! Log lines go to stderr, filtered via `RUST_LOG`.
//! Without `RUST_LOG`, this crate and the simulation binary log at `debug`,
//! everything else at `info`.

use logforth::color::LevelColor;
use logforth::filter::EnvFilter;
use logforth::{Layout, append};

const DEFAULT_FILTER: &str = "eclipse=debug,simulations=debug,info";

/// Style of the log lines written to stderr.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogStyle {
    /// Colored level, innermost module and message.
    #[default]
    Compact,
    /// Default logforth layout, including timestamps and full targets.
    Full,
}

#[derive(Clone, Copy, Debug)]
struct CompactLayout;

impl Layout for CompactLayout {
    fn format(
        &self,
        record: &log::Record,
        _: &[Box<dyn logforth::Diagnostic>],
    ) -> anyhow::Result<Vec<u8>> {
        let colors = LevelColor::default();
        let level = colors.colorize_record_level(false, record.level());
        let module = record
            .module_path()
            .and_then(|path| path.rsplit("::").next())
            .unwrap_or("?");
        let message = record.args();
        Ok(format!("{level:>5} [{module}] {message}").into_bytes())
    }
}

/// Installs the global logger with the given style.
///
/// Must be called at most once per process.
pub fn enable_logforth(style: LogStyle) {
    match style {
        LogStyle::Compact => install(append::Stderr::default().with_layout(CompactLayout)),
        LogStyle::Full => install(append::Stderr::default()),
    }
}

fn install<A: logforth::Append>(to_append: A) {
    let filter = EnvFilter::from_default_env_or(DEFAULT_FILTER);
    logforth::builder()
        .dispatch(|d| d.filter(filter).append(to_append))
        .apply();
}
