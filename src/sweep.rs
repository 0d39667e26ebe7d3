// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Parameter sweep over honest counts, attacker counts and churn rates.
//!
//! Each round jointly samples one value from each axis of the [`ParameterGrid`],
//! runs one trial and records the outcome in the [`ResultSurface`].
//!
//! Rounds are split into fixed-size batches, which run in parallel via [`rayon`].
//! Every batch owns its own RNG, seeded from the master seed and the batch index.
//! Results are therefore identical for a given seed, independent of scheduling.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use log::{debug, info, warn};
use rand::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, SimulationConfig};
use crate::connection::ConnectionError;
use crate::trial::{TrialOutcome, TrialParameters, TrialRunner};

/// Errors that can occur while running a sweep.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("internal consistency error: {0}")]
    Connection(#[from] ConnectionError),
}

/// Churn probability, usable as an ordered map key.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChurnRate(f64);

impl ChurnRate {
    pub const fn new(rate: f64) -> Self {
        Self(rate)
    }

    pub const fn get(self) -> f64 {
        self.0
    }
}

impl PartialEq for ChurnRate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ChurnRate {}

impl PartialOrd for ChurnRate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChurnRate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Axes of the parameter sweep.
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterGrid {
    honest: Vec<u64>,
    attackers: Vec<u64>,
    churn: Vec<f64>,
}

impl ParameterGrid {
    /// Creates a new grid from the three axes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any axis is empty or a churn rate lies outside `[0, 1]`.
    pub fn new(
        honest: Vec<u64>,
        attackers: Vec<u64>,
        churn: Vec<f64>,
    ) -> Result<Self, ConfigError> {
        if honest.is_empty() {
            return Err(ConfigError::EmptyAxis("honest_counts"));
        }
        if attackers.is_empty() {
            return Err(ConfigError::EmptyAxis("attacker_counts"));
        }
        if churn.is_empty() {
            return Err(ConfigError::EmptyAxis("churn_rates"));
        }
        if let Some(rate) = churn.iter().find(|p| !(0.0..=1.0).contains(*p)) {
            return Err(ConfigError::ChurnOutOfRange(*rate));
        }
        Ok(Self {
            honest,
            attackers,
            churn,
        })
    }

    /// Jointly samples one value from each axis, independently and uniformly.
    pub fn sample(&self, rng: &mut impl Rng) -> TrialParameters {
        let honest = self.honest[rng.random_range(0..self.honest.len())];
        let churn = self.churn[rng.random_range(0..self.churn.len())];
        let attackers = self.attackers[rng.random_range(0..self.attackers.len())];
        TrialParameters {
            honest,
            attackers,
            churn,
        }
    }

    pub fn honest(&self) -> &[u64] {
        &self.honest
    }

    pub fn attackers(&self) -> &[u64] {
        &self.attackers
    }

    pub fn churn(&self) -> &[f64] {
        &self.churn
    }
}

/// Counters for one `(attackers, honest)` cell of a churn bucket.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellCounts {
    /// Number of rounds that sampled this cell.
    pub trials: u64,
    /// Number of those rounds that ended in an eclipse.
    pub eclipses: u64,
}

impl CellCounts {
    /// Empirical eclipse probability of this cell.
    pub fn probability(&self) -> f64 {
        if self.trials == 0 {
            0.0
        } else {
            self.eclipses as f64 / self.trials as f64
        }
    }
}

/// One flattened entry of a [`ResultSurface`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SurfaceRow {
    pub churn: f64,
    pub attackers: u64,
    pub honest: u64,
    pub trials: u64,
    pub eclipses: u64,
    pub probability: f64,
}

/// Per-churn-rate eclipse counts, keyed by `(attackers, honest)`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResultSurface {
    buckets: BTreeMap<ChurnRate, BTreeMap<(u64, u64), CellCounts>>,
}

impl ResultSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outcome of a single trial.
    ///
    /// Inserts a zeroed cell on first sight, then increments it.
    pub fn record(&mut self, trial: &TrialParameters, outcome: TrialOutcome) {
        let cell = self
            .buckets
            .entry(ChurnRate::new(trial.churn))
            .or_default()
            .entry((trial.attackers, trial.honest))
            .or_default();
        cell.trials += 1;
        if outcome.is_eclipsed() {
            cell.eclipses += 1;
        }
    }

    /// Adds all counts of `other` into `self`.
    pub fn merge(&mut self, other: ResultSurface) {
        for (churn, cells) in other.buckets {
            let bucket = self.buckets.entry(churn).or_default();
            for (key, counts) in cells {
                let cell = bucket.entry(key).or_default();
                cell.trials += counts.trials;
                cell.eclipses += counts.eclipses;
            }
        }
    }

    /// Returns the cells recorded for the given churn rate, if any.
    pub fn bucket(&self, churn: f64) -> Option<&BTreeMap<(u64, u64), CellCounts>> {
        self.buckets.get(&ChurnRate::new(churn))
    }

    /// Returns the counts for a single cell, zero if never sampled.
    pub fn get(&self, churn: f64, attackers: u64, honest: u64) -> CellCounts {
        self.bucket(churn)
            .and_then(|cells| cells.get(&(attackers, honest)))
            .copied()
            .unwrap_or_default()
    }

    /// Churn rates that were sampled at least once, in ascending order.
    pub fn churn_rates(&self) -> impl Iterator<Item = f64> + '_ {
        self.buckets.keys().map(|c| c.get())
    }

    /// Iterates over all recorded cells as `(churn, attackers, honest, counts)`.
    pub fn iter(&self) -> impl Iterator<Item = (f64, u64, u64, CellCounts)> + '_ {
        self.buckets.iter().flat_map(|(churn, cells)| {
            cells
                .iter()
                .map(|(&(attackers, honest), &counts)| (churn.get(), attackers, honest, counts))
        })
    }

    /// Flattens the surface into rows, sorted by churn, attackers and honest count.
    pub fn rows(&self) -> Vec<SurfaceRow> {
        self.iter()
            .map(|(churn, attackers, honest, counts)| SurfaceRow {
                churn,
                attackers,
                honest,
                trials: counts.trials,
                eclipses: counts.eclipses,
                probability: counts.probability(),
            })
            .collect()
    }

    /// Total number of recorded rounds.
    pub fn total_rounds(&self) -> u64 {
        self.iter().map(|(_, _, _, c)| c.trials).sum()
    }

    /// Total number of recorded eclipses for the given churn rate.
    pub fn total_eclipses(&self, churn: f64) -> u64 {
        self.bucket(churn)
            .map(|cells| cells.values().map(|c| c.eclipses).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Writes all rows of the surface as CSV, including a header line.
    ///
    /// # Errors
    ///
    /// Returns any error encountered while serializing or writing.
    pub fn write_csv<W: io::Write>(&self, writer: &mut csv::Writer<W>) -> csv::Result<()> {
        for row in self.rows() {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Result of running a sweep.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SweepReport {
    /// Aggregated counts of all completed rounds.
    pub surface: ResultSurface,
    /// Number of rounds that ran to completion.
    pub rounds: usize,
    /// Whether the sweep was cancelled before completing all rounds.
    pub cancelled: bool,
}

/// Monte-Carlo sweep over a [`ParameterGrid`].
pub struct Sweep {
    grid: ParameterGrid,
    runner: TrialRunner,
    trials: usize,
    batch_size: usize,
    seed: u64,
    cancel_token: CancellationToken,
}

impl Sweep {
    /// Creates a new sweep from a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::Config`] if the configuration is invalid.
    pub fn new(config: &SimulationConfig) -> Result<Self, SweepError> {
        config.validate()?;
        let runner = TrialRunner::new(config.geometry(), config.formation_params());
        Ok(Self {
            grid: config.grid()?,
            runner,
            trials: config.trials,
            batch_size: config.batch_size,
            seed: config.seed,
            cancel_token: CancellationToken::new(),
        })
    }

    /// Returns a token that cancels this sweep between trials.
    pub fn get_cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Runs all rounds of the sweep.
    ///
    /// If the sweep is cancelled, the report holds the rounds completed so far.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::Connection`] if any trial exceeds its step cap.
    pub fn run(&self) -> Result<SweepReport, SweepError> {
        let batches = self.trials.div_ceil(self.batch_size);
        info!(
            "running {} rounds in {batches} batches (seed={}, grid {}x{}x{})",
            self.trials,
            self.seed,
            self.grid.honest.len(),
            self.grid.attackers.len(),
            self.grid.churn.len(),
        );

        let completed = AtomicUsize::new(0);
        let partials = (0..batches)
            .into_par_iter()
            .map(|batch| self.run_batch(batch, &completed))
            .collect::<Result<Vec<_>, _>>()?;

        let mut surface = ResultSurface::new();
        let mut rounds = 0;
        for (batch_surface, batch_rounds) in partials {
            surface.merge(batch_surface);
            rounds += batch_rounds;
        }

        let cancelled = rounds < self.trials;
        if cancelled {
            warn!("sweep cancelled after {rounds}/{} rounds", self.trials);
        } else {
            info!("sweep finished after {rounds} rounds");
        }
        Ok(SweepReport {
            surface,
            rounds,
            cancelled,
        })
    }

    fn run_batch(
        &self,
        batch: usize,
        completed: &AtomicUsize,
    ) -> Result<(ResultSurface, usize), ConnectionError> {
        let mut rng = SmallRng::seed_from_u64(batch_seed(self.seed, batch));
        let start = batch * self.batch_size;
        let end = (start + self.batch_size).min(self.trials);
        let mut surface = ResultSurface::new();
        let mut rounds = 0;
        for _ in start..end {
            if self.cancel_token.is_cancelled() {
                break;
            }
            let trial = self.grid.sample(&mut rng);
            let outcome = self.runner.run(trial, &mut rng)?;
            surface.record(&trial, outcome);
            rounds += 1;
        }
        let done = completed.fetch_add(rounds, AtomicOrdering::Relaxed) + rounds;
        debug!("batch {batch} done ({done}/{} rounds)", self.trials);
        Ok((surface, rounds))
    }

    pub fn grid(&self) -> &ParameterGrid {
        &self.grid
    }

    pub fn runner(&self) -> &TrialRunner {
        &self.runner
    }
}

/// Derives the seed of a batch RNG from the master seed.
fn batch_seed(seed: u64, batch: usize) -> u64 {
    seed ^ (batch as u64 + 1).wrapping_mul(0x9e37_79b9_7f4a_7c15)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> SimulationConfig {
        SimulationConfig {
            trials: 2_000,
            batch_size: 300,
            churn_rates: vec![0.8, 0.2],
            attacker_counts: vec![0, 1_200, 30_000],
            honest_counts: vec![0, 1_000, 2_500],
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn grid_rejects_bad_axes() {
        assert!(matches!(
            ParameterGrid::new(vec![], vec![1], vec![0.5]),
            Err(ConfigError::EmptyAxis("honest_counts"))
        ));
        assert!(matches!(
            ParameterGrid::new(vec![1], vec![], vec![0.5]),
            Err(ConfigError::EmptyAxis("attacker_counts"))
        ));
        assert!(matches!(
            ParameterGrid::new(vec![1], vec![1], vec![]),
            Err(ConfigError::EmptyAxis("churn_rates"))
        ));
        assert!(matches!(
            ParameterGrid::new(vec![1], vec![1], vec![0.5, 1.5]),
            Err(ConfigError::ChurnOutOfRange(_))
        ));
        assert!(matches!(
            ParameterGrid::new(vec![1], vec![1], vec![f64::NAN]),
            Err(ConfigError::ChurnOutOfRange(_))
        ));
    }

    #[test]
    fn grid_samples_every_axis_value() {
        let grid = ParameterGrid::new(vec![0, 10, 20], vec![5, 6], vec![0.2, 0.4]).unwrap();
        let mut rng = SmallRng::seed_from_u64(30);
        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..1_000 {
            let t = grid.sample(&mut rng);
            assert!(grid.honest().contains(&t.honest));
            assert!(grid.attackers().contains(&t.attackers));
            assert!(grid.churn().contains(&t.churn));
            seen.insert((t.honest, t.attackers, ChurnRate::new(t.churn)));
        }
        assert_eq!(seen.len(), 3 * 2 * 2);
    }

    #[test]
    fn record_and_merge() {
        let trial = TrialParameters {
            honest: 10,
            attackers: 20,
            churn: 0.4,
        };
        let mut a = ResultSurface::new();
        a.record(&trial, TrialOutcome::Eclipsed);
        a.record(&trial, TrialOutcome::Escaped);
        let mut b = ResultSurface::new();
        b.record(&trial, TrialOutcome::Eclipsed);
        b.record(
            &TrialParameters {
                churn: 0.8,
                ..trial
            },
            TrialOutcome::Escaped,
        );
        a.merge(b);

        assert_eq!(
            a.get(0.4, 20, 10),
            CellCounts {
                trials: 3,
                eclipses: 2
            }
        );
        assert_eq!(a.get(0.8, 20, 10).eclipses, 0);
        assert_eq!(a.get(0.8, 20, 10).trials, 1);
        assert_eq!(a.get(0.6, 20, 10), CellCounts::default());
        assert_eq!(a.total_rounds(), 4);
        assert_eq!(a.total_eclipses(0.4), 2);
        assert_eq!(a.churn_rates().collect::<Vec<_>>(), vec![0.4, 0.8]);
        assert!((a.get(0.4, 20, 10).probability() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn csv_output() {
        let mut surface = ResultSurface::new();
        let trial = TrialParameters {
            honest: 1,
            attackers: 2,
            churn: 0.5,
        };
        surface.record(&trial, TrialOutcome::Eclipsed);
        surface.record(&trial, TrialOutcome::Escaped);
        let mut writer = csv::Writer::from_writer(vec![]);
        surface.write_csv(&mut writer).unwrap();
        let output = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let mut lines = output.lines();
        assert_eq!(
            lines.next(),
            Some("churn,attackers,honest,trials,eclipses,probability")
        );
        assert_eq!(lines.next(), Some("0.5,2,1,2,1,0.5"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn sweep_counts_every_round() {
        let sweep = Sweep::new(&small_config()).unwrap();
        let report = sweep.run().unwrap();
        assert!(!report.cancelled);
        assert_eq!(report.rounds, 2_000);
        assert_eq!(report.surface.total_rounds(), 2_000);
        for churn in [0.8, 0.2] {
            let bucket = report.surface.bucket(churn).unwrap();
            let rounds: u64 = bucket.values().map(|c| c.trials).sum();
            assert!(report.surface.total_eclipses(churn) <= rounds);
        }
    }

    #[test]
    fn sweep_is_deterministic() {
        let first = Sweep::new(&small_config()).unwrap().run().unwrap();
        let second = Sweep::new(&small_config()).unwrap().run().unwrap();
        assert_eq!(first, second);

        let other_seed = SimulationConfig {
            seed: 7,
            ..small_config()
        };
        let third = Sweep::new(&other_seed).unwrap().run().unwrap();
        assert_ne!(first.surface, third.surface);
    }

    #[test]
    fn cancelled_sweep() {
        let sweep = Sweep::new(&small_config()).unwrap();
        sweep.get_cancel_token().cancel();
        let report = sweep.run().unwrap();
        assert!(report.cancelled);
        assert_eq!(report.rounds, 0);
        assert!(report.surface.is_empty());
    }

    #[test]
    fn invalid_config_fails_fast() {
        let config = SimulationConfig {
            churn_rates: vec![-0.1],
            ..small_config()
        };
        assert!(matches!(Sweep::new(&config), Err(SweepError::Config(_))));
    }
}
