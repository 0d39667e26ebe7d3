// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Static configuration of a simulation run.
//!
//! All values are fixed at the start of a run.
//! A configuration can be loaded from a TOML file, missing keys take their defaults:
//!
//! ```toml
//! trials = 10000
//! seed = 420
//! churn_rates = [0.8, 0.6, 0.4, 0.2]
//! buckets = 64
//! slots = 64
//! target_outgoing = 8
//! tried_selection = "any_cell"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::connection::{
    DEFAULT_MAX_STEPS, DEFAULT_TARGET_OUTGOING, FormationParams, TriedSelection,
};
use crate::sweep::ParameterGrid;
use crate::table::{DEFAULT_BUCKETS, DEFAULT_SLOTS, TableGeometry};

/// Errors in the simulation configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("axis `{0}` must contain at least one value")]
    EmptyAxis(&'static str),
    #[error("churn rate {0} is outside of [0, 1]")]
    ChurnOutOfRange(f64),
    #[error("table must have at least one cell ({buckets} buckets x {slots} slots)")]
    EmptyTable { buckets: usize, slots: usize },
    #[error("outgoing target {target} must be smaller than table capacity {capacity}")]
    TargetTooLarge { target: usize, capacity: usize },
    #[error("fill reference {reference} is smaller than table capacity {capacity}")]
    FillReferenceTooSmall { reference: usize, capacity: usize },
    #[error("number of trials must be positive")]
    ZeroTrials,
    #[error("batch size must be positive")]
    ZeroBatchSize,
    #[error("step limit must be positive")]
    ZeroStepLimit,
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
}

/// Configuration of a full parameter sweep.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Number of rounds, each running one trial.
    pub trials: usize,
    /// Master seed of the pseudo-random generators.
    pub seed: u64,
    /// Churn probabilities to sweep over.
    pub churn_rates: Vec<f64>,
    /// Numbers of attacker addresses to sweep over.
    pub attacker_counts: Vec<u64>,
    /// Numbers of honest addresses to sweep over.
    pub honest_counts: Vec<u64>,
    /// Number of buckets in the tried table.
    pub buckets: usize,
    /// Number of slots per bucket in the tried table.
    pub slots: usize,
    /// Number of outgoing connections the victim forms.
    pub target_outgoing: usize,
    /// Safety cap on steps of a single connection formation process.
    pub max_steps_per_trial: u64,
    /// Number of cells the table fill is measured against, defaults to the table capacity.
    pub fill_reference: Option<usize>,
    /// How addresses are picked from the tried table.
    pub tried_selection: TriedSelection,
    /// Number of rounds per independently seeded batch.
    pub batch_size: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            trials: 10_000,
            seed: 420,
            churn_rates: vec![0.8, 0.6, 0.4, 0.2],
            attacker_counts: evenly_spaced(30_000, 26),
            honest_counts: evenly_spaced(2_500, 20),
            buckets: DEFAULT_BUCKETS,
            slots: DEFAULT_SLOTS,
            target_outgoing: DEFAULT_TARGET_OUTGOING,
            max_steps_per_trial: DEFAULT_MAX_STEPS,
            fill_reference: None,
            tried_selection: TriedSelection::default(),
            batch_size: 1_000,
        }
    }
}

impl SimulationConfig {
    /// Parses a configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Reads and parses a configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Checks all parameters, failing on the first invalid one.
    ///
    /// Values are never clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trials == 0 {
            return Err(ConfigError::ZeroTrials);
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.max_steps_per_trial == 0 {
            return Err(ConfigError::ZeroStepLimit);
        }
        let capacity = self.geometry().capacity();
        if capacity == 0 {
            return Err(ConfigError::EmptyTable {
                buckets: self.buckets,
                slots: self.slots,
            });
        }
        if self.target_outgoing >= capacity {
            return Err(ConfigError::TargetTooLarge {
                target: self.target_outgoing,
                capacity,
            });
        }
        if let Some(reference) = self.fill_reference
            && reference < capacity
        {
            return Err(ConfigError::FillReferenceTooSmall {
                reference,
                capacity,
            });
        }
        self.grid().map(|_| ())
    }

    /// Builds the parameter grid from the configured axes.
    pub fn grid(&self) -> Result<ParameterGrid, ConfigError> {
        ParameterGrid::new(
            self.honest_counts.clone(),
            self.attacker_counts.clone(),
            self.churn_rates.clone(),
        )
    }

    pub const fn geometry(&self) -> TableGeometry {
        TableGeometry::new(self.buckets, self.slots)
    }

    pub fn formation_params(&self) -> FormationParams {
        FormationParams {
            target_outgoing: self.target_outgoing,
            max_steps: self.max_steps_per_trial,
            fill_reference: self
                .fill_reference
                .unwrap_or_else(|| self.geometry().capacity()),
            selection: self.tried_selection,
        }
    }
}

/// Returns `points` evenly spaced integers from `0` to `max`, both inclusive.
fn evenly_spaced(max: u64, points: u64) -> Vec<u64> {
    if points < 2 {
        return vec![0; points as usize];
    }
    (0..points)
        .map(|i| (max as f64 * i as f64 / (points - 1) as f64).round() as u64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SimulationConfig::default();
        config.validate().unwrap();
        assert_eq!(config.attacker_counts.len(), 26);
        assert_eq!(config.attacker_counts[0], 0);
        assert_eq!(config.attacker_counts[1], 1_200);
        assert_eq!(config.attacker_counts[25], 30_000);
        assert_eq!(config.honest_counts.len(), 20);
        assert_eq!(config.honest_counts[0], 0);
        assert_eq!(config.honest_counts[19], 2_500);
        assert_eq!(config.geometry().capacity(), 4096);
        assert_eq!(config.formation_params().fill_reference, 4096);
    }

    #[test]
    fn parse_toml() {
        let config = SimulationConfig::from_toml_str(
            r#"
            trials = 500
            seed = 1
            churn_rates = [1.0, 0.5]
            attacker_counts = [0, 100]
            honest_counts = [10]
            fill_reference = 16384
            tried_selection = "occupied_only"
            "#,
        )
        .unwrap();
        assert_eq!(config.trials, 500);
        assert_eq!(config.churn_rates, vec![1.0, 0.5]);
        assert_eq!(config.buckets, DEFAULT_BUCKETS);
        assert_eq!(config.tried_selection, TriedSelection::OccupiedOnly);
        assert_eq!(config.formation_params().fill_reference, 16_384);
        config.validate().unwrap();
    }

    #[test]
    fn parse_errors() {
        assert!(matches!(
            SimulationConfig::from_toml_str("attacker_counts = [-1]"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            SimulationConfig::from_toml_str("unknown_key = 3"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            SimulationConfig::from_file("does/not/exist.toml"),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn invalid_values() {
        let base = SimulationConfig::default();
        let cases = [
            SimulationConfig {
                trials: 0,
                ..base.clone()
            },
            SimulationConfig {
                batch_size: 0,
                ..base.clone()
            },
            SimulationConfig {
                max_steps_per_trial: 0,
                ..base.clone()
            },
            SimulationConfig {
                buckets: 0,
                ..base.clone()
            },
            SimulationConfig {
                target_outgoing: 4096,
                ..base.clone()
            },
            SimulationConfig {
                fill_reference: Some(100),
                ..base.clone()
            },
            SimulationConfig {
                churn_rates: vec![0.5, 1.01],
                ..base.clone()
            },
            SimulationConfig {
                honest_counts: vec![],
                ..base.clone()
            },
        ];
        for config in cases {
            assert!(config.validate().is_err(), "{config:?}");
        }
        assert!(matches!(
            SimulationConfig {
                target_outgoing: 5000,
                ..base
            }
            .validate(),
            Err(ConfigError::TargetTooLarge {
                target: 5000,
                capacity: 4096
            })
        ));
    }

    #[test]
    fn spacing() {
        assert_eq!(evenly_spaced(10, 0), Vec::<u64>::new());
        assert_eq!(evenly_spaced(10, 1), vec![0]);
        assert_eq!(evenly_spaced(10, 3), vec![0, 5, 10]);
    }
}
