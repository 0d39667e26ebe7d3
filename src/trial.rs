// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Single eclipse attack trial.

use rand::prelude::*;

use crate::connection::{ConnectionError, ConnectionProcess, FormationParams, FormationState};
use crate::table::{AddressTable, TableGeometry};

/// Parameters of a single trial, jointly sampled from a [`crate::ParameterGrid`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrialParameters {
    /// Number of honest addresses known to the victim.
    pub honest: u64,
    /// Number of attacker addresses known to the victim.
    pub attackers: u64,
    /// Probability of churning an honest peer drawn from the tried table.
    pub churn: f64,
}

/// Terminal outcome of a trial.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrialOutcome {
    Eclipsed,
    Escaped,
}

impl TrialOutcome {
    pub const fn is_eclipsed(self) -> bool {
        matches!(self, Self::Eclipsed)
    }
}

/// Runs trials for a fixed table geometry and formation parameters.
#[derive(Clone, Copy, Debug)]
pub struct TrialRunner {
    geometry: TableGeometry,
    formation: FormationParams,
}

impl TrialRunner {
    pub const fn new(geometry: TableGeometry, formation: FormationParams) -> Self {
        Self {
            geometry,
            formation,
        }
    }

    /// Runs exactly one trial.
    ///
    /// Samples a fresh tried table and runs one connection formation process
    /// on it until the victim is either eclipsed or escapes.
    ///
    /// # Errors
    ///
    /// Propagates [`ConnectionError`] if the formation process hits its step cap.
    pub fn run(
        &self,
        trial: TrialParameters,
        rng: &mut impl Rng,
    ) -> Result<TrialOutcome, ConnectionError> {
        let table = AddressTable::sample(self.geometry, trial.attackers, trial.honest, rng);
        let process = ConnectionProcess::new(&table, trial.churn, self.formation);
        match process.run(rng)? {
            FormationState::Eclipsed => Ok(TrialOutcome::Eclipsed),
            FormationState::Escaped => Ok(TrialOutcome::Escaped),
            FormationState::Forming => unreachable!("formation process stopped while forming"),
        }
    }

    /// Runs `trials` trials with the same parameters and returns the eclipse rate.
    ///
    /// # Errors
    ///
    /// Propagates the first [`ConnectionError`] encountered.
    pub fn eclipse_rate(
        &self,
        trial: TrialParameters,
        trials: usize,
        rng: &mut impl Rng,
    ) -> Result<f64, ConnectionError> {
        let mut eclipsed = 0;
        for _ in 0..trials {
            if self.run(trial, rng)?.is_eclipsed() {
                eclipsed += 1;
            }
        }
        Ok(eclipsed as f64 / trials as f64)
    }

    pub const fn geometry(&self) -> TableGeometry {
        self.geometry
    }

    pub const fn formation(&self) -> FormationParams {
        self.formation
    }
}
