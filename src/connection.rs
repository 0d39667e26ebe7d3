// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Outgoing connection formation of the victim node.
//!
//! The victim repeatedly picks a source for its next outgoing connection:
//! either the tried table (see [`AddressTable`]) or the new pool.
//! The probability of picking the tried table is given by [`tried_probability`].
//! The new pool is modeled as entirely attacker-controlled, regardless of
//! the number of attacker addresses in the trial.
//!
//! Drawing an honest peer from the tried table either lets the victim churn it,
//! which ends the whole attempt as [`FormationState::Escaped`], or is retried
//! without consuming an outgoing slot.
//! Filling all outgoing slots ends the attempt as [`FormationState::Eclipsed`].

use rand::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::table::{AddressClass, AddressTable};

/// Default number of outgoing connections the victim tries to form.
pub const DEFAULT_TARGET_OUTGOING: usize = 8;
/// Default upper bound on steps within a single formation process.
///
/// Every step makes progress with probability at least 0.1,
/// so a trial takes a few dozen steps in expectation.
pub const DEFAULT_MAX_STEPS: u64 = 1_000_000;

/// Constant of the tried-vs-new selection heuristic.
const TRIED_BIAS: f64 = 9.0;

/// Errors that can abort a connection formation process.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("formation did not terminate within {steps} steps ({outgoing} outgoing formed)")]
    StepLimitExceeded { steps: u64, outgoing: usize },
}

/// Probability of choosing the tried table as source for the next connection.
///
/// `rho` is the fill fraction of the tried table, `omega` the number of
/// outgoing connections already formed.
pub fn tried_probability(rho: f64, omega: usize) -> f64 {
    let rho_freq = rho.sqrt() * (TRIED_BIAS - omega as f64);
    rho_freq / (1.0 + omega as f64 + rho_freq)
}

/// How a cell is picked from the tried table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriedSelection {
    /// Pick uniformly from all cells, including empty ones.
    #[default]
    AnyCell,
    /// Pick uniformly among occupied cells only.
    OccupiedOnly,
}

impl TriedSelection {
    fn select(self, table: &AddressTable, rng: &mut impl Rng) -> AddressClass {
        match self {
            Self::AnyCell => table.sample_any(rng),
            Self::OccupiedOnly => table.sample_occupied(rng),
        }
    }
}

/// State of a connection formation process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FormationState {
    /// Still forming outgoing connections.
    Forming,
    /// All outgoing connections go to the adversary.
    Eclipsed,
    /// Victim churned an honest peer and escaped the attack.
    Escaped,
}

impl FormationState {
    /// Returns `true` iff the state is `Eclipsed` or `Escaped`.
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Forming)
    }
}

/// Result of a single step of the formation process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Formed a connection to an address from the tried table.
    TriedConnected(AddressClass),
    /// Formed a connection to an address from the new pool.
    NewConnected,
    /// Drew an honest peer which was not churned, no slot consumed.
    HonestRetained,
    /// Drew an honest peer and churned it.
    HonestChurned,
}

/// Mutable counters of one formation process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectionState {
    /// Number of outgoing connections formed so far.
    pub outgoing: usize,
    /// Number of steps taken so far.
    pub steps: u64,
}

/// Parameters shared by all formation processes of a sweep.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FormationParams {
    /// Number of outgoing connections needed to eclipse the victim.
    pub target_outgoing: usize,
    /// Safety cap on the number of steps.
    pub max_steps: u64,
    /// Number of cells the table fill is measured against.
    pub fill_reference: usize,
    /// How cells are picked from the tried table.
    pub selection: TriedSelection,
}

/// Connection formation process for one trial.
pub struct ConnectionProcess<'a> {
    table: &'a AddressTable,
    churn: f64,
    params: FormationParams,
    rho: f64,
    state: FormationState,
    counters: ConnectionState,
}

impl<'a> ConnectionProcess<'a> {
    /// Creates a new process in state [`FormationState::Forming`].
    ///
    /// `churn` is the probability of churning an honest peer drawn from `table`.
    pub fn new(table: &'a AddressTable, churn: f64, params: FormationParams) -> Self {
        // table is read-only for the whole process, so its fill is fixed
        let rho = table.fill_fraction(params.fill_reference);
        let mut process = Self {
            table,
            churn,
            params,
            rho,
            state: FormationState::Forming,
            counters: ConnectionState::default(),
        };
        process.check_target();
        process
    }

    /// Runs the process until it reaches a terminal state.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::StepLimitExceeded`] if the step cap is hit.
    pub fn run(mut self, rng: &mut impl Rng) -> Result<FormationState, ConnectionError> {
        while !self.state.is_terminal() {
            self.step(rng)?;
        }
        Ok(self.state)
    }

    /// Executes a single step of the process.
    ///
    /// Returns `None` if the process is already in a terminal state.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::StepLimitExceeded`] if the step cap is hit.
    pub fn step(&mut self, rng: &mut impl Rng) -> Result<Option<StepOutcome>, ConnectionError> {
        if self.state.is_terminal() {
            return Ok(None);
        }
        if self.counters.steps >= self.params.max_steps {
            return Err(ConnectionError::StepLimitExceeded {
                steps: self.counters.steps,
                outgoing: self.counters.outgoing,
            });
        }
        self.counters.steps += 1;

        let p_tried = tried_probability(self.rho, self.counters.outgoing);
        let outcome = if rng.random::<f64>() <= p_tried {
            match self.params.selection.select(self.table, rng) {
                AddressClass::Honest if rng.random::<f64>() <= self.churn => {
                    StepOutcome::HonestChurned
                }
                AddressClass::Honest => StepOutcome::HonestRetained,
                class => StepOutcome::TriedConnected(class),
            }
        } else {
            StepOutcome::NewConnected
        };

        match outcome {
            StepOutcome::HonestChurned => self.state = FormationState::Escaped,
            // Forming -> Forming
            StepOutcome::HonestRetained => {}
            StepOutcome::TriedConnected(_) | StepOutcome::NewConnected => {
                self.counters.outgoing += 1;
                self.check_target();
            }
        }
        Ok(Some(outcome))
    }

    fn check_target(&mut self) {
        if self.counters.outgoing >= self.params.target_outgoing {
            self.state = FormationState::Eclipsed;
        }
    }

    /// Current state of the process.
    pub const fn state(&self) -> FormationState {
        self.state
    }

    /// Current counters of the process.
    pub const fn counters(&self) -> ConnectionState {
        self.counters
    }

    /// Fill fraction of the tried table used by this process.
    pub const fn rho(&self) -> f64 {
        self.rho
    }
}
