// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Eclipse: Monte-Carlo estimation of eclipse attack success
//!
//! Simulates a victim node forming its outgoing connections from a two-table
//! (tried vs. new) address manager, while an adversary floods it with addresses.
//! The victim is eclipsed if all of its outgoing connections go to the adversary.
//!
//! The crate is organized bottom-up:
//! - [`table`]: the victim's tried table and how it gets populated.
//! - [`connection`]: the tried/new selection and churn process for outgoing connections.
//! - [`trial`]: a single trial combining the two.
//! - [`sweep`]: many trials over a grid of parameters, aggregated into a [`ResultSurface`].

#![deny(rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod connection;
pub mod logging;
pub mod sweep;
pub mod table;
pub mod trial;

pub use self::config::{ConfigError, SimulationConfig};
pub use self::connection::{
    ConnectionError, ConnectionProcess, FormationParams, FormationState, TriedSelection,
    tried_probability,
};
pub use self::sweep::{
    CellCounts, ParameterGrid, ResultSurface, SurfaceRow, Sweep, SweepError, SweepReport,
};
pub use self::table::{AddressClass, AddressTable, TableGeometry};
pub use self::trial::{TrialOutcome, TrialParameters, TrialRunner};
