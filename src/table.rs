// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Simulated tried table of a victim node.
//!
//! The table is a fixed grid of `buckets × slots` cells.
//! Each cell holds at most one address, classified as honest or attacker.
//! A table is populated once per trial by [`AddressTable::sample`] and is
//! read-only afterwards.

use rand::prelude::*;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;

/// Default number of buckets in the tried table.
pub const DEFAULT_BUCKETS: usize = 64;
/// Default number of slots per bucket in the tried table.
pub const DEFAULT_SLOTS: usize = 64;

const_assert_eq!(DEFAULT_BUCKETS * DEFAULT_SLOTS, 4096);

/// Classification of a single table cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AddressClass {
    /// Cell is unoccupied.
    #[default]
    Empty,
    /// Cell holds an address of an honest peer.
    Honest,
    /// Cell holds an address controlled by the adversary.
    Attacker,
}

impl AddressClass {
    /// Returns `true` iff the cell holds any address.
    pub const fn is_occupied(self) -> bool {
        !matches!(self, Self::Empty)
    }
}

/// Shape of the tried table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableGeometry {
    /// Number of buckets.
    pub buckets: usize,
    /// Number of slots in each bucket.
    pub slots: usize,
}

impl TableGeometry {
    /// Creates a new geometry with the given number of buckets and slots.
    pub const fn new(buckets: usize, slots: usize) -> Self {
        Self { buckets, slots }
    }

    /// Total number of cells in the table.
    pub const fn capacity(&self) -> usize {
        self.buckets * self.slots
    }

    /// Draws a uniformly random `(bucket, slot)` coordinate.
    pub fn random_coordinate(&self, rng: &mut impl Rng) -> (usize, usize) {
        let bucket = rng.random_range(0..self.buckets);
        let slot = rng.random_range(0..self.slots);
        (bucket, slot)
    }

    fn index(&self, bucket: usize, slot: usize) -> usize {
        debug_assert!(bucket < self.buckets && slot < self.slots);
        bucket * self.slots + slot
    }
}

impl Default for TableGeometry {
    fn default() -> Self {
        Self::new(DEFAULT_BUCKETS, DEFAULT_SLOTS)
    }
}

/// Tried table holding the victim's known addresses for a single trial.
#[derive(Clone, Debug)]
pub struct AddressTable {
    geometry: TableGeometry,
    cells: Vec<AddressClass>,
    occupied: usize,
}

impl AddressTable {
    /// Creates a new table with all cells empty.
    pub fn empty(geometry: TableGeometry) -> Self {
        Self {
            geometry,
            cells: vec![AddressClass::Empty; geometry.capacity()],
            occupied: 0,
        }
    }

    /// Samples a table given the number of attacker and honest addresses.
    ///
    /// Performs `max(attackers, honest)` placement attempts.
    /// Each attempt places an attacker address with probability `a / (a + h + C)`,
    /// an honest address with probability `h / (a + h + C)`, and nothing otherwise,
    /// where `C` is the table capacity.
    /// Placed addresses land on a uniformly random cell, overwriting whatever
    /// was there before. Hence, the table usually holds fewer than
    /// `max(attackers, honest)` addresses.
    pub fn sample(
        geometry: TableGeometry,
        attackers: u64,
        honest: u64,
        rng: &mut impl Rng,
    ) -> Self {
        let mut table = Self::empty(geometry);
        let total = (attackers + honest) as f64 + geometry.capacity() as f64;
        let p_attacker = attackers as f64 / total;
        let p_nonempty = p_attacker + honest as f64 / total;

        for _ in 0..attackers.max(honest) {
            let r: f64 = rng.random();
            let class = if r <= p_attacker {
                AddressClass::Attacker
            } else if r <= p_nonempty {
                AddressClass::Honest
            } else {
                continue;
            };
            let (bucket, slot) = geometry.random_coordinate(rng);
            table.insert(bucket, slot, class);
        }

        table
    }

    /// Places an address into the given cell, replacing any previous entry.
    pub fn insert(&mut self, bucket: usize, slot: usize, class: AddressClass) {
        let index = self.geometry.index(bucket, slot);
        let previous = std::mem::replace(&mut self.cells[index], class);
        match (previous.is_occupied(), class.is_occupied()) {
            (false, true) => self.occupied += 1,
            (true, false) => self.occupied -= 1,
            _ => {}
        }
    }

    /// Returns the class of the address stored at `(bucket, slot)`.
    pub fn get(&self, bucket: usize, slot: usize) -> AddressClass {
        self.cells[self.geometry.index(bucket, slot)]
    }

    /// Returns the class of a cell drawn uniformly from the full key space.
    ///
    /// Unoccupied cells are included, so the result may be [`AddressClass::Empty`].
    pub fn sample_any(&self, rng: &mut impl Rng) -> AddressClass {
        let (bucket, slot) = self.geometry.random_coordinate(rng);
        self.get(bucket, slot)
    }

    /// Returns the class of a cell drawn uniformly among occupied cells.
    ///
    /// Returns [`AddressClass::Empty`] if the table holds no address.
    pub fn sample_occupied(&self, rng: &mut impl Rng) -> AddressClass {
        if self.occupied == 0 {
            return AddressClass::Empty;
        }
        let nth = rng.random_range(0..self.occupied);
        self.cells
            .iter()
            .copied()
            .filter(|c| c.is_occupied())
            .nth(nth)
            .unwrap_or_default()
    }

    /// Number of occupied cells.
    pub const fn occupied(&self) -> usize {
        self.occupied
    }

    /// Number of cells holding an address of the given class.
    pub fn count(&self, class: AddressClass) -> usize {
        self.cells.iter().filter(|c| **c == class).count()
    }

    /// Fraction of occupied cells relative to `reference` cells.
    ///
    /// Usually `reference` is the table's own capacity.
    pub fn fill_fraction(&self, reference: usize) -> f64 {
        self.occupied as f64 / reference as f64
    }

    /// Geometry this table was created with.
    pub const fn geometry(&self) -> TableGeometry {
        self.geometry
    }
}
