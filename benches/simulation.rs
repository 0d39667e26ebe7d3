// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

use divan::counter::ItemsCount;
use eclipse::connection::{DEFAULT_MAX_STEPS, DEFAULT_TARGET_OUTGOING};
use eclipse::{
    AddressTable, FormationParams, ParameterGrid, TableGeometry, TriedSelection,
    TrialParameters, TrialRunner,
};
use rand::prelude::*;

fn main() {
    // run registered benchmarks.
    divan::main();
}

fn runner() -> TrialRunner {
    let geometry = TableGeometry::default();
    TrialRunner::new(
        geometry,
        FormationParams {
            target_outgoing: DEFAULT_TARGET_OUTGOING,
            max_steps: DEFAULT_MAX_STEPS,
            fill_reference: geometry.capacity(),
            selection: TriedSelection::AnyCell,
        },
    )
}

#[divan::bench(args = [0, 2_500, 30_000])]
fn sample_table(bencher: divan::Bencher, attackers: u64) {
    let geometry = TableGeometry::default();
    let mut rng = SmallRng::seed_from_u64(0);
    bencher
        .counter(ItemsCount::new(1_usize))
        .bench_local(|| AddressTable::sample(geometry, attackers, 2_500, &mut rng));
}

#[divan::bench(args = [0.2, 0.8])]
fn single_trial(bencher: divan::Bencher, churn: f64) {
    let runner = runner();
    let trial = TrialParameters {
        honest: 2_500,
        attackers: 30_000,
        churn,
    };
    let mut rng = SmallRng::seed_from_u64(0);
    bencher
        .counter(ItemsCount::new(1_usize))
        .bench_local(|| runner.run(trial, &mut rng).unwrap());
}

#[divan::bench]
fn sampled_trial(bencher: divan::Bencher) {
    let runner = runner();
    let grid = ParameterGrid::new(
        (0..20).map(|i| i * 131).collect(),
        (0..26).map(|i| i * 1_200).collect(),
        vec![0.8, 0.6, 0.4, 0.2],
    )
    .unwrap();
    let mut rng = SmallRng::seed_from_u64(0);
    bencher.counter(ItemsCount::new(1_usize)).bench_local(|| {
        let trial = grid.sample(&mut rng);
        runner.run(trial, &mut rng).unwrap()
    });
}
