//! Simulated chip fixtures for integration tests.
//!
//! All fixtures pin the simulator's phasing so a matching pipeline
//! configuration can skip the phase fit and decode deterministically.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use flowcall_lib::params::RunConfig;
use flowcall_lib::phase::PhasingParameters;
use flowcall_lib::sampler::SampleSize;
use flowcall_lib::simulate::{RunSimulator, SimulatedChip};
use flowcall_lib::wells::TraceSource;

/// Phasing applied by the default test chips.
pub const TEST_PHASING: PhasingParameters = PhasingParameters { cf: 0.008, ie: 0.006, dr: 0.0 };

/// A low-noise chip that basecalls cleanly under [`TEST_PHASING`].
pub fn clean_chip(rows: usize, cols: usize, num_flows: usize, seed: u64) -> SimulatedChip {
    let sim = RunSimulator {
        rows,
        cols,
        num_flows,
        params: TEST_PHASING,
        noise_stddev: 0.01,
        gain_stddev: 0.05,
        ..RunSimulator::default()
    };
    sim.generate(Some(seed)).expect("chip generation failed")
}

/// A noise-free, phasing-free chip whose reads decode exactly.
pub fn exact_chip(rows: usize, cols: usize, num_flows: usize, seed: u64) -> SimulatedChip {
    let sim = RunSimulator {
        rows,
        cols,
        num_flows,
        params: PhasingParameters { cf: 0.0, ie: 0.0, dr: 0.0 },
        empty_fraction: 0.0,
        tf_fraction: 0.0,
        mean_insert: 12,
        insert_spread: 4,
        noise_stddev: 0.0,
        gain_stddev: 0.0,
        ..RunSimulator::default()
    };
    sim.generate(Some(seed)).expect("chip generation failed")
}

/// A noise-free all-library chip with barcodes inserted after the key.
pub fn barcoded_chip(
    rows: usize,
    cols: usize,
    num_flows: usize,
    barcodes: &[&str],
    seed: u64,
) -> SimulatedChip {
    let sim = RunSimulator {
        rows,
        cols,
        num_flows,
        params: PhasingParameters { cf: 0.0, ie: 0.0, dr: 0.0 },
        empty_fraction: 0.0,
        tf_fraction: 0.0,
        mean_insert: 12,
        insert_spread: 4,
        noise_stddev: 0.0,
        gain_stddev: 0.0,
        barcodes: barcodes.iter().map(|b| (*b).to_string()).collect(),
        ..RunSimulator::default()
    };
    sim.generate(Some(seed)).expect("chip generation failed")
}

/// Writes the chip's wells and mask into `dir`, returning their paths.
pub fn write_chip(dir: &Path, chip: &SimulatedChip) -> (PathBuf, PathBuf) {
    let wells = dir.join("chip.rawwells");
    let mask = dir.join("chip.mask");
    chip.wells.to_path(&wells).expect("failed to write wells");
    chip.mask.to_path(&mask).expect("failed to write mask");
    (wells, mask)
}

/// A pipeline configuration matched to `chip`, pinned to [`TEST_PHASING`].
///
/// The unfiltered and calibration subsets are off; tests that need them
/// adjust the returned config. Chips built by [`exact_chip`] or
/// [`barcoded_chip`] should pair with [`config_with_phasing`] and zero
/// phasing instead.
pub fn config_for(chip: &SimulatedChip, workers: usize, seed: u64) -> RunConfig {
    RunConfig {
        flow_cycle: chip.wells.flow_cycle().to_string(),
        num_flows: chip.wells.num_flows(),
        worker_threads: workers,
        span_size: 16,
        phase_sample: 64,
        phasing_override: Some(TEST_PHASING),
        unfiltered_sample: SampleSize::Count(0),
        calibration_sample: SampleSize::Count(0),
        seed: Some(seed),
        ..RunConfig::default()
    }
}

/// Like [`config_for`] but with the override pinned to exactly `params`.
pub fn config_with_phasing(
    chip: &SimulatedChip,
    workers: usize,
    params: PhasingParameters,
    seed: u64,
) -> RunConfig {
    let mut config = config_for(chip, workers, seed);
    config.phasing_override = Some(params);
    config
}
