//! Ground-truth accuracy tests.
//!
//! Chips simulated with known templates are basecalled end to end; calls,
//! trims, and barcode assignments are checked against the simulator's truth.

use tempfile::TempDir;

use flowcall_lib::output::create_fastq_sink;
use flowcall_lib::params::BarcodeSpec;
use flowcall_lib::phase::PhasingParameters;
use flowcall_lib::pipeline::run_pipeline;
use flowcall_lib::quality::QualityTable;
use flowcall_lib::record::OutputGroup;
use flowcall_lib::simulate::{RunSimulator, SimulatedChip};

use crate::helpers::{
    FastqEntry, barcoded_chip, config_with_phasing, exact_chip, parse_coords, read_fastq,
};

/// Looks up the simulated truth for a called read by its chip coordinates.
fn truth_sequence<'a>(chip: &'a SimulatedChip, entry: &FastqEntry) -> &'a [u8] {
    let (row, col) = parse_coords(&entry.name);
    let index = chip.mask.geometry().index(row, col);
    &chip.truth[index].sequence
}

#[test]
fn test_noise_free_reads_decode_exactly() {
    let dir = TempDir::new().unwrap();
    let chip = exact_chip(6, 6, 80, 17);
    let zero = PhasingParameters { cf: 0.0, ie: 0.0, dr: 0.0 };
    let config = config_with_phasing(&chip, 3, zero, 1);

    let path = dir.path().join("library.fastq");
    let sink = create_fastq_sink(&path, &config.run_id, true, None).unwrap();
    let output = run_pipeline(
        &config,
        &chip.wells,
        &chip.mask,
        None,
        QualityTable::default(),
        vec![(OutputGroup::Library, sink)],
    )
    .unwrap();

    // Every well is library and every read decodes, so none may be filtered.
    assert_eq!(output.metrics.reads_passing, 36);
    assert_eq!(output.metrics.reads_filtered, 0);

    let entries = read_fastq(&path);
    assert_eq!(entries.len(), 36);
    for entry in &entries {
        let truth = truth_sequence(&chip, entry);
        // The library stream trims the 4-base key; the rest must match.
        assert_eq!(
            entry.bases.as_bytes(),
            &truth[4..],
            "read {} does not match its template",
            entry.name
        );
    }
}

#[test]
fn test_barcoded_reads_trim_to_the_insert() {
    let dir = TempDir::new().unwrap();
    let barcodes = ["CTAAGGTA", "TTGGAACC"];
    let chip = barcoded_chip(6, 6, 90, &barcodes, 29);

    let zero = PhasingParameters { cf: 0.0, ie: 0.0, dr: 0.0 };
    let mut config = config_with_phasing(&chip, 3, zero, 1);
    config.barcodes = barcodes
        .iter()
        .map(|b| BarcodeSpec { id: format!("bc_{b}"), bases: (*b).to_string(), threshold: None })
        .collect();

    let path = dir.path().join("library.fastq");
    let sink = create_fastq_sink(&path, &config.run_id, true, None).unwrap();
    let output = run_pipeline(
        &config,
        &chip.wells,
        &chip.mask,
        None,
        QualityTable::default(),
        vec![(OutputGroup::Library, sink)],
    )
    .unwrap();

    // Noise-free decode: every read matches one of the two barcodes.
    assert_eq!(output.metrics.barcode_matched, 36);
    assert_eq!(output.metrics.barcode_unclassified, 0);

    let entries = read_fastq(&path);
    assert_eq!(entries.len(), 36);
    for entry in &entries {
        let truth = truth_sequence(&chip, entry);
        // Key plus an 8-base barcode are trimmed away.
        assert_eq!(
            entry.bases.as_bytes(),
            &truth[12..],
            "read {} kept key or barcode bases",
            entry.name
        );
    }
}

#[test]
fn test_phase_fit_recovers_simulated_parameters() {
    let sim = RunSimulator {
        rows: 12,
        cols: 12,
        num_flows: 100,
        params: PhasingParameters { cf: 0.010, ie: 0.008, dr: 0.0 },
        mean_insert: 30,
        noise_stddev: 0.01,
        gain_stddev: 0.05,
        ..RunSimulator::default()
    };
    let chip = sim.generate(Some(41)).expect("chip generation failed");

    let mut config = config_with_phasing(&chip, 2, PhasingParameters::default(), 1);
    config.phasing_override = None;
    config.phase_sample = 100;

    let output = run_pipeline(
        &config,
        &chip.wells,
        &chip.mask,
        None,
        QualityTable::default(),
        Vec::new(),
    )
    .unwrap();

    assert!(output.phase.converged, "phase fit did not converge");
    assert!(output.phase.samples > 0);
    assert!(output.phase.objective.is_finite());
    assert!(
        (output.phase.params.cf - 0.010).abs() < 0.008,
        "fitted cf {} far from simulated 0.010",
        output.phase.params.cf
    );
    assert!(
        (output.phase.params.ie - 0.008).abs() < 0.006,
        "fitted ie {} far from simulated 0.008",
        output.phase.params.ie
    );
}
