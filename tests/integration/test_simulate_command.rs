//! Integration tests for the simulate command, invoked as the built binary.

use std::collections::HashMap;
use std::process::Command;

use tempfile::TempDir;

use flowcall_lib::mask::{WellClass, WellMask};
use flowcall_lib::params::RunSummary;
use flowcall_lib::wells::{RawWells, TraceSource};

use crate::helpers::{assert_chip_ordered, read_fastq};

fn flowcall() -> Command {
    Command::new(env!("CARGO_BIN_EXE_flowcall"))
}

#[test]
fn test_simulate_writes_readable_files() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let wells_path = dir.path().join("sim.rawwells");
    let mask_path = dir.path().join("sim.mask");

    let status = flowcall()
        .args([
            "simulate",
            "-w",
            wells_path.to_str().unwrap(),
            "-m",
            mask_path.to_str().unwrap(),
            "--rows",
            "6",
            "--cols",
            "7",
            "--num-flows",
            "80",
            "--seed",
            "3",
        ])
        .status()
        .expect("Failed to run the simulate command");
    assert!(status.success(), "Simulate command failed");

    let wells = RawWells::from_path(&wells_path).expect("Wells file did not parse");
    assert_eq!(wells.geometry().rows(), 6);
    assert_eq!(wells.geometry().cols(), 7);
    assert_eq!(wells.num_flows(), 80);

    let mask = WellMask::from_path(&mask_path).expect("Mask file did not parse");
    assert_eq!(mask.len(), 42);
}

#[test]
fn test_simulate_truth_agrees_with_mask() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let wells_path = dir.path().join("sim.rawwells");
    let mask_path = dir.path().join("sim.mask");
    let truth_path = dir.path().join("truth.tsv");

    let status = flowcall()
        .args([
            "simulate",
            "-w",
            wells_path.to_str().unwrap(),
            "-m",
            mask_path.to_str().unwrap(),
            "--truth",
            truth_path.to_str().unwrap(),
            "--rows",
            "8",
            "--cols",
            "8",
            "--seed",
            "11",
        ])
        .status()
        .expect("Failed to run the simulate command");
    assert!(status.success(), "Simulate command failed");

    let mask = WellMask::from_path(&mask_path).unwrap();
    let truth = std::fs::read_to_string(&truth_path).unwrap();
    let mut class_counts: HashMap<&str, usize> = HashMap::new();
    for line in truth.lines().skip(1) {
        let fields: Vec<&str> = line.split('\t').collect();
        assert_eq!(fields.len(), 6, "Truth row should have 6 columns");
        *class_counts.entry(fields[3]).or_default() += 1;
        match fields[3] {
            "library" => assert!(fields[5].starts_with("TCAG")),
            "test_fragment" => assert!(fields[5].starts_with("ATCG")),
            "excluded" => assert!(fields[5].is_empty(), "Excluded wells have no template"),
            other => panic!("Unexpected class '{other}'"),
        }
    }

    assert_eq!(class_counts.get("library").copied().unwrap_or(0), mask.count_of(WellClass::Library));
    assert_eq!(
        class_counts.get("test_fragment").copied().unwrap_or(0),
        mask.count_of(WellClass::TestFragment)
    );
    assert_eq!(
        class_counts.get("excluded").copied().unwrap_or(0),
        mask.count_of(WellClass::Excluded)
    );
}

#[test]
fn test_simulate_seeded_binary_reproducible() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let first = dir.path().join("a.rawwells");
    let second = dir.path().join("b.rawwells");

    for path in [&first, &second] {
        let status = flowcall()
            .args([
                "simulate",
                "-w",
                path.to_str().unwrap(),
                "-m",
                dir.path().join("chip.mask").to_str().unwrap(),
                "--rows",
                "5",
                "--cols",
                "5",
                "--num-flows",
                "60",
                "--seed",
                "9",
            ])
            .status()
            .expect("Failed to run the simulate command");
        assert!(status.success(), "Simulate command failed");
    }

    assert_eq!(
        std::fs::read(&first).unwrap(),
        std::fs::read(&second).unwrap(),
        "Same seed should produce identical wells files"
    );
}

#[test]
fn test_simulate_then_run_end_to_end() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let wells_path = dir.path().join("chip.rawwells");
    let mask_path = dir.path().join("chip.mask");
    let out = dir.path().join("out");

    let status = flowcall()
        .args([
            "simulate",
            "-w",
            wells_path.to_str().unwrap(),
            "-m",
            mask_path.to_str().unwrap(),
            "--rows",
            "8",
            "--cols",
            "8",
            "--num-flows",
            "100",
            "--noise",
            "0.01",
            "--gain-spread",
            "0.05",
            "--cf",
            "0.008",
            "--ie",
            "0.006",
            "--seed",
            "21",
        ])
        .status()
        .expect("Failed to run the simulate command");
    assert!(status.success(), "Simulate command failed");

    let status = flowcall()
        .args([
            "run",
            "-i",
            wells_path.to_str().unwrap(),
            "-m",
            mask_path.to_str().unwrap(),
            "-o",
            out.to_str().unwrap(),
            "--threads",
            "4",
            "--cf",
            "0.008",
            "--ie",
            "0.006",
            "--seed",
            "1",
        ])
        .status()
        .expect("Failed to run the run command");
    assert!(status.success(), "Run command failed");

    let summary = RunSummary::from_path(out.join("summary.json")).unwrap();
    assert_eq!(summary.metrics.wells_total, 64);
    assert!(summary.metrics.reads_passing > 0, "Simulated chip produced no passing reads");

    let library = read_fastq(&out.join("library.fastq"));
    assert_eq!(library.len() as u64, summary.metrics.groups.library);
    assert_chip_ordered(&library);
}
