//! Integration tests for the run command, invoked as the built binary.

use std::process::Command;

use tempfile::TempDir;

use flowcall_lib::params::{BarcodeSpec, RunSummary};

use crate::helpers::{
    assert_chip_ordered, barcoded_chip, clean_chip, read_fastq, read_fastq_gz, write_chip,
};

fn flowcall() -> Command {
    Command::new(env!("CARGO_BIN_EXE_flowcall"))
}

#[test]
fn test_run_produces_groups_and_summary() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let chip = clean_chip(8, 8, 100, 19);
    let (wells, mask) = write_chip(dir.path(), &chip);
    let out = dir.path().join("out");

    let status = flowcall()
        .args([
            "run",
            "-i",
            wells.to_str().unwrap(),
            "-m",
            mask.to_str().unwrap(),
            "-o",
            out.to_str().unwrap(),
            "--threads",
            "3",
            "--span-size",
            "7",
            "--cf",
            "0.008",
            "--ie",
            "0.006",
            "--seed",
            "5",
        ])
        .status()
        .expect("Failed to run the run command");

    assert!(status.success(), "Run command failed");
    assert!(out.join("library.fastq").exists(), "Library FASTQ not created");
    assert!(out.join("calibration.fastq").exists(), "Calibration FASTQ not created");
    assert!(out.join("test_fragment.fastq").exists(), "Test fragment FASTQ not created");
    assert!(out.join("unfiltered.fastq").exists(), "Unfiltered FASTQ not created");
    assert!(out.join("unfiltered_trimmed.fastq").exists(), "Trimmed unfiltered FASTQ not created");

    let summary =
        RunSummary::from_path(out.join("summary.json")).expect("Summary did not parse");
    assert_eq!(summary.metrics.wells_total, 64);
    assert_eq!(summary.config.num_flows, 100);
    assert!(summary.metrics.reads_passing > 0, "No reads passed");
    assert!(summary.command_line.contains("run"), "Summary should record the invocation");
    assert!(summary.phase.converged);
}

#[test]
fn test_run_keeps_chip_order_across_threads() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let chip = clean_chip(10, 10, 100, 23);
    let (wells, mask) = write_chip(dir.path(), &chip);
    let out = dir.path().join("out");

    let status = flowcall()
        .args([
            "run",
            "-i",
            wells.to_str().unwrap(),
            "-m",
            mask.to_str().unwrap(),
            "-o",
            out.to_str().unwrap(),
            "--threads",
            "6",
            "--span-size",
            "3",
            "--cf",
            "0.008",
            "--ie",
            "0.006",
            "--seed",
            "2",
        ])
        .status()
        .expect("Failed to run the run command");
    assert!(status.success(), "Run command failed");

    let library = read_fastq(&out.join("library.fastq"));
    assert!(!library.is_empty(), "Library FASTQ is empty");
    assert_chip_ordered(&library);

    let unfiltered = read_fastq(&out.join("unfiltered.fastq"));
    assert!(!unfiltered.is_empty(), "Unfiltered FASTQ is empty");
    assert_chip_ordered(&unfiltered);
}

#[test]
fn test_run_gzip_output_decodes() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let chip = clean_chip(6, 6, 100, 31);
    let (wells, mask) = write_chip(dir.path(), &chip);
    let out = dir.path().join("out");

    let status = flowcall()
        .args([
            "run",
            "-i",
            wells.to_str().unwrap(),
            "-m",
            mask.to_str().unwrap(),
            "-o",
            out.to_str().unwrap(),
            "--threads",
            "2",
            "--cf",
            "0.008",
            "--ie",
            "0.006",
            "--gzip",
            "--gzip-level",
            "1",
            "--writer-threads",
            "2",
            "--seed",
            "4",
        ])
        .status()
        .expect("Failed to run the run command");
    assert!(status.success(), "Run command failed");

    assert!(!out.join("library.fastq").exists(), "Plain FASTQ written despite --gzip");
    let library = read_fastq_gz(&out.join("library.fastq.gz"));
    let summary = RunSummary::from_path(out.join("summary.json")).unwrap();
    assert_eq!(library.len() as u64, summary.metrics.groups.library);
}

#[test]
fn test_run_with_barcode_file_demultiplexes() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let barcodes = ["CTAAGGTA", "TTGGAACC"];
    let chip = barcoded_chip(6, 6, 90, &barcodes, 37);
    let (wells, mask) = write_chip(dir.path(), &chip);
    let out = dir.path().join("out");

    let specs: Vec<BarcodeSpec> = barcodes
        .iter()
        .map(|b| BarcodeSpec { id: format!("bc_{b}"), bases: (*b).to_string(), threshold: None })
        .collect();
    let barcode_path = dir.path().join("barcodes.json");
    std::fs::write(&barcode_path, serde_json::to_string(&specs).unwrap())
        .expect("Failed to write barcode set");

    let status = flowcall()
        .args([
            "run",
            "-i",
            wells.to_str().unwrap(),
            "-m",
            mask.to_str().unwrap(),
            "-o",
            out.to_str().unwrap(),
            "--threads",
            "2",
            "--barcodes",
            barcode_path.to_str().unwrap(),
            "--cf",
            "0.0",
            "--ie",
            "0.0",
            "--dr",
            "0.0",
            "--seed",
            "8",
        ])
        .status()
        .expect("Failed to run the run command");
    assert!(status.success(), "Run command failed");

    let summary = RunSummary::from_path(out.join("summary.json")).unwrap();
    // Noise-free all-library chip: every read matches one of the barcodes.
    assert_eq!(summary.metrics.barcode_matched, 36);
    assert_eq!(summary.metrics.barcode_unclassified, 0);
}

#[test]
fn test_run_fails_without_inputs() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let status = flowcall()
        .args([
            "run",
            "-i",
            dir.path().join("absent.rawwells").to_str().unwrap(),
            "-m",
            dir.path().join("absent.mask").to_str().unwrap(),
            "-o",
            dir.path().join("out").to_str().unwrap(),
        ])
        .status()
        .expect("Failed to spawn the run command");
    assert!(!status.success(), "Run should fail on missing inputs");
}
