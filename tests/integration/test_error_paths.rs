//! Error-path tests across file loading and the CLI.

use std::process::Command;

use tempfile::TempDir;

use flowcall_lib::chip::ChipGeometry;
use flowcall_lib::mask::WellMask;
use flowcall_lib::params::BarcodeSpec;
use flowcall_lib::wells::RawWells;

fn flowcall() -> Command {
    Command::new(env!("CARGO_BIN_EXE_flowcall"))
}

#[test]
fn test_truncated_wells_file_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.rawwells");
    std::fs::write(&path, b"not a wells file").unwrap();

    let err = RawWells::from_path(&path).unwrap_err();
    let message = format!("{err}");
    assert!(message.contains("Invalid wells file"), "unexpected error: {message}");
    assert!(message.contains("bad.rawwells"), "error should name the file: {message}");
}

#[test]
fn test_binary_rejects_corrupt_wells() {
    let dir = TempDir::new().unwrap();
    let wells = dir.path().join("bad.rawwells");
    let mask = dir.path().join("chip.mask");
    std::fs::write(&wells, b"not a wells file").unwrap();
    WellMask::new(ChipGeometry::new(4, 4).unwrap()).to_path(&mask).unwrap();

    let status = flowcall()
        .args([
            "run",
            "-i",
            wells.to_str().unwrap(),
            "-m",
            mask.to_str().unwrap(),
            "-o",
            dir.path().join("out").to_str().unwrap(),
        ])
        .status()
        .expect("Failed to spawn the run command");
    assert!(!status.success(), "Corrupt wells file should fail the run");
}

#[test]
fn test_geometry_mismatch_rejected() {
    let dir = TempDir::new().unwrap();
    let wells_path = dir.path().join("chip.rawwells");
    let mask_path = dir.path().join("chip.mask");

    RawWells::new(ChipGeometry::new(4, 4).unwrap(), 60, "TACG")
        .unwrap()
        .to_path(&wells_path)
        .unwrap();
    WellMask::new(ChipGeometry::new(5, 5).unwrap()).to_path(&mask_path).unwrap();

    let status = flowcall()
        .args([
            "run",
            "-i",
            wells_path.to_str().unwrap(),
            "-m",
            mask_path.to_str().unwrap(),
            "-o",
            dir.path().join("out").to_str().unwrap(),
            "--threads",
            "1",
        ])
        .status()
        .expect("Failed to spawn the run command");
    assert!(!status.success(), "Mismatched chip geometries should fail the run");
}

#[test]
fn test_malformed_barcode_set_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("barcodes.json");
    std::fs::write(&path, "not json at all").unwrap();

    let err = BarcodeSpec::set_from_path(&path).unwrap_err();
    let message = format!("{err}");
    assert!(message.contains("Invalid barcode set file"), "unexpected error: {message}");

    // The same file fails the run command up front.
    let wells = dir.path().join("chip.rawwells");
    let mask = dir.path().join("chip.mask");
    RawWells::new(ChipGeometry::new(4, 4).unwrap(), 60, "TACG")
        .unwrap()
        .to_path(&wells)
        .unwrap();
    WellMask::new(ChipGeometry::new(4, 4).unwrap()).to_path(&mask).unwrap();

    let status = flowcall()
        .args([
            "run",
            "-i",
            wells.to_str().unwrap(),
            "-m",
            mask.to_str().unwrap(),
            "-o",
            dir.path().join("out").to_str().unwrap(),
            "--barcodes",
            path.to_str().unwrap(),
        ])
        .status()
        .expect("Failed to spawn the run command");
    assert!(!status.success(), "Malformed barcode set should fail the run");
}

#[test]
fn test_invalid_gzip_level_rejected() {
    let dir = TempDir::new().unwrap();
    let wells = dir.path().join("chip.rawwells");
    let mask = dir.path().join("chip.mask");
    RawWells::new(ChipGeometry::new(4, 4).unwrap(), 60, "TACG")
        .unwrap()
        .to_path(&wells)
        .unwrap();
    WellMask::new(ChipGeometry::new(4, 4).unwrap()).to_path(&mask).unwrap();

    let status = flowcall()
        .args([
            "run",
            "-i",
            wells.to_str().unwrap(),
            "-m",
            mask.to_str().unwrap(),
            "-o",
            dir.path().join("out").to_str().unwrap(),
            "--gzip",
            "--gzip-level",
            "0",
        ])
        .status()
        .expect("Failed to spawn the run command");
    assert!(!status.success(), "Gzip level 0 should be rejected");
}

#[test]
fn test_output_dir_collision_rejected() {
    let dir = TempDir::new().unwrap();
    let wells = dir.path().join("chip.rawwells");
    let mask = dir.path().join("chip.mask");
    RawWells::new(ChipGeometry::new(4, 4).unwrap(), 60, "TACG")
        .unwrap()
        .to_path(&wells)
        .unwrap();
    WellMask::new(ChipGeometry::new(4, 4).unwrap()).to_path(&mask).unwrap();

    // A plain file where the output directory should go.
    let out = dir.path().join("out");
    std::fs::write(&out, "occupied").unwrap();

    let status = flowcall()
        .args([
            "run",
            "-i",
            wells.to_str().unwrap(),
            "-m",
            mask.to_str().unwrap(),
            "-o",
            out.to_str().unwrap(),
        ])
        .status()
        .expect("Failed to spawn the run command");
    assert!(!status.success(), "Output path occupied by a file should fail the run");
}
