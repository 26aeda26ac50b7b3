//! Integration tests for the flowcall library and binary.
//!
//! These tests validate end-to-end workflows that span multiple modules,
//! from simulated chips through basecalling to FASTQ output.

mod helpers;
mod test_basecall_accuracy;
mod test_error_paths;
mod test_pipeline_concurrency;
mod test_run_command;
mod test_simulate_command;
