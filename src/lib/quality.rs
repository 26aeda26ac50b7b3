//! Per-base quality estimation.
//!
//! Quality is a table lookup, not a model evaluation: each called base is
//! reduced to three predictors (absolute residual at its in-phase flow, the
//! largest absolute residual in the surrounding flows, and its homopolymer
//! run length) and matched against an ordered bucket table. The first bucket
//! that accepts all three predictors supplies the phred value; a predictor
//! outside every bucket falls through to the last one.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{FlowcallError, Result};
use crate::treephaser::BaseCall;

/// Lowest phred value ever emitted.
pub const MIN_PHRED: u8 = 2;
/// Highest phred value ever emitted.
pub const MAX_PHRED: u8 = 41;

/// Flows on each side of a base's flow that contribute to its noise
/// predictor.
const NOISE_WINDOW: usize = 2;

/// One row of the quality table. A base qualifies when all three predictors
/// are at or below the bucket's bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityBucket {
    pub max_residual: f32,
    pub max_noise: f32,
    pub max_hp: u8,
    pub phred: u8,
}

#[derive(Debug, Serialize, Deserialize)]
struct QualityTableFile {
    buckets: Vec<QualityBucket>,
}

/// Ordered bucket table, best quality first.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityTable {
    buckets: Vec<QualityBucket>,
}

impl Default for QualityTable {
    /// The embedded table used when no override file is supplied.
    fn default() -> Self {
        let buckets = vec![
            QualityBucket { max_residual: 0.10, max_noise: 0.12, max_hp: 4, phred: 38 },
            QualityBucket { max_residual: 0.15, max_noise: 0.20, max_hp: 4, phred: 33 },
            QualityBucket { max_residual: 0.20, max_noise: 0.25, max_hp: 6, phred: 28 },
            QualityBucket { max_residual: 0.25, max_noise: 0.30, max_hp: 6, phred: 24 },
            QualityBucket { max_residual: 0.30, max_noise: 0.35, max_hp: 8, phred: 20 },
            QualityBucket { max_residual: 0.35, max_noise: 0.45, max_hp: 8, phred: 15 },
            QualityBucket { max_residual: 0.45, max_noise: 0.60, max_hp: 11, phred: 9 },
            QualityBucket { max_residual: f32::MAX, max_noise: f32::MAX, max_hp: u8::MAX, phred: 5 },
        ];
        Self { buckets }
    }
}

impl QualityTable {
    /// Builds a table from explicit buckets. The list must be non-empty; the
    /// last bucket is the catch-all for out-of-range predictors.
    pub fn new(buckets: Vec<QualityBucket>) -> Result<Self> {
        if buckets.is_empty() {
            return Err(FlowcallError::InvalidParameter {
                parameter: "quality table".to_string(),
                reason: "at least one bucket is required".to_string(),
            });
        }
        Ok(Self { buckets })
    }

    /// Loads an override table from a JSON file.
    pub fn read<R: Read>(reader: R, path: &str) -> Result<Self> {
        let file: QualityTableFile =
            serde_json::from_reader(reader).map_err(|e| FlowcallError::InvalidFileFormat {
                file_type: "quality table".to_string(),
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        Self::new(file.buckets).map_err(|_| FlowcallError::InvalidFileFormat {
            file_type: "quality table".to_string(),
            path: path.to_string(),
            reason: "no buckets defined".to_string(),
        })
    }

    /// Loads an override table from disk.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let display = path.as_ref().display().to_string();
        let file = File::open(&path)?;
        Self::read(BufReader::new(file), &display)
    }

    /// Phred value for one predictor triple, clamped to
    /// [`MIN_PHRED`]..=[`MAX_PHRED`].
    #[must_use]
    pub fn phred(&self, residual: f32, noise: f32, hp: u8) -> u8 {
        let bucket = self
            .buckets
            .iter()
            .find(|b| residual <= b.max_residual && noise <= b.max_noise && hp <= b.max_hp)
            .or_else(|| self.buckets.last());
        match bucket {
            Some(b) => b.phred.clamp(MIN_PHRED, MAX_PHRED),
            None => MIN_PHRED,
        }
    }
}

/// Turns a solved call into per-base phred values.
#[derive(Debug, Clone, Default)]
pub struct QualityEstimator {
    table: QualityTable,
}

impl QualityEstimator {
    #[must_use]
    pub fn new(table: QualityTable) -> Self {
        Self { table }
    }

    /// One phred value per called base, in base order.
    #[must_use]
    pub fn qualities(&self, call: &BaseCall) -> Vec<u8> {
        let num_flows = call.residual.len();
        let mut out = Vec::with_capacity(call.bases.len());

        let mut run_start = 0;
        while run_start < call.base_flows.len() {
            let flow = call.base_flows[run_start] as usize;
            let mut run_end = run_start + 1;
            while run_end < call.base_flows.len() && call.base_flows[run_end] as usize == flow {
                run_end += 1;
            }
            let hp = (run_end - run_start).min(usize::from(u8::MAX)) as u8;

            let residual = if flow < num_flows { call.residual[flow].abs() } else { 0.0 };
            let lo = flow.saturating_sub(NOISE_WINDOW);
            let hi = (flow + NOISE_WINDOW + 1).min(num_flows);
            let noise = call.residual[lo..hi]
                .iter()
                .map(|r| r.abs())
                .fold(0.0f32, f32::max);

            let phred = self.table.phred(residual, noise, hp);
            for _ in run_start..run_end {
                out.push(phred);
            }
            run_start = run_end;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(bases: &[u8], base_flows: Vec<u32>, residual: Vec<f32>) -> BaseCall {
        BaseCall { bases: bases.to_vec(), base_flows, residual, ..BaseCall::default() }
    }

    #[test]
    fn test_clean_base_gets_top_bucket() {
        let table = QualityTable::default();
        assert_eq!(table.phred(0.02, 0.05, 1), 38);
    }

    #[test]
    fn test_out_of_range_falls_to_catch_all() {
        let table = QualityTable::default();
        assert_eq!(table.phred(3.0, 3.0, 1), 5);
        assert_eq!(table.phred(0.02, 0.05, 13), 5);
    }

    #[test]
    fn test_phred_clamps_to_supported_range() {
        let table = QualityTable::new(vec![
            QualityBucket { max_residual: 0.1, max_noise: 0.1, max_hp: 11, phred: 60 },
            QualityBucket { max_residual: f32::MAX, max_noise: f32::MAX, max_hp: u8::MAX, phred: 0 },
        ])
        .unwrap();
        assert_eq!(table.phred(0.01, 0.01, 1), MAX_PHRED);
        assert_eq!(table.phred(5.0, 5.0, 1), MIN_PHRED);
    }

    #[test]
    fn test_empty_table_rejected() {
        assert!(QualityTable::new(Vec::new()).is_err());
    }

    #[test]
    fn test_qualities_one_per_base() {
        let estimator = QualityEstimator::default();
        let call = call(b"TACG", vec![0, 1, 2, 3], vec![0.01, -0.02, 0.03, 0.01]);
        let quals = estimator.qualities(&call);
        assert_eq!(quals.len(), 4);
        assert!(quals.iter().all(|&q| q == 38));
    }

    #[test]
    fn test_homopolymer_run_shares_one_lower_value() {
        let estimator = QualityEstimator::default();
        // Five A's on flow 1: hp 5 exceeds the top buckets' max_hp of 4
        let call = call(
            b"TAAAAA",
            vec![0, 1, 1, 1, 1, 1],
            vec![0.01, 0.02, 0.01, 0.0],
        );
        let quals = estimator.qualities(&call);
        assert_eq!(quals.len(), 6);
        assert_eq!(quals[0], 38);
        assert!(quals[1..].iter().all(|&q| q == 28));
    }

    #[test]
    fn test_neighboring_residual_drags_quality_down() {
        let estimator = QualityEstimator::default();
        // The base's own flow is clean but flow 2 is noisy and in the window
        let call = call(b"T", vec![0], vec![0.02, 0.01, 0.44, 0.0]);
        let quals = estimator.qualities(&call);
        assert_eq!(quals, vec![15]);
    }

    #[test]
    fn test_empty_call_yields_no_qualities() {
        let estimator = QualityEstimator::default();
        let quals = estimator.qualities(&BaseCall::default());
        assert!(quals.is_empty());
    }

    #[test]
    fn test_deterministic_for_identical_input() {
        let estimator = QualityEstimator::default();
        let call = call(b"TACG", vec![0, 1, 2, 3], vec![0.1, -0.2, 0.3, 0.15]);
        assert_eq!(estimator.qualities(&call), estimator.qualities(&call));
    }

    #[test]
    fn test_table_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quality.json");
        let json = r#"{"buckets": [
            {"max_residual": 0.2, "max_noise": 0.3, "max_hp": 6, "phred": 30},
            {"max_residual": 1e30, "max_noise": 1e30, "max_hp": 255, "phred": 6}
        ]}"#;
        std::fs::write(&path, json).unwrap();
        let table = QualityTable::from_path(&path).unwrap();
        assert_eq!(table.phred(0.1, 0.1, 2), 30);
        assert_eq!(table.phred(0.9, 0.1, 2), 6);
    }
}
