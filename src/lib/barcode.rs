//! Barcode classification.
//!
//! Each candidate barcode sits immediately after the key. Classification
//! scores a read against every candidate in one of two spaces: flow space
//! compares the normalized trace to the barcode's phase-simulated signature
//! over the barcode's own flows, base space counts mismatches over the
//! called prefix. The strict minimum below its threshold wins; an exact tie
//! between two qualifying candidates is never silently assigned.

use crate::errors::{FlowcallError, Result};
use crate::flow::{FlowOrder, KeySequence, nuc_index};
use crate::phase::PhasingParameters;
use crate::treephaser::{BaseCall, Treephaser};

/// Score difference below which two candidates count as tied.
const SCORE_TIE_EPSILON: f32 = 1e-9;

/// Default acceptance threshold for flow-space mean squared distance.
pub const DEFAULT_FLOW_THRESHOLD: f32 = 0.10;
/// Default acceptance threshold for base-space mismatch count.
pub const DEFAULT_BASE_THRESHOLD: f32 = 1.0;

/// How candidate barcodes are scored against a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
    /// Mean squared distance between the trace and the barcode's simulated
    /// flow signature.
    #[value(name = "flow-space")]
    FlowSpace,
    /// Mismatch count over the called bases after the key.
    #[value(name = "base-space")]
    BaseSpace,
}

/// One candidate barcode: id, bases after the key, and its acceptance
/// threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct Barcode {
    id: String,
    bases: Vec<u8>,
    threshold: f32,
}

impl Barcode {
    /// Creates a candidate with an explicit threshold.
    pub fn new<S: Into<String>>(id: S, bases: &[u8], threshold: f32) -> Result<Self> {
        let id = id.into();
        if bases.is_empty() {
            return Err(FlowcallError::InvalidParameter {
                parameter: format!("barcode '{id}'"),
                reason: "barcode bases must be non-empty".to_string(),
            });
        }
        if let Some(&bad) = bases.iter().find(|b| nuc_index(**b).is_none()) {
            return Err(FlowcallError::InvalidParameter {
                parameter: format!("barcode '{id}'"),
                reason: format!("invalid base {:?}", bad as char),
            });
        }
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(FlowcallError::InvalidParameter {
                parameter: format!("barcode '{id}'"),
                reason: format!("invalid threshold {threshold}"),
            });
        }
        Ok(Self { id, bases: bases.to_vec(), threshold })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn bases(&self) -> &[u8] {
        &self.bases
    }

    #[must_use]
    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

/// Outcome of classifying one read against one barcode set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BarcodeAssignment {
    /// The read matched a single best candidate. Trim counts cover the key
    /// plus the barcode.
    Matched { id: String, bases_to_trim: usize, flows_to_trim: usize },
    /// No candidate qualified, or the best score was tied.
    Unclassified,
}

impl BarcodeAssignment {
    #[must_use]
    pub fn is_matched(&self) -> bool {
        matches!(self, Self::Matched { .. })
    }
}

/// A candidate with its precomputed flow signature and trim counts.
#[derive(Debug, Clone)]
struct CompiledBarcode {
    id: String,
    bases: Vec<u8>,
    threshold: f32,
    /// First flow of the barcode's signature window.
    window_start: usize,
    /// Phase-simulated prediction over the signature window.
    signature: Vec<f32>,
    bases_to_trim: usize,
    flows_to_trim: usize,
}

/// Classifies reads against one barcode set.
///
/// Compilation simulates each candidate's key-plus-barcode prefix under the
/// run's phasing parameters once; classification afterwards is pure lookup
/// and arithmetic, safe to share read-only across workers.
#[derive(Debug, Clone)]
pub struct BarcodeClassifier {
    mode: ScoringMode,
    key_bases: usize,
    barcodes: Vec<CompiledBarcode>,
}

impl BarcodeClassifier {
    /// Compiles a barcode set against a flow order, key, and phasing
    /// parameters.
    pub fn new(
        flow_order: &FlowOrder,
        key: &KeySequence,
        params: PhasingParameters,
        mode: ScoringMode,
        barcodes: Vec<Barcode>,
    ) -> Result<Self> {
        let key_usable = key.usable_key_flows(flow_order)?;
        let mut solver = Treephaser::new(flow_order, params);
        let mut compiled = Vec::with_capacity(barcodes.len());
        let mut prediction = Vec::new();

        for barcode in barcodes {
            let mut full = key.bases().to_vec();
            full.extend_from_slice(&barcode.bases);
            let spanned = flow_order.flows_spanned(&full).ok_or_else(|| {
                FlowcallError::InvalidParameter {
                    parameter: format!("barcode '{}'", barcode.id),
                    reason: format!(
                        "key plus barcode does not fit in {} flows",
                        flow_order.num_flows()
                    ),
                }
            })?;
            let simulated = solver.simulate(&full, &mut prediction);
            if simulated < full.len() {
                return Err(FlowcallError::InvalidParameter {
                    parameter: format!("barcode '{}'", barcode.id),
                    reason: "phase simulation did not cover the barcode".to_string(),
                });
            }
            compiled.push(CompiledBarcode {
                window_start: key_usable,
                signature: prediction[key_usable..spanned].to_vec(),
                bases_to_trim: full.len(),
                flows_to_trim: spanned,
                id: barcode.id,
                bases: barcode.bases,
                threshold: barcode.threshold,
            });
        }

        Ok(Self { mode, key_bases: key.bases().len(), barcodes: compiled })
    }

    /// Number of candidates in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.barcodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.barcodes.is_empty()
    }

    /// Scores the read against every candidate and returns the strict
    /// minimum below its threshold, or `Unclassified` when none qualifies or
    /// the best two are tied.
    #[must_use]
    pub fn classify(&self, call: &BaseCall, trace: &[f32]) -> BarcodeAssignment {
        let mut best: Option<(f32, usize)> = None;
        let mut runner_up: Option<f32> = None;

        for (idx, barcode) in self.barcodes.iter().enumerate() {
            let score = match self.mode {
                ScoringMode::FlowSpace => Self::flow_score(barcode, trace),
                ScoringMode::BaseSpace => self.base_score(barcode, call),
            };
            if score > barcode.threshold {
                continue;
            }
            match best {
                None => best = Some((score, idx)),
                Some((best_score, _)) if score < best_score => {
                    runner_up = Some(runner_up.map_or(best_score, |r| r.min(best_score)));
                    best = Some((score, idx));
                }
                Some(_) => runner_up = Some(runner_up.map_or(score, |r| r.min(score))),
            }
        }

        let Some((best_score, best_idx)) = best else {
            return BarcodeAssignment::Unclassified;
        };
        if runner_up.is_some_and(|r| r - best_score < SCORE_TIE_EPSILON) {
            return BarcodeAssignment::Unclassified;
        }
        let barcode = &self.barcodes[best_idx];
        BarcodeAssignment::Matched {
            id: barcode.id.clone(),
            bases_to_trim: barcode.bases_to_trim,
            flows_to_trim: barcode.flows_to_trim,
        }
    }

    /// Mean squared distance over the barcode's signature window. A trace
    /// too short for the window can never qualify.
    fn flow_score(barcode: &CompiledBarcode, trace: &[f32]) -> f32 {
        let end = barcode.window_start + barcode.signature.len();
        if trace.len() < end {
            return f32::INFINITY;
        }
        let window = &trace[barcode.window_start..end];
        let sum: f32 = window
            .iter()
            .zip(&barcode.signature)
            .map(|(observed, expected)| (observed - expected) * (observed - expected))
            .sum();
        sum / barcode.signature.len() as f32
    }

    /// Mismatch count over the called prefix after the key. Missing bases
    /// count as mismatches.
    fn base_score(&self, barcode: &CompiledBarcode, call: &BaseCall) -> f32 {
        let mut mismatches = 0usize;
        for (i, &expected) in barcode.bases.iter().enumerate() {
            match call.bases.get(self.key_bases + i) {
                Some(&called) if called == expected => {}
                _ => mismatches += 1,
            }
        }
        mismatches as f32
    }
}
