//! Whole-run phasing parameter estimation.
//!
//! The dephasing model is governed by three fractions: carry-forward (`cf`),
//! incomplete extension (`ie`), and droop (`dr`). They are properties of the
//! run's chemistry, not of individual wells, so they are fitted once against a
//! bounded sample of key-normalized traces and shared read-only afterwards.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::flow::FlowOrder;
use crate::treephaser::Treephaser;

/// Long-standing default carry-forward fraction.
pub const DEFAULT_CF: f32 = 0.0080;
/// Long-standing default incomplete-extension fraction.
pub const DEFAULT_IE: f32 = 0.0055;
/// Droop defaults to zero; normalization absorbs most of it.
pub const DEFAULT_DR: f32 = 0.0;

/// Upper bound for any fitted fraction; values beyond this are chemistry
/// failures, not fit targets.
const MAX_FRACTION: f32 = 0.04;

/// Initial pattern-search step for cf and ie.
const INITIAL_STEP: f32 = 0.004;
/// Initial pattern-search step for dr.
const INITIAL_DROOP_STEP: f32 = 0.0005;
/// The fit converges when steps shrink below this.
const STEP_TOLERANCE: f32 = 1e-4;

/// The three phasing fractions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhasingParameters {
    /// Carry-forward: fraction of strands incorporating early on leftover
    /// nucleotide.
    pub cf: f32,
    /// Incomplete extension: fraction of strands missing their flow.
    pub ie: f32,
    /// Droop: fraction of strands lost per incorporation.
    pub dr: f32,
}

impl Default for PhasingParameters {
    fn default() -> Self {
        Self { cf: DEFAULT_CF, ie: DEFAULT_IE, dr: DEFAULT_DR }
    }
}

/// Result of a phase fit, recorded in the run summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseEstimate {
    /// The fitted (or fallback) parameters.
    pub params: PhasingParameters,
    /// False when the fit fell back to defaults.
    pub converged: bool,
    /// Pattern-search iterations spent.
    pub iterations: usize,
    /// Final summed solver metric over the sample (zero for the fallback,
    /// which evaluates nothing).
    pub objective: f64,
    /// Number of traces the fit saw.
    pub samples: usize,
}

impl PhaseEstimate {
    /// The fallback estimate used when no usable sample exists.
    #[must_use]
    pub fn fallback(samples: usize) -> Self {
        Self {
            params: PhasingParameters::default(),
            converged: false,
            iterations: 0,
            objective: 0.0,
            samples,
        }
    }
}

/// Fits phasing parameters to sampled traces by pattern search.
///
/// Each candidate parameter set is scored by solving every sample trace and
/// summing the solver's squared-residual metrics; the search walks cf and ie
/// (and dr when enabled) with shrinking steps until no axis move improves the
/// objective.
pub struct PhaseEstimator {
    flow_order: FlowOrder,
    fit_droop: bool,
    max_iterations: usize,
}

impl PhaseEstimator {
    /// Creates an estimator for a flow order. Droop is held at its default
    /// unless [`with_droop`](Self::with_droop) is called.
    #[must_use]
    pub fn new(flow_order: &FlowOrder) -> Self {
        Self { flow_order: flow_order.clone(), fit_droop: false, max_iterations: 30 }
    }

    /// Also fit the droop fraction.
    #[must_use]
    pub fn with_droop(mut self) -> Self {
        self.fit_droop = true;
        self
    }

    /// Caps pattern-search iterations.
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// Fits parameters against key-normalized traces.
    ///
    /// An empty sample returns the fallback estimate; the caller decides how
    /// loudly to complain.
    #[must_use]
    pub fn fit(&self, traces: &[Vec<f32>]) -> PhaseEstimate {
        if traces.is_empty() {
            return PhaseEstimate::fallback(0);
        }

        let mut current = PhasingParameters::default();
        let mut best = self.objective(traces, current);
        let mut step = INITIAL_STEP;
        let mut droop_step = INITIAL_DROOP_STEP;
        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.max_iterations {
            iterations += 1;
            let mut improved = false;

            let axes: &[usize] = if self.fit_droop { &[0, 1, 2] } else { &[0, 1] };
            for &axis in axes {
                let axis_step = if axis == 2 { droop_step } else { step };
                for direction in [1.0f32, -1.0] {
                    let candidate = Self::moved(current, axis, direction * axis_step);
                    let score = self.objective(traces, candidate);
                    if score < best {
                        best = score;
                        current = candidate;
                        improved = true;
                    }
                }
            }

            if !improved {
                step /= 2.0;
                droop_step /= 2.0;
                if step < STEP_TOLERANCE {
                    converged = true;
                    break;
                }
            }
        }

        PhaseEstimate {
            params: current,
            converged,
            iterations,
            objective: best,
            samples: traces.len(),
        }
    }

    /// Sum of solver metrics over the sample, evaluated in parallel with a
    /// deterministic (in-order) reduction.
    fn objective(&self, traces: &[Vec<f32>], params: PhasingParameters) -> f64 {
        let per_trace: Vec<f64> = traces
            .par_iter()
            .map_init(
                || Treephaser::new(&self.flow_order, params),
                |solver, trace| f64::from(solver.solve(trace).metric),
            )
            .collect();
        per_trace.iter().sum()
    }

    fn moved(params: PhasingParameters, axis: usize, delta: f32) -> PhasingParameters {
        let mut moved = params;
        let target = match axis {
            0 => &mut moved.cf,
            1 => &mut moved.ie,
            _ => &mut moved.dr,
        };
        *target = (*target + delta).clamp(0.0, MAX_FRACTION);
        moved
    }
}
