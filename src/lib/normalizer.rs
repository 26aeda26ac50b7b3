//! Signal normalization.
//!
//! Raw well signal arrives in arbitrary units with per-well gain and drifting
//! baseline. Key normalization scales the whole trace so the key's known
//! 1-mer flows average 1.0. Adaptive normalization then removes residual gain
//! and offset drift window by window, using flows the solver already predicts
//! confidently as 0-mers or 1-mers.

/// Default adaptive normalization window, in flows.
pub const DEFAULT_WINDOW_SIZE: usize = 38;

/// Predictions at or below this are trusted as 0-mers for offset estimation.
const ZERO_MER_MAX_PREDICTION: f32 = 0.3;
/// Prediction band trusted as 1-mers for gain estimation.
const ONE_MER_MIN_PREDICTION: f32 = 0.5;
const ONE_MER_MAX_PREDICTION: f32 = 1.5;
/// Minimum trusted flows in a window before its estimate replaces the
/// previous window's.
const MIN_EVIDENCE: usize = 5;
/// Gains below this are rejected as degenerate.
const MIN_GAIN: f32 = 0.1;

/// Scales `trace` so the mean over the key's 1-mer flows becomes 1.0.
///
/// Returns the gain that was divided out. A degenerate key signal (no 1-mer
/// flows, or mean at or below zero) leaves the trace untouched and returns a
/// gain of 1.0; such wells fail keypass downstream.
pub fn key_normalize(trace: &mut [f32], onemer_flows: &[usize]) -> f32 {
    let usable: Vec<f32> =
        onemer_flows.iter().filter(|&&f| f < trace.len()).map(|&f| trace[f]).collect();
    if usable.is_empty() {
        return 1.0;
    }
    let gain = usable.iter().sum::<f32>() / usable.len() as f32;
    if gain <= f32::EPSILON {
        return 1.0;
    }
    for value in trace.iter_mut() {
        *value /= gain;
    }
    gain
}

/// Windowed gain and offset correction against solver predictions.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveNormalizer {
    window_size: usize,
}

impl AdaptiveNormalizer {
    /// Creates a normalizer with the given window size (clamped to >= 1).
    #[must_use]
    pub fn new(window_size: usize) -> Self {
        Self { window_size: window_size.max(1) }
    }

    /// The window size in flows.
    #[must_use]
    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Rewrites `trace` as `(raw - offset) / gain` with per-window constants.
    ///
    /// Each window's offset comes from the mean difference between measured
    /// and predicted signal over its trusted 0-mer flows, and its gain from
    /// the mean measured/predicted ratio over trusted 1-mer flows. Windows
    /// with too little evidence carry the previous window's correction
    /// forward, so a sparse region cannot invent a wild correction.
    pub fn normalize(&self, trace: &mut [f32], prediction: &[f32]) {
        debug_assert_eq!(trace.len(), prediction.len());
        let num_flows = trace.len().min(prediction.len());

        let mut offset = 0.0f32;
        let mut gain = 1.0f32;
        let mut window_start = 0;
        while window_start < num_flows {
            let window_end = (window_start + self.window_size).min(num_flows);

            let mut zero_sum = 0.0f32;
            let mut zero_n = 0usize;
            let mut one_sum = 0.0f32;
            let mut one_n = 0usize;
            for flow in window_start..window_end {
                let pred = prediction[flow];
                if pred <= ZERO_MER_MAX_PREDICTION {
                    zero_sum += trace[flow] - pred;
                    zero_n += 1;
                } else if (ONE_MER_MIN_PREDICTION..=ONE_MER_MAX_PREDICTION).contains(&pred) {
                    one_sum += trace[flow] / pred;
                    one_n += 1;
                }
            }

            if zero_n >= MIN_EVIDENCE {
                offset = zero_sum / zero_n as f32;
            }
            if one_n >= MIN_EVIDENCE {
                let candidate = one_sum / one_n as f32 - offset;
                if candidate > MIN_GAIN {
                    gain = candidate;
                }
            }

            for flow in window_start..window_end {
                trace[flow] = (trace[flow] - offset) / gain;
            }
            window_start = window_end;
        }
    }
}

impl Default for AdaptiveNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}
