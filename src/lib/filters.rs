//! Read filtering.
//!
//! Every predicate runs for every read. A failing predicate sets its flag but
//! never short-circuits the chain, so the finished record carries the full
//! diagnostic flag set even when several problems coincide. Trimming
//! predicates adjust the 3' trim point and set informational flags that do
//! not by themselves exclude a read.

use bstr::ByteSlice;
use serde::{Deserialize, Serialize};

use crate::flow::KeySequence;
use crate::treephaser::BaseCall;

/// Bit set of filter outcomes carried on every finished read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FilterFlags(u16);

impl FilterFlags {
    /// No filter fired.
    pub const NONE: FilterFlags = FilterFlags(0);
    /// The call is empty.
    pub const ZERO_BASES: FilterFlags = FilterFlags(1 << 0);
    /// The called prefix does not match the expected key.
    pub const KEYPASS_FAIL: FilterFlags = FilterFlags(1 << 1);
    /// Fraction of positive flows outside the monoclonal band.
    pub const POLYCLONAL: FilterFlags = FilterFlags(1 << 2);
    /// Mean squared dephasing residual above threshold.
    pub const HIGH_RESIDUAL: FilterFlags = FilterFlags(1 << 3);
    /// Post-trim length below the minimum.
    pub const TOO_SHORT: FilterFlags = FilterFlags(1 << 4);
    /// 3' bases removed by quality trimming (informational).
    pub const QUALITY_TRIM: FilterFlags = FilterFlags(1 << 5);
    /// 3' bases removed by adapter trimming (informational).
    pub const ADAPTER_TRIM: FilterFlags = FilterFlags(1 << 6);

    /// Flags that exclude a read from passing output.
    pub const FAILING: FilterFlags = FilterFlags(
        Self::ZERO_BASES.0
            | Self::KEYPASS_FAIL.0
            | Self::POLYCLONAL.0
            | Self::HIGH_RESIDUAL.0
            | Self::TOO_SHORT.0,
    );

    /// Every flag with its display name, for per-flag counting.
    pub const NAMED: [(FilterFlags, &'static str); 7] = [
        (Self::ZERO_BASES, "zero_bases"),
        (Self::KEYPASS_FAIL, "keypass_fail"),
        (Self::POLYCLONAL, "polyclonal"),
        (Self::HIGH_RESIDUAL, "high_residual"),
        (Self::TOO_SHORT, "too_short"),
        (Self::QUALITY_TRIM, "quality_trim"),
        (Self::ADAPTER_TRIM, "adapter_trim"),
    ];

    /// Creates flags from their raw bit representation.
    #[must_use]
    pub fn from_bits(bits: u16) -> Self {
        FilterFlags(bits)
    }

    /// The raw bit representation.
    #[must_use]
    pub fn bits(self) -> u16 {
        self.0
    }

    /// True if every flag in `other` is set in `self`.
    #[must_use]
    pub fn contains(self, other: FilterFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if any flag in `other` is set in `self`.
    #[must_use]
    pub fn intersects(self, other: FilterFlags) -> bool {
        self.0 & other.0 != 0
    }

    /// Adds the flags in `other`.
    pub fn insert(&mut self, other: FilterFlags) {
        self.0 |= other.0;
    }

    /// True when no excluding flag is set. Informational trim flags do not
    /// fail a read.
    #[must_use]
    pub fn is_passing(self) -> bool {
        !self.intersects(Self::FAILING)
    }
}

impl std::ops::BitOr for FilterFlags {
    type Output = FilterFlags;

    fn bitor(self, rhs: FilterFlags) -> FilterFlags {
        FilterFlags(self.0 | rhs.0)
    }
}

/// Thresholds for the filter chain. Defaults follow the long-standing
/// production values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterThresholds {
    /// First flow of the positive-flow window.
    pub ppf_first_flow: usize,
    /// One past the last flow of the positive-flow window.
    pub ppf_last_flow: usize,
    /// Signal above this counts as a positive flow.
    pub ppf_positive_cutoff: f32,
    /// Positive-flow fraction above this is polyclonal.
    pub ppf_max: f32,
    /// Residual window: flows `0..residual_flow_limit`.
    pub residual_flow_limit: usize,
    /// Mean squared residual above this is a failed read.
    pub residual_max_mean_squared: f32,
    /// Minimum post-trim read length in bases.
    pub min_length: usize,
    /// Window size for 3' quality trimming; 0 disables.
    pub quality_trim_window: usize,
    /// Minimum mean phred within the trailing window.
    pub quality_trim_min_mean: f32,
    /// Adapter bases searched for as a 3' suffix; `None` disables.
    pub adapter: Option<String>,
}

impl Default for FilterThresholds {
    fn default() -> Self {
        Self {
            ppf_first_flow: 12,
            ppf_last_flow: 72,
            ppf_positive_cutoff: 0.25,
            ppf_max: 0.84,
            residual_flow_limit: 60,
            residual_max_mean_squared: 0.06,
            min_length: 8,
            quality_trim_window: 10,
            quality_trim_min_mean: 15.0,
            adapter: None,
        }
    }
}

/// Everything the chain inspects for one read.
pub struct FilterInput<'a> {
    /// Expected key for the read's class.
    pub key: &'a KeySequence,
    /// Key-normalized signal.
    pub trace: &'a [f32],
    /// The solved call.
    pub call: &'a BaseCall,
    /// Per-base phred values, one per called base.
    pub qualities: &'a [u8],
    /// Bases already committed to 5' trimming (key, barcode, extra).
    pub prefix_trim: usize,
}

/// The chain's combined outcome for one read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterVerdict {
    /// All flags that fired.
    pub flags: FilterFlags,
    /// Exclusive base index where the read now ends after 3' trimming.
    pub trim_end: usize,
}

/// Runs every filter predicate over a read.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    thresholds: FilterThresholds,
}

impl FilterChain {
    #[must_use]
    pub fn new(thresholds: FilterThresholds) -> Self {
        Self { thresholds }
    }

    #[must_use]
    pub fn thresholds(&self) -> &FilterThresholds {
        &self.thresholds
    }

    /// Evaluates all predicates. Flags accumulate; nothing early-exits.
    #[must_use]
    pub fn evaluate(&self, input: &FilterInput<'_>) -> FilterVerdict {
        let t = &self.thresholds;
        let mut flags = FilterFlags::NONE;
        let bases = &input.call.bases;

        if bases.is_empty() {
            flags.insert(FilterFlags::ZERO_BASES);
        }
        if !input.key.matches_prefix(bases) {
            flags.insert(FilterFlags::KEYPASS_FAIL);
        }
        if let Some(ppf) = Self::positive_flow_fraction(input.trace, t) {
            if ppf > t.ppf_max {
                flags.insert(FilterFlags::POLYCLONAL);
            }
        }
        if let Some(residual) = Self::mean_squared_residual(&input.call.residual, t) {
            if residual > t.residual_max_mean_squared {
                flags.insert(FilterFlags::HIGH_RESIDUAL);
            }
        }

        let mut trim_end = bases.len();
        if let Some(adapter) = t.adapter.as_deref() {
            if !adapter.is_empty() && input.prefix_trim < trim_end {
                if let Some(found) = bases[input.prefix_trim..trim_end].find(adapter.as_bytes()) {
                    trim_end = input.prefix_trim + found;
                    flags.insert(FilterFlags::ADAPTER_TRIM);
                }
            }
        }
        let quality_end = Self::quality_trim_point(input.qualities, trim_end, input.prefix_trim, t);
        if quality_end < trim_end {
            trim_end = quality_end;
            flags.insert(FilterFlags::QUALITY_TRIM);
        }

        if trim_end.saturating_sub(input.prefix_trim) < t.min_length {
            flags.insert(FilterFlags::TOO_SHORT);
        }

        FilterVerdict { flags, trim_end }
    }

    /// Fraction of positive flows in the configured window, or `None` when
    /// the window is empty.
    fn positive_flow_fraction(trace: &[f32], t: &FilterThresholds) -> Option<f32> {
        let start = t.ppf_first_flow.min(trace.len());
        let end = t.ppf_last_flow.min(trace.len());
        let window = &trace[start..end];
        if window.is_empty() {
            return None;
        }
        let positive = window.iter().filter(|&&s| s > t.ppf_positive_cutoff).count();
        Some(positive as f32 / window.len() as f32)
    }

    /// Mean squared residual over the early flows, or `None` when the window
    /// is empty.
    fn mean_squared_residual(residual: &[f32], t: &FilterThresholds) -> Option<f32> {
        let end = t.residual_flow_limit.min(residual.len());
        if end == 0 {
            return None;
        }
        let sum: f32 = residual[..end].iter().map(|r| r * r).sum();
        Some(sum / end as f32)
    }

    /// Largest end index whose trailing quality window holds the minimum
    /// mean. Disabled configurations return `current_end` unchanged.
    fn quality_trim_point(
        qualities: &[u8],
        current_end: usize,
        prefix_trim: usize,
        t: &FilterThresholds,
    ) -> usize {
        if t.quality_trim_window == 0 || t.quality_trim_min_mean <= 0.0 {
            return current_end;
        }
        let mut end = current_end.min(qualities.len());
        while end > prefix_trim {
            let window = t.quality_trim_window.min(end);
            let sum: u32 = qualities[end - window..end].iter().map(|&q| u32::from(q)).sum();
            let mean = sum as f32 / window as f32;
            if mean >= t.quality_trim_min_mean {
                return end;
            }
            end -= 1;
        }
        end
    }
}
