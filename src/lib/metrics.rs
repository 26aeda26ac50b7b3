//! Per-run counters.
//!
//! Each worker owns a `BaseCallingMetrics` and counts locally; the
//! orchestrator merges the locals after the pool joins, so no counter is
//! shared while wells are being processed. The merged aggregate lands in the
//! run summary JSON and the end-of-run log.

use serde::{Deserialize, Serialize};

use crate::barcode::BarcodeAssignment;
use crate::filters::FilterFlags;
use crate::logging::{format_count, format_percent};
use crate::mask::WellClass;
use crate::record::OutputGroup;

/// How many reads each filter flag touched. A read with several flags counts
/// once per flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterCounts {
    /// Reads with no called bases.
    pub zero_bases: u64,
    /// Reads not starting with their class key.
    pub keypass_fail: u64,
    /// Reads from polyclonal wells.
    pub polyclonal: u64,
    /// Reads with excessive early residual.
    pub high_residual: u64,
    /// Reads shorter than the minimum after trimming.
    pub too_short: u64,
    /// Reads 3'-trimmed on quality.
    pub quality_trim: u64,
    /// Reads 3'-trimmed at an adapter hit.
    pub adapter_trim: u64,
}

impl FilterCounts {
    /// Counts every flag set on one read.
    pub fn record(&mut self, flags: FilterFlags) {
        if flags.contains(FilterFlags::ZERO_BASES) {
            self.zero_bases += 1;
        }
        if flags.contains(FilterFlags::KEYPASS_FAIL) {
            self.keypass_fail += 1;
        }
        if flags.contains(FilterFlags::POLYCLONAL) {
            self.polyclonal += 1;
        }
        if flags.contains(FilterFlags::HIGH_RESIDUAL) {
            self.high_residual += 1;
        }
        if flags.contains(FilterFlags::TOO_SHORT) {
            self.too_short += 1;
        }
        if flags.contains(FilterFlags::QUALITY_TRIM) {
            self.quality_trim += 1;
        }
        if flags.contains(FilterFlags::ADAPTER_TRIM) {
            self.adapter_trim += 1;
        }
    }

    /// Merge another `FilterCounts` into this one.
    pub fn merge(&mut self, other: &FilterCounts) {
        self.zero_bases += other.zero_bases;
        self.keypass_fail += other.keypass_fail;
        self.polyclonal += other.polyclonal;
        self.high_residual += other.high_residual;
        self.too_short += other.too_short;
        self.quality_trim += other.quality_trim;
        self.adapter_trim += other.adapter_trim;
    }
}

/// Reads routed to each output group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCounts {
    /// Passing library reads.
    pub library: u64,
    /// Calibration-panel reads.
    pub calibration: u64,
    /// Test-fragment reads.
    pub test_fragment: u64,
    /// Unfiltered-subset reads, untrimmed stream.
    pub unfiltered: u64,
    /// Unfiltered-subset reads, trimmed stream.
    pub unfiltered_trimmed: u64,
}

impl GroupCounts {
    /// Counts one read routed to `group`.
    pub fn record(&mut self, group: OutputGroup) {
        match group {
            OutputGroup::Library => self.library += 1,
            OutputGroup::Calibration => self.calibration += 1,
            OutputGroup::TestFragment => self.test_fragment += 1,
            OutputGroup::Unfiltered => self.unfiltered += 1,
            OutputGroup::UnfilteredTrimmed => self.unfiltered_trimmed += 1,
        }
    }

    /// The count for `group`.
    #[must_use]
    pub fn get(&self, group: OutputGroup) -> u64 {
        match group {
            OutputGroup::Library => self.library,
            OutputGroup::Calibration => self.calibration,
            OutputGroup::TestFragment => self.test_fragment,
            OutputGroup::Unfiltered => self.unfiltered,
            OutputGroup::UnfilteredTrimmed => self.unfiltered_trimmed,
        }
    }

    /// Merge another `GroupCounts` into this one.
    pub fn merge(&mut self, other: &GroupCounts) {
        self.library += other.library;
        self.calibration += other.calibration;
        self.test_fragment += other.test_fragment;
        self.unfiltered += other.unfiltered;
        self.unfiltered_trimmed += other.unfiltered_trimmed;
    }
}

/// Aggregate counts over a whole run (thread-local, merged at join).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseCallingMetrics {
    /// Wells on the chip.
    pub wells_total: u64,
    /// Wells classified as library.
    pub wells_library: u64,
    /// Wells classified as test fragment.
    pub wells_test_fragment: u64,
    /// Wells not basecalled.
    pub wells_excluded: u64,
    /// Basecalled reads passing every failing filter.
    pub reads_passing: u64,
    /// Basecalled reads with at least one failing flag.
    pub reads_filtered: u64,
    /// Trimmed bases across passing reads.
    pub bases_called: u64,
    /// Reads matched to a library or panel barcode.
    pub barcode_matched: u64,
    /// Reads left unclassified by barcode scoring.
    pub barcode_unclassified: u64,
    /// Per-flag filter counts.
    pub filters: FilterCounts,
    /// Per-group routing counts.
    pub groups: GroupCounts,
}

impl BaseCallingMetrics {
    /// Create new empty metrics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one well's classification.
    pub fn record_well(&mut self, class: WellClass) {
        self.wells_total += 1;
        match class {
            WellClass::Library => self.wells_library += 1,
            WellClass::TestFragment => self.wells_test_fragment += 1,
            WellClass::Excluded => self.wells_excluded += 1,
        }
    }

    /// Counts one basecalled read: its filter outcome, barcode outcome (when
    /// barcode scoring ran), and passing base yield.
    pub fn record_read(
        &mut self,
        flags: FilterFlags,
        barcode: Option<&BarcodeAssignment>,
        bases: u64,
    ) {
        self.filters.record(flags);
        if flags.is_passing() {
            self.reads_passing += 1;
            self.bases_called += bases;
        } else {
            self.reads_filtered += 1;
        }
        match barcode {
            Some(BarcodeAssignment::Matched { .. }) => self.barcode_matched += 1,
            Some(BarcodeAssignment::Unclassified) => self.barcode_unclassified += 1,
            None => {}
        }
    }

    /// Counts one read routed to `group`.
    pub fn record_routed(&mut self, group: OutputGroup) {
        self.groups.record(group);
    }

    /// Merge another `BaseCallingMetrics` into this one.
    pub fn merge(&mut self, other: &BaseCallingMetrics) {
        self.wells_total += other.wells_total;
        self.wells_library += other.wells_library;
        self.wells_test_fragment += other.wells_test_fragment;
        self.wells_excluded += other.wells_excluded;
        self.reads_passing += other.reads_passing;
        self.reads_filtered += other.reads_filtered;
        self.bases_called += other.bases_called;
        self.barcode_matched += other.barcode_matched;
        self.barcode_unclassified += other.barcode_unclassified;
        self.filters.merge(&other.filters);
        self.groups.merge(&other.groups);
    }

    /// Basecalled reads, passing or not.
    #[must_use]
    pub fn reads_total(&self) -> u64 {
        self.reads_passing + self.reads_filtered
    }

    /// Fraction of basecalled reads that pass.
    #[must_use]
    pub fn pass_fraction(&self) -> f64 {
        let total = self.reads_total();
        if total == 0 { 0.0 } else { self.reads_passing as f64 / total as f64 }
    }

    /// Logs the end-of-run summary at info level.
    pub fn log_summary(&self) {
        log::info!(
            "Wells: {} total, {} library, {} test fragment, {} excluded",
            format_count(self.wells_total),
            format_count(self.wells_library),
            format_count(self.wells_test_fragment),
            format_count(self.wells_excluded)
        );
        log::info!(
            "Reads: {} passing of {} ({}), {} bases",
            format_count(self.reads_passing),
            format_count(self.reads_total()),
            format_percent(self.pass_fraction(), 1),
            format_count(self.bases_called)
        );
        log::info!(
            "Filters: {} zero-bases, {} keypass, {} polyclonal, {} high-residual, {} too-short",
            format_count(self.filters.zero_bases),
            format_count(self.filters.keypass_fail),
            format_count(self.filters.polyclonal),
            format_count(self.filters.high_residual),
            format_count(self.filters.too_short)
        );
        if self.barcode_matched + self.barcode_unclassified > 0 {
            log::info!(
                "Barcodes: {} matched, {} unclassified",
                format_count(self.barcode_matched),
                format_count(self.barcode_unclassified)
            );
        }
        for group in OutputGroup::ALL {
            let count = self.groups.get(group);
            if count > 0 {
                log::info!("Group {}: {} reads", group.name(), format_count(count));
            }
        }
    }
}
