//! Finished read records.
//!
//! A `ReadRecord` is what a worker hands to the ordered writer: the called
//! bases and qualities for one well, plus everything downstream consumers
//! need to route and render it. Trimming is carried as indices rather than
//! applied destructively, so the untrimmed output groups can render the same
//! record in full.

use bstr::BStr;

use crate::barcode::BarcodeAssignment;
use crate::filters::FilterFlags;

/// Destination stream for a finished read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputGroup {
    /// Passing library reads, trimmed.
    Library,
    /// Reads routed to the calibration-training set.
    Calibration,
    /// Test-fragment (control) reads.
    TestFragment,
    /// Sampled subset, untrimmed and unfiltered.
    Unfiltered,
    /// The same sampled subset with trimming applied.
    UnfilteredTrimmed,
}

impl OutputGroup {
    /// Every group, in the order reports list them.
    pub const ALL: [OutputGroup; 5] = [
        OutputGroup::Library,
        OutputGroup::Calibration,
        OutputGroup::TestFragment,
        OutputGroup::Unfiltered,
        OutputGroup::UnfilteredTrimmed,
    ];

    /// Stable name used in file names, logs, and the run summary.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            OutputGroup::Library => "library",
            OutputGroup::Calibration => "calibration",
            OutputGroup::TestFragment => "test_fragment",
            OutputGroup::Unfiltered => "unfiltered",
            OutputGroup::UnfilteredTrimmed => "unfiltered_trimmed",
        }
    }

    /// True when this group renders reads with trimming applied.
    #[must_use]
    pub fn is_trimmed(self) -> bool {
        !matches!(self, OutputGroup::Unfiltered)
    }
}

/// One finished read, ready for serialization.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadRecord {
    /// Row-major well index on the chip.
    pub well_index: usize,
    /// Chip row of the well.
    pub row: usize,
    /// Chip column of the well.
    pub col: usize,
    /// All called bases, untrimmed.
    pub bases: Vec<u8>,
    /// Per-base phred values, same length as `bases`.
    pub qualities: Vec<u8>,
    /// Per-flow signal in the configured output mode; empty when disabled.
    pub flow_signals: Vec<f32>,
    /// Barcode classification outcome.
    pub barcode: BarcodeAssignment,
    /// Filter flags accumulated by the chain.
    pub flags: FilterFlags,
    /// Bases removed from the 5' end (key, barcode, extra trim).
    pub trim_start: usize,
    /// Exclusive base index where the read ends after 3' trimming.
    pub trim_end: usize,
}

impl ReadRecord {
    /// The read name rendered for output: `run_id:row:col`.
    #[must_use]
    pub fn read_name(&self, run_id: &str) -> String {
        format!("{run_id}:{:05}:{:05}", self.row, self.col)
    }

    /// Clamped trim bounds, start never past end, both within the call.
    fn trim_bounds(&self) -> (usize, usize) {
        let end = self.trim_end.min(self.bases.len());
        (self.trim_start.min(end), end)
    }

    /// The bases that survive trimming.
    #[must_use]
    pub fn trimmed_bases(&self) -> &[u8] {
        let (start, end) = self.trim_bounds();
        &self.bases[start..end]
    }

    /// The qualities that survive trimming.
    #[must_use]
    pub fn trimmed_qualities(&self) -> &[u8] {
        let end = self.trim_end.min(self.qualities.len());
        let start = self.trim_start.min(end);
        &self.qualities[start..end]
    }

    /// Length after trimming.
    #[must_use]
    pub fn trimmed_len(&self) -> usize {
        let (start, end) = self.trim_bounds();
        end - start
    }

    /// True when no excluding filter flag is set.
    #[must_use]
    pub fn is_passing(&self) -> bool {
        self.flags.is_passing()
    }

    /// The called bases as a displayable byte string.
    #[must_use]
    pub fn bases_display(&self) -> &BStr {
        BStr::new(&self.bases)
    }
}
