//! Chip geometry and work partitioning.
//!
//! Wells are addressed row-major: `index = row * cols + col`. The main pass
//! divides the chip into contiguous spans of wells; workers claim spans by
//! sequence number, and the same sequence numbers order the output.

use crate::errors::{FlowcallError, Result};

/// Physical layout of the chip's wells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipGeometry {
    rows: usize,
    cols: usize,
}

impl ChipGeometry {
    /// Creates a chip geometry.
    ///
    /// # Errors
    ///
    /// Returns an error if either dimension is zero.
    pub fn new(rows: usize, cols: usize) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(FlowcallError::InvalidGeometry {
                reason: format!("dimensions must be positive, got {rows} x {cols}"),
            });
        }
        Ok(Self { rows, cols })
    }

    /// Number of rows.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Total number of wells.
    #[must_use]
    pub fn num_wells(&self) -> usize {
        self.rows * self.cols
    }

    /// Row-major index of the well at (`row`, `col`).
    #[must_use]
    pub fn index(&self, row: usize, col: usize) -> usize {
        debug_assert!(row < self.rows && col < self.cols);
        row * self.cols + col
    }

    /// (`row`, `col`) of the well at a row-major index.
    #[must_use]
    pub fn coords(&self, index: usize) -> (usize, usize) {
        debug_assert!(index < self.num_wells());
        (index / self.cols, index % self.cols)
    }

    /// Number of spans of `span_size` wells covering the chip.
    #[must_use]
    pub fn num_spans(&self, span_size: usize) -> usize {
        self.num_wells().div_ceil(span_size)
    }

    /// The `seq`-th contiguous span, or `None` past the end of the chip.
    ///
    /// Spans tile the chip in index order; the last span may be short.
    #[must_use]
    pub fn span_at(&self, seq: usize, span_size: usize) -> Option<WellSpan> {
        let start = seq.checked_mul(span_size)?;
        if start >= self.num_wells() {
            return None;
        }
        let end = (start + span_size).min(self.num_wells());
        Some(WellSpan { start, end })
    }
}

/// A contiguous range of row-major well indices, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WellSpan {
    /// First well index in the span.
    pub start: usize,
    /// One past the last well index.
    pub end: usize,
}

impl WellSpan {
    /// Number of wells in the span.
    #[must_use]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// True if the span covers no wells.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Iterator over the span's well indices.
    pub fn indices(self) -> impl Iterator<Item = usize> {
        self.start..self.end
    }
}
