//! Strict chip-order output reassembly.
//!
//! Workers finish well spans in whatever order the scheduler gives them, but
//! every output stream must be emitted in span-sequence order. Each group's
//! `OrderedWriter` buffers ahead-of-cursor batches in a sparse gap buffer
//! and releases contiguous runs to a dedicated serialization thread over a
//! bounded channel. Buffered memory is bounded by worker skew, not by chip
//! size: the cursor only ever waits for the slowest outstanding span.
//!
//! Every span sequence must be submitted exactly once, empty or not;
//! `finalize` reports batches stranded behind a missing span as an error.

use std::collections::VecDeque;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, bounded};

use crate::errors::{FlowcallError, Result};
use crate::output::RecordSink;
use crate::record::ReadRecord;

/// Sparse buffer holding batches that arrived ahead of the emission cursor.
///
/// Index `seq - next_seq` into the deque; `None` marks a span not yet
/// submitted.
struct SpanBuffer {
    slots: VecDeque<Option<Vec<ReadRecord>>>,
    /// The next span sequence to emit. Strictly increasing.
    next_seq: u64,
    pending: usize,
}

impl SpanBuffer {
    fn new() -> Self {
        Self { slots: VecDeque::new(), next_seq: 0, pending: 0 }
    }

    fn insert(&mut self, seq: u64, batch: Vec<ReadRecord>) {
        debug_assert!(seq >= self.next_seq, "span {seq} is behind the cursor {}", self.next_seq);
        let index = (seq - self.next_seq) as usize;
        while self.slots.len() <= index {
            self.slots.push_back(None);
        }
        debug_assert!(self.slots[index].is_none(), "span {seq} submitted twice");
        self.slots[index] = Some(batch);
        self.pending += 1;
    }

    /// Pops the cursor's batch when present and advances the cursor.
    fn try_pop_next(&mut self) -> Option<Vec<ReadRecord>> {
        if self.slots.front()?.is_none() {
            return None;
        }
        let batch = self.slots.pop_front().flatten();
        self.next_seq += 1;
        self.pending -= 1;
        batch
    }

    fn next_seq(&self) -> u64 {
        self.next_seq
    }

    fn is_empty(&self) -> bool {
        self.pending == 0
    }

    fn len(&self) -> usize {
        self.pending
    }
}

/// Final accounting for one output group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterReport {
    /// The group name this writer served.
    pub group: String,
    /// Records released to the sink.
    pub records: u64,
    /// Span batches released, including empty ones.
    pub batches: u64,
}

/// In-order output for one group.
///
/// `submit` accepts finished span batches in any order and releases ready
/// runs to the group's serialization thread; serialization (FASTQ text,
/// compression) stays off the worker critical path. The channel is bounded
/// so a slow sink applies backpressure to workers instead of buffering
/// without limit.
pub struct OrderedWriter {
    group: String,
    buffer: SpanBuffer,
    tx: Option<Sender<Vec<ReadRecord>>>,
    handle: Option<JoinHandle<Result<()>>>,
    records: u64,
    batches: u64,
}

impl OrderedWriter {
    /// Spawns the serialization thread for `sink`. `queue_depth` is the
    /// bounded channel capacity in batches.
    #[must_use]
    pub fn new<S: Into<String>>(group: S, sink: Box<dyn RecordSink>, queue_depth: usize) -> Self {
        let (tx, rx) = bounded::<Vec<ReadRecord>>(queue_depth.max(1));
        let handle = thread::spawn(move || -> Result<()> {
            let mut sink = sink;
            while let Ok(batch) = rx.recv() {
                for record in &batch {
                    sink.write_record(record)?;
                }
            }
            sink.finish()
        });
        Self {
            group: group.into(),
            buffer: SpanBuffer::new(),
            tx: Some(tx),
            handle: Some(handle),
            records: 0,
            batches: 0,
        }
    }

    /// The group name this writer serves.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Accepts the finished batch for span `seq`; the batch may be empty.
    /// Releases the cursor's run of contiguous batches to the serialization
    /// thread.
    pub fn submit(&mut self, seq: u64, records: Vec<ReadRecord>) -> Result<()> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(FlowcallError::WriterClosed { group: self.group.clone(), seq });
        };
        self.buffer.insert(seq, records);
        while let Some(batch) = self.buffer.try_pop_next() {
            self.records += batch.len() as u64;
            self.batches += 1;
            tx.send(batch).map_err(|_| FlowcallError::WriterFailed {
                group: self.group.clone(),
                reason: "serialization thread exited early".to_string(),
            })?;
        }
        Ok(())
    }

    /// Closes the channel, joins the serialization thread, and returns the
    /// group's accounting. Submitting afterwards is an error, as is a second
    /// `finalize`.
    pub fn finalize(&mut self) -> Result<WriterReport> {
        let Some(tx) = self.tx.take() else {
            return Err(FlowcallError::WriterClosed {
                group: self.group.clone(),
                seq: self.buffer.next_seq(),
            });
        };
        drop(tx);

        let joined = match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| FlowcallError::WriterFailed {
                group: self.group.clone(),
                reason: "serialization thread panicked".to_string(),
            })?,
            None => Ok(()),
        };
        joined?;

        if !self.buffer.is_empty() {
            return Err(FlowcallError::WriterFailed {
                group: self.group.clone(),
                reason: format!(
                    "{} span batches stranded behind missing span {}",
                    self.buffer.len(),
                    self.buffer.next_seq()
                ),
            });
        }
        Ok(WriterReport { group: self.group.clone(), records: self.records, batches: self.batches })
    }
}
