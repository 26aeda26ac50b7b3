//! Record sinks.
//!
//! Each output group serializes on its own writer thread, behind the
//! [`RecordSink`] trait so the record format stays a collaborator boundary.
//! FASTQ is provided here, plain or gzip. Gzip compression fans 64KB blocks
//! out to compression workers and reassembles them in serial order on a
//! dedicated I/O thread, so compression never stalls record production.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded};
use libdeflater::{CompressionLvl, Compressor};

use crate::errors::Result;
use crate::record::ReadRecord;

/// Uncompressed bytes gathered before a block is dispatched.
const GZIP_BLOCK_SIZE: usize = 65536;

/// Serializes finished records for one output group.
pub trait RecordSink: Send {
    /// Writes one record.
    fn write_record(&mut self, record: &ReadRecord) -> Result<()>;

    /// Flushes buffered data and closes the sink.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Writers that need an explicit close beyond `flush`: thread joins, stream
/// trailers.
pub trait CloseableWrite: Write + Send {
    fn close(&mut self) -> io::Result<()>;
}

impl CloseableWrite for Vec<u8> {
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W: Write + Send> CloseableWrite for BufWriter<W> {
    fn close(&mut self) -> io::Result<()> {
        self.flush()
    }
}

/// Gzip sink settings, driven by the writer-thread option.
#[derive(Debug, Clone)]
pub struct GzipOptions {
    /// Compression worker threads.
    pub threads: usize,
    /// Compression level, 1-12.
    pub level: u8,
}

impl Default for GzipOptions {
    fn default() -> Self {
        Self { threads: 4, level: 6 }
    }
}

/// Multi-threaded gzip stream writer.
///
/// Blocks are compressed out of order by a small worker pool and written in
/// serial order by the I/O thread; the output is a valid concatenation of
/// gzip members. `close` must be called to join the threads; it is safe to
/// call more than once.
pub struct ParallelGzipWriter {
    block: Vec<u8>,
    next_serial: u64,
    compress_tx: Option<Sender<(u64, Vec<u8>)>>,
    workers: Vec<JoinHandle<()>>,
    io_thread: Option<JoinHandle<io::Result<()>>>,
}

impl ParallelGzipWriter {
    /// Spawns the compression workers and the ordered I/O thread.
    pub fn new<W>(writer: W, options: &GzipOptions) -> io::Result<Self>
    where
        W: Write + Send + 'static,
    {
        let threads = options.threads.max(1);
        let level = CompressionLvl::new(i32::from(options.level))
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("{e:?}")))?;

        let (compress_tx, compress_rx) = bounded::<(u64, Vec<u8>)>(threads * 2);
        let (out_tx, out_rx) = bounded::<(u64, io::Result<Vec<u8>>)>(threads * 2);

        let mut workers = Vec::with_capacity(threads);
        for _ in 0..threads {
            let rx = compress_rx.clone();
            let tx = out_tx.clone();
            workers.push(thread::spawn(move || {
                let mut compressor = Compressor::new(level);
                while let Ok((serial, data)) = rx.recv() {
                    let result = Self::compress(&mut compressor, &data);
                    if tx.send((serial, result)).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(compress_rx);
        drop(out_tx);

        let io_thread = thread::spawn(move || Self::write_ordered(writer, &out_rx));

        Ok(Self {
            block: Vec::with_capacity(GZIP_BLOCK_SIZE),
            next_serial: 0,
            compress_tx: Some(compress_tx),
            workers,
            io_thread: Some(io_thread),
        })
    }

    /// Compresses one block into a standalone gzip member.
    fn compress(compressor: &mut Compressor, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut out = vec![0u8; compressor.gzip_compress_bound(data.len())];
        let len = compressor
            .gzip_compress(data, &mut out)
            .map_err(|e| io::Error::other(format!("gzip compression failed: {e:?}")))?;
        out.truncate(len);
        Ok(out)
    }

    /// The I/O thread: reassembles blocks by serial and writes them in order.
    fn write_ordered<W: Write>(
        mut writer: W,
        out_rx: &Receiver<(u64, io::Result<Vec<u8>>)>,
    ) -> io::Result<()> {
        let mut next = 0u64;
        let mut pending: BTreeMap<u64, io::Result<Vec<u8>>> = BTreeMap::new();

        while let Ok((serial, block)) = out_rx.recv() {
            pending.insert(serial, block);
            while let Some(block) = pending.remove(&next) {
                writer.write_all(&block?)?;
                next += 1;
            }
        }
        // Channel closed; anything left is already in serial order
        for (_, block) in pending {
            writer.write_all(&block?)?;
        }
        writer.flush()
    }

    /// Hands the current block to the compression pool.
    fn dispatch(&mut self) -> io::Result<()> {
        if self.block.is_empty() {
            return Ok(());
        }
        let tx = self
            .compress_tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "gzip writer closed"))?;
        let data = std::mem::replace(&mut self.block, Vec::with_capacity(GZIP_BLOCK_SIZE));
        let serial = self.next_serial;
        self.next_serial += 1;
        tx.send((serial, data))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "compression pool exited"))
    }
}

impl Write for ParallelGzipWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.block.extend_from_slice(buf);
        if self.block.len() >= GZIP_BLOCK_SIZE {
            self.dispatch()?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.dispatch()
    }
}

impl CloseableWrite for ParallelGzipWriter {
    fn close(&mut self) -> io::Result<()> {
        if self.compress_tx.is_some() {
            self.dispatch()?;
            self.compress_tx = None;
        }
        for worker in self.workers.drain(..) {
            worker
                .join()
                .map_err(|_| io::Error::other("gzip compression worker panicked"))?;
        }
        if let Some(io_thread) = self.io_thread.take() {
            io_thread.join().map_err(|_| io::Error::other("gzip I/O thread panicked"))??;
        }
        Ok(())
    }
}

/// FASTQ serialization over any closeable writer.
///
/// Records render as `@run_id:row:col`, bases, `+`, phred+33. The trimmed
/// flag selects whether trim indices are applied; the unfiltered group keeps
/// them off.
pub struct FastqSink<W: CloseableWrite> {
    writer: W,
    run_id: String,
    trimmed: bool,
    records: u64,
}

impl<W: CloseableWrite> FastqSink<W> {
    #[must_use]
    pub fn new<S: Into<String>>(writer: W, run_id: S, trimmed: bool) -> Self {
        Self { writer, run_id: run_id.into(), trimmed, records: 0 }
    }

    /// Records written so far.
    #[must_use]
    pub fn records_written(&self) -> u64 {
        self.records
    }
}

impl<W: CloseableWrite> RecordSink for FastqSink<W> {
    fn write_record(&mut self, record: &ReadRecord) -> Result<()> {
        let (bases, qualities) = if self.trimmed {
            (record.trimmed_bases(), record.trimmed_qualities())
        } else {
            (record.bases.as_slice(), record.qualities.as_slice())
        };
        let ascii: Vec<u8> = qualities.iter().map(|q| q.saturating_add(33)).collect();

        self.writer.write_all(b"@")?;
        self.writer.write_all(record.read_name(&self.run_id).as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.write_all(bases)?;
        self.writer.write_all(b"\n+\n")?;
        self.writer.write_all(&ascii)?;
        self.writer.write_all(b"\n")?;
        self.records += 1;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        self.writer.close()?;
        Ok(())
    }
}

/// Opens a FASTQ sink at `path`, gzip-compressed when options are given.
pub fn create_fastq_sink(
    path: &Path,
    run_id: &str,
    trimmed: bool,
    gzip: Option<&GzipOptions>,
) -> Result<Box<dyn RecordSink>> {
    let file = File::create(path)?;
    match gzip {
        Some(options) => {
            let writer = ParallelGzipWriter::new(file, options)?;
            Ok(Box::new(FastqSink::new(writer, run_id, trimmed)))
        }
        None => Ok(Box::new(FastqSink::new(BufWriter::new(file), run_id, trimmed))),
    }
}
