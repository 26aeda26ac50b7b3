//! Common CLI options shared across commands.
//!
//! Argument structures here are composed into command structs with
//! `#[command(flatten)]`, alongside parsers for arguments with
//! non-standard shapes.

use clap::Args;

use flowcall_lib::output::GzipOptions;
use flowcall_lib::params::default_worker_threads;
use flowcall_lib::sampler::SampleSize;

/// Worker threading options for the basecalling pass.
#[derive(Debug, Clone, Default, Args)]
pub struct ThreadingOptions {
    /// Worker threads for basecalling; defaults to the available parallelism.
    #[arg(long = "threads")]
    pub threads: Option<usize>,
}

impl ThreadingOptions {
    /// Creates options pinned to an explicit worker count.
    #[must_use]
    pub fn new(threads: usize) -> Self {
        Self {
            threads: Some(threads),
        }
    }

    /// The resolved worker count.
    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.threads.unwrap_or_else(default_worker_threads)
    }

    /// Capacity of the ordered queue in front of each output stream.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.num_threads() * 2
    }

    /// A log message describing the resolved configuration.
    #[must_use]
    pub fn log_message(&self) -> String {
        match self.threads {
            Some(n) => format!("Using {n} worker threads"),
            None => format!("Using {} worker threads (auto-detected)", self.num_threads()),
        }
    }
}

/// Compression options for FASTQ output streams.
#[derive(Debug, Clone, Args)]
pub struct CompressionOptions {
    /// Gzip-compress FASTQ outputs.
    #[arg(long = "gzip", default_value_t = false)]
    pub gzip: bool,

    /// Gzip compression level (1-12).
    #[arg(long = "gzip-level", default_value_t = 6)]
    pub gzip_level: u8,

    /// Compressor threads per gzip output stream.
    #[arg(long = "writer-threads", default_value_t = 4)]
    pub writer_threads: usize,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self {
            gzip: false,
            gzip_level: 6,
            writer_threads: 4,
        }
    }
}

impl CompressionOptions {
    /// Validates the compression settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the level is outside 1-12 or the writer thread
    /// count is zero.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(1..=12).contains(&self.gzip_level) {
            anyhow::bail!(
                "gzip-level ({}) must be between 1 and 12",
                self.gzip_level
            );
        }
        if self.writer_threads == 0 {
            anyhow::bail!("writer-threads must be at least 1");
        }
        Ok(())
    }

    /// The gzip settings for sink construction, when compression is enabled.
    #[must_use]
    pub fn gzip_options(&self) -> Option<GzipOptions> {
        self.gzip.then(|| GzipOptions {
            threads: self.writer_threads,
            level: self.gzip_level,
        })
    }
}

/// Parses a sample-size argument.
///
/// A bare integer is an absolute well count; a value containing a decimal
/// point is a fraction of the eligible wells.
pub fn parse_sample_size(s: &str) -> Result<SampleSize, String> {
    if s.contains('.') {
        let fraction: f64 = s.parse().map_err(|e| format!("{e}"))?;
        if !(0.0..=1.0).contains(&fraction) {
            return Err(format!("fraction {fraction} must be between 0.0 and 1.0"));
        }
        Ok(SampleSize::Fraction(fraction))
    } else {
        let count: u64 = s.parse().map_err(|e| format!("{e}"))?;
        Ok(SampleSize::Count(count))
    }
}
