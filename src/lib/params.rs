//! Run configuration.
//!
//! A `RunConfig` is resolved once by the `run` command and passed by shared
//! reference afterwards; nothing mutates it while the pipeline runs. Shared
//! mutable state (samplers, writers, the work cursor) lives behind its own
//! synchronization, never inside the config.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::barcode::{Barcode, DEFAULT_BASE_THRESHOLD, DEFAULT_FLOW_THRESHOLD, ScoringMode};
use crate::errors::{FlowcallError, Result};
use crate::filters::FilterThresholds;
use crate::flow::{FlowOrder, KeySequence};
use crate::metrics::BaseCallingMetrics;
use crate::normalizer;
use crate::phase::{PhaseEstimate, PhasingParameters};
use crate::sampler::SampleSize;

/// What the per-read `flow_signals` field carries in output records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowSignalsMode {
    /// No per-flow signal output.
    #[default]
    #[value(name = "default")]
    Default,
    /// The raw trace as read from the wells file.
    #[value(name = "raw")]
    Raw,
    /// The trace after key normalization only.
    #[value(name = "key-normalized")]
    KeyNormalized,
    /// The trace after adaptive normalization, clipped to `[-1, 15]`.
    #[value(name = "adaptive-normalized")]
    AdaptiveNormalized,
    /// The trace after adaptive normalization, unclipped.
    #[value(name = "unclipped")]
    Unclipped,
}

impl FlowSignalsMode {
    /// True if records carry a per-flow signal vector at all.
    #[must_use]
    pub fn emits_signals(self) -> bool {
        !matches!(self, FlowSignalsMode::Default)
    }
}

/// One barcode as declared in a barcode set file.
///
/// `threshold` falls back to the scoring mode's default when omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarcodeSpec {
    /// Identifier reported in classified records.
    pub id: String,
    /// Barcode bases, 5' to 3', immediately after the key.
    pub bases: String,
    /// Maximum acceptable distance for a match.
    #[serde(default)]
    pub threshold: Option<f32>,
}

impl BarcodeSpec {
    /// Converts this declaration into a validated [`Barcode`] for `mode`.
    pub fn to_barcode(&self, mode: ScoringMode) -> Result<Barcode> {
        let threshold = self.threshold.unwrap_or(match mode {
            ScoringMode::FlowSpace => DEFAULT_FLOW_THRESHOLD,
            ScoringMode::BaseSpace => DEFAULT_BASE_THRESHOLD,
        });
        Barcode::new(self.id.clone(), self.bases.as_bytes(), threshold)
    }

    /// Reads a barcode set from a JSON file: an array of specs.
    pub fn read_set<R: Read>(reader: R, path: &str) -> Result<Vec<BarcodeSpec>> {
        serde_json::from_reader(reader).map_err(|e| FlowcallError::InvalidFileFormat {
            file_type: "barcode set".to_string(),
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    /// Reads a barcode set from a JSON file at `path`.
    pub fn set_from_path<P: AsRef<Path>>(path: P) -> Result<Vec<BarcodeSpec>> {
        let display = path.as_ref().display().to_string();
        let reader = BufReader::new(File::open(&path)?);
        Self::read_set(reader, &display)
    }
}

/// Everything a run needs to know, resolved before any worker starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Run identifier; the leading field of every read name.
    pub run_id: String,
    /// Repeating flow cycle, e.g. `TACG`.
    pub flow_cycle: String,
    /// Total flows in the run; must match the wells file.
    pub num_flows: usize,
    /// Expected leading bases of library reads.
    pub library_key: String,
    /// Expected leading bases of test-fragment reads.
    pub tf_key: String,
    /// Basecall test-fragment wells into their own group.
    pub process_tf: bool,
    /// Extra bases trimmed from the 5' end after key and barcode.
    pub extra_trim_left: usize,
    /// Adaptive normalization window, in flows.
    pub normalization_window: usize,
    /// Fit the droop fraction in addition to carry-forward and incomplete
    /// extension.
    pub fit_droop: bool,
    /// Leave the calibration model out of adaptive normalization; the final
    /// adjustment still applies.
    pub skip_recal_during_norm: bool,
    /// Per-flow signal output mode.
    pub flow_signals: FlowSignalsMode,
    /// Worker threads for the main pass.
    pub worker_threads: usize,
    /// Compressor threads per gzip output stream.
    pub writer_threads: usize,
    /// Wells per claimable span.
    pub span_size: usize,
    /// Unfiltered-subset size, as a count or a fraction of library wells.
    pub unfiltered_sample: SampleSize,
    /// Calibration-training subset size.
    pub calibration_sample: SampleSize,
    /// Wells sampled for the phase fit.
    pub phase_sample: usize,
    /// Fixed phasing parameters; skips the fit when present.
    pub phasing_override: Option<PhasingParameters>,
    /// Scoring mode shared by both barcode sets.
    pub barcode_mode: ScoringMode,
    /// Library barcode set; empty disables classification.
    pub barcodes: Vec<BarcodeSpec>,
    /// Calibration panel barcode set; matches route to the calibration group.
    pub calibration_panel: Vec<BarcodeSpec>,
    /// Trained calibration model file; identity when absent.
    pub calibration_model: Option<PathBuf>,
    /// Quality lookup table file; the built-in table when absent.
    pub quality_table: Option<PathBuf>,
    /// Filter chain thresholds.
    pub thresholds: FilterThresholds,
    /// Seed shared by every sampler; a fresh seed per run when absent.
    pub seed: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            run_id: "RUN".to_string(),
            flow_cycle: "TACG".to_string(),
            num_flows: 260,
            library_key: "TCAG".to_string(),
            tf_key: "ATCG".to_string(),
            process_tf: true,
            extra_trim_left: 0,
            normalization_window: normalizer::DEFAULT_WINDOW_SIZE,
            fit_droop: false,
            skip_recal_during_norm: false,
            flow_signals: FlowSignalsMode::Default,
            worker_threads: default_worker_threads(),
            writer_threads: 4,
            span_size: 256,
            unfiltered_sample: SampleSize::Count(100_000),
            calibration_sample: SampleSize::Count(100_000),
            phase_sample: 5000,
            phasing_override: None,
            barcode_mode: ScoringMode::FlowSpace,
            barcodes: Vec::new(),
            calibration_panel: Vec::new(),
            calibration_model: None,
            quality_table: None,
            thresholds: FilterThresholds::default(),
            seed: None,
        }
    }
}

/// All available cores, with a floor of one.
#[must_use]
pub fn default_worker_threads() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

impl RunConfig {
    /// Checks every field for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let invalid = |parameter: &str, reason: String| FlowcallError::InvalidParameter {
            parameter: parameter.to_string(),
            reason,
        };

        if self.run_id.is_empty() || self.run_id.contains(':') {
            return Err(invalid(
                "run-id",
                "must be non-empty and must not contain ':'".to_string(),
            ));
        }

        // Keys must be sequenceable within the run's flows
        let flow_order = self.flow_order()?;
        self.library_key_sequence()?.usable_key_flows(&flow_order)?;
        if self.process_tf {
            self.tf_key_sequence()?.usable_key_flows(&flow_order)?;
        }

        if self.worker_threads == 0 {
            return Err(invalid("threads", "must be >= 1".to_string()));
        }
        if self.writer_threads == 0 {
            return Err(invalid("writer-threads", "must be >= 1".to_string()));
        }
        if self.span_size == 0 {
            return Err(invalid("span-size", "must be >= 1".to_string()));
        }
        if self.normalization_window == 0 {
            return Err(invalid("normalization-window", "must be >= 1".to_string()));
        }
        if self.phase_sample == 0 {
            return Err(invalid("phase-sample", "must be >= 1".to_string()));
        }

        let t = &self.thresholds;
        if t.ppf_first_flow >= t.ppf_last_flow {
            return Err(invalid(
                "ppf-window",
                format!("first flow {} must precede last flow {}", t.ppf_first_flow, t.ppf_last_flow),
            ));
        }
        if !(0.0..=1.0).contains(&t.ppf_max) {
            return Err(invalid("ppf-max", format!("{} outside [0, 1]", t.ppf_max)));
        }

        // Surface bad barcode declarations before any work starts
        for spec in self.barcodes.iter().chain(self.calibration_panel.iter()) {
            spec.to_barcode(self.barcode_mode)?;
        }
        // An id appearing twice (in either set) would make classified records
        // ambiguous
        if let Some(id) = self
            .barcodes
            .iter()
            .chain(self.calibration_panel.iter())
            .map(|s| s.id.as_str())
            .duplicates()
            .next()
        {
            return Err(invalid("barcodes", format!("duplicate barcode id '{id}'")));
        }
        Ok(())
    }

    /// The run's flow order.
    pub fn flow_order(&self) -> Result<FlowOrder> {
        FlowOrder::new(&self.flow_cycle, self.num_flows)
    }

    /// The library key as a validated sequence.
    pub fn library_key_sequence(&self) -> Result<KeySequence> {
        KeySequence::new("lib", &self.library_key)
    }

    /// The test-fragment key as a validated sequence.
    pub fn tf_key_sequence(&self) -> Result<KeySequence> {
        KeySequence::new("tf", &self.tf_key)
    }

    /// The library barcode set, validated for the configured mode.
    pub fn library_barcodes(&self) -> Result<Vec<Barcode>> {
        self.barcodes.iter().map(|s| s.to_barcode(self.barcode_mode)).collect()
    }

    /// The calibration panel, validated for the configured mode.
    pub fn calibration_barcodes(&self) -> Result<Vec<Barcode>> {
        self.calibration_panel.iter().map(|s| s.to_barcode(self.barcode_mode)).collect()
    }
}

/// The run summary persisted as JSON once a run completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Full command line as invoked.
    pub command_line: String,
    /// The resolved configuration the run used.
    pub config: RunConfig,
    /// Phase-fit outcome, including convergence status.
    pub phase: PhaseEstimate,
    /// Aggregate counts over the whole run.
    pub metrics: BaseCallingMetrics,
}

impl RunSummary {
    /// Writes the summary as pretty-printed JSON.
    pub fn write<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer_pretty(writer, self)
            .map_err(|e| FlowcallError::Io(std::io::Error::other(e)))
    }

    /// Writes the summary to a file.
    pub fn to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Reads a summary back from a file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let display = path.as_ref().display().to_string();
        let reader = BufReader::new(File::open(&path)?);
        serde_json::from_reader(reader).map_err(|e| FlowcallError::InvalidFileFormat {
            file_type: "run summary".to_string(),
            path: display,
            reason: e.to_string(),
        })
    }
}
