//! Basecall a raw wells file into FASTQ read groups.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};

use flowcall_lib::barcode::ScoringMode;
use flowcall_lib::calibration::CalibrationModel;
use flowcall_lib::filters::FilterThresholds;
use flowcall_lib::logging::OperationTimer;
use flowcall_lib::mask::WellMask;
use flowcall_lib::normalizer::DEFAULT_WINDOW_SIZE;
use flowcall_lib::output::{RecordSink, create_fastq_sink};
use flowcall_lib::params::{BarcodeSpec, FlowSignalsMode, RunConfig, RunSummary};
use flowcall_lib::phase::PhasingParameters;
use flowcall_lib::pipeline::run_pipeline;
use flowcall_lib::quality::QualityTable;
use flowcall_lib::record::OutputGroup;
use flowcall_lib::sampler::SampleSize;
use flowcall_lib::validation::validate_file_exists;
use flowcall_lib::wells::{RawWells, TraceSource};

use crate::commands::command::Command;
use crate::commands::common::{CompressionOptions, ThreadingOptions, parse_sample_size};

/// Basecall raw well signal into FASTQ read groups.
#[derive(Parser, Debug)]
#[command(
    name = "run",
    about = "\x1b[38;5;72m[BASECALLING]\x1b[0m    \x1b[36mBasecall raw well signal into FASTQ read groups\x1b[0m",
    long_about = r#"
Basecall a raw wells file into per-group FASTQ output.

The run first estimates chip-wide phasing from a sample of library wells
(skipped when --cf/--ie/--dr pin the parameters), then basecalls every
live well: key normalization, adaptive normalization with tree-search
dephasing, optional homopolymer recalibration, per-base qualities,
barcode classification, and the filter chain. Records come out in strict
chip order regardless of thread count.

Output lands in --output-dir: one FASTQ per active read group (library,
calibration, test_fragment, unfiltered, unfiltered_trimmed) plus a
summary.json recording the configuration, phase fit, and counters.

EXAMPLES:

  # Basecall with defaults
  flowcall run -i chip.rawwells -m chip.mask -o out/

  # Fixed phasing, gzip output, barcoded library
  flowcall run -i chip.rawwells -m chip.mask -o out/ \
      --cf 0.008 --ie 0.006 --barcodes barcodes.json --gzip
"#
)]
pub struct Run {
    /// Input raw wells file.
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,

    /// Input well classification mask.
    #[arg(short = 'm', long = "mask")]
    pub mask: PathBuf,

    /// Output directory for FASTQ groups and the run summary.
    #[arg(short = 'o', long = "output-dir")]
    pub output_dir: PathBuf,

    /// Run identifier, the leading field of every read name.
    #[arg(long = "run-id", default_value = "RUN")]
    pub run_id: String,

    /// Expected leading bases of library reads.
    #[arg(long = "library-key", default_value = "TCAG")]
    pub library_key: String,

    /// Expected leading bases of test-fragment reads.
    #[arg(long = "tf-key", default_value = "ATCG")]
    pub tf_key: String,

    /// Skip test-fragment wells instead of basecalling them.
    #[arg(long = "skip-tf", default_value_t = false)]
    pub skip_tf: bool,

    /// Extra bases to trim after the key (and barcode, when matched).
    #[arg(long = "extra-trim-left", default_value_t = 0)]
    pub extra_trim_left: usize,

    /// Adaptive normalization window, in flows.
    #[arg(long = "normalization-window", default_value_t = DEFAULT_WINDOW_SIZE)]
    pub normalization_window: usize,

    /// Fit droop alongside carry-forward and incomplete extension.
    #[arg(long = "fit-droop", default_value_t = false)]
    pub fit_droop: bool,

    /// Leave the calibration model out of adaptive normalization.
    #[arg(long = "skip-recal-during-norm", default_value_t = false)]
    pub skip_recal_during_norm: bool,

    /// Per-flow signal values attached to each record.
    #[arg(long = "flow-signals", value_enum, default_value_t = FlowSignalsMode::Default)]
    pub flow_signals: FlowSignalsMode,

    /// Wells per work span claimed by a worker at a time.
    #[arg(long = "span-size", default_value_t = 256)]
    pub span_size: usize,

    /// Unfiltered-subset size: an absolute count, or a fraction of library
    /// wells when the value has a decimal point. 0 disables the streams.
    #[arg(long = "unfiltered-sample", default_value = "100000", value_parser = parse_sample_size)]
    pub unfiltered_sample: SampleSize,

    /// Calibration-training subset size, same shape as --unfiltered-sample.
    #[arg(long = "calibration-sample", default_value = "100000", value_parser = parse_sample_size)]
    pub calibration_sample: SampleSize,

    /// Library wells sampled for the phase fit.
    #[arg(long = "phase-sample", default_value_t = 5000)]
    pub phase_sample: usize,

    /// Fixed carry-forward fraction; any of --cf/--ie/--dr skips the fit.
    #[arg(long = "cf")]
    pub cf: Option<f32>,

    /// Fixed incomplete-extension fraction.
    #[arg(long = "ie")]
    pub ie: Option<f32>,

    /// Fixed droop fraction.
    #[arg(long = "dr")]
    pub dr: Option<f32>,

    /// Library barcode set, as a JSON file of {id, bases} entries.
    #[arg(long = "barcodes")]
    pub barcodes: Option<PathBuf>,

    /// Calibration-panel barcode set; reads matching it are rerouted to the
    /// calibration group instead of the library.
    #[arg(long = "calibration-panel")]
    pub calibration_panel: Option<PathBuf>,

    /// Scoring mode shared by both barcode sets.
    #[arg(long = "barcode-mode", value_enum, default_value_t = ScoringMode::FlowSpace)]
    pub barcode_mode: ScoringMode,

    /// Trained homopolymer calibration model; identity when absent.
    #[arg(long = "calibration-model")]
    pub calibration_model: Option<PathBuf>,

    /// Quality lookup table; the built-in table when absent.
    #[arg(long = "quality-table")]
    pub quality_table: Option<PathBuf>,

    /// Minimum post-trim read length in bases.
    #[arg(long = "min-read-length", default_value_t = 8)]
    pub min_read_length: usize,

    /// Positive-flow fraction above which a well is called polyclonal.
    #[arg(long = "max-ppf", default_value_t = 0.84)]
    pub max_ppf: f32,

    /// Maximum mean squared residual over the early flows.
    #[arg(long = "max-residual", default_value_t = 0.06)]
    pub max_residual: f32,

    /// Window for 3' quality trimming, in bases. 0 disables the trim.
    #[arg(long = "quality-trim-window", default_value_t = 10)]
    pub quality_trim_window: usize,

    /// Minimum mean phred a trailing window must reach to survive.
    #[arg(long = "quality-trim-min-mean", default_value_t = 15.0)]
    pub quality_trim_min_mean: f32,

    /// Adapter bases searched for near the 3' end.
    #[arg(long = "adapter")]
    pub adapter: Option<String>,

    /// Seed shared by the reservoir samplers, for reproducible subsets.
    #[arg(long = "seed")]
    pub seed: Option<u64>,

    #[command(flatten)]
    pub threading: ThreadingOptions,

    #[command(flatten)]
    pub compression: CompressionOptions,
}

impl Run {
    /// Builds the immutable run configuration from the CLI arguments and the
    /// wells file's geometry.
    fn build_config(&self, wells: &RawWells) -> Result<RunConfig> {
        let phasing_override = if self.cf.is_some() || self.ie.is_some() || self.dr.is_some() {
            let defaults = PhasingParameters::default();
            Some(PhasingParameters {
                cf: self.cf.unwrap_or(defaults.cf),
                ie: self.ie.unwrap_or(defaults.ie),
                dr: self.dr.unwrap_or(defaults.dr),
            })
        } else {
            None
        };

        let barcodes = match &self.barcodes {
            Some(path) => {
                validate_file_exists(path, "Barcode set")?;
                BarcodeSpec::set_from_path(path)?
            }
            None => Vec::new(),
        };
        let calibration_panel = match &self.calibration_panel {
            Some(path) => {
                validate_file_exists(path, "Calibration panel")?;
                BarcodeSpec::set_from_path(path)?
            }
            None => Vec::new(),
        };

        let thresholds = FilterThresholds {
            min_length: self.min_read_length,
            ppf_max: self.max_ppf,
            residual_max_mean_squared: self.max_residual,
            quality_trim_window: self.quality_trim_window,
            quality_trim_min_mean: self.quality_trim_min_mean,
            adapter: self.adapter.clone(),
            ..FilterThresholds::default()
        };

        let config = RunConfig {
            run_id: self.run_id.clone(),
            flow_cycle: wells.flow_cycle().to_string(),
            num_flows: wells.num_flows(),
            library_key: self.library_key.clone(),
            tf_key: self.tf_key.clone(),
            process_tf: !self.skip_tf,
            extra_trim_left: self.extra_trim_left,
            normalization_window: self.normalization_window,
            fit_droop: self.fit_droop,
            skip_recal_during_norm: self.skip_recal_during_norm,
            flow_signals: self.flow_signals,
            worker_threads: self.threading.num_threads(),
            writer_threads: self.compression.writer_threads,
            span_size: self.span_size,
            unfiltered_sample: self.unfiltered_sample,
            calibration_sample: self.calibration_sample,
            phase_sample: self.phase_sample,
            phasing_override,
            barcode_mode: self.barcode_mode,
            barcodes,
            calibration_panel,
            calibration_model: self.calibration_model.clone(),
            quality_table: self.quality_table.clone(),
            thresholds,
            seed: self.seed,
        };
        config.validate()?;
        Ok(config)
    }

    /// The output groups this run will write, in fixed order.
    fn active_groups(&self, config: &RunConfig) -> Vec<OutputGroup> {
        let mut groups = vec![OutputGroup::Library];
        if !config.calibration_panel.is_empty()
            || !matches!(config.calibration_sample, SampleSize::Count(0))
        {
            groups.push(OutputGroup::Calibration);
        }
        if config.process_tf {
            groups.push(OutputGroup::TestFragment);
        }
        if !matches!(config.unfiltered_sample, SampleSize::Count(0)) {
            groups.push(OutputGroup::Unfiltered);
            groups.push(OutputGroup::UnfilteredTrimmed);
        }
        groups
    }

    /// Opens one FASTQ sink per active group under the output directory.
    fn build_sinks(&self, config: &RunConfig) -> Result<Vec<(OutputGroup, Box<dyn RecordSink>)>> {
        let gzip = self.compression.gzip_options();
        let extension = if gzip.is_some() { "fastq.gz" } else { "fastq" };
        let mut sinks = Vec::new();
        for group in self.active_groups(config) {
            let path = self.output_dir.join(format!("{}.{extension}", group.name()));
            info!("Group {}: {}", group.name(), path.display());
            let sink = create_fastq_sink(&path, &config.run_id, group.is_trimmed(), gzip.as_ref())?;
            sinks.push((group, sink));
        }
        Ok(sinks)
    }
}

impl Command for Run {
    fn execute(&self, command_line: &str) -> Result<()> {
        self.compression.validate()?;
        validate_file_exists(&self.input, "Input wells")?;
        validate_file_exists(&self.mask, "Input mask")?;

        let timer = OperationTimer::new("Basecalling run");

        let wells = RawWells::from_path(&self.input)?;
        let mask = WellMask::from_path(&self.mask)?;
        let config = self.build_config(&wells)?;

        info!("Input: {}", self.input.display());
        info!("Mask: {}", self.mask.display());
        info!(
            "Chip: {} x {} wells, {} flows over cycle {}",
            mask.geometry().rows(),
            mask.geometry().cols(),
            config.num_flows,
            config.flow_cycle
        );
        info!("{}", self.threading.log_message());

        let calibration = match &self.calibration_model {
            Some(path) => {
                validate_file_exists(path, "Calibration model")?;
                info!("Calibration model: {}", path.display());
                Some(CalibrationModel::from_path(path)?)
            }
            None => None,
        };
        let quality = match &self.quality_table {
            Some(path) => {
                validate_file_exists(path, "Quality table")?;
                info!("Quality table: {}", path.display());
                QualityTable::from_path(path)?
            }
            None => QualityTable::default(),
        };

        std::fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("Failed to create {}", self.output_dir.display()))?;
        let sinks = self.build_sinks(&config)?;

        let output = run_pipeline(&config, &wells, &mask, calibration.as_ref(), quality, sinks)?;

        output.metrics.log_summary();
        for report in &output.reports {
            debug!(
                "Writer {}: {} records in {} batches",
                report.group, report.records, report.batches
            );
        }

        let summary = RunSummary {
            command_line: command_line.to_string(),
            config,
            phase: output.phase.clone(),
            metrics: output.metrics,
        };
        let summary_path = self.output_dir.join("summary.json");
        summary.to_path(&summary_path)?;
        info!("Summary: {}", summary_path.display());

        timer.log_completion(summary.metrics.reads_total());
        Ok(())
    }
}
