//! The concurrent basecalling pipeline.
//!
//! A run proceeds in three passes. A sequential pre-pass classifies every
//! well and draws the unfiltered, calibration-training, and phase-fit
//! samples, so the retained sets depend only on the seed. The phase fit then
//! pins the run-wide dephasing parameters. The main pass divides the chip
//! into contiguous spans; workers claim spans through a shared cursor, solve
//! each well privately, and hand finished span batches to the per-group
//! ordered writers, which release records strictly in chip order no matter
//! which worker finishes first.
//!
//! The configuration is immutable throughout; every piece of shared mutable
//! state (cursor, samplers, writers, abort flag) carries its own lock or
//! atomic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use ahash::AHashSet;
use log::{info, warn};
use parking_lot::Mutex;

use crate::barcode::{BarcodeAssignment, BarcodeClassifier};
use crate::calibration::CalibrationModel;
use crate::chip::ChipGeometry;
use crate::errors::{FlowcallError, Result};
use crate::filters::{FilterChain, FilterInput};
use crate::flow::{FlowOrder, KeySequence};
use crate::logging::{OperationTimer, format_count};
use crate::mask::{WellClass, WellMask};
use crate::metrics::BaseCallingMetrics;
use crate::normalizer::{self, AdaptiveNormalizer};
use crate::ordered_writer::{OrderedWriter, WriterReport};
use crate::output::RecordSink;
use crate::params::{FlowSignalsMode, RunConfig};
use crate::phase::{PhaseEstimate, PhaseEstimator, PhasingParameters};
use crate::progress::ProgressTracker;
use crate::quality::{QualityEstimator, QualityTable};
use crate::record::{OutputGroup, ReadRecord};
use crate::sampler::{ReservoirSampler, SharedSampler};
use crate::treephaser::Treephaser;
use crate::wells::TraceSource;

/// Everything a finished run hands back to the caller.
#[derive(Debug)]
pub struct RunOutput {
    /// Aggregate counts merged from every worker.
    pub metrics: BaseCallingMetrics,
    /// The phase estimate the run used, fitted or overridden.
    pub phase: PhaseEstimate,
    /// One report per output group, in sink order.
    pub reports: Vec<WriterReport>,
}

/// Runs the whole pipeline over one chip.
///
/// `sinks` names the output groups this run serializes; groups without a
/// sink are still counted but write nothing. On any failure the remaining
/// workers stop at their next span boundary, all serialization threads are
/// joined, and the first error is returned.
pub fn run_pipeline(
    config: &RunConfig,
    source: &dyn TraceSource,
    mask: &WellMask,
    calibration: Option<&CalibrationModel>,
    quality: QualityTable,
    sinks: Vec<(OutputGroup, Box<dyn RecordSink>)>,
) -> Result<RunOutput> {
    config.validate()?;
    if mask.len() != source.num_wells() {
        return Err(FlowcallError::InvalidGeometry {
            reason: format!(
                "mask covers {} wells but the trace source has {}",
                mask.len(),
                source.num_wells()
            ),
        });
    }
    if config.num_flows != source.num_flows() {
        return Err(FlowcallError::InvalidGeometry {
            reason: format!(
                "run expects {} flows but the trace source has {}",
                config.num_flows,
                source.num_flows()
            ),
        });
    }

    let geometry = mask.geometry();
    let flow_order = config.flow_order()?;
    let flow_nuc: Vec<u8> = flow_order.iter().collect();
    let library_key = config.library_key_sequence()?;
    let library_onemers = library_key.onemer_flows(&flow_order)?;
    let tf_key = if config.process_tf { Some(config.tf_key_sequence()?) } else { None };
    let tf_onemers = match tf_key.as_ref() {
        Some(key) => key.onemer_flows(&flow_order)?,
        None => Vec::new(),
    };

    let mut metrics = BaseCallingMetrics::new();
    let sampled = sample_wells(config, mask, &mut metrics);

    let phase =
        estimate_phase(config, source, &flow_order, &library_onemers, &sampled.phase_wells)?;
    let params = phase.params;

    let library_classifier = if config.barcodes.is_empty() {
        None
    } else {
        Some(BarcodeClassifier::new(
            &flow_order,
            &library_key,
            params,
            config.barcode_mode,
            config.library_barcodes()?,
        )?)
    };
    let panel_classifier = if config.calibration_panel.is_empty() {
        None
    } else {
        Some(BarcodeClassifier::new(
            &flow_order,
            &library_key,
            params,
            config.barcode_mode,
            config.calibration_barcodes()?,
        )?)
    };

    // An identity model never changes a call; drop it up front
    let calibration = calibration.filter(|model| !model.is_identity());
    let norm_recal = if config.skip_recal_during_norm { None } else { calibration };

    let queue_depth = config.worker_threads * 2;
    let writers: Vec<(OutputGroup, Mutex<OrderedWriter>)> = sinks
        .into_iter()
        .map(|(group, sink)| {
            (group, Mutex::new(OrderedWriter::new(group.name(), sink, queue_depth)))
        })
        .collect();

    let num_spans = geometry.num_spans(config.span_size);
    info!(
        "Basecalling {} wells in {} spans with {} workers",
        format_count(geometry.num_wells() as u64),
        format_count(num_spans as u64),
        config.worker_threads
    );

    let mut shared = Shared {
        config,
        source,
        mask,
        geometry,
        flow_order,
        flow_nuc,
        params,
        library_key,
        tf_key,
        library_onemers,
        tf_onemers,
        adaptive: AdaptiveNormalizer::new(config.normalization_window),
        chain: FilterChain::new(config.thresholds.clone()),
        quality: QualityEstimator::new(quality),
        library_classifier,
        panel_classifier,
        calibration,
        norm_recal,
        unfiltered_wells: sampled.unfiltered,
        calibration_wells: sampled.calibration,
        writers,
        num_spans,
        cursor: Mutex::new(0),
        abort: AtomicBool::new(false),
        failure: Mutex::new(None),
        progress: ProgressTracker::new("Basecalled wells"),
    };

    let timer = OperationTimer::new("Main pass");
    let mut panicked = false;
    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(config.worker_threads);
        for _ in 0..config.worker_threads {
            handles.push(scope.spawn(|| shared.worker()));
        }
        for handle in handles {
            match handle.join() {
                Ok(worker_metrics) => metrics.merge(&worker_metrics),
                Err(_) => panicked = true,
            }
        }
    });
    if panicked {
        shared.fail(FlowcallError::Io(std::io::Error::other("worker thread panicked")));
    }

    // Writers are finalized even on the failure path so every serialization
    // thread is joined before the error surfaces.
    let failure = shared.failure.get_mut().take();
    let mut reports = Vec::with_capacity(shared.writers.len());
    let mut finalize_error = None;
    for (_, writer) in &mut shared.writers {
        match writer.get_mut().finalize() {
            Ok(report) => reports.push(report),
            Err(e) => {
                if finalize_error.is_none() {
                    finalize_error = Some(e);
                }
            }
        }
    }
    if let Some(error) = failure {
        return Err(error);
    }
    if let Some(error) = finalize_error {
        return Err(error);
    }

    shared.progress.finish();
    timer.log_completion(metrics.reads_total());
    Ok(RunOutput { metrics, phase, reports })
}

/// The well subsets drawn before the main pass starts.
struct SampledSets {
    unfiltered: AHashSet<usize>,
    calibration: AHashSet<usize>,
    phase_wells: Vec<usize>,
}

/// Classifies every well and draws the three library-well samples.
///
/// Offering is sequential in well order, so the retained sets are a pure
/// function of the mask and the seed.
fn sample_wells(config: &RunConfig, mask: &WellMask, metrics: &mut BaseCallingMetrics) -> SampledSets {
    let library_population = mask.count_of(WellClass::Library);
    let unfiltered_capacity = config.unfiltered_sample.resolve(library_population);
    let calibration_capacity = config.calibration_sample.resolve(library_population);

    let unfiltered = SharedSampler::new(ReservoirSampler::new(unfiltered_capacity, config.seed));
    let calibration = SharedSampler::new(ReservoirSampler::new(
        calibration_capacity,
        config.seed.map(|s| s.wrapping_add(1)),
    ));
    let phase = SharedSampler::new(ReservoirSampler::new(
        config.phase_sample,
        config.seed.map(|s| s.wrapping_add(2)),
    ));

    for well in 0..mask.len() {
        let class = mask.class_of(well);
        metrics.record_well(class);
        if class == WellClass::Library {
            unfiltered.offer(well);
            calibration.offer(well);
            phase.offer(well);
        }
    }

    let mut phase_wells = phase.into_inner().into_items();
    phase_wells.sort_unstable();
    SampledSets {
        unfiltered: unfiltered.into_inner().into_items().into_iter().collect(),
        calibration: calibration.into_inner().into_items().into_iter().collect(),
        phase_wells,
    }
}

/// Produces the run's phase estimate: the configured override verbatim, or a
/// fit over the sampled key-normalized traces with fallback to defaults when
/// the fit fails to converge.
fn estimate_phase(
    config: &RunConfig,
    source: &dyn TraceSource,
    flow_order: &FlowOrder,
    onemer_flows: &[usize],
    phase_wells: &[usize],
) -> Result<PhaseEstimate> {
    if let Some(params) = config.phasing_override {
        info!("Phasing fixed at cf {:.4} ie {:.4} dr {:.4}", params.cf, params.ie, params.dr);
        return Ok(PhaseEstimate {
            params,
            converged: true,
            iterations: 0,
            objective: 0.0,
            samples: 0,
        });
    }

    let timer = OperationTimer::new("Phase estimation");
    let mut traces = Vec::with_capacity(phase_wells.len());
    let mut trace = Vec::new();
    for &well in phase_wells {
        source.read_flow_trace(well, &mut trace)?;
        normalizer::key_normalize(&mut trace, onemer_flows);
        traces.push(trace.clone());
    }

    let mut estimator = PhaseEstimator::new(flow_order);
    if config.fit_droop {
        estimator = estimator.with_droop();
    }
    let estimate = estimator.fit(&traces);
    timer.log_completion(estimate.samples as u64);

    if estimate.converged {
        info!(
            "Phase fit: cf {:.4} ie {:.4} dr {:.4} over {} wells",
            estimate.params.cf, estimate.params.ie, estimate.params.dr, estimate.samples
        );
        Ok(estimate)
    } else {
        warn!(
            "Phase fit did not converge after {} iterations; using default parameters",
            estimate.iterations
        );
        Ok(PhaseEstimate::fallback(estimate.samples))
    }
}

/// Read-only collaborators plus the shared mutable handles of one run.
struct Shared<'a> {
    config: &'a RunConfig,
    source: &'a dyn TraceSource,
    mask: &'a WellMask,
    geometry: ChipGeometry,
    flow_order: FlowOrder,
    flow_nuc: Vec<u8>,
    params: PhasingParameters,
    library_key: KeySequence,
    tf_key: Option<KeySequence>,
    library_onemers: Vec<usize>,
    tf_onemers: Vec<usize>,
    adaptive: AdaptiveNormalizer,
    chain: FilterChain,
    quality: QualityEstimator,
    library_classifier: Option<BarcodeClassifier>,
    panel_classifier: Option<BarcodeClassifier>,
    calibration: Option<&'a CalibrationModel>,
    norm_recal: Option<&'a CalibrationModel>,
    unfiltered_wells: AHashSet<usize>,
    calibration_wells: AHashSet<usize>,
    writers: Vec<(OutputGroup, Mutex<OrderedWriter>)>,
    num_spans: usize,
    cursor: Mutex<usize>,
    abort: AtomicBool,
    failure: Mutex<Option<FlowcallError>>,
    progress: ProgressTracker,
}

/// Per-worker solver and reusable buffers.
struct WorkerScratch {
    solver: Treephaser,
    raw: Vec<f32>,
    trace: Vec<f32>,
    key_trace: Vec<f32>,
    destinations: Vec<OutputGroup>,
}

impl Shared<'_> {
    /// Claims the next unprocessed span sequence number.
    fn claim(&self) -> Option<usize> {
        let mut cursor = self.cursor.lock();
        if *cursor >= self.num_spans {
            return None;
        }
        let seq = *cursor;
        *cursor += 1;
        Some(seq)
    }

    /// Records the first failure and tells every worker to stop.
    fn fail(&self, error: FlowcallError) {
        let mut slot = self.failure.lock();
        if slot.is_none() {
            *slot = Some(error);
        }
        self.abort.store(true, Ordering::Relaxed);
    }

    /// Index of the writer serving `group`, when one was configured.
    fn group_slot(&self, group: OutputGroup) -> Option<usize> {
        self.writers.iter().position(|(g, _)| *g == group)
    }

    /// One worker's main loop: claim a span, basecall its wells, submit the
    /// batches, repeat until the chip is exhausted or the run aborts.
    fn worker(&self) -> BaseCallingMetrics {
        let mut metrics = BaseCallingMetrics::new();
        let mut scratch = WorkerScratch {
            solver: Treephaser::new(&self.flow_order, self.params),
            raw: Vec::new(),
            trace: Vec::new(),
            key_trace: Vec::new(),
            destinations: Vec::new(),
        };
        let mut batches: Vec<Vec<ReadRecord>> = self.writers.iter().map(|_| Vec::new()).collect();

        while !self.abort.load(Ordering::Relaxed) {
            let Some(seq) = self.claim() else { break };
            let Some(span) = self.geometry.span_at(seq, self.config.span_size) else { break };

            let mut well_error = None;
            for well in span.indices() {
                if let Err(e) = self.process_well(well, &mut scratch, &mut metrics, &mut batches) {
                    well_error = Some(e);
                    break;
                }
            }
            if let Some(error) = well_error {
                self.fail(error);
                break;
            }

            // Every writer sees every claimed span, empty batches included,
            // so span `seq` never blocks reassembly of its successors.
            let mut submit_error = None;
            for (slot, (_, writer)) in self.writers.iter().enumerate() {
                let batch = std::mem::take(&mut batches[slot]);
                if let Err(e) = writer.lock().submit(seq as u64, batch) {
                    submit_error = Some(e);
                    break;
                }
            }
            if let Some(error) = submit_error {
                self.fail(error);
                break;
            }
            self.progress.inc(span.len() as u64);
        }
        metrics
    }

    /// Basecalls one well and appends its record to the destination batches.
    fn process_well(
        &self,
        well: usize,
        scratch: &mut WorkerScratch,
        metrics: &mut BaseCallingMetrics,
        batches: &mut [Vec<ReadRecord>],
    ) -> Result<()> {
        let class = self.mask.class_of(well);
        let (key, onemers) = match class {
            WellClass::Library => (&self.library_key, &self.library_onemers),
            WellClass::TestFragment => match self.tf_key.as_ref() {
                Some(key) => (key, &self.tf_onemers),
                None => return Ok(()),
            },
            WellClass::Excluded => return Ok(()),
        };

        self.source.read_flow_trace(well, &mut scratch.raw)?;
        scratch.trace.clone_from(&scratch.raw);
        normalizer::key_normalize(&mut scratch.trace, onemers);
        scratch.key_trace.clone_from(&scratch.trace);

        let mut call = scratch.solver.normalize_and_solve(
            &mut scratch.trace,
            &self.adaptive,
            Some(key),
            self.norm_recal,
        );
        let mut qualities = self.quality.qualities(&call);

        // The calibration panel outranks the library set: a panel match
        // reroutes the read instead of demultiplexing it.
        let mut panel_matched = false;
        let assignment = if class == WellClass::Library {
            let panel = self
                .panel_classifier
                .as_ref()
                .map(|classifier| classifier.classify(&call, &scratch.trace))
                .filter(BarcodeAssignment::is_matched);
            if panel.is_some() {
                panel_matched = true;
                panel
            } else {
                self.library_classifier
                    .as_ref()
                    .map(|classifier| classifier.classify(&call, &scratch.trace))
            }
        } else {
            None
        };

        if let Some(model) = self.calibration {
            model.apply_to_call(&mut call, &self.flow_nuc, &scratch.trace);
            qualities = self.quality.qualities(&call);
        }

        let trim_start = match &assignment {
            Some(BarcodeAssignment::Matched { bases_to_trim, .. }) => {
                bases_to_trim + self.config.extra_trim_left
            }
            _ => key.len() + self.config.extra_trim_left,
        };

        let verdict = self.chain.evaluate(&FilterInput {
            key,
            trace: &scratch.key_trace,
            call: &call,
            qualities: &qualities,
            prefix_trim: trim_start,
        });

        let end = verdict.trim_end.min(call.bases.len());
        let trimmed_len = end.saturating_sub(trim_start.min(end));
        metrics.record_read(verdict.flags, assignment.as_ref(), trimmed_len as u64);

        let passing = verdict.flags.is_passing();
        scratch.destinations.clear();
        match class {
            WellClass::Library => {
                if passing {
                    if panel_matched {
                        scratch.destinations.push(OutputGroup::Calibration);
                    } else {
                        scratch.destinations.push(OutputGroup::Library);
                        if self.calibration_wells.contains(&well) {
                            scratch.destinations.push(OutputGroup::Calibration);
                        }
                    }
                }
                // The unfiltered streams carry the sampled wells whether or
                // not their reads pass.
                if self.unfiltered_wells.contains(&well) {
                    scratch.destinations.push(OutputGroup::Unfiltered);
                    scratch.destinations.push(OutputGroup::UnfilteredTrimmed);
                }
            }
            WellClass::TestFragment => {
                if passing {
                    scratch.destinations.push(OutputGroup::TestFragment);
                }
            }
            WellClass::Excluded => {}
        }

        let total = scratch
            .destinations
            .iter()
            .filter(|group| self.group_slot(**group).is_some())
            .count();
        if total == 0 {
            return Ok(());
        }

        let (row, col) = self.geometry.coords(well);
        let flow_signals = match self.config.flow_signals {
            FlowSignalsMode::Default => Vec::new(),
            FlowSignalsMode::Raw => scratch.raw.clone(),
            FlowSignalsMode::KeyNormalized => scratch.key_trace.clone(),
            FlowSignalsMode::AdaptiveNormalized => {
                scratch.trace.iter().map(|v| v.clamp(-1.0, 15.0)).collect()
            }
            FlowSignalsMode::Unclipped => scratch.trace.clone(),
        };
        let record = ReadRecord {
            well_index: well,
            row,
            col,
            bases: std::mem::take(&mut call.bases),
            qualities,
            flow_signals,
            barcode: assignment.unwrap_or(BarcodeAssignment::Unclassified),
            flags: verdict.flags,
            trim_start,
            trim_end: verdict.trim_end,
        };

        let mut emitted = 0;
        for &group in &scratch.destinations {
            let Some(slot) = self.group_slot(group) else { continue };
            metrics.record_routed(group);
            emitted += 1;
            if emitted == total {
                batches[slot].push(record);
                break;
            }
            batches[slot].push(record.clone());
        }
        Ok(())
    }
}
