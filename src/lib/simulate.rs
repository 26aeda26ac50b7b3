//! Forward-model trace simulation.
//!
//! Generates synthetic wells and mask files by running the dephaser's forward
//! model over random templates: each simulated well gets a key-prefixed
//! sequence, its phased signal under configured carry-forward / incomplete
//! extension, a per-well gain, and Gaussian flow noise. The output grounds
//! integration tests and gives the binary an executable end-to-end path.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::chip::ChipGeometry;
use crate::errors::{FlowcallError, Result};
use crate::flow::{FlowOrder, KeySequence, NUCS};
use crate::mask::{MaskFlags, WellClass, WellMask};
use crate::phase::PhasingParameters;
use crate::treephaser::Treephaser;
use crate::wells::RawWells;

/// Create a random number generator, optionally seeded for reproducibility.
///
/// # Examples
///
/// ```
/// use flowcall_lib::simulate::create_rng;
///
/// // Reproducible
/// let mut rng1 = create_rng(Some(42));
/// let mut rng2 = create_rng(Some(42));
/// // rng1 and rng2 produce identical sequences
///
/// // Fresh entropy each run
/// let mut rng3 = create_rng(None);
/// ```
#[must_use]
pub fn create_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_os_rng(),
    }
}

/// What one simulated well truly holds, kept alongside the generated files so
/// tests can compare calls against ground truth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedWell {
    /// Row-major well index.
    pub index: usize,
    /// The class the mask declares for the well.
    pub class: WellClass,
    /// Full template sequence, key included; empty for excluded wells.
    pub sequence: Vec<u8>,
    /// Index into the simulator's barcode list, when one was inserted.
    pub barcode: Option<usize>,
}

/// A generated chip: traces, mask, and per-well ground truth.
#[derive(Debug, Clone)]
pub struct SimulatedChip {
    /// Raw traces, ready for [`RawWells::to_path`].
    pub wells: RawWells,
    /// Well classification mask, ready for [`WellMask::to_path`].
    pub mask: WellMask,
    /// Ground truth per well, indexed like the chip.
    pub truth: Vec<SimulatedWell>,
}

/// Synthetic run generator.
///
/// Fields are plain so callers can adjust a default and go.
#[derive(Debug, Clone)]
pub struct RunSimulator {
    /// Chip rows.
    pub rows: usize,
    /// Chip columns.
    pub cols: usize,
    /// Repeating flow cycle.
    pub flow_cycle: String,
    /// Flows in the run.
    pub num_flows: usize,
    /// Library key bases.
    pub library_key: String,
    /// Test-fragment key bases.
    pub tf_key: String,
    /// Phasing applied by the forward model.
    pub params: PhasingParameters,
    /// Fraction of wells left empty (no bead).
    pub empty_fraction: f64,
    /// Fraction of wells carrying a test fragment.
    pub tf_fraction: f64,
    /// Mean random insert length in bases.
    pub mean_insert: usize,
    /// Uniform spread around the mean insert length.
    pub insert_spread: usize,
    /// Standard deviation of additive per-flow noise.
    pub noise_stddev: f32,
    /// Standard deviation of the per-well multiplicative gain around 1.0.
    pub gain_stddev: f32,
    /// Barcode bases inserted after the library key, drawn uniformly;
    /// empty disables barcoding.
    pub barcodes: Vec<String>,
}

impl Default for RunSimulator {
    fn default() -> Self {
        Self {
            rows: 16,
            cols: 16,
            flow_cycle: "TACG".to_string(),
            num_flows: 120,
            library_key: "TCAG".to_string(),
            tf_key: "ATCG".to_string(),
            params: PhasingParameters::default(),
            empty_fraction: 0.10,
            tf_fraction: 0.05,
            mean_insert: 40,
            insert_spread: 10,
            noise_stddev: 0.04,
            gain_stddev: 0.10,
            barcodes: Vec::new(),
        }
    }
}

impl RunSimulator {
    /// Generates a chip's traces, mask, and ground truth.
    ///
    /// The same seed always yields the same chip.
    ///
    /// # Errors
    ///
    /// Returns an error if the geometry, flow order, keys, barcodes, or
    /// noise parameters are invalid, or if a key cannot be sequenced within
    /// the run's flows.
    pub fn generate(&self, seed: Option<u64>) -> Result<SimulatedChip> {
        let geometry = ChipGeometry::new(self.rows, self.cols)?;
        let flow_order = FlowOrder::new(&self.flow_cycle, self.num_flows)?;
        let library_key = KeySequence::new("lib", &self.library_key)?;
        let tf_key = KeySequence::new("tf", &self.tf_key)?;
        library_key.usable_key_flows(&flow_order)?;
        tf_key.usable_key_flows(&flow_order)?;
        for (i, barcode) in self.barcodes.iter().enumerate() {
            if barcode.bytes().any(|b| crate::flow::nuc_index(b).is_none()) {
                return Err(FlowcallError::InvalidParameter {
                    parameter: format!("barcode[{i}]"),
                    reason: format!("invalid bases '{barcode}'"),
                });
            }
        }
        if !(0.0..=1.0).contains(&(self.empty_fraction + self.tf_fraction)) {
            return Err(FlowcallError::InvalidParameter {
                parameter: "fractions".to_string(),
                reason: format!(
                    "empty {} + tf {} must stay within [0, 1]",
                    self.empty_fraction, self.tf_fraction
                ),
            });
        }

        let mut rng = create_rng(seed);
        let noise =
            Normal::new(0.0f32, self.noise_stddev).map_err(|e| FlowcallError::InvalidParameter {
                parameter: "noise-stddev".to_string(),
                reason: e.to_string(),
            })?;
        let gain =
            Normal::new(0.0f32, self.gain_stddev).map_err(|e| FlowcallError::InvalidParameter {
                parameter: "gain-stddev".to_string(),
                reason: e.to_string(),
            })?;
        let mut solver = Treephaser::new(&flow_order, self.params);

        let mut wells = RawWells::new(geometry, self.num_flows, &self.flow_cycle)?;
        let mut mask = WellMask::new(geometry);
        let mut truth = Vec::with_capacity(geometry.num_wells());

        let mut ideal = Vec::with_capacity(self.num_flows);
        let mut trace = Vec::with_capacity(self.num_flows);
        for index in 0..geometry.num_wells() {
            let roll: f64 = rng.random();
            let (class, sequence, barcode) = if roll < self.empty_fraction {
                (WellClass::Excluded, Vec::new(), None)
            } else if roll < self.empty_fraction + self.tf_fraction {
                mask.set(index, MaskFlags::BEAD | MaskFlags::LIVE | MaskFlags::TF);
                let mut sequence = tf_key.bases().to_vec();
                sequence.extend(self.random_insert(&mut rng));
                (WellClass::TestFragment, sequence, None)
            } else {
                mask.set(index, MaskFlags::BEAD | MaskFlags::LIVE | MaskFlags::LIB);
                let mut sequence = library_key.bases().to_vec();
                let barcode = if self.barcodes.is_empty() {
                    None
                } else {
                    let pick = rng.random_range(0..self.barcodes.len());
                    sequence.extend(self.barcodes[pick].bytes());
                    Some(pick)
                };
                sequence.extend(self.random_insert(&mut rng));
                (WellClass::Library, sequence, barcode)
            };

            if sequence.is_empty() {
                ideal.clear();
                ideal.resize(self.num_flows, 0.0);
            } else {
                solver.simulate(&sequence, &mut ideal);
            }

            let well_gain = (1.0 + gain.sample(&mut rng)).clamp(0.2, 5.0);
            trace.clear();
            trace.extend(ideal.iter().map(|&v| v * well_gain + noise.sample(&mut rng)));
            wells.set_trace(index, &trace)?;

            truth.push(SimulatedWell { index, class, sequence, barcode });
        }

        Ok(SimulatedChip { wells, mask, truth })
    }

    fn random_insert(&self, rng: &mut StdRng) -> Vec<u8> {
        let low = self.mean_insert.saturating_sub(self.insert_spread);
        let length = low + rng.random_range(0..=self.insert_spread * 2);
        (0..length).map(|_| NUCS[rng.random_range(0..NUCS.len())]).collect()
    }
}
