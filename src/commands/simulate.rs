//! Generate a synthetic chip with known ground truth.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use flowcall_lib::logging::{OperationTimer, format_count};
use flowcall_lib::mask::WellClass;
use flowcall_lib::phase::PhasingParameters;
use flowcall_lib::simulate::{RunSimulator, SimulatedChip};

use crate::commands::command::Command;

/// Generate a synthetic chip with known ground truth.
#[derive(Parser, Debug)]
#[command(
    name = "simulate",
    about = "\x1b[38;5;166m[UTILITIES]\x1b[0m      \x1b[36mGenerate a synthetic chip with known ground truth\x1b[0m",
    long_about = r#"
Generate a raw wells file and matching mask by running the phasing
forward model over random templates.

Each live well gets a key-prefixed random sequence (with an optional
barcode inserted after the library key), its phased flow signal under
the configured carry-forward / incomplete extension / droop, a per-well
gain, and Gaussian flow noise. The optional truth TSV records what each
well truly holds, for checking calls against ground truth.

EXAMPLES:

  # A small reproducible chip
  flowcall simulate -w chip.rawwells -m chip.mask --seed 42

  # A barcoded chip with its ground truth
  flowcall simulate -w chip.rawwells -m chip.mask --truth truth.tsv \
      --barcode CTAAGGTAAC --barcode TAAGGAGAAC --seed 42
"#
)]
pub struct Simulate {
    /// Output raw wells file.
    #[arg(short = 'w', long = "wells")]
    pub wells: PathBuf,

    /// Output well classification mask.
    #[arg(short = 'm', long = "mask")]
    pub mask: PathBuf,

    /// Optional ground-truth TSV (well, row, col, class, barcode, sequence).
    #[arg(long = "truth")]
    pub truth: Option<PathBuf>,

    /// Chip rows.
    #[arg(long = "rows", default_value_t = 16)]
    pub rows: usize,

    /// Chip columns.
    #[arg(long = "cols", default_value_t = 16)]
    pub cols: usize,

    /// Flows in the run.
    #[arg(long = "num-flows", default_value_t = 120)]
    pub num_flows: usize,

    /// Repeating flow cycle.
    #[arg(long = "flow-cycle", default_value = "TACG")]
    pub flow_cycle: String,

    /// Library key bases.
    #[arg(long = "library-key", default_value = "TCAG")]
    pub library_key: String,

    /// Test-fragment key bases.
    #[arg(long = "tf-key", default_value = "ATCG")]
    pub tf_key: String,

    /// Carry-forward fraction applied by the forward model.
    #[arg(long = "cf", default_value_t = 0.0080)]
    pub cf: f32,

    /// Incomplete-extension fraction.
    #[arg(long = "ie", default_value_t = 0.0055)]
    pub ie: f32,

    /// Droop fraction.
    #[arg(long = "dr", default_value_t = 0.0)]
    pub dr: f32,

    /// Fraction of wells left empty.
    #[arg(long = "empty-fraction", default_value_t = 0.10)]
    pub empty_fraction: f64,

    /// Fraction of wells carrying a test fragment.
    #[arg(long = "tf-fraction", default_value_t = 0.05)]
    pub tf_fraction: f64,

    /// Mean random insert length in bases.
    #[arg(long = "mean-insert", default_value_t = 40)]
    pub mean_insert: usize,

    /// Uniform spread around the mean insert length.
    #[arg(long = "insert-spread", default_value_t = 10)]
    pub insert_spread: usize,

    /// Standard deviation of additive per-flow noise.
    #[arg(long = "noise", default_value_t = 0.04)]
    pub noise: f32,

    /// Standard deviation of the per-well gain around 1.0.
    #[arg(long = "gain-spread", default_value_t = 0.10)]
    pub gain_spread: f32,

    /// Barcode bases inserted after the library key; repeat for more.
    #[arg(long = "barcode")]
    pub barcodes: Vec<String>,

    /// Seed for reproducible chips.
    #[arg(long = "seed")]
    pub seed: Option<u64>,
}

impl Simulate {
    fn simulator(&self) -> RunSimulator {
        RunSimulator {
            rows: self.rows,
            cols: self.cols,
            flow_cycle: self.flow_cycle.clone(),
            num_flows: self.num_flows,
            library_key: self.library_key.clone(),
            tf_key: self.tf_key.clone(),
            params: PhasingParameters { cf: self.cf, ie: self.ie, dr: self.dr },
            empty_fraction: self.empty_fraction,
            tf_fraction: self.tf_fraction,
            mean_insert: self.mean_insert,
            insert_spread: self.insert_spread,
            noise_stddev: self.noise,
            gain_stddev: self.gain_spread,
            barcodes: self.barcodes.clone(),
        }
    }
}

impl Command for Simulate {
    fn execute(&self, _command_line: &str) -> Result<()> {
        let timer = OperationTimer::new("Simulating chip");

        info!("Chip: {} x {} wells, {} flows over cycle {}", self.rows, self.cols, self.num_flows, self.flow_cycle);
        info!("Phasing: cf {:.4}, ie {:.4}, dr {:.4}", self.cf, self.ie, self.dr);
        if !self.barcodes.is_empty() {
            info!("Barcodes: {}", self.barcodes.join(", "));
        }

        let chip = self.simulator().generate(self.seed)?;

        chip.wells.to_path(&self.wells)?;
        info!("Wells: {}", self.wells.display());
        chip.mask.to_path(&self.mask)?;
        info!("Mask: {}", self.mask.display());
        if let Some(path) = &self.truth {
            write_truth(path, &chip)?;
            info!("Truth: {}", path.display());
        }

        info!(
            "Classes: {} library, {} test fragment, {} empty",
            format_count(chip.mask.count_of(WellClass::Library) as u64),
            format_count(chip.mask.count_of(WellClass::TestFragment) as u64),
            format_count(chip.mask.count_of(WellClass::Excluded) as u64)
        );

        timer.log_completion(chip.truth.len() as u64);
        Ok(())
    }
}

/// Writes the per-well ground truth as a TSV with a header row.
fn write_truth(path: &Path, chip: &SimulatedChip) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "well\trow\tcol\tclass\tbarcode\tsequence")?;

    let geometry = chip.mask.geometry();
    for well in &chip.truth {
        let (row, col) = geometry.coords(well.index);
        let class = match well.class {
            WellClass::Library => "library",
            WellClass::TestFragment => "test_fragment",
            WellClass::Excluded => "excluded",
        };
        let barcode = well.barcode.map_or_else(|| ".".to_string(), |pick| pick.to_string());
        writeln!(
            writer,
            "{}\t{row}\t{col}\t{class}\t{barcode}\t{}",
            well.index,
            String::from_utf8_lossy(&well.sequence)
        )?;
    }
    writer.flush()?;
    Ok(())
}
