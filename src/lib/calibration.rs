//! Homopolymer calibration.
//!
//! Systematic signal bias varies by nucleotide and homopolymer length, so a
//! calibration model carries one linear correction (gain and offset) per
//! `(nucleotide, length)` pair. The model participates twice: it adjusts the
//! reference prediction during adaptive normalization, and after solving it
//! may revise calls whose corrected signal rounds to a neighboring length.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{FlowcallError, Result};
use crate::flow::nuc_index;
use crate::treephaser::BaseCall;

/// Homopolymer lengths covered by the model, 0 through 11 inclusive.
pub const HP_SLOTS: usize = 12;

/// Linear correction for one `(nucleotide, homopolymer length)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationEntry {
    pub gain: f32,
    pub offset: f32,
}

impl CalibrationEntry {
    const IDENTITY: Self = Self { gain: 1.0, offset: 0.0 };

    fn is_identity(self) -> bool {
        self == Self::IDENTITY
    }

    fn apply(self, value: f32) -> f32 {
        value * self.gain + self.offset
    }
}

/// One row of the serialized model file.
#[derive(Debug, Serialize, Deserialize)]
struct CalibrationRow {
    nuc: char,
    hp: usize,
    gain: f32,
    offset: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct CalibrationFile {
    entries: Vec<CalibrationRow>,
}

/// Per `(nucleotide, homopolymer length)` linear corrections.
///
/// The default model is the identity and applying it never changes a call.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationModel {
    entries: [[CalibrationEntry; HP_SLOTS]; 4],
}

impl Default for CalibrationModel {
    fn default() -> Self {
        Self { entries: [[CalibrationEntry::IDENTITY; HP_SLOTS]; 4] }
    }
}

impl CalibrationModel {
    /// The entry for a nucleotide and homopolymer length. Unknown nucleotides
    /// and out-of-range lengths get the identity.
    #[must_use]
    pub fn entry(&self, nuc: u8, hp: usize) -> CalibrationEntry {
        match nuc_index(nuc) {
            Some(idx) if hp < HP_SLOTS => self.entries[idx][hp],
            _ => CalibrationEntry::IDENTITY,
        }
    }

    /// Sets the correction for a nucleotide and homopolymer length. Unknown
    /// nucleotides and out-of-range lengths are ignored.
    pub fn set(&mut self, nuc: u8, hp: usize, gain: f32, offset: f32) {
        if let Some(idx) = nuc_index(nuc) {
            if hp < HP_SLOTS {
                self.entries[idx][hp] = CalibrationEntry { gain, offset };
            }
        }
    }

    /// True when no entry deviates from the identity.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.entries.iter().flatten().all(|entry| entry.is_identity())
    }

    /// Corrects a single flow value using the entry selected by rounding the
    /// value itself.
    #[must_use]
    pub fn adjust_flow(&self, nuc: u8, value: f32) -> f32 {
        let hp = value.round().clamp(0.0, (HP_SLOTS - 1) as f32) as usize;
        self.entry(nuc, hp).apply(value)
    }

    /// Revises a solved call against the measured (normalized) signal.
    ///
    /// For each flow with a non-identity entry for its called length, the
    /// corrected measurement is re-rounded; when it lands on a neighboring
    /// length the call is moved by one. Flows with identity entries are left
    /// alone, so the default model never rewrites anything.
    pub fn apply_to_call(&self, call: &mut BaseCall, flow_nuc: &[u8], measured: &[f32]) {
        let num_flows = flow_nuc.len().min(measured.len());
        let mut counts = call.flowgram(num_flows);
        let mut changed = false;

        for flow in 0..num_flows {
            let called = counts[flow];
            let entry = self.entry(flow_nuc[flow], called as usize);
            if entry.is_identity() {
                continue;
            }
            let corrected = entry.apply(measured[flow]).round();
            let corrected = corrected.clamp(0.0, (HP_SLOTS - 1) as f32) as u8;
            // Calibration nudges, it does not re-solve.
            let revised = corrected.clamp(called.saturating_sub(1), called.saturating_add(1));
            if revised != called {
                counts[flow] = revised;
                changed = true;
            }
        }

        if changed {
            call.rebuild_from_flowgram(&counts, flow_nuc);
        }
    }

    /// Loads a model from a JSON panel file.
    pub fn read<R: Read>(reader: R, path: &str) -> Result<Self> {
        let bad_format = |reason: String| FlowcallError::InvalidFileFormat {
            file_type: "calibration".to_string(),
            path: path.to_string(),
            reason,
        };
        let file: CalibrationFile =
            serde_json::from_reader(reader).map_err(|e| bad_format(e.to_string()))?;
        let mut model = Self::default();
        for row in file.entries {
            let nuc = row.nuc.to_ascii_uppercase() as u8;
            if nuc_index(nuc).is_none() || row.hp >= HP_SLOTS {
                return Err(bad_format(format!("invalid entry: nuc {:?} hp {}", row.nuc, row.hp)));
            }
            if row.gain <= 0.0 || !row.gain.is_finite() || !row.offset.is_finite() {
                return Err(bad_format(format!(
                    "invalid correction for nuc {:?} hp {}",
                    row.nuc, row.hp
                )));
            }
            model.set(nuc, row.hp, row.gain, row.offset);
        }
        Ok(model)
    }

    /// Loads a model from a JSON panel file on disk.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let display = path.as_ref().display().to_string();
        let file = File::open(&path)?;
        Self::read(BufReader::new(file), &display)
    }

    /// Writes the non-identity entries as a JSON panel file.
    pub fn to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut rows = Vec::new();
        for (idx, per_nuc) in self.entries.iter().enumerate() {
            for (hp, entry) in per_nuc.iter().enumerate() {
                if !entry.is_identity() {
                    rows.push(CalibrationRow {
                        nuc: crate::flow::NUCS[idx] as char,
                        hp,
                        gain: entry.gain,
                        offset: entry.offset,
                    });
                }
            }
        }
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &CalibrationFile { entries: rows })
            .map_err(|e| FlowcallError::Io(e.into()))?;
        writer.flush()?;
        Ok(())
    }
}
