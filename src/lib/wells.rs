//! Raw well trace input.
//!
//! The pipeline reads one signal value per flow per well. `TraceSource` is the
//! seam to upstream signal processing; `RawWells` is the bundled
//! implementation holding the full trace matrix in memory, with a flat binary
//! file form for interchange and testing.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::chip::ChipGeometry;
use crate::errors::{FlowcallError, Result};

/// Per-well flow trace access shared by the worker pool.
///
/// Implementations must be safe for concurrent reads; workers call
/// `read_flow_trace` from many threads with disjoint indices.
pub trait TraceSource: Send + Sync {
    /// Number of wells available.
    fn num_wells(&self) -> usize;

    /// Number of flows per well.
    fn num_flows(&self) -> usize;

    /// Copies the trace of the well at `index` into `out`, replacing its
    /// contents. `out` holds exactly `num_flows` values on success.
    fn read_flow_trace(&self, index: usize, out: &mut Vec<f32>) -> Result<()>;
}

/// Magic bytes at the start of a wells file.
const WELLS_MAGIC: &[u8; 4] = b"FCW1";

/// A full chip's raw traces in memory, row-major by well then flow.
#[derive(Debug, Clone)]
pub struct RawWells {
    geometry: ChipGeometry,
    num_flows: usize,
    flow_cycle: String,
    data: Vec<f32>,
}

impl RawWells {
    /// Creates an all-zero trace matrix.
    ///
    /// # Errors
    ///
    /// Returns an error if `num_flows` is zero.
    pub fn new(geometry: ChipGeometry, num_flows: usize, flow_cycle: &str) -> Result<Self> {
        if num_flows == 0 {
            return Err(FlowcallError::InvalidParameter {
                parameter: "num-flows".to_string(),
                reason: "must be >= 1".to_string(),
            });
        }
        Ok(Self {
            geometry,
            num_flows,
            flow_cycle: flow_cycle.to_string(),
            data: vec![0.0; geometry.num_wells() * num_flows],
        })
    }

    /// The chip geometry.
    #[must_use]
    pub fn geometry(&self) -> ChipGeometry {
        self.geometry
    }

    /// The flow cycle recorded with the traces.
    #[must_use]
    pub fn flow_cycle(&self) -> &str {
        &self.flow_cycle
    }

    /// Replaces the trace of one well.
    ///
    /// # Errors
    ///
    /// Returns an error if the trace length differs from the run's flow count.
    pub fn set_trace(&mut self, index: usize, trace: &[f32]) -> Result<()> {
        if trace.len() != self.num_flows {
            return Err(FlowcallError::FlowCountMismatch {
                well: index,
                expected: self.num_flows,
                actual: trace.len(),
            });
        }
        let start = index * self.num_flows;
        self.data[start..start + self.num_flows].copy_from_slice(trace);
        Ok(())
    }

    /// Writes the traces in their flat binary form.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(WELLS_MAGIC)?;
        writer.write_all(&(self.geometry.rows() as u32).to_le_bytes())?;
        writer.write_all(&(self.geometry.cols() as u32).to_le_bytes())?;
        writer.write_all(&(self.num_flows as u32).to_le_bytes())?;
        writer.write_all(&(self.flow_cycle.len() as u32).to_le_bytes())?;
        writer.write_all(self.flow_cycle.as_bytes())?;
        for value in &self.data {
            writer.write_all(&value.to_le_bytes())?;
        }
        Ok(())
    }

    /// Writes the traces to a file.
    pub fn to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Reads traces in their flat binary form.
    pub fn read<R: Read>(reader: &mut R, path: &str) -> Result<Self> {
        let bad_format = |reason: String| FlowcallError::InvalidFileFormat {
            file_type: "wells".to_string(),
            path: path.to_string(),
            reason,
        };

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).map_err(|_| bad_format("missing magic".to_string()))?;
        if &magic != WELLS_MAGIC {
            return Err(bad_format("bad magic".to_string()));
        }

        let mut buf4 = [0u8; 4];
        let mut read_u32 = |reader: &mut R, what: &str| -> Result<u32> {
            reader
                .read_exact(&mut buf4)
                .map_err(|_| bad_format(format!("truncated {what}")))?;
            Ok(u32::from_le_bytes(buf4))
        };

        let rows = read_u32(reader, "header")? as usize;
        let cols = read_u32(reader, "header")? as usize;
        let num_flows = read_u32(reader, "header")? as usize;
        let cycle_len = read_u32(reader, "header")? as usize;

        let mut cycle_bytes = vec![0u8; cycle_len];
        reader
            .read_exact(&mut cycle_bytes)
            .map_err(|_| bad_format("truncated flow cycle".to_string()))?;
        let flow_cycle = String::from_utf8(cycle_bytes)
            .map_err(|_| bad_format("flow cycle is not UTF-8".to_string()))?;

        let geometry = ChipGeometry::new(rows, cols)?;
        let mut wells = Self::new(geometry, num_flows, &flow_cycle)?;
        let mut value = [0u8; 4];
        for slot in &mut wells.data {
            reader
                .read_exact(&mut value)
                .map_err(|_| bad_format("truncated trace data".to_string()))?;
            *slot = f32::from_le_bytes(value);
        }
        Ok(wells)
    }

    /// Reads traces from a file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let display = path.as_ref().display().to_string();
        let mut reader = BufReader::new(File::open(&path)?);
        Self::read(&mut reader, &display)
    }
}

impl TraceSource for RawWells {
    fn num_wells(&self) -> usize {
        self.geometry.num_wells()
    }

    fn num_flows(&self) -> usize {
        self.num_flows
    }

    fn read_flow_trace(&self, index: usize, out: &mut Vec<f32>) -> Result<()> {
        if index >= self.num_wells() {
            return Err(FlowcallError::InvalidGeometry {
                reason: format!("well {index} out of range for {} wells", self.num_wells()),
            });
        }
        let start = index * self.num_flows;
        out.clear();
        out.extend_from_slice(&self.data[start..start + self.num_flows]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_wells() -> RawWells {
        let chip = ChipGeometry::new(2, 2).unwrap();
        let mut wells = RawWells::new(chip, 4, "TACG").unwrap();
        wells.set_trace(0, &[1.0, 0.0, 1.1, 0.1]).unwrap();
        wells.set_trace(3, &[0.2, 2.1, 0.0, 0.9]).unwrap();
        wells
    }

    #[test]
    fn test_trace_access() {
        let wells = small_wells();
        assert_eq!(wells.num_wells(), 4);
        assert_eq!(wells.num_flows(), 4);

        let mut trace = Vec::new();
        wells.read_flow_trace(0, &mut trace).unwrap();
        assert_eq!(trace, vec![1.0, 0.0, 1.1, 0.1]);

        // Unset wells read back as zeros
        wells.read_flow_trace(1, &mut trace).unwrap();
        assert_eq!(trace, vec![0.0; 4]);

        // Buffer is replaced, not appended
        wells.read_flow_trace(3, &mut trace).unwrap();
        assert_eq!(trace.len(), 4);
        assert_eq!(trace[1], 2.1);
    }

    #[test]
    fn test_out_of_range_index() {
        let wells = small_wells();
        let mut trace = Vec::new();
        assert!(wells.read_flow_trace(4, &mut trace).is_err());
    }

    #[test]
    fn test_set_trace_length_checked() {
        let chip = ChipGeometry::new(1, 1).unwrap();
        let mut wells = RawWells::new(chip, 4, "TACG").unwrap();
        let err = wells.set_trace(0, &[1.0, 2.0]).unwrap_err();
        assert!(format!("{err}").contains("mismatch"));
    }

    #[test]
    fn test_roundtrip_through_bytes() {
        let wells = small_wells();
        let mut bytes = Vec::new();
        wells.write(&mut bytes).unwrap();

        let restored = RawWells::read(&mut bytes.as_slice(), "test").unwrap();
        assert_eq!(restored.geometry(), wells.geometry());
        assert_eq!(restored.flow_cycle(), "TACG");

        let mut a = Vec::new();
        let mut b = Vec::new();
        for i in 0..wells.num_wells() {
            wells.read_flow_trace(i, &mut a).unwrap();
            restored.read_flow_trace(i, &mut b).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_read_rejects_truncation() {
        let wells = small_wells();
        let mut bytes = Vec::new();
        wells.write(&mut bytes).unwrap();
        bytes.truncate(bytes.len() - 1);

        let err = RawWells::read(&mut bytes.as_slice(), "test").unwrap_err();
        assert!(format!("{err}").contains("truncated trace data"));
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.rawwells");

        let wells = small_wells();
        wells.to_path(&path).unwrap();
        let restored = RawWells::from_path(&path).unwrap();

        let mut trace = Vec::new();
        restored.read_flow_trace(3, &mut trace).unwrap();
        assert_eq!(trace, vec![0.2, 2.1, 0.0, 0.9]);
    }
}
