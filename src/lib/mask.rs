//! Well classification masks.
//!
//! Upstream signal processing marks every well with a set of flags (bead
//! present, live, library vs. test fragment, pinned, excluded). The mask
//! decides which wells are basecalled at all and which read class each one
//! belongs to.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::chip::ChipGeometry;
use crate::errors::{FlowcallError, Result};

/// Bit set describing one well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MaskFlags(u16);

impl MaskFlags {
    /// No flags set; an empty well.
    pub const NONE: MaskFlags = MaskFlags(0);
    /// A bead was detected in the well.
    pub const BEAD: MaskFlags = MaskFlags(1 << 0);
    /// The bead produced live signal.
    pub const LIVE: MaskFlags = MaskFlags(1 << 1);
    /// Library template.
    pub const LIB: MaskFlags = MaskFlags(1 << 2);
    /// Test-fragment template.
    pub const TF: MaskFlags = MaskFlags(1 << 3);
    /// Signal pinned at the rail; unusable.
    pub const PINNED: MaskFlags = MaskFlags(1 << 4);
    /// Excluded by upstream analysis.
    pub const IGNORE: MaskFlags = MaskFlags(1 << 5);
    /// Inside a chip region excluded from analysis.
    pub const EXCLUDE: MaskFlags = MaskFlags(1 << 6);

    /// Creates flags from their raw bit representation.
    #[must_use]
    pub fn from_bits(bits: u16) -> Self {
        MaskFlags(bits)
    }

    /// The raw bit representation.
    #[must_use]
    pub fn bits(self) -> u16 {
        self.0
    }

    /// True if every flag in `other` is set in `self`.
    #[must_use]
    pub fn contains(self, other: MaskFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if any flag in `other` is set in `self`.
    #[must_use]
    pub fn intersects(self, other: MaskFlags) -> bool {
        self.0 & other.0 != 0
    }

    /// Returns `self` with the flags in `other` added.
    #[must_use]
    pub fn with(self, other: MaskFlags) -> MaskFlags {
        MaskFlags(self.0 | other.0)
    }

    /// Adds the flags in `other`.
    pub fn insert(&mut self, other: MaskFlags) {
        self.0 |= other.0;
    }
}

impl std::ops::BitOr for MaskFlags {
    type Output = MaskFlags;

    fn bitor(self, rhs: MaskFlags) -> MaskFlags {
        MaskFlags(self.0 | rhs.0)
    }
}

/// Read class a well belongs to, derived from its mask flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WellClass {
    /// A live library well.
    Library,
    /// A live test-fragment well.
    TestFragment,
    /// Not basecalled: empty, pinned, ignored, or excluded.
    Excluded,
}

/// Per-well flags for a whole chip.
#[derive(Debug, Clone)]
pub struct WellMask {
    geometry: ChipGeometry,
    flags: Vec<MaskFlags>,
}

/// Magic bytes at the start of a mask file.
const MASK_MAGIC: &[u8; 4] = b"FCM1";

impl WellMask {
    /// Creates an all-empty mask for a chip.
    #[must_use]
    pub fn new(geometry: ChipGeometry) -> Self {
        Self { geometry, flags: vec![MaskFlags::NONE; geometry.num_wells()] }
    }

    /// The chip geometry the mask covers.
    #[must_use]
    pub fn geometry(&self) -> ChipGeometry {
        self.geometry
    }

    /// Number of wells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    /// True if the mask covers no wells. Construction forbids this.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Flags of the well at a row-major index.
    #[must_use]
    pub fn get(&self, index: usize) -> MaskFlags {
        self.flags[index]
    }

    /// Adds flags to the well at a row-major index.
    pub fn set(&mut self, index: usize, flags: MaskFlags) {
        self.flags[index].insert(flags);
    }

    /// Classifies a well.
    ///
    /// A well is basecallable when it holds a live bead with a template class
    /// and none of the exclusion flags. Wells flagged both `LIB` and `TF` are
    /// treated as test fragments.
    #[must_use]
    pub fn class_of(&self, index: usize) -> WellClass {
        let flags = self.flags[index];
        let unusable = MaskFlags::PINNED | MaskFlags::IGNORE | MaskFlags::EXCLUDE;
        if !flags.contains(MaskFlags::BEAD | MaskFlags::LIVE) || flags.intersects(unusable) {
            return WellClass::Excluded;
        }
        if flags.contains(MaskFlags::TF) {
            WellClass::TestFragment
        } else if flags.contains(MaskFlags::LIB) {
            WellClass::Library
        } else {
            WellClass::Excluded
        }
    }

    /// Number of wells in a class.
    #[must_use]
    pub fn count_of(&self, class: WellClass) -> usize {
        (0..self.len()).filter(|&i| self.class_of(i) == class).count()
    }

    /// Writes the mask in its flat binary form.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(MASK_MAGIC)?;
        writer.write_all(&(self.geometry.rows() as u32).to_le_bytes())?;
        writer.write_all(&(self.geometry.cols() as u32).to_le_bytes())?;
        for flags in &self.flags {
            writer.write_all(&flags.bits().to_le_bytes())?;
        }
        Ok(())
    }

    /// Writes the mask to a file.
    pub fn to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Reads a mask in its flat binary form.
    pub fn read<R: Read>(reader: &mut R, path: &str) -> Result<Self> {
        let bad_format = |reason: &str| FlowcallError::InvalidFileFormat {
            file_type: "mask".to_string(),
            path: path.to_string(),
            reason: reason.to_string(),
        };

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).map_err(|_| bad_format("missing magic"))?;
        if &magic != MASK_MAGIC {
            return Err(bad_format("bad magic"));
        }

        let mut buf4 = [0u8; 4];
        reader.read_exact(&mut buf4).map_err(|_| bad_format("truncated header"))?;
        let rows = u32::from_le_bytes(buf4) as usize;
        reader.read_exact(&mut buf4).map_err(|_| bad_format("truncated header"))?;
        let cols = u32::from_le_bytes(buf4) as usize;

        let geometry = ChipGeometry::new(rows, cols)?;
        let mut flags = Vec::with_capacity(geometry.num_wells());
        let mut buf2 = [0u8; 2];
        for _ in 0..geometry.num_wells() {
            reader.read_exact(&mut buf2).map_err(|_| bad_format("truncated well flags"))?;
            flags.push(MaskFlags::from_bits(u16::from_le_bytes(buf2)));
        }
        Ok(Self { geometry, flags })
    }

    /// Reads a mask from a file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let display = path.as_ref().display().to_string();
        let mut reader = BufReader::new(File::open(&path)?);
        Self::read(&mut reader, &display)
    }
}
