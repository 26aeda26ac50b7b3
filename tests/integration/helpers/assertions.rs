//! Custom assertion helpers for integration tests.
//!
//! FASTQ parsing plus ordering and content assertions shared by the
//! pipeline and command tests.

#![allow(dead_code)]

use std::fs::File;
use std::io::Read;
use std::path::Path;

use flate2::read::MultiGzDecoder;

/// One parsed FASTQ record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastqEntry {
    /// Read name without the leading `@`.
    pub name: String,
    /// Called bases.
    pub bases: String,
    /// Phred+33 quality string, same length as `bases`.
    pub qualities: String,
}

/// Parses a plain FASTQ file.
///
/// # Panics
///
/// Panics if the file cannot be read or is not well-formed FASTQ.
pub fn read_fastq(path: &Path) -> Vec<FastqEntry> {
    let text = std::fs::read_to_string(path).expect("failed to read FASTQ");
    parse_fastq(&text)
}

/// Parses a gzip-compressed FASTQ file.
///
/// # Panics
///
/// Panics if the file cannot be read, decompressed, or parsed.
pub fn read_fastq_gz(path: &Path) -> Vec<FastqEntry> {
    let mut decoder = MultiGzDecoder::new(File::open(path).expect("failed to open FASTQ"));
    let mut text = String::new();
    decoder.read_to_string(&mut text).expect("failed to decompress FASTQ");
    parse_fastq(&text)
}

fn parse_fastq(text: &str) -> Vec<FastqEntry> {
    let lines: Vec<&str> = text.lines().collect();
    assert!(lines.len().is_multiple_of(4), "FASTQ line count {} not a multiple of 4", lines.len());

    lines
        .chunks(4)
        .map(|chunk| {
            let name = chunk[0].strip_prefix('@').expect("name line missing '@'");
            assert_eq!(chunk[2], "+", "separator line should be '+'");
            assert_eq!(
                chunk[1].len(),
                chunk[3].len(),
                "quality length mismatch for read {name}"
            );
            FastqEntry {
                name: name.to_string(),
                bases: chunk[1].to_string(),
                qualities: chunk[3].to_string(),
            }
        })
        .collect()
}

/// Splits a `run:row:col` read name into its well coordinates.
///
/// # Panics
///
/// Panics if the name does not have the expected shape.
pub fn parse_coords(name: &str) -> (usize, usize) {
    let fields: Vec<&str> = name.split(':').collect();
    assert_eq!(fields.len(), 3, "read name '{name}' should have 3 fields");
    let row = fields[1].parse().expect("row field not numeric");
    let col = fields[2].parse().expect("col field not numeric");
    (row, col)
}

/// Asserts that records appear in strict row-major chip order.
///
/// # Panics
///
/// Panics on the first out-of-order pair.
pub fn assert_chip_ordered(entries: &[FastqEntry]) {
    let mut previous: Option<(usize, usize)> = None;
    for entry in entries {
        let coords = parse_coords(&entry.name);
        if let Some(prev) = previous {
            assert!(
                coords > prev,
                "read {} at {coords:?} out of order after {prev:?}",
                entry.name
            );
        }
        previous = Some(coords);
    }
}

/// Asserts that every read's bases begin with `prefix`.
///
/// # Panics
///
/// Panics naming the first offending read.
pub fn assert_all_start_with(entries: &[FastqEntry], prefix: &str) {
    for entry in entries {
        assert!(
            entry.bases.starts_with(prefix),
            "read {} bases '{}' do not start with '{prefix}'",
            entry.name,
            entry.bases
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> FastqEntry {
        FastqEntry { name: name.to_string(), bases: "TCAG".to_string(), qualities: "IIII".to_string() }
    }

    #[test]
    fn test_parse_fastq_roundtrip() {
        let text = "@RUN:00001:00002\nTCAGACGT\n+\nIIIIIIII\n@RUN:00001:00003\nTCAG\n+\n!!!!\n";
        let entries = parse_fastq(text);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "RUN:00001:00002");
        assert_eq!(entries[0].bases, "TCAGACGT");
        assert_eq!(entries[1].qualities, "!!!!");
    }

    #[test]
    fn test_parse_coords() {
        assert_eq!(parse_coords("RUN:00012:00345"), (12, 345));
    }

    #[test]
    fn test_assert_chip_ordered_accepts_sorted() {
        let entries =
            vec![entry("R:00000:00001"), entry("R:00000:00002"), entry("R:00001:00000")];
        assert_chip_ordered(&entries);
    }

    #[test]
    #[should_panic(expected = "out of order")]
    fn test_assert_chip_ordered_rejects_unsorted() {
        let entries = vec![entry("R:00001:00000"), entry("R:00000:00002")];
        assert_chip_ordered(&entries);
    }
}
