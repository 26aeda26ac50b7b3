//! Flow orders and key sequences.
//!
//! A run cycles through a short nucleotide pattern (commonly `TACG`) for a
//! fixed number of flows. Each flow exposes the chip to one nucleotide; a well
//! incorporates as many bases as its template presents consecutively, so an
//! ideal (phase-free) signal is the homopolymer count at each flow. Key
//! sequences are the known leading bases used for normalization and keypass
//! checks.

use crate::errors::{FlowcallError, Result};

/// The four nucleotides in canonical order, used to index per-nucleotide
/// tables throughout the solver.
pub const NUCS: [u8; 4] = [b'A', b'C', b'G', b'T'];

/// Maps `A`/`C`/`G`/`T` to 0..4.
///
/// # Examples
///
/// ```
/// use flowcall_lib::flow::nuc_index;
///
/// assert_eq!(nuc_index(b'A'), Some(0));
/// assert_eq!(nuc_index(b'T'), Some(3));
/// assert_eq!(nuc_index(b'N'), None);
/// ```
#[must_use]
pub fn nuc_index(nuc: u8) -> Option<usize> {
    match nuc {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

/// The nucleotide flowed at each flow of a run.
///
/// Stores the repeating cycle and the total flow count; the nucleotide at any
/// flow index is the cycle entry at `flow % cycle_len`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowOrder {
    cycle: Vec<u8>,
    num_flows: usize,
}

impl FlowOrder {
    /// Creates a flow order from its repeating cycle and the run's flow count.
    ///
    /// # Errors
    ///
    /// Returns an error if the cycle is empty, contains a character other than
    /// `ACGT`, or if `num_flows` is zero.
    pub fn new(cycle: &str, num_flows: usize) -> Result<Self> {
        if cycle.is_empty() {
            return Err(FlowcallError::InvalidParameter {
                parameter: "flow-order".to_string(),
                reason: "cycle must not be empty".to_string(),
            });
        }
        if num_flows == 0 {
            return Err(FlowcallError::InvalidParameter {
                parameter: "num-flows".to_string(),
                reason: "must be >= 1".to_string(),
            });
        }
        let cycle: Vec<u8> = cycle.bytes().collect();
        if let Some(&bad) = cycle.iter().find(|b| nuc_index(**b).is_none()) {
            return Err(FlowcallError::InvalidParameter {
                parameter: "flow-order".to_string(),
                reason: format!("invalid nucleotide '{}'", bad as char),
            });
        }
        Ok(Self { cycle, num_flows })
    }

    /// The nucleotide flowed at `flow`.
    #[must_use]
    pub fn nuc_at(&self, flow: usize) -> u8 {
        self.cycle[flow % self.cycle.len()]
    }

    /// Number of flows in the run.
    #[must_use]
    pub fn num_flows(&self) -> usize {
        self.num_flows
    }

    /// The repeating cycle.
    #[must_use]
    pub fn cycle(&self) -> &[u8] {
        &self.cycle
    }

    /// Iterator over the nucleotide at every flow of the run.
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0..self.num_flows).map(|f| self.nuc_at(f))
    }

    /// Expands a base sequence into its ideal flowgram: the homopolymer count
    /// incorporated at each flow, assuming no phasing effects.
    ///
    /// Bases beyond what the run's flows can sequence are ignored.
    ///
    /// # Examples
    ///
    /// ```
    /// use flowcall_lib::flow::FlowOrder;
    ///
    /// let order = FlowOrder::new("TACG", 8).unwrap();
    /// // "TCAG": T at flow 0, A at flow 2, C at flow 5, G at flow 7
    /// assert_eq!(order.ideal_flowgram(b"TCAG"), vec![1, 0, 1, 0, 0, 1, 0, 1]);
    /// ```
    #[must_use]
    pub fn ideal_flowgram(&self, sequence: &[u8]) -> Vec<u8> {
        let mut flowgram = vec![0u8; self.num_flows];
        let mut base = 0;
        for (flow, count) in flowgram.iter_mut().enumerate() {
            let nuc = self.nuc_at(flow);
            while base < sequence.len() && sequence[base] == nuc {
                *count = count.saturating_add(1);
                base += 1;
            }
            if base == sequence.len() {
                break;
            }
        }
        flowgram
    }

    /// Number of flows consumed while sequencing `sequence`, i.e. the index of
    /// the flow incorporating its final base plus one.
    ///
    /// Returns `None` if the run's flows cannot sequence the whole sequence.
    #[must_use]
    pub fn flows_spanned(&self, sequence: &[u8]) -> Option<usize> {
        if sequence.is_empty() {
            return Some(0);
        }
        let mut base = 0;
        for flow in 0..self.num_flows {
            let nuc = self.nuc_at(flow);
            while base < sequence.len() && sequence[base] == nuc {
                base += 1;
            }
            if base == sequence.len() {
                return Some(flow + 1);
            }
        }
        None
    }
}

/// A named key sequence: the known bases at the start of every read of a
/// class, used for normalization, keypass filtering, and phase estimation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySequence {
    name: String,
    bases: Vec<u8>,
}

impl KeySequence {
    /// Creates a key sequence.
    ///
    /// # Errors
    ///
    /// Returns an error if the bases are empty or not `ACGT`.
    pub fn new(name: &str, bases: &str) -> Result<Self> {
        if bases.is_empty() {
            return Err(FlowcallError::InvalidParameter {
                parameter: format!("key '{name}'"),
                reason: "must not be empty".to_string(),
            });
        }
        let bases: Vec<u8> = bases.bytes().collect();
        if let Some(&bad) = bases.iter().find(|b| nuc_index(**b).is_none()) {
            return Err(FlowcallError::InvalidParameter {
                parameter: format!("key '{name}'"),
                reason: format!("invalid nucleotide '{}'", bad as char),
            });
        }
        Ok(Self { name: name.to_string(), bases })
    }

    /// The key's name (e.g. `lib` or `tf`).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The key's bases.
    #[must_use]
    pub fn bases(&self) -> &[u8] {
        &self.bases
    }

    /// Number of key bases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bases.len()
    }

    /// True if the key has no bases. Construction forbids this; present for
    /// API completeness.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    /// Flows spanned by the key under `flow_order`, excluding the final key
    /// flow. The final flow's homopolymer may extend into the insert when the
    /// first insert base matches, so only the flows before it carry a signal
    /// that is fully determined by the key.
    ///
    /// # Errors
    ///
    /// Returns an error if the run has too few flows to sequence the key.
    pub fn usable_key_flows(&self, flow_order: &FlowOrder) -> Result<usize> {
        let spanned = flow_order.flows_spanned(&self.bases).ok_or_else(|| {
            FlowcallError::InvalidParameter {
                parameter: format!("key '{}'", self.name),
                reason: format!(
                    "cannot be sequenced in {} flows of cycle {}",
                    flow_order.num_flows(),
                    String::from_utf8_lossy(flow_order.cycle())
                ),
            }
        })?;
        Ok(spanned.saturating_sub(1))
    }

    /// Flow indices within the usable key window whose ideal signal is exactly
    /// one incorporation. These flows have a known true amplitude of 1.0 and
    /// anchor key normalization.
    pub fn onemer_flows(&self, flow_order: &FlowOrder) -> Result<Vec<usize>> {
        let usable = self.usable_key_flows(flow_order)?;
        let ideal = flow_order.ideal_flowgram(&self.bases);
        Ok((0..usable).filter(|&f| ideal[f] == 1).collect())
    }

    /// True if `bases` starts with this key.
    #[must_use]
    pub fn matches_prefix(&self, bases: &[u8]) -> bool {
        bases.len() >= self.bases.len() && bases[..self.bases.len()] == self.bases[..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nuc_index_roundtrip() {
        for (i, &nuc) in NUCS.iter().enumerate() {
            assert_eq!(nuc_index(nuc), Some(i));
        }
        assert_eq!(nuc_index(b'n'), None);
        assert_eq!(nuc_index(b'x'), None);
    }

    #[test]
    fn test_flow_order_cycles() {
        let order = FlowOrder::new("TACG", 10).unwrap();
        assert_eq!(order.num_flows(), 10);
        assert_eq!(order.nuc_at(0), b'T');
        assert_eq!(order.nuc_at(3), b'G');
        assert_eq!(order.nuc_at(4), b'T');
        assert_eq!(order.nuc_at(9), b'C');
        let flowed: Vec<u8> = order.iter().collect();
        assert_eq!(flowed, b"TACGTACGTA");
    }

    #[test]
    fn test_flow_order_rejects_bad_input() {
        assert!(FlowOrder::new("", 10).is_err());
        assert!(FlowOrder::new("TACG", 0).is_err());
        assert!(FlowOrder::new("TACN", 10).is_err());
        assert!(FlowOrder::new("tacg", 10).is_err());
    }

    #[test]
    fn test_ideal_flowgram_simple() {
        let order = FlowOrder::new("TACG", 8).unwrap();
        assert_eq!(order.ideal_flowgram(b"TCAG"), vec![1, 0, 1, 0, 0, 1, 0, 1]);
    }

    #[test]
    fn test_ideal_flowgram_homopolymers() {
        let order = FlowOrder::new("TACG", 8).unwrap();
        // TT at flow 0, AAA at flow 1, G at flow 3
        assert_eq!(order.ideal_flowgram(b"TTAAAG"), vec![2, 3, 0, 1, 0, 0, 0, 0]);
    }

    #[test]
    fn test_ideal_flowgram_truncates_at_run_end() {
        let order = FlowOrder::new("TACG", 4).unwrap();
        // Second T never gets a flow within 4 flows
        assert_eq!(order.ideal_flowgram(b"TACGT"), vec![1, 1, 1, 1]);
    }

    #[test]
    fn test_flows_spanned() {
        let order = FlowOrder::new("TACG", 8).unwrap();
        assert_eq!(order.flows_spanned(b"TCAG"), Some(8));
        assert_eq!(order.flows_spanned(b"T"), Some(1));
        assert_eq!(order.flows_spanned(b"TA"), Some(2));
        // A alone skips the T flow first
        assert_eq!(order.flows_spanned(b"A"), Some(2));
        // Too long for the run
        assert_eq!(order.flows_spanned(b"TACGTACGT"), None);
    }

    #[test]
    fn test_key_sequence_validation() {
        assert!(KeySequence::new("lib", "TCAG").is_ok());
        assert!(KeySequence::new("lib", "").is_err());
        assert!(KeySequence::new("lib", "TCAN").is_err());
    }

    #[test]
    fn test_usable_key_flows_excludes_boundary() {
        let order = FlowOrder::new("TACG", 8).unwrap();
        let key = KeySequence::new("lib", "TCAG").unwrap();
        // Key spans 8 flows; the final G flow is the boundary
        assert_eq!(key.usable_key_flows(&order).unwrap(), 7);
    }

    #[test]
    fn test_usable_key_flows_too_few_flows() {
        let order = FlowOrder::new("TACG", 4).unwrap();
        let key = KeySequence::new("lib", "TCAG").unwrap();
        assert!(key.usable_key_flows(&order).is_err());
    }

    #[test]
    fn test_onemer_flows() {
        let order = FlowOrder::new("TACG", 8).unwrap();
        let key = KeySequence::new("lib", "TCAG").unwrap();
        // Ideal key flowgram is [1,0,1,0,0,1,0,1]; final flow 7 excluded
        assert_eq!(key.onemer_flows(&order).unwrap(), vec![0, 2, 5]);
    }

    #[test]
    fn test_matches_prefix() {
        let key = KeySequence::new("lib", "TCAG").unwrap();
        assert!(key.matches_prefix(b"TCAGGGT"));
        assert!(key.matches_prefix(b"TCAG"));
        assert!(!key.matches_prefix(b"TCA"));
        assert!(!key.matches_prefix(b"TCGA"));
        assert!(!key.matches_prefix(b""));
    }
}
