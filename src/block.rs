//! Block-level value representation.
//!
//! A stored value is never shipped whole: it is encoded into
//! [`FRAGMENT_COUNT`] fragments, one per successor of its key, and any
//! [`DECODE_THRESHOLD`] of them rebuild the value. [`DataFragment`] is a
//! single indexed row of the encoding with a textual wire form;
//! [`DataBlock`] is the ephemeral scaffold that encodes a plaintext, or
//! reassembles one from enough fragments.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::ida::{CodecError, Ida, BLOCK_LENGTH, DECODE_THRESHOLD, MAX_VALUE};

/// One row of an encoded block: a 1-based index and L/M values.
///
/// Fragments are ordered and deduplicated by index; two fragments of the
/// same block never share an index, so a set of fragments is exactly a set
/// of distinct rows.
#[derive(Debug, Clone)]
pub struct DataFragment {
    index: usize,
    payload: Vec<f64>,
}

impl DataFragment {
    pub fn new(index: usize, payload: Vec<f64>) -> DataFragment {
        DataFragment { index, payload }
    }

    /// 1-based row index within the encoded block.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn payload(&self) -> &[f64] {
        &self.payload
    }
}

impl fmt::Display for DataFragment {
    /// Wire form `"<index>:<v1> <v2> …"`, values with six fractional digits.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.index)?;
        for (i, value) in self.payload.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{value:.6}")?;
        }
        Ok(())
    }
}

impl FromStr for DataFragment {
    type Err = CodecError;

    fn from_str(serialized: &str) -> Result<DataFragment, CodecError> {
        let (index, values) = serialized
            .trim()
            .split_once(':')
            .ok_or_else(|| CodecError::Malformed(format!("no index separator in {serialized:?}")))?;
        let index: usize = index
            .parse()
            .map_err(|_| CodecError::Malformed(format!("bad fragment index {index:?}")))?;

        let mut payload = Vec::new();
        for value in values.split_whitespace() {
            let value: f64 = value
                .parse()
                .map_err(|_| CodecError::Malformed(format!("bad fragment value {value:?}")))?;
            payload.push(value);
        }

        Ok(DataFragment { index, payload })
    }
}

impl PartialEq for DataFragment {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.payload == other.payload
    }
}

// Payloads are finite reals, never NaN.
impl Eq for DataFragment {}

impl PartialOrd for DataFragment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DataFragment {
    /// Total order by index alone, so ordered collections deduplicate rows.
    fn cmp(&self, other: &Self) -> Ordering {
        self.index.cmp(&other.index)
    }
}

/// A value encoded into its full fragment set.
///
/// The authoritative state of the system is the per-peer (key, fragment)
/// tuples; blocks exist only while encoding a new value or reassembling one
/// from collected fragments. Reassembly decodes from any M fragments and
/// then re-encodes, regenerating all N rows.
#[derive(Debug, Clone, PartialEq)]
pub struct DataBlock {
    original: Vec<f64>,
    fragments: Vec<DataFragment>,
}

impl DataBlock {
    /// Encode a plaintext of at most [`BLOCK_LENGTH`] bytes, zero-padded to
    /// full length.
    ///
    /// With `sanity_check` set, the fragments are immediately decoded and
    /// compared against the input, catching numeric degeneracy before the
    /// fragments are disseminated.
    pub fn encode(input: &str, sanity_check: bool) -> Result<DataBlock, CodecError> {
        if input.len() > BLOCK_LENGTH {
            return Err(CodecError::EncodeOverflow { length: input.len() });
        }

        let mut original = Vec::with_capacity(BLOCK_LENGTH);
        for byte in input.bytes() {
            if f64::from(byte) >= MAX_VALUE {
                return Err(CodecError::EncodeBadByte { value: u32::from(byte) });
            }
            original.push(f64::from(byte));
        }
        original.resize(BLOCK_LENGTH, 0.0);

        let ida = Ida::default();
        let fragments = fragments_from_rows(ida.encode(&original));

        if sanity_check {
            let rows: Vec<Vec<f64>> = fragments[..DECODE_THRESHOLD]
                .iter()
                .map(|fragment| fragment.payload.clone())
                .collect();
            let indices: Vec<usize> = (1..=DECODE_THRESHOLD).collect();
            if ida.decode(&rows, &indices)? != original {
                return Err(CodecError::RoundTripMismatch);
            }
        }

        Ok(DataBlock { original, fragments })
    }

    /// Parse a newline-joined serialization of at least M fragments.
    ///
    /// Lines beyond the first M are discarded, since decode only needs M
    /// rows; re-encoding then regenerates the full N.
    pub fn from_serialized(serialized: &str) -> Result<DataBlock, CodecError> {
        let lines: Vec<&str> = serialized.lines().filter(|line| !line.is_empty()).collect();
        if lines.len() < DECODE_THRESHOLD {
            return Err(CodecError::DecodeInsufficient { supplied: lines.len() });
        }

        let fragments = lines[..DECODE_THRESHOLD]
            .iter()
            .map(|line| line.parse())
            .collect::<Result<Vec<DataFragment>, CodecError>>()?;
        DataBlock::from_fragments(&fragments)
    }

    /// Reassemble from at least M fragments with known indices.
    pub fn from_fragments(fragments: &[DataFragment]) -> Result<DataBlock, CodecError> {
        if fragments.len() < DECODE_THRESHOLD {
            return Err(CodecError::DecodeInsufficient { supplied: fragments.len() });
        }

        let rows: Vec<Vec<f64>> =
            fragments.iter().map(|fragment| fragment.payload.clone()).collect();
        let indices: Vec<usize> = fragments.iter().map(DataFragment::index).collect();

        let ida = Ida::default();
        let original = ida.decode(&rows, &indices)?;
        let fragments = fragments_from_rows(ida.encode(&original));
        Ok(DataBlock { original, fragments })
    }

    /// Recover the plaintext, stopping at the zero padding.
    pub fn decode(&self) -> String {
        let mut plaintext = String::new();
        for &code in &self.original {
            if code == 0.0 {
                break;
            }
            plaintext.push(code as u8 as char);
        }
        plaintext
    }

    /// All N fragments of this block.
    pub fn fragments(&self) -> &[DataFragment] {
        &self.fragments
    }

    /// Newline-joined serialization of every fragment.
    pub fn serialize(&self) -> String {
        let lines: Vec<String> =
            self.fragments.iter().map(DataFragment::to_string).collect();
        lines.join("\n")
    }
}

fn fragments_from_rows(rows: Vec<Vec<f64>>) -> Vec<DataFragment> {
    rows.into_iter()
        .enumerate()
        .map(|(i, payload)| DataFragment::new(i + 1, payload))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ida::FRAGMENT_COUNT;
    use std::collections::BTreeSet;

    #[test]
    fn encode_then_decode_recovers_plaintext() {
        let block = DataBlock::encode("val", true).unwrap();
        assert_eq!(block.fragments().len(), FRAGMENT_COUNT);
        assert_eq!(block.decode(), "val");
    }

    #[test]
    fn encode_rejects_oversized_input() {
        let oversized = "x".repeat(BLOCK_LENGTH + 1);
        assert_eq!(
            DataBlock::encode(&oversized, false).unwrap_err(),
            CodecError::EncodeOverflow { length: BLOCK_LENGTH + 1 }
        );
    }

    #[test]
    fn full_length_input_round_trips() {
        let input = "0123456789012345678901234567890123456789";
        assert_eq!(input.len(), BLOCK_LENGTH);
        let block = DataBlock::encode(input, true).unwrap();
        assert_eq!(block.decode(), input);
    }

    #[test]
    fn fragment_wire_form_round_trips() {
        let block = DataBlock::encode("wire form", false).unwrap();
        for fragment in block.fragments() {
            let reparsed: DataFragment = fragment.to_string().parse().unwrap();
            assert_eq!(&reparsed, fragment);
        }
    }

    #[test]
    fn fragment_parse_rejects_garbage() {
        assert!("no separator".parse::<DataFragment>().is_err());
        assert!("one:two three".parse::<DataFragment>().is_err());
    }

    #[test]
    fn serialized_block_round_trips() {
        let block = DataBlock::encode("serialized round trip", false).unwrap();
        let reparsed = DataBlock::from_serialized(&block.serialize()).unwrap();
        assert_eq!(reparsed, block);
        assert_eq!(reparsed.decode(), "serialized round trip");
    }

    #[test]
    fn from_serialized_requires_threshold_lines() {
        let block = DataBlock::encode("too few", false).unwrap();
        let lines: Vec<String> = block
            .fragments()
            .iter()
            .take(DECODE_THRESHOLD - 1)
            .map(DataFragment::to_string)
            .collect();
        assert!(matches!(
            DataBlock::from_serialized(&lines.join("\n")),
            Err(CodecError::DecodeInsufficient { .. })
        ));
    }

    #[test]
    fn reassembles_from_any_threshold_subset() {
        let block = DataBlock::encode("any ten of fourteen", true).unwrap();
        let subset: Vec<DataFragment> = block
            .fragments()
            .iter()
            .skip(FRAGMENT_COUNT - DECODE_THRESHOLD)
            .cloned()
            .collect();
        let rebuilt = DataBlock::from_fragments(&subset).unwrap();
        assert_eq!(rebuilt, block);
        assert_eq!(rebuilt.decode(), "any ten of fourteen");
    }

    #[test]
    fn fragment_sets_deduplicate_by_index() {
        let block = DataBlock::encode("dedup", false).unwrap();
        let mut set: BTreeSet<DataFragment> = BTreeSet::new();
        for fragment in block.fragments() {
            set.insert(fragment.clone());
            set.insert(fragment.clone());
        }
        assert_eq!(set.len(), FRAGMENT_COUNT);
        let indices: Vec<usize> = set.iter().map(DataFragment::index).collect();
        let mut sorted = indices.clone();
        sorted.sort_unstable();
        assert_eq!(indices, sorted);
    }
}
