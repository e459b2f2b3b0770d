//! Core read and block data model.

use crate::error::{FormatError, Result};

/// Bases accepted by the compressor.
pub const ALPHABET: &[u8; 5] = b"ACGTN";

/// Lookup table mapping a byte to its alphabet index (A=0, C=1, G=2, T=3,
/// N/other=4). Bytes outside the uppercase alphabet share the N class
/// for context purposes; their exact value is preserved elsewhere.
pub static BASE_INDEX: [u8; 256] = {
    let mut t = [4u8; 256];
    t[b'A' as usize] = 0;
    t[b'C' as usize] = 1;
    t[b'G' as usize] = 2;
    t[b'T' as usize] = 3;
    t
};

/// Whether a sequence consists solely of alphabet bases.
#[must_use]
pub fn is_valid_sequence(seq: &[u8]) -> bool {
    seq.iter().all(|&b| matches!(b, b'A' | b'C' | b'G' | b'T' | b'N'))
}

/// A single sequencing read: identifier, sequence, quality string, and an
/// optional link to its mate within the same block.
///
/// Immutable once parsed; the pipeline only moves records, never edits them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    /// Read identifier without the leading '@'
    pub id: String,
    /// Sequence over {A, C, G, T, N}
    pub seq: Vec<u8>,
    /// Phred+33 quality string, one symbol per base
    pub qual: Vec<u8>,
    /// Block-local index of the mate record, if paired
    pub mate: Option<u32>,
}

impl Record {
    #[must_use]
    pub fn new(id: impl Into<String>, seq: impl Into<Vec<u8>>, qual: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            seq: seq.into(),
            qual: qual.into(),
            mate: None,
        }
    }

    /// Length of the read in bases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seq.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    /// Validate the structural invariant: quality covers every base.
    pub fn validate(&self, record_index: u64) -> Result<()> {
        if self.seq.len() != self.qual.len() {
            return Err(FormatError::LengthMismatch {
                record: record_index,
                seq_len: self.seq.len(),
                qual_len: self.qual.len(),
            }
            .into());
        }
        Ok(())
    }

    /// Approximate heap footprint, used for memory budget reservations.
    #[must_use]
    pub fn heap_size(&self) -> usize {
        self.id.len() + self.seq.len() + self.qual.len()
    }
}

/// An ordered batch of records processed as one compression unit.
///
/// The id is assigned at ingestion and is dense and contiguous from zero;
/// it is the sole authority on output order regardless of which worker
/// finishes a block first.
#[derive(Clone, Debug, Default)]
pub struct Block {
    pub id: u32,
    /// Index of the first record of this block in the original input
    pub start_record: u64,
    pub records: Vec<Record>,
}

impl Block {
    #[must_use]
    pub fn new(id: u32, start_record: u64) -> Self {
        Self {
            id,
            start_record,
            records: Vec::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Total heap bytes held by this block's records.
    #[must_use]
    pub fn heap_size(&self) -> usize {
        self.records.iter().map(Record::heap_size).sum()
    }

    /// True when records are interleaved mate pairs (R1 at even offsets,
    /// R2 at odd offsets, cross-linked).
    #[must_use]
    pub fn is_paired(&self) -> bool {
        self.records.len() >= 2
            && self.records.len() % 2 == 0
            && self.records[0].mate == Some(1)
            && self.records[1].mate == Some(0)
    }

    /// Uniform read length of the block, if every record shares one.
    #[must_use]
    pub fn uniform_len(&self) -> Option<u32> {
        let first = self.records.first()?.len();
        if self.records.iter().all(|r| r.len() == first) {
            Some(first as u32)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn test_record_validation() {
        let ok = Record::new("r1", *b"ACGT", *b"IIII");
        assert!(ok.validate(0).is_ok());

        let bad = Record::new("r2", *b"ACGT", *b"III");
        assert!(bad.validate(1).is_err());
    }

    #[test]
    fn test_sequence_alphabet() {
        assert!(is_valid_sequence(b"ACGTN"));
        assert!(!is_valid_sequence(b"ACGU"));
        assert!(!is_valid_sequence(b"acgt"));
    }

    #[test]
    fn test_base_index_table() {
        assert_eq!(BASE_INDEX[b'A' as usize], 0);
        assert_eq!(BASE_INDEX[b'C' as usize], 1);
        assert_eq!(BASE_INDEX[b'G' as usize], 2);
        assert_eq!(BASE_INDEX[b'T' as usize], 3);
        assert_eq!(BASE_INDEX[b'N' as usize], 4);
        assert_eq!(BASE_INDEX[b'x' as usize], 4);
    }

    #[test]
    fn test_block_pairing_detection() {
        let mut block = Block::new(0, 0);
        let mut r1 = Record::new("a/1", *b"ACGT", *b"IIII");
        let mut r2 = Record::new("a/2", *b"TTTT", *b"IIII");
        r1.mate = Some(1);
        r2.mate = Some(0);
        block.records.push(r1);
        block.records.push(r2);
        assert!(block.is_paired());
        assert_eq!(block.uniform_len(), Some(4));
    }

    #[test]
    fn test_uniform_len_detects_variation() {
        let mut block = Block::new(0, 0);
        block.records.push(Record::new("a", *b"ACGT", *b"IIII"));
        block.records.push(Record::new("b", *b"ACGTA", *b"IIIII"));
        assert_eq!(block.uniform_len(), None);
    }
}
