//! The permutation between original input order and stored archive order.
//!
//! Block compressors emit a local permutation per block; the map
//! accumulates them into one global bijection that is persisted in full
//! and validated on load. Blocks cover contiguous original ranges, so the
//! local permutation of any block can be sliced back out for independent
//! block decoding.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{FormatError, Result};

/// Bijection between original record index and stored (post-clustering)
/// index, plus its inverse.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReorderMap {
    /// forward[original] = stored
    forward: Vec<u64>,
    /// inverse[stored] = original
    inverse: Vec<u64>,
}

impl ReorderMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity map over `n` records (preserve-order mode).
    #[must_use]
    pub fn identity(n: u64) -> Self {
        let forward: Vec<u64> = (0..n).collect();
        Self {
            inverse: forward.clone(),
            forward,
        }
    }

    /// Number of records covered.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.forward.len() as u64
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Append one block's local permutation.
    ///
    /// `local[stored_pos] = original_offset` within the block. Blocks must
    /// be appended in block-id order; `start` is the global index of the
    /// block's first record and must equal the current length.
    pub fn push_block(&mut self, start: u64, local: &[u32]) -> Result<()> {
        if start != self.len() {
            return Err(FormatError::BrokenPermutation {
                index: start,
                problem: "block appended out of order",
            }
            .into());
        }
        let n = local.len() as u64;
        self.forward
            .resize((start + n) as usize, u64::MAX);
        for (stored_pos, &orig_offset) in local.iter().enumerate() {
            let original = start + u64::from(orig_offset);
            let stored = start + stored_pos as u64;
            if original >= start + n || self.forward[original as usize] != u64::MAX {
                return Err(FormatError::BrokenPermutation {
                    index: original,
                    problem: "duplicate or out-of-range local index",
                }
                .into());
            }
            self.forward[original as usize] = stored;
        }
        self.inverse.resize((start + n) as usize, 0);
        for original in start..start + n {
            let stored = self.forward[original as usize];
            self.inverse[stored as usize] = original;
        }
        Ok(())
    }

    /// Map an original record index to its stored index.
    #[must_use]
    pub fn apply(&self, original: u64) -> u64 {
        self.forward[original as usize]
    }

    /// Map a stored index back to the original record index.
    #[must_use]
    pub fn invert(&self, stored: u64) -> u64 {
        self.inverse[stored as usize]
    }

    /// Extract the local permutation of a block spanning
    /// `[start, start + n)`: `local[stored_pos] = original_offset`.
    ///
    /// Blocks are closed under the permutation by construction; a stored
    /// map that sends a record across a block boundary is rejected.
    pub fn block_permutation(&self, start: u64, n: usize) -> Result<Vec<u32>> {
        let mut local = vec![0u32; n];
        for offset in 0..n as u64 {
            let stored = self.forward[(start + offset) as usize];
            let rel = stored
                .checked_sub(start)
                .filter(|rel| *rel < n as u64)
                .ok_or(FormatError::BrokenPermutation {
                    index: start + offset,
                    problem: "crosses a block boundary",
                })?;
            local[rel as usize] = offset as u32;
        }
        Ok(local)
    }

    /// Assert the map is a total bijection over `[0, len)`.
    pub fn validate(&self) -> Result<()> {
        let n = self.forward.len();
        if self.inverse.len() != n {
            return Err(FormatError::BrokenPermutation {
                index: n as u64,
                problem: "forward and inverse lengths differ",
            }
            .into());
        }
        let mut seen = vec![false; n];
        for (original, &stored) in self.forward.iter().enumerate() {
            if stored as usize >= n {
                return Err(FormatError::BrokenPermutation {
                    index: original as u64,
                    problem: "maps out of range",
                }
                .into());
            }
            if seen[stored as usize] {
                return Err(FormatError::BrokenPermutation {
                    index: original as u64,
                    problem: "maps to a duplicate stored index",
                }
                .into());
            }
            seen[stored as usize] = true;
            if self.inverse[stored as usize] != original as u64 {
                return Err(FormatError::BrokenPermutation {
                    index: original as u64,
                    problem: "inverse disagrees with forward",
                }
                .into());
            }
        }
        Ok(())
    }

    /// Serialize as a fixed-width u64 array (forward direction only; the
    /// inverse is rebuilt on load).
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.forward.len() * 8];
        LittleEndian::write_u64_into(&self.forward, &mut buf);
        buf
    }

    /// Rebuild from serialized bytes, validating the bijection.
    pub fn from_bytes(bytes: &[u8], record_count: u64) -> Result<Self> {
        if bytes.len() as u64 != record_count * 8 {
            return Err(FormatError::TruncatedSection {
                section: "reorder map",
            }
            .into());
        }
        let mut forward = vec![0u64; record_count as usize];
        LittleEndian::read_u64_into(bytes, &mut forward);

        let mut inverse = vec![u64::MAX; record_count as usize];
        for (original, &stored) in forward.iter().enumerate() {
            if stored >= record_count {
                return Err(FormatError::BrokenPermutation {
                    index: original as u64,
                    problem: "maps out of range",
                }
                .into());
            }
            if inverse[stored as usize] != u64::MAX {
                return Err(FormatError::BrokenPermutation {
                    index: original as u64,
                    problem: "maps to a duplicate stored index",
                }
                .into());
            }
            inverse[stored as usize] = original as u64;
        }
        Ok(Self { forward, inverse })
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn test_identity() {
        let map = ReorderMap::identity(10);
        map.validate().unwrap();
        for i in 0..10 {
            assert_eq!(map.apply(i), i);
            assert_eq!(map.invert(i), i);
        }
    }

    #[test]
    fn test_block_accumulation() {
        let mut map = ReorderMap::new();
        // block 0: stored order [2, 0, 1]
        map.push_block(0, &[2, 0, 1]).unwrap();
        // block 1: stored order [1, 0]
        map.push_block(3, &[1, 0]).unwrap();
        map.validate().unwrap();

        assert_eq!(map.apply(2), 0);
        assert_eq!(map.apply(0), 1);
        assert_eq!(map.apply(1), 2);
        assert_eq!(map.apply(4), 3);
        assert_eq!(map.apply(3), 4);

        for i in 0..5 {
            assert_eq!(map.invert(map.apply(i)), i);
        }
    }

    #[test]
    fn test_block_permutation_slicing() {
        let mut map = ReorderMap::new();
        let local = vec![2u32, 0, 1];
        map.push_block(0, &local).unwrap();
        assert_eq!(map.block_permutation(0, 3).unwrap(), local);
    }

    #[test]
    fn test_block_permutation_rejects_cross_block_map() {
        // a valid global bijection that is not block-local
        let bytes = ReorderMap {
            forward: vec![2, 1, 0, 3],
            inverse: vec![2, 1, 0, 3],
        }
        .to_bytes();
        let map = ReorderMap::from_bytes(&bytes, 4).unwrap();
        // blocks of two: record 0 maps into the second block
        assert!(map.block_permutation(0, 2).is_err());
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut map = ReorderMap::new();
        let err = map.push_block(0, &[0, 0, 1]).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Format(FormatError::BrokenPermutation { .. })
        ));
    }

    #[test]
    fn test_serialization_validates_on_load() {
        let mut map = ReorderMap::new();
        map.push_block(0, &[1, 2, 0, 3]).unwrap();
        let bytes = map.to_bytes();
        let back = ReorderMap::from_bytes(&bytes, 4).unwrap();
        assert_eq!(map, back);

        // corrupt one entry into a duplicate
        let mut bad = bytes.clone();
        let dup = bad[8..16].to_vec();
        bad[0..8].copy_from_slice(&dup);
        assert!(ReorderMap::from_bytes(&bad, 4).is_err());

        // truncated payload
        assert!(ReorderMap::from_bytes(&bytes[..24], 4).is_err());
    }
}
