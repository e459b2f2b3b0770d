//! On-disk layout of the `.fqc` container.
//!
//! ```text
//! +--------------------+
//! |  Magic + Version   |  (9 bytes)
//! +--------------------+
//! |   Global Header    |  (64 bytes, Pod)
//! +--------------------+
//! |  Stats blob (len)  |  (u32 length + serialized CorpusStats)
//! +--------------------+
//! |      Block 0       |  (BlockHeader + per-field compressed streams)
//! +--------------------+
//! |        ...         |
//! +--------------------+
//! |    Reorder Map     |  (optional: u64 count + u64 array + crc32)
//! +--------------------+
//! |    Block Index     |  (u32 count + IndexEntry array + crc32)
//! +--------------------+
//! |       Footer       |  (32 bytes, Pod, ends in end magic)
//! +--------------------+
//! ```
//!
//! All multi-byte integers are little-endian. Every struct that lands on
//! disk is a `bytemuck` Pod with explicit padding, read back with
//! unaligned loads. The footer's content checksum covers everything
//! between the stats blob and the footer itself, so the header rewrite
//! that clears the partial flag at finalize time does not disturb it.

mod reader;
mod writer;

pub use reader::FqcReader;
pub use writer::FqcWriter;

use bytemuck::{Pod, Zeroable};

use crate::error::{HeaderError, Result};
use crate::{BLOCK_MAGIC, END_MAGIC, FILE_MAGIC};

/// Records are interleaved mate pairs.
pub const FLAG_PAIRED: u64 = 1 << 0;

/// The archive was never finalized; readers must refuse it.
pub const FLAG_PARTIAL: u64 = 1 << 1;

/// A reorder map section is present (clustering reordered the records).
pub const FLAG_HAS_REORDER_MAP: u64 = 1 << 2;

/// Size of magic bytes plus the version byte.
pub const MAGIC_HEADER_SIZE: usize = FILE_MAGIC.len() + 1;

/// Fixed global header describing the whole archive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct GlobalHeader {
    /// Feature flags (FLAG_*)
    pub flags: u64,
    /// Total number of records (reads; a pair counts as two)
    pub record_count: u64,
    /// Configured records per block
    pub block_size: u64,
    /// Header size for forward compatibility
    pub header_size: u32,
    /// Per-field streams stored per block
    pub stream_count: u32,
    /// Observed alphabet, one bit per base of ACGTN
    pub alphabet_mask: u8,
    reserved: [u8; 31],
}

pub const SIZE_GLOBAL_HEADER: usize = 64;

impl GlobalHeader {
    #[must_use]
    pub fn new(record_count: u64, block_size: u64, alphabet_mask: u8, paired: bool) -> Self {
        let mut flags = FLAG_PARTIAL;
        if paired {
            flags |= FLAG_PAIRED;
        }
        Self {
            flags,
            record_count,
            block_size,
            header_size: SIZE_GLOBAL_HEADER as u32,
            stream_count: 4,
            alphabet_mask,
            reserved: [0; 31],
        }
    }

    #[must_use]
    pub fn is_paired(&self) -> bool {
        self.flags & FLAG_PAIRED != 0
    }

    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.flags & FLAG_PARTIAL != 0
    }

    #[must_use]
    pub fn has_reorder_map(&self) -> bool {
        self.flags & FLAG_HAS_REORDER_MAP != 0
    }

    pub fn set_reorder_map(&mut self) {
        self.flags |= FLAG_HAS_REORDER_MAP;
    }

    pub fn clear_partial(&mut self) {
        self.flags &= !FLAG_PARTIAL;
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SIZE_GLOBAL_HEADER {
            return Err(HeaderError::HeaderTooSmall {
                found: bytes.len(),
                minimum: SIZE_GLOBAL_HEADER,
            }
            .into());
        }
        let header: Self = bytemuck::pod_read_unaligned(&bytes[..SIZE_GLOBAL_HEADER]);
        if header.reserved != [0; 31] {
            return Err(HeaderError::InvalidReservedBytes.into());
        }
        if (header.header_size as usize) < SIZE_GLOBAL_HEADER {
            return Err(HeaderError::HeaderTooSmall {
                found: header.header_size as usize,
                minimum: SIZE_GLOBAL_HEADER,
            }
            .into());
        }
        Ok(header)
    }
}

/// Per-block header preceding the block's stream payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct BlockHeader {
    /// Original input index of the block's first record
    pub start_record: u64,
    pub magic: [u8; 4],
    pub block_id: u32,
    pub n_records: u32,
    /// Uniform read length; 0 means variable (aux stream present)
    pub uniform_len: u32,
    /// crc32 over the concatenated stream payloads as stored
    pub payload_crc: u32,
    pub len_ids: u32,
    pub len_seqs: u32,
    pub len_quals: u32,
    pub len_aux: u32,
    reserved: [u8; 4],
}

pub const SIZE_BLOCK_HEADER: usize = 48;

impl BlockHeader {
    #[must_use]
    pub fn payload_len(&self) -> usize {
        (self.len_ids + self.len_seqs + self.len_quals + self.len_aux) as usize
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    pub fn from_bytes(bytes: &[u8], offset: u64) -> Result<Self> {
        if bytes.len() < SIZE_BLOCK_HEADER {
            return Err(HeaderError::HeaderTooSmall {
                found: bytes.len(),
                minimum: SIZE_BLOCK_HEADER,
            }
            .into());
        }
        let header: Self = bytemuck::pod_read_unaligned(&bytes[..SIZE_BLOCK_HEADER]);
        if header.magic != BLOCK_MAGIC {
            return Err(HeaderError::InvalidBlockMagic(offset).into());
        }
        Ok(header)
    }
}

/// One block's entry in the seekable index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct IndexEntry {
    /// Absolute file offset of the block (its header)
    pub offset: u64,
    /// Total stored length, header included
    pub length: u64,
    /// Original input index of the block's first record
    pub start_record: u64,
    /// crc32 over the stored block bytes (header + payloads)
    pub checksum: u32,
    pub n_records: u32,
    pub block_id: u32,
    reserved: [u8; 4],
}

pub const SIZE_INDEX_ENTRY: usize = 40;

/// Fixed footer closing the archive; located at `len - 32`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct FileFooter {
    /// Absolute offset of the block index section
    pub index_offset: u64,
    /// Absolute offset of the reorder map section (0 = absent)
    pub reorder_offset: u64,
    /// crc32 over `[content_start, footer_start)`
    pub content_crc: u32,
    reserved: u32,
    pub end_magic: [u8; 8],
}

pub const SIZE_FOOTER: usize = 32;

impl FileFooter {
    #[must_use]
    pub fn new(index_offset: u64, reorder_offset: u64, content_crc: u32) -> Self {
        Self {
            index_offset,
            reorder_offset,
            content_crc,
            reserved: 0,
            end_magic: END_MAGIC,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

/// Validate the lead magic bytes and version byte.
pub fn validate_magic(bytes: &[u8]) -> Result<u8> {
    if bytes.len() < MAGIC_HEADER_SIZE {
        return Err(HeaderError::InvalidMagicNumber.into());
    }
    if bytes[..FILE_MAGIC.len()] != FILE_MAGIC {
        return Err(HeaderError::InvalidMagicNumber.into());
    }
    let version = bytes[FILE_MAGIC.len()];
    let major = crate::decode_major_version(version);
    if major != crate::FORMAT_VERSION_MAJOR {
        return Err(HeaderError::UnsupportedVersion {
            major,
            minor: crate::decode_minor_version(version),
            supported: crate::FORMAT_VERSION_MAJOR,
        }
        .into());
    }
    Ok(version)
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn test_struct_sizes_are_fixed() {
        assert_eq!(std::mem::size_of::<GlobalHeader>(), SIZE_GLOBAL_HEADER);
        assert_eq!(std::mem::size_of::<BlockHeader>(), SIZE_BLOCK_HEADER);
        assert_eq!(std::mem::size_of::<IndexEntry>(), SIZE_INDEX_ENTRY);
        assert_eq!(std::mem::size_of::<FileFooter>(), SIZE_FOOTER);
    }

    #[test]
    fn test_global_header_roundtrip() {
        let mut header = GlobalHeader::new(2000, 512, 0b1111, true);
        header.set_reorder_map();
        assert!(header.is_partial());
        header.clear_partial();

        let back = GlobalHeader::from_bytes(header.as_bytes()).unwrap();
        assert_eq!(back, header);
        assert!(back.is_paired());
        assert!(back.has_reorder_map());
        assert!(!back.is_partial());
    }

    #[test]
    fn test_block_header_magic_checked() {
        let header = BlockHeader {
            start_record: 0,
            magic: *b"NOPE",
            block_id: 0,
            n_records: 1,
            uniform_len: 0,
            payload_crc: 0,
            len_ids: 0,
            len_seqs: 0,
            len_quals: 0,
            len_aux: 0,
            reserved: [0; 4],
        };
        let err = BlockHeader::from_bytes(header.as_bytes(), 100).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Header(HeaderError::InvalidBlockMagic(100))
        ));
    }

    #[test]
    fn test_magic_validation() {
        let mut lead = Vec::new();
        lead.extend_from_slice(&FILE_MAGIC);
        lead.push(crate::encode_version(1, 0));
        assert!(validate_magic(&lead).is_ok());

        lead[0] = b'X';
        assert!(validate_magic(&lead).is_err());

        let mut wrong_version = Vec::new();
        wrong_version.extend_from_slice(&FILE_MAGIC);
        wrong_version.push(crate::encode_version(2, 0));
        let err = validate_magic(&wrong_version).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Header(HeaderError::UnsupportedVersion { major: 2, .. })
        ));
    }
}
