//! # fqc
//!
//! A reference-free compressor and archive format for FASTQ short-read
//! collections.
//!
//! Records flow through a bounded, multi-stage pipeline: a reader batches
//! parsed reads into fixed-size blocks, per-block compressors cluster
//! similar sequences and delta-encode them (recording the permutation
//! needed to restore input order), and a writer serializes the finished
//! streams into the `.fqc` container together with a block index, the
//! reorder map, and checksums at chunk, block, and file level.
//!
//! ## File Structure
//!
//! ```text
//! [Magic][Global Header + Stats][Block 0]..[Block N][Reorder Map][Index][Footer]
//! ```
//!
//! Every block can be located through the index and decoded independently;
//! corruption is localized to the smallest failing unit.

pub mod budget;
pub mod codec;
pub mod error;
pub mod format;
pub mod io;
pub mod pipeline;
pub mod rc;
pub mod record;
pub mod reorder;
pub mod stats;
pub mod stream;

pub use budget::MemoryBudget;
pub use codec::{BlockCodec, NativeCodec};
pub use error::{Error, Result};
pub use format::{FqcReader, FqcWriter, GlobalHeader};
pub use pipeline::{CompressOptions, DecompressOptions, Pipeline};
pub use record::{Block, Record};
pub use reorder::ReorderMap;
pub use stats::{CorpusStats, GlobalAnalyzer};

/// File magic, PNG-style: high bit to catch 7-bit corruption, CR-LF and LF
/// to catch line-ending conversion.
pub const FILE_MAGIC: [u8; 8] = [0x89, b'F', b'Q', b'C', 0x0D, 0x0A, 0x1A, 0x0A];

/// End-of-file marker closing the footer.
pub const END_MAGIC: [u8; 8] = *b"FQC_EOF\0";

/// Marker at the start of every stored block.
pub const BLOCK_MAGIC: [u8; 4] = *b"FQBK";

/// Current format major version. Major changes are incompatible.
pub const FORMAT_VERSION_MAJOR: u8 = 1;

/// Current format minor version. Minor changes are backward compatible.
pub const FORMAT_VERSION_MINOR: u8 = 0;

/// Encode version as a single byte (major high nibble, minor low nibble).
#[must_use]
pub const fn encode_version(major: u8, minor: u8) -> u8 {
    (major << 4) | (minor & 0x0F)
}

/// Decode the major version from a version byte.
#[must_use]
pub const fn decode_major_version(version: u8) -> u8 {
    version >> 4
}

/// Decode the minor version from a version byte.
#[must_use]
pub const fn decode_minor_version(version: u8) -> u8 {
    version & 0x0F
}

/// Default number of records per block.
pub const DEFAULT_BLOCK_RECORDS: usize = 65_536;

/// Default zstd level applied inside [`stream::CompressedStream`].
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Default chunk size for [`stream::CompressedStream`] payloads.
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Default reservoir size for [`GlobalAnalyzer`] sampling.
pub const DEFAULT_SAMPLE_SIZE: usize = 100_000;

/// Default seed for the analyzer's reservoir sampler. Fixed so repeated
/// runs over the same input produce identical statistics.
pub const DEFAULT_SAMPLE_SEED: u64 = 42;

/// Default process-wide memory budget in bytes.
pub const DEFAULT_MEMORY_BUDGET: usize = 4 * 1024 * 1024 * 1024;

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn test_version_byte_roundtrip() {
        let byte = encode_version(FORMAT_VERSION_MAJOR, FORMAT_VERSION_MINOR);
        assert_eq!(decode_major_version(byte), FORMAT_VERSION_MAJOR);
        assert_eq!(decode_minor_version(byte), FORMAT_VERSION_MINOR);
    }

    #[test]
    fn test_magic_catches_ascii_transport() {
        // high bit must be set on the lead byte
        assert!(FILE_MAGIC[0] & 0x80 != 0);
        // CR-LF pair present to catch newline translation
        assert!(FILE_MAGIC.windows(2).any(|w| w == [0x0D, 0x0A]));
    }
}
