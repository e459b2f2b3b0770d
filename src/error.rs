use std::path::PathBuf;

/// Custom Result type for fqc operations, wrapping the crate [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the fqc library, encompassing all error cases
/// that can occur while compressing, storing, or restoring read collections.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Errors related to the archive file and block headers
    #[error("Error processing header: {0}")]
    Header(#[from] HeaderError),

    /// Malformed input data or container structure
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    /// Checksum mismatches at chunk, block, or file level
    #[error("Integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    /// Errors that occur during write operations
    #[error("Error writing archive: {0}")]
    Write(#[from] WriteError),

    /// Errors that occur during read operations
    #[error("Error reading archive: {0}")]
    Read(#[from] ReadError),

    /// Memory budget admission failures
    #[error("Memory budget error: {0}")]
    Budget(#[from] BudgetError),

    /// Pipeline scheduling and cancellation errors
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Standard I/O errors
    #[error("Error with IO: {0}")]
    Io(#[from] std::io::Error),

    /// Errors from the bitnuc dependency for nucleotide encoding/decoding
    #[error("Bitnuc error: {0}")]
    Bitnuc(#[from] bitnuc::Error),

    /// UTF-8 conversion errors
    #[error("Error with UTF8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

impl Error {
    /// Whether this error describes a malformed or corrupt file rather than
    /// an environmental failure.
    ///
    /// Used by the CLI to select exit code 2 (format/integrity) over 1.
    #[must_use]
    pub fn is_data_error(&self) -> bool {
        match self {
            Self::Header(_) | Self::Format(_) | Self::Integrity(_) | Self::Read(_) => true,
            Self::Pipeline(PipelineError::NodeFailed { source, .. }) => source.is_data_error(),
            _ => false,
        }
    }
}

/// Errors specific to processing and validating archive headers
#[derive(thiserror::Error, Debug)]
pub enum HeaderError {
    /// The magic number at the start of the file does not match
    #[error("Invalid magic number")]
    InvalidMagicNumber,

    /// The format version is not supported by this reader
    #[error("Unsupported format version: {major}.{minor} (reader supports major {supported})")]
    UnsupportedVersion {
        major: u8,
        minor: u8,
        supported: u8,
    },

    /// The reserved bytes in the header contain unexpected values
    #[error("Invalid reserved bytes in header")]
    InvalidReservedBytes,

    /// A header declares a size smaller than its fixed minimum
    #[error("Header size {found} below minimum {minimum}")]
    HeaderTooSmall { found: usize, minimum: usize },

    /// The block magic marker was not found where a block should start
    #[error("Invalid block magic at offset {0}")]
    InvalidBlockMagic(u64),
}

/// Errors describing malformed input data or container structure
#[derive(thiserror::Error, Debug)]
pub enum FormatError {
    /// The input contained no records at all
    #[error("Empty corpus: input contains no records")]
    EmptyCorpus,

    /// Too many records violate the expected nucleotide alphabet
    #[error("Alphabet violations in {violations} of {sampled} sampled records exceed threshold")]
    AlphabetViolations { violations: usize, sampled: usize },

    /// An identifier contains bytes outside the supported ASCII range
    #[error("Non-ASCII byte in identifier of record {record}")]
    NonAsciiIdentifier { record: u64 },

    /// A FASTQ record is structurally malformed
    #[error("Malformed FASTQ record near line {line}: {reason}")]
    MalformedFastq { line: u64, reason: String },

    /// Sequence and quality strings have different lengths
    #[error("Record {record}: sequence length {seq_len} != quality length {qual_len}")]
    LengthMismatch {
        record: u64,
        seq_len: usize,
        qual_len: usize,
    },

    /// Mate streams ended at different record counts
    #[error("Unpaired tail: mate-1 has {left} records, mate-2 has {right}")]
    UnpairedTail { left: u64, right: u64 },

    /// A mate index points outside its block or at the wrong partner
    #[error("Inconsistent mate link on record {record} (block {block})")]
    InconsistentMateLink { block: u32, record: usize },

    /// The stored permutation is not a total bijection
    #[error("Reorder map is not a permutation: index {index} {problem}")]
    BrokenPermutation { index: u64, problem: &'static str },

    /// A container section ended before its declared length
    #[error("Truncated {section} section")]
    TruncatedSection { section: &'static str },

    /// A stream payload decoded to something inconsistent with its header
    #[error("Corrupt {stream} stream in block {block}: {reason}")]
    CorruptStream {
        block: u32,
        stream: &'static str,
        reason: String,
    },
}

/// Checksum mismatches detected while reading an archive
#[derive(thiserror::Error, Debug)]
pub enum IntegrityError {
    /// A chunk inside a compressed stream failed its checksum
    #[error("Checksum mismatch in chunk {chunk}: expected {expected:#010x}, found {found:#010x}")]
    ChunkChecksum {
        chunk: usize,
        expected: u32,
        found: u32,
    },

    /// A stored block failed its checksum
    #[error("Checksum mismatch in block {block}: expected {expected:#010x}, found {found:#010x}")]
    BlockChecksum {
        block: u32,
        expected: u32,
        found: u32,
    },

    /// The whole-file checksum in the footer does not match the content
    #[error("File checksum mismatch: expected {expected:#010x}, found {found:#010x}")]
    FileChecksum { expected: u32, found: u32 },

    /// The reorder map section failed its checksum
    #[error("Reorder map checksum mismatch")]
    ReorderMapChecksum,
}

/// Errors that can occur while writing an archive
#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    /// A record's pairing does not match the writer configuration
    #[error("Cannot push record (paired: {actual}) with writer configuration (paired: {expected})")]
    PairingMismatch { expected: bool, actual: bool },

    /// Blocks must be pushed in block-id order
    #[error("Block {found} pushed out of order, expected {expected}")]
    BlockOutOfOrder { expected: u32, found: u32 },

    /// The writer was already finalized
    #[error("Writer already finalized")]
    AlreadyFinalized,

    /// A record count overflowed the declared total
    #[error("Record count {found} exceeds declared total {declared}")]
    RecordCountOverflow { declared: u64, found: u64 },
}

/// Errors that can occur while reading an archive
#[derive(thiserror::Error, Debug)]
pub enum ReadError {
    /// The file is smaller than the fixed layout requires
    #[error("File truncated: {0} bytes is too small for a valid archive")]
    FileTruncation(u64),

    /// Attempted to access a block index that is beyond the available range
    #[error("Requested block ({requested}) is out of range ({available} blocks)")]
    BlockOutOfRange { requested: usize, available: usize },

    /// The archive was never finalized (aborted compression run)
    #[error("Archive is marked partial; refusing to decode (aborted compression run?)")]
    PartialArchive,

    /// Missing the end-of-file magic marker
    #[error("Missing end-of-file magic; file truncated mid-footer?")]
    MissingEndMagic,

    /// A block's bytes extend past the end of the file
    #[error("Block {block} extends past end of file")]
    BlockOverrun { block: u32 },

    /// The file could not be opened
    #[error("Cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Memory budget admission failures
#[derive(thiserror::Error, Debug)]
pub enum BudgetError {
    /// A non-blocking reservation could not be satisfied
    #[error(
        "Memory budget exceeded: stage {stage} requested {requested} bytes, {available} of {capacity} available"
    )]
    Exceeded {
        stage: &'static str,
        requested: usize,
        available: usize,
        capacity: usize,
    },

    /// A stage released more than it had reserved
    #[error("Stage {stage} released more bytes than reserved")]
    ReleaseUnderflow { stage: &'static str },

    /// A single reservation larger than the whole budget can never succeed
    #[error("Stage {stage} requested {requested} bytes exceeding total capacity {capacity}")]
    RequestTooLarge {
        stage: &'static str,
        requested: usize,
        capacity: usize,
    },
}

/// Pipeline scheduling and cancellation errors
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// The run was cancelled before completion
    #[error("Pipeline aborted")]
    Aborted,

    /// A node reached the Failed state; the originating error is preserved
    #[error("Node {node} failed: {source}")]
    NodeFailed {
        node: &'static str,
        #[source]
        source: Box<Error>,
    },

    /// A worker thread panicked
    #[error("Worker thread panicked in node {node}")]
    WorkerPanic { node: &'static str },

    /// A queue was closed while a producer still had items to push
    #[error("Queue disconnected below node {node}")]
    Disconnected { node: &'static str },
}

impl PipelineError {
    /// Wrap an error as the failure of a named node, preserving the root cause.
    #[must_use]
    pub fn node_failed(node: &'static str, source: Error) -> Self {
        Self::NodeFailed {
            node,
            source: Box::new(source),
        }
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn test_data_error_classification() {
        let err = Error::Format(FormatError::EmptyCorpus);
        assert!(err.is_data_error());

        let err = Error::Integrity(IntegrityError::FileChecksum {
            expected: 1,
            found: 2,
        });
        assert!(err.is_data_error());

        let err = Error::Io(std::io::Error::other("disk on fire"));
        assert!(!err.is_data_error());
    }

    #[test]
    fn test_node_failure_preserves_root_cause() {
        let root = Error::Integrity(IntegrityError::BlockChecksum {
            block: 3,
            expected: 0xAA,
            found: 0xBB,
        });
        let err = Error::Pipeline(PipelineError::node_failed("decompressor", root));
        assert!(err.is_data_error());
        let msg = format!("{err}");
        assert!(msg.contains("decompressor"));
    }

    #[test]
    fn test_error_messages_carry_context() {
        let err = FormatError::LengthMismatch {
            record: 17,
            seq_len: 150,
            qual_len: 149,
        };
        let msg = format!("{err}");
        assert!(msg.contains("17"));
        assert!(msg.contains("150"));
        assert!(msg.contains("149"));

        let err = BudgetError::Exceeded {
            stage: "compressor",
            requested: 1024,
            available: 512,
            capacity: 2048,
        };
        let msg = format!("{err}");
        assert!(msg.contains("compressor"));
        assert!(msg.contains("1024"));
    }

    #[test]
    fn test_conversions_into_crate_error() {
        let header: Error = HeaderError::InvalidMagicNumber.into();
        assert!(matches!(header, Error::Header(_)));

        let fmt: Error = FormatError::EmptyCorpus.into();
        assert!(matches!(fmt, Error::Format(_)));

        let read: Error = ReadError::PartialArchive.into();
        assert!(matches!(read, Error::Read(_)));
    }
}
