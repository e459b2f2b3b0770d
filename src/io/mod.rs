//! File I/O collaborators: the FASTQ text boundary and overlapped
//! read-ahead / write-behind primitives.

pub mod async_io;
pub mod fastq;

pub use async_io::{AsyncReader, AsyncWriter};
pub use fastq::{FastqParser, FastqSink, PairedReader};
