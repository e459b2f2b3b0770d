//! Chunked, checksummed byte-stream codec: the storage primitive under
//! every algorithmic compressor's output.
//!
//! An encoded stream is a chunk table followed by zstd-compressed chunk
//! payloads. Each chunk carries its own crc32, so corruption localizes to
//! one chunk instead of invalidating the whole stream, and any chunk can
//! be decoded without touching the others.
//!
//! ```text
//! [n_chunks: u32]
//! [raw_len: u32][comp_len: u32][crc32: u32]  (per chunk)
//! [chunk payloads...]
//! ```

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{FormatError, IntegrityError, Result};
use crate::{DEFAULT_CHUNK_SIZE, DEFAULT_COMPRESSION_LEVEL};

const TABLE_ENTRY: usize = 12;

/// Encode a byte buffer into the chunked stream representation.
pub fn encode(data: &[u8]) -> Result<Vec<u8>> {
    encode_with(data, DEFAULT_COMPRESSION_LEVEL, DEFAULT_CHUNK_SIZE)
}

/// Encode with an explicit zstd level and chunk size.
pub fn encode_with(data: &[u8], level: i32, chunk_size: usize) -> Result<Vec<u8>> {
    let chunk_size = chunk_size.max(1);
    let chunks: Vec<&[u8]> = data.chunks(chunk_size).collect();

    let mut payloads = Vec::with_capacity(chunks.len());
    for chunk in &chunks {
        payloads.push(zstd::bulk::compress(chunk, level)?);
    }

    let mut out = Vec::with_capacity(4 + chunks.len() * TABLE_ENTRY);
    let mut word = [0u8; 4];
    LittleEndian::write_u32(&mut word, chunks.len() as u32);
    out.extend_from_slice(&word);
    for (chunk, payload) in chunks.iter().zip(&payloads) {
        LittleEndian::write_u32(&mut word, chunk.len() as u32);
        out.extend_from_slice(&word);
        LittleEndian::write_u32(&mut word, payload.len() as u32);
        out.extend_from_slice(&word);
        LittleEndian::write_u32(&mut word, crc32fast::hash(payload));
        out.extend_from_slice(&word);
    }
    for payload in &payloads {
        out.extend_from_slice(payload);
    }
    Ok(out)
}

/// Parsed view over an encoded stream, supporting random chunk access.
#[derive(Debug)]
pub struct StreamView<'a> {
    table: &'a [u8],
    payloads: &'a [u8],
    n_chunks: usize,
}

impl<'a> StreamView<'a> {
    /// Parse the chunk table; payload bytes are not touched yet.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(FormatError::TruncatedSection { section: "stream" }.into());
        }
        let n_chunks = LittleEndian::read_u32(&bytes[..4]) as usize;
        let table_len = n_chunks * TABLE_ENTRY;
        if bytes.len() < 4 + table_len {
            return Err(FormatError::TruncatedSection { section: "stream" }.into());
        }
        let table = &bytes[4..4 + table_len];
        let payloads = &bytes[4 + table_len..];

        // the payload region must cover the table's declared sizes
        let declared: usize = (0..n_chunks)
            .map(|i| LittleEndian::read_u32(&table[i * TABLE_ENTRY + 4..]) as usize)
            .sum();
        if payloads.len() < declared {
            return Err(FormatError::TruncatedSection { section: "stream" }.into());
        }

        Ok(Self {
            table,
            payloads,
            n_chunks,
        })
    }

    #[must_use]
    pub fn n_chunks(&self) -> usize {
        self.n_chunks
    }

    /// Total decoded length across all chunks.
    #[must_use]
    pub fn raw_len(&self) -> usize {
        (0..self.n_chunks)
            .map(|i| LittleEndian::read_u32(&self.table[i * TABLE_ENTRY..]) as usize)
            .sum()
    }

    fn entry(&self, i: usize) -> (usize, usize, u32) {
        let base = i * TABLE_ENTRY;
        (
            LittleEndian::read_u32(&self.table[base..]) as usize,
            LittleEndian::read_u32(&self.table[base + 4..]) as usize,
            LittleEndian::read_u32(&self.table[base + 8..]),
        )
    }

    /// Verify and decode a single chunk.
    pub fn decode_chunk(&self, i: usize) -> Result<Vec<u8>> {
        let mut offset = 0;
        for j in 0..i {
            offset += self.entry(j).1;
        }
        let (raw_len, comp_len, expected) = self.entry(i);
        let payload = &self.payloads[offset..offset + comp_len];

        let found = crc32fast::hash(payload);
        if found != expected {
            return Err(IntegrityError::ChunkChecksum {
                chunk: i,
                expected,
                found,
            }
            .into());
        }
        let decoded = zstd::bulk::decompress(payload, raw_len)?;
        if decoded.len() != raw_len {
            return Err(FormatError::TruncatedSection { section: "stream" }.into());
        }
        Ok(decoded)
    }

    /// Verify every chunk checksum without decompressing.
    pub fn verify(&self) -> Result<()> {
        let mut offset = 0;
        for i in 0..self.n_chunks {
            let (_, comp_len, expected) = self.entry(i);
            let payload = &self.payloads[offset..offset + comp_len];
            let found = crc32fast::hash(payload);
            if found != expected {
                return Err(IntegrityError::ChunkChecksum {
                    chunk: i,
                    expected,
                    found,
                }
                .into());
            }
            offset += comp_len;
        }
        Ok(())
    }
}

/// Decode a whole stream sequentially, verifying every chunk.
pub fn decode(bytes: &[u8]) -> Result<Vec<u8>> {
    let view = StreamView::parse(bytes)?;
    let mut out = Vec::with_capacity(view.raw_len());
    for i in 0..view.n_chunks() {
        out.extend_from_slice(&view.decode_chunk(i)?);
    }
    Ok(out)
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn test_roundtrip_empty() {
        let encoded = encode(&[]).unwrap();
        assert_eq!(decode(&encoded).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_roundtrip_multi_chunk() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let encoded = encode_with(&data, 3, 1024).unwrap();
        let view = StreamView::parse(&encoded).unwrap();
        assert_eq!(view.n_chunks(), 10);
        assert_eq!(view.raw_len(), data.len());
        assert_eq!(decode(&encoded).unwrap(), data);
    }

    #[test]
    fn test_random_chunk_access() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i / 16) as u8).collect();
        let encoded = encode_with(&data, 3, 1000).unwrap();
        let view = StreamView::parse(&encoded).unwrap();
        let chunk2 = view.decode_chunk(2).unwrap();
        assert_eq!(chunk2, data[2000..3000].to_vec());
    }

    #[test]
    fn test_corruption_localizes_to_one_chunk() {
        let data: Vec<u8> = (0..4000u32).map(|i| (i % 7) as u8).collect();
        let mut encoded = encode_with(&data, 3, 1000).unwrap();

        // flip one byte inside the final chunk's payload
        let n = encoded.len();
        encoded[n - 1] ^= 0xFF;

        let view = StreamView::parse(&encoded).unwrap();
        assert!(view.decode_chunk(0).is_ok());
        assert!(view.decode_chunk(1).is_ok());
        assert!(view.decode_chunk(2).is_ok());
        let err = view.decode_chunk(3).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Integrity(IntegrityError::ChunkChecksum { chunk: 3, .. })
        ));
    }

    #[test]
    fn test_truncated_stream_is_format_error() {
        let data = vec![1u8; 5000];
        let encoded = encode_with(&data, 3, 1000).unwrap();
        let err = StreamView::parse(&encoded[..30]).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Format(FormatError::TruncatedSection { .. })
        ));
    }
}
