//! Archive reader over a memory-mapped file.
//!
//! Opening validates the magic, version, global header, stats blob,
//! footer, block index, and reorder map; a partial archive is refused
//! outright. Block payload checksums are validated on every block read,
//! before any decoded data is returned. `verify` walks every checksum in
//! the file and reports all failures instead of stopping at the first.

use std::fs::File;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use memmap2::Mmap;

use super::{
    validate_magic, BlockHeader, FileFooter, GlobalHeader, IndexEntry, MAGIC_HEADER_SIZE,
    SIZE_BLOCK_HEADER, SIZE_FOOTER, SIZE_GLOBAL_HEADER, SIZE_INDEX_ENTRY,
};
use crate::codec::{decode_block, BlockCodec, BlockPayload};
use crate::error::{Error, FormatError, IntegrityError, ReadError, Result};
use crate::record::Block;
use crate::reorder::ReorderMap;
use crate::stats::CorpusStats;
use crate::stream;
use crate::END_MAGIC;

fn slice_and_increment<'a>(offset: &mut usize, len: u32, bytes: &'a [u8]) -> &'a [u8] {
    let slice = &bytes[*offset..*offset + len as usize];
    *offset += len as usize;
    slice
}

#[derive(Debug)]
pub struct FqcReader {
    mmap: Mmap,
    header: GlobalHeader,
    stats: CorpusStats,
    footer: FileFooter,
    index: Vec<IndexEntry>,
    reorder: Option<ReorderMap>,
    /// Offset of the first block; the footer's content crc starts here
    content_start: u64,
}

impl FqcReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ReadError::Open {
            path: path.to_owned(),
            source,
        })?;
        let mmap = unsafe { Mmap::map(&file)? };
        Self::from_mmap(mmap)
    }

    fn from_mmap(mmap: Mmap) -> Result<Self> {
        let bytes: &[u8] = &mmap;
        let min_len = MAGIC_HEADER_SIZE + SIZE_GLOBAL_HEADER + 4 + SIZE_FOOTER;
        if bytes.len() < min_len {
            return Err(ReadError::FileTruncation(bytes.len() as u64).into());
        }

        validate_magic(bytes)?;
        let header = GlobalHeader::from_bytes(&bytes[MAGIC_HEADER_SIZE..])?;
        if header.is_partial() {
            return Err(ReadError::PartialArchive.into());
        }

        // stats blob directly after the global header
        let stats_len_at = MAGIC_HEADER_SIZE + header.header_size as usize;
        if stats_len_at + 4 > bytes.len() {
            return Err(FormatError::TruncatedSection { section: "stats" }.into());
        }
        let stats_len = LittleEndian::read_u32(&bytes[stats_len_at..]) as usize;
        let stats_at = stats_len_at + 4;
        if stats_at + stats_len > bytes.len() {
            return Err(FormatError::TruncatedSection { section: "stats" }.into());
        }
        let stats = CorpusStats::deserialize(&bytes[stats_at..stats_at + stats_len])?;
        let content_start = (stats_at + stats_len) as u64;

        // footer comes last and must carry the end magic
        let footer_at = bytes.len() - SIZE_FOOTER;
        let footer: FileFooter =
            bytemuck::pod_read_unaligned(&bytes[footer_at..footer_at + SIZE_FOOTER]);
        if footer.end_magic != END_MAGIC {
            return Err(FormatError::TruncatedSection { section: "footer" }.into());
        }

        let index = Self::parse_index(bytes, &footer, footer_at)?;
        let reorder = Self::parse_reorder(bytes, &header, &footer, footer_at)?;

        Ok(Self {
            mmap,
            header,
            stats,
            footer,
            index,
            reorder,
            content_start,
        })
    }

    fn parse_index(bytes: &[u8], footer: &FileFooter, footer_at: usize) -> Result<Vec<IndexEntry>> {
        let truncated = FormatError::TruncatedSection { section: "index" };
        let at = footer.index_offset as usize;
        if at + 4 > footer_at {
            return Err(truncated.into());
        }
        let n_entries = LittleEndian::read_u32(&bytes[at..]) as usize;
        let entries_at = at + 4;
        let entries_len = n_entries * SIZE_INDEX_ENTRY;
        if entries_at + entries_len + 4 > footer_at {
            return Err(truncated.into());
        }
        let entry_bytes = &bytes[entries_at..entries_at + entries_len];
        let expected = LittleEndian::read_u32(&bytes[entries_at + entries_len..]);
        let found = crc32fast::hash(entry_bytes);
        if found != expected {
            return Err(IntegrityError::BlockChecksum {
                block: u32::MAX,
                expected,
                found,
            }
            .into());
        }
        let mut index = Vec::with_capacity(n_entries);
        for i in 0..n_entries {
            index.push(bytemuck::pod_read_unaligned::<IndexEntry>(
                &entry_bytes[i * SIZE_INDEX_ENTRY..(i + 1) * SIZE_INDEX_ENTRY],
            ));
        }
        Ok(index)
    }

    fn parse_reorder(
        bytes: &[u8],
        header: &GlobalHeader,
        footer: &FileFooter,
        footer_at: usize,
    ) -> Result<Option<ReorderMap>> {
        if footer.reorder_offset == 0 {
            return Ok(None);
        }
        let truncated = FormatError::TruncatedSection {
            section: "reorder map",
        };
        let at = footer.reorder_offset as usize;
        if at + 8 > footer_at {
            return Err(truncated.into());
        }
        let count = LittleEndian::read_u64(&bytes[at..]);
        if count != header.record_count {
            return Err(FormatError::BrokenPermutation {
                index: count,
                problem: "count disagrees with header",
            }
            .into());
        }
        let map_at = at + 8;
        let map_len = (count * 8) as usize;
        if map_at + map_len + 4 > footer_at {
            return Err(truncated.into());
        }
        let map_bytes = &bytes[map_at..map_at + map_len];
        let expected = LittleEndian::read_u32(&bytes[map_at + map_len..]);
        if crc32fast::hash(map_bytes) != expected {
            return Err(IntegrityError::ReorderMapChecksum.into());
        }
        // from_bytes validates the bijection
        Ok(Some(ReorderMap::from_bytes(map_bytes, count)?))
    }

    #[must_use]
    pub fn header(&self) -> &GlobalHeader {
        &self.header
    }

    #[must_use]
    pub fn stats(&self) -> &CorpusStats {
        &self.stats
    }

    #[must_use]
    pub fn num_records(&self) -> u64 {
        self.header.record_count
    }

    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_paired(&self) -> bool {
        self.header.is_paired()
    }

    #[must_use]
    pub fn index(&self) -> &[IndexEntry] {
        &self.index
    }

    #[must_use]
    pub fn reorder_map(&self) -> Option<&ReorderMap> {
        self.reorder.as_ref()
    }

    /// Stored block bytes for entry `i`, checksum-verified.
    fn block_bytes(&self, i: usize) -> Result<(&IndexEntry, &[u8])> {
        let entry = self.index.get(i).ok_or(ReadError::BlockOutOfRange {
            requested: i,
            available: self.index.len(),
        })?;
        let start = entry.offset as usize;
        let end = start + entry.length as usize;
        if end > self.mmap.len() {
            return Err(ReadError::BlockOverrun {
                block: entry.block_id,
            }
            .into());
        }
        let bytes = &self.mmap[start..end];
        let found = crc32fast::hash(bytes);
        if found != entry.checksum {
            return Err(IntegrityError::BlockChecksum {
                block: entry.block_id,
                expected: entry.checksum,
                found,
            }
            .into());
        }
        Ok((entry, bytes))
    }

    /// Seek to one block and reconstruct it in original record order.
    pub fn decode_block(&self, i: usize, codec: &dyn BlockCodec) -> Result<Block> {
        let (entry, bytes) = self.block_bytes(i)?;
        let block_header = BlockHeader::from_bytes(bytes, entry.offset)?;

        let mut at = SIZE_BLOCK_HEADER;
        let z_ids = slice_and_increment(&mut at, block_header.len_ids, bytes);
        let z_seqs = slice_and_increment(&mut at, block_header.len_seqs, bytes);
        let z_quals = slice_and_increment(&mut at, block_header.len_quals, bytes);
        let z_aux = slice_and_increment(&mut at, block_header.len_aux, bytes);

        let ids = stream::decode(z_ids)?;
        let seqs = stream::decode(z_seqs)?;
        let quals = stream::decode(z_quals)?;
        let aux = stream::decode(z_aux)?;

        let n = block_header.n_records as usize;
        let permutation = match &self.reorder {
            Some(map) => map.block_permutation(block_header.start_record, n)?,
            None => (0..n as u32).collect(),
        };

        let payload = BlockPayload {
            block_id: block_header.block_id,
            start_record: block_header.start_record,
            n_records: block_header.n_records,
            paired: self.header.is_paired(),
            uniform_len: block_header.uniform_len,
            permutation,
            ids: &ids,
            seqs: &seqs,
            quals: &quals,
            aux: &aux,
        };
        decode_block(&payload, &self.stats, codec)
    }

    /// Walk every checksum in the archive, collecting all failures.
    #[must_use]
    pub fn verify(&self) -> Vec<Error> {
        let mut failures = Vec::new();

        // whole-file content checksum
        let footer_at = self.mmap.len() - SIZE_FOOTER;
        let content = &self.mmap[self.content_start as usize..footer_at];
        let found = crc32fast::hash(content);
        if found != self.footer.content_crc {
            failures.push(
                IntegrityError::FileChecksum {
                    expected: self.footer.content_crc,
                    found,
                }
                .into(),
            );
        }

        for i in 0..self.index.len() {
            match self.block_bytes(i) {
                Ok((entry, bytes)) => {
                    // block checksum passed; walk the chunk checksums too
                    if let Err(err) = Self::verify_block_streams(entry, bytes) {
                        failures.push(err);
                    }
                }
                Err(err) => failures.push(err),
            }
        }
        failures
    }

    fn verify_block_streams(entry: &IndexEntry, bytes: &[u8]) -> Result<()> {
        let block_header = BlockHeader::from_bytes(bytes, entry.offset)?;
        let mut at = SIZE_BLOCK_HEADER;
        for len in [
            block_header.len_ids,
            block_header.len_seqs,
            block_header.len_quals,
            block_header.len_aux,
        ] {
            let view = stream::StreamView::parse(&bytes[at..at + len as usize])?;
            view.verify()?;
            at += len as usize;
        }
        Ok(())
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::codec::{encode_block, NativeCodec};
    use crate::format::FqcWriter;
    use crate::record::Record;
    use crate::stats::GlobalAnalyzer;

    fn build_archive(path: &std::path::Path) -> (Vec<Block>, CorpusStats) {
        let mut blocks = Vec::new();
        let mut analyzer = GlobalAnalyzer::new(1024, 1);
        for b in 0..3u32 {
            let mut block = Block::new(b, u64::from(b) * 10);
            for i in 0..10 {
                let record = Record::new(
                    format!("read.{}", u64::from(b) * 10 + i),
                    *b"ACGTACGTACGTACGTACGT",
                    *b"IIIIHHHHGGGGFFFFEEEE",
                );
                analyzer.observe(&record);
                block.records.push(record);
            }
            blocks.push(block);
        }
        let stats = analyzer.finish().unwrap();

        let header = GlobalHeader::new(30, 10, stats.alphabet_mask, false);
        let mut writer = FqcWriter::create(path, header, &stats, 3).unwrap();
        let codec = NativeCodec::default();
        for block in &blocks {
            let encoded = encode_block(block, &stats, &codec).unwrap();
            writer.push_block(&encoded).unwrap();
        }
        writer.finish().unwrap();
        (blocks, stats)
    }

    #[test]
    fn test_format_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.fqc");
        let (blocks, stats) = build_archive(&path);

        let reader = FqcReader::open(&path).unwrap();
        assert_eq!(reader.num_records(), 30);
        assert_eq!(reader.num_blocks(), 3);
        assert!(!reader.is_paired());
        assert_eq!(reader.stats(), &stats);
        assert!(reader.verify().is_empty());

        let codec = NativeCodec::default();
        for (i, expected) in blocks.iter().enumerate() {
            let block = reader.decode_block(i, &codec).unwrap();
            assert_eq!(block.records, expected.records);
        }
    }

    #[test]
    fn test_block_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.fqc");
        build_archive(&path);

        let reader = FqcReader::open(&path).unwrap();
        let err = reader
            .decode_block(7, &NativeCodec::default())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Read(ReadError::BlockOutOfRange { requested: 7, .. })
        ));
    }

    #[test]
    fn test_unfinished_writer_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.fqc");
        {
            let mut analyzer = GlobalAnalyzer::new(8, 1);
            analyzer.observe(&Record::new("r", *b"ACGT", *b"IIII"));
            let stats = analyzer.finish().unwrap();
            let header = GlobalHeader::new(1, 1, stats.alphabet_mask, false);
            let _writer = FqcWriter::create(&path, header, &stats, 3).unwrap();
            assert!(path.exists());
            // dropped without finish: an aborted run
        }
        assert!(!path.exists());
    }
}
