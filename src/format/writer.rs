//! Archive writer.
//!
//! Accepts finished blocks strictly in block-id order, serializes their
//! per-field streams through [`stream`](crate::stream), and finalizes the
//! container with the reorder map, the block index, and the footer. The
//! header goes out first with the partial flag set; `finish` rewrites it
//! with the flag cleared, so a crashed or aborted run can never be
//! mistaken for a valid archive. A writer created from a path removes
//! the file on drop unless it was finished.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};
use tracing::debug;

use super::{
    BlockHeader, FileFooter, GlobalHeader, IndexEntry, MAGIC_HEADER_SIZE, SIZE_BLOCK_HEADER,
};
use crate::codec::EncodedBlock;
use crate::error::{Result, WriteError};
use crate::reorder::ReorderMap;
use crate::stats::CorpusStats;
use crate::stream;
use crate::{encode_version, BLOCK_MAGIC, FILE_MAGIC, FORMAT_VERSION_MAJOR, FORMAT_VERSION_MINOR};

pub struct FqcWriter<W: Write + Seek> {
    inner: W,
    header: GlobalHeader,
    /// Running offset of the next write, mirroring the inner stream
    offset: u64,
    /// crc over everything after the stats blob, up to the footer
    content_crc: crc32fast::Hasher,
    index: Vec<IndexEntry>,
    reorder: ReorderMap,
    reorder_is_identity: bool,
    next_block_id: u32,
    records_written: u64,
    compression_level: i32,
    finished: bool,
    /// Set when created from a path; used for cleanup on abort
    unlink_on_drop: Option<PathBuf>,
}

impl FqcWriter<BufWriter<File>> {
    /// Create an archive at `path`. The file is deleted on drop unless
    /// the writer is finished.
    pub fn create(
        path: impl AsRef<Path>,
        header: GlobalHeader,
        stats: &CorpusStats,
        compression_level: i32,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file = BufWriter::new(File::create(path)?);
        let mut writer = Self::new(file, header, stats, compression_level)?;
        writer.unlink_on_drop = Some(path.to_owned());
        Ok(writer)
    }
}

impl<W: Write + Seek> FqcWriter<W> {
    /// Wrap an arbitrary seekable sink and write the leading sections.
    pub fn new(
        inner: W,
        header: GlobalHeader,
        stats: &CorpusStats,
        compression_level: i32,
    ) -> Result<Self> {
        let mut writer = Self {
            inner,
            header,
            offset: 0,
            content_crc: crc32fast::Hasher::new(),
            index: Vec::new(),
            reorder: ReorderMap::new(),
            reorder_is_identity: true,
            next_block_id: 0,
            records_written: 0,
            compression_level,
            finished: false,
            unlink_on_drop: None,
        };
        writer.write_leading(stats)?;
        Ok(writer)
    }

    fn write_leading(&mut self, stats: &CorpusStats) -> Result<()> {
        self.inner.write_all(&FILE_MAGIC)?;
        self.inner
            .write_u8(encode_version(FORMAT_VERSION_MAJOR, FORMAT_VERSION_MINOR))?;
        self.inner.write_all(self.header.as_bytes())?;

        let mut blob = Vec::new();
        stats.serialize(&mut blob)?;
        self.inner.write_u32::<LittleEndian>(blob.len() as u32)?;
        self.inner.write_all(&blob)?;

        self.offset = (MAGIC_HEADER_SIZE + self.header.as_bytes().len() + 4 + blob.len()) as u64;
        Ok(())
    }

    fn write_tracked(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes)?;
        self.content_crc.update(bytes);
        self.offset += bytes.len() as u64;
        Ok(())
    }

    /// Serialize one encoded block. Blocks must arrive in id order; the
    /// pipeline's reassembly cursor guarantees this.
    pub fn push_block(&mut self, block: &EncodedBlock) -> Result<()> {
        if self.finished {
            return Err(WriteError::AlreadyFinalized.into());
        }
        if block.block_id != self.next_block_id {
            return Err(WriteError::BlockOutOfOrder {
                expected: self.next_block_id,
                found: block.block_id,
            }
            .into());
        }
        if block.paired != self.header.is_paired() {
            return Err(WriteError::PairingMismatch {
                expected: self.header.is_paired(),
                actual: block.paired,
            }
            .into());
        }
        self.records_written += u64::from(block.n_records);
        if self.records_written > self.header.record_count {
            return Err(WriteError::RecordCountOverflow {
                declared: self.header.record_count,
                found: self.records_written,
            }
            .into());
        }

        let level = self.compression_level;
        let z_ids = stream::encode_with(&block.ids, level, crate::DEFAULT_CHUNK_SIZE)?;
        let z_seqs = stream::encode_with(&block.seqs, level, crate::DEFAULT_CHUNK_SIZE)?;
        let z_quals = stream::encode_with(&block.quals, level, crate::DEFAULT_CHUNK_SIZE)?;
        let z_aux = stream::encode_with(&block.aux, level, crate::DEFAULT_CHUNK_SIZE)?;

        let mut payload_crc = crc32fast::Hasher::new();
        payload_crc.update(&z_ids);
        payload_crc.update(&z_seqs);
        payload_crc.update(&z_quals);
        payload_crc.update(&z_aux);

        let header = BlockHeader {
            start_record: block.start_record,
            magic: BLOCK_MAGIC,
            block_id: block.block_id,
            n_records: block.n_records,
            uniform_len: block.uniform_len,
            payload_crc: payload_crc.finalize(),
            len_ids: z_ids.len() as u32,
            len_seqs: z_seqs.len() as u32,
            len_quals: z_quals.len() as u32,
            len_aux: z_aux.len() as u32,
            reserved: [0; 4],
        };

        let block_offset = self.offset;
        let mut block_crc = crc32fast::Hasher::new();
        block_crc.update(header.as_bytes());
        block_crc.update(&z_ids);
        block_crc.update(&z_seqs);
        block_crc.update(&z_quals);
        block_crc.update(&z_aux);

        self.write_tracked(header.as_bytes())?;
        self.write_tracked(&z_ids)?;
        self.write_tracked(&z_seqs)?;
        self.write_tracked(&z_quals)?;
        self.write_tracked(&z_aux)?;

        self.index.push(IndexEntry {
            offset: block_offset,
            length: (SIZE_BLOCK_HEADER + header.payload_len()) as u64,
            start_record: block.start_record,
            checksum: block_crc.finalize(),
            n_records: block.n_records,
            block_id: block.block_id,
            reserved: [0; 4],
        });

        self.reorder
            .push_block(block.start_record, &block.permutation)?;
        if block
            .permutation
            .iter()
            .enumerate()
            .any(|(stored, &orig)| stored as u32 != orig)
        {
            self.reorder_is_identity = false;
        }

        debug!(
            block = block.block_id,
            records = block.n_records,
            bytes = header.payload_len(),
            "block written"
        );
        self.next_block_id += 1;
        Ok(())
    }

    /// Write the trailing sections and clear the partial flag.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Err(WriteError::AlreadyFinalized.into());
        }
        self.reorder.validate()?;

        // reorder map section, elided when clustering never moved a record
        let reorder_offset = if self.reorder_is_identity {
            0
        } else {
            let at = self.offset;
            let bytes = self.reorder.to_bytes();
            let mut section = Vec::with_capacity(bytes.len() + 12);
            section.write_u64::<LittleEndian>(self.reorder.len())?;
            section.extend_from_slice(&bytes);
            section.write_u32::<LittleEndian>(crc32fast::hash(&bytes))?;
            self.write_tracked(&section)?;
            self.header.set_reorder_map();
            at
        };

        // block index section
        let index_offset = self.offset;
        let mut section = Vec::new();
        section.write_u32::<LittleEndian>(self.index.len() as u32)?;
        let mut entries_crc = crc32fast::Hasher::new();
        for entry in &self.index {
            let bytes = bytemuck::bytes_of(entry);
            section.extend_from_slice(bytes);
            entries_crc.update(bytes);
        }
        section.write_u32::<LittleEndian>(entries_crc.finalize())?;
        self.write_tracked(&section)?;

        let footer = FileFooter::new(
            index_offset,
            reorder_offset,
            std::mem::take(&mut self.content_crc).finalize(),
        );
        self.inner.write_all(footer.as_bytes())?;

        // rewrite the global header without the partial flag
        self.header.clear_partial();
        self.inner
            .seek(SeekFrom::Start(MAGIC_HEADER_SIZE as u64))?;
        self.inner.write_all(self.header.as_bytes())?;
        self.inner.seek(SeekFrom::End(0))?;
        self.inner.flush()?;

        self.finished = true;
        self.unlink_on_drop = None;
        Ok(())
    }

    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn records_written(&self) -> u64 {
        self.records_written
    }
}

impl<W: Write + Seek> Drop for FqcWriter<W> {
    fn drop(&mut self) {
        if let Some(path) = self.unlink_on_drop.take() {
            debug!(path = %path.display(), "removing partial archive");
            let _ = std::fs::remove_file(path);
        }
    }
}
