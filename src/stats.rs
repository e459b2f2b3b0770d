//! Corpus statistics and the sampling analyzer that produces them.
//!
//! [`GlobalAnalyzer`] runs ahead of compression: cheap counters cover the
//! whole input while a seeded reservoir keeps a bounded sample that is
//! analyzed exactly. The resulting [`CorpusStats`] are published once,
//! serialized into the archive, and shared read-only by every compressor
//! stage; the quality context tables are re-derived from the persisted
//! bytes at decode time, so both coder sides see the same model.

use std::io::{Cursor, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::error::{FormatError, Result};
use crate::record::{is_valid_sequence, Record};
use crate::{DEFAULT_SAMPLE_SEED, DEFAULT_SAMPLE_SIZE};

/// Number of read positions folded into one histogram bin.
pub const POS_BIN_SIZE: usize = 8;

/// Maximum number of position bins (supports reads up to 512bp before
/// clamping to the final bin).
pub const MAX_POS_BINS: usize = 64;

/// Width of each per-position histogram row (Phred 0..=63).
pub const QUAL_RANGE: usize = 64;

/// Fraction of sampled records allowed to violate the alphabet before the
/// input is rejected as corrupt or non-matching.
pub const VIOLATION_THRESHOLD: f64 = 0.25;

/// Read-only corpus statistics parameterizing the downstream compressors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorpusStats {
    /// Records seen by the streaming pass
    pub records_observed: u64,
    /// Records carrying a mate link
    pub paired_records: u64,
    /// Records with at least one byte outside {A,C,G,T,N}
    pub alphabet_violations: u64,
    /// Bitmask over ALPHABET (bit i set when base i was observed)
    pub alphabet_mask: u8,
    pub min_len: u32,
    pub max_len: u32,
    pub total_bases: u64,
    /// Smallest and largest Phred score observed (offset-33 removed)
    pub qual_min: u8,
    pub qual_max: u8,
    /// Per-position-bin histogram over Phred scores, from the reservoir
    pub pos_hist: Vec<[u32; QUAL_RANGE]>,
    /// Exact read-length distribution of the reservoir, sorted by length
    pub length_dist: Vec<(u32, u64)>,
    /// Reservoir parameters, recorded for reproducibility
    pub sample_size: u32,
    pub sample_seed: u64,
    pub sampled_records: u32,
}

impl CorpusStats {
    /// Fraction of observed records that are paired.
    #[must_use]
    pub fn pairing_rate(&self) -> f64 {
        if self.records_observed == 0 {
            0.0
        } else {
            self.paired_records as f64 / self.records_observed as f64
        }
    }

    /// Histogram bin for a read position.
    #[must_use]
    pub fn pos_bin(pos: usize) -> usize {
        (pos / POS_BIN_SIZE).min(MAX_POS_BINS - 1)
    }

    /// Prior counts for one position bin projected onto a symbol subset.
    ///
    /// The projection is a pure function of the persisted histogram, so
    /// encoder and decoder derive identical priors. Counts are clamped to
    /// u8 range to keep freshly seeded models responsive to local data.
    #[must_use]
    pub fn quality_priors(&self, bin: usize, symbols: &[u8]) -> Vec<u32> {
        let row = self.pos_hist.get(bin.min(self.pos_hist.len().saturating_sub(1)));
        symbols
            .iter()
            .map(|&phred| {
                let raw = row.map_or(0, |r| r[(phred as usize).min(QUAL_RANGE - 1)]);
                // compress dynamic range: keep ordering, cap influence
                (raw.min(u32::from(u8::MAX)) / 4).max(1)
            })
            .collect()
    }

    /// Serialize into a byte buffer (little-endian, self-delimiting).
    pub fn serialize<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u64::<LittleEndian>(self.records_observed)?;
        w.write_u64::<LittleEndian>(self.paired_records)?;
        w.write_u64::<LittleEndian>(self.alphabet_violations)?;
        w.write_u8(self.alphabet_mask)?;
        w.write_u32::<LittleEndian>(self.min_len)?;
        w.write_u32::<LittleEndian>(self.max_len)?;
        w.write_u64::<LittleEndian>(self.total_bases)?;
        w.write_u8(self.qual_min)?;
        w.write_u8(self.qual_max)?;
        w.write_u16::<LittleEndian>(self.pos_hist.len() as u16)?;
        for row in &self.pos_hist {
            for &count in row.iter() {
                w.write_u32::<LittleEndian>(count)?;
            }
        }
        w.write_u16::<LittleEndian>(self.length_dist.len() as u16)?;
        for &(len, count) in &self.length_dist {
            w.write_u32::<LittleEndian>(len)?;
            w.write_u64::<LittleEndian>(count)?;
        }
        w.write_u32::<LittleEndian>(self.sample_size)?;
        w.write_u64::<LittleEndian>(self.sample_seed)?;
        w.write_u32::<LittleEndian>(self.sampled_records)?;
        Ok(())
    }

    /// Deserialize from a byte slice produced by [`Self::serialize`].
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut r = Cursor::new(bytes);
        let truncated = |_| FormatError::TruncatedSection { section: "stats" };

        let records_observed = r.read_u64::<LittleEndian>().map_err(truncated)?;
        let paired_records = r.read_u64::<LittleEndian>().map_err(truncated)?;
        let alphabet_violations = r.read_u64::<LittleEndian>().map_err(truncated)?;
        let alphabet_mask = r.read_u8().map_err(truncated)?;
        let min_len = r.read_u32::<LittleEndian>().map_err(truncated)?;
        let max_len = r.read_u32::<LittleEndian>().map_err(truncated)?;
        let total_bases = r.read_u64::<LittleEndian>().map_err(truncated)?;
        let qual_min = r.read_u8().map_err(truncated)?;
        let qual_max = r.read_u8().map_err(truncated)?;

        let n_bins = r.read_u16::<LittleEndian>().map_err(truncated)? as usize;
        if n_bins > MAX_POS_BINS {
            return Err(FormatError::TruncatedSection { section: "stats" }.into());
        }
        let mut pos_hist = Vec::with_capacity(n_bins);
        for _ in 0..n_bins {
            let mut row = [0u32; QUAL_RANGE];
            for slot in &mut row {
                *slot = r.read_u32::<LittleEndian>().map_err(truncated)?;
            }
            pos_hist.push(row);
        }

        let n_lens = r.read_u16::<LittleEndian>().map_err(truncated)? as usize;
        let mut length_dist = Vec::with_capacity(n_lens);
        for _ in 0..n_lens {
            let len = r.read_u32::<LittleEndian>().map_err(truncated)?;
            let count = r.read_u64::<LittleEndian>().map_err(truncated)?;
            length_dist.push((len, count));
        }

        let sample_size = r.read_u32::<LittleEndian>().map_err(truncated)?;
        let sample_seed = r.read_u64::<LittleEndian>().map_err(truncated)?;
        let sampled_records = r.read_u32::<LittleEndian>().map_err(truncated)?;

        Ok(Self {
            records_observed,
            paired_records,
            alphabet_violations,
            alphabet_mask,
            min_len,
            max_len,
            total_bases,
            qual_min,
            qual_max,
            pos_hist,
            length_dist,
            sample_size,
            sample_seed,
            sampled_records,
        })
    }
}

/// Streaming analyzer with a bounded, seeded reservoir sample.
pub struct GlobalAnalyzer {
    sample_size: usize,
    seed: u64,
    rng: SmallRng,
    reservoir: Vec<Record>,
    observed: u64,
    paired: u64,
    violations: u64,
    min_len: u32,
    max_len: u32,
    total_bases: u64,
    alphabet_mask: u8,
}

impl Default for GlobalAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_SIZE, DEFAULT_SAMPLE_SEED)
    }
}

impl GlobalAnalyzer {
    #[must_use]
    pub fn new(sample_size: usize, seed: u64) -> Self {
        Self {
            sample_size: sample_size.max(1),
            seed,
            rng: SmallRng::seed_from_u64(seed),
            reservoir: Vec::new(),
            observed: 0,
            paired: 0,
            violations: 0,
            min_len: u32::MAX,
            max_len: 0,
            total_bases: 0,
            alphabet_mask: 0,
        }
    }

    /// Feed one record through the cheap counters and the reservoir.
    pub fn observe(&mut self, record: &Record) {
        let i = self.observed;
        self.observed += 1;
        if record.mate.is_some() {
            self.paired += 1;
        }
        if !is_valid_sequence(&record.seq) {
            self.violations += 1;
        }
        for &b in &record.seq {
            let idx = match b {
                b'A' => 0,
                b'C' => 1,
                b'G' => 2,
                b'T' => 3,
                _ => 4,
            };
            self.alphabet_mask |= 1 << idx;
        }
        let len = record.len() as u32;
        self.min_len = self.min_len.min(len);
        self.max_len = self.max_len.max(len);
        self.total_bases += u64::from(len);

        // Vitter's algorithm R; deterministic under a fixed seed
        if self.reservoir.len() < self.sample_size {
            self.reservoir.push(record.clone());
        } else {
            let j = self.rng.random_range(0..=i);
            if (j as usize) < self.sample_size {
                self.reservoir[j as usize] = record.clone();
            }
        }
    }

    /// Finalize and publish the statistics.
    ///
    /// Fails on an empty corpus, or when the alphabet violation rate
    /// signals the input is not sequence data.
    pub fn finish(self) -> Result<CorpusStats> {
        if self.observed == 0 {
            return Err(FormatError::EmptyCorpus.into());
        }
        let violation_rate = self.violations as f64 / self.observed as f64;
        if violation_rate > VIOLATION_THRESHOLD {
            return Err(FormatError::AlphabetViolations {
                violations: self.violations as usize,
                sampled: self.observed as usize,
            }
            .into());
        }

        let n_bins = CorpusStats::pos_bin(self.max_len.saturating_sub(1) as usize) + 1;
        let mut pos_hist = vec![[0u32; QUAL_RANGE]; n_bins];
        let mut qual_min = u8::MAX;
        let mut qual_max = 0u8;
        let mut lengths = std::collections::BTreeMap::new();

        for record in &self.reservoir {
            *lengths.entry(record.len() as u32).or_insert(0u64) += 1;
            for (pos, &q) in record.qual.iter().enumerate() {
                let phred = q.saturating_sub(33).min((QUAL_RANGE - 1) as u8);
                qual_min = qual_min.min(phred);
                qual_max = qual_max.max(phred);
                pos_hist[CorpusStats::pos_bin(pos)][phred as usize] += 1;
            }
        }
        if qual_min == u8::MAX {
            qual_min = 0;
        }

        Ok(CorpusStats {
            records_observed: self.observed,
            paired_records: self.paired,
            alphabet_violations: self.violations,
            alphabet_mask: self.alphabet_mask,
            min_len: self.min_len,
            max_len: self.max_len,
            total_bases: self.total_bases,
            qual_min,
            qual_max,
            pos_hist,
            length_dist: lengths.into_iter().collect(),
            sample_size: self.sample_size as u32,
            sample_seed: self.seed,
            sampled_records: self.reservoir.len() as u32,
        })
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    fn sample_records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| {
                let mut rec = Record::new(
                    format!("read.{i}"),
                    *b"ACGTACGTAC",
                    *b"IIIIHHHHGG",
                );
                if i % 2 == 0 {
                    rec.mate = Some(1);
                }
                rec
            })
            .collect()
    }

    #[test]
    fn test_empty_corpus_rejected() {
        let analyzer = GlobalAnalyzer::new(16, 1);
        let err = analyzer.finish().unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Format(FormatError::EmptyCorpus)
        ));
    }

    #[test]
    fn test_alphabet_violations_rejected() {
        let mut analyzer = GlobalAnalyzer::new(16, 1);
        for i in 0..10 {
            let seq = if i < 5 { *b"XXXXXXXXXX" } else { *b"ACGTACGTAC" };
            analyzer.observe(&Record::new(format!("r{i}"), seq, *b"IIIIIIIIII"));
        }
        let err = analyzer.finish().unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Format(FormatError::AlphabetViolations { .. })
        ));
    }

    #[test]
    fn test_analysis_is_deterministic() {
        let records = sample_records(500);

        let run = || {
            let mut analyzer = GlobalAnalyzer::new(64, 7);
            for r in &records {
                analyzer.observe(r);
            }
            analyzer.finish().unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_counters() {
        let mut analyzer = GlobalAnalyzer::new(1024, 1);
        for r in sample_records(100) {
            analyzer.observe(&r);
        }
        let stats = analyzer.finish().unwrap();
        assert_eq!(stats.records_observed, 100);
        assert_eq!(stats.paired_records, 50);
        assert_eq!(stats.min_len, 10);
        assert_eq!(stats.max_len, 10);
        assert_eq!(stats.total_bases, 1000);
        assert!((stats.pairing_rate() - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.length_dist, vec![(10, 100)]);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut analyzer = GlobalAnalyzer::new(64, 3);
        for r in sample_records(200) {
            analyzer.observe(&r);
        }
        let stats = analyzer.finish().unwrap();

        let mut buf = Vec::new();
        stats.serialize(&mut buf).unwrap();
        let back = CorpusStats::deserialize(&buf).unwrap();
        assert_eq!(stats, back);
    }

    #[test]
    fn test_quality_priors_are_positive() {
        let mut analyzer = GlobalAnalyzer::new(64, 3);
        for r in sample_records(50) {
            analyzer.observe(&r);
        }
        let stats = analyzer.finish().unwrap();
        let priors = stats.quality_priors(0, &[0, 7, 38, 40]);
        assert_eq!(priors.len(), 4);
        assert!(priors.iter().all(|&p| p >= 1));
    }
}
