//! Lossless quality-string compression.
//!
//! A context-adaptive range coder over the block's own quality alphabet.
//! The context is (position bin, previous quality symbol, current base);
//! each context's model is seeded from the corpus-wide per-position
//! histograms and then adapts symbol by symbol. Deriving the seed counts
//! is a pure function of the persisted [`CorpusStats`] and the block's
//! stored symbol set, so the decoder reproduces the encoder's model
//! exactly. Read lengths always travel in the aux stream, so qualities
//! outside the analyzed length distribution decode through the same path
//! with positions clamped to the final bin.

use super::{push_varint, read_varint};
use crate::error::{FormatError, Result};
use crate::rc::{AdaptiveModel, RangeDecoder, RangeEncoder};
use crate::record::BASE_INDEX;
use crate::stats::CorpusStats;

/// Base context cardinality: A, C, G, T, and everything else.
const N_BASES: usize = 5;

#[inline]
fn context_id(n_symbols: usize, pos: usize, prev_sym: usize, base: u8) -> usize {
    let bin = CorpusStats::pos_bin(pos);
    (bin * (n_symbols + 1) + prev_sym) * N_BASES + base as usize
}

/// Lazily grown context table; contexts are only materialized when first
/// touched, identically on both coder sides.
struct ContextTable {
    slots: Vec<u32>,
    models: Vec<AdaptiveModel>,
    priors_by_bin: Vec<Option<Vec<u32>>>,
    symbols_phred: Vec<u8>,
}

impl ContextTable {
    fn new(n_contexts: usize, symbols: &[u8]) -> Self {
        Self {
            slots: vec![u32::MAX; n_contexts],
            models: Vec::new(),
            priors_by_bin: Vec::new(),
            symbols_phred: symbols.iter().map(|&b| b.saturating_sub(33)).collect(),
        }
    }

    fn model(&mut self, ctx: usize, pos: usize, stats: &CorpusStats) -> &mut AdaptiveModel {
        if self.slots[ctx] == u32::MAX {
            let bin = CorpusStats::pos_bin(pos);
            if bin >= self.priors_by_bin.len() {
                self.priors_by_bin.resize(bin + 1, None);
            }
            let priors = self.priors_by_bin[bin]
                .get_or_insert_with(|| stats.quality_priors(bin, &self.symbols_phred));
            let id = self.models.len() as u32;
            self.slots[ctx] = id;
            self.models.push(AdaptiveModel::with_priors(priors));
        }
        &mut self.models[self.slots[ctx] as usize]
    }
}

/// Encode quality strings (original block order) against their sequences.
///
/// Layout: `[n_symbols: u8][symbols][payload_len: varint][payload]`
pub fn encode(qualities: &[&[u8]], sequences: &[&[u8]], stats: &CorpusStats) -> Result<Vec<u8>> {
    if qualities.is_empty() {
        return Ok(Vec::new());
    }

    // block-exact symbol alphabet; kept separate from the corpus-level
    // histogram so a symbol the sampler never saw still encodes
    let mut seen = [false; 256];
    for qual in qualities {
        for &b in *qual {
            seen[b as usize] = true;
        }
    }
    let symbols: Vec<u8> = (0u8..=255).filter(|&b| seen[b as usize]).collect();
    let n_symbols = symbols.len();
    let mut sym_of = [0u8; 256];
    for (i, &s) in symbols.iter().enumerate() {
        sym_of[s as usize] = i as u8;
    }

    let n_contexts = (crate::stats::MAX_POS_BINS * (n_symbols + 1)) * N_BASES;
    let mut table = ContextTable::new(n_contexts, &symbols);
    let mut encoder = RangeEncoder::new();

    for (qual, seq) in qualities.iter().zip(sequences.iter()) {
        let mut prev_sym = n_symbols; // start-of-read sentinel
        for (j, &q) in qual.iter().enumerate() {
            let sym = sym_of[q as usize] as usize;
            let base = BASE_INDEX[seq.get(j).copied().unwrap_or(b'N') as usize];
            let ctx = context_id(n_symbols, j, prev_sym, base);
            let model = table.model(ctx, j, stats);
            let (cum, freq, total) = model.encode_params(sym);
            encoder.encode(cum, freq, total);
            model.update(sym);
            prev_sym = sym;
        }
    }

    let payload = encoder.finish();
    let mut out = Vec::with_capacity(payload.len() + n_symbols + 8);
    out.push(n_symbols as u8);
    out.extend_from_slice(&symbols);
    push_varint(&mut out, payload.len() as u64);
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decode quality strings; `sequences` must already be in original block
/// order and define each record's quality length.
pub fn decode(data: &[u8], sequences: &[&[u8]], stats: &CorpusStats) -> Result<Vec<Vec<u8>>> {
    if sequences.is_empty() {
        return Ok(Vec::new());
    }
    if data.is_empty() {
        return Err(FormatError::TruncatedSection { section: "quality" }.into());
    }

    let n_symbols = data[0] as usize;
    let mut offset = 1;
    if offset + n_symbols > data.len() {
        return Err(FormatError::TruncatedSection { section: "quality" }.into());
    }
    let symbols = data[offset..offset + n_symbols].to_vec();
    offset += n_symbols;

    let payload_len = read_varint(data, &mut offset)
        .ok_or(FormatError::TruncatedSection { section: "quality" })? as usize;
    if offset + payload_len > data.len() {
        return Err(FormatError::TruncatedSection { section: "quality" }.into());
    }
    let payload = &data[offset..offset + payload_len];

    let n_contexts = (crate::stats::MAX_POS_BINS * (n_symbols + 1)) * N_BASES;
    let mut table = ContextTable::new(n_contexts, &symbols);
    let mut decoder = RangeDecoder::new(payload);

    let mut out = Vec::with_capacity(sequences.len());
    for seq in sequences {
        let mut qual = Vec::with_capacity(seq.len());
        let mut prev_sym = n_symbols;
        for (j, &b) in seq.iter().enumerate() {
            let base = BASE_INDEX[b as usize];
            let ctx = context_id(n_symbols, j, prev_sym, base);
            let model = table.model(ctx, j, stats);
            let sym = decoder.decode(&model.cum_freqs, model.n_symbols(), model.total);
            model.update(sym);
            qual.push(symbols[sym]);
            prev_sym = sym;
        }
        out.push(qual);
    }
    Ok(out)
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::record::Record;
    use crate::stats::GlobalAnalyzer;

    fn stats_for(seqs: &[&[u8]], quals: &[&[u8]]) -> CorpusStats {
        let mut analyzer = GlobalAnalyzer::new(1024, 1);
        for (s, q) in seqs.iter().zip(quals.iter()) {
            analyzer.observe(&Record::new("r", s.to_vec(), q.to_vec()));
        }
        analyzer.finish().unwrap()
    }

    fn roundtrip(seqs: &[&[u8]], quals: &[&[u8]]) {
        let stats = stats_for(seqs, quals);
        let encoded = encode(quals, seqs, &stats).unwrap();
        let decoded = decode(&encoded, seqs, &stats).unwrap();
        for (got, want) in decoded.iter().zip(quals.iter()) {
            assert_eq!(got.as_slice(), *want);
        }
    }

    #[test]
    fn test_roundtrip_basic() {
        let seqs: Vec<&[u8]> = vec![b"ACGTACGTAC"; 10];
        let quals: Vec<&[u8]> = vec![b"IIIIIHHHGB"; 10];
        roundtrip(&seqs, &quals);
    }

    #[test]
    fn test_roundtrip_varied() {
        let seqs: Vec<&[u8]> = vec![
            b"AAACCCGGGTTT",
            b"TTTGGGCCCAAA",
            b"ACGTACGTACGT",
            b"NNNNACGTNNNN",
        ];
        let quals: Vec<&[u8]> = vec![
            b"IIIIII555555",
            b"555555IIIIII",
            b"I5I5I5I5I5I5",
            b"!!!!IIII!!!!",
        ];
        roundtrip(&seqs, &quals);
    }

    #[test]
    fn test_roundtrip_variable_lengths() {
        let seqs: Vec<&[u8]> = vec![b"ACGTACGTAC", b"ACGTAC", b"TTTGGGCCCAAACCCTT"];
        let quals: Vec<&[u8]> = vec![b"IIIIII5555", b"I5I5I5", b"555555IIIIIIIIIII"];
        roundtrip(&seqs, &quals);
    }

    #[test]
    fn test_reads_longer_than_analyzed_bins() {
        // analyzer only ever saw 10bp reads, data has a 600bp read;
        // positions past the final bin clamp instead of failing
        let short_seqs: Vec<&[u8]> = vec![b"ACGTACGTAC"; 4];
        let short_quals: Vec<&[u8]> = vec![b"IIIIHHHHGG"; 4];
        let stats = stats_for(&short_seqs, &short_quals);

        let long_seq: Vec<u8> = b"ACGT".iter().copied().cycle().take(600).collect();
        let long_qual: Vec<u8> = b"IH".iter().copied().cycle().take(600).collect();
        let seqs: Vec<&[u8]> = vec![&long_seq];
        let quals: Vec<&[u8]> = vec![&long_qual];

        let encoded = encode(&quals, &seqs, &stats).unwrap();
        let decoded = decode(&encoded, &seqs, &stats).unwrap();
        assert_eq!(decoded[0], long_qual);
    }

    #[test]
    fn test_symbol_missing_from_sample_still_encodes() {
        let seqs: Vec<&[u8]> = vec![b"ACGTACGTAC"; 3];
        let quals: Vec<&[u8]> = vec![b"IIIIIIIIII"; 3];
        let stats = stats_for(&seqs, &quals);

        // '#' never appeared in the sampled corpus
        let odd_quals: Vec<&[u8]> = vec![b"II##IIII#I"; 3];
        let encoded = encode(&odd_quals, &seqs, &stats).unwrap();
        let decoded = decode(&encoded, &seqs, &stats).unwrap();
        for q in decoded {
            assert_eq!(q.as_slice(), odd_quals[0]);
        }
    }

    #[test]
    fn test_compresses_uniform_quality() {
        let seqs: Vec<&[u8]> = vec![b"ACGTACGTACGTACGTACGT"; 200];
        let quals: Vec<&[u8]> = vec![b"IIIIIIIIIIIIIIIIIIII"; 200];
        let stats = stats_for(&seqs, &quals);
        let encoded = encode(&quals, &seqs, &stats).unwrap();
        let raw: usize = quals.iter().map(|q| q.len()).sum();
        assert!(encoded.len() * 10 < raw);
    }

    #[test]
    fn test_empty_input() {
        let stats = stats_for(&[b"ACGT".as_slice()], &[b"IIII".as_slice()]);
        assert!(encode(&[], &[], &stats).unwrap().is_empty());
        assert!(decode(&[], &[], &stats).unwrap().is_empty());
    }
}
