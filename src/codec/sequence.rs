//! The native sequence codec: minimizer clustering, greedy chain
//! ordering, and delta encoding against chain predecessors.
//!
//! Records sharing a minimizer land in one candidate cluster; inside a
//! cluster a greedy nearest-neighbour pass chains reads so that
//! consecutive reads differ little (an approximate Hamiltonian path;
//! exact minimization is intractable at this input size). The first read
//! of a chain is stored as a two-bit packed literal; every successor is
//! an edit script against the read stored immediately before it. Stored
//! order therefore carries a hard dependency: a reference always decodes
//! before its dependents, which is why block-internal order is preserved
//! exactly across serialization.
//!
//! Cluster tie-break policy (deterministic, documented in DESIGN.md):
//! buckets are visited in ascending minimizer value, a chain starts from
//! the lowest original index in its bucket, and distance ties choose the
//! earliest remaining candidate.

use minimizer_iter::MinimizerBuilder;
use rustc_hash::FxHashMap;

use super::pe::{self, Unit};
use super::{push_varint, read_varint, BlockCodec, SequenceEncoding};
use crate::error::{FormatError, Result};
use crate::record::Block;
use crate::stats::CorpusStats;

/// Minimizer k-mer size.
const MIN_K: usize = 15;
/// Minimizer window width; odd as required by canonical mode.
const MIN_W: u16 = 9;
/// Greedy chaining scans at most this many remaining candidates per step.
const SCAN_LIMIT: usize = 128;

const KIND_LITERAL: u8 = 0;
const KIND_SUBS: u8 = 1;
const KIND_SPLICE: u8 = 2;
const KIND_RCDIFF: u8 = 3;

/// The built-in [`BlockCodec`] implementation.
pub struct NativeCodec {
    reorder: bool,
}

impl Default for NativeCodec {
    fn default() -> Self {
        Self { reorder: true }
    }
}

impl NativeCodec {
    #[must_use]
    pub fn new(reorder: bool) -> Self {
        Self { reorder }
    }
}

// ── clustering ──────────────────────────────────────────────────────────

fn kmer_hash(kmer: &[u8]) -> Option<u64> {
    let mut hash = 0u64;
    for &b in kmer {
        let code = match b {
            b'A' => 0u64,
            b'C' => 1,
            b'G' => 2,
            b'T' => 3,
            _ => return None,
        };
        hash = (hash << 2) | code;
    }
    Some(hash)
}

fn rc_hash(mut hash: u64, k: usize) -> u64 {
    let mut out = 0u64;
    for _ in 0..k {
        out = (out << 2) | ((hash & 0b11) ^ 0b11);
        hash >>= 2;
    }
    out
}

/// Clustering key: the smallest canonical k-mer hash over the read's
/// window minimizers. Reads without a single valid k-mer share a
/// catch-all bucket.
fn minimizer_key(seq: &[u8]) -> u64 {
    if seq.len() < MIN_K {
        return u64::MAX;
    }
    let mut best = u64::MAX;
    if seq.len() < MIN_K + MIN_W as usize - 1 {
        // too short for a full window; fall back to a plain k-mer scan
        for i in 0..=seq.len() - MIN_K {
            if let Some(fwd) = kmer_hash(&seq[i..i + MIN_K]) {
                best = best.min(fwd.min(rc_hash(fwd, MIN_K)));
            }
        }
        return best;
    }
    let positions = MinimizerBuilder::<u64>::new()
        .minimizer_size(MIN_K)
        .width(MIN_W)
        .canonical()
        .iter_pos(seq)
        .map(|(pos, _is_rc)| pos);
    for pos in positions {
        if pos + MIN_K > seq.len() {
            continue;
        }
        if let Some(fwd) = kmer_hash(&seq[pos..pos + MIN_K]) {
            best = best.min(fwd.min(rc_hash(fwd, MIN_K)));
        }
    }
    best
}

/// Prefix Hamming distance with a penalty for the length difference.
fn chain_distance(a: &[u8], b: &[u8]) -> usize {
    let common = a.len().min(b.len());
    let mismatches = a[..common]
        .iter()
        .zip(&b[..common])
        .filter(|(x, y)| x != y)
        .count();
    mismatches + (a.len().max(b.len()) - common)
}

/// Order units into chains: bucket by minimizer, then greedy
/// nearest-neighbour within each bucket.
fn chain_order(block: &Block, units: &[Unit]) -> Vec<usize> {
    let mut buckets: FxHashMap<u64, Vec<usize>> = FxHashMap::default();
    for (u, unit) in units.iter().enumerate() {
        let key = minimizer_key(&block.records[unit.primary()].seq);
        buckets.entry(key).or_default().push(u);
    }

    let mut keys: Vec<u64> = buckets.keys().copied().collect();
    keys.sort_unstable();

    let mut order = Vec::with_capacity(units.len());
    for key in keys {
        let mut remaining = buckets.remove(&key).expect("bucket exists");
        // chain start: lowest original index (first seen)
        let mut last = remaining.remove(0);
        order.push(last);
        while !remaining.is_empty() {
            let last_seq = &block.records[units[last].primary()].seq;
            let scan = remaining.len().min(SCAN_LIMIT);
            let mut best_at = 0;
            let mut best_dist = usize::MAX;
            for (at, &cand) in remaining[..scan].iter().enumerate() {
                let dist = chain_distance(last_seq, &block.records[units[cand].primary()].seq);
                if dist < best_dist {
                    best_dist = dist;
                    best_at = at;
                }
            }
            last = remaining.remove(best_at);
            order.push(last);
        }
    }
    order
}

// ── edit scripts ────────────────────────────────────────────────────────

fn substitutions(reference: &[u8], seq: &[u8]) -> Option<Vec<(u32, u8)>> {
    if reference.len() != seq.len() {
        return None;
    }
    Some(
        reference
            .iter()
            .zip(seq.iter())
            .enumerate()
            .filter(|(_, (a, b))| a != b)
            .map(|(pos, (_, &b))| (pos as u32, b))
            .collect(),
    )
}

fn splice_bounds(reference: &[u8], seq: &[u8]) -> (usize, usize) {
    let limit = reference.len().min(seq.len());
    let prefix = reference
        .iter()
        .zip(seq.iter())
        .take(limit)
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = reference
        .iter()
        .rev()
        .zip(seq.iter().rev())
        .take(limit - prefix)
        .take_while(|(a, b)| a == b)
        .count();
    (prefix, suffix)
}

fn push_positions(out: &mut Vec<u8>, diffs: &[(u32, u8)]) {
    push_varint(out, diffs.len() as u64);
    let mut prev = 0u32;
    for &(pos, base) in diffs {
        push_varint(out, u64::from(pos - prev));
        out.push(base);
        prev = pos;
    }
}

fn read_positions(data: &[u8], offset: &mut usize) -> Option<Vec<(u32, u8)>> {
    let n = read_varint(data, offset)? as usize;
    let mut diffs = Vec::with_capacity(n);
    let mut prev = 0u32;
    for _ in 0..n {
        let gap = read_varint(data, offset)? as u32;
        let base = *data.get(*offset)?;
        *offset += 1;
        let pos = prev + gap;
        diffs.push((pos, base));
        prev = pos;
    }
    Some(diffs)
}

/// Cost estimates steering the per-read encoding choice.
fn literal_cost(seq: &[u8]) -> usize {
    2 + seq.len() / 4
}

fn subs_cost(diffs: &[(u32, u8)]) -> usize {
    2 + 3 * diffs.len()
}

struct PoolWriter {
    bases: Vec<u8>,
    exceptions: Vec<(u64, u8)>,
}

impl PoolWriter {
    fn new() -> Self {
        Self {
            bases: Vec::new(),
            exceptions: Vec::new(),
        }
    }

    /// Push raw bases. N positions and any tolerated foreign bytes are
    /// recorded as exceptions so the exact byte survives the two-bit
    /// round trip; the packed stream itself only ever sees ACGTN.
    fn push(&mut self, seq: &[u8]) {
        let base = self.bases.len() as u64;
        if crate::record::is_valid_sequence(seq) {
            for pos in memchr::memchr_iter(b'N', seq) {
                self.exceptions.push((base + pos as u64, b'N'));
            }
            self.bases.extend_from_slice(seq);
        } else {
            for (pos, &b) in seq.iter().enumerate() {
                if matches!(b, b'A' | b'C' | b'G' | b'T') {
                    self.bases.push(b);
                } else {
                    self.exceptions.push((base + pos as u64, b));
                    self.bases.push(b'N');
                }
            }
        }
    }

    fn serialize(&self, out: &mut Vec<u8>) -> Result<()> {
        push_varint(out, self.bases.len() as u64);
        push_varint(out, self.exceptions.len() as u64);
        let mut prev = 0u64;
        for &(pos, byte) in &self.exceptions {
            push_varint(out, pos - prev);
            out.push(byte);
            prev = pos;
        }
        let mut words: Vec<u64> = Vec::new();
        bitnuc::twobit::encode_with_invalid(&self.bases, &mut words)?;
        for word in &words {
            out.extend_from_slice(&word.to_le_bytes());
        }
        Ok(())
    }
}

struct PoolReader {
    bases: Vec<u8>,
    cursor: usize,
}

impl PoolReader {
    fn parse(data: &[u8], offset: &mut usize) -> Result<Self> {
        let truncated = || FormatError::TruncatedSection { section: "sequence pool" };

        let pool_len = read_varint(data, offset).ok_or_else(truncated)? as usize;
        let n_exceptions = read_varint(data, offset).ok_or_else(truncated)? as usize;
        let mut exceptions = Vec::with_capacity(n_exceptions);
        let mut prev = 0u64;
        for _ in 0..n_exceptions {
            let gap = read_varint(data, offset).ok_or_else(truncated)?;
            let byte = *data.get(*offset).ok_or_else(truncated)?;
            *offset += 1;
            let pos = prev + gap;
            exceptions.push((pos, byte));
            prev = pos;
        }

        let n_words = pool_len.div_ceil(32);
        if *offset + n_words * 8 > data.len() {
            return Err(truncated().into());
        }
        let mut words = Vec::with_capacity(n_words);
        for i in 0..n_words {
            let at = *offset + i * 8;
            words.push(u64::from_le_bytes(
                data[at..at + 8].try_into().expect("8-byte slice"),
            ));
        }
        *offset += n_words * 8;

        let mut bases = Vec::with_capacity(pool_len);
        bitnuc::twobit::decode(&words, pool_len, &mut bases)?;
        for (pos, byte) in exceptions {
            if let Some(slot) = bases.get_mut(pos as usize) {
                *slot = byte;
            }
        }
        Ok(Self { bases, cursor: 0 })
    }

    fn take(&mut self, n: usize) -> Result<&[u8]> {
        if self.cursor + n > self.bases.len() {
            return Err(FormatError::TruncatedSection { section: "sequence pool" }.into());
        }
        let slice = &self.bases[self.cursor..self.cursor + n];
        self.cursor += n;
        Ok(slice)
    }
}

// ── unit encoding ───────────────────────────────────────────────────────

/// Pick and emit the cheapest encoding for one read.
fn encode_read(
    out: &mut Vec<u8>,
    pool: &mut PoolWriter,
    seq: &[u8],
    chain_ref: Option<&[u8]>,
    rc_ref: Option<&[u8]>,
) -> u8 {
    let lit = literal_cost(seq);
    let mut best_kind = KIND_LITERAL;
    let mut best_cost = lit;
    let mut best_diffs: Option<Vec<(u32, u8)>> = None;
    let mut best_splice = (0usize, 0usize);

    if let Some(reference) = chain_ref {
        if let Some(diffs) = substitutions(reference, seq) {
            let cost = subs_cost(&diffs);
            if cost < best_cost {
                best_cost = cost;
                best_kind = KIND_SUBS;
                best_diffs = Some(diffs);
            }
        }
        let (prefix, suffix) = splice_bounds(reference, seq);
        let middle = seq.len() - prefix - suffix;
        let cost = 4 + middle / 4;
        if (prefix > 0 || suffix > 0) && cost < best_cost {
            best_cost = cost;
            best_kind = KIND_SPLICE;
            best_splice = (prefix, suffix);
        }
    }

    if let Some(primary) = rc_ref {
        if let Some(diffs) = pe::rc_differences(primary, seq) {
            let cost = subs_cost(&diffs);
            if cost < best_cost {
                best_kind = KIND_RCDIFF;
                best_diffs = Some(diffs);
            }
        }
    }

    push_varint(out, seq.len() as u64);
    match best_kind {
        KIND_LITERAL => pool.push(seq),
        KIND_SUBS | KIND_RCDIFF => {
            push_positions(out, best_diffs.as_deref().expect("diffs computed"));
        }
        KIND_SPLICE => {
            let (prefix, suffix) = best_splice;
            push_varint(out, prefix as u64);
            push_varint(out, suffix as u64);
            pool.push(&seq[prefix..seq.len() - suffix]);
        }
        _ => unreachable!(),
    }
    best_kind
}

fn decode_read(
    data: &[u8],
    offset: &mut usize,
    pool: &mut PoolReader,
    kind: u8,
    chain_ref: Option<&[u8]>,
    rc_ref: Option<&[u8]>,
    block_id: u32,
) -> Result<Vec<u8>> {
    let truncated = || FormatError::TruncatedSection { section: "sequence" };
    let len = read_varint(data, offset).ok_or_else(truncated)? as usize;

    let corrupt = |reason: &str| FormatError::CorruptStream {
        block: block_id,
        stream: "sequence",
        reason: reason.to_owned(),
    };

    match kind {
        KIND_LITERAL => Ok(pool.take(len)?.to_vec()),
        KIND_SUBS => {
            let reference = chain_ref.ok_or_else(|| corrupt("delta without reference"))?;
            if reference.len() != len {
                return Err(corrupt("substitution delta length mismatch").into());
            }
            let diffs = read_positions(data, offset).ok_or_else(truncated)?;
            let mut seq = reference.to_vec();
            for (pos, base) in diffs {
                *seq
                    .get_mut(pos as usize)
                    .ok_or_else(|| corrupt("substitution out of range"))? = base;
            }
            Ok(seq)
        }
        KIND_SPLICE => {
            let reference = chain_ref.ok_or_else(|| corrupt("delta without reference"))?;
            let prefix = read_varint(data, offset).ok_or_else(truncated)? as usize;
            let suffix = read_varint(data, offset).ok_or_else(truncated)? as usize;
            if prefix + suffix > len || prefix > reference.len() || suffix > reference.len() {
                return Err(corrupt("splice bounds exceed read").into());
            }
            let middle = pool.take(len - prefix - suffix)?;
            let mut seq = Vec::with_capacity(len);
            seq.extend_from_slice(&reference[..prefix]);
            seq.extend_from_slice(middle);
            seq.extend_from_slice(&reference[reference.len() - suffix..]);
            Ok(seq)
        }
        KIND_RCDIFF => {
            let primary = rc_ref.ok_or_else(|| corrupt("rc delta without partner"))?;
            if primary.len() != len {
                return Err(corrupt("rc delta length mismatch").into());
            }
            let diffs = read_positions(data, offset).ok_or_else(truncated)?;
            Ok(pe::apply_rc_differences(primary, &diffs))
        }
        other => Err(corrupt(&format!("unknown encoding kind {other}")).into()),
    }
}

// ── codec implementation ────────────────────────────────────────────────

impl BlockCodec for NativeCodec {
    fn name(&self) -> &'static str {
        "native"
    }

    fn encode(&self, block: &Block, _stats: &CorpusStats) -> Result<SequenceEncoding> {
        let (units, demoted) = pe::pair_units(block);

        let order: Vec<usize> = if self.reorder {
            chain_order(block, &units)
        } else {
            (0..units.len()).collect()
        };

        // record-level permutation: primaries and partners interleave in
        // stored unit order
        let mut permutation = Vec::with_capacity(block.records.len());
        for &u in &order {
            permutation.push(units[u].primary() as u32);
            if let Some(j) = units[u].partner() {
                permutation.push(j as u32);
            }
        }
        debug_assert!(pe::pairing_preserved(
            &order.iter().map(|&u| units[u]).collect::<Vec<_>>(),
            &permutation
        ));

        let mut pool = PoolWriter::new();
        let mut flags_and_payloads: Vec<(u8, Vec<u8>)> = Vec::with_capacity(order.len());

        let mut last_primary: Option<usize> = None;
        let mut last_partner: Option<usize> = None;
        for &u in &order {
            let unit = units[u];
            let primary_seq = &block.records[unit.primary()].seq;

            let mut payload = Vec::new();
            let primary_kind = encode_read(
                &mut payload,
                &mut pool,
                primary_seq,
                last_primary.map(|i| block.records[i].seq.as_slice()),
                None,
            );
            let mut flags = primary_kind << 1;
            if let Some(j) = unit.partner() {
                flags |= 1;
                let partner_kind = encode_read(
                    &mut payload,
                    &mut pool,
                    &block.records[j].seq,
                    last_partner.map(|i| block.records[i].seq.as_slice()),
                    Some(primary_seq.as_slice()),
                );
                flags |= partner_kind << 3;
                last_partner = Some(j);
            }
            last_primary = Some(unit.primary());
            flags_and_payloads.push((flags, payload));
        }

        let mut bytes = Vec::new();
        push_varint(&mut bytes, order.len() as u64);
        pool.serialize(&mut bytes)?;
        for (flags, payload) in &flags_and_payloads {
            bytes.push(*flags);
            bytes.extend_from_slice(payload);
        }

        Ok(SequenceEncoding {
            permutation,
            bytes,
            demoted,
        })
    }

    fn decode(
        &self,
        bytes: &[u8],
        permutation: &[u32],
        n_records: usize,
    ) -> Result<Vec<Vec<u8>>> {
        let truncated = || FormatError::TruncatedSection { section: "sequence" };
        let mut offset = 0;
        let n_units = read_varint(bytes, &mut offset).ok_or_else(truncated)? as usize;
        let mut pool = PoolReader::parse(bytes, &mut offset)?;

        let mut out: Vec<Option<Vec<u8>>> = vec![None; n_records];
        let mut stored_pos = 0usize;
        let mut last_primary: Option<Vec<u8>> = None;
        let mut last_partner: Option<Vec<u8>> = None;

        for _ in 0..n_units {
            let flags = *bytes.get(offset).ok_or_else(truncated)?;
            offset += 1;
            let has_partner = flags & 1 != 0;
            let primary_kind = (flags >> 1) & 0b11;
            let partner_kind = (flags >> 3) & 0b11;

            let primary = decode_read(
                bytes,
                &mut offset,
                &mut pool,
                primary_kind,
                last_primary.as_deref(),
                None,
                0,
            )?;
            let original = *permutation.get(stored_pos).ok_or_else(truncated)? as usize;
            stored_pos += 1;

            if has_partner {
                let partner = decode_read(
                    bytes,
                    &mut offset,
                    &mut pool,
                    partner_kind,
                    last_partner.as_deref(),
                    Some(primary.as_slice()),
                    0,
                )?;
                let partner_original =
                    *permutation.get(stored_pos).ok_or_else(truncated)? as usize;
                stored_pos += 1;
                out[partner_original] = Some(partner.clone());
                last_partner = Some(partner);
            }
            out[original] = Some(primary.clone());
            last_primary = Some(primary);
        }

        if stored_pos != n_records {
            return Err(FormatError::CorruptStream {
                block: 0,
                stream: "sequence",
                reason: format!("decoded {stored_pos} records, expected {n_records}"),
            }
            .into());
        }
        out.into_iter()
            .enumerate()
            .map(|(i, seq)| {
                seq.ok_or_else(|| {
                    FormatError::CorruptStream {
                        block: 0,
                        stream: "sequence",
                        reason: format!("record {i} never decoded"),
                    }
                    .into()
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::record::Record;
    use crate::stats::GlobalAnalyzer;

    fn stats_for(block: &Block) -> CorpusStats {
        let mut analyzer = GlobalAnalyzer::new(1024, 1);
        for r in &block.records {
            analyzer.observe(r);
        }
        analyzer.finish().unwrap()
    }

    fn roundtrip(block: &Block, reorder: bool) {
        let codec = NativeCodec::new(reorder);
        let stats = stats_for(block);
        let enc = codec.encode(block, &stats).unwrap();

        // permutation must be a local bijection
        let mut seen = vec![false; block.records.len()];
        for &p in &enc.permutation {
            assert!(!seen[p as usize], "duplicate in permutation");
            seen[p as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));

        let decoded = codec
            .decode(&enc.bytes, &enc.permutation, block.records.len())
            .unwrap();
        for (got, record) in decoded.iter().zip(&block.records) {
            assert_eq!(got, &record.seq);
        }
    }

    fn single_end_block(seqs: &[&[u8]]) -> Block {
        let mut block = Block::new(0, 0);
        for (i, seq) in seqs.iter().enumerate() {
            let qual = vec![b'I'; seq.len()];
            block.records.push(Record::new(format!("r{i}"), seq.to_vec(), qual));
        }
        block
    }

    #[test]
    fn test_roundtrip_single_end() {
        let block = single_end_block(&[
            b"ACGTACGTACGTACGTACGTACG",
            b"ACGTACGTACGTACGTACGTACG",
            b"ACGTACGTACGTACGTACGTACC",
            b"TTTTGGGGCCCCAAAATTTTGGG",
            b"TTTTGGGGCCCCAAAATTTTGGA",
        ]);
        roundtrip(&block, true);
        roundtrip(&block, false);
    }

    #[test]
    fn test_roundtrip_variable_lengths() {
        let block = single_end_block(&[
            b"ACGTACGTACGTACGTACGT",
            b"ACGTACGTACGTACGTACGTTTTT",
            b"ACGTACGT",
            b"GGGG",
            b"A",
        ]);
        roundtrip(&block, true);
    }

    #[test]
    fn test_roundtrip_with_n_bases() {
        let block = single_end_block(&[
            b"ACGTNNGTACGTACGTACGTNCG",
            b"ACGTNNGTACGTACGTACGTNCG",
            b"NNNNNNNNNNNNNNNNNNNNNNN",
        ]);
        roundtrip(&block, true);
    }

    #[test]
    fn test_roundtrip_paired() {
        let mut block = Block::new(0, 0);
        let inserts: [&[u8]; 3] = [
            b"ACTCCAGCCTGGGCAACAGAGCAAGGCT",
            b"ACTCCAGCCTGGGCAACAGAGCAAGGCA",
            b"TTGGCCAATTGGCCAATTGGCCAATTGG",
        ];
        for (p, insert) in inserts.iter().enumerate() {
            let mut r1 = Record::new(
                format!("p{p}/1"),
                insert.to_vec(),
                vec![b'I'; insert.len()],
            );
            let mut r2_seq = pe::reverse_complement(insert);
            r2_seq[3] = b'N';
            let mut r2 = Record::new(format!("p{p}/2"), r2_seq, vec![b'I'; insert.len()]);
            r1.mate = Some(2 * p as u32 + 1);
            r2.mate = Some(2 * p as u32);
            block.records.push(r1);
            block.records.push(r2);
        }
        roundtrip(&block, true);
        roundtrip(&block, false);
    }

    #[test]
    fn test_pairs_stay_adjacent_after_reorder() {
        let mut block = Block::new(0, 0);
        for p in 0..8u32 {
            let seq: Vec<u8> = if p % 2 == 0 {
                b"AAAACCCCGGGGTTTTAAAACCCC".to_vec()
            } else {
                b"TTTTGGGGCCCCAAAATTTTGGGG".to_vec()
            };
            let mut r1 = Record::new(format!("p{p}/1"), seq.clone(), vec![b'I'; seq.len()]);
            let mut r2 = Record::new(
                format!("p{p}/2"),
                pe::reverse_complement(&seq),
                vec![b'I'; seq.len()],
            );
            r1.mate = Some(2 * p + 1);
            r2.mate = Some(2 * p);
            block.records.push(r1);
            block.records.push(r2);
        }
        let stats = stats_for(&block);
        let enc = NativeCodec::new(true).encode(&block, &stats).unwrap();
        // primaries sit at even stored offsets, partners follow them
        for pair in enc.permutation.chunks(2) {
            assert_eq!(pair[0] % 2, 0);
            assert_eq!(pair[1], pair[0] + 1);
        }
    }

    #[test]
    fn test_similar_reads_cluster_and_compress() {
        let base: Vec<u8> = b"ACGTACGTACGTACGTACGTACGTACGTACGTACGTACGT".to_vec();
        let mut seqs: Vec<Vec<u8>> = Vec::new();
        for i in 0..64 {
            let mut s = base.clone();
            s[i % base.len()] = b"ACGT"[(i / 7) % 4];
            seqs.push(s);
        }
        let refs: Vec<&[u8]> = seqs.iter().map(Vec::as_slice).collect();
        let block = single_end_block(&refs);
        let stats = stats_for(&block);
        let enc = NativeCodec::new(true).encode(&block, &stats).unwrap();
        let raw: usize = seqs.iter().map(Vec::len).sum();
        // near-duplicates should delta-encode far below 2 bits/base
        assert!(enc.bytes.len() < raw / 4);
        roundtrip(&block, true);
    }

    #[test]
    fn test_empty_block() {
        let block = Block::new(0, 0);
        let codec = NativeCodec::default();
        let mut analyzer = GlobalAnalyzer::new(8, 1);
        analyzer.observe(&Record::new("r", *b"ACGT", *b"IIII"));
        let stats = analyzer.finish().unwrap();
        let enc = codec.encode(&block, &stats).unwrap();
        assert!(enc.permutation.is_empty());
        let decoded = codec.decode(&enc.bytes, &enc.permutation, 0).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_minimizer_key_deterministic() {
        let seq = b"ACGTACGTACGTACGTACGTACGTACGT";
        assert_eq!(minimizer_key(seq), minimizer_key(seq));
        assert_eq!(minimizer_key(b"ACG"), u64::MAX);
        assert_eq!(minimizer_key(b"NNNNNNNNNNNNNNNNNNNNNNNN"), u64::MAX);
    }

    #[test]
    fn test_chain_distance() {
        assert_eq!(chain_distance(b"ACGT", b"ACGT"), 0);
        assert_eq!(chain_distance(b"ACGT", b"ACGA"), 1);
        assert_eq!(chain_distance(b"ACGT", b"AC"), 2);
    }

    #[test]
    fn test_splice_bounds() {
        let (p, s) = splice_bounds(b"AAACGTTTT", b"AAAGGTTTT");
        assert_eq!(p, 3);
        assert_eq!(s, 4);
        // fully identical: prefix swallows everything, suffix must not overlap
        let (p, s) = splice_bounds(b"AAAA", b"AAAA");
        assert_eq!(p + s, 4);
    }
}
