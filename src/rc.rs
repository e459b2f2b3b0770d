//! Byte-oriented range coder with adaptive integer frequency models.
//!
//! LZMA-style carry handling via a 64-bit low register. The encoder and
//! decoder must observe identical model state at every step; models adapt
//! after each symbol on both sides, so determinism follows from seeding
//! both sides with the same initial frequency tables.

const RC_TOP: u32 = 1 << 24;
const RESCALE_THRESHOLD: u32 = 1 << 20;

/// Forward range encoder writing into an owned byte buffer.
pub struct RangeEncoder {
    low: u64,
    range: u32,
    cache: u8,
    cache_size: u32,
    output: Vec<u8>,
}

impl Default for RangeEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl RangeEncoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            low: 0,
            range: 0xFFFF_FFFF,
            cache: 0,
            cache_size: 1,
            output: Vec::new(),
        }
    }

    #[inline]
    fn shift_low(&mut self) {
        let low_hi = (self.low >> 32) as u8;
        if low_hi != 0 || (self.low as u32) < 0xFF00_0000 {
            let mut byte = self.cache;
            loop {
                self.output.push(byte.wrapping_add(low_hi));
                byte = 0xFF;
                self.cache_size -= 1;
                if self.cache_size == 0 {
                    break;
                }
            }
            self.cache = ((self.low >> 24) & 0xFF) as u8;
        }
        self.cache_size += 1;
        self.low = u64::from((self.low as u32) << 8);
    }

    /// Encode one symbol given its cumulative frequency, frequency, and the
    /// model total.
    #[inline]
    pub fn encode(&mut self, cum: u32, freq: u32, total: u32) {
        let r = self.range / total;
        self.low += u64::from(cum) * u64::from(r);
        if cum + freq < total {
            self.range = r * freq;
        } else {
            self.range -= r * cum;
        }
        while self.range < RC_TOP {
            self.range <<= 8;
            self.shift_low();
        }
    }

    /// Flush the coder state and return the compressed bytes.
    #[must_use]
    pub fn finish(mut self) -> Vec<u8> {
        for _ in 0..5 {
            self.shift_low();
        }
        self.output
    }
}

/// Range decoder over a borrowed byte slice.
pub struct RangeDecoder<'a> {
    range: u32,
    code: u32,
    input: &'a [u8],
    pos: usize,
}

impl<'a> RangeDecoder<'a> {
    #[must_use]
    pub fn new(input: &'a [u8]) -> Self {
        let mut dec = Self {
            range: 0xFFFF_FFFF,
            code: 0,
            input,
            pos: 0,
        };
        // the encoder's initial cache always emits a leading 0x00
        if !input.is_empty() {
            dec.pos = 1;
        }
        for _ in 0..4 {
            dec.code = (dec.code << 8) | u32::from(dec.next_byte());
        }
        dec
    }

    #[inline]
    fn next_byte(&mut self) -> u8 {
        if self.pos < self.input.len() {
            let b = self.input[self.pos];
            self.pos += 1;
            b
        } else {
            0
        }
    }

    #[inline]
    fn normalize(&mut self) {
        while self.range < RC_TOP {
            self.code = (self.code << 8) | u32::from(self.next_byte());
            self.range <<= 8;
        }
    }

    /// Decode one symbol from a cumulative frequency table
    /// (`cum_freqs.len() == n_symbols + 1`, `cum_freqs[0] == 0`).
    #[inline]
    pub fn decode(&mut self, cum_freqs: &[u32], n_symbols: usize, total: u32) -> usize {
        let r = self.range / total;
        let offset = (self.code / r).min(total - 1);

        // linear scan; alphabets here are small (<= ~64 symbols)
        let mut sym = 0;
        while sym + 1 < n_symbols && cum_freqs[sym + 1] <= offset {
            sym += 1;
        }

        let cum = cum_freqs[sym];
        let freq = cum_freqs[sym + 1] - cum;

        self.code -= cum * r;
        if cum + freq < total {
            self.range = r * freq;
        } else {
            self.range -= r * cum;
        }

        self.normalize();
        sym
    }
}

/// Adaptive symbol model backed by integer cumulative frequencies.
#[derive(Clone)]
pub struct AdaptiveModel {
    pub cum_freqs: Vec<u32>,
    n_symbols: usize,
    pub total: u32,
}

impl AdaptiveModel {
    /// Uniform model with Laplace smoothing: every symbol starts at count 1.
    #[must_use]
    pub fn new(n_symbols: usize) -> Self {
        let cum_freqs: Vec<u32> = (0..=n_symbols).map(|i| i as u32).collect();
        Self {
            cum_freqs,
            n_symbols,
            total: n_symbols as u32,
        }
    }

    /// Model seeded from prior counts (one per symbol, already clamped to
    /// at least 1). Both coder sides must seed from the same counts.
    #[must_use]
    pub fn with_priors(counts: &[u32]) -> Self {
        let mut cum_freqs = Vec::with_capacity(counts.len() + 1);
        let mut cum = 0u32;
        cum_freqs.push(0);
        for &c in counts {
            cum += c.max(1);
            cum_freqs.push(cum);
        }
        let mut model = Self {
            cum_freqs,
            n_symbols: counts.len(),
            total: cum,
        };
        while model.total >= RESCALE_THRESHOLD {
            model.rescale();
        }
        model
    }

    #[inline]
    #[must_use]
    pub fn n_symbols(&self) -> usize {
        self.n_symbols
    }

    /// (cum, freq, total) triple for encoding `sym`.
    #[inline]
    #[must_use]
    pub fn encode_params(&self, sym: usize) -> (u32, u32, u32) {
        let cum = self.cum_freqs[sym];
        let freq = self.cum_freqs[sym + 1] - cum;
        (cum, freq, self.total)
    }

    /// Bump the count for `sym`, rescaling when the total grows too large.
    #[inline]
    pub fn update(&mut self, sym: usize) {
        for i in (sym + 1)..=self.n_symbols {
            self.cum_freqs[i] += 1;
        }
        self.total += 1;
        if self.total >= RESCALE_THRESHOLD {
            self.rescale();
        }
    }

    fn rescale(&mut self) {
        let mut cum = 0u32;
        self.cum_freqs[0] = 0;
        for i in 0..self.n_symbols {
            let freq = self.cum_freqs[i + 1] - self.cum_freqs[i];
            let new_freq = (freq >> 1).max(1);
            cum += new_freq;
            self.cum_freqs[i + 1] = cum;
        }
        self.total = cum;
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn test_static_distribution_roundtrip() {
        let mut enc = RangeEncoder::new();
        let cum = [0u32, 1, 2, 3, 4];
        for sym in [0usize, 1, 2, 3, 0, 2] {
            enc.encode(cum[sym], 1, 4);
        }
        let bytes = enc.finish();

        let mut dec = RangeDecoder::new(&bytes);
        for expected in [0usize, 1, 2, 3, 0, 2] {
            assert_eq!(dec.decode(&cum, 4, 4), expected);
        }
    }

    #[test]
    fn test_skewed_distribution_roundtrip() {
        let mut enc = RangeEncoder::new();
        let syms: Vec<usize> = (0..2000).map(|i| usize::from(i % 41 == 0)).collect();
        for &s in &syms {
            let (cum, freq) = if s == 0 { (0, 97) } else { (97, 3) };
            enc.encode(cum, freq, 100);
        }
        let bytes = enc.finish();
        // strongly skewed input should compress well below 1 byte/symbol
        assert!(bytes.len() < syms.len() / 4);

        let mut dec = RangeDecoder::new(&bytes);
        let cum = [0u32, 97, 100];
        for &expected in &syms {
            assert_eq!(dec.decode(&cum, 2, 100), expected);
        }
    }

    #[test]
    fn test_adaptive_model_roundtrip() {
        let syms: Vec<usize> = (0..5000).map(|i| (i * 7 + 3) % 17).collect();

        let mut model = AdaptiveModel::new(17);
        let mut enc = RangeEncoder::new();
        for &s in &syms {
            let (cum, freq, total) = model.encode_params(s);
            enc.encode(cum, freq, total);
            model.update(s);
        }
        let bytes = enc.finish();

        let mut model = AdaptiveModel::new(17);
        let mut dec = RangeDecoder::new(&bytes);
        for &expected in &syms {
            let got = dec.decode(&model.cum_freqs, model.n_symbols(), model.total);
            model.update(got);
            assert_eq!(got, expected);
        }
    }

    #[test]
    fn test_prior_seeded_model_matches_both_sides() {
        let priors = [500u32, 100, 10, 0, 3];
        let syms = [0usize, 0, 1, 4, 2, 0, 1, 1, 0];

        let mut model = AdaptiveModel::with_priors(&priors);
        let mut enc = RangeEncoder::new();
        for &s in &syms {
            let (cum, freq, total) = model.encode_params(s);
            enc.encode(cum, freq, total);
            model.update(s);
        }
        let bytes = enc.finish();

        let mut model = AdaptiveModel::with_priors(&priors);
        let mut dec = RangeDecoder::new(&bytes);
        for &expected in &syms {
            let got = dec.decode(&model.cum_freqs, model.n_symbols(), model.total);
            model.update(got);
            assert_eq!(got, expected);
        }
    }

    #[test]
    fn test_zero_prior_is_still_encodable() {
        // symbol 3 has prior 0 but must remain representable
        let model = AdaptiveModel::with_priors(&[10, 10, 10, 0]);
        let (_, freq, _) = model.encode_params(3);
        assert!(freq >= 1);
    }
}
