//! Identifier compression.
//!
//! Sequencer-generated identifiers share a fixed stem and a counter-like
//! trailing numeric field. Per block the encoder detects that shared stem
//! once, then stores each matching identifier as a zigzag delta of its
//! numeric suffix; anything that does not fit the pattern falls back to a
//! length-prefixed literal. Decoding needs nothing beyond the block's own
//! pattern descriptor.

use super::{push_varint, read_varint, unzigzag, zigzag};
use crate::error::{FormatError, Result};

const MODE_LITERAL: u8 = 0;
const MODE_TEMPLATE: u8 = 1;

const TAG_DELTA: u8 = 0;
const TAG_LITERAL: u8 = 1;

/// Longest numeric suffix that still fits a u64 without overflow.
const MAX_DIGITS: usize = 18;

/// Split an identifier into (stem, trailing digit run).
fn split_numeric_suffix(id: &str) -> (&str, &str) {
    let bytes = id.as_bytes();
    let mut start = bytes.len();
    while start > 0 && bytes[start - 1].is_ascii_digit() {
        start -= 1;
    }
    // cap the numeric field so it always parses into a u64
    if bytes.len() - start > MAX_DIGITS {
        start = bytes.len() - MAX_DIGITS;
    }
    (&id[..start], &id[start..])
}

/// Encode a block's identifiers in original order.
///
/// `base_record` is only used to name the offending record when a
/// non-ASCII identifier is rejected.
pub fn encode(ids: &[&str], base_record: u64) -> Result<Vec<u8>> {
    for (i, id) in ids.iter().enumerate() {
        if !id.is_ascii() {
            return Err(FormatError::NonAsciiIdentifier {
                record: base_record + i as u64,
            }
            .into());
        }
    }

    let mut out = Vec::new();

    // detect the shared stem from the first identifier with a numeric tail
    let template = ids
        .iter()
        .find(|id| !split_numeric_suffix(id).1.is_empty())
        .map(|id| split_numeric_suffix(id).0.to_owned());

    let Some(stem) = template else {
        out.push(MODE_LITERAL);
        for id in ids {
            push_varint(&mut out, id.len() as u64);
            out.extend_from_slice(id.as_bytes());
        }
        return Ok(out);
    };

    out.push(MODE_TEMPLATE);
    push_varint(&mut out, stem.len() as u64);
    out.extend_from_slice(stem.as_bytes());

    let mut prev_value = 0i64;
    for id in ids {
        let (this_stem, digits) = split_numeric_suffix(id);
        if this_stem == stem && !digits.is_empty() {
            // matches the block pattern: width byte + zigzag delta
            let value = digits.parse::<u64>().expect("digit run parses") as i64;
            out.push(TAG_DELTA);
            out.push(digits.len() as u8);
            push_varint(&mut out, zigzag(value - prev_value));
            prev_value = value;
        } else {
            out.push(TAG_LITERAL);
            push_varint(&mut out, id.len() as u64);
            out.extend_from_slice(id.as_bytes());
        }
    }
    Ok(out)
}

/// Decode `n` identifiers from an encoded block.
pub fn decode(data: &[u8], n: usize) -> Result<Vec<String>> {
    if n == 0 {
        return Ok(Vec::new());
    }
    if data.is_empty() {
        return Err(FormatError::TruncatedSection { section: "ids" }.into());
    }

    let mode = data[0];
    let mut offset = 1;
    let mut ids = Vec::with_capacity(n);

    let read_literal = |data: &[u8], offset: &mut usize| -> Result<String> {
        let len = read_varint(data, offset)
            .ok_or(FormatError::TruncatedSection { section: "ids" })? as usize;
        if *offset + len > data.len() {
            return Err(FormatError::TruncatedSection { section: "ids" }.into());
        }
        let s = std::str::from_utf8(&data[*offset..*offset + len])?.to_owned();
        *offset += len;
        Ok(s)
    };

    if mode == MODE_LITERAL {
        for _ in 0..n {
            ids.push(read_literal(data, &mut offset)?);
        }
        return Ok(ids);
    }

    let stem_len = read_varint(data, &mut offset)
        .ok_or(FormatError::TruncatedSection { section: "ids" })? as usize;
    if offset + stem_len > data.len() {
        return Err(FormatError::TruncatedSection { section: "ids" }.into());
    }
    let stem = std::str::from_utf8(&data[offset..offset + stem_len])?.to_owned();
    offset += stem_len;

    let mut prev_value = 0i64;
    for _ in 0..n {
        if offset >= data.len() {
            return Err(FormatError::TruncatedSection { section: "ids" }.into());
        }
        let tag = data[offset];
        offset += 1;
        match tag {
            TAG_DELTA => {
                if offset >= data.len() {
                    return Err(FormatError::TruncatedSection { section: "ids" }.into());
                }
                let width = data[offset] as usize;
                offset += 1;
                let delta = read_varint(data, &mut offset)
                    .ok_or(FormatError::TruncatedSection { section: "ids" })?;
                let value = prev_value + unzigzag(delta);
                prev_value = value;
                ids.push(format!("{stem}{value:0width$}"));
            }
            TAG_LITERAL => ids.push(read_literal(data, &mut offset)?),
            _ => {
                return Err(FormatError::CorruptStream {
                    block: 0,
                    stream: "ids",
                    reason: format!("unknown id tag {tag}"),
                }
                .into())
            }
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod testing {
    use super::*;

    fn roundtrip(ids: &[&str]) {
        let encoded = encode(ids, 0).unwrap();
        let decoded = decode(&encoded, ids.len()).unwrap();
        let expected: Vec<String> = ids.iter().map(|s| (*s).to_owned()).collect();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn test_counter_style_ids() {
        roundtrip(&["read.1", "read.2", "read.3", "read.10", "read.9"]);
    }

    #[test]
    fn test_illumina_style_ids() {
        roundtrip(&[
            "M00123:45:000000000-A1B2C:1:1101:15589:1332",
            "M00123:45:000000000-A1B2C:1:1101:15590:1333",
            "M00123:45:000000000-A1B2C:1:1101:15601:1335",
        ]);
    }

    #[test]
    fn test_zero_padded_suffix_preserved() {
        roundtrip(&["s_0001", "s_0002", "s_0010", "s_1000"]);
    }

    #[test]
    fn test_literal_fallback_mixed_in() {
        roundtrip(&["read.1", "odd-one-out", "read.2", "another_stem.5"]);
    }

    #[test]
    fn test_no_numeric_suffix_at_all() {
        let ids = ["alpha", "beta", "gamma"];
        let encoded = encode(&ids, 0).unwrap();
        assert_eq!(encoded[0], MODE_LITERAL);
        roundtrip(&ids);
    }

    #[test]
    fn test_compression_on_counter_ids() {
        let owned: Vec<String> = (0..1000).map(|i| format!("run7.lane2.{i}")).collect();
        let ids: Vec<&str> = owned.iter().map(String::as_str).collect();
        let encoded = encode(&ids, 0).unwrap();
        let raw: usize = ids.iter().map(|s| s.len()).sum();
        assert!(encoded.len() * 4 < raw);
    }

    #[test]
    fn test_non_ascii_rejected() {
        let err = encode(&["read.1", "ré.2"], 100).unwrap_err();
        match err {
            crate::Error::Format(FormatError::NonAsciiIdentifier { record }) => {
                assert_eq!(record, 101);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_very_long_digit_run_is_split() {
        // 25 digits: the numeric field caps at 18, the rest joins the stem
        roundtrip(&[
            "x1111111111111111111111111",
            "x1111111111111111111111112",
        ]);
    }

    #[test]
    fn test_truncated_stream_detected() {
        let encoded = encode(&["read.1", "read.2"], 0).unwrap();
        assert!(decode(&encoded[..encoded.len() - 1], 2).is_err());
        assert!(decode(&[], 2).is_err());
    }
}
