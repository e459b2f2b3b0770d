//! FASTQ text parsing and writing.
//!
//! The parser is a lazy iterator over four-line records; it validates the
//! '@'/'+' framing and the sequence/quality length invariant. Sequence
//! bytes pass through untouched; alphabet policy is the analyzer's job,
//! and the exception path in the sequence codec keeps even tolerated
//! foreign bytes bit-exact.

use std::io::BufRead;

use crate::error::{FormatError, Result};
use crate::record::Record;

/// Lazy FASTQ record iterator.
pub struct FastqParser<R: BufRead> {
    reader: R,
    line: u64,
    buf: String,
    done: bool,
}

impl<R: BufRead> FastqParser<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            buf: String::new(),
            done: false,
        }
    }

    /// Read one line without its terminator; Ok(None) at EOF.
    fn next_line(&mut self) -> Result<Option<String>> {
        self.buf.clear();
        let n = self.reader.read_line(&mut self.buf)?;
        if n == 0 {
            return Ok(None);
        }
        self.line += 1;
        while self.buf.ends_with('\n') || self.buf.ends_with('\r') {
            self.buf.pop();
        }
        Ok(Some(self.buf.clone()))
    }

    fn malformed(&self, reason: impl Into<String>) -> crate::Error {
        FormatError::MalformedFastq {
            line: self.line,
            reason: reason.into(),
        }
        .into()
    }

    fn parse_record(&mut self) -> Result<Option<Record>> {
        let id = match self.next_line()? {
            None => return Ok(None),
            Some(line) => {
                let Some(id) = line.strip_prefix('@') else {
                    return Err(self.malformed("expected '@' header line"));
                };
                id.to_owned()
            }
        };

        let seq: Vec<u8> = match self.next_line()? {
            None => return Err(self.malformed("unexpected end of file in record")),
            Some(line) => line.into_bytes(),
        };

        match self.next_line()? {
            None => return Err(self.malformed("unexpected end of file in record")),
            Some(line) => {
                if !line.starts_with('+') {
                    return Err(self.malformed("expected '+' separator line"));
                }
            }
        }

        let qual: Vec<u8> = match self.next_line()? {
            None => return Err(self.malformed("unexpected end of file in record")),
            Some(line) => line.bytes().collect(),
        };

        if seq.len() != qual.len() {
            return Err(self.malformed(format!(
                "sequence length {} != quality length {}",
                seq.len(),
                qual.len()
            )));
        }

        Ok(Some(Record::new(id, seq, qual)))
    }
}

impl<R: BufRead> Iterator for FastqParser<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.parse_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// Merges two record streams into pairs by ordinal position.
pub struct PairedReader<R: BufRead> {
    left: FastqParser<R>,
    right: FastqParser<R>,
    emitted: u64,
}

impl<R: BufRead> PairedReader<R> {
    pub fn new(left: FastqParser<R>, right: FastqParser<R>) -> Self {
        Self {
            left,
            right,
            emitted: 0,
        }
    }
}

impl<R: BufRead> Iterator for PairedReader<R> {
    type Item = Result<(Record, Record)>;

    fn next(&mut self) -> Option<Self::Item> {
        match (self.left.next(), self.right.next()) {
            (None, None) => None,
            (Some(Ok(r1)), Some(Ok(r2))) => {
                self.emitted += 1;
                Some(Ok((r1, r2)))
            }
            (Some(Err(err)), _) | (_, Some(Err(err))) => Some(Err(err)),
            (Some(Ok(_)), None) => Some(Err(FormatError::UnpairedTail {
                left: self.emitted + 1,
                right: self.emitted,
            }
            .into())),
            (None, Some(Ok(_))) => Some(Err(FormatError::UnpairedTail {
                left: self.emitted,
                right: self.emitted + 1,
            }
            .into())),
        }
    }
}

/// Four-line FASTQ writer.
pub struct FastqSink<W: std::io::Write> {
    inner: W,
}

impl<W: std::io::Write> FastqSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        self.inner.write_all(b"@")?;
        self.inner.write_all(record.id.as_bytes())?;
        self.inner.write_all(b"\n")?;
        self.inner.write_all(&record.seq)?;
        self.inner.write_all(b"\n+\n")?;
        self.inner.write_all(&record.qual)?;
        self.inner.write_all(b"\n")?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use std::io::Cursor;

    fn parse_all(text: &str) -> Result<Vec<Record>> {
        FastqParser::new(Cursor::new(text.to_owned())).collect()
    }

    #[test]
    fn test_parse_basic() {
        let records = parse_all("@r1\nACGT\n+\nIIII\n@r2\nTTGG\n+\nHHHH\n").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "r1");
        assert_eq!(records[0].seq, b"ACGT");
        assert_eq!(records[1].qual, b"HHHH");
    }

    #[test]
    fn test_lowercase_preserved() {
        // soft-masked bases must survive byte-for-byte
        let records = parse_all("@r1\nacgt\n+\nIIII\n").unwrap();
        assert_eq!(records[0].seq, b"acgt");
    }

    #[test]
    fn test_plus_line_with_repeated_id() {
        let records = parse_all("@r1\nACGT\n+r1\nIIII\n").unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_crlf_line_endings() {
        let records = parse_all("@r1\r\nACGT\r\n+\r\nIIII\r\n").unwrap();
        assert_eq!(records[0].seq, b"ACGT");
        assert_eq!(records[0].qual, b"IIII");
    }

    #[test]
    fn test_missing_at_sign() {
        let err = parse_all("r1\nACGT\n+\nIIII\n").unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Format(FormatError::MalformedFastq { line: 1, .. })
        ));
    }

    #[test]
    fn test_length_mismatch() {
        let err = parse_all("@r1\nACGT\n+\nIII\n").unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Format(FormatError::MalformedFastq { .. })
        ));
    }

    #[test]
    fn test_truncated_record() {
        let err = parse_all("@r1\nACGT\n").unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Format(FormatError::MalformedFastq { .. })
        ));
    }

    #[test]
    fn test_empty_input_yields_nothing() {
        assert!(parse_all("").unwrap().is_empty());
    }

    #[test]
    fn test_parser_stops_after_error() {
        let mut parser = FastqParser::new(Cursor::new("bogus\n@r1\nACGT\n+\nIIII\n".to_owned()));
        assert!(parser.next().unwrap().is_err());
        assert!(parser.next().is_none());
    }

    #[test]
    fn test_paired_merge() {
        let left = FastqParser::new(Cursor::new("@a/1\nACGT\n+\nIIII\n".to_owned()));
        let right = FastqParser::new(Cursor::new("@a/2\nTTGG\n+\nHHHH\n".to_owned()));
        let pairs: Result<Vec<_>> = PairedReader::new(left, right).collect();
        let pairs = pairs.unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0.id, "a/1");
        assert_eq!(pairs[0].1.id, "a/2");
    }

    #[test]
    fn test_paired_unmatched_tail() {
        let left = FastqParser::new(Cursor::new(
            "@a/1\nACGT\n+\nIIII\n@b/1\nACGT\n+\nIIII\n".to_owned(),
        ));
        let right = FastqParser::new(Cursor::new("@a/2\nTTGG\n+\nHHHH\n".to_owned()));
        let results: Vec<_> = PairedReader::new(left, right).collect();
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1].as_ref().unwrap_err(),
            crate::Error::Format(FormatError::UnpairedTail { .. })
        ));
    }

    #[test]
    fn test_sink_roundtrip() {
        let record = Record::new("r1 extra tokens", *b"ACGTN", *b"II!!I");
        let mut sink = FastqSink::new(Vec::new());
        sink.write_record(&record).unwrap();
        let text = sink.into_inner();
        let back = parse_all(std::str::from_utf8(&text).unwrap()).unwrap();
        assert_eq!(back[0], record);
    }
}
