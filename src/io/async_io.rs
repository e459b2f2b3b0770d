//! Overlapped file I/O with bounded in-flight buffering.
//!
//! [`AsyncReader`] runs a read-ahead thread that fills a bounded channel
//! of buffers; [`AsyncWriter`] runs a write-behind thread draining one.
//! Compute stages therefore overlap with disk latency without unbounded
//! queue growth. Writes to one file complete in issue order (a single
//! drain thread per file), with no ordering promise across files.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::debug;

use crate::error::Result;

/// Default read-ahead / write-behind depth (buffers in flight).
pub const DEFAULT_IO_DEPTH: usize = 4;

/// Default buffer size per in-flight operation.
pub const DEFAULT_IO_BUFFER: usize = 1024 * 1024;

/// Read-ahead file reader. Implements [`Read`] by draining buffers filled
/// by a background thread.
pub struct AsyncReader {
    rx: Receiver<io::Result<Vec<u8>>>,
    current: Vec<u8>,
    pos: usize,
    handle: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl AsyncReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_depth(path, DEFAULT_IO_DEPTH, DEFAULT_IO_BUFFER)
    }

    pub fn with_depth(
        path: impl AsRef<Path>,
        depth: usize,
        buffer_size: usize,
    ) -> Result<Self> {
        let mut file = File::open(path)?;
        let (tx, rx) = bounded::<io::Result<Vec<u8>>>(depth.max(1));
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = std::thread::spawn(move || {
            loop {
                if stop_flag.load(Ordering::Relaxed) {
                    break;
                }
                let mut buf = vec![0u8; buffer_size];
                match file.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        buf.truncate(n);
                        // a full queue blocks here: bounded read-ahead
                        if tx.send(Ok(buf)).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(Err(err));
                        break;
                    }
                }
            }
        });

        Ok(Self {
            rx,
            current: Vec::new(),
            pos: 0,
            handle: Some(handle),
            stop,
        })
    }
}

impl Read for AsyncReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.current.len() {
            match self.rx.recv() {
                Ok(Ok(buf)) => {
                    self.current = buf;
                    self.pos = 0;
                }
                Ok(Err(err)) => return Err(err),
                // producer finished: end of file
                Err(_) => return Ok(0),
            }
        }
        let n = (self.current.len() - self.pos).min(out.len());
        out[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Drop for AsyncReader {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // unblock a producer parked on a full queue
        while self.rx.try_recv().is_ok() {}
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Write-behind file writer. Buffers queue on a bounded channel and are
/// flushed to disk in issue order by a background thread.
pub struct AsyncWriter {
    tx: Option<Sender<Vec<u8>>>,
    handle: Option<JoinHandle<io::Result<()>>>,
    aborted: Arc<AtomicBool>,
}

impl AsyncWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_depth(path, DEFAULT_IO_DEPTH)
    }

    pub fn with_depth(path: impl AsRef<Path>, depth: usize) -> Result<Self> {
        let mut file = File::create(path)?;
        let (tx, rx) = bounded::<Vec<u8>>(depth.max(1));
        let aborted = Arc::new(AtomicBool::new(false));
        let abort_flag = Arc::clone(&aborted);

        let handle = std::thread::spawn(move || -> io::Result<()> {
            for buf in rx {
                if abort_flag.load(Ordering::Relaxed) {
                    continue; // drain without writing
                }
                file.write_all(&buf)?;
            }
            if !abort_flag.load(Ordering::Relaxed) {
                file.flush()?;
            }
            Ok(())
        });

        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
            aborted,
        })
    }

    /// Queue one buffer; blocks when `depth` writes are already in flight.
    pub fn submit(&self, buf: Vec<u8>) -> io::Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(buf)
                .map_err(|_| io::Error::other("write-behind thread terminated")),
            None => Err(io::Error::other("writer already finished")),
        }
    }

    /// Close the queue, join the drain thread, and surface any deferred
    /// I/O error.
    pub fn finish(&mut self) -> Result<()> {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(result) => result?,
                Err(_) => {
                    return Err(io::Error::other("write-behind thread panicked").into());
                }
            }
        }
        Ok(())
    }

    /// Discard queued writes and stop writing further buffers.
    pub fn abort(&mut self) {
        debug!("aborting write-behind queue");
        self.aborted.store(true, Ordering::Relaxed);
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Write for AsyncWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.submit(buf.to_vec())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for AsyncWriter {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use std::io::BufReader;

    #[test]
    fn test_reader_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 253) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        let mut reader = AsyncReader::with_depth(&path, 2, 4096).unwrap();
        let mut back = Vec::new();
        reader.read_to_end(&mut back).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_reader_missing_file() {
        assert!(AsyncReader::open("/definitely/not/here").is_err());
    }

    #[test]
    fn test_writer_preserves_issue_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");

        let mut writer = AsyncWriter::with_depth(&path, 2).unwrap();
        let mut expected = Vec::new();
        for i in 0..64u32 {
            let chunk = vec![(i % 251) as u8; 1000];
            expected.extend_from_slice(&chunk);
            writer.submit(chunk).unwrap();
        }
        writer.finish().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), expected);
    }

    #[test]
    fn test_writer_abort_discards_queue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");

        let mut writer = AsyncWriter::with_depth(&path, 64).unwrap();
        for _ in 0..8 {
            writer.submit(vec![7u8; 100]).unwrap();
        }
        writer.abort();
        // whatever was written is a prefix of issue order; never interleaved garbage
        let written = std::fs::read(&path).unwrap();
        assert!(written.len() <= 800);
        assert!(written.iter().all(|&b| b == 7));
    }

    #[test]
    fn test_reader_through_bufreader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lines.txt");
        std::fs::write(&path, "@r\nACGT\n+\nIIII\n").unwrap();

        let reader = BufReader::new(AsyncReader::open(&path).unwrap());
        let records: crate::Result<Vec<_>> = crate::io::FastqParser::new(reader).collect();
        assert_eq!(records.unwrap().len(), 1);
    }
}
