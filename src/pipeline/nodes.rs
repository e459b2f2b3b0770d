//! The closed set of pipeline nodes: reader, compressor, writer on the
//! compression side; archive reader, decompressor, FASTQ writer on the
//! decompression side. Each node runs as one or more threads inside a
//! scope; work items carry their memory-budget reservation with them so
//! the ledger tracks buffered bytes wherever a block currently sits.

use std::collections::BTreeMap;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, warn};

use super::{
    CompressOptions, CompressSummary, DecompressOptions, DecompressSummary, Message, NodeState,
    Pipeline, Shared,
};
use crate::budget::{MemoryBudget, Reservation};
use crate::codec::{encode_block, BlockCodec, EncodedBlock};
use crate::error::{Error, PipelineError, Result, WriteError};
use crate::format::{FqcReader, FqcWriter, GlobalHeader};
use crate::io::{AsyncReader, AsyncWriter, FastqParser, FastqSink, PairedReader};
use crate::record::Block;
use crate::stats::{CorpusStats, GlobalAnalyzer};

/// Parsed input source, single-end or merged paired-end.
enum Input {
    Single(FastqParser<BufReader<AsyncReader>>),
    Paired(PairedReader<BufReader<AsyncReader>>),
}

impl Input {
    fn open(options: &CompressOptions) -> Result<Self> {
        match options.inputs.as_slice() {
            [single] => Ok(Self::Single(open_parser(single)?)),
            [left, right] => Ok(Self::Paired(PairedReader::new(
                open_parser(left)?,
                open_parser(right)?,
            ))),
            other => Err(std::io::Error::other(format!(
                "expected 1 or 2 input files, got {}",
                other.len()
            ))
            .into()),
        }
    }
}

fn open_parser(path: &Path) -> Result<FastqParser<BufReader<AsyncReader>>> {
    Ok(FastqParser::new(BufReader::new(AsyncReader::open(path)?)))
}

/// Streaming analysis pass over the full input.
pub(crate) fn analyze(options: &CompressOptions) -> Result<CorpusStats> {
    let mut analyzer = GlobalAnalyzer::new(options.sample_size, options.sample_seed);
    match Input::open(options)? {
        Input::Single(parser) => {
            for record in parser {
                analyzer.observe(&record?);
            }
        }
        Input::Paired(reader) => {
            for pair in reader {
                let (mut r1, mut r2) = pair?;
                r1.mate = Some(1);
                r2.mate = Some(0);
                analyzer.observe(&r1);
                analyzer.observe(&r2);
            }
        }
    }
    analyzer.finish()
}

struct ParsedMsg {
    block: Block,
    _reservation: Option<Reservation>,
}

/// Block until the budget admits `bytes`, re-checking the abort flag.
/// `Ok(None)` means the run was cancelled while waiting.
fn reserve_abortable(
    shared: &Shared,
    budget: &Arc<MemoryBudget>,
    stage: &'static str,
    bytes: usize,
) -> Result<Option<Reservation>> {
    loop {
        if shared.aborted() {
            return Ok(None);
        }
        if let Some(reservation) =
            budget.reserve_owned_timeout(stage, bytes, std::time::Duration::from_millis(50))?
        {
            return Ok(Some(reservation));
        }
    }
}

struct EncodedMsg {
    encoded: EncodedBlock,
    _reservation: Option<Reservation>,
}

/// Batch records into blocks, assigning dense block ids at ingestion.
fn reader_node(
    shared: &Shared,
    input: Input,
    budget: &Arc<MemoryBudget>,
    block_records: usize,
    tx: &Sender<Message<ParsedMsg>>,
) -> Result<()> {
    let mut next_id = 0u32;
    let mut start_record = 0u64;
    let mut block = Block::new(0, 0);
    // paired blocks hold whole pairs; round the capacity to even
    let capacity = block_records.max(2) & !1;

    let mut flush = |block: &mut Block, next_id: &mut u32, start: &mut u64| -> Result<bool> {
        if block.is_empty() {
            return Ok(true);
        }
        let records = block.len() as u64;
        let Some(reservation) =
            reserve_abortable(shared, budget, "reader", block.heap_size().max(1))?
        else {
            return Ok(false);
        };
        let full = std::mem::replace(block, Block::new(*next_id + 1, *start + records));
        *next_id += 1;
        *start += records;
        Ok(tx
            .send(Message::Item(ParsedMsg {
                block: full,
                _reservation: Some(reservation),
            }))
            .is_ok())
    };

    match input {
        Input::Single(parser) => {
            for record in parser {
                if shared.aborted() {
                    return Ok(());
                }
                block.records.push(record?);
                if block.len() >= capacity && !flush(&mut block, &mut next_id, &mut start_record)? {
                    return Ok(());
                }
            }
        }
        Input::Paired(reader) => {
            for pair in reader {
                if shared.aborted() {
                    return Ok(());
                }
                let (mut r1, mut r2) = pair?;
                let at = block.len() as u32;
                r1.mate = Some(at + 1);
                r2.mate = Some(at);
                block.records.push(r1);
                block.records.push(r2);
                if block.len() >= capacity && !flush(&mut block, &mut next_id, &mut start_record)? {
                    return Ok(());
                }
            }
        }
    }
    flush(&mut block, &mut next_id, &mut start_record)?;
    Ok(())
}

/// One compressor worker: pull, encode, push.
fn compressor_worker(
    shared: &Shared,
    stats: &CorpusStats,
    codec: &dyn BlockCodec,
    rx: &Receiver<Message<ParsedMsg>>,
    tx: &Sender<Message<EncodedMsg>>,
) {
    loop {
        if shared.aborted() {
            return;
        }
        match rx.recv() {
            Ok(Message::Item(msg)) => match encode_block(&msg.block, stats, codec) {
                Ok(encoded) => {
                    for demotion in &encoded.demoted {
                        warn!(block = encoded.block_id, %demotion, "record demoted to unpaired");
                    }
                    let out = EncodedMsg {
                        encoded,
                        _reservation: msg._reservation,
                    };
                    if tx.send(Message::Item(out)).is_err() {
                        return;
                    }
                }
                Err(err) => {
                    shared.fail("compressor", err);
                    let _ = tx.send(Message::Abort);
                    return;
                }
            },
            Ok(Message::Abort) => {
                let _ = tx.send(Message::Abort);
                return;
            }
            Err(_) => return,
        }
    }
}

/// Terminal writer: reassemble by block id and serialize the archive.
fn writer_node<W: std::io::Write + std::io::Seek>(
    shared: &Shared,
    writer: &mut FqcWriter<W>,
    rx: &Receiver<Message<EncodedMsg>>,
) -> Result<CompressSummary> {
    let mut pending: BTreeMap<u32, EncodedMsg> = BTreeMap::new();
    let mut next_expected = 0u32;
    let mut summary = CompressSummary::default();

    loop {
        match rx.recv() {
            Ok(Message::Item(msg)) => {
                pending.insert(msg.encoded.block_id, msg);
                while let Some(msg) = pending.remove(&next_expected) {
                    summary.records += u64::from(msg.encoded.n_records);
                    writer.push_block(&msg.encoded)?;
                    next_expected += 1;
                    // reservation drops here: the block's bytes are on disk
                }
            }
            Ok(Message::Abort) => return Ok(summary),
            Err(_) => break,
        }
    }

    if shared.aborted() {
        return Ok(summary);
    }
    if !pending.is_empty() {
        return Err(WriteError::BlockOutOfOrder {
            expected: next_expected,
            found: *pending.keys().next().expect("non-empty"),
        }
        .into());
    }
    writer.finish()?;
    summary.blocks = writer.num_blocks();
    Ok(summary)
}

pub(crate) fn run_compress(
    pipeline: &Pipeline,
    options: &CompressOptions,
    stats: &CorpusStats,
    codec: Arc<dyn BlockCodec>,
    shared: Arc<Shared>,
) -> Result<CompressSummary> {
    let paired = options.inputs.len() == 2;
    let budget = Arc::new(MemoryBudget::new(options.memory_budget));
    let input = Input::open(options)?;

    let header = GlobalHeader::new(
        stats.records_observed,
        options.block_records as u64,
        stats.alphabet_mask,
        paired,
    );
    let mut writer = FqcWriter::create(&options.output, header, stats, options.zstd_level())?;

    let reader_mon = pipeline.monitor("reader");
    let compressor_mon = pipeline.monitor("compressor");
    let writer_mon = pipeline.monitor("writer");

    let (parsed_tx, parsed_rx) = bounded::<Message<ParsedMsg>>(options.queue_capacity);
    let (encoded_tx, encoded_rx) = bounded::<Message<EncodedMsg>>(options.queue_capacity);
    let workers = options.worker_count();

    let mut summary = CompressSummary::default();
    std::thread::scope(|scope| {
        reader_mon.set(NodeState::Running);
        let reader_handle = {
            let shared = Arc::clone(&shared);
            let budget = Arc::clone(&budget);
            let tx = parsed_tx; // moved: reader owns the only parsed sender
            let block_records = options.block_records;
            scope.spawn(move || {
                let result = reader_node(&shared, input, &budget, block_records, &tx);
                if let Err(err) = result {
                    shared.fail("reader", err);
                    let _ = tx.send(Message::Abort);
                }
            })
        };

        compressor_mon.set(NodeState::Running);
        let worker_handles: Vec<_> = (0..workers)
            .map(|_| {
                let shared = Arc::clone(&shared);
                let codec = Arc::clone(&codec);
                let rx = parsed_rx.clone();
                let tx = encoded_tx.clone();
                scope.spawn(move || compressor_worker(&shared, stats, codec.as_ref(), &rx, &tx))
            })
            .collect();
        drop(parsed_rx);
        drop(encoded_tx);

        writer_mon.set(NodeState::Running);
        let writer_handle = {
            let shared = Arc::clone(&shared);
            let writer = &mut writer;
            scope.spawn(move || {
                let result = writer_node(&shared, writer, &encoded_rx);
                match result {
                    Ok(summary) => Some(summary),
                    Err(err) => {
                        shared.fail("writer", err);
                        None
                    }
                }
            })
        };

        if reader_handle.join().is_err() {
            shared.fail("reader", PipelineError::WorkerPanic { node: "reader" }.into());
        }
        reader_mon.set(NodeState::Draining);

        for handle in worker_handles {
            if handle.join().is_err() {
                shared.fail(
                    "compressor",
                    PipelineError::WorkerPanic { node: "compressor" }.into(),
                );
            }
        }
        compressor_mon.set(NodeState::Draining);

        match writer_handle.join() {
            Ok(Some(writer_summary)) => summary = writer_summary,
            Ok(None) => {}
            Err(_) => shared.fail("writer", PipelineError::WorkerPanic { node: "writer" }.into()),
        }
    });

    for (monitor, name) in [
        (&reader_mon, "reader"),
        (&compressor_mon, "compressor"),
        (&writer_mon, "writer"),
    ] {
        monitor.set(close_state(&shared, name));
    }

    if !shared.aborted() {
        summary.input_bytes = options
            .inputs
            .iter()
            .filter_map(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .sum();
        summary.output_bytes = std::fs::metadata(&options.output).map(|m| m.len()).unwrap_or(0);
    }
    Ok(summary)
}

fn close_state(shared: &Shared, name: &'static str) -> NodeState {
    let failed = shared
        .first_error
        .lock()
        .as_ref()
        .is_some_and(|err| matches!(err, Error::Pipeline(PipelineError::NodeFailed { node, .. }) if *node == name));
    if failed {
        NodeState::Failed
    } else {
        NodeState::Closed
    }
}

// ── decompression side ──────────────────────────────────────────────────

struct DecodedMsg {
    block_id: u32,
    /// None when a corrupt block was skipped in lenient mode
    block: Option<Block>,
    _reservation: Option<Reservation>,
}

fn decompressor_worker(
    shared: &Shared,
    reader: &FqcReader,
    codec: &dyn BlockCodec,
    budget: &Arc<MemoryBudget>,
    lenient: bool,
    rx: &Receiver<Message<usize>>,
    tx: &Sender<Message<DecodedMsg>>,
) {
    // admission estimate per block, from the corpus statistics
    let stats = reader.stats();
    let mean_len = if stats.records_observed > 0 {
        (stats.total_bases / stats.records_observed).max(1)
    } else {
        1
    };

    loop {
        if shared.aborted() {
            return;
        }
        match rx.recv() {
            Ok(Message::Item(i)) => {
                let entry = reader.index()[i];
                let estimate = (u64::from(entry.n_records) * (2 * mean_len + 48)) as usize;
                let reservation =
                    match reserve_abortable(shared, budget, "decompressor", estimate.max(1)) {
                        Ok(Some(reservation)) => reservation,
                        Ok(None) => return,
                        Err(err) => {
                            shared.fail("decompressor", err);
                            let _ = tx.send(Message::Abort);
                            return;
                        }
                    };
                let msg = match reader.decode_block(i, codec) {
                    Ok(block) => DecodedMsg {
                        block_id: entry.block_id,
                        block: Some(block),
                        _reservation: Some(reservation),
                    },
                    Err(err) if lenient && err.is_data_error() => {
                        warn!(block = entry.block_id, %err, "skipping corrupt block");
                        DecodedMsg {
                            block_id: entry.block_id,
                            block: None,
                            _reservation: None,
                        }
                    }
                    Err(err) => {
                        shared.fail("decompressor", err);
                        let _ = tx.send(Message::Abort);
                        return;
                    }
                };
                if tx.send(Message::Item(msg)).is_err() {
                    return;
                }
            }
            Ok(Message::Abort) => {
                let _ = tx.send(Message::Abort);
                return;
            }
            Err(_) => return,
        }
    }
}

fn fastq_writer_node(
    shared: &Shared,
    paired_split: bool,
    primary: &mut FastqSink<std::io::BufWriter<AsyncWriter>>,
    mate: Option<&mut FastqSink<std::io::BufWriter<AsyncWriter>>>,
    rx: &Receiver<Message<DecodedMsg>>,
) -> Result<DecompressSummary> {
    let mut pending: BTreeMap<u32, DecodedMsg> = BTreeMap::new();
    let mut next_expected = 0u32;
    let mut summary = DecompressSummary::default();
    let mut mate = mate;

    let mut emit = |msg: DecodedMsg,
                    summary: &mut DecompressSummary,
                    primary: &mut FastqSink<std::io::BufWriter<AsyncWriter>>,
                    mate: &mut Option<&mut FastqSink<std::io::BufWriter<AsyncWriter>>>|
     -> Result<()> {
        let Some(block) = msg.block else {
            summary.skipped_blocks += 1;
            return Ok(());
        };
        summary.blocks += 1;
        summary.records += block.records.len() as u64;
        for (i, record) in block.records.iter().enumerate() {
            match mate {
                Some(sink) if paired_split && i % 2 == 1 => sink.write_record(record)?,
                _ => primary.write_record(record)?,
            }
        }
        Ok(())
    };

    loop {
        match rx.recv() {
            Ok(Message::Item(msg)) => {
                pending.insert(msg.block_id, msg);
                while let Some(msg) = pending.remove(&next_expected) {
                    emit(msg, &mut summary, primary, &mut mate)?;
                    next_expected += 1;
                }
            }
            Ok(Message::Abort) => return Ok(summary),
            Err(_) => break,
        }
    }

    if !shared.aborted() {
        while let Some(msg) = pending.remove(&next_expected) {
            emit(msg, &mut summary, primary, &mut mate)?;
            next_expected += 1;
        }
        if !pending.is_empty() {
            return Err(WriteError::BlockOutOfOrder {
                expected: next_expected,
                found: *pending.keys().next().expect("non-empty"),
            }
            .into());
        }
    }
    Ok(summary)
}

pub(crate) fn run_decompress(
    pipeline: &Pipeline,
    options: &DecompressOptions,
    codec: Arc<dyn BlockCodec>,
    shared: Arc<Shared>,
) -> Result<DecompressSummary> {
    let reader = Arc::new(FqcReader::open(&options.input)?);
    let budget = Arc::new(MemoryBudget::new(options.memory_budget));
    let paired_split = reader.is_paired() && options.output_mate.is_some();

    let mut primary = FastqSink::new(std::io::BufWriter::new(AsyncWriter::create(
        &options.output,
    )?));
    let mut mate = match (&options.output_mate, paired_split) {
        (Some(path), true) => Some(FastqSink::new(std::io::BufWriter::new(
            AsyncWriter::create(path)?,
        ))),
        _ => None,
    };

    let source_mon = pipeline.monitor("archive-reader");
    let decomp_mon = pipeline.monitor("decompressor");
    let sink_mon = pipeline.monitor("fastq-writer");

    let (idx_tx, idx_rx) = bounded::<Message<usize>>(options.queue_capacity);
    let (dec_tx, dec_rx) = bounded::<Message<DecodedMsg>>(options.queue_capacity);
    let workers = options.worker_count();
    let num_blocks = reader.num_blocks();

    let mut summary = DecompressSummary::default();
    std::thread::scope(|scope| {
        source_mon.set(NodeState::Running);
        let source_handle = {
            let shared = Arc::clone(&shared);
            scope.spawn(move || {
                for i in 0..num_blocks {
                    if shared.aborted() || idx_tx.send(Message::Item(i)).is_err() {
                        return;
                    }
                }
            })
        };

        decomp_mon.set(NodeState::Running);
        let worker_handles: Vec<_> = (0..workers)
            .map(|_| {
                let shared = Arc::clone(&shared);
                let reader = Arc::clone(&reader);
                let codec = Arc::clone(&codec);
                let budget = Arc::clone(&budget);
                let rx = idx_rx.clone();
                let tx = dec_tx.clone();
                let lenient = options.lenient;
                scope.spawn(move || {
                    decompressor_worker(
                        &shared,
                        &reader,
                        codec.as_ref(),
                        &budget,
                        lenient,
                        &rx,
                        &tx,
                    );
                })
            })
            .collect();
        drop(idx_rx);
        drop(dec_tx);

        sink_mon.set(NodeState::Running);
        let sink_handle = {
            let shared = Arc::clone(&shared);
            let primary = &mut primary;
            let mate = mate.as_mut();
            scope.spawn(move || {
                match fastq_writer_node(&shared, paired_split, primary, mate, &dec_rx) {
                    Ok(summary) => Some(summary),
                    Err(err) => {
                        shared.fail("fastq-writer", err);
                        None
                    }
                }
            })
        };

        if source_handle.join().is_err() {
            shared.fail(
                "archive-reader",
                PipelineError::WorkerPanic {
                    node: "archive-reader",
                }
                .into(),
            );
        }
        source_mon.set(NodeState::Draining);
        for handle in worker_handles {
            if handle.join().is_err() {
                shared.fail(
                    "decompressor",
                    PipelineError::WorkerPanic {
                        node: "decompressor",
                    }
                    .into(),
                );
            }
        }
        decomp_mon.set(NodeState::Draining);
        match sink_handle.join() {
            Ok(Some(sink_summary)) => summary = sink_summary,
            Ok(None) => {}
            Err(_) => shared.fail(
                "fastq-writer",
                PipelineError::WorkerPanic {
                    node: "fastq-writer",
                }
                .into(),
            ),
        }
    });

    for (monitor, name) in [
        (&source_mon, "archive-reader"),
        (&decomp_mon, "decompressor"),
        (&sink_mon, "fastq-writer"),
    ] {
        monitor.set(close_state(&shared, name));
    }

    if shared.aborted() {
        // never leave half-written FASTQ files resembling valid output
        let mut inner = primary.into_inner();
        inner.get_mut().abort();
        drop(inner);
        if let Some(sink) = mate {
            let mut inner = sink.into_inner();
            inner.get_mut().abort();
            drop(inner);
        }
        let _ = std::fs::remove_file(&options.output);
        if let Some(path) = &options.output_mate {
            let _ = std::fs::remove_file(path);
        }
    } else {
        finish_sink(primary)?;
        if let Some(sink) = mate {
            finish_sink(sink)?;
        }
        debug!(records = summary.records, "fastq output flushed");
    }
    Ok(summary)
}

/// Flush a sink all the way down and surface any deferred write error.
fn finish_sink(sink: FastqSink<std::io::BufWriter<AsyncWriter>>) -> Result<()> {
    let buffered = sink.into_inner();
    let mut writer = buffered
        .into_inner()
        .map_err(|err| std::io::Error::other(err.to_string()))?;
    writer.finish()
}
