//! The multi-stage concurrent pipeline.
//!
//! A run is a chain of nodes connected by bounded crossbeam channels:
//! reader → compressor workers → writer for compression, and archive
//! reader → decompressor workers → FASTQ writer for the reverse. Worker
//! stages share one mpmc input queue; the terminal writer reassembles
//! out-of-order completions through an arena keyed by block id with a
//! next-expected cursor, so output order comes from ids assigned at
//! ingestion, never from completion order.
//!
//! Cancellation: the first failing node records its error, flips the
//! shared abort flag, and pushes an [`Message::Abort`] sentinel through
//! its queue. Every loop checks the flag between items, finishes its
//! in-flight block, and closes; channel disconnection unblocks anything
//! parked on a full or empty queue. The originating error is what the
//! caller sees, never a downstream cleanup error.

mod nodes;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::codec::{BlockCodec, NativeCodec};
use crate::error::{Error, PipelineError, Result};
use crate::{
    DEFAULT_BLOCK_RECORDS, DEFAULT_COMPRESSION_LEVEL, DEFAULT_MEMORY_BUDGET, DEFAULT_SAMPLE_SEED,
    DEFAULT_SAMPLE_SIZE,
};

/// Lifecycle of one pipeline node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    Idle,
    Running,
    /// Upstream closed; flushing remaining output
    Draining,
    Closed,
    /// Terminal; the failure propagated to the rest of the pipeline
    Failed,
}

/// Observable state of a node, updated as it moves through its lifecycle.
pub struct NodeMonitor {
    name: &'static str,
    state: Mutex<NodeState>,
}

impl NodeMonitor {
    fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            state: Mutex::new(NodeState::Idle),
        })
    }

    fn set(&self, state: NodeState) {
        debug!(node = self.name, ?state, "node state");
        *self.state.lock() = state;
    }

    #[must_use]
    pub fn state(&self) -> NodeState {
        *self.state.lock()
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Queue message: a work item or the abort sentinel.
pub(crate) enum Message<T> {
    Item(T),
    Abort,
}

/// Cancellation and error funnel shared by every node of a run.
pub(crate) struct Shared {
    abort: AtomicBool,
    first_error: Mutex<Option<Error>>,
}

impl Shared {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            abort: AtomicBool::new(false),
            first_error: Mutex::new(None),
        })
    }

    pub(crate) fn aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }

    /// Record a node failure; only the first error is preserved.
    pub(crate) fn fail(&self, node: &'static str, err: Error) {
        let mut slot = self.first_error.lock();
        if slot.is_none() {
            *slot = Some(Error::Pipeline(PipelineError::node_failed(node, err)));
        }
        drop(slot);
        self.abort.store(true, Ordering::Relaxed);
    }

    fn into_result(self: Arc<Self>) -> Result<()> {
        let shared = Arc::try_unwrap(self).unwrap_or_else(|arc| Shared {
            abort: AtomicBool::new(arc.abort.load(Ordering::Relaxed)),
            first_error: Mutex::new(arc.first_error.lock().take()),
        });
        match shared.first_error.into_inner() {
            Some(err) => Err(err),
            None if shared.abort.into_inner() => Err(PipelineError::Aborted.into()),
            None => Ok(()),
        }
    }
}

/// Configuration for a compression run.
#[derive(Clone, Debug)]
pub struct CompressOptions {
    /// One input for single-end data, two for paired-end
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
    /// Worker threads for per-block compression; 0 = auto-detect
    pub workers: usize,
    /// Aggregate buffered-bytes cap across all stages
    pub memory_budget: usize,
    /// Records per block (pairs count as two records)
    pub block_records: usize,
    /// Compression effort 1-9, mapped onto the backend zstd level
    pub effort: u8,
    /// Cluster similar reads before encoding
    pub reorder: bool,
    pub sample_size: usize,
    pub sample_seed: u64,
    /// Bounded queue capacity between adjacent nodes, in blocks
    pub queue_capacity: usize,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            output: PathBuf::new(),
            workers: 0,
            memory_budget: DEFAULT_MEMORY_BUDGET,
            block_records: DEFAULT_BLOCK_RECORDS,
            effort: 3,
            reorder: true,
            sample_size: DEFAULT_SAMPLE_SIZE,
            sample_seed: DEFAULT_SAMPLE_SEED,
            queue_capacity: 4,
        }
    }
}

impl CompressOptions {
    pub(crate) fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }

    pub(crate) fn zstd_level(&self) -> i32 {
        match self.effort.clamp(1, 9) {
            1 => 1,
            2 => 2,
            3 => DEFAULT_COMPRESSION_LEVEL,
            level => i32::from(level) * 2 - 3,
        }
    }
}

/// Configuration for a decompression run.
#[derive(Clone, Debug)]
pub struct DecompressOptions {
    pub input: PathBuf,
    /// Output path for mate-1 (and single-end) records
    pub output: PathBuf,
    /// Second output for mate-2 records of a paired archive
    pub output_mate: Option<PathBuf>,
    pub workers: usize,
    pub memory_budget: usize,
    /// Skip corrupt blocks instead of failing the run
    pub lenient: bool,
    pub queue_capacity: usize,
}

impl Default for DecompressOptions {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            output: PathBuf::new(),
            output_mate: None,
            workers: 0,
            memory_budget: DEFAULT_MEMORY_BUDGET,
            lenient: false,
            queue_capacity: 4,
        }
    }
}

impl DecompressOptions {
    pub(crate) fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }
}

/// Outcome of a successful compression run.
#[derive(Clone, Copy, Debug, Default)]
pub struct CompressSummary {
    pub records: u64,
    pub blocks: usize,
    pub input_bytes: u64,
    pub output_bytes: u64,
}

/// Outcome of a successful decompression run.
#[derive(Clone, Copy, Debug, Default)]
pub struct DecompressSummary {
    pub records: u64,
    pub blocks: usize,
    pub skipped_blocks: usize,
}

/// A configured pipeline, parameterized by the sequence codec strategy.
pub struct Pipeline {
    codec: Arc<dyn BlockCodec>,
    monitors: Mutex<Vec<Arc<NodeMonitor>>>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::with_codec(Arc::new(NativeCodec::default()))
    }

    /// Use an alternative sequence codec backend.
    #[must_use]
    pub fn with_codec(codec: Arc<dyn BlockCodec>) -> Self {
        Self {
            codec,
            monitors: Mutex::new(Vec::new()),
        }
    }

    /// Node monitors of the most recent run, for inspection.
    #[must_use]
    pub fn monitors(&self) -> Vec<Arc<NodeMonitor>> {
        self.monitors.lock().clone()
    }

    fn register(&self, name: &'static str) -> Arc<NodeMonitor> {
        let monitor = NodeMonitor::new(name);
        self.monitors.lock().push(Arc::clone(&monitor));
        monitor
    }

    /// Run a full compression: analyze, then stream blocks through the
    /// compressor stage into the archive writer.
    pub fn compress(&self, options: &CompressOptions) -> Result<CompressSummary> {
        self.monitors.lock().clear();
        info!(
            inputs = options.inputs.len(),
            workers = options.worker_count(),
            effort = options.effort,
            "compression run starting"
        );
        let stats = nodes::analyze(options)?;
        debug!(
            records = stats.records_observed,
            pairing = stats.pairing_rate(),
            "analysis pass complete"
        );

        let shared = Shared::new();
        let summary = nodes::run_compress(
            self,
            options,
            &stats,
            Arc::clone(&self.codec),
            Arc::clone(&shared),
        )?;
        shared.into_result()?;
        info!(
            records = summary.records,
            blocks = summary.blocks,
            output_bytes = summary.output_bytes,
            "compression run finished"
        );
        Ok(summary)
    }

    /// Run a full decompression back to FASTQ text.
    pub fn decompress(&self, options: &DecompressOptions) -> Result<DecompressSummary> {
        self.monitors.lock().clear();
        let shared = Shared::new();
        let summary = nodes::run_decompress(
            self,
            options,
            Arc::clone(&self.codec),
            Arc::clone(&shared),
        )?;
        shared.into_result()?;
        info!(
            records = summary.records,
            blocks = summary.blocks,
            skipped = summary.skipped_blocks,
            "decompression run finished"
        );
        Ok(summary)
    }

    pub(crate) fn monitor(&self, name: &'static str) -> Arc<NodeMonitor> {
        self.register(name)
    }
}
