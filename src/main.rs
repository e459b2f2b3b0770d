use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use fqc::pipeline::{CompressOptions, DecompressOptions, Pipeline};
use fqc::{Error, FqcReader};

#[derive(Parser)]
#[command(name = "fqc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Reference-free FASTQ compression", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress FASTQ files into an .fqc archive
    Compress(CompressArgs),
    /// Decompress an .fqc archive back to FASTQ
    Decompress(DecompressArgs),
    /// Print archive metadata without decoding records
    Info(InfoArgs),
    /// Check every checksum in an archive and report all failures
    Verify(InfoArgs),
}

#[derive(Parser)]
struct CompressArgs {
    /// Input FASTQ file(s): one for single-end, two for paired-end
    #[arg(short, long, value_name = "FILE", num_args = 1..=2, required = true)]
    input: Vec<PathBuf>,

    /// Output archive file
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    /// Number of worker threads (0 = auto-detect)
    #[arg(short = 't', long, default_value = "0")]
    threads: usize,

    /// Memory budget in MiB for buffered pipeline data
    #[arg(short = 'm', long, default_value = "4096")]
    memory_mb: usize,

    /// Records per compression block
    #[arg(short, long, default_value_t = fqc::DEFAULT_BLOCK_RECORDS)]
    block_size: usize,

    /// Compression effort (1 = fast, 9 = slow and small)
    #[arg(short, long, default_value = "3", value_parser = clap::value_parser!(u8).range(1..=9))]
    effort: u8,

    /// Keep original read order (skips similarity clustering)
    #[arg(long)]
    no_reorder: bool,

    /// Analyzer reservoir sample size
    #[arg(long, default_value_t = fqc::DEFAULT_SAMPLE_SIZE)]
    sample_size: usize,

    /// Analyzer sampling seed
    #[arg(long, default_value_t = fqc::DEFAULT_SAMPLE_SEED)]
    seed: u64,
}

#[derive(Parser)]
struct DecompressArgs {
    /// Input archive file
    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,

    /// Output FASTQ file (mate-1 records for paired archives)
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    /// Second output for mate-2 records; omit to interleave into one file
    #[arg(long, value_name = "FILE")]
    output_mate: Option<PathBuf>,

    /// Number of worker threads (0 = auto-detect)
    #[arg(short = 't', long, default_value = "0")]
    threads: usize,

    /// Memory budget in MiB for buffered pipeline data
    #[arg(short = 'm', long, default_value = "4096")]
    memory_mb: usize,

    /// Skip corrupt blocks instead of failing the whole run
    #[arg(long)]
    lenient: bool,
}

#[derive(Parser)]
struct InfoArgs {
    /// Archive file
    #[arg(value_name = "FILE")]
    input: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            error!("{err}");
            if err.is_data_error() {
                ExitCode::from(2)
            } else {
                ExitCode::from(1)
            }
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, Error> {
    match cli.command {
        Commands::Compress(args) => {
            let options = CompressOptions {
                inputs: args.input,
                output: args.output,
                workers: args.threads,
                memory_budget: args.memory_mb * 1024 * 1024,
                block_records: args.block_size,
                effort: args.effort,
                reorder: !args.no_reorder,
                sample_size: args.sample_size,
                sample_seed: args.seed,
                ..CompressOptions::default()
            };
            let pipeline = Pipeline::with_codec(std::sync::Arc::new(
                fqc::NativeCodec::new(options.reorder),
            ));
            let summary = pipeline.compress(&options)?;
            let ratio = if summary.output_bytes > 0 {
                summary.input_bytes as f64 / summary.output_bytes as f64
            } else {
                0.0
            };
            info!(
                records = summary.records,
                blocks = summary.blocks,
                input_bytes = summary.input_bytes,
                output_bytes = summary.output_bytes,
                ratio,
                "compressed"
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Decompress(args) => {
            let options = DecompressOptions {
                input: args.input,
                output: args.output,
                output_mate: args.output_mate,
                workers: args.threads,
                memory_budget: args.memory_mb * 1024 * 1024,
                lenient: args.lenient,
                ..DecompressOptions::default()
            };
            let summary = Pipeline::new().decompress(&options)?;
            info!(
                records = summary.records,
                blocks = summary.blocks,
                skipped = summary.skipped_blocks,
                "decompressed"
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Info(args) => {
            let reader = FqcReader::open(&args.input)?;
            let header = reader.header();
            let stats = reader.stats();
            println!("records:      {}", header.record_count);
            println!("blocks:       {}", reader.num_blocks());
            println!("block size:   {}", header.block_size);
            println!("paired:       {}", header.is_paired());
            println!("reordered:    {}", reader.reorder_map().is_some());
            println!("read length:  {}..{}", stats.min_len, stats.max_len);
            println!("total bases:  {}", stats.total_bases);
            println!("pairing rate: {:.3}", stats.pairing_rate());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Verify(args) => {
            let reader = FqcReader::open(&args.input)?;
            let failures = reader.verify();
            if failures.is_empty() {
                info!(
                    blocks = reader.num_blocks(),
                    records = reader.num_records(),
                    "archive verified"
                );
                Ok(ExitCode::SUCCESS)
            } else {
                for failure in &failures {
                    error!("{failure}");
                }
                error!(count = failures.len(), "verification failed");
                Ok(ExitCode::from(2))
            }
        }
    }
}
