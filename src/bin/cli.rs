//! shufflestore CLI
//!
//! Offline inspection and verification of shuffle files on local storage.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use shufflestore::checksum::crc32;
use shufflestore::shuffle::{decode_index_entries, PartitionReadHandler};
use shufflestore::storage::{PartitionRange, DATA_FILE_EXTENSION};
use shufflestore::{LocalStorage, ReadConfig, ShuffleStorage};
use tracing_subscriber::{fmt, EnvFilter};

/// shufflestore CLI
#[derive(Parser, Debug)]
#[command(name = "shufflestore-cli")]
#[command(about = "Inspect and verify shufflestore data/index files")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Dump the entries of an index file and check every block's CRC
    Inspect {
        /// Path to a `{shard}_{n}.index` file
        index: PathBuf,
    },

    /// Check every block of a shuffle, one thread per partition range
    Verify {
        /// Storage root
        #[arg(short, long, default_value = "./shuffle_data")]
        base: PathBuf,

        /// Application id
        #[arg(short, long)]
        app: String,

        /// Shuffle id
        #[arg(short, long, default_value = "0")]
        shuffle: u32,

        /// Total number of partitions
        #[arg(short, long)]
        partitions: u32,

        /// Partitions grouped per directory
        #[arg(short = 'r', long, default_value = "1")]
        per_range: u32,
    },
}

/// Result of verifying one partition range
#[derive(Debug, Default)]
struct RangeReport {
    shards: usize,
    blocks: u64,
    bytes: u64,
    corrupt: u64,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,shufflestore=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();
    tracing::info!("shufflestore CLI v{}", shufflestore::VERSION);

    let outcome = match args.command {
        Commands::Inspect { index } => inspect(&index),
        Commands::Verify {
            base,
            app,
            shuffle,
            partitions,
            per_range,
        } => verify(&base, &app, shuffle, partitions, per_range),
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every block checked out
fn inspect(index_path: &Path) -> shufflestore::Result<bool> {
    let storage = LocalStorage::new();
    let mut index = storage.open_read(index_path)?;
    let size = index.size()?;
    let bytes = index.read_at(0, size as usize)?;
    let (entries, trailing) = decode_index_entries(&bytes);

    let data_path = index_path.with_extension(DATA_FILE_EXTENSION);
    let mut data = storage.open_read(&data_path)?;

    println!(
        "{:>6}  {:>20}  {:>8}  {:>8}  {:>10}  {:>12}  {:>10}  status",
        "#", "block_id", "seq", "task", "partition", "offset", "length"
    );

    let mut all_ok = true;
    for (i, entry) in entries.iter().enumerate() {
        let (seq, task, partition) = entry.block_id.decode();
        let status = match data.read_at(entry.offset, entry.length as usize) {
            Ok(payload) if crc32(&payload) == entry.crc => "ok".to_string(),
            Ok(payload) => {
                all_ok = false;
                format!("crc mismatch (index {}, data {})", entry.crc, crc32(&payload))
            }
            Err(e) => {
                all_ok = false;
                format!("unreadable: {}", e)
            }
        };
        println!(
            "{:>6}  {:>20}  {:>8}  {:>8}  {:>10}  {:>12}  {:>10}  {}",
            i,
            entry.block_id.as_u64(),
            seq,
            task,
            partition,
            entry.offset,
            entry.length,
            status
        );
    }

    if trailing > 0 {
        println!("{} trailing bytes do not form a whole entry", trailing);
    }
    println!("{} entries, {}", entries.len(), if all_ok { "all ok" } else { "ERRORS" });
    Ok(all_ok)
}

/// Returns whether every range verified cleanly
fn verify(
    base: &Path,
    app: &str,
    shuffle: u32,
    partitions: u32,
    per_range: u32,
) -> shufflestore::Result<bool> {
    let storage: Arc<dyn ShuffleStorage> = Arc::new(LocalStorage::new());
    let ranges = PartitionRange::all(partitions, per_range);

    let results = crossbeam::scope(|s| {
        let handles: Vec<_> = ranges
            .iter()
            .map(|&range| {
                let storage = Arc::clone(&storage);
                let config = ReadConfig::builder()
                    .base_path(base)
                    .app_id(app)
                    .shuffle_id(shuffle)
                    .partition_id(range.start)
                    .partition_num_per_range(per_range)
                    .partition_num(partitions)
                    .build();
                s.spawn(move |_| (range, verify_range(&config, storage)))
            })
            .collect();

        handles
            .into_iter()
            .filter_map(|h| h.join().ok())
            .collect::<Vec<_>>()
    })
    .map_err(|_| shufflestore::ShuffleError::Config("verification thread panicked".into()))?;

    let mut all_ok = results.len() == ranges.len();
    for (range, result) in results {
        match result {
            Ok(report) => {
                println!(
                    "{:>12}  shards={:<4} blocks={:<8} bytes={:<12} corrupt={}",
                    range.to_string(),
                    report.shards,
                    report.blocks,
                    report.bytes,
                    report.corrupt
                );
                all_ok &= report.corrupt == 0;
            }
            Err(e) => {
                println!("{:>12}  FAILED: {}", range.to_string(), e);
                all_ok = false;
            }
        }
    }
    Ok(all_ok)
}

fn verify_range(
    config: &ReadConfig,
    storage: Arc<dyn ShuffleStorage>,
) -> shufflestore::Result<RangeReport> {
    let mut handler = PartitionReadHandler::open(config, storage)?;
    let mut report = RangeReport {
        shards: handler.shard_count(),
        ..RangeReport::default()
    };

    let mut segment_index = 0;
    while let Some(batch) = handler.read_shuffle_data(segment_index)? {
        for (segment, payload) in batch.blocks() {
            report.blocks += 1;
            report.bytes += segment.length as u64;
            if crc32(&payload) != segment.crc {
                tracing::warn!(block_id = %segment.block_id, "Checksum mismatch");
                report.corrupt += 1;
            }
        }
        segment_index += 1;
    }

    handler.close();
    Ok(report)
}
