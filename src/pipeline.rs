//! Session processing and batch driver.
//!
//! A session moves through the ledger states in order; the ledger row is
//! updated as each step completes, so a failure leaves it at the last
//! state reached. Session failures never stop the batch.

use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::align::align_channels;
use crate::battery::battery_quality;
use crate::config::Config;
use crate::dedup::detect_duplicates;
use crate::discovery::{available_channels, discover_channels, find_sessions};
use crate::hash::{channels_signal_hash, file_hash, or_sentinel, record_signal_hash};
use crate::ledger::{format_duration, Ledger, LedgerRow, SessionStatus};
use crate::merge::assemble;
use crate::reader::read_channel;
use crate::tools::{ExternalTool, ToolOutcome, ToolRunner};
use crate::types::*;
use crate::writer::write_merged;

/// Suffix of merged output files
pub const MERGED_SUFFIX: &str = "_merged.edf";

/// Result of a batch run.
#[derive(Debug)]
pub struct BatchReport {
    pub ledger: Ledger,
    /// Where the ledger was written
    pub ledger_path: PathBuf,
    /// Rows linked by the duplicate detector
    pub duplicate_pairs: usize,
}

impl BatchReport {
    /// Sessions that reached the final state.
    pub fn converted(&self) -> usize {
        self.ledger
            .rows()
            .iter()
            .filter(|r| r.status == SessionStatus::ReadInProcessedWrittenConverted)
            .count()
    }
}

/// Runs the configured enrichment tools over a session's channel files.
///
/// Runs before discovery so derived channels are picked up. Never fails:
/// whatever the outcome, the session goes on with the files present.
pub fn enrich_session<R: ToolRunner + ?Sized>(dir: &Path, config: &Config, runner: &R) {
    for tool in ExternalTool::ALL {
        let files: Vec<PathBuf> = available_channels(dir, config.vocabulary.channels())
            .iter()
            .map(|name| dir.join(name.file_name()))
            .collect();
        if files.is_empty() {
            return;
        }

        let timeout = config.tools.timeout();
        match runner.invoke(tool, &files, timeout) {
            ToolOutcome::Completed => info!("{}: {} completed", dir.display(), tool),
            ToolOutcome::TimedOut => {
                let e = MergeError::ExternalToolTimeout {
                    tool: tool.to_string(),
                    timeout,
                };
                warn!("{}: {}", dir.display(), e);
            }
            ToolOutcome::Failed { code } => {
                warn!("{}: {} failed with exit code {:?}", dir.display(), tool, code)
            }
            ToolOutcome::Unavailable(reason) => debug!("{}: {}", dir.display(), reason),
        }
    }
}

/// Discovers and reads a session's channels.
///
/// The first channel read fixes the session reference. Unless
/// `strict_reads` is set, channels that fail to read are skipped with a
/// warning.
///
/// # Errors
///
/// `DiscoveryEmpty` if no channel is left to read, `NoReferenceChannel` if
/// none could be read, `CodecRead` on the first failure in strict mode.
pub fn read_session(dir: &Path, config: &Config) -> Result<(Session, Vec<Channel>)> {
    let discovered = discover_channels(dir, config.vocabulary.channels(), config.drop_profile);
    if discovered.is_empty() {
        return Err(MergeError::DiscoveryEmpty(dir.to_path_buf()));
    }

    let mut channels = Vec::with_capacity(discovered.to_read.len());
    for name in &discovered.to_read {
        match read_channel(dir.join(name.file_name())) {
            Ok(channel) => channels.push(channel),
            Err(e) if config.strict_reads => return Err(MergeError::CodecRead(e)),
            Err(e) => warn!("skipping {}: {}", name, e),
        }
    }

    let first = channels
        .first()
        .ok_or_else(|| MergeError::NoReferenceChannel(dir.to_path_buf()))?;
    let session = Session {
        path: dir.to_path_buf(),
        available: discovered.available,
        to_read: discovered.to_read,
        reference: Some(Reference {
            sample_rate: first.sample_rate,
            sample_count: first.num_samples(),
        }),
        start: first.start,
    };
    Ok((session, channels))
}

/// Reads, aligns and assembles one session without writing anything.
pub fn merge_session<P: AsRef<Path>>(dir: P, config: &Config) -> Result<MergedRecord> {
    let (_, channels) = read_session(dir.as_ref(), config)?;
    let (_, aligned) = align_channels(channels, config.resample_rate, config.pad_value)?;
    assemble(&aligned)
}

/// Final path of a session's merged file.
///
/// `<parent>/<folder>_merged.edf`, or the same file name inside
/// `output_dir` when one is given.
pub fn output_path(dir: &Path, output_dir: Option<&Path>) -> Result<PathBuf> {
    let folder = dir.file_name().ok_or_else(|| {
        MergeError::Config(format!("'{}' has no folder name", dir.display()))
    })?;
    let file_name = format!("{}{}", folder.to_string_lossy(), MERGED_SUFFIX);
    let parent = match output_dir {
        Some(out) => out,
        None => dir.parent().unwrap_or_else(|| Path::new(".")),
    };
    Ok(parent.join(file_name))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Processes one session, recording progress in `row`.
///
/// Returns the merged file's path. On error `row.status` is the last state
/// the session reached.
pub fn process_session<R: ToolRunner + ?Sized>(
    dir: &Path,
    config: &Config,
    runner: &R,
    row: &mut LedgerRow,
) -> Result<PathBuf> {
    enrich_session(dir, config, runner);

    let (mut session, channels) = read_session(dir, config)?;
    let first = &channels[0];
    row.original_path = Some(first.source.clone());
    row.original_file_hash = or_sentinel(file_hash(&first.source, config.hash_chunk_size));
    row.rec_sample_count = Some(first.num_samples() as u64);
    row.status = SessionStatus::ReadIn;
    info!(
        "{}: read {} of {} channels",
        dir.display(),
        channels.len(),
        session.available.len()
    );

    row.pre_signal_hash = Some(channels_signal_hash(&channels));
    row.battery_quality = battery_quality(&channels, &config.battery);

    let (reference, aligned) = align_channels(channels, config.resample_rate, config.pad_value)?;
    let record = assemble(&aligned)?;
    drop(aligned);
    session.reference = Some(reference);

    row.post_signal_hash = Some(record_signal_hash(&record));
    row.rec_start = session.start;
    row.rec_stop = session.end();
    row.rec_duration_seconds = Some(reference.duration_seconds());
    row.rec_duration = Some(format_duration(reference.duration_seconds()));
    row.status = SessionStatus::ReadInProcessed;
    info!(
        "{}: merged {} channels, {} samples at {} Hz",
        dir.display(),
        record.num_channels(),
        record.num_samples(),
        record.sample_rate
    );

    if let Some(out) = &config.output_dir {
        fs::create_dir_all(out)?;
    }
    let final_path = output_path(dir, config.output_dir.as_deref())?;
    let temp = temp_path(&final_path);
    if let Err(e) = write_merged(&record, &temp) {
        let _ = fs::remove_file(&temp);
        return Err(MergeError::CodecWrite(e));
    }
    row.status = SessionStatus::ReadInProcessedWrittenTemp;

    if let Err(e) = fs::rename(&temp, &final_path) {
        let _ = fs::remove_file(&temp);
        return Err(e.into());
    }
    row.converted_path = Some(final_path.clone());

    match file_hash(&final_path, config.hash_chunk_size) {
        Ok(hash) => {
            row.converted_file_hash = Some(hash);
            row.status = SessionStatus::ReadInProcessedWrittenConverted;
        }
        Err(e) => warn!("{}", e),
    }
    Ok(final_path)
}

/// Ledger path used when none is configured.
pub fn default_ledger_path(root: &Path) -> PathBuf {
    root.join(format!(
        "zmax_merge_ledger_{}.csv",
        Local::now().format("%Y%m%d_%H%M%S")
    ))
}

/// Processes every session below `root`, then runs duplicate detection
/// and writes the ledger.
///
/// # Errors
///
/// Only batch-level failures: an unusable root or an unwritable ledger.
pub fn run_batch<R: ToolRunner + ?Sized>(
    root: &Path,
    config: &Config,
    runner: &R,
) -> Result<BatchReport> {
    let start_time = Instant::now();
    let sessions = find_sessions(root)?;
    info!("found {} sessions below {}", sessions.len(), root.display());

    let mut ledger = Ledger::new();
    for dir in &sessions {
        let mut row = ledger.start_row(dir);
        let session_start = Instant::now();
        match process_session(dir, config, runner, &mut row) {
            Ok(path) => info!(
                "{} -> {} in {:.2?}",
                dir.display(),
                path.display(),
                session_start.elapsed()
            ),
            Err(e) => error!("{}: {} (left at {})", dir.display(), e, row.status),
        }
        ledger.push(row);
    }

    let duplicate_pairs = if config.dedup.enabled {
        detect_duplicates(ledger.rows_mut(), &config.dedup.settings())
    } else {
        0
    };

    let ledger_path = config
        .ledger_path
        .clone()
        .unwrap_or_else(|| default_ledger_path(root));
    ledger.save(&ledger_path)?;
    info!(
        "batch of {} sessions done in {:.2?}, ledger at {}",
        ledger.len(),
        start_time.elapsed(),
        ledger_path.display()
    );

    Ok(BatchReport {
        ledger,
        ledger_path,
        duplicate_pairs,
    })
}
