//! Batch provenance ledger.
//!
//! One row per processed session, appended while the batch runs, annotated
//! by the duplicate detector once it is over, and written as CSV at the end.

use chrono::{Local, NaiveDateTime};
use serde::{Serialize, Serializer};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::hash::HASH_SENTINEL;
use crate::types::Result;

/// Furthest step a session reached.
///
/// Recorded as is: a session that failed keeps the last state it reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Nothing read yet
    #[default]
    NotConverted,
    /// Channels read, reference established
    ReadIn,
    /// Aligned, merged and hashed
    ReadInProcessed,
    /// Merged file written to its temporary path
    ReadInProcessedWrittenTemp,
    /// Merged file in place and hashed
    ReadInProcessedWrittenConverted,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            SessionStatus::NotConverted => "not_converted",
            SessionStatus::ReadIn => "read_in",
            SessionStatus::ReadInProcessed => "read_in_processed",
            SessionStatus::ReadInProcessedWrittenTemp => "read_in_processed_written_temp",
            SessionStatus::ReadInProcessedWrittenConverted => {
                "read_in_processed_written_converted"
            }
        };
        f.write_str(text)
    }
}

/// Battery state at the end of the recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatteryQuality {
    Ok,
    Low,
    Depleted,
    #[default]
    Unknown,
}

/// One ledger line. Column order is the field order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LedgerRow {
    pub sequence_number: u64,
    pub status: SessionStatus,
    #[serde(serialize_with = "timestamp")]
    pub timestamp: NaiveDateTime,
    /// Session folder (or archive) the row is about
    pub original_outer_path: PathBuf,
    /// Reference channel file inside the session
    pub original_path: Option<PathBuf>,
    #[serde(serialize_with = "hash_or_sentinel")]
    pub original_file_hash: Option<String>,
    pub converted_path: Option<PathBuf>,
    #[serde(serialize_with = "hash_or_sentinel")]
    pub converted_file_hash: Option<String>,
    #[serde(serialize_with = "optional_timestamp")]
    pub rec_start: Option<NaiveDateTime>,
    #[serde(serialize_with = "optional_timestamp")]
    pub rec_stop: Option<NaiveDateTime>,
    /// `HH:MM:SS`
    pub rec_duration: Option<String>,
    pub rec_duration_seconds: Option<f64>,
    /// Reference channel sample count before any resampling
    pub rec_sample_count: Option<u64>,
    pub battery_quality: BatteryQuality,
    #[serde(serialize_with = "hash_or_sentinel")]
    pub pre_signal_hash: Option<String>,
    #[serde(serialize_with = "hash_or_sentinel")]
    pub post_signal_hash: Option<String>,
    pub dup_sample_count: Option<u64>,
    pub dup_sample_count_offset: Option<u64>,
    pub dup_original_hash: Option<u64>,
    pub dup_converted_hash: Option<u64>,
    pub dup_pre_signal_hash: Option<u64>,
    pub dup_post_signal_hash: Option<u64>,
}

fn timestamp<S: Serializer>(value: &NaiveDateTime, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&value.format("%Y-%m-%d %H:%M:%S").to_string())
}

fn optional_timestamp<S: Serializer>(
    value: &Option<NaiveDateTime>,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    match value {
        Some(value) => timestamp(value, s),
        None => s.serialize_none(),
    }
}

fn hash_or_sentinel<S: Serializer>(
    value: &Option<String>,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(value.as_deref().unwrap_or(HASH_SENTINEL))
}

/// Formats seconds as `HH:MM:SS`, rounding to the nearest second.
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    format!("{:02}:{:02}:{:02}", total / 3600, (total / 60) % 60, total % 60)
}

/// The ledger of one batch.
///
/// Passed explicitly through the batch; there is no global ledger.
#[derive(Debug, Default)]
pub struct Ledger {
    rows: Vec<LedgerRow>,
    next_sequence: u64,
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            rows: Vec::new(),
            next_sequence: 1,
        }
    }

    /// Starts a row for `outer_path` with the next sequence number.
    ///
    /// The row only joins the ledger once [`Ledger::push`] is called.
    pub fn start_row(&mut self, outer_path: &Path) -> LedgerRow {
        let sequence_number = self.next_sequence.max(1);
        self.next_sequence = sequence_number + 1;
        LedgerRow {
            sequence_number,
            timestamp: Local::now().naive_local(),
            original_outer_path: outer_path.to_path_buf(),
            ..LedgerRow::default()
        }
    }

    pub fn push(&mut self, row: LedgerRow) {
        self.rows.push(row);
    }

    pub fn rows(&self) -> &[LedgerRow] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut Vec<LedgerRow> {
        &mut self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Writes the ledger as CSV with a header line.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv = csv::Writer::from_writer(writer);
        for row in &self.rows {
            csv.serialize(row)?;
        }
        csv.flush()?;
        Ok(())
    }

    /// Writes the ledger as CSV to `path`, replacing any existing file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = std::fs::File::create(path.as_ref())?;
        self.write_csv(std::io::BufWriter::new(file))
    }
}
