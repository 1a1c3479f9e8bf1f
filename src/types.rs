use chrono::{Duration as ChronoDuration, NaiveDateTime};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::channels::ChannelName;

/// Calibration bounds of one channel.
///
/// Every bound is optional: a reader that cannot recover a bound reports
/// it as absent, which is distinct from a bound of zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Calibration {
    /// Physical value represented by `digital_min`
    pub physical_min: Option<f64>,
    /// Physical value represented by `digital_max`
    pub physical_max: Option<f64>,
    /// Lowest digital sample value
    pub digital_min: Option<i32>,
    /// Highest digital sample value
    pub digital_max: Option<i32>,
}

impl Calibration {
    /// Gain and offset mapping digital to physical values, when every bound
    /// is present and the ranges are non-degenerate.
    pub fn scale(&self) -> Option<(f64, f64)> {
        let (pmin, pmax) = (self.physical_min?, self.physical_max?);
        let (dmin, dmax) = (self.digital_min? as f64, self.digital_max? as f64);
        if dmax <= dmin || pmax == pmin {
            return None;
        }
        let gain = (pmax - pmin) / (dmax - dmin);
        Some((gain, pmin - gain * dmin))
    }
}

/// Signal header of one EDF signal.
///
/// Numeric fields that were blank or unparseable in the file are absent.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalHeader {
    /// Signal label (16 characters max in the file)
    pub label: String,
    /// Transducer type
    pub transducer: String,
    /// Physical dimension, e.g. "uV"
    pub physical_dimension: String,
    /// Calibration bounds
    pub calibration: Calibration,
    /// Prefiltering description
    pub prefilter: String,
    /// Samples of this signal in each data record
    pub samples_per_record: usize,
}

impl SignalHeader {
    /// True for the EDF+ annotation signal, which carries no samples.
    pub fn is_annotation(&self) -> bool {
        self.label == "EDF Annotations"
    }
}

/// Header of an EDF / EDF+ file.
#[derive(Debug, Clone, PartialEq)]
pub struct EdfHeader {
    /// Version field, "0" for EDF
    pub version: String,
    /// Local patient identification
    pub patient: String,
    /// Local recording identification
    pub recording: String,
    /// Start of the recording, if the date and time fields are valid
    pub start: Option<NaiveDateTime>,
    /// Number of bytes in the header record
    pub header_bytes: usize,
    /// Reserved field; "EDF+C" or "EDF+D" for EDF+
    pub reserved: String,
    /// Number of data records, -1 if unknown
    pub num_records: i64,
    /// Duration of one data record in seconds
    pub record_duration: f64,
    /// One header per signal, in file order
    pub signals: Vec<SignalHeader>,
}

/// One named single-stream time series read from a channel file.
///
/// The sample buffer is always physical values. The sample count is the
/// buffer length.
#[derive(Debug, Clone)]
pub struct Channel {
    /// Channel name from the known vocabulary
    pub name: ChannelName,
    /// Label as stored in the file header
    pub label: String,
    /// Sample rate (Hz)
    pub sample_rate: f64,
    /// Calibration bounds reported by the reader
    pub calibration: Calibration,
    /// Physical unit reported by the reader (may be empty)
    pub unit: String,
    /// Recording start of the file, if known
    pub start: Option<NaiveDateTime>,
    /// Physical samples
    pub samples: Array1<f64>,
    /// File the channel was read from
    pub source: PathBuf,
}

impl Channel {
    /// Returns the number of samples in the channel.
    pub fn num_samples(&self) -> usize {
        self.samples.len()
    }

    /// Returns the duration of the channel in seconds.
    ///
    /// Returns 0.0 if the sample rate is not positive.
    pub fn duration(&self) -> f64 {
        if self.sample_rate > 0.0 {
            self.num_samples() as f64 / self.sample_rate
        } else {
            0.0
        }
    }
}

/// Reference rate and count of a session.
///
/// Taken from the first successfully read channel and fixed afterwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reference {
    /// Sample rate every channel is aligned to (Hz)
    pub sample_rate: f64,
    /// Sample count every channel is aligned to
    pub sample_count: usize,
}

impl Reference {
    /// Duration covered by the reference channel in seconds.
    pub fn duration_seconds(&self) -> f64 {
        self.sample_count as f64 / self.sample_rate
    }
}

/// One recording instance: a folder of per-channel files.
#[derive(Debug, Clone)]
pub struct Session {
    /// Folder holding the channel files
    pub path: PathBuf,
    /// Channels with a source file, in vocabulary order
    pub available: Vec<ChannelName>,
    /// Available channels that are not dropped, in vocabulary order
    pub to_read: Vec<ChannelName>,
    /// Reference taken from the first channel read
    pub reference: Option<Reference>,
    /// Recording start of the reference channel
    pub start: Option<NaiveDateTime>,
}

impl Session {
    /// Recording end: start plus the reference duration.
    pub fn end(&self) -> Option<NaiveDateTime> {
        let start = self.start?;
        let reference = self.reference?;
        let micros = (reference.duration_seconds() * 1_000_000.0).round() as i64;
        Some(start + ChronoDuration::microseconds(micros))
    }
}

/// Per-channel calibration arrays of a merged record.
///
/// Every array is index-aligned with [`MergedRecord::names`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationArrays {
    pub physical_min: Vec<Option<f64>>,
    pub physical_max: Vec<Option<f64>>,
    pub digital_min: Vec<Option<i32>>,
    pub digital_max: Vec<Option<i32>>,
}

impl CalibrationArrays {
    /// Calibration of the channel at `index`.
    pub fn get(&self, index: usize) -> Calibration {
        Calibration {
            physical_min: self.physical_min[index],
            physical_max: self.physical_max[index],
            digital_min: self.digital_min[index],
            digital_max: self.digital_max[index],
        }
    }

    pub(crate) fn push(&mut self, calibration: Calibration) {
        self.physical_min.push(calibration.physical_min);
        self.physical_max.push(calibration.physical_max);
        self.digital_min.push(calibration.digital_min);
        self.digital_max.push(calibration.digital_max);
    }
}

/// The merged multi-channel recording.
///
/// # Examples
///
/// ```no_run
/// use zmax_merge::{merge_session, Config};
///
/// let record = merge_session("path/to/session", &Config::default()).unwrap();
/// println!("{} channels at {} Hz", record.num_channels(), record.sample_rate);
/// ```
#[derive(Debug, Clone)]
pub struct MergedRecord {
    /// Channel names in merge order
    pub names: Vec<ChannelName>,
    /// Physical unit per channel
    pub units: Vec<String>,
    /// Calibration per channel
    pub calibration: CalibrationArrays,
    /// Sample matrix
    /// - Shape: [num_channels, num_samples]
    pub data: Array2<f64>,
    /// Shared sample rate (Hz)
    pub sample_rate: f64,
    /// Shared recording start
    pub start: Option<NaiveDateTime>,
}

impl MergedRecord {
    pub fn num_channels(&self) -> usize {
        self.data.nrows()
    }

    pub fn num_samples(&self) -> usize {
        self.data.ncols()
    }

    /// Samples of the channel at `index`.
    pub fn channel(&self, index: usize) -> ArrayView1<'_, f64> {
        self.data.index_axis(Axis(0), index)
    }

    /// Position of `name` in the merge order.
    pub fn position(&self, name: ChannelName) -> Option<usize> {
        self.names.iter().position(|n| *n == name)
    }

    /// Returns the duration of the record in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate > 0.0 {
            self.num_samples() as f64 / self.sample_rate
        } else {
            0.0
        }
    }
}

/// Errors of the channel codec.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The path does not carry an EDF extension. Reported as a warning.
    #[error("{0} does not seem to be an EDF file")]
    NotAChannelFile(PathBuf),

    /// The file could not be parsed
    #[error("failed to read {path}: {reason}")]
    ReadFailure { path: PathBuf, reason: String },

    /// The file could not be written
    #[error("failed to write {path}: {reason}")]
    WriteFailure { path: PathBuf, reason: String },

    /// Neither the file name nor the label names a known channel
    #[error("{path}: '{label}' is not a known channel")]
    UnknownChannel { path: PathBuf, label: String },
}

/// Errors raised while merging a session.
///
/// Everything here is caught at the session boundary; none of it stops a
/// batch.
#[derive(Debug, Error)]
pub enum MergeError {
    /// No channel files in the session folder
    #[error("no channel files found in {0}")]
    DiscoveryEmpty(PathBuf),

    /// No channel could be read to serve as reference
    #[error("no reference channel could be read in {0}")]
    NoReferenceChannel(PathBuf),

    /// Resampling a channel failed
    #[error("resampling {channel} failed: {reason}")]
    ResampleFailure { channel: ChannelName, reason: String },

    /// The assembler received no channels
    #[error("no channels to merge")]
    AssemblyEmpty,

    /// An aligned channel does not match the reference length
    #[error("{channel} has {actual} samples, expected {expected}")]
    Misaligned {
        channel: ChannelName,
        expected: usize,
        actual: usize,
    },

    /// A hash could not be computed
    #[error("hash of {path} unavailable: {reason}")]
    HashUnavailable { path: PathBuf, reason: String },

    #[error("channel read failed: {0}")]
    CodecRead(#[source] CodecError),

    #[error("merged file write failed: {0}")]
    CodecWrite(#[source] CodecError),

    /// An external tool ran past its timeout
    #[error("external tool '{tool}' timed out after {timeout:?}")]
    ExternalToolTimeout { tool: String, timeout: Duration },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("ledger error: {0}")]
    Ledger(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, MergeError>;
