use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use ndarray::Array1;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, warn};

use crate::channels::{unit_for_label, ChannelName};
use crate::types::*;
use std::result::Result;

// Field widths of the fixed EDF header
const FIXED_HEADER_BYTES: usize = 256;
const SIGNAL_HEADER_BYTES: usize = 256;
const BYTES_PER_SAMPLE: usize = 2;

/// Reads the first ordinary signal of a single-channel EDF file.
///
/// The channel name is taken from the file stem, which is how the device
/// names its files, falling back to the signal label.
///
/// # Arguments
///
/// * `file_path` - Path to the channel file
///
/// # Errors
///
/// `ReadFailure` if the file is unparseable, `UnknownChannel` if neither
/// the stem nor the label belongs to the vocabulary. A non-`.edf` extension
/// only logs a warning.
pub fn read_channel<P: AsRef<Path>>(file_path: P) -> Result<Channel, CodecError> {
    let path = file_path.as_ref();
    let (header, signals) = load_file(path)?;

    let (signal, samples) = signals
        .into_iter()
        .next()
        .ok_or_else(|| read_failure(path, "file holds no ordinary signal"))?;

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = ChannelName::from_label(&stem)
        .or_else(|| ChannelName::from_label(&signal.label))
        .ok_or_else(|| CodecError::UnknownChannel {
            path: path.to_path_buf(),
            label: signal.label.clone(),
        })?;

    Ok(build_channel(name, &header, signal, samples, path))
}

/// Reads every ordinary signal of an EDF file, such as a merged output.
///
/// Signals whose label is not a known channel are skipped with a warning.
pub fn read_signals<P: AsRef<Path>>(file_path: P) -> Result<Vec<Channel>, CodecError> {
    let path = file_path.as_ref();
    let (header, signals) = load_file(path)?;

    let mut channels = Vec::with_capacity(signals.len());
    for (signal, samples) in signals {
        match ChannelName::from_label(&signal.label) {
            Some(name) => channels.push(build_channel(name, &header, signal, samples, path)),
            None => warn!("{}: skipping unknown signal '{}'", path.display(), signal.label),
        }
    }
    Ok(channels)
}

/// Reads only the header of an EDF file.
pub fn read_header_only<P: AsRef<Path>>(file_path: P) -> Result<EdfHeader, CodecError> {
    let path = file_path.as_ref();
    let file = File::open(path).map_err(|e| read_failure(path, e))?;
    let mut reader = BufReader::new(file);
    read_header(&mut reader).map_err(|e| read_failure(path, e))
}

/// Parses header and samples of every ordinary signal.
fn load_file(path: &Path) -> Result<(EdfHeader, Vec<(SignalHeader, Vec<f64>)>), CodecError> {
    let tic = Instant::now();
    check_extension(path);

    let file = File::open(path).map_err(|e| read_failure(path, e))?;
    let file_size = file.metadata().map_err(|e| read_failure(path, e))?.len();
    let mut reader = BufReader::with_capacity(65536, file); // 64KB buffer

    let header = read_header(&mut reader).map_err(|e| read_failure(path, e))?;
    let num_records =
        calculate_data_size(&header, file_size).map_err(|e| read_failure(path, e))?;
    let raw = read_all_data_records(&header, num_records, &mut reader)
        .map_err(|e| read_failure(path, e))?;

    let signals = header
        .signals
        .iter()
        .zip(raw)
        .filter(|(signal, _)| !signal.is_annotation())
        .map(|(signal, digital)| (signal.clone(), scale_to_physical(signal, &digital)))
        .collect();

    debug!(
        "read {} ({} records) in {:.3} s",
        path.display(),
        num_records,
        tic.elapsed().as_secs_f64()
    );

    Ok((header, signals))
}

fn build_channel(
    name: ChannelName,
    header: &EdfHeader,
    signal: SignalHeader,
    samples: Vec<f64>,
    path: &Path,
) -> Channel {
    let sample_rate = if header.record_duration > 0.0 {
        signal.samples_per_record as f64 / header.record_duration
    } else {
        // EDF allows a zero duration for files without a time axis
        signal.samples_per_record as f64
    };

    let unit = if signal.physical_dimension.is_empty() {
        unit_for_label(&signal.label).to_string()
    } else {
        signal.physical_dimension
    };

    // samples of an unscaled signal are digital counts, so its physical
    // bounds no longer describe them
    let calibration = match signal.calibration.scale() {
        Some(_) => signal.calibration,
        None => Calibration::default(),
    };

    Channel {
        name,
        label: signal.label,
        sample_rate,
        calibration,
        unit,
        start: header.start,
        samples: Array1::from(samples),
        source: path.to_path_buf(),
    }
}

/// Warns when the path does not look like an EDF file. Never fatal.
fn check_extension(path: &Path) {
    let is_edf = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("edf"))
        .unwrap_or(false);
    if !is_edf {
        warn!("{}", CodecError::NotAChannelFile(path.to_path_buf()));
    }
}

fn read_failure(path: &Path, reason: impl ToString) -> CodecError {
    CodecError::ReadFailure {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Reads the fixed header and every signal header.
fn read_header<R: Read>(reader: &mut R) -> io::Result<EdfHeader> {
    let version = read_ascii(reader, 8)?;
    let patient = read_ascii(reader, 80)?;
    let recording = read_ascii(reader, 80)?;
    let start_date = read_ascii(reader, 8)?;
    let start_time = read_ascii(reader, 8)?;
    let header_bytes = parse_field::<usize>(&read_ascii(reader, 8)?, "header bytes")?;
    let reserved = read_ascii(reader, 44)?;
    let num_records = parse_field::<i64>(&read_ascii(reader, 8)?, "number of records")?;
    let record_duration = parse_field::<f64>(&read_ascii(reader, 8)?, "record duration")?;
    let num_signals = parse_field::<usize>(&read_ascii(reader, 4)?, "number of signals")?;

    if num_signals == 0 {
        return Err(invalid("header declares no signals"));
    }
    if header_bytes != FIXED_HEADER_BYTES + num_signals * SIGNAL_HEADER_BYTES {
        return Err(invalid(format!(
            "header size {} does not match {} signals",
            header_bytes, num_signals
        )));
    }

    let signals = read_signal_headers(reader, num_signals)?;

    Ok(EdfHeader {
        version,
        patient,
        recording,
        start: parse_start(&start_date, &start_time),
        header_bytes,
        reserved,
        num_records,
        record_duration,
        signals,
    })
}

/// Signal headers are stored field by field: all labels, then all
/// transducers, and so on.
fn read_signal_headers<R: Read>(reader: &mut R, ns: usize) -> io::Result<Vec<SignalHeader>> {
    let labels = read_ascii_fields(reader, ns, 16)?;
    let transducers = read_ascii_fields(reader, ns, 80)?;
    let dimensions = read_ascii_fields(reader, ns, 8)?;
    let physical_min = read_ascii_fields(reader, ns, 8)?;
    let physical_max = read_ascii_fields(reader, ns, 8)?;
    let digital_min = read_ascii_fields(reader, ns, 8)?;
    let digital_max = read_ascii_fields(reader, ns, 8)?;
    let prefilters = read_ascii_fields(reader, ns, 80)?;
    let samples_per_record = read_ascii_fields(reader, ns, 8)?;
    let _reserved = read_ascii_fields(reader, ns, 32)?;

    let mut signals = Vec::with_capacity(ns);
    for i in 0..ns {
        signals.push(SignalHeader {
            label: labels[i].clone(),
            transducer: transducers[i].clone(),
            physical_dimension: dimensions[i].clone(),
            calibration: Calibration {
                physical_min: physical_min[i].parse().ok(),
                physical_max: physical_max[i].parse().ok(),
                digital_min: digital_min[i].parse().ok(),
                digital_max: digital_max[i].parse().ok(),
            },
            prefilter: prefilters[i].clone(),
            samples_per_record: parse_field(&samples_per_record[i], "samples per record")?,
        });
    }

    Ok(signals)
}

/// Reads a space-padded ASCII field and trims it.
fn read_ascii<R: Read>(reader: &mut R, width: usize) -> io::Result<String> {
    let mut buf = vec![0u8; width];
    reader.read_exact(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).trim().to_string())
}

fn read_ascii_fields<R: Read>(reader: &mut R, count: usize, width: usize) -> io::Result<Vec<String>> {
    (0..count).map(|_| read_ascii(reader, width)).collect()
}

fn parse_field<T: std::str::FromStr>(value: &str, what: &str) -> io::Result<T> {
    value
        .parse()
        .map_err(|_| invalid(format!("invalid {}: '{}'", what, value)))
}

/// Parses `dd.mm.yy` and `hh.mm.ss`. Years 85-99 are 19xx, the rest 20xx.
pub(crate) fn parse_start(date: &str, time: &str) -> Option<NaiveDateTime> {
    let mut d = date.split('.').map(|p| p.trim().parse::<u32>());
    let (day, month, year) = (d.next()?.ok()?, d.next()?.ok()?, d.next()?.ok()?);
    let mut t = time.split('.').map(|p| p.trim().parse::<u32>());
    let (hour, minute, second) = (t.next()?.ok()?, t.next()?.ok()?, t.next()?.ok()?);

    let year = if year >= 85 { 1900 + year } else { 2000 + year };
    let date = NaiveDate::from_ymd_opt(year as i32, month, day)?;
    let time = NaiveTime::from_hms_opt(hour, minute, second)?;
    Some(NaiveDateTime::new(date, time))
}

/// Works out how many complete data records the file holds.
///
/// A record count of -1 (recording not closed properly) is recomputed from
/// the file size. A file shorter than its header claims is an error.
fn calculate_data_size(header: &EdfHeader, file_size: u64) -> io::Result<usize> {
    let bytes_per_record = bytes_per_data_record(header) as u64;
    if bytes_per_record == 0 {
        return Err(invalid("data records hold no samples"));
    }

    let bytes_remaining = file_size.saturating_sub(header.header_bytes as u64);
    let records_in_file = bytes_remaining / bytes_per_record;

    if header.num_records < 0 {
        return Ok(records_in_file as usize);
    }

    let declared = header.num_records as u64;
    if declared > records_in_file {
        return Err(invalid(format!(
            "header declares {} records but file holds {}",
            declared, records_in_file
        )));
    }
    if bytes_remaining % bytes_per_record != 0 || declared < records_in_file {
        warn!(
            "trailing data after {} records ({} bytes remaining)",
            declared, bytes_remaining
        );
    }

    Ok(declared as usize)
}

fn bytes_per_data_record(header: &EdfHeader) -> usize {
    header
        .signals
        .iter()
        .map(|s| s.samples_per_record * BYTES_PER_SAMPLE)
        .sum()
}

/// Reads every data record and demultiplexes the digital samples by signal.
fn read_all_data_records<R: Read + Seek>(
    header: &EdfHeader,
    num_records: usize,
    reader: &mut R,
) -> io::Result<Vec<Vec<i16>>> {
    reader.seek(SeekFrom::Start(header.header_bytes as u64))?;

    let mut raw: Vec<Vec<i16>> = header
        .signals
        .iter()
        .map(|s| Vec::with_capacity(s.samples_per_record * num_records))
        .collect();

    let max_per_record = header
        .signals
        .iter()
        .map(|s| s.samples_per_record)
        .max()
        .unwrap_or(0);
    let mut buf = vec![0i16; max_per_record];

    for _ in 0..num_records {
        for (signal, samples) in header.signals.iter().zip(raw.iter_mut()) {
            let block = &mut buf[..signal.samples_per_record];
            reader.read_i16_into::<LittleEndian>(block)?;
            samples.extend_from_slice(block);
        }
    }

    Ok(raw)
}

/// Converts digital samples to physical values.
///
/// Without a complete calibration the digital values are returned as they are.
fn scale_to_physical(signal: &SignalHeader, digital: &[i16]) -> Vec<f64> {
    match signal.calibration.scale() {
        Some((gain, offset)) => digital.iter().map(|&d| d as f64 * gain + offset).collect(),
        None => {
            warn!(
                "signal '{}' has incomplete calibration, keeping digital values",
                signal.label
            );
            digital.iter().map(|&d| d as f64).collect()
        }
    }
}
