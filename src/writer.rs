use byteorder::{LittleEndian, WriteBytesExt};
use chrono::NaiveDateTime;
use ndarray::Array2;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::debug;

use crate::types::*;
use std::result::Result;

const RECORD_DURATION: f64 = 1.0;
// 64 bytes of time-stamped annotation lists per record
const ANNOTATION_SAMPLES: usize = 32;
const ANNOTATION_LABEL: &str = "EDF Annotations";
const DEFAULT_DIGITAL_MIN: i32 = i16::MIN as i32;
const DEFAULT_DIGITAL_MAX: i32 = i16::MAX as i32;
// widest values an 8-character header field holds
const PHYSICAL_LIMITS: (f64, f64) = (-9_999_999.0, 99_999_999.0);
const PREFILTER: &str = "HP:0.1Hz LP:75Hz";
const EQUIPMENT: &str = "Hypnodyne_zmax";
const RECORDING_ADDITIONAL: &str = "merged_from_single_zmax_files";

/// Writes a merged record as one EDF+C file.
///
/// Every channel of the record becomes one signal with the record's
/// per-channel calibration, followed by an annotation signal holding a
/// `signal_start` marker. Records last one second; a final partial record
/// is filled with the digital value closest to physical zero.
///
/// # Errors
///
/// `WriteFailure` on any I/O error or if the sample rate rounds to zero
/// samples per record.
pub fn write_merged<P: AsRef<Path>>(record: &MergedRecord, file_path: P) -> Result<(), CodecError> {
    let path = file_path.as_ref();
    write_file(record, path).map_err(|e| CodecError::WriteFailure {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    debug!(
        "wrote {} channels x {} samples to {}",
        record.num_channels(),
        record.num_samples(),
        path.display()
    );
    Ok(())
}

/// Writes a single channel as its own EDF+ file.
pub fn write_channel<P: AsRef<Path>>(channel: &Channel, file_path: P) -> Result<(), CodecError> {
    let mut calibration = CalibrationArrays::default();
    calibration.push(channel.calibration);
    let record = MergedRecord {
        names: vec![channel.name],
        units: vec![channel.unit.clone()],
        calibration,
        data: Array2::from_shape_vec((1, channel.num_samples()), channel.samples.to_vec())
            .map_err(|e| CodecError::WriteFailure {
                path: file_path.as_ref().to_path_buf(),
                reason: e.to_string(),
            })?,
        sample_rate: channel.sample_rate,
        start: channel.start,
    };
    write_merged(&record, file_path)
}

/// Header values of one output signal, already rendered as they are stored.
struct OutputSignal {
    header: SignalHeader,
    gain: f64,
    offset: f64,
}

fn write_file(record: &MergedRecord, path: &Path) -> io::Result<()> {
    let samples_per_record = (record.sample_rate * RECORD_DURATION).round() as usize;
    if samples_per_record == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("sample rate {} Hz is too low for EDF records", record.sample_rate),
        ));
    }

    let signals = (0..record.num_channels())
        .map(|i| output_signal(record, i, samples_per_record))
        .collect::<Vec<_>>();
    let num_samples = record.num_samples();
    let num_records = num_samples.div_ceil(samples_per_record);

    let file = File::create(path)?;
    let mut writer = BufWriter::with_capacity(65536, file);

    write_header(&mut writer, record.start, &signals, num_records)?;

    let mut annotation = vec![0u8; ANNOTATION_SAMPLES * 2];
    for r in 0..num_records {
        for (i, signal) in signals.iter().enumerate() {
            let channel = record.channel(i);
            for k in 0..samples_per_record {
                let index = r * samples_per_record + k;
                let value = if index < num_samples { channel[index] } else { 0.0 };
                writer.write_i16::<LittleEndian>(quantize(signal, value))?;
            }
        }
        fill_annotation_block(&mut annotation, r);
        writer.write_all(&annotation)?;
    }

    writer.flush()
}

fn output_signal(record: &MergedRecord, index: usize, samples_per_record: usize) -> OutputSignal {
    let calibration = record.calibration.get(index);

    let digital_min = calibration
        .digital_min
        .unwrap_or(DEFAULT_DIGITAL_MIN)
        .max(DEFAULT_DIGITAL_MIN);
    let digital_max = calibration
        .digital_max
        .unwrap_or(DEFAULT_DIGITAL_MAX)
        .min(DEFAULT_DIGITAL_MAX);

    let (data_min, data_max) = record
        .channel(index)
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    // physical bounds only describe the data together with digital ones
    let (mut physical_min, mut physical_max) = match calibration.scale() {
        Some(_) => (
            calibration.physical_min.unwrap_or(data_min),
            calibration.physical_max.unwrap_or(data_max),
        ),
        None => (data_min, data_max),
    };
    if !physical_min.is_finite() || !physical_max.is_finite() {
        // empty channel
        physical_min = -1.0;
        physical_max = 1.0;
    }
    physical_min = physical_min.clamp(PHYSICAL_LIMITS.0, PHYSICAL_LIMITS.1);
    physical_max = physical_max.clamp(PHYSICAL_LIMITS.0, PHYSICAL_LIMITS.1);
    if physical_max <= physical_min {
        physical_min = (physical_min - 1.0).max(PHYSICAL_LIMITS.0);
        physical_max = (physical_max + 1.0).min(PHYSICAL_LIMITS.1);
    }

    // Scale with the values as they will be stored in the header
    let physical_min_text = fit_number(physical_min, 8);
    let physical_max_text = fit_number(physical_max, 8);
    let stored = Calibration {
        physical_min: physical_min_text.parse().ok(),
        physical_max: physical_max_text.parse().ok(),
        digital_min: Some(digital_min),
        digital_max: Some(digital_max),
    };
    let (gain, offset) = stored.scale().unwrap_or((1.0, 0.0));

    OutputSignal {
        header: SignalHeader {
            label: record.names[index].as_str().to_string(),
            transducer: "none".to_string(),
            physical_dimension: record.units[index].clone(),
            calibration: stored,
            prefilter: PREFILTER.to_string(),
            samples_per_record,
        },
        gain,
        offset,
    }
}

fn quantize(signal: &OutputSignal, value: f64) -> i16 {
    let dmin = signal.header.calibration.digital_min.unwrap_or(DEFAULT_DIGITAL_MIN) as f64;
    let dmax = signal.header.calibration.digital_max.unwrap_or(DEFAULT_DIGITAL_MAX) as f64;
    let digital = ((value - signal.offset) / signal.gain).round();
    if digital.is_nan() {
        return 0;
    }
    digital.clamp(dmin, dmax) as i16
}

fn write_header<W: Write>(
    writer: &mut W,
    start: Option<NaiveDateTime>,
    signals: &[OutputSignal],
    num_records: usize,
) -> io::Result<()> {
    let ns = signals.len() + 1;
    let header_bytes = 256 + ns * 256;

    let (start_date, start_time, recording) = match start {
        Some(start) => (
            start.format("%d.%m.%y").to_string(),
            start.format("%H.%M.%S").to_string(),
            format!(
                "Startdate {} X X {} {}",
                start.format("%d-%b-%Y").to_string().to_uppercase(),
                EQUIPMENT,
                RECORDING_ADDITIONAL
            ),
        ),
        None => (
            "01.01.85".to_string(),
            "00.00.00".to_string(),
            format!("Startdate X X X {} {}", EQUIPMENT, RECORDING_ADDITIONAL),
        ),
    };

    write_field(writer, "0", 8)?;
    write_field(writer, "X X X X", 80)?;
    write_field(writer, &recording, 80)?;
    write_field(writer, &start_date, 8)?;
    write_field(writer, &start_time, 8)?;
    write_field(writer, &header_bytes.to_string(), 8)?;
    write_field(writer, "EDF+C", 44)?;
    write_field(writer, &num_records.to_string(), 8)?;
    write_field(writer, &fit_number(RECORD_DURATION, 8), 8)?;
    write_field(writer, &ns.to_string(), 4)?;

    // Signal headers are stored field by field
    let annotation = SignalHeader {
        label: ANNOTATION_LABEL.to_string(),
        transducer: String::new(),
        physical_dimension: String::new(),
        calibration: Calibration {
            physical_min: Some(-1.0),
            physical_max: Some(1.0),
            digital_min: Some(DEFAULT_DIGITAL_MIN),
            digital_max: Some(DEFAULT_DIGITAL_MAX),
        },
        prefilter: String::new(),
        samples_per_record: ANNOTATION_SAMPLES,
    };
    let headers: Vec<&SignalHeader> = signals
        .iter()
        .map(|s| &s.header)
        .chain(std::iter::once(&annotation))
        .collect();

    let number = |v: Option<f64>| v.map(|v| fit_number(v, 8)).unwrap_or_default();
    let integer = |v: Option<i32>| v.map(|v| v.to_string()).unwrap_or_default();

    for h in &headers {
        write_field(writer, &h.label, 16)?;
    }
    for h in &headers {
        write_field(writer, &h.transducer, 80)?;
    }
    for h in &headers {
        write_field(writer, &h.physical_dimension, 8)?;
    }
    for h in &headers {
        write_field(writer, &number(h.calibration.physical_min), 8)?;
    }
    for h in &headers {
        write_field(writer, &number(h.calibration.physical_max), 8)?;
    }
    for h in &headers {
        write_field(writer, &integer(h.calibration.digital_min), 8)?;
    }
    for h in &headers {
        write_field(writer, &integer(h.calibration.digital_max), 8)?;
    }
    for h in &headers {
        write_field(writer, &h.prefilter, 80)?;
    }
    for h in &headers {
        write_field(writer, &h.samples_per_record.to_string(), 8)?;
    }
    for _ in &headers {
        write_field(writer, "", 32)?;
    }

    Ok(())
}

/// Writes `value` left-aligned and space-padded, cut to `width` bytes.
fn write_field<W: Write>(writer: &mut W, value: &str, width: usize) -> io::Result<()> {
    let mut bytes: Vec<u8> = value
        .chars()
        .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
        .take(width)
        .collect();
    bytes.resize(width, b' ');
    writer.write_all(&bytes)
}

/// Renders a number in at most `width` characters, dropping decimals as needed.
pub(crate) fn fit_number(value: f64, width: usize) -> String {
    let plain = format!("{}", value);
    if plain.len() <= width {
        return plain;
    }
    for precision in (0..width).rev() {
        let text = format!("{:.*}", precision, value);
        if text.len() <= width {
            return text;
        }
    }
    format!("{:.0}", value)
}

/// Timekeeping TAL for record `r`, plus the start marker in the first record.
fn fill_annotation_block(block: &mut [u8], r: usize) {
    block.iter_mut().for_each(|b| *b = 0);
    let onset = fit_number(r as f64 * RECORD_DURATION, 16);
    let mut tal = format!("+{}\x14\x14\0", onset).into_bytes();
    if r == 0 {
        tal.extend_from_slice(b"+0\x14signal_start\x14\0");
    }
    let n = tal.len().min(block.len());
    block[..n].copy_from_slice(&tal[..n]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelName;
    use crate::reader::{read_header_only, read_signals};
    use chrono::NaiveDate;
    use ndarray::array;

    fn record() -> MergedRecord {
        let mut calibration = CalibrationArrays::default();
        calibration.push(Calibration {
            physical_min: Some(-1976.0),
            physical_max: Some(1976.0),
            digital_min: Some(-32767),
            digital_max: Some(32767),
        });
        calibration.push(Calibration::default());
        MergedRecord {
            names: vec![ChannelName::EegL, ChannelName::Batt],
            units: vec!["uV".to_string(), "V".to_string()],
            calibration,
            data: array![[0.0, 10.0, -10.0, 1976.0, -1976.0], [3.9, 3.9, 3.8, 3.8, 3.7]],
            sample_rate: 4.0,
            start: NaiveDate::from_ymd_opt(2023, 5, 1)
                .unwrap()
                .and_hms_opt(22, 30, 0),
        }
    }

    #[test]
    fn test_fit_number() {
        assert_eq!(fit_number(1976.0, 8), "1976");
        assert_eq!(fit_number(-1976.0, 8), "-1976");
        assert_eq!(fit_number(3.14159265358, 8), "3.141593");
        assert_eq!(fit_number(-0.000123456789, 8), "-0.00012");
    }

    #[test]
    fn test_annotation_block() {
        let mut block = vec![0u8; ANNOTATION_SAMPLES * 2];
        fill_annotation_block(&mut block, 0);
        assert!(block.starts_with(b"+0\x14\x14\0+0\x14signal_start\x14\0"));
        fill_annotation_block(&mut block, 3);
        assert!(block.starts_with(b"+3\x14\x14\0\0"));
    }

    #[test]
    fn test_written_file_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("merged.edf");
        write_merged(&record(), &path).unwrap();

        let header = read_header_only(&path).unwrap();
        assert_eq!(header.reserved, "EDF+C");
        assert_eq!(header.signals.len(), 3);
        assert_eq!(header.signals[2].label, "EDF Annotations");
        // 5 samples at 4 Hz need two one-second records
        assert_eq!(header.num_records, 2);
        assert!(header.recording.contains("Hypnodyne_zmax"));

        let channels = read_signals(&path).unwrap();
        assert_eq!(channels.len(), 2);
        let eeg = &channels[0];
        assert_eq!(eeg.name, ChannelName::EegL);
        assert_eq!(eeg.unit, "uV");
        assert_eq!(eeg.sample_rate, 4.0);
        assert_eq!(eeg.calibration.digital_max, Some(32767));
        assert_eq!(eeg.start, record().start);
        assert_eq!(eeg.num_samples(), 8);
        let step = 1976.0 / 32767.0;
        for (read, expected) in eeg.samples.iter().zip([0.0, 10.0, -10.0, 1976.0, -1976.0]) {
            assert!((read - expected).abs() <= step);
        }
        // padding of the partial record
        assert!(eeg.samples.iter().skip(5).all(|v| v.abs() <= step));

        let batt = &channels[1];
        assert_eq!(batt.calibration.physical_min, Some(3.7));
        assert_eq!(batt.calibration.physical_max, Some(3.9));
        assert!((batt.samples[0] - 3.9).abs() < 1e-4);
        assert!((batt.samples[4] - 3.7).abs() < 1e-4);
    }

    #[test]
    fn test_unscaled_channel_uses_data_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("light.edf");
        let mut calibration = CalibrationArrays::default();
        calibration.push(Calibration {
            physical_min: Some(-100.0),
            physical_max: Some(100.0),
            digital_min: None,
            digital_max: None,
        });
        let light = MergedRecord {
            names: vec![ChannelName::Light],
            units: vec![String::new()],
            calibration,
            data: array![[1000.0, -2000.0, 5000.0, 7.0]],
            sample_rate: 4.0,
            start: None,
        };
        write_merged(&light, &path).unwrap();

        let channels = read_signals(&path).unwrap();
        assert_eq!(channels[0].calibration.physical_min, Some(-2000.0));
        assert_eq!(channels[0].calibration.physical_max, Some(5000.0));
        let step = 7000.0 / 65535.0;
        for (read, expected) in channels[0].samples.iter().zip([1000.0, -2000.0, 5000.0, 7.0]) {
            assert!((read - expected).abs() <= step);
        }
    }

    #[test]
    fn test_huge_values_fit_header_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.edf");
        let mut calibration = CalibrationArrays::default();
        calibration.push(Calibration::default());
        let huge = MergedRecord {
            names: vec![ChannelName::Dx],
            units: vec!["g".to_string()],
            calibration,
            data: array![[2.0e9, -5.0e8, 0.0, 1.0e6]],
            sample_rate: 4.0,
            start: None,
        };
        write_merged(&huge, &path).unwrap();

        let channels = read_signals(&path).unwrap();
        let dx = &channels[0];
        assert_eq!(dx.calibration.physical_min, Some(-9_999_999.0));
        assert_eq!(dx.calibration.physical_max, Some(99_999_999.0));
        // out-of-range values saturate at the stored bounds
        let step = (99_999_999.0 + 9_999_999.0) / 65535.0;
        assert!((dx.samples[0] - 99_999_999.0).abs() <= step);
        assert!((dx.samples[1] + 9_999_999.0).abs() <= step);
        assert!(dx.samples[2].abs() <= step);
        assert!((dx.samples[3] - 1.0e6).abs() <= step);
    }

    #[test]
    fn test_zero_rate_is_write_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut bad = record();
        bad.sample_rate = 0.1;
        let err = write_merged(&bad, dir.path().join("bad.edf")).unwrap_err();
        assert!(matches!(err, CodecError::WriteFailure { .. }));
    }
}
