use ndarray::Array2;
use tracing::debug;

use crate::types::*;

/// Digital range forced on EEG-like channels
pub const EEG_DIGITAL_RANGE: (i32, i32) = (-32767, 32767);
/// Physical range (uV) forced on EEG-like channels
pub const EEG_PHYSICAL_RANGE: (f64, f64) = (-1976.0, 1976.0);

/// Calibration written for a channel in the merged record.
///
/// EEG-like channels get the fixed range: the per-channel files do not
/// carry a usable one for them. Every other channel keeps what the reader
/// reported, absent bounds included.
pub fn merged_calibration(channel: &Channel) -> Calibration {
    if channel.name.is_eeg_like() {
        return Calibration {
            physical_min: Some(EEG_PHYSICAL_RANGE.0),
            physical_max: Some(EEG_PHYSICAL_RANGE.1),
            digital_min: Some(EEG_DIGITAL_RANGE.0),
            digital_max: Some(EEG_DIGITAL_RANGE.1),
        };
    }
    channel.calibration
}

/// Gain and offset taking a channel's samples into its merged calibration.
///
/// Only an EEG-like channel read without a calibration needs one: its
/// samples are digital counts of the fixed range.
fn count_scale(channel: &Channel) -> Option<(f64, f64)> {
    if channel.name.is_eeg_like() && channel.calibration.scale().is_none() {
        merged_calibration(channel).scale()
    } else {
        None
    }
}

/// Stacks aligned channels into one record, one row per channel.
///
/// Channel order is kept as given; the record takes its sample rate and
/// start from the first channel. Units come from the channel vocabulary,
/// not from the files.
///
/// # Errors
///
/// `AssemblyEmpty` for an empty list, `Misaligned` if a channel's length
/// differs from the first channel's.
pub fn assemble(channels: &[Channel]) -> Result<MergedRecord> {
    let first = channels.first().ok_or(MergeError::AssemblyEmpty)?;
    let expected = first.num_samples();

    if let Some(bad) = channels.iter().find(|c| c.num_samples() != expected) {
        return Err(MergeError::Misaligned {
            channel: bad.name,
            expected,
            actual: bad.num_samples(),
        });
    }

    let scales: Vec<Option<(f64, f64)>> = channels.iter().map(count_scale).collect();
    for (channel, scale) in channels.iter().zip(&scales) {
        if scale.is_some() {
            debug!("{}: scaling digital counts to {:?}", channel.name, EEG_PHYSICAL_RANGE);
        }
    }

    // lengths are checked above, so every index is in bounds
    let data = Array2::from_shape_fn((channels.len(), expected), |(i, j)| {
        let value = channels[i].samples[j];
        match scales[i] {
            Some((gain, offset)) => value * gain + offset,
            None => value,
        }
    });

    let mut calibration = CalibrationArrays::default();
    for channel in channels {
        calibration.push(merged_calibration(channel));
    }

    debug!(
        "assembled {} channels x {} samples at {} Hz",
        channels.len(),
        expected,
        first.sample_rate
    );

    Ok(MergedRecord {
        names: channels.iter().map(|c| c.name).collect(),
        units: channels.iter().map(|c| c.name.unit().to_string()).collect(),
        calibration,
        data,
        sample_rate: first.sample_rate,
        start: first.start,
    })
}
