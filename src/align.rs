//! Channel alignment onto the session reference clock.
//!
//! Channels whose rate differs from the reference are resampled with a
//! fixed-ratio septic polynomial resampler (rubato `FastFixedIn`). The
//! result is then fitted to the reference sample count: missing samples
//! are added at the START (a shorter channel is taken to have started
//! later), surplus samples are cut from the END.

use ndarray::Array1;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::slice;
use tracing::debug;

use crate::types::{Channel, MergeError, Reference, Result};

/// Input frames handed to the resampler per call
const RESAMPLE_CHUNK: usize = 4096;

/// Rates closer than this are treated as equal.
const RATE_TOLERANCE: f64 = 1e-9;

/// Resamples `input` from `from_rate` to `to_rate`.
///
/// The output has exactly `round(len * to_rate / from_rate)` samples. The
/// resampler delay is removed, so output sample `k` sits at time
/// `k / to_rate` like input sample `k` sits at `k / from_rate`.
pub fn resample(input: &[f64], from_rate: f64, to_rate: f64) -> std::result::Result<Vec<f64>, String> {
    if !(from_rate > 0.0 && to_rate > 0.0) {
        return Err(format!("invalid rates {} Hz -> {} Hz", from_rate, to_rate));
    }
    if (from_rate - to_rate).abs() < RATE_TOLERANCE || input.is_empty() {
        return Ok(input.to_vec());
    }

    let ratio = to_rate / from_rate;
    let expected = (input.len() as f64 * ratio).round() as usize;

    let mut resampler =
        FastFixedIn::<f64>::new(ratio, 1.0, PolynomialDegree::Septic, RESAMPLE_CHUNK, 1)
            .map_err(|e| e.to_string())?;
    let delay = resampler.output_delay();
    let needed = expected + delay;

    let mut output = Vec::with_capacity(needed + (RESAMPLE_CHUNK as f64 * ratio) as usize + 1);
    let mut position = 0;
    while output.len() < needed {
        // Past the end of the input the resampler is flushed with zeros
        let frames = resampler.input_frames_next();
        let mut chunk = vec![0.0; frames];
        let end = (position + frames).min(input.len());
        if position < end {
            chunk[..end - position].copy_from_slice(&input[position..end]);
        }
        position = end;

        let processed = resampler
            .process(slice::from_ref(&chunk), None)
            .map_err(|e| e.to_string())?;
        let frames_out = processed.first().map_or(0, |ch| ch.len());
        if frames_out == 0 {
            return Err("resampler produced no output".to_string());
        }
        output.extend_from_slice(&processed[0]);
    }

    output.drain(..delay);
    output.truncate(expected);
    Ok(output)
}

/// Fits `samples` to `count`: left-pads with `pad_value` or cuts the tail.
pub fn fit_to_length(samples: Vec<f64>, count: usize, pad_value: f64) -> Vec<f64> {
    if samples.len() >= count {
        let mut samples = samples;
        samples.truncate(count);
        return samples;
    }
    let mut padded = vec![pad_value; count - samples.len()];
    padded.extend(samples);
    padded
}

/// Brings one channel to the reference rate and count.
///
/// A channel already at the reference rate and count is returned unchanged.
pub fn align_channel(channel: Channel, reference: &Reference, pad_value: f64) -> Result<Channel> {
    let same_rate = (channel.sample_rate - reference.sample_rate).abs() < RATE_TOLERANCE;
    if same_rate && channel.num_samples() == reference.sample_count {
        return Ok(channel);
    }

    let Channel {
        name,
        label,
        sample_rate,
        calibration,
        unit,
        start,
        samples,
        source,
    } = channel;

    let original_count = samples.len();
    let resampled = if same_rate {
        samples.to_vec()
    } else {
        resample(&samples.to_vec(), sample_rate, reference.sample_rate)
            .map_err(|reason| MergeError::ResampleFailure { channel: name, reason })?
    };

    let resampled_count = resampled.len();
    let fitted = fit_to_length(resampled, reference.sample_count, pad_value);

    debug!(
        "{}: {} samples at {} Hz -> {} at {} Hz, {} padded",
        name,
        original_count,
        sample_rate,
        resampled_count,
        reference.sample_rate,
        reference.sample_count.saturating_sub(resampled_count)
    );

    Ok(Channel {
        name,
        label,
        sample_rate: reference.sample_rate,
        calibration,
        unit,
        start,
        samples: Array1::from(fitted),
        source,
    })
}

/// Aligns every channel of a session to the first one.
///
/// The first channel fixes the reference. With `target_rate` set, the first
/// channel is resampled to it beforehand and its new length becomes the
/// reference count.
///
/// # Errors
///
/// `NoReferenceChannel` for an empty list, `ResampleFailure` if any
/// channel cannot be resampled.
pub fn align_channels(
    channels: Vec<Channel>,
    target_rate: Option<f64>,
    pad_value: f64,
) -> Result<(Reference, Vec<Channel>)> {
    let mut channels = channels.into_iter();
    let first = channels
        .next()
        .ok_or_else(|| MergeError::NoReferenceChannel(Default::default()))?;

    let first = match target_rate {
        Some(rate) if (rate - first.sample_rate).abs() >= RATE_TOLERANCE => {
            let resampled = resample(&first.samples.to_vec(), first.sample_rate, rate).map_err(
                |reason| MergeError::ResampleFailure {
                    channel: first.name,
                    reason,
                },
            )?;
            Channel {
                sample_rate: rate,
                samples: Array1::from(resampled),
                ..first
            }
        }
        _ => first,
    };

    let reference = Reference {
        sample_rate: first.sample_rate,
        sample_count: first.num_samples(),
    };

    let mut aligned = Vec::with_capacity(channels.len() + 1);
    aligned.push(first);
    for channel in channels {
        aligned.push(align_channel(channel, &reference, pad_value)?);
    }

    Ok((reference, aligned))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelName;
    use crate::types::Calibration;
    use std::f64::consts::PI;
    use std::path::PathBuf;

    fn channel(name: ChannelName, rate: f64, samples: Vec<f64>) -> Channel {
        Channel {
            name,
            label: name.as_str().to_string(),
            sample_rate: rate,
            calibration: Calibration::default(),
            unit: String::new(),
            start: None,
            samples: Array1::from(samples),
            source: PathBuf::from(name.file_name()),
        }
    }

    fn sine(rate: f64, freq: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| (2.0 * PI * freq * i as f64 / rate).sin()).collect()
    }

    #[test]
    fn test_resample_length() {
        let up = resample(&sine(128.0, 1.0, 475), 128.0, 256.0).unwrap();
        assert_eq!(up.len(), 950);
        let down = resample(&sine(256.0, 1.0, 1000), 256.0, 128.0).unwrap();
        assert_eq!(down.len(), 500);
        let odd = resample(&sine(200.0, 1.0, 333), 200.0, 256.0).unwrap();
        assert_eq!(odd.len(), (333.0_f64 * 256.0 / 200.0).round() as usize);
    }

    #[test]
    fn test_resample_tracks_slow_signal() {
        // 1 Hz sine is far below both Nyquist limits
        let up = resample(&sine(128.0, 1.0, 1280), 128.0, 256.0).unwrap();
        let expected = sine(256.0, 1.0, 2560);
        // ignore edges, where the flush and start-up transients live
        for i in 64..2496 {
            assert!((up[i] - expected[i]).abs() < 0.1, "sample {} off", i);
        }
    }

    #[test]
    fn test_resample_same_rate_is_copy() {
        let input = vec![1.0, 2.0, 3.0];
        assert_eq!(resample(&input, 256.0, 256.0).unwrap(), input);
        assert!(resample(&input, 0.0, 256.0).is_err());
    }

    #[test]
    fn test_fit_to_length() {
        assert_eq!(fit_to_length(vec![1.0, 2.0], 4, 0.0), vec![0.0, 0.0, 1.0, 2.0]);
        assert_eq!(fit_to_length(vec![1.0, 2.0, 3.0], 2, 0.0), vec![1.0, 2.0]);
        assert_eq!(fit_to_length(vec![1.0], 1, 9.0), vec![1.0]);
    }

    #[test]
    fn test_align_is_noop_at_reference() {
        let reference = Reference {
            sample_rate: 256.0,
            sample_count: 4,
        };
        let input = channel(ChannelName::Dx, 256.0, vec![0.1, 0.2, 0.3, 0.4]);
        let out = align_channel(input.clone(), &reference, 0.0).unwrap();
        assert_eq!(out.samples, input.samples);
        assert_eq!(out.sample_rate, 256.0);
    }

    #[test]
    fn test_align_pads_short_channel_at_start() {
        let channels = vec![
            channel(ChannelName::EegL, 256.0, sine(256.0, 2.0, 1000)),
            channel(ChannelName::EegR, 256.0, sine(256.0, 3.0, 1000)),
            channel(ChannelName::Dx, 128.0, sine(128.0, 1.0, 475)),
        ];
        let source = channels[2].samples.to_vec();
        let (reference, aligned) = align_channels(channels, None, -5.0).unwrap();

        assert_eq!(reference.sample_rate, 256.0);
        assert_eq!(reference.sample_count, 1000);
        assert!(aligned.iter().all(|c| c.num_samples() == 1000));

        let dx = &aligned[2];
        assert_eq!(dx.sample_rate, 256.0);
        assert!(dx.samples.iter().take(50).all(|&v| v == -5.0));
        let resampled = resample(&source, 128.0, 256.0).unwrap();
        assert_eq!(dx.samples.slice(ndarray::s![50..]).to_vec(), resampled);
    }

    #[test]
    fn test_align_with_target_rate() {
        let channels = vec![
            channel(ChannelName::EegL, 256.0, sine(256.0, 1.0, 512)),
            channel(ChannelName::Batt, 256.0, vec![3.9; 512]),
        ];
        let (reference, aligned) = align_channels(channels, Some(128.0), 0.0).unwrap();
        assert_eq!(reference.sample_rate, 128.0);
        assert_eq!(reference.sample_count, 256);
        assert!(aligned.iter().all(|c| c.num_samples() == 256 && c.sample_rate == 128.0));
    }

    #[test]
    fn test_no_reference_channel() {
        assert!(matches!(
            align_channels(Vec::new(), None, 0.0),
            Err(MergeError::NoReferenceChannel(_))
        ));
    }
}
