use crate::channels::ChannelName;
use crate::config::BatteryConfig;
use crate::ledger::BatteryQuality;
use crate::types::Channel;

/// Grades the battery from the mean of the last `window_seconds` of `BATT`.
///
/// `Unknown` when no `BATT` channel was read or it holds no samples.
pub fn battery_quality(channels: &[Channel], config: &BatteryConfig) -> BatteryQuality {
    let Some(batt) = channels.iter().find(|c| c.name == ChannelName::Batt) else {
        return BatteryQuality::Unknown;
    };
    let n = batt.num_samples();
    if n == 0 {
        return BatteryQuality::Unknown;
    }

    let window = ((config.window_seconds * batt.sample_rate).round() as usize).clamp(1, n);
    let tail = batt.samples.slice(ndarray::s![n - window..]);
    let Some(mean) = tail.mean() else {
        return BatteryQuality::Unknown;
    };

    if !mean.is_finite() {
        BatteryQuality::Unknown
    } else if mean >= config.low_volts {
        BatteryQuality::Ok
    } else if mean >= config.depleted_volts {
        BatteryQuality::Low
    } else {
        BatteryQuality::Depleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Calibration;
    use ndarray::Array1;
    use std::path::PathBuf;

    fn batt(samples: Vec<f64>) -> Channel {
        Channel {
            name: ChannelName::Batt,
            label: "BATT".to_string(),
            sample_rate: 1.0,
            calibration: Calibration::default(),
            unit: "V".to_string(),
            start: None,
            samples: Array1::from(samples),
            source: PathBuf::from("BATT.edf"),
        }
    }

    #[test]
    fn test_grades() {
        let config = BatteryConfig::default();
        assert_eq!(battery_quality(&[batt(vec![4.0; 120])], &config), BatteryQuality::Ok);
        assert_eq!(battery_quality(&[batt(vec![3.5; 120])], &config), BatteryQuality::Low);
        assert_eq!(
            battery_quality(&[batt(vec![3.1; 120])], &config),
            BatteryQuality::Depleted
        );
    }

    #[test]
    fn test_only_the_tail_counts() {
        // full for the first minute, empty in the last one
        let mut samples = vec![4.1; 60];
        samples.extend(vec![3.0; 60]);
        assert_eq!(
            battery_quality(&[batt(samples)], &BatteryConfig::default()),
            BatteryQuality::Depleted
        );
    }

    #[test]
    fn test_unknown_without_battery() {
        let config = BatteryConfig::default();
        assert_eq!(battery_quality(&[], &config), BatteryQuality::Unknown);
        assert_eq!(battery_quality(&[batt(Vec::new())], &config), BatteryQuality::Unknown);
    }
}
