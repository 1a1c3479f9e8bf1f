//! Known channel vocabulary of the zmax headband.
//!
//! The device writes one EDF file per channel, named after the channel
//! (`EEG L.edf`, `BATT.edf`, ...). This module is the single place where
//! those names, their stable merge order, their physical units and the
//! drop profiles are defined.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One channel of the known vocabulary.
///
/// Declaration order is the merge order. Do not reorder variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChannelName {
    Batt,
    BodyTemp,
    Dx,
    Dy,
    Dz,
    EegL,
    EegR,
    Light,
    NasalL,
    NasalR,
    Noise,
    OxyDarkAc,
    OxyDarkDc,
    OxyIrAc,
    OxyIrDc,
    OxyRAc,
    OxyRDc,
    Rssi,
    EegLClean,
    EegRClean,
    EegLFiltered,
    EegRFiltered,
    Bpm,
    BpmIr,
    BpmR,
    Pulse,
    PulseIr,
    PulseR,
}

/// Raw sensor channels as exported by the vendor recorder (vocabulary v1).
const RAW_CHANNELS: [ChannelName; 18] = [
    ChannelName::Batt,
    ChannelName::BodyTemp,
    ChannelName::Dx,
    ChannelName::Dy,
    ChannelName::Dz,
    ChannelName::EegL,
    ChannelName::EegR,
    ChannelName::Light,
    ChannelName::NasalL,
    ChannelName::NasalR,
    ChannelName::Noise,
    ChannelName::OxyDarkAc,
    ChannelName::OxyDarkDc,
    ChannelName::OxyIrAc,
    ChannelName::OxyIrDc,
    ChannelName::OxyRAc,
    ChannelName::OxyRDc,
    ChannelName::Rssi,
];

/// Raw channels plus cleaned EEG and reparsed heart-rate channels (vocabulary v2).
const ALL_CHANNELS: [ChannelName; 28] = [
    ChannelName::Batt,
    ChannelName::BodyTemp,
    ChannelName::Dx,
    ChannelName::Dy,
    ChannelName::Dz,
    ChannelName::EegL,
    ChannelName::EegR,
    ChannelName::Light,
    ChannelName::NasalL,
    ChannelName::NasalR,
    ChannelName::Noise,
    ChannelName::OxyDarkAc,
    ChannelName::OxyDarkDc,
    ChannelName::OxyIrAc,
    ChannelName::OxyIrDc,
    ChannelName::OxyRAc,
    ChannelName::OxyRDc,
    ChannelName::Rssi,
    ChannelName::EegLClean,
    ChannelName::EegRClean,
    ChannelName::EegLFiltered,
    ChannelName::EegRFiltered,
    ChannelName::Bpm,
    ChannelName::BpmIr,
    ChannelName::BpmR,
    ChannelName::Pulse,
    ChannelName::PulseIr,
    ChannelName::PulseR,
];

/// Channels dropped by the lite profile (the zmax lite has no such sensors).
const LITE_DROPS: [ChannelName; 10] = [
    ChannelName::BodyTemp,
    ChannelName::Light,
    ChannelName::NasalL,
    ChannelName::NasalR,
    ChannelName::Noise,
    ChannelName::OxyDarkAc,
    ChannelName::OxyDarkDc,
    ChannelName::OxyRAc,
    ChannelName::OxyRDc,
    ChannelName::Rssi,
];

impl ChannelName {
    /// Label as it appears in file names and EDF signal headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelName::Batt => "BATT",
            ChannelName::BodyTemp => "BODY TEMP",
            ChannelName::Dx => "dX",
            ChannelName::Dy => "dY",
            ChannelName::Dz => "dZ",
            ChannelName::EegL => "EEG L",
            ChannelName::EegR => "EEG R",
            ChannelName::Light => "LIGHT",
            ChannelName::NasalL => "NASAL L",
            ChannelName::NasalR => "NASAL R",
            ChannelName::Noise => "NOISE",
            ChannelName::OxyDarkAc => "OXY_DARK_AC",
            ChannelName::OxyDarkDc => "OXY_DARK_DC",
            ChannelName::OxyIrAc => "OXY_IR_AC",
            ChannelName::OxyIrDc => "OXY_IR_DC",
            ChannelName::OxyRAc => "OXY_R_AC",
            ChannelName::OxyRDc => "OXY_R_DC",
            ChannelName::Rssi => "RSSI",
            ChannelName::EegLClean => "EEG L CLEAN",
            ChannelName::EegRClean => "EEG R CLEAN",
            ChannelName::EegLFiltered => "EEG L FILTERED",
            ChannelName::EegRFiltered => "EEG R FILTERED",
            ChannelName::Bpm => "BPM",
            ChannelName::BpmIr => "BPM IR",
            ChannelName::BpmR => "BPM R",
            ChannelName::Pulse => "PULSE",
            ChannelName::PulseIr => "PULSE IR",
            ChannelName::PulseR => "PULSE R",
        }
    }

    /// Exact, case-sensitive lookup of a label in the full vocabulary.
    pub fn from_label(label: &str) -> Option<ChannelName> {
        ALL_CHANNELS.iter().copied().find(|name| name.as_str() == label)
    }

    /// File name of the single-channel source file for this channel.
    pub fn file_name(&self) -> String {
        format!("{}.edf", self.as_str())
    }

    /// Raw and cleaned EEG variants.
    ///
    /// The vendor files lose their calibration for these, so the merge
    /// forces a fixed range on them.
    pub fn is_eeg_like(&self) -> bool {
        matches!(
            self,
            ChannelName::EegL
                | ChannelName::EegR
                | ChannelName::EegLClean
                | ChannelName::EegRClean
                | ChannelName::EegLFiltered
                | ChannelName::EegRFiltered
        )
    }

    /// Physical unit written to the merged file. Empty for uncalibrated channels.
    pub fn unit(&self) -> &'static str {
        match self {
            ChannelName::Batt => "V",
            ChannelName::BodyTemp => "C",
            ChannelName::Dx | ChannelName::Dy | ChannelName::Dz => "g",
            ChannelName::Bpm | ChannelName::BpmIr | ChannelName::BpmR => "bpm",
            name if name.is_eeg_like() => "uV",
            _ => "",
        }
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical unit for a label that may not belong to the vocabulary.
pub fn unit_for_label(label: &str) -> &'static str {
    ChannelName::from_label(label).map_or("", |name| name.unit())
}

/// Versioned vocabulary. Each version lists its channels in merge order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vocabulary {
    /// Raw sensor channels only
    V1,
    /// Raw, cleaned EEG and reparsed heart-rate channels
    #[default]
    V2,
}

impl Vocabulary {
    pub fn channels(&self) -> &'static [ChannelName] {
        match self {
            Vocabulary::V1 => &RAW_CHANNELS,
            Vocabulary::V2 => &ALL_CHANNELS,
        }
    }
}

/// Which available channels are left out of the merge.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum DropProfile {
    /// Read every available channel
    #[default]
    None,
    /// zmax lite: no temperature, light, nasal, noise, dark/red oximetry or RSSI
    Lite,
    /// Only EEG-like channels
    EegOnly,
    /// EEG-like channels and the battery
    EegBattery,
}

impl DropProfile {
    /// True when `name` is dropped under this profile.
    pub fn drops(&self, name: ChannelName) -> bool {
        match self {
            DropProfile::None => false,
            DropProfile::Lite => LITE_DROPS.contains(&name),
            DropProfile::EegOnly => !name.is_eeg_like(),
            DropProfile::EegBattery => !(name.is_eeg_like() || name == ChannelName::Batt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocabulary_order_is_stable() {
        let v2 = Vocabulary::V2.channels();
        assert_eq!(v2.len(), 28);
        assert_eq!(&v2[..18], Vocabulary::V1.channels());
        assert_eq!(v2[0], ChannelName::Batt);
        assert_eq!(v2[5], ChannelName::EegL);
        // merge order follows declaration order
        assert!(v2.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_labels_round_trip() {
        for name in Vocabulary::V2.channels() {
            assert_eq!(ChannelName::from_label(name.as_str()), Some(*name));
        }
        assert_eq!(ChannelName::from_label("eeg l"), None);
        assert_eq!(ChannelName::EegL.file_name(), "EEG L.edf");
    }

    #[test]
    fn test_units() {
        assert_eq!(ChannelName::Batt.unit(), "V");
        assert_eq!(ChannelName::Dy.unit(), "g");
        assert_eq!(ChannelName::EegRClean.unit(), "uV");
        assert_eq!(ChannelName::BpmIr.unit(), "bpm");
        assert_eq!(ChannelName::OxyIrAc.unit(), "");
        assert_eq!(unit_for_label("SOMETHING ELSE"), "");
    }

    #[test]
    fn test_drop_profiles() {
        assert!(!DropProfile::None.drops(ChannelName::Rssi));
        assert!(DropProfile::Lite.drops(ChannelName::Rssi));
        assert!(!DropProfile::Lite.drops(ChannelName::OxyIrAc));
        assert!(DropProfile::EegOnly.drops(ChannelName::Batt));
        assert!(!DropProfile::EegOnly.drops(ChannelName::EegLFiltered));
        assert!(!DropProfile::EegBattery.drops(ChannelName::Batt));
        assert!(DropProfile::EegBattery.drops(ChannelName::Dx));
    }
}
