use ndarray::s;
use std::error::Error;
use zmax_merge::{load_channel, merge_session, ChannelName, Config, DropProfile};

fn main() -> Result<(), Box<dyn Error>> {
    let session = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "data/subject1/night1".to_string());

    // Load a single channel file
    let eeg = load_channel(format!("{}/EEG L.edf", session))?;
    println!("Channel: {} ({})", eeg.name, eeg.unit);
    println!("Sample rate: {} Hz", eeg.sample_rate);
    println!("Duration: {:.1} seconds", eeg.duration());
    if let Some(start) = eeg.start {
        println!("Recording start: {}", start);
    }

    // Merge the whole session, dropping the raw optical channels
    let config = Config {
        drop_profile: DropProfile::Lite,
        ..Config::default()
    };
    let record = merge_session(&session, &config)?;

    println!(
        "\nMerged record: {} channels x {} samples at {} Hz",
        record.num_channels(),
        record.num_samples(),
        record.sample_rate
    );

    for (i, name) in record.names.iter().enumerate() {
        let cal = record.calibration.get(i);
        println!(
            "  {}: {} [{}], physical {:?}..{:?}",
            i, name, record.units[i], cal.physical_min, cal.physical_max
        );
    }

    if let Some(i) = record.position(ChannelName::Batt) {
        if let Some(last) = record.channel(i).iter().last() {
            println!("\nBattery: {:.2} V at the end", last);
        }
    }

    // Show first few samples of the first channel
    if record.num_samples() > 0 {
        let first = record.data.slice(s![0, ..]);
        let num_samples = std::cmp::min(5, record.num_samples());
        println!("\n{} (first {} samples):", record.names[0], num_samples);
        for i in 0..num_samples {
            println!("    {}: {}", i, first[i]);
        }
    }

    Ok(())
}
