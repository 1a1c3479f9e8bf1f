use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ndarray::Array1;
use std::path::PathBuf;
use zmax_merge::align::align_channels;
use zmax_merge::hash::record_signal_hash;
use zmax_merge::merge::assemble;
use zmax_merge::{Calibration, Channel, ChannelName};

// Ten minutes of a typical session: EEG at 256 Hz, accelerometer at 128 Hz
const SECONDS: usize = 600;

fn channel(name: ChannelName, rate: f64) -> Channel {
    let n = SECONDS * rate as usize;
    Channel {
        name,
        label: name.as_str().to_string(),
        sample_rate: rate,
        calibration: Calibration::default(),
        unit: name.unit().to_string(),
        start: None,
        samples: Array1::from_iter((0..n).map(|i| (i as f64 * 0.05).sin() * 50.0)),
        source: PathBuf::from(name.file_name()),
    }
}

fn session() -> Vec<Channel> {
    vec![
        channel(ChannelName::EegL, 256.0),
        channel(ChannelName::EegR, 256.0),
        channel(ChannelName::Dx, 128.0),
        channel(ChannelName::Dy, 128.0),
        channel(ChannelName::Dz, 128.0),
    ]
}

pub fn bench_align_and_assemble(c: &mut Criterion) {
    let channels = session();
    c.bench_function("align_assemble_10min", |b| {
        b.iter(|| {
            let (_, aligned) = align_channels(black_box(channels.clone()), None, 0.0).unwrap();
            black_box(assemble(&aligned).unwrap())
        });
    });
}

pub fn bench_signal_hash(c: &mut Criterion) {
    let (_, aligned) = align_channels(session(), None, 0.0).unwrap();
    let record = assemble(&aligned).unwrap();
    c.bench_function("signal_hash_10min", |b| {
        b.iter(|| black_box(record_signal_hash(black_box(&record))));
    });
}

criterion_group!(benches, bench_align_and_assemble, bench_signal_hash);
criterion_main!(benches);
