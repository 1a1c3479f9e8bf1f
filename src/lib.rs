pub mod align;
pub mod battery;
pub mod channels;
pub mod config;
pub mod dedup;
pub mod discovery;
pub mod hash;
pub mod ledger;
pub mod merge;
pub mod pipeline;
mod reader;
pub mod tools;
pub mod types;
mod writer;

use std::path::Path;

// Re-export types
pub use channels::{ChannelName, DropProfile, Vocabulary};
pub use config::Config;
pub use ledger::{BatteryQuality, Ledger, LedgerRow, SessionStatus};
pub use pipeline::{merge_session, process_session, run_batch, BatchReport};
pub use types::*;

/// Loads one per-channel EDF file
///
/// # Examples
///
/// ```no_run
/// use zmax_merge::load_channel;
///
/// let result = load_channel("night1/EEG L.edf");
/// match result {
///     Ok(channel) => println!("{}: {} samples at {} Hz", channel.name, channel.num_samples(), channel.sample_rate),
///     Err(e) => println!("Error loading file: {}", e),
/// }
/// ```
pub fn load_channel<P: AsRef<Path>>(file_path: P) -> std::result::Result<Channel, CodecError> {
    reader::read_channel(file_path)
}

/// Loads every known channel of a multi-channel EDF file, such as a merged output
pub fn load_merged<P: AsRef<Path>>(file_path: P) -> std::result::Result<Vec<Channel>, CodecError> {
    reader::read_signals(file_path)
}

/// Reads only the header of an EDF file
pub fn load_header<P: AsRef<Path>>(file_path: P) -> std::result::Result<EdfHeader, CodecError> {
    reader::read_header_only(file_path)
}

/// Writes a merged record as one EDF+ file
///
/// # Examples
///
/// ```no_run
/// use zmax_merge::{merge_session, save_merged, Config};
///
/// let record = merge_session("night1", &Config::default()).unwrap();
/// save_merged(&record, "night1_merged.edf").unwrap();
/// ```
pub fn save_merged<P: AsRef<Path>>(
    record: &MergedRecord,
    file_path: P,
) -> std::result::Result<(), CodecError> {
    writer::write_merged(record, file_path)
}

/// Writes one channel as its own EDF+ file, in the layout the device uses
pub fn save_channel<P: AsRef<Path>>(
    channel: &Channel,
    file_path: P,
) -> std::result::Result<(), CodecError> {
    writer::write_channel(channel, file_path)
}
