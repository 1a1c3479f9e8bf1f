//! Channel and session discovery.
//!
//! Read-only filesystem probes: which channel files a session folder
//! holds, which of them are read, and which folders below a root are
//! sessions at all.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::channels::{ChannelName, DropProfile};
use crate::types::{MergeError, Result};

/// File whose presence marks a folder as a zmax session.
pub const SESSION_MARKER: &str = "EEG L.edf";

/// Channels found in a session folder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredChannels {
    /// Vocabulary channels with a source file, in vocabulary order
    pub available: Vec<ChannelName>,
    /// Available channels not dropped by the profile, in vocabulary order
    pub to_read: Vec<ChannelName>,
}

impl DiscoveredChannels {
    pub fn is_empty(&self) -> bool {
        self.to_read.is_empty()
    }
}

/// Vocabulary channels whose file exists in `dir`, preserving vocabulary order.
pub fn available_channels(dir: &Path, vocabulary: &[ChannelName]) -> Vec<ChannelName> {
    vocabulary
        .iter()
        .copied()
        .filter(|name| dir.join(name.file_name()).is_file())
        .collect()
}

/// Available channels minus those the profile drops.
pub fn channels_to_read(available: &[ChannelName], profile: DropProfile) -> Vec<ChannelName> {
    available
        .iter()
        .copied()
        .filter(|name| !profile.drops(*name))
        .collect()
}

/// Probes `dir` for channel files.
///
/// An empty result is returned as is; the caller decides whether it is fatal.
pub fn discover_channels(
    dir: &Path,
    vocabulary: &[ChannelName],
    profile: DropProfile,
) -> DiscoveredChannels {
    let available = available_channels(dir, vocabulary);
    let to_read = channels_to_read(&available, profile);

    debug!(
        "{}: channels found {:?}, read in {:?}",
        dir.display(),
        available.iter().map(|c| c.as_str()).collect::<Vec<_>>(),
        to_read.iter().map(|c| c.as_str()).collect::<Vec<_>>()
    );

    DiscoveredChannels { available, to_read }
}

/// Folders below `root` holding a session marker file, sorted by path.
///
/// Unreadable entries are logged and skipped.
pub fn find_sessions(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(MergeError::Config(format!(
            "'{}' is not a directory",
            root.display()
        )));
    }

    let mut sessions = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("skipping unreadable entry: {}", e);
                continue;
            }
        };
        if entry.file_type().is_file() && entry.file_name() == SESSION_MARKER {
            if let Some(parent) = entry.path().parent() {
                sessions.push(parent.to_path_buf());
            }
        }
    }

    sessions.sort();
    sessions.dedup();
    Ok(sessions)
}
