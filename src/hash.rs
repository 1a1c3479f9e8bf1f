//! Content hashes for provenance and duplicate detection.
//!
//! File hashes cover the bytes of a file. Signal hashes cover the sample
//! matrix only, so two files that differ just in header metadata share a
//! signal hash.

use ndarray::ArrayView1;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::types::{Channel, MergeError, MergedRecord, Result};

/// Default read size when streaming a file into the hasher
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Ledger marker for a hash that could not be computed
pub const HASH_SENTINEL: &str = "NA";

/// SHA-256 of a file, streamed in `chunk_size` pieces, as lowercase hex.
///
/// The digest depends only on the bytes, never on the chunk size.
pub fn file_hash<P: AsRef<Path>>(file_path: P, chunk_size: usize) -> Result<String> {
    let path = file_path.as_ref();
    let unavailable = |e: std::io::Error| MergeError::HashUnavailable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let file = File::open(path).map_err(unavailable)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; chunk_size.max(1)];

    loop {
        let n = reader.read(&mut buf).map_err(unavailable)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// SHA-256 over sample rows, channel-major.
///
/// Each row is prefixed with its length so that moving a sample from one
/// row to the next changes the digest. Samples are hashed as little-endian
/// f64.
pub fn signal_hash<'a, I>(rows: I) -> String
where
    I: IntoIterator<Item = ArrayView1<'a, f64>>,
{
    let mut hasher = Sha256::new();
    for row in rows {
        hasher.update((row.len() as u64).to_le_bytes());
        for sample in row.iter() {
            hasher.update(sample.to_le_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}

/// Signal hash of channels as read, before any alignment.
pub fn channels_signal_hash(channels: &[Channel]) -> String {
    signal_hash(channels.iter().map(|c| c.samples.view()))
}

/// Signal hash of a merged record.
pub fn record_signal_hash(record: &MergedRecord) -> String {
    signal_hash(record.data.outer_iter())
}

/// Turns a hash result into its ledger value, logging the failure.
pub fn or_sentinel(result: Result<String>) -> Option<String> {
    match result {
        Ok(hash) => Some(hash),
        Err(e) => {
            tracing::warn!("{}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};

    #[test]
    fn test_file_hash_independent_of_chunk_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let bytes: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &bytes).unwrap();

        let reference = file_hash(&path, DEFAULT_CHUNK_SIZE).unwrap();
        assert_eq!(file_hash(&path, DEFAULT_CHUNK_SIZE).unwrap(), reference);
        for chunk in [1, 7, 4096, 1 << 20] {
            assert_eq!(file_hash(&path, chunk).unwrap(), reference);
        }
        assert_eq!(reference, format!("{:x}", Sha256::digest(&bytes)));
    }

    #[test]
    fn test_empty_file_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();
        assert_eq!(
            file_hash(&path, 16).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_missing_file_is_unavailable() {
        let err = file_hash("/definitely/not/here.edf", 16).unwrap_err();
        assert!(matches!(err, MergeError::HashUnavailable { .. }));
        assert_eq!(or_sentinel(Err(err)), None);
    }

    #[test]
    fn test_signal_hash_tracks_content() {
        let a = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let same = a.clone();
        let changed = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.5]];
        let dropped = array![[1.0, 2.0, 3.0]];

        let hash = signal_hash(a.outer_iter());
        assert_eq!(hash, signal_hash(same.outer_iter()));
        assert_ne!(hash, signal_hash(changed.outer_iter()));
        assert_ne!(hash, signal_hash(dropped.outer_iter()));
    }

    #[test]
    fn test_signal_hash_sees_row_boundaries() {
        let left = [Array1::from(vec![1.0, 2.0]), Array1::from(vec![3.0])];
        let right = [Array1::from(vec![1.0]), Array1::from(vec![2.0, 3.0])];
        assert_ne!(
            signal_hash(left.iter().map(|r| r.view())),
            signal_hash(right.iter().map(|r| r.view()))
        );
    }
}
