//! Duplicate detection over a finished batch ledger.
//!
//! Six independent passes, one per key. Each pass orders the rows with a
//! usable key value, scans forward from every row and links it to the
//! first row that matches. Links are pairwise: a row keeps the first
//! partner it was given in a column.

use tracing::{debug, info};

use crate::hash::HASH_SENTINEL;
use crate::ledger::LedgerRow;

/// Key compared by one duplicate pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupKey {
    /// Reference sample count, within the window
    SampleCount,
    /// Reference sample count, shifted by the fixed offset
    SampleCountOffset,
    OriginalHash,
    ConvertedHash,
    PreSignalHash,
    PostSignalHash,
}

impl DedupKey {
    /// Every key, in the order the passes run.
    pub const ALL: [DedupKey; 6] = [
        DedupKey::SampleCount,
        DedupKey::SampleCountOffset,
        DedupKey::OriginalHash,
        DedupKey::ConvertedHash,
        DedupKey::PreSignalHash,
        DedupKey::PostSignalHash,
    ];

    /// Ledger column that receives this key's cross-reference.
    pub fn column_name(self) -> &'static str {
        match self {
            DedupKey::SampleCount => "dup_sample_count",
            DedupKey::SampleCountOffset => "dup_sample_count_offset",
            DedupKey::OriginalHash => "dup_original_hash",
            DedupKey::ConvertedHash => "dup_converted_hash",
            DedupKey::PreSignalHash => "dup_pre_signal_hash",
            DedupKey::PostSignalHash => "dup_post_signal_hash",
        }
    }

    fn column(self, row: &mut LedgerRow) -> &mut Option<u64> {
        match self {
            DedupKey::SampleCount => &mut row.dup_sample_count,
            DedupKey::SampleCountOffset => &mut row.dup_sample_count_offset,
            DedupKey::OriginalHash => &mut row.dup_original_hash,
            DedupKey::ConvertedHash => &mut row.dup_converted_hash,
            DedupKey::PreSignalHash => &mut row.dup_pre_signal_hash,
            DedupKey::PostSignalHash => &mut row.dup_post_signal_hash,
        }
    }

    fn hash(self, row: &LedgerRow) -> Option<&str> {
        let value = match self {
            DedupKey::OriginalHash => row.original_file_hash.as_deref(),
            DedupKey::ConvertedHash => row.converted_file_hash.as_deref(),
            DedupKey::PreSignalHash => row.pre_signal_hash.as_deref(),
            DedupKey::PostSignalHash => row.post_signal_hash.as_deref(),
            DedupKey::SampleCount | DedupKey::SampleCountOffset => None,
        };
        value.filter(|h| !h.is_empty() && *h != HASH_SENTINEL)
    }
}

/// Sample-count tolerances, in reference samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupSettings {
    /// Largest count difference still taken as the same recording
    pub window_samples: u64,
    /// Systematic count difference of the alternate conversion path
    pub offset_samples: u64,
}

impl DedupSettings {
    pub fn from_seconds(window_seconds: f64, offset_seconds: f64, reference_rate: f64) -> Self {
        let samples = |seconds: f64| (seconds * reference_rate).round().max(0.0) as u64;
        Self {
            window_samples: samples(window_seconds),
            offset_samples: samples(offset_seconds),
        }
    }
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self::from_seconds(5.0, 5.0, 256.0)
    }
}

enum Scan {
    Match,
    Skip,
    Stop,
}

/// Runs all six passes over `rows` and leaves them in sequence order.
///
/// Returns the number of pairs linked across all passes. Rows whose key
/// is missing are left out of that pass.
pub fn detect_duplicates(rows: &mut Vec<LedgerRow>, settings: &DedupSettings) -> usize {
    let mut total = 0;
    for key in DedupKey::ALL {
        let linked = match key {
            DedupKey::SampleCount => {
                let window = settings.window_samples;
                run_pass(rows, key, |r| r.rec_sample_count, |a, b| {
                    if b - a <= window {
                        Scan::Match
                    } else {
                        Scan::Stop
                    }
                })
            }
            DedupKey::SampleCountOffset => {
                let offset = settings.offset_samples;
                run_pass(rows, key, |r| r.rec_sample_count, |a, b| {
                    let target = a.saturating_add(offset);
                    if *b < target {
                        Scan::Skip
                    } else if *b == target {
                        Scan::Match
                    } else {
                        Scan::Stop
                    }
                })
            }
            _ => run_pass(
                rows,
                key,
                |r| key.hash(r).map(str::to_owned),
                |a, b| if a == b { Scan::Match } else { Scan::Stop },
            ),
        };
        debug!("{}: {} pairs", key.column_name(), linked);
        total += linked;
    }

    rows.sort_by_key(|r| r.sequence_number);
    info!("duplicate detection linked {} pairs over {} rows", total, rows.len());
    total
}

fn run_pass<K, F, M>(rows: &mut [LedgerRow], key: DedupKey, value: F, compare: M) -> usize
where
    K: Ord,
    F: Fn(&LedgerRow) -> Option<K>,
    M: Fn(&K, &K) -> Scan,
{
    let mut keyed: Vec<(K, u64, usize)> = rows
        .iter()
        .enumerate()
        .filter_map(|(i, row)| value(row).map(|k| (k, row.sequence_number, i)))
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut linked = 0;
    for a in 0..keyed.len() {
        for b in a + 1..keyed.len() {
            match compare(&keyed[a].0, &keyed[b].0) {
                Scan::Match => {
                    link(rows, key, keyed[a].2, keyed[b].2);
                    linked += 1;
                    break;
                }
                Scan::Skip => continue,
                Scan::Stop => break,
            }
        }
    }
    linked
}

fn link(rows: &mut [LedgerRow], key: DedupKey, a: usize, b: usize) {
    let (seq_a, seq_b) = (rows[a].sequence_number, rows[b].sequence_number);
    let column = key.column(&mut rows[a]);
    if column.is_none() {
        *column = Some(seq_b);
    }
    let column = key.column(&mut rows[b]);
    if column.is_none() {
        *column = Some(seq_a);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(sequence_number: u64) -> LedgerRow {
        LedgerRow {
            sequence_number,
            ..LedgerRow::default()
        }
    }

    fn no_links(row: &LedgerRow) -> bool {
        row.dup_sample_count.is_none()
            && row.dup_sample_count_offset.is_none()
            && row.dup_original_hash.is_none()
            && row.dup_converted_hash.is_none()
            && row.dup_pre_signal_hash.is_none()
            && row.dup_post_signal_hash.is_none()
    }

    #[test]
    fn test_converted_hash_pair() {
        let mut rows: Vec<LedgerRow> = (1..=4).map(row).collect();
        for (r, hash) in rows.iter_mut().zip(["aa", "ff", "cc", "ff"]) {
            r.converted_file_hash = Some(hash.to_string());
        }

        let linked = detect_duplicates(&mut rows, &DedupSettings::default());
        assert_eq!(linked, 1);
        assert_eq!(rows[1].dup_converted_hash, Some(4));
        assert_eq!(rows[3].dup_converted_hash, Some(2));
        assert!(no_links(&rows[0]));
        assert!(no_links(&rows[2]));
        assert_eq!(rows[1].dup_original_hash, None);
    }

    #[test]
    fn test_sample_count_window() {
        let settings = DedupSettings::from_seconds(5.0, 5.0, 256.0);
        assert_eq!(settings.window_samples, 1280);

        let mut rows: Vec<LedgerRow> = (1..=2).map(row).collect();
        rows[0].rec_sample_count = Some(2560);
        rows[1].rec_sample_count = Some(2561);
        detect_duplicates(&mut rows, &settings);
        assert_eq!(rows[0].dup_sample_count, Some(2));
        assert_eq!(rows[1].dup_sample_count, Some(1));

        let mut rows: Vec<LedgerRow> = (1..=2).map(row).collect();
        rows[0].rec_sample_count = Some(1000);
        rows[1].rec_sample_count = Some(3000);
        detect_duplicates(&mut rows, &settings);
        assert!(rows.iter().all(no_links));
    }

    #[test]
    fn test_sample_count_offset() {
        let settings = DedupSettings {
            window_samples: 0,
            offset_samples: 1280,
        };
        let mut rows: Vec<LedgerRow> = (1..=3).map(row).collect();
        rows[0].rec_sample_count = Some(10_000);
        rows[1].rec_sample_count = Some(10_500);
        rows[2].rec_sample_count = Some(11_280);

        detect_duplicates(&mut rows, &settings);
        assert_eq!(rows[0].dup_sample_count_offset, Some(3));
        assert_eq!(rows[2].dup_sample_count_offset, Some(1));
        assert_eq!(rows[1].dup_sample_count_offset, None);
        // window 0 with distinct counts
        assert!(rows.iter().all(|r| r.dup_sample_count.is_none()));
    }

    #[test]
    fn test_missing_keys_are_skipped() {
        let mut rows: Vec<LedgerRow> = (1..=3).map(row).collect();
        rows[0].pre_signal_hash = None;
        rows[1].pre_signal_hash = None;
        rows[2].original_file_hash = Some(HASH_SENTINEL.to_string());
        rows[0].original_file_hash = Some(HASH_SENTINEL.to_string());

        assert_eq!(detect_duplicates(&mut rows, &DedupSettings::default()), 0);
        assert!(rows.iter().all(no_links));
    }

    #[test]
    fn test_pairwise_links_in_cluster() {
        let mut rows: Vec<LedgerRow> = (1..=3).map(row).collect();
        for r in rows.iter_mut() {
            r.post_signal_hash = Some("same".to_string());
        }
        detect_duplicates(&mut rows, &DedupSettings::default());
        assert_eq!(rows[0].dup_post_signal_hash, Some(2));
        assert_eq!(rows[1].dup_post_signal_hash, Some(1));
        assert_eq!(rows[2].dup_post_signal_hash, Some(2));
    }

    #[test]
    fn test_order_restored() {
        let mut rows: Vec<LedgerRow> = [3, 1, 2].into_iter().map(row).collect();
        rows[0].rec_sample_count = Some(1);
        rows[1].rec_sample_count = Some(900);
        rows[2].rec_sample_count = Some(5000);
        detect_duplicates(&mut rows, &DedupSettings::default());
        let order: Vec<u64> = rows.iter().map(|r| r.sequence_number).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert_eq!(rows[0].dup_sample_count, Some(3));
        assert_eq!(rows[2].dup_sample_count, Some(1));
    }
}
