//! External sort: sample, partition into sorted runs, merge.
//!
//! The input stream is cut into contiguous runs sized from a sampled
//! estimate of per-record serialized length (so a run fits the `ram_cap`
//! byte budget), each run is sorted in memory and materialized, and the
//! runs are merged back into one stream. A single-run sort never touches
//! the merge phase; a multi-run sort always ends serialized on disk.

use crate::efile::{Comparator, EFile, Settings};
use crate::error::Result;
use crate::lookahead::Lookahead;
use crate::merge::MergeIter;
use log::debug;
use rayon::prelude::*;
use std::fmt;

/// Runs at or above this length are sorted with Rayon.
const PAR_SORT_THRESHOLD: usize = 10_000;

/// Statistics from an external sort.
#[derive(Debug, Default, Clone)]
pub struct SortStats {
    /// Total records sorted.
    pub records: usize,
    /// Number of sorted runs produced.
    pub runs: usize,
    /// Run size used, after sampling or override.
    pub estimated_cap: usize,
    /// Whether the sort went through the multi-run merge phase.
    pub spilled: bool,
}

impl fmt::Display for SortStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Records: {}, Runs: {}, Cap: {}, Spilled: {}",
            self.records,
            self.runs,
            self.estimated_cap,
            if self.spilled { "yes" } else { "no" }
        )
    }
}

/// Sort `input` under `cmp`.
///
/// `cap` overrides the run size and disables sampling. `on_disk` forces
/// the result (and every run) onto disk; otherwise runs and result take
/// the smallest sufficient materialization. An empty input is returned
/// unchanged. The input cursor is closed and intermediate runs are
/// destructed on completion and on failure.
pub(crate) fn external_sort<T: Clone + Send + 'static>(
    input: EFile<T>,
    cmp: Comparator<T>,
    cap: Option<usize>,
    on_disk: bool,
) -> Result<(EFile<T>, SortStats)> {
    let mut stats = SortStats::default();
    if input.is_empty()? {
        return Ok((input, stats));
    }
    let settings = input.settings().clone();
    let spill_runs = on_disk || settings.always_on_disk || input.is_on_disk();
    let mut cursor = input.records()?;

    stats.estimated_cap = match cap {
        Some(c) => c.max(1),
        None if settings.do_sampling => estimate_cap(&mut cursor, &settings)?,
        None => settings.cap.max(1),
    };
    debug!(
        "external sort: cap {} records, spill runs: {}",
        stats.estimated_cap, spill_runs
    );

    let mut runs: Vec<EFile<T>> = Vec::new();
    let outcome = build_and_merge(
        &mut cursor,
        &settings,
        &cmp,
        spill_runs,
        &mut runs,
        &mut stats,
    );
    cursor.close();
    match outcome {
        Ok(sorted) => {
            for run in &mut runs {
                run.destruct();
            }
            Ok((sorted, stats))
        }
        Err(e) => {
            for run in &mut runs {
                run.destruct();
            }
            Err(e)
        }
    }
}

/// Derive the run cap from a non-destructive sample of serialized record
/// lengths: `cap * avg_size <= ram_cap`, clamped to at least 1.
fn estimate_cap<T: Clone>(cursor: &mut Lookahead<T>, settings: &Settings<T>) -> Result<usize> {
    let sample = cursor.lookahead(settings.sampling_sz)?;
    let avg = if sample.is_empty() {
        settings.ave_sz.max(1)
    } else {
        let total: usize = sample
            .iter()
            .map(|record| settings.serializer.record_line(record).len() + 1)
            .sum();
        (total / sample.len()).max(1)
    };
    Ok((settings.ram_cap / avg).max(1))
}

fn build_and_merge<T: Clone + Send + 'static>(
    cursor: &mut Lookahead<T>,
    settings: &Settings<T>,
    cmp: &Comparator<T>,
    spill_runs: bool,
    runs: &mut Vec<EFile<T>>,
    stats: &mut SortStats,
) -> Result<EFile<T>> {
    loop {
        let mut batch: Vec<T> = Vec::with_capacity(stats.estimated_cap.min(1 << 16));
        while batch.len() < stats.estimated_cap {
            match cursor.next() {
                Some(record) => batch.push(record?),
                None => break,
            }
        }
        if batch.is_empty() {
            break;
        }
        stats.records += batch.len();
        sort_run(&mut batch, cmp);
        let run = EFile::transient(batch.into_iter().map(Ok), settings.clone());
        let run = if spill_runs {
            run.serialized(None)?
        } else {
            run.stored()?
        };
        runs.push(run);
    }
    stats.runs = runs.len();

    if runs.len() == 1 {
        // A single sorted run is the whole answer; skip the merge and
        // leave it out of the destruct list.
        if let Some(run) = runs.pop() {
            return Ok(run);
        }
    }
    stats.spilled = true;
    debug!("merging {} sorted runs", runs.len());
    let mut cursors = Vec::with_capacity(runs.len());
    for run in runs.iter() {
        cursors.push(run.records()?);
    }
    let merged = MergeIter::new(cursors, cmp.clone())?;
    EFile::transient(merged, settings.clone()).serialized(None)
}

/// Sort one in-memory run, in parallel above the threshold.
fn sort_run<T: Send>(batch: &mut [T], cmp: &Comparator<T>) {
    let cmp = &**cmp;
    if batch.len() >= PAR_SORT_THRESHOLD {
        batch.par_sort_by(|a, b| cmp(a, b));
    } else {
        batch.sort_by(|a, b| cmp(a, b));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::int_codec;
    use crate::error::Result;
    use std::sync::Arc;

    fn int_settings() -> Settings<i64> {
        Settings::from_codec(int_codec())
    }

    fn natural() -> Comparator<i64> {
        Arc::new(|a: &i64, b: &i64| a.cmp(b))
    }

    fn transient_of(values: &[i64], settings: Settings<i64>) -> EFile<i64> {
        EFile::transient(values.to_vec().into_iter().map(Ok), settings)
    }

    fn collect(efile: &EFile<i64>) -> Vec<i64> {
        efile.records().unwrap().collect::<Result<_>>().unwrap()
    }

    #[test]
    fn test_single_run_stays_small() {
        let input = transient_of(&[3, 1, 2], int_settings().with_card_cap(10));
        let (sorted, stats) = external_sort(input, natural(), None, false).unwrap();
        assert_eq!(stats.runs, 1);
        assert!(!stats.spilled);
        let stored = sorted.stored().unwrap();
        assert!(stored.is_in_memory());
        assert_eq!(collect(&stored), vec![1, 2, 3]);
    }

    #[test]
    fn test_multi_run_ends_on_disk() {
        let settings = int_settings().with_sampling(false, 30).with_card_cap(3);
        let input = transient_of(&[5, 4, 3, 2, 1], settings);
        let (sorted, stats) = external_sort(input, natural(), Some(2), false).unwrap();
        assert_eq!(stats.runs, 3);
        assert!(stats.spilled);
        assert!(sorted.is_on_disk());
        assert_eq!(collect(&sorted), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_empty_input_untouched() {
        let input = transient_of(&[], int_settings());
        let (sorted, stats) = external_sort(input, natural(), None, false).unwrap();
        assert_eq!(stats.records, 0);
        assert!(sorted.is_transient());
        assert!(sorted.is_empty().unwrap());
    }

    #[test]
    fn test_cap_override_clamped() {
        let input = transient_of(&[2, 1], int_settings());
        let (sorted, stats) = external_sort(input, natural(), Some(0), false).unwrap();
        assert_eq!(stats.estimated_cap, 1);
        assert_eq!(collect(&sorted), vec![1, 2]);
    }

    #[test]
    fn test_sampling_does_not_consume() {
        // Sampling peeks the first records; the sorted output must still
        // contain every input record.
        let values: Vec<i64> = (0..100).rev().collect();
        let input = EFile::transient(
            values.into_iter().map(Ok),
            int_settings().with_sampling(true, 30),
        );
        let (sorted, stats) = external_sort(input, natural(), None, false).unwrap();
        assert_eq!(stats.records, 100);
        let out = collect(&sorted.stored().unwrap());
        assert_eq!(out, (0..100).collect::<Vec<i64>>());
    }

    #[test]
    fn test_on_disk_request_forces_disk() {
        let input = transient_of(&[2, 1, 3], int_settings());
        let (sorted, _) = external_sort(input, natural(), None, true).unwrap();
        assert!(sorted.is_on_disk());
        assert_eq!(collect(&sorted), vec![1, 2, 3]);
    }

    #[test]
    fn test_on_disk_input_stays_on_disk() {
        let disk = EFile::in_memory(vec![9i64, 7, 8], int_settings())
            .serialized(None)
            .unwrap();
        let (sorted, _) = external_sort(disk, natural(), None, false).unwrap();
        assert!(sorted.is_on_disk());
        assert_eq!(collect(&sorted), vec![7, 8, 9]);
    }

    #[test]
    fn test_duplicates_preserved() {
        let input = transient_of(&[3, 1, 3, 1, 2], int_settings());
        let (sorted, _) = external_sort(input, natural(), Some(2), false).unwrap();
        assert_eq!(collect(&sorted), vec![1, 1, 2, 3, 3]);
    }

    #[test]
    fn test_sorted_if_needed_skips_sorted_input() {
        let settings = int_settings();
        let sorted_input = EFile::in_memory(vec![1i64, 2, 3], settings.clone());
        let out = sorted_input.sorted_if_needed().unwrap();
        assert!(out.is_in_memory());
        assert_eq!(collect(&out), vec![1, 2, 3]);

        let unsorted = EFile::in_memory(vec![3i64, 1, 2], settings);
        let out = unsorted.sorted_if_needed().unwrap();
        assert_eq!(collect(&out.stored().unwrap()), vec![1, 2, 3]);
    }

    #[test]
    fn test_sort_idempotent() {
        let settings = int_settings();
        let once = transient_of(&[4, 2, 5, 1, 3], settings.clone())
            .sorted()
            .unwrap()
            .stored()
            .unwrap();
        let twice = transient_of(&[4, 2, 5, 1, 3], settings)
            .sorted()
            .unwrap()
            .sorted()
            .unwrap()
            .stored()
            .unwrap();
        assert!(once.has_same_value_as(&twice, false).unwrap());
    }
}
