//! Integration tests for synchronized iteration.
//!
//! Tests verify:
//! 1. Pairwise fold emits exactly the visible pairs, in stream order
//! 2. Grouped fold emits one maximal window per experiment record
//! 3. An empty landmark stream yields the zero accumulator
//! 4. Soundness against a brute-force oracle on randomized sorted input
//! 5. Input streams are closed on exhaustion and on early drop

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use synchrony_tracks::codec::{int_codec, RecordStream};
use synchrony_tracks::efile::{EFile, Settings};
use synchrony_tracks::error::Result;
use synchrony_tracks::synchrony::SyncedGroups;

fn is_before(y: &i64, x: &i64) -> bool {
    y < x
}

fn can_see(y: &i64, x: &i64) -> bool {
    (x - y).abs() <= 10
}

#[test]
fn pairwise_fold_matches_expected() {
    let folded = SyncedGroups::from_slices(&[10, 20, 30], &[5, 15, 25, 35], is_before, can_see)
        .fold_pairs(Vec::new(), |mut acc, x, y| {
            acc.push((*x, *y));
            acc
        })
        .unwrap();
    assert_eq!(
        folded,
        vec![(10, 5), (10, 15), (20, 15), (20, 25), (30, 25), (30, 35)]
    );
}

#[test]
fn grouped_fold_matches_expected() {
    let folded = SyncedGroups::from_slices(&[10, 20, 30], &[5, 15, 25, 35], is_before, can_see)
        .fold_grouped(Vec::new(), |mut acc, x, ys| {
            acc.push((*x, ys.to_vec()));
            acc
        })
        .unwrap();
    assert_eq!(
        folded,
        vec![(10, vec![5, 15]), (20, vec![15, 25]), (30, vec![25, 35])]
    );
}

#[test]
fn empty_landmark_returns_zero_accumulator() {
    let pairwise = SyncedGroups::from_slices(&[1, 2], &[], is_before, can_see)
        .fold_pairs(Vec::<(i64, i64)>::new(), |mut acc, x, y| {
            acc.push((*x, *y));
            acc
        })
        .unwrap();
    assert!(pairwise.is_empty());

    let grouped = SyncedGroups::from_slices(&[1, 2], &[], is_before, can_see)
        .fold_grouped(0usize, |acc, _, _| acc + 1)
        .unwrap();
    assert_eq!(grouped, 0);
}

#[test]
fn empty_experiment_returns_zero_accumulator() {
    let grouped = SyncedGroups::from_slices(&[], &[1, 2, 3], is_before, can_see)
        .fold_grouped(0usize, |acc, _, _| acc + 1)
        .unwrap();
    assert_eq!(grouped, 0);
}

/// Brute-force oracle: all visible pairs in experiment-major order.
fn oracle_pairs(xs: &[i64], ys: &[i64]) -> Vec<(i64, i64)> {
    let mut pairs = Vec::new();
    for &x in xs {
        for &y in ys {
            if can_see(&y, &x) {
                pairs.push((x, y));
            }
        }
    }
    pairs
}

#[test]
fn soundness_against_bruteforce() {
    let mut rng = SmallRng::seed_from_u64(4242);
    for round in 0..50 {
        let x_len = rng.gen_range(0..40);
        let y_len = rng.gen_range(0..40);
        let mut xs: Vec<i64> = (0..x_len).map(|_| rng.gen_range(0..300)).collect();
        let mut ys: Vec<i64> = (0..y_len).map(|_| rng.gen_range(0..300)).collect();
        xs.sort_unstable();
        ys.sort_unstable();

        let pairs: Vec<(i64, i64)> = SyncedGroups::from_slices(&xs, &ys, is_before, can_see)
            .pairs()
            .collect::<Result<_>>()
            .unwrap();
        let expected = oracle_pairs(&xs, &ys);
        assert_eq!(pairs, expected, "round {}: X={:?} Y={:?}", round, xs, ys);
    }
}

#[test]
fn window_is_bounded_by_visibility() {
    let mut rng = SmallRng::seed_from_u64(99);
    let mut xs: Vec<i64> = (0..100).map(|_| rng.gen_range(0..1000)).collect();
    let mut ys: Vec<i64> = (0..100).map(|_| rng.gen_range(0..1000)).collect();
    xs.sort_unstable();
    ys.sort_unstable();

    // Largest set of landmarks visible to any single experiment record.
    let max_visible = xs
        .iter()
        .map(|x| ys.iter().filter(|y| can_see(y, x)).count())
        .max()
        .unwrap_or(0);

    let mut it = SyncedGroups::from_slices(&xs, &ys, is_before, can_see);
    for group in it.by_ref() {
        group.unwrap();
    }
    assert!(it.max_window() <= max_visible.max(1));
}

/// Stream wrapper that flags when it is dropped, i.e. when the engine
/// released the underlying resource.
struct CloseProbe {
    inner: std::vec::IntoIter<Result<i64>>,
    flag: Arc<AtomicBool>,
}

impl Iterator for CloseProbe {
    type Item = Result<i64>;
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl Drop for CloseProbe {
    fn drop(&mut self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

fn probed(values: Vec<i64>, flag: Arc<AtomicBool>) -> RecordStream<i64> {
    Box::new(CloseProbe {
        inner: values
            .into_iter()
            .map(Ok)
            .collect::<Vec<Result<i64>>>()
            .into_iter(),
        flag,
    })
}

#[test]
fn inputs_closed_on_exhaustion() {
    let x_closed = Arc::new(AtomicBool::new(false));
    let y_closed = Arc::new(AtomicBool::new(false));
    let x = synchrony_tracks::lookahead::Lookahead::new(probed(vec![10], x_closed.clone()));
    let y = synchrony_tracks::lookahead::Lookahead::new(probed(vec![5, 15], y_closed.clone()));

    let mut it = SyncedGroups::new(x, y, is_before, can_see);
    for group in it.by_ref() {
        group.unwrap();
    }
    assert!(x_closed.load(Ordering::SeqCst));
    assert!(y_closed.load(Ordering::SeqCst));
}

#[test]
fn inputs_closed_on_early_drop() {
    let x_closed = Arc::new(AtomicBool::new(false));
    let y_closed = Arc::new(AtomicBool::new(false));
    let x = synchrony_tracks::lookahead::Lookahead::new(probed(
        vec![10, 20, 30, 40],
        x_closed.clone(),
    ));
    let y = synchrony_tracks::lookahead::Lookahead::new(probed(
        vec![5, 15, 25, 35],
        y_closed.clone(),
    ));

    let mut it = SyncedGroups::new(x, y, is_before, can_see).pairs();
    let first = it.next().unwrap().unwrap();
    assert_eq!(first, (10, 5));
    drop(it);
    assert!(x_closed.load(Ordering::SeqCst));
    assert!(y_closed.load(Ordering::SeqCst));
}

#[test]
fn synced_output_wraps_back_into_efile() {
    // The grouped result stream becomes a transient EFile, then a
    // stored one, exercising the full pipeline loop.
    let settings: Settings<i64> = Settings::from_codec(int_codec());
    let groups = SyncedGroups::from_slices(&[10, 20, 30], &[5, 15, 25, 35], is_before, can_see);
    let counts = groups.map_grouped(|_, ys| ys.len() as i64);
    let efile = EFile::transient(counts, settings).stored().unwrap();
    let out: Vec<i64> = efile.records().unwrap().collect::<Result<_>>().unwrap();
    assert_eq!(out, vec![2, 2, 2]);
}
