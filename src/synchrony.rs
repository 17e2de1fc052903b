//! Synchronized co-traversal of a landmark and an experiment stream.
//!
//! Both streams are consumed in a single pass under two caller-supplied
//! predicates on (landmark, experiment) pairs:
//!
//! - `is_before(y, x)` — y's position is strictly before x's under the
//!   shared stream order.
//! - `can_see(y, x)` — y and x are close enough to form a match.
//!
//! The driver keeps a window `Z` of landmarks that may still match
//! future experiment records. A landmark is discarded only when it is
//! before the current experiment record and cannot see it; when the
//! experiment advances, the window is re-seated in front of the
//! remaining landmark stream so later experiment records reconsider it.
//!
//! Correctness requires the caller's contracts: `is_before` monotone
//! with both stream orders, and `can_see` antimonotone relative to
//! `is_before` (once a landmark is before an experiment record and
//! cannot see it, it cannot see any later one). The driver does not —
//! and cannot — verify this.
//!
//! Every operator shape (pairwise/grouped fold, map, flat-map) is
//! derived from one grouped driver, so their match order coincides.

use crate::error::Result;
use crate::lookahead::Lookahead;
use log::debug;
use std::collections::VecDeque;

/// Lazy stream of `(experiment, visible landmarks)` groups.
///
/// Yields one group per experiment record that is reached while
/// landmarks remain; the group may be empty. Dropping the stream, or
/// exhausting it, closes both input cursors.
pub struct SyncedGroups<T, B, C> {
    experiment: Lookahead<T>,
    landmark: Lookahead<T>,
    /// Re-seated landmarks, logically in front of the landmark cursor.
    pending: VecDeque<T>,
    /// Window of landmarks buffered for the current experiment record.
    window: Vec<T>,
    is_before: B,
    can_see: C,
    done: bool,
    max_window: usize,
}

impl<T, B, C> SyncedGroups<T, B, C>
where
    T: Clone,
    B: Fn(&T, &T) -> bool,
    C: Fn(&T, &T) -> bool,
{
    /// Synchronize `experiment` against `landmark`.
    pub fn new(experiment: Lookahead<T>, landmark: Lookahead<T>, is_before: B, can_see: C) -> Self {
        Self {
            experiment,
            landmark,
            pending: VecDeque::new(),
            window: Vec::new(),
            is_before,
            can_see,
            done: false,
            max_window: 0,
        }
    }

    /// Eager form over materialized sequences.
    pub fn from_slices(experiment: &[T], landmark: &[T], is_before: B, can_see: C) -> Self {
        Self::new(
            Lookahead::from_vec(experiment.to_vec()),
            Lookahead::from_vec(landmark.to_vec()),
            is_before,
            can_see,
        )
    }

    /// Largest window of simultaneously visible landmarks seen so far.
    pub fn max_window(&self) -> usize {
        self.max_window
    }

    fn close_inputs(&mut self) {
        self.experiment.close();
        self.landmark.close();
        self.pending.clear();
        self.window.clear();
        self.done = true;
        debug!("synchronized iteration closed; max window {}", self.max_window);
    }

    /// Head of the landmark stream: re-seated records first.
    fn landmark_head(&mut self) -> Result<Option<T>> {
        if let Some(front) = self.pending.front() {
            return Ok(Some(front.clone()));
        }
        Ok(self.landmark.head()?.cloned())
    }

    fn landmark_pop(&mut self) -> Result<Option<T>> {
        if let Some(front) = self.pending.pop_front() {
            return Ok(Some(front));
        }
        self.landmark.next().transpose()
    }

    /// Whether at least two landmark records remain.
    fn landmark_more_than_one(&mut self) -> Result<bool> {
        match self.pending.len() {
            0 => Ok(self.landmark.peek_ahead(2)?.is_some()),
            1 => Ok(self.landmark.peek_ahead(1)?.is_some()),
            _ => Ok(true),
        }
    }

    /// Move the window back in front of the landmark stream.
    fn reseat_window(&mut self, window: &[T]) {
        for record in window.iter().rev() {
            self.pending.push_front(record.clone());
        }
    }

    fn note_window(&mut self, len: usize) {
        if len > self.max_window {
            self.max_window = len;
        }
    }

    /// Pairwise fold: `f(acc, x, y)` for every visible pair, in stream
    /// order.
    pub fn fold_pairs<A, F>(self, zero: A, mut f: F) -> Result<A>
    where
        F: FnMut(A, &T, &T) -> A,
    {
        self.fold_grouped(zero, |acc, x, ys| {
            let mut acc = acc;
            for y in ys {
                acc = f(acc, x, y);
            }
            acc
        })
    }

    /// Grouped fold: `f(acc, x, window)` once per emitted group.
    pub fn fold_grouped<A, F>(mut self, zero: A, mut f: F) -> Result<A>
    where
        F: FnMut(A, &T, &[T]) -> A,
    {
        let mut acc = zero;
        while let Some(group) = self.next() {
            let (x, ys) = group?;
            acc = f(acc, &x, &ys);
        }
        Ok(acc)
    }

    /// Lazy pairwise stream of `(experiment, landmark)` matches.
    pub fn pairs(self) -> SyncedPairs<T, B, C> {
        SyncedPairs {
            groups: self,
            current: None,
            queue: VecDeque::new(),
        }
    }

    /// Lazy map over visible pairs.
    pub fn map_pairs<U, F>(self, mut f: F) -> impl Iterator<Item = Result<U>>
    where
        F: FnMut(&T, &T) -> U,
    {
        self.pairs().map(move |pair| pair.map(|(x, y)| f(&x, &y)))
    }

    /// Lazy map over groups.
    pub fn map_grouped<U, F>(self, mut f: F) -> impl Iterator<Item = Result<U>>
    where
        F: FnMut(&T, &[T]) -> U,
    {
        self.map(move |group| group.map(|(x, ys)| f(&x, &ys)))
    }

    /// Lazy flat-map over groups.
    pub fn flat_map_grouped<U, I, F>(self, mut f: F) -> impl Iterator<Item = Result<U>>
    where
        F: FnMut(&T, &[T]) -> I,
        I: IntoIterator<Item = U>,
    {
        self.flat_map(move |group| -> Vec<Result<U>> {
            match group {
                Ok((x, ys)) => f(&x, &ys).into_iter().map(Ok).collect(),
                Err(e) => vec![Err(e)],
            }
        })
    }
}

impl<T, B, C> Iterator for SyncedGroups<T, B, C>
where
    T: Clone,
    B: Fn(&T, &T) -> bool,
    C: Fn(&T, &T) -> bool,
{
    type Item = Result<(T, Vec<T>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            // Experiment exhausted: done.
            match self.experiment.has_next() {
                Ok(true) => {}
                Ok(false) => {
                    self.close_inputs();
                    return None;
                }
                Err(e) => {
                    self.close_inputs();
                    return Some(Err(e));
                }
            }
            let y = match self.landmark_head() {
                Ok(head) => head,
                Err(e) => {
                    self.close_inputs();
                    return Some(Err(e));
                }
            };
            let Some(y) = y else {
                if self.window.is_empty() {
                    // Landmarks and window both gone: nothing more can
                    // match any experiment record.
                    self.close_inputs();
                    return None;
                }
                // Landmark stream dry but window occupied: replay the
                // window as the landmark stream.
                let window = std::mem::take(&mut self.window);
                self.reseat_window(&window);
                continue;
            };
            let (sees, before) = match self.experiment.peeked() {
                Some(x) => ((self.can_see)(&y, x), (self.is_before)(&y, x)),
                None => continue,
            };
            if sees {
                let more = match self.landmark_more_than_one() {
                    Ok(more) => more,
                    Err(e) => {
                        self.close_inputs();
                        return Some(Err(e));
                    }
                };
                if more {
                    // Buffer y; later landmarks may also see this x.
                    if let Err(e) = self.landmark_pop() {
                        self.close_inputs();
                        return Some(Err(e));
                    }
                    self.window.push(y);
                    let len = self.window.len();
                    self.note_window(len);
                } else {
                    // y is the final landmark: the window is maximal.
                    // Emit it with y included, advance the experiment,
                    // and re-seat the window (y itself stays in place).
                    let x = match self.experiment.next_record() {
                        Ok(x) => x,
                        Err(e) => {
                            self.close_inputs();
                            return Some(Err(e));
                        }
                    };
                    let mut group = std::mem::take(&mut self.window);
                    self.reseat_window(&group);
                    group.push(y);
                    let len = group.len();
                    self.note_window(len);
                    return Some(Ok((x, group)));
                }
            } else if before {
                // y precedes x and cannot see it; by antimonotonicity it
                // cannot see any later experiment record either.
                if let Err(e) = self.landmark_pop() {
                    self.close_inputs();
                    return Some(Err(e));
                }
            } else {
                // y is strictly ahead of x's reach: the window is
                // maximal for x. Emit, advance, re-seat.
                let x = match self.experiment.next_record() {
                    Ok(x) => x,
                    Err(e) => {
                        self.close_inputs();
                        return Some(Err(e));
                    }
                };
                let group = std::mem::take(&mut self.window);
                self.reseat_window(&group);
                return Some(Ok((x, group)));
            }
        }
    }
}

/// Lazy pairwise view over [`SyncedGroups`].
pub struct SyncedPairs<T, B, C> {
    groups: SyncedGroups<T, B, C>,
    current: Option<T>,
    queue: VecDeque<T>,
}

impl<T, B, C> Iterator for SyncedPairs<T, B, C>
where
    T: Clone,
    B: Fn(&T, &T) -> bool,
    C: Fn(&T, &T) -> bool,
{
    type Item = Result<(T, T)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(y) = self.queue.pop_front() {
                if let Some(x) = &self.current {
                    return Some(Ok((x.clone(), y)));
                }
            }
            match self.groups.next()? {
                Ok((x, ys)) => {
                    if ys.is_empty() {
                        continue;
                    }
                    self.current = Some(x);
                    self.queue = ys.into();
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flank_before(y: &i64, x: &i64) -> bool {
        y < x
    }

    fn flank_sees(y: &i64, x: &i64) -> bool {
        (x - y).abs() <= 10
    }

    fn groups_of(x: &[i64], y: &[i64]) -> Vec<(i64, Vec<i64>)> {
        SyncedGroups::from_slices(x, y, flank_before, flank_sees)
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_grouped_windows() {
        let groups = groups_of(&[10, 20, 30], &[5, 15, 25, 35]);
        assert_eq!(
            groups,
            vec![
                (10, vec![5, 15]),
                (20, vec![15, 25]),
                (30, vec![25, 35]),
            ]
        );
    }

    #[test]
    fn test_pairwise_matches() {
        let pairs: Vec<(i64, i64)> =
            SyncedGroups::from_slices(&[10, 20, 30], &[5, 15, 25, 35], flank_before, flank_sees)
                .pairs()
                .collect::<Result<_>>()
                .unwrap();
        assert_eq!(
            pairs,
            vec![(10, 5), (10, 15), (20, 15), (20, 25), (30, 25), (30, 35)]
        );
    }

    #[test]
    fn test_fold_pairs_append() {
        let folded = SyncedGroups::from_slices(
            &[10, 20, 30],
            &[5, 15, 25, 35],
            flank_before,
            flank_sees,
        )
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
    fn test_empty_landmark_yields_zero() {
        let groups = groups_of(&[1, 2], &[]);
        assert!(groups.is_empty());

        let folded = SyncedGroups::from_slices(&[1, 2], &[], flank_before, flank_sees)
            .fold_pairs(0usize, |acc, _, _| acc + 1)
            .unwrap();
        assert_eq!(folded, 0);
    }

    #[test]
    fn test_empty_experiment_yields_zero() {
        let groups = groups_of(&[], &[1, 2, 3]);
        assert!(groups.is_empty());
    }

    #[test]
    fn test_no_duplicate_matches() {
        // Dense landmarks visible to several experiments: each pair must
        // appear exactly once.
        let x = [10, 12, 14];
        let y = [8, 9, 10, 11];
        let pairs: Vec<(i64, i64)> = SyncedGroups::from_slices(&x, &y, flank_before, flank_sees)
            .pairs()
            .collect::<Result<_>>()
            .unwrap();
        let mut expected = Vec::new();
        for xi in x {
            for yi in y {
                if (xi - yi).abs() <= 10 {
                    expected.push((xi, yi));
                }
            }
        }
        assert_eq!(pairs, expected);
    }

    #[test]
    fn test_unmatched_experiment_gets_empty_window() {
        // 100 is beyond every landmark; 200 never reached once the
        // landmarks are dropped.
        let groups = groups_of(&[10, 100, 200], &[5, 15]);
        assert_eq!(groups[0], (10, vec![5, 15]));
        // Landmarks 5 and 15 are dropped as "before, cannot see" for
        // x=100; the stream then terminates with window and landmarks
        // empty, emitting nothing for 100 or 200.
        assert_eq!(groups.len(), 1);
    }

    #[test]
    fn test_gap_then_match_emits_empty_group() {
        // Landmark 50 is ahead of x=10, so x=10 emits an empty window
        // while 50 stays put for x=45.
        let groups = groups_of(&[10, 45], &[50]);
        assert_eq!(groups, vec![(10, vec![]), (45, vec![50])]);
    }

    #[test]
    fn test_max_window_tracking() {
        let mut it = SyncedGroups::from_slices(
            &[10],
            &[5, 6, 7, 8],
            flank_before,
            flank_sees,
        );
        while let Some(group) = it.next() {
            group.unwrap();
        }
        assert_eq!(it.max_window(), 4);
    }

    #[test]
    fn test_map_and_flat_map_grouped() {
        let counts: Vec<usize> = SyncedGroups::from_slices(
            &[10, 20, 30],
            &[5, 15, 25, 35],
            flank_before,
            flank_sees,
        )
        .map_grouped(|_, ys| ys.len())
        .collect::<Result<_>>()
        .unwrap();
        assert_eq!(counts, vec![2, 2, 2]);

        let flattened: Vec<i64> = SyncedGroups::from_slices(
            &[10, 20],
            &[5, 15, 25],
            flank_before,
            flank_sees,
        )
        .flat_map_grouped(|_, ys| ys.to_vec())
        .collect::<Result<_>>()
        .unwrap();
        assert_eq!(flattened, vec![5, 15, 15, 25]);
    }

    #[test]
    fn test_error_propagates_and_closes() {
        use crate::error::TrackError;
        let bad_landmark: crate::codec::RecordStream<i64> = Box::new(
            vec![
                Ok(5),
                Err(TrackError::Parse {
                    line: 2,
                    message: "bad".into(),
                }),
            ]
            .into_iter(),
        );
        let mut it = SyncedGroups::new(
            Lookahead::from_vec(vec![10i64, 20]),
            Lookahead::new(bad_landmark),
            flank_before,
            flank_sees,
        );
        let first = it.next().unwrap();
        assert!(first.is_err());
        assert!(it.next().is_none());
    }
}
