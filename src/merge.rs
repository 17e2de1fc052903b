//! k-way merge of pre-sorted record streams.
//!
//! The merge keeps a vector of active cursors ordered by their buffered
//! heads, with the minimum at position 0. Each step emits position 0's
//! head, advances that cursor, and re-inserts it by binary search on its
//! new head; ties insert after their equals, which keeps runs from the
//! same origin stable relative to each other. Exhausted cursors are
//! closed and dropped.

use crate::efile::{Comparator, EFile, Settings};
use crate::error::{Result, TrackError};
use crate::lookahead::Lookahead;
use log::debug;
use std::cmp::Ordering;

/// Lazy k-way merge over cursors with buffered heads.
pub struct MergeIter<T> {
    active: Vec<Lookahead<T>>,
    cmp: Comparator<T>,
    pending_err: Option<TrackError>,
    // Keeps materialized inputs (and their spill files) alive for the
    // lifetime of the stream.
    _inputs: Vec<EFile<T>>,
}

impl<T: Clone> MergeIter<T> {
    /// Build a merge over `cursors`, all pre-sorted under `cmp`.
    ///
    /// Cursors that prove empty on first peek are closed and dropped.
    pub fn new(cursors: Vec<Lookahead<T>>, cmp: Comparator<T>) -> Result<Self> {
        let mut active: Vec<Lookahead<T>> = Vec::with_capacity(cursors.len());
        for mut cursor in cursors {
            if cursor.has_next()? {
                insert_by_head(&mut active, cursor, &cmp);
            } else {
                cursor.close();
            }
        }
        debug!("merging {} non-empty inputs", active.len());
        Ok(Self {
            active,
            cmp,
            pending_err: None,
            _inputs: Vec::new(),
        })
    }

    /// Attach materialized inputs whose storage must outlive the stream.
    pub(crate) fn holding(mut self, inputs: Vec<EFile<T>>) -> Self
    where
        T: Send + 'static,
    {
        self._inputs = inputs;
        self
    }

    /// Close every remaining cursor.
    fn close_all(&mut self) {
        for cursor in &mut self.active {
            cursor.close();
        }
        self.active.clear();
    }
}

/// Insert `cursor` (head buffered) into `active`, keeping ascending head
/// order; equal heads land after their equals.
fn insert_by_head<T>(active: &mut Vec<Lookahead<T>>, cursor: Lookahead<T>, cmp: &Comparator<T>) {
    let Some(head) = cursor.peeked() else {
        return;
    };
    let cmp = &**cmp;
    let idx = active.partition_point(|other| match other.peeked() {
        Some(other_head) => cmp(other_head, head) != Ordering::Greater,
        None => true,
    });
    active.insert(idx, cursor);
}

impl<T: Clone> Iterator for MergeIter<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.pending_err.take() {
            self.close_all();
            return Some(Err(err));
        }
        if self.active.is_empty() {
            return None;
        }
        let mut cursor = self.active.remove(0);
        let record = match cursor.next() {
            Some(Ok(record)) => record,
            Some(Err(e)) => {
                cursor.close();
                self.close_all();
                return Some(Err(e));
            }
            // The head was buffered, so this cursor cannot be empty;
            // treat a stale cursor as exhausted.
            None => return self.next(),
        };
        match cursor.has_next() {
            Ok(true) => insert_by_head(&mut self.active, cursor, &self.cmp),
            Ok(false) => cursor.close(),
            Err(e) => {
                cursor.close();
                self.pending_err = Some(e);
            }
        }
        Some(Ok(record))
    }
}

/// Merge EFiles into one sorted stream.
///
/// Inputs are materialized first (`serialized` when `on_disk`, `stored`
/// otherwise) so the merge reads re-readable representations. The result
/// is a `Transient` EFile, serialized immediately when `on_disk`.
pub(crate) fn merge_efiles<T: Clone + Send + 'static>(
    inputs: Vec<EFile<T>>,
    on_disk: bool,
) -> Result<EFile<T>> {
    let settings: Settings<T> = match inputs.first() {
        Some(first) => first.settings().clone(),
        None => return Err(TrackError::EndOfStream),
    };
    let mut materialized = Vec::with_capacity(inputs.len());
    for input in inputs {
        let m = if on_disk {
            input.serialized(None)?
        } else {
            input.stored()?
        };
        materialized.push(m);
    }
    let mut cursors = Vec::with_capacity(materialized.len());
    for efile in &materialized {
        cursors.push(efile.records()?);
    }
    let merged = MergeIter::new(cursors, settings.comparator())?.holding(materialized);
    let out = EFile::transient(merged, settings);
    if on_disk {
        out.serialized(None)
    } else {
        Ok(out)
    }
}
