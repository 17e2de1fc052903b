//! Single-pass record cursor with bounded, non-destructive lookahead.
//!
//! A [`Lookahead`] pulls from an underlying one-shot stream and keeps a
//! small buffer of previewed records. The buffer uses a Vec plus head
//! index with periodic compaction, so previewed records stay contiguous
//! and `lookahead(k)` can hand out a plain slice. `next` drains the
//! buffer before pulling from the source again, which makes every peek
//! operation non-destructive.

use crate::codec::RecordStream;
use crate::error::{Result, TrackError};

/// Compact the buffer once the dead prefix exceeds this length.
const COMPACTION_THRESHOLD: usize = 1024;

/// A lazy cursor over records with peek support.
///
/// The source is released on exhaustion, on the first error, and on
/// [`close`](Lookahead::close); dropping the cursor releases it too.
pub struct Lookahead<T> {
    source: Option<RecordStream<T>>,
    buf: Vec<T>,
    head: usize,
}

impl<T> std::fmt::Debug for Lookahead<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lookahead")
            .field("buffered", &(self.buf.len() - self.head))
            .field("exhausted", &self.source.is_none())
            .finish()
    }
}

impl<T> Lookahead<T> {
    /// Wrap a one-shot record stream.
    pub fn new(source: RecordStream<T>) -> Self {
        Self {
            source: Some(source),
            buf: Vec::new(),
            head: 0,
        }
    }

    /// Cursor over an in-memory sequence.
    pub fn from_vec(records: Vec<T>) -> Self {
        Self {
            source: None,
            buf: records,
            head: 0,
        }
    }

    /// Number of records currently sitting in the preview buffer.
    #[inline]
    fn buffered(&self) -> usize {
        self.buf.len() - self.head
    }

    /// Pull from the source until at least `k` records are buffered or
    /// the source is exhausted. A source error closes the cursor.
    fn fill_to(&mut self, k: usize) -> Result<()> {
        while self.buffered() < k {
            let Some(source) = self.source.as_mut() else {
                return Ok(());
            };
            match source.next() {
                Some(Ok(record)) => self.buf.push(record),
                Some(Err(e)) => {
                    self.close();
                    return Err(e);
                }
                None => {
                    self.source = None;
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// True if at least one record remains.
    pub fn has_next(&mut self) -> Result<bool> {
        self.fill_to(1)?;
        Ok(self.buffered() > 0)
    }

    /// Peek at the next record without consuming it.
    pub fn head(&mut self) -> Result<Option<&T>> {
        self.peek_ahead(1)
    }

    /// Peek at the k-th upcoming record (1-based) without consuming any.
    ///
    /// Returns `None` when fewer than `k` records remain.
    pub fn peek_ahead(&mut self, k: usize) -> Result<Option<&T>> {
        debug_assert!(k >= 1, "peek_ahead is 1-based");
        self.fill_to(k)?;
        if self.buffered() >= k {
            Ok(self.buf.get(self.head + k - 1))
        } else {
            Ok(None)
        }
    }

    /// Preview up to `k` upcoming records as a slice.
    ///
    /// The previewed prefix is still yielded by subsequent `next` calls.
    pub fn lookahead(&mut self, k: usize) -> Result<&[T]> {
        self.fill_to(k)?;
        let n = k.min(self.buffered());
        Ok(&self.buf[self.head..self.head + n])
    }

    /// The buffered head, if a previous peek left one in place.
    ///
    /// Never touches the source; used where a head is known buffered.
    #[inline]
    pub(crate) fn peeked(&self) -> Option<&T> {
        self.buf.get(self.head)
    }

    /// Release the source and drop any buffered records. Idempotent.
    pub fn close(&mut self) {
        self.source = None;
        self.buf.clear();
        self.head = 0;
    }

    fn compact(&mut self) {
        if self.head > COMPACTION_THRESHOLD && self.head * 2 > self.buf.len() {
            self.buf.drain(..self.head);
            self.head = 0;
        }
    }
}

impl<T: Clone> Lookahead<T> {
    /// Advance, failing with [`TrackError::EndOfStream`] when exhausted.
    pub fn next_record(&mut self) -> Result<T> {
        match self.next() {
            Some(record) => record,
            None => Err(TrackError::EndOfStream),
        }
    }
}

impl<T: Clone> Iterator for Lookahead<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffered() > 0 {
            let record = self.buf[self.head].clone();
            self.head += 1;
            self.compact();
            return Some(Ok(record));
        }
        let source = self.source.as_mut()?;
        match source.next() {
            Some(Ok(record)) => Some(Ok(record)),
            Some(Err(e)) => {
                self.close();
                Some(Err(e))
            }
            None => {
                self.source = None;
                None
            }
        }
    }
}
