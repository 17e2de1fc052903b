//! Caller-supplied record serialization contracts.
//!
//! The collection engine treats records as opaque values; reading and
//! writing them is delegated to a [`Serializer`] / [`Deserializer`] pair
//! supplied through the engine settings. The on-disk form is textual,
//! one record per line: the first record may be written in
//! self-describing `field=value` form, subsequent records carry values
//! only in the column order the first line established.

use crate::error::{Result, TrackError};
use memchr::memchr;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

/// Buffer size for record output (2MB).
const OUTPUT_BUFFER: usize = 2 * 1024 * 1024;

/// Buffer size for record input (256KB).
const INPUT_BUFFER: usize = 256 * 1024;

/// A lazy, single-pass stream of records.
pub type RecordStream<T> = Box<dyn Iterator<Item = Result<T>>>;

/// Writes a stream of records to a file, one per line.
pub trait Serializer<T>: Send + Sync {
    /// Line for the first record of a file, in `field=value` form.
    fn header_line(&self, record: &T) -> String;

    /// Line for every subsequent record: values only, in the column
    /// order established by the header line.
    fn record_line(&self, record: &T) -> String;

    /// Write an entire stream to `path`, returning the record count.
    ///
    /// The first record goes through [`header_line`](Self::header_line),
    /// the rest through [`record_line`](Self::record_line). Errors from
    /// the stream propagate after the writer is dropped.
    fn write_records(
        &self,
        path: &Path,
        records: &mut dyn Iterator<Item = Result<T>>,
    ) -> Result<usize> {
        let file = File::create(path)?;
        let mut writer = BufWriter::with_capacity(OUTPUT_BUFFER, file);
        let mut count = 0usize;
        for record in records {
            let record = record?;
            let line = if count == 0 {
                self.header_line(&record)
            } else {
                self.record_line(&record)
            };
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
            count += 1;
        }
        writer.flush()?;
        Ok(count)
    }
}

/// Produces a lazy record stream from a file or from raw slurped text.
pub trait Deserializer<T>: Send + Sync {
    /// Open `path` and return a lazy record stream.
    ///
    /// A missing file surfaces as [`TrackError::FileNotFound`]. The
    /// returned stream closes the underlying file on exhaustion, on the
    /// first error, and on drop.
    fn open(&self, path: &Path) -> Result<RecordStream<T>>;

    /// Parse raw file contents that were slurped into memory.
    ///
    /// `origin` is the path the raw bytes came from, for diagnostics.
    fn parse(&self, raw: Arc<str>, origin: &Path) -> RecordStream<T>;
}

type ShowFn<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;
type ReadFn<T> = Arc<dyn Fn(&str, usize) -> Result<T> + Send + Sync>;
type GuardFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// A codec built from closures, for record types with a one-token line
/// form (no header schema; header and value lines coincide).
///
/// The line guard decides which lines to skip; the default skips blank
/// lines and `#` comments.
pub struct FnCodec<T> {
    show: ShowFn<T>,
    read: ReadFn<T>,
    guard: GuardFn,
}

impl<T> Clone for FnCodec<T> {
    fn clone(&self) -> Self {
        Self {
            show: self.show.clone(),
            read: self.read.clone(),
            guard: self.guard.clone(),
        }
    }
}

impl<T> FnCodec<T> {
    pub fn new(
        show: impl Fn(&T) -> String + Send + Sync + 'static,
        read: impl Fn(&str, usize) -> Result<T> + Send + Sync + 'static,
    ) -> Self {
        Self {
            show: Arc::new(show),
            read: Arc::new(read),
            guard: Arc::new(|line: &str| line.starts_with('#')),
        }
    }

    /// Replace the line guard; lines for which it returns true are skipped.
    pub fn with_guard(mut self, guard: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.guard = Arc::new(guard);
        self
    }
}

impl<T: 'static> Serializer<T> for FnCodec<T> {
    fn header_line(&self, record: &T) -> String {
        (self.show)(record)
    }

    fn record_line(&self, record: &T) -> String {
        (self.show)(record)
    }
}

impl<T: 'static> Deserializer<T> for FnCodec<T> {
    fn open(&self, path: &Path) -> Result<RecordStream<T>> {
        let file = File::open(path).map_err(|e| TrackError::from_io_path(e, path))?;
        Ok(Box::new(FileLines {
            reader: Some(BufReader::with_capacity(INPUT_BUFFER, file)),
            buf: String::with_capacity(1024),
            line_no: 0,
            read: self.read.clone(),
            guard: self.guard.clone(),
        }))
    }

    fn parse(&self, raw: Arc<str>, _origin: &Path) -> RecordStream<T> {
        Box::new(StrLines {
            raw,
            pos: 0,
            line_no: 0,
            done: false,
            read: self.read.clone(),
            guard: self.guard.clone(),
        })
    }
}

/// Line-at-a-time record iterator over an open file.
///
/// The reader is dropped (closing the file) on exhaustion and on the
/// first error.
struct FileLines<T> {
    reader: Option<BufReader<File>>,
    buf: String,
    line_no: usize,
    read: ReadFn<T>,
    guard: GuardFn,
}

impl<T> Iterator for FileLines<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let reader = self.reader.as_mut()?;
            self.buf.clear();
            match reader.read_line(&mut self.buf) {
                Ok(0) => {
                    self.reader = None;
                    return None;
                }
                Ok(_) => {
                    self.line_no += 1;
                    let line = self.buf.trim_end();
                    if line.is_empty() || (self.guard)(line) {
                        continue;
                    }
                    let parsed = (self.read)(line, self.line_no);
                    if parsed.is_err() {
                        self.reader = None;
                    }
                    return Some(parsed);
                }
                Err(e) => {
                    self.reader = None;
                    return Some(Err(e.into()));
                }
            }
        }
    }
}

/// Record iterator over slurped raw text, splitting lines with memchr.
struct StrLines<T> {
    raw: Arc<str>,
    pos: usize,
    line_no: usize,
    done: bool,
    read: ReadFn<T>,
    guard: GuardFn,
}

impl<T> Iterator for StrLines<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done || self.pos >= self.raw.len() {
                self.done = true;
                return None;
            }
            let bytes = &self.raw.as_bytes()[self.pos..];
            let (end, next) = match memchr(b'\n', bytes) {
                Some(i) => (self.pos + i, self.pos + i + 1),
                None => (self.raw.len(), self.raw.len()),
            };
            let start = self.pos;
            self.pos = next;
            self.line_no += 1;
            let line = self.raw[start..end].trim_end();
            if line.is_empty() || (self.guard)(line) {
                continue;
            }
            let parsed = (self.read)(line, self.line_no);
            if parsed.is_err() {
                self.done = true;
            }
            return Some(parsed);
        }
    }
}

/// Codec for integer records, one decimal per line.
pub fn int_codec() -> FnCodec<i64> {
    FnCodec::new(
        |n: &i64| n.to_string(),
        |line, line_no| {
            line.parse::<i64>().map_err(|_| TrackError::Parse {
                line: line_no,
                message: format!("Invalid integer: '{}'", line),
            })
        },
    )
}
