//! BED-style interval records and their on-disk codec.
//!
//! Records use 0-based, half-open coordinates. Beyond the three
//! mandatory columns, a record carries the standard optional columns
//! (name, score, strand) plus a free-form attribute map for anything a
//! track wants to attach.
//!
//! The codec writes the first record of a file in self-describing
//! `field=value` form; subsequent lines carry positional values in the
//! column order the header established. Plain headerless BED files are
//! also accepted: extra columns beyond strand enter the attribute map
//! under positional keys (`col7`, `col8`, ...).

use crate::codec::{Deserializer, RecordStream, Serializer};
use crate::efile::Settings;
use crate::error::{Result, TrackError};
use memchr::memchr;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

/// Buffer size for BED input (256KB).
const INPUT_BUFFER: usize = 256 * 1024;

/// Strand of a genomic feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strand {
    Plus,
    Minus,
}

impl Strand {
    /// Parse a strand character; anything but `+`/`-` is no strand.
    pub fn from_char(c: char) -> Option<Strand> {
        match c {
            '+' => Some(Strand::Plus),
            '-' => Some(Strand::Minus),
            _ => None,
        }
    }
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strand::Plus => write!(f, "+"),
            Strand::Minus => write!(f, "-"),
        }
    }
}

/// A genomic interval record with optional attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct BedRecord {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    pub name: Option<String>,
    pub score: Option<f64>,
    pub strand: Option<Strand>,
    /// Free-form attributes beyond the standard columns.
    pub misc: BTreeMap<String, String>,
}

impl BedRecord {
    /// Create a record with only the mandatory columns.
    #[inline]
    pub fn new(chrom: impl Into<String>, start: u64, end: u64) -> Self {
        Self {
            chrom: chrom.into(),
            start,
            end,
            name: None,
            score: None,
            strand: None,
            misc: BTreeMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.misc.insert(key.into(), value.into());
        self
    }

    /// Interval length in base pairs.
    #[inline]
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Half-open overlap test.
    #[inline]
    pub fn overlaps(&self, other: &BedRecord) -> bool {
        self.chrom == other.chrom && self.start < other.end && other.start < self.end
    }

    /// Length of the overlap with another record, 0 when disjoint.
    #[inline]
    pub fn overlap_length(&self, other: &BedRecord) -> u64 {
        if !self.overlaps(other) {
            return 0;
        }
        self.end.min(other.end) - self.start.max(other.start)
    }

    /// Distance to another record on the same chromosome; 0 when
    /// overlapping, `None` across chromosomes.
    pub fn distance_to(&self, other: &BedRecord) -> Option<u64> {
        if self.chrom != other.chrom {
            return None;
        }
        if self.overlaps(other) {
            return Some(0);
        }
        if self.end <= other.start {
            Some(other.start - self.end)
        } else {
            Some(self.start - other.end)
        }
    }

    /// Genomic order: chromosome (lexicographic), start, end.
    #[inline]
    pub fn cmp_genomic(&self, other: &BedRecord) -> Ordering {
        self.chrom
            .cmp(&other.chrom)
            .then(self.start.cmp(&other.start))
            .then(self.end.cmp(&other.end))
    }
}

impl fmt::Display for BedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}\t{}", self.chrom, self.start, self.end)
    }
}

/// Fast u64 parsing without allocation.
#[inline(always)]
fn parse_u64_fast(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() {
        return None;
    }
    let mut result: u64 = 0;
    for &b in bytes {
        let digit = b.wrapping_sub(b'0');
        if digit > 9 {
            return None;
        }
        result = result.wrapping_mul(10).wrapping_add(digit as u64);
    }
    Some(result)
}

/// Default line guard: comments and UCSC track/browser lines.
fn default_guard(line: &str) -> bool {
    line.starts_with('#') || line.starts_with("track") || line.starts_with("browser")
}

type GuardFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Serializer/deserializer for [`BedRecord`] files.
pub struct BedCodec {
    guard: GuardFn,
}

impl Default for BedCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for BedCodec {
    fn clone(&self) -> Self {
        Self {
            guard: self.guard.clone(),
        }
    }
}

impl BedCodec {
    pub fn new() -> Self {
        Self {
            guard: Arc::new(default_guard),
        }
    }

    /// Replace the line guard; lines for which it returns true are skipped.
    pub fn with_guard(mut self, guard: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.guard = Arc::new(guard);
        self
    }
}

fn push_score(line: &mut String, score: f64) {
    if score.fract() == 0.0 && score.abs() < 1e15 {
        let mut buf = itoa::Buffer::new();
        line.push_str(buf.format(score as i64));
    } else {
        let mut buf = ryu::Buffer::new();
        line.push_str(buf.format(score));
    }
}

impl Serializer<BedRecord> for BedCodec {
    fn header_line(&self, record: &BedRecord) -> String {
        let mut buf = itoa::Buffer::new();
        let mut line = String::with_capacity(96);
        line.push_str("chrom=");
        line.push_str(&record.chrom);
        line.push_str("\tstart=");
        line.push_str(buf.format(record.start));
        line.push_str("\tend=");
        line.push_str(buf.format(record.end));
        line.push_str("\tname=");
        match &record.name {
            Some(name) => line.push_str(name),
            None => line.push('.'),
        }
        line.push_str("\tscore=");
        match record.score {
            Some(score) => push_score(&mut line, score),
            None => line.push('.'),
        }
        line.push_str("\tstrand=");
        match record.strand {
            Some(strand) => line.push_str(&strand.to_string()),
            None => line.push('.'),
        }
        for (key, value) in &record.misc {
            line.push('\t');
            line.push_str(key);
            line.push('=');
            line.push_str(value);
        }
        line
    }

    fn record_line(&self, record: &BedRecord) -> String {
        let mut buf = itoa::Buffer::new();
        let mut line = String::with_capacity(64);
        line.push_str(&record.chrom);
        line.push('\t');
        line.push_str(buf.format(record.start));
        line.push('\t');
        line.push_str(buf.format(record.end));
        line.push('\t');
        match &record.name {
            Some(name) => line.push_str(name),
            None => line.push('.'),
        }
        line.push('\t');
        match record.score {
            Some(score) => push_score(&mut line, score),
            None => line.push('.'),
        }
        line.push('\t');
        match record.strand {
            Some(strand) => line.push_str(&strand.to_string()),
            None => line.push('.'),
        }
        for value in record.misc.values() {
            line.push('\t');
            line.push_str(value);
        }
        line
    }
}

impl Deserializer<BedRecord> for BedCodec {
    fn open(&self, path: &Path) -> Result<RecordStream<BedRecord>> {
        let file = File::open(path).map_err(|e| TrackError::from_io_path(e, path))?;
        Ok(Box::new(BedFileLines {
            reader: Some(BufReader::with_capacity(INPUT_BUFFER, file)),
            buf: String::with_capacity(1024),
            parser: BedParser::new(),
            guard: self.guard.clone(),
        }))
    }

    fn parse(&self, raw: Arc<str>, _origin: &Path) -> RecordStream<BedRecord> {
        Box::new(BedStrLines {
            raw,
            pos: 0,
            done: false,
            parser: BedParser::new(),
            guard: self.guard.clone(),
        })
    }
}

/// Line parser carrying the column schema across a file.
struct BedParser {
    line_no: usize,
    /// Attribute column names established by a header line.
    misc_keys: Option<Vec<String>>,
}

impl BedParser {
    fn new() -> Self {
        Self {
            line_no: 0,
            misc_keys: None,
        }
    }

    fn err(&self, message: impl Into<String>) -> TrackError {
        TrackError::Parse {
            line: self.line_no,
            message: message.into(),
        }
    }

    fn parse_line(&mut self, line: &str) -> Result<BedRecord> {
        if self.misc_keys.is_none() && line.starts_with("chrom=") {
            return self.parse_header_line(line);
        }
        self.parse_value_line(line)
    }

    /// First data line in `field=value` form; establishes the attribute
    /// column order for the rest of the file.
    fn parse_header_line(&mut self, line: &str) -> Result<BedRecord> {
        let mut record = BedRecord::new("", 0, 0);
        let mut keys = Vec::new();
        let mut saw_start = false;
        let mut saw_end = false;
        for token in line.split('\t') {
            let Some((key, value)) = token.split_once('=') else {
                return Err(self.err(format!("Expected field=value token, got '{}'", token)));
            };
            match key {
                "chrom" => record.chrom = value.to_string(),
                "start" => {
                    record.start = parse_u64_fast(value.as_bytes())
                        .ok_or_else(|| self.err(format!("Invalid start position: '{}'", value)))?;
                    saw_start = true;
                }
                "end" => {
                    record.end = parse_u64_fast(value.as_bytes())
                        .ok_or_else(|| self.err(format!("Invalid end position: '{}'", value)))?;
                    saw_end = true;
                }
                "name" => {
                    if value != "." {
                        record.name = Some(value.to_string());
                    }
                }
                "score" => {
                    if value != "." {
                        record.score = Some(
                            value
                                .parse()
                                .map_err(|_| self.err(format!("Invalid score: '{}'", value)))?,
                        );
                    }
                }
                "strand" => {
                    record.strand = value.chars().next().and_then(Strand::from_char);
                }
                _ => {
                    keys.push(key.to_string());
                    if value != "." {
                        record.misc.insert(key.to_string(), value.to_string());
                    }
                }
            }
        }
        if record.chrom.is_empty() || !saw_start || !saw_end {
            return Err(self.err("Header line missing chrom/start/end"));
        }
        if record.start > record.end {
            return Err(self.err(format!(
                "Start ({}) > end ({})",
                record.start, record.end
            )));
        }
        self.misc_keys = Some(keys);
        Ok(record)
    }

    fn parse_value_line(&mut self, line: &str) -> Result<BedRecord> {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 3 {
            return Err(self.err(format!(
                "Expected at least 3 fields, got {}",
                fields.len()
            )));
        }
        let start = parse_u64_fast(fields[1].as_bytes())
            .ok_or_else(|| self.err(format!("Invalid start position: '{}'", fields[1])))?;
        let end = parse_u64_fast(fields[2].as_bytes())
            .ok_or_else(|| self.err(format!("Invalid end position: '{}'", fields[2])))?;
        if start > end {
            return Err(self.err(format!("Start ({}) > end ({})", start, end)));
        }
        let mut record = BedRecord::new(fields[0], start, end);
        if let Some(&name) = fields.get(3) {
            if name != "." {
                record.name = Some(name.to_string());
            }
        }
        if let Some(&score) = fields.get(4) {
            if score != "." {
                record.score = Some(
                    score
                        .parse()
                        .map_err(|_| self.err(format!("Invalid score: '{}'", score)))?,
                );
            }
        }
        if let Some(&strand) = fields.get(5) {
            record.strand = strand.chars().next().and_then(Strand::from_char);
        }
        if fields.len() > 6 {
            for (i, &value) in fields[6..].iter().enumerate() {
                if value == "." {
                    continue;
                }
                let key = match &self.misc_keys {
                    Some(keys) => match keys.get(i) {
                        Some(key) => key.clone(),
                        None => format!("col{}", i + 7),
                    },
                    None => format!("col{}", i + 7),
                };
                record.misc.insert(key, value.to_string());
            }
        }
        Ok(record)
    }
}

/// Record iterator over an open BED file.
struct BedFileLines {
    reader: Option<BufReader<File>>,
    buf: String,
    parser: BedParser,
    guard: GuardFn,
}

impl Iterator for BedFileLines {
    type Item = Result<BedRecord>;

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
                    self.parser.line_no += 1;
                    let line = self.buf.trim_end();
                    if line.is_empty() || (self.guard)(line) {
                        continue;
                    }
                    let parsed = self.parser.parse_line(line);
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

/// Record iterator over slurped BED text.
struct BedStrLines {
    raw: Arc<str>,
    pos: usize,
    done: bool,
    parser: BedParser,
    guard: GuardFn,
}

impl Iterator for BedStrLines {
    type Item = Result<BedRecord>;

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
            self.parser.line_no += 1;
            let line = self.raw[start..end].trim_end();
            if line.is_empty() || (self.guard)(line) {
                continue;
            }
            let parsed = self.parser.parse_line(line);
            if parsed.is_err() {
                self.done = true;
            }
            return Some(parsed);
        }
    }
}

/// Ready-made settings for BED tracks: genomic order, record equality,
/// [`BedCodec`] in both directions.
pub fn genomic_settings() -> Settings<BedRecord> {
    let codec = Arc::new(BedCodec::new());
    Settings::new(
        codec.clone(),
        codec,
        Arc::new(|a: &BedRecord, b: &BedRecord| a.cmp_genomic(b)),
        Arc::new(|a: &BedRecord, b: &BedRecord| a == b),
    )
}
