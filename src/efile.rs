//! Externalized file abstraction.
//!
//! An [`EFile`] is a sequence of records in exactly one of four physical
//! representations:
//!
//! - `OnDisk` — serialized on the filesystem; authoritative and re-readable.
//! - `InMemory` — fully materialized vector, bounded by `card_cap`.
//! - `Slurped` — raw file text held in memory, re-readable by re-parsing.
//! - `Transient` — a one-shot stream, invalidated by its first traversal.
//!
//! Every operation dispatches on the representation tag. Canonicalizing
//! operations (`stored`, `slurped`, `serialized`, `saved_as`) consume the
//! value and return the new representation; a `Transient` that must be
//! read twice has to be canonicalized first.

use crate::codec::{Deserializer, RecordStream, Serializer};
use crate::config;
use crate::error::{Result, TrackError};
use crate::lookahead::Lookahead;
use log::debug;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Caller-supplied total order on records.
pub type Comparator<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Caller-supplied equality test on records.
pub type Equality<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// Capability bundle and tuning knobs for an [`EFile`].
///
/// Immutable after construction; the `with_*` builders consume and
/// return the value.
pub struct Settings<T> {
    /// Prefix for spill and temp file names.
    pub prefix: String,
    /// Suffix for spill/temp files.
    pub suffix_tmp: String,
    /// Suffix appended by `saved_as`.
    pub suffix_sav: String,
    /// Fallback estimate of a record's serialized size in bytes.
    pub ave_sz: usize,
    /// Record-count threshold above which `stored` spills to disk.
    pub card_cap: usize,
    /// Byte budget for a single in-memory sort run.
    pub ram_cap: usize,
    /// Default record-count cap for a single sort run.
    pub cap: usize,
    /// Whether to sample record sizes to derive the run cap.
    pub do_sampling: bool,
    /// How many records to sample.
    pub sampling_sz: usize,
    /// Force spill to disk even for small results.
    pub always_on_disk: bool,
    pub(crate) serializer: Arc<dyn Serializer<T>>,
    pub(crate) deserializer: Arc<dyn Deserializer<T>>,
    pub(crate) order: Comparator<T>,
    pub(crate) equality: Equality<T>,
}

impl<T> Clone for Settings<T> {
    fn clone(&self) -> Self {
        Self {
            prefix: self.prefix.clone(),
            suffix_tmp: self.suffix_tmp.clone(),
            suffix_sav: self.suffix_sav.clone(),
            ave_sz: self.ave_sz,
            card_cap: self.card_cap,
            ram_cap: self.ram_cap,
            cap: self.cap,
            do_sampling: self.do_sampling,
            sampling_sz: self.sampling_sz,
            always_on_disk: self.always_on_disk,
            serializer: self.serializer.clone(),
            deserializer: self.deserializer.clone(),
            order: self.order.clone(),
            equality: self.equality.clone(),
        }
    }
}

impl<T> Settings<T> {
    /// Build settings from the four caller capabilities, with default
    /// tuning values.
    pub fn new(
        serializer: Arc<dyn Serializer<T>>,
        deserializer: Arc<dyn Deserializer<T>>,
        order: Comparator<T>,
        equality: Equality<T>,
    ) -> Self {
        Self {
            prefix: "synchrony-".to_string(),
            suffix_tmp: ".eftmp".to_string(),
            suffix_sav: ".efsav".to_string(),
            ave_sz: 1000,
            card_cap: 2000,
            ram_cap: 200_000_000,
            cap: 100_000,
            do_sampling: true,
            sampling_sz: 30,
            always_on_disk: false,
            serializer,
            deserializer,
            order,
            equality,
        }
    }

    /// Build settings from one codec implementing both directions, with
    /// the record type's natural order.
    pub fn from_codec<C>(codec: C) -> Self
    where
        C: Serializer<T> + Deserializer<T> + 'static,
        T: Ord,
    {
        let codec = Arc::new(codec);
        Self::new(
            codec.clone(),
            codec,
            Arc::new(|a: &T, b: &T| a.cmp(b)),
            Arc::new(|a: &T, b: &T| a == b),
        )
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_card_cap(mut self, card_cap: usize) -> Self {
        self.card_cap = card_cap;
        self
    }

    pub fn with_cap(mut self, cap: usize) -> Self {
        self.cap = cap;
        self
    }

    pub fn with_ram_cap(mut self, ram_cap: usize) -> Self {
        self.ram_cap = ram_cap;
        self
    }

    pub fn with_ave_sz(mut self, ave_sz: usize) -> Self {
        self.ave_sz = ave_sz;
        self
    }

    pub fn with_sampling(mut self, do_sampling: bool, sampling_sz: usize) -> Self {
        self.do_sampling = do_sampling;
        self.sampling_sz = sampling_sz;
        self
    }

    pub fn with_always_on_disk(mut self, always_on_disk: bool) -> Self {
        self.always_on_disk = always_on_disk;
        self
    }

    /// Compare two records under the configured order.
    #[inline]
    pub fn compare(&self, a: &T, b: &T) -> Ordering {
        let order = &*self.order;
        order(a, b)
    }

    /// Test two records under the configured equality.
    #[inline]
    pub fn equal(&self, a: &T, b: &T) -> bool {
        let equality = &*self.equality;
        equality(a, b)
    }

    pub(crate) fn comparator(&self) -> Comparator<T> {
        self.order.clone()
    }
}

enum Repr<T> {
    OnDisk {
        path: PathBuf,
    },
    InMemory {
        records: Vec<T>,
    },
    Slurped {
        raw: Arc<str>,
        origin: PathBuf,
    },
    Transient {
        stream: RefCell<Option<Lookahead<T>>>,
    },
}

/// A record sequence in one of four physical representations.
pub struct EFile<T> {
    repr: Repr<T>,
    settings: Settings<T>,
}

impl<T: Clone + Send + 'static> fmt::Debug for EFile<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("EFile");
        dbg.field("state", &self.state_name());
        if let Repr::OnDisk { path } = &self.repr {
            dbg.field("path", path);
        }
        dbg.finish()
    }
}

impl<T: Clone + Send + 'static> EFile<T> {
    /// An EFile backed by a serialized file on disk.
    ///
    /// The path is not checked here; a missing file surfaces when the
    /// EFile is measured or opened.
    pub fn on_disk(path: impl Into<PathBuf>, settings: Settings<T>) -> Self {
        Self {
            repr: Repr::OnDisk { path: path.into() },
            settings,
        }
    }

    /// A fully materialized EFile.
    pub fn in_memory(records: Vec<T>, settings: Settings<T>) -> Self {
        Self {
            repr: Repr::InMemory { records },
            settings,
        }
    }

    /// An EFile holding raw, unparsed file text.
    pub fn from_raw(raw: impl Into<Arc<str>>, origin: impl Into<PathBuf>, settings: Settings<T>) -> Self {
        Self {
            repr: Repr::Slurped {
                raw: raw.into(),
                origin: origin.into(),
            },
            settings,
        }
    }

    /// A one-shot EFile over a stream; reading it a second time requires
    /// canonicalizing first.
    pub fn transient<I>(stream: I, settings: Settings<T>) -> Self
    where
        I: Iterator<Item = Result<T>> + 'static,
    {
        Self {
            repr: Repr::Transient {
                stream: RefCell::new(Some(Lookahead::new(Box::new(stream)))),
            },
            settings,
        }
    }

    /// The settings this EFile carries.
    pub fn settings(&self) -> &Settings<T> {
        &self.settings
    }

    /// Name of the current representation, for diagnostics.
    pub fn state_name(&self) -> &'static str {
        match &self.repr {
            Repr::OnDisk { .. } => "on_disk",
            Repr::InMemory { .. } => "in_memory",
            Repr::Slurped { .. } => "slurped",
            Repr::Transient { .. } => "transient",
        }
    }

    pub fn is_on_disk(&self) -> bool {
        matches!(self.repr, Repr::OnDisk { .. })
    }

    pub fn is_in_memory(&self) -> bool {
        matches!(self.repr, Repr::InMemory { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self.repr, Repr::Transient { .. })
    }

    /// Path of the backing file, when on disk.
    pub fn path(&self) -> Option<&Path> {
        match &self.repr {
            Repr::OnDisk { path } => Some(path),
            Repr::Slurped { origin, .. } => Some(origin),
            _ => None,
        }
    }

    /// A fresh cursor over the records.
    ///
    /// For a `Transient` this hands out the underlying one-shot stream
    /// and marks it consumed; a second call fails with
    /// [`TrackError::StreamConsumed`].
    pub fn records(&self) -> Result<Lookahead<T>> {
        match &self.repr {
            Repr::OnDisk { path } => {
                let stream = self.settings.deserializer.open(path)?;
                Ok(Lookahead::new(stream))
            }
            Repr::InMemory { records } => Ok(Lookahead::from_vec(records.clone())),
            Repr::Slurped { raw, origin } => {
                let stream = self.settings.deserializer.parse(raw.clone(), origin);
                Ok(Lookahead::new(stream))
            }
            Repr::Transient { stream } => stream
                .borrow_mut()
                .take()
                .ok_or(TrackError::StreamConsumed),
        }
    }

    /// Whether the sequence is empty. Peek-based; never consumes.
    pub fn is_empty(&self) -> Result<bool> {
        match &self.repr {
            Repr::InMemory { records } => Ok(records.is_empty()),
            Repr::Transient { stream } => match stream.borrow_mut().as_mut() {
                Some(cursor) => Ok(!cursor.has_next()?),
                None => Err(TrackError::StreamConsumed),
            },
            _ => {
                let mut cursor = self.records()?;
                Ok(!cursor.has_next()?)
            }
        }
    }

    /// The n-th record (0-based). O(1) for `InMemory`, a scoped linear
    /// scan otherwise.
    pub fn nth(&self, n: usize) -> Result<T> {
        if let Repr::InMemory { records } = &self.repr {
            return records.get(n).cloned().ok_or(TrackError::EndOfStream);
        }
        let mut cursor = self.records()?;
        match cursor.nth(n) {
            Some(record) => record,
            None => Err(TrackError::EndOfStream),
        }
    }

    /// A transient view keeping only records matching `pred`.
    pub fn filtered(self, pred: impl Fn(&T) -> bool + 'static) -> Result<EFile<T>> {
        let settings = self.settings.clone();
        let cursor = self.records()?;
        let stream = cursor.filter(move |record| match record {
            Ok(t) => pred(t),
            Err(_) => true,
        });
        Ok(EFile::transient(stream, settings))
    }

    /// Run the records through an arbitrary stream transform and wrap
    /// the result as a transient EFile.
    ///
    /// The input cursor moves into the transform, so closing the output
    /// releases the input as well.
    pub fn processed_with<U, F>(self, settings: Settings<U>, transform: F) -> Result<EFile<U>>
    where
        U: Clone + Send + 'static,
        F: FnOnce(Lookahead<T>) -> RecordStream<U>,
    {
        let cursor = self.records()?;
        Ok(EFile {
            repr: Repr::Transient {
                stream: RefCell::new(Some(Lookahead::new(transform(cursor)))),
            },
            settings,
        })
    }

    /// Canonicalize a `Transient` to `InMemory` or `OnDisk`.
    ///
    /// Peeks up to `card_cap` records: if fewer exist and
    /// `always_on_disk` is off, the stream materializes in memory;
    /// otherwise it spills to a fresh temp file. Other representations
    /// pass through unchanged.
    pub fn stored(self) -> Result<EFile<T>> {
        if !self.is_transient() {
            return Ok(self);
        }
        let settings = self.settings.clone();
        let mut cursor = self.records()?;
        let previewed = cursor.lookahead(settings.card_cap)?.len();
        if previewed < settings.card_cap && !settings.always_on_disk {
            let mut records = Vec::with_capacity(previewed);
            for record in cursor.by_ref() {
                records.push(record?);
            }
            Ok(EFile::in_memory(records, settings))
        } else {
            Self::spill(cursor, settings)
        }
    }

    /// Write a cursor to a fresh spill file, yielding an `OnDisk` EFile.
    fn spill(mut cursor: Lookahead<T>, settings: Settings<T>) -> Result<EFile<T>> {
        let path = config::fresh_spill_file(&settings.prefix, &settings.suffix_tmp)?;
        match settings.serializer.write_records(&path, &mut cursor) {
            Ok(count) => {
                debug!("spilled {} records to {}", count, path.display());
                Ok(EFile {
                    repr: Repr::OnDisk { path },
                    settings,
                })
            }
            Err(e) => {
                let _ = fs::remove_file(&path);
                Err(e)
            }
        }
    }

    /// Canonicalize `OnDisk` to `Slurped` when the file is smaller than
    /// the configured size limit (or autoslurp is on). Identity
    /// otherwise.
    pub fn slurped(self) -> Result<EFile<T>> {
        let Self { repr, settings } = self;
        match repr {
            Repr::OnDisk { path } => {
                let meta = fs::metadata(&path).map_err(|e| TrackError::from_io_path(e, &path))?;
                if !(config::autoslurp() || meta.len() < config::sz_limit()) {
                    return Ok(EFile {
                        repr: Repr::OnDisk { path },
                        settings,
                    });
                }
                let raw =
                    fs::read_to_string(&path).map_err(|e| TrackError::from_io_path(e, &path))?;
                Ok(EFile {
                    repr: Repr::Slurped {
                        raw: Arc::from(raw),
                        origin: path,
                    },
                    settings,
                })
            }
            other => Ok(EFile {
                repr: other,
                settings,
            }),
        }
    }

    /// Canonicalize to `OnDisk`.
    ///
    /// Already-on-disk files with no folder override pass through.
    /// Otherwise the records are written to a fresh file in `folder`
    /// (or the process temp dir when `None`).
    pub fn serialized(self, folder: Option<&Path>) -> Result<EFile<T>> {
        if folder.is_none() && self.is_on_disk() {
            return Ok(self);
        }
        let settings = self.settings.clone();
        let path = match folder {
            Some(dir) => config::fresh_file_in(dir, &settings.prefix, &settings.suffix_tmp)?,
            None => config::fresh_spill_file(&settings.prefix, &settings.suffix_tmp)?,
        };
        let mut cursor = self.records()?;
        match settings.serializer.write_records(&path, &mut cursor) {
            Ok(count) => {
                debug!("serialized {} records to {}", count, path.display());
                Ok(EFile {
                    repr: Repr::OnDisk { path },
                    settings,
                })
            }
            Err(e) => {
                let _ = fs::remove_file(&path);
                Err(e)
            }
        }
    }

    /// Serialize, then move the backing file to `folder/name`, appending
    /// the save suffix unless `name` already carries it. Replaces any
    /// existing file; the prior temp file no longer exists afterwards.
    ///
    /// With no folder the file lands in the process `ans/` directory.
    pub fn saved_as(self, name: &str, folder: Option<&Path>) -> Result<EFile<T>> {
        let serialized = self.serialized(None)?;
        let Repr::OnDisk { path } = &serialized.repr else {
            return Err(TrackError::FileCannotSave(name.to_string()));
        };
        let settings = serialized.settings.clone();
        let file_name = if name.ends_with(&settings.suffix_sav) {
            name.to_string()
        } else {
            format!("{}{}", name, settings.suffix_sav)
        };
        let dir = match folder {
            Some(d) => d.to_path_buf(),
            None => config::temp_layout()?.ans_dir().to_path_buf(),
        };
        let dest = dir.join(file_name);
        fs::rename(path, &dest).map_err(|e| {
            TrackError::FileCannotSave(format!(
                "{} -> {}: {}",
                path.display(),
                dest.display(),
                e
            ))
        })?;
        Ok(EFile {
            repr: Repr::OnDisk { path: dest },
            settings,
        })
    }

    /// Best-effort release of backing storage. Deletes the file behind
    /// `OnDisk` and `Slurped`, closes the stream behind `Transient`.
    /// OS errors are swallowed; calling twice is safe.
    pub fn destruct(&mut self) {
        match &mut self.repr {
            Repr::OnDisk { path } => {
                let _ = fs::remove_file(&*path);
            }
            Repr::Slurped { origin, .. } => {
                let _ = fs::remove_file(&*origin);
            }
            Repr::Transient { stream } => {
                if let Some(mut cursor) = stream.borrow_mut().take() {
                    cursor.close();
                }
            }
            Repr::InMemory { .. } => {}
        }
    }

    /// Linear-scan sortedness check under the configured order. True on
    /// empty. A `Transient` must be `stored` first.
    pub fn is_sorted(&self) -> Result<bool> {
        if self.is_transient() {
            return Err(TrackError::StreamConsumed);
        }
        let order = &*self.settings.order;
        let mut prev: Option<T> = None;
        for record in self.records()? {
            let record = record?;
            if let Some(p) = &prev {
                if order(p, &record) == Ordering::Greater {
                    return Ok(false);
                }
            }
            prev = Some(record);
        }
        Ok(true)
    }

    /// Element-wise equivalence under the configured equality.
    ///
    /// Two `OnDisk` files at the same path short-circuit to true. When
    /// `forced` is false and either side is `Transient`, the answer is
    /// `false`: comparing would consume the stream.
    pub fn has_same_value_as(&self, other: &EFile<T>, forced: bool) -> Result<bool> {
        if !forced && (self.is_transient() || other.is_transient()) {
            return Ok(false);
        }
        if let (Repr::OnDisk { path: a }, Repr::OnDisk { path: b }) = (&self.repr, &other.repr) {
            if a == b {
                return Ok(true);
            }
        }
        let equality = &*self.settings.equality;
        let mut left = self.records()?;
        let mut right = other.records()?;
        loop {
            match (left.next(), right.next()) {
                (None, None) => return Ok(true),
                (Some(a), Some(b)) => {
                    if !equality(&a?, &b?) {
                        return Ok(false);
                    }
                }
                _ => return Ok(false),
            }
        }
    }

    /// Size in bytes of the primary backing storage.
    ///
    /// Domain formats that reference sub-files can layer their own
    /// accounting on top; this base hook deliberately ignores referents.
    pub fn total_size_on_disk(&self) -> Result<u64> {
        match &self.repr {
            Repr::OnDisk { path } => {
                let meta = fs::metadata(path).map_err(|e| TrackError::from_io_path(e, path))?;
                Ok(meta.len())
            }
            Repr::Slurped { raw, .. } => Ok(raw.len() as u64),
            _ => Ok(0),
        }
    }

    /// k-way merge with other EFiles, all pre-sorted under this file's
    /// configured order.
    pub fn merged_with(self, others: Vec<EFile<T>>, on_disk: bool) -> Result<EFile<T>> {
        let mut inputs = Vec::with_capacity(others.len() + 1);
        inputs.push(self);
        inputs.extend(others);
        crate::merge::merge_efiles(inputs, on_disk)
    }

    /// External sort under `cmp`. `cap` overrides the run size (and
    /// disables sampling); `on_disk` forces an `OnDisk` result.
    pub fn sorted_with(
        self,
        cmp: Comparator<T>,
        cap: Option<usize>,
        on_disk: bool,
    ) -> Result<EFile<T>> {
        crate::sort::external_sort(self, cmp, cap, on_disk).map(|(efile, _)| efile)
    }

    /// External sort under the configured order.
    pub fn sorted(self) -> Result<EFile<T>> {
        let cmp = self.settings.comparator();
        self.sorted_with(cmp, None, false)
    }

    /// Canonicalize, then sort only when a linear scan finds the records
    /// out of order.
    pub fn sorted_if_needed(self) -> Result<EFile<T>> {
        let stored = self.stored()?;
        if stored.is_sorted()? {
            Ok(stored)
        } else {
            stored.sorted()
        }
    }
}
