//! Global configuration for the track-processing runtime.
//!
//! The knobs here are process-wide, set once at startup and read during
//! pipeline execution. They follow the same atomic-flag discipline used
//! for parsing options: negligible read overhead, no locks.
//!
//! The temp layout is created lazily on first use:
//!
//! ```text
//! <OS tmp>/synchrony-<random>/
//!   tmp/    # spill files from sort/serialize operations
//!   ans/    # files saved without an explicit folder
//! ```
//!
//! Once the layout exists the knobs are frozen: setters return `false`
//! and leave the previous value in place.

use crate::error::Result;
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::OnceLock;

/// Default slurp threshold: files smaller than this may be loaded whole.
pub const DEFAULT_SZ_LIMIT: u64 = 10_000_000;

static SZ_LIMIT: AtomicU64 = AtomicU64::new(DEFAULT_SZ_LIMIT);
static AUTOSLURP: AtomicBool = AtomicBool::new(false);
static DEBUG: AtomicBool = AtomicBool::new(false);

static LAYOUT: OnceLock<TempLayout> = OnceLock::new();

/// Set the slurp size threshold in bytes.
///
/// Returns `false` (without changing the value) once the temp layout
/// exists, i.e. after the first file operation has run.
pub fn set_sz_limit(bytes: u64) -> bool {
    if frozen() {
        return false;
    }
    SZ_LIMIT.store(bytes, Ordering::Release);
    true
}

/// Current slurp size threshold in bytes.
#[inline]
pub fn sz_limit() -> u64 {
    SZ_LIMIT.load(Ordering::Acquire)
}

/// Force `slurped()` to load files regardless of their size.
pub fn set_autoslurp(enabled: bool) -> bool {
    if frozen() {
        return false;
    }
    AUTOSLURP.store(enabled, Ordering::Release);
    true
}

/// Check whether autoslurp is enabled.
#[inline]
pub fn autoslurp() -> bool {
    AUTOSLURP.load(Ordering::Acquire)
}

/// Enable verbose internal reporting.
pub fn set_debug(enabled: bool) -> bool {
    if frozen() {
        return false;
    }
    DEBUG.store(enabled, Ordering::Release);
    true
}

/// Check whether verbose internal reporting is enabled.
#[inline]
pub fn is_debug() -> bool {
    DEBUG.load(Ordering::Acquire)
}

/// True once the temp layout has been created.
pub fn frozen() -> bool {
    LAYOUT.get().is_some()
}

/// Per-process temp directory layout.
///
/// The root directory is never removed by this process; stale roots left
/// behind by a crash are isolated under the OS temp dir and can be
/// collected by the host.
pub struct TempLayout {
    tmp: PathBuf,
    ans: PathBuf,
    _root: tempfile::TempDir,
}

impl TempLayout {
    fn create() -> Result<Self> {
        let root = tempfile::Builder::new().prefix("synchrony-").tempdir()?;
        let tmp = root.path().join("tmp");
        let ans = root.path().join("ans");
        fs::create_dir_all(&tmp)?;
        fs::create_dir_all(&ans)?;
        debug!("created temp layout at {}", root.path().display());
        Ok(Self {
            tmp,
            ans,
            _root: root,
        })
    }

    /// Directory for spill files.
    pub fn tmp_dir(&self) -> &Path {
        &self.tmp
    }

    /// Directory for saved outputs with no explicit folder.
    pub fn ans_dir(&self) -> &Path {
        &self.ans
    }
}

/// The process-wide temp layout, created on first call.
pub fn temp_layout() -> Result<&'static TempLayout> {
    if let Some(layout) = LAYOUT.get() {
        return Ok(layout);
    }
    let built = TempLayout::create()?;
    // A racing initializer's directory is simply dropped and removed.
    Ok(LAYOUT.get_or_init(move || built))
}

/// Create a fresh, uniquely named file in `dir` as `{prefix}{random}{suffix}`.
///
/// The file persists after the handle is dropped; callers are responsible
/// for `destruct`-style cleanup.
pub(crate) fn fresh_file_in(dir: &Path, prefix: &str, suffix: &str) -> Result<PathBuf> {
    let named = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(suffix)
        .tempfile_in(dir)?;
    let (_, path) = named
        .keep()
        .map_err(|e| crate::error::TrackError::Io(e.error))?;
    Ok(path)
}

/// Create a fresh spill file in the process temp directory.
pub(crate) fn fresh_spill_file(prefix: &str, suffix: &str) -> Result<PathBuf> {
    let layout = temp_layout()?;
    fresh_file_in(layout.tmp_dir(), prefix, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_has_tmp_and_ans() {
        let layout = temp_layout().unwrap();
        assert!(layout.tmp_dir().is_dir());
        assert!(layout.ans_dir().is_dir());
        assert_eq!(layout.tmp_dir().parent(), layout.ans_dir().parent());
    }

    #[test]
    fn test_setters_refuse_after_freeze() {
        let _ = temp_layout().unwrap();
        assert!(frozen());
        assert!(!set_sz_limit(42));
        assert_ne!(sz_limit(), 42);
    }

    #[test]
    fn test_fresh_file_naming() {
        let path = fresh_spill_file("synchrony-", ".eftmp").unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("synchrony-"));
        assert!(name.ends_with(".eftmp"));
        assert!(path.is_file());
        std::fs::remove_file(path).unwrap();
    }
}
