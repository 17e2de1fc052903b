//! Error taxonomy shared by the whole crate.

use std::io;
use std::path::Path;
use thiserror::Error;

/// Errors surfaced by track processing.
#[derive(Error, Debug)]
pub enum TrackError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Cannot save file: {0}")]
    FileCannotSave(String),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Input not sorted: {0}")]
    NotSorted(String),

    #[error("Transient stream already consumed or not re-readable")]
    StreamConsumed,

    #[error("End of stream")]
    EndOfStream,
}

pub type Result<T> = std::result::Result<T, TrackError>;

impl TrackError {
    /// Map an I/O error on `path`, turning a missing file into `FileNotFound`.
    pub(crate) fn from_io_path(err: io::Error, path: &Path) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            TrackError::FileNotFound(path.display().to_string())
        } else {
            TrackError::Io(err)
        }
    }
}
