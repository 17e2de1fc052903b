// Clippy allows for the whole crate
#![allow(clippy::too_many_arguments)]
#![allow(clippy::should_implement_trait)]
#![allow(clippy::type_complexity)]

//! Synchrony: external-memory track processing with synchronized iteration.
//!
//! This library processes very large, ordered, record-oriented files
//! that may not fit in memory, for genome-annotation workloads where
//! queries synchronize multiple sorted streams on positional predicates
//! such as "overlaps" or "within 100 bp of".
//!
//! # Features
//!
//! - **Externalized collections**: the [`efile::EFile`] abstraction moves
//!   record sequences between on-disk, in-memory, slurped, and transient
//!   representations based on size.
//! - **External sort and merge**: sample-driven run sizing, automatic
//!   spill to a per-process temp directory, k-way merge.
//! - **Synchronized iteration**: single-pass joins, folds, and maps over
//!   a landmark and an experiment stream under caller-supplied
//!   `is_before` / `can_see` predicates.
//!
//! # Example
//!
//! ```rust,no_run
//! use synchrony_tracks::query::GenomeTrack;
//!
//! let peaks = GenomeTrack::open("peaks.bed").sorted().unwrap();
//! let genes = GenomeTrack::open("genes.bed").sorted().unwrap();
//!
//! // For each peak, the genes within 100 bp.
//! for group in peaks.window_join(genes, 100).unwrap() {
//!     let (peak, nearby) = group.unwrap();
//!     println!("{}\t{}", peak, nearby.len());
//! }
//! ```
//!
//! The engine is strictly sequential: one logical cursor per stream,
//! suspension only at iterator advance points. Cancellation is
//! closure-driven; dropping a result stream closes its inputs.

pub mod bed;
pub mod codec;
pub mod config;
pub mod efile;
pub mod error;
pub mod lookahead;
pub mod merge;
pub mod query;
pub mod sort;
pub mod synchrony;

// Re-export commonly used types
pub use bed::{genomic_settings, BedCodec, BedRecord, Strand};
pub use codec::{Deserializer, FnCodec, RecordStream, Serializer};
pub use efile::{Comparator, EFile, Equality, Settings};
pub use error::{Result, TrackError};
pub use lookahead::Lookahead;
pub use sort::SortStats;
pub use synchrony::{SyncedGroups, SyncedPairs};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::bed::{genomic_settings, BedCodec, BedRecord, Strand};
    pub use crate::codec::{Deserializer, FnCodec, Serializer};
    pub use crate::efile::{EFile, Settings};
    pub use crate::error::{Result, TrackError};
    pub use crate::lookahead::Lookahead;
    pub use crate::query::GenomeTrack;
    pub use crate::synchrony::SyncedGroups;
}
