//! Track-level query façade.
//!
//! [`GenomeTrack`] wraps an [`EFile`] of BED records and exposes the
//! joins genome-annotation queries actually run: synchronize an
//! experiment track against a landmark track on "overlaps" or "within
//! N bp of". The predicate builders here satisfy the monotonicity
//! contracts the synchronized iteration relies on for tracks sorted in
//! genomic order.

use crate::bed::{genomic_settings, BedRecord};
use crate::efile::EFile;
use crate::error::{Result, TrackError};
use crate::synchrony::SyncedGroups;
use std::path::Path;

/// `is_before` for genomic order with a flank window: the landmark lies
/// entirely before the experiment record's widened window.
pub fn is_before_with_flank(
    flank: u64,
) -> impl Fn(&BedRecord, &BedRecord) -> bool + Clone {
    move |y: &BedRecord, x: &BedRecord| {
        y.chrom < x.chrom || (y.chrom == x.chrom && y.end + flank <= x.start)
    }
}

/// `can_see` for genomic order with a flank window: overlap after
/// widening the experiment record by `flank` on both sides.
pub fn can_see_within(flank: u64) -> impl Fn(&BedRecord, &BedRecord) -> bool + Clone {
    move |y: &BedRecord, x: &BedRecord| {
        y.chrom == x.chrom && y.start < x.end + flank && x.start < y.end + flank
    }
}

/// A BED track backed by the externalized collection engine.
#[derive(Debug)]
pub struct GenomeTrack {
    efile: EFile<BedRecord>,
}

impl GenomeTrack {
    /// Open a BED file on disk as a track.
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self {
            efile: EFile::on_disk(path.as_ref(), genomic_settings()),
        }
    }

    /// Build a track from in-memory records.
    pub fn from_records(records: Vec<BedRecord>) -> Self {
        Self {
            efile: EFile::in_memory(records, genomic_settings()),
        }
    }

    /// Wrap an existing EFile of records.
    pub fn from_efile(efile: EFile<BedRecord>) -> Self {
        Self { efile }
    }

    /// The underlying EFile.
    pub fn efile(&self) -> &EFile<BedRecord> {
        &self.efile
    }

    pub fn into_efile(self) -> EFile<BedRecord> {
        self.efile
    }

    /// Sort into genomic order, sorting only when needed.
    pub fn sorted(self) -> Result<GenomeTrack> {
        Ok(Self {
            efile: self.efile.sorted_if_needed()?,
        })
    }

    /// Check that the track is in genomic order, as the joins require.
    pub fn verify_sorted(&self) -> Result<()> {
        if self.efile.is_sorted()? {
            Ok(())
        } else {
            Err(TrackError::NotSorted(
                "track is not in genomic order; sort it first".to_string(),
            ))
        }
    }

    /// Persist under `name` in the answer directory.
    pub fn saved_as(self, name: &str) -> Result<GenomeTrack> {
        Ok(Self {
            efile: self.efile.saved_as(name, None)?,
        })
    }

    /// Synchronize this track (experiment) against a landmark track,
    /// matching on overlap. Both tracks must be in genomic order.
    pub fn overlap_join(
        self,
        landmark: GenomeTrack,
    ) -> Result<SyncedGroups<BedRecord, impl Fn(&BedRecord, &BedRecord) -> bool, impl Fn(&BedRecord, &BedRecord) -> bool>>
    {
        self.window_join(landmark, 0)
    }

    /// Synchronize against a landmark track, matching records within
    /// `flank` bp (0 = plain overlap). Both tracks must be in genomic
    /// order.
    pub fn window_join(
        self,
        landmark: GenomeTrack,
        flank: u64,
    ) -> Result<SyncedGroups<BedRecord, impl Fn(&BedRecord, &BedRecord) -> bool, impl Fn(&BedRecord, &BedRecord) -> bool>>
    {
        let experiment = self.efile.records()?;
        let landmark = landmark.efile.records()?;
        Ok(SyncedGroups::new(
            experiment,
            landmark,
            is_before_with_flank(flank),
            can_see_within(flank),
        ))
    }

    /// For each record, the number of landmark records it overlaps.
    pub fn count_overlaps(self, landmark: GenomeTrack) -> Result<Vec<(BedRecord, usize)>> {
        self.overlap_join(landmark)?
            .fold_grouped(Vec::new(), |mut acc, x, ys| {
                acc.push((x.clone(), ys.len()));
                acc
            })
    }

    /// For each record, the mean score of the landmark records it
    /// overlaps (`None` when nothing overlaps or no overlap has a
    /// score).
    pub fn mean_score_of_overlaps(
        self,
        landmark: GenomeTrack,
    ) -> Result<Vec<(BedRecord, Option<f64>)>> {
        self.overlap_join(landmark)?
            .fold_grouped(Vec::new(), |mut acc, x, ys| {
                let scores: Vec<f64> = ys.iter().filter_map(|y| y.score).collect();
                let mean = if scores.is_empty() {
                    None
                } else {
                    Some(scores.iter().sum::<f64>() / scores.len() as f64)
                };
                acc.push((x.clone(), mean));
                acc
            })
    }
}
