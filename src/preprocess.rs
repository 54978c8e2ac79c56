use crate::melody::{MelodyExtraction, Standardization};
use crate::ngram::QueryFingerprint;
use crate::segment::Segmentation;
use crate::song::{Segment, Song, Track};

/// Turns raw tracks into the numeric sequences the similarity strategies compare.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Preprocessor {
    pub extraction: MelodyExtraction,
    pub standardization: Standardization,
    pub segmentation: Segmentation,
}

impl Preprocessor {
    pub fn new(
        extraction: MelodyExtraction,
        standardization: Standardization,
        segmentation: Segmentation,
    ) -> Self {
        Self {
            extraction,
            standardization,
            segmentation,
        }
    }

    /// Extract the melody line of `track` and standardize it.
    pub fn prep_track(&self, track: &Track) -> Vec<i32> {
        let line = self.extraction.extract(track);
        self.standardization.standardize(&line)
    }

    /// Segment every track of `song` and preprocess each window.
    ///
    /// With a query fingerprint, windows it does not admit are dropped before
    /// their melody is extracted.
    pub fn preprocess(
        &self,
        song: &Song,
        segment_len: u32,
        fingerprint: Option<&QueryFingerprint>,
    ) -> Vec<Segment> {
        song.tracks
            .iter()
            .flat_map(|track| self.segmentation.segment(track, segment_len))
            .filter(|track| fingerprint.is_none_or(|fp| fp.admits(track)))
            .map(|track| {
                let melody = self.prep_track(&track);
                Segment { track, melody }
            })
            .collect()
    }
}
