//! Melodic-contour n-gram fingerprints.
//!
//! A track's top line is reduced to its contour (up / same / down per note),
//! every window of `length` contour steps is packed into an integer class, and
//! the set of classes serves as a cheap shape fingerprint. Candidates whose
//! fingerprint barely overlaps the query's are skipped before any DP compare.

use std::collections::HashSet;

use serde::Deserialize;

use crate::melody::top_line;
use crate::song::{Note, Track};

pub const DEFAULT_NGRAM_LENGTH: usize = 5;

/// Longest window whose class still fits in a `u64`.
pub const MAX_NGRAM_LENGTH: usize = 32;

/// Overlap a candidate must exceed to be compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PruneThreshold {
    /// More than `|query classes| / divisor` shared classes (integer division).
    Divisor(usize),
    /// More than a fixed number of shared classes.
    MinCount(usize),
}

impl Default for PruneThreshold {
    fn default() -> Self {
        Self::Divisor(3)
    }
}

impl PruneThreshold {
    fn minimum(&self, query_classes: usize) -> usize {
        match *self {
            Self::Divisor(d) => query_classes / d.max(1),
            Self::MinCount(c) => c,
        }
    }
}

/// Per-note contour: 0 same pitch as the previous note, 1 higher, -1 lower.
/// The first note is compared with itself.
pub fn melodic_contour(notes: &[Note]) -> Vec<i8> {
    let Some(first) = notes.first() else {
        return Vec::new();
    };
    let mut last_pitch = first.pitch;
    notes
        .iter()
        .map(|n| {
            let step = match n.pitch.cmp(&last_pitch) {
                std::cmp::Ordering::Equal => 0,
                std::cmp::Ordering::Less => -1,
                std::cmp::Ordering::Greater => 1,
            };
            last_pitch = n.pitch;
            step
        })
        .collect()
}

/// Pack a contour window into a class: start from `0b10`, then two bits per
/// step after the first (`01` up, `10` same, `11` down).
pub fn classify_window(window: &[i8]) -> u64 {
    window.iter().skip(1).fold(0b10, |class, &step| {
        let code = match step {
            1 => 0b01,
            0 => 0b10,
            _ => 0b11,
        };
        class << 2 | code
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NGramPruner {
    length: usize,
    threshold: PruneThreshold,
}

impl Default for NGramPruner {
    fn default() -> Self {
        Self::new(DEFAULT_NGRAM_LENGTH, PruneThreshold::default())
    }
}

impl NGramPruner {
    /// `length` is clamped to `1..=MAX_NGRAM_LENGTH`.
    pub fn new(length: usize, threshold: PruneThreshold) -> Self {
        Self {
            length: length.clamp(1, MAX_NGRAM_LENGTH),
            threshold,
        }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Distinct n-gram classes of `track`. Empty when the top line has fewer
    /// notes than the window length.
    pub fn fingerprints(&self, track: &Track) -> HashSet<u64> {
        let contour = melodic_contour(&top_line(track));
        contour.windows(self.length).map(classify_window).collect()
    }

    /// Fingerprint the query once; the result filters every candidate segment.
    pub fn query(&self, track: &Track) -> QueryFingerprint {
        let classes = self.fingerprints(track);
        let minimum = self.threshold.minimum(classes.len());
        if classes.is_empty() {
            log::debug!("Query too short for {}-grams, no candidate can pass", self.length);
        }
        QueryFingerprint {
            pruner: *self,
            classes,
            minimum,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryFingerprint {
    pruner: NGramPruner,
    classes: HashSet<u64>,
    minimum: usize,
}

impl QueryFingerprint {
    /// Whether `segment` shares more than the threshold's number of classes
    /// with the query. A query without any class admits nothing.
    pub fn admits(&self, segment: &Track) -> bool {
        let classes = self.pruner.fingerprints(segment);
        self.classes.intersection(&classes).count() > self.minimum
    }

    pub fn classes(&self) -> &HashSet<u64> {
        &self.classes
    }
}
