use std::collections::BTreeMap;

use serde::Deserialize;

use crate::song::{Note, Track};

/// How a song track is cut into windows comparable with a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segmentation {
    /// The whole track is a single window.
    OneSegment,
    /// Consecutive windows of `segment_len` ticks.
    #[default]
    FixedLength,
}

impl Segmentation {
    pub const ALL: [Segmentation; 2] = [Self::OneSegment, Self::FixedLength];

    /// Split `track` into windows of `segment_len` ticks.
    ///
    /// For `FixedLength`, notes are rebased to the start of their window and
    /// notes crossing a window boundary are cut off at it; the overhang is not
    /// carried into the next window. Windows without any note onset are not
    /// produced. Tracks no longer than one window are returned as-is.
    pub fn segment(&self, track: &Track, segment_len: u32) -> Vec<Track> {
        match self {
            Self::OneSegment => vec![track.clone()],
            Self::FixedLength => fixed_length(track, segment_len),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::OneSegment => "OneSegment",
            Self::FixedLength => "FixedLength",
        }
    }
}

fn fixed_length(track: &Track, segment_len: u32) -> Vec<Track> {
    if segment_len == 0 || track.grid_length <= segment_len {
        return vec![track.clone()];
    }

    let mut windows: BTreeMap<u32, Vec<Note>> = BTreeMap::new();
    for note in &track.notes {
        let index = note.time / segment_len;
        let time = note.time % segment_len;
        let length = note.length.min(segment_len - time);
        windows
            .entry(index)
            .or_default()
            .push(Note::new(time, length, note.pitch));
    }

    windows
        .into_values()
        .map(|notes| Track::new(notes, segment_len))
        .collect()
}
