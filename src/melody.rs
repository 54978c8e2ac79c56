use serde::Deserialize;

use crate::song::{Note, Track};

/// How a polyphonic track is reduced to a monophonic line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MelodyExtraction {
    /// Keep the highest pitch sounding at each onset.
    #[default]
    TopNote,
}

impl MelodyExtraction {
    pub const ALL: [MelodyExtraction; 1] = [Self::TopNote];

    /// One pitch per distinct onset, in time order.
    pub fn extract(&self, track: &Track) -> Vec<i32> {
        match self {
            Self::TopNote => top_line(track).iter().map(|n| i32::from(n.pitch)).collect(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::TopNote => "TopNote",
        }
    }
}

/// Monophonic top line of a track: notes sorted by onset, one per onset,
/// the highest pitch winning when several notes start together.
pub fn top_line(track: &Track) -> Vec<Note> {
    let mut line: Vec<Note> = Vec::with_capacity(track.notes.len());
    for note in track.sorted_notes() {
        match line.last_mut() {
            Some(last) if last.time == note.time => {
                if note.pitch > last.pitch {
                    *last = note;
                }
            }
            _ => line.push(note),
        }
    }
    line
}

/// Transformation applied to an extracted pitch line before comparison.
/// Every variant preserves the sequence length.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Standardization {
    /// Absolute pitches, unchanged.
    Default,
    /// Interval to the previous event; first element is 0.
    #[default]
    RelativeInterval,
    /// Interval to the first event.
    BaselineInterval,
    /// Direction of the interval to the previous event: -1, 0 or 1.
    ParsonsCode,
}

impl Standardization {
    pub const ALL: [Standardization; 4] = [
        Self::Default,
        Self::RelativeInterval,
        Self::BaselineInterval,
        Self::ParsonsCode,
    ];

    pub fn standardize(&self, line: &[i32]) -> Vec<i32> {
        match self {
            Self::Default => line.to_vec(),
            Self::RelativeInterval => intervals(line).collect(),
            Self::BaselineInterval => match line.first() {
                Some(&base) => line.iter().map(|p| p - base).collect(),
                None => Vec::new(),
            },
            Self::ParsonsCode => intervals(line).map(i32::signum).collect(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Default => "Default",
            Self::RelativeInterval => "RelativeInterval",
            Self::BaselineInterval => "BaselineInterval",
            Self::ParsonsCode => "ParsonsCode",
        }
    }
}

/// `0` followed by successive differences. Empty in, empty out.
fn intervals(line: &[i32]) -> impl Iterator<Item = i32> + '_ {
    let head = line.first().map(|_| 0);
    head.into_iter()
        .chain(line.windows(2).map(|w| w[1] - w[0]))
}
