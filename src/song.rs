use serde::{Deserialize, Serialize};

/// A single note. `time` and `length` are in ticks at the library PPQ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Note {
    pub time: u32,
    pub length: u32,
    pub pitch: u8,
}

impl Note {
    pub fn new(time: u32, length: u32, pitch: u8) -> Self {
        Self { time, length, pitch }
    }
}

/// A sequence of notes plus its total duration in ticks.
///
/// Notes are not guaranteed to be sorted; use [`Track::sorted_notes`] when
/// time order matters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Track {
    pub notes: Vec<Note>,
    pub grid_length: u32,
}

impl Track {
    pub fn new(notes: Vec<Note>, grid_length: u32) -> Self {
        Self { notes, grid_length }
    }

    /// Notes ordered by onset. Stable, so same-onset notes keep their input order.
    pub fn sorted_notes(&self) -> Vec<Note> {
        let mut notes = self.notes.clone();
        notes.sort_by_key(|n| n.time);
        notes
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}

/// External links for a song (streaming preview, song page).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotifyMetadata {
    pub preview_url: String,
    pub song_url: String,
}

/// Descriptive song data. Two songs are the same logical song iff
/// `artist` and `name` match exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongMetadata {
    pub artist: String,
    pub name: String,
    #[serde(default = "default_bpm")]
    pub bpm: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spotify: Option<SpotifyMetadata>,
}

pub(crate) fn default_bpm() -> u32 {
    120
}

impl SongMetadata {
    pub fn new(artist: impl Into<String>, name: impl Into<String>, bpm: u32) -> Self {
        Self {
            artist: artist.into(),
            name: name.into(),
            bpm,
            spotify: None,
        }
    }

    /// `"{artist} - {name}"`, used as storage key and display title.
    pub fn slug(&self) -> String {
        format!("{} - {}", self.artist, self.name)
    }

    /// Identity used for deduplicating ranked results.
    pub fn identity(&self) -> (&str, &str) {
        (&self.artist, &self.name)
    }
}

/// A song as stored in a repository. Songs without metadata can be
/// loaded but are never ranked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub tracks: Vec<Track>,
    #[serde(default)]
    pub metadata: Option<SongMetadata>,
}

impl Song {
    pub fn new(tracks: Vec<Track>, metadata: Option<SongMetadata>) -> Self {
        Self { tracks, metadata }
    }

    pub fn note_count(&self) -> usize {
        self.tracks.iter().map(|t| t.notes.len()).sum()
    }
}

/// A window of a track together with its preprocessed melody.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub track: Track,
    pub melody: Vec<i32>,
}

/// One ranked hit: the song's metadata, the score under the active
/// similarity strategy, and the matching segment (not the whole song).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub metadata: SongMetadata,
    pub similarity: f64,
    pub track: Track,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted_notes_is_stable() {
        let track = Track::new(
            vec![Note::new(10, 1, 60), Note::new(0, 1, 62), Note::new(10, 1, 55), Note::new(0, 1, 70)],
            20,
        );
        let sorted = track.sorted_notes();
        assert_eq!(
            sorted,
            vec![Note::new(0, 1, 62), Note::new(0, 1, 70), Note::new(10, 1, 60), Note::new(10, 1, 55)]
        );
    }

    #[test]
    fn test_slug() {
        let m = SongMetadata::new("Queen", "Bohemian Rhapsody", 72);
        assert_eq!(m.slug(), "Queen - Bohemian Rhapsody");
    }

    #[test]
    fn test_song_json_shape() {
        let song = Song::new(
            vec![Track::new(vec![Note::new(0, 480, 60)], 1920)],
            Some(SongMetadata::new("a", "b", 100)),
        );
        let json = serde_json::to_value(&song).unwrap();
        assert_eq!(json["metadata"]["artist"], "a");
        assert_eq!(json["tracks"][0]["grid_length"], 1920);
        assert_eq!(json["tracks"][0]["notes"][0]["pitch"], 60);

        let back: Song = serde_json::from_value(json).unwrap();
        assert_eq!(back, song);
    }

    #[test]
    fn test_metadata_defaults() {
        let m: SongMetadata = serde_json::from_str(r#"{"artist":"x","name":"y"}"#).unwrap();
        assert_eq!(m.bpm, 120);
        assert!(m.spotify.is_none());
    }
}
