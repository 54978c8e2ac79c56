//! JSON wire format used by the search front end.
//!
//! Note times and lengths travel as `"bars:beats:sixteenths"` strings on a
//! 4-PPQ grid; internally everything is in ticks at the library resolution.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{scale_ticks, ParseError, Result};
use crate::song::{default_bpm, Note, SearchResult, SpotifyMetadata, Track};

/// Resolution of the BBS grid (one tick per sixteenth).
const BBS_PPQ: u32 = 4;

static BBS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+):(\d+):(\d+)\s*$").unwrap());

/// `"m:b:s"` → ticks at `ppq`.
pub fn bbs_to_ticks(bbs: &str, ppq: u32) -> Result<u32> {
    let caps = BBS_RE
        .captures(bbs)
        .ok_or_else(|| ParseError::InvalidBbs(bbs.to_string()))?;
    let field = |i: usize| -> Result<u64> {
        caps[i]
            .parse::<u64>()
            .map_err(|_| ParseError::InvalidBbs(bbs.to_string()))
    };
    let sixteenths = field(1)? * 16 + field(2)? * 4 + field(3)?;
    Ok(scale_ticks(BBS_PPQ, ppq, sixteenths))
}

/// Ticks at `ppq` → `"m:b:s"`, rounding down to the sixteenth.
pub fn ticks_to_bbs(ticks: u32, ppq: u32) -> String {
    let ppq = ppq.max(1);
    let measures = ticks / (ppq * 4);
    let beats = (ticks % (ppq * 4)) / ppq;
    let sixteenths = u64::from(ticks % ppq) * 4 / u64::from(ppq);
    format!("{}:{}:{}", measures, beats, sixteenths)
}

/// Like [`ticks_to_bbs`] but never `"0:0:0"`: sub-sixteenth lengths are
/// shown as one sixteenth.
pub fn length_to_bbs(ticks: u32, ppq: u32) -> String {
    let bbs = ticks_to_bbs(ticks, ppq);
    if bbs == "0:0:0" {
        "0:0:1".to_string()
    } else {
        bbs
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireNote {
    pub pitch: u8,
    pub time: String,
    pub length: String,
}

/// A search request as posted by the front end.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub notes: Vec<WireNote>,
    /// Query duration in sixteenths.
    pub grid_length: u32,
    #[serde(default = "default_bpm")]
    pub bpm: u32,
    #[serde(default)]
    pub similarity_strategy: Option<String>,
}

impl QueryRequest {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Convert to a track at `ppq`. Notes whose length rounds to zero are dropped.
    pub fn to_track(&self, ppq: u32) -> Result<Track> {
        let mut notes = Vec::with_capacity(self.notes.len());
        for n in &self.notes {
            let time = bbs_to_ticks(&n.time, ppq)?;
            let length = bbs_to_ticks(&n.length, ppq)?;
            if length == 0 {
                log::debug!("Dropping zero-length query note at {}", n.time);
                continue;
            }
            notes.push(Note::new(time, length, n.pitch));
        }
        let grid_length = scale_ticks(BBS_PPQ, ppq, u64::from(self.grid_length));
        Ok(Track::new(notes, grid_length))
    }
}

/// A ranked result as returned to the front end.
#[derive(Debug, Clone, Serialize)]
pub struct WireResult {
    pub artist: String,
    pub name: String,
    pub bpm: u32,
    pub similarity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spotify: Option<SpotifyMetadata>,
    pub notes: Vec<WireNote>,
}

impl WireResult {
    pub fn from_result(result: &SearchResult, ppq: u32) -> Self {
        Self {
            artist: result.metadata.artist.clone(),
            name: result.metadata.name.clone(),
            bpm: result.metadata.bpm,
            similarity: result.similarity,
            spotify: result.metadata.spotify.clone(),
            notes: result
                .track
                .notes
                .iter()
                .map(|n| WireNote {
                    pitch: n.pitch,
                    time: ticks_to_bbs(n.time, ppq),
                    length: length_to_bbs(n.length, ppq),
                })
                .collect(),
        }
    }
}

/// Serialize ranked results to the front-end JSON array.
pub fn results_to_json(results: &[SearchResult], ppq: u32) -> Result<String> {
    let wire: Vec<WireResult> = results
        .iter()
        .map(|r| WireResult::from_result(r, ppq))
        .collect();
    Ok(serde_json::to_string_pretty(&wire)?)
}
