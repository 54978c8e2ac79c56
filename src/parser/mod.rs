//! Boundary codecs: Standard MIDI Files in, BBS-timed JSON queries in and out.

pub mod midi;
pub mod query;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("MIDI parse error: {0}")]
    Midi(#[from] midly::Error),
    #[error("SMPTE timecode timing is not supported")]
    UnsupportedTiming,
    #[error("Invalid bars:beats:sixteenths value: {0:?}")]
    InvalidBbs(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ParseError>;

/// Rescale a tick value from one resolution to another, rounding down.
pub fn scale_ticks(old_ppq: u32, new_ppq: u32, ticks: u64) -> u32 {
    if old_ppq == 0 {
        return 0;
    }
    let scaled = ticks * u64::from(new_ppq) / u64::from(old_ppq);
    u32::try_from(scaled).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_ticks() {
        assert_eq!(scale_ticks(4, 480, 1), 120);
        assert_eq!(scale_ticks(96, 480, 48), 240);
        assert_eq!(scale_ticks(960, 480, 3), 1);
        assert_eq!(scale_ticks(0, 480, 3), 0);
    }
}
