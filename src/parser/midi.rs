use std::collections::{BTreeMap, HashMap, VecDeque};

use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};

use super::{scale_ticks, ParseError, Result};
use crate::song::{default_bpm, Note, Song, SongMetadata, Track};

/// General MIDI percussion channel (channel 10, zero-based 9).
const DRUM_CHANNEL: u8 = 9;

/// Note span in source ticks: (start, end, pitch).
type RawNote = (u64, u64, u8);

/// Parse a Standard MIDI File into a song.
///
/// Every non-percussion channel of every track chunk becomes one `Track`,
/// with ticks rescaled to `ppq`. Notes shorter than one tick after
/// rescaling are dropped.
pub fn parse_midi(bytes: &[u8], artist: &str, name: &str, ppq: u32) -> Result<Song> {
    let smf = Smf::parse(bytes)?;
    let source_ppq = match smf.header.timing {
        Timing::Metrical(t) if t.as_int() > 0 => u32::from(t.as_int()),
        _ => return Err(ParseError::UnsupportedTiming),
    };

    let mut max_tick: u64 = 0;
    let mut tempo: Option<u32> = None;
    let mut raw_tracks: Vec<Vec<RawNote>> = Vec::new();

    for events in &smf.tracks {
        let mut tick: u64 = 0;
        let mut open: HashMap<(u8, u8), VecDeque<u64>> = HashMap::new();
        let mut channels: BTreeMap<u8, Vec<RawNote>> = BTreeMap::new();

        for event in events {
            tick += u64::from(event.delta.as_int());
            max_tick = max_tick.max(tick);

            match event.kind {
                TrackEventKind::Meta(MetaMessage::Tempo(t)) => {
                    if tempo.is_none() && t.as_int() > 0 {
                        tempo = Some(t.as_int());
                    }
                }
                TrackEventKind::Midi { channel, message } => {
                    let channel = channel.as_int();
                    if channel == DRUM_CHANNEL {
                        continue;
                    }
                    match message {
                        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                            open.entry((channel, key.as_int())).or_default().push_back(tick);
                        }
                        MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                            let key = key.as_int();
                            if let Some(start) = open.get_mut(&(channel, key)).and_then(|q| q.pop_front()) {
                                channels.entry(channel).or_default().push((start, tick, key));
                            }
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        let dangling: usize = open.values().map(VecDeque::len).sum();
        if dangling > 0 {
            log::debug!("Dropping {} notes without a note-off", dangling);
        }
        raw_tracks.extend(channels.into_values());
    }

    let grid_length = scale_ticks(source_ppq, ppq, max_tick);
    let tracks = raw_tracks
        .into_iter()
        .map(|raw| {
            let notes = raw
                .into_iter()
                .filter_map(|(start, end, pitch)| {
                    let time = scale_ticks(source_ppq, ppq, start);
                    let length = scale_ticks(source_ppq, ppq, end).saturating_sub(time);
                    (length > 0).then(|| Note::new(time, length, pitch))
                })
                .collect::<Vec<_>>();
            Track::new(notes, grid_length)
        })
        .filter(|t| !t.is_empty())
        .collect();

    let bpm = tempo
        .map(|us_per_quarter| (60_000_000.0 / f64::from(us_per_quarter)).round() as u32)
        .unwrap_or_else(default_bpm);

    Ok(Song::new(tracks, Some(SongMetadata::new(artist, name, bpm))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use midly::{Format, Header, TrackEvent};

    fn write_midi(tracks: Vec<Vec<TrackEvent<'static>>>, ppq: u16) -> Vec<u8> {
        let header = Header::new(Format::Parallel, Timing::Metrical(ppq.into()));
        let tracks = tracks
            .into_iter()
            .map(|mut t| {
                t.push(TrackEvent {
                    delta: 0.into(),
                    kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
                });
                t
            })
            .collect();
        let smf = Smf { header, tracks };
        let mut buffer = Vec::new();
        smf.write(&mut buffer).expect("write midi");
        buffer
    }

    fn note_on(delta: u32, channel: u8, key: u8, vel: u8) -> TrackEvent<'static> {
        TrackEvent {
            delta: delta.into(),
            kind: TrackEventKind::Midi {
                channel: channel.into(),
                message: MidiMessage::NoteOn {
                    key: key.into(),
                    vel: vel.into(),
                },
            },
        }
    }

    fn note_off(delta: u32, channel: u8, key: u8) -> TrackEvent<'static> {
        TrackEvent {
            delta: delta.into(),
            kind: TrackEventKind::Midi {
                channel: channel.into(),
                message: MidiMessage::NoteOff {
                    key: key.into(),
                    vel: 0.into(),
                },
            },
        }
    }

    fn tempo(delta: u32, us_per_quarter: u32) -> TrackEvent<'static> {
        TrackEvent {
            delta: delta.into(),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(us_per_quarter.into())),
        }
    }

    #[test]
    fn test_parse_rescales_ticks() {
        let bytes = write_midi(
            vec![vec![
                tempo(0, 500_000),
                note_on(0, 0, 60, 100),
                note_off(96, 0, 60),
                note_on(0, 0, 64, 100),
                note_on(0, 0, 67, 0), // velocity 0 without an open note
                note_off(48, 0, 64),
            ]],
            96,
        );
        let song = parse_midi(&bytes, "Artist", "Name", 480).unwrap();
        let meta = song.metadata.as_ref().unwrap();
        assert_eq!(meta.artist, "Artist");
        assert_eq!(meta.name, "Name");
        assert_eq!(meta.bpm, 120);
        assert_eq!(song.tracks.len(), 1);
        assert_eq!(
            song.tracks[0].notes,
            vec![Note::new(0, 480, 60), Note::new(480, 240, 64)]
        );
        assert_eq!(song.tracks[0].grid_length, 720);
    }

    #[test]
    fn test_parse_skips_drums_and_splits_channels() {
        let bytes = write_midi(
            vec![
                vec![
                    note_on(0, 0, 60, 90),
                    note_on(0, 1, 40, 90),
                    note_on(0, 9, 36, 90),
                    note_off(480, 0, 60),
                    note_off(0, 1, 40),
                    note_off(0, 9, 36),
                ],
                vec![tempo(0, 400_000), note_on(0, 2, 72, 80), note_on(240, 2, 72, 0)],
            ],
            480,
        );
        let song = parse_midi(&bytes, "a", "b", 480).unwrap();
        assert_eq!(song.tracks.len(), 3);
        assert_eq!(song.tracks[0].notes, vec![Note::new(0, 480, 60)]);
        assert_eq!(song.tracks[1].notes, vec![Note::new(0, 480, 40)]);
        assert_eq!(song.tracks[2].notes, vec![Note::new(0, 240, 72)]);
        assert_eq!(song.metadata.unwrap().bpm, 150);
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(
            parse_midi(b"not a midi file", "a", "b", 480),
            Err(ParseError::Midi(_))
        ));
    }
}
