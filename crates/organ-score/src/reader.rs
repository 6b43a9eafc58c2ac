use crate::note::NoteEvent;
use crate::{Error, Result};
use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use std::collections::{HashMap, VecDeque};
use std::path::Path;

/// Default tempo when a file carries no tempo events (120 BPM).
const DEFAULT_MICROS_PER_BEAT: u32 = 500_000;

/// Tick → seconds conversion for one file.
enum Clock {
    Metrical {
        ppq: f64,
        /// (tick, seconds at tick, microseconds per beat from tick on)
        segments: Vec<(u64, f64, u32)>,
    },
    Timecode {
        ticks_per_second: f64,
    },
}

impl Clock {
    fn from_smf(smf: &Smf) -> Self {
        match smf.header.timing {
            Timing::Metrical(ppq) => {
                let ppq = f64::from(ppq.as_int().max(1));

                // Tempo events may live on any track (format 1 puts them on track 0)
                let mut tempos: Vec<(u64, u32)> = Vec::new();
                for track in &smf.tracks {
                    let mut tick: u64 = 0;
                    for event in track {
                        tick += u64::from(event.delta.as_int());
                        if let TrackEventKind::Meta(MetaMessage::Tempo(tempo)) = event.kind {
                            tempos.push((tick, tempo.as_int()));
                        }
                    }
                }
                tempos.sort_by_key(|(tick, _)| *tick);

                let mut segments = vec![(0u64, 0.0f64, DEFAULT_MICROS_PER_BEAT)];
                for (tick, usec) in tempos {
                    let Some(&(last_tick, last_secs, last_usec)) = segments.last() else {
                        continue;
                    };
                    if tick == last_tick {
                        // Later event at the same tick wins
                        if let Some(last) = segments.last_mut() {
                            last.2 = usec;
                        }
                        continue;
                    }
                    let secs = last_secs
                        + (tick - last_tick) as f64 * f64::from(last_usec) / ppq / 1_000_000.0;
                    segments.push((tick, secs, usec));
                }

                Clock::Metrical { ppq, segments }
            }
            Timing::Timecode(fps, subframes) => Clock::Timecode {
                ticks_per_second: (f64::from(fps.as_f32()) * f64::from(subframes)).max(1.0),
            },
        }
    }

    fn seconds(&self, tick: u64) -> f64 {
        match self {
            Clock::Metrical { ppq, segments } => {
                let idx = segments
                    .partition_point(|(t, _, _)| *t <= tick)
                    .saturating_sub(1);
                let (seg_tick, seg_secs, usec) = segments[idx];
                seg_secs + (tick - seg_tick) as f64 * f64::from(usec) / ppq / 1_000_000.0
            }
            Clock::Timecode { ticks_per_second } => tick as f64 / ticks_per_second,
        }
    }
}

/// Extract every note from Standard MIDI File bytes.
///
/// Notes from all tracks are pooled: track order first, then the order in
/// which each note ended. Note-ons are paired with note-offs first-in
/// first-out per (channel, key); a note-on with velocity 0 is a note-off.
/// Notes still sounding at the end of a track end at that track's last tick.
pub fn read_notes(bytes: &[u8]) -> Result<Vec<NoteEvent>> {
    let smf = Smf::parse(bytes).map_err(|e| Error::MidiParse(e.to_string()))?;
    let clock = Clock::from_smf(&smf);

    let mut notes = Vec::new();

    for track in &smf.tracks {
        let mut current_tick: u64 = 0;
        let mut pending: HashMap<(u8, u8), VecDeque<(u64, u8)>> = HashMap::new();

        for event in track {
            current_tick += u64::from(event.delta.as_int());

            let TrackEventKind::Midi { channel, message } = event.kind else {
                continue;
            };
            let ch = channel.as_int();

            match message {
                MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                    pending
                        .entry((ch, key.as_int()))
                        .or_default()
                        .push_back((current_tick, vel.as_int()));
                }
                MidiMessage::NoteOff { key, .. } | MidiMessage::NoteOn { key, .. } => {
                    let key = key.as_int();
                    if let Some((onset, velocity)) =
                        pending.get_mut(&(ch, key)).and_then(|q| q.pop_front())
                    {
                        notes.push(NoteEvent {
                            pitch: key,
                            velocity,
                            start: clock.seconds(onset),
                            end: clock.seconds(current_tick),
                        });
                    }
                }
                _ => {}
            }
        }

        let mut unterminated: Vec<(u64, u8, u8, u8)> = pending
            .into_iter()
            .flat_map(|((ch, key), queue)| {
                queue
                    .into_iter()
                    .map(move |(onset, velocity)| (onset, ch, key, velocity))
            })
            .collect();
        unterminated.sort_unstable();

        for (onset, _, key, velocity) in unterminated {
            notes.push(NoteEvent {
                pitch: key,
                velocity,
                start: clock.seconds(onset),
                end: clock.seconds(current_tick),
            });
        }
    }

    Ok(notes)
}

/// Read and parse a MIDI file from disk.
pub fn read_notes_from_path(path: &Path) -> Result<Vec<NoteEvent>> {
    let bytes = std::fs::read(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;

    read_notes(&bytes).map_err(|e| match e {
        Error::MidiParse(message) => Error::InvalidMidiFile {
            path: path.to_path_buf(),
            message,
        },
        other => other,
    })
}
