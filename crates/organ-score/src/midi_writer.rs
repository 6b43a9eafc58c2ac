use crate::note::{Instrument, Score};

/// Resolution of written files, in ticks per quarter note.
pub const TICKS_PER_QUARTER: u16 = 220;

/// Tempo of written files (120 BPM).
const MICROS_PER_BEAT: u32 = 500_000;

/// GM percussion channel (channel 10, zero-based 9).
const PERCUSSION_CHANNEL: u8 = 9;

/// Write a score to Standard MIDI File format 1 bytes.
///
/// Track 0: tempo + 4/4 time signature.
/// Tracks 1+: one per instrument, with track name, program change, note events.
pub fn write_score(score: &Score) -> Vec<u8> {
    let mut tracks: Vec<Vec<u8>> = Vec::with_capacity(score.instruments.len() + 1);
    tracks.push(build_conductor_track());

    // Melodic instruments take channels in track order, skipping percussion
    let mut channel_alloc = 0u8;

    for instrument in &score.instruments {
        let channel = if instrument.percussive {
            PERCUSSION_CHANNEL
        } else {
            if channel_alloc == PERCUSSION_CHANNEL {
                channel_alloc += 1;
            }
            let ch = channel_alloc.min(15);
            channel_alloc = channel_alloc.saturating_add(1);
            ch
        };

        tracks.push(build_instrument_track(instrument, channel));
    }

    build_midi_file(TICKS_PER_QUARTER, &tracks)
}

fn seconds_to_ticks(seconds: f64) -> u64 {
    let ticks_per_second =
        f64::from(TICKS_PER_QUARTER) * 1_000_000.0 / f64::from(MICROS_PER_BEAT);
    (seconds.max(0.0) * ticks_per_second).round() as u64
}

/// Build the tempo/time-signature track.
fn build_conductor_track() -> Vec<u8> {
    let mut track_data = Vec::new();

    write_vlq(&mut track_data, 0);
    track_data.extend_from_slice(&[
        0xFF,
        0x51,
        0x03,
        (MICROS_PER_BEAT >> 16) as u8,
        (MICROS_PER_BEAT >> 8) as u8,
        MICROS_PER_BEAT as u8,
    ]);

    // 4/4, 24 clocks per click, 8 32nds per quarter
    write_vlq(&mut track_data, 0);
    track_data.extend_from_slice(&[0xFF, 0x58, 0x04, 4, 2, 0x18, 0x08]);

    write_vlq(&mut track_data, 0);
    track_data.extend_from_slice(&[0xFF, 0x2F, 0x00]);

    track_data
}

/// Ordering of events that share a tick.
fn event_rank(data: &[u8]) -> u8 {
    match data.first().map(|b| b & 0xF0) {
        Some(0x80) => 1,
        Some(0x90) => 2,
        _ => 0,
    }
}

/// Build a track for a single instrument.
fn build_instrument_track(instrument: &Instrument, channel: u8) -> Vec<u8> {
    let mut events: Vec<(u64, Vec<u8>)> = Vec::with_capacity(instrument.notes.len() * 2 + 2);

    // Track name
    let name_bytes = instrument.name.as_bytes();
    let mut name_event = vec![0xFF, 0x03];
    write_vlq(&mut name_event, name_bytes.len() as u32);
    name_event.extend_from_slice(name_bytes);
    events.push((0, name_event));

    events.push((0, vec![0xC0 | (channel & 0x0F), instrument.program & 0x7F]));

    for note in &instrument.notes {
        let onset = seconds_to_ticks(note.start);
        // A zero-length note would emit its note-off ahead of its note-on
        let offset = seconds_to_ticks(note.end).max(onset + 1);

        events.push((
            onset,
            vec![0x90 | (channel & 0x0F), note.pitch & 0x7F, note.velocity & 0x7F],
        ));
        events.push((offset, vec![0x80 | (channel & 0x0F), note.pitch & 0x7F, 0]));
    }

    // Stable: meta and program first, then note-offs, then note-ons; source order otherwise
    events.sort_by_key(|(tick, data)| (*tick, event_rank(data)));

    let mut track_data = Vec::new();
    let mut last_tick = 0u64;

    for (tick, data) in events {
        let delta = tick.saturating_sub(last_tick);
        write_vlq(&mut track_data, delta.min(0x0FFF_FFFF) as u32);
        track_data.extend_from_slice(&data);
        last_tick = tick;
    }

    // End of track
    write_vlq(&mut track_data, 0);
    track_data.extend_from_slice(&[0xFF, 0x2F, 0x00]);

    track_data
}

/// Assemble a complete MIDI file from track data blobs.
fn build_midi_file(ppq: u16, tracks: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = Vec::new();

    // MThd header
    buf.extend_from_slice(b"MThd");
    buf.extend_from_slice(&6u32.to_be_bytes());
    buf.extend_from_slice(&1u16.to_be_bytes()); // format 1
    buf.extend_from_slice(&(tracks.len() as u16).to_be_bytes());
    buf.extend_from_slice(&ppq.to_be_bytes());

    // MTrk chunks
    for track_data in tracks {
        buf.extend_from_slice(b"MTrk");
        buf.extend_from_slice(&(track_data.len() as u32).to_be_bytes());
        buf.extend_from_slice(track_data);
    }

    buf
}

/// Write a variable-length quantity to a byte buffer.
fn write_vlq(buf: &mut Vec<u8>, mut value: u32) {
    if value == 0 {
        buf.push(0);
        return;
    }

    let mut bytes = Vec::new();
    bytes.push((value & 0x7F) as u8);
    value >>= 7;

    while value > 0 {
        bytes.push((value & 0x7F) as u8 | 0x80);
        value >>= 7;
    }

    bytes.reverse();
    buf.extend_from_slice(&bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::note::NoteEvent;
    use midly::{MetaMessage, MidiMessage, Smf, TrackEventKind};
    use pretty_assertions::assert_eq;

    fn instrument(name: &str, program: u8, percussive: bool, notes: Vec<NoteEvent>) -> Instrument {
        Instrument {
            name: name.to_string(),
            program,
            percussive,
            notes,
        }
    }

    fn track_name(track: &[midly::TrackEvent]) -> Option<String> {
        track.iter().find_map(|e| match e.kind {
            TrackEventKind::Meta(MetaMessage::TrackName(bytes)) => {
                Some(String::from_utf8_lossy(bytes).into_owned())
            }
            _ => None,
        })
    }

    fn channels(track: &[midly::TrackEvent]) -> Vec<u8> {
        let mut out: Vec<u8> = track
            .iter()
            .filter_map(|e| match e.kind {
                TrackEventKind::Midi { channel, .. } => Some(channel.as_int()),
                _ => None,
            })
            .collect();
        out.dedup();
        out
    }

    #[test]
    fn empty_score_is_valid_midi() {
        let bytes = write_score(&Score::default());
        let smf = Smf::parse(&bytes).expect("Generated MIDI should be valid");
        assert_eq!(smf.header.format, midly::Format::Parallel);
        assert_eq!(smf.tracks.len(), 1);
    }

    #[test]
    fn instrument_tracks_carry_name_program_and_notes() {
        let score = Score {
            instruments: vec![instrument(
                "Swell - Vocals",
                1,
                false,
                vec![
                    NoteEvent::new(64, 70, 0.0, 0.5),
                    NoteEvent::new(67, 80, 0.5, 1.0),
                ],
            )],
        };

        let bytes = write_score(&score);
        let smf = Smf::parse(&bytes).unwrap();
        assert_eq!(smf.tracks.len(), 2);
        assert_eq!(track_name(&smf.tracks[1]).as_deref(), Some("Swell - Vocals"));

        let mut program = None;
        let mut note_ons = Vec::new();
        let mut tick = 0u64;
        for event in &smf.tracks[1] {
            tick += u64::from(event.delta.as_int());
            if let TrackEventKind::Midi { message, .. } = event.kind {
                match message {
                    MidiMessage::ProgramChange { program: p } => program = Some(p.as_int()),
                    MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                        note_ons.push((tick, key.as_int(), vel.as_int()))
                    }
                    _ => {}
                }
            }
        }

        assert_eq!(program, Some(1));
        // 120 BPM at 220 ppq = 440 ticks per second
        assert_eq!(note_ons, vec![(0, 64, 70), (220, 67, 80)]);
    }

    #[test]
    fn percussion_goes_to_channel_ten() {
        let score = Score {
            instruments: vec![
                instrument("Pedal - Drums", 0, true, vec![NoteEvent::new(36, 50, 0.0, 0.1)]),
                instrument("Pedal - Bass", 32, false, vec![NoteEvent::new(40, 60, 0.0, 0.1)]),
                instrument("Swell - Vocals", 1, false, vec![NoteEvent::new(72, 70, 0.0, 0.1)]),
            ],
        };

        let bytes = write_score(&score);
        let smf = Smf::parse(&bytes).unwrap();
        assert_eq!(channels(&smf.tracks[1]), vec![9]);
        assert_eq!(channels(&smf.tracks[2]), vec![0]);
        assert_eq!(channels(&smf.tracks[3]), vec![1]);
    }

    #[test]
    fn output_is_deterministic() {
        let score = Score {
            instruments: vec![instrument(
                "Great - Other",
                1,
                false,
                vec![NoteEvent::new(60, 64, 0.1, 0.2), NoteEvent::new(62, 64, 0.1, 0.3)],
            )],
        };
        assert_eq!(write_score(&score), write_score(&score));
    }

    #[test]
    fn zero_length_note_still_sounds() {
        let score = Score {
            instruments: vec![instrument("Great - Other", 1, false, vec![NoteEvent::new(60, 64, 1.0, 1.0)])],
        };
        let notes = crate::reader::read_notes(&write_score(&score)).unwrap();
        assert_eq!(notes.len(), 1);
        assert!(notes[0].end > notes[0].start);
    }

    #[test]
    fn vlq_encoding() {
        let mut buf = Vec::new();
        write_vlq(&mut buf, 0);
        assert_eq!(buf, vec![0x00]);

        buf.clear();
        write_vlq(&mut buf, 127);
        assert_eq!(buf, vec![0x7F]);

        buf.clear();
        write_vlq(&mut buf, 128);
        assert_eq!(buf, vec![0x81, 0x00]);

        buf.clear();
        write_vlq(&mut buf, 480);
        assert_eq!(buf, vec![0x83, 0x60]);
    }
}
