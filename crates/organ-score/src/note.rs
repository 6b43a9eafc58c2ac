use serde::{Deserialize, Serialize};

/// A single transcribed note with absolute timing in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub pitch: u8,
    pub velocity: u8,
    pub start: f64,
    pub end: f64,
}

impl NoteEvent {
    pub fn new(pitch: u8, velocity: u8, start: f64, end: f64) -> Self {
        Self {
            pitch,
            velocity,
            start,
            end,
        }
    }

    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

/// One destination track of the combined score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    /// Track name, e.g. "Swell - Vocals"
    pub name: String,
    /// General MIDI program number (0-127)
    pub program: u8,
    /// Percussive instruments are written on the GM percussion channel
    pub percussive: bool,
    pub notes: Vec<NoteEvent>,
}

/// The combined multi-instrument score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub instruments: Vec<Instrument>,
}

impl Score {
    pub fn note_count(&self) -> usize {
        self.instruments.iter().map(|i| i.notes.len()).sum()
    }

    /// Latest note end across all instruments, in seconds.
    pub fn end_time(&self) -> f64 {
        self.instruments
            .iter()
            .flat_map(|i| i.notes.iter())
            .map(|n| n.end)
            .fold(0.0, f64::max)
    }
}
