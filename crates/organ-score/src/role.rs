use crate::note::NoteEvent;
use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The four stems produced by source separation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stem {
    Drums,
    Bass,
    Vocals,
    Other,
}

impl Stem {
    /// Fixed processing order for transcription and track layout.
    pub const ALL: [Stem; 4] = [Stem::Drums, Stem::Bass, Stem::Vocals, Stem::Other];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stem::Drums => "drums",
            Stem::Bass => "bass",
            Stem::Vocals => "vocals",
            Stem::Other => "other",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Stem::Drums => "Drums",
            Stem::Bass => "Bass",
            Stem::Vocals => "Vocals",
            Stem::Other => "Other",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Stem::Drums => 0,
            Stem::Bass => 1,
            Stem::Vocals => 2,
            Stem::Other => 3,
        }
    }
}

impl fmt::Display for Stem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stem {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drums" => Ok(Stem::Drums),
            "bass" => Ok(Stem::Bass),
            "vocals" => Ok(Stem::Vocals),
            "other" => Ok(Stem::Other),
            _ => Err(Error::UnknownStem(s.to_string())),
        }
    }
}

/// Organ manual assignment and remap policy for one stem.
///
/// Bounds are inclusive and applied as saturating clamps. A role without a
/// velocity range passes velocities through untouched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StemRole {
    /// Manual (keyboard division) label used in the track name
    pub manual: &'static str,
    pub program: u8,
    pub percussive: bool,
    pub velocity_scale: f64,
    pub velocity_range: Option<(u8, u8)>,
    pub pitch_range: Option<(u8, u8)>,
}

impl StemRole {
    pub const DRUMS: StemRole = StemRole {
        manual: "Pedal",
        program: 0,
        percussive: true,
        velocity_scale: 0.7,
        velocity_range: Some((30, 60)),
        pitch_range: Some((36, 60)),
    };

    pub const BASS: StemRole = StemRole {
        manual: "Pedal",
        program: 32,
        percussive: false,
        velocity_scale: 0.8,
        velocity_range: Some((50, 80)),
        pitch_range: Some((36, 72)),
    };

    pub const VOCALS: StemRole = StemRole {
        manual: "Swell",
        program: 1,
        percussive: false,
        velocity_scale: 0.9,
        velocity_range: Some((60, 90)),
        pitch_range: Some((60, 96)),
    };

    pub const OTHER: StemRole = StemRole {
        manual: "Great",
        program: 1,
        percussive: false,
        velocity_scale: 0.8,
        velocity_range: Some((40, 85)),
        pitch_range: None,
    };

    /// Role for stem names outside the known four: notes pass through unchanged.
    pub const DEFAULT: StemRole = StemRole {
        manual: "Unknown",
        program: 0,
        percussive: false,
        velocity_scale: 1.0,
        velocity_range: None,
        pitch_range: None,
    };

    pub fn for_stem(stem: Stem) -> StemRole {
        match stem {
            Stem::Drums => Self::DRUMS,
            Stem::Bass => Self::BASS,
            Stem::Vocals => Self::VOCALS,
            Stem::Other => Self::OTHER,
        }
    }

    pub fn for_name(name: &str) -> StemRole {
        name.parse::<Stem>()
            .map(Self::for_stem)
            .unwrap_or(Self::DEFAULT)
    }

    /// Scale, truncate toward zero, then clamp.
    pub fn remap_velocity(&self, velocity: u8) -> u8 {
        let Some((lo, hi)) = self.velocity_range else {
            return velocity;
        };
        let scaled = (f64::from(velocity) * self.velocity_scale) as i64;
        scaled.clamp(i64::from(lo), i64::from(hi)) as u8
    }

    /// Saturating clamp. Not a transposition: pitch class is not preserved.
    pub fn clamp_pitch(&self, pitch: u8) -> u8 {
        match self.pitch_range {
            Some((lo, hi)) => pitch.clamp(lo, hi),
            None => pitch,
        }
    }

    pub fn remap(&self, note: &NoteEvent) -> NoteEvent {
        NoteEvent {
            pitch: self.clamp_pitch(note.pitch),
            velocity: self.remap_velocity(note.velocity),
            start: note.start,
            end: note.end,
        }
    }
}

/// Capitalize the first letter of each alphabetic run, lowercase the rest.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_alpha = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}
