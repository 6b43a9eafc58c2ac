//! Organ score assembly.
//!
//! Reads the per-stem MIDI files produced by transcription, remaps every
//! note into the register and dynamics of its organ manual, and writes a
//! single multi-track Standard MIDI File.

pub mod merge;
pub mod midi_writer;
pub mod note;
pub mod reader;
pub mod role;

pub use merge::{merge_stems, merge_to_file, remap_stem, MergeOptions, MergeReport};
pub use midi_writer::{write_score, TICKS_PER_QUARTER};
pub use note::{Instrument, NoteEvent, Score};
pub use reader::{read_notes, read_notes_from_path};
pub use role::{title_case, Stem, StemRole};

use std::path::PathBuf;

/// Errors from score operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("MIDI parse error: {0}")]
    MidiParse(String),

    #[error("invalid MIDI file {path}: {message}")]
    InvalidMidiFile { path: PathBuf, message: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no stem MIDI files were available to merge")]
    NoStems,

    #[error("unknown stem: {0}")]
    UnknownStem(String),
}

pub type Result<T> = std::result::Result<T, Error>;
