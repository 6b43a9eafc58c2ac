//! Adapters for the external separation and transcription tools.

pub mod basic_pitch;
pub mod demucs;
pub mod runner;

pub use basic_pitch::{BasicPitchTranscriber, Transcriber};
pub use demucs::{DemucsSeparator, StemFiles, StemSeparator};
pub use runner::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner, ToolError};
