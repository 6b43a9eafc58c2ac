use super::runner::{CommandRunner, CommandSpec, ToolError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Converts one audio file into a MIDI file.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Tool name used in error messages
    fn name(&self) -> &str;

    /// Transcribe `audio` and leave the result at `midi_target`.
    async fn transcribe(&self, audio: &Path, midi_target: &Path) -> Result<(), ToolError>;
}

/// Runs `basic-pitch --save-midi <dir> <audio>`.
///
/// basic-pitch names its output `{audio file stem}_basic_pitch.mid` inside
/// the directory; it is moved to the requested target afterwards.
pub struct BasicPitchTranscriber {
    runner: Arc<dyn CommandRunner>,
    program: String,
    timeout: Option<Duration>,
}

impl BasicPitchTranscriber {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        program: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            runner,
            program: program.into(),
            timeout,
        }
    }

    /// The file basic-pitch writes for `audio` inside `out_dir`.
    pub fn produced_path(audio: &Path, out_dir: &Path) -> PathBuf {
        let stem = audio
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        out_dir.join(format!("{stem}_basic_pitch.mid"))
    }
}

#[async_trait]
impl Transcriber for BasicPitchTranscriber {
    fn name(&self) -> &str {
        &self.program
    }

    async fn transcribe(&self, audio: &Path, midi_target: &Path) -> Result<(), ToolError> {
        let out_dir = midi_target.parent().unwrap_or_else(|| Path::new("."));

        let spec = CommandSpec::new(&self.program)
            .arg("--save-midi")
            .arg(out_dir)
            .arg(audio)
            .timeout(self.timeout);
        self.runner.run(&spec).await?.check(&self.program)?;

        let produced = Self::produced_path(audio, out_dir);
        if !tokio::fs::try_exists(&produced).await.unwrap_or(false) {
            return Err(ToolError::MissingOutput { path: produced });
        }

        if produced != midi_target {
            tokio::fs::rename(&produced, midi_target)
                .await
                .map_err(|source| ToolError::MoveOutput {
                    path: midi_target.to_path_buf(),
                    source,
                })?;
        }

        Ok(())
    }
}
