use super::runner::{CommandRunner, CommandSpec, ToolError};
use async_trait::async_trait;
use organ_score::Stem;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Separated audio, one file per stem.
pub type StemFiles = BTreeMap<Stem, PathBuf>;

/// Splits a mixed recording into the four stems.
#[async_trait]
pub trait StemSeparator: Send + Sync {
    /// Tool name used in error messages
    fn name(&self) -> &str;

    async fn separate(&self, input: &Path, out_dir: &Path) -> Result<StemFiles, ToolError>;
}

/// Runs `demucs <input> -o <out_dir> -n <model>`.
///
/// Demucs writes `{out_dir}/{model}/{input file stem}/{stem}.wav`.
pub struct DemucsSeparator {
    runner: Arc<dyn CommandRunner>,
    program: String,
    model: String,
    timeout: Option<Duration>,
}

impl DemucsSeparator {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        program: impl Into<String>,
        model: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            runner,
            program: program.into(),
            model: model.into(),
            timeout,
        }
    }

    fn command(&self, input: &Path, out_dir: &Path) -> CommandSpec {
        CommandSpec::new(&self.program)
            .arg(input)
            .arg("-o")
            .arg(out_dir)
            .arg("-n")
            .arg(&self.model)
            .timeout(self.timeout)
    }

    /// Where demucs leaves each stem for `input`.
    pub fn stem_paths(&self, input: &Path, out_dir: &Path) -> StemFiles {
        let track = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dir = out_dir.join(&self.model).join(track);

        Stem::ALL
            .iter()
            .map(|stem| (*stem, dir.join(format!("{}.wav", stem.as_str()))))
            .collect()
    }
}

#[async_trait]
impl StemSeparator for DemucsSeparator {
    fn name(&self) -> &str {
        &self.program
    }

    async fn separate(&self, input: &Path, out_dir: &Path) -> Result<StemFiles, ToolError> {
        self.runner
            .run(&self.command(input, out_dir))
            .await?
            .check(&self.program)?;

        let stems = self.stem_paths(input, out_dir);
        for path in stems.values() {
            if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                return Err(ToolError::MissingOutput { path: path.clone() });
            }
        }

        Ok(stems)
    }
}
