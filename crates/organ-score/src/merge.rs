use crate::midi_writer::write_score;
use crate::note::{Instrument, NoteEvent, Score};
use crate::reader::read_notes_from_path;
use crate::role::{title_case, Stem, StemRole};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Options for merging stems.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeOptions {
    /// Fail with [`Error::NoStems`] instead of writing a score with no
    /// instrument tracks. Default: false.
    pub require_stems: bool,
}

/// What a merge did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeReport {
    /// Stems that became instrument tracks, in track order
    pub merged: Vec<String>,
    /// Stems whose MIDI file was missing
    pub skipped: Vec<String>,
    pub note_count: usize,
    pub output: Option<PathBuf>,
}

/// Remap one stem's notes into its destination instrument track.
pub fn remap_stem(stem_name: &str, notes: &[NoteEvent]) -> Instrument {
    let role = StemRole::for_name(stem_name);
    Instrument {
        name: format!("{} - {}", role.manual, title_case(stem_name)),
        program: role.program,
        percussive: role.percussive,
        notes: notes.iter().map(|n| role.remap(n)).collect(),
    }
}

/// Known stems first in their fixed order, then anything else by name.
fn track_order(name: &str) -> (usize, String) {
    match name.parse::<Stem>() {
        Ok(stem) => (stem.index(), String::new()),
        Err(_) => (Stem::ALL.len(), name.to_string()),
    }
}

/// Merge per-stem MIDI files into a single score.
///
/// Each present file becomes exactly one instrument track; all of its
/// internal tracks are pooled. Missing files are skipped with a warning.
/// The result does not depend on the order of `inputs`.
pub fn merge_stems<I, S, P>(inputs: I, options: &MergeOptions) -> Result<(Score, MergeReport)>
where
    I: IntoIterator<Item = (S, P)>,
    S: AsRef<str>,
    P: AsRef<Path>,
{
    let mut inputs: Vec<(String, PathBuf)> = inputs
        .into_iter()
        .map(|(s, p)| (s.as_ref().to_string(), p.as_ref().to_path_buf()))
        .collect();
    inputs.sort_by_key(|(name, _)| track_order(name));

    let mut score = Score::default();
    let mut report = MergeReport::default();

    for (stem_name, path) in inputs {
        if !path.exists() {
            tracing::warn!(
                stem = %stem_name,
                path = %path.display(),
                "MIDI file not found, skipping stem"
            );
            report.skipped.push(stem_name);
            continue;
        }

        let notes = read_notes_from_path(&path)?;
        let instrument = remap_stem(&stem_name, &notes);

        tracing::debug!(
            stem = %stem_name,
            track = %instrument.name,
            notes = instrument.notes.len(),
            "Remapped stem"
        );

        report.note_count += instrument.notes.len();
        report.merged.push(stem_name);
        score.instruments.push(instrument);
    }

    if score.instruments.is_empty() && options.require_stems {
        return Err(Error::NoStems);
    }

    Ok((score, report))
}

/// Merge per-stem MIDI files and write the combined score to `out`.
pub fn merge_to_file<I, S, P>(inputs: I, out: &Path, options: &MergeOptions) -> Result<MergeReport>
where
    I: IntoIterator<Item = (S, P)>,
    S: AsRef<str>,
    P: AsRef<Path>,
{
    let (score, mut report) = merge_stems(inputs, options)?;

    std::fs::write(out, write_score(&score)).map_err(|source| Error::Io {
        path: out.to_path_buf(),
        source,
    })?;

    tracing::info!(
        output = %out.display(),
        tracks = report.merged.len(),
        skipped = report.skipped.len(),
        notes = report.note_count,
        "Wrote merged MIDI"
    );

    report.output = Some(out.to_path_buf());
    Ok(report)
}
