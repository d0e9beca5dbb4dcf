//! Final assembly.
//!
//! Segments are joined with the concat demuxer into the workspace, then the
//! chapter table is injected while copying the joined file to a hidden
//! staging file next to the destination. The staging file only becomes the
//! destination, by an atomic rename, once verification has passed.
//!
//! A still-frame segment usually runs a little past its audio, because its
//! last frame is held for a whole frame period. The concat list therefore
//! declares every segment's exact track duration, so each track's audio
//! starts exactly on its chapter boundary.

use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    chapters::ChapterPlan,
    conversion::format_seconds,
    engine::{ConcatPart, EncodingEngine, EngineReport, EngineRequest},
    error::{ConversionError, EngineError},
    progress::{CancellationToken, Stage},
    segment::Segment,
    workspace::JobWorkspace,
};

/// The hidden sibling of `destination` that receives the output until it
/// has been verified: `album.mkv` → `.album.partial.mkv`.
pub fn staging_path(destination: &Path) -> PathBuf {
    let stem = destination
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match destination.extension() {
        Some(extension) => format!(".{stem}.partial.{}", extension.to_string_lossy()),
        None => format!(".{stem}.partial"),
    };
    destination.with_file_name(name)
}

/// Check, before any work starts, that the destination can be written.
///
/// # Errors
///
/// [`ConversionError::Assembly`] if the parent directory does not exist, the
/// destination is a directory, or it exists and `overwrite` is not set.
pub fn check_destination(destination: &Path, overwrite: bool) -> Result<(), ConversionError> {
    let fail = |reason: String| ConversionError::Assembly {
        stage: Stage::ResolvingMetadata,
        reason,
    };

    if destination.file_name().is_none() {
        return Err(fail(format!(
            "destination {} has no file name",
            destination.display()
        )));
    }

    let parent = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if !parent.is_dir() {
        return Err(fail(format!(
            "destination directory {} does not exist",
            parent.display()
        )));
    }

    if destination.is_dir() {
        return Err(fail(format!("destination {} is a directory", destination.display())));
    }

    if destination.exists() && !overwrite {
        return Err(fail(format!(
            "destination {} already exists (use overwrite to replace it)",
            destination.display()
        )));
    }

    Ok(())
}

/// Render a concat demuxer list naming `parts` in order, each with its
/// declared duration.
pub fn concat_list(parts: &[ConcatPart]) -> String {
    let mut list = String::from("ffconcat version 1.0\n");
    for part in parts {
        let path = part.path.to_string_lossy().replace('\'', "'\\''");
        // Writing to a String cannot fail.
        let _ = writeln!(list, "file '{path}'");
        let _ = writeln!(list, "duration {}", format_seconds(part.duration));
    }
    list
}

/// Joins segments and injects the chapter table.
pub struct Assembler {
    engine: Arc<dyn EncodingEngine>,
}

impl Assembler {
    /// An assembler driving `engine`.
    pub fn new(engine: Arc<dyn EncodingEngine>) -> Self {
        Self { engine }
    }

    /// Join `segments` in order and write the result, with `plan` as its
    /// chapter table, to the staging file of `destination`.
    ///
    /// On failure the staging file is removed.
    pub async fn assemble(
        &self,
        segments: &[Segment],
        plan: &ChapterPlan,
        workspace: &JobWorkspace,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<EngineReport, ConversionError> {
        let staging = staging_path(destination);
        let result = self
            .assemble_into(segments, plan, workspace, &staging, cancel)
            .await;
        if result.is_err() {
            discard_staging(destination);
        }
        result
    }

    async fn assemble_into(
        &self,
        segments: &[Segment],
        plan: &ChapterPlan,
        workspace: &JobWorkspace,
        staging: &Path,
        cancel: &CancellationToken,
    ) -> Result<EngineReport, ConversionError> {
        let stage = Stage::Assembling;

        if segments.len() != plan.len() {
            return Err(assembly_error(format!(
                "{} segments for {} chapters",
                segments.len(),
                plan.len()
            )));
        }

        let parts = segments
            .iter()
            .zip(plan.entries())
            .map(|(segment, entry)| {
                Ok(ConcatPart {
                    path: std::path::absolute(&segment.path)?,
                    duration: entry.span(),
                })
            })
            .collect::<Result<Vec<_>, std::io::Error>>()
            .map_err(|error| assembly_error(format!("cannot resolve segment path: {error}")))?;

        let list_file = workspace.concat_list();
        fs::write(&list_file, concat_list(&parts))
            .map_err(|error| assembly_error(format!("failed to write concat list: {error}")))?;

        let concat = EngineRequest::ConcatLossless {
            list_file,
            segments: parts,
            output: workspace.concatenated(),
        };
        let joined = self
            .engine
            .execute(&concat, cancel)
            .await
            .map_err(|error| engine_error(stage, "concatenation", error))?;
        log::info!("Joined {} segments", segments.len());

        let metadata_file = workspace.chapters_file();
        fs::write(&metadata_file, plan.to_ffmetadata())
            .map_err(|error| assembly_error(format!("failed to write chapter table: {error}")))?;

        let inject = EngineRequest::InjectChapters {
            input: joined.output,
            metadata_file,
            output: staging.to_path_buf(),
        };
        let report = self
            .engine
            .execute(&inject, cancel)
            .await
            .map_err(|error| engine_error(stage, "chapter injection", error))?;
        log::info!("Injected {} chapters", plan.len());

        Ok(report)
    }
}

/// Move the verified staging file into place.
///
/// Without `overwrite`, a file that appeared at the destination while the
/// job ran is left alone and the job fails.
pub fn persist(destination: &Path, overwrite: bool) -> Result<(), ConversionError> {
    let staging = staging_path(destination);
    if !overwrite && destination.exists() {
        return Err(ConversionError::Assembly {
            stage: Stage::Verifying,
            reason: format!(
                "destination {} appeared during the conversion (use overwrite to replace it)",
                destination.display()
            ),
        });
    }
    fs::rename(&staging, destination).map_err(|error| ConversionError::Assembly {
        stage: Stage::Verifying,
        reason: format!(
            "failed to move {} to {}: {error}",
            staging.display(),
            destination.display()
        ),
    })
}

/// Remove the staging file of `destination`, if any.
pub fn discard_staging(destination: &Path) {
    let staging = staging_path(destination);
    if fs::remove_file(&staging).is_ok() {
        log::debug!("Removed staging file {}", staging.display());
    }
}

fn assembly_error(reason: String) -> ConversionError {
    ConversionError::Assembly {
        stage: Stage::Assembling,
        reason,
    }
}

fn engine_error(stage: Stage, step: &str, error: EngineError) -> ConversionError {
    match error {
        EngineError::Cancelled => ConversionError::Cancelled { stage },
        other => ConversionError::Assembly {
            stage,
            reason: format!("{step} failed: {other}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn staging_file_is_a_hidden_sibling() {
        assert_eq!(
            staging_path(Path::new("/music/Kind of Blue.mkv")),
            PathBuf::from("/music/.Kind of Blue.partial.mkv")
        );
        assert_eq!(staging_path(Path::new("album")), PathBuf::from(".album.partial"));
    }

    #[test]
    fn concat_list_quotes_paths() {
        let list = concat_list(&[
            ConcatPart {
                path: PathBuf::from("/work/segment-001.mkv"),
                duration: Duration::from_secs(180),
            },
            ConcatPart {
                path: PathBuf::from("/work/it's.mkv"),
                duration: Duration::from_millis(210_500),
            },
        ]);
        assert_eq!(
            list,
            "ffconcat version 1.0\n\
             file '/work/segment-001.mkv'\nduration 180.000000\n\
             file '/work/it'\\''s.mkv'\nduration 210.500000\n"
        );
    }

    #[test]
    fn destination_checks() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("album.mkv");
        assert!(check_destination(&destination, false).is_ok());

        fs::write(&destination, b"existing").unwrap();
        let error = check_destination(&destination, false).unwrap_err();
        assert!(matches!(error, ConversionError::Assembly { .. }));
        assert!(check_destination(&destination, true).is_ok());

        assert!(check_destination(&dir.path().join("missing/album.mkv"), true).is_err());
        assert!(check_destination(dir.path(), true).is_err());
    }

    #[test]
    fn persist_renames_staging_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("album.mkv");
        fs::write(staging_path(&destination), b"verified").unwrap();

        persist(&destination, false).unwrap();
        assert_eq!(fs::read(&destination).unwrap(), b"verified");
        assert!(!staging_path(&destination).exists());
    }

    #[test]
    fn persist_keeps_a_destination_that_appeared_meanwhile() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("album.mkv");
        assert!(check_destination(&destination, false).is_ok());

        fs::write(staging_path(&destination), b"verified").unwrap();
        fs::write(&destination, b"someone else's").unwrap();

        let error = persist(&destination, false).unwrap_err();
        assert_eq!(error.stage(), Stage::Verifying);
        assert!(error.message().contains("appeared"), "{error}");
        assert_eq!(fs::read(&destination).unwrap(), b"someone else's");

        persist(&destination, true).unwrap();
        assert_eq!(fs::read(&destination).unwrap(), b"verified");
    }
}
