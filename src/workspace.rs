//! Per-job temporary working directory.
//!
//! Every intermediate artifact of a job lives in one uniquely named directory
//! created with `tempfile`. The orchestrator purges it before returning,
//! whether the job succeeded or not; dropping the workspace removes it too.

use std::{
    io::Result as IoResult,
    path::{Path, PathBuf},
};

use tempfile::TempDir;

const PREFIX: &str = "chaptermux-";

/// The working directory of one job and the names of its artifacts.
#[derive(Debug)]
pub struct JobWorkspace {
    dir: TempDir,
}

impl JobWorkspace {
    /// Create a fresh directory under `root`, or under the system temporary
    /// directory when `root` is `None`.
    pub fn create(root: Option<&Path>) -> IoResult<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(PREFIX);
        let dir = match root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        log::debug!("Created job workspace {}", dir.path().display());
        Ok(Self { dir })
    }

    /// The directory itself.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Cover panel and background shared by all frames.
    pub fn base_frame(&self) -> PathBuf {
        self.path().join("base.png")
    }

    /// Finished still frame of a track.
    pub fn frame(&self, track_index: usize) -> PathBuf {
        self.path().join(format!("frame-{:03}.png", track_index + 1))
    }

    /// Text source of one rendered line of a track's frame.
    pub fn text_file(&self, track_index: usize, line: usize) -> PathBuf {
        self.path()
            .join(format!("frame-{:03}-line{}.txt", track_index + 1, line + 1))
    }

    /// Video-only intermediate of a track.
    pub fn video(&self, track_index: usize) -> PathBuf {
        self.path().join(format!("video-{:03}.mkv", track_index + 1))
    }

    /// Finished segment of a track.
    pub fn segment(&self, track_index: usize) -> PathBuf {
        self.path().join(format!("segment-{:03}.mkv", track_index + 1))
    }

    /// Concat demuxer list.
    pub fn concat_list(&self) -> PathBuf {
        self.path().join("segments.txt")
    }

    /// FFMETADATA chapter table.
    pub fn chapters_file(&self) -> PathBuf {
        self.path().join("chapters.ffmeta")
    }

    /// All segments joined, before chapter injection.
    pub fn concatenated(&self) -> PathBuf {
        self.path().join("concatenated.mkv")
    }

    /// Delete the directory and everything in it.
    pub fn purge(self) -> IoResult<()> {
        let path = self.path().to_path_buf();
        self.dir.close()?;
        log::debug!("Purged job workspace {}", path.display());
        Ok(())
    }
}
