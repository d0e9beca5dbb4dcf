//! Conversion configuration.
//!
//! [`ConversionOptions`] is a builder that carries the operational settings of
//! a job: the fixed encode parameters of the still-frame video, the worker
//! bound, retry policy, working directory, and engine location.
//!
//! # Example
//!
//! ```no_run
//! use chaptermux::{ConversionOptions, EncodeSettings, FfmpegLogLevel};
//!
//! let options = ConversionOptions::new()
//!     .with_workers(2)
//!     .with_segment_retries(2)
//!     .with_overwrite(true)
//!     .with_encode_settings(EncodeSettings::default())
//!     .with_log_level(FfmpegLogLevel::Warning);
//! ```

use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    path::PathBuf,
    thread,
    time::Duration,
};

use crate::ffmpeg::FfmpegLogLevel;

/// Upper bound of the default worker count.
const MAX_DEFAULT_WORKERS: usize = 4;

/// Fixed encode parameters of the still-frame video stream.
///
/// Defaults: 1920×1080, 1 fps, H.264, CRF 18, preset `medium`, `yuv420p`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSettings {
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Frames per second of the still-frame stream.
    pub frame_rate: u32,
    /// Constant rate factor.
    pub crf: u8,
    /// Encoder preset.
    pub preset: String,
    /// Output pixel format.
    pub pixel_format: String,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            frame_rate: 1,
            crf: 18,
            preset: "medium".to_string(),
            pixel_format: "yuv420p".to_string(),
        }
    }
}

impl EncodeSettings {
    /// Engine encoder of the still-frame stream.
    pub const ENCODER: &'static str = "libx264";
    /// Codec name a probe reports for the still-frame stream.
    pub const CODEC_NAME: &'static str = "h264";

    /// Set the frame rate. Clamped to a minimum of 1.
    #[must_use]
    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate.max(1);
        self
    }

    /// Duration of one frame, the tolerance used for duration checks.
    pub fn frame_period(&self) -> Duration {
        Duration::from_secs(1) / self.frame_rate.max(1)
    }
}

/// Operational settings of a conversion job.
#[derive(Clone)]
pub struct ConversionOptions {
    pub(crate) encode: EncodeSettings,
    pub(crate) workers: usize,
    pub(crate) segment_retries: u32,
    pub(crate) work_root: Option<PathBuf>,
    pub(crate) overwrite: bool,
    pub(crate) ffmpeg_path: Option<PathBuf>,
    pub(crate) log_level: FfmpegLogLevel,
}

impl Debug for ConversionOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ConversionOptions")
            .field("encode", &self.encode)
            .field("workers", &self.workers)
            .field("segment_retries", &self.segment_retries)
            .field("work_root", &self.work_root)
            .field("overwrite", &self.overwrite)
            .field("has_ffmpeg_path", &self.ffmpeg_path.is_some())
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversionOptions {
    /// Create options with default settings.
    ///
    /// Defaults: default [`EncodeSettings`], `min(available cores, 4)`
    /// workers, one segment retry, the system temporary directory, no
    /// overwrite, `ffmpeg` from `PATH`, engine log level `error`.
    pub fn new() -> Self {
        let cores = thread::available_parallelism()
            .map(|count| count.get())
            .unwrap_or(1);

        Self {
            encode: EncodeSettings::default(),
            workers: cores.min(MAX_DEFAULT_WORKERS),
            segment_retries: 1,
            work_root: None,
            overwrite: false,
            ffmpeg_path: None,
            log_level: FfmpegLogLevel::default(),
        }
    }

    /// Set the still-frame encode parameters.
    #[must_use]
    pub fn with_encode_settings(mut self, settings: EncodeSettings) -> Self {
        self.encode = settings;
        self
    }

    /// Set how many tracks may be composed and built concurrently.
    /// Clamped to a minimum of 1; 1 processes tracks strictly in sequence.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set how many times a failed engine invocation of the segment builder
    /// is repeated.
    #[must_use]
    pub fn with_segment_retries(mut self, retries: u32) -> Self {
        self.segment_retries = retries;
        self
    }

    /// Create per-job working directories under `root` instead of the system
    /// temporary directory.
    #[must_use]
    pub fn with_work_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.work_root = Some(root.into());
        self
    }

    /// Allow replacing an existing file at the destination.
    #[must_use]
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Use a specific `ffmpeg` executable instead of searching `PATH`.
    #[must_use]
    pub fn with_ffmpeg_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffmpeg_path = Some(path.into());
        self
    }

    /// Set the engine process's `-loglevel`.
    #[must_use]
    pub fn with_log_level(mut self, level: FfmpegLogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// The still-frame encode parameters.
    pub fn encode_settings(&self) -> &EncodeSettings {
        &self.encode
    }

    /// The worker bound.
    pub fn workers(&self) -> usize {
        self.workers
    }
}
