//! FFmpeg log level configuration and engine binary discovery.
//!
//! FFmpeg logs in two places here: the in-process libraries used for probing,
//! and the external `ffmpeg` process that does the encoding. Both are quiet
//! by default. [`FfmpegLogLevel`] controls both; it is separate from the
//! Rust-side `log` output, which is configured with a `log` subscriber such
//! as `env_logger`.
//!
//! # Example
//!
//! ```no_run
//! use chaptermux::{ConversionOptions, FfmpegLogLevel};
//!
//! // Silence the probing libraries except for fatal errors.
//! chaptermux::set_ffmpeg_log_level(FfmpegLogLevel::Fatal);
//!
//! // Let the engine process print warnings.
//! let options = ConversionOptions::new().with_log_level(FfmpegLogLevel::Warning);
//! ```

use std::path::PathBuf;

use ffmpeg_next::util::log::Level;

/// FFmpeg log verbosity level.
///
/// Maps directly to FFmpeg's `AV_LOG_*` constants. Setting a level causes
/// FFmpeg to suppress all messages below that severity.
///
/// # Ordering (most verbose → most quiet)
///
/// `Trace` > `Debug` > `Verbose` > `Info` > `Warning` > `Error` > `Fatal` > `Panic` > `Quiet`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FfmpegLogLevel {
    /// Print no output at all.
    Quiet,
    /// Only log conditions the process cannot recover from.
    Panic,
    /// Only log unrecoverable errors.
    Fatal,
    /// Log recoverable errors. The default for engine processes, so a
    /// failure's stderr tail carries the reason and nothing else.
    #[default]
    Error,
    /// Log warnings.
    Warning,
    /// Log informational messages.
    Info,
    /// Log verbose informational messages.
    Verbose,
    /// Log debugging messages.
    Debug,
    /// Extremely verbose tracing output.
    Trace,
}

impl FfmpegLogLevel {
    fn to_ffmpeg_level(self) -> Level {
        match self {
            FfmpegLogLevel::Quiet => Level::Quiet,
            FfmpegLogLevel::Panic => Level::Panic,
            FfmpegLogLevel::Fatal => Level::Fatal,
            FfmpegLogLevel::Error => Level::Error,
            FfmpegLogLevel::Warning => Level::Warning,
            FfmpegLogLevel::Info => Level::Info,
            FfmpegLogLevel::Verbose => Level::Verbose,
            FfmpegLogLevel::Debug => Level::Debug,
            FfmpegLogLevel::Trace => Level::Trace,
        }
    }

    /// The value of the engine's `-loglevel` option.
    pub fn as_arg(self) -> &'static str {
        match self {
            FfmpegLogLevel::Quiet => "quiet",
            FfmpegLogLevel::Panic => "panic",
            FfmpegLogLevel::Fatal => "fatal",
            FfmpegLogLevel::Error => "error",
            FfmpegLogLevel::Warning => "warning",
            FfmpegLogLevel::Info => "info",
            FfmpegLogLevel::Verbose => "verbose",
            FfmpegLogLevel::Debug => "debug",
            FfmpegLogLevel::Trace => "trace",
        }
    }
}

/// Set the log level of the in-process FFmpeg libraries used for probing.
///
/// This does **not** affect the engine process; use
/// [`ConversionOptions::with_log_level`](crate::ConversionOptions::with_log_level)
/// for that.
pub fn set_ffmpeg_log_level(level: FfmpegLogLevel) {
    ffmpeg_next::util::log::set_level(level.to_ffmpeg_level());
}

/// Locate the `ffmpeg` executable on `PATH`.
pub fn locate_ffmpeg() -> Option<PathBuf> {
    which::which("ffmpeg").ok()
}

/// Returns `true` if an `ffmpeg` executable is available on `PATH`.
pub fn is_ffmpeg_available() -> bool {
    locate_ffmpeg().is_some()
}
