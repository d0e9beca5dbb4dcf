//! Error types for the `chaptermux` crate.
//!
//! [`ConversionError`] is the structured error returned by a conversion job.
//! Every variant records the pipeline [`Stage`] it was raised in and, where a
//! single track is at fault, that track's index in the job, so callers can
//! report an actionable message rather than a generic failure.
//!
//! Lower layers have their own narrower errors: [`EngineError`] for the
//! external encoding process and [`ProbeError`] for reading media files. The
//! pipeline converts both into [`ConversionError`] with stage context attached.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    io::Error as IoError,
    path::PathBuf,
};

use thiserror::Error;

use crate::progress::Stage;

/// Coarse classification of a [`ConversionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or unreadable source file, unsupported or mixed formats.
    Input,
    /// Unreadable or corrupt tag / duration data.
    Metadata,
    /// External engine failure or segment duration mismatch.
    Encoding,
    /// Concatenation, chapter injection, verification, or destination failure.
    Assembly,
    /// The caller requested an abort.
    Cancelled,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            ErrorKind::Input => "InputError",
            ErrorKind::Metadata => "MetadataError",
            ErrorKind::Encoding => "EncodingError",
            ErrorKind::Assembly => "AssemblyError",
            ErrorKind::Cancelled => "CancelledError",
        };
        f.write_str(name)
    }
}

/// The error returned by a failed conversion job.
///
/// Any error aborts the whole job. By the time a caller sees one, the job's
/// temporary artifacts have been purged and nothing exists at the destination.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConversionError {
    /// A source file is missing, unreadable, or not usable for the job.
    #[error("Input error while {stage}{}: {path}: {reason}", track_label(.track_index))]
    Input {
        /// Stage in which the error was raised.
        stage: Stage,
        /// Index of the offending track, if the error concerns one.
        track_index: Option<usize>,
        /// The offending path.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// A track's metadata or duration could not be read.
    #[error("Metadata error while {stage}{}: {path}: {reason}", track_label(.track_index))]
    Metadata {
        /// Stage in which the error was raised.
        stage: Stage,
        /// Index of the offending track.
        track_index: Option<usize>,
        /// Path of the audio file.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// The external engine failed, or produced output of the wrong duration.
    #[error("Encoding error while {stage}{}: {reason}", track_label(.track_index))]
    Encoding {
        /// Stage in which the error was raised.
        stage: Stage,
        /// Index of the track being processed.
        track_index: Option<usize>,
        /// Underlying reason.
        reason: String,
    },

    /// Concatenation, chapter injection, or output verification failed.
    #[error("Assembly error while {stage}: {reason}")]
    Assembly {
        /// Stage in which the error was raised.
        stage: Stage,
        /// Underlying reason.
        reason: String,
    },

    /// The job was cancelled via its [`CancellationToken`](crate::CancellationToken).
    #[error("Conversion cancelled while {stage}")]
    Cancelled {
        /// Stage that was active when cancellation was observed.
        stage: Stage,
    },
}

impl ConversionError {
    /// The stage the job was in when the error was raised.
    pub fn stage(&self) -> Stage {
        match self {
            ConversionError::Input { stage, .. }
            | ConversionError::Metadata { stage, .. }
            | ConversionError::Encoding { stage, .. }
            | ConversionError::Assembly { stage, .. }
            | ConversionError::Cancelled { stage } => *stage,
        }
    }

    /// Index of the track at fault, when the error concerns a single track.
    pub fn track_index(&self) -> Option<usize> {
        match self {
            ConversionError::Input { track_index, .. }
            | ConversionError::Metadata { track_index, .. }
            | ConversionError::Encoding { track_index, .. } => *track_index,
            ConversionError::Assembly { .. } | ConversionError::Cancelled { .. } => None,
        }
    }

    /// The error's classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConversionError::Input { .. } => ErrorKind::Input,
            ConversionError::Metadata { .. } => ErrorKind::Metadata,
            ConversionError::Encoding { .. } => ErrorKind::Encoding,
            ConversionError::Assembly { .. } => ErrorKind::Assembly,
            ConversionError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// The underlying message without the stage/track prefix.
    pub fn message(&self) -> String {
        match self {
            ConversionError::Input { path, reason, .. }
            | ConversionError::Metadata { path, reason, .. } => {
                format!("{}: {reason}", path.display())
            }
            ConversionError::Encoding { reason, .. }
            | ConversionError::Assembly { reason, .. } => reason.clone(),
            ConversionError::Cancelled { .. } => "cancelled".to_string(),
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        matches!(self, ConversionError::Cancelled { .. })
    }

    /// Attach stage and track context to a per-track engine failure.
    pub(crate) fn from_engine(stage: Stage, track_index: usize, error: EngineError) -> Self {
        match error {
            EngineError::Cancelled => ConversionError::Cancelled { stage },
            other => ConversionError::Encoding {
                stage,
                track_index: Some(track_index),
                reason: other.to_string(),
            },
        }
    }
}

fn track_label(track_index: &Option<usize>) -> String {
    match track_index {
        Some(index) => format!(" (track {})", index + 1),
        None => String::new(),
    }
}

/// A failure of the external encoding engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// The engine process could not be started.
    #[error("Failed to launch {program}: {source}")]
    Launch {
        /// Program that was launched.
        program: PathBuf,
        /// Underlying spawn error.
        source: IoError,
    },

    /// The engine process exited unsuccessfully.
    #[error("Engine exited with {}: {stderr}", exit_label(.status))]
    Exit {
        /// Exit code, `None` when terminated by a signal.
        status: Option<i32>,
        /// Tail of the engine's diagnostic output.
        stderr: String,
    },

    /// The engine reported success but its output could not be inspected.
    #[error("Engine output is unusable: {0}")]
    Output(String),

    /// An I/O error while preparing inputs or waiting for the engine.
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// The request was cancelled and the process was terminated.
    #[error("Engine request cancelled")]
    Cancelled,
}

impl EngineError {
    /// Whether a failed request may reasonably succeed when repeated.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Launch { .. } | EngineError::Exit { .. })
    }
}

fn exit_label(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

/// A failure to read a media file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProbeError {
    /// The file could not be opened or recognised as media.
    #[error("Failed to open media file: {0}")]
    Open(String),

    /// The file does not contain a decodable audio stream.
    #[error("No decodable audio stream found in file")]
    NoAudioStream,

    /// The audio stream carries no authoritative duration.
    #[error("Audio stream has no usable duration")]
    NoDuration,

    /// An error originating from the FFmpeg libraries.
    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),
}

impl From<ffmpeg_next::Error> for ProbeError {
    fn from(error: ffmpeg_next::Error) -> Self {
        ProbeError::Ffmpeg(error.to_string())
    }
}
