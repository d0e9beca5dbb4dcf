//! Job states, progress reporting, and cancellation support.
//!
//! A conversion job moves through the [`JobState`] machine
//! `Idle → ResolvingMetadata → ComposingFrames → BuildingSegments →
//! PlanningChapters → Assembling → Verifying → Done`, or ends in
//! `Failed(kind)` from any non-terminal state. Every transition is published
//! as a [`ProgressEvent`] on a one-directional channel; callers never poll or
//! mutate the job.
//!
//! [`CancellationToken`] provides cooperative cancellation. The pipeline
//! checks it at stage boundaries and the engine races it against the running
//! process, so a cancelled job terminates its in-flight encoder.
//!
//! # Example
//!
//! ```no_run
//! use tokio_stream::StreamExt;
//!
//! use chaptermux::{ConversionJob, Converter, ConversionOptions, LayoutConfig};
//!
//! # async fn example() -> Result<(), chaptermux::ConversionError> {
//! let job = ConversionJob::new(["01.flac", "02.flac"], "cover.jpg", "album.mkv")
//!     .with_layout(LayoutConfig::default());
//! let mut handle = Converter::with_ffmpeg(ConversionOptions::new()).spawn(job);
//!
//! let mut progress = handle.take_progress().expect("progress stream");
//! while let Some(event) = progress.next().await {
//!     println!("{} ({}/{})", event.state, event.tracks_completed, event.total_tracks);
//! }
//! let report = handle.wait().await?;
//! println!("wrote {}", report.output.display());
//! # Ok(())
//! # }
//! ```

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use tokio::sync::{mpsc::UnboundedSender, watch};

use crate::error::ErrorKind;

/// A non-terminal pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Checking inputs and reading track metadata.
    ResolvingMetadata,
    /// Rendering a track's still frame.
    ComposingFrames,
    /// Encoding and muxing a track's segment.
    BuildingSegments,
    /// Checking the chapter plan against the built segments.
    PlanningChapters,
    /// Concatenating segments and injecting chapters.
    Assembling,
    /// Probing the assembled output.
    Verifying,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let label = match self {
            Stage::ResolvingMetadata => "resolving metadata",
            Stage::ComposingFrames => "composing frames",
            Stage::BuildingSegments => "building segments",
            Stage::PlanningChapters => "planning chapters",
            Stage::Assembling => "assembling",
            Stage::Verifying => "verifying",
        };
        f.write_str(label)
    }
}

/// The state of a conversion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Created but not started.
    Idle,
    /// See [`Stage::ResolvingMetadata`].
    ResolvingMetadata,
    /// See [`Stage::ComposingFrames`].
    ComposingFrames,
    /// See [`Stage::BuildingSegments`].
    BuildingSegments,
    /// See [`Stage::PlanningChapters`].
    PlanningChapters,
    /// See [`Stage::Assembling`].
    Assembling,
    /// See [`Stage::Verifying`].
    Verifying,
    /// Terminal success: the output exists and temporary artifacts are gone.
    Done,
    /// Terminal failure: temporary artifacts are gone and no output exists.
    Failed(ErrorKind),
}

impl JobState {
    /// Whether no further transitions can happen.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed(_))
    }

    /// The stage this state corresponds to, if it is non-terminal and running.
    pub fn stage(self) -> Option<Stage> {
        match self {
            JobState::ResolvingMetadata => Some(Stage::ResolvingMetadata),
            JobState::ComposingFrames => Some(Stage::ComposingFrames),
            JobState::BuildingSegments => Some(Stage::BuildingSegments),
            JobState::PlanningChapters => Some(Stage::PlanningChapters),
            JobState::Assembling => Some(Stage::Assembling),
            JobState::Verifying => Some(Stage::Verifying),
            JobState::Idle | JobState::Done | JobState::Failed(_) => None,
        }
    }
}

impl From<Stage> for JobState {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::ResolvingMetadata => JobState::ResolvingMetadata,
            Stage::ComposingFrames => JobState::ComposingFrames,
            Stage::BuildingSegments => JobState::BuildingSegments,
            Stage::PlanningChapters => JobState::PlanningChapters,
            Stage::Assembling => JobState::Assembling,
            Stage::Verifying => JobState::Verifying,
        }
    }
}

impl Display for JobState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            JobState::Idle => f.write_str("idle"),
            JobState::Done => f.write_str("done"),
            JobState::Failed(kind) => write!(f, "failed ({kind})"),
            other => match other.stage() {
                Some(stage) => write!(f, "{stage}"),
                None => Ok(()),
            },
        }
    }
}

/// A snapshot published after every state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// The state just entered.
    pub state: JobState,
    /// Tracks whose segment has been built and verified so far.
    pub tracks_completed: usize,
    /// Number of tracks in the job.
    pub total_tracks: usize,
    /// The track this transition concerns, for per-track stages.
    pub track_index: Option<usize>,
    /// Wall-clock time since the job started.
    pub elapsed: Duration,
}

impl ProgressEvent {
    /// Completion percentage by tracks (0.0 – 100.0).
    pub fn percentage(&self) -> f32 {
        if self.state == JobState::Done {
            return 100.0;
        }
        if self.total_tracks == 0 {
            return 0.0;
        }
        (self.tracks_completed as f32 / self.total_tracks as f32) * 100.0
    }
}

/// Cooperative cancellation token.
///
/// Clone this token and share it between tasks; call
/// [`cancel`](CancellationToken::cancel) from anywhere to request that the
/// associated job stops. All clones observe the cancellation.
///
/// # Example
///
/// ```
/// use chaptermux::CancellationToken;
///
/// let token = CancellationToken::new();
/// assert!(!token.is_cancelled());
///
/// token.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: tokio_util::sync::CancellationToken,
}

impl CancellationToken {
    /// Create a new, non-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Resolve once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.inner.cancelled().await;
    }

    /// A token that is cancelled with this one, but can also be cancelled on
    /// its own without affecting this one.
    pub fn child(&self) -> Self {
        Self {
            inner: self.inner.child_token(),
        }
    }
}

/// Publishes job transitions to the progress channel and the state watch.
///
/// Shared by all per-track workers. Events are published under a lock so
/// the channel sees them in the order their snapshots were taken.
pub(crate) struct ProgressReporter {
    sender: Mutex<Option<UnboundedSender<ProgressEvent>>>,
    state: watch::Sender<JobState>,
    total_tracks: usize,
    completed: AtomicUsize,
    start_time: Instant,
}

impl ProgressReporter {
    pub(crate) fn new(
        sender: Option<UnboundedSender<ProgressEvent>>,
        state: watch::Sender<JobState>,
        total_tracks: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            sender: Mutex::new(sender),
            state,
            total_tracks,
            completed: AtomicUsize::new(0),
            start_time: Instant::now(),
        })
    }

    /// Announce a job-wide transition.
    pub(crate) fn enter(&self, state: JobState) {
        self.publish(state, None);
    }

    /// Announce a transition made on behalf of one track.
    pub(crate) fn enter_track(&self, state: JobState, track_index: usize) {
        self.publish(state, Some(track_index));
    }

    /// Record a finished track and announce it under `state`.
    pub(crate) fn track_finished(&self, state: JobState, track_index: usize) {
        self.completed.fetch_add(1, Ordering::AcqRel);
        self.publish(state, Some(track_index));
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    fn publish(&self, state: JobState, track_index: Option<usize>) {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        self.state.send_replace(state);

        let event = ProgressEvent {
            state,
            tracks_completed: self.completed.load(Ordering::Acquire),
            total_tracks: self.total_tracks,
            track_index,
            elapsed: self.start_time.elapsed(),
        };

        log::debug!(
            "job state: {} ({}/{}){}",
            event.state,
            event.tracks_completed,
            event.total_tracks,
            track_index
                .map(|index| format!(" track {}", index + 1))
                .unwrap_or_default(),
        );

        if let Some(sender) = sender.as_ref() {
            // The receiver may have been dropped; progress is advisory.
            let _ = sender.send(event);
        }
    }
}
