//! The conversion pipeline.
//!
//! [`Converter`] sequences a [`ConversionJob`] through the job states:
//!
//! 1. **ResolvingMetadata**: check the destination, decode the cover, resolve
//!    every track, check stream uniformity, and plan the chapters.
//! 2. **ComposingFrames / BuildingSegments**: per track, compose the still
//!    frame and build the segment. Tracks are launched in order and up to
//!    `workers` run at once.
//! 3. **PlanningChapters**: check the planned chapters against the built
//!    segments.
//! 4. **Assembling**: join the segments and inject the chapter table into a
//!    staging file.
//! 5. **Verifying**: probe the staging file, compare it with the plan, and
//!    move it to the destination.
//!
//! Any error aborts the whole job. The working directory and the staging file
//! are removed before the error is returned, so the destination is either the
//! complete verified output or untouched.

use std::{path::PathBuf, sync::Arc, time::Duration};

use image::DynamicImage;
use tokio::{
    sync::{Semaphore, mpsc, watch},
    task::{JoinHandle, JoinSet},
};

use crate::{
    assemble::{Assembler, check_destination, discard_staging, persist},
    chapters::ChapterPlan,
    compose::{FrameComposer, FrameRenderer},
    config::ConversionOptions,
    conversion::{format_timecode, within_tolerance},
    engine::{EncodingEngine, FfmpegEngine},
    error::ConversionError,
    layout::LayoutConfig,
    probe::{FfmpegMetadataSource, MetadataSource},
    progress::{CancellationToken, JobState, ProgressReporter, Stage},
    resolver::{MetadataResolver, Track, TrackInput, ensure_uniform_format},
    segment::{Segment, SegmentBuilder},
    stream::ProgressStream,
    validation::{ValidationReport, verify_output},
    workspace::JobWorkspace,
};

/// Everything a conversion needs from the caller.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    /// Tracks in chapter order.
    pub tracks: Vec<TrackInput>,
    /// Cover image.
    pub cover: PathBuf,
    /// Frame layout, shared read-only with every worker.
    pub layout: Arc<LayoutConfig>,
    /// Destination file.
    pub output: PathBuf,
}

impl ConversionJob {
    /// A job over `tracks` with the default layout and no overrides.
    pub fn new<I>(tracks: I, cover: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self
    where
        I: IntoIterator,
        I::Item: Into<PathBuf>,
    {
        Self::from_inputs(
            tracks.into_iter().map(TrackInput::new).collect(),
            cover,
            output,
        )
    }

    /// A job over tracks that may carry per-track overrides.
    pub fn from_inputs(
        tracks: Vec<TrackInput>,
        cover: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            tracks,
            cover: cover.into(),
            layout: Arc::new(LayoutConfig::default()),
            output: output.into(),
        }
    }

    /// Use `layout` for every frame.
    #[must_use]
    pub fn with_layout(mut self, layout: LayoutConfig) -> Self {
        self.layout = Arc::new(layout);
        self
    }
}

/// The outcome of a successful job.
#[derive(Debug, Clone)]
pub struct ConversionReport {
    /// The written file.
    pub output: PathBuf,
    /// Resolved tracks in chapter order.
    pub tracks: Vec<Track>,
    /// The chapter table written to the output.
    pub chapters: ChapterPlan,
    /// Duration of the output as probed.
    pub total_duration: Duration,
    /// Verification findings (free of errors).
    pub validation: ValidationReport,
    /// Wall-clock time of the job.
    pub elapsed: Duration,
}

/// A job running on a background task.
///
/// Created by [`Converter::spawn`].
#[derive(Debug)]
pub struct JobHandle {
    progress: Option<ProgressStream>,
    state: watch::Receiver<JobState>,
    cancel: CancellationToken,
    task: JoinHandle<Result<ConversionReport, ConversionError>>,
}

impl JobHandle {
    /// Take the progress stream. Returns `None` after the first call.
    pub fn take_progress(&mut self) -> Option<ProgressStream> {
        self.progress.take()
    }

    /// The job's current state.
    pub fn state(&self) -> JobState {
        *self.state.borrow()
    }

    /// A receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<JobState> {
        self.state.clone()
    }

    /// Request cancellation. The job stops at the next stage boundary and
    /// terminates any running engine process.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that cancels this job.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the job to finish.
    pub async fn wait(self) -> Result<ConversionReport, ConversionError> {
        let stage = self.state.borrow().stage().unwrap_or(Stage::ResolvingMetadata);
        match self.task.await {
            Ok(result) => result,
            Err(error) if error.is_cancelled() => Err(ConversionError::Cancelled { stage }),
            Err(error) => Err(ConversionError::Encoding {
                stage,
                track_index: None,
                reason: format!("conversion task failed: {error}"),
            }),
        }
    }
}

/// Runs conversion jobs.
///
/// # Example
///
/// ```no_run
/// use chaptermux::{CancellationToken, ConversionJob, ConversionOptions, Converter};
///
/// # async fn example() -> Result<(), chaptermux::ConversionError> {
/// let converter = Converter::with_ffmpeg(ConversionOptions::new().with_workers(2));
/// let job = ConversionJob::new(["01.flac", "02.flac", "03.flac"], "cover.jpg", "album.mkv");
/// let report = converter.run(job, &CancellationToken::new()).await?;
/// println!("{}", report.chapters.describe());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Converter {
    options: ConversionOptions,
    engine: Arc<dyn EncodingEngine>,
    renderer: Arc<dyn FrameRenderer>,
    metadata: Arc<dyn MetadataSource>,
}

impl Converter {
    /// A converter using the `ffmpeg` executable for encoding and text
    /// rendering and the FFmpeg libraries for probing.
    pub fn with_ffmpeg(options: ConversionOptions) -> Self {
        let engine = Arc::new(FfmpegEngine::from_options(&options));
        Self {
            options,
            engine: engine.clone(),
            renderer: engine,
            metadata: Arc::new(FfmpegMetadataSource),
        }
    }

    /// Replace the encoding engine.
    #[must_use]
    pub fn with_engine(mut self, engine: Arc<dyn EncodingEngine>) -> Self {
        self.engine = engine;
        self
    }

    /// Replace the text renderer.
    #[must_use]
    pub fn with_renderer(mut self, renderer: Arc<dyn FrameRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Replace the metadata source.
    #[must_use]
    pub fn with_metadata_source(mut self, source: Arc<dyn MetadataSource>) -> Self {
        self.metadata = source;
        self
    }

    /// The options in use.
    pub fn options(&self) -> &ConversionOptions {
        &self.options
    }

    /// Resolve every track of `job` without converting anything. Blocks.
    ///
    /// # Errors
    ///
    /// The first failing track in job order, or a stream format mismatch.
    pub fn resolve_tracks(&self, job: &ConversionJob) -> Result<Vec<Track>, ConversionError> {
        resolve_all(
            &MetadataResolver::new(self.metadata.clone()),
            &job.tracks,
            &job.layout,
        )
    }

    /// Resolve `job` and compute its chapter table without converting
    /// anything. Blocks.
    pub fn plan(&self, job: &ConversionJob) -> Result<(Vec<Track>, ChapterPlan), ConversionError> {
        let tracks = self.resolve_tracks(job)?;
        let plan = ChapterPlan::from_tracks(&tracks, &job.layout);
        Ok((tracks, plan))
    }

    /// Start `job` on a background task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(&self, job: ConversionJob) -> JobHandle {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (state_sender, state) = watch::channel(JobState::Idle);
        let reporter = ProgressReporter::new(Some(sender), state_sender, job.tracks.len());
        let cancel = CancellationToken::new();

        let converter = self.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move { converter.execute(job, token, reporter).await });

        JobHandle {
            progress: Some(ProgressStream::new(receiver)),
            state,
            cancel,
            task,
        }
    }

    /// Run `job` to completion on the current task.
    pub async fn run(
        &self,
        job: ConversionJob,
        cancel: &CancellationToken,
    ) -> Result<ConversionReport, ConversionError> {
        let (state_sender, _) = watch::channel(JobState::Idle);
        let reporter = ProgressReporter::new(None, state_sender, job.tracks.len());
        self.execute(job, cancel.clone(), reporter).await
    }

    async fn execute(
        &self,
        job: ConversionJob,
        cancel: CancellationToken,
        reporter: Arc<ProgressReporter>,
    ) -> Result<ConversionReport, ConversionError> {
        log::info!(
            "Converting {} tracks into {}",
            job.tracks.len(),
            job.output.display()
        );

        let mut workspace = None;
        let outcome = self
            .run_stages(&job, &cancel, &reporter, &mut workspace)
            .await;

        if let Some(workspace) = workspace {
            match Arc::try_unwrap(workspace) {
                Ok(workspace) => {
                    if let Err(error) = workspace.purge() {
                        log::warn!("Failed to remove job workspace: {error}");
                    }
                }
                // The last worker to finish drops it, which removes it.
                Err(shared) => drop(shared),
            }
        }

        match outcome {
            Ok(report) => {
                reporter.enter(JobState::Done);
                log::info!(
                    "Wrote {} ({} chapters, {}) in {:.1?}",
                    report.output.display(),
                    report.chapters.len(),
                    format_timecode(report.total_duration),
                    report.elapsed,
                );
                Ok(report)
            }
            Err(error) => {
                discard_staging(&job.output);
                reporter.enter(JobState::Failed(error.kind()));
                log::info!("Conversion failed: {error}");
                Err(error)
            }
        }
    }

    async fn run_stages(
        &self,
        job: &ConversionJob,
        cancel: &CancellationToken,
        reporter: &Arc<ProgressReporter>,
        workspace_slot: &mut Option<Arc<JobWorkspace>>,
    ) -> Result<ConversionReport, ConversionError> {
        // ── Resolving metadata ─────────────────────────────────────
        reporter.enter(JobState::ResolvingMetadata);
        checkpoint(cancel, Stage::ResolvingMetadata)?;

        if job.tracks.is_empty() {
            return Err(ConversionError::Input {
                stage: Stage::ResolvingMetadata,
                track_index: None,
                path: job.output.clone(),
                reason: "the job has no tracks".to_string(),
            });
        }
        job.layout
            .validate()
            .map_err(|error| ConversionError::Input {
                stage: Stage::ResolvingMetadata,
                track_index: None,
                path: PathBuf::from("<layout>"),
                reason: error.to_string(),
            })?;
        check_destination(&job.output, self.options.overwrite)?;

        let cover = load_cover(job.cover.clone()).await?;

        let resolver = MetadataResolver::new(self.metadata.clone());
        let inputs = job.tracks.clone();
        let layout = job.layout.clone();
        let tracks = tokio::task::spawn_blocking(move || resolve_all(&resolver, &inputs, &layout))
            .await
            .map_err(|error| ConversionError::Metadata {
                stage: Stage::ResolvingMetadata,
                track_index: None,
                path: PathBuf::new(),
                reason: format!("metadata task failed: {error}"),
            })??;

        let plan = ChapterPlan::from_tracks(&tracks, &job.layout);
        log::info!(
            "Resolved {} tracks, {} in total",
            tracks.len(),
            format_timecode(plan.total())
        );

        // ── Composing frames / building segments ───────────────────
        reporter.enter(JobState::ComposingFrames);
        checkpoint(cancel, Stage::ComposingFrames)?;

        let workspace = Arc::new(
            JobWorkspace::create(self.options.work_root.as_deref()).map_err(|error| {
                ConversionError::Input {
                    stage: Stage::ComposingFrames,
                    track_index: None,
                    path: self.options.work_root.clone().unwrap_or_else(std::env::temp_dir),
                    reason: format!("cannot create working directory: {error}"),
                }
            })?,
        );
        *workspace_slot = Some(workspace.clone());

        let composer = Arc::new(FrameComposer::new(
            self.renderer.clone(),
            job.layout.clone(),
        ));
        let base = {
            let composer = composer.clone();
            let workspace = workspace.clone();
            tokio::task::spawn_blocking(move || composer.prepare_base(&cover, &workspace))
                .await
                .map_err(|error| ConversionError::Encoding {
                    stage: Stage::ComposingFrames,
                    track_index: None,
                    reason: format!("frame task failed: {error}"),
                })??
        };

        let segments = self
            .build_segments(&tracks, composer, base, &workspace, cancel, reporter)
            .await?;

        // ── Planning chapters ──────────────────────────────────────
        reporter.enter(JobState::PlanningChapters);
        checkpoint(cancel, Stage::PlanningChapters)?;
        self.check_plan(&plan, &segments)?;

        // ── Assembling ─────────────────────────────────────────────
        reporter.enter(JobState::Assembling);
        checkpoint(cancel, Stage::Assembling)?;
        let staged = Assembler::new(self.engine.clone())
            .assemble(&segments, &plan, &workspace, &job.output, cancel)
            .await?;

        // ── Verifying ──────────────────────────────────────────────
        reporter.enter(JobState::Verifying);
        checkpoint(cancel, Stage::Verifying)?;
        let validation = verify_output(
            &plan,
            &tracks[0].sample_format,
            &self.options.encode,
            &staged.info,
        );
        for warning in &validation.warnings {
            log::warn!("{warning}");
        }
        if !validation.is_valid() {
            return Err(ConversionError::Assembly {
                stage: Stage::Verifying,
                reason: validation.errors.join("; "),
            });
        }
        persist(&job.output, self.options.overwrite)?;

        Ok(ConversionReport {
            output: job.output.clone(),
            total_duration: staged.info.duration,
            tracks,
            chapters: plan,
            validation,
            elapsed: reporter.elapsed(),
        })
    }

    /// Compose and build every track under the worker bound.
    ///
    /// Tracks are launched in job order. The first failure cancels the
    /// remaining work; all workers are awaited before returning, and the
    /// failure of the lowest track index is reported.
    async fn build_segments(
        &self,
        tracks: &[Track],
        composer: Arc<FrameComposer>,
        base: PathBuf,
        workspace: &Arc<JobWorkspace>,
        cancel: &CancellationToken,
        reporter: &Arc<ProgressReporter>,
    ) -> Result<Vec<Segment>, ConversionError> {
        let builder = Arc::new(SegmentBuilder::new(
            self.engine.clone(),
            self.options.encode.clone(),
            self.options.segment_retries,
        ));
        let semaphore = Arc::new(Semaphore::new(self.options.workers.max(1)));
        let abort = cancel.child();
        let mut workers = JoinSet::new();

        for track in tracks.iter().cloned() {
            let permit = tokio::select! {
                biased;
                () = abort.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => permit,
            };
            let Ok(permit) = permit else { break };

            let composer = composer.clone();
            let builder = builder.clone();
            let workspace = workspace.clone();
            let reporter = reporter.clone();
            let abort = abort.clone();
            let base = base.clone();

            workers.spawn(async move {
                let _permit = permit;
                let index = track.index;
                let result = async {
                    checkpoint(&abort, Stage::ComposingFrames)?;
                    reporter.enter_track(JobState::ComposingFrames, index);
                    let frame = composer.compose(&track, base, &workspace, &abort).await?;

                    checkpoint(&abort, Stage::BuildingSegments)?;
                    reporter.enter_track(JobState::BuildingSegments, index);
                    let segment = builder.build(&track, &frame, &workspace, &abort).await?;

                    reporter.track_finished(JobState::BuildingSegments, index);
                    Ok::<_, ConversionError>(segment)
                }
                .await;

                if let Err(error) = &result
                    && !error.is_cancelled()
                {
                    abort.cancel();
                }
                result
            });
        }

        let mut segments = Vec::with_capacity(tracks.len());
        let mut failures = Vec::new();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(segment)) => segments.push(segment),
                Ok(Err(error)) => failures.push(error),
                Err(error) => failures.push(ConversionError::Encoding {
                    stage: Stage::BuildingSegments,
                    track_index: None,
                    reason: format!("worker task failed: {error}"),
                }),
            }
        }

        if let Some(error) = first_failure(failures) {
            return Err(error);
        }
        checkpoint(cancel, Stage::BuildingSegments)?;

        segments.sort_by_key(|segment| segment.index);
        Ok(segments)
    }

    /// Every planned chapter must have its segment, in order, with a
    /// matching duration.
    fn check_plan(&self, plan: &ChapterPlan, segments: &[Segment]) -> Result<(), ConversionError> {
        let stage = Stage::PlanningChapters;
        if segments.len() != plan.len() {
            return Err(ConversionError::Encoding {
                stage,
                track_index: None,
                reason: format!(
                    "built {} segments for {} chapters",
                    segments.len(),
                    plan.len()
                ),
            });
        }

        let tolerance = self.options.encode.frame_period();
        for (entry, segment) in plan.entries().iter().zip(segments) {
            let aligned = entry.index == segment.index
                && within_tolerance(segment.duration, entry.span(), tolerance);
            if !aligned {
                return Err(ConversionError::Encoding {
                    stage,
                    track_index: Some(entry.index),
                    reason: format!(
                        "segment of track {} does not match chapter \"{}\"",
                        segment.index + 1,
                        entry.title
                    ),
                });
            }
        }

        if !plan.is_contiguous() {
            return Err(ConversionError::Encoding {
                stage,
                track_index: None,
                reason: "chapter table is not contiguous".to_string(),
            });
        }
        Ok(())
    }
}

fn resolve_all(
    resolver: &MetadataResolver,
    inputs: &[TrackInput],
    layout: &LayoutConfig,
) -> Result<Vec<Track>, ConversionError> {
    let tracks = inputs
        .iter()
        .enumerate()
        .map(|(index, input)| resolver.resolve(index, input, layout))
        .collect::<Result<Vec<_>, _>>()?;
    ensure_uniform_format(&tracks)?;
    Ok(tracks)
}

async fn load_cover(path: PathBuf) -> Result<DynamicImage, ConversionError> {
    let input_error = |path: PathBuf, reason: String| ConversionError::Input {
        stage: Stage::ResolvingMetadata,
        track_index: None,
        path,
        reason,
    };

    let opened = path.clone();
    tokio::task::spawn_blocking(move || image::open(&opened))
        .await
        .map_err(|error| input_error(path.clone(), format!("cover task failed: {error}")))?
        .map_err(|error| input_error(path.clone(), format!("unreadable cover image: {error}")))
}

/// A real failure beats a cancellation; among real failures the lowest
/// track index wins.
fn first_failure(failures: Vec<ConversionError>) -> Option<ConversionError> {
    let (cancelled, real): (Vec<_>, Vec<_>) =
        failures.into_iter().partition(ConversionError::is_cancelled);

    real.into_iter()
        .min_by_key(|error| error.track_index().unwrap_or(usize::MAX))
        .or_else(|| cancelled.into_iter().next())
}

fn checkpoint(token: &CancellationToken, stage: Stage) -> Result<(), ConversionError> {
    if token.is_cancelled() {
        Err(ConversionError::Cancelled { stage })
    } else {
        Ok(())
    }
}
