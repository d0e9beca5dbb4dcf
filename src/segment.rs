//! Per-track segment building.
//!
//! A segment is the track's still frame held for the track's exact duration,
//! muxed with the track's original audio stream. It takes two engine requests:
//! encode the still into a video-only intermediate, then stream-copy that
//! video and the source audio into the segment.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use crate::{
    config::EncodeSettings,
    conversion::{format_seconds, within_tolerance},
    engine::{EncodingEngine, EngineReport, EngineRequest},
    error::ConversionError,
    progress::{CancellationToken, Stage},
    resolver::Track,
    workspace::JobWorkspace,
};

/// A built and verified segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Index of the track it was built from.
    pub index: usize,
    /// The segment file inside the job workspace.
    pub path: PathBuf,
    /// Duration reported by the engine.
    pub duration: Duration,
}

/// Builds segments through an [`EncodingEngine`].
pub struct SegmentBuilder {
    engine: Arc<dyn EncodingEngine>,
    settings: EncodeSettings,
    retries: u32,
}

impl SegmentBuilder {
    /// A builder repeating a failed engine invocation up to `retries` times.
    pub fn new(engine: Arc<dyn EncodingEngine>, settings: EncodeSettings, retries: u32) -> Self {
        Self {
            engine,
            settings,
            retries,
        }
    }

    /// Build the segment of `track` from its composed `frame`.
    ///
    /// # Errors
    ///
    /// [`ConversionError::Encoding`] if the engine keeps failing or an output
    /// duration deviates from the track duration by more than one frame
    /// period; [`ConversionError::Cancelled`] when `cancel` fires.
    pub async fn build(
        &self,
        track: &Track,
        frame: &Path,
        workspace: &JobWorkspace,
        cancel: &CancellationToken,
    ) -> Result<Segment, ConversionError> {
        let video = workspace.video(track.index);
        let render = EngineRequest::RenderStill {
            image: frame.to_path_buf(),
            duration: track.duration,
            settings: self.settings.clone(),
            output: video.clone(),
        };
        let report = self.execute(track, &render, cancel).await?;
        self.check_duration(track, &report)?;

        let mux = EngineRequest::MuxStreamCopy {
            video: video.clone(),
            audio: track.source_path.clone(),
            output: workspace.segment(track.index),
        };
        let report = self.execute(track, &mux, cancel).await?;
        self.check_duration(track, &report)?;

        if report.info.audio.is_none() {
            discard(&report.output).await;
            return Err(ConversionError::Encoding {
                stage: Stage::BuildingSegments,
                track_index: Some(track.index),
                reason: format!("segment {} has no audio stream", report.output.display()),
            });
        }

        discard(&video).await;

        log::debug!(
            "Built segment {} ({}s)",
            report.output.display(),
            format_seconds(report.info.duration),
        );

        Ok(Segment {
            index: track.index,
            path: report.output,
            duration: report.info.duration,
        })
    }

    async fn execute(
        &self,
        track: &Track,
        request: &EngineRequest,
        cancel: &CancellationToken,
    ) -> Result<EngineReport, ConversionError> {
        let stage = Stage::BuildingSegments;
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(ConversionError::Cancelled { stage });
            }

            match self.engine.execute(request, cancel).await {
                Ok(report) => return Ok(report),
                Err(error) if error.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    log::warn!(
                        "{} for track {} failed ({error}); retrying ({attempt}/{})",
                        request.name(),
                        track.index + 1,
                        self.retries,
                    );
                    discard(request.output()).await;
                }
                Err(error) => {
                    discard(request.output()).await;
                    return Err(ConversionError::from_engine(stage, track.index, error));
                }
            }
        }
    }

    /// A duration off by more than one frame period is never retried.
    fn check_duration(&self, track: &Track, report: &EngineReport) -> Result<(), ConversionError> {
        let tolerance = self.settings.frame_period();
        if within_tolerance(report.info.duration, track.duration, tolerance) {
            return Ok(());
        }

        Err(ConversionError::Encoding {
            stage: Stage::BuildingSegments,
            track_index: Some(track.index),
            reason: format!(
                "{} lasts {}s, expected {}s within {}s",
                report.output.display(),
                format_seconds(report.info.duration),
                format_seconds(track.duration),
                format_seconds(tolerance),
            ),
        })
    }
}

async fn discard(path: &Path) {
    if tokio::fs::remove_file(path).await.is_ok() {
        log::debug!("Removed {}", path.display());
    }
}
