//! Shared test doubles: an in-memory encoding engine and text renderer, a
//! scripted metadata source, and fixture helpers.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{
        Mutex,
        atomic::{AtomicU32, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chaptermux::{
    AudioFileInfo, CancellationToken, ChapterInfo, ConcatPart, ContainerInfo, EncodeSettings,
    EncodingEngine, EngineError, EngineReport, EngineRequest, FrameRenderer, FrameRequest,
    MetadataSource, ProbeError, SampleFormat, VideoStreamInfo,
};
use image::{DynamicImage, Rgb, RgbImage};

pub fn flac_format() -> SampleFormat {
    SampleFormat {
        codec: "flac".to_string(),
        sample_rate: 44_100,
        channels: 2,
        bits_per_sample: 16,
    }
}

// ── Engine ─────────────────────────────────────────────────────────

/// Performs engine requests by writing placeholder files and reporting the
/// durations a real encoder would produce: a still render lasts a whole
/// number of frames, and a concatenation honours each part's declared
/// duration while the last part runs to its own end.
#[derive(Default)]
pub struct MockEngine {
    requests: Mutex<Vec<EngineRequest>>,
    durations: Mutex<HashMap<PathBuf, Duration>>,
    spurious_failures: AtomicU32,
    failing_track: Option<usize>,
    duration_skew: Duration,
    delay: Duration,
    audio: Option<SampleFormat>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` still renders fail with a non-zero exit.
    pub fn with_spurious_failures(self, count: u32) -> Self {
        self.spurious_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Every still render of track `index` fails.
    pub fn with_failing_track(mut self, index: usize) -> Self {
        self.failing_track = Some(index);
        self
    }

    /// Still renders last `skew` longer than requested.
    pub fn with_duration_skew(mut self, skew: Duration) -> Self {
        self.duration_skew = skew;
        self
    }

    /// Every request takes `delay` unless cancelled.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Audio stream reported for muxed files.
    pub fn with_audio(mut self, audio: SampleFormat) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn requests(&self) -> Vec<EngineRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_names(&self) -> Vec<&'static str> {
        self.requests().iter().map(EngineRequest::name).collect()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn audio(&self) -> SampleFormat {
        self.audio.clone().unwrap_or_else(flac_format)
    }

    fn duration_of(&self, path: &Path) -> Duration {
        self.durations
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or_default()
    }

    fn perform(&self, request: &EngineRequest) -> Result<ContainerInfo, EngineError> {
        let video = Some(VideoStreamInfo {
            width: 1920,
            height: 1080,
            frames_per_second: 1.0,
            codec: "h264".to_string(),
        });

        let info = match request {
            EngineRequest::RenderStill {
                duration,
                settings,
                output,
                ..
            } => {
                let fails_always = self.failing_track.is_some_and(|index| {
                    file_name(output) == format!("video-{:03}.mkv", index + 1)
                });
                let fails_once = self
                    .spurious_failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                    .is_ok();
                if fails_always || fails_once {
                    fs::write(output, b"partial")?;
                    return Err(EngineError::Exit {
                        status: Some(1),
                        stderr: "Conversion failed!".to_string(),
                    });
                }

                ContainerInfo {
                    duration: whole_frames(*duration, settings) + self.duration_skew,
                    video,
                    audio: None,
                    chapters: Vec::new(),
                }
            }
            EngineRequest::MuxStreamCopy { video: input, .. } => ContainerInfo {
                duration: self.duration_of(input),
                video,
                audio: Some(self.audio()),
                chapters: Vec::new(),
            },
            EngineRequest::ConcatLossless { segments, .. } => ContainerInfo {
                duration: self.concatenated(segments),
                video,
                audio: Some(self.audio()),
                chapters: Vec::new(),
            },
            EngineRequest::InjectChapters {
                input,
                metadata_file,
                ..
            } => ContainerInfo {
                duration: self.duration_of(input),
                video,
                audio: Some(self.audio()),
                chapters: parse_ffmetadata(&fs::read_to_string(metadata_file)?),
            },
        };

        fs::write(request.output(), b"mock media")?;
        self.durations
            .lock()
            .unwrap()
            .insert(request.output().to_path_buf(), info.duration);
        Ok(info)
    }

    fn concatenated(&self, parts: &[ConcatPart]) -> Duration {
        let Some((last, leading)) = parts.split_last() else {
            return Duration::ZERO;
        };
        leading.iter().map(|part| part.duration).sum::<Duration>() + self.duration_of(&last.path)
    }

    async fn wait(&self, cancel: &CancellationToken) -> Result<(), EngineError> {
        if self.delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            () = tokio::time::sleep(self.delay) => Ok(()),
            () = cancel.cancelled() => Err(EngineError::Cancelled),
        }
    }
}

#[async_trait]
impl EncodingEngine for MockEngine {
    async fn execute(
        &self,
        request: &EngineRequest,
        cancel: &CancellationToken,
    ) -> Result<EngineReport, EngineError> {
        self.requests.lock().unwrap().push(request.clone());
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);

        let result = match self.wait(cancel).await {
            Ok(()) => self.perform(request),
            Err(error) => Err(error),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result.map(|info| EngineReport {
            output: request.output().to_path_buf(),
            info,
        })
    }
}

/// `duration` rounded up to a whole number of frames.
pub fn whole_frames(duration: Duration, settings: &EncodeSettings) -> Duration {
    let period = settings.frame_period().as_nanos();
    let frames = duration.as_nanos().div_ceil(period);
    Duration::from_nanos((frames * period) as u64)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn parse_ffmetadata(document: &str) -> Vec<ChapterInfo> {
    let mut chapters = Vec::new();
    let mut current: Option<ChapterInfo> = None;
    for line in document.lines() {
        if line == "[CHAPTER]" {
            chapters.extend(current.take());
            current = Some(ChapterInfo {
                title: None,
                start: Duration::ZERO,
                end: Duration::ZERO,
            });
            continue;
        }
        let Some(chapter) = current.as_mut() else {
            continue;
        };
        if let Some(value) = line.strip_prefix("START=") {
            chapter.start = Duration::from_millis(value.parse().unwrap());
        } else if let Some(value) = line.strip_prefix("END=") {
            chapter.end = Duration::from_millis(value.parse().unwrap());
        } else if let Some(value) = line.strip_prefix("title=") {
            chapter.title = Some(unescape(value));
        }
    }
    chapters.extend(current);
    chapters
}

fn unescape(value: &str) -> String {
    let mut text = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            text.extend(chars.next());
        } else {
            text.push(c);
        }
    }
    text
}

// ── Renderer ───────────────────────────────────────────────────────

/// Writes the base raster as the finished frame and records what it was
/// asked to draw.
#[derive(Default)]
pub struct MockRenderer {
    requests: Mutex<Vec<FrameRequest>>,
}

impl MockRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<FrameRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Every line drawn, across all frames, in request order.
    pub fn drawn_text(&self) -> Vec<String> {
        self.requests()
            .iter()
            .flat_map(|request| request.lines.iter().map(|line| line.text.clone()))
            .collect()
    }
}

#[async_trait]
impl FrameRenderer for MockRenderer {
    async fn render(
        &self,
        request: &FrameRequest,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        self.requests.lock().unwrap().push(request.clone());
        fs::copy(&request.base, &request.output)?;
        Ok(())
    }
}

// ── Metadata ───────────────────────────────────────────────────────

/// Answers metadata reads from a table keyed by path.
#[derive(Default)]
pub struct MockMetadata {
    tracks: HashMap<PathBuf, Option<AudioFileInfo>>,
}

impl MockMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// A FLAC track lasting `millis` with the given tags.
    pub fn with_track(self, path: &Path, millis: u64, tags: &[(&str, &str)]) -> Self {
        self.with_track_format(path, millis, tags, flac_format())
    }

    /// A track with an explicit stream format.
    pub fn with_track_format(
        mut self,
        path: &Path,
        millis: u64,
        tags: &[(&str, &str)],
        sample_format: SampleFormat,
    ) -> Self {
        let info = AudioFileInfo {
            tags: tags
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
            duration: Duration::from_millis(millis),
            sample_format,
        };
        self.tracks.insert(path.to_path_buf(), Some(info));
        self
    }

    /// A file that exists but holds no audio.
    pub fn with_invalid(mut self, path: &Path) -> Self {
        self.tracks.insert(path.to_path_buf(), None);
        self
    }
}

impl MetadataSource for MockMetadata {
    fn read(&self, path: &Path) -> Result<AudioFileInfo, ProbeError> {
        match self.tracks.get(path) {
            Some(Some(info)) => Ok(info.clone()),
            Some(None) => Err(ProbeError::NoAudioStream),
            None => Err(ProbeError::Open(path.display().to_string())),
        }
    }
}

// ── Fixtures ───────────────────────────────────────────────────────

/// A small gradient cover written as PNG.
pub fn write_cover(dir: &Path) -> PathBuf {
    let cover = DynamicImage::ImageRgb8(RgbImage::from_fn(64, 48, |x, y| {
        Rgb([(x * 4) as u8, (y * 5) as u8, 90])
    }));
    let path = dir.join("cover.png");
    cover.save(&path).unwrap();
    path
}

/// Empty placeholder files standing in for audio tracks.
pub fn touch_tracks(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
    names
        .iter()
        .map(|name| {
            let path = dir.join(name);
            fs::write(&path, b"").unwrap();
            path
        })
        .collect()
}

/// Whether `dir` holds no entries.
pub fn is_empty_dir(dir: &Path) -> bool {
    fs::read_dir(dir).unwrap().next().is_none()
}
