//! The external encoding engine.
//!
//! Every piece of media work the pipeline delegates is one [`EngineRequest`]
//! passed to an [`EncodingEngine`]. The engine performs it and reports the
//! probed structure of what it wrote, which the caller checks against its own
//! expectations; nothing in the engine decides whether the output is right.
//!
//! [`FfmpegEngine`] runs the `ffmpeg` executable. It also implements
//! [`FrameRenderer`] by drawing text with the `drawtext` filter.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use tokio::{io::AsyncReadExt, process::Command};

use crate::{
    compose::{FrameRenderer, FrameRequest},
    config::{ConversionOptions, EncodeSettings},
    conversion::format_seconds,
    error::EngineError,
    ffmpeg::{FfmpegLogLevel, locate_ffmpeg},
    metadata::ContainerInfo,
    probe::MediaProbe,
    progress::CancellationToken,
};

/// Number of trailing stderr lines kept in [`EngineError::Exit`].
const STDERR_TAIL_LINES: usize = 20;

/// One unit of work for the engine. Every output is a Matroska file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineRequest {
    /// Encode a still image into a video-only stream lasting `duration`.
    RenderStill {
        /// The still frame.
        image: PathBuf,
        /// Exact length of the video.
        duration: Duration,
        /// Resolution, frame rate, and quality.
        settings: EncodeSettings,
        /// Video-only output.
        output: PathBuf,
    },
    /// Combine the video of `video` with the audio of `audio`, copying both
    /// streams without re-encoding.
    MuxStreamCopy {
        /// Video-only input.
        video: PathBuf,
        /// Original audio file.
        audio: PathBuf,
        /// Segment output.
        output: PathBuf,
    },
    /// Join segments listed in a concat list, without re-encoding.
    ///
    /// Each segment starts in the joined timeline where the declared
    /// duration of the previous one ends, not where its last frame ends.
    ConcatLossless {
        /// Concat demuxer list naming `segments` in order.
        list_file: PathBuf,
        /// The segments, in order.
        segments: Vec<ConcatPart>,
        /// Joined output.
        output: PathBuf,
    },
    /// Copy `input` and replace its chapter table with the one in
    /// `metadata_file`.
    InjectChapters {
        /// Joined input.
        input: PathBuf,
        /// FFMETADATA document.
        metadata_file: PathBuf,
        /// Final output.
        output: PathBuf,
    },
}

/// One input of [`EngineRequest::ConcatLossless`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcatPart {
    /// The segment file.
    pub path: PathBuf,
    /// Length of the segment in the joined timeline.
    pub duration: Duration,
}

impl EngineRequest {
    /// Where the request writes.
    pub fn output(&self) -> &Path {
        match self {
            EngineRequest::RenderStill { output, .. }
            | EngineRequest::MuxStreamCopy { output, .. }
            | EngineRequest::ConcatLossless { output, .. }
            | EngineRequest::InjectChapters { output, .. } => output,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            EngineRequest::RenderStill { .. } => "render-still",
            EngineRequest::MuxStreamCopy { .. } => "mux-stream-copy",
            EngineRequest::ConcatLossless { .. } => "concat-lossless",
            EngineRequest::InjectChapters { .. } => "inject-chapters",
        }
    }
}

/// What the engine wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineReport {
    /// The output file.
    pub output: PathBuf,
    /// Probed structure of the output.
    pub info: ContainerInfo,
}

/// Performs [`EngineRequest`]s.
///
/// Implementations must stop promptly once `cancel` fires, leave no partial
/// output behind on failure, and return [`EngineError::Cancelled`] in that
/// case.
#[async_trait]
pub trait EncodingEngine: Send + Sync {
    /// Perform `request` and report the probed output.
    async fn execute(
        &self,
        request: &EngineRequest,
        cancel: &CancellationToken,
    ) -> Result<EngineReport, EngineError>;
}

/// Engine backed by the `ffmpeg` executable.
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    program: PathBuf,
    log_level: FfmpegLogLevel,
}

impl FfmpegEngine {
    /// Use the executable at `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            log_level: FfmpegLogLevel::default(),
        }
    }

    /// The configured executable, else `ffmpeg` from `PATH`, else plain
    /// `ffmpeg` left to the operating system to resolve.
    pub fn from_options(options: &ConversionOptions) -> Self {
        let program = options
            .ffmpeg_path
            .clone()
            .or_else(locate_ffmpeg)
            .unwrap_or_else(|| PathBuf::from("ffmpeg"));
        Self::new(program).with_log_level(options.log_level)
    }

    /// Set the process's `-loglevel`.
    #[must_use]
    pub fn with_log_level(mut self, level: FfmpegLogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// The executable in use.
    pub fn program(&self) -> &Path {
        &self.program
    }

    fn common_args(&self) -> Vec<String> {
        ["-y", "-hide_banner", "-nostdin", "-loglevel", self.log_level.as_arg()]
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    /// Command line for `request`, without the program name.
    pub fn build_args(&self, request: &EngineRequest) -> Vec<String> {
        let mut args = self.common_args();

        match request {
            EngineRequest::RenderStill {
                image,
                duration,
                settings,
                ..
            } => {
                let frame_rate = settings.frame_rate.to_string();
                args.extend(
                    ["-loop", "1", "-framerate", frame_rate.as_str(), "-i"]
                        .iter()
                        .map(ToString::to_string),
                );
                args.push(path_arg(image));
                args.extend([
                    "-t".to_string(),
                    format_seconds(*duration),
                    "-vf".to_string(),
                    format!(
                        "scale={}:{}:flags=lanczos",
                        settings.width, settings.height
                    ),
                    "-c:v".to_string(),
                    EncodeSettings::ENCODER.to_string(),
                    "-preset".to_string(),
                    settings.preset.clone(),
                    "-tune".to_string(),
                    "stillimage".to_string(),
                    "-crf".to_string(),
                    settings.crf.to_string(),
                    "-pix_fmt".to_string(),
                    settings.pixel_format.clone(),
                    "-r".to_string(),
                    frame_rate,
                    "-an".to_string(),
                ]);
            }
            EngineRequest::MuxStreamCopy { video, audio, .. } => {
                args.push("-i".to_string());
                args.push(path_arg(video));
                args.push("-i".to_string());
                args.push(path_arg(audio));
                args.extend(
                    ["-map", "0:v:0", "-map", "1:a:0", "-c", "copy", "-map_metadata", "-1"]
                        .iter()
                        .map(ToString::to_string),
                );
            }
            EngineRequest::ConcatLossless { list_file, .. } => {
                args.extend(
                    ["-f", "concat", "-safe", "0", "-i"]
                        .iter()
                        .map(ToString::to_string),
                );
                args.push(path_arg(list_file));
                args.extend(["-map", "0", "-c", "copy"].iter().map(ToString::to_string));
            }
            EngineRequest::InjectChapters {
                input,
                metadata_file,
                ..
            } => {
                args.push("-i".to_string());
                args.push(path_arg(input));
                args.extend(["-f", "ffmetadata", "-i"].iter().map(ToString::to_string));
                args.push(path_arg(metadata_file));
                args.extend(
                    ["-map", "0", "-map_metadata", "1", "-map_chapters", "1", "-c", "copy"]
                        .iter()
                        .map(ToString::to_string),
                );
            }
        }

        args.extend(["-f".to_string(), "matroska".to_string()]);
        args.push(path_arg(request.output()));
        args
    }

    /// Command line that draws `request.lines` onto `request.base`.
    pub fn build_render_args(&self, request: &FrameRequest) -> Vec<String> {
        let mut args = self.common_args();
        args.push("-i".to_string());
        args.push(path_arg(&request.base));

        let filters: Vec<String> = request
            .lines
            .iter()
            .zip(&request.text_files)
            .map(|(line, text_file)| {
                let mut filter = format!(
                    "drawtext=textfile={}:expansion=none:fontsize={}:fontcolor=0x{}:x={}:y={}",
                    escape_filter_value(&path_arg(text_file)),
                    line.font_size,
                    request.color.hex(),
                    line.x,
                    line.y,
                );
                if let Some(font) = &request.font {
                    filter.push_str(&format!(":fontfile={}", escape_filter_value(&path_arg(font))));
                }
                if let Some((color, intensity)) = request.glow.color_and_intensity() {
                    filter.push_str(&format!(
                        ":borderw={}:bordercolor=0x{}@{:.2}",
                        (line.font_size / 12).max(2),
                        color.hex(),
                        intensity,
                    ));
                }
                filter
            })
            .collect();

        if !filters.is_empty() {
            args.push("-vf".to_string());
            args.push(filters.join(","));
        }

        args.extend(
            ["-frames:v", "1", "-update", "1", "-f", "image2"]
                .iter()
                .map(ToString::to_string),
        );
        args.push(path_arg(&request.output));
        args
    }

    async fn run(
        &self,
        args: &[String],
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        log::debug!("ffmpeg args: {args:?}");

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EngineError::Launch {
                program: self.program.clone(),
                source,
            })?;

        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::Output("failed to capture ffmpeg stderr".to_string()))?;
        let stderr_reader = tokio::spawn(async move {
            let mut bytes = Vec::new();
            let _ = stderr.read_to_end(&mut bytes).await;
            bytes
        });

        let finished = tokio::select! {
            status = child.wait() => Some(status),
            () = cancel.cancelled() => None,
        };

        let Some(status) = finished else {
            log::debug!("Cancelling ffmpeg writing {}", output.display());
            let _ = child.kill().await;
            stderr_reader.abort();
            discard(output).await;
            return Err(EngineError::Cancelled);
        };

        let status = status?;
        let stderr = stderr_reader.await.unwrap_or_default();

        if !status.success() {
            discard(output).await;
            return Err(EngineError::Exit {
                status: status.code(),
                stderr: stderr_tail(&stderr, STDERR_TAIL_LINES),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl EncodingEngine for FfmpegEngine {
    async fn execute(
        &self,
        request: &EngineRequest,
        cancel: &CancellationToken,
    ) -> Result<EngineReport, EngineError> {
        let output = request.output().to_path_buf();
        log::debug!("Engine request {} -> {}", request.name(), output.display());

        self.run(&self.build_args(request), &output, cancel).await?;

        let probe_path = output.clone();
        let info = tokio::task::spawn_blocking(move || MediaProbe::container(&probe_path))
            .await
            .map_err(|error| EngineError::Output(format!("probe task failed: {error}")))?
            .map_err(|error| EngineError::Output(error.to_string()))?;

        Ok(EngineReport { output, info })
    }
}

#[async_trait]
impl FrameRenderer for FfmpegEngine {
    async fn render(
        &self,
        request: &FrameRequest,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        self.run(&self.build_render_args(request), &request.output, cancel)
            .await
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Escape a value for a filter option, then for the filtergraph around it.
fn escape_filter_value(value: &str) -> String {
    let escape = |text: &str, special: &[char]| {
        let mut escaped = String::with_capacity(text.len());
        for c in text.chars() {
            if special.contains(&c) {
                escaped.push('\\');
            }
            escaped.push(c);
        }
        escaped
    };

    let option_level = escape(value, &['\\', '\'', ':']);
    escape(&option_level, &['\\', '\'', '[', ']', ',', ';'])
}

/// The last `lines` non-blank lines of the engine's diagnostics. Bytes that
/// are not UTF-8, such as paths in a legacy encoding, are replaced.
fn stderr_tail(bytes: &[u8], lines: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    let all: Vec<&str> = text.lines().filter(|line| !line.trim().is_empty()).collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

async fn discard(path: &Path) {
    if tokio::fs::remove_file(path).await.is_ok() {
        log::debug!("Removed partial output {}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compose::TextLine,
        layout::{Glow, Rgb},
    };

    fn engine() -> FfmpegEngine {
        FfmpegEngine::new("/usr/bin/ffmpeg")
    }

    fn position(args: &[String], value: &str) -> usize {
        args.iter()
            .position(|arg| arg == value)
            .unwrap_or_else(|| panic!("{value} missing from {args:?}"))
    }

    #[test]
    fn render_still_args() {
        let request = EngineRequest::RenderStill {
            image: PathBuf::from("/work/frame-001.png"),
            duration: Duration::from_millis(210_500),
            settings: EncodeSettings::default(),
            output: PathBuf::from("/work/video-001.mkv"),
        };
        let args = engine().build_args(&request);

        assert_eq!(&args[..5], ["-y", "-hide_banner", "-nostdin", "-loglevel", "error"]);
        assert_eq!(args[position(&args, "-loop") + 1], "1");
        assert_eq!(args[position(&args, "-t") + 1], "210.500000");
        assert_eq!(args[position(&args, "-c:v") + 1], "libx264");
        assert_eq!(args[position(&args, "-crf") + 1], "18");
        assert_eq!(args[position(&args, "-pix_fmt") + 1], "yuv420p");
        assert_eq!(args[position(&args, "-r") + 1], "1");
        assert_eq!(args[position(&args, "-vf") + 1], "scale=1920:1080:flags=lanczos");
        assert!(args.contains(&"-an".to_string()));
        assert_eq!(args.last().unwrap(), "/work/video-001.mkv");
    }

    #[test]
    fn still_frames_use_the_stillimage_tune() {
        let request = EngineRequest::RenderStill {
            image: PathBuf::from("frame.png"),
            duration: Duration::from_secs(1),
            settings: EncodeSettings::default(),
            output: PathBuf::from("video.mkv"),
        };
        let args = engine().build_args(&request);
        assert_eq!(args[position(&args, "-tune") + 1], "stillimage");
    }

    #[test]
    fn stderr_tail_survives_invalid_utf8() {
        let stderr = b"frame=1\n\n/music/caf\xe9.flac: Invalid data found\nConversion failed!\n";
        let tail = stderr_tail(stderr, 2);
        assert_eq!(
            tail,
            "/music/caf\u{FFFD}.flac: Invalid data found\nConversion failed!"
        );
        assert_eq!(stderr_tail(b"", 5), "");
    }

    #[test]
    fn mux_copies_both_streams() {
        let request = EngineRequest::MuxStreamCopy {
            video: PathBuf::from("video.mkv"),
            audio: PathBuf::from("01.flac"),
            output: PathBuf::from("segment.mkv"),
        };
        let args = engine().build_args(&request);
        assert_eq!(args[position(&args, "-c") + 1], "copy");
        assert!(args.windows(2).any(|pair| pair == ["-map", "1:a:0"]));
        assert!(!args.contains(&"-c:a".to_string()));
    }

    #[test]
    fn concat_uses_the_list_demuxer() {
        let request = EngineRequest::ConcatLossless {
            list_file: PathBuf::from("segments.txt"),
            segments: vec![
                ConcatPart {
                    path: PathBuf::from("a.mkv"),
                    duration: Duration::from_secs(3),
                },
                ConcatPart {
                    path: PathBuf::from("b.mkv"),
                    duration: Duration::from_millis(2_500),
                },
            ],
            output: PathBuf::from("joined.mkv"),
        };
        let args = engine().build_args(&request);
        assert!(args.windows(2).any(|pair| pair == ["-f", "concat"]));
        assert!(args.windows(2).any(|pair| pair == ["-safe", "0"]));
        assert!(args.windows(2).any(|pair| pair == ["-i", "segments.txt"]));
        assert!(args.windows(2).any(|pair| pair == ["-c", "copy"]));
    }

    #[test]
    fn inject_reads_ffmetadata_as_second_input() {
        let request = EngineRequest::InjectChapters {
            input: PathBuf::from("joined.mkv"),
            metadata_file: PathBuf::from("chapters.ffmeta"),
            output: PathBuf::from(".album.partial.mkv"),
        };
        let args = engine().build_args(&request);
        let format = position(&args, "ffmetadata");
        assert_eq!(args[format + 1], "-i");
        assert_eq!(args[format + 2], "chapters.ffmeta");
        assert_eq!(args[position(&args, "-map_chapters") + 1], "1");
        assert_eq!(args.last().unwrap(), ".album.partial.mkv");
    }

    #[test]
    fn render_args_draw_one_filter_per_line() {
        let request = FrameRequest {
            base: PathBuf::from("/work/base.png"),
            lines: vec![
                TextLine {
                    text: "01. So What".to_string(),
                    font_size: 72,
                    x: 1010,
                    y: 400,
                },
                TextLine {
                    text: "Miles Davis".to_string(),
                    font_size: 48,
                    x: 1010,
                    y: 490,
                },
            ],
            text_files: vec![
                PathBuf::from("/work/frame-001-line1.txt"),
                PathBuf::from("/work/frame-001-line2.txt"),
            ],
            color: Rgb::WHITE,
            glow: Glow::Black { intensity: 0.5 },
            font: None,
            output: PathBuf::from("/work/frame-001.png"),
        };
        let args = engine().build_render_args(&request);
        let filter = &args[position(&args, "-vf") + 1];

        assert_eq!(filter.matches("drawtext=").count(), 2);
        assert!(filter.contains("textfile=/work/frame-001-line1.txt"));
        assert!(filter.contains("fontsize=72"));
        assert!(filter.contains("fontcolor=0xffffff"));
        assert!(filter.contains("bordercolor=0x000000@0.50"));
        assert!(!filter.contains("fontfile"));
        assert_eq!(args.last().unwrap(), "/work/frame-001.png");
    }

    #[test]
    fn filter_values_are_escaped_at_both_levels() {
        assert_eq!(escape_filter_value("/plain/path.txt"), "/plain/path.txt");
        assert_eq!(escape_filter_value("C:/fonts/a.ttf"), "C\\\\:/fonts/a.ttf");
        assert_eq!(escape_filter_value("it's"), "it\\\\\\'s");
        assert_eq!(escape_filter_value("a,b"), "a\\,b");
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let text = "one\n\ntwo\nthree\n";
        assert_eq!(tail(text, 2), "two\nthree");
        assert_eq!(tail(text, 10), "one\ntwo\nthree");
    }

    #[tokio::test]
    async fn missing_program_is_a_launch_error() {
        let engine = FfmpegEngine::new("/nonexistent/ffmpeg-binary");
        let request = EngineRequest::MuxStreamCopy {
            video: PathBuf::from("video.mkv"),
            audio: PathBuf::from("audio.flac"),
            output: std::env::temp_dir().join("chaptermux-never-written.mkv"),
        };
        let error = engine
            .execute(&request, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(error, EngineError::Launch { .. }));
        assert!(error.is_transient());
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let token = CancellationToken::new();
        token.cancel();
        let request = EngineRequest::ConcatLossless {
            list_file: PathBuf::from("segments.txt"),
            segments: Vec::new(),
            output: PathBuf::from("joined.mkv"),
        };
        let error = engine().execute(&request, &token).await.unwrap_err();
        assert!(matches!(error, EngineError::Cancelled));
    }
}
