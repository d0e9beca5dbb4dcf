//! # chaptermux
//!
//! Turn an album of lossless tracks and a cover image into one video file
//! with a chapter per track.
//!
//! Every track becomes a segment: a 1920×1080 still showing the cover and the
//! track's title, artist, and album, held for exactly the track's duration,
//! with the track's audio stream copied in untouched. The segments are joined
//! without re-encoding and a chapter table marks where each track starts.
//!
//! Metadata is read in-process through
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next); encoding, text
//! rendering, and muxing run the `ffmpeg` executable.
//!
//! ## Quick Start
//!
//! ```no_run
//! use chaptermux::{CancellationToken, ConversionJob, ConversionOptions, Converter};
//!
//! # async fn example() -> Result<(), chaptermux::ConversionError> {
//! let job = ConversionJob::new(
//!     ["01 - Intro.flac", "02 - Song.flac", "03 - Outro.flac"],
//!     "cover.jpg",
//!     "album.mkv",
//! );
//! let report = Converter::with_ffmpeg(ConversionOptions::new())
//!     .run(job, &CancellationToken::new())
//!     .await?;
//! print!("{}", report.chapters.describe());
//! # Ok(())
//! # }
//! ```
//!
//! ### Custom layout
//!
//! ```no_run
//! use chaptermux::{Background, BorderStyle, ConversionJob, Glow, LayoutConfig, Rgb};
//!
//! let layout = LayoutConfig::default()
//!     .with_background(Background::Gradient {
//!         from: Rgb([20, 20, 40]),
//!         to: Rgb([0, 0, 0]),
//!     })
//!     .with_border(BorderStyle::White)
//!     .with_glow(Glow::Black { intensity: 0.6 })
//!     .with_show_album(false);
//!
//! let job = ConversionJob::new(["01.flac"], "cover.png", "single.mkv").with_layout(layout);
//! ```
//!
//! ## Guarantees
//!
//! - **Lossless audio**: audio packets are stream-copied from the sources.
//! - **All or nothing**: the destination is written by renaming a verified
//!   staging file; a failed or cancelled job leaves no output and no
//!   temporary files.
//! - **Exact chapters**: chapter boundaries are running sums of the source
//!   durations, verified against the assembled file.
//!
//! ## Requirements
//!
//! FFmpeg development libraries for probing, and an `ffmpeg` executable
//! built with `libx264` (or `libx265`) and `drawtext` on `PATH` or set with
//! [`ConversionOptions::with_ffmpeg_path`].

pub mod assemble;
pub mod chapters;
pub mod compose;
pub mod config;
mod conversion;
pub mod engine;
pub mod error;
pub mod ffmpeg;
pub mod layout;
pub mod metadata;
pub mod pipeline;
pub mod probe;
pub mod progress;
pub mod resolver;
pub mod segment;
pub mod stream;
pub mod validation;
pub mod workspace;

pub use assemble::{Assembler, staging_path};
pub use chapters::{ChapterEntry, ChapterPlan, chapter_title};
pub use compose::{FrameComposer, FrameRenderer, FrameRequest, FrameText, TextLine, layout_text};
pub use config::{ConversionOptions, EncodeSettings};
pub use engine::{ConcatPart, EncodingEngine, EngineReport, EngineRequest, FfmpegEngine};
pub use error::{ConversionError, EngineError, ErrorKind, ProbeError};
pub use ffmpeg::{FfmpegLogLevel, is_ffmpeg_available, locate_ffmpeg, set_ffmpeg_log_level};
pub use layout::{Background, BorderStyle, Glow, LayoutConfig, LayoutError, Rgb};
pub use metadata::{AudioFileInfo, ChapterInfo, ContainerInfo, SampleFormat, VideoStreamInfo};
pub use pipeline::{ConversionJob, ConversionReport, Converter, JobHandle};
pub use probe::{FfmpegMetadataSource, MediaProbe, MetadataSource};
pub use progress::{CancellationToken, JobState, ProgressEvent, Stage};
pub use resolver::{MetadataResolver, Track, TrackInput, TrackOverrides, title_from_file_name};
pub use segment::{Segment, SegmentBuilder};
pub use stream::ProgressStream;
pub use validation::{ValidationReport, verify_output};
pub use workspace::JobWorkspace;
