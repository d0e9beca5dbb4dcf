//! Media metadata types.
//!
//! These structures are produced by [`MediaProbe`](crate::MediaProbe): one
//! shape for an input audio track and one for a produced container, which the
//! engine reports back after every request.

use std::{collections::HashMap, time::Duration};

/// Parameters of an audio stream that must survive the pipeline unchanged.
///
/// Lossless concatenation needs every track to share these exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SampleFormat {
    /// Codec name (e.g. `"flac"`, `"alac"`, `"pcm_s24le"`).
    pub codec: String,
    /// Sample rate in hertz (e.g. `44100`, `96000`).
    pub sample_rate: u32,
    /// Number of audio channels (e.g. `2` for stereo).
    pub channels: u16,
    /// Bits per sample. `0` when the stream does not declare it.
    pub bits_per_sample: u32,
}

impl SampleFormat {
    /// A compact human-readable form, e.g. `"flac 44100Hz 2ch 16-bit"`.
    pub fn describe(&self) -> String {
        if self.bits_per_sample > 0 {
            format!(
                "{} {}Hz {}ch {}-bit",
                self.codec, self.sample_rate, self.channels, self.bits_per_sample
            )
        } else {
            format!("{} {}Hz {}ch", self.codec, self.sample_rate, self.channels)
        }
    }
}

/// Everything read from an input audio file.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct AudioFileInfo {
    /// Container and stream tags, keys lowercased. Stream tags win over
    /// container tags with the same key.
    pub tags: HashMap<String, String>,
    /// Exact duration of the audio stream.
    pub duration: Duration,
    /// Stream parameters.
    pub sample_format: SampleFormat,
}

impl AudioFileInfo {
    /// Look up a tag by (case-insensitive) key, ignoring blank values.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .get(&key.to_ascii_lowercase())
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }
}

/// Metadata for the video stream of a produced container.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub struct VideoStreamInfo {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Average frames per second, `0.0` when unknown.
    pub frames_per_second: f64,
    /// Codec name (e.g. `"h264"`).
    pub codec: String,
}

/// A chapter as stored in a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterInfo {
    /// The chapter's `title` tag, if any.
    pub title: Option<String>,
    /// Start timestamp.
    pub start: Duration,
    /// End timestamp.
    pub end: Duration,
}

/// Probed structure of a produced container (segment, concatenation, or
/// final output).
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub struct ContainerInfo {
    /// Container duration. `Duration::ZERO` when the container declares none.
    pub duration: Duration,
    /// Best video stream, if any.
    pub video: Option<VideoStreamInfo>,
    /// Best audio stream, if any.
    pub audio: Option<SampleFormat>,
    /// Chapters in container order.
    pub chapters: Vec<ChapterInfo>,
}
