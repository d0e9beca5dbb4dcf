//! Lightweight media file probing.
//!
//! [`MediaProbe`] opens a file with FFmpeg, reads what the pipeline needs, and
//! closes the demuxer immediately. All calls block; async callers run them
//! through `tokio::task::spawn_blocking`.

use std::{collections::HashMap, path::Path};

use ffmpeg_next::{
    Rational,
    codec::context::Context as CodecContext,
    format::{context::Input, stream::Stream},
    media::Type,
};

use crate::{
    conversion::{micros_to_duration, timestamp_to_duration},
    error::ProbeError,
    metadata::{AudioFileInfo, ChapterInfo, ContainerInfo, SampleFormat, VideoStreamInfo},
};

/// Reads track metadata for the resolver.
///
/// The default implementation is [`FfmpegMetadataSource`]; tests substitute
/// an in-memory table.
pub trait MetadataSource: Send + Sync {
    /// Read tags, exact duration, and stream parameters of an audio file.
    fn read(&self, path: &Path) -> Result<AudioFileInfo, ProbeError>;
}

/// [`MetadataSource`] backed by [`MediaProbe::audio`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegMetadataSource;

impl MetadataSource for FfmpegMetadataSource {
    fn read(&self, path: &Path) -> Result<AudioFileInfo, ProbeError> {
        MediaProbe::audio(path)
    }
}

/// Lightweight media file probe.
///
/// # Example
///
/// ```no_run
/// use chaptermux::MediaProbe;
///
/// let info = MediaProbe::audio("01 - Intro.flac")?;
/// println!("{:?} {}", info.duration, info.sample_format.describe());
/// # Ok::<(), chaptermux::ProbeError>(())
/// ```
pub struct MediaProbe;

impl MediaProbe {
    /// Probe an input audio file.
    ///
    /// The duration is the best audio stream's own `duration × time_base`,
    /// never a bitrate estimate.
    ///
    /// # Errors
    ///
    /// - [`ProbeError::Open`] if the file cannot be opened as media.
    /// - [`ProbeError::NoAudioStream`] if no audio stream has a decoder.
    /// - [`ProbeError::NoDuration`] if the stream declares no positive duration.
    pub fn audio<P: AsRef<Path>>(path: P) -> Result<AudioFileInfo, ProbeError> {
        let path = path.as_ref();
        log::debug!("Probing audio file: {}", path.display());

        let input_context = open_input(path)?;

        let stream = input_context
            .streams()
            .best(Type::Audio)
            .ok_or(ProbeError::NoAudioStream)?;

        if ffmpeg_next::decoder::find(stream.parameters().id()).is_none() {
            return Err(ProbeError::NoAudioStream);
        }

        let sample_format = read_sample_format(&stream)?;

        let duration = timestamp_to_duration(stream.duration(), stream.time_base())
            .filter(|duration| !duration.is_zero())
            .ok_or(ProbeError::NoDuration)?;

        let mut tags = HashMap::new();
        for (key, value) in input_context.metadata().iter() {
            tags.insert(key.to_ascii_lowercase(), value.to_string());
        }
        for (key, value) in stream.metadata().iter() {
            tags.insert(key.to_ascii_lowercase(), value.to_string());
        }

        log::debug!(
            "{}: {:?}, {}, {} tags",
            path.display(),
            duration,
            sample_format.describe(),
            tags.len(),
        );

        Ok(AudioFileInfo {
            tags,
            duration,
            sample_format,
        })
    }

    /// Probe a produced container: duration, best video and audio streams,
    /// and the chapter table.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Open`] if the file cannot be opened as media, or
    /// [`ProbeError::Ffmpeg`] if a stream's codec parameters are unreadable.
    pub fn container<P: AsRef<Path>>(path: P) -> Result<ContainerInfo, ProbeError> {
        let path = path.as_ref();
        log::debug!("Probing container: {}", path.display());

        let input_context = open_input(path)?;

        let duration = micros_to_duration(input_context.duration()).unwrap_or_default();

        let video = match input_context.streams().best(Type::Video) {
            Some(stream) => {
                let decoder = CodecContext::from_parameters(stream.parameters())?
                    .decoder()
                    .video()?;
                Some(VideoStreamInfo {
                    width: decoder.width(),
                    height: decoder.height(),
                    frames_per_second: rational_to_f64(stream.avg_frame_rate()),
                    codec: decoder
                        .codec()
                        .map(|codec| codec.name().to_string())
                        .unwrap_or_else(|| "unknown".to_string()),
                })
            }
            None => None,
        };

        let audio = match input_context.streams().best(Type::Audio) {
            Some(stream) => Some(read_sample_format(&stream)?),
            None => None,
        };

        Ok(ContainerInfo {
            duration,
            video,
            audio,
            chapters: read_chapters(&input_context),
        })
    }
}

fn open_input(path: &Path) -> Result<Input, ProbeError> {
    // Safe to call more than once.
    ffmpeg_next::init()
        .map_err(|error| ProbeError::Open(format!("FFmpeg initialisation failed: {error}")))?;

    ffmpeg_next::format::input(&path)
        .map_err(|error| ProbeError::Open(format!("{}: {error}", path.display())))
}

fn read_sample_format(stream: &Stream<'_>) -> Result<SampleFormat, ProbeError> {
    let decoder = CodecContext::from_parameters(stream.parameters())?
        .decoder()
        .audio()
        .map_err(|_| ProbeError::NoAudioStream)?;

    let codec = decoder
        .codec()
        .map(|codec| codec.name().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    // FLAC and ALAC declare their depth in bits_per_raw_sample; PCM only has
    // the sample format.
    let bits_per_sample = {
        let parameters = stream.parameters();
        let raw = unsafe { *parameters.as_ptr() };
        if raw.bits_per_raw_sample > 0 {
            raw.bits_per_raw_sample as u32
        } else {
            (decoder.format().bytes() * 8) as u32
        }
    };

    Ok(SampleFormat {
        codec,
        sample_rate: decoder.rate(),
        channels: decoder.channels(),
        bits_per_sample,
    })
}

fn read_chapters(input_context: &Input) -> Vec<ChapterInfo> {
    input_context
        .chapters()
        .map(|chapter| {
            let time_base = chapter.time_base();
            ChapterInfo {
                title: chapter.metadata().get("title").map(|title| title.to_string()),
                start: timestamp_to_duration(chapter.start(), time_base).unwrap_or_default(),
                end: timestamp_to_duration(chapter.end(), time_base).unwrap_or_default(),
            }
        })
        .collect()
}

fn rational_to_f64(rate: Rational) -> f64 {
    if rate.denominator() != 0 {
        rate.numerator() as f64 / rate.denominator() as f64
    } else {
        0.0
    }
}
