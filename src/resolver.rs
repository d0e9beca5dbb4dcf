//! Metadata resolution.
//!
//! [`MetadataResolver`] turns a [`TrackInput`] into a fully resolved
//! [`Track`]: exact duration and stream parameters from the file, text fields
//! from the highest-priority layer that provides them.
//!
//! Precedence, highest first:
//!
//! 1. per-track [`TrackOverrides`]
//! 2. the job-wide artist/album overrides of the [`LayoutConfig`]
//! 3. the file's tags
//! 4. a fallback (title from the file name, `"Unknown Artist"`,
//!    `"Unknown Album"`, track number from the file name or job position)

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use crate::{
    error::ConversionError,
    layout::LayoutConfig,
    metadata::SampleFormat,
    probe::MetadataSource,
    progress::Stage,
};

/// Artist used when neither an override nor a tag provides one.
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
/// Album used when neither an override nor a tag provides one.
pub const UNKNOWN_ALBUM: &str = "Unknown Album";

/// User-supplied values that replace what the file says.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackOverrides {
    /// Replacement title.
    pub title: Option<String>,
    /// Replacement artist.
    pub artist: Option<String>,
    /// Replacement album.
    pub album: Option<String>,
    /// Replacement track number.
    pub track_number: Option<u32>,
}

/// One input track of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInput {
    /// The lossless audio file.
    pub path: PathBuf,
    /// Per-track overrides.
    pub overrides: TrackOverrides,
}

impl TrackInput {
    /// A track with no overrides.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            overrides: TrackOverrides::default(),
        }
    }

    /// Override the title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.overrides.title = Some(title.into());
        self
    }

    /// Override the artist.
    #[must_use]
    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.overrides.artist = Some(artist.into());
        self
    }

    /// Override the album.
    #[must_use]
    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.overrides.album = Some(album.into());
        self
    }

    /// Override the track number.
    #[must_use]
    pub fn with_track_number(mut self, number: u32) -> Self {
        self.overrides.track_number = Some(number);
        self
    }
}

/// A track with all metadata resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    /// Zero-based position in the job, which is also the chapter order.
    pub index: usize,
    /// The lossless audio file.
    pub source_path: PathBuf,
    /// Exact audio duration, always positive.
    pub duration: Duration,
    /// Stream parameters, preserved in the output.
    pub sample_format: SampleFormat,
    /// Resolved title.
    pub title: String,
    /// Resolved artist.
    pub artist: String,
    /// Resolved album.
    pub album: String,
    /// Resolved track number.
    pub track_number: u32,
}

/// Resolves [`TrackInput`]s against a [`MetadataSource`].
#[derive(Clone)]
pub struct MetadataResolver {
    source: Arc<dyn MetadataSource>,
}

impl MetadataResolver {
    /// A resolver reading files through `source`.
    pub fn new(source: Arc<dyn MetadataSource>) -> Self {
        Self { source }
    }

    /// Resolve the track at position `index` of the job.
    ///
    /// Resolution is idempotent: the same file, overrides, and layout always
    /// give identical fields.
    ///
    /// # Errors
    ///
    /// - [`ConversionError::Input`] if the path is not an existing regular file.
    /// - [`ConversionError::Metadata`] if the file cannot be read, has no
    ///   decodable audio stream, or declares no duration.
    pub fn resolve(
        &self,
        index: usize,
        input: &TrackInput,
        layout: &LayoutConfig,
    ) -> Result<Track, ConversionError> {
        let path = &input.path;
        if !path.is_file() {
            return Err(ConversionError::Input {
                stage: Stage::ResolvingMetadata,
                track_index: Some(index),
                path: path.clone(),
                reason: "file does not exist or is not a regular file".to_string(),
            });
        }

        let info = self
            .source
            .read(path)
            .map_err(|error| ConversionError::Metadata {
                stage: Stage::ResolvingMetadata,
                track_index: Some(index),
                path: path.clone(),
                reason: error.to_string(),
            })?;

        if info.duration.is_zero() {
            return Err(ConversionError::Metadata {
                stage: Stage::ResolvingMetadata,
                track_index: Some(index),
                path: path.clone(),
                reason: "audio stream has zero duration".to_string(),
            });
        }

        let overrides = &input.overrides;

        let title = non_blank(overrides.title.as_deref())
            .or_else(|| info.tag("title"))
            .map(str::to_string)
            .unwrap_or_else(|| title_from_file_name(path));

        let artist = non_blank(overrides.artist.as_deref())
            .or_else(|| non_blank(layout.artist_override.as_deref()))
            .or_else(|| info.tag("artist"))
            .or_else(|| info.tag("album_artist"))
            .unwrap_or(UNKNOWN_ARTIST)
            .to_string();

        let album = non_blank(overrides.album.as_deref())
            .or_else(|| non_blank(layout.album_override.as_deref()))
            .or_else(|| info.tag("album"))
            .unwrap_or(UNKNOWN_ALBUM)
            .to_string();

        let track_number = overrides
            .track_number
            .or_else(|| info.tag("track").and_then(parse_track_tag))
            .or_else(|| info.tag("tracknumber").and_then(parse_track_tag))
            .or_else(|| file_stem(path).and_then(|stem| numeric_prefix(&stem).map(|(n, _)| n)))
            .unwrap_or_else(|| u32::try_from(index + 1).unwrap_or(u32::MAX));

        log::debug!(
            "Resolved track {}: {:?} by {:?} on {:?} (#{track_number}, {:?})",
            index + 1,
            title,
            artist,
            album,
            info.duration,
        );

        Ok(Track {
            index,
            source_path: path.clone(),
            duration: info.duration,
            sample_format: info.sample_format,
            title,
            artist,
            album,
            track_number,
        })
    }
}

/// Check that every track can be concatenated losslessly with the first.
///
/// # Errors
///
/// [`ConversionError::Input`] naming the first track whose codec, sample
/// rate, channel count, or bit depth differs from track 1.
pub fn ensure_uniform_format(tracks: &[Track]) -> Result<(), ConversionError> {
    let Some(first) = tracks.first() else {
        return Ok(());
    };

    match tracks
        .iter()
        .find(|track| track.sample_format != first.sample_format)
    {
        Some(track) => Err(ConversionError::Input {
            stage: Stage::ResolvingMetadata,
            track_index: Some(track.index),
            path: track.source_path.clone(),
            reason: format!(
                "stream format {} differs from track 1 ({}); \
                 lossless concatenation needs identical formats",
                track.sample_format.describe(),
                first.sample_format.describe(),
            ),
        }),
        None => Ok(()),
    }
}

/// Derive a readable title from a file name: the stem with a leading track
/// number and its separator removed and underscores turned into spaces.
///
/// ```
/// use std::path::Path;
///
/// use chaptermux::title_from_file_name;
///
/// assert_eq!(title_from_file_name(Path::new("01 - So What.flac")), "So What");
/// assert_eq!(
///     title_from_file_name(Path::new("1-03 Freddie_Freeloader.flac")),
///     "Freddie Freeloader"
/// );
/// assert_eq!(title_from_file_name(Path::new("2112.flac")), "2112");
/// ```
pub fn title_from_file_name(path: &Path) -> String {
    let Some(stem) = file_stem(path) else {
        return String::new();
    };

    match numeric_prefix(&stem) {
        Some((_, rest)) => rest.to_string(),
        None => stem.trim().to_string(),
    }
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().replace('_', " "))
}

/// Split `"01 - Title"`, `"01. Title"`, `"1-01 Title"` into the track number
/// and the remaining title. `None` when there is no such prefix or nothing
/// would remain.
fn numeric_prefix(stem: &str) -> Option<(u32, &str)> {
    let stem = stem.trim_start();
    let digits_end = stem.find(|c: char| !c.is_ascii_digit())?;
    if digits_end == 0 {
        return None;
    }

    let mut number = &stem[..digits_end];
    let mut rest = &stem[digits_end..];

    // Disc-track form: "1-01 Title".
    if let Some(after_dash) = rest.strip_prefix('-') {
        let track_end = after_dash
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(after_dash.len());
        if track_end > 0 {
            number = &after_dash[..track_end];
            rest = &after_dash[track_end..];
        }
    }

    let title = rest.trim_start_matches([' ', '.', '-', '_']);
    if title.len() == rest.len() {
        return None;
    }

    let title = title.trim();
    if title.is_empty() {
        return None;
    }

    Some((number.parse().ok()?, title))
}

/// Parse `"3"` or `"3/12"`.
fn parse_track_tag(value: &str) -> Option<u32> {
    value
        .split('/')
        .next()
        .and_then(|number| number.trim().parse().ok())
        .filter(|&number| number > 0)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
