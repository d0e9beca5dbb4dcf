//! Chapter planning.
//!
//! The chapter table is a pure fold over the resolved tracks: each chapter
//! starts where the previous one ended, so the table is contiguous by
//! construction and computed before any side-effecting work begins.

use std::{fmt::Write as _, time::Duration};

use crate::{
    conversion::{duration_to_millis, format_timecode},
    layout::LayoutConfig,
    resolver::Track,
};

/// One chapter of the output, spanning exactly one track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterEntry {
    /// Index of the track this chapter covers.
    pub index: usize,
    /// Chapter start, the sum of all previous track durations.
    pub start: Duration,
    /// Chapter end, `start` plus this track's duration.
    pub end: Duration,
    /// Chapter title.
    pub title: String,
}

impl ChapterEntry {
    /// Start in seconds.
    pub fn start_seconds(&self) -> f64 {
        self.start.as_secs_f64()
    }

    /// End in seconds.
    pub fn end_seconds(&self) -> f64 {
        self.end.as_secs_f64()
    }

    /// Chapter length.
    pub fn span(&self) -> Duration {
        self.end - self.start
    }
}

/// The ordered, contiguous chapter table of a job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChapterPlan {
    entries: Vec<ChapterEntry>,
}

impl ChapterPlan {
    /// Compute the chapter table from tracks in job order.
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use chaptermux::{ChapterPlan, LayoutConfig};
    /// # use chaptermux::{SampleFormat, Track};
    /// # let track = |index: usize, millis: u64| Track {
    /// #     index,
    /// #     source_path: format!("{index}.flac").into(),
    /// #     duration: Duration::from_millis(millis),
    /// #     sample_format: SampleFormat {
    /// #         codec: "flac".into(),
    /// #         sample_rate: 44_100,
    /// #         channels: 2,
    /// #         bits_per_sample: 16,
    /// #     },
    /// #     title: format!("Track {}", index + 1),
    /// #     artist: "Artist".into(),
    /// #     album: "Album".into(),
    /// #     track_number: index as u32 + 1,
    /// # };
    ///
    /// let tracks = [track(0, 180_000), track(1, 210_500)];
    /// let plan = ChapterPlan::from_tracks(&tracks, &LayoutConfig::default());
    /// assert_eq!(plan.entries()[1].start, Duration::from_millis(180_000));
    /// assert_eq!(plan.total(), Duration::from_millis(390_500));
    /// ```
    pub fn from_tracks(tracks: &[Track], layout: &LayoutConfig) -> Self {
        let entries = tracks
            .iter()
            .scan(Duration::ZERO, |cursor, track| {
                let start = *cursor;
                *cursor += track.duration;
                Some(ChapterEntry {
                    index: track.index,
                    start,
                    end: *cursor,
                    title: chapter_title(track, layout),
                })
            })
            .collect();

        Self { entries }
    }

    /// The chapters in order.
    pub fn entries(&self) -> &[ChapterEntry] {
        &self.entries
    }

    /// Number of chapters.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the plan has no chapters.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all chapter spans, the expected output duration.
    pub fn total(&self) -> Duration {
        self.entries.last().map(|entry| entry.end).unwrap_or_default()
    }

    /// Whether chapters start at zero, are ordered, and each ends exactly
    /// where the next begins.
    pub fn is_contiguous(&self) -> bool {
        let starts_at_zero = self
            .entries
            .first()
            .is_none_or(|entry| entry.start.is_zero());

        starts_at_zero
            && self.entries.iter().all(|entry| entry.start < entry.end)
            && self
                .entries
                .windows(2)
                .all(|pair| pair[0].end == pair[1].start)
    }

    /// Serialise as an FFMETADATA document with millisecond timestamps.
    ///
    /// Boundaries are rounded from the exact cumulative durations, so each
    /// chapter's `END` still equals the next chapter's `START`.
    pub fn to_ffmetadata(&self) -> String {
        let mut document = String::from(";FFMETADATA1\n");
        for entry in &self.entries {
            // Writing to a String cannot fail.
            let _ = write!(
                document,
                "\n[CHAPTER]\nTIMEBASE=1/1000\nSTART={}\nEND={}\ntitle={}\n",
                duration_to_millis(entry.start),
                duration_to_millis(entry.end),
                escape_ffmetadata(&entry.title),
            );
        }
        document
    }

    /// A human-readable listing, one chapter per line.
    pub fn describe(&self) -> String {
        self.entries
            .iter()
            .map(|entry| {
                format!(
                    "{} - {}  {}",
                    format_timecode(entry.start),
                    format_timecode(entry.end),
                    entry.title
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Title of a track's chapter: `"NN. Title"`, followed by `" - Artist"` and
/// `" - Album"` when the layout shows them.
pub fn chapter_title(track: &Track, layout: &LayoutConfig) -> String {
    let mut title = format!("{:02}. {}", track.track_number, track.title);
    if layout.show_artist {
        title.push_str(" - ");
        title.push_str(&track.artist);
    }
    if layout.show_album {
        title.push_str(" - ");
        title.push_str(&track.album);
    }
    title
}

fn escape_ffmetadata(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '=' | ';' | '#' | '\\' | '\n') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::metadata::SampleFormat;

    fn track(index: usize, millis: u64) -> Track {
        Track {
            index,
            source_path: PathBuf::from(format!("{index}.flac")),
            duration: Duration::from_millis(millis),
            sample_format: SampleFormat {
                codec: "flac".to_string(),
                sample_rate: 44_100,
                channels: 2,
                bits_per_sample: 16,
            },
            title: format!("Song {}", index + 1),
            artist: "Artist".to_string(),
            album: "Album".to_string(),
            track_number: u32::try_from(index).unwrap() + 1,
        }
    }

    #[test]
    fn cumulative_boundaries() {
        let tracks = [track(0, 180_000), track(1, 210_500), track(2, 95_250)];
        let plan = ChapterPlan::from_tracks(&tracks, &LayoutConfig::default());

        let spans: Vec<(f64, f64)> = plan
            .entries()
            .iter()
            .map(|entry| (entry.start_seconds(), entry.end_seconds()))
            .collect();
        assert_eq!(spans, vec![(0.0, 180.0), (180.0, 390.5), (390.5, 485.75)]);
        assert_eq!(plan.total(), Duration::from_millis(485_750));
        assert!(plan.is_contiguous());

        let sum: Duration = plan.entries().iter().map(ChapterEntry::span).sum();
        assert_eq!(sum, plan.total());
    }

    #[test]
    fn titles_follow_visibility_flags() {
        let track = track(2, 1_000);
        let both = LayoutConfig::default();
        let neither = LayoutConfig::default()
            .with_show_artist(false)
            .with_show_album(false);
        let album_only = neither.clone().with_show_album(true);

        assert_eq!(chapter_title(&track, &both), "03. Song 3 - Artist - Album");
        assert_eq!(chapter_title(&track, &neither), "03. Song 3");
        assert_eq!(chapter_title(&track, &album_only), "03. Song 3 - Album");
    }

    #[test]
    fn ffmetadata_document() {
        let mut first = track(0, 1_500);
        first.title = "A=B; #1 \\ end".to_string();
        let tracks = [first, track(1, 2_000)];
        let layout = LayoutConfig::default()
            .with_show_artist(false)
            .with_show_album(false);
        let document = ChapterPlan::from_tracks(&tracks, &layout).to_ffmetadata();

        let expected = ";FFMETADATA1\n\
            \n[CHAPTER]\nTIMEBASE=1/1000\nSTART=0\nEND=1500\ntitle=01. A\\=B\\; \\#1 \\\\ end\n\
            \n[CHAPTER]\nTIMEBASE=1/1000\nSTART=1500\nEND=3500\ntitle=02. Song 2\n";
        assert_eq!(document, expected);
    }

    #[test]
    fn rounded_boundaries_stay_contiguous() {
        // 1.0004 s + 1.0004 s: rounding each span separately would drift.
        let tracks = [
            Track {
                duration: Duration::from_micros(1_000_400),
                ..track(0, 0)
            },
            Track {
                duration: Duration::from_micros(1_000_400),
                ..track(1, 0)
            },
        ];
        let document = ChapterPlan::from_tracks(&tracks, &LayoutConfig::default()).to_ffmetadata();
        assert!(document.contains("START=0\nEND=1000\n"));
        assert!(document.contains("START=1000\nEND=2001\n"));
    }

    #[test]
    fn empty_plan() {
        let plan = ChapterPlan::from_tracks(&[], &LayoutConfig::default());
        assert!(plan.is_empty());
        assert!(plan.is_contiguous());
        assert_eq!(plan.total(), Duration::ZERO);
    }
}
