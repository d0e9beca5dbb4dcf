//! Output verification.
//!
//! [`verify_output`] compares the probed structure of an assembled container
//! with what the job planned: total duration, chapter table, and stream
//! parameters. The orchestrator only moves the output into place when the
//! report holds no errors.
//!
//! # Example
//!
//! ```no_run
//! use chaptermux::{ChapterPlan, EncodeSettings, LayoutConfig, MediaProbe, verify_output};
//!
//! # let tracks = Vec::new();
//! let plan = ChapterPlan::from_tracks(&tracks, &LayoutConfig::default());
//! # let expected_audio = chaptermux::SampleFormat {
//! #     codec: "flac".into(),
//! #     sample_rate: 44_100,
//! #     channels: 2,
//! #     bits_per_sample: 16,
//! # };
//! let info = MediaProbe::container("album.mkv")?;
//! let report = verify_output(&plan, &expected_audio, &EncodeSettings::default(), &info);
//! if !report.is_valid() {
//!     print!("{report}");
//! }
//! # Ok::<(), chaptermux::ProbeError>(())
//! ```

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    time::Duration,
};

use crate::{
    chapters::ChapterPlan,
    config::EncodeSettings,
    conversion::{format_seconds, format_timecode, within_tolerance},
    metadata::{ContainerInfo, SampleFormat},
};

/// Largest accepted difference between a planned and a stored chapter
/// boundary. The chapter table is written in milliseconds.
const BOUNDARY_TOLERANCE: Duration = Duration::from_millis(1);

/// Summary of output verification.
///
/// Contains lists of informational notices, warnings, and errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Informational notices (not problems).
    pub info: Vec<String>,
    /// Non-fatal issues.
    pub warnings: Vec<String>,
    /// Mismatches that make the output unacceptable.
    pub errors: Vec<String>,
}

impl ValidationReport {
    /// Returns `true` if no errors were found.
    ///
    /// Warnings do not affect this result.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Total number of issues (info + warnings + errors).
    pub fn issue_count(&self) -> usize {
        self.info.len() + self.warnings.len() + self.errors.len()
    }
}

impl Display for ValidationReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        for item in &self.info {
            writeln!(f, "[INFO] {item}")?;
        }
        for item in &self.warnings {
            writeln!(f, "[WARN] {item}")?;
        }
        for item in &self.errors {
            writeln!(f, "[ERROR] {item}")?;
        }
        if self.issue_count() == 0 {
            writeln!(f, "No issues found.")?;
        }
        Ok(())
    }
}

/// Check an assembled container against the chapter plan and the source
/// stream parameters.
pub fn verify_output(
    plan: &ChapterPlan,
    expected_audio: &SampleFormat,
    settings: &EncodeSettings,
    info: &ContainerInfo,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    // ── Duration ───────────────────────────────────────────────────
    let tolerance = settings.frame_period();
    if within_tolerance(info.duration, plan.total(), tolerance) {
        report.info.push(format!(
            "Duration {} matches the chapter total",
            format_timecode(info.duration)
        ));
    } else {
        report.errors.push(format!(
            "Output lasts {}s but the chapters add up to {}s (tolerance {}s)",
            format_seconds(info.duration),
            format_seconds(plan.total()),
            format_seconds(tolerance),
        ));
    }

    // ── Chapters ───────────────────────────────────────────────────
    if info.chapters.len() != plan.len() {
        report.errors.push(format!(
            "Output has {} chapters, expected {}",
            info.chapters.len(),
            plan.len(),
        ));
    } else {
        for (number, (stored, planned)) in info.chapters.iter().zip(plan.entries()).enumerate() {
            let number = number + 1;
            if !within_tolerance(stored.start, planned.start, BOUNDARY_TOLERANCE)
                || !within_tolerance(stored.end, planned.end, BOUNDARY_TOLERANCE)
            {
                report.errors.push(format!(
                    "Chapter {number} spans {}–{}, expected {}–{}",
                    format_timecode(stored.start),
                    format_timecode(stored.end),
                    format_timecode(planned.start),
                    format_timecode(planned.end),
                ));
            }
            if stored.title.as_deref() != Some(planned.title.as_str()) {
                report.errors.push(format!(
                    "Chapter {number} is titled {:?}, expected {:?}",
                    stored.title.as_deref().unwrap_or(""),
                    planned.title,
                ));
            }
        }
        report.info.push(format!("{} chapters match the plan", plan.len()));
    }

    // ── Audio ──────────────────────────────────────────────────────
    match &info.audio {
        Some(audio) => {
            let bits_match = audio.bits_per_sample == 0
                || expected_audio.bits_per_sample == 0
                || audio.bits_per_sample == expected_audio.bits_per_sample;
            if audio.codec == expected_audio.codec
                && audio.sample_rate == expected_audio.sample_rate
                && audio.channels == expected_audio.channels
                && bits_match
            {
                report.info.push(format!("Audio: {}", audio.describe()));
            } else {
                report.errors.push(format!(
                    "Audio is {}, sources are {}",
                    audio.describe(),
                    expected_audio.describe(),
                ));
            }
        }
        None => report.errors.push("Output has no audio stream".to_string()),
    }

    // ── Video ──────────────────────────────────────────────────────
    match &info.video {
        Some(video) => {
            if (video.width, video.height) != (settings.width, settings.height) {
                report.errors.push(format!(
                    "Video is {}×{}, expected {}×{}",
                    video.width, video.height, settings.width, settings.height,
                ));
            }
            if video.codec != EncodeSettings::CODEC_NAME {
                report.warnings.push(format!(
                    "Video codec is {}, expected {}",
                    video.codec,
                    EncodeSettings::CODEC_NAME,
                ));
            }
            report.info.push(format!(
                "Video: {} {}×{}",
                video.codec, video.width, video.height
            ));
        }
        None => report.errors.push("Output has no video stream".to_string()),
    }

    report
}
