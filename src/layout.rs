//! Visual composition rules for the still frames.
//!
//! A [`LayoutConfig`] describes the background, the border around the cover
//! panel, the text colour and glow, and which text lines appear. A job holds
//! its layout behind an `Arc` and never mutates it.
//!
//! Layouts can be written as TOML:
//!
//! ```toml
//! text_color = "#f0f0f0"
//! border = "white"
//! show_album = false
//! artist_override = "Various Artists"
//!
//! [background]
//! kind = "gradient"
//! from = "#101020"
//! to = "#000000"
//!
//! [glow]
//! kind = "black"
//! intensity = 0.6
//! ```

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs,
    io::Error as IoError,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A failure to load or validate a [`LayoutConfig`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LayoutError {
    /// The layout file could not be read.
    #[error("Failed to read layout file {path}: {source}")]
    Io {
        /// The layout file.
        path: PathBuf,
        /// Underlying I/O error.
        source: IoError,
    },

    /// The layout file is not valid TOML for a layout.
    #[error("Invalid layout: {0}")]
    Parse(#[from] toml::de::Error),

    /// A colour string is not of the form `#rrggbb`.
    #[error("Invalid colour {0:?}, expected #rrggbb")]
    InvalidColor(String),

    /// A glow intensity is outside `0.0..=1.0`.
    #[error("Glow intensity {0} is outside 0.0..=1.0")]
    InvalidGlow(f32),
}

/// An opaque 8-bit RGB colour, written `#rrggbb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb(pub [u8; 3]);

impl Rgb {
    /// Pure white.
    pub const WHITE: Rgb = Rgb([255, 255, 255]);
    /// Pure black.
    pub const BLACK: Rgb = Rgb([0, 0, 0]);

    /// Hex form without the leading `#`, as the engine's colour syntax
    /// expects (`0xrrggbb`).
    pub fn hex(self) -> String {
        let [r, g, b] = self.0;
        format!("{r:02x}{g:02x}{b:02x}")
    }
}

impl FromStr for Rgb {
    type Err = LayoutError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || LayoutError::InvalidColor(value.to_string());
        let digits = value.trim().strip_prefix('#').ok_or_else(invalid)?;
        if digits.len() != 6 || !digits.is_ascii() {
            return Err(invalid());
        }

        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&digits[range], 16).map_err(|_| invalid())
        };
        Ok(Rgb([channel(0..2)?, channel(2..4)?, channel(4..6)?]))
    }
}

impl TryFrom<String> for Rgb {
    type Error = LayoutError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Rgb> for String {
    fn from(color: Rgb) -> Self {
        color.to_string()
    }
}

impl Display for Rgb {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "#{}", self.hex())
    }
}

/// What fills the frame behind the cover and the text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Background {
    /// A single colour.
    Solid {
        /// Fill colour.
        color: Rgb,
    },
    /// A vertical linear gradient, `from` at the top and `to` at the bottom.
    Gradient {
        /// Top colour.
        from: Rgb,
        /// Bottom colour.
        to: Rgb,
    },
    /// An image scaled to cover the whole frame, centre-cropped.
    Image {
        /// Image file.
        path: PathBuf,
    },
}

impl Default for Background {
    fn default() -> Self {
        Background::Solid { color: Rgb::BLACK }
    }
}

/// Frame drawn around the cover panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BorderStyle {
    /// No border.
    #[default]
    None,
    /// A white frame.
    White,
    /// A black frame.
    Black,
}

impl BorderStyle {
    /// Border colour, `None` when no border is drawn.
    pub fn color(self) -> Option<Rgb> {
        match self {
            BorderStyle::None => None,
            BorderStyle::White => Some(Rgb::WHITE),
            BorderStyle::Black => Some(Rgb::BLACK),
        }
    }
}

/// Halo drawn around the text glyphs.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Glow {
    /// No glow.
    #[default]
    None,
    /// A white halo with opacity `intensity` (0.0 – 1.0).
    White {
        /// Halo opacity.
        intensity: f32,
    },
    /// A black halo with opacity `intensity` (0.0 – 1.0).
    Black {
        /// Halo opacity.
        intensity: f32,
    },
}

impl Glow {
    /// Halo colour and opacity, `None` when no glow is drawn.
    pub fn color_and_intensity(self) -> Option<(Rgb, f32)> {
        match self {
            Glow::None => None,
            Glow::White { intensity } => Some((Rgb::WHITE, intensity)),
            Glow::Black { intensity } => Some((Rgb::BLACK, intensity)),
        }
    }
}

/// Visual composition rules for every frame of a job.
///
/// # Example
///
/// ```
/// use chaptermux::{Background, BorderStyle, LayoutConfig, Rgb};
///
/// let layout = LayoutConfig::default()
///     .with_background(Background::Solid { color: Rgb([16, 16, 32]) })
///     .with_border(BorderStyle::White)
///     .with_show_album(false);
/// assert!(layout.show_artist);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LayoutConfig {
    /// Frame background.
    pub background: Background,
    /// Border around the cover panel.
    pub border: BorderStyle,
    /// Text colour.
    pub text_color: Rgb,
    /// Text glow.
    pub glow: Glow,
    /// Whether the artist line appears on frames and in chapter titles.
    pub show_artist: bool,
    /// Whether the album line appears on frames and in chapter titles.
    pub show_album: bool,
    /// Artist for every track that has no per-track override.
    pub artist_override: Option<String>,
    /// Album for every track that has no per-track override.
    pub album_override: Option<String>,
    /// Font file for the text renderer. The renderer's default font when unset.
    pub font: Option<PathBuf>,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            background: Background::default(),
            border: BorderStyle::default(),
            text_color: Rgb::WHITE,
            glow: Glow::default(),
            show_artist: true,
            show_album: true,
            artist_override: None,
            album_override: None,
            font: None,
        }
    }
}

impl LayoutConfig {
    /// Parse and validate a layout from TOML text. Missing keys take their
    /// default values.
    pub fn from_toml_str(text: &str) -> Result<Self, LayoutError> {
        let layout: LayoutConfig = toml::from_str(text)?;
        layout.validate()?;
        Ok(layout)
    }

    /// Read, parse, and validate a layout file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LayoutError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| LayoutError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("Loaded layout from {}", path.display());
        Self::from_toml_str(&text)
    }

    /// Check value ranges that the type system does not enforce.
    pub fn validate(&self) -> Result<(), LayoutError> {
        if let Some((_, intensity)) = self.glow.color_and_intensity()
            && !(0.0..=1.0).contains(&intensity)
        {
            return Err(LayoutError::InvalidGlow(intensity));
        }
        Ok(())
    }

    /// Set the background.
    #[must_use]
    pub fn with_background(mut self, background: Background) -> Self {
        self.background = background;
        self
    }

    /// Set the border style.
    #[must_use]
    pub fn with_border(mut self, border: BorderStyle) -> Self {
        self.border = border;
        self
    }

    /// Set the text colour.
    #[must_use]
    pub fn with_text_color(mut self, color: Rgb) -> Self {
        self.text_color = color;
        self
    }

    /// Set the text glow.
    #[must_use]
    pub fn with_glow(mut self, glow: Glow) -> Self {
        self.glow = glow;
        self
    }

    /// Show or hide the artist line.
    #[must_use]
    pub fn with_show_artist(mut self, show: bool) -> Self {
        self.show_artist = show;
        self
    }

    /// Show or hide the album line.
    #[must_use]
    pub fn with_show_album(mut self, show: bool) -> Self {
        self.show_album = show;
        self
    }

    /// Use `artist` for every track without a per-track override.
    #[must_use]
    pub fn with_artist_override(mut self, artist: impl Into<String>) -> Self {
        self.artist_override = Some(artist.into());
        self
    }

    /// Use `album` for every track without a per-track override.
    #[must_use]
    pub fn with_album_override(mut self, album: impl Into<String>) -> Self {
        self.album_override = Some(album.into());
        self
    }

    /// Render text with the given font file.
    #[must_use]
    pub fn with_font(mut self, font: impl Into<PathBuf>) -> Self {
        self.font = Some(font.into());
        self
    }
}
