//! Still-frame composition.
//!
//! A frame is 1920×1080: the cover in a square panel on the left half, the
//! track text block on the right half. Composition happens in two steps:
//!
//! 1. [`compose_base`] rasterises the background, cover panel, and border
//!    in-process. The base is the same for every track of a job.
//! 2. A [`FrameRenderer`] draws the track's [`TextLine`]s onto the base.
//!    Which lines appear, at which size and position, and how long strings
//!    are shortened is decided here by [`layout_text`], never by the renderer.
//!
//! Both steps are pure functions of their inputs, so composing the same track
//! twice yields identical frames.

use std::{fs, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use image::{DynamicImage, Rgb as Pixel, RgbImage, imageops::FilterType};

use crate::{
    error::{ConversionError, EngineError},
    layout::{Background, Glow, LayoutConfig, Rgb},
    progress::{CancellationToken, Stage},
    resolver::Track,
    workspace::JobWorkspace,
};

/// Frame width in pixels.
pub const FRAME_WIDTH: u32 = 1920;
/// Frame height in pixels.
pub const FRAME_HEIGHT: u32 = 1080;
/// Edge length of the square cover panel.
pub const COVER_SIZE: u32 = 860;
/// Left edge of the cover panel.
pub const COVER_X: u32 = 50;
/// Top edge of the cover panel.
pub const COVER_Y: u32 = 110;
/// Distance text keeps from the edges of its half of the frame.
pub const SAFE_MARGIN: u32 = 50;
/// Width of the border around the cover panel.
pub const BORDER_WIDTH: u32 = 8;

const TEXT_X: u32 = FRAME_WIDTH / 2 + SAFE_MARGIN;
const TEXT_WIDTH: u32 = FRAME_WIDTH / 2 - 2 * SAFE_MARGIN;
const BLOCK_GAP: u32 = 24;
const ELLIPSIS: char = '…';

/// Character advance as a percentage of the font size.
const ADVANCE_PERCENT: u32 = 55;

/// Largest, smallest, and step font size of one kind of text.
#[derive(Debug, Clone, Copy)]
struct SizeRange {
    largest: u32,
    smallest: u32,
    step: u32,
}

impl SizeRange {
    fn sizes(self) -> impl Iterator<Item = u32> {
        (self.smallest..=self.largest)
            .rev()
            .step_by(self.step as usize)
    }
}

const TITLE_SIZES: SizeRange = SizeRange {
    largest: 72,
    smallest: 40,
    step: 4,
};
const ARTIST_SIZES: SizeRange = SizeRange {
    largest: 48,
    smallest: 32,
    step: 4,
};
const ALBUM_SIZES: SizeRange = SizeRange {
    largest: 36,
    smallest: 28,
    step: 4,
};
const MAX_TITLE_LINES: usize = 2;

/// The text shown on one track's frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameText {
    /// `"NN. Title"`.
    pub heading: String,
    /// Artist line, present only when the layout shows it.
    pub artist: Option<String>,
    /// Album line, present only when the layout shows it.
    pub album: Option<String>,
}

impl FrameText {
    /// Select the text of `track` according to the layout's visibility flags.
    /// A hidden line stays hidden even when an override supplies its value.
    pub fn resolve(track: &Track, layout: &LayoutConfig) -> Self {
        Self {
            heading: format!("{:02}. {}", track.track_number, track.title),
            artist: layout.show_artist.then(|| track.artist.clone()),
            album: layout.show_album.then(|| track.album.clone()),
        }
    }
}

/// One line of text placed on the frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextLine {
    /// The characters to draw.
    pub text: String,
    /// Font size in pixels.
    pub font_size: u32,
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
}

/// Lay out the text block inside the right half of the frame.
///
/// The title wraps on word boundaries into at most two lines and shrinks from
/// 72 px down to 40 px until it fits; artist (48 → 32 px) and album
/// (36 → 28 px) are single lines. Whatever still does not fit at the smallest
/// size is cut and ends with `…`. The block is centred vertically.
pub fn layout_text(text: &FrameText) -> Vec<TextLine> {
    let mut blocks: Vec<(Vec<String>, u32)> = vec![fit_title(&text.heading)];
    if let Some(artist) = &text.artist {
        blocks.push(fit_single_line(artist, ARTIST_SIZES));
    }
    if let Some(album) = &text.album {
        blocks.push(fit_single_line(album, ALBUM_SIZES));
    }

    let block_height: u32 = blocks
        .iter()
        .map(|(lines, size)| lines.len() as u32 * line_height(*size))
        .sum::<u32>()
        + BLOCK_GAP * (blocks.len() as u32).saturating_sub(1);

    let mut y = (FRAME_HEIGHT.saturating_sub(block_height) / 2).max(SAFE_MARGIN);
    let mut placed = Vec::new();
    for (lines, size) in blocks {
        for line in lines {
            placed.push(TextLine {
                text: line,
                font_size: size,
                x: TEXT_X,
                y,
            });
            y += line_height(size);
        }
        y += BLOCK_GAP;
    }
    placed
}

fn line_height(font_size: u32) -> u32 {
    font_size * 5 / 4
}

/// Characters that fit in the text column at `font_size`.
fn max_chars(font_size: u32) -> usize {
    (TEXT_WIDTH * 100 / (ADVANCE_PERCENT * font_size)) as usize
}

fn fit_title(title: &str) -> (Vec<String>, u32) {
    for size in TITLE_SIZES.sizes() {
        let limit = max_chars(size);
        let lines = wrap_words(title, limit);
        if lines.len() <= MAX_TITLE_LINES && lines.iter().all(|line| char_count(line) <= limit) {
            return (lines, size);
        }
    }

    let size = TITLE_SIZES.smallest;
    let limit = max_chars(size);
    let mut lines = wrap_words(title, limit);
    let overflow = lines.len() > MAX_TITLE_LINES;
    lines.truncate(MAX_TITLE_LINES);

    let last = lines.len().saturating_sub(1);
    let lines = lines
        .into_iter()
        .enumerate()
        .map(|(index, line)| {
            if index == last && overflow {
                ellipsize(&format!("{line}{ELLIPSIS}"), limit)
            } else {
                ellipsize(&line, limit)
            }
        })
        .collect();
    (lines, size)
}

fn fit_single_line(text: &str, sizes: SizeRange) -> (Vec<String>, u32) {
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    for size in sizes.sizes() {
        if char_count(&text) <= max_chars(size) {
            return (vec![text], size);
        }
    }
    let size = sizes.smallest;
    (vec![ellipsize(&text, max_chars(size))], size)
}

/// Greedy word wrap. A word longer than `limit` occupies its own line.
fn wrap_words(text: &str, limit: usize) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
        } else if char_count(&current) + 1 + char_count(word) <= limit {
            current.push(' ');
            current.push_str(word);
        } else {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Cut `text` to at most `limit` characters, ending in `…` when cut.
fn ellipsize(text: &str, limit: usize) -> String {
    if char_count(text) <= limit {
        return text.to_string();
    }
    let kept: String = text.chars().take(limit.saturating_sub(1)).collect();
    format!("{}{ELLIPSIS}", kept.trim_end())
}

fn char_count(text: &str) -> usize {
    text.chars().count()
}

/// Rasterise the background, the cover panel, and its border.
///
/// The cover is scaled to fill the square panel and centre-cropped, so it is
/// never distorted. An image background is treated the same way for the
/// whole frame.
///
/// # Errors
///
/// [`ConversionError::Input`] if an image background cannot be read.
pub fn compose_base(
    cover: &DynamicImage,
    layout: &LayoutConfig,
) -> Result<RgbImage, ConversionError> {
    let mut base = match &layout.background {
        Background::Solid { color } => {
            RgbImage::from_pixel(FRAME_WIDTH, FRAME_HEIGHT, pixel(*color))
        }
        Background::Gradient { from, to } => vertical_gradient(*from, *to),
        Background::Image { path } => {
            let image = image::open(path).map_err(|error| ConversionError::Input {
                stage: Stage::ComposingFrames,
                track_index: None,
                path: path.clone(),
                reason: format!("unreadable background image: {error}"),
            })?;
            image
                .resize_to_fill(FRAME_WIDTH, FRAME_HEIGHT, FilterType::Lanczos3)
                .to_rgb8()
        }
    };

    if let Some(color) = layout.border.color() {
        draw_border(&mut base, pixel(color));
    }

    let panel = cover
        .resize_to_fill(COVER_SIZE, COVER_SIZE, FilterType::Lanczos3)
        .to_rgb8();
    image::imageops::replace(&mut base, &panel, i64::from(COVER_X), i64::from(COVER_Y));

    Ok(base)
}

fn pixel(color: Rgb) -> Pixel<u8> {
    Pixel(color.0)
}

fn vertical_gradient(from: Rgb, to: Rgb) -> RgbImage {
    let last_row = FRAME_HEIGHT - 1;
    RgbImage::from_fn(FRAME_WIDTH, FRAME_HEIGHT, |_, y| {
        let mix = |a: u8, b: u8| {
            let weighted = u32::from(a) * (last_row - y) + u32::from(b) * y;
            ((weighted + last_row / 2) / last_row) as u8
        };
        Pixel([
            mix(from.0[0], to.0[0]),
            mix(from.0[1], to.0[1]),
            mix(from.0[2], to.0[2]),
        ])
    })
}

/// Fill the frame around the panel; the panel itself is drawn over it later.
fn draw_border(base: &mut RgbImage, color: Pixel<u8>) {
    let left = COVER_X - BORDER_WIDTH;
    let top = COVER_Y - BORDER_WIDTH;
    let right = COVER_X + COVER_SIZE + BORDER_WIDTH;
    let bottom = COVER_Y + COVER_SIZE + BORDER_WIDTH;
    for y in top..bottom {
        for x in left..right {
            base.put_pixel(x, y, color);
        }
    }
}

/// Everything a renderer needs to draw one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRequest {
    /// The base raster.
    pub base: PathBuf,
    /// Lines to draw, in order.
    pub lines: Vec<TextLine>,
    /// One file per line holding exactly that line's text.
    pub text_files: Vec<PathBuf>,
    /// Text colour.
    pub color: Rgb,
    /// Halo around the glyphs.
    pub glow: Glow,
    /// Font file, the renderer's default when `None`.
    pub font: Option<PathBuf>,
    /// Where to write the finished frame.
    pub output: PathBuf,
}

/// Draws text onto a base raster.
#[async_trait]
pub trait FrameRenderer: Send + Sync {
    /// Render `request.lines` onto `request.base` and write the result to
    /// `request.output`, at the base's resolution.
    async fn render(
        &self,
        request: &FrameRequest,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError>;
}

/// Produces a finished, validated still frame per track.
pub struct FrameComposer {
    renderer: Arc<dyn FrameRenderer>,
    layout: Arc<LayoutConfig>,
}

impl FrameComposer {
    /// A composer drawing text with `renderer`.
    pub fn new(renderer: Arc<dyn FrameRenderer>, layout: Arc<LayoutConfig>) -> Self {
        Self { renderer, layout }
    }

    /// Rasterise the shared base frame and store it in the workspace.
    pub fn prepare_base(
        &self,
        cover: &DynamicImage,
        workspace: &JobWorkspace,
    ) -> Result<PathBuf, ConversionError> {
        let base = compose_base(cover, &self.layout)?;
        let path = workspace.base_frame();
        base.save(&path).map_err(|error| ConversionError::Encoding {
            stage: Stage::ComposingFrames,
            track_index: None,
            reason: format!("failed to write base frame: {error}"),
        })?;
        Ok(path)
    }

    /// Compose the frame of `track` and check that it is a readable image of
    /// exactly 1920×1080.
    pub async fn compose(
        &self,
        track: &Track,
        base: PathBuf,
        workspace: &JobWorkspace,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, ConversionError> {
        let stage = Stage::ComposingFrames;
        let lines = layout_text(&FrameText::resolve(track, &self.layout));

        let mut text_files = Vec::with_capacity(lines.len());
        for (number, line) in lines.iter().enumerate() {
            let path = workspace.text_file(track.index, number);
            fs::write(&path, &line.text).map_err(|error| ConversionError::Encoding {
                stage,
                track_index: Some(track.index),
                reason: format!("failed to write {}: {error}", path.display()),
            })?;
            text_files.push(path);
        }

        let request = FrameRequest {
            base,
            lines,
            text_files,
            color: self.layout.text_color,
            glow: self.layout.glow,
            font: self.layout.font.clone(),
            output: workspace.frame(track.index),
        };

        self.renderer
            .render(&request, cancel)
            .await
            .map_err(|error| ConversionError::from_engine(stage, track.index, error))?;

        match image::image_dimensions(&request.output) {
            Ok((FRAME_WIDTH, FRAME_HEIGHT)) => Ok(request.output),
            Ok((width, height)) => Err(ConversionError::Encoding {
                stage,
                track_index: Some(track.index),
                reason: format!(
                    "rendered frame is {width}×{height}, expected {FRAME_WIDTH}×{FRAME_HEIGHT}"
                ),
            }),
            Err(error) => Err(ConversionError::Encoding {
                stage,
                track_index: Some(track.index),
                reason: format!("rendered frame is not a readable image: {error}"),
            }),
        }
    }
}
