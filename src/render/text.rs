use anyhow::Context;
use fontdue::{Font, FontSettings};
use std::path::{Path, PathBuf};

use super::composite::blend_pixel;
use super::RenderedFrame;
use crate::config::TextConfig;
use crate::error::{BarwaveError, BarwaveResult};

const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// One rasterized glyph at its final canvas position.
#[derive(Clone, Debug)]
struct PlacedGlyph {
    x: i32,
    y: i32,
    width: usize,
    height: usize,
    coverage: Vec<u8>,
    color: [u8; 4],
}

/// Artist and title lines, rasterized once per job and stamped onto every frame.
#[derive(Clone, Debug, Default)]
pub struct TextLayer {
    glyphs: Vec<PlacedGlyph>,
}

impl TextLayer {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }

    /// Lays out the title in the top-left corner with the artist below it at
    /// a smaller size. Empty strings are skipped.
    pub fn layout(font: Option<&Font>, cfg: &TextConfig, width: u32, height: u32) -> Self {
        let Some(font) = font else {
            return Self::empty();
        };
        let margin = (width.min(height) as f32 * 0.05).round() as i32;
        let mut layer = Self::empty();
        let mut y = margin;

        if let Some(title) = cfg.title.as_deref().filter(|t| !t.trim().is_empty()) {
            layer.push_line(font, title, cfg.font_size, margin, y, cfg.title_color.to_array());
            y += (cfg.font_size * 1.25).round() as i32;
        }
        if let Some(artist) = cfg.artist.as_deref().filter(|t| !t.trim().is_empty()) {
            let size = cfg.font_size * 0.7;
            layer.push_line(font, artist, size, margin, y, cfg.artist_color.to_array());
        }
        layer
    }

    fn push_line(&mut self, font: &Font, text: &str, size: f32, x: i32, y: i32, color: [u8; 4]) {
        let mut cursor_x = x as f32;
        for ch in text.chars() {
            let (metrics, bitmap) = font.rasterize(ch, size);
            if metrics.width > 0 && metrics.height > 0 {
                self.glyphs.push(PlacedGlyph {
                    x: cursor_x.round() as i32 + metrics.xmin,
                    y: y + size as i32 - metrics.height as i32 - metrics.ymin,
                    width: metrics.width,
                    height: metrics.height,
                    coverage: bitmap,
                    color,
                });
            }
            cursor_x += metrics.advance_width;
        }
    }

    /// Blends every glyph over `frame`, clipping at the canvas edges.
    pub fn composite(&self, frame: &mut RenderedFrame) {
        let (w, h) = (frame.width as i32, frame.height as i32);
        for glyph in &self.glyphs {
            for gy in 0..glyph.height {
                let py = glyph.y + gy as i32;
                if py < 0 || py >= h {
                    continue;
                }
                for gx in 0..glyph.width {
                    let alpha = glyph.coverage[gy * glyph.width + gx];
                    let px = glyph.x + gx as i32;
                    if alpha == 0 || px < 0 || px >= w {
                        continue;
                    }
                    let idx = ((py * w + px) * 4) as usize;
                    blend_pixel(&mut frame.data[idx..idx + 4], glyph.color, alpha);
                }
            }
        }
    }
}

/// Loads the font used for the overlay, or `None` when there is no text to draw.
/// An explicit path wins over a URL, which wins over the system fallbacks.
pub fn resolve_font(cfg: &TextConfig) -> BarwaveResult<Option<Font>> {
    let has_text = [&cfg.artist, &cfg.title]
        .iter()
        .any(|t| t.as_deref().is_some_and(|s| !s.trim().is_empty()));
    if !has_text {
        return Ok(None);
    }

    if let Some(path) = &cfg.font {
        return load_font_file(path).map(Some);
    }
    if let Some(url) = &cfg.font_url {
        return load_font_from_url(url).map(Some);
    }
    for candidate in SYSTEM_FONTS.iter().map(PathBuf::from) {
        if candidate.exists() {
            log::debug!("Using system font {}", candidate.display());
            return load_font_file(&candidate).map(Some);
        }
    }
    Err(BarwaveError::input(
        "no font available for artist/title text. Set text.font or text.font_url",
    ))
}

fn load_font_file(path: &Path) -> BarwaveResult<Font> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read font {}", path.display()))
        .map_err(BarwaveError::input_from)?;
    parse_font(&bytes, &path.display().to_string())
}

pub fn load_font_from_url(url: &str) -> BarwaveResult<Font> {
    log::info!("Downloading font from {url}");
    let bytes = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .and_then(|r| r.bytes())
        .with_context(|| format!("failed to download font {url}"))
        .map_err(BarwaveError::input_from)?;
    parse_font(&bytes, url)
}

fn parse_font(bytes: &[u8], origin: &str) -> BarwaveResult<Font> {
    Font::from_bytes(bytes, FontSettings::default())
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("invalid font {origin}"))
        .map_err(BarwaveError::input_from)
}
