use anyhow::Context;
use image::imageops::FilterType;
use std::path::Path;

use super::color::Rgba;
use super::composite::blend_pixel;
use super::{frame_bytes, RenderedFrame};
use crate::error::{BarwaveError, BarwaveResult};

/// What every frame starts from: a canvas-sized opaque raster or a solid fill.
#[derive(Clone, Debug)]
pub enum Background {
    Solid(Rgba),
    Image(RenderedFrame),
}

impl Background {
    /// Decodes an image, scales it to cover the canvas and crops the overflow.
    /// Transparent regions are flattened over `fill`.
    pub fn load(path: &Path, width: u32, height: u32, fill: Rgba) -> BarwaveResult<Self> {
        let img = image::open(path)
            .with_context(|| format!("failed to load background {}", path.display()))
            .map_err(BarwaveError::input_from)?;
        let rgba = img.resize_to_fill(width, height, FilterType::Lanczos3).to_rgba8();
        log::info!(
            "Background {} scaled to {}x{}",
            path.display(),
            rgba.width(),
            rgba.height()
        );
        Self::from_rgba(width, height, rgba.as_raw(), fill)
    }

    /// Wraps an already canvas-sized straight-alpha RGBA raster.
    pub fn from_rgba(width: u32, height: u32, rgba: &[u8], fill: Rgba) -> BarwaveResult<Self> {
        if rgba.len() != frame_bytes(width, height) {
            return Err(BarwaveError::input(format!(
                "background raster is {} bytes, expected {}x{} rgba",
                rgba.len(),
                width,
                height
            )));
        }
        let mut base = RenderedFrame::filled(width, height, [fill.r, fill.g, fill.b, 255]);
        for (d, s) in base.data.chunks_exact_mut(4).zip(rgba.chunks_exact(4)) {
            blend_pixel(d, [s[0], s[1], s[2], s[3]], 255);
        }
        Ok(Self::Image(base))
    }

    /// A fresh opaque frame of the requested size.
    pub fn frame(&self, width: u32, height: u32) -> BarwaveResult<RenderedFrame> {
        match self {
            Self::Solid(c) => Ok(RenderedFrame::filled(width, height, [c.r, c.g, c.b, 255])),
            Self::Image(img) if img.width == width && img.height == height => Ok(img.clone()),
            Self::Image(img) => Err(BarwaveError::internal(format!(
                "background is {}x{} but the canvas is {}x{}",
                img.width, img.height, width, height
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solid_background_is_opaque() {
        let bg = Background::Solid(Rgba::new(10, 20, 30, 40));
        let frame = bg.frame(2, 2).unwrap();
        assert!(frame.data.chunks_exact(4).all(|p| p == [10, 20, 30, 255]));
    }

    #[test]
    fn transparent_pixels_flatten_over_fill() {
        let raster = [255, 0, 0, 255, 0, 0, 255, 0];
        let bg = Background::from_rgba(2, 1, &raster, Rgba::rgb(0, 255, 0)).unwrap();
        let frame = bg.frame(2, 1).unwrap();
        assert_eq!(frame.pixel(0, 0), [255, 0, 0, 255]);
        assert_eq!(frame.pixel(1, 0), [0, 255, 0, 255]);
    }

    #[test]
    fn size_mismatch_is_rejected() {
        assert!(Background::from_rgba(2, 2, &[0; 4], Rgba::rgb(0, 0, 0)).is_err());
        let bg = Background::from_rgba(1, 1, &[0, 0, 0, 255], Rgba::rgb(0, 0, 0)).unwrap();
        assert!(bg.frame(2, 2).is_err());
    }

    #[test]
    fn unreadable_image_is_an_input_error() {
        let err = Background::load(Path::new("/nonexistent/bg.png"), 8, 8, Rgba::rgb(0, 0, 0))
            .unwrap_err();
        assert!(matches!(err, BarwaveError::Input(_)));
        assert!(err.to_string().contains("failed to load background /nonexistent/bg.png: "));
    }

    #[test]
    fn image_file_is_cropped_to_canvas() {
        let dir = std::env::temp_dir().join(format!("barwave-bg-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("wide.png");
        image::RgbaImage::from_pixel(40, 10, image::Rgba([0, 0, 200, 255]))
            .save(&path)
            .unwrap();
        let bg = Background::load(&path, 8, 8, Rgba::rgb(0, 0, 0)).unwrap();
        let frame = bg.frame(8, 8).unwrap();
        assert_eq!(frame.byte_len(), 8 * 8 * 4);
        assert!(frame.data.chunks_exact(4).all(|p| p[2] > 150 && p[3] == 255));
        std::fs::remove_dir_all(dir).ok();
    }
}
