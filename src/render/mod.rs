pub mod background;
pub mod color;
pub mod composite;
pub mod geometry;
pub mod raster;
pub mod text;
#[cfg(feature = "gpu")]
pub mod shader;

use crate::audio::BarLevels;
use crate::config::{RendererKind, VisualizerConfig};
use crate::error::{BarwaveError, BarwaveResult};

use background::Background;
use geometry::BarGeometry;
use text::TextLayer;

/// One opaque RGBA8 frame at canvas size, rows top to bottom.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Bytes in one RGBA8 frame, computed in `usize` so large canvases cannot wrap.
pub fn frame_bytes(width: u32, height: u32) -> usize {
    width as usize * height as usize * 4
}

impl RenderedFrame {
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity(frame_bytes(width, height));
        for _ in 0..width as usize * height as usize {
            data.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }
}

/// A rendering backend: bar levels in, composited frame out. Backends hold
/// their static assets and never modify the levels or the config.
pub trait FrameProducer {
    fn name(&self) -> &'static str;

    fn render(&mut self, levels: &BarLevels) -> BarwaveResult<RenderedFrame>;
}

/// Static per-job inputs every backend composites with.
pub struct RenderAssets {
    pub background: Background,
    pub text: TextLayer,
}

pub fn build_producer(
    cfg: &VisualizerConfig,
    geometry: BarGeometry,
    assets: RenderAssets,
) -> BarwaveResult<Box<dyn FrameProducer>> {
    match cfg.renderer {
        RendererKind::Raster => Ok(Box::new(raster::RasterRenderer::new(cfg, geometry, assets))),
        #[cfg(feature = "gpu")]
        RendererKind::Shader => Ok(Box::new(shader::ShaderRenderer::new(cfg, geometry, assets)?)),
        #[cfg(not(feature = "gpu"))]
        RendererKind::Shader => Err(BarwaveError::input(
            "the shader renderer requires the 'gpu' feature. Rebuild with: cargo build --features gpu",
        )),
    }
}

/// Per-segment colors, bottom to top. Gradient position depends only on the
/// segment index, so colors stay put as bars move.
pub fn segment_palette(cfg: &VisualizerConfig, segments: usize) -> Vec<[u8; 4]> {
    (0..segments)
        .map(|s| {
            let t = if segments > 1 {
                s as f32 / (segments - 1) as f32
            } else {
                0.0
            };
            color::sample_gradient(&cfg.colors.gradient, t)
                .unwrap_or(cfg.colors.bar)
                .to_array()
        })
        .collect()
}

pub(crate) fn check_levels(levels: &BarLevels, geometry: &BarGeometry) -> BarwaveResult<()> {
    if levels.heights.len() != geometry.bar_count {
        return Err(BarwaveError::internal(format!(
            "frame {} has {} bar heights, expected {}",
            levels.index,
            levels.heights.len(),
            geometry.bar_count
        )));
    }
    if let Some(peaks) = &levels.peaks {
        if peaks.len() != geometry.bar_count {
            return Err(BarwaveError::internal(format!(
                "frame {} has {} peaks, expected {}",
                levels.index,
                peaks.len(),
                geometry.bar_count
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::color::Rgba;

    #[test]
    fn palette_without_gradient_is_solid() {
        let cfg = VisualizerConfig::default();
        let palette = segment_palette(&cfg, 4);
        assert!(palette.iter().all(|&c| c == cfg.colors.bar.to_array()));
    }

    #[test]
    fn palette_spans_gradient_bottom_to_top() {
        let mut cfg = VisualizerConfig::default();
        cfg.colors.gradient = vec![Rgba::rgb(0, 0, 0), Rgba::rgb(250, 0, 0)];
        let palette = segment_palette(&cfg, 6);
        assert_eq!(palette[0], [0, 0, 0, 255]);
        assert_eq!(palette[5], [250, 0, 0, 255]);
        assert!(palette.windows(2).all(|w| w[0][0] < w[1][0]));
    }

    #[cfg(not(feature = "gpu"))]
    #[test]
    fn shader_backend_is_feature_gated() {
        let mut cfg = VisualizerConfig::default();
        cfg.renderer = RendererKind::Shader;
        let geometry = cfg.validate().unwrap();
        let assets = RenderAssets {
            background: Background::Solid(cfg.colors.background),
            text: TextLayer::empty(),
        };
        assert!(build_producer(&cfg, geometry, assets).is_err());
    }
}
