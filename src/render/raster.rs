use super::background::Background;
use super::composite::fill_segment;
use super::geometry::{peak_segment, BarGeometry};
use super::text::TextLayer;
use super::{check_levels, segment_palette, FrameProducer, RenderAssets, RenderedFrame};
use crate::audio::BarLevels;
use crate::config::VisualizerConfig;
use crate::error::BarwaveResult;

/// CPU backend: draws each segment as an anti-aliased rounded box.
pub struct RasterRenderer {
    geometry: BarGeometry,
    width: u32,
    height: u32,
    palette: Vec<[u8; 4]>,
    peak_color: [u8; 4],
    background: Background,
    text: TextLayer,
}

impl RasterRenderer {
    pub fn new(cfg: &VisualizerConfig, geometry: BarGeometry, assets: RenderAssets) -> Self {
        let palette = segment_palette(cfg, geometry.segments_per_bar);
        log::debug!(
            "Raster renderer: {} bars x {} segments at {}x{}",
            geometry.bar_count,
            geometry.segments_per_bar,
            cfg.output.width,
            cfg.output.height
        );
        Self {
            geometry,
            width: cfg.output.width,
            height: cfg.output.height,
            palette,
            peak_color: cfg.colors.peak.to_array(),
            background: assets.background,
            text: assets.text,
        }
    }
}

impl FrameProducer for RasterRenderer {
    fn name(&self) -> &'static str {
        "raster"
    }

    fn render(&mut self, levels: &BarLevels) -> BarwaveResult<RenderedFrame> {
        check_levels(levels, &self.geometry)?;
        let mut frame = self.background.frame(self.width, self.height)?;
        let geo = &self.geometry;
        let radius = geo.corner_radius;

        for (bar, &height) in levels.heights.iter().enumerate() {
            let lit = geo.lit_count(height);
            for seg in 0..lit {
                fill_segment(&mut frame, &geo.segment_box(bar, seg), radius, self.palette[seg]);
            }
            let marker = levels
                .peaks
                .as_ref()
                .and_then(|p| peak_segment(p[bar], geo.segments_per_bar));
            if let Some(seg) = marker {
                fill_segment(&mut frame, &geo.segment_box(bar, seg), radius, self.peak_color);
            }
        }

        self.text.composite(&mut frame);
        Ok(frame)
    }
}
