use std::f32::consts::{FRAC_PI_2, TAU};

use crate::config::{Layout, VisualizerConfig};
use crate::error::{BarwaveError, BarwaveResult};

/// Number of segments lit for a bar at `height`. Shared by every consumer of
/// bar heights so the quantization never drifts between stages.
pub fn lit_segments(height: f32, segments: usize) -> usize {
    let h = if height.is_finite() { height.clamp(0.0, 1.0) } else { 0.0 };
    ((h * segments as f32).floor() as usize).min(segments)
}

/// Segment index of the peak marker, if the peak is above the floor.
pub fn peak_segment(peak: f32, segments: usize) -> Option<usize> {
    if !(peak > 0.0) || segments == 0 {
        return None;
    }
    Some(lit_segments(peak, segments).min(segments - 1))
}

/// A segment as an oriented box: centre, half extents along the bar's
/// tangent and axis, and the axis direction (unit vector pointing "up" the bar).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SegmentBox {
    pub cx: f32,
    pub cy: f32,
    pub half_w: f32,
    pub half_h: f32,
    pub axis: (f32, f32),
}

impl SegmentBox {
    pub fn tangent(&self) -> (f32, f32) {
        (-self.axis.1, self.axis.0)
    }

    /// Axis-aligned pixel bounds (x0, y0, x1, y1), unclipped.
    pub fn bounds(&self) -> (f32, f32, f32, f32) {
        let (tx, ty) = self.tangent();
        let (ax, ay) = self.axis;
        let ex = (tx * self.half_w).abs() + (ax * self.half_h).abs();
        let ey = (ty * self.half_w).abs() + (ay * self.half_h).abs();
        (self.cx - ex, self.cy - ey, self.cx + ex, self.cy + ey)
    }
}

/// Pixel geometry derived once from a validated config.
#[derive(Clone, Debug, PartialEq)]
pub struct BarGeometry {
    pub layout: Layout,
    pub bar_count: usize,
    pub bar_width: f32,
    pub bar_gap: f32,
    pub segment_height: f32,
    pub segment_gap: f32,
    pub corner_radius: f32,
    pub segments_per_bar: usize,
    pub static_bottom_segment: bool,
    /// Linear: left edge of the first bar and bottom edge of segment 0.
    pub origin_x: f32,
    pub baseline_y: f32,
    /// Ring: canvas centre and the radius where segment 0 starts.
    pub center: (f32, f32),
    pub inner_radius: f32,
}

impl BarGeometry {
    pub fn compute(cfg: &VisualizerConfig) -> BarwaveResult<Self> {
        let bars = &cfg.bars;
        let (w, h) = (cfg.output.width as f32, cfg.output.height as f32);

        if bars.count == 0 {
            return Err(BarwaveError::render_config("bar count must be at least 1"));
        }
        if bars.width == 0 {
            return Err(BarwaveError::render_config("bar width must be at least 1px"));
        }
        if bars.segment_height == 0 {
            return Err(BarwaveError::render_config("segment height must be at least 1px"));
        }
        let max_radius = bars.width.min(bars.segment_height) as f32 / 2.0;
        if !(bars.corner_radius >= 0.0) || bars.corner_radius > max_radius {
            return Err(BarwaveError::render_config(format!(
                "corner radius {} must be within 0..={}",
                bars.corner_radius, max_radius
            )));
        }
        for (name, v) in [
            ("height_ratio", bars.height_ratio),
            ("bottom_margin_ratio", bars.bottom_margin_ratio),
            ("ring_radius_ratio", bars.ring_radius_ratio),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(BarwaveError::render_config(format!("{name} must be in [0, 1]")));
            }
        }

        let bar_width = bars.width as f32;
        let bar_gap = bars.gap as f32;
        let segment_height = bars.segment_height as f32;
        let segment_gap = bars.segment_gap as f32;

        let (available, origin_x, baseline_y, center, inner_radius) = match bars.layout {
            Layout::Linear => {
                let total = bars.count as f32 * bar_width + (bars.count - 1) as f32 * bar_gap;
                if total > w {
                    return Err(BarwaveError::render_config(format!(
                        "{} bars of {}px with {}px gaps need {}px but the canvas is {}px wide",
                        bars.count, bars.width, bars.gap, total, cfg.output.width
                    )));
                }
                let baseline = (h * (1.0 - bars.bottom_margin_ratio)).floor();
                let available = (h * bars.height_ratio).floor();
                if available > baseline {
                    return Err(BarwaveError::render_config(
                        "bars extend above the top of the canvas",
                    ));
                }
                let origin = ((w - total) / 2.0).floor();
                (available, origin, baseline, (w / 2.0, h / 2.0), 0.0)
            }
            Layout::Ring => {
                let half_short = w.min(h) / 2.0;
                let inner = w.min(h) * bars.ring_radius_ratio;
                let available = (half_short * bars.height_ratio).floor();
                if inner <= 0.0 {
                    return Err(BarwaveError::render_config("ring radius must be positive"));
                }
                if inner + available > half_short {
                    return Err(BarwaveError::render_config(
                        "ring bars extend past the canvas edge",
                    ));
                }
                let pitch = TAU * inner / bars.count as f32;
                if pitch - bar_width < bar_gap || pitch <= bar_width {
                    return Err(BarwaveError::render_config(format!(
                        "{} bars of {}px with {}px gaps do not fit around a {:.0}px ring",
                        bars.count, bars.width, bars.gap, inner
                    )));
                }
                (available, 0.0, 0.0, (w / 2.0, h / 2.0), inner)
            }
        };

        let pitch = segment_height + segment_gap;
        let segments = ((available + segment_gap) / pitch).floor();
        if segments < 1.0 {
            return Err(BarwaveError::render_config(format!(
                "segment height {}px does not fit in a {}px bar",
                bars.segment_height, available
            )));
        }

        Ok(Self {
            layout: bars.layout,
            bar_count: bars.count,
            bar_width,
            bar_gap,
            segment_height,
            segment_gap,
            corner_radius: bars.corner_radius,
            segments_per_bar: segments as usize,
            static_bottom_segment: bars.static_bottom_segment,
            origin_x,
            baseline_y,
            center,
            inner_radius,
        })
    }

    /// Segments drawn lit for `height`, honouring the static bottom segment.
    pub fn lit_count(&self, height: f32) -> usize {
        let lit = lit_segments(height, self.segments_per_bar);
        if self.static_bottom_segment {
            lit.max(1)
        } else {
            lit
        }
    }

    pub fn segment_box(&self, bar: usize, segment: usize) -> SegmentBox {
        let along = segment as f32 * (self.segment_height + self.segment_gap)
            + self.segment_height / 2.0;
        match self.layout {
            Layout::Linear => SegmentBox {
                cx: self.origin_x + bar as f32 * (self.bar_width + self.bar_gap) + self.bar_width / 2.0,
                cy: self.baseline_y - along,
                half_w: self.bar_width / 2.0,
                half_h: self.segment_height / 2.0,
                axis: (0.0, -1.0),
            },
            Layout::Ring => {
                // Bar 0 points straight up; bars advance clockwise.
                let theta = -FRAC_PI_2 + TAU * bar as f32 / self.bar_count as f32;
                let (sin, cos) = theta.sin_cos();
                let d = self.inner_radius + along;
                SegmentBox {
                    cx: self.center.0 + d * cos,
                    cy: self.center.1 + d * sin,
                    half_w: self.bar_width / 2.0,
                    half_h: self.segment_height / 2.0,
                    axis: (cos, sin),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> VisualizerConfig {
        let mut cfg = VisualizerConfig::default();
        cfg.output.width = 320;
        cfg.output.height = 200;
        cfg.bars.count = 8;
        cfg.bars.width = 20;
        cfg.bars.gap = 10;
        cfg.bars.segment_height = 8;
        cfg.bars.segment_gap = 2;
        cfg.bars.height_ratio = 0.5;
        cfg.bars.bottom_margin_ratio = 0.1;
        cfg
    }

    #[test]
    fn single_segment_boundaries() {
        assert_eq!(lit_segments(1.0, 1), 1);
        assert_eq!(lit_segments(0.0, 1), 0);
        assert_eq!(lit_segments(0.999, 1), 0);

        let mut cfg = small_config();
        cfg.bars.segment_height = 100;
        cfg.bars.segment_gap = 0;
        let geo = BarGeometry::compute(&cfg).unwrap();
        assert_eq!(geo.segments_per_bar, 1);
        assert_eq!(geo.lit_count(1.0), 1);
        assert_eq!(geo.lit_count(0.0), 0);

        cfg.bars.static_bottom_segment = true;
        let geo = BarGeometry::compute(&cfg).unwrap();
        assert_eq!(geo.lit_count(0.0), 1);
        assert_eq!(geo.lit_count(1.0), 1);
    }

    #[test]
    fn lit_segments_floors_and_clamps() {
        assert_eq!(lit_segments(0.55, 10), 5);
        assert_eq!(lit_segments(1.7, 10), 10);
        assert_eq!(lit_segments(-0.3, 10), 0);
        assert_eq!(lit_segments(f32::NAN, 10), 0);
    }

    #[test]
    fn peak_marker_stays_inside_the_bar() {
        assert_eq!(peak_segment(0.0, 10), None);
        assert_eq!(peak_segment(0.05, 10), Some(0));
        assert_eq!(peak_segment(0.55, 10), Some(5));
        assert_eq!(peak_segment(1.0, 10), Some(9));
    }

    #[test]
    fn linear_layout_is_centred() {
        let geo = BarGeometry::compute(&small_config()).unwrap();
        // 8 * 20 + 7 * 10 = 230px, centred in 320px.
        assert_eq!(geo.origin_x, 45.0);
        assert_eq!(geo.baseline_y, 180.0);
        // 100px of bar with 10px pitch and a trailing gap allowance.
        assert_eq!(geo.segments_per_bar, 10);

        let first = geo.segment_box(0, 0);
        assert_eq!((first.cx, first.cy), (55.0, 176.0));
        let last = geo.segment_box(7, 9);
        assert_eq!((last.cx, last.cy), (265.0, 86.0));
    }

    #[test]
    fn rejects_geometry_that_collapses() {
        let mut cfg = small_config();
        cfg.bars.width = 40;
        assert!(matches!(
            BarGeometry::compute(&cfg),
            Err(BarwaveError::RenderConfigInvalid(_))
        ));

        let mut cfg = small_config();
        cfg.bars.segment_height = 200;
        assert!(BarGeometry::compute(&cfg).is_err());

        let mut cfg = small_config();
        cfg.bars.width = 0;
        assert!(BarGeometry::compute(&cfg).is_err());

        let mut cfg = small_config();
        cfg.bars.corner_radius = 6.0;
        assert!(BarGeometry::compute(&cfg).is_err());
    }

    #[test]
    fn ring_layout_points_bar_zero_up() {
        let mut cfg = small_config();
        cfg.bars.layout = Layout::Ring;
        cfg.bars.width = 4;
        cfg.bars.gap = 2;
        cfg.bars.ring_radius_ratio = 0.2;
        cfg.bars.height_ratio = 0.5;
        let geo = BarGeometry::compute(&cfg).unwrap();
        let seg = geo.segment_box(0, 0);
        assert!((seg.cx - 160.0).abs() < 1e-3);
        assert!(seg.cy < 100.0);
        assert!((seg.axis.1 + 1.0).abs() < 1e-6);

        cfg.bars.count = 400;
        assert!(BarGeometry::compute(&cfg).is_err());
    }
}
