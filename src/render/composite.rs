use super::geometry::SegmentBox;
use super::RenderedFrame;
use crate::error::{BarwaveError, BarwaveResult};

/// Straight-alpha `src over dst` for one RGBA8 pixel, with `coverage` scaling
/// the source alpha.
#[inline]
pub fn blend_pixel(dst: &mut [u8], src: [u8; 4], coverage: u8) {
    let a = mul_div255(u16::from(src[3]), u16::from(coverage));
    if a == 0 {
        return;
    }
    if a == 255 {
        dst[..3].copy_from_slice(&src[..3]);
        dst[3] = 255;
        return;
    }
    let inv = 255 - a;
    for i in 0..3 {
        dst[i] = (mul_div255(u16::from(src[i]), a) + mul_div255(u16::from(dst[i]), inv)).min(255)
            as u8;
    }
    dst[3] = (a + mul_div255(u16::from(dst[3]), inv)).min(255) as u8;
}

/// Composites a whole straight-alpha RGBA layer over `dst`.
pub fn over_in_place(dst: &mut [u8], src: &[u8]) -> BarwaveResult<()> {
    if dst.len() != src.len() || dst.len() % 4 != 0 {
        return Err(BarwaveError::internal(
            "over_in_place expects equal-length rgba8 buffers",
        ));
    }
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        blend_pixel(d, [s[0], s[1], s[2], s[3]], 255);
    }
    Ok(())
}

/// Fills one segment with anti-aliased rounded corners. Pixels are sampled at
/// their centres, so integer-aligned boxes without rounding come out crisp.
pub fn fill_segment(frame: &mut RenderedFrame, seg: &SegmentBox, radius: f32, color: [u8; 4]) {
    if color[3] == 0 {
        return;
    }
    let (bx0, by0, bx1, by1) = seg.bounds();
    let x0 = bx0.floor().max(0.0) as u32;
    let y0 = by0.floor().max(0.0) as u32;
    let x1 = (bx1.ceil().max(0.0) as u32).min(frame.width);
    let y1 = (by1.ceil().max(0.0) as u32).min(frame.height);
    let (tx, ty) = seg.tangent();
    let (ax, ay) = seg.axis;
    let r = radius.min(seg.half_w).min(seg.half_h).max(0.0);

    for py in y0..y1 {
        let row = (py * frame.width) as usize * 4;
        let dy = py as f32 + 0.5 - seg.cy;
        for px in x0..x1 {
            let dx = px as f32 + 0.5 - seg.cx;
            let u = dx * tx + dy * ty;
            let v = dx * ax + dy * ay;
            let d = rounded_box_distance(u, v, seg.half_w, seg.half_h, r);
            let coverage = (0.5 - d).clamp(0.0, 1.0);
            if coverage <= 0.0 {
                continue;
            }
            let idx = row + px as usize * 4;
            let cov = (coverage * 255.0).round() as u8;
            blend_pixel(&mut frame.data[idx..idx + 4], color, cov);
        }
    }
}

/// Signed distance from a point in box-local coordinates to a rounded box.
fn rounded_box_distance(u: f32, v: f32, half_w: f32, half_h: f32, r: f32) -> f32 {
    let qx = u.abs() - (half_w - r);
    let qy = v.abs() - (half_h - r);
    let outside = (qx.max(0.0).powi(2) + qy.max(0.0).powi(2)).sqrt();
    let inside = qx.max(qy).min(0.0);
    outside + inside - r
}

#[inline]
fn mul_div255(x: u16, y: u16) -> u16 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn black(width: u32, height: u32) -> RenderedFrame {
        RenderedFrame::filled(width, height, [0, 0, 0, 255])
    }

    #[test]
    fn opaque_source_replaces_destination() {
        let mut px = [10u8, 20, 30, 255];
        blend_pixel(&mut px, [255, 0, 0, 255], 255);
        assert_eq!(px, [255, 0, 0, 255]);
    }

    #[test]
    fn half_alpha_blends_over_black() {
        let mut px = [0u8, 0, 0, 255];
        blend_pixel(&mut px, [255, 0, 0, 128], 255);
        assert_eq!(px, [128, 0, 0, 255]);
    }

    #[test]
    fn zero_coverage_is_noop() {
        let mut px = [1u8, 2, 3, 255];
        blend_pixel(&mut px, [255, 255, 255, 255], 0);
        assert_eq!(px, [1, 2, 3, 255]);
    }

    #[test]
    fn square_segment_fills_exactly_its_pixels() {
        let mut frame = black(8, 8);
        let seg = SegmentBox {
            cx: 4.0,
            cy: 4.0,
            half_w: 2.0,
            half_h: 1.0,
            axis: (0.0, -1.0),
        };
        fill_segment(&mut frame, &seg, 0.0, [255, 255, 255, 255]);
        let lit: usize = frame.data.chunks_exact(4).filter(|p| p[0] == 255).count();
        assert_eq!(lit, 8);
        assert_eq!(frame.pixel(2, 3), [255, 255, 255, 255]);
        assert_eq!(frame.pixel(5, 4), [255, 255, 255, 255]);
        assert_eq!(frame.pixel(1, 3), [0, 0, 0, 255]);
        assert_eq!(frame.pixel(2, 5), [0, 0, 0, 255]);
    }

    #[test]
    fn rounded_corners_soften_the_corner_pixel() {
        let mut frame = black(16, 16);
        let seg = SegmentBox {
            cx: 8.0,
            cy: 8.0,
            half_w: 4.0,
            half_h: 4.0,
            axis: (0.0, -1.0),
        };
        fill_segment(&mut frame, &seg, 3.0, [255, 255, 255, 255]);
        assert!(frame.pixel(4, 4)[0] < 255);
        assert_eq!(frame.pixel(8, 8)[0], 255);
    }

    #[test]
    fn segments_are_clipped_to_the_canvas() {
        let mut frame = black(4, 4);
        let seg = SegmentBox {
            cx: 0.0,
            cy: 0.0,
            half_w: 10.0,
            half_h: 10.0,
            axis: (0.0, -1.0),
        };
        fill_segment(&mut frame, &seg, 0.0, [9, 9, 9, 255]);
        assert!(frame.data.chunks_exact(4).all(|p| p == [9, 9, 9, 255]));
    }
}
