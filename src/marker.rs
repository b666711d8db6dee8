//! Spin-marker search inside a detected ball.

use serde_derive::{Deserialize, Serialize};

use crate::color::{HsvFrame, HsvTarget};
use crate::config::MarkerConfig;
use crate::contour::find_contours;
use crate::mask;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct MarkerSighting {
    pub x: f32,
    pub y: f32,
    pub area: f32,
    /// `atan2(marker - ball)` in degrees, `(-180, 180]`.
    pub angle: f32,
}

pub struct MarkerDetector {
    config: MarkerConfig,
}

impl MarkerDetector {
    pub fn new(config: MarkerConfig) -> Self {
        Self { config }
    }

    /// Looks for the largest `target` blob inside the ball circle. `None`
    /// leaves the ball detection itself untouched.
    pub fn detect(
        &self,
        hsv: &HsvFrame,
        target: &HsvTarget,
        center: (f32, f32),
        radius: f32,
    ) -> Option<MarkerSighting> {
        self.detect_at(hsv, (0, 0), hsv.len() as f32, target, center, radius)
    }

    /// Same on a window whose top-left corner sits at `origin` in a frame of
    /// `frame_area` pixels. `center` and the result are in frame coordinates.
    pub fn detect_at(
        &self,
        hsv: &HsvFrame,
        origin: (usize, usize),
        frame_area: f32,
        target: &HsvTarget,
        center: (f32, f32),
        radius: f32,
    ) -> Option<MarkerSighting> {
        if radius <= 0.0 || hsv.is_empty() {
            return None;
        }

        let (h, w) = hsv.dim();
        let reach = radius + self.config.padding_px;
        let (ox, oy) = (origin.0 as f32, origin.1 as f32);
        let (cx, cy) = (center.0 - ox, center.1 - oy);

        let x0 = (cx - reach).floor().max(0.0) as usize;
        let y0 = (cy - reach).floor().max(0.0) as usize;
        let x1 = ((cx + reach).ceil().max(0.0) as usize + 1).min(w);
        let y1 = ((cy + reach).ceil().max(0.0) as usize + 1).min(h);
        if x0 >= x1 || y0 >= y1 {
            return None;
        }

        let crop = hsv.slice(ndarray::s![y0..y1, x0..x1]).to_owned();
        let local = (cx - x0 as f32, cy - y0 as f32);

        let raw = mask::color_mask_in_circle(&crop, target, local, reach);
        let cleaned = mask::clean(&raw, self.config.morph_radius, self.config.morph_radius);

        let min_area = frame_area * self.config.min_area_fraction;

        let best = find_contours(&cleaned)
            .into_iter()
            .filter(|c| c.area >= min_area)
            .max_by(|a, b| a.area.total_cmp(&b.area))?;

        let mx = best.centroid.x + x0 as f32 + ox;
        let my = best.centroid.y + y0 as f32 + oy;

        Some(MarkerSighting {
            x: mx,
            y: my,
            area: best.area,
            angle: (my - center.1).atan2(mx - center.0).to_degrees(),
        })
    }
}
