use std::f32::consts::PI;

use nalgebra as na;
use ndarray::{ArrayView2, Zip};
use tracing::trace;

use crate::color::{Hsv, HsvFrame, HsvTarget};
use crate::config::DetectorConfig;
use crate::contour::find_contours;
use crate::detection::{BallCandidate, BallDetection};
use crate::mask::{self, Mask, Region};
use crate::math;

const MAX_SEARCH_STEP: usize = 8;

/// What the tracker knows going into a frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct Prior {
    /// Center of the last confirmed detection.
    pub previous: Option<na::Point2<f32>>,
    /// One-step-ahead filter prediction.
    pub predicted: Option<na::Point2<f32>>,
}

pub struct BallDetector {
    config: DetectorConfig,
}

impl BallDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    #[inline]
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Mask, clean and filter a whole frame; no cross-frame state involved.
    pub fn candidates(&self, hsv: &HsvFrame, target: &HsvTarget) -> Vec<BallCandidate> {
        self.candidates_at(hsv, (0, 0), hsv.len() as f32, target)
    }

    /// Same on a window whose top-left corner sits at `origin` in a frame of
    /// `frame_area` pixels. Centers come back in frame coordinates.
    pub fn candidates_at(
        &self,
        hsv: &HsvFrame,
        origin: (usize, usize),
        frame_area: f32,
        target: &HsvTarget,
    ) -> Vec<BallCandidate> {
        if hsv.is_empty() || frame_area <= 0.0 {
            return Vec::new();
        }

        // the spin marker leaves a hole in the ball
        let raw = mask::fill_holes(&mask::color_mask(hsv, target));
        let cleaned = mask::clean(&raw, self.config.open_radius, self.config.close_radius);

        let min_area = frame_area * self.config.min_area_fraction;
        let max_area = frame_area * self.config.max_area_fraction;

        find_contours(&cleaned)
            .into_iter()
            .filter_map(|c| {
                if c.area < min_area || c.area > max_area {
                    return None;
                }

                let circularity = c.circularity();
                if circularity < self.config.min_circularity {
                    trace!(area = c.area, circularity, "blob rejected as not round");
                    return None;
                }

                Some(BallCandidate {
                    x: c.centroid.x + origin.0 as f32,
                    y: c.centroid.y + origin.1 as f32,
                    radius: c.equivalent_radius(),
                    area: c.area,
                    circularity,
                    marker: None,
                })
            })
            .collect()
    }

    /// Grid step of the search pass: half the radius of the smallest blob
    /// the area filter accepts, so every such blob covers a sample.
    pub fn search_step(&self, frame_area: f32) -> usize {
        let min_radius = (frame_area * self.config.min_area_fraction / PI).sqrt();
        ((min_radius / 2.0) as usize).clamp(1, MAX_SEARCH_STEP)
    }

    /// Windows that may hold a ball. `target` is matched on a coarse grid of
    /// the RGB frame, each matched blob is grown by one step plus the
    /// morphology reach, and overlapping windows are merged.
    pub fn search_regions(&self, pixels: ArrayView2<'_, [u8; 3]>, target: &HsvTarget) -> Vec<Region> {
        let (h, w) = pixels.dim();
        if h == 0 || w == 0 {
            return Vec::new();
        }

        let step = self.search_step((h * w) as f32);
        let stride = step as isize;
        let coarse: Mask = Zip::from(pixels.slice(ndarray::s![..;stride, ..;stride]))
            .par_map_collect(|&px| target.matches(&Hsv::from_rgb(px)));

        let margin = step + self.config.open_radius + self.config.close_radius + 1;
        let grown = mask::regions(&coarse)
            .into_iter()
            .map(|r| Region {
                x0: (r.x0 * step).saturating_sub(margin),
                y0: (r.y0 * step).saturating_sub(margin),
                x1: ((r.x1 - 1) * step + margin + 1).min(w),
                y1: ((r.y1 - 1) * step + margin + 1).min(h),
            })
            .collect();

        mask::merge_overlapping(grown)
    }

    pub fn confidence(
        &self,
        candidate: &BallCandidate,
        frame_area: f32,
        predicted: Option<na::Point2<f32>>,
    ) -> f32 {
        let ideal = (frame_area * self.config.ideal_area_fraction).max(1.0);
        let size = (1.0 - (candidate.area - ideal).abs() / ideal).max(0.0);

        let proximity = match predicted {
            Some(p) => {
                let sigma = self.config.proximity_sigma_px.max(candidate.radius * 2.0);
                math::gauss(na::distance(&p, &candidate.center()), sigma)
            }
            None => 0.5,
        };

        let score = candidate.circularity.clamp(0.0, 1.0) * self.config.circularity_weight
            + size * self.config.size_weight
            + proximity * self.config.proximity_weight;

        score.clamp(0.0, 1.0)
    }

    /// Picks the candidate nearest to the previous center, or the best
    /// scoring one when there is no previous center.
    pub fn select(
        &self,
        candidates: &[BallCandidate],
        prior: &Prior,
        frame_area: f32,
        frame_index: u64,
        timestamp: f64,
    ) -> BallDetection {
        let chosen = match prior.previous {
            Some(prev) => candidates.iter().min_by(|a, b| {
                na::distance(&prev, &a.center()).total_cmp(&na::distance(&prev, &b.center()))
            }),
            None => candidates.iter().max_by(|a, b| {
                self.confidence(a, frame_area, prior.predicted)
                    .total_cmp(&self.confidence(b, frame_area, prior.predicted))
            }),
        };

        match chosen {
            Some(c) => BallDetection::found(
                c,
                self.confidence(c, frame_area, prior.predicted),
                frame_index,
                timestamp,
                candidates.len(),
            ),
            None => BallDetection::not_found(frame_index, timestamp),
        }
    }

    pub fn detect(
        &self,
        hsv: &HsvFrame,
        target: &HsvTarget,
        prior: &Prior,
        frame_index: u64,
        timestamp: f64,
    ) -> BallDetection {
        let candidates = self.candidates(hsv, target);
        self.select(&candidates, prior, hsv.len() as f32, frame_index, timestamp)
    }
}
