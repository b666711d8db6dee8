//! The per-frame stage that needs no history: a coarse color search over the
//! whole frame, then color conversion, candidate extraction and marker search
//! inside the windows it found. Safe to share across worker threads.

use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::trace;

use crate::color::{convert, BallProfile};
use crate::config::PipelineConfig;
use crate::detection::BallCandidate;
use crate::detector::BallDetector;
use crate::error::Error;
use crate::frame::Frame;
use crate::marker::MarkerDetector;

#[derive(Debug, Clone)]
pub struct FrameAnalysis {
    pub sequence: u64,
    pub timestamp: f64,
    pub width: u32,
    pub height: u32,
    /// Round blobs of the ball color, each with its marker when one was seen.
    pub candidates: Vec<BallCandidate>,
    pub elapsed: Duration,
}

impl FrameAnalysis {
    #[inline]
    pub fn dims(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline]
    pub fn frame_area(&self) -> f32 {
        self.width as f32 * self.height as f32
    }
}

pub struct FrameAnalyzer {
    detector: BallDetector,
    markers: MarkerDetector,
    profile: BallProfile,
    budget: Duration,
}

impl FrameAnalyzer {
    pub fn new(config: &PipelineConfig, profile: BallProfile) -> Result<Self, Error> {
        config.validate()?;
        profile.validate()?;

        Ok(Self {
            detector: BallDetector::new(config.detector.clone()),
            markers: MarkerDetector::new(config.marker.clone()),
            profile,
            budget: Duration::from_secs_f64(config.runtime.frame_budget_ms / 1000.0),
        })
    }

    #[inline]
    pub fn budget(&self) -> Duration {
        self.budget
    }

    #[inline]
    pub fn profile(&self) -> &BallProfile {
        &self.profile
    }

    pub fn analyze(&self, frame: &Frame) -> FrameAnalysis {
        let started = Instant::now();

        let pixels = frame.pixels.view();
        let frame_area = frame.area();
        let regions = self.detector.search_regions(pixels, &self.profile.ball);

        // only the search windows are converted and cleaned at full resolution
        let candidates: Vec<BallCandidate> = regions
            .par_iter()
            .flat_map(|r| {
                let hsv = convert(pixels.slice(ndarray::s![r.y0..r.y1, r.x0..r.x1]));
                let mut found = self
                    .detector
                    .candidates_at(&hsv, r.origin(), frame_area, &self.profile.ball);

                if let Some(target) = &self.profile.marker {
                    for c in &mut found {
                        c.marker = self.markers.detect_at(
                            &hsv,
                            r.origin(),
                            frame_area,
                            target,
                            (c.x, c.y),
                            c.radius,
                        );
                    }
                }

                found
            })
            .collect();

        let elapsed = started.elapsed();
        trace!(
            sequence = frame.sequence,
            windows = regions.len(),
            window_px = regions.iter().map(|r| r.width() * r.height()).sum::<usize>(),
            candidates = candidates.len(),
            elapsed_us = elapsed.as_micros() as u64,
            "frame analyzed"
        );

        FrameAnalysis {
            sequence: frame.sequence,
            timestamp: frame.timestamp,
            width: frame.width(),
            height: frame.height(),
            candidates,
            elapsed,
        }
    }

    #[inline]
    pub fn over_budget(&self, analysis: &FrameAnalysis) -> bool {
        analysis.elapsed > self.budget
    }
}
