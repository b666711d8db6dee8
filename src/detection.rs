use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

use crate::marker::MarkerSighting;

/// Circular blob that survived area and circularity filtering.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct BallCandidate {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    pub area: f32,
    pub circularity: f32,
    #[serde(default)]
    pub marker: Option<MarkerSighting>,
}

impl BallCandidate {
    #[inline(always)]
    pub fn center(&self) -> na::Point2<f32> {
        na::Point2::new(self.x, self.y)
    }
}

/// Per-frame detector verdict. `found == false` is the ordinary outcome on
/// frames without a ball and carries no position.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct BallDetection {
    pub found: bool,
    pub x: Option<f32>,
    pub y: Option<f32>,
    pub radius: Option<f32>,
    #[serde(rename = "p")]
    pub confidence: f32,
    pub frame_index: u64,
    pub timestamp: f64,
    #[serde(default)]
    pub candidates: usize,
    #[serde(default)]
    pub marker: Option<MarkerSighting>,
}

impl BallDetection {
    pub fn not_found(frame_index: u64, timestamp: f64) -> Self {
        Self {
            found: false,
            x: None,
            y: None,
            radius: None,
            confidence: 0.0,
            frame_index,
            timestamp,
            candidates: 0,
            marker: None,
        }
    }

    pub fn found(
        candidate: &BallCandidate,
        confidence: f32,
        frame_index: u64,
        timestamp: f64,
        candidates: usize,
    ) -> Self {
        Self {
            found: true,
            x: Some(candidate.x),
            y: Some(candidate.y),
            radius: Some(candidate.radius),
            confidence: confidence.clamp(0.0, 1.0),
            frame_index,
            timestamp,
            candidates,
            marker: candidate.marker,
        }
    }

    #[inline]
    pub fn center(&self) -> Option<na::Point2<f32>> {
        if !self.found {
            return None;
        }

        Some(na::Point2::new(self.x?, self.y?))
    }
}
