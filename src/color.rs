//! RGB to HSV conversion and color-tolerance matching.
//!
//! Hue is expressed in degrees `[0, 360)`, saturation and value in `[0, 1]`.
//! The whole-frame conversion runs as one parallel `Zip` over the pixel
//! buffer, which is the batched stage every detector works from.

use ndarray::{Array2, ArrayView2, Zip};
use serde_derive::{Deserialize, Serialize};

use crate::error::Error;
use crate::frame::Frame;

pub type HsvFrame = Array2<Hsv>;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct Hsv {
    pub h: f32,
    pub s: f32,
    pub v: f32,
}

impl Hsv {
    #[inline]
    pub fn new(h: f32, s: f32, v: f32) -> Self {
        Self {
            h: h.rem_euclid(360.0),
            s: s.clamp(0.0, 1.0),
            v: v.clamp(0.0, 1.0),
        }
    }

    pub fn from_rgb(rgb: [u8; 3]) -> Self {
        let r = rgb[0] as f32 / 255.0;
        let g = rgb[1] as f32 / 255.0;
        let b = rgb[2] as f32 / 255.0;

        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let delta = max - min;

        let h = if delta <= f32::EPSILON {
            0.0
        } else if max == r {
            60.0 * ((g - b) / delta).rem_euclid(6.0)
        } else if max == g {
            60.0 * ((b - r) / delta + 2.0)
        } else {
            60.0 * ((r - g) / delta + 4.0)
        };

        let s = if max <= f32::EPSILON { 0.0 } else { delta / max };

        Self {
            h: h.rem_euclid(360.0),
            s,
            v: max,
        }
    }
}

/// Circular hue distance in degrees, always in `[0, 180]`.
#[inline]
pub fn hue_distance(a: f32, b: f32) -> f32 {
    let d = (a - b).rem_euclid(360.0);
    d.min(360.0 - d)
}

/// Target color with per-axis tolerances.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct HsvTarget {
    pub color: Hsv,
    #[serde(default = "default_hue_tolerance")]
    pub hue_tolerance: f32,
    #[serde(default = "default_sv_tolerance")]
    pub saturation_tolerance: f32,
    #[serde(default = "default_sv_tolerance")]
    pub value_tolerance: f32,
}

fn default_hue_tolerance() -> f32 {
    15.0
}

fn default_sv_tolerance() -> f32 {
    0.3
}

impl HsvTarget {
    pub fn new(color: Hsv) -> Self {
        Self {
            color,
            hue_tolerance: default_hue_tolerance(),
            saturation_tolerance: default_sv_tolerance(),
            value_tolerance: default_sv_tolerance(),
        }
    }

    pub fn with_tolerances(mut self, hue: f32, saturation: f32, value: f32) -> Self {
        self.hue_tolerance = hue;
        self.saturation_tolerance = saturation;
        self.value_tolerance = value;
        self
    }

    #[inline]
    pub fn matches(&self, px: &Hsv) -> bool {
        hue_distance(px.h, self.color.h) <= self.hue_tolerance
            && (px.s - self.color.s).abs() <= self.saturation_tolerance
            && (px.v - self.color.v).abs() <= self.value_tolerance
    }

    pub fn validate(&self) -> Result<(), Error> {
        let tolerances = [
            self.hue_tolerance,
            self.saturation_tolerance,
            self.value_tolerance,
        ];

        if tolerances.iter().any(|t| !t.is_finite() || *t < 0.0) {
            return Err(Error::InvalidProfile(format!(
                "tolerances must be finite and non-negative, got {:?}",
                tolerances
            )));
        }

        if !(0.0..360.0).contains(&self.color.h)
            || !(0.0..=1.0).contains(&self.color.s)
            || !(0.0..=1.0).contains(&self.color.v)
        {
            return Err(Error::InvalidProfile(format!(
                "color out of range: {:?}",
                self.color
            )));
        }

        Ok(())
    }
}

/// Ball profile: the ball color and an optional spin-marker color.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct BallProfile {
    pub ball: HsvTarget,
    #[serde(default)]
    pub marker: Option<HsvTarget>,
}

impl BallProfile {
    pub fn validate(&self) -> Result<(), Error> {
        self.ball.validate()?;

        if let Some(marker) = &self.marker {
            marker.validate()?;
        }

        Ok(())
    }
}

/// Converts a whole frame, splitting rows across the rayon pool.
#[inline]
pub fn to_hsv(frame: &Frame) -> HsvFrame {
    convert(frame.pixels.view())
}

/// Converts any window of RGB pixels.
pub fn convert(pixels: ArrayView2<'_, [u8; 3]>) -> HsvFrame {
    Zip::from(pixels).par_map_collect(|&px| Hsv::from_rgb(px))
}
