use serde_derive::{Deserialize, Serialize};
use tracing::trace;

use crate::config::RotationConfig;

/// Spin sense on screen, image y pointing down.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpinDirection {
    Clockwise,
    CounterClockwise,
}

/// Shortest signed step from `from` to `to`, in `(-180, 180]`.
#[inline]
pub fn angle_delta(from: f64, to: f64) -> f64 {
    let d = (to - from).rem_euclid(360.0);
    if d > 180.0 {
        d - 360.0
    } else {
        d
    }
}

/// Unwraps marker angles into a cumulative rotation.
#[derive(Debug, Clone)]
pub struct RotationCounter {
    config: RotationConfig,
    anchor: Option<f64>,
    cumulative: f64,
    samples: usize,
    rejects: u32,
    first_ts: f64,
    last_ts: f64,
}

impl RotationCounter {
    pub fn new(config: RotationConfig) -> Self {
        Self {
            config,
            anchor: None,
            cumulative: 0.0,
            samples: 0,
            rejects: 0,
            first_ts: 0.0,
            last_ts: 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.anchor = None;
        self.cumulative = 0.0;
        self.samples = 0;
        self.rejects = 0;
        self.first_ts = 0.0;
        self.last_ts = 0.0;
    }

    /// Adds one raw angle in degrees. Returns whether it was accepted.
    pub fn push(&mut self, angle: f64, timestamp: f64) -> bool {
        if !angle.is_finite() {
            return false;
        }

        let prev = match self.anchor {
            Some(prev) => prev,
            None => {
                self.anchor = Some(angle);
                self.samples = 1;
                self.first_ts = timestamp;
                self.last_ts = timestamp;
                return true;
            }
        };

        let delta = angle_delta(prev, angle);
        if delta.abs() > self.config.max_step_deg {
            self.rejects += 1;
            trace!(delta, rejects = self.rejects, "marker jump discarded");

            if self.rejects >= self.config.max_consecutive_rejects {
                self.anchor = Some(angle);
                self.last_ts = timestamp;
                self.rejects = 0;
            }

            return false;
        }

        self.cumulative += delta;
        self.anchor = Some(angle);
        self.samples += 1;
        self.rejects = 0;
        self.last_ts = timestamp;

        true
    }

    /// Signed unwrapped angle in degrees.
    #[inline]
    pub fn cumulative_deg(&self) -> f64 {
        self.cumulative
    }

    #[inline]
    pub fn rotations(&self) -> f64 {
        self.cumulative.abs() / 360.0
    }

    #[inline]
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Revolutions per minute; `None` until two accepted samples span time.
    pub fn rpm(&self) -> Option<f64> {
        let elapsed = self.last_ts - self.first_ts;
        if self.samples < 2 || !(elapsed > 0.0) {
            return None;
        }

        Some(self.rotations() / elapsed * 60.0)
    }

    pub fn direction(&self) -> Option<SpinDirection> {
        if self.cumulative > 0.0 {
            Some(SpinDirection::Clockwise)
        } else if self.cumulative < 0.0 {
            Some(SpinDirection::CounterClockwise)
        } else {
            None
        }
    }
}
