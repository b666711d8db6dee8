use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::calibration::LaneMapper;
use crate::config::TrackerConfig;
use crate::detection::BallDetection;
use crate::detector::Prior;
use crate::error::Error;
use crate::predictor::Predictor;
use crate::trajectory::{Trajectory, TrajectoryPoint};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Searching,
    Tracking,
    /// Consecutive missed frames so far.
    Occluded(u32),
    Lost,
    Completed,
}

impl TrackState {
    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(self, TrackState::Tracking | TrackState::Occluded(_))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ShotEnd {
    ReachedPins,
    Lost,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct FinishedShot {
    pub points: Vec<TrajectoryPoint>,
    pub end: ShotEnd,
}

/// Single-ball shot tracker. Feed it every frame in order, including frames
/// the runtime dropped, which count as misses.
pub struct TrajectoryTracker {
    config: TrackerConfig,
    mapper: Option<LaneMapper>,
    state: TrackState,
    predictor: Predictor,
    trajectory: Trajectory,
    // missed frames waiting for a recovery point
    gap: Vec<(u64, f64)>,
    last_frame: Option<u64>,
    last_ts: Option<f64>,
}

impl TrajectoryTracker {
    pub fn new(config: TrackerConfig, mapper: Option<LaneMapper>) -> Self {
        Self {
            predictor: Predictor::new(config.process_noise, config.measurement_noise),
            trajectory: Trajectory::with_capacity(config.max_points),
            config,
            mapper,
            state: TrackState::Searching,
            gap: Vec::new(),
            last_frame: None,
            last_ts: None,
        }
    }

    #[inline]
    pub fn state(&self) -> TrackState {
        self.state
    }

    #[inline]
    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }

    #[inline]
    pub fn mapper(&self) -> Option<&LaneMapper> {
        self.mapper.as_ref()
    }

    /// Back to `Searching` with an empty trajectory.
    pub fn reset(&mut self) {
        self.state = TrackState::Searching;
        self.predictor.reset();
        self.trajectory.clear();
        self.gap.clear();
        self.last_ts = None;
    }

    /// What the detector should favour on a frame at `timestamp`.
    pub fn prior(&self, timestamp: f64) -> Prior {
        if !self.state.is_active() {
            return Prior::default();
        }

        let previous = self
            .trajectory
            .iter()
            .rev()
            .find(|p| !p.interpolated)
            .map(|p| na::Point2::new(p.x, p.y));

        let dt = self.last_ts.map(|t| (timestamp - t) as f32).unwrap_or(0.0);

        Prior {
            previous,
            predicted: self.predictor.peek(dt),
        }
    }

    /// A frame that produced no detection, e.g. one the runtime dropped.
    pub fn miss(
        &mut self,
        frame_index: u64,
        timestamp: f64,
        dims: (u32, u32),
    ) -> Result<Option<FinishedShot>, Error> {
        self.update(&BallDetection::not_found(frame_index, timestamp), dims)
    }

    pub fn update(
        &mut self,
        det: &BallDetection,
        dims: (u32, u32),
    ) -> Result<Option<FinishedShot>, Error> {
        if let Some(last) = self.last_frame {
            if det.frame_index <= last {
                return Err(Error::OutOfOrder {
                    last,
                    got: det.frame_index,
                });
            }
        }
        self.last_frame = Some(det.frame_index);

        match self.state {
            TrackState::Lost | TrackState::Completed => Ok(None),
            TrackState::Searching => {
                let center = match det.center() {
                    Some(c) if det.confidence >= self.config.start_confidence => c,
                    _ => return Ok(None),
                };

                // a ball first seen at the pin end is the tail of a finished shot
                if self.past_completion(center) {
                    return Ok(None);
                }

                self.start(det, center, dims)?;
                Ok(None)
            }
            TrackState::Tracking | TrackState::Occluded(_) => self.follow(det, dims),
        }
    }

    fn start(
        &mut self,
        det: &BallDetection,
        center: na::Point2<f32>,
        dims: (u32, u32),
    ) -> Result<(), Error> {
        self.predictor.reset();
        self.predictor.update(center);
        self.last_ts = Some(det.timestamp);

        let point = self.make_point(det.frame_index, det.timestamp, center, det.confidence, dims);
        self.trajectory.push(point)?;
        self.transition(TrackState::Tracking);

        Ok(())
    }

    fn follow(
        &mut self,
        det: &BallDetection,
        dims: (u32, u32),
    ) -> Result<Option<FinishedShot>, Error> {
        let dt = self
            .last_ts
            .map(|t| (det.timestamp - t) as f32)
            .unwrap_or(0.0);
        self.predictor.predict(dt);
        self.last_ts = Some(det.timestamp);

        let center = det
            .center()
            .filter(|_| det.confidence >= self.config.continue_confidence);

        let center = match center {
            Some(c) => c,
            None => {
                let misses = match self.state {
                    TrackState::Occluded(n) => n + 1,
                    _ => 1,
                };

                if misses > self.config.max_occluded_frames {
                    self.transition(TrackState::Lost);
                    return Ok(Some(self.finish(ShotEnd::Lost)));
                }

                self.gap.push((det.frame_index, det.timestamp));
                self.transition(TrackState::Occluded(misses));
                return Ok(None);
            }
        };

        self.predictor.update(center);
        let smoothed = self.predictor.position().unwrap_or(center);
        let point = self.make_point(det.frame_index, det.timestamp, smoothed, det.confidence, dims);

        self.fill_gap(&point, dims)?;
        self.trajectory.push(point)?;
        self.transition(TrackState::Tracking);

        Ok(self.check_completion())
    }

    /// Linear fill between the last stored point and `recovery`.
    fn fill_gap(&mut self, recovery: &TrajectoryPoint, dims: (u32, u32)) -> Result<(), Error> {
        if self.gap.is_empty() {
            return Ok(());
        }

        let from = match self.trajectory.last() {
            Some(p) => *p,
            None => {
                self.gap.clear();
                return Ok(());
            }
        };

        let gap = std::mem::take(&mut self.gap);
        let span = recovery.timestamp - from.timestamp;
        let count = gap.len() as f64 + 1.0;
        let confidence =
            from.confidence.min(recovery.confidence) * self.config.interpolated_confidence_factor;

        for (i, (frame_index, timestamp)) in gap.into_iter().enumerate() {
            let t = if span > 0.0 {
                ((timestamp - from.timestamp) / span).clamp(0.0, 1.0) as f32
            } else {
                ((i as f64 + 1.0) / count) as f32
            };

            let at = na::Point2::new(
                from.x + (recovery.x - from.x) * t,
                from.y + (recovery.y - from.y) * t,
            );

            let mut point = self.make_point(frame_index, timestamp, at, confidence, dims);
            point.interpolated = true;
            point.vx = recovery.vx;
            point.vy = recovery.vy;
            point.speed = recovery.speed;

            self.trajectory.push(point)?;
        }

        Ok(())
    }

    fn past_completion(&self, at: na::Point2<f32>) -> bool {
        self.mapper.as_ref().map_or(false, |m| {
            m.map(at.x as f64, at.y as f64).distance_ft >= self.config.completion_distance_ft
        })
    }

    fn check_completion(&mut self) -> Option<FinishedShot> {
        let reached = self
            .trajectory
            .last()
            .and_then(|p| p.distance_ft)
            .map_or(false, |d| d >= self.config.completion_distance_ft);

        if !reached {
            return None;
        }

        self.transition(TrackState::Completed);
        Some(self.finish(ShotEnd::ReachedPins))
    }

    /// Cancels the shot, keeping whatever was tracked.
    pub fn stop(&mut self) -> Option<FinishedShot> {
        if !self.state.is_active() || self.trajectory.is_empty() {
            return None;
        }

        self.transition(TrackState::Lost);
        Some(self.finish(ShotEnd::Stopped))
    }

    fn finish(&mut self, end: ShotEnd) -> FinishedShot {
        // misses after the last detection have nothing to interpolate towards
        self.gap.clear();

        let points = self.trajectory.take();
        info!(?end, points = points.len(), "shot finished");

        FinishedShot { points, end }
    }

    fn transition(&mut self, next: TrackState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "tracker state");
            self.state = next;
        }
    }

    fn make_point(
        &self,
        frame_index: u64,
        timestamp: f64,
        at: na::Point2<f32>,
        confidence: f32,
        dims: (u32, u32),
    ) -> TrajectoryPoint {
        let (w, h) = (dims.0.max(1) as f32, dims.1.max(1) as f32);
        let lane = self.mapper.as_ref().map(|m| m.map(at.x as f64, at.y as f64));
        let velocity = self.predictor.velocity();

        TrajectoryPoint {
            frame_index,
            timestamp,
            x: at.x,
            y: at.y,
            norm_x: at.x / w,
            norm_y: at.y / h,
            board: lane.map(|l| l.board),
            distance_ft: lane.map(|l| l.distance_ft),
            confidence: confidence.clamp(0.0, 1.0),
            interpolated: false,
            vx: velocity.map(|v| v.x),
            vy: velocity.map(|v| v.y),
            speed: velocity.map(|v| v.norm()),
        }
    }
}
