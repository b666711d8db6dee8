//! The sequential half of the pipeline. Frame outcomes arrive here in order;
//! candidate selection, tracking, spin counting and live publishing happen
//! on one thread, and every finished shot is turned into a [`ShotReport`].

use serde_derive::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::calibration::{CalibrationProfile, LaneMapper};
use crate::config::PipelineConfig;
use crate::detection::BallDetection;
use crate::detector::BallDetector;
use crate::error::Error;
use crate::metrics::{MetricsEngine, ShotMetrics};
use crate::pool::FrameOutcome;
use crate::publish::{LiveFeed, ThrottledPublisher};
use crate::rotation::{RotationCounter, SpinDirection};
use crate::tracker::{FinishedShot, ShotEnd, TrackState, TrajectoryTracker};
use crate::trajectory::TrajectoryPoint;

/// What a live display gets, at most `publish_hz` times a second.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LiveUpdate {
    pub detection: BallDetection,
    pub state: TrackState,
    /// The trajectory point this frame produced, if the tracker took it.
    pub point: Option<TrajectoryPoint>,
    pub rpm: Option<f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ShotReport {
    pub end: ShotEnd,
    pub trajectory: Vec<TrajectoryPoint>,
    pub metrics: ShotMetrics,
    /// Whole-shot marker rotations, when the marker was seen twice or more.
    pub rotations: Option<f64>,
    pub spin: Option<SpinDirection>,
    /// Frames fed since the previous report, dropped ones included.
    pub frames: u64,
    pub dropped_frames: u64,
}

pub struct ShotSession {
    detector: BallDetector,
    tracker: TrajectoryTracker,
    rotation: RotationCounter,
    metrics: MetricsEngine,
    publisher: ThrottledPublisher<LiveUpdate>,
    frames: u64,
    dropped: u64,
}

impl ShotSession {
    /// Validates the configuration and the calibration before any frame.
    pub fn new(
        config: &PipelineConfig,
        calibration: Option<CalibrationProfile>,
    ) -> Result<Self, Error> {
        config.validate()?;

        let mapper = calibration.map(LaneMapper::new).transpose()?;
        if let Some(m) = &mapper {
            debug!(model = ?m.model(), "lane calibration loaded");
        }

        Ok(Self {
            detector: BallDetector::new(config.detector.clone()),
            tracker: TrajectoryTracker::new(config.tracker.clone(), mapper),
            rotation: RotationCounter::new(config.rotation.clone()),
            metrics: MetricsEngine::new(config.metrics.clone()),
            publisher: ThrottledPublisher::new(config.runtime.publish_hz),
            frames: 0,
            dropped: 0,
        })
    }

    #[inline]
    pub fn state(&self) -> TrackState {
        self.tracker.state()
    }

    #[inline]
    pub fn tracker(&self) -> &TrajectoryTracker {
        &self.tracker
    }

    /// Spin estimate of the shot in progress.
    #[inline]
    pub fn rpm(&self) -> Option<f64> {
        self.rotation.rpm()
    }

    pub fn live_feed(&self) -> LiveFeed<LiveUpdate> {
        self.publisher.feed()
    }

    /// One frame from the detection pool. A dropped frame is a miss.
    pub fn feed(&mut self, outcome: &FrameOutcome) -> Result<Option<ShotReport>, Error> {
        match outcome {
            FrameOutcome::Analyzed(analysis) => {
                let prior = self.tracker.prior(analysis.timestamp);
                let det = self.detector.select(
                    &analysis.candidates,
                    &prior,
                    analysis.frame_area(),
                    analysis.sequence,
                    analysis.timestamp,
                );

                self.feed_detection(&det, analysis.dims())
            }
            FrameOutcome::Dropped {
                sequence,
                timestamp,
                dims,
                ..
            } => {
                self.dropped += 1;
                self.feed_detection(&BallDetection::not_found(*sequence, *timestamp), *dims)
            }
        }
    }

    /// One already selected detection, e.g. from a recorded log.
    pub fn feed_detection(
        &mut self,
        det: &BallDetection,
        dims: (u32, u32),
    ) -> Result<Option<ShotReport>, Error> {
        self.frames += 1;

        let finished = self.tracker.update(det, dims)?;

        let point = match &finished {
            Some(shot) => shot.points.last(),
            None => self.tracker.trajectory().last(),
        }
        .filter(|p| p.frame_index == det.frame_index && !p.interpolated)
        .copied();

        // spin only counts on frames the tracker accepted as the ball
        if let (Some(_), Some(marker)) = (&point, &det.marker) {
            self.rotation.push(marker.angle as f64, det.timestamp);
        }

        let update = LiveUpdate {
            detection: *det,
            state: self.tracker.state(),
            point,
            rpm: self.rotation.rpm(),
        };

        match finished {
            Some(shot) => {
                self.publisher.force(update, det.timestamp);
                Ok(Some(self.finalize(shot)))
            }
            None => {
                self.publisher.offer(update, det.timestamp);
                Ok(None)
            }
        }
    }

    /// Ends the shot in progress, keeping whatever was tracked. The live feed
    /// is brought up to date with the newest frame and the idle state.
    pub fn stop(&mut self) -> Option<ShotReport> {
        let report = self.tracker.stop().map(|shot| self.finalize(shot));

        let state = self.tracker.state();
        let newest = match self.publisher.take_pending() {
            Some(update) => Some(update),
            None => self
                .publisher
                .feed()
                .latest()
                .map(|(_, update)| update)
                .filter(|update| update.state != state),
        };

        if let Some(mut update) = newest {
            update.state = state;
            update.point = None;
            update.rpm = self.rotation.rpm();

            let timestamp = update.detection.timestamp;
            self.publisher.force(update, timestamp);
        }

        report
    }

    fn finalize(&mut self, shot: FinishedShot) -> ShotReport {
        let rpm = self.rotation.rpm();
        let metrics = self.metrics.compute(&shot.points, rpm);

        let report = ShotReport {
            end: shot.end,
            trajectory: shot.points,
            metrics,
            rotations: (self.rotation.samples() >= 2).then(|| self.rotation.rotations()),
            spin: self.rotation.direction(),
            frames: self.frames,
            dropped_frames: self.dropped,
        };

        info!(
            end = ?report.end,
            points = report.trajectory.len(),
            frames = report.frames,
            dropped = report.dropped_frames,
            speed_mph = ?report.metrics.impact_speed_mph,
            entry_deg = ?report.metrics.entry_angle_deg,
            rpm = ?report.metrics.rev_rate_rpm,
            "shot report"
        );

        // ready for the next ball
        self.tracker.reset();
        self.rotation.reset();
        self.frames = 0;
        self.dropped = 0;

        report
    }
}
