pub mod calibration;
pub mod color;
pub mod config;
pub mod contour;
pub mod detection;
pub mod detector;
pub mod error;
pub mod frame;
pub mod homography;
pub mod marker;
pub mod mask;
pub mod math;
pub mod metrics;
pub mod pipeline;
pub mod pool;
pub mod publish;
pub mod rotation;
pub mod session;
pub mod synthetic;
pub mod tracker;
pub mod trajectory;

mod predictor;

pub use calibration::{CalibrationProfile, LaneMapper};
pub use color::{BallProfile, Hsv, HsvTarget};
pub use config::PipelineConfig;
pub use detection::{BallCandidate, BallDetection};
pub use error::Error;
pub use frame::Frame;
pub use metrics::{Handedness, MetricsEngine, PinLeave, RevCategory, ShotMetrics};
pub use pipeline::{FrameAnalysis, FrameAnalyzer};
pub use pool::{DetectionPool, FrameOutcome};
pub use session::{LiveUpdate, ShotReport, ShotSession};
pub use tracker::{ShotEnd, TrackState, TrajectoryTracker};
pub use trajectory::{Trajectory, TrajectoryPoint};
