//! Pipeline tuning, loaded from TOML. Every section and field is optional.

use serde_derive::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Error;
use crate::metrics::Handedness;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub detector: DetectorConfig,
    pub marker: MarkerConfig,
    pub tracker: TrackerConfig,
    pub rotation: RotationConfig,
    pub metrics: MetricsConfig,
    pub runtime: RuntimeConfig,
}

impl PipelineConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, Error> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values no stage can work with.
    pub fn validate(&self) -> Result<(), Error> {
        let d = &self.detector;
        check(
            d.min_area_fraction > 0.0 && d.min_area_fraction < d.max_area_fraction,
            "detector area fractions must satisfy 0 < min < max",
        )?;
        check(
            (0.0..=1.0).contains(&d.min_circularity),
            "detector.min_circularity must be in [0, 1]",
        )?;
        check(
            d.circularity_weight >= 0.0 && d.size_weight >= 0.0 && d.proximity_weight >= 0.0,
            "detector weights must not be negative",
        )?;

        let t = &self.tracker;
        check(
            (0.0..=1.0).contains(&t.start_confidence) && (0.0..=1.0).contains(&t.continue_confidence),
            "tracker confidences must be in [0, 1]",
        )?;
        check(t.max_points >= 2, "tracker.max_points must be at least 2")?;
        check(
            (0.0..=1.0).contains(&t.interpolated_confidence_factor),
            "tracker.interpolated_confidence_factor must be in [0, 1]",
        )?;
        check(
            t.process_noise > 0.0 && t.measurement_noise > 0.0,
            "tracker noise terms must be positive",
        )?;
        check(
            t.completion_distance_ft > 0.0,
            "tracker.completion_distance_ft must be positive",
        )?;

        check(
            self.rotation.max_step_deg > 0.0 && self.rotation.max_step_deg <= 180.0,
            "rotation.max_step_deg must be in (0, 180]",
        )?;

        let m = &self.metrics;
        check(m.board_width_in > 0.0, "metrics.board_width_in must be positive")?;
        check(
            m.speed_window_ft > 0.0 && m.entry_window_ft > 0.0,
            "metrics windows must be positive",
        )?;
        let weights = [m.pocket_weight, m.angle_weight, m.speed_weight, m.rev_weight];
        check(
            weights.iter().all(|w| *w >= 0.0) && weights.iter().sum::<f64>() > 0.0,
            "metrics weights must be non-negative with a positive sum",
        )?;

        let r = &self.runtime;
        check(
            r.frame_budget_ms > 0.0 && r.frame_budget_ms <= MAX_FRAME_BUDGET_MS,
            "runtime.frame_budget_ms must be in (0, 60000]",
        )?;
        check(r.publish_hz >= 0.0, "runtime.publish_hz must not be negative")?;

        Ok(())
    }
}

/// One minute; anything longer is not a per-frame budget.
const MAX_FRAME_BUDGET_MS: f64 = 60_000.0;

fn check(ok: bool, msg: &str) -> Result<(), Error> {
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidConfig(msg.to_string()))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DetectorConfig {
    /// Opening radius in pixels, removes speckle.
    pub open_radius: usize,
    /// Closing radius in pixels, fills small holes.
    pub close_radius: usize,
    /// Blob area bounds as fractions of the frame area.
    pub min_area_fraction: f32,
    pub max_area_fraction: f32,
    pub min_circularity: f32,
    /// Expected ball area as a fraction of the frame area.
    pub ideal_area_fraction: f32,
    /// Lower bound of the Gaussian width used for the prediction score.
    pub proximity_sigma_px: f32,
    pub circularity_weight: f32,
    pub size_weight: f32,
    pub proximity_weight: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            open_radius: 2,
            close_radius: 2,
            min_area_fraction: 0.001,
            max_area_fraction: 0.05,
            min_circularity: 0.65,
            ideal_area_fraction: 0.005,
            proximity_sigma_px: 20.0,
            circularity_weight: 0.4,
            size_weight: 0.3,
            proximity_weight: 0.3,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct MarkerConfig {
    pub padding_px: f32,
    pub morph_radius: usize,
    pub min_area_fraction: f32,
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            padding_px: 2.0,
            morph_radius: 1,
            min_area_fraction: 0.0001,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TrackerConfig {
    pub start_confidence: f32,
    pub continue_confidence: f32,
    /// Consecutive misses tolerated before the shot is lost.
    pub max_occluded_frames: u32,
    /// Distance past the foul line that ends the shot.
    pub completion_distance_ft: f64,
    /// Trajectory length cap; reaching it drops every second point.
    pub max_points: usize,
    /// Confidence multiplier for gap-filled points.
    pub interpolated_confidence_factor: f32,
    /// Acceleration noise density of the constant-velocity model, px²/s⁴.
    pub process_noise: f32,
    /// Detector position noise, px².
    pub measurement_noise: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            start_confidence: 0.6,
            continue_confidence: 0.4,
            max_occluded_frames: 10,
            completion_distance_ft: 55.0,
            max_points: 2048,
            interpolated_confidence_factor: 0.5,
            process_noise: 5000.0,
            measurement_noise: 4.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RotationConfig {
    /// Largest believable marker step between two samples, degrees.
    pub max_step_deg: f64,
    /// Rejected samples in a row before re-anchoring on the newest one.
    pub max_consecutive_rejects: u32,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            max_step_deg: 90.0,
            max_consecutive_rejects: 3,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    pub handedness: Handedness,
    pub speed_window_ft: f64,
    pub entry_window_ft: f64,
    pub pin_deck_distance_ft: f64,
    pub arrows_distance_ft: f64,
    /// Entry angle and pocket need the ball tracked at least this far.
    pub min_entry_distance_ft: f64,
    pub board_width_in: f64,
    /// Hook-back in boards that confirms a breakpoint.
    pub breakpoint_min_hook_boards: f64,
    pub pocket_weight: f64,
    pub angle_weight: f64,
    pub speed_weight: f64,
    pub rev_weight: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            handedness: Handedness::Right,
            speed_window_ft: 10.0,
            entry_window_ft: 5.0,
            pin_deck_distance_ft: 60.0,
            arrows_distance_ft: 15.0,
            min_entry_distance_ft: 40.0,
            board_width_in: 41.5 / 39.0,
            breakpoint_min_hook_boards: 1.0,
            pocket_weight: 0.4,
            angle_weight: 0.3,
            speed_weight: 0.15,
            rev_weight: 0.15,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub workers: usize,
    /// Frames allowed to wait for a worker; more are dropped.
    pub queue_depth: usize,
    /// Per-frame analysis budget in milliseconds.
    pub frame_budget_ms: f64,
    pub drop_late_frames: bool,
    /// Live feed rate limit.
    pub publish_hz: f64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_depth: 4,
            frame_budget_ms: 1000.0 / 120.0,
            drop_late_frames: true,
            publish_hz: 30.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = PipelineConfig::from_toml("").unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn partial_sections_override() {
        let config = PipelineConfig::from_toml(
            r#"
            [tracker]
            max_occluded_frames = 4

            [metrics]
            handedness = "left"

            [runtime]
            workers = 6
            "#,
        )
        .unwrap();

        assert_eq!(config.tracker.max_occluded_frames, 4);
        assert_eq!(config.tracker.start_confidence, 0.6);
        assert_eq!(config.metrics.handedness, Handedness::Left);
        assert_eq!(config.runtime.workers, 6);
        assert_eq!(config.detector, DetectorConfig::default());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(PipelineConfig::default().validate().is_ok());

        assert!(matches!(
            PipelineConfig::from_toml("[tracker]\nstart_confidence = 1.5"),
            Err(Error::InvalidConfig(_))
        ));

        let mut config = PipelineConfig::default();
        config.detector.max_area_fraction = config.detector.min_area_fraction;
        assert!(config.validate().is_err());

        for budget in [0.0, -1.0, f64::NAN, f64::INFINITY, 1e30] {
            let mut config = PipelineConfig::default();
            config.runtime.frame_budget_ms = budget;
            assert!(config.validate().is_err(), "budget {}", budget);
        }

        let mut config = PipelineConfig::default();
        config.metrics.pocket_weight = 0.0;
        config.metrics.angle_weight = 0.0;
        config.metrics.speed_weight = 0.0;
        config.metrics.rev_weight = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(matches!(
            PipelineConfig::from_toml("[tracker]\nmax_occluded_frames = \"ten\""),
            Err(Error::ConfigParse(_))
        ));
    }
}
