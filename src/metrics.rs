//! Shot physics from a calibrated trajectory.
//!
//! Speeds are in mph, angles in degrees, positions in boards and feet past
//! the foul line. Every figure is optional: without a calibration nothing is
//! computed, and a shot that never reached the pin end has no entry figures.
//!
//! The predicted leave is a fixed rule table over pocket offset, entry angle,
//! speed and rev rate. It is a heuristic guess, not an observation of the
//! pins.

use serde_derive::{Deserialize, Serialize};

use crate::config::MetricsConfig;
use crate::math;
use crate::trajectory::TrajectoryPoint;

const FPS_TO_MPH: f64 = 0.6818;

const IDEAL_ANGLE_DEG: f64 = 6.0;
const ANGLE_FALLOFF_DEG: f64 = 4.0;
const POCKET_FALLOFF_BOARDS: f64 = 3.0;
const SPEED_BAND_MPH: (f64, f64) = (16.0, 18.0);
const SPEED_FALLOFF_MPH: f64 = 3.0;
const REV_BAND_RPM: (f64, f64) = (300.0, 450.0);
const REV_FALLOFF_RPM: f64 = 150.0;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Handedness {
    Right,
    Left,
}

impl Handedness {
    #[inline]
    pub fn pocket_board(self) -> f64 {
        match self {
            Handedness::Right => 17.5,
            Handedness::Left => 22.5,
        }
    }

    /// +1 when a larger board number is closer to the head pin.
    #[inline]
    fn toward_head_pin(self) -> f64 {
        match self {
            Handedness::Right => 1.0,
            Handedness::Left => -1.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RevCategory {
    Stroker,
    Tweener,
    Cranker,
}

impl RevCategory {
    pub fn from_rpm(rpm: f64) -> Self {
        if rpm < 300.0 {
            RevCategory::Stroker
        } else if rpm <= 400.0 {
            RevCategory::Tweener
        } else {
            RevCategory::Cranker
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PinLeave {
    Strike,
    TenPin,
    SevenPin,
    FivePin,
    Split,
    Brooklyn,
    Washout,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Breakpoint {
    pub board: f64,
    pub distance_ft: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct ShotMetrics {
    pub launch_speed_mph: Option<f64>,
    pub impact_speed_mph: Option<f64>,
    pub entry_angle_deg: Option<f64>,
    pub rev_rate_rpm: Option<f64>,
    pub rev_category: Option<RevCategory>,
    pub pocket_board: Option<f64>,
    pub pocket_offset: Option<f64>,
    pub strike_probability: Option<f64>,
    /// Heuristic, see the module docs.
    pub predicted_leave: Option<PinLeave>,
    pub launch_board: Option<f64>,
    pub arrows_board: Option<f64>,
    pub breakpoint: Option<Breakpoint>,
}

#[derive(Debug, Clone, Copy)]
struct LanePoint {
    t: f64,
    board: f64,
    ft: f64,
}

/// Full credit inside `[lo, hi]`, linear decay to 0 at `falloff` outside.
fn band_score(value: f64, (lo, hi): (f64, f64), falloff: f64) -> f64 {
    let outside = if value < lo {
        lo - value
    } else if value > hi {
        value - hi
    } else {
        0.0
    };

    (1.0 - outside / falloff).clamp(0.0, 1.0)
}

pub fn pocket_score(offset: f64) -> f64 {
    (1.0 - offset.abs() / POCKET_FALLOFF_BOARDS).clamp(0.0, 1.0)
}

pub fn angle_score(angle: f64) -> f64 {
    band_score(angle, (IDEAL_ANGLE_DEG, IDEAL_ANGLE_DEG), ANGLE_FALLOFF_DEG)
}

pub fn speed_score(mph: f64) -> f64 {
    band_score(mph, SPEED_BAND_MPH, SPEED_FALLOFF_MPH)
}

pub fn rev_score(rpm: f64) -> f64 {
    band_score(rpm, REV_BAND_RPM, REV_FALLOFF_RPM)
}

pub struct MetricsEngine {
    config: MetricsConfig,
}

impl MetricsEngine {
    pub fn new(config: MetricsConfig) -> Self {
        Self { config }
    }

    #[inline]
    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    #[inline]
    fn board_width_ft(&self) -> f64 {
        self.config.board_width_in / 12.0
    }

    pub fn compute(&self, points: &[TrajectoryPoint], rev_rpm: Option<f64>) -> ShotMetrics {
        let lane: Vec<LanePoint> = points
            .iter()
            .filter_map(|p| {
                let (board, ft) = p.lane()?;
                Some(LanePoint {
                    t: p.timestamp,
                    board,
                    ft,
                })
            })
            .collect();

        if lane.is_empty() {
            return ShotMetrics::default();
        }

        let rev_rate_rpm = rev_rpm.filter(|r| r.is_finite() && *r >= 0.0);
        let impact_speed_mph = self.window_speed(&lane, false);
        let entry = self.entry_fit(&lane);

        let mut metrics = ShotMetrics {
            launch_speed_mph: self.window_speed(&lane, true),
            impact_speed_mph,
            rev_rate_rpm,
            rev_category: rev_rate_rpm.map(RevCategory::from_rpm),
            launch_board: Some(lane[0].board),
            arrows_board: self.arrows_board(&lane),
            breakpoint: self.breakpoint(&lane),
            ..Default::default()
        };

        if let Some((slope, intercept)) = entry {
            let angle = (slope.abs() * self.board_width_ft()).atan().to_degrees();
            let pocket = slope * self.config.pin_deck_distance_ft + intercept;
            let offset = pocket - self.config.handedness.pocket_board();

            metrics.entry_angle_deg = Some(angle);
            metrics.pocket_board = Some(pocket);
            metrics.pocket_offset = Some(offset);
            metrics.strike_probability =
                Some(self.strike_probability(offset, angle, impact_speed_mph, rev_rate_rpm));
            metrics.predicted_leave =
                Some(self.predict_leave(offset, angle, impact_speed_mph, rev_rate_rpm));
        }

        metrics
    }

    /// Straight-line speed over the first (launch) or last (impact) window.
    fn window_speed(&self, lane: &[LanePoint], launch: bool) -> Option<f64> {
        let (lo, hi) = lane
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
                (lo.min(p.ft), hi.max(p.ft))
            });

        let window = self.config.speed_window_ft;
        let selected: Vec<&LanePoint> = lane
            .iter()
            .filter(|p| {
                if launch {
                    p.ft <= lo + window
                } else {
                    p.ft >= hi - window
                }
            })
            .collect();

        let (a, b) = if selected.len() >= 2 {
            (selected[0], selected[selected.len() - 1])
        } else {
            (lane.first()?, lane.last()?)
        };

        let dt = b.t - a.t;
        if !(dt > 0.0) {
            return None;
        }

        let lateral = (b.board - a.board) * self.board_width_ft();
        let forward = b.ft - a.ft;

        Some(lateral.hypot(forward) / dt * FPS_TO_MPH)
    }

    /// Board as a line in feet, `(slope, intercept)`, over the entry window.
    fn entry_fit(&self, lane: &[LanePoint]) -> Option<(f64, f64)> {
        let hi = lane.iter().map(|p| p.ft).fold(f64::NEG_INFINITY, f64::max);
        if hi < self.config.min_entry_distance_ft {
            return None;
        }

        let window: Vec<&LanePoint> = lane
            .iter()
            .filter(|p| p.ft >= hi - self.config.entry_window_ft)
            .collect();

        let window = if window.len() >= 2 {
            window
        } else {
            lane.iter().skip(lane.len().saturating_sub(2)).collect()
        };

        if window.len() == 2 {
            let (a, b) = (window[0], window[1]);
            let forward = b.ft - a.ft;
            if forward.abs() < 1e-9 {
                return None;
            }

            let slope = (b.board - a.board) / forward;
            return Some((slope, a.board - slope * a.ft));
        }

        let ft: Vec<f64> = window.iter().map(|p| p.ft).collect();
        let boards: Vec<f64> = window.iter().map(|p| p.board).collect();
        let fit = math::linear_ls(&ft, &boards)?;

        Some((fit[0], fit[1]))
    }

    fn arrows_board(&self, lane: &[LanePoint]) -> Option<f64> {
        let ft: Vec<f64> = lane.iter().map(|p| p.ft).collect();
        let boards: Vec<f64> = lane.iter().map(|p| p.board).collect();

        math::interpolate_at(&ft, &boards, self.config.arrows_distance_ft)
    }

    /// Furthest board towards the outside, if the ball hooks back from it.
    fn breakpoint(&self, lane: &[LanePoint]) -> Option<Breakpoint> {
        // outside is away from the head pin
        let outward = -self.config.handedness.toward_head_pin();
        let hook = self.config.breakpoint_min_hook_boards;

        let (idx, extreme) = lane
            .iter()
            .enumerate()
            .max_by(|a, b| (a.1.board * outward).total_cmp(&(b.1.board * outward)))?;

        let hooked = lane[idx + 1..]
            .iter()
            .any(|p| (extreme.board - p.board) * outward >= hook);

        if !hooked {
            return None;
        }

        Some(Breakpoint {
            board: extreme.board,
            distance_ft: extreme.ft,
        })
    }

    /// Weighted score, renormalized over the factors that are available.
    pub fn strike_probability(
        &self,
        offset: f64,
        angle: f64,
        speed_mph: Option<f64>,
        rev_rpm: Option<f64>,
    ) -> f64 {
        let c = &self.config;
        let terms = [
            Some((c.pocket_weight, pocket_score(offset))),
            Some((c.angle_weight, angle_score(angle))),
            speed_mph.map(|s| (c.speed_weight, speed_score(s))),
            rev_rpm.map(|r| (c.rev_weight, rev_score(r))),
        ];

        let (weighted, total) = terms
            .iter()
            .flatten()
            .fold((0.0, 0.0), |(acc, w), &(weight, score)| {
                (acc + weight * score, w + weight)
            });

        if total <= 0.0 {
            return 0.0;
        }

        (weighted / total).clamp(0.0, 1.0)
    }

    /// First matching rule wins; see the module docs.
    pub fn predict_leave(
        &self,
        offset: f64,
        angle: f64,
        speed_mph: Option<f64>,
        rev_rpm: Option<f64>,
    ) -> PinLeave {
        let handedness = self.config.handedness;
        let high = offset * handedness.toward_head_pin();
        let corner = match handedness {
            Handedness::Right => PinLeave::TenPin,
            Handedness::Left => PinLeave::SevenPin,
        };

        if high > 3.0 {
            PinLeave::Brooklyn
        } else if high < -3.0 {
            PinLeave::Washout
        } else if angle > 7.0 || high > 1.5 {
            PinLeave::Split
        } else if angle < 4.0 && high >= 0.0 {
            corner
        } else if high < -1.0 {
            corner
        } else if speed_mph.map_or(false, |s| s < 14.0) || rev_rpm.map_or(false, |r| r < 200.0) {
            PinLeave::FivePin
        } else {
            PinLeave::Strike
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(i: usize, t: f64, board: Option<f64>, ft: Option<f64>) -> TrajectoryPoint {
        TrajectoryPoint {
            frame_index: i as u64,
            timestamp: t,
            x: 0.0,
            y: 0.0,
            norm_x: 0.0,
            norm_y: 0.0,
            board,
            distance_ft: ft,
            confidence: 1.0,
            interpolated: false,
            vx: None,
            vy: None,
            speed: None,
        }
    }

    /// Lane path sampled `n` times over `duration` seconds.
    fn path(n: usize, duration: f64, f: impl Fn(f64) -> (f64, f64)) -> Vec<TrajectoryPoint> {
        (0..n)
            .map(|i| {
                let u = i as f64 / (n - 1) as f64;
                let (board, ft) = f(u);
                point(i, u * duration, Some(board), Some(ft))
            })
            .collect()
    }

    fn engine() -> MetricsEngine {
        MetricsEngine::new(MetricsConfig::default())
    }

    #[test]
    fn uncalibrated_gives_nothing() {
        let points: Vec<_> = (0..10).map(|i| point(i, i as f64 * 0.1, None, None)).collect();
        assert_eq!(engine().compute(&points, Some(350.0)), ShotMetrics::default());
        assert_eq!(engine().compute(&[], None), ShotMetrics::default());
    }

    #[test]
    fn straight_shot() {
        // 60 ft in 3.75 s is 16 ft/s
        let points = path(61, 3.75, |u| (17.5, 60.0 * u));
        let m = engine().compute(&points, Some(350.0));

        let expected = 16.0 * FPS_TO_MPH;
        assert!((m.launch_speed_mph.unwrap() - expected).abs() < 1e-9);
        assert!((m.impact_speed_mph.unwrap() - expected).abs() < 1e-9);
        assert!(m.entry_angle_deg.unwrap().abs() < 1e-9);
        assert!((m.pocket_board.unwrap() - 17.5).abs() < 1e-9);
        assert!(m.pocket_offset.unwrap().abs() < 1e-9);
        assert_eq!(m.rev_category, Some(RevCategory::Tweener));
        assert_eq!(m.launch_board, Some(17.5));
        assert_eq!(m.arrows_board, Some(17.5));
        assert_eq!(m.breakpoint, None);
    }

    #[test]
    fn entry_angle_from_lateral_drift() {
        // 1 board every 2 ft over the last stretch
        let points = path(41, 4.0, |u| {
            let ft = 60.0 * u;
            let board = if ft < 40.0 { 30.0 } else { 30.0 - (ft - 40.0) / 2.0 };
            (board, ft)
        });

        let m = engine().compute(&points, None);
        let bw = MetricsConfig::default().board_width_in / 12.0;
        let expected = (0.5 * bw).atan().to_degrees();
        assert!((m.entry_angle_deg.unwrap() - expected).abs() < 1e-6);
        assert!((m.pocket_board.unwrap() - 20.0).abs() < 1e-6);
        assert!((m.pocket_offset.unwrap() - 2.5).abs() < 1e-6);
        assert_eq!(m.rev_rate_rpm, None);
        assert_eq!(m.rev_category, None);
    }

    #[test]
    fn short_shot_has_no_entry() {
        let points = path(20, 1.5, |u| (20.0, 30.0 * u));
        let m = engine().compute(&points, Some(300.0));

        assert!(m.impact_speed_mph.is_some());
        assert_eq!(m.entry_angle_deg, None);
        assert_eq!(m.pocket_board, None);
        assert_eq!(m.strike_probability, None);
        assert_eq!(m.predicted_leave, None);
    }

    #[test]
    fn speed_falls_back_to_whole_trajectory() {
        // two samples only, 20 ft apart
        let points = vec![
            point(0, 0.0, Some(20.0), Some(0.0)),
            point(1, 1.0, Some(20.0), Some(20.0)),
        ];
        let m = engine().compute(&points, None);
        assert!((m.impact_speed_mph.unwrap() - 20.0 * FPS_TO_MPH).abs() < 1e-9);
    }

    #[test]
    fn zero_duration_has_no_speed() {
        let points = vec![
            point(0, 1.0, Some(20.0), Some(0.0)),
            point(1, 1.0, Some(20.0), Some(5.0)),
        ];
        assert_eq!(engine().compute(&points, None).impact_speed_mph, None);
    }

    #[test]
    fn hook_has_breakpoint() {
        // right-handed: out to board 8 at 40 ft, then back to the pocket
        let points = path(61, 3.0, |u| {
            let ft = 60.0 * u;
            let board = if ft <= 40.0 {
                12.0 - ft / 10.0
            } else {
                8.0 + (ft - 40.0) * 9.5 / 20.0
            };
            (board, ft)
        });

        let m = engine().compute(&points, None);
        let bp = m.breakpoint.unwrap();
        assert!((bp.board - 8.0).abs() < 1e-9);
        assert!((bp.distance_ft - 40.0).abs() < 1e-9);
        assert!((m.arrows_board.unwrap() - 10.5).abs() < 1e-9);
        assert!(m.entry_angle_deg.unwrap() > 0.0);
        assert!((m.pocket_board.unwrap() - 17.5).abs() < 1e-6);
    }

    #[test]
    fn scores() {
        assert_eq!(pocket_score(0.0), 1.0);
        assert_eq!(pocket_score(-1.5), 0.5);
        assert_eq!(pocket_score(4.0), 0.0);

        assert_eq!(angle_score(6.0), 1.0);
        assert_eq!(angle_score(4.0), 0.5);
        assert_eq!(angle_score(11.0), 0.0);

        assert_eq!(speed_score(17.0), 1.0);
        assert!((speed_score(19.5) - 0.5).abs() < 1e-12);
        assert_eq!(speed_score(12.0), 0.0);

        assert_eq!(rev_score(400.0), 1.0);
        assert!((rev_score(225.0) - 0.5).abs() < 1e-12);
        assert_eq!(rev_score(700.0), 0.0);
    }

    #[test]
    fn strike_probability_drops_with_offset() {
        let e = engine();
        let mut prev = f64::INFINITY;

        for i in 0..=40 {
            let offset = i as f64 * 0.1;
            let p = e.strike_probability(offset, 6.0, Some(17.0), Some(350.0));
            assert!((0.0..=1.0).contains(&p));
            assert!(p <= prev, "offset {} gave {} after {}", offset, p, prev);
            prev = p;
        }

        assert_eq!(e.strike_probability(0.0, 6.0, Some(17.0), Some(350.0)), 1.0);
        assert!((e.strike_probability(3.5, 6.0, Some(17.0), Some(350.0)) - 0.6).abs() < 1e-12);
    }

    #[test]
    fn missing_factors_are_renormalized() {
        let e = engine();
        assert_eq!(e.strike_probability(0.0, 6.0, None, None), 1.0);

        // pocket 1.0 and angle 0.5 over weights 0.4 + 0.3
        let p = e.strike_probability(0.0, 4.0, None, None);
        assert!((p - (0.4 + 0.15) / 0.7).abs() < 1e-12);
    }

    #[test]
    fn leave_rules() {
        let rh = engine();
        assert_eq!(rh.predict_leave(0.0, 6.0, Some(17.0), Some(350.0)), PinLeave::Strike);
        assert_eq!(rh.predict_leave(0.5, 2.5, Some(17.0), Some(350.0)), PinLeave::TenPin);
        assert_eq!(rh.predict_leave(0.0, 8.0, Some(17.0), Some(350.0)), PinLeave::Split);
        assert_eq!(rh.predict_leave(3.5, 6.0, None, None), PinLeave::Brooklyn);
        assert_eq!(rh.predict_leave(-4.0, 6.0, None, None), PinLeave::Washout);
        assert_eq!(rh.predict_leave(0.0, 6.0, Some(12.0), None), PinLeave::FivePin);

        let lh = MetricsEngine::new(MetricsConfig {
            handedness: Handedness::Left,
            ..Default::default()
        });
        assert_eq!(lh.predict_leave(-0.5, 2.5, None, None), PinLeave::SevenPin);
        assert_eq!(lh.predict_leave(-3.5, 6.0, None, None), PinLeave::Brooklyn);
    }

    #[test]
    fn rev_categories() {
        assert_eq!(RevCategory::from_rpm(250.0), RevCategory::Stroker);
        assert_eq!(RevCategory::from_rpm(300.0), RevCategory::Tweener);
        assert_eq!(RevCategory::from_rpm(400.0), RevCategory::Tweener);
        assert_eq!(RevCategory::from_rpm(401.0), RevCategory::Cranker);
    }
}
