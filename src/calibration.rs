//! Pixel to lane mapping.
//!
//! Lane coordinates are `(board, feet)`: boards 1..=39 left to right as seen
//! by the camera, feet measured from the foul line towards the pins.

use nalgebra::Matrix3;
use serde_derive::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;
use crate::homography;

pub const FIRST_BOARD: f64 = 1.0;
pub const LAST_BOARD: f64 = 39.0;
pub const CENTER_BOARD: f64 = 20.0;
pub const ARROWS_DISTANCE_FT: f64 = 15.0;
pub const PIN_DECK_DISTANCE_FT: f64 = 60.0;

/// One known pixel with its lane position `[board, feet]`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ReferencePoint {
    pub pixel: [f64; 2],
    pub lane: [f64; 2],
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CalibrationProfile {
    pub foul_line_y: f64,
    #[serde(default)]
    pub arrows_y: Option<f64>,
    pub left_gutter_x: f64,
    pub right_gutter_x: f64,
    #[serde(default)]
    pub pin_deck_y: Option<f64>,
    /// Gutter columns `(left, right)` on the pin-deck row.
    #[serde(default)]
    pub pin_deck_gutters: Option<(f64, f64)>,
    pub pixels_per_board: f64,
    pub pixels_per_foot: f64,
    #[serde(default)]
    pub reference_points: Vec<ReferencePoint>,
    /// Row-major pixel to lane transform, used as given.
    #[serde(default)]
    pub homography: Option<[f64; 9]>,
    /// Lateral widening at the pin deck for the linear fallback, 0 at the
    /// foul line.
    #[serde(default = "default_perspective_correction")]
    pub perspective_correction: f64,
}

fn default_perspective_correction() -> f64 {
    0.3
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidCalibration(msg.into())
}

impl CalibrationProfile {
    /// Plain linear profile from the gutters and scales.
    pub fn new(
        foul_line_y: f64,
        left_gutter_x: f64,
        right_gutter_x: f64,
        pixels_per_foot: f64,
    ) -> Self {
        Self {
            foul_line_y,
            arrows_y: None,
            left_gutter_x,
            right_gutter_x,
            pin_deck_y: None,
            pin_deck_gutters: None,
            pixels_per_board: (right_gutter_x - left_gutter_x) / LAST_BOARD,
            pixels_per_foot,
            reference_points: Vec::new(),
            homography: None,
            perspective_correction: default_perspective_correction(),
        }
    }

    /// Derives the scales from landmarks: the arrows sit 15 ft past the foul
    /// line and the gutters span 39 boards.
    pub fn from_landmarks(
        foul_line_y: f64,
        arrows_y: f64,
        left_gutter_x: f64,
        right_gutter_x: f64,
    ) -> Result<Self, Error> {
        let mut profile = Self::new(
            foul_line_y,
            left_gutter_x,
            right_gutter_x,
            (foul_line_y - arrows_y) / ARROWS_DISTANCE_FT,
        );
        profile.arrows_y = Some(arrows_y);
        profile.validate()?;

        Ok(profile)
    }

    pub fn load_json(content: &str) -> Result<Self, Error> {
        let profile: Self = serde_json::from_str(content)?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn load_toml(content: &str) -> Result<Self, Error> {
        let profile: Self = toml::from_str(content)?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> Result<(), Error> {
        let scalars = [
            self.foul_line_y,
            self.left_gutter_x,
            self.right_gutter_x,
            self.pixels_per_board,
            self.pixels_per_foot,
            self.perspective_correction,
        ];
        if scalars.iter().any(|v| !v.is_finite()) {
            return Err(invalid("non-finite value"));
        }

        if self.right_gutter_x <= self.left_gutter_x {
            return Err(invalid(format!(
                "right gutter {} must be right of left gutter {}",
                self.right_gutter_x, self.left_gutter_x
            )));
        }

        if self.pixels_per_foot <= 0.0 || self.pixels_per_board <= 0.0 {
            return Err(invalid("scale factors must be positive"));
        }

        if !(0.0..1.0).contains(&self.perspective_correction) {
            return Err(invalid("perspective correction must be in [0, 1)"));
        }

        if let Some(arrows) = self.arrows_y {
            if !arrows.is_finite() || arrows >= self.foul_line_y {
                return Err(invalid("arrows must lie beyond the foul line"));
            }
        }

        if let Some(pins) = self.pin_deck_y {
            let limit = self.arrows_y.unwrap_or(self.foul_line_y);
            if !pins.is_finite() || pins >= limit {
                return Err(invalid("pin deck must lie beyond the arrows and foul line"));
            }
        }

        if let Some((l, r)) = self.pin_deck_gutters {
            if self.pin_deck_y.is_none() {
                return Err(invalid("pin-deck gutters need the pin-deck row"));
            }
            if !l.is_finite() || !r.is_finite() || r <= l {
                return Err(invalid("pin-deck gutters out of order"));
            }
        }

        let refs_finite = self
            .reference_points
            .iter()
            .flat_map(|p| p.pixel.iter().chain(p.lane.iter()))
            .all(|v| v.is_finite());
        if !refs_finite {
            return Err(invalid("non-finite reference point"));
        }

        Ok(())
    }

    /// Explicit reference points, or the four lane corners when the pin deck
    /// is fully described.
    pub fn correspondences(&self) -> Vec<ReferencePoint> {
        if !self.reference_points.is_empty() {
            return self.reference_points.clone();
        }

        match (self.pin_deck_y, self.pin_deck_gutters) {
            (Some(pins), Some((pl, pr))) => vec![
                ReferencePoint {
                    pixel: [self.left_gutter_x, self.foul_line_y],
                    lane: [FIRST_BOARD, 0.0],
                },
                ReferencePoint {
                    pixel: [self.right_gutter_x, self.foul_line_y],
                    lane: [LAST_BOARD, 0.0],
                },
                ReferencePoint {
                    pixel: [pr, pins],
                    lane: [LAST_BOARD, PIN_DECK_DISTANCE_FT],
                },
                ReferencePoint {
                    pixel: [pl, pins],
                    lane: [FIRST_BOARD, PIN_DECK_DISTANCE_FT],
                },
            ],
            _ => Vec::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct LanePosition {
    pub board: f64,
    pub distance_ft: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingModel {
    Linear,
    /// Linear with lateral widening towards the pin deck.
    Corrected,
    Homography,
}

#[derive(Debug, Clone)]
enum Model {
    Linear,
    Corrected { pin_deck_y: f64 },
    Homography {
        forward: Matrix3<f64>,
        inverse: Matrix3<f64>,
    },
}

/// Stateless mapper built once per shot from a validated profile.
#[derive(Debug, Clone)]
pub struct LaneMapper {
    profile: CalibrationProfile,
    model: Model,
}

impl LaneMapper {
    pub fn new(profile: CalibrationProfile) -> Result<Self, Error> {
        profile.validate()?;

        let forward = match &profile.homography {
            Some(m) => Some(homography::from_row_major(m)),
            None => {
                let refs = profile.correspondences();
                if refs.len() >= 4 {
                    let src: Vec<[f64; 2]> = refs.iter().map(|r| r.pixel).collect();
                    let dst: Vec<[f64; 2]> = refs.iter().map(|r| r.lane).collect();
                    Some(homography::estimate(&src, &dst)?)
                } else {
                    None
                }
            }
        };

        let model = match (forward, profile.pin_deck_y) {
            (Some(forward), _) => {
                let inverse = forward
                    .try_inverse()
                    .ok_or_else(|| Error::Homography("homography is singular".into()))?;
                Model::Homography { forward, inverse }
            }
            (None, Some(pin_deck_y)) if profile.perspective_correction > 0.0 => {
                Model::Corrected { pin_deck_y }
            }
            _ => Model::Linear,
        };

        debug!(model = ?Self::describe(&model), "lane mapper ready");

        Ok(Self { profile, model })
    }

    fn describe(model: &Model) -> MappingModel {
        match model {
            Model::Linear => MappingModel::Linear,
            Model::Corrected { .. } => MappingModel::Corrected,
            Model::Homography { .. } => MappingModel::Homography,
        }
    }

    #[inline]
    pub fn model(&self) -> MappingModel {
        Self::describe(&self.model)
    }

    #[inline]
    pub fn profile(&self) -> &CalibrationProfile {
        &self.profile
    }

    /// `1 + 38·(x − left)/(right − left)`, clamped to the lane.
    pub fn board(&self, x: f64) -> f64 {
        let p = &self.profile;
        let span = p.right_gutter_x - p.left_gutter_x;
        let board = FIRST_BOARD + (LAST_BOARD - FIRST_BOARD) * (x - p.left_gutter_x) / span;

        board.clamp(FIRST_BOARD, LAST_BOARD)
    }

    /// `(foul − y) / pixels_per_foot`; negative behind the foul line.
    #[inline]
    pub fn distance_ft(&self, y: f64) -> f64 {
        (self.profile.foul_line_y - y) / self.profile.pixels_per_foot
    }

    fn widening(&self, pin_deck_y: f64, y: f64) -> f64 {
        let p = &self.profile;
        let along = ((p.foul_line_y - y) / (p.foul_line_y - pin_deck_y)).clamp(0.0, 1.0);
        1.0 + p.perspective_correction * along
    }

    pub fn map(&self, x: f64, y: f64) -> LanePosition {
        match &self.model {
            Model::Linear => LanePosition {
                board: self.board(x),
                distance_ft: self.distance_ft(y),
            },

            Model::Corrected { pin_deck_y } => {
                let p = &self.profile;
                let center = (p.left_gutter_x + p.right_gutter_x) / 2.0;
                let half = (p.right_gutter_x - p.left_gutter_x) / 2.0;
                let offset = (x - center) / half * (CENTER_BOARD - FIRST_BOARD);

                LanePosition {
                    board: (CENTER_BOARD + offset * self.widening(*pin_deck_y, y))
                        .clamp(FIRST_BOARD, LAST_BOARD),
                    distance_ft: self.distance_ft(y),
                }
            }

            Model::Homography { forward, .. } => match homography::project(forward, x, y) {
                Some([board, distance_ft]) => LanePosition {
                    board: board.clamp(FIRST_BOARD, LAST_BOARD),
                    distance_ft,
                },
                None => LanePosition {
                    board: self.board(x),
                    distance_ft: self.distance_ft(y),
                },
            },
        }
    }

    /// Pixel where a lane position appears, for overlays.
    pub fn to_pixel(&self, board: f64, distance_ft: f64) -> Option<[f64; 2]> {
        let p = &self.profile;
        let y = p.foul_line_y - distance_ft * p.pixels_per_foot;

        match &self.model {
            Model::Linear => {
                let span = p.right_gutter_x - p.left_gutter_x;
                let x = p.left_gutter_x + (board - FIRST_BOARD) / (LAST_BOARD - FIRST_BOARD) * span;
                Some([x, y])
            }

            Model::Corrected { pin_deck_y } => {
                let center = (p.left_gutter_x + p.right_gutter_x) / 2.0;
                let half = (p.right_gutter_x - p.left_gutter_x) / 2.0;
                let offset = (board - CENTER_BOARD) / self.widening(*pin_deck_y, y);
                Some([center + offset / (CENTER_BOARD - FIRST_BOARD) * half, y])
            }

            Model::Homography { inverse, .. } => homography::project(inverse, board, distance_ft),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic() -> CalibrationProfile {
        CalibrationProfile::new(900.0, 100.0, 700.0, 10.0)
    }

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn linear_formulas() {
        let mapper = LaneMapper::new(basic()).unwrap();
        assert_eq!(mapper.model(), MappingModel::Linear);

        assert_eq!(mapper.board(400.0), 20.0);
        assert_eq!(mapper.distance_ft(900.0), 0.0);
        assert_eq!(mapper.distance_ft(800.0), 10.0);

        assert_eq!(mapper.board(100.0), 1.0);
        assert_eq!(mapper.board(700.0), 39.0);
        assert_eq!(mapper.board(20.0), 1.0);
        assert_eq!(mapper.board(900.0), 39.0);

        let pos = mapper.map(400.0, 800.0);
        assert_eq!(pos, LanePosition { board: 20.0, distance_ft: 10.0 });
    }

    #[test]
    fn mapping_is_deterministic() {
        let mapper = LaneMapper::new(basic()).unwrap();
        assert_eq!(mapper.map(333.3, 512.0), mapper.map(333.3, 512.0));
    }

    #[test]
    fn rejects_bad_profiles() {
        let mut p = basic();
        p.right_gutter_x = 100.0;
        assert!(matches!(LaneMapper::new(p), Err(Error::InvalidCalibration(_))));

        let mut p = basic();
        p.pixels_per_foot = 0.0;
        assert!(LaneMapper::new(p).is_err());

        let mut p = basic();
        p.pixels_per_board = -1.0;
        assert!(LaneMapper::new(p).is_err());

        let mut p = basic();
        p.arrows_y = Some(950.0);
        assert!(LaneMapper::new(p).is_err());

        let mut p = basic();
        p.arrows_y = Some(750.0);
        p.pin_deck_y = Some(800.0);
        assert!(LaneMapper::new(p).is_err());

        let mut p = basic();
        p.foul_line_y = f64::NAN;
        assert!(LaneMapper::new(p).is_err());
    }

    #[test]
    fn landmarks_derive_scale() {
        let p = CalibrationProfile::from_landmarks(900.0, 750.0, 100.0, 700.0).unwrap();
        assert_eq!(p.pixels_per_foot, 10.0);
        assert!(close(p.pixels_per_board, 600.0 / 39.0, 1e-12));

        let mapper = LaneMapper::new(p).unwrap();
        assert_eq!(mapper.distance_ft(750.0), 15.0);
    }

    fn trapezoid() -> CalibrationProfile {
        let mut p = basic();
        p.pin_deck_y = Some(100.0);
        p.pin_deck_gutters = Some((300.0, 500.0));
        p
    }

    #[test]
    fn homography_from_lane_corners() {
        let mapper = LaneMapper::new(trapezoid()).unwrap();
        assert_eq!(mapper.model(), MappingModel::Homography);

        let foul_left = mapper.map(100.0, 900.0);
        assert!(close(foul_left.board, 1.0, 1e-6) && close(foul_left.distance_ft, 0.0, 1e-6));

        let pins_right = mapper.map(500.0, 100.0);
        assert!(close(pins_right.board, 39.0, 1e-6));
        assert!(close(pins_right.distance_ft, 60.0, 1e-6));

        // foreshortening: the middle image row is well short of mid-lane
        let mid = mapper.map(400.0, 500.0);
        assert!(close(mid.board, 20.0, 1e-6));
        assert!(close(mid.distance_ft, 15.0, 1e-6), "{:?}", mid);
    }

    #[test]
    fn inverse_mapping_round_trips() {
        for profile in [basic(), trapezoid()] {
            let mapper = LaneMapper::new(profile).unwrap();
            let px = mapper.to_pixel(12.0, 33.0).unwrap();
            let back = mapper.map(px[0], px[1]);
            assert!(close(back.board, 12.0, 1e-6), "{:?}", back);
            assert!(close(back.distance_ft, 33.0, 1e-6), "{:?}", back);
        }
    }

    #[test]
    fn corrected_fallback_widens_towards_pins() {
        let mut p = basic();
        p.pin_deck_y = Some(300.0);
        let mapper = LaneMapper::new(p).unwrap();
        assert_eq!(mapper.model(), MappingModel::Corrected);

        assert!(close(mapper.map(550.0, 900.0).board, 29.5, 1e-9));
        assert!(close(mapper.map(550.0, 300.0).board, 20.0 + 9.5 * 1.3, 1e-9));
        assert!(close(mapper.map(400.0, 300.0).board, 20.0, 1e-9));

        let px = mapper.to_pixel(30.0, 40.0).unwrap();
        let back = mapper.map(px[0], px[1]);
        assert!(close(back.board, 30.0, 1e-9));

        let mut p = basic();
        p.pin_deck_y = Some(300.0);
        p.perspective_correction = 0.0;
        assert_eq!(LaneMapper::new(p).unwrap().model(), MappingModel::Linear);
    }

    #[test]
    fn explicit_homography_is_used_as_is() {
        let mut p = basic();
        // x/100 boards, (900 - y)/10 feet
        p.homography = Some([0.01, 0.0, 0.0, 0.0, -0.1, 90.0, 0.0, 0.0, 1.0]);
        let mapper = LaneMapper::new(p).unwrap();

        let pos = mapper.map(1500.0, 500.0);
        assert!(close(pos.board, 15.0, 1e-12));
        assert!(close(pos.distance_ft, 40.0, 1e-12));

        let mut p = basic();
        p.homography = Some([0.0; 9]);
        assert!(matches!(LaneMapper::new(p), Err(Error::Homography(_))));
    }

    #[test]
    fn profile_from_json() {
        let p = CalibrationProfile::load_json(
            r#"{"foul_line_y": 900, "left_gutter_x": 100, "right_gutter_x": 700,
                "pixels_per_board": 15.4, "pixels_per_foot": 10}"#,
        )
        .unwrap();
        assert_eq!(p.perspective_correction, 0.3);
        assert!(p.reference_points.is_empty());

        assert!(CalibrationProfile::load_json(
            r#"{"foul_line_y": 900, "left_gutter_x": 700, "right_gutter_x": 100,
                "pixels_per_board": 15.4, "pixels_per_foot": 10}"#,
        )
        .is_err());
    }
}
