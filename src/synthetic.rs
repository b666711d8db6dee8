//! Rendered test frames: flat discs on a flat background.
//!
//! Used by the unit tests, the integration tests and `lanetrack simulate`.

use ndarray::Array2;
use serde_derive::{Deserialize, Serialize};

use crate::frame::Frame;

/// Lane-wood brown, far in hue from the default ball and marker colors.
pub const LANE_COLOR: [u8; 3] = [200, 170, 120];
pub const BALL_COLOR: [u8; 3] = [30, 60, 200];
pub const MARKER_COLOR: [u8; 3] = [240, 240, 20];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Disc {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    pub color: [u8; 3],
}

impl Disc {
    #[inline]
    pub fn new(x: f32, y: f32, radius: f32, color: [u8; 3]) -> Self {
        Self {
            x,
            y,
            radius,
            color,
        }
    }

    #[inline]
    fn covers(&self, x: usize, y: usize) -> bool {
        let dx = x as f32 - self.x;
        let dy = y as f32 - self.y;
        dx * dx + dy * dy <= self.radius * self.radius
    }
}

#[derive(Debug, Clone)]
pub struct Scene {
    width: usize,
    height: usize,
    background: [u8; 3],
    discs: Vec<Disc>,
}

impl Scene {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            background: [0, 0, 0],
            discs: Vec::new(),
        }
    }

    pub fn with_background(mut self, color: [u8; 3]) -> Self {
        self.background = color;
        self
    }

    /// Later discs paint over earlier ones.
    pub fn with_disc(mut self, disc: Disc) -> Self {
        self.discs.push(disc);
        self
    }

    pub fn render(&self, sequence: u64, timestamp: f64) -> Frame {
        let mut pixels = Array2::from_elem((self.height, self.width), self.background);

        for disc in &self.discs {
            let x0 = (disc.x - disc.radius).floor().max(0.0) as usize;
            let y0 = (disc.y - disc.radius).floor().max(0.0) as usize;
            let x1 = ((disc.x + disc.radius).ceil().max(0.0) as usize + 1).min(self.width);
            let y1 = ((disc.y + disc.radius).ceil().max(0.0) as usize + 1).min(self.height);

            for y in y0..y1 {
                for x in x0..x1 {
                    if disc.covers(x, y) {
                        pixels[(y, x)] = disc.color;
                    }
                }
            }
        }

        Frame::new(pixels, sequence, timestamp)
    }
}

/// Straight-line roll between two pixel positions with a spinning marker.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ShotScript {
    pub width: usize,
    pub height: usize,
    pub fps: f64,
    pub frames: usize,
    pub from: (f32, f32),
    pub to: (f32, f32),
    pub radius: f32,
    pub rpm: f64,
    pub ball_color: [u8; 3],
    pub marker_color: Option<[u8; 3]>,
    /// Frame indexes rendered without the ball, e.g. a hand in front of it.
    pub hidden: Vec<usize>,
}

impl Default for ShotScript {
    fn default() -> Self {
        Self {
            width: 160,
            height: 480,
            fps: 120.0,
            frames: 240,
            from: (80.0, 460.0),
            to: (70.0, 40.0),
            radius: 7.0,
            rpm: 300.0,
            ball_color: BALL_COLOR,
            marker_color: Some(MARKER_COLOR),
            hidden: Vec::new(),
        }
    }
}

impl ShotScript {
    #[inline]
    pub fn timestamp(&self, index: usize) -> f64 {
        index as f64 / self.fps
    }

    /// Ball center at `index`, moving at constant speed.
    pub fn center(&self, index: usize) -> (f32, f32) {
        let t = if self.frames > 1 {
            index as f32 / (self.frames - 1) as f32
        } else {
            0.0
        };

        (
            self.from.0 + (self.to.0 - self.from.0) * t,
            self.from.1 + (self.to.1 - self.from.1) * t,
        )
    }

    /// Marker angle in degrees at `index`.
    pub fn marker_angle(&self, index: usize) -> f64 {
        (self.rpm / 60.0 * 360.0 * self.timestamp(index)).rem_euclid(360.0)
    }

    pub fn frame(&self, index: usize) -> Frame {
        let mut scene = Scene::new(self.width, self.height).with_background(LANE_COLOR);

        if !self.hidden.contains(&index) {
            let (x, y) = self.center(index);
            scene = scene.with_disc(Disc::new(x, y, self.radius, self.ball_color));

            if let Some(color) = self.marker_color {
                let a = self.marker_angle(index).to_radians() as f32;
                let offset = self.radius * 0.55;
                scene = scene.with_disc(Disc::new(
                    x + offset * a.cos(),
                    y + offset * a.sin(),
                    self.radius * 0.3,
                    color,
                ));
            }
        }

        scene.render(index as u64, self.timestamp(index))
    }

    /// Ball area relative to the frame, a good `ideal_area_fraction`.
    pub fn ball_area_fraction(&self) -> f32 {
        let frame = (self.width * self.height).max(1) as f32;
        std::f32::consts::PI * self.radius * self.radius / frame
    }

    pub fn render(&self) -> impl Iterator<Item = Frame> + '_ {
        (0..self.frames).map(move |i| self.frame(i))
    }
}
