//! Constant-velocity Kalman filter over the ball center.
//!
//! State is `[x, y, vx, vy]` in pixels and pixels per second; the transition
//! uses the real time step between frames, so dropped frames only widen the
//! step.

use nalgebra as na;
use nalgebra::{Matrix2, Matrix2x4, Matrix4, Vector2, Vector4};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Empty,
    /// One measurement seen; `elapsed` seconds predicted since.
    Positioned { elapsed: f32 },
    Running,
}

#[derive(Debug, Clone)]
pub struct Predictor {
    x: Vector4<f32>,
    p: Matrix4<f32>,
    h: Matrix2x4<f32>,
    r: Matrix2<f32>,
    q: f32,
    phase: Phase,
}

impl Predictor {
    /// `process_noise` is the white-acceleration density, `measurement_noise`
    /// the detector variance in px².
    pub fn new(process_noise: f32, measurement_noise: f32) -> Self {
        Self {
            x: Vector4::zeros(),
            p: Matrix4::identity(),
            h: Matrix2x4::new(1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0),
            r: Matrix2::identity() * measurement_noise,
            q: process_noise,
            phase: Phase::Empty,
        }
    }

    pub fn reset(&mut self) {
        self.x = Vector4::zeros();
        self.p = Matrix4::identity();
        self.phase = Phase::Empty;
    }

    #[inline]
    pub fn position(&self) -> Option<na::Point2<f32>> {
        match self.phase {
            Phase::Empty => None,
            _ => Some(na::Point2::new(self.x[0], self.x[1])),
        }
    }

    #[inline]
    pub fn velocity(&self) -> Option<Vector2<f32>> {
        match self.phase {
            Phase::Running => Some(Vector2::new(self.x[2], self.x[3])),
            _ => None,
        }
    }

    fn transition(dt: f32) -> Matrix4<f32> {
        Matrix4::new(
            1.0, 0.0, dt, 0.0, //
            0.0, 1.0, 0.0, dt, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        )
    }

    fn process_noise(&self, dt: f32) -> Matrix4<f32> {
        let dt2 = dt * dt;
        let a = dt2 * dt2 / 4.0;
        let b = dt2 * dt / 2.0;

        Matrix4::new(
            a, 0.0, b, 0.0, //
            0.0, a, 0.0, b, //
            b, 0.0, dt2, 0.0, //
            0.0, b, 0.0, dt2,
        ) * self.q
    }

    /// Where the ball should be `dt` seconds after the current state.
    pub fn peek(&self, dt: f32) -> Option<na::Point2<f32>> {
        match self.phase {
            Phase::Empty => None,
            Phase::Positioned { .. } => self.position(),
            Phase::Running => {
                let x = Self::transition(dt.max(0.0)) * self.x;
                Some(na::Point2::new(x[0], x[1]))
            }
        }
    }

    pub fn predict(&mut self, dt: f32) {
        let dt = dt.max(0.0);

        match self.phase {
            Phase::Empty => {}
            Phase::Positioned { elapsed } => {
                self.phase = Phase::Positioned {
                    elapsed: elapsed + dt,
                }
            }
            Phase::Running => {
                let f = Self::transition(dt);
                self.x = f * self.x;
                self.p = f * self.p * f.transpose() + self.process_noise(dt);
            }
        }
    }

    pub fn update(&mut self, z: na::Point2<f32>) {
        match self.phase {
            Phase::Empty => {
                self.x = Vector4::new(z.x, z.y, 0.0, 0.0);
                self.p = Matrix4::from_diagonal(&Vector4::new(
                    self.r[(0, 0)],
                    self.r[(1, 1)],
                    1.0e6,
                    1.0e6,
                ));
                self.phase = Phase::Positioned { elapsed: 0.0 };
            }

            Phase::Positioned { elapsed } if elapsed <= f32::EPSILON => {
                self.x[0] = z.x;
                self.x[1] = z.y;
            }

            // finite difference on the second measurement
            Phase::Positioned { elapsed } => {
                let vx = (z.x - self.x[0]) / elapsed;
                let vy = (z.y - self.x[1]) / elapsed;
                let rv = 2.0 * self.r[(0, 0)] / (elapsed * elapsed);

                self.x = Vector4::new(z.x, z.y, vx, vy);
                self.p = Matrix4::from_diagonal(&Vector4::new(
                    self.r[(0, 0)],
                    self.r[(1, 1)],
                    rv,
                    rv,
                ));
                self.phase = Phase::Running;
            }

            Phase::Running => {
                let y = z.coords - self.h * self.x;
                let s = self.h * self.p * self.h.transpose() + self.r;

                let s_inv = match s.try_inverse() {
                    Some(inv) => inv,
                    None => return,
                };

                let k = self.p * self.h.transpose() * s_inv;
                self.x += k * y;
                self.p = (Matrix4::identity() - k * self.h) * self.p;
            }
        }
    }
}
