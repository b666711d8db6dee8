use serde_derive::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct TrajectoryPoint {
    pub frame_index: u64,
    pub timestamp: f64,

    // in px
    pub x: f32,
    pub y: f32,

    // in [0, 1] of the frame size
    pub norm_x: f32,
    pub norm_y: f32,

    /// Lane board in `[1, 39]`, present only with a calibration.
    pub board: Option<f64>,
    /// Feet past the foul line, present only with a calibration.
    pub distance_ft: Option<f64>,

    pub confidence: f32,
    pub interpolated: bool,

    // in px/s
    pub vx: Option<f32>,
    pub vy: Option<f32>,
    pub speed: Option<f32>,
}

impl TrajectoryPoint {
    /// Both lane coordinates, when calibrated.
    #[inline]
    pub fn lane(&self) -> Option<(f64, f64)> {
        Some((self.board?, self.distance_ft?))
    }
}

/// Append-only, frame-ordered point buffer with a hard size cap. A push into
/// a full buffer first drops every second stored point.
#[derive(Debug, Clone)]
pub struct Trajectory {
    points: Vec<TrajectoryPoint>,
    capacity: usize,
}

impl Trajectory {
    #[inline]
    pub fn with_capacity(cap: usize) -> Self {
        let capacity = cap.max(2);

        Self {
            points: Vec::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    pub fn push(&mut self, point: TrajectoryPoint) -> Result<(), Error> {
        if let Some(last) = self.points.last() {
            if point.frame_index <= last.frame_index {
                return Err(Error::OutOfOrder {
                    last: last.frame_index,
                    got: point.frame_index,
                });
            }
        }

        if self.is_full() {
            self.downsample();
        }

        self.points.push(point);

        Ok(())
    }

    fn downsample(&mut self) {
        let mut idx = 0;
        self.points.retain(|_| {
            let keep = idx % 2 == 0;
            idx += 1;
            keep
        });
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.points.len() >= self.capacity
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn last(&self) -> Option<&TrajectoryPoint> {
        self.points.last()
    }

    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, TrajectoryPoint> {
        self.points.iter()
    }

    #[inline]
    pub fn as_slice(&self) -> &[TrajectoryPoint] {
        &self.points
    }

    #[inline]
    pub fn clear(&mut self) {
        self.points.clear();
    }

    /// Empties the buffer, handing over the points.
    #[inline]
    pub fn take(&mut self) -> Vec<TrajectoryPoint> {
        std::mem::take(&mut self.points)
    }
}

impl<'a> IntoIterator for &'a Trajectory {
    type Item = &'a TrajectoryPoint;
    type IntoIter = std::slice::Iter<'a, TrajectoryPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(frame_index: u64) -> TrajectoryPoint {
        TrajectoryPoint {
            frame_index,
            timestamp: frame_index as f64 / 120.0,
            x: frame_index as f32,
            y: 0.0,
            norm_x: 0.0,
            norm_y: 0.0,
            board: None,
            distance_ft: None,
            confidence: 1.0,
            interpolated: false,
            vx: None,
            vy: None,
            speed: None,
        }
    }

    #[test]
    fn rejects_out_of_order() {
        let mut t = Trajectory::with_capacity(8);
        t.push(point(5)).unwrap();

        assert!(matches!(
            t.push(point(5)),
            Err(Error::OutOfOrder { last: 5, got: 5 })
        ));
        assert!(t.push(point(3)).is_err());
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn full_buffer_drops_every_second_point() {
        let mut t = Trajectory::with_capacity(6);
        for i in 0..6 {
            t.push(point(i)).unwrap();
        }
        assert!(t.is_full());

        t.push(point(6)).unwrap();

        let frames: Vec<u64> = t.iter().map(|p| p.frame_index).collect();
        assert_eq!(frames, vec![0, 2, 4, 6]);
    }

    #[test]
    fn stays_bounded() {
        let mut t = Trajectory::with_capacity(16);
        for i in 0..1000 {
            t.push(point(i)).unwrap();
            assert!(t.len() <= 16);
        }
        assert_eq!(t.last().unwrap().frame_index, 999);
        assert_eq!(t.iter().next().unwrap().frame_index, 0);
    }

    #[test]
    fn lane_needs_both_coordinates() {
        let mut p = point(0);
        assert_eq!(p.lane(), None);

        p.board = Some(20.0);
        assert_eq!(p.lane(), None);

        p.distance_ft = Some(12.5);
        assert_eq!(p.lane(), Some((20.0, 12.5)));
    }
}
