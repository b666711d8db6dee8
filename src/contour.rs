//! Connected blobs and their traced outlines.

use nalgebra as na;
use ndarray::Array2;
use std::collections::VecDeque;
use std::f32::consts::PI;

use crate::mask::Mask;

// Freeman codes, counter-clockwise on screen (y grows downwards)
const DIRS: [(i32, i32); 8] = [
    (1, 0),
    (1, -1),
    (0, -1),
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Closed outline of one blob.
#[derive(Debug, Clone)]
pub struct Contour {
    /// Boundary pixel centers, closed implicitly (last joins first).
    pub points: Vec<na::Point2<f32>>,
    /// Pixel count of the blob, or the polygon area for synthetic contours.
    pub area: f32,
    pub centroid: na::Point2<f32>,
}

impl Contour {
    pub fn from_polygon(points: Vec<na::Point2<f32>>) -> Self {
        let n = points.len().max(1) as f32;
        let sum = points
            .iter()
            .fold(na::Vector2::zeros(), |acc, p| acc + p.coords);

        let mut contour = Self {
            points,
            area: 0.0,
            centroid: (sum / n).into(),
        };

        contour.area = contour.polygon_area();
        contour
    }

    /// Shoelace area of the outline.
    pub fn polygon_area(&self) -> f32 {
        let n = self.points.len();
        if n < 3 {
            return 0.0;
        }

        let twice: f32 = (0..n)
            .map(|i| {
                let a = self.points[i];
                let b = self.points[(i + 1) % n];
                a.x * b.y - b.x * a.y
            })
            .sum();

        twice.abs() / 2.0
    }

    pub fn perimeter(&self) -> f32 {
        let n = self.points.len();
        if n < 2 {
            return 0.0;
        }

        (0..n)
            .map(|i| na::distance(&self.points[i], &self.points[(i + 1) % n]))
            .sum()
    }

    /// `4π·A / P²`, 1.0 for a circle and π/4 for a square.
    pub fn circularity(&self) -> f32 {
        let p = self.perimeter();
        if p <= f32::EPSILON {
            return 0.0;
        }

        4.0 * PI * self.polygon_area() / (p * p)
    }

    /// Radius of the circle with the same area.
    #[inline]
    pub fn equivalent_radius(&self) -> f32 {
        (self.area / PI).sqrt()
    }
}

/// Labels 8-connected blobs and traces the outer boundary of each one.
pub fn find_contours(mask: &Mask) -> Vec<Contour> {
    let (h, w) = mask.dim();
    let mut labels = Array2::<u32>::zeros((h, w));
    let mut contours = Vec::new();
    let mut queue = VecDeque::new();
    let mut next_label = 0;

    for y in 0..h {
        for x in 0..w {
            if !mask[(y, x)] || labels[(y, x)] != 0 {
                continue;
            }

            next_label += 1;
            labels[(y, x)] = next_label;
            queue.push_back((x, y));

            let mut count = 0usize;
            let (mut sx, mut sy) = (0.0f64, 0.0f64);

            while let Some((cx, cy)) = queue.pop_front() {
                count += 1;
                sx += cx as f64;
                sy += cy as f64;

                for (dx, dy) in DIRS {
                    let nx = cx as i32 + dx;
                    let ny = cy as i32 + dy;
                    if nx < 0 || ny < 0 || nx >= w as i32 || ny >= h as i32 {
                        continue;
                    }

                    let (nx, ny) = (nx as usize, ny as usize);
                    if mask[(ny, nx)] && labels[(ny, nx)] == 0 {
                        labels[(ny, nx)] = next_label;
                        queue.push_back((nx, ny));
                    }
                }
            }

            // raster order makes (x, y) the top-most, left-most pixel of the blob
            let points = trace_boundary(mask, (x, y), count);

            contours.push(Contour {
                points,
                area: count as f32,
                centroid: na::Point2::new((sx / count as f64) as f32, (sy / count as f64) as f32),
            });
        }
    }

    contours
}

fn trace_boundary(mask: &Mask, start: (usize, usize), count: usize) -> Vec<na::Point2<f32>> {
    let (h, w) = mask.dim();
    let is_set = |x: i32, y: i32| {
        x >= 0 && y >= 0 && x < w as i32 && y < h as i32 && mask[(y as usize, x as usize)]
    };

    let start = (start.0 as i32, start.1 as i32);
    let mut points = vec![na::Point2::new(start.0 as f32, start.1 as f32)];
    let mut cur = start;
    let mut dir = 7usize;
    let mut first_dir = None;
    let limit = 4 * count + 8;

    loop {
        let search = if dir % 2 == 0 {
            (dir + 7) % 8
        } else {
            (dir + 6) % 8
        };

        let next = (0..8)
            .map(|i| (search + i) % 8)
            .find(|&d| is_set(cur.0 + DIRS[d].0, cur.1 + DIRS[d].1));

        let d = match next {
            Some(d) => d,
            None => break, // isolated pixel
        };

        if cur == start {
            match first_dir {
                None => first_dir = Some(d),
                Some(fd) if fd == d => break,
                _ => {}
            }
        }

        cur = (cur.0 + DIRS[d].0, cur.1 + DIRS[d].1);
        dir = d;
        points.push(na::Point2::new(cur.0 as f32, cur.1 as f32));

        if points.len() > limit {
            break;
        }
    }

    if points.len() > 1 && points.last() == points.first() {
        points.pop();
    }

    points
}
