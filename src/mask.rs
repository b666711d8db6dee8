//! Binary masks and morphology.
//!
//! Erosion and dilation use a square structuring element of side
//! `2 * radius + 1`, applied as a horizontal pass followed by a vertical pass.

use std::collections::VecDeque;

use ndarray::{Array2, ArrayView1, ArrayViewMut1, Zip};

use crate::color::{HsvFrame, HsvTarget};

pub type Mask = Array2<bool>;

pub fn color_mask(hsv: &HsvFrame, target: &HsvTarget) -> Mask {
    let mut mask = Array2::from_elem(hsv.dim(), false);

    Zip::from(&mut mask)
        .and(hsv)
        .par_for_each(|m, px| *m = target.matches(px));

    mask
}

/// Same as [`color_mask`] but only pixels inside the circle are considered.
pub fn color_mask_in_circle(
    hsv: &HsvFrame,
    target: &HsvTarget,
    center: (f32, f32),
    radius: f32,
) -> Mask {
    let r2 = radius * radius;
    let mut mask = Array2::from_elem(hsv.dim(), false);

    Zip::indexed(&mut mask)
        .and(hsv)
        .par_for_each(|(y, x), m, px| {
            let dx = x as f32 - center.0;
            let dy = y as f32 - center.1;
            *m = dx * dx + dy * dy <= r2 && target.matches(px);
        });

    mask
}

/// Running count of `hit` pixels over a `2 * radius + 1` window along one row.
fn sweep_row(src: ArrayView1<'_, bool>, mut dst: ArrayViewMut1<'_, bool>, radius: usize, hit: bool) {
    let n = src.len();
    let mut hits = src.iter().take(radius).filter(|&&v| v == hit).count();

    for i in 0..n {
        if i + radius < n && src[i + radius] == hit {
            hits += 1;
        }
        if i > radius && src[i - radius - 1] == hit {
            hits -= 1;
        }

        // dilation: any set pixel sets the output, erosion: any clear pixel clears it
        dst[i] = if hits > 0 { hit } else { !hit };
    }
}

fn tally(hits: &mut [u32], row: ArrayView1<'_, bool>, hit: bool, enter: bool) {
    for (n, &v) in hits.iter_mut().zip(row.iter()) {
        if v == hit {
            if enter {
                *n += 1;
            } else {
                *n -= 1;
            }
        }
    }
}

/// Same window down the columns, one whole row in and one out per step.
fn sweep_columns(src: &Mask, radius: usize, hit: bool) -> Mask {
    let (h, w) = src.dim();
    let mut out = Array2::from_elem((h, w), false);
    let mut hits = vec![0u32; w];

    for y in 0..radius.min(h) {
        tally(&mut hits, src.row(y), hit, true);
    }

    for y in 0..h {
        if y + radius < h {
            tally(&mut hits, src.row(y + radius), hit, true);
        }
        if y > radius {
            tally(&mut hits, src.row(y - radius - 1), hit, false);
        }

        for (o, &n) in out.row_mut(y).iter_mut().zip(hits.iter()) {
            *o = if n > 0 { hit } else { !hit };
        }
    }

    out
}

fn morph(mask: &Mask, radius: usize, hit: bool) -> Mask {
    if radius == 0 {
        return mask.clone();
    }

    let mut horizontal = Array2::from_elem(mask.dim(), false);
    Zip::from(horizontal.rows_mut())
        .and(mask.rows())
        .par_for_each(|dst, src| sweep_row(src, dst, radius, hit));

    sweep_columns(&horizontal, radius, hit)
}

#[inline]
pub fn dilate(mask: &Mask, radius: usize) -> Mask {
    morph(mask, radius, true)
}

#[inline]
pub fn erode(mask: &Mask, radius: usize) -> Mask {
    morph(mask, radius, false)
}

/// Erode then dilate: removes specks smaller than the element.
#[inline]
pub fn open(mask: &Mask, radius: usize) -> Mask {
    dilate(&erode(mask, radius), radius)
}

/// Dilate then erode: fills holes smaller than the element.
#[inline]
pub fn close(mask: &Mask, radius: usize) -> Mask {
    erode(&dilate(mask, radius), radius)
}

/// Sets every clear pixel that the border cannot reach, e.g. a spin marker
/// inside the ball.
pub fn fill_holes(mask: &Mask) -> Mask {
    let (h, w) = mask.dim();
    let mut outside = Array2::from_elem((h, w), false);
    let mut queue = VecDeque::new();

    for y in 0..h {
        for x in 0..w {
            let border = x == 0 || y == 0 || x + 1 == w || y + 1 == h;
            if border && !mask[(y, x)] {
                outside[(y, x)] = true;
                queue.push_back((x, y));
            }
        }
    }

    // 4-connected, so an 8-connected outline is enough to close a hole
    while let Some((x, y)) = queue.pop_front() {
        let around = [
            (x.wrapping_sub(1), y),
            (x + 1, y),
            (x, y.wrapping_sub(1)),
            (x, y + 1),
        ];

        for (nx, ny) in around {
            if nx < w && ny < h && !mask[(ny, nx)] && !outside[(ny, nx)] {
                outside[(ny, nx)] = true;
                queue.push_back((nx, ny));
            }
        }
    }

    Zip::from(mask)
        .and(&outside)
        .map_collect(|&m, &o| m || !o)
}

/// Opening followed by closing.
pub fn clean(mask: &Mask, open_radius: usize, close_radius: usize) -> Mask {
    close(&open(mask, open_radius), close_radius)
}

/// Window `[x0, x1) × [y0, y1)` of a frame, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x0: usize,
    pub y0: usize,
    pub x1: usize,
    pub y1: usize,
}

impl Region {
    #[inline]
    pub fn width(&self) -> usize {
        self.x1 - self.x0
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.y1 - self.y0
    }

    #[inline]
    pub fn origin(&self) -> (usize, usize) {
        (self.x0, self.y0)
    }

    #[inline]
    pub fn overlaps(&self, other: &Region) -> bool {
        self.x0 < other.x1 && other.x0 < self.x1 && self.y0 < other.y1 && other.y0 < self.y1
    }

    #[inline]
    pub fn union(&self, other: &Region) -> Region {
        Region {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }
}

/// Bounding windows of the 8-connected blobs of `mask`, in raster order.
pub fn regions(mask: &Mask) -> Vec<Region> {
    let (h, w) = mask.dim();
    let mut seen = Array2::from_elem((h, w), false);
    let mut queue = VecDeque::new();
    let mut out = Vec::new();

    for y in 0..h {
        for x in 0..w {
            if !mask[(y, x)] || seen[(y, x)] {
                continue;
            }

            seen[(y, x)] = true;
            queue.push_back((x, y));
            let mut r = Region { x0: x, y0: y, x1: x + 1, y1: y + 1 };

            while let Some((cx, cy)) = queue.pop_front() {
                r = r.union(&Region { x0: cx, y0: cy, x1: cx + 1, y1: cy + 1 });

                for ny in cy.saturating_sub(1)..(cy + 2).min(h) {
                    for nx in cx.saturating_sub(1)..(cx + 2).min(w) {
                        if mask[(ny, nx)] && !seen[(ny, nx)] {
                            seen[(ny, nx)] = true;
                            queue.push_back((nx, ny));
                        }
                    }
                }
            }

            out.push(r);
        }
    }

    out
}

/// Unions overlapping windows until no two overlap.
pub fn merge_overlapping(mut regions: Vec<Region>) -> Vec<Region> {
    loop {
        let before = regions.len();
        let mut merged: Vec<Region> = Vec::with_capacity(before);

        for r in regions {
            match merged.iter_mut().find(|m| m.overlaps(&r)) {
                Some(m) => *m = m.union(&r),
                None => merged.push(r),
            }
        }

        if merged.len() == before {
            return merged;
        }
        regions = merged;
    }
}
