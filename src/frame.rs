use ndarray::Array2;

/// Single captured RGB frame. Rows are image rows, so `pixels[(y, x)]`.
#[derive(Debug, Clone)]
pub struct Frame {
    pub pixels: Array2<[u8; 3]>,
    pub sequence: u64,
    pub timestamp: f64, // in seconds, monotonic
}

impl Frame {
    #[inline]
    pub fn new(pixels: Array2<[u8; 3]>, sequence: u64, timestamp: f64) -> Self {
        Self {
            pixels,
            sequence,
            timestamp,
        }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.pixels.ncols() as u32
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.pixels.nrows() as u32
    }

    #[inline]
    pub fn dims(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.pixels.len() as f32
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}
