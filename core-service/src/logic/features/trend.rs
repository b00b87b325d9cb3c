//! Online least-squares trend
//!
//! Slope of value vs. sample index, accumulated in one pass.

#[derive(Debug, Clone, Default)]
pub struct TrendAccumulator {
    n: u64,
    sum_x: f64,
    sum_y: f64,
    sum_xy: f64,
    sum_xx: f64,
    min_y: f64,
    max_y: f64,
}

impl TrendAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, y: f64) {
        let x = self.n as f64;
        if self.n == 0 {
            self.min_y = y;
            self.max_y = y;
        } else {
            self.min_y = self.min_y.min(y);
            self.max_y = self.max_y.max(y);
        }

        self.n += 1;
        self.sum_x += x;
        self.sum_y += y;
        self.sum_xy += x * y;
        self.sum_xx += x * x;
    }

    pub fn mean(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.sum_y / self.n as f64
        }
    }

    /// OLS slope in value units per sample. 0 for <2 samples or flat series.
    pub fn slope(&self) -> f64 {
        if self.n < 2 || self.max_y == self.min_y {
            return 0.0;
        }

        let n = self.n as f64;
        let denom = n * self.sum_xx - self.sum_x * self.sum_x;
        if denom == 0.0 {
            return 0.0;
        }

        let slope = (n * self.sum_xy - self.sum_x * self.sum_y) / denom;
        if slope.is_finite() { slope } else { 0.0 }
    }

    /// Slope divided by the mean: a unit-free growth rate per sample
    pub fn normalized(&self) -> f64 {
        let mean = self.mean();
        if mean == 0.0 {
            return 0.0;
        }
        self.slope() / mean
    }
}
