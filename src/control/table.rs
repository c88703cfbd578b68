//! Calibration lookup tables.
//!
//! [`Table2d`] is a 1D curve (bins → values), [`Table3d`] is a 2D map
//! with bilinear interpolation.  Both clamp at the axis ends, so lookups
//! outside the calibrated range return the edge value.

use serde::{Deserialize, Serialize};

/// Linear interpolation between `(x1, y1)` and `(x2, y2)`, clamped to the
/// segment when `x` falls outside `[x1, x2]`.
pub fn interpolate_clamped(x1: f32, y1: f32, x2: f32, y2: f32, x: f32) -> f32 {
    if x.is_nan() || x <= x1 {
        return y1;
    }
    if x >= x2 {
        return y2;
    }
    // x1 < x < x2 here, so the division is safe
    y1 + (y2 - y1) * (x - x1) / (x2 - x1)
}

/// `clamp` that tolerates `lo > hi` (lower bound wins), unlike `f32::clamp`.
/// NaN reads as `lo`.
pub fn clamp_f(lo: f32, x: f32, hi: f32) -> f32 {
    if x.is_nan() || x < lo {
        lo
    } else if x > hi {
        hi
    } else {
        x
    }
}

/// Clamp to the 0..=100 percent range.
pub fn clamp_percent(x: f32) -> f32 {
    clamp_f(0.0, x, 100.0)
}

/// Locate `x` on a sorted axis: returns the lower bin index and the
/// fractional position towards the next bin.  NaN lands on the first bin.
fn find_bin(bins: &[f32], x: f32) -> (usize, f32) {
    if bins.len() < 2 || x.is_nan() {
        return (0, 0.0);
    }
    let last = bins.len() - 1;
    if x <= bins[0] {
        return (0, 0.0);
    }
    if x >= bins[last] {
        return (last, 0.0);
    }
    let idx = bins
        .windows(2)
        .position(|w| x >= w[0] && x < w[1])
        .unwrap_or(last - 1);
    let span = bins[idx + 1] - bins[idx];
    let frac = if span > 0.0 { (x - bins[idx]) / span } else { 0.0 };
    (idx, frac)
}

/// Read-side seam for any 2D map lookup (pedal-to-target, trim).
pub trait ValueProvider3d {
    /// Look up the value at `(x, y)`.
    fn value(&self, x: f32, y: f32) -> f32;
}

// ───────────────────────────────────────────────────────────────
// 1D curve
// ───────────────────────────────────────────────────────────────

/// A calibration curve: sorted bins and one value per bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table2d {
    pub bins: Vec<f32>,
    pub values: Vec<f32>,
}

impl Table2d {
    pub fn new(bins: &[f32], values: &[f32]) -> Self {
        Self {
            bins: bins.to_vec(),
            values: values.to_vec(),
        }
    }

    /// Constant curve returning `value` everywhere.
    pub fn constant(value: f32) -> Self {
        Self::new(&[0.0], &[value])
    }

    /// True when bins and values line up and bins ascend.
    pub fn is_valid(&self) -> bool {
        !self.bins.is_empty()
            && self.bins.len() == self.values.len()
            && self.bins.windows(2).all(|w| w[0] <= w[1])
    }

    /// Interpolated lookup, clamped at both ends.  Returns 0 for a
    /// malformed curve.
    pub fn interpolate(&self, x: f32) -> f32 {
        if !self.is_valid() {
            return 0.0;
        }
        let (idx, frac) = find_bin(&self.bins, x);
        if frac == 0.0 {
            return self.values[idx];
        }
        let lo = self.values[idx];
        let hi = self.values[idx + 1];
        lo + (hi - lo) * frac
    }
}

// ───────────────────────────────────────────────────────────────
// 2D map
// ───────────────────────────────────────────────────────────────

/// A calibration map indexed by `(x, y)`.  `values[y_index][x_index]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table3d {
    pub x_bins: Vec<f32>,
    pub y_bins: Vec<f32>,
    pub values: Vec<Vec<f32>>,
}

impl Table3d {
    pub fn new(x_bins: &[f32], y_bins: &[f32], values: Vec<Vec<f32>>) -> Self {
        Self {
            x_bins: x_bins.to_vec(),
            y_bins: y_bins.to_vec(),
            values,
        }
    }

    /// A map filled with one value.
    pub fn filled(x_bins: &[f32], y_bins: &[f32], value: f32) -> Self {
        let values = vec![vec![value; x_bins.len()]; y_bins.len()];
        Self::new(x_bins, y_bins, values)
    }

    pub fn is_valid(&self) -> bool {
        let sorted = |b: &[f32]| !b.is_empty() && b.windows(2).all(|w| w[0] <= w[1]);
        sorted(&self.x_bins)
            && sorted(&self.y_bins)
            && self.values.len() == self.y_bins.len()
            && self.values.iter().all(|row| row.len() == self.x_bins.len())
    }

    /// Bilinear lookup, clamped at the edges.  Returns 0 for a malformed map.
    pub fn get_value(&self, x: f32, y: f32) -> f32 {
        if !self.is_valid() {
            return 0.0;
        }
        let (xi, xf) = find_bin(&self.x_bins, x);
        let (yi, yf) = find_bin(&self.y_bins, y);
        let xn = if xf > 0.0 { xi + 1 } else { xi };
        let yn = if yf > 0.0 { yi + 1 } else { yi };

        let v00 = self.values[yi][xi];
        let v10 = self.values[yi][xn];
        let v01 = self.values[yn][xi];
        let v11 = self.values[yn][xn];

        let low = v00 + (v10 - v00) * xf;
        let high = v01 + (v11 - v01) * xf;
        low + (high - low) * yf
    }
}

impl ValueProvider3d for Table3d {
    fn value(&self, x: f32, y: f32) -> f32 {
        self.get_value(x, y)
    }
}
