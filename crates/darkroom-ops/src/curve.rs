//! Tone-curve LUT generation.
//!
//! Control points are fitted with a Fritsch-Carlson monotone cubic Hermite
//! spline and sampled into a 256-entry byte table. The table is built once on
//! the host and uploaded as-is, so both backends index the same bytes.
//!
//! # Example
//!
//! ```rust
//! use darkroom_ops::curve::{CurvePoint, ToneCurveLut};
//!
//! let lut = ToneCurveLut::from_points(&[
//!     CurvePoint::new(0.0, 0.0),
//!     CurvePoint::new(0.5, 0.6),
//!     CurvePoint::new(1.0, 1.0),
//! ]);
//! assert_eq!(lut.get(0), 0);
//! assert_eq!(lut.get(255), 255);
//! ```

use rayon::prelude::*;
use tracing::{trace, warn};

use crate::error::check_len;
use crate::OpsResult;

/// Number of LUT entries.
pub const LUT_SIZE: usize = 256;

/// Distance from (0,0)-(1,1) under which a two-point curve is the identity.
pub const IDENTITY_TOLERANCE: f64 = 1e-3;

/// Secants and segment widths below this are treated as zero.
const FLAT_EPSILON: f64 = 1e-9;

/// Tangent-to-secant ratio bound that forbids overshoot.
const MAX_TANGENT_RATIO: f64 = 3.0;

/// Curve control point, both coordinates normalized to [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CurvePoint {
    /// Input level.
    pub x: f64,
    /// Output level.
    pub y: f64,
}

impl CurvePoint {
    /// Creates a control point.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// 256-entry byte lookup table: `lut[input] = output`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ToneCurveLut([u8; LUT_SIZE]);

impl ToneCurveLut {
    /// The identity table (`lut[i] == i`).
    pub fn identity() -> Self {
        let mut table = [0u8; LUT_SIZE];
        for (i, v) in table.iter_mut().enumerate() {
            *v = i as u8;
        }
        Self(table)
    }

    /// Wraps an existing table.
    pub const fn from_table(table: [u8; LUT_SIZE]) -> Self {
        Self(table)
    }

    /// Fits and samples a curve through `points`.
    ///
    /// Points are used in the order given. Degenerate inputs:
    /// - no points: identity
    /// - one point: constant table at that point's output
    /// - two points within [`IDENTITY_TOLERANCE`] of (0,0),(1,1): identity
    pub fn from_points(points: &[CurvePoint]) -> Self {
        match points.len() {
            0 => return Self::identity(),
            1 => return Self([unit_to_level(points[0].y); LUT_SIZE]),
            _ => {}
        }
        if is_identity_curve(points) {
            return Self::identity();
        }
        if points.windows(2).any(|w| w[1].x < w[0].x) {
            warn!(count = points.len(), "tone curve points are not sorted by x; using them as given");
        }

        let spline = MonotoneSpline::new(points);
        let mut table = [0u8; LUT_SIZE];
        for (i, v) in table.iter_mut().enumerate() {
            let x = i as f64 / (LUT_SIZE - 1) as f64;
            *v = unit_to_level(spline.eval(x));
        }
        trace!(points = points.len(), "generated tone curve lut");
        Self(table)
    }

    /// Output level for `level`.
    #[inline]
    pub fn get(&self, level: u8) -> u8 {
        self.0[level as usize]
    }

    /// Raw table.
    pub fn as_bytes(&self) -> &[u8; LUT_SIZE] {
        &self.0
    }

    /// Whether every entry maps to itself.
    pub fn is_identity(&self) -> bool {
        self.0.iter().enumerate().all(|(i, &v)| i == v as usize)
    }
}

impl Default for ToneCurveLut {
    fn default() -> Self {
        Self::identity()
    }
}

impl std::fmt::Debug for ToneCurveLut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToneCurveLut")
            .field("first", &self.0[0])
            .field("mid", &self.0[LUT_SIZE / 2])
            .field("last", &self.0[LUT_SIZE - 1])
            .field("identity", &self.is_identity())
            .finish()
    }
}

/// True for exactly two points within tolerance of (0,0) and (1,1).
pub fn is_identity_curve(points: &[CurvePoint]) -> bool {
    let near = |a: f64, b: f64| (a - b).abs() <= IDENTITY_TOLERANCE;
    match points {
        [a, b] => near(a.x, 0.0) && near(a.y, 0.0) && near(b.x, 1.0) && near(b.y, 1.0),
        _ => false,
    }
}

/// Maps every byte of an RGB buffer through `lut`.
pub fn apply_lut(rgb: &[u8], width: u32, height: u32, lut: &ToneCurveLut) -> OpsResult<Vec<u8>> {
    check_len(rgb, width, height, 3)?;
    Ok(rgb.par_iter().map(|&v| lut.get(v)).collect())
}

fn unit_to_level(v: f64) -> u8 {
    if v.is_nan() {
        return 0;
    }
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Fritsch-Carlson monotone cubic Hermite spline.
struct MonotoneSpline {
    xs: Vec<f64>,
    ys: Vec<f64>,
    tangents: Vec<f64>,
}

impl MonotoneSpline {
    /// Requires at least two points.
    fn new(points: &[CurvePoint]) -> Self {
        let n = points.len();
        let xs: Vec<f64> = points.iter().map(|p| p.x).collect();
        let ys: Vec<f64> = points.iter().map(|p| p.y).collect();

        let widths: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();
        let secants: Vec<f64> = widths
            .iter()
            .zip(ys.windows(2))
            .map(|(&h, y)| if h.abs() < FLAT_EPSILON { 0.0 } else { (y[1] - y[0]) / h })
            .collect();

        let mut tangents = vec![0.0; n];
        tangents[0] = secants[0];
        tangents[n - 1] = secants[n - 2];
        for i in 1..n - 1 {
            let (d0, d1) = (secants[i - 1], secants[i]);
            if d0.abs() < FLAT_EPSILON || d1.abs() < FLAT_EPSILON || d0.signum() != d1.signum() {
                continue;
            }
            let (h0, h1) = (widths[i - 1], widths[i]);
            let w1 = 2.0 * h1 + h0;
            let w2 = h1 + 2.0 * h0;
            tangents[i] = (w1 + w2) / (w1 / d0 + w2 / d1);
        }

        for (i, &d) in secants.iter().enumerate() {
            if d.abs() < FLAT_EPSILON {
                tangents[i] = 0.0;
                tangents[i + 1] = 0.0;
                continue;
            }
            let limit = MAX_TANGENT_RATIO * d.abs();
            tangents[i] = tangents[i].clamp(-limit, limit);
            tangents[i + 1] = tangents[i + 1].clamp(-limit, limit);
        }

        Self { xs, ys, tangents }
    }

    fn eval(&self, x: f64) -> f64 {
        let last = self.xs.len() - 1;
        if x <= self.xs[0] {
            return self.ys[0];
        }
        if x >= self.xs[last] {
            return self.ys[last];
        }

        let (mut lo, mut hi) = (0, last);
        while hi - lo > 1 {
            let mid = (lo + hi) / 2;
            if self.xs[mid] <= x {
                lo = mid;
            } else {
                hi = mid;
            }
        }

        let h = self.xs[hi] - self.xs[lo];
        if h.abs() < FLAT_EPSILON {
            return self.ys[lo];
        }
        let t = (x - self.xs[lo]) / h;
        let t2 = t * t;
        let t3 = t2 * t;
        let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
        let h10 = t3 - 2.0 * t2 + t;
        let h01 = -2.0 * t3 + 3.0 * t2;
        let h11 = t3 - t2;
        h00 * self.ys[lo] + h10 * h * self.tangents[lo] + h01 * self.ys[hi] + h11 * h * self.tangents[hi]
    }
}
