//! Scalar pixel helpers shared by every kernel.
//!
//! The accelerated kernels mirror these exact formulas so that a byte that
//! goes through either backend lands on the same output byte.

/// BT.709 luma weights.
pub const LUMA_709: [f32; 3] = [0.2126, 0.7152, 0.0722];

/// Byte level to unit float.
#[inline]
pub fn to_unit(v: u8) -> f32 {
    v as f32 / 255.0
}

/// Unit float to byte level, round-half-up after clamping.
#[inline]
pub fn to_byte(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0 + 0.5).floor() as u8
}

/// BT.709 luminance of a unit RGB triple.
#[inline]
pub fn luma(rgb: [f32; 3]) -> f32 {
    LUMA_709[0] * rgb[0] + LUMA_709[1] * rgb[1] + LUMA_709[2] * rgb[2]
}

/// Quintic smootherstep between `edge0` and `edge1`.
///
/// Degenerates to a hard step at `edge0` when the edges coincide.
#[inline]
pub fn smootherstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    if edge1 - edge0 <= f32::EPSILON {
        return if x < edge0 { 0.0 } else { 1.0 };
    }
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * t * (t * (t * 6.0 - 15.0) + 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_byte_roundtrip() {
        for v in 0..=255u8 {
            assert_eq!(to_byte(to_unit(v)), v);
        }
    }

    #[test]
    fn test_to_byte_clamps() {
        assert_eq!(to_byte(-0.5), 0);
        assert_eq!(to_byte(1.5), 255);
        assert_eq!(to_byte(f32::NAN), 0);
    }

    #[test]
    fn test_smootherstep_edges() {
        assert_eq!(smootherstep(0.0, 1.0, -1.0), 0.0);
        assert_eq!(smootherstep(0.0, 1.0, 2.0), 1.0);
        assert!((smootherstep(0.0, 1.0, 0.5) - 0.5).abs() < 1e-6);
        assert_eq!(smootherstep(0.5, 0.5, 0.4), 0.0);
        assert_eq!(smootherstep(0.5, 0.5, 0.6), 1.0);
    }
}
