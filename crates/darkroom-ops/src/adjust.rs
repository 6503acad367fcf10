//! Global tonal and colour adjustments.
//!
//! All sliders are zero at identity. The per-pixel function works on unit
//! floats and leaves clamping to the final quantization so that masks can
//! blend unclamped intermediates.

use rayon::prelude::*;

use crate::error::check_len;
use crate::pixel::{luma, smootherstep, to_byte, to_unit};
use crate::OpsResult;

/// Strength of the temperature/tint channel offsets at slider = 1.
const WHITE_BALANCE_SCALE: f32 = 0.1;
/// Strength of the shadows/highlights lift at slider = 1.
const TONE_RANGE_SCALE: f32 = 0.25;

/// Adjustment sliders.
///
/// `exposure` is in stops; every other slider is in [-1, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Adjustments {
    /// Exposure in stops.
    pub exposure: f32,
    /// Additive brightness.
    pub brightness: f32,
    /// Contrast around mid-grey.
    pub contrast: f32,
    /// Lift (positive) or crush (negative) of the upper tones.
    pub highlights: f32,
    /// Lift (positive) or crush (negative) of the lower tones.
    pub shadows: f32,
    /// Warm (positive) / cool (negative) balance.
    pub temperature: f32,
    /// Magenta (positive) / green (negative) balance.
    pub tint: f32,
    /// Linear saturation.
    pub saturation: f32,
    /// Saturation weighted towards muted colours.
    pub vibrance: f32,
}

impl Adjustments {
    /// Whether every slider is at its neutral position.
    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }
}

/// Applies `adj` to one unit RGB triple. The result is not clamped.
pub fn adjust_pixel(rgb: [f32; 3], adj: &Adjustments) -> [f32; 3] {
    let gain = adj.exposure.exp2();
    let mut c = rgb.map(|v| v * gain + adj.brightness * 0.5);

    c[0] += adj.temperature * WHITE_BALANCE_SCALE;
    c[2] -= adj.temperature * WHITE_BALANCE_SCALE;
    c[1] -= adj.tint * WHITE_BALANCE_SCALE;

    c = c.map(|v| (v - 0.5) * (1.0 + adj.contrast) + 0.5);

    let l = luma(c);
    let lift = adj.shadows * (1.0 - smootherstep(0.0, 0.5, l)) * TONE_RANGE_SCALE
        + adj.highlights * smootherstep(0.5, 1.0, l) * TONE_RANGE_SCALE;
    c = c.map(|v| v + lift);

    let grey = luma(c);
    c = c.map(|v| grey + (v - grey) * (1.0 + adj.saturation));

    let max = c[0].max(c[1]).max(c[2]);
    let min = c[0].min(c[1]).min(c[2]);
    let amount = adj.vibrance * (1.0 - (max - min).clamp(0.0, 1.0));
    let grey = luma(c);
    c.map(|v| grey + (v - grey) * (1.0 + amount))
}

/// Applies `adj` to an RGB buffer.
pub fn apply_adjustments(rgb: &[u8], width: u32, height: u32, adj: &Adjustments) -> OpsResult<Vec<u8>> {
    check_len(rgb, width, height, 3)?;
    let mut out = vec![0u8; rgb.len()];
    out.par_chunks_mut(3)
        .zip(rgb.par_chunks(3))
        .for_each(|(dst, src)| {
            let c = adjust_pixel([to_unit(src[0]), to_unit(src[1]), to_unit(src[2])], adj);
            dst[0] = to_byte(c[0]);
            dst[1] = to_byte(c[1]);
            dst[2] = to_byte(c[2]);
        });
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_identity_is_noop() {
        let adj = Adjustments::default();
        assert!(adj.is_identity());
        let px = [0.2, 0.5, 0.9];
        let out = adjust_pixel(px, &adj);
        for i in 0..3 {
            assert_abs_diff_eq!(out[i], px[i], epsilon = 1e-6);
        }
    }

    #[test]
    fn test_exposure_one_stop() {
        let adj = Adjustments { exposure: 1.0, ..Default::default() };
        let out = adjust_pixel([0.25, 0.25, 0.25], &adj);
        assert_abs_diff_eq!(out[0], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_desaturate_to_grey() {
        let adj = Adjustments { saturation: -1.0, ..Default::default() };
        let out = adjust_pixel([1.0, 0.0, 0.0], &adj);
        assert_abs_diff_eq!(out[0], out[1], epsilon = 1e-6);
        assert_abs_diff_eq!(out[1], out[2], epsilon = 1e-6);
        assert_abs_diff_eq!(out[0], 0.2126, epsilon = 1e-6);
    }

    #[test]
    fn test_contrast_keeps_mid_grey() {
        let adj = Adjustments { contrast: 0.8, ..Default::default() };
        let out = adjust_pixel([0.5, 0.5, 0.5], &adj);
        assert_abs_diff_eq!(out[0], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_apply_clamps_to_bytes() {
        let adj = Adjustments { exposure: 3.0, ..Default::default() };
        let out = apply_adjustments(&[200, 10, 0], 1, 1, &adj).unwrap();
        assert_eq!(out, vec![255, 80, 0]);
    }
}
