//! CPU path used when no accelerator is ready or an accelerated call fails.

use darkroom_ops::{
    apply_adjustments, apply_lut, apply_masks, compute_histogram, rotate, Adjustments, Histogram,
    MaskStack, ToneCurveLut,
};

use crate::ComputeResult;

/// CPU implementations of every operation.
///
/// Images are tightly packed RGB8 (`width * height * 3` bytes). Methods are
/// pure: the input is never modified and every call returns a new buffer.
pub trait Fallback: Send + Sync {
    fn adjustments(&self, rgb: &[u8], width: u32, height: u32, adj: &Adjustments) -> ComputeResult<Vec<u8>>;

    fn tone_curve(&self, rgb: &[u8], width: u32, height: u32, lut: &ToneCurveLut) -> ComputeResult<Vec<u8>>;

    /// Adjustments then tone curve. Either stage may be skipped.
    fn uber(
        &self,
        rgb: &[u8],
        width: u32,
        height: u32,
        adj: Option<&Adjustments>,
        lut: Option<&ToneCurveLut>,
    ) -> ComputeResult<Vec<u8>> {
        let adjusted = match adj {
            Some(adj) => self.adjustments(rgb, width, height, adj)?,
            None => rgb.to_vec(),
        };
        match lut {
            Some(lut) => self.tone_curve(&adjusted, width, height, lut),
            None => Ok(adjusted),
        }
    }

    fn masks(&self, rgb: &[u8], width: u32, height: u32, stack: &MaskStack) -> ComputeResult<Vec<u8>>;

    fn histogram(&self, rgb: &[u8], width: u32, height: u32) -> ComputeResult<Histogram>;

    /// Rotation by `degrees` about the image centre.
    fn rotate(&self, rgb: &[u8], width: u32, height: u32, degrees: f32) -> ComputeResult<Vec<u8>>;
}

/// [`Fallback`] on the `darkroom-ops` kernels (rayon-parallel).
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuFallback;

impl Fallback for CpuFallback {
    fn adjustments(&self, rgb: &[u8], width: u32, height: u32, adj: &Adjustments) -> ComputeResult<Vec<u8>> {
        Ok(apply_adjustments(rgb, width, height, adj)?)
    }

    fn tone_curve(&self, rgb: &[u8], width: u32, height: u32, lut: &ToneCurveLut) -> ComputeResult<Vec<u8>> {
        Ok(apply_lut(rgb, width, height, lut)?)
    }

    fn masks(&self, rgb: &[u8], width: u32, height: u32, stack: &MaskStack) -> ComputeResult<Vec<u8>> {
        Ok(apply_masks(rgb, width, height, stack)?)
    }

    fn histogram(&self, rgb: &[u8], width: u32, height: u32) -> ComputeResult<Histogram> {
        Ok(compute_histogram(rgb, width, height)?)
    }

    fn rotate(&self, rgb: &[u8], width: u32, height: u32, degrees: f32) -> ComputeResult<Vec<u8>> {
        Ok(rotate(rgb, width, height, degrees)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use darkroom_ops::CurvePoint;

    #[test]
    fn test_uber_matches_composition() {
        let rgb: Vec<u8> = (0..48).map(|i| (i * 5) as u8).collect();
        let adj = Adjustments { exposure: 0.5, contrast: 0.2, ..Default::default() };
        let lut = ToneCurveLut::from_points(&[
            CurvePoint::new(0.0, 0.1),
            CurvePoint::new(0.5, 0.4),
            CurvePoint::new(1.0, 0.9),
        ]);

        let cpu = CpuFallback;
        let fused = cpu.uber(&rgb, 4, 4, Some(&adj), Some(&lut)).unwrap();
        let staged = cpu.adjustments(&rgb, 4, 4, &adj).unwrap();
        let staged = cpu.tone_curve(&staged, 4, 4, &lut).unwrap();
        assert_eq!(fused, staged);
    }

    #[test]
    fn test_uber_without_stages_copies() {
        let rgb = vec![7u8; 12];
        let out = CpuFallback.uber(&rgb, 2, 2, None, None).unwrap();
        assert_eq!(out, rgb);
        assert_ne!(out.as_ptr(), rgb.as_ptr());
    }

    #[test]
    fn test_size_mismatch_is_reported() {
        let err = CpuFallback.histogram(&[0u8; 5], 2, 1).unwrap_err();
        assert!(matches!(err, crate::ComputeError::Ops(_)));
    }
}
