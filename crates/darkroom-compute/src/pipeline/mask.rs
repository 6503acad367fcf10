//! Mask-stack kernel.

use bytemuck::{Pod, Zeroable};
use darkroom_ops::{LinearKernel, RadialKernel};

use super::adjustments::AdjustParams;
use super::{preamble, BindingKind, VariantFlags};
use crate::shaders;

pub const BINDINGS: &[BindingKind] = &[
    BindingKind::InputTexture,
    BindingKind::OutputTexture,
    BindingKind::Uniform,
    BindingKind::Storage,
    BindingKind::Storage,
];

/// Mask counts.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MaskParams {
    /// linear count, radial count, padding
    pub counts: [u32; 4],
}

/// Linear mask with derived geometry.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct LinearMaskGpu {
    /// midpoint xy, direction xy
    pub mid_dir: [f32; 4],
    /// length, half width, invert
    pub shape: [f32; 4],
    pub adjust: AdjustParams,
}

impl LinearMaskGpu {
    pub fn new(k: &LinearKernel) -> Self {
        let d = k.end - k.start;
        let len = d.length();
        let mid = (k.start + k.end) * 0.5;
        Self {
            mid_dir: [mid.x, mid.y, d.x, d.y],
            shape: [len, len * k.feather * 0.5, flag(k.invert), 0.0],
            adjust: AdjustParams::new(&k.adjustments),
        }
    }
}

/// Radial mask with the rotation pre-resolved to sin/cos.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct RadialMaskGpu {
    /// centre xy, radius xy
    pub center_radius: [f32; 4],
    /// sin, cos, feather, invert
    pub shape: [f32; 4],
    pub adjust: AdjustParams,
}

impl RadialMaskGpu {
    pub fn new(k: &RadialKernel) -> Self {
        let (sin, cos) = k.rotation_rad.sin_cos();
        Self {
            center_radius: [k.center.x, k.center.y, k.radius.x, k.radius.y],
            shape: [sin, cos, k.feather, flag(k.invert)],
            adjust: AdjustParams::new(&k.adjustments),
        }
    }
}

fn flag(b: bool) -> f32 {
    if b { 1.0 } else { 0.0 }
}

/// Packed mask upload. Empty lists get one zeroed entry so the storage
/// bindings are never zero-sized; `params.counts` holds the real counts.
pub struct PackedMasks {
    pub params: MaskParams,
    pub linear: Vec<LinearMaskGpu>,
    pub radial: Vec<RadialMaskGpu>,
}

pub fn pack(linear: &[LinearKernel], radial: &[RadialKernel]) -> PackedMasks {
    let params = MaskParams { counts: [linear.len() as u32, radial.len() as u32, 0, 0] };
    let mut linear: Vec<_> = linear.iter().map(LinearMaskGpu::new).collect();
    let mut radial: Vec<_> = radial.iter().map(RadialMaskGpu::new).collect();
    if linear.is_empty() {
        linear.push(LinearMaskGpu::default());
    }
    if radial.is_empty() {
        radial.push(RadialMaskGpu::default());
    }
    PackedMasks { params, linear, radial }
}

/// Kernel source.
pub fn source() -> String {
    format!("{}{}{}", preamble(VariantFlags::empty()), shaders::COMMON, shaders::MASK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use darkroom_ops::{LinearMask, RadialMask};

    #[test]
    fn test_struct_sizes_match_wgsl() {
        assert_eq!(std::mem::size_of::<LinearMaskGpu>(), 80);
        assert_eq!(std::mem::size_of::<RadialMaskGpu>(), 80);
        assert_eq!(std::mem::size_of::<MaskParams>(), 16);
    }

    #[test]
    fn test_pack_counts_and_padding() {
        let linear = LinearMask { start: [0.0, 0.0], end: [1.0, 0.0], ..Default::default() }.to_kernel(100, 50);
        let packed = pack(&[linear], &[]);
        assert_eq!(packed.params.counts[..2], [1, 0]);
        assert_eq!(packed.linear.len(), 1);
        assert_eq!(packed.radial.len(), 1);
        assert_eq!(packed.linear[0].mid_dir, [50.0, 0.0, 100.0, 0.0]);
        assert_eq!(packed.linear[0].shape[0], 100.0);
    }

    #[test]
    fn test_radial_rotation_arrives_as_sin_cos() {
        let k = RadialMask { rotation_deg: 90.0, ..Default::default() }.to_kernel(10, 10);
        let gpu = RadialMaskGpu::new(&k);
        assert!((gpu.shape[0] - 1.0).abs() < 1e-6);
        assert!(gpu.shape[1].abs() < 1e-6);
    }
}
