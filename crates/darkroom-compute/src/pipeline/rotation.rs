//! Rotation kernel.

use bytemuck::{Pod, Zeroable};

use super::{preamble, BindingKind, VariantFlags};
use crate::shaders;

pub const BINDINGS: &[BindingKind] = &[
    BindingKind::InputTexture,
    BindingKind::OutputTexture,
    BindingKind::Uniform,
];

/// Rotation about the image centre.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct RotateParams {
    pub center: [f32; 2],
    pub sin_cos: [f32; 2],
}

impl RotateParams {
    pub fn new(width: u32, height: u32, radians: f32) -> Self {
        let (sin, cos) = radians.sin_cos();
        Self {
            center: [width as f32 * 0.5, height as f32 * 0.5],
            sin_cos: [sin, cos],
        }
    }
}

/// Kernel source.
pub fn source() -> String {
    format!("{}{}{}", preamble(VariantFlags::empty()), shaders::COMMON, shaders::ROTATION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_params() {
        let p = RotateParams::new(640, 480, std::f32::consts::FRAC_PI_2);
        assert_eq!(p.center, [320.0, 240.0]);
        assert_relative_eq!(p.sin_cos[0], 1.0);
        assert_relative_eq!(p.sin_cos[1], 0.0, epsilon = 1e-6);
        assert_eq!(std::mem::size_of::<RotateParams>(), 16);
    }
}
