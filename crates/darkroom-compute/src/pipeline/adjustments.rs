//! Global adjustments kernel.

use bytemuck::{Pod, Zeroable};
use darkroom_ops::Adjustments;

use super::{preamble, BindingKind, VariantFlags};
use crate::shaders;

pub const BINDINGS: &[BindingKind] = &[
    BindingKind::InputTexture,
    BindingKind::OutputTexture,
    BindingKind::Uniform,
];

/// Adjustment sliders as uploaded: exposure is pre-converted to a gain.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct AdjustParams {
    /// gain, brightness, contrast, highlights
    pub a: [f32; 4],
    /// shadows, temperature, tint, saturation
    pub b: [f32; 4],
    /// vibrance, padding
    pub c: [f32; 4],
}

impl AdjustParams {
    pub fn new(adj: &Adjustments) -> Self {
        Self {
            a: [adj.exposure.exp2(), adj.brightness, adj.contrast, adj.highlights],
            b: [adj.shadows, adj.temperature, adj.tint, adj.saturation],
            c: [adj.vibrance, 0.0, 0.0, 0.0],
        }
    }
}

/// Kernel source for a variant.
pub fn source(flags: VariantFlags) -> String {
    format!("{}{}{}", preamble(flags), shaders::COMMON, shaders::ADJUSTMENTS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_layout() {
        assert_eq!(std::mem::size_of::<AdjustParams>(), 48);
        let p = AdjustParams::new(&Adjustments { exposure: 1.0, vibrance: 0.3, ..Default::default() });
        assert_eq!(p.a[0], 2.0);
        assert_eq!(p.c, [0.3, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_half_variant_source() {
        let half = source(VariantFlags::HALF_PRECISION);
        assert!(half.starts_with("enable f16;"));
        assert!(!source(VariantFlags::empty()).contains("enable f16"));
    }
}
