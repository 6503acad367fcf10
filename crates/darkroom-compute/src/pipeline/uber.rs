//! Fused adjustments + tone-curve kernel.
//!
//! Stage switches are compile-time constants, so each stage combination is
//! its own cached variant.

use super::{preamble, BindingKind, VariantFlags};
use crate::shaders;

pub use super::adjustments::AdjustParams;
pub use super::tone_curve::lut_words;

pub const BINDINGS: &[BindingKind] = &[
    BindingKind::InputTexture,
    BindingKind::OutputTexture,
    BindingKind::Uniform,
    BindingKind::Storage,
];

/// Stage bits for the requested stages.
pub fn stage_flags(adjustments: bool, tone_curve: bool) -> VariantFlags {
    let mut flags = VariantFlags::empty();
    flags.set(VariantFlags::STAGE_ADJUSTMENTS, adjustments);
    flags.set(VariantFlags::STAGE_TONE_CURVE, tone_curve);
    flags
}

/// Kernel source for a variant.
pub fn source(flags: VariantFlags) -> String {
    format!(
        "{}const APPLY_ADJUSTMENTS: bool = {};\nconst APPLY_TONE_CURVE: bool = {};\n{}{}",
        preamble(flags),
        flags.contains(VariantFlags::STAGE_ADJUSTMENTS),
        flags.contains(VariantFlags::STAGE_TONE_CURVE),
        shaders::COMMON,
        shaders::UBER,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_constants() {
        let src = source(stage_flags(true, false));
        assert!(src.contains("const APPLY_ADJUSTMENTS: bool = true;"));
        assert!(src.contains("const APPLY_TONE_CURVE: bool = false;"));

        let src = source(stage_flags(false, true) | VariantFlags::HALF_PRECISION);
        assert!(src.starts_with("enable f16;"));
        assert!(src.contains("const APPLY_TONE_CURVE: bool = true;"));
    }
}
