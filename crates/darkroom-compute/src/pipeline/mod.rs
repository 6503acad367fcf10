//! Operation pipelines and their compile cache.
//!
//! Each operation module describes its kernel independently of any device:
//! WGSL source per variant, bind-group layout, workgroup shape and the
//! `bytemuck` parameter blocks it uploads. The wgpu backend turns these into
//! compiled pipelines stored in a [`PipelineCache`].

mod cache;

pub mod adjustments;
pub mod histogram;
pub mod mask;
pub mod rotation;
pub mod tone_curve;
pub mod uber;

pub use cache::{CacheStats, PipelineCache};

use std::fmt;
use std::ops::BitOr;

use crate::backend::Features;

/// Edit operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpId {
    Adjustments,
    ToneCurve,
    Mask,
    Histogram,
    Rotation,
    Uber,
}

impl OpId {
    /// All operations.
    pub const ALL: [OpId; 6] = [
        Self::Adjustments,
        Self::ToneCurve,
        Self::Mask,
        Self::Histogram,
        Self::Rotation,
        Self::Uber,
    ];

    /// Get human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Adjustments => "adjustments",
            Self::ToneCurve => "tone_curve",
            Self::Mask => "mask",
            Self::Histogram => "histogram",
            Self::Rotation => "rotation",
            Self::Uber => "uber",
        }
    }

    /// Capability-dependent variant bits this operation compiles with.
    pub fn variant_mask(&self) -> VariantFlags {
        match self {
            Self::Adjustments => VariantFlags::HALF_PRECISION,
            Self::Uber => VariantFlags::HALF_PRECISION
                | VariantFlags::STAGE_ADJUSTMENTS
                | VariantFlags::STAGE_TONE_CURVE,
            Self::Histogram => VariantFlags::SUBGROUPS,
            Self::ToneCurve | Self::Mask | Self::Rotation => VariantFlags::empty(),
        }
    }
}

impl OpId {
    /// Bind-group layout of the operation's kernel.
    pub fn bindings(&self) -> &'static [BindingKind] {
        match self {
            Self::Adjustments => adjustments::BINDINGS,
            Self::ToneCurve => tone_curve::BINDINGS,
            Self::Mask => mask::BINDINGS,
            Self::Histogram => histogram::BINDINGS,
            Self::Rotation => rotation::BINDINGS,
            Self::Uber => uber::BINDINGS,
        }
    }
}

/// WGSL source of `op` compiled with `flags`.
pub fn kernel_source(op: OpId, flags: VariantFlags) -> String {
    match op {
        OpId::Adjustments => adjustments::source(flags),
        OpId::ToneCurve => tone_curve::source(),
        OpId::Mask => mask::source(),
        OpId::Histogram => histogram::source(flags),
        OpId::Rotation => rotation::source(),
        OpId::Uber => uber::source(flags),
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shader variant bitset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VariantFlags(u32);

impl VariantFlags {
    /// Arithmetic in `f16`.
    ///
    /// Results may differ from the CPU fallback by a few levels; byte parity
    /// holds only for `f32` variants. Never selected unless the caller opts in.
    pub const HALF_PRECISION: Self = Self(1);
    /// Subgroup-aggregated atomics.
    pub const SUBGROUPS: Self = Self(1 << 1);
    /// Uber kernel runs the adjustments stage.
    pub const STAGE_ADJUSTMENTS: Self = Self(1 << 2);
    /// Uber kernel runs the tone-curve stage.
    pub const STAGE_TONE_CURVE: Self = Self(1 << 3);

    const NAMES: [(Self, &'static str); 4] = [
        (Self::HALF_PRECISION, "f16"),
        (Self::SUBGROUPS, "subgroups"),
        (Self::STAGE_ADJUSTMENTS, "adjust"),
        (Self::STAGE_TONE_CURVE, "curve"),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn set(&mut self, other: Self, value: bool) {
        if value {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }

    /// Capability bits for a device. Half precision needs both device
    /// support and `prefer_half`.
    pub fn from_capabilities(features: &Features, prefer_half: bool) -> Self {
        let mut flags = Self::empty();
        flags.set(Self::HALF_PRECISION, features.f16 && prefer_half);
        flags.set(Self::SUBGROUPS, features.subgroups);
        flags
    }

    /// Bits that depend on optional device features.
    pub const fn optional_features() -> Self {
        Self(Self::HALF_PRECISION.0 | Self::SUBGROUPS.0)
    }
}

impl BitOr for VariantFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for VariantFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            f.write_str("base")
        } else {
            f.write_str(&names.join("+"))
        }
    }
}

/// Kind of one bind-group entry, in binding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    /// Sampled RGBA8 input texture.
    InputTexture,
    /// Write-only RGBA8 storage texture.
    OutputTexture,
    /// Uniform block.
    Uniform,
    /// Read-only storage buffer.
    Storage,
    /// Read-write storage buffer.
    StorageReadWrite,
}

/// Workgroup edge of the 2D image kernels.
pub const WORKGROUP_EDGE: u32 = 16;

/// Workgroups needed to cover an image.
pub fn workgroups(width: u32, height: u32) -> (u32, u32, u32) {
    (width.div_ceil(WORKGROUP_EDGE), height.div_ceil(WORKGROUP_EDGE), 1)
}

/// Variant preamble: precision alias and optional extensions.
pub fn preamble(flags: VariantFlags) -> String {
    if flags.contains(VariantFlags::HALF_PRECISION) {
        "enable f16;\nalias real = f16;\n".to_string()
    } else {
        "alias real = f32;\n".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_capabilities() {
        let all = Features { f16: true, subgroups: true, ..Default::default() };
        assert_eq!(
            VariantFlags::from_capabilities(&all, true),
            VariantFlags::HALF_PRECISION | VariantFlags::SUBGROUPS
        );
        assert_eq!(VariantFlags::from_capabilities(&all, false), VariantFlags::SUBGROUPS);

        let none = Features::default();
        assert_eq!(VariantFlags::from_capabilities(&none, true), VariantFlags::empty());
    }

    #[test]
    fn test_variant_mask_limits_bits() {
        let caps = VariantFlags::HALF_PRECISION | VariantFlags::SUBGROUPS;
        assert_eq!(caps.intersection(OpId::Histogram.variant_mask()), VariantFlags::SUBGROUPS);
        assert_eq!(caps.intersection(OpId::Adjustments.variant_mask()), VariantFlags::HALF_PRECISION);
        assert_eq!(caps.intersection(OpId::Rotation.variant_mask()), VariantFlags::empty());
    }

    #[test]
    fn test_display() {
        assert_eq!(VariantFlags::empty().to_string(), "base");
        let f = VariantFlags::SUBGROUPS | VariantFlags::STAGE_TONE_CURVE;
        assert_eq!(f.to_string(), "subgroups+curve");
    }

    #[test]
    fn test_preamble() {
        assert!(preamble(VariantFlags::empty()).contains("alias real = f32;"));
        let half = preamble(VariantFlags::HALF_PRECISION);
        assert!(half.starts_with("enable f16;"));
        assert!(half.contains("alias real = f16;"));
    }

    #[test]
    fn test_every_kernel_declares_its_bindings() {
        for op in OpId::ALL {
            let src = kernel_source(op, op.variant_mask());
            assert!(src.contains("@compute @workgroup_size(16, 16)"), "{op}");
            for binding in 0..op.bindings().len() {
                assert!(src.contains(&format!("@binding({binding})")), "{op} binding {binding}");
            }
            assert!(!src.contains(&format!("@binding({})", op.bindings().len())), "{op}");
        }
    }

    #[test]
    fn test_workgroups_cover_image() {
        assert_eq!(workgroups(1, 1), (1, 1, 1));
        assert_eq!(workgroups(16, 17), (1, 2, 1));
        assert_eq!(workgroups(1920, 1080), (120, 68, 1));
    }
}
