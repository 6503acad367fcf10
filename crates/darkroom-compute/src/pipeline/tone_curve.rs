//! Tone-curve LUT kernel.

use darkroom_ops::{ToneCurveLut, LUT_SIZE};

use super::{preamble, BindingKind, VariantFlags};
use crate::shaders;

pub const BINDINGS: &[BindingKind] = &[
    BindingKind::InputTexture,
    BindingKind::OutputTexture,
    BindingKind::Storage,
];

/// LUT widened to one `u32` per entry for the storage buffer.
pub fn lut_words(lut: &ToneCurveLut) -> [u32; LUT_SIZE] {
    let mut words = [0u32; LUT_SIZE];
    for (w, &b) in words.iter_mut().zip(lut.as_bytes()) {
        *w = b as u32;
    }
    words
}

/// Kernel source.
pub fn source() -> String {
    format!("{}{}{}", preamble(VariantFlags::empty()), shaders::COMMON, shaders::TONE_CURVE)
}
