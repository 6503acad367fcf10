//! Pixel layout transforms.
//!
//! - [`rgb_to_rgba`] / [`rgba_to_rgb`] - interleaved format conversion
//! - [`aligned_bytes_per_row`] - row stride rounded to a copy alignment
//! - [`add_row_padding`] / [`remove_row_padding`] - linear-buffer row padding
//!
//! GPU buffer/texture copies require every row to start on a fixed byte
//! boundary (256 bytes on wgpu). Padding is a pure layout change and
//! round-trips exactly.

use rayon::prelude::*;

use crate::error::check_len;
use crate::{OpsError, OpsResult};

/// Row alignment required for texture <-> buffer copies.
pub const ROW_ALIGNMENT: u32 = 256;

/// Bytes per RGB pixel.
pub const RGB_BPP: usize = 3;

/// Bytes per RGBA pixel.
pub const RGBA_BPP: usize = 4;

/// Converts interleaved RGB to RGBA, forcing alpha to 255.
pub fn rgb_to_rgba(rgb: &[u8], width: u32, height: u32) -> OpsResult<Vec<u8>> {
    check_len(rgb, width, height, RGB_BPP)?;
    let mut rgba = vec![255u8; width as usize * height as usize * RGBA_BPP];
    rgba.par_chunks_mut(RGBA_BPP)
        .zip(rgb.par_chunks(RGB_BPP))
        .for_each(|(dst, src)| dst[..3].copy_from_slice(src));
    Ok(rgba)
}

/// Converts interleaved RGBA to RGB, discarding alpha.
pub fn rgba_to_rgb(rgba: &[u8], width: u32, height: u32) -> OpsResult<Vec<u8>> {
    check_len(rgba, width, height, RGBA_BPP)?;
    let mut rgb = vec![0u8; width as usize * height as usize * RGB_BPP];
    rgb.par_chunks_mut(RGB_BPP)
        .zip(rgba.par_chunks(RGBA_BPP))
        .for_each(|(dst, src)| dst.copy_from_slice(&src[..3]));
    Ok(rgb)
}

/// Rounds `unpadded` up to the next multiple of `alignment`.
pub fn aligned_bytes_per_row(unpadded: usize, alignment: u32) -> OpsResult<usize> {
    if alignment == 0 {
        return Err(OpsError::InvalidParameter("row alignment must be non-zero".into()));
    }
    Ok(unpadded.div_ceil(alignment as usize) * alignment as usize)
}

/// Copies tightly packed rows into a buffer whose rows are `alignment`-aligned.
///
/// Padding bytes are zero.
pub fn add_row_padding(
    data: &[u8],
    width: u32,
    height: u32,
    bpp: usize,
    alignment: u32,
) -> OpsResult<Vec<u8>> {
    check_len(data, width, height, bpp)?;
    let row = width as usize * bpp;
    let stride = aligned_bytes_per_row(row, alignment)?;
    if stride == row {
        return Ok(data.to_vec());
    }

    let mut padded = vec![0u8; stride * height as usize];
    if row > 0 {
        for (dst, src) in padded.chunks_exact_mut(stride).zip(data.chunks_exact(row)) {
            dst[..row].copy_from_slice(src);
        }
    }
    Ok(padded)
}

/// Strips row padding produced by [`add_row_padding`] (or a GPU copy).
pub fn remove_row_padding(
    padded: &[u8],
    width: u32,
    height: u32,
    bpp: usize,
    alignment: u32,
) -> OpsResult<Vec<u8>> {
    let row = width as usize * bpp;
    let stride = aligned_bytes_per_row(row, alignment)?;
    let expected = stride * height as usize;
    if padded.len() < expected {
        return Err(OpsError::SizeMismatch { expected, actual: padded.len() });
    }
    if stride == row {
        return Ok(padded[..expected].to_vec());
    }

    let mut data = Vec::with_capacity(row * height as usize);
    if row > 0 {
        for src in padded.chunks_exact(stride).take(height as usize) {
            data.extend_from_slice(&src[..row]);
        }
    }
    Ok(data)
}
