//! Same-size rotation about the image centre.

use glam::Vec2;
use rayon::prelude::*;

use crate::error::check_len;
use crate::pixel::{to_byte, to_unit};
use crate::OpsResult;

/// Angles with a smaller magnitude (degrees) are treated as no rotation.
pub const ROTATION_EPSILON_DEG: f32 = 0.01;

/// Whether `degrees` is close enough to zero to skip resampling.
pub fn is_negligible_rotation(degrees: f32) -> bool {
    degrees.abs() < ROTATION_EPSILON_DEG
}

/// Source position (pixel units, centre-based) for output position `p`.
///
/// Positive angles turn the picture clockwise on screen.
#[inline]
pub fn source_position(p: Vec2, center: Vec2, sin: f32, cos: f32) -> Vec2 {
    let q = p - center;
    center + Vec2::new(q.x * cos + q.y * sin, q.y * cos - q.x * sin)
}

#[inline]
fn fetch(rgb: &[u8], width: i64, height: i64, x: i64, y: i64) -> [f32; 3] {
    if x < 0 || y < 0 || x >= width || y >= height {
        return [0.0; 3];
    }
    let i = ((y * width + x) * 3) as usize;
    [to_unit(rgb[i]), to_unit(rgb[i + 1]), to_unit(rgb[i + 2])]
}

/// Bilinear sample at a continuous position; pixel centres sit at `n + 0.5`.
pub fn sample_bilinear(rgb: &[u8], width: u32, height: u32, pos: Vec2) -> [f32; 3] {
    let s = pos - Vec2::splat(0.5);
    let x0 = s.x.floor();
    let y0 = s.y.floor();
    let fx = s.x - x0;
    let fy = s.y - y0;
    let (w, h) = (width as i64, height as i64);
    let (x0, y0) = (x0 as i64, y0 as i64);

    let c00 = fetch(rgb, w, h, x0, y0);
    let c10 = fetch(rgb, w, h, x0 + 1, y0);
    let c01 = fetch(rgb, w, h, x0, y0 + 1);
    let c11 = fetch(rgb, w, h, x0 + 1, y0 + 1);

    let mut out = [0.0; 3];
    for i in 0..3 {
        let top = c00[i] + (c10[i] - c00[i]) * fx;
        let bottom = c01[i] + (c11[i] - c01[i]) * fx;
        out[i] = top + (bottom - top) * fy;
    }
    out
}

/// Rotates an RGB buffer by `degrees`, keeping the canvas size.
///
/// Areas uncovered by the rotated picture are black.
pub fn rotate(rgb: &[u8], width: u32, height: u32, degrees: f32) -> OpsResult<Vec<u8>> {
    check_len(rgb, width, height, 3)?;
    let row = width as usize * 3;
    let mut out = vec![0u8; rgb.len()];
    if row == 0 {
        return Ok(out);
    }

    let (sin, cos) = degrees.to_radians().sin_cos();
    let center = Vec2::new(width as f32, height as f32) * 0.5;

    out.par_chunks_mut(row).enumerate().for_each(|(y, dst)| {
        for x in 0..width as usize {
            let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
            let c = sample_bilinear(rgb, width, height, source_position(p, center, sin, cos));
            let i = x * 3;
            dst[i] = to_byte(c[0]);
            dst[i + 1] = to_byte(c[1]);
            dst[i + 2] = to_byte(c[2]);
        }
    });
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(w: u32, h: u32) -> Vec<u8> {
        (0..w * h * 3).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[test]
    fn test_zero_rotation_is_exact() {
        let src = ramp(5, 3);
        assert_eq!(rotate(&src, 5, 3, 0.0).unwrap(), src);
    }

    #[test]
    fn test_half_turn_mirrors_both_axes() {
        let (w, h) = (4u32, 2u32);
        let src = ramp(w, h);
        let out = rotate(&src, w, h, 180.0).unwrap();
        for y in 0..h as usize {
            for x in 0..w as usize {
                let o = (y * w as usize + x) * 3;
                let s = ((h as usize - 1 - y) * w as usize + (w as usize - 1 - x)) * 3;
                for c in 0..3 {
                    assert!((out[o + c] as i32 - src[s + c] as i32).abs() <= 1);
                }
            }
        }
    }

    #[test]
    fn test_corners_go_black_at_45() {
        let (w, h) = (16u32, 16u32);
        let src = vec![200u8; (w * h * 3) as usize];
        let out = rotate(&src, w, h, 45.0).unwrap();
        assert_eq!(out.len(), src.len());
        assert_eq!(&out[..3], &[0, 0, 0]);
        let mid = ((8 * w + 8) * 3) as usize;
        assert_eq!(out[mid], 200);
    }

    #[test]
    fn test_negligible_rotation() {
        assert!(is_negligible_rotation(0.0001));
        assert!(is_negligible_rotation(-0.005));
        assert!(!is_negligible_rotation(45.0));
    }
}
