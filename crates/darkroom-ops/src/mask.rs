//! Gradient masks with local adjustments.
//!
//! Masks are authored in normalized image coordinates with radial rotation
//! in degrees ([`LinearMask`], [`RadialMask`]). Before evaluation they are
//! resolved against the image size into pixel-space kernels
//! ([`LinearKernel`], [`RadialKernel`]) whose rotation is in radians; only
//! kernels ever reach a pixel loop or a GPU upload.
//!
//! # Blend order
//!
//! Enabled linear masks in list order, then enabled radial masks in list
//! order. Each blends onto the running colour:
//!
//! ```text
//! color = color * (1 - s) + adjusted(color) * s
//! ```

use glam::Vec2;
use rayon::prelude::*;

use crate::adjust::{adjust_pixel, Adjustments};
use crate::error::check_len;
use crate::pixel::{smootherstep, to_byte, to_unit};
use crate::{OpsError, OpsResult};

/// Maximum masks of each kind in one stack.
pub const MAX_MASKS_PER_KIND: usize = 8;

/// Strength below which a mask contributes nothing at a pixel.
pub const MIN_STRENGTH: f32 = 1e-4;

/// Geometry shorter than this (in pixels) produces no mask.
const DEGENERATE_EPSILON: f32 = 1e-6;

/// Linear (graduated) mask: full strength on the `start` side, none past `end`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LinearMask {
    /// Gradient start, normalized.
    pub start: [f32; 2],
    /// Gradient end, normalized.
    pub end: [f32; 2],
    /// Transition width as a fraction of the start-end distance.
    pub feather: f32,
    /// Disabled masks are skipped.
    pub enabled: bool,
    /// Swap the affected and unaffected sides.
    pub invert: bool,
    /// Local adjustments applied under the mask.
    pub adjustments: Adjustments,
}

impl Default for LinearMask {
    fn default() -> Self {
        Self {
            start: [0.5, 0.0],
            end: [0.5, 1.0],
            feather: 1.0,
            enabled: true,
            invert: false,
            adjustments: Adjustments::default(),
        }
    }
}

impl LinearMask {
    /// Resolves the mask against an image size.
    pub fn to_kernel(&self, width: u32, height: u32) -> LinearKernel {
        let size = Vec2::new(width as f32, height as f32);
        LinearKernel {
            start: Vec2::from(self.start) * size,
            end: Vec2::from(self.end) * size,
            feather: self.feather.clamp(0.0, 1.0),
            invert: self.invert,
            adjustments: self.adjustments,
        }
    }
}

/// Elliptical mask: full strength inside, feathered towards the rim.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RadialMask {
    /// Ellipse centre, normalized.
    pub center: [f32; 2],
    /// Semi-axes, normalized to width and height respectively.
    pub radius: [f32; 2],
    /// Ellipse rotation in degrees.
    #[cfg_attr(feature = "serde", serde(rename = "rotation"))]
    pub rotation_deg: f32,
    /// Fraction of the radius used for the soft edge.
    pub feather: f32,
    /// Disabled masks are skipped.
    pub enabled: bool,
    /// Affect the outside instead of the inside.
    pub invert: bool,
    /// Local adjustments applied under the mask.
    pub adjustments: Adjustments,
}

impl Default for RadialMask {
    fn default() -> Self {
        Self {
            center: [0.5, 0.5],
            radius: [0.25, 0.25],
            rotation_deg: 0.0,
            feather: 0.5,
            enabled: true,
            invert: false,
            adjustments: Adjustments::default(),
        }
    }
}

impl RadialMask {
    /// Resolves the mask against an image size. Rotation becomes radians here.
    pub fn to_kernel(&self, width: u32, height: u32) -> RadialKernel {
        let size = Vec2::new(width as f32, height as f32);
        RadialKernel {
            center: Vec2::from(self.center) * size,
            radius: Vec2::from(self.radius) * size,
            rotation_rad: self.rotation_deg.to_radians(),
            feather: self.feather.clamp(0.0, 1.0),
            invert: self.invert,
            adjustments: self.adjustments,
        }
    }
}

/// Pixel-space linear mask.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearKernel {
    /// Start in pixels.
    pub start: Vec2,
    /// End in pixels.
    pub end: Vec2,
    /// Feather fraction.
    pub feather: f32,
    /// Inverted strength.
    pub invert: bool,
    /// Local adjustments.
    pub adjustments: Adjustments,
}

impl LinearKernel {
    /// Mask strength at pixel position `p`.
    pub fn strength(&self, p: Vec2) -> f32 {
        let d = self.end - self.start;
        let len = d.length();
        if len < DEGENERATE_EPSILON {
            return 0.0;
        }
        let mid = (self.start + self.end) * 0.5;
        let t = (p - mid).dot(d) / len;
        let half_width = len * self.feather * 0.5;
        let s = 1.0 - smootherstep(-half_width, half_width, t);
        if self.invert { 1.0 - s } else { s }
    }
}

/// Pixel-space radial mask.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadialKernel {
    /// Centre in pixels.
    pub center: Vec2,
    /// Semi-axes in pixels.
    pub radius: Vec2,
    /// Rotation in radians.
    pub rotation_rad: f32,
    /// Feather fraction.
    pub feather: f32,
    /// Inverted strength.
    pub invert: bool,
    /// Local adjustments.
    pub adjustments: Adjustments,
}

impl RadialKernel {
    /// Mask strength at pixel position `p`.
    pub fn strength(&self, p: Vec2) -> f32 {
        if self.radius.x < DEGENERATE_EPSILON || self.radius.y < DEGENERATE_EPSILON {
            return 0.0;
        }
        let q = p - self.center;
        let (sin, cos) = self.rotation_rad.sin_cos();
        let local = Vec2::new(q.x * cos + q.y * sin, q.y * cos - q.x * sin);
        let dist = (local / self.radius).length();
        let s = 1.0 - smootherstep(1.0 - self.feather, 1.0, dist);
        if self.invert { 1.0 - s } else { s }
    }
}

/// Ordered set of masks.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MaskStack {
    /// Linear masks, applied first.
    pub linear: Vec<LinearMask>,
    /// Radial masks, applied after all linear masks.
    pub radial: Vec<RadialMask>,
}

impl MaskStack {
    /// Builds a validated stack.
    pub fn new(linear: Vec<LinearMask>, radial: Vec<RadialMask>) -> OpsResult<Self> {
        let stack = Self { linear, radial };
        stack.validate()?;
        Ok(stack)
    }

    /// Appends a linear mask.
    pub fn push_linear(&mut self, mask: LinearMask) -> OpsResult<()> {
        if self.linear.len() >= MAX_MASKS_PER_KIND {
            return Err(too_many("linear"));
        }
        self.linear.push(mask);
        Ok(())
    }

    /// Appends a radial mask.
    pub fn push_radial(&mut self, mask: RadialMask) -> OpsResult<()> {
        if self.radial.len() >= MAX_MASKS_PER_KIND {
            return Err(too_many("radial"));
        }
        self.radial.push(mask);
        Ok(())
    }

    /// Checks the per-kind mask limits.
    pub fn validate(&self) -> OpsResult<()> {
        if self.linear.len() > MAX_MASKS_PER_KIND {
            return Err(too_many("linear"));
        }
        if self.radial.len() > MAX_MASKS_PER_KIND {
            return Err(too_many("radial"));
        }
        Ok(())
    }

    /// True when no mask is enabled.
    pub fn is_noop(&self) -> bool {
        !self.linear.iter().any(|m| m.enabled) && !self.radial.iter().any(|m| m.enabled)
    }

    /// Enabled masks resolved to pixel-space kernels, in blend order.
    pub fn kernels(&self, width: u32, height: u32) -> (Vec<LinearKernel>, Vec<RadialKernel>) {
        let linear = self.linear.iter()
            .filter(|m| m.enabled)
            .map(|m| m.to_kernel(width, height))
            .collect();
        let radial = self.radial.iter()
            .filter(|m| m.enabled)
            .map(|m| m.to_kernel(width, height))
            .collect();
        (linear, radial)
    }
}

fn too_many(kind: &str) -> OpsError {
    OpsError::InvalidParameter(format!("at most {MAX_MASKS_PER_KIND} {kind} masks are supported"))
}

/// Blends every kernel onto one unit RGB triple at pixel position `p`.
pub fn blend_pixel(
    rgb: [f32; 3],
    p: Vec2,
    linear: &[LinearKernel],
    radial: &[RadialKernel],
) -> [f32; 3] {
    let strengths = linear.iter()
        .map(|k| (k.strength(p), &k.adjustments))
        .chain(radial.iter().map(|k| (k.strength(p), &k.adjustments)));

    let mut c = rgb;
    for (s, adj) in strengths {
        if s < MIN_STRENGTH {
            continue;
        }
        let adjusted = adjust_pixel(c, adj);
        for i in 0..3 {
            c[i] = c[i] * (1.0 - s) + adjusted[i] * s;
        }
    }
    c
}

/// Applies a mask stack to an RGB buffer.
pub fn apply_masks(rgb: &[u8], width: u32, height: u32, stack: &MaskStack) -> OpsResult<Vec<u8>> {
    stack.validate()?;
    let (linear, radial) = stack.kernels(width, height);
    apply_mask_kernels(rgb, width, height, &linear, &radial)
}

/// Applies resolved kernels to an RGB buffer, linear kernels first.
pub fn apply_mask_kernels(
    rgb: &[u8],
    width: u32,
    height: u32,
    linear: &[LinearKernel],
    radial: &[RadialKernel],
) -> OpsResult<Vec<u8>> {
    check_len(rgb, width, height, 3)?;

    let row = width as usize * 3;
    let mut out = vec![0u8; rgb.len()];
    if row == 0 {
        return Ok(out);
    }
    out.par_chunks_mut(row)
        .zip(rgb.par_chunks(row))
        .enumerate()
        .for_each(|(y, (dst, src))| {
            for x in 0..width as usize {
                let i = x * 3;
                let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                let c = blend_pixel(
                    [to_unit(src[i]), to_unit(src[i + 1]), to_unit(src[i + 2])],
                    p,
                    linear,
                    radial,
                );
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
    use approx::assert_abs_diff_eq;

    fn brighten() -> Adjustments {
        Adjustments { exposure: 1.0, ..Default::default() }
    }

    #[test]
    fn test_linear_strength_profile() {
        let k = LinearMask { start: [0.0, 0.0], end: [0.0, 1.0], ..Default::default() }
            .to_kernel(100, 100);
        assert_abs_diff_eq!(k.strength(Vec2::new(50.0, 0.0)), 1.0);
        assert_abs_diff_eq!(k.strength(Vec2::new(50.0, 50.0)), 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(k.strength(Vec2::new(50.0, 100.0)), 0.0);
    }

    #[test]
    fn test_linear_hard_edge_without_feather() {
        let k = LinearMask { start: [0.0, 0.0], end: [1.0, 0.0], feather: 0.0, ..Default::default() }
            .to_kernel(10, 10);
        assert_eq!(k.strength(Vec2::new(4.5, 5.0)), 1.0);
        assert_eq!(k.strength(Vec2::new(5.5, 5.0)), 0.0);
    }

    #[test]
    fn test_degenerate_linear_is_zero() {
        let k = LinearMask { start: [0.3, 0.3], end: [0.3, 0.3], invert: true, ..Default::default() }
            .to_kernel(10, 10);
        assert_eq!(k.strength(Vec2::new(1.0, 1.0)), 0.0);
    }

    #[test]
    fn test_radial_inside_outside_invert() {
        let mask = RadialMask { radius: [0.2, 0.2], feather: 0.0, ..Default::default() };
        let k = mask.to_kernel(100, 100);
        assert_eq!(k.strength(Vec2::new(50.0, 50.0)), 1.0);
        assert_eq!(k.strength(Vec2::new(90.0, 50.0)), 0.0);

        let inv = RadialMask { invert: true, ..mask }.to_kernel(100, 100);
        assert_eq!(inv.strength(Vec2::new(50.0, 50.0)), 0.0);
        assert_eq!(inv.strength(Vec2::new(90.0, 50.0)), 1.0);
    }

    #[test]
    fn test_radial_rotation_is_degrees_at_boundary() {
        let mask = RadialMask { radius: [0.4, 0.1], rotation_deg: 90.0, feather: 0.0, ..Default::default() };
        let k = mask.to_kernel(100, 100);
        assert_abs_diff_eq!(k.rotation_rad, std::f32::consts::FRAC_PI_2, epsilon = 1e-6);
        // Rotated a quarter turn the long axis is vertical.
        assert_eq!(k.strength(Vec2::new(50.0, 85.0)), 1.0);
        assert_eq!(k.strength(Vec2::new(85.0, 50.0)), 0.0);
    }

    #[test]
    fn test_blend_is_sequential() {
        let full = LinearKernel {
            start: Vec2::new(0.0, 0.0),
            end: Vec2::new(0.0, 10.0),
            feather: 0.0,
            invert: true,
            adjustments: brighten(),
        };
        // Inverted hard-edged mask is full strength at the end side.
        let p = Vec2::new(0.5, 9.5);
        let once = blend_pixel([0.1, 0.1, 0.1], p, &[full], &[]);
        let twice = blend_pixel([0.1, 0.1, 0.1], p, &[full, full], &[]);
        assert_abs_diff_eq!(once[0], 0.2, epsilon = 1e-6);
        assert_abs_diff_eq!(twice[0], 0.4, epsilon = 1e-6);
    }

    #[test]
    fn test_stack_limits() {
        let mut stack = MaskStack::default();
        for _ in 0..MAX_MASKS_PER_KIND {
            stack.push_radial(RadialMask::default()).unwrap();
        }
        assert!(stack.push_radial(RadialMask::default()).is_err());
        assert!(MaskStack::new(vec![LinearMask::default(); 9], vec![]).is_err());
    }

    #[test]
    fn test_disabled_stack_is_noop() {
        let stack = MaskStack::new(
            vec![LinearMask { enabled: false, adjustments: brighten(), ..Default::default() }],
            vec![RadialMask { enabled: false, adjustments: brighten(), ..Default::default() }],
        ).unwrap();
        assert!(stack.is_noop());
        let rgb = vec![10u8, 20, 30, 40, 50, 60];
        assert_eq!(apply_masks(&rgb, 2, 1, &stack).unwrap(), rgb);
    }
}
