//! # darkroom-ops
//!
//! Pixel kernels for the darkroom photo pipeline.
//!
//! Every function here is the CPU reference for an accelerated kernel in
//! `darkroom-compute`: both backends quantize, bin and blend the same way so
//! their outputs agree byte for byte.
//!
//! # Modules
//!
//! - [`layout`] - RGB/RGBA conversion and row padding
//! - [`curve`] - Monotone spline tone curves and 256-entry LUTs
//! - [`adjust`] - Global tonal and colour adjustments
//! - [`mask`] - Linear and radial gradient masks
//! - [`histogram`] - RGB + luminance histograms
//! - [`rotate`] - Same-size rotation
//!
//! # Example
//!
//! ```rust
//! use darkroom_ops::{apply_lut, CurvePoint, ToneCurveLut};
//!
//! let lut = ToneCurveLut::from_points(&[
//!     CurvePoint::new(0.0, 0.0),
//!     CurvePoint::new(0.5, 0.6),
//!     CurvePoint::new(1.0, 1.0),
//! ]);
//! let rgb = vec![0u8, 128, 255];
//! let out = apply_lut(&rgb, 1, 1, &lut).unwrap();
//! assert_eq!(out[0], 0);
//! assert_eq!(out[2], 255);
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod error;
pub mod adjust;
pub mod curve;
pub mod histogram;
pub mod layout;
pub mod mask;
pub mod pixel;
pub mod rotate;

pub use error::{OpsError, OpsResult};
pub use adjust::{apply_adjustments, Adjustments};
pub use curve::{apply_lut, is_identity_curve, CurvePoint, ToneCurveLut, LUT_SIZE};
pub use histogram::{compute_histogram, ChannelFlags, Histogram, CLIP_FRACTION, HISTOGRAM_BINS};
pub use layout::{
    add_row_padding, aligned_bytes_per_row, remove_row_padding, rgb_to_rgba, rgba_to_rgb,
    ROW_ALIGNMENT,
};
pub use mask::{
    apply_mask_kernels, apply_masks, LinearKernel, LinearMask, MaskStack, RadialKernel, RadialMask,
    MAX_MASKS_PER_KIND,
};
pub use rotate::{is_negligible_rotation, rotate, ROTATION_EPSILON_DEG};
