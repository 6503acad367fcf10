//! Per-operation entry points.
//!
//! Services take tightly packed RGB8 images, check for identity fast paths,
//! and route the work through the [`AdaptiveProcessor`]. On the accelerated
//! path they widen to RGBA for the device and narrow the result back.
//! Every call returns a new buffer, also on fast paths.

mod adjustments;
mod histogram;
mod masks;
mod rotation;
mod tone_curve;
mod uber;

pub use adjustments::AdjustmentsService;
pub use histogram::{HistogramService, LiveHistogram};
pub use masks::MaskService;
pub use rotation::RotationService;
pub use tone_curve::ToneCurveService;
pub use uber::UberService;

use std::sync::Arc;

use darkroom_ops::{rgb_to_rgba, rgba_to_rgb};

use crate::adaptive::AdaptiveProcessor;
use crate::backend::Accelerator;
use crate::fallback::Fallback;
use crate::{ComputeError, ComputeResult};

/// What every service needs: the router and the CPU path.
#[derive(Clone)]
pub(crate) struct ServiceCore {
    pub processor: AdaptiveProcessor,
    pub fallback: Arc<dyn Fallback>,
}

/// Rejects images the device cannot hold as a single texture.
pub(crate) fn check_fits(device: &dyn Accelerator, width: u32, height: u32) -> ComputeResult<()> {
    let max = device.limits().max_texture_size;
    if width > max || height > max {
        return Err(ComputeError::NotSupported(format!(
            "{width}x{height} exceeds the {max}px texture limit"
        )));
    }
    if width == 0 || height == 0 {
        return Err(ComputeError::NotSupported("empty image".into()));
    }
    Ok(())
}

/// Runs an RGBA device operation on an RGB image.
pub(crate) fn accelerate_rgb<F>(
    device: &dyn Accelerator,
    rgb: &[u8],
    width: u32,
    height: u32,
    f: F,
) -> ComputeResult<Vec<u8>>
where
    F: FnOnce(&dyn Accelerator, &[u8]) -> ComputeResult<Vec<u8>>,
{
    check_fits(device, width, height)?;
    let rgba = rgb_to_rgba(rgb, width, height)?;
    let out = f(device, &rgba)?;
    Ok(rgba_to_rgb(&out, width, height)?)
}
