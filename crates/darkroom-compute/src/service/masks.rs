use std::time::Instant;

use darkroom_ops::MaskStack;

use super::{accelerate_rgb, ServiceCore};
use crate::adaptive::ProcessingResult;
use crate::pipeline::OpId;
use crate::{check_rgb, ComputeError, ComputeResult};

/// Linear and radial gradient masks.
#[derive(Clone)]
pub struct MaskService {
    core: ServiceCore,
}

impl MaskService {
    pub(crate) fn new(core: ServiceCore) -> Self {
        Self { core }
    }

    /// Blends every enabled mask of `stack`, linear masks first.
    ///
    /// More than eight masks of one kind is a validation error. A stack
    /// with nothing enabled returns a copy of the input.
    pub fn apply(
        &self,
        rgb: &[u8],
        width: u32,
        height: u32,
        stack: &MaskStack,
    ) -> ComputeResult<ProcessingResult<Vec<u8>>> {
        let start = Instant::now();
        check_rgb(rgb, width, height)?;
        stack.validate().map_err(|e| ComputeError::ValidationError(e.to_string()))?;
        if stack.is_noop() {
            return Ok(self.core.processor.shortcut(OpId::Mask, start, rgb.to_vec()));
        }

        self.core.processor.execute(
            OpId::Mask,
            width,
            height,
            |device| {
                let (linear, radial) = stack.kernels(width, height);
                accelerate_rgb(device, rgb, width, height, |d, rgba| {
                    d.masks(rgba, width, height, &linear, &radial)
                })
            },
            || self.core.fallback.masks(rgb, width, height, stack),
        )
    }
}
