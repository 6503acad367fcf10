use std::time::Instant;

use darkroom_ops::is_negligible_rotation;

use super::{accelerate_rgb, ServiceCore};
use crate::adaptive::ProcessingResult;
use crate::pipeline::OpId;
use crate::{check_rgb, ComputeResult};

/// Same-size rotation about the image centre.
#[derive(Clone)]
pub struct RotationService {
    core: ServiceCore,
}

impl RotationService {
    pub(crate) fn new(core: ServiceCore) -> Self {
        Self { core }
    }

    /// Rotates by `degrees`. Angles below
    /// [`ROTATION_EPSILON_DEG`](darkroom_ops::ROTATION_EPSILON_DEG) return a
    /// copy of the input.
    pub fn apply(
        &self,
        rgb: &[u8],
        width: u32,
        height: u32,
        degrees: f32,
    ) -> ComputeResult<ProcessingResult<Vec<u8>>> {
        let start = Instant::now();
        check_rgb(rgb, width, height)?;
        if is_negligible_rotation(degrees) {
            return Ok(self.core.processor.shortcut(OpId::Rotation, start, rgb.to_vec()));
        }

        let radians = degrees.to_radians();
        self.core.processor.execute(
            OpId::Rotation,
            width,
            height,
            |device| accelerate_rgb(device, rgb, width, height, |d, rgba| d.rotate(rgba, width, height, radians)),
            || self.core.fallback.rotate(rgb, width, height, degrees),
        )
    }
}
