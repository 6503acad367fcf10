use std::time::Instant;

use darkroom_ops::Adjustments;

use super::{accelerate_rgb, ServiceCore};
use crate::adaptive::ProcessingResult;
use crate::pipeline::OpId;
use crate::{check_rgb, ComputeResult};

/// Global adjustments.
#[derive(Clone)]
pub struct AdjustmentsService {
    core: ServiceCore,
}

impl AdjustmentsService {
    pub(crate) fn new(core: ServiceCore) -> Self {
        Self { core }
    }

    /// Applies `adj`. Neutral sliders return a copy of the input.
    pub fn apply(
        &self,
        rgb: &[u8],
        width: u32,
        height: u32,
        adj: &Adjustments,
    ) -> ComputeResult<ProcessingResult<Vec<u8>>> {
        let start = Instant::now();
        check_rgb(rgb, width, height)?;
        if adj.is_identity() {
            return Ok(self.core.processor.shortcut(OpId::Adjustments, start, rgb.to_vec()));
        }

        self.core.processor.execute(
            OpId::Adjustments,
            width,
            height,
            |device| accelerate_rgb(device, rgb, width, height, |d, rgba| d.adjustments(rgba, width, height, adj)),
            || self.core.fallback.adjustments(rgb, width, height, adj),
        )
    }
}
