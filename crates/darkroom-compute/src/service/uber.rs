use std::time::Instant;

use darkroom_ops::{Adjustments, CurvePoint, ToneCurveLut};

use super::{accelerate_rgb, ServiceCore};
use crate::adaptive::ProcessingResult;
use crate::pipeline::OpId;
use crate::{check_rgb, ComputeResult};

/// Adjustments and tone curve fused into one pass.
#[derive(Clone)]
pub struct UberService {
    core: ServiceCore,
}

impl UberService {
    pub(crate) fn new(core: ServiceCore) -> Self {
        Self { core }
    }

    /// Applies `adj` then the curve through `points`. Neutral stages are
    /// compiled out; when both are neutral the input is copied.
    pub fn apply(
        &self,
        rgb: &[u8],
        width: u32,
        height: u32,
        adj: &Adjustments,
        points: &[CurvePoint],
    ) -> ComputeResult<ProcessingResult<Vec<u8>>> {
        let start = Instant::now();
        check_rgb(rgb, width, height)?;

        let adj = (!adj.is_identity()).then_some(adj);
        let lut = ToneCurveLut::from_points(points);
        let lut = (!lut.is_identity()).then_some(&lut);
        if adj.is_none() && lut.is_none() {
            return Ok(self.core.processor.shortcut(OpId::Uber, start, rgb.to_vec()));
        }

        self.core.processor.execute(
            OpId::Uber,
            width,
            height,
            |device| accelerate_rgb(device, rgb, width, height, |d, rgba| d.uber(rgba, width, height, adj, lut)),
            || self.core.fallback.uber(rgb, width, height, adj, lut),
        )
    }
}
