use std::time::Instant;

use darkroom_ops::{is_identity_curve, CurvePoint, ToneCurveLut};

use super::{accelerate_rgb, ServiceCore};
use crate::adaptive::ProcessingResult;
use crate::pipeline::OpId;
use crate::{check_rgb, ComputeResult};

/// Tone curves through control points.
#[derive(Clone)]
pub struct ToneCurveService {
    core: ServiceCore,
}

impl ToneCurveService {
    pub(crate) fn new(core: ServiceCore) -> Self {
        Self { core }
    }

    /// Fits a curve through `points` (in the order given) and applies it.
    pub fn apply(
        &self,
        rgb: &[u8],
        width: u32,
        height: u32,
        points: &[CurvePoint],
    ) -> ComputeResult<ProcessingResult<Vec<u8>>> {
        let start = Instant::now();
        check_rgb(rgb, width, height)?;
        if points.is_empty() || is_identity_curve(points) {
            return Ok(self.core.processor.shortcut(OpId::ToneCurve, start, rgb.to_vec()));
        }
        self.run(start, rgb, width, height, &ToneCurveLut::from_points(points))
    }

    /// Applies a prebuilt table.
    pub fn apply_lut(
        &self,
        rgb: &[u8],
        width: u32,
        height: u32,
        lut: &ToneCurveLut,
    ) -> ComputeResult<ProcessingResult<Vec<u8>>> {
        let start = Instant::now();
        check_rgb(rgb, width, height)?;
        self.run(start, rgb, width, height, lut)
    }

    fn run(
        &self,
        start: Instant,
        rgb: &[u8],
        width: u32,
        height: u32,
        lut: &ToneCurveLut,
    ) -> ComputeResult<ProcessingResult<Vec<u8>>> {
        if lut.is_identity() {
            return Ok(self.core.processor.shortcut(OpId::ToneCurve, start, rgb.to_vec()));
        }
        self.core.processor.execute(
            OpId::ToneCurve,
            width,
            height,
            |device| accelerate_rgb(device, rgb, width, height, |d, rgba| d.tone_curve(rgba, width, height, lut)),
            || self.core.fallback.tone_curve(rgb, width, height, lut),
        )
    }
}
