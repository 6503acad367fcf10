use std::sync::{Arc, Mutex};

use darkroom_ops::{rgb_to_rgba, Histogram};
use tracing::debug;

use super::{check_fits, ServiceCore};
use crate::adaptive::ProcessingResult;
use crate::pipeline::OpId;
use crate::pool::ReadbackTicket;
use crate::{check_rgb, lock, ComputeResult};

/// Outcome of [`HistogramService::submit_live`].
#[derive(Debug)]
pub enum LiveHistogram {
    /// Readback in flight; [`HistogramService::latest`] updates when it lands.
    Submitted(ReadbackTicket),
    /// Every staging slot was busy. The previous histogram stays current.
    Skipped,
    /// Computed on the CPU and already stored.
    Computed,
}

/// RGB and luminance histograms.
#[derive(Clone)]
pub struct HistogramService {
    core: ServiceCore,
    latest: Arc<Mutex<Option<Histogram>>>,
}

impl HistogramService {
    pub(crate) fn new(core: ServiceCore) -> Self {
        Self { core, latest: Arc::new(Mutex::new(None)) }
    }

    /// Computes a histogram, blocking until it is read back.
    pub fn compute(&self, rgb: &[u8], width: u32, height: u32) -> ComputeResult<ProcessingResult<Histogram>> {
        check_rgb(rgb, width, height)?;
        let result = self.core.processor.execute(
            OpId::Histogram,
            width,
            height,
            |device| {
                check_fits(device, width, height)?;
                device.histogram(&rgb_to_rgba(rgb, width, height)?, width, height)
            },
            || self.core.fallback.histogram(rgb, width, height),
        )?;
        *lock(&self.latest) = Some(result.data.clone());
        Ok(result)
    }

    /// Starts a histogram for a live preview without waiting for it.
    ///
    /// On the accelerator the bins are read back through the staging ring;
    /// when the ring is full the frame is skipped rather than queued.
    pub fn submit_live(&self, rgb: &[u8], width: u32, height: u32) -> ComputeResult<ProcessingResult<LiveHistogram>> {
        check_rgb(rgb, width, height)?;
        self.core.processor.execute(
            OpId::Histogram,
            width,
            height,
            |device| {
                check_fits(device, width, height)?;
                let latest = Arc::clone(&self.latest);
                let ticket = device.histogram_async(
                    &rgb_to_rgba(rgb, width, height)?,
                    width,
                    height,
                    Box::new(move |histogram: Histogram| *lock(&latest) = Some(histogram)),
                )?;
                Ok(match ticket {
                    Some(ticket) => LiveHistogram::Submitted(ticket),
                    None => {
                        debug!("histogram readback skipped, staging ring busy");
                        LiveHistogram::Skipped
                    }
                })
            },
            || {
                let histogram = self.core.fallback.histogram(rgb, width, height)?;
                *lock(&self.latest) = Some(histogram);
                Ok(LiveHistogram::Computed)
            },
        )
    }

    /// Most recent histogram from any path.
    pub fn latest(&self) -> Option<Histogram> {
        lock(&self.latest).clone()
    }
}
