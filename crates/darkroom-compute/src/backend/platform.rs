//! Traits describing the accelerator API the compute layer consumes.
//!
//! The lifecycle code in [`CapabilityService`](super::CapabilityService)
//! only talks to these traits, so it runs unchanged against wgpu, against
//! a headless platform, or against test doubles.

use std::sync::Arc;

use darkroom_ops::{Adjustments, Histogram, LinearKernel, RadialKernel, ToneCurveLut};

use super::{AdapterInfo, Features, Limits};
use crate::pool::ReadbackTicket;
use crate::ComputeResult;

/// Called with a reason string when a device is lost.
pub type DeviceLostCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Adapter selection options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterRequest {
    /// Prefer a discrete, high-performance adapter.
    pub high_performance: bool,
    /// Ask the platform for its software adapter.
    pub force_fallback_adapter: bool,
}

/// Entry point to an accelerator API.
pub trait Platform: Send + Sync {
    /// Platform name for logs.
    fn name(&self) -> &'static str;

    /// Finds an adapter matching `request`.
    fn request_adapter(&self, request: &AdapterRequest) -> ComputeResult<Box<dyn Adapter>>;
}

/// A physical (or software) device that can open a logical device.
pub trait Adapter: Send {
    /// Adapter description.
    fn info(&self) -> AdapterInfo;

    /// Whether the platform flags this adapter as a software fallback.
    fn is_fallback(&self) -> bool {
        self.info().device_type == super::DeviceType::Cpu
    }

    /// Opens a device. `on_lost` fires at most once, off the calling thread,
    /// if the device is later lost.
    fn request_device(self: Box<Self>, on_lost: DeviceLostCallback) -> ComputeResult<Arc<dyn Accelerator>>;
}

/// An open device with its pipelines and resource pools.
///
/// Image arguments are tightly packed RGBA8 (`width * height * 4` bytes);
/// results use the same layout.
pub trait Accelerator: Send + Sync {
    /// Device limits.
    fn limits(&self) -> Limits;

    /// Enabled device features.
    fn features(&self) -> Features;

    /// Global adjustments.
    fn adjustments(&self, rgba: &[u8], width: u32, height: u32, adj: &Adjustments) -> ComputeResult<Vec<u8>>;

    /// 256-entry tone curve.
    fn tone_curve(&self, rgba: &[u8], width: u32, height: u32, lut: &ToneCurveLut) -> ComputeResult<Vec<u8>>;

    /// Fused adjustments + tone curve; either stage may be skipped.
    fn uber(
        &self,
        rgba: &[u8],
        width: u32,
        height: u32,
        adj: Option<&Adjustments>,
        lut: Option<&ToneCurveLut>,
    ) -> ComputeResult<Vec<u8>>;

    /// Mask stack, already resolved to pixel-space kernels in blend order.
    fn masks(
        &self,
        rgba: &[u8],
        width: u32,
        height: u32,
        linear: &[LinearKernel],
        radial: &[RadialKernel],
    ) -> ComputeResult<Vec<u8>>;

    /// Histogram with blocking readback.
    fn histogram(&self, rgba: &[u8], width: u32, height: u32) -> ComputeResult<Histogram>;

    /// Histogram read back through the staging pool.
    ///
    /// Returns `Ok(None)` without doing any work when no staging slot is free.
    fn histogram_async(
        &self,
        rgba: &[u8],
        width: u32,
        height: u32,
        on_complete: Box<dyn FnOnce(Histogram) + Send>,
    ) -> ComputeResult<Option<ReadbackTicket>>;

    /// Same-size rotation by `radians` about the image centre.
    fn rotate(&self, rgba: &[u8], width: u32, height: u32, radians: f32) -> ComputeResult<Vec<u8>>;

    /// Releases pipelines, pools and the device. Later calls fail.
    fn destroy(&self);
}
