//! Adaptive compute layer for the darkroom photo pipeline.
//!
//! Runs per-pixel edit operations on a GPU (wgpu, behind the `wgpu`
//! feature) when one is available and falls back to the CPU kernels of
//! `darkroom-ops` otherwise, or whenever the accelerated path fails.
//!
//! # Architecture
//!
//! ```text
//! ComputeContext
//!     +-- CapabilityService (adapter/device lifecycle, loss recovery)
//!     |       +-- Platform -> Adapter -> Accelerator
//!     |                                   +-- PipelineCache<(OpId, VariantFlags)>
//!     |                                   +-- TexturePool / BufferPool
//!     |                                   +-- StagingBufferPool (async readback)
//!     +-- AdaptiveProcessor (routing, timing, fallback)
//!     +-- services: adjustments, tone curve, uber, masks, histogram, rotation
//!             +-- Fallback (CpuFallback)
//! ```
//!
//! # Example
//!
//! ```
//! use darkroom_compute::{ComputeContext, ContextConfig};
//! use darkroom_ops::CurvePoint;
//!
//! let ctx = ComputeContext::new(ContextConfig::default());
//! let rgb = vec![64u8; 4 * 4 * 3];
//! let out = ctx.tone_curve()
//!     .apply(&rgb, 4, 4, &[CurvePoint::new(0.0, 0.1), CurvePoint::new(1.0, 0.9)])
//!     .unwrap();
//! assert_eq!(out.data.len(), rgb.len());
//! ```

pub mod adaptive;
pub mod backend;
pub mod context;
pub mod fallback;
pub mod pipeline;
pub mod pool;
pub mod service;
mod shaders;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use adaptive::{AdaptiveProcessor, OpStats, ProcessingResult};
pub use backend::{
    Accelerator, AcceleratorSettings, Adapter, AdapterInfo, AdapterRequest, Backend,
    CapabilityService, Capabilities, DeviceLostCallback, DeviceType, Features, HeadlessPlatform,
    InitOptions, Limits, Platform, ServiceState,
};
#[cfg(feature = "wgpu")]
pub use backend::{WgpuAccelerator, WgpuPlatform};
pub use context::{ComputeContext, ContextBuilder, ContextConfig};
pub use fallback::{CpuFallback, Fallback};
pub use service::{
    AdjustmentsService, HistogramService, LiveHistogram, MaskService, RotationService,
    ToneCurveService, UberService,
};
pub use pipeline::{OpId, PipelineCache, VariantFlags};
pub use pool::{
    BufferKey, PoolAllocator, PoolStats, Pooled, ReadbackTicket, ResourcePool, StagingAllocator,
    StagingBuffer, StagingBufferPool, StagingLease, TextureKey,
};

use darkroom_ops::OpsError;
use thiserror::Error;

/// Compute layer errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComputeError {
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("No suitable GPU adapter found")]
    AdapterNotFound,

    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),

    #[error("Device lost: {0}")]
    DeviceLost(String),

    #[error("Out of device memory: {0}")]
    OutOfMemory(String),

    #[error("Validation failed: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Accelerated compute is disabled")]
    Disabled,

    #[error("Buffer size mismatch: expected {expected}, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error(transparent)]
    Ops(#[from] OpsError),
}

pub type ComputeResult<T> = Result<T, ComputeError>;

/// Checks that an RGB buffer matches its declared dimensions.
pub(crate) fn check_rgb(rgb: &[u8], width: u32, height: u32) -> ComputeResult<()> {
    let expected = width as usize * height as usize * 3;
    if rgb.len() != expected {
        return Err(ComputeError::BufferSizeMismatch { expected, actual: rgb.len() });
    }
    Ok(())
}

/// Locks a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
