//! Accelerator discovery and device lifecycle.
//!
//! ```text
//! CapabilityService
//!     +-- Platform        (WgpuPlatform | HeadlessPlatform)
//!             +-- Adapter
//!                     +-- Accelerator (device, queue, pipelines, pools)
//! ```

mod capability;
mod headless;
mod platform;

#[cfg(feature = "wgpu")]
mod wgpu_backend;

pub use capability::{CapabilityService, InitOptions, ServiceState};
pub use headless::HeadlessPlatform;
pub use platform::{Accelerator, Adapter, AdapterRequest, DeviceLostCallback, Platform};

#[cfg(feature = "wgpu")]
pub use wgpu_backend::{WgpuAccelerator, WgpuPlatform};

/// Per-device resource settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceleratorSettings {
    /// Free textures kept for reuse.
    pub texture_pool_size: usize,
    /// Free buffers kept for reuse.
    pub buffer_pool_size: usize,
    /// Slots of the readback staging ring.
    pub staging_slots: usize,
    /// Compile `f16` variants when the device supports them.
    pub prefer_half_precision: bool,
}

impl Default for AcceleratorSettings {
    fn default() -> Self {
        Self {
            texture_pool_size: crate::pool::DEFAULT_POOL_SIZE,
            buffer_pool_size: crate::pool::DEFAULT_POOL_SIZE,
            staging_slots: crate::pool::DEFAULT_STAGING_SLOTS,
            prefer_half_precision: false,
        }
    }
}

/// Backend that produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// GPU compute.
    Accelerated,
    /// CPU kernels.
    #[default]
    Fallback,
}

impl Backend {
    /// Get human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Accelerated => "accelerated",
            Self::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Device limits relevant to image kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum 2D texture dimension in pixels.
    pub max_texture_size: u32,
    /// Maximum buffer size in bytes.
    pub max_buffer_size: u64,
    /// Maximum invocations per workgroup.
    pub max_workgroup_size: u32,
    /// Maximum workgroups per dispatch dimension.
    pub max_workgroups_per_dim: u32,
}

impl Default for Limits {
    /// WebGPU baseline limits.
    fn default() -> Self {
        Self {
            max_texture_size: 8192,
            max_buffer_size: 256 << 20,
            max_workgroup_size: 256,
            max_workgroups_per_dim: 65535,
        }
    }
}

/// Optional device features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Features {
    /// Half-precision floats in shaders.
    pub f16: bool,
    /// Subgroup operations.
    pub subgroups: bool,
    /// Filterable 32-bit float textures.
    pub float32_filter: bool,
    /// GPU timestamp queries.
    pub timestamp_query: bool,
}

/// Physical device category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceType {
    /// Discrete GPU.
    DiscreteGpu,
    /// Integrated GPU.
    IntegratedGpu,
    /// Virtualized GPU.
    VirtualGpu,
    /// Software rasterizer.
    Cpu,
    /// Unknown.
    #[default]
    Other,
}

impl DeviceType {
    /// Get human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DiscreteGpu => "discrete",
            Self::IntegratedGpu => "integrated",
            Self::VirtualGpu => "virtual",
            Self::Cpu => "cpu",
            Self::Other => "other",
        }
    }
}

/// Adapter description.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AdapterInfo {
    /// Adapter name.
    pub name: String,
    /// PCI vendor id.
    pub vendor: u32,
    /// Device category.
    pub device_type: DeviceType,
    /// Graphics API (Vulkan, Metal, Dx12, ...).
    pub api: String,
}

/// Snapshot of what the accelerator can do.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Capabilities {
    /// A device is ready for work.
    pub available: bool,
    /// Backend that calls will use.
    pub backend: Backend,
    /// Device limits (defaults when unavailable).
    pub limits: Limits,
    /// Device features (none when unavailable).
    pub features: Features,
    /// Adapter description, when one was found.
    pub adapter_info: Option<AdapterInfo>,
    /// The adapter found was a software fallback.
    pub is_fallback_adapter: bool,
}

impl Capabilities {
    /// Capabilities of a ready accelerator.
    pub fn accelerated(limits: Limits, features: Features, adapter_info: AdapterInfo) -> Self {
        Self {
            available: true,
            backend: Backend::Accelerated,
            limits,
            features,
            adapter_info: Some(adapter_info),
            is_fallback_adapter: false,
        }
    }
}
