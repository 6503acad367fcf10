//! Explicitly owned compute context.
//!
//! A [`ComputeContext`] owns one capability service, one adaptive processor
//! and the per-operation services built on them. There is no global state:
//! an application creates one context and passes it around.
//!
//! ```
//! use darkroom_compute::{ComputeContext, ContextConfig, HeadlessPlatform};
//! use std::sync::Arc;
//!
//! let ctx = ComputeContext::builder()
//!     .config(ContextConfig { min_accelerated_pixels: 4096, ..Default::default() })
//!     .platform(Arc::new(HeadlessPlatform))
//!     .build();
//! assert!(!ctx.capabilities().available);
//! ```

use std::env;
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use crate::adaptive::AdaptiveProcessor;
use crate::backend::{AcceleratorSettings, Capabilities, CapabilityService, InitOptions, Platform};
use crate::fallback::{CpuFallback, Fallback};
use crate::pool::{DEFAULT_POOL_SIZE, DEFAULT_STAGING_SLOTS};
use crate::service::{
    AdjustmentsService, HistogramService, MaskService, RotationService, ServiceCore,
    ToneCurveService, UberService,
};
use crate::ComputeResult;

// ============================================================================
// Configuration
// ============================================================================

/// Context configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextConfig {
    /// Device selection.
    pub init: InitOptions,
    /// Free textures kept per accelerator.
    pub texture_pool_size: usize,
    /// Free buffers kept per accelerator.
    pub buffer_pool_size: usize,
    /// Staging slots for asynchronous readback.
    pub staging_slots: usize,
    /// Use `f16` kernels where the device supports them.
    pub prefer_half_precision: bool,
    /// Smaller images always run on the CPU.
    pub min_accelerated_pixels: u64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            init: InitOptions::default(),
            texture_pool_size: DEFAULT_POOL_SIZE,
            buffer_pool_size: DEFAULT_POOL_SIZE,
            staging_slots: DEFAULT_STAGING_SLOTS,
            prefer_half_precision: false,
            min_accelerated_pixels: 0,
        }
    }
}

impl ContextConfig {
    /// Defaults with `DARKROOM_*` environment overrides applied.
    ///
    /// - `DARKROOM_BACKEND=cpu` disables the accelerator
    /// - `DARKROOM_POWER=low|high` selects the adapter power preference
    /// - `DARKROOM_ALLOW_FALLBACK_ADAPTER=1` accepts software adapters
    /// - `DARKROOM_HALF_PRECISION=1` enables `f16` kernels
    /// - `DARKROOM_POOL_SIZE=<n>` sets both resource pool sizes
    /// - `DARKROOM_MIN_GPU_PIXELS=<n>` sets the accelerator threshold
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(backend) = lookup("DARKROOM_BACKEND") {
            match backend.to_ascii_lowercase().as_str() {
                "cpu" | "fallback" => config.init.force_disabled = true,
                "gpu" | "auto" => {}
                other => warn!(value = other, "unknown DARKROOM_BACKEND, ignoring"),
            }
        }
        if let Some(power) = lookup("DARKROOM_POWER") {
            match power.to_ascii_lowercase().as_str() {
                "low" => config.init.prefer_high_performance = false,
                "high" => config.init.prefer_high_performance = true,
                other => warn!(value = other, "unknown DARKROOM_POWER, ignoring"),
            }
        }
        if let Some(v) = lookup("DARKROOM_ALLOW_FALLBACK_ADAPTER") {
            config.init.allow_fallback_adapter = is_truthy(&v);
        }
        if let Some(v) = lookup("DARKROOM_HALF_PRECISION") {
            config.prefer_half_precision = is_truthy(&v);
        }
        if let Some(n) = lookup("DARKROOM_POOL_SIZE").and_then(|v| v.parse().ok()) {
            config.texture_pool_size = n;
            config.buffer_pool_size = n;
        }
        if let Some(n) = lookup("DARKROOM_MIN_GPU_PIXELS").and_then(|v| v.parse().ok()) {
            config.min_accelerated_pixels = n;
        }
        debug!(?config, "context configuration");
        config
    }

    /// Settings handed to the accelerator platform.
    pub fn accelerator_settings(&self) -> AcceleratorSettings {
        AcceleratorSettings {
            texture_pool_size: self.texture_pool_size,
            buffer_pool_size: self.buffer_pool_size,
            staging_slots: self.staging_slots,
            prefer_half_precision: self.prefer_half_precision,
        }
    }
}

fn is_truthy(v: &str) -> bool {
    v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes")
}

/// Platform used when the builder is given none.
#[cfg(feature = "wgpu")]
fn default_platform(config: &ContextConfig) -> Arc<dyn Platform> {
    Arc::new(crate::backend::WgpuPlatform::new(config.accelerator_settings()))
}

/// Platform used when the builder is given none.
#[cfg(not(feature = "wgpu"))]
fn default_platform(_config: &ContextConfig) -> Arc<dyn Platform> {
    Arc::new(crate::backend::HeadlessPlatform)
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`ComputeContext`].
#[derive(Default)]
pub struct ContextBuilder {
    config: ContextConfig,
    platform: Option<Arc<dyn Platform>>,
    fallback: Option<Arc<dyn Fallback>>,
    deferred: bool,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: ContextConfig) -> Self {
        self.config = config;
        self
    }

    /// Accelerator platform (wgpu when the feature is on, else headless).
    ///
    /// A platform passed here is used as built: the pool sizes and staging
    /// slots of [`ContextConfig::accelerator_settings`] only reach the
    /// default platform. Construct a custom platform with those settings to
    /// keep them.
    pub fn platform(mut self, platform: Arc<dyn Platform>) -> Self {
        self.platform = Some(platform);
        self
    }

    /// CPU implementation (default [`CpuFallback`]).
    pub fn fallback(mut self, fallback: Arc<dyn Fallback>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Skip device initialization in [`build`](Self::build); call
    /// [`ComputeContext::initialize`] or
    /// [`ComputeContext::initialize_background`] later.
    pub fn defer_initialization(mut self) -> Self {
        self.deferred = true;
        self
    }

    pub fn build(self) -> ComputeContext {
        let platform = self.platform.unwrap_or_else(|| default_platform(&self.config));
        let fallback = self.fallback.unwrap_or_else(|| Arc::new(CpuFallback));
        let ctx = ComputeContext::assemble(self.config, platform, fallback);
        if !self.deferred {
            ctx.initialize();
        }
        ctx
    }
}

// ============================================================================
// Context
// ============================================================================

/// Owner of the compute stack.
pub struct ComputeContext {
    config: ContextConfig,
    platform: Arc<dyn Platform>,
    fallback: Arc<dyn Fallback>,
    capabilities: CapabilityService,
    processor: AdaptiveProcessor,
    adjustments: AdjustmentsService,
    tone_curve: ToneCurveService,
    uber: UberService,
    masks: MaskService,
    histogram: HistogramService,
    rotation: RotationService,
}

impl ComputeContext {
    /// Builds and initializes a context on the default platform.
    pub fn new(config: ContextConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn builder() -> ContextBuilder {
        ContextBuilder::new()
    }

    fn assemble(config: ContextConfig, platform: Arc<dyn Platform>, fallback: Arc<dyn Fallback>) -> Self {
        let capabilities = CapabilityService::new(Arc::clone(&platform));
        let processor = AdaptiveProcessor::new(capabilities.clone())
            .with_min_accelerated_pixels(config.min_accelerated_pixels);
        let core = ServiceCore { processor: processor.clone(), fallback: Arc::clone(&fallback) };
        Self {
            config,
            platform,
            fallback,
            capabilities,
            processor,
            adjustments: AdjustmentsService::new(core.clone()),
            tone_curve: ToneCurveService::new(core.clone()),
            uber: UberService::new(core.clone()),
            masks: MaskService::new(core.clone()),
            histogram: HistogramService::new(core.clone()),
            rotation: RotationService::new(core),
        }
    }

    /// Initializes the device with the configured options.
    pub fn initialize(&self) -> Capabilities {
        let caps = self.capabilities.initialize(self.config.init);
        info!(platform = self.platform.name(), backend = %caps.backend, "compute context ready");
        caps
    }

    /// Initializes the device on a background thread.
    pub fn initialize_background(&self) -> ComputeResult<JoinHandle<Capabilities>> {
        self.capabilities.initialize_background(self.config.init)
    }

    /// Destroys everything and builds a fresh, initialized context with the
    /// same configuration, platform and fallback.
    pub fn reset(&mut self) {
        let fresh = Self::assemble(self.config, Arc::clone(&self.platform), Arc::clone(&self.fallback));
        drop(std::mem::replace(self, fresh));
        self.initialize();
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Current capability snapshot.
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities.capabilities()
    }

    pub fn capability_service(&self) -> &CapabilityService {
        &self.capabilities
    }

    pub fn processor(&self) -> &AdaptiveProcessor {
        &self.processor
    }

    pub fn adjustments(&self) -> &AdjustmentsService {
        &self.adjustments
    }

    pub fn tone_curve(&self) -> &ToneCurveService {
        &self.tone_curve
    }

    pub fn uber(&self) -> &UberService {
        &self.uber
    }

    pub fn masks(&self) -> &MaskService {
        &self.masks
    }

    pub fn histogram(&self) -> &HistogramService {
        &self.histogram
    }

    pub fn rotation(&self) -> &RotationService {
        &self.rotation
    }
}

impl Drop for ComputeContext {
    fn drop(&mut self) {
        self.capabilities.destroy();
    }
}

impl std::fmt::Debug for ComputeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeContext")
            .field("config", &self.config)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}
