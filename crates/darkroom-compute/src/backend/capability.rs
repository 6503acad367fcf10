//! Accelerator detection and device lifecycle.
//!
//! Every device belongs to a *generation*. The counter moves on
//! [`initialize`](CapabilityService::initialize), on
//! [`destroy`](CapabilityService::destroy) and when the current device is
//! lost. A probe that finishes after the generation moved discards its
//! device, and loss notifications from older generations are ignored. No
//! lock is held while the platform is being called.

use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;

use tracing::{debug, error, info, warn};

use super::platform::{Accelerator, AdapterRequest, DeviceLostCallback, Platform};
use super::Capabilities;
use crate::{lock, ComputeError, ComputeResult};

/// Options for [`CapabilityService::initialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitOptions {
    /// Ask for a high-performance (usually discrete) adapter.
    pub prefer_high_performance: bool,
    /// Accept software adapters.
    pub allow_fallback_adapter: bool,
    /// Never touch the platform; stay on the CPU.
    pub force_disabled: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            prefer_high_performance: true,
            allow_fallback_adapter: false,
            force_disabled: false,
        }
    }
}

/// Lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ServiceState {
    #[default]
    Uninitialized,
    Initializing,
    Ready,
    Error(String),
    Disabled,
}

impl ServiceState {
    /// Get human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Error(_) => "error",
            Self::Disabled => "disabled",
        }
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error(detail) => write!(f, "error: {detail}"),
            other => f.write_str(other.name()),
        }
    }
}

struct Inner {
    state: ServiceState,
    caps: Capabilities,
    device: Option<Arc<dyn Accelerator>>,
    generation: u64,
    recovering: bool,
    options: InitOptions,
    recoveries: u64,
}

struct Shared {
    platform: Arc<dyn Platform>,
    inner: Mutex<Inner>,
}

/// Owns the accelerator of one compute context.
///
/// Cloning yields another handle to the same service.
#[derive(Clone)]
pub struct CapabilityService {
    shared: Arc<Shared>,
}

impl CapabilityService {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self {
            shared: Arc::new(Shared {
                platform,
                inner: Mutex::new(Inner {
                    state: ServiceState::Uninitialized,
                    caps: Capabilities::default(),
                    device: None,
                    generation: 0,
                    recovering: false,
                    options: InitOptions::default(),
                    recoveries: 0,
                }),
            }),
        }
    }

    /// Detects the accelerator and opens a device.
    ///
    /// Never fails: problems leave the service in [`ServiceState::Error`]
    /// with unavailable capabilities. A previously opened device is
    /// released first.
    pub fn initialize(&self, options: InitOptions) -> Capabilities {
        let (generation, previous) = {
            let mut inner = lock(&self.shared.inner);
            inner.generation += 1;
            inner.options = options;
            inner.state = ServiceState::Initializing;
            inner.caps = Capabilities::default();
            (inner.generation, inner.device.take())
        };
        if let Some(device) = previous {
            device.destroy();
        }
        Shared::run(&self.shared, generation, options)
    }

    /// Runs [`initialize`](Self::initialize) on a spawned thread.
    pub fn initialize_background(&self, options: InitOptions) -> ComputeResult<JoinHandle<Capabilities>> {
        let service = self.clone();
        std::thread::Builder::new()
            .name("darkroom-init".into())
            .spawn(move || service.initialize(options))
            .map_err(|e| ComputeError::InternalError(format!("failed to spawn init thread: {e}")))
    }

    pub fn state(&self) -> ServiceState {
        lock(&self.shared.inner).state.clone()
    }

    pub fn capabilities(&self) -> Capabilities {
        lock(&self.shared.inner).caps.clone()
    }

    /// Whether accelerated calls can be issued.
    pub fn is_ready(&self) -> bool {
        let inner = lock(&self.shared.inner);
        inner.state == ServiceState::Ready && inner.device.is_some()
    }

    /// The current device, if ready.
    pub fn accelerator(&self) -> Option<Arc<dyn Accelerator>> {
        let inner = lock(&self.shared.inner);
        match inner.state {
            ServiceState::Ready => inner.device.clone(),
            _ => None,
        }
    }

    pub fn generation(&self) -> u64 {
        lock(&self.shared.inner).generation
    }

    /// Recoveries started after device loss.
    pub fn recoveries(&self) -> u64 {
        lock(&self.shared.inner).recoveries
    }

    /// Options of the last initialize.
    pub fn options(&self) -> InitOptions {
        lock(&self.shared.inner).options
    }

    pub fn platform_name(&self) -> &'static str {
        self.shared.platform.name()
    }

    /// Releases the device with its pools and pipelines.
    pub fn destroy(&self) {
        let device = {
            let mut inner = lock(&self.shared.inner);
            inner.generation += 1;
            inner.state = ServiceState::Uninitialized;
            inner.caps = Capabilities::default();
            inner.device.take()
        };
        if let Some(device) = device {
            device.destroy();
            info!("accelerator destroyed");
        }
    }
}

impl std::fmt::Debug for CapabilityService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock(&self.shared.inner);
        f.debug_struct("CapabilityService")
            .field("platform", &self.shared.platform.name())
            .field("state", &inner.state)
            .field("generation", &inner.generation)
            .finish()
    }
}

// ============================================================================
// Probe / commit
// ============================================================================

type Probe = Result<(Capabilities, Arc<dyn Accelerator>), (Capabilities, String)>;

impl Shared {
    fn run(shared: &Arc<Self>, generation: u64, options: InitOptions) -> Capabilities {
        if options.force_disabled {
            info!("accelerated compute disabled by configuration");
            Self::commit(shared, generation, ServiceState::Disabled, Capabilities::default(), None);
            return Capabilities::default();
        }

        match Self::probe(shared, generation, options) {
            Ok((caps, device)) => {
                if let Some(adapter) = &caps.adapter_info {
                    info!(
                        adapter = %adapter.name,
                        kind = adapter.device_type.name(),
                        api = %adapter.api,
                        f16 = caps.features.f16,
                        subgroups = caps.features.subgroups,
                        "accelerator ready"
                    );
                }
                Self::commit(shared, generation, ServiceState::Ready, caps, Some(device))
            }
            Err((caps, detail)) => {
                warn!(platform = shared.platform.name(), %detail, "accelerator unavailable, using CPU");
                Self::commit(shared, generation, ServiceState::Error(detail), caps, None)
            }
        }
    }

    fn probe(shared: &Arc<Self>, generation: u64, options: InitOptions) -> Probe {
        let request = AdapterRequest {
            high_performance: options.prefer_high_performance,
            force_fallback_adapter: false,
        };
        let adapter = shared
            .platform
            .request_adapter(&request)
            .map_err(|e| (Capabilities::default(), e.to_string()))?;

        let info = adapter.info();
        let is_fallback = adapter.is_fallback();
        if is_fallback && !options.allow_fallback_adapter {
            let caps = Capabilities {
                adapter_info: Some(info.clone()),
                is_fallback_adapter: true,
                ..Capabilities::default()
            };
            return Err((caps, format!("software adapter '{}' rejected", info.name)));
        }

        let weak: Weak<Self> = Arc::downgrade(shared);
        let on_lost: DeviceLostCallback = Arc::new(move |reason: String| {
            if let Some(shared) = weak.upgrade() {
                Self::handle_device_lost(&shared, generation, reason);
            }
        });

        let device = adapter
            .request_device(on_lost)
            .map_err(|e| (Capabilities::default(), e.to_string()))?;

        let mut caps = Capabilities::accelerated(device.limits(), device.features(), info);
        caps.is_fallback_adapter = is_fallback;
        Ok((caps, device))
    }

    /// Publishes a probe result unless the generation moved on meanwhile.
    fn commit(
        shared: &Arc<Self>,
        generation: u64,
        state: ServiceState,
        caps: Capabilities,
        device: Option<Arc<dyn Accelerator>>,
    ) -> Capabilities {
        let mut inner = lock(&shared.inner);
        if inner.generation != generation {
            let current = inner.caps.clone();
            drop(inner);
            debug!(generation, "discarding result of superseded initialization");
            if let Some(device) = device {
                device.destroy();
            }
            return current;
        }
        inner.state = state;
        inner.caps = caps.clone();
        inner.device = device;
        caps
    }

    fn handle_device_lost(shared: &Arc<Self>, generation: u64, reason: String) {
        let (lost, options, next) = {
            let mut inner = lock(&shared.inner);
            if inner.generation != generation {
                debug!(generation, current = inner.generation, "ignoring loss of stale device");
                return;
            }
            inner.generation += 1;
            inner.state = ServiceState::Error(format!("device lost: {reason}"));
            inner.caps = Capabilities::default();
            let lost = inner.device.take();
            if inner.recovering {
                drop(inner);
                error!(generation, %reason, "device lost during recovery, not retrying");
                if let Some(device) = lost {
                    device.destroy();
                }
                return;
            }
            inner.recovering = true;
            inner.recoveries += 1;
            (lost, inner.options, inner.generation)
        };

        error!(generation, %reason, "device lost, recovering");
        if let Some(device) = lost {
            device.destroy();
        }

        {
            let mut inner = lock(&shared.inner);
            if inner.generation == next {
                inner.state = ServiceState::Initializing;
            }
        }
        let caps = Self::run(shared, next, options);
        lock(&shared.inner).recovering = false;
        info!(available = caps.available, "device recovery finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, DeviceType, Features};
    use crate::testing::MockPlatform;

    fn service(platform: &MockPlatform) -> CapabilityService {
        CapabilityService::new(Arc::new(platform.clone()))
    }

    #[test]
    fn test_ready_snapshot() {
        let platform = MockPlatform::new().with_features(Features { f16: true, ..Default::default() });
        let svc = service(&platform);
        assert_eq!(svc.state(), ServiceState::Uninitialized);

        let caps = svc.initialize(InitOptions::default());
        assert!(caps.available);
        assert_eq!(caps.backend, Backend::Accelerated);
        assert!(caps.features.f16);
        assert_eq!(svc.state(), ServiceState::Ready);
        assert!(svc.is_ready());
        assert!(svc.accelerator().is_some());
        assert_eq!(svc.generation(), 1);
    }

    #[test]
    fn test_force_disabled_never_touches_platform() {
        let platform = MockPlatform::new();
        let svc = service(&platform);
        let caps = svc.initialize(InitOptions { force_disabled: true, ..Default::default() });

        assert!(!caps.available);
        assert_eq!(caps.backend, Backend::Fallback);
        assert_eq!(svc.state(), ServiceState::Disabled);
        assert_eq!(platform.adapter_requests(), 0);
    }

    #[test]
    fn test_missing_adapter_is_error_state() {
        let platform = MockPlatform::without_adapter();
        let svc = service(&platform);
        let caps = svc.initialize(InitOptions::default());

        assert_eq!(caps, Capabilities::default());
        assert!(matches!(svc.state(), ServiceState::Error(_)));
        assert!(!svc.is_ready());
        assert!(svc.accelerator().is_none());
    }

    #[test]
    fn test_software_adapter_rejected_unless_allowed() {
        let platform = MockPlatform::software();
        let svc = service(&platform);

        let caps = svc.initialize(InitOptions::default());
        assert!(!caps.available);
        assert!(caps.is_fallback_adapter);
        assert_eq!(caps.adapter_info.map(|i| i.device_type), Some(DeviceType::Cpu));
        assert_eq!(platform.device_requests(), 0);

        let caps = svc.initialize(InitOptions { allow_fallback_adapter: true, ..Default::default() });
        assert!(caps.available);
        assert!(caps.is_fallback_adapter);
    }

    #[test]
    fn test_device_creation_failure() {
        let platform = MockPlatform::new();
        platform.fail_device_creation(true);
        let svc = service(&platform);

        let caps = svc.initialize(InitOptions::default());
        assert!(!caps.available);
        match svc.state() {
            ServiceState::Error(detail) => assert!(detail.contains("mock device")),
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[test]
    fn test_destroy_resets_and_releases() {
        let platform = MockPlatform::new();
        let svc = service(&platform);
        svc.initialize(InitOptions::default());
        let device = platform.last_accelerator().unwrap();

        svc.destroy();
        assert_eq!(svc.state(), ServiceState::Uninitialized);
        assert!(!svc.capabilities().available);
        assert!(device.is_destroyed());
        assert_eq!(svc.generation(), 2);
    }

    #[test]
    fn test_loss_triggers_exactly_one_recovery() {
        let platform = MockPlatform::new();
        let svc = service(&platform);
        svc.initialize(InitOptions::default());
        let first = platform.last_accelerator().unwrap();

        platform.lose_device("driver reset");

        assert_eq!(svc.recoveries(), 1);
        assert_eq!(platform.device_requests(), 2);
        assert!(first.is_destroyed());
        assert!(svc.is_ready());
        let second = platform.last_accelerator().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_stale_loss_is_ignored() {
        let platform = MockPlatform::new();
        let svc = service(&platform);
        svc.initialize(InitOptions::default());
        let stale = platform.lost_callback(0).unwrap();

        svc.initialize(InitOptions::default());
        let generation = svc.generation();
        stale("late notification".into());

        assert_eq!(svc.generation(), generation);
        assert_eq!(svc.recoveries(), 0);
        assert!(svc.is_ready());
    }

    #[test]
    fn test_failed_recovery_is_not_retried() {
        let platform = MockPlatform::new();
        let svc = service(&platform);
        svc.initialize(InitOptions::default());

        platform.fail_device_creation(true);
        platform.lose_device("gone");

        assert_eq!(svc.recoveries(), 1);
        assert_eq!(platform.device_requests(), 2);
        assert!(matches!(svc.state(), ServiceState::Error(_)));
    }

    #[test]
    fn test_loss_during_recovery_is_not_retried() {
        let platform = MockPlatform::new();
        let svc = service(&platform);
        svc.initialize(InitOptions::default());

        platform.lose_during_next_request();
        platform.lose_device("driver reset");

        assert_eq!(platform.device_requests(), 2);
        assert_eq!(svc.recoveries(), 1);
        assert!(!svc.is_ready());
        assert!(matches!(svc.state(), ServiceState::Error(_)));
    }

    #[test]
    fn test_loss_during_device_creation_discards_device() {
        let platform = MockPlatform::new();
        platform.lose_during_next_request();
        let svc = service(&platform);

        svc.initialize(InitOptions::default());

        // The first device was lost before commit; recovery installed the second.
        assert_eq!(svc.recoveries(), 1);
        assert!(svc.is_ready());
        let accelerators = platform.accelerators();
        assert_eq!(accelerators.len(), 2);
        assert!(accelerators[0].is_destroyed());
        assert!(!accelerators[1].is_destroyed());
    }

    #[test]
    fn test_background_initialize() {
        let platform = MockPlatform::new();
        let svc = service(&platform);
        let caps = svc.initialize_background(InitOptions::default()).unwrap().join().unwrap();
        assert!(caps.available);
        assert!(svc.is_ready());
    }
}
