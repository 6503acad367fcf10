//! In-memory platform, accelerator and staging buffers for tests.
//!
//! [`MockAccelerator`] computes with the CPU kernels, so results match the
//! fallback exactly; it counts calls per operation and can be switched to
//! fail or panic. [`MockPlatform`] records every loss callback it hands out
//! so tests can simulate device loss at any point.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use darkroom_ops::{
    apply_adjustments, apply_lut, apply_mask_kernels, compute_histogram, rgb_to_rgba, rgba_to_rgb,
    rotate, Adjustments, Histogram, LinearKernel, OpsResult, RadialKernel, ToneCurveLut,
};

use crate::backend::{
    Accelerator, Adapter, AdapterInfo, AdapterRequest, DeviceLostCallback, DeviceType, Features,
    Limits, Platform,
};
use crate::pipeline::histogram::{parse_bins, BINS_BYTES};
use crate::pipeline::OpId;
use crate::pool::{ReadbackTicket, StagingAllocator, StagingBuffer, StagingBufferPool, DEFAULT_STAGING_SLOTS};
use crate::{lock, ComputeError, ComputeResult};

// ============================================================================
// Platform
// ============================================================================

struct MockConfig {
    adapter: Option<AdapterInfo>,
    features: Features,
    limits: Limits,
    fail_device: bool,
    lose_next: bool,
    mode: MockMode,
}

struct PlatformState {
    config: Mutex<MockConfig>,
    adapter_requests: AtomicUsize,
    device_requests: AtomicUsize,
    callbacks: Mutex<Vec<DeviceLostCallback>>,
    accelerators: Mutex<Vec<Arc<MockAccelerator>>>,
}

/// Scriptable [`Platform`].
#[derive(Clone)]
pub struct MockPlatform {
    state: Arc<PlatformState>,
}

impl MockPlatform {
    /// A platform with one discrete GPU.
    pub fn new() -> Self {
        Self::with_adapter(Some(AdapterInfo {
            name: "Mock GPU".into(),
            vendor: 0x10de,
            device_type: DeviceType::DiscreteGpu,
            api: "Mock".into(),
        }))
    }

    /// A platform with only a software adapter.
    pub fn software() -> Self {
        Self::with_adapter(Some(AdapterInfo {
            name: "Mock Rasterizer".into(),
            vendor: 0,
            device_type: DeviceType::Cpu,
            api: "Mock".into(),
        }))
    }

    /// A platform that never finds an adapter.
    pub fn without_adapter() -> Self {
        Self::with_adapter(None)
    }

    fn with_adapter(adapter: Option<AdapterInfo>) -> Self {
        Self {
            state: Arc::new(PlatformState {
                config: Mutex::new(MockConfig {
                    adapter,
                    features: Features::default(),
                    limits: Limits::default(),
                    fail_device: false,
                    lose_next: false,
                    mode: MockMode::Normal,
                }),
                adapter_requests: AtomicUsize::new(0),
                device_requests: AtomicUsize::new(0),
                callbacks: Mutex::new(Vec::new()),
                accelerators: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Features reported by devices created from now on.
    pub fn with_features(self, features: Features) -> Self {
        lock(&self.state.config).features = features;
        self
    }

    /// Limits reported by devices created from now on.
    pub fn with_limits(self, limits: Limits) -> Self {
        lock(&self.state.config).limits = limits;
        self
    }

    /// Makes device requests fail.
    pub fn fail_device_creation(&self, fail: bool) {
        lock(&self.state.config).fail_device = fail;
    }

    /// Mode of devices created from now on.
    pub fn set_mode(&self, mode: MockMode) {
        lock(&self.state.config).mode = mode;
    }

    /// The next device fires its loss callback before it is returned.
    pub fn lose_during_next_request(&self) {
        lock(&self.state.config).lose_next = true;
    }

    pub fn adapter_requests(&self) -> usize {
        self.state.adapter_requests.load(Ordering::SeqCst)
    }

    pub fn device_requests(&self) -> usize {
        self.state.device_requests.load(Ordering::SeqCst)
    }

    /// Every device created so far, oldest first.
    pub fn accelerators(&self) -> Vec<Arc<MockAccelerator>> {
        lock(&self.state.accelerators).clone()
    }

    pub fn last_accelerator(&self) -> Option<Arc<MockAccelerator>> {
        lock(&self.state.accelerators).last().cloned()
    }

    /// Loss callback handed to the `index`-th device.
    pub fn lost_callback(&self, index: usize) -> Option<DeviceLostCallback> {
        lock(&self.state.callbacks).get(index).cloned()
    }

    /// Fires the newest device's loss callback on the calling thread.
    pub fn lose_device(&self, reason: &str) {
        let callback = lock(&self.state.callbacks).last().cloned();
        if let Some(callback) = callback {
            callback(reason.to_string());
        }
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for MockPlatform {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn request_adapter(&self, _request: &AdapterRequest) -> ComputeResult<Box<dyn Adapter>> {
        self.state.adapter_requests.fetch_add(1, Ordering::SeqCst);
        let info = lock(&self.state.config).adapter.clone().ok_or(ComputeError::AdapterNotFound)?;
        Ok(Box::new(MockAdapter { info, state: Arc::clone(&self.state) }))
    }
}

struct MockAdapter {
    info: AdapterInfo,
    state: Arc<PlatformState>,
}

impl Adapter for MockAdapter {
    fn info(&self) -> AdapterInfo {
        self.info.clone()
    }

    fn request_device(self: Box<Self>, on_lost: DeviceLostCallback) -> ComputeResult<Arc<dyn Accelerator>> {
        self.state.device_requests.fetch_add(1, Ordering::SeqCst);
        let (features, limits, mode, lose_now) = {
            let mut config = lock(&self.state.config);
            if config.fail_device {
                return Err(ComputeError::DeviceCreationFailed("mock device creation failed".into()));
            }
            let lose_now = std::mem::take(&mut config.lose_next);
            (config.features, config.limits, config.mode.clone(), lose_now)
        };

        let device = Arc::new(MockAccelerator::new(features, limits)?);
        device.set_mode(mode);
        lock(&self.state.accelerators).push(Arc::clone(&device));
        lock(&self.state.callbacks).push(Arc::clone(&on_lost));

        if lose_now {
            on_lost("lost during creation".into());
        }
        Ok(device)
    }
}

// ============================================================================
// Accelerator
// ============================================================================

/// Behaviour of a [`MockAccelerator`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum MockMode {
    #[default]
    Normal,
    /// Every call returns this error.
    Fail(ComputeError),
    /// Every call panics.
    Panic,
}

/// [`Accelerator`] backed by the CPU kernels.
pub struct MockAccelerator {
    features: Features,
    limits: Limits,
    mode: Mutex<MockMode>,
    calls: Mutex<HashMap<OpId, usize>>,
    destroyed: AtomicBool,
    staging: StagingBufferPool<MemoryStagingAllocator>,
    staging_allocator: MemoryStagingAllocator,
}

impl MockAccelerator {
    pub fn new(features: Features, limits: Limits) -> ComputeResult<Self> {
        let staging_allocator = MemoryStagingAllocator::new(BINS_BYTES as usize);
        Ok(Self {
            features,
            limits,
            mode: Mutex::new(MockMode::Normal),
            calls: Mutex::new(HashMap::new()),
            destroyed: AtomicBool::new(false),
            staging: StagingBufferPool::new(staging_allocator.clone(), DEFAULT_STAGING_SLOTS)?,
            staging_allocator,
        })
    }

    pub fn set_mode(&self, mode: MockMode) {
        *lock(&self.mode) = mode;
    }

    /// Calls made for `op`, including failed ones.
    pub fn calls(&self, op: OpId) -> usize {
        lock(&self.calls).get(&op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        lock(&self.calls).values().sum()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Allocator behind the histogram staging ring.
    pub fn staging_allocator(&self) -> &MemoryStagingAllocator {
        &self.staging_allocator
    }

    fn enter(&self, op: OpId) -> ComputeResult<()> {
        *lock(&self.calls).entry(op).or_insert(0) += 1;
        if self.is_destroyed() {
            return Err(ComputeError::DeviceLost("mock device destroyed".into()));
        }
        let mode = lock(&self.mode).clone();
        match mode {
            MockMode::Normal => Ok(()),
            MockMode::Fail(err) => Err(err),
            MockMode::Panic => panic!("mock accelerator panicked in {op}"),
        }
    }
}

fn via_rgb<F>(rgba: &[u8], width: u32, height: u32, f: F) -> ComputeResult<Vec<u8>>
where
    F: FnOnce(&[u8]) -> OpsResult<Vec<u8>>,
{
    let rgb = rgba_to_rgb(rgba, width, height)?;
    let out = f(&rgb)?;
    Ok(rgb_to_rgba(&out, width, height)?)
}

/// Encodes a histogram the way the device bins buffer is laid out.
pub fn encode_bins(histogram: &Histogram) -> Vec<u8> {
    [&histogram.red, &histogram.green, &histogram.blue, &histogram.luminance]
        .into_iter()
        .flat_map(|channel| channel.iter())
        .flat_map(|count| count.to_le_bytes())
        .collect()
}

impl Accelerator for MockAccelerator {
    fn limits(&self) -> Limits {
        self.limits
    }

    fn features(&self) -> Features {
        self.features
    }

    fn adjustments(&self, rgba: &[u8], width: u32, height: u32, adj: &Adjustments) -> ComputeResult<Vec<u8>> {
        self.enter(OpId::Adjustments)?;
        via_rgb(rgba, width, height, |rgb| apply_adjustments(rgb, width, height, adj))
    }

    fn tone_curve(&self, rgba: &[u8], width: u32, height: u32, lut: &ToneCurveLut) -> ComputeResult<Vec<u8>> {
        self.enter(OpId::ToneCurve)?;
        via_rgb(rgba, width, height, |rgb| apply_lut(rgb, width, height, lut))
    }

    fn uber(
        &self,
        rgba: &[u8],
        width: u32,
        height: u32,
        adj: Option<&Adjustments>,
        lut: Option<&ToneCurveLut>,
    ) -> ComputeResult<Vec<u8>> {
        self.enter(OpId::Uber)?;
        via_rgb(rgba, width, height, |rgb| {
            let mut out = match adj {
                Some(adj) => apply_adjustments(rgb, width, height, adj)?,
                None => rgb.to_vec(),
            };
            if let Some(lut) = lut {
                out = apply_lut(&out, width, height, lut)?;
            }
            Ok(out)
        })
    }

    fn masks(
        &self,
        rgba: &[u8],
        width: u32,
        height: u32,
        linear: &[LinearKernel],
        radial: &[RadialKernel],
    ) -> ComputeResult<Vec<u8>> {
        self.enter(OpId::Mask)?;
        via_rgb(rgba, width, height, |rgb| apply_mask_kernels(rgb, width, height, linear, radial))
    }

    fn histogram(&self, rgba: &[u8], width: u32, height: u32) -> ComputeResult<Histogram> {
        self.enter(OpId::Histogram)?;
        let rgb = rgba_to_rgb(rgba, width, height)?;
        Ok(compute_histogram(&rgb, width, height)?)
    }

    fn histogram_async(
        &self,
        rgba: &[u8],
        width: u32,
        height: u32,
        on_complete: Box<dyn FnOnce(Histogram) + Send>,
    ) -> ComputeResult<Option<ReadbackTicket>> {
        self.enter(OpId::Histogram)?;
        let rgb = rgba_to_rgb(rgba, width, height)?;
        let bins = encode_bins(&compute_histogram(&rgb, width, height)?);
        self.staging.readback_async(
            |buffer| {
                buffer.write(&bins);
                Ok(())
            },
            move |bytes| match parse_bins(&bytes) {
                Ok(histogram) => on_complete(histogram),
                Err(e) => tracing::warn!(error = %e, "mock readback produced bad bins"),
            },
        )
    }

    fn rotate(&self, rgba: &[u8], width: u32, height: u32, radians: f32) -> ComputeResult<Vec<u8>> {
        self.enter(OpId::Rotation)?;
        via_rgb(rgba, width, height, |rgb| rotate(rgb, width, height, radians.to_degrees()))
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// Staging
// ============================================================================

/// Failure injected into the next [`StagingBuffer::map_read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingFailure {
    DeviceLost,
    Other,
}

struct AllocatorState {
    size: usize,
    fail_next_map: Mutex<Option<StagingFailure>>,
    failing_allocations: AtomicUsize,
    allocations: AtomicUsize,
    unmap_calls: AtomicUsize,
}

/// Allocates host-memory staging buffers.
#[derive(Clone)]
pub struct MemoryStagingAllocator {
    state: Arc<AllocatorState>,
}

impl MemoryStagingAllocator {
    pub fn new(size: usize) -> Self {
        Self {
            state: Arc::new(AllocatorState {
                size,
                fail_next_map: Mutex::new(None),
                failing_allocations: AtomicUsize::new(0),
                allocations: AtomicUsize::new(0),
                unmap_calls: AtomicUsize::new(0),
            }),
        }
    }

    /// The next map on any buffer of this allocator fails.
    pub fn fail_next_map(&self, failure: StagingFailure) {
        *lock(&self.state.fail_next_map) = Some(failure);
    }

    /// The next `count` allocations fail.
    pub fn fail_allocations(&self, count: usize) {
        self.state.failing_allocations.store(count, Ordering::SeqCst);
    }

    /// Successful allocations so far.
    pub fn allocations(&self) -> usize {
        self.state.allocations.load(Ordering::SeqCst)
    }

    pub fn unmap_calls(&self) -> usize {
        self.state.unmap_calls.load(Ordering::SeqCst)
    }
}

impl StagingAllocator for MemoryStagingAllocator {
    type Buffer = MemoryStagingBuffer;

    fn allocate(&self) -> ComputeResult<MemoryStagingBuffer> {
        let failing = &self.state.failing_allocations;
        if failing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ComputeError::OutOfMemory("mock staging allocation failed".into()));
        }
        self.state.allocations.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryStagingBuffer {
            data: Mutex::new(vec![0; self.state.size]),
            mapped: AtomicBool::new(false),
            state: Arc::clone(&self.state),
        })
    }
}

/// Host-memory [`StagingBuffer`].
pub struct MemoryStagingBuffer {
    data: Mutex<Vec<u8>>,
    mapped: AtomicBool,
    state: Arc<AllocatorState>,
}

impl MemoryStagingBuffer {
    /// Stands in for a device copy into the buffer.
    pub fn write(&self, bytes: &[u8]) {
        let mut data = lock(&self.data);
        let n = bytes.len().min(data.len());
        data[..n].copy_from_slice(&bytes[..n]);
    }

    /// Overrides the mapped flag.
    pub fn force_mapped(&self, mapped: bool) {
        self.mapped.store(mapped, Ordering::SeqCst);
    }
}

impl StagingBuffer for MemoryStagingBuffer {
    fn is_mapped(&self) -> bool {
        self.mapped.load(Ordering::SeqCst)
    }

    fn map_read(&self) -> ComputeResult<Vec<u8>> {
        self.mapped.store(true, Ordering::SeqCst);
        match lock(&self.state.fail_next_map).take() {
            Some(StagingFailure::DeviceLost) => Err(ComputeError::DeviceLost("mock map failed".into())),
            Some(StagingFailure::Other) => Err(ComputeError::InternalError("mock map failed".into())),
            None => Ok(lock(&self.data).clone()),
        }
    }

    fn unmap(&self) {
        self.state.unmap_calls.fetch_add(1, Ordering::SeqCst);
        self.mapped.store(false, Ordering::SeqCst);
    }
}
