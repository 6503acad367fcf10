//! wgpu accelerator.
//!
//! Images travel as `Rgba8Unorm` textures: the input is written into a
//! pooled sampled texture, the kernel writes a pooled storage texture, and
//! the result is copied into a pooled readback buffer with 256-byte aligned
//! rows. Every call runs inside validation and out-of-memory error scopes
//! so device errors come back as [`ComputeError`]s instead of panics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use darkroom_ops::{
    remove_row_padding, aligned_bytes_per_row, Adjustments, Histogram, LinearKernel, RadialKernel,
    ToneCurveLut, ROW_ALIGNMENT,
};
use tracing::{debug, error, info, warn};

use super::platform::{Accelerator, Adapter, AdapterRequest, DeviceLostCallback, Platform};
use super::{AcceleratorSettings, AdapterInfo, DeviceType, Features, Limits};
use crate::pipeline::adjustments::AdjustParams;
use crate::pipeline::histogram::{parse_bins, BINS_BYTES};
use crate::pipeline::rotation::RotateParams;
use crate::pipeline::tone_curve::lut_words;
use crate::pipeline::{
    kernel_source, mask, uber, workgroups, BindingKind, OpId, PipelineCache, VariantFlags,
};
use crate::pool::{
    BufferKey, BufferPool, PoolAllocator, Pooled, ReadbackTicket, StagingAllocator, StagingBuffer,
    StagingBufferPool, TextureKey, TexturePool,
};
use crate::{lock, ComputeError, ComputeResult};

const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const RGBA_BPP: usize = 4;

fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d { width, height, depth_or_array_layers: 1 }
}

// ============================================================================
// Platform
// ============================================================================

/// wgpu instance over every native backend.
pub struct WgpuPlatform {
    instance: wgpu::Instance,
    settings: AcceleratorSettings,
}

impl WgpuPlatform {
    pub fn new(settings: AcceleratorSettings) -> Self {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        Self { instance, settings }
    }
}

impl Default for WgpuPlatform {
    fn default() -> Self {
        Self::new(AcceleratorSettings::default())
    }
}

impl Platform for WgpuPlatform {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn request_adapter(&self, request: &AdapterRequest) -> ComputeResult<Box<dyn Adapter>> {
        let power_preference = if request.high_performance {
            wgpu::PowerPreference::HighPerformance
        } else {
            wgpu::PowerPreference::LowPower
        };
        let adapter = pollster::block_on(self.instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference,
            compatible_surface: None,
            force_fallback_adapter: request.force_fallback_adapter,
        }))
        .ok_or(ComputeError::AdapterNotFound)?;

        Ok(Box::new(WgpuAdapter { adapter, settings: self.settings }))
    }
}

// ============================================================================
// Adapter
// ============================================================================

struct WgpuAdapter {
    adapter: wgpu::Adapter,
    settings: AcceleratorSettings,
}

fn device_type(t: wgpu::DeviceType) -> DeviceType {
    match t {
        wgpu::DeviceType::DiscreteGpu => DeviceType::DiscreteGpu,
        wgpu::DeviceType::IntegratedGpu => DeviceType::IntegratedGpu,
        wgpu::DeviceType::VirtualGpu => DeviceType::VirtualGpu,
        wgpu::DeviceType::Cpu => DeviceType::Cpu,
        wgpu::DeviceType::Other => DeviceType::Other,
    }
}

/// Optional features requested when the adapter has them.
const OPTIONAL_FEATURES: [wgpu::Features; 4] = [
    wgpu::Features::SHADER_F16,
    wgpu::Features::SUBGROUP,
    wgpu::Features::FLOAT32_FILTERABLE,
    wgpu::Features::TIMESTAMP_QUERY,
];

impl Adapter for WgpuAdapter {
    fn info(&self) -> AdapterInfo {
        let info = self.adapter.get_info();
        AdapterInfo {
            name: info.name,
            vendor: info.vendor,
            device_type: device_type(info.device_type),
            api: format!("{:?}", info.backend),
        }
    }

    fn request_device(self: Box<Self>, on_lost: DeviceLostCallback) -> ComputeResult<Arc<dyn Accelerator>> {
        let available = self.adapter.features();
        let required = OPTIONAL_FEATURES
            .into_iter()
            .filter(|f| available.contains(*f))
            .fold(wgpu::Features::empty(), |acc, f| acc | f);
        let adapter_limits = self.adapter.limits();

        let (device, queue) = pollster::block_on(self.adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("darkroom_device"),
                required_features: required,
                required_limits: adapter_limits.clone(),
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            },
            None,
        ))
        .map_err(|e| ComputeError::DeviceCreationFailed(e.to_string()))?;

        let lost = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&lost);
        device.set_device_lost_callback(move |reason, message| {
            flag.store(true, Ordering::SeqCst);
            if matches!(reason, wgpu::DeviceLostReason::Destroyed) {
                return;
            }
            // Recovery re-enters the platform; keep it off wgpu's thread.
            let on_lost = Arc::clone(&on_lost);
            let detail = format!("{reason:?}: {message}");
            let spawned = std::thread::Builder::new()
                .name("darkroom-recovery".into())
                .spawn(move || on_lost(detail));
            if let Err(e) = spawned {
                error!(error = %e, "failed to spawn device recovery");
            }
        });
        device.on_uncaptured_error(Box::new(|err| {
            error!(error = %err, "uncaptured device error");
        }));

        let features = Features {
            f16: required.contains(wgpu::Features::SHADER_F16),
            subgroups: required.contains(wgpu::Features::SUBGROUP),
            float32_filter: required.contains(wgpu::Features::FLOAT32_FILTERABLE),
            timestamp_query: required.contains(wgpu::Features::TIMESTAMP_QUERY),
        };
        let limits = Limits {
            max_texture_size: adapter_limits.max_texture_dimension_2d,
            max_buffer_size: adapter_limits.max_buffer_size,
            max_workgroup_size: adapter_limits.max_compute_invocations_per_workgroup,
            max_workgroups_per_dim: adapter_limits.max_compute_workgroups_per_dimension,
        };

        let accelerator = WgpuAccelerator::new(device, queue, lost, features, limits, self.settings)?;
        info!(
            adapter = %self.adapter.get_info().name,
            variants = %accelerator.variant_caps,
            "wgpu device created"
        );
        Ok(Arc::new(accelerator))
    }
}

// ============================================================================
// Pool allocators
// ============================================================================

struct TextureAllocator {
    device: Arc<wgpu::Device>,
}

impl PoolAllocator<TextureKey> for TextureAllocator {
    type Resource = Arc<wgpu::Texture>;

    fn allocate(&self, key: &TextureKey) -> ComputeResult<Self::Resource> {
        Ok(Arc::new(self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("darkroom_texture"),
            size: extent(key.width, key.height),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::from_bits_truncate(key.usage),
            view_formats: &[],
        })))
    }

    fn destroy(&self, texture: &Self::Resource) {
        texture.destroy();
    }
}

struct BufferAllocator {
    device: Arc<wgpu::Device>,
}

impl PoolAllocator<BufferKey> for BufferAllocator {
    type Resource = Arc<wgpu::Buffer>;

    fn allocate(&self, key: &BufferKey) -> ComputeResult<Self::Resource> {
        Ok(Arc::new(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("darkroom_buffer"),
            size: key.size,
            usage: wgpu::BufferUsages::from_bits_truncate(key.usage),
            mapped_at_creation: false,
        })))
    }

    fn destroy(&self, buffer: &Self::Resource) {
        buffer.destroy();
    }
}

/// Maps a whole buffer for reading and copies it out. The buffer is left
/// mapped; callers unmap it.
fn map_buffer(device: &wgpu::Device, buffer: &wgpu::Buffer, lost: &AtomicBool) -> ComputeResult<Vec<u8>> {
    let slice = buffer.slice(..);
    let (tx, rx) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |r| {
        let _ = tx.send(r);
    });
    device.poll(wgpu::Maintain::Wait);

    let mapped = rx
        .recv()
        .map_err(|_| ComputeError::InternalError("map channel closed".into()))?;
    if let Err(e) = mapped {
        if lost.load(Ordering::SeqCst) {
            return Err(ComputeError::DeviceLost(format!("map failed: {e}")));
        }
        return Err(ComputeError::InternalError(format!("map failed: {e}")));
    }
    let bytes = slice.get_mapped_range().to_vec();
    Ok(bytes)
}

struct WgpuStagingAllocator {
    device: Arc<wgpu::Device>,
    lost: Arc<AtomicBool>,
    size: u64,
}

impl StagingAllocator for WgpuStagingAllocator {
    type Buffer = WgpuStagingBuffer;

    fn allocate(&self) -> ComputeResult<WgpuStagingBuffer> {
        if self.lost.load(Ordering::SeqCst) {
            return Err(ComputeError::DeviceLost("cannot allocate staging buffer".into()));
        }
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("darkroom_staging"),
            size: self.size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Ok(WgpuStagingBuffer {
            buffer,
            device: Arc::clone(&self.device),
            lost: Arc::clone(&self.lost),
            mapped: AtomicBool::new(false),
        })
    }
}

struct WgpuStagingBuffer {
    buffer: wgpu::Buffer,
    device: Arc<wgpu::Device>,
    lost: Arc<AtomicBool>,
    mapped: AtomicBool,
}

impl StagingBuffer for WgpuStagingBuffer {
    fn is_mapped(&self) -> bool {
        self.mapped.load(Ordering::SeqCst)
    }

    fn map_read(&self) -> ComputeResult<Vec<u8>> {
        if self.lost.load(Ordering::SeqCst) {
            return Err(ComputeError::DeviceLost("device lost before readback".into()));
        }
        self.mapped.store(true, Ordering::SeqCst);
        map_buffer(&self.device, &self.buffer, &self.lost)
    }

    fn unmap(&self) {
        if self.mapped.swap(false, Ordering::SeqCst) {
            self.buffer.unmap();
        }
    }
}

// ============================================================================
// Accelerator
// ============================================================================

struct Kernel {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
}

struct GpuState {
    cache: PipelineCache<Kernel>,
    textures: TexturePool<TextureAllocator>,
    buffers: BufferPool<BufferAllocator>,
}

/// Resources checked out for one call, returned together afterwards.
#[derive(Default)]
struct Leases {
    textures: Vec<Pooled<TextureKey, Arc<wgpu::Texture>>>,
    buffers: Vec<Pooled<BufferKey, Arc<wgpu::Buffer>>>,
}

impl Leases {
    fn texture(&mut self, state: &mut GpuState, key: TextureKey) -> ComputeResult<Arc<wgpu::Texture>> {
        let pooled = state.textures.acquire(key)?;
        let texture = Arc::clone(pooled.resource());
        self.textures.push(pooled);
        Ok(texture)
    }

    fn buffer(&mut self, state: &mut GpuState, key: BufferKey) -> ComputeResult<Arc<wgpu::Buffer>> {
        let pooled = state.buffers.acquire(key)?;
        let buffer = Arc::clone(pooled.resource());
        self.buffers.push(pooled);
        Ok(buffer)
    }

    fn release(self, state: &mut GpuState) {
        for t in self.textures {
            state.textures.release(t);
        }
        for b in self.buffers {
            state.buffers.release(b);
        }
    }
}

/// An open wgpu device with its pipeline cache and resource pools.
pub struct WgpuAccelerator {
    device: Arc<wgpu::Device>,
    queue: wgpu::Queue,
    lost: Arc<AtomicBool>,
    limits: Limits,
    features: Features,
    variant_caps: VariantFlags,
    state: Mutex<Option<GpuState>>,
    staging: StagingBufferPool<WgpuStagingAllocator>,
}

impl WgpuAccelerator {
    fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        lost: Arc<AtomicBool>,
        features: Features,
        limits: Limits,
        settings: AcceleratorSettings,
    ) -> ComputeResult<Self> {
        let device = Arc::new(device);
        let staging = StagingBufferPool::new(
            WgpuStagingAllocator {
                device: Arc::clone(&device),
                lost: Arc::clone(&lost),
                size: BINS_BYTES,
            },
            settings.staging_slots,
        )?;
        let state = GpuState {
            cache: PipelineCache::new(),
            textures: TexturePool::with_max_size(
                TextureAllocator { device: Arc::clone(&device) },
                settings.texture_pool_size,
            ),
            buffers: BufferPool::with_max_size(
                BufferAllocator { device: Arc::clone(&device) },
                settings.buffer_pool_size,
            ),
        };
        Ok(Self {
            variant_caps: VariantFlags::from_capabilities(&features, settings.prefer_half_precision),
            device,
            queue,
            lost,
            limits,
            features,
            state: Mutex::new(Some(state)),
            staging,
        })
    }

    fn variant(&self, op: OpId) -> VariantFlags {
        self.variant_caps.intersection(op.variant_mask())
    }

    /// Runs `f` on the locked state inside validation and OOM error scopes.
    fn with_state<T>(&self, f: impl FnOnce(&mut GpuState) -> ComputeResult<T>) -> ComputeResult<T> {
        if self.lost.load(Ordering::SeqCst) {
            return Err(ComputeError::DeviceLost("device is lost".into()));
        }
        let mut guard = lock(&self.state);
        let state = guard
            .as_mut()
            .ok_or_else(|| ComputeError::DeviceLost("accelerator destroyed".into()))?;

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let result = f(state);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());

        if let Some(e) = oom {
            return Err(ComputeError::OutOfMemory(e.to_string()));
        }
        if let Some(e) = validation {
            return Err(ComputeError::ValidationError(e.to_string()));
        }
        if result.is_err() && self.lost.load(Ordering::SeqCst) {
            return Err(ComputeError::DeviceLost("device lost during dispatch".into()));
        }
        result
    }

    fn kernel(&self, state: &mut GpuState, op: OpId, flags: VariantFlags) -> ComputeResult<Arc<Kernel>> {
        state.cache.get_or_compile(op, flags, || self.compile(op, flags))
    }

    /// Compiles a variant, retrying without optional features if the
    /// driver rejects it.
    fn compile(&self, op: OpId, flags: VariantFlags) -> ComputeResult<Kernel> {
        let optional = flags.intersection(VariantFlags::optional_features());
        match self.try_compile(op, flags) {
            Err(e) if optional != VariantFlags::empty() => {
                let base = flags.difference(optional);
                warn!(%op, variant = %flags, fallback = %base, error = %e, "variant rejected, compiling base");
                self.try_compile(op, base)
            }
            other => other,
        }
    }

    fn try_compile(&self, op: OpId, flags: VariantFlags) -> ComputeResult<Kernel> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let entries: Vec<wgpu::BindGroupLayoutEntry> = op
            .bindings()
            .iter()
            .enumerate()
            .map(|(i, kind)| layout_entry(i as u32, *kind))
            .collect();
        let layout = self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(op.name()),
            entries: &entries,
        });
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(op.name()),
            source: wgpu::ShaderSource::Wgsl(kernel_source(op, flags).into()),
        });
        let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(op.name()),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(op.name()),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        if let Some(e) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(ComputeError::ValidationError(format!("{op} ({flags}): {e}")));
        }
        debug!(%op, variant = %flags, "kernel compiled");
        Ok(Kernel { pipeline, layout })
    }

    /// Uploads `rgba`, runs an image-to-image kernel with `params` bound
    /// after the two textures, and reads the result back.
    fn run_image(
        &self,
        op: OpId,
        flags: VariantFlags,
        rgba: &[u8],
        width: u32,
        height: u32,
        params: &[&[u8]],
    ) -> ComputeResult<Vec<u8>> {
        self.with_state(|state| {
            let kernel = self.kernel(state, op, flags)?;
            let mut leases = Leases::default();
            let result = self.dispatch_image(state, &mut leases, &kernel, op, rgba, width, height, params);
            leases.release(state);
            result
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch_image(
        &self,
        state: &mut GpuState,
        leases: &mut Leases,
        kernel: &Kernel,
        op: OpId,
        rgba: &[u8],
        width: u32,
        height: u32,
        params: &[&[u8]],
    ) -> ComputeResult<Vec<u8>> {
        let input = self.upload(state, leases, rgba, width, height)?;
        let output = leases.texture(
            state,
            TextureKey::new(
                width,
                height,
                (wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::COPY_SRC).bits(),
            ),
        )?;

        let mut buffers = Vec::with_capacity(params.len());
        for (kind, bytes) in op.bindings()[2..].iter().zip(params) {
            let usage = match kind {
                BindingKind::Uniform => wgpu::BufferUsages::UNIFORM,
                _ => wgpu::BufferUsages::STORAGE,
            } | wgpu::BufferUsages::COPY_DST;
            let buffer = leases.buffer(state, BufferKey::new(bytes.len() as u64, usage.bits()))?;
            self.queue.write_buffer(&buffer, 0, bytes);
            buffers.push(buffer);
        }

        let input_view = input.create_view(&wgpu::TextureViewDescriptor::default());
        let output_view = output.create_view(&wgpu::TextureViewDescriptor::default());
        let mut entries = vec![
            wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(&input_view) },
            wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(&output_view) },
        ];
        for (i, buffer) in buffers.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry { binding: 2 + i as u32, resource: buffer.as_entire_binding() });
        }
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(op.name()),
            layout: &kernel.layout,
            entries: &entries,
        });

        let stride = aligned_bytes_per_row(width as usize * RGBA_BPP, ROW_ALIGNMENT)?;
        let readback = leases.buffer(
            state,
            BufferKey::new(
                (stride * height as usize) as u64,
                (wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST).bits(),
            ),
        )?;

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(op.name()),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(op.name()),
                timestamp_writes: None,
            });
            pass.set_pipeline(&kernel.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            let (x, y, z) = workgroups(width, height);
            pass.dispatch_workgroups(x, y, z);
        }
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &output,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(stride as u32),
                    rows_per_image: Some(height),
                },
            },
            extent(width, height),
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let padded = map_buffer(&self.device, &readback, &self.lost);
        readback.unmap();
        Ok(remove_row_padding(&padded?, width, height, RGBA_BPP, ROW_ALIGNMENT)?)
    }

    fn upload(
        &self,
        state: &mut GpuState,
        leases: &mut Leases,
        rgba: &[u8],
        width: u32,
        height: u32,
    ) -> ComputeResult<Arc<wgpu::Texture>> {
        let expected = width as usize * height as usize * RGBA_BPP;
        if rgba.len() != expected {
            return Err(ComputeError::BufferSizeMismatch { expected, actual: rgba.len() });
        }
        let texture = leases.texture(
            state,
            TextureKey::new(
                width,
                height,
                (wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST).bits(),
            ),
        )?;
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * RGBA_BPP as u32),
                rows_per_image: Some(height),
            },
            extent(width, height),
        );
        Ok(texture)
    }

    /// Records the histogram dispatch. The caller copies the returned bins
    /// buffer somewhere mappable and submits.
    fn encode_histogram(
        &self,
        state: &mut GpuState,
        leases: &mut Leases,
        rgba: &[u8],
        width: u32,
        height: u32,
    ) -> ComputeResult<(wgpu::CommandEncoder, Arc<wgpu::Buffer>)> {
        let kernel = self.kernel(state, OpId::Histogram, self.variant(OpId::Histogram))?;
        let input = self.upload(state, leases, rgba, width, height)?;
        let bins = leases.buffer(
            state,
            BufferKey::new(
                BINS_BYTES,
                (wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST)
                    .bits(),
            ),
        )?;

        let view = input.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("histogram"),
            layout: &kernel.layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(&view) },
                wgpu::BindGroupEntry { binding: 1, resource: bins.as_entire_binding() },
            ],
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("histogram"),
        });
        encoder.clear_buffer(&bins, 0, None);
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("histogram"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&kernel.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            let (x, y, z) = workgroups(width, height);
            pass.dispatch_workgroups(x, y, z);
        }
        Ok((encoder, bins))
    }

    fn histogram_blocking(
        &self,
        state: &mut GpuState,
        leases: &mut Leases,
        rgba: &[u8],
        width: u32,
        height: u32,
    ) -> ComputeResult<Histogram> {
        let (mut encoder, bins) = self.encode_histogram(state, leases, rgba, width, height)?;
        let readback = leases.buffer(
            state,
            BufferKey::new(BINS_BYTES, (wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST).bits()),
        )?;
        encoder.copy_buffer_to_buffer(&bins, 0, &readback, 0, BINS_BYTES);
        self.queue.submit(std::iter::once(encoder.finish()));

        let bytes = map_buffer(&self.device, &readback, &self.lost);
        readback.unmap();
        parse_bins(&bytes?)
    }
}

fn layout_entry(binding: u32, kind: BindingKind) -> wgpu::BindGroupLayoutEntry {
    let buffer = |ty| wgpu::BindingType::Buffer { ty, has_dynamic_offset: false, min_binding_size: None };
    let ty = match kind {
        BindingKind::InputTexture => wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        BindingKind::OutputTexture => wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format: TEXTURE_FORMAT,
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        BindingKind::Uniform => buffer(wgpu::BufferBindingType::Uniform),
        BindingKind::Storage => buffer(wgpu::BufferBindingType::Storage { read_only: true }),
        BindingKind::StorageReadWrite => buffer(wgpu::BufferBindingType::Storage { read_only: false }),
    };
    wgpu::BindGroupLayoutEntry { binding, visibility: wgpu::ShaderStages::COMPUTE, ty, count: None }
}

impl Accelerator for WgpuAccelerator {
    fn limits(&self) -> Limits {
        self.limits
    }

    fn features(&self) -> Features {
        self.features
    }

    fn adjustments(&self, rgba: &[u8], width: u32, height: u32, adj: &Adjustments) -> ComputeResult<Vec<u8>> {
        let params = AdjustParams::new(adj);
        self.run_image(
            OpId::Adjustments,
            self.variant(OpId::Adjustments),
            rgba,
            width,
            height,
            &[bytemuck::bytes_of(&params)],
        )
    }

    fn tone_curve(&self, rgba: &[u8], width: u32, height: u32, lut: &ToneCurveLut) -> ComputeResult<Vec<u8>> {
        let words = lut_words(lut);
        self.run_image(
            OpId::ToneCurve,
            self.variant(OpId::ToneCurve),
            rgba,
            width,
            height,
            &[bytemuck::cast_slice(words.as_slice())],
        )
    }

    fn uber(
        &self,
        rgba: &[u8],
        width: u32,
        height: u32,
        adj: Option<&Adjustments>,
        lut: Option<&ToneCurveLut>,
    ) -> ComputeResult<Vec<u8>> {
        let flags = self.variant(OpId::Uber) | uber::stage_flags(adj.is_some(), lut.is_some());
        // Disabled stages still need their bindings filled.
        let params = AdjustParams::new(adj.unwrap_or(&Adjustments::default()));
        let words = lut_words(lut.unwrap_or(&ToneCurveLut::identity()));
        self.run_image(
            OpId::Uber,
            flags,
            rgba,
            width,
            height,
            &[bytemuck::bytes_of(&params), bytemuck::cast_slice(words.as_slice())],
        )
    }

    fn masks(
        &self,
        rgba: &[u8],
        width: u32,
        height: u32,
        linear: &[LinearKernel],
        radial: &[RadialKernel],
    ) -> ComputeResult<Vec<u8>> {
        let packed = mask::pack(linear, radial);
        self.run_image(
            OpId::Mask,
            self.variant(OpId::Mask),
            rgba,
            width,
            height,
            &[
                bytemuck::bytes_of(&packed.params),
                bytemuck::cast_slice(&packed.linear),
                bytemuck::cast_slice(&packed.radial),
            ],
        )
    }

    fn histogram(&self, rgba: &[u8], width: u32, height: u32) -> ComputeResult<Histogram> {
        self.with_state(|state| {
            let mut leases = Leases::default();
            let result = self.histogram_blocking(state, &mut leases, rgba, width, height);
            leases.release(state);
            result
        })
    }

    fn histogram_async(
        &self,
        rgba: &[u8],
        width: u32,
        height: u32,
        on_complete: Box<dyn FnOnce(Histogram) + Send>,
    ) -> ComputeResult<Option<ReadbackTicket>> {
        self.with_state(|state| {
            let mut leases = Leases::default();
            let result = self.staging.readback_async(
                |staging: &WgpuStagingBuffer| {
                    let (mut encoder, bins) = self.encode_histogram(state, &mut leases, rgba, width, height)?;
                    encoder.copy_buffer_to_buffer(&bins, 0, &staging.buffer, 0, BINS_BYTES);
                    self.queue.submit(std::iter::once(encoder.finish()));
                    Ok(())
                },
                move |bytes| match parse_bins(&bytes) {
                    Ok(histogram) => on_complete(histogram),
                    Err(e) => warn!(error = %e, "discarding malformed histogram readback"),
                },
            );
            // The queue runs submissions in order, so a later dispatch that
            // reuses these resources cannot overtake this copy.
            leases.release(state);
            result
        })
    }

    fn rotate(&self, rgba: &[u8], width: u32, height: u32, radians: f32) -> ComputeResult<Vec<u8>> {
        let params = RotateParams::new(width, height, radians);
        self.run_image(
            OpId::Rotation,
            self.variant(OpId::Rotation),
            rgba,
            width,
            height,
            &[bytemuck::bytes_of(&params)],
        )
    }

    fn destroy(&self) {
        if let Some(mut state) = lock(&self.state).take() {
            let cached = state.cache.len();
            state.cache.clear();
            state.textures.clear();
            state.buffers.clear();
            debug!(pipelines = cached, "accelerator resources released");
        }
        self.device.destroy();
    }
}
