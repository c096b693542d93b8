//! Accelerator backend (wgpu compute)
//!
//! The transition table and output bitmap are uploaded once when the
//! backend is created and stay resident until it is dropped. Each call only
//! writes the input symbols, dispatches one invocation per fingerprint and
//! reads back one `u32` per fingerprint. The input/result buffers are reused
//! across calls and replaced wholesale when a batch does not fit.
//!
//! A dispatch runs on its own task holding the IO buffers, so a caller that
//! stops waiting never leaves the staging buffer mapped.

use std::sync::Arc;

use async_trait::async_trait;
use futures::channel::oneshot;
use jg_core::{DenseAutomaton, Fingerprint, PatternSetId, FINGERPRINT_LEN};
use tokio::sync::{Mutex, OwnedMutexGuard};
use wgpu::util::DeviceExt;

use super::{BackendKind, MatchBackend};
use crate::error::{Error, Result};

const WORKGROUP_SIZE: u32 = 64;
const WORD: u64 = std::mem::size_of::<u32>() as u64;

/// Device and queue shared by every accelerator backend.
pub struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    info: wgpu::AdapterInfo,
}

impl GpuContext {
    /// Acquire an adapter and device. Any failure is reported as
    /// `CapabilityUnavailable`.
    pub async fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or_else(|| Error::CapabilityUnavailable("no compatible adapter".into()))?;

        let info = adapter.get_info();
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("jarmguard"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                },
                None,
            )
            .await
            .map_err(|e| Error::CapabilityUnavailable(format!("device request failed: {e}")))?;

        // Errors outside an error scope are logged instead of panicking.
        device.on_uncaptured_error(Box::new(|e| {
            log::error!("Uncaptured accelerator error: {e}");
        }));

        log::info!("Accelerator: {} ({:?})", info.name, info.backend);
        Ok(Self { device, queue, info })
    }

    pub fn adapter_name(&self) -> &str {
        &self.info.name
    }

    fn max_binding_bytes(&self) -> u64 {
        u64::from(self.device.limits().max_storage_buffer_binding_size)
    }
}

struct IoBuffers {
    capacity: usize,
    input: wgpu::Buffer,
    results: wgpu::Buffer,
    staging: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

impl Drop for IoBuffers {
    fn drop(&mut self) {
        self.input.destroy();
        self.results.destroy();
        self.staging.destroy();
    }
}

/// Table buffers and pipeline of one automaton generation.
struct Kernel {
    context: Arc<GpuContext>,
    transitions: wgpu::Buffer,
    accepting: wgpu::Buffer,
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

impl Drop for Kernel {
    fn drop(&mut self) {
        self.transitions.destroy();
        self.accepting.destroy();
    }
}

/// Accelerator backend for one automaton generation.
pub struct GpuBackend {
    set: PatternSetId,
    kernel: Arc<Kernel>,
    io: Arc<Mutex<IoBuffers>>,
}

impl GpuBackend {
    pub async fn new(
        context: Arc<GpuContext>,
        set: PatternSetId,
        automaton: &DenseAutomaton,
        capacity: usize,
    ) -> Result<Self> {
        let table_bytes = automaton.transitions().len() as u64 * WORD;
        if table_bytes > context.max_binding_bytes() {
            return Err(Error::CapabilityUnavailable(format!(
                "{set} table is {table_bytes} bytes, device binding limit is {}",
                context.max_binding_bytes()
            )));
        }

        let device = &context.device;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("jarm-match"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shader.wgsl").into()),
        });

        let transitions = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("transitions"),
            contents: bytemuck::cast_slice(automaton.transitions()),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let accepting = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("accepting"),
            contents: bytemuck::cast_slice(automaton.output()),
            usage: wgpu::BufferUsages::STORAGE,
        });

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("jarm-match"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, false),
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("jarm-match"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("jarm-match"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: "main",
        });

        let kernel = Kernel {
            context: context.clone(),
            transitions,
            accepting,
            layout,
            pipeline,
        };
        let io = kernel.create_io(capacity.max(1));

        let validation = device.pop_error_scope().await;
        let oom = device.pop_error_scope().await;
        if let Some(e) = validation.or(oom) {
            // Dropping `kernel` and `io` releases the buffers.
            return Err(Error::CapabilityUnavailable(format!(
                "allocating {set} resources failed: {e}"
            )));
        }

        log::debug!(
            "Prepared accelerator backend for {set}: {} states, capacity {}",
            automaton.num_states(),
            io.capacity
        );

        Ok(Self {
            set,
            kernel: Arc::new(kernel),
            io: Arc::new(Mutex::new(io)),
        })
    }

    async fn dispatch(&self, batch: Arc<[Fingerprint]>) -> Result<Vec<bool>> {
        let len = batch.len();
        let limits = self.kernel.context.device.limits();
        let input_bytes = (len * FINGERPRINT_LEN) as u64 * WORD;
        if input_bytes > u64::from(limits.max_storage_buffer_binding_size) {
            return Err(Error::dispatch(
                &self.set,
                format!("batch of {len} exceeds the device binding limit"),
            ));
        }
        let groups = (len as u32).div_ceil(WORKGROUP_SIZE);
        if groups > limits.max_compute_workgroups_per_dimension {
            return Err(Error::dispatch(&self.set, format!("batch of {len} is too large")));
        }

        let io = self.io.clone().lock_owned().await;
        let kernel = self.kernel.clone();
        let set = self.set.clone();
        tokio::spawn(async move { kernel.run(io, &set, &batch, groups).await })
            .await
            .map_err(|e| Error::dispatch(&self.set, format!("dispatch task failed: {e}")))?
    }
}

impl Kernel {
    async fn run(
        &self,
        mut io: OwnedMutexGuard<IoBuffers>,
        set: &PatternSetId,
        batch: &[Fingerprint],
        groups: u32,
    ) -> Result<Vec<bool>> {
        let len = batch.len();
        let device = &self.context.device;

        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        if len > io.capacity {
            *io = self.create_io(len);
            log::debug!("Regrew {set} accelerator buffers to {len}");
        }

        let symbols: Vec<u32> = batch
            .iter()
            .flat_map(|fp| fp.symbols().iter().map(|&s| u32::from(s)))
            .collect();
        self.context
            .queue
            .write_buffer(&io.input, 0, bytemuck::cast_slice(&symbols));

        let result_bytes = len as u64 * WORD;
        let mut encoder =
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("jarm-match") });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("jarm-match"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &io.bind_group, &[]);
            pass.dispatch_workgroups(groups, 1, 1);
        }
        encoder.copy_buffer_to_buffer(&io.results, 0, &io.staging, 0, result_bytes);
        self.context.queue.submit(Some(encoder.finish()));

        let validation = device.pop_error_scope().await;
        let oom = device.pop_error_scope().await;
        if let Some(e) = validation.or(oom) {
            return Err(Error::dispatch(set, format!("device rejected dispatch: {e}")));
        }

        let slice = io.staging.slice(..result_bytes);
        let (tx, rx) = oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |mapped| {
            let _ = tx.send(mapped);
        });

        let context = self.context.clone();
        tokio::task::spawn_blocking(move || {
            let _ = context.device.poll(wgpu::Maintain::Wait);
        })
        .await
        .map_err(|e| Error::dispatch(set, format!("device poll failed: {e}")))?;

        rx.await
            .map_err(|_| Error::dispatch(set, "readback callback dropped"))?
            .map_err(|e| Error::dispatch(set, format!("readback failed: {e}")))?;

        let results = {
            let view = slice.get_mapped_range();
            let words: &[u32] = bytemuck::cast_slice(&view);
            words.iter().map(|&w| w != 0).collect()
        };
        io.staging.unmap();

        Ok(results)
    }

    fn create_io(&self, capacity: usize) -> IoBuffers {
        let device = &self.context.device;
        let input = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("symbols"),
            size: (capacity * FINGERPRINT_LEN) as u64 * WORD,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let results = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("results"),
            size: capacity as u64 * WORD,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging"),
            size: capacity as u64 * WORD,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("jarm-match"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: self.transitions.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: self.accepting.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: input.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: results.as_entire_binding() },
            ],
        });

        IoBuffers {
            capacity,
            input,
            results,
            staging,
            bind_group,
        }
    }
}

#[async_trait]
impl MatchBackend for GpuBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Accelerator
    }

    fn pattern_set(&self) -> &PatternSetId {
        &self.set
    }

    async fn match_batch(&self, batch: Arc<[Fingerprint]>) -> Result<Vec<bool>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        self.dispatch(batch).await
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}
