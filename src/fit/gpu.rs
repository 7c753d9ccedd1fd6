//! wgpu correlation device.
//!
//! Candidate rows are uploaded once per fit as `f32`; each voxel tile is
//! uploaded, multiplied on the device and read back through a staging buffer.

use std::sync::mpsc;

use bytemuck::{Pod, Zeroable, cast_slice};
use nalgebra::DMatrix;
use pollster::block_on;
use tracing::info;
use wgpu::util::DeviceExt;

use crate::error::PrfError;
use crate::fit::{CorrelationDevice, CorrelationKernel};

const WORKGROUP: u32 = 16;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ParamsPod {
    n_voxels: u32,
    n_candidates: u32,
    n_volumes: u32,
    pad: u32,
}

pub struct GpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    max_binding: u64,
    max_dispatch: u32,
}

fn unavailable(msg: impl std::fmt::Display) -> PrfError {
    PrfError::BackendUnavailable(format!("GPU: {msg}"))
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

impl GpuDevice {
    pub fn new() -> Result<Self, PrfError> {
        let instance = wgpu::Instance::default();
        let adapter = block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            ..Default::default()
        }))
        .ok_or_else(|| unavailable("no compatible adapter found"))?;
        let adapter_info = adapter.get_info();

        let (device, queue) = block_on(adapter.request_device(&wgpu::DeviceDescriptor::default(), None))
            .map_err(|e| unavailable(format!("failed to acquire device: {e}")))?;
        let limits = device.limits();

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("prf.correlate.layout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, true),
                storage_entry(2, false),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("prf.correlate.pipeline_layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("prf.correlate.shader"),
            source: wgpu::ShaderSource::Wgsl(CORRELATE_WGSL.into()),
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("prf.correlate.pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: "main",
            compilation_options: Default::default(),
        });

        info!(adapter = %adapter_info.name, backend = ?adapter_info.backend, "GPU device ready");
        Ok(Self {
            device,
            queue,
            pipeline,
            layout,
            max_binding: u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size),
            max_dispatch: limits.max_compute_workgroups_per_dimension,
        })
    }
}

struct GpuKernel<'a> {
    gpu: &'a GpuDevice,
    models: wgpu::Buffer,
    n_candidates: usize,
    n_volumes: usize,
}

impl CorrelationDevice for GpuDevice {
    fn name(&self) -> &'static str {
        "accelerated-gpu"
    }

    fn prepare<'a>(&'a self, models: &DMatrix<f64>) -> Result<Box<dyn CorrelationKernel + 'a>, PrfError> {
        let (n_candidates, n_volumes) = models.shape();
        let bytes = (n_candidates * n_volumes * 4) as u64;
        if bytes > self.max_binding {
            return Err(unavailable(format!(
                "model bank needs {bytes} bytes, device storage binding limit is {}",
                self.max_binding
            )));
        }
        if n_candidates.div_ceil(WORKGROUP as usize) > self.max_dispatch as usize {
            return Err(unavailable(format!("{n_candidates} candidates exceed the dispatch limit")));
        }
        let host = row_major_f32(models);
        let models = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("prf.correlate.models"),
            contents: cast_slice(&host),
            usage: wgpu::BufferUsages::STORAGE,
        });
        Ok(Box::new(GpuKernel {
            gpu: self,
            models,
            n_candidates,
            n_volumes,
        }))
    }
}

fn row_major_f32(m: &DMatrix<f64>) -> Vec<f32> {
    let mut out = Vec::with_capacity(m.len());
    for row in m.row_iter() {
        out.extend(row.iter().map(|v| *v as f32));
    }
    out
}

impl CorrelationKernel for GpuKernel<'_> {
    fn correlate(&self, voxels: &DMatrix<f64>) -> Result<DMatrix<f64>, PrfError> {
        let n_voxels = voxels.nrows();
        let gpu = self.gpu;
        let host = row_major_f32(voxels);
        let voxel_buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("prf.correlate.voxels"),
            contents: cast_slice(&host),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let params = ParamsPod {
            n_voxels: n_voxels as u32,
            n_candidates: self.n_candidates as u32,
            n_volumes: self.n_volumes as u32,
            pad: 0,
        };
        let params_buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("prf.correlate.params"),
            contents: cast_slice(&[params]),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let out_bytes = (n_voxels * self.n_candidates * 4) as u64;
        let out_buf = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("prf.correlate.out"),
            size: out_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let staging = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("prf.correlate.staging"),
            size: out_bytes,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("prf.correlate.bind_group"),
            layout: &gpu.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.models.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: voxel_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: out_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: params_buf.as_entire_binding(),
                },
            ],
        });

        let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("prf.correlate.encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("prf.correlate.pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&gpu.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(
                (self.n_candidates as u32).div_ceil(WORKGROUP),
                (n_voxels as u32).div_ceil(WORKGROUP),
                1,
            );
        }
        encoder.copy_buffer_to_buffer(&out_buf, 0, &staging, 0, out_bytes);
        gpu.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = sender.send(res);
        });
        gpu.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|_| unavailable("readback channel closed"))?
            .map_err(|e| unavailable(format!("failed to map readback buffer: {e}")))?;

        let data = slice.get_mapped_range();
        let values: &[f32] = cast_slice(&data);
        let corr = DMatrix::from_fn(n_voxels, self.n_candidates, |v, c| f64::from(values[v * self.n_candidates + c]));
        drop(data);
        staging.unmap();
        Ok(corr)
    }

    fn tolerance(&self) -> f64 {
        (8.0 * self.n_volumes as f64 * f64::from(f32::EPSILON)).max(1e-5)
    }

    fn max_tile_voxels(&self) -> usize {
        let by_out = self.gpu.max_binding as usize / (4 * self.n_candidates.max(1));
        let by_in = self.gpu.max_binding as usize / (4 * self.n_volumes.max(1));
        let by_dispatch = self.gpu.max_dispatch as usize * WORKGROUP as usize;
        let by_host = (1usize << 24) / self.n_candidates.max(1);
        by_out.min(by_in).min(by_dispatch).min(by_host).max(1)
    }
}

const CORRELATE_WGSL: &str = r#"
struct Params {
    n_voxels: u32,
    n_candidates: u32,
    n_volumes: u32,
    pad: u32,
};

@group(0) @binding(0) var<storage, read> models: array<f32>;
@group(0) @binding(1) var<storage, read> voxels: array<f32>;
@group(0) @binding(2) var<storage, read_write> out: array<f32>;
@group(0) @binding(3) var<uniform> params: Params;

@compute @workgroup_size(16, 16, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let c = gid.x;
    let v = gid.y;
    if (c >= params.n_candidates || v >= params.n_voxels) {
        return;
    }
    let mo = c * params.n_volumes;
    let vo = v * params.n_volumes;
    var acc: f32 = 0.0;
    for (var t: u32 = 0u; t < params.n_volumes; t = t + 1u) {
        acc = acc + models[mo + t] * voxels[vo + t];
    }
    out[v * params.n_candidates + c] = acc;
}
"#;
