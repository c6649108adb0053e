//! GPU-accelerated element-wise kernels using WGPU.
//!
//! This module implements the broadcast forward pass and the `dY` reduction
//! as WGSL compute shaders. It handles GPU context initialization and shader
//! precompilation (via `lazy_static`), and compute dispatch for:
//!
//! - `binary`: `z[i] = op(x[i], y[(i / post) % n])` for add/sub/mul/div
//! - `reduce`: `dy[j] = scale · Σ_p Σ_q dz[p, j, q]` for linear operators
//!
//! Only `f32` buffers are sent to the GPU. Every entry point reports whether
//! it handled the work; on `false`/`None` (wrong element type, no adapter,
//! tensor too large for one dispatch, device error) the caller runs the CPU
//! kernels instead.

use super::cpu::Grads;
use super::functor::{BinaryGrad, BinaryOp};
use crate::broadcast::BroadcastPlan;
use crate::tensors::Element;
use briny::BrinyError;
use briny::raw::{slice_from_bytes, slice_to_bytes};
use std::sync::mpsc;
use thiserror::Error;
use wgpu::util::DeviceExt;

const BINARY: &str = include_str!("shaders/binary.wgsl");
const REDUCE: &str = include_str!("shaders/reduce.wgsl");

const WORKGROUP_SIZE: u32 = 64;

/// Errors acquiring a GPU.
#[derive(Debug, Error)]
pub enum GpuError {
    /// An error in requesting the adapter.
    #[error("adapter error: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),
    /// An error in requesting the device.
    #[error("device error: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
}

/// Reasons a GPU kernel declined or failed to run.
#[derive(Debug, Error)]
pub enum GpuFailure {
    #[error("GPU unavailable: {0}")]
    Unavailable(String),
    #[error("GPU buffer cast failed")]
    Cast,
    #[error("GPU poll failed: {0}")]
    Poll(#[from] wgpu::PollError),
    #[error("GPU buffer mapping failed: {0}")]
    Map(#[from] wgpu::BufferAsyncError),
    #[error("{0} elements do not fit a single dispatch")]
    TooLarge(usize),
}

impl From<BrinyError> for GpuFailure {
    fn from(_: BrinyError) -> Self {
        Self::Cast
    }
}

/// Holds the WGPU device and queue used for executing compute pipelines.
pub struct GpuContext {
    /// The actual GPU device.
    pub device: wgpu::Device,
    /// The submission queue of `device`.
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Selects the default adapter and creates a device + queue.
    ///
    /// # Errors
    ///
    /// [`GpuError`] if adapter or device acquisition fails.
    pub fn new() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::default();
        let adapter =
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))?;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("eltwise_kernels"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))?;

        Ok(Self { device, queue })
    }
}

struct Pipeline {
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

struct Kernels {
    ctx: GpuContext,
    binary: Pipeline,
    reduce: Pipeline,
}

lazy_static::lazy_static! {
    static ref KERNELS: Result<Kernels, String> = Kernels::new().map_err(|e| e.to_string());
}

fn kernels() -> Result<&'static Kernels, GpuFailure> {
    KERNELS
        .as_ref()
        .map_err(|e| GpuFailure::Unavailable(e.clone()))
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
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

impl Pipeline {
    fn new(
        device: &wgpu::Device,
        label: &str,
        source: &str,
        entries: &[wgpu::BindGroupLayoutEntry],
    ) -> Self {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            cache: None,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        });

        Self { layout, pipeline }
    }
}

impl Kernels {
    fn new() -> Result<Self, GpuError> {
        let ctx = GpuContext::new()?;
        let binary = Pipeline::new(
            &ctx.device,
            "elementwise_binary",
            BINARY,
            &[
                uniform_entry(0),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, false),
            ],
        );
        let reduce = Pipeline::new(
            &ctx.device,
            "broadcast_reduce",
            REDUCE,
            &[uniform_entry(0), storage_entry(1, true), storage_entry(2, false)],
        );

        Ok(Self {
            ctx,
            binary,
            reduce,
        })
    }

    fn workgroups(&self, invocations: usize) -> Result<u32, GpuFailure> {
        let count = u32::try_from(invocations).map_err(|_| GpuFailure::TooLarge(invocations))?;
        let groups = count.div_ceil(WORKGROUP_SIZE);
        if groups > self.ctx.device.limits().max_compute_workgroups_per_dimension {
            return Err(GpuFailure::TooLarge(invocations));
        }
        Ok(groups)
    }

    fn input(&self, label: &str, contents: &[u8], usage: wgpu::BufferUsages) -> wgpu::Buffer {
        self.ctx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage,
            })
    }

    fn output(&self, label: &str, len: usize) -> wgpu::Buffer {
        self.ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: byte_len(len),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        })
    }

    fn run(
        &self,
        pipeline: &Pipeline,
        buffers: &[&wgpu::Buffer],
        groups: u32,
        result: &wgpu::Buffer,
        out: &mut [f32],
    ) -> Result<(), GpuFailure> {
        let device = &self.ctx.device;

        let entries: Vec<wgpu::BindGroupEntry> = buffers
            .iter()
            .zip(0u32..)
            .map(|(buf, binding)| wgpu::BindGroupEntry {
                binding,
                resource: buf.as_entire_binding(),
            })
            .collect();
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &pipeline.layout,
            entries: &entries,
        });

        let mut encoder =
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipeline.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups, 1, 1);
        }

        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging"),
            size: byte_len(out.len()),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        encoder.copy_buffer_to_buffer(result, 0, &staging, 0, byte_len(out.len()));
        self.ctx.queue.submit(Some(encoder.finish()));

        let (tx, rx) = mpsc::channel();
        staging.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device.poll(wgpu::PollType::Wait)?;
        rx.recv()
            .map_err(|_| GpuFailure::Unavailable("mapping callback dropped".into()))??;

        {
            let data = staging.slice(..).get_mapped_range();
            out.copy_from_slice(slice_from_bytes::<f32>(&data)?);
        }
        staging.unmap();

        Ok(())
    }
}

fn byte_len(len: usize) -> u64 {
    (len * core::mem::size_of::<f32>()) as u64
}

fn dim(value: usize) -> Result<u32, GpuFailure> {
    u32::try_from(value).map_err(|_| GpuFailure::TooLarge(value))
}

fn run_binary(
    k: &Kernels,
    opcode: u32,
    plan: &BroadcastPlan,
    x: &[f32],
    y: &[f32],
    z: &mut [f32],
) -> Result<(), GpuFailure> {
    let groups = k.workgroups(x.len())?;
    let params = [dim(plan.n)?, dim(plan.post)?, opcode, dim(x.len())?];

    let params_buf = k.input(
        "binary_params",
        slice_to_bytes(&params[..]),
        wgpu::BufferUsages::UNIFORM,
    );
    let x_buf = k.input("x", slice_to_bytes(x), wgpu::BufferUsages::STORAGE);
    let y_buf = k.input("y", slice_to_bytes(y), wgpu::BufferUsages::STORAGE);
    let z_buf = k.output("z", z.len());

    k.run(&k.binary, &[&params_buf, &x_buf, &y_buf, &z_buf], groups, &z_buf, z)
}

fn run_reduce(
    k: &Kernels,
    plan: &BroadcastPlan,
    scale: f32,
    dz: &[f32],
    dy: &mut [f32],
) -> Result<(), GpuFailure> {
    let groups = k.workgroups(plan.n)?;
    let params = [dim(plan.pre)?, dim(plan.n)?, dim(plan.post)?, scale.to_bits()];

    let params_buf = k.input(
        "reduce_params",
        slice_to_bytes(&params[..]),
        wgpu::BufferUsages::UNIFORM,
    );
    let dz_buf = k.input("dz", slice_to_bytes(dz), wgpu::BufferUsages::STORAGE);
    let dy_buf = k.output("dy", dy.len());

    k.run(&k.reduce, &[&params_buf, &dz_buf, &dy_buf], groups, &dy_buf, dy)
}

/// Runs the forward pass of `O` on the GPU.
///
/// Returns `false` without touching `out` when the GPU cannot take the work.
pub fn wgpu_forward<T: Element, O: BinaryOp<T>>(
    _op: &O,
    x: &[T],
    y: &[T],
    plan: &BroadcastPlan,
    out: &mut [T],
) -> bool {
    let (Some(opcode), Some(xs), Some(ys)) =
        (O::GPU_OPCODE, T::as_f32_slice(x), T::as_f32_slice(y))
    else {
        return false;
    };
    if xs.is_empty() {
        return false;
    }

    let mut zs = vec![0.0f32; xs.len()];
    if let Err(e) = kernels().and_then(|k| run_binary(k, opcode, plan, xs, ys, &mut zs)) {
        tracing::debug!(error = %e, op = O::NAME, "wgpu forward declined, using cpu");
        return false;
    }

    match T::from_f32_vec(zs) {
        Some(zs) => {
            out.copy_from_slice(&zs);
            true
        }
        None => false,
    }
}

/// Runs the backward pass of a linear operator on the GPU.
///
/// `dX` is `dout` scaled on the host; `dY` is reduced by the `reduce` shader.
/// Returns `None` for non-linear operators, non-`f32` elements, or GPU failure.
pub fn wgpu_linear_backward<T: Element, O: BinaryGrad<T>>(
    _op: &O,
    dout: &[T],
    plan: &BroadcastPlan,
    want_dx: bool,
    want_dy: bool,
) -> Option<Grads<T>> {
    let (dx_scale, dy_scale) = O::CONSTANT_GRADS?;
    let dz = T::as_f32_slice(dout)?;
    if dz.is_empty() || plan.n == 0 {
        return None;
    }

    let dx = want_dx.then(|| dz.iter().map(|&g| g * dx_scale).collect::<Vec<f32>>());

    let dy = if want_dy {
        let mut dy = vec![0.0f32; plan.n];
        if let Err(e) = kernels().and_then(|k| run_reduce(k, plan, dy_scale, dz, &mut dy)) {
            tracing::debug!(error = %e, op = O::NAME, "wgpu backward declined, using cpu");
            return None;
        }
        Some(dy)
    } else {
        None
    };

    Some(Grads {
        dx: match dx {
            Some(dx) => Some(T::from_f32_vec(dx)?),
            None => None,
        },
        dy: match dy {
            Some(dy) => Some(T::from_f32_vec(dy)?),
            None => None,
        },
    })
}
