use bytemuck::{Pod, Zeroable};

use crate::error::{Error, Result};

/// Kinematic state of one body as laid out on the GPU.
///
/// `vec3<f32>` is 16 byte aligned in WGSL, so both vectors carry one padding float.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuBody {
    /// Position, `w` unused.
    pub position: [f32; 4],
    /// Velocity, `w` unused.
    pub velocity: [f32; 4],
}

/// Uniform parameters shared by the kernels.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Params {
    /// Velocity subtracted by [`Kernel::ShiftVelocities`], `w` unused.
    pub shift: [f32; 4],
    /// Duration of one sub-step.
    pub time_step: f32,
    /// Number of bodies.
    pub count: u32,
    /// Uniform structs are 16 byte aligned.
    pub _padding: [u32; 2],
}

/// Entry points of the compute shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kernel {
    /// One semi-implicit Euler sub-step.
    Integrate,
    /// Subtracts [`Params::shift`] from every velocity.
    ShiftVelocities,
}

impl Kernel {
    #[inline]
    const fn label(self) -> &'static str {
        match self {
            Self::Integrate => "Integrate",
            Self::ShiftVelocities => "Shift velocities",
        }
    }
}

const STATUS_SIZE: u64 = std::mem::size_of::<u32>() as u64;

/// Status value meaning that no body coincides with another one.
pub const NO_DEGENERACY: u32 = u32::MAX;

struct DynamicBuffer {
    buffer: wgpu::Buffer,
    label: Option<String>,
    item_size: u64,
}

impl DynamicBuffer {
    #[inline]
    fn new(device: &wgpu::Device, descriptor: &wgpu::BufferDescriptor, item_size: u64) -> Self {
        Self {
            buffer: device.create_buffer(descriptor),
            label: descriptor.label.map(String::from),
            item_size,
        }
    }

    /// Recreates the buffer if it cannot hold exactly `len` items. Returns true if it was.
    #[inline]
    fn resize(&mut self, device: &wgpu::Device, len: u64) -> bool {
        let size = len * self.item_size;
        if self.buffer.size() == size {
            return false;
        }

        self.buffer = device.create_buffer(&wgpu::BufferDescriptor {
            size,
            mapped_at_creation: false,
            label: self.label.as_deref(),
            usage: self.buffer.usage(),
        });

        true
    }

    #[inline]
    const fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    #[inline]
    fn size(&self) -> wgpu::BufferAddress {
        self.buffer.size()
    }
}

/// All the `wgpu` resources keeping the bodies resident on the GPU.
///
/// Bodies live in two buffers used alternately as input and output of the kernels. `current`
/// designates the one holding the latest state.
pub struct WgpuResources {
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_integrate: wgpu::ComputePipeline,
    pipeline_shift: wgpu::ComputePipeline,
    buffer_params: wgpu::Buffer,
    buffer_mu: DynamicBuffer,
    buffer_bodies: [DynamicBuffer; 2],
    buffer_status: wgpu::Buffer,
    // One bind group per direction, indexed by `current`.
    bind_groups: Vec<wgpu::BindGroup>,
    current: usize,
    len: u64,
    workgroup_size: u32,
}

impl WgpuResources {
    /// Creates the pipelines and empty buffers with the given [`wgpu::Device`].
    pub fn new(device: &wgpu::Device, workgroup_size: u32) -> Self {
        let storage = |binding, read_only| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                storage(1, true),
                storage(2, true),
                storage(3, false),
                storage(4, false),
            ],
            label: Some("Bodies layout"),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Compute layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let compute_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Integrate shader"),
            source: wgpu::ShaderSource::Wgsl(
                include_str!("integrate.wgsl")
                    .replace("#WORKGROUP_SIZE", &(workgroup_size.to_string() + "u"))
                    .into(),
            ),
        });

        let pipeline = |label, entry_point| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                module: &compute_shader,
                entry_point,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            })
        };

        let pipeline_integrate = pipeline("Integrate pipeline", "integrate");
        let pipeline_shift = pipeline("Shift velocities pipeline", "shift_velocities");

        let buffer_params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Params buffer"),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::UNIFORM,
            size: std::mem::size_of::<Params>() as u64,
            mapped_at_creation: false,
        });

        let buffer_mu = DynamicBuffer::new(
            device,
            &wgpu::BufferDescriptor {
                label: Some("Mu buffer"),
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::STORAGE,
                size: 0,
                mapped_at_creation: false,
            },
            std::mem::size_of::<f32>() as u64,
        );

        let bodies_buffer = |label| {
            DynamicBuffer::new(
                device,
                &wgpu::BufferDescriptor {
                    label: Some(label),
                    usage: wgpu::BufferUsages::COPY_DST
                        | wgpu::BufferUsages::COPY_SRC
                        | wgpu::BufferUsages::STORAGE,
                    size: 0,
                    mapped_at_creation: false,
                },
                std::mem::size_of::<GpuBody>() as u64,
            )
        };

        let buffer_bodies = [bodies_buffer("Bodies buffer A"), bodies_buffer("Bodies buffer B")];

        let buffer_status = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Status buffer"),
            usage: wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::STORAGE,
            size: STATUS_SIZE,
            mapped_at_creation: false,
        });

        Self {
            bind_group_layout,
            pipeline_integrate,
            pipeline_shift,
            buffer_params,
            buffer_mu,
            buffer_bodies,
            buffer_status,
            bind_groups: Vec::new(),
            current: 0,
            len: 0,
            workgroup_size,
        }
    }

    /// Uploads every body and parameter and resets the status to [`NO_DEGENERACY`].
    pub fn write(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        mu: &[f32],
        bodies: &[GpuBody],
        params: &Params,
    ) {
        debug_assert_eq!(mu.len(), bodies.len());

        self.len = bodies.len() as u64;
        self.current = 0;

        if self.len == 0 {
            self.bind_groups.clear();
            return;
        }

        let mut resized = self.buffer_mu.resize(device, self.len);
        for buffer in &mut self.buffer_bodies {
            resized |= buffer.resize(device, self.len);
        }

        if resized || self.bind_groups.is_empty() {
            self.bind_groups = (0..2).map(|current| self.bind_group(device, current)).collect();
        }

        queue.write_buffer(self.buffer_mu.buffer(), 0, bytemuck::cast_slice(mu));
        queue.write_buffer(self.buffer_bodies[0].buffer(), 0, bytemuck::cast_slice(bodies));
        queue.write_buffer(&self.buffer_status, 0, bytemuck::bytes_of(&NO_DEGENERACY));
        self.write_params(queue, params);
    }

    /// Uploads the kernel parameters.
    #[inline]
    pub fn write_params(&self, queue: &wgpu::Queue, params: &Params) {
        queue.write_buffer(&self.buffer_params, 0, bytemuck::bytes_of(params));
    }

    /// Submits `passes` successive dispatches of `kernel` without waiting for them.
    pub fn dispatch(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        kernel: Kernel,
        passes: u32,
    ) {
        if self.len == 0 || passes == 0 {
            return;
        }

        let pipeline = match kernel {
            Kernel::Integrate => &self.pipeline_integrate,
            Kernel::ShiftVelocities => &self.pipeline_shift,
        };
        let workgroups = (self.len as u32).div_ceil(self.workgroup_size);

        let encoder_descriptor = wgpu::CommandEncoderDescriptor { label: None };
        let mut encoder = device.create_command_encoder(&encoder_descriptor);

        encoder.push_debug_group(kernel.label());
        for _ in 0..passes {
            {
                let compute_pass_descriptor = wgpu::ComputePassDescriptor::default();
                let mut compute_pass = encoder.begin_compute_pass(&compute_pass_descriptor);
                compute_pass.set_pipeline(pipeline);
                compute_pass.set_bind_group(0, &self.bind_groups[self.current], &[]);
                compute_pass.dispatch_workgroups(workgroups, 1, 1);
            }
            self.current = 1 - self.current;
        }
        encoder.pop_debug_group();

        queue.submit([encoder.finish()]);
    }

    /// Returns the latest bodies and the status, waiting for all submitted work.
    ///
    /// The status is the lowest index of a body found coinciding with another one, or
    /// [`NO_DEGENERACY`].
    pub async fn read(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> Result<(Vec<GpuBody>, u32)> {
        if self.len == 0 {
            return Ok((Vec::new(), NO_DEGENERACY));
        }

        let buffer_bodies = &self.buffer_bodies[self.current];
        let size_bodies = buffer_bodies.size();

        let buffer_staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Staging buffer"),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            size: size_bodies + STATUS_SIZE,
            mapped_at_creation: false,
        });

        let encoder_descriptor = wgpu::CommandEncoderDescriptor { label: None };
        let mut encoder = device.create_command_encoder(&encoder_descriptor);
        encoder.copy_buffer_to_buffer(buffer_bodies.buffer(), 0, &buffer_staging, 0, size_bodies);
        encoder.copy_buffer_to_buffer(
            &self.buffer_status,
            0,
            &buffer_staging,
            size_bodies,
            STATUS_SIZE,
        );
        queue.submit([encoder.finish()]);

        let (sender, receiver) = flume::bounded(1);

        let buffer = buffer_staging.slice(..);
        buffer.map_async(wgpu::MapMode::Read, move |r| {
            // The receiver only goes away if reading was abandoned.
            let _ = sender.send(r);
        });

        device.poll(wgpu::Maintain::Wait);
        receiver
            .recv_async()
            .await
            .map_err(|e| Error::BackendUnavailable(format!("GPU readback abandoned: {e}")))?
            .map_err(|e| Error::BackendUnavailable(format!("could not read GPU buffer: {e}")))?;

        let view = buffer.get_mapped_range();
        let (bodies, status) = view.split_at(size_bodies as usize);
        let bodies: Vec<GpuBody> = bytemuck::cast_slice(bodies).to_vec();
        let status: u32 = bytemuck::pod_read_unaligned(status);

        drop(view);
        buffer_staging.unmap();

        Ok((bodies, status))
    }

    fn bind_group(&self, device: &wgpu::Device, current: usize) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.buffer_params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.buffer_mu.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.buffer_bodies[current].buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: self.buffer_bodies[1 - current].buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: self.buffer_status.as_entire_binding(),
                },
            ],
            label: None,
        })
    }
}
