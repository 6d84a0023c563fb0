use ultraviolet::Vec3;

use crate::{
    body::Bodies,
    config::{Method, SimulationConfig},
    error::{Error, Result},
    integrator::Integrator,
};

mod resources;

pub use resources::{GpuBody, Kernel, Params, WgpuResources, NO_DEGENERACY};

/// All-pairs semi-implicit Euler integrator running in a [wgpu](https://github.com/gfx-rs/wgpu)
/// compute shader.
///
/// Bodies stay resident on the GPU between steps: [`step`](Integrator::step) only submits work
/// and never waits for it. The state is read back, and a coincident pair reported, on
/// [`store`](Integrator::store).
pub struct GpuIntegrator {
    device: wgpu::Device,
    queue: wgpu::Queue,
    resources: WgpuResources,
    params: Params,
    sub_steps: u32,
}

impl GpuIntegrator {
    /// Creates a new [`GpuIntegrator`] on the default high performance adapter.
    ///
    /// Fails with [`Error::BackendUnavailable`] if no adapter or device can be obtained.
    pub fn new(workgroup_size: u32) -> Result<Self> {
        let (device, queue) = pollster::block_on(setup_wgpu())?;
        Self::with_device(device, queue, workgroup_size)
    }

    /// Creates a new [`GpuIntegrator`] using the given [`wgpu::Device`] and [`wgpu::Queue`].
    pub fn with_device(
        device: wgpu::Device,
        queue: wgpu::Queue,
        workgroup_size: u32,
    ) -> Result<Self> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let resources = WgpuResources::new(&device, workgroup_size);
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(Error::BackendUnavailable(format!(
                "could not create compute pipelines: {error}"
            )));
        }

        Ok(Self {
            device,
            queue,
            resources,
            params: Params::default(),
            sub_steps: 0,
        })
    }

    fn max_bodies(&self) -> u64 {
        let max_size = self.device.limits().max_storage_buffer_binding_size as u64;
        max_size / std::mem::size_of::<GpuBody>() as u64
    }
}

impl Integrator for GpuIntegrator {
    #[inline]
    fn method(&self) -> Method {
        Method::Gpu
    }

    fn load(&mut self, bodies: &Bodies, config: &SimulationConfig) -> Result<()> {
        let len = bodies.len() as u64;
        if len > self.max_bodies() {
            return Err(Error::BackendUnavailable(format!(
                "{len} bodies exceed the storage limit of the device ({})",
                self.max_bodies()
            )));
        }

        let gpu_bodies: Vec<GpuBody> = bodies
            .positions()
            .iter()
            .zip(bodies.velocities())
            .map(|(p, v)| GpuBody {
                position: [p.x, p.y, p.z, 0.0],
                velocity: [v.x, v.y, v.z, 0.0],
            })
            .collect();

        self.params = Params {
            shift: [0.0; 4],
            time_step: config.time_step,
            count: len as u32,
            _padding: [0; 2],
        };
        self.sub_steps = config.sub_steps;

        self.resources
            .write(&self.device, &self.queue, bodies.mu(), &gpu_bodies, &self.params);

        log::debug!("uploaded {len} bodies to the GPU");

        Ok(())
    }

    #[inline]
    fn step(&mut self) -> Result<()> {
        self.resources
            .dispatch(&self.device, &self.queue, Kernel::Integrate, self.sub_steps);
        Ok(())
    }

    fn store(&mut self, bodies: &mut Bodies) -> Result<()> {
        let (gpu_bodies, status) =
            pollster::block_on(self.resources.read(&self.device, &self.queue))?;

        if status != NO_DEGENERACY {
            return Err(Error::NumericDegeneracy {
                body: status as usize,
            });
        }

        debug_assert_eq!(gpu_bodies.len(), bodies.len());

        let (positions, velocities) = bodies.kinematics_mut();
        for ((position, velocity), body) in positions.iter_mut().zip(velocities).zip(gpu_bodies) {
            let [px, py, pz, _] = body.position;
            let [vx, vy, vz, _] = body.velocity;
            *position = Vec3::new(px, py, pz);
            *velocity = Vec3::new(vx, vy, vz);
        }

        log::trace!("read {} bodies back from the GPU", bodies.len());

        Ok(())
    }

    fn shift_velocities(&mut self, velocity: Vec3) -> Result<()> {
        self.params.shift = [velocity.x, velocity.y, velocity.z, 0.0];
        self.resources.write_params(&self.queue, &self.params);
        self.resources
            .dispatch(&self.device, &self.queue, Kernel::ShiftVelocities, 1);
        Ok(())
    }
}

/// Requests a device and its queue from the default high performance adapter.
pub async fn setup_wgpu() -> Result<(wgpu::Device, wgpu::Queue)> {
    let instance = wgpu::Instance::default();

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            ..Default::default()
        })
        .await
        .ok_or_else(|| Error::BackendUnavailable("no compatible GPU adapter".to_string()))?;

    log::info!("using GPU adapter {}", adapter.get_info().name);

    adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: None,
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
            },
            None,
        )
        .await
        .map_err(|e| Error::BackendUnavailable(format!("could not request GPU device: {e}")))
}
