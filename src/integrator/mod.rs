use ultraviolet::Vec3;

use crate::{
    body::Bodies,
    config::{Method, SimulationConfig},
    error::Result,
};

/// Integrator running on the CPU with SIMD lanes.
pub mod cpu;

/// Integrator running in a `wgpu` compute shader.
#[cfg(feature = "gpu")]
pub mod gpu;

pub use cpu::CpuIntegrator;
#[cfg(feature = "gpu")]
pub use gpu::GpuIntegrator;

/// Contract shared by the execution backends of a [`Simulation`](crate::simulation::Simulation).
///
/// A backend owns a working copy of the kinematic state. It is filled from the canonical store by
/// [`load`](Integrator::load), advanced in place by [`step`](Integrator::step) and only written
/// back by [`store`](Integrator::store).
///
/// Every implementation computes, for each body `i` and in ascending order of `j != i`,
/// `acc += (p[j] - p[i]) * mu[j] / (r2 * sqrt(r2))`, then updates the velocity before the
/// position.
pub trait Integrator {
    /// The backend this integrator implements.
    fn method(&self) -> Method;

    /// Replaces the working state with the canonical state, including `mu`, the time step and the
    /// sub-step count of `config`.
    fn load(&mut self, bodies: &Bodies, config: &SimulationConfig) -> Result<()>;

    /// Advances the working state by the configured number of sub-steps.
    fn step(&mut self) -> Result<()>;

    /// Writes the working positions and velocities into `bodies`, waiting for any pending work.
    fn store(&mut self, bodies: &mut Bodies) -> Result<()>;

    /// Subtracts `velocity` from every working velocity.
    fn shift_velocities(&mut self, velocity: Vec3) -> Result<()>;
}
