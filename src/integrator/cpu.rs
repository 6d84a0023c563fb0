use ultraviolet::Vec3;

use crate::{
    body::Bodies,
    config::{Method, SimulationConfig},
    error::Result,
    integrator::Integrator,
    working_set::{Checkpoint, WorkingSet},
};

/// All-pairs semi-implicit Euler integrator on the CPU.
///
/// Accelerations are accumulated for 8 bodies at a time in a [`WorkingSet`]. With the `parallel`
/// feature, lane groups are distributed over [rayon](https://github.com/rayon-rs/rayon) threads;
/// each group only writes its own accumulator.
///
/// A step failing in any of its sub-steps leaves the working set as it was before the step.
#[derive(Clone, Default)]
pub struct CpuIntegrator {
    working_set: WorkingSet,
    checkpoint: Checkpoint,
    time_step: f32,
    sub_steps: u32,
}

impl CpuIntegrator {
    /// Creates a new empty [`CpuIntegrator`].
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Integrator for CpuIntegrator {
    #[inline]
    fn method(&self) -> Method {
        Method::Cpu
    }

    fn load(&mut self, bodies: &Bodies, config: &SimulationConfig) -> Result<()> {
        self.working_set.load(bodies);
        self.time_step = config.time_step;
        self.sub_steps = config.sub_steps;

        log::debug!("loaded {} bodies into the CPU working set", bodies.len());

        Ok(())
    }

    fn step(&mut self) -> Result<()> {
        // A failing first sub-step leaves nothing to undo.
        let rollback = self.sub_steps > 1;
        if rollback {
            self.working_set.save(&mut self.checkpoint);
        }

        for _ in 0..self.sub_steps {
            if let Err(error) = self.working_set.compute_accelerations() {
                if rollback {
                    self.working_set.restore(&self.checkpoint);
                }
                return Err(error);
            }
            self.working_set.integrate(self.time_step);
        }

        Ok(())
    }

    #[inline]
    fn store(&mut self, bodies: &mut Bodies) -> Result<()> {
        self.working_set.store(bodies);
        Ok(())
    }

    #[inline]
    fn shift_velocities(&mut self, velocity: Vec3) -> Result<()> {
        self.working_set.shift_velocities(velocity);
        Ok(())
    }
}
