use std::fmt;

use crate::error::{Error, Result};

/// Newtonian constant of gravitation in SI units.
pub const G: f32 = 6.6743e-11;

/// Largest workgroup size guaranteed by the downlevel limits `wgpu` devices are requested with.
pub const MAX_WORKGROUP_SIZE: u32 = 256;

/// Execution backend used to advance a simulation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Method {
    /// All-pairs accumulation on the CPU using 8-lane SIMD vectors.
    #[default]
    Cpu,
    /// All-pairs accumulation in a `wgpu` compute shader.
    Gpu,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "CPU"),
            Self::Gpu => write!(f, "GPU"),
        }
    }
}

/// Per-instance configuration of a [`Simulation`](crate::simulation::Simulation).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SimulationConfig {
    /// Gravitational constant used to derive `mu = G * mass`.
    pub gravitational_constant: f32,
    /// Duration of one integration sub-step.
    pub time_step: f32,
    /// Number of integration sub-steps performed by one call to `step`.
    pub sub_steps: u32,
    /// Backend the simulation starts on.
    pub method: Method,
    /// Number of invocations per workgroup of the GPU kernels.
    pub workgroup_size: u32,
}

impl Default for SimulationConfig {
    #[inline]
    fn default() -> Self {
        Self {
            gravitational_constant: G,
            time_step: 1.0,
            sub_steps: 1,
            method: Method::Cpu,
            workgroup_size: MAX_WORKGROUP_SIZE,
        }
    }
}

impl SimulationConfig {
    /// Returns the default configuration with the given time step.
    #[inline]
    pub fn new(time_step: f32) -> Self {
        Self::default().with_time_step(time_step)
    }

    /// Sets the gravitational constant.
    #[inline]
    pub fn with_gravitational_constant(mut self, gravitational_constant: f32) -> Self {
        self.gravitational_constant = gravitational_constant;
        self
    }

    /// Sets the time step.
    #[inline]
    pub fn with_time_step(mut self, time_step: f32) -> Self {
        self.time_step = time_step;
        self
    }

    /// Sets the number of sub-steps per call to `step`.
    #[inline]
    pub fn with_sub_steps(mut self, sub_steps: u32) -> Self {
        self.sub_steps = sub_steps;
        self
    }

    /// Sets the initial backend.
    #[inline]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Sets the GPU workgroup size.
    #[inline]
    pub fn with_workgroup_size(mut self, workgroup_size: u32) -> Self {
        self.workgroup_size = workgroup_size;
        self
    }

    /// Checks that every value is usable by the integrators.
    pub fn validate(&self) -> Result<()> {
        positive("gravitational constant", self.gravitational_constant)?;
        positive("time step", self.time_step)?;

        if self.sub_steps == 0 {
            return Err(Error::InvalidConfiguration(
                "sub-step count must be at least 1".into(),
            ));
        }

        if !(1..=MAX_WORKGROUP_SIZE).contains(&self.workgroup_size) {
            return Err(Error::InvalidConfiguration(format!(
                "workgroup size must be within 1..={MAX_WORKGROUP_SIZE}, got {}",
                self.workgroup_size
            )));
        }

        Ok(())
    }
}

/// Rejects NaN, infinities, zero and negative values.
pub(crate) fn positive(name: &str, value: f32) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidConfiguration(format!(
            "{name} must be positive and finite, got {value}"
        )))
    }
}
