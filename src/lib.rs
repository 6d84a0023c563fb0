//! # Gravitysim
//!
//! Gravitysim is a crate advancing N-body systems under mutual Newtonian gravity, on the CPU or on
//! the GPU, with both backends producing the same results.
//!
//! ## Goals
//!
//! The main goal of this crate is to provide a small simulation core that a renderer or a UI can
//! drive: it owns the bodies, steps them, and exposes read-only positions and energies.
//!
//! Both backends compute the acceleration of each body by summing, in index order, the
//! contribution of every other body, then integrate it with semi-implicit Euler: velocities are
//! updated before positions, which bounds the long term energy drift.
//!
//! The CPU backend packs 8 bodies per SIMD vector thanks to
//! [ultraviolet](https://github.com/fu5ha/ultraviolet) and, with the "parallel" feature,
//! distributes them over threads with [rayon](https://github.com/rayon-rs/rayon).
//!
//! The GPU backend runs in a compute shader thanks to [wgpu](https://github.com/gfx-rs/wgpu).
//! Enable the "gpu" feature to use it.
//!
//! # Using Gravitysim
//!
//! ## Setting up the simulation
//!
//! Create a [`Simulation`](simulation::Simulation) from the masses, positions and velocities of
//! the bodies. Any vector type convertible into `[f32; 3]` can be used, and missing velocities
//! are zero.
//!
//! ```
//! # use gravitysim::prelude::*;
//! # use glam::Vec3;
//! #
//! let config = SimulationConfig::new(1.0 / 60.0).with_gravitational_constant(1.0);
//! let mut simulation = Simulation::with_config(
//!     vec![1e5, 1.0],
//!     [Vec3::ZERO, Vec3::new(100.0, 0.0, 0.0)],
//!     [Vec3::ZERO, Vec3::new(0.0, 10.0, 0.0)],
//!     config,
//! )?;
//!
//! simulation.set_com_frame()?;
//! # Ok::<(), gravitysim::Error>(())
//! ```
//!
//! ## Stepping and reading the state
//!
//! [`step`](simulation::Simulation::step) keeps the state on the active backend. Reading
//! positions or energies synchronizes it back first.
//!
//! ```
//! # use gravitysim::prelude::*;
//! # let mut simulation = Simulation::new(
//! #     vec![1e5, 1.0],
//! #     [[0.0, 0.0, 0.0], [100.0, 0.0, 0.0]],
//! #     Vec::<[f32; 3]>::new(),
//! #     1.0 / 60.0,
//! # )?;
//! for _ in 0..60 {
//!     simulation.step()?;
//! }
//!
//! let energy = simulation.kinetic_energy()? + simulation.potential_energy()?;
//! assert!(energy < 0.0);
//!
//! for position in simulation.positions()? {
//!     assert!(position.mag() < 1e3);
//! }
//! # Ok::<(), gravitysim::Error>(())
//! ```
//!
//! ## Switching backends
//!
//! [`switch_method`](simulation::Simulation::switch_method) moves the state between the CPU and
//! the GPU. It fails with [`Error::BackendUnavailable`] and leaves the simulation on its current
//! backend if the GPU cannot be used.
//!
//! ```
//! # use gravitysim::prelude::*;
//! # let mut simulation = Simulation::empty(SimulationConfig::default())?;
//! if simulation.switch_method(Method::Gpu).is_err() {
//!     assert_eq!(simulation.method(), Method::Cpu);
//! }
//! # Ok::<(), gravitysim::Error>(())
//! ```

#![warn(missing_docs)]

/// Configuration of a simulation and choice of backend.
pub mod config;

/// Scalar reductions: energies, momentum and center of mass velocity.
pub mod diagnostics;

/// Error type of the crate.
pub mod error;

/// Canonical per-body state.
pub mod body;

/// Backends advancing the bodies.
pub mod integrator;

/// Lane-packed state of the CPU backend.
pub mod working_set;

/// The simulation and its backend switching.
pub mod simulation;

pub use error::{Error, Result};
pub use ultraviolet::Vec3;

/// Everything needed to use the crate.
pub mod prelude {
    pub use crate::body::Bodies;
    pub use crate::config::{Method, SimulationConfig};
    pub use crate::error::{Error, Result};
    pub use crate::integrator::Integrator;
    pub use crate::simulation::Simulation;
    pub use ultraviolet::Vec3;
}
