use ultraviolet::Vec3;

use crate::{
    body::Bodies,
    config::{positive, Method, SimulationConfig},
    diagnostics,
    error::{Error, Result},
    integrator::{CpuIntegrator, Integrator},
};

#[cfg(feature = "gpu")]
use crate::integrator::GpuIntegrator;

/// Lazily created backends of a [`Simulation`].
#[derive(Default)]
struct Backends {
    cpu: CpuIntegrator,
    #[cfg(feature = "gpu")]
    gpu: Option<GpuIntegrator>,
}

impl Backends {
    #[cfg_attr(not(feature = "gpu"), allow(unused_variables))]
    fn get(&mut self, method: Method, config: &SimulationConfig) -> Result<&mut dyn Integrator> {
        match method {
            Method::Cpu => Ok(&mut self.cpu),
            #[cfg(feature = "gpu")]
            Method::Gpu => {
                let gpu = match self.gpu.take() {
                    Some(gpu) => gpu,
                    None => GpuIntegrator::new(config.workgroup_size)?,
                };
                Ok(self.gpu.insert(gpu))
            }
            #[cfg(not(feature = "gpu"))]
            Method::Gpu => Err(Error::BackendUnavailable(
                "gravitysim was built without the `gpu` feature".to_string(),
            )),
        }
    }
}

/// An N-body system advanced under mutual Newtonian gravity on the CPU or the GPU.
///
/// The [`Bodies`] store held by the simulation is the source of truth between operations. The
/// active backend keeps its own working copy, advanced by [`step`](Simulation::step) without
/// any transfer; every read of positions, velocities or energies first synchronizes the store
/// with it.
///
/// ```
/// # use gravitysim::prelude::*;
/// let config = SimulationConfig::new(1e-5).with_gravitational_constant(10.0);
/// let mut simulation = Simulation::with_config(
///     vec![20.0, 10.0],
///     [[0.0, 0.0, 0.0], [10.0, 10.0, 10.0]],
///     [[0.0, 0.0, 0.0], [3.0, 3.0, 3.0]],
///     config,
/// )?;
///
/// simulation.set_com_frame()?;
/// let energy = simulation.total_energy()?;
///
/// for _ in 0..10 {
///     simulation.step()?;
/// }
///
/// assert!((simulation.total_energy()? - energy).abs() < 1e-1);
/// # Ok::<(), gravitysim::Error>(())
/// ```
pub struct Simulation {
    bodies: Bodies,
    config: SimulationConfig,
    backends: Backends,
    // The active backend holds a state newer than `bodies`.
    stale: bool,
}

impl Simulation {
    /// Creates a new [`Simulation`] on the CPU with the default configuration and the given time
    /// step.
    ///
    /// Missing trailing velocities are zero. See [`Simulation::with_config`] for the failure
    /// cases.
    pub fn new<P, V>(
        masses: Vec<f32>,
        positions: impl IntoIterator<Item = P>,
        velocities: impl IntoIterator<Item = V>,
        time_step: f32,
    ) -> Result<Self>
    where
        P: Into<[f32; 3]>,
        V: Into<[f32; 3]>,
    {
        Self::with_config(masses, positions, velocities, SimulationConfig::new(time_step))
    }

    /// Creates a new [`Simulation`] with the given configuration.
    ///
    /// Fails with [`Error::InvalidConfiguration`] if `config` is not valid, if the numbers of
    /// masses and positions differ, if there are more velocities than masses or if a mass is not
    /// strictly positive.
    ///
    /// If `config` requests the GPU and it cannot be used, the simulation starts on the CPU.
    pub fn with_config<P, V>(
        masses: Vec<f32>,
        positions: impl IntoIterator<Item = P>,
        velocities: impl IntoIterator<Item = V>,
        config: SimulationConfig,
    ) -> Result<Self>
    where
        P: Into<[f32; 3]>,
        V: Into<[f32; 3]>,
    {
        config.validate()?;
        let bodies = Bodies::new(masses, positions, velocities, config.gravitational_constant)?;
        Self::from_bodies(bodies, config)
    }

    /// Creates a [`Simulation`] without any body.
    pub fn empty(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        Self::from_bodies(Bodies::default(), config)
    }

    fn from_bodies(bodies: Bodies, config: SimulationConfig) -> Result<Self> {
        let mut simulation = Self {
            bodies,
            config: config.with_method(Method::Cpu),
            backends: Backends::default(),
            stale: false,
        };

        simulation.reload()?;

        if config.method == Method::Gpu {
            if let Err(error) = simulation.switch_method(Method::Gpu) {
                log::warn!("falling back to the CPU: {error}");
            }
        }

        Ok(simulation)
    }

    /// Advances the simulation by one tick of the configured number of sub-steps.
    ///
    /// Fails with [`Error::NumericDegeneracy`] if two bodies coincide, reporting the lowest
    /// index involved. On the CPU the whole step is discarded, whichever sub-step failed. On the
    /// GPU the coincidence is only detected at the next synchronization, which reports it and
    /// discards every step taken since the previous one.
    pub fn step(&mut self) -> Result<()> {
        self.backends
            .get(self.config.method, &self.config)?
            .step()?;
        self.stale = true;

        log::trace!("stepped {} bodies on the {}", self.bodies.len(), self.config.method);

        Ok(())
    }

    /// Moves the simulation to the given backend.
    ///
    /// The state is flushed from the active backend and loaded into the new one, so that nothing
    /// is lost or duplicated. Switching to the active backend does nothing. On failure, for
    /// example with [`Error::BackendUnavailable`], the active backend is unchanged.
    pub fn switch_method(&mut self, method: Method) -> Result<()> {
        if method == self.config.method {
            return Ok(());
        }

        self.sync()?;

        let backend = self.backends.get(method, &self.config)?;
        backend.load(&self.bodies, &self.config)?;

        log::debug!(
            "switched from the {} to the {}",
            self.config.method,
            backend.method()
        );
        self.config.method = backend.method();

        Ok(())
    }

    /// Brings the canonical store up to date with the active backend, waiting for pending work.
    ///
    /// A coincidence found by the GPU is reported here as [`Error::NumericDegeneracy`]; the
    /// backend is then reset to the last synchronized state.
    pub fn sync(&mut self) -> Result<()> {
        if !self.stale {
            return Ok(());
        }

        let backend = self.backends.get(self.config.method, &self.config)?;
        match backend.store(&mut self.bodies) {
            Ok(()) => {}
            Err(error @ Error::NumericDegeneracy { .. }) => {
                log::warn!("discarding the {} state: {error}", self.config.method);
                backend.load(&self.bodies, &self.config)?;
                self.stale = false;
                return Err(error);
            }
            Err(error) => return Err(error),
        }

        self.stale = false;
        log::debug!(
            "synchronized {} bodies from the {}",
            self.bodies.len(),
            self.config.method
        );

        Ok(())
    }

    /// Subtracts the velocity of the center of mass from every body, zeroing the total momentum.
    ///
    /// Both the active backend and the canonical store are updated, so stepping continues from the
    /// new frame.
    pub fn set_com_frame(&mut self) -> Result<()> {
        self.sync()?;

        let velocity = diagnostics::com_velocity(&self.bodies);
        self.backends
            .get(self.config.method, &self.config)?
            .shift_velocities(velocity)?;

        for v in self.bodies.velocities_mut() {
            *v -= velocity;
        }

        log::debug!("moved to the center of mass frame, shifted by {velocity:?}");

        Ok(())
    }

    /// Changes the gravitational constant, recomputing every `mu`.
    pub fn set_gravitational_constant(&mut self, gravitational_constant: f32) -> Result<()> {
        positive("gravitational constant", gravitational_constant)?;
        self.sync()?;

        self.bodies.set_gravitational_constant(gravitational_constant)?;
        self.config.gravitational_constant = gravitational_constant;

        self.reload()
    }

    /// Changes the duration of one sub-step.
    pub fn set_time_step(&mut self, time_step: f32) -> Result<()> {
        positive("time step", time_step)?;
        self.sync()?;

        self.config.time_step = time_step;

        self.reload()
    }

    /// Masses of the bodies, in insertion order.
    #[inline]
    pub fn masses(&self) -> &[f32] {
        self.bodies.masses()
    }

    /// Positions of the bodies, in insertion order.
    pub fn positions(&mut self) -> Result<&[Vec3]> {
        self.sync()?;
        Ok(self.bodies.positions())
    }

    /// Velocities of the bodies, in insertion order.
    pub fn velocities(&mut self) -> Result<&[Vec3]> {
        self.sync()?;
        Ok(self.bodies.velocities())
    }

    /// The synchronized body store.
    pub fn bodies(&mut self) -> Result<&Bodies> {
        self.sync()?;
        Ok(&self.bodies)
    }

    /// Total kinetic energy of the system.
    pub fn kinetic_energy(&mut self) -> Result<f64> {
        self.sync()?;
        Ok(diagnostics::kinetic_energy(&self.bodies))
    }

    /// Total potential energy of the system.
    pub fn potential_energy(&mut self) -> Result<f64> {
        self.sync()?;
        Ok(diagnostics::potential_energy(&self.bodies))
    }

    /// Sum of the kinetic and potential energies.
    pub fn total_energy(&mut self) -> Result<f64> {
        self.sync()?;
        Ok(diagnostics::kinetic_energy(&self.bodies) + diagnostics::potential_energy(&self.bodies))
    }

    /// Total momentum `Σ m * v` of the system.
    pub fn momentum(&mut self) -> Result<Vec3> {
        self.sync()?;
        Ok(diagnostics::momentum(&self.bodies))
    }

    /// Number of bodies.
    #[inline]
    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    /// Returns true if there are no bodies.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    /// The active backend.
    #[inline]
    pub fn method(&self) -> Method {
        self.config.method
    }

    /// Duration of one sub-step.
    #[inline]
    pub fn time_step(&self) -> f32 {
        self.config.time_step
    }

    /// The gravitational constant.
    #[inline]
    pub fn gravitational_constant(&self) -> f32 {
        self.config.gravitational_constant
    }

    /// The current configuration, whose `method` is the active backend.
    #[inline]
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    // Pushes the canonical store and configuration into the active backend.
    fn reload(&mut self) -> Result<()> {
        self.backends
            .get(self.config.method, &self.config)?
            .load(&self.bodies, &self.config)?;
        self.stale = false;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrator::tests::{assert_close, random_bodies};

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn two_bodies(config: SimulationConfig) -> Simulation {
        Simulation::with_config(
            vec![20.0, 10.0],
            [[0.0, 0.0, 0.0], [10.0, 10.0, 10.0]],
            [[0.0, 0.0, 0.0], [3.0, 3.0, 3.0]],
            config,
        )
        .unwrap()
    }

    fn cloud(count: usize, seed: u64, config: SimulationConfig) -> Simulation {
        let bodies = random_bodies(count, seed);
        Simulation::with_config(
            bodies.masses().to_vec(),
            bodies.positions().iter().map(|&p| <[f32; 3]>::from(p)),
            bodies.velocities().iter().map(|&v| <[f32; 3]>::from(v)),
            config,
        )
        .unwrap()
    }

    #[test]
    fn two_body_energy_is_conserved() {
        init();
        let config = SimulationConfig::new(1e-5).with_gravitational_constant(10.0);
        let mut simulation = two_bodies(config);

        simulation.set_com_frame().unwrap();
        let energy = simulation.total_energy().unwrap();

        for _ in 0..10 {
            simulation.step().unwrap();
        }

        let error = (simulation.total_energy().unwrap() - energy).abs();
        assert!(error < 1e-1, "energy drifted by {error}");
    }

    #[test]
    fn circular_orbit_energy_is_conserved() {
        init();
        let main_mu: f32 = 1e6;
        let radius: f32 = 100.0;
        let speed = (main_mu / radius).sqrt();

        let config = SimulationConfig::new(1.0 / 60.0).with_gravitational_constant(1.0);
        let mut simulation = Simulation::with_config(
            vec![main_mu, 1.0],
            [[0.0, 0.0, 0.0], [radius, 0.0, 0.0]],
            [[0.0, 0.0, 0.0], [0.0, speed, 0.0]],
            config,
        )
        .unwrap();

        simulation.set_com_frame().unwrap();
        let energy = simulation.total_energy().unwrap();

        for _ in 0..2_000 {
            simulation.step().unwrap();
        }

        let error = ((simulation.total_energy().unwrap() - energy) / energy).abs();
        assert!(error < 1e-2, "relative energy drift {error}");
    }

    #[test]
    fn com_frame_zeroes_momentum() {
        init();
        let mut simulation = Simulation::new(
            vec![2e6, 1e6, 4e5],
            [[0.0, 0.0, 0.0], [10.0, 10.0, 10.0], [0.0, 100.0, -12.0]],
            [[0.0, 0.0, 0.0], [3.0, 3.0, 3.0], [-4.0, -6.0, 9.0]],
            0.01,
        )
        .unwrap();

        simulation.set_com_frame().unwrap();
        let momentum = simulation.momentum().unwrap();
        assert!(momentum.abs().component_max() < 10.0, "{momentum:?}");

        let config = SimulationConfig::new(1e-5).with_gravitational_constant(10.0);
        let mut simulation = two_bodies(config);
        simulation.set_com_frame().unwrap();
        let momentum = simulation.momentum().unwrap();
        assert!(momentum.abs().component_max() < 1e-1, "{momentum:?}");
    }

    #[test]
    fn com_frame_carries_into_steps() {
        init();
        let config = SimulationConfig::new(1e-2).with_gravitational_constant(1.0);
        let mut simulation = cloud(13, 5, config);

        simulation.set_com_frame().unwrap();
        for _ in 0..10 {
            simulation.step().unwrap();
        }

        let momentum = simulation.momentum().unwrap();
        assert!(momentum.abs().component_max() < 1e-1, "{momentum:?}");
    }

    #[test]
    fn switch_to_active_method_is_noop() {
        init();
        let config = SimulationConfig::new(1e-2).with_gravitational_constant(1.0);
        let mut simulation = cloud(9, 1, config);
        simulation.step().unwrap();

        let before = simulation.bodies().unwrap().clone();
        simulation.switch_method(Method::Cpu).unwrap();
        assert_eq!(simulation.method(), Method::Cpu);
        assert_eq!(simulation.bodies().unwrap(), &before);
    }

    #[test]
    fn sub_steps_match_repeated_steps() {
        init();
        let config = SimulationConfig::new(1e-2).with_gravitational_constant(1.0);
        let mut single = cloud(17, 2, config);
        let mut batched = cloud(17, 2, config.with_sub_steps(3));

        for _ in 0..3 {
            single.step().unwrap();
        }
        batched.step().unwrap();

        assert_eq!(single.bodies().unwrap(), batched.bodies().unwrap());
    }

    #[test]
    fn coincident_bodies_leave_state_untouched() {
        init();
        let mut simulation = Simulation::with_config(
            vec![1.0, 1.0, 1.0],
            [[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [1.0, 2.0, 3.0]],
            [[1.0, 0.0, 0.0]],
            SimulationConfig::new(0.1).with_gravitational_constant(1.0),
        )
        .unwrap();

        let before = simulation.bodies().unwrap().clone();
        assert_eq!(simulation.step(), Err(Error::NumericDegeneracy { body: 0 }));
        assert_eq!(simulation.bodies().unwrap(), &before);
    }

    #[test]
    fn failed_step_is_discarded_whole() {
        init();
        let config = SimulationConfig::new(1.0)
            .with_gravitational_constant(1e-30)
            .with_sub_steps(2);
        let mut simulation = Simulation::with_config(
            vec![1.0, 1.0],
            [[-1.0, 0.0, 0.0], [1.0, 0.0, 0.0]],
            [[1.0, 0.0, 0.0], [-1.0, 0.0, 0.0]],
            config,
        )
        .unwrap();

        assert_eq!(simulation.step(), Err(Error::NumericDegeneracy { body: 0 }));
        assert_eq!(
            simulation.positions().unwrap(),
            &[Vec3::new(-1.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0)]
        );
        assert_eq!(
            simulation.velocities().unwrap(),
            &[Vec3::new(1.0, 0.0, 0.0), Vec3::new(-1.0, 0.0, 0.0)]
        );
    }

    #[test]
    fn reconfiguration() {
        init();
        let config = SimulationConfig::new(1e-2).with_gravitational_constant(1.0);
        let mut reconfigured = cloud(10, 4, config);
        let mut expected = cloud(
            10,
            4,
            config.with_gravitational_constant(2.0).with_time_step(0.5),
        );

        assert!(matches!(
            reconfigured.set_time_step(0.0),
            Err(Error::InvalidConfiguration(_))
        ));
        assert!(matches!(
            reconfigured.set_gravitational_constant(-1.0),
            Err(Error::InvalidConfiguration(_))
        ));

        reconfigured.set_gravitational_constant(2.0).unwrap();
        reconfigured.set_time_step(0.5).unwrap();
        assert_eq!(reconfigured.gravitational_constant(), 2.0);
        assert_eq!(reconfigured.time_step(), 0.5);

        reconfigured.step().unwrap();
        expected.step().unwrap();
        assert_eq!(reconfigured.bodies().unwrap(), expected.bodies().unwrap());
    }

    #[test]
    fn empty() {
        init();
        let mut simulation = Simulation::empty(SimulationConfig::default()).unwrap();

        assert!(simulation.is_empty());
        simulation.step().unwrap();
        simulation.set_com_frame().unwrap();
        assert_eq!(simulation.total_energy().unwrap(), 0.0);
        assert!(simulation.positions().unwrap().is_empty());
    }

    #[test]
    fn invalid_construction() {
        let result = Simulation::new(vec![1.0, 2.0], [[0.0; 3]], Vec::<[f32; 3]>::new(), 1.0);
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));

        let result = Simulation::new(vec![1.0], [[0.0; 3]], Vec::<[f32; 3]>::new(), 0.0);
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));

        let result = Simulation::new(vec![0.0], [[0.0; 3]], Vec::<[f32; 3]>::new(), 1.0);
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));

        let result = Simulation::empty(SimulationConfig::default().with_sub_steps(0));
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
    }

    #[cfg(not(feature = "gpu"))]
    #[test]
    fn gpu_is_unavailable() {
        init();
        let mut simulation = two_bodies(SimulationConfig::new(1e-5));
        let before = simulation.bodies().unwrap().clone();

        assert!(matches!(
            simulation.switch_method(Method::Gpu),
            Err(Error::BackendUnavailable(_))
        ));
        assert_eq!(simulation.method(), Method::Cpu);
        assert_eq!(simulation.bodies().unwrap(), &before);

        let simulation = two_bodies(SimulationConfig::new(1e-5).with_method(Method::Gpu));
        assert_eq!(simulation.method(), Method::Cpu);
    }

    #[cfg(feature = "gpu")]
    mod gpu {
        use super::*;

        // Moves `simulation` to the GPU, or returns false if there is none.
        fn to_gpu(simulation: &mut Simulation) -> bool {
            match simulation.switch_method(Method::Gpu) {
                Ok(()) => true,
                Err(Error::BackendUnavailable(reason)) => {
                    eprintln!("skipping GPU test: {reason}");
                    assert_eq!(simulation.method(), Method::Cpu);
                    false
                }
                Err(error) => panic!("{error}"),
            }
        }

        #[test]
        fn round_trip_is_exact() {
            init();
            let config = SimulationConfig::new(1e-2).with_gravitational_constant(1.0);
            let mut simulation = cloud(21, 3, config);
            simulation.step().unwrap();
            let before = simulation.bodies().unwrap().clone();

            if !to_gpu(&mut simulation) {
                return;
            }
            assert_eq!(simulation.method(), Method::Gpu);
            simulation.switch_method(Method::Cpu).unwrap();

            assert_eq!(simulation.bodies().unwrap(), &before);
        }

        #[test]
        fn backends_agree() {
            init();
            let config = SimulationConfig::new(1e-2).with_gravitational_constant(1.0);
            let mut cpu = cloud(50, 8, config);
            let mut gpu = cloud(50, 8, config);

            if !to_gpu(&mut gpu) {
                return;
            }

            cpu.set_com_frame().unwrap();
            gpu.set_com_frame().unwrap();
            for _ in 0..10 {
                cpu.step().unwrap();
                gpu.step().unwrap();
            }

            assert_close(gpu.positions().unwrap(), cpu.positions().unwrap(), 1e-3);
            assert_close(gpu.velocities().unwrap(), cpu.velocities().unwrap(), 1e-3);

            let (ke_cpu, ke_gpu) = (cpu.kinetic_energy().unwrap(), gpu.kinetic_energy().unwrap());
            let (pe_cpu, pe_gpu) = (
                cpu.potential_energy().unwrap(),
                gpu.potential_energy().unwrap(),
            );
            assert!(((ke_gpu - ke_cpu) / ke_cpu).abs() < 1e-3);
            assert!(((pe_gpu - pe_cpu) / pe_cpu).abs() < 1e-3);
        }

        #[test]
        fn switching_mid_run_continues_seamlessly() {
            init();
            let config = SimulationConfig::new(1e-2).with_gravitational_constant(1.0);
            let mut cpu = cloud(30, 6, config);
            let mut mixed = cloud(30, 6, config);

            for _ in 0..5 {
                cpu.step().unwrap();
                mixed.step().unwrap();
            }
            if !to_gpu(&mut mixed) {
                return;
            }
            for _ in 0..5 {
                cpu.step().unwrap();
                mixed.step().unwrap();
            }
            mixed.switch_method(Method::Cpu).unwrap();

            assert_close(mixed.positions().unwrap(), cpu.positions().unwrap(), 1e-3);
        }

        #[test]
        fn late_degeneracy_matches_the_cpu() {
            init();
            let config = SimulationConfig::new(1.0)
                .with_gravitational_constant(1e-30)
                .with_sub_steps(2);
            let positions = [[-1.0, 0.0, 0.0], [1.0, 0.0, 0.0]];
            let velocities = [[1.0, 0.0, 0.0], [-1.0, 0.0, 0.0]];
            let mut simulation =
                Simulation::with_config(vec![1.0, 1.0], positions, velocities, config).unwrap();
            let before = simulation.bodies().unwrap().clone();

            if !to_gpu(&mut simulation) {
                return;
            }

            simulation.step().unwrap();
            assert_eq!(simulation.sync(), Err(Error::NumericDegeneracy { body: 0 }));
            assert_eq!(simulation.bodies().unwrap(), &before);
        }

        #[test]
        fn coincident_bodies_are_reported_on_sync() {
            init();
            let mut simulation = Simulation::with_config(
                vec![1.0, 1.0, 1.0],
                [[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [1.0, 2.0, 3.0]],
                Vec::<[f32; 3]>::new(),
                SimulationConfig::new(0.1).with_gravitational_constant(1.0),
            )
            .unwrap();
            let before = simulation.bodies().unwrap().clone();

            if !to_gpu(&mut simulation) {
                return;
            }

            simulation.step().unwrap();
            assert_eq!(simulation.sync(), Err(Error::NumericDegeneracy { body: 0 }));
            assert_eq!(simulation.bodies().unwrap(), &before);
        }
    }
}
