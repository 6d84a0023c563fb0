use ultraviolet::Vec3;

use crate::{
    config::positive,
    error::{Error, Result},
};

/// Canonical per-body state of a simulation.
///
/// Bodies are stored as parallel arrays in insertion order, which is also their index for the
/// lifetime of the store. `mu = G * mass` is derived once and cached for the pairwise loops.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bodies {
    masses: Vec<f32>,
    mu: Vec<f32>,
    positions: Vec<Vec3>,
    velocities: Vec<Vec3>,
}

impl Bodies {
    /// Creates a new store from masses, positions and velocities.
    ///
    /// Missing trailing velocities are filled with zeros. Fails with
    /// [`Error::InvalidConfiguration`] if there are more velocities than bodies, if the number of
    /// positions differs from the number of masses, or if a mass or `G` is not strictly positive.
    pub fn new<P, V>(
        masses: Vec<f32>,
        positions: impl IntoIterator<Item = P>,
        velocities: impl IntoIterator<Item = V>,
        gravitational_constant: f32,
    ) -> Result<Self>
    where
        P: Into<[f32; 3]>,
        V: Into<[f32; 3]>,
    {
        positive("gravitational constant", gravitational_constant)?;

        let positions: Vec<Vec3> = positions.into_iter().map(into_vec3).collect();
        let mut velocities: Vec<Vec3> = velocities.into_iter().map(into_vec3).collect();

        if positions.len() != masses.len() {
            return Err(Error::InvalidConfiguration(format!(
                "{} masses but {} positions",
                masses.len(),
                positions.len()
            )));
        }

        if velocities.len() > masses.len() {
            return Err(Error::InvalidConfiguration(format!(
                "{} masses but {} velocities",
                masses.len(),
                velocities.len()
            )));
        }

        if let Some((index, mass)) = masses
            .iter()
            .enumerate()
            .find(|(_, &mass)| !(mass.is_finite() && mass > 0.0))
        {
            return Err(Error::InvalidConfiguration(format!(
                "mass of body {index} must be positive and finite, got {mass}"
            )));
        }

        velocities.resize(masses.len(), Vec3::zero());

        let mu = masses.iter().map(|m| gravitational_constant * m).collect();

        Ok(Self {
            masses,
            mu,
            positions,
            velocities,
        })
    }

    /// Returns the number of bodies.
    #[inline]
    pub fn len(&self) -> usize {
        self.masses.len()
    }

    /// Returns true if there are no bodies.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.masses.is_empty()
    }

    /// Masses of the bodies.
    #[inline]
    pub fn masses(&self) -> &[f32] {
        &self.masses
    }

    /// Gravitational parameters `G * mass` of the bodies.
    #[inline]
    pub fn mu(&self) -> &[f32] {
        &self.mu
    }

    /// Positions of the bodies.
    #[inline]
    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    /// Velocities of the bodies.
    #[inline]
    pub fn velocities(&self) -> &[Vec3] {
        &self.velocities
    }

    /// Mutable positions and velocities, for backends writing their working state back.
    #[inline]
    pub(crate) fn kinematics_mut(&mut self) -> (&mut [Vec3], &mut [Vec3]) {
        (&mut self.positions, &mut self.velocities)
    }

    /// Mutable velocities, for frame changes.
    #[inline]
    pub(crate) fn velocities_mut(&mut self) -> &mut [Vec3] {
        &mut self.velocities
    }

    /// Recomputes every `mu` from a new gravitational constant.
    pub(crate) fn set_gravitational_constant(&mut self, gravitational_constant: f32) -> Result<()> {
        positive("gravitational constant", gravitational_constant)?;

        for (mu, mass) in self.mu.iter_mut().zip(&self.masses) {
            *mu = gravitational_constant * mass;
        }

        Ok(())
    }
}

#[inline]
fn into_vec3(vector: impl Into<[f32; 3]>) -> Vec3 {
    Vec3::from(vector.into())
}
