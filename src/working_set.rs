use ultraviolet::{f32x8, Vec3, Vec3x8};
use wide::{CmpEq, CmpGt, CmpNe};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::{
    body::Bodies,
    error::{Error, Result},
};

/// Number of bodies packed in one SIMD value.
pub const LANES: usize = 8;

/// Lane-packed copy of the kinematic state used by the CPU integrator.
///
/// Bodies `8k..8k + 8` share the `k`-th [`Vec3x8`] of each array. The last group is padded with
/// zero-mass lanes at the origin; padded lanes are never used as a source of gravity and are
/// never written back.
///
/// This is a cache of a [`Bodies`] store: it is only equal to it right after [`WorkingSet::load`]
/// or [`WorkingSet::store`].
#[derive(Clone, Default)]
pub struct WorkingSet {
    len: usize,
    positions: Vec<Vec3x8>,
    velocities: Vec<Vec3x8>,
    accelerations: Vec<Vec3x8>,
    // Lanes of each group with a degenerate pair, as a bit mask.
    degenerate: Vec<i32>,
    // Index of the body in each lane, `-1` for padding. Exact for fewer than 2^24 bodies.
    indices: Vec<f32x8>,
    // Unpacked positions of the current sub-step, read by every lane group.
    sources: Vec<Vec3>,
    mu: Vec<f32>,
}

/// Positions and velocities saved from a [`WorkingSet`].
#[derive(Clone, Default)]
pub struct Checkpoint {
    positions: Vec<Vec3x8>,
    velocities: Vec<Vec3x8>,
}

impl WorkingSet {
    /// Number of bodies held.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no body is held.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Replaces the content of the working set with the state of `bodies`.
    pub fn load(&mut self, bodies: &Bodies) {
        self.len = bodies.len();
        self.mu = bodies.mu().to_vec();

        #[cfg(feature = "parallel")]
        let (positions, velocities) = (
            bodies.positions().par_chunks(LANES),
            bodies.velocities().par_chunks(LANES),
        );
        #[cfg(not(feature = "parallel"))]
        let (positions, velocities) = (
            bodies.positions().chunks(LANES),
            bodies.velocities().chunks(LANES),
        );

        self.positions = positions.map(to_lanes).collect();
        self.velocities = velocities.map(to_lanes).collect();
        self.accelerations = vec![Vec3x8::zero(); self.positions.len()];
        self.degenerate = vec![0; self.positions.len()];
        self.indices = (0..self.positions.len())
            .map(|chunk| {
                f32x8::from(std::array::from_fn::<f32, LANES, _>(|lane| {
                    let index = chunk * LANES + lane;
                    if index < self.len {
                        index as f32
                    } else {
                        -1.0
                    }
                }))
            })
            .collect();
    }

    /// Writes the positions and velocities held back into `bodies`.
    pub fn store(&self, bodies: &mut Bodies) {
        debug_assert_eq!(bodies.len(), self.len);

        let (positions, velocities) = bodies.kinematics_mut();

        #[cfg(feature = "parallel")]
        let chunks = positions
            .par_chunks_mut(LANES)
            .zip(velocities.par_chunks_mut(LANES))
            .zip(self.positions.par_iter().zip(self.velocities.par_iter()));
        #[cfg(not(feature = "parallel"))]
        let chunks = positions
            .chunks_mut(LANES)
            .zip(velocities.chunks_mut(LANES))
            .zip(self.positions.iter().zip(self.velocities.iter()));

        chunks.for_each(|((positions, velocities), (&p, &v))| {
            let count = positions.len();
            positions.copy_from_slice(&<[Vec3; LANES]>::from(p)[..count]);
            velocities.copy_from_slice(&<[Vec3; LANES]>::from(v)[..count]);
        });
    }

    /// Computes the gravitational acceleration of every body from the current positions.
    ///
    /// Fails with [`Error::NumericDegeneracy`] if a body coincides with another one, in which case
    /// positions and velocities are left untouched. A pair is degenerate when
    /// `r2 * sqrt(r2)` is zero or `mu / (r2 * sqrt(r2))` is not finite; the lowest such body is
    /// reported.
    pub fn compute_accelerations(&mut self) -> Result<()> {
        self.sources.clear();
        self.sources
            .extend(self.positions.iter().flat_map(|&p| <[Vec3; LANES]>::from(p)));
        self.sources.truncate(self.len);

        let (sources, mu) = (&self.sources[..], &self.mu[..]);

        #[cfg(feature = "parallel")]
        let groups = self
            .accelerations
            .par_iter_mut()
            .zip(self.degenerate.par_iter_mut())
            .zip(self.positions.par_iter().zip(self.indices.par_iter()));
        #[cfg(not(feature = "parallel"))]
        let groups = self
            .accelerations
            .iter_mut()
            .zip(self.degenerate.iter_mut())
            .zip(self.positions.iter().zip(self.indices.iter()));

        groups.for_each(|((acceleration, degenerate), (&position, &index))| {
            (*acceleration, *degenerate) = lanes_acceleration(position, index, sources, mu);
        });

        match self.first_degenerate() {
            Some(body) => Err(Error::NumericDegeneracy { body }),
            None => Ok(()),
        }
    }

    /// Semi-implicit Euler update from the last computed accelerations: velocities first, then
    /// positions with the new velocities.
    pub fn integrate(&mut self, time_step: f32) {
        let dt = f32x8::splat(time_step);

        for ((position, velocity), &acceleration) in self
            .positions
            .iter_mut()
            .zip(self.velocities.iter_mut())
            .zip(&self.accelerations)
        {
            *velocity += acceleration * dt;
            *position += *velocity * dt;
        }
    }

    /// Subtracts `velocity` from the velocity of every body.
    pub fn shift_velocities(&mut self, velocity: Vec3) {
        let velocity = Vec3x8::splat(velocity);
        for v in &mut self.velocities {
            *v -= velocity;
        }
    }

    /// Saves the positions and velocities held into `checkpoint`, reusing its allocations.
    pub fn save(&self, checkpoint: &mut Checkpoint) {
        checkpoint.positions.clone_from(&self.positions);
        checkpoint.velocities.clone_from(&self.velocities);
    }

    /// Restores the positions and velocities saved by [`WorkingSet::save`].
    pub fn restore(&mut self, checkpoint: &Checkpoint) {
        debug_assert_eq!(checkpoint.positions.len(), self.positions.len());

        self.positions.clone_from(&checkpoint.positions);
        self.velocities.clone_from(&checkpoint.velocities);
    }

    fn first_degenerate(&self) -> Option<usize> {
        // Padding lanes only ever come last.
        self.degenerate
            .iter()
            .enumerate()
            .find(|(_, &mask)| mask != 0)
            .map(|(chunk, &mask)| chunk * LANES + mask.trailing_zeros() as usize)
            .filter(|&body| body < self.len)
    }
}

/// Packs up to [`LANES`] vectors, padding with zeros.
#[inline]
fn to_lanes(slice: &[Vec3]) -> Vec3x8 {
    let mut lanes = [Vec3::zero(); LANES];
    lanes[..slice.len()].copy_from_slice(slice);
    Vec3x8::from(lanes)
}

/// Acceleration of the bodies of one lane group, summed over every source in ascending order,
/// and the bit mask of the lanes having a degenerate pair.
///
/// The self-pair is masked out by index.
#[inline]
fn lanes_acceleration(
    position: Vec3x8,
    index: f32x8,
    sources: &[Vec3],
    mu: &[f32],
) -> (Vec3x8, i32) {
    let (zero, max) = (f32x8::splat(0.0), f32x8::splat(f32::MAX));

    let (acceleration, degenerate) = sources.iter().zip(mu).enumerate().fold(
        (Vec3x8::zero(), zero),
        |(acceleration, degenerate), (j, (&p2, &mu2))| {
            let dir = Vec3x8::splat(p2) - position;
            // Same operation order and degeneracy test as the compute shader.
            let mag_2 = dir.x * dir.x + dir.y * dir.y + dir.z * dir.z;
            let denominator = mag_2 * mag_2.sqrt();
            let factor = f32x8::splat(mu2) / denominator;
            let grav_acc = dir * factor;

            let other = index.cmp_ne(f32x8::splat(j as f32));
            let singular = denominator.cmp_eq(zero) | factor.cmp_gt(max) | factor.cmp_ne(factor);

            (
                acceleration + grav_acc.map(|v| v & other),
                degenerate | (singular & other),
            )
        },
    );

    (acceleration, degenerate.move_mask())
}
