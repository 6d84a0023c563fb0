//! Scalar reductions over a [`Bodies`] store.
//!
//! Sums are accumulated in `f64` from the `f32` state so that large systems do not lose the
//! small terms.

use ultraviolet::Vec3;

use crate::body::Bodies;

/// Total kinetic energy `Σ 0.5 * m * |v|^2`.
pub fn kinetic_energy(bodies: &Bodies) -> f64 {
    bodies
        .masses()
        .iter()
        .zip(bodies.velocities())
        .map(|(&mass, velocity)| 0.5 * mass as f64 * velocity.mag_sq() as f64)
        .sum()
}

/// Total potential energy `Σ_{i<j} -G * m_i * m_j / |p_j - p_i|`.
///
/// Coincident bodies yield negative infinity.
pub fn potential_energy(bodies: &Bodies) -> f64 {
    let (positions, masses, mu) = (bodies.positions(), bodies.masses(), bodies.mu());

    (0..bodies.len())
        .map(|i| {
            (i + 1..bodies.len())
                .map(|j| {
                    let distance = (positions[j] - positions[i]).mag() as f64;
                    -(mu[i] as f64) * masses[j] as f64 / distance
                })
                .sum::<f64>()
        })
        .sum()
}

/// Total momentum `Σ m * v`.
pub fn momentum(bodies: &Bodies) -> Vec3 {
    let [x, y, z] = weighted_sum(bodies.masses(), bodies.velocities());
    Vec3::new(x as f32, y as f32, z as f32)
}

/// Velocity of the center of mass `Σ mu * v / Σ mu`, zero if there are no bodies.
pub fn com_velocity(bodies: &Bodies) -> Vec3 {
    if bodies.is_empty() {
        return Vec3::zero();
    }

    let [x, y, z] = weighted_sum(bodies.mu(), bodies.velocities());
    let mu_sum: f64 = bodies.mu().iter().map(|&mu| mu as f64).sum();

    Vec3::new(
        (x / mu_sum) as f32,
        (y / mu_sum) as f32,
        (z / mu_sum) as f32,
    )
}

fn weighted_sum(weights: &[f32], vectors: &[Vec3]) -> [f64; 3] {
    weights
        .iter()
        .zip(vectors)
        .fold([0.0; 3], |[x, y, z], (&w, v)| {
            let w = w as f64;
            [x + w * v.x as f64, y + w * v.y as f64, z + w * v.z as f64]
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_bodies() -> Bodies {
        Bodies::new(
            vec![20.0, 10.0],
            [[0.0; 3], [3.0, 4.0, 0.0]],
            [[0.0, 0.0, 0.0], [3.0, 3.0, 3.0]],
            10.0,
        )
        .unwrap()
    }

    #[test]
    fn kinetic() {
        assert_eq!(kinetic_energy(&two_bodies()), 0.5 * 10.0 * 27.0);
    }

    #[test]
    fn potential() {
        // -G * 20 * 10 / 5
        assert_eq!(potential_energy(&two_bodies()), -400.0);
    }

    #[test]
    fn potential_counts_each_pair_once() {
        let bodies = Bodies::new(
            vec![1.0, 1.0, 1.0],
            [[0.0; 3], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0]],
            Vec::<[f32; 3]>::new(),
            1.0,
        )
        .unwrap();

        assert_eq!(potential_energy(&bodies), -2.5);
    }

    #[test]
    fn com_velocity_weights_by_mass() {
        let bodies = two_bodies();
        assert_eq!(com_velocity(&bodies), Vec3::broadcast(1.0));
        assert_eq!(momentum(&bodies), Vec3::broadcast(30.0));
    }

    #[test]
    fn empty() {
        let bodies = Bodies::default();
        assert_eq!(kinetic_energy(&bodies), 0.0);
        assert_eq!(potential_energy(&bodies), 0.0);
        assert_eq!(momentum(&bodies), Vec3::zero());
        assert_eq!(com_velocity(&bodies), Vec3::zero());
    }
}
