use std::fmt;

/// Errors produced while building or advancing a [`Simulation`](crate::simulation::Simulation).
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Malformed construction input or configuration: mismatched lengths, non-positive mass,
    /// time step or gravitational constant.
    ///
    /// Always fatal for the operation that produced it, nothing is clamped.
    InvalidConfiguration(String),
    /// Two bodies occupy the same position, making the pairwise acceleration a division by zero.
    ///
    /// `body` is the index of one of the coincident bodies.
    NumericDegeneracy {
        /// Index of a body involved in the coincidence.
        body: usize,
    },
    /// The GPU execution context could not be created or used.
    ///
    /// The canonical state is left untouched and the CPU backend remains usable.
    BackendUnavailable(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfiguration(reason) => write!(f, "invalid configuration: {reason}"),
            Self::NumericDegeneracy { body } => {
                write!(f, "body {body} coincides with another body")
            }
            Self::BackendUnavailable(reason) => write!(f, "backend unavailable: {reason}"),
        }
    }
}

impl std::error::Error for Error {}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
