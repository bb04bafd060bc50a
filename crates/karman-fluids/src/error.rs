use std::fmt;

use thiserror::Error;

/// The part of the solver that was running when an error was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// The cold projection that turns the placeholder velocity into the initial state.
    Bootstrap,
    Diffusion,
    Advection,
    Projection,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Bootstrap => "bootstrap",
            Stage::Diffusion => "diffusion",
            Stage::Advection => "advection",
            Stage::Projection => "projection",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FluidError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error(
        "pressure solve did not converge at step {step} ({stage}): residual {residual:e} > {tolerance:e} after {iterations} iterations"
    )]
    Convergence {
        step: usize,
        stage: Stage,
        iterations: usize,
        residual: f64,
        tolerance: f64,
    },

    #[error("non-finite values in the flow state at step {step} after {stage}")]
    NumericalInstability {
        step: usize,
        stage: Stage,
    },

    #[error("run cancelled by observer")]
    Cancelled,
}

impl FluidError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        FluidError::Configuration(msg.into())
    }
}

/// A failed run. The partial trajectory is dropped; only the number of steps that completed
/// before the failure survives.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("run failed after {completed_steps} completed steps: {source}")]
pub struct RunError {
    pub completed_steps: usize,
    #[source]
    pub source: FluidError,
}

impl RunError {
    /// Index of the last step whose state was fully computed, if any.
    pub fn last_completed_step(&self) -> Option<usize> {
        self.completed_steps.checked_sub(1)
    }
}

pub type Result<T, E = FluidError> = std::result::Result<T, E>;
