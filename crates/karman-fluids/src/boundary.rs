use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::error::{FluidError, Result};

/// Velocity boundary condition on a single domain face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Boundary {
    /// Dirichlet velocity, e.g. an inflow vector. Pressure is zero-gradient across this face.
    Fixed(DVec3),
    /// Neumann velocity (outflow). Pressure is held at zero just outside this face.
    ZeroGradient,
    /// Wraps around to the opposite face of the same axis.
    Periodic,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisBoundary {
    pub lower: Boundary,
    pub upper: Boundary,
}

impl AxisBoundary {
    pub const PERIODIC: AxisBoundary = AxisBoundary::uniform(Boundary::Periodic);

    pub const fn new(lower: Boundary, upper: Boundary) -> Self {
        Self { lower, upper }
    }

    pub const fn uniform(boundary: Boundary) -> Self {
        Self { lower: boundary, upper: boundary }
    }

    #[inline]
    pub fn is_periodic(&self) -> bool {
        self.lower == Boundary::Periodic && self.upper == Boundary::Periodic
    }
}

/// Boundary conditions for every face of the domain, indexed by axis (`x`, `y`, `z`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundarySet {
    pub axes: [AxisBoundary; 3],
}

impl BoundarySet {
    pub fn new(x: AxisBoundary, y: AxisBoundary, z: AxisBoundary) -> Self {
        Self { axes: [x, y, z] }
    }

    /// Channel flow past an obstacle: fixed inflow on `x-`, outflow on `x+`, periodic
    /// everywhere else.
    pub fn wake(inflow: DVec3) -> Self {
        Self::new(
            AxisBoundary::new(Boundary::Fixed(inflow), Boundary::ZeroGradient),
            AxisBoundary::PERIODIC,
            AxisBoundary::PERIODIC,
        )
    }

    pub fn periodic() -> Self {
        Self::new(AxisBoundary::PERIODIC, AxisBoundary::PERIODIC, AxisBoundary::PERIODIC)
    }

    #[inline]
    pub fn axis(&self, axis: usize) -> &AxisBoundary {
        &self.axes[axis]
    }

    #[inline]
    pub fn is_periodic(&self, axis: usize) -> bool {
        self.axes[axis].is_periodic()
    }

    /// Checks that periodic faces are paired and that fixed values are finite.
    ///
    /// A 2D domain keeps its third axis as a single periodic layer, so only `dim` axes are
    /// user-controlled.
    pub fn validate(&self, dim: usize) -> Result<()> {
        const NAMES: [&str; 3] = ["x", "y", "z"];

        for (axis, bounds) in self.axes.iter().enumerate() {
            let lower_periodic = bounds.lower == Boundary::Periodic;
            let upper_periodic = bounds.upper == Boundary::Periodic;

            if lower_periodic != upper_periodic {
                return Err(FluidError::config(format!(
                    "axis {} mixes a periodic face with a non-periodic one ({:?} / {:?})",
                    NAMES[axis], bounds.lower, bounds.upper,
                )));
            }

            if axis >= dim && !bounds.is_periodic() {
                return Err(FluidError::config(format!(
                    "axis {} is not part of a {dim}D domain and must stay periodic",
                    NAMES[axis],
                )));
            }

            for side in [bounds.lower, bounds.upper] {
                if let Boundary::Fixed(v) = side {
                    if !v.is_finite() {
                        return Err(FluidError::config(format!(
                            "fixed boundary value on axis {} is not finite",
                            NAMES[axis],
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}
