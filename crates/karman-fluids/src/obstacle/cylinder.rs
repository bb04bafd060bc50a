use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::{error::{FluidError, Result}, grid::Grid};

use super::{Obstacle, Sdf};

/// A cylinder of infinite length along `axis`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cylinder {
    /// A point on the cylinder's axis. The coordinate along `axis` is ignored.
    pub center: DVec3,
    pub radius: f64,
    /// The axis the cylinder extends infinitely along (`0` = x, `1` = y, `2` = z).
    pub axis: usize,
}

impl Cylinder {
    pub fn new(center: DVec3, radius: f64, axis: usize) -> Self {
        Cylinder {
            center,
            radius,
            axis,
        }
    }

    #[inline]
    pub fn diameter(&self) -> f64 {
        2.0 * self.radius
    }

    /// Checks that the cylinder fits the domain of `grid`.
    ///
    /// The center must lie inside the domain and the diameter may not exceed the extent of any
    /// axis that crosses the cylinder.
    pub fn validate(&self, grid: &Grid) -> Result<()> {
        if self.axis > 2 || (grid.dim() == 2 && self.axis != 2) {
            return Err(FluidError::config(format!(
                "cylinder axis {} is not an out-of-plane axis of a {}D domain",
                self.axis,
                grid.dim(),
            )));
        }

        if !self.radius.is_finite() || self.radius <= 0.0 {
            return Err(FluidError::config(format!("cylinder radius must be positive, got {}", self.radius)));
        }

        let size = grid.size();

        for axis in (0..grid.dim()).filter(|&a| a != self.axis) {
            let c = self.center[axis];
            if !c.is_finite() || c < grid.min[axis] || c > grid.max[axis] {
                return Err(FluidError::config(format!(
                    "cylinder center {c} lies outside the domain along axis {axis}",
                )));
            }

            if self.diameter() > size[axis] {
                return Err(FluidError::config(format!(
                    "cylinder radius {} exceeds half the domain extent {} along axis {axis}",
                    self.radius, size[axis],
                )));
            }
        }

        Ok(())
    }
}

impl Obstacle for Cylinder {
    fn sdf(&self, p: DVec3) -> Sdf {
        let mut offset = p - self.center;
        offset[self.axis] = 0.0;
        let d = offset.length();

        Sdf {
            distance: d - self.radius,
            gradient: if d > 0.0 { offset / d } else { DVec3::ZERO },
        }
    }
}
