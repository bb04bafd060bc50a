use glam::DVec3;
use ndarray::{Array3, Zip};

use crate::grid::Grid;

pub mod cylinder;

/// A static obstacle immersed in the fluid. Velocity inside it is held at zero.
pub trait Obstacle {
    fn sdf(&self, p: DVec3) -> Sdf;

    #[inline]
    fn contains(&self, p: DVec3) -> bool {
        self.sdf(p).distance < 0.0
    }

    /// Rasterizes the obstacle onto the cells of `grid`. A cell is solid when its center lies
    /// inside the obstacle.
    fn mask(&self, grid: &Grid) -> ObstacleMask {
        let mut solid = Array3::from_elem(grid.cell_shape(), false);

        Zip::indexed(&mut solid).for_each(|(i, j, k), s| {
            *s = self.contains(grid.cell_center(i, j, k));
        });

        ObstacleMask::from_solid(solid)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sdf {
    pub distance: f64,
    pub gradient: DVec3,
}

impl Sdf {
    pub fn new(distance: f64, gradient: DVec3) -> Sdf {
        Sdf { distance, gradient }
    }
}

/// Cell occupancy of the obstacle. Computed once per run and shared by every step.
#[derive(Debug, Clone, PartialEq)]
pub struct ObstacleMask {
    /// `true` for cells whose center is inside the obstacle.
    solid: Array3<bool>,
    n_solid: usize,
}

impl ObstacleMask {
    /// A mask with no solid cells.
    pub fn empty(grid: &Grid) -> Self {
        Self::from_solid(Array3::from_elem(grid.cell_shape(), false))
    }

    pub fn from_solid(solid: Array3<bool>) -> Self {
        let n_solid = solid.iter().filter(|&&s| s).count();
        Self { solid, n_solid }
    }

    #[inline]
    pub fn is_solid(&self, i: usize, j: usize, k: usize) -> bool {
        self.solid[(i, j, k)]
    }

    #[inline]
    pub fn solid(&self) -> &Array3<bool> {
        &self.solid
    }

    #[inline]
    pub fn solid_count(&self) -> usize {
        self.n_solid
    }

    #[inline]
    pub fn fluid_count(&self) -> usize {
        self.solid.len() - self.n_solid
    }
}
