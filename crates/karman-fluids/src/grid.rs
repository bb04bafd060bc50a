use glam::{DVec3, UVec3};

use crate::{boundary::BoundarySet, error::{FluidError, Result}};

/// A regular, axis-aligned grid with a staggered (MAC) velocity layout.
///
/// 2D domains are stored as 3D grids whose `z` axis is a single periodic layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    /// Number of user-facing axes (2 or 3).
    dim: usize,
    /// Lower corner of the domain.
    pub min: DVec3,
    /// Upper corner of the domain.
    pub max: DVec3,
    /// Size of the grid, in cells.
    pub grid_size: UVec3,
    /// Number of cells in the X direction.
    pub nx: usize,
    /// Number of cells in the Y direction.
    pub ny: usize,
    /// Number of cells in the Z direction.
    pub nz: usize,
    /// Cell size along each axis.
    pub spacing: DVec3,
    /// 1.0 / spacing
    pub inv_spacing: DVec3,
    /// Boundary conditions for every domain face.
    pub boundaries: BoundarySet,
}

impl Grid {
    /// Builds a grid from per-axis `(min, max)` extents and per-axis cell counts.
    ///
    /// Two or three axes may be given. Fails if a resolution is zero, an extent is degenerate
    /// or non-finite, or the boundary set is contradictory.
    pub fn new(extents: &[(f64, f64)], resolution: &[usize], boundaries: BoundarySet) -> Result<Self> {
        let dim = extents.len();

        if !(2..=3).contains(&dim) {
            return Err(FluidError::config(format!("domain must have 2 or 3 axes, got {dim}")));
        }

        if resolution.len() != dim {
            return Err(FluidError::config(format!(
                "{dim} extents given but {} resolutions",
                resolution.len(),
            )));
        }

        let mut min = DVec3::ZERO;
        let mut max = DVec3::ONE;
        let mut size = UVec3::ONE;

        for axis in 0..dim {
            let (lo, hi) = extents[axis];
            if !lo.is_finite() || !hi.is_finite() || lo >= hi {
                return Err(FluidError::config(format!(
                    "extent of axis {axis} is degenerate: ({lo}, {hi})",
                )));
            }

            let n = resolution[axis];
            if n < 1 || n > u32::MAX as usize {
                return Err(FluidError::config(format!("resolution of axis {axis} is out of range: {n}")));
            }

            min[axis] = lo;
            max[axis] = hi;
            size[axis] = n as u32;
        }

        boundaries.validate(dim)?;

        let spacing = (max - min) / size.as_dvec3();

        Ok(Self {
            dim,
            min,
            max,
            grid_size: size,
            nx: size.x as usize,
            ny: size.y as usize,
            nz: size.z as usize,
            spacing,
            inv_spacing: spacing.recip(),
            boundaries,
        })
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    pub fn size(&self) -> DVec3 {
        self.max - self.min
    }

    #[inline]
    pub fn spacing(&self) -> DVec3 {
        self.spacing
    }

    #[inline]
    pub fn resolution(&self, axis: usize) -> usize {
        self.grid_size[axis] as usize
    }

    #[inline]
    pub fn cell_shape(&self) -> (usize, usize, usize) {
        (self.nx, self.ny, self.nz)
    }

    #[inline]
    pub fn cell_count(&self) -> usize {
        self.nx * self.ny * self.nz
    }

    /// Number of face samples along `axis` for the component staggered on that axis.
    ///
    /// A periodic axis shares its first and last face, so it has one sample per cell.
    #[inline]
    pub fn staggered_len(&self, axis: usize) -> usize {
        let n = self.resolution(axis);
        if self.boundaries.is_periodic(axis) { n } else { n + 1 }
    }

    /// Array shape of the velocity component normal to `axis`.
    pub fn staggered_shape(&self, axis: usize) -> (usize, usize, usize) {
        let mut shape = [self.nx, self.ny, self.nz];
        shape[axis] = self.staggered_len(axis);
        (shape[0], shape[1], shape[2])
    }

    #[inline]
    pub fn cell_center(&self, i: usize, j: usize, k: usize) -> DVec3 {
        self.min + (DVec3::new(i as f64, j as f64, k as f64) + 0.5) * self.spacing
    }

    /// Position of sample `(i, j, k)` of the velocity component normal to `axis`.
    #[inline]
    pub fn face_position(&self, axis: usize, i: usize, j: usize, k: usize) -> DVec3 {
        let mut offset = DVec3::splat(0.5);
        offset[axis] = 0.0;
        self.min + (DVec3::new(i as f64, j as f64, k as f64) + offset) * self.spacing
    }

    /// Cell-center coordinates along `axis`.
    pub fn cell_coordinates(&self, axis: usize) -> Vec<f64> {
        (0..self.resolution(axis))
            .map(|i| self.min[axis] + (i as f64 + 0.5) * self.spacing[axis])
            .collect()
    }

    /// Face coordinates along `axis` for the component staggered on that axis.
    pub fn face_coordinates(&self, axis: usize) -> Vec<f64> {
        (0..self.staggered_len(axis))
            .map(|i| self.min[axis] + i as f64 * self.spacing[axis])
            .collect()
    }

    #[inline]
    pub fn contains(&self, p: DVec3) -> bool {
        (0..self.dim).all(|axis| p[axis] >= self.min[axis] && p[axis] <= self.max[axis])
    }
}
