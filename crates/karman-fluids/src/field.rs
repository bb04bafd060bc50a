use glam::DVec3;
use ndarray::{Array3, Axis, Zip};
use smallvec::SmallVec;

use crate::{boundary::Boundary, grid::Grid, obstacle::ObstacleMask};

/// A staggered (MAC) velocity field. Component `a` is stored at the faces normal to axis `a`
/// and at cell centers along the other axes.
#[derive(Debug, Clone, PartialEq)]
pub struct VelocityField {
    components: SmallVec<[Array3<f64>; 3]>,
}

impl VelocityField {
    /// A field with `value` on every sample. Only the first `grid.dim()` components of `value`
    /// are used.
    pub fn uniform(grid: &Grid, value: DVec3) -> Self {
        Self {
            components: (0..grid.dim())
                .map(|axis| Array3::from_elem(grid.staggered_shape(axis), value[axis]))
                .collect(),
        }
    }

    /// Builds each component by evaluating `f(axis, position)` at its sample positions.
    pub fn from_fn<F>(grid: &Grid, f: F) -> Self
    where
        F: Fn(usize, DVec3) -> f64,
    {
        Self {
            components: (0..grid.dim())
                .map(|axis| {
                    Array3::from_shape_fn(grid.staggered_shape(axis), |(i, j, k)| {
                        f(axis, grid.face_position(axis, i, j, k))
                    })
                })
                .collect(),
        }
    }

    pub fn from_components(components: SmallVec<[Array3<f64>; 3]>) -> Self {
        Self { components }
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.components.len()
    }

    #[inline]
    pub fn component(&self, axis: usize) -> &Array3<f64> {
        &self.components[axis]
    }

    #[inline]
    pub fn component_mut(&mut self, axis: usize) -> &mut Array3<f64> {
        &mut self.components[axis]
    }

    #[inline]
    pub fn components(&self) -> &[Array3<f64>] {
        &self.components
    }

    pub fn is_finite(&self) -> bool {
        self.components.iter().all(|c| c.iter().all(|v| v.is_finite()))
    }

    /// Value of component `axis` at integer sample index `idx`, which may lie outside the
    /// stored samples. Out-of-range indices are resolved through the boundary conditions.
    ///
    /// Beyond a fixed face a transverse component takes the reflected value `2·bc - interior`,
    /// which puts the boundary value on the face itself.
    pub fn value_at(&self, grid: &Grid, axis: usize, idx: [isize; 3]) -> f64 {
        let comp = &self.components[axis];
        let shape = comp.shape();
        let mut index = [0usize; 3];
        let mut reflections: SmallVec<[f64; 3]> = SmallVec::new();

        for b in 0..3 {
            let len = shape[b] as isize;
            let i = idx[b];

            index[b] = if grid.boundaries.is_periodic(b) {
                i.rem_euclid(len) as usize
            } else if b == axis {
                // Boundary faces are stored, so anything beyond them continues the face value.
                i.clamp(0, len - 1) as usize
            } else if i < 0 {
                if let Boundary::Fixed(v) = grid.boundaries.axis(b).lower {
                    reflections.push(v[axis]);
                }
                0
            } else if i >= len {
                if let Boundary::Fixed(v) = grid.boundaries.axis(b).upper {
                    reflections.push(v[axis]);
                }
                shape[b] - 1
            } else {
                i as usize
            };
        }

        reflections.into_iter().fold(comp[index], |interior, bc| 2.0 * bc - interior)
    }

    /// Trilinearly interpolates component `axis` at world position `pos`.
    ///
    /// Positions far outside the domain are wrapped along periodic axes and clamped onto the
    /// ghost layer along the others, where the boundary values no longer change.
    pub fn sample(&self, grid: &Grid, axis: usize, pos: DVec3) -> f64 {
        let mut offset = DVec3::splat(0.5);
        offset[axis] = 0.0;

        let mut t = (pos - grid.min) * grid.inv_spacing - offset;
        for b in 0..3 {
            let n = grid.resolution(b) as f64;
            t[b] = if grid.boundaries.is_periodic(b) {
                if t[b] < 0.0 || t[b] >= n { t[b].rem_euclid(n) } else { t[b] }
            } else {
                t[b].clamp(-2.0, n + 1.0)
            };
        }

        let base = t.floor();
        let delta = t - base;
        let (i, j, k) = (base.x as isize, base.y as isize, base.z as isize);

        let v000 = self.value_at(grid, axis, [i, j, k]);
        let v100 = self.value_at(grid, axis, [i + 1, j, k]);
        let v010 = self.value_at(grid, axis, [i, j + 1, k]);
        let v110 = self.value_at(grid, axis, [i + 1, j + 1, k]);
        let v001 = self.value_at(grid, axis, [i, j, k + 1]);
        let v101 = self.value_at(grid, axis, [i + 1, j, k + 1]);
        let v011 = self.value_at(grid, axis, [i, j + 1, k + 1]);
        let v111 = self.value_at(grid, axis, [i + 1, j + 1, k + 1]);

        trilerp_norm(v000, v001, v010, v011, v100, v101, v110, v111, delta)
    }

    /// Interpolated velocity vector at `pos`. Missing components (2D) are zero.
    pub fn sample_velocity(&self, grid: &Grid, pos: DVec3) -> DVec3 {
        let mut v = DVec3::ZERO;
        for axis in 0..self.dim() {
            v[axis] = self.sample(grid, axis, pos);
        }
        v
    }

    /// Writes fixed boundary values onto the faces that lie on fixed-velocity domain faces.
    ///
    /// Zero-gradient faces are left alone; they evolve with the interior and are corrected by
    /// the projection.
    pub fn apply_boundaries(&mut self, grid: &Grid) {
        for axis in 0..self.dim() {
            if grid.boundaries.is_periodic(axis) {
                continue;
            }

            let n = grid.resolution(axis);
            let bounds = *grid.boundaries.axis(axis);
            let comp = &mut self.components[axis];

            if let Boundary::Fixed(v) = bounds.lower {
                comp.index_axis_mut(Axis(axis), 0).fill(v[axis]);
            }

            if let Boundary::Fixed(v) = bounds.upper {
                comp.index_axis_mut(Axis(axis), n).fill(v[axis]);
            }
        }
    }

    /// Zeroes every face that touches a solid cell.
    pub fn apply_obstacle(&mut self, grid: &Grid, mask: &ObstacleMask) {
        if mask.solid_count() == 0 {
            return;
        }

        for axis in 0..self.dim() {
            let n = grid.resolution(axis) as isize;
            let periodic = grid.boundaries.is_periodic(axis);

            Zip::indexed(&mut self.components[axis]).for_each(|(i, j, k), u| {
                let mut lo = [i as isize, j as isize, k as isize];
                lo[axis] -= 1;
                let mut hi = [i as isize, j as isize, k as isize];
                if periodic {
                    lo[axis] = lo[axis].rem_euclid(n);
                    hi[axis] = hi[axis].rem_euclid(n);
                }

                let touches = [lo, hi].iter().any(|c| {
                    c[axis] >= 0 && c[axis] < n && mask.is_solid(c[0] as usize, c[1] as usize, c[2] as usize)
                });

                if touches {
                    *u = 0.0;
                }
            });
        }
    }

    /// Discrete divergence at cell centers.
    pub fn divergence(&self, grid: &Grid) -> Array3<f64> {
        let mut div = Array3::zeros(grid.cell_shape());

        Zip::indexed(&mut div).for_each(|(i, j, k), d| {
            *d = self.cell_divergence(grid, i, j, k);
        });

        div
    }

    #[inline]
    pub fn cell_divergence(&self, grid: &Grid, i: usize, j: usize, k: usize) -> f64 {
        let mut div = 0.0;

        for (axis, comp) in self.components.iter().enumerate() {
            let lo = [i, j, k];
            let mut hi = lo;
            hi[axis] += 1;
            if grid.boundaries.is_periodic(axis) {
                hi[axis] %= grid.resolution(axis);
            }

            div += (comp[hi] - comp[lo]) * grid.inv_spacing[axis];
        }

        div
    }

    /// Largest absolute divergence over all non-solid cells.
    pub fn max_divergence(&self, grid: &Grid, mask: &ObstacleMask) -> f64 {
        let mut max: f64 = 0.0;

        for ((i, j, k), &solid) in mask.solid().indexed_iter() {
            if !solid {
                max = max.max(self.cell_divergence(grid, i, j, k).abs());
            }
        }

        max
    }

    /// Total kinetic energy `½ Σ |u|² dV`, summed over the staggered samples.
    pub fn kinetic_energy(&self, grid: &Grid) -> f64 {
        let volume = grid.spacing.x * grid.spacing.y * grid.spacing.z;
        0.5 * volume * self.components.iter().map(|c| c.iter().map(|v| v * v).sum::<f64>()).sum::<f64>()
    }

    /// Component `axis` averaged onto cell centers.
    pub fn cell_centered(&self, grid: &Grid, axis: usize) -> Array3<f64> {
        let comp = &self.components[axis];
        let n = grid.resolution(axis);
        let periodic = grid.boundaries.is_periodic(axis);

        Array3::from_shape_fn(grid.cell_shape(), |(i, j, k)| {
            let lo = [i, j, k];
            let mut hi = lo;
            hi[axis] += 1;
            if periodic {
                hi[axis] %= n;
            }
            0.5 * (comp[lo] + comp[hi])
        })
    }
}

#[inline]
#[allow(clippy::too_many_arguments)]
fn trilerp_norm(v000: f64, v001: f64, v010: f64, v011: f64, v100: f64, v101: f64, v110: f64, v111: f64, p: DVec3) -> f64 {
    let v00 = v000 + p.x * (v100 - v000);
    let v01 = v001 + p.x * (v101 - v001);
    let v10 = v010 + p.x * (v110 - v010);
    let v11 = v011 + p.x * (v111 - v011);

    let v0 = v00 + p.y * (v10 - v00);
    let v1 = v01 + p.y * (v11 - v01);

    v0 + p.z * (v1 - v0)
}
