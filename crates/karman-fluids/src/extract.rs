use glam::DVec3;
use ndarray::{Array2, Array3, Axis, Zip};

use crate::{
    config::RunMetadata,
    error::{FluidError, Result},
    field::VelocityField,
    grid::Grid,
    integrate::Trajectory,
};

/// A trajectory reduced to one `x`/`y` cross-section. Every array is shaped `[time, x, y]` and
/// sampled at cell centers.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFields {
    pub velocity_x: Array3<f64>,
    pub velocity_y: Array3<f64>,
    pub pressure: Array3<f64>,
    /// `∂v/∂x - ∂u/∂y` of the in-plane velocity.
    pub vorticity: Array3<f64>,
    /// Index along `z` of the cross-section.
    pub slice_index: usize,
    pub metadata: RunMetadata,
}

impl ExtractedFields {
    /// The four arrays paired with their dataset names.
    pub fn datasets(&self) -> [(&'static str, &Array3<f64>); 4] {
        [
            ("velocity_x", &self.velocity_x),
            ("velocity_y", &self.velocity_y),
            ("pressure", &self.pressure),
            ("vorticity", &self.vorticity),
        ]
    }

    #[inline]
    pub fn time_steps(&self) -> usize {
        self.pressure.len_of(Axis(0))
    }
}

/// Slices `trajectory` at `z = slice_index` (the middle layer when `None`) and computes the
/// in-plane vorticity. A 3D trajectory loses its `z` velocity component.
pub fn extract(trajectory: &Trajectory, slice_index: Option<usize>) -> Result<ExtractedFields> {
    let grid = trajectory.grid();
    let k = slice_index.unwrap_or(grid.nz / 2);

    if k >= grid.nz {
        return Err(FluidError::config(format!("slice index {k} is outside 0..{}", grid.nz)));
    }

    let shape = (trajectory.len(), grid.nx, grid.ny);
    let mut velocity_x = Array3::zeros(shape);
    let mut velocity_y = Array3::zeros(shape);
    let mut pressure = Array3::zeros(shape);
    let mut vorticity = Array3::zeros(shape);

    for (t, state) in trajectory.states().iter().enumerate() {
        let u = state.velocity.cell_centered(grid, 0);
        let v = state.velocity.cell_centered(grid, 1);

        velocity_x.index_axis_mut(Axis(0), t).assign(&u.index_axis(Axis(2), k));
        velocity_y.index_axis_mut(Axis(0), t).assign(&v.index_axis(Axis(2), k));
        pressure.index_axis_mut(Axis(0), t).assign(&state.pressure.index_axis(Axis(2), k));

        vorticity.index_axis_mut(Axis(0), t).assign(&curl_z(grid, &state.velocity, k));
    }

    Ok(ExtractedFields {
        velocity_x,
        velocity_y,
        pressure,
        vorticity,
        slice_index: k,
        metadata: trajectory.metadata().clone(),
    })
}

/// `∂v/∂x - ∂u/∂y` at the cell centers of layer `k`, by central differences. Samples beyond
/// the domain are resolved through the boundary conditions.
pub fn curl_z(grid: &Grid, velocity: &VelocityField, k: usize) -> Array2<f64> {
    let dx = DVec3::new(grid.spacing.x, 0.0, 0.0);
    let dy = DVec3::new(0.0, grid.spacing.y, 0.0);
    let mut curl = Array2::zeros((grid.nx, grid.ny));

    Zip::indexed(&mut curl).for_each(|(i, j), w| {
        let c = grid.cell_center(i, j, k);
        let dv_dx = (velocity.sample(grid, 1, c + dx) - velocity.sample(grid, 1, c - dx)) * 0.5 * grid.inv_spacing.x;
        let du_dy = (velocity.sample(grid, 0, c + dy) - velocity.sample(grid, 0, c - dy)) * 0.5 * grid.inv_spacing.y;
        *w = dv_dx - du_dy;
    });

    curl
}
