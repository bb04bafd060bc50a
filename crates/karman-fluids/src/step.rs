use ndarray::{Array3, Zip};
use smallvec::SmallVec;

use crate::{
    error::{FluidError, Result, Stage},
    field::VelocityField,
    grid::Grid,
    pressure::{ProjectionReport, Projector, SolverConfig},
};

/// One flow state: the staggered velocity and the pressure that made it divergence-free.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationState {
    pub velocity: VelocityField,
    pub pressure: Array3<f64>,
    /// Simulated time of this state.
    pub time: f64,
}

/// The outcome of one step: the new state plus the diagnostics of its pressure solve.
#[derive(Debug, Clone)]
pub struct Advanced {
    pub state: SimulationState,
    pub report: ProjectionReport,
}

/// One explicit Euler step of `∂u/∂t = ν Δu`.
pub fn diffuse(grid: &Grid, velocity: &VelocityField, viscosity: f64, dt: f64) -> VelocityField {
    if viscosity == 0.0 {
        return velocity.clone();
    }

    let alpha = viscosity * dt;
    let inv_h2 = grid.inv_spacing * grid.inv_spacing;

    let components: SmallVec<[Array3<f64>; 3]> = (0..velocity.dim())
        .map(|axis| {
            let comp = velocity.component(axis);
            let mut out = Array3::zeros(comp.raw_dim());

            Zip::indexed(&mut out).and(comp).par_for_each(|(i, j, k), o, &u| {
                let idx = [i as isize, j as isize, k as isize];
                let mut laplacian = 0.0;

                for b in 0..grid.dim() {
                    let mut lo = idx;
                    let mut hi = idx;
                    lo[b] -= 1;
                    hi[b] += 1;
                    laplacian += (velocity.value_at(grid, axis, hi) - 2.0 * u + velocity.value_at(grid, axis, lo)) * inv_h2[b];
                }

                *o = u + alpha * laplacian;
            });

            out
        })
        .collect();

    let mut diffused = VelocityField::from_components(components);
    diffused.apply_boundaries(grid);
    diffused
}

/// Semi-Lagrangian advection of `velocity` by itself: every sample is traced back along the
/// current flow for `dt` and takes the interpolated value found there.
pub fn advect(grid: &Grid, velocity: &VelocityField, dt: f64) -> VelocityField {
    let components: SmallVec<[Array3<f64>; 3]> = (0..velocity.dim())
        .map(|axis| {
            let mut out = Array3::zeros(velocity.component(axis).raw_dim());

            Zip::indexed(&mut out).par_for_each(|(i, j, k), o| {
                let p = grid.face_position(axis, i, j, k);
                let departure = p - dt * velocity.sample_velocity(grid, p);
                *o = velocity.sample(grid, axis, departure);
            });

            out
        })
        .collect();

    let mut advected = VelocityField::from_components(components);
    advected.apply_boundaries(grid);
    advected
}

/// Diffusion, advection and projection, applied in that order.
#[derive(Debug, Clone)]
pub struct StepOperator {
    projector: Projector,
    solver: SolverConfig,
    /// Seed each pressure solve with the previous pressure. Only valid while the geometry and
    /// boundary values stay fixed.
    warm_start: bool,
}

impl StepOperator {
    pub fn new(projector: Projector, solver: SolverConfig) -> Self {
        Self { projector, solver, warm_start: true }
    }

    pub fn with_warm_start(mut self, warm_start: bool) -> Self {
        self.warm_start = warm_start;
        self
    }

    #[inline]
    pub fn projector(&self) -> &Projector {
        &self.projector
    }

    #[inline]
    pub fn solver(&self) -> &SolverConfig {
        &self.solver
    }

    /// Advances `state` by `dt`. `step` is the trajectory index of the produced state and is
    /// only used to label errors.
    ///
    /// Non-convergence of the pressure solve is not an error here; it is reported through
    /// [`Advanced::report`] so the caller can apply its own policy.
    pub fn advance(&self, step: usize, state: &SimulationState, dt: f64, viscosity: f64) -> Result<Advanced> {
        let grid = &**self.projector.grid();

        let velocity = diffuse(grid, &state.velocity, viscosity, dt);
        check_finite(&velocity, step, Stage::Diffusion)?;

        let velocity = advect(grid, &velocity, dt);
        check_finite(&velocity, step, Stage::Advection)?;

        let warm_start = self.warm_start.then_some(&state.pressure);
        let projection = self.projector.project(&velocity, warm_start, &self.solver);
        check_finite(&projection.velocity, step, Stage::Projection)?;
        if projection.pressure.iter().any(|p| !p.is_finite()) {
            return Err(FluidError::NumericalInstability { step, stage: Stage::Projection });
        }

        Ok(Advanced {
            state: SimulationState {
                velocity: projection.velocity,
                pressure: projection.pressure,
                time: state.time + dt,
            },
            report: projection.report,
        })
    }
}

fn check_finite(velocity: &VelocityField, step: usize, stage: Stage) -> Result<()> {
    if velocity.is_finite() {
        Ok(())
    } else {
        Err(FluidError::NumericalInstability { step, stage })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use glam::DVec3;

    use crate::{boundary::BoundarySet, obstacle::ObstacleMask};

    use super::*;

    fn periodic_grid(n: usize) -> Grid {
        Grid::new(&[(0.0, 1.0), (0.0, 1.0)], &[n, n], BoundarySet::periodic()).unwrap()
    }

    #[test]
    fn uniform_flow_is_unchanged_by_diffusion_and_advection() {
        let grid = periodic_grid(8);
        let v = VelocityField::uniform(&grid, DVec3::new(0.4, -0.3, 0.0));
        assert_eq!(diffuse(&grid, &v, 0.1, 0.01), v);

        let advected = advect(&grid, &v, 0.7);
        for (a, b) in v.components().iter().zip(advected.components()) {
            assert!(a.iter().zip(b.iter()).all(|(a, b)| (a - b).abs() < 1e-12));
        }
    }

    #[test]
    fn diffusion_damps_a_shear_wave() {
        let grid = periodic_grid(16);
        let tau = std::f64::consts::TAU;
        let v = VelocityField::from_fn(&grid, |axis, p| if axis == 0 { (tau * p.y).sin() } else { 0.0 });

        let diffused = diffuse(&grid, &v, 0.01, 0.1);

        assert!(diffused.kinetic_energy(&grid) < v.kinetic_energy(&grid));
        assert!(diffused.component(1).iter().all(|&x| x == 0.0));
    }

    #[test]
    fn advection_translates_along_the_flow() {
        // Uniform u = 1 carries a y-velocity profile that varies in x by one cell per step.
        let grid = Grid::new(&[(0.0, 1.0), (0.0, 1.0)], &[10, 10], BoundarySet::periodic()).unwrap();
        let h = grid.spacing.x;
        let v = VelocityField::from_fn(&grid, |axis, p| {
            if axis == 0 { 1.0 } else { (std::f64::consts::TAU * p.x).sin() }
        });

        let advected = advect(&grid, &v, h);

        for ((i, j, k), &value) in advected.component(1).indexed_iter() {
            let expected = v.component(1)[((i + grid.nx - 1) % grid.nx, j, k)];
            assert!((value - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn advance_reports_projection_diagnostics() {
        let grid = Arc::new(periodic_grid(16));
        let mask = Arc::new(ObstacleMask::empty(&grid));
        let op = StepOperator::new(Projector::new(grid.clone(), mask), SolverConfig::default());

        let state = SimulationState {
            velocity: VelocityField::uniform(&grid, DVec3::new(1.0, 0.5, 0.0)),
            pressure: Array3::zeros(grid.cell_shape()),
            time: 0.0,
        };

        let next = op.advance(0, &state, 0.05, 0.001).unwrap();
        assert!(next.report.converged);
        assert!((next.state.time - 0.05).abs() < 1e-15);
        assert!(next.state.velocity.max_divergence(&grid, &ObstacleMask::empty(&grid)) < 1e-6);
    }

    #[test]
    fn runaway_flow_advects_from_the_boundary() {
        let grid = Grid::new(&[(0.0, 4.0), (0.0, 2.0)], &[8, 4], BoundarySet::wake(DVec3::X)).unwrap();
        let v = VelocityField::uniform(&grid, DVec3::new(-1e30, 0.0, 0.0));

        // Every departure point lies far beyond the outflow face.
        let advected = advect(&grid, &v, 1.0);

        for ((i, _, _), &u) in advected.component(0).indexed_iter() {
            assert_eq!(u, if i == 0 { 1.0 } else { -1e30 });
        }
        assert!(advected.component(1).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn unstable_diffusion_is_detected() {
        let grid = Arc::new(periodic_grid(8));
        let mask = Arc::new(ObstacleMask::empty(&grid));
        let op = StepOperator::new(Projector::new(grid.clone(), mask), SolverConfig::default());

        let state = SimulationState {
            velocity: VelocityField::from_fn(&grid, |_, _| f64::MAX),
            pressure: Array3::zeros(grid.cell_shape()),
            time: 0.0,
        };

        let err = op.advance(3, &state, 1.0, 1e6).unwrap_err();
        assert_eq!(err, FluidError::NumericalInstability { step: 3, stage: Stage::Diffusion });
    }
}
