use std::sync::Arc;

use ndarray::Array3;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{
    boundary::Boundary,
    error::{FluidError, Result, Stage},
    field::VelocityField,
    grid::Grid,
    obstacle::ObstacleMask,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Relative tolerance on the max-norm residual, scaled by the initial divergence.
    pub tolerance: f64,
    /// Residual floor below which the solve always counts as converged.
    pub absolute_tolerance: f64,
    pub max_iterations: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-5,
            absolute_tolerance: 1e-6,
            max_iterations: 10_000,
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(FluidError::config(format!("solver tolerance must be positive, got {}", self.tolerance)));
        }
        if !self.absolute_tolerance.is_finite() || self.absolute_tolerance < 0.0 {
            return Err(FluidError::config(format!(
                "absolute tolerance must be non-negative, got {}",
                self.absolute_tolerance,
            )));
        }
        if self.max_iterations == 0 {
            return Err(FluidError::config("solver needs at least one iteration"));
        }
        Ok(())
    }
}

/// Convergence diagnostics of one projection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionReport {
    pub iterations: usize,
    /// Largest absolute divergence left in a fluid cell.
    pub residual: f64,
    /// The residual the solve had to reach.
    pub threshold: f64,
    pub converged: bool,
    /// Whether the previous pressure was used as the initial guess.
    pub warm_started: bool,
}

impl ProjectionReport {
    /// Turns a non-converged report into a [`FluidError::Convergence`].
    pub fn check(&self, step: usize, stage: Stage) -> Result<()> {
        if self.converged {
            Ok(())
        } else {
            Err(FluidError::Convergence {
                step,
                stage,
                iterations: self.iterations,
                residual: self.residual,
                tolerance: self.threshold,
            })
        }
    }
}

#[derive(Debug, Clone)]
pub struct Projection {
    pub velocity: VelocityField,
    pub pressure: Array3<f64>,
    pub report: ProjectionReport,
}

/// The discrete negative Laplacian over fluid cells, assembled once per configuration.
///
/// Rows are fluid cells. Faces that touch a solid cell or carry a fixed velocity contribute
/// nothing (zero pressure gradient); zero-gradient boundary faces hold pressure at zero just
/// outside the domain.
#[derive(Debug, Clone)]
pub struct PoissonOperator {
    /// Row of every cell, `None` for solid cells.
    row_of: Array3<Option<usize>>,
    /// Cell of every row.
    cells: Vec<(usize, usize, usize)>,
    diag: Vec<f64>,
    inv_diag: Vec<f64>,
    /// Start of each row's neighbors in `neighbors`/`weights`. Has `rows + 1` entries.
    offsets: Vec<usize>,
    neighbors: Vec<usize>,
    weights: Vec<f64>,
    /// No pressure-Dirichlet face anywhere: constants are in the null space.
    singular: bool,
}

impl PoissonOperator {
    pub fn new(grid: &Grid, mask: &ObstacleMask) -> Self {
        let mut row_of = Array3::from_elem(grid.cell_shape(), None);
        let mut cells = Vec::with_capacity(mask.fluid_count());

        for ((i, j, k), &solid) in mask.solid().indexed_iter() {
            if !solid {
                row_of[(i, j, k)] = Some(cells.len());
                cells.push((i, j, k));
            }
        }

        let mut diag = Vec::with_capacity(cells.len());
        let mut offsets = Vec::with_capacity(cells.len() + 1);
        let mut neighbors = Vec::new();
        let mut weights = Vec::new();
        let mut singular = true;

        offsets.push(0);

        for &(i, j, k) in cells.iter() {
            let mut d = 0.0;

            for axis in 0..grid.dim() {
                let n = grid.resolution(axis);
                let periodic = grid.boundaries.is_periodic(axis);
                let w = grid.inv_spacing[axis] * grid.inv_spacing[axis];

                if periodic && n == 1 {
                    continue;
                }

                for step in [-1isize, 1] {
                    let mut nb = [i as isize, j as isize, k as isize];
                    nb[axis] += step;

                    if periodic {
                        nb[axis] = nb[axis].rem_euclid(n as isize);
                    } else if nb[axis] < 0 || nb[axis] >= n as isize {
                        let bounds = grid.boundaries.axis(axis);
                        let face = if step < 0 { bounds.lower } else { bounds.upper };
                        if face == Boundary::ZeroGradient {
                            d += w;
                            singular = false;
                        }
                        continue;
                    }

                    if let Some(row) = row_of[(nb[0] as usize, nb[1] as usize, nb[2] as usize)] {
                        d += w;
                        neighbors.push(row);
                        weights.push(w);
                    }
                }
            }

            diag.push(d);
            offsets.push(neighbors.len());
        }

        let inv_diag = diag.iter().map(|&d| if d > 0.0 { d.recip() } else { 0.0 }).collect();

        Self {
            row_of,
            cells,
            diag,
            inv_diag,
            offsets,
            neighbors,
            weights,
            singular,
        }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn is_singular(&self) -> bool {
        self.singular
    }

    /// `out = A x`
    pub fn apply(&self, x: &[f64], out: &mut [f64]) {
        for (row, o) in out.iter_mut().enumerate() {
            let mut sum = self.diag[row] * x[row];
            for n in self.offsets[row]..self.offsets[row + 1] {
                sum -= self.weights[n] * x[self.neighbors[n]];
            }
            *o = sum;
        }
    }

    /// Pressure gradient across the face of component `axis` at `(i, j, k)`, or `None` if the
    /// face velocity is fixed.
    fn face_gradient(&self, grid: &Grid, axis: usize, (i, j, k): (usize, usize, usize), p: &[f64]) -> Option<f64> {
        let n = grid.resolution(axis);
        let periodic = grid.boundaries.is_periodic(axis);
        if periodic && n == 1 {
            return None;
        }

        let face = [i, j, k][axis];
        let bounds = grid.boundaries.axis(axis);

        let cell_pressure = |index: usize| {
            let mut c = [i, j, k];
            c[axis] = index;
            self.row_of[c].map(|row| p[row])
        };
        let ghost_pressure = |boundary: Boundary| match boundary {
            Boundary::ZeroGradient => Some(0.0),
            _ => None,
        };

        let lo = if face == 0 {
            if periodic { cell_pressure(n - 1) } else { ghost_pressure(bounds.lower) }
        } else {
            cell_pressure(face - 1)
        };
        let hi = if face == n { ghost_pressure(bounds.upper) } else { cell_pressure(face) };

        Some((hi? - lo?) * grid.inv_spacing[axis])
    }
}

/// Removes the divergent part of velocity fields on a fixed grid and obstacle.
#[derive(Debug, Clone)]
pub struct Projector {
    grid: Arc<Grid>,
    mask: Arc<ObstacleMask>,
    operator: PoissonOperator,
}

impl Projector {
    pub fn new(grid: Arc<Grid>, mask: Arc<ObstacleMask>) -> Self {
        let operator = PoissonOperator::new(&grid, &mask);
        Self { grid, mask, operator }
    }

    #[inline]
    pub fn grid(&self) -> &Arc<Grid> {
        &self.grid
    }

    #[inline]
    pub fn mask(&self) -> &Arc<ObstacleMask> {
        &self.mask
    }

    #[inline]
    pub fn operator(&self) -> &PoissonOperator {
        &self.operator
    }

    /// Projects `candidate` onto the divergence-free fields that satisfy the boundary and
    /// obstacle constraints.
    ///
    /// The returned pressure `p` satisfies `velocity = candidate - grad p` on every free face.
    /// `warm_start` is used as the initial guess unless zero is already closer. A solve that
    /// runs out of iterations still returns its best correction; check
    /// [`ProjectionReport::converged`].
    pub fn project(&self, candidate: &VelocityField, warm_start: Option<&Array3<f64>>, config: &SolverConfig) -> Projection {
        let grid = &*self.grid;
        let op = &self.operator;

        let mut velocity = candidate.clone();
        velocity.apply_boundaries(grid);
        velocity.apply_obstacle(grid, &self.mask);

        let mut b: Vec<f64> = op.cells.iter().map(|&(i, j, k)| -velocity.cell_divergence(grid, i, j, k)).collect();

        if op.singular && !b.is_empty() {
            let mean = b.iter().sum::<f64>() / b.len() as f64;
            b.iter_mut().for_each(|v| *v -= mean);
        }

        let mut x = match warm_start {
            Some(p) => op.cells.iter().map(|&c| p[c]).collect(),
            None => vec![0.0; op.rows()],
        };

        let stats = solve_pcg(op, &b, &mut x, config);

        for axis in 0..velocity.dim() {
            let comp = velocity.component_mut(axis);
            for (idx, u) in comp.indexed_iter_mut() {
                if let Some(g) = op.face_gradient(grid, axis, idx, &x) {
                    *u -= g;
                }
            }
        }

        let mut pressure = Array3::zeros(grid.cell_shape());
        for (&c, &p) in op.cells.iter().zip(x.iter()) {
            pressure[c] = p;
        }

        let residual = velocity.max_divergence(grid, &self.mask);

        trace!(
            iterations = stats.iterations,
            residual,
            converged = stats.converged,
            "pressure solve finished"
        );

        Projection {
            velocity,
            pressure,
            report: ProjectionReport {
                iterations: stats.iterations,
                residual,
                threshold: stats.threshold,
                converged: stats.converged,
                warm_started: stats.warm_started,
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SolveStats {
    iterations: usize,
    threshold: f64,
    converged: bool,
    warm_started: bool,
}

/// Jacobi-preconditioned conjugate gradient on `A x = b`, starting from `x`.
fn solve_pcg(op: &PoissonOperator, b: &[f64], x: &mut [f64], config: &SolverConfig) -> SolveStats {
    let n = op.rows();
    let threshold = f64::max(config.tolerance * max_norm(b), config.absolute_tolerance);

    let mut r = vec![0.0; n];
    op.apply(x, &mut r);
    r.iter_mut().zip(b).for_each(|(r, &b)| *r = b - *r);

    let mut warm_started = true;
    if max_norm(&r) >= max_norm(b) {
        x.fill(0.0);
        r.copy_from_slice(b);
        warm_started = false;
    }

    if max_norm(&r) <= threshold {
        return SolveStats { iterations: 0, threshold, converged: true, warm_started };
    }

    let mut z: Vec<f64> = r.iter().zip(&op.inv_diag).map(|(r, d)| r * d).collect();
    let mut p = z.clone();
    let mut ap = vec![0.0; n];
    let mut rz_old = dot(&r, &z);

    for iter in 1..=config.max_iterations {
        op.apply(&p, &mut ap);
        let denom = dot(&p, &ap);
        if denom.abs() < 1e-300 {
            return SolveStats { iterations: iter, threshold, converged: false, warm_started };
        }

        let alpha = rz_old / denom;
        x.iter_mut().zip(&p).for_each(|(x, p)| *x += alpha * p);
        r.iter_mut().zip(&ap).for_each(|(r, ap)| *r -= alpha * ap);

        if max_norm(&r) <= threshold {
            return SolveStats { iterations: iter, threshold, converged: true, warm_started };
        }

        z.iter_mut().zip(r.iter().zip(&op.inv_diag)).for_each(|(z, (r, d))| *z = r * d);
        let rz_new = dot(&r, &z);
        let beta = rz_new / rz_old;
        p.iter_mut().zip(&z).for_each(|(p, z)| *p = z + beta * *p);
        rz_old = rz_new;
    }

    SolveStats { iterations: config.max_iterations, threshold, converged: false, warm_started }
}

#[inline]
fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(a, b)| a * b).sum()
}

#[inline]
fn max_norm(a: &[f64]) -> f64 {
    a.iter().fold(0.0, |m, v| m.max(v.abs()))
}

#[cfg(test)]
mod tests {
    use glam::DVec3;

    use crate::{boundary::BoundarySet, obstacle::{cylinder::Cylinder, Obstacle}};

    use super::*;

    fn wake_projector(n: usize) -> Projector {
        let grid = Grid::new(&[(0.0, 8.0), (0.0, 4.0)], &[2 * n, n], BoundarySet::wake(DVec3::X)).unwrap();
        let mask = Cylinder::new(DVec3::new(2.0, 2.0, 0.0), 0.5, 2).mask(&grid);
        Projector::new(Arc::new(grid), Arc::new(mask))
    }

    #[test]
    fn operator_is_symmetric() {
        let projector = wake_projector(8);
        let op = projector.operator();
        assert!(!op.is_singular());

        let n = op.rows();
        let x: Vec<f64> = (0..n).map(|i| (i as f64 * 0.37).sin()).collect();
        let y: Vec<f64> = (0..n).map(|i| (i as f64 * 0.11).cos()).collect();
        let mut ax = vec![0.0; n];
        let mut ay = vec![0.0; n];
        op.apply(&x, &mut ax);
        op.apply(&y, &mut ay);

        assert!((dot(&ax, &y) - dot(&x, &ay)).abs() < 1e-9);
    }

    #[test]
    fn projection_removes_divergence() {
        let projector = wake_projector(16);
        let grid = projector.grid().clone();
        let config = SolverConfig { tolerance: 1e-8, absolute_tolerance: 1e-10, ..Default::default() };

        let candidate = VelocityField::from_fn(&grid, |axis, p| {
            if axis == 0 { 1.0 + 0.3 * (p.y * 1.3).sin() * p.x.cos() } else { 0.2 * (p.x * 0.7).cos() }
        });
        let before = {
            let mut v = candidate.clone();
            v.apply_boundaries(&grid);
            v.apply_obstacle(&grid, projector.mask());
            v.max_divergence(&grid, projector.mask())
        };

        let projection = projector.project(&candidate, None, &config);

        assert!(projection.report.converged);
        assert!(before > 1e-2);
        assert!(projection.report.residual <= projection.report.threshold * 1.0001);
        assert!(projection.velocity.max_divergence(&grid, projector.mask()) < 1e-6);
    }

    #[test]
    fn projection_keeps_obstacle_faces_at_rest() {
        let projector = wake_projector(16);
        let grid = projector.grid().clone();
        let candidate = VelocityField::uniform(&grid, DVec3::X);
        let projection = projector.project(&candidate, None, &SolverConfig::default());
        let v = &projection.velocity;

        for ((i, j, k), &solid) in projector.mask().solid().indexed_iter() {
            if solid {
                assert_eq!(v.component(0)[(i, j, k)], 0.0);
                assert_eq!(v.component(0)[(i + 1, j, k)], 0.0);
                assert_eq!(v.component(1)[(i, j, k)], 0.0);
                assert_eq!(v.component(1)[(i, (j + 1) % grid.ny, k)], 0.0);
                assert_eq!(projection.pressure[(i, j, k)], 0.0);
            }
        }
    }

    #[test]
    fn projecting_twice_is_a_no_op() {
        let projector = wake_projector(16);
        let grid = projector.grid().clone();
        let tight = SolverConfig { tolerance: 1e-10, absolute_tolerance: 1e-8, ..Default::default() };
        let config = SolverConfig::default();

        let first = projector.project(&VelocityField::uniform(&grid, DVec3::X), None, &tight);
        assert!(first.report.converged);

        let cold = projector.project(&first.velocity, None, &config);
        let warm = projector.project(&first.velocity, Some(&first.pressure), &config);

        for second in [&cold, &warm] {
            assert!(second.report.iterations <= 1);
            assert!(second.report.converged);
            for (a, b) in first.velocity.components().iter().zip(second.velocity.components()) {
                let diff = a.iter().zip(b.iter()).fold(0.0f64, |m, (a, b)| m.max((a - b).abs()));
                assert!(diff <= config.tolerance, "field changed by {diff}");
            }
        }
    }

    #[test]
    fn iteration_budget_is_reported() {
        let projector = wake_projector(16);
        let grid = projector.grid().clone();
        let config = SolverConfig { tolerance: 1e-12, absolute_tolerance: 0.0, max_iterations: 1 };

        let projection = projector.project(&VelocityField::uniform(&grid, DVec3::X), None, &config);

        assert!(!projection.report.converged);
        assert_eq!(projection.report.iterations, 1);
        assert!(matches!(
            projection.report.check(0, Stage::Bootstrap),
            Err(FluidError::Convergence { step: 0, stage: Stage::Bootstrap, .. })
        ));
    }

    #[test]
    fn periodic_domain_without_obstacle_is_singular() {
        let grid = Grid::new(&[(0.0, 1.0), (0.0, 1.0)], &[8, 8], BoundarySet::periodic()).unwrap();
        let mask = ObstacleMask::empty(&grid);
        let projector = Projector::new(Arc::new(grid.clone()), Arc::new(mask));
        assert!(projector.operator().is_singular());

        let candidate = VelocityField::from_fn(&grid, |axis, p| {
            let t = std::f64::consts::TAU;
            if axis == 0 { (t * p.x).sin() } else { (t * p.y).cos() }
        });
        let projection = projector.project(&candidate, None, &SolverConfig::default());
        assert!(projection.report.converged);
        assert!(projection.velocity.max_divergence(&grid, projector.mask()) <= projection.report.threshold * 1.0001);
    }
}
