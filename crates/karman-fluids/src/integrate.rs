use std::{ops::ControlFlow, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    config::{RunMetadata, SimulationConfig},
    error::{FluidError, Result, RunError, Stage},
    field::VelocityField,
    grid::Grid,
    obstacle::{Obstacle, ObstacleMask},
    pressure::{ProjectionReport, Projector},
    step::{SimulationState, StepOperator},
};

/// What a run does when a pressure solve exhausts its iteration budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConvergencePolicy {
    /// Log a warning and continue with the best available correction.
    #[default]
    Lenient,
    /// Abort the run.
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    /// Trajectory index of the state this step produced.
    pub step: usize,
    /// Total number of steps in the run.
    pub total_steps: usize,
    pub time: f64,
    pub projection: ProjectionReport,
}

/// The time-ordered states of a completed run.
#[derive(Debug, Clone)]
pub struct Trajectory {
    grid: Arc<Grid>,
    mask: Arc<ObstacleMask>,
    states: Vec<SimulationState>,
    reports: Vec<StepReport>,
    bootstrap: ProjectionReport,
    metadata: RunMetadata,
}

impl Trajectory {
    #[inline]
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    #[inline]
    pub fn mask(&self) -> &ObstacleMask {
        &self.mask
    }

    #[inline]
    pub fn states(&self) -> &[SimulationState] {
        &self.states
    }

    /// Diagnostics of every step's pressure solve, in step order.
    #[inline]
    pub fn reports(&self) -> &[StepReport] {
        &self.reports
    }

    /// Diagnostics of the projection that produced the initial state.
    #[inline]
    pub fn bootstrap_report(&self) -> &ProjectionReport {
        &self.bootstrap
    }

    #[inline]
    pub fn metadata(&self) -> &RunMetadata {
        &self.metadata
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// A configured run: validated parameters, the grid, the obstacle mask and the step operator.
#[derive(Debug, Clone)]
pub struct Simulation {
    config: SimulationConfig,
    grid: Arc<Grid>,
    mask: Arc<ObstacleMask>,
    operator: StepOperator,
    metadata: RunMetadata,
}

impl Simulation {
    /// Validates `config` and precomputes everything that stays fixed during the run.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        let grid = Arc::new(config.build_grid()?);

        let mask = match &config.cylinder {
            Some(cylinder) => cylinder.mask(&grid),
            None => ObstacleMask::empty(&grid),
        };
        let mask = Arc::new(mask);

        if mask.fluid_count() == 0 {
            return Err(FluidError::config("the obstacle covers every cell of the domain"));
        }

        let projector = Projector::new(grid.clone(), mask.clone());
        let operator = StepOperator::new(projector, config.solver);
        let metadata = config.metadata();

        Ok(Self {
            config,
            grid,
            mask,
            operator,
            metadata,
        })
    }

    #[inline]
    pub fn config(&self) -> &SimulationConfig {
        &self.config
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
    pub fn metadata(&self) -> &RunMetadata {
        &self.metadata
    }

    /// Projects the placeholder initial velocity, from a zero pressure guess, into the first
    /// divergence-free state.
    pub fn bootstrap(&self) -> Result<(SimulationState, ProjectionReport)> {
        let grid = &*self.grid;
        let candidate = VelocityField::uniform(grid, self.config.initial_velocity);

        let projection = self.operator.projector().project(&candidate, None, &self.config.solver);

        if !projection.velocity.is_finite() {
            return Err(FluidError::NumericalInstability { step: 0, stage: Stage::Bootstrap });
        }

        self.apply_policy(&projection.report, 0, Stage::Bootstrap)?;

        let state = SimulationState {
            velocity: projection.velocity,
            pressure: projection.pressure,
            time: 0.0,
        };

        Ok((state, projection.report))
    }

    pub fn run(&self) -> std::result::Result<Trajectory, RunError> {
        self.run_with(|_| ControlFlow::Continue(()))
    }

    /// Runs every step, handing each step's report to `observer`. Returning
    /// [`ControlFlow::Break`] cancels the run.
    pub fn run_with<F>(&self, mut observer: F) -> std::result::Result<Trajectory, RunError>
    where
        F: FnMut(&StepReport) -> ControlFlow<()>,
    {
        let steps = self.config.steps;
        let dt = self.config.dt;
        let viscosity = self.config.viscosity;

        info!(
            steps,
            dt,
            viscosity,
            reynolds_number = ?self.metadata.reynolds_number,
            fluid_cells = self.mask.fluid_count(),
            "starting run"
        );

        let fail = |completed_steps: usize| move |source: FluidError| RunError { completed_steps, source };

        let (initial, bootstrap) = self.bootstrap().map_err(fail(0))?;
        debug!(iterations = bootstrap.iterations, residual = bootstrap.residual, "bootstrap projection");

        let mut states: Vec<SimulationState> = Vec::with_capacity(steps);
        let mut reports = Vec::with_capacity(steps);

        for step in 0..steps {
            let current = states.last().unwrap_or(&initial);

            let advanced = self.operator.advance(step, current, dt, viscosity).map_err(fail(step))?;
            self.apply_policy(&advanced.report, step, Stage::Projection).map_err(fail(step))?;

            debug!(
                step,
                iterations = advanced.report.iterations,
                residual = advanced.report.residual,
                warm_started = advanced.report.warm_started,
                "step finished"
            );

            let report = StepReport {
                step,
                total_steps: steps,
                time: advanced.state.time,
                projection: advanced.report,
            };

            states.push(advanced.state);
            reports.push(report);

            if observer(&report).is_break() {
                info!(step, "run cancelled");
                return Err(RunError { completed_steps: step + 1, source: FluidError::Cancelled });
            }
        }

        let total_iterations: usize = reports.iter().map(|r| r.projection.iterations).sum();
        let unconverged = reports.iter().filter(|r| !r.projection.converged).count();
        info!(steps, total_iterations, unconverged, "run finished");

        Ok(Trajectory {
            grid: self.grid.clone(),
            mask: self.mask.clone(),
            states,
            reports,
            bootstrap,
            metadata: self.metadata.clone(),
        })
    }

    fn apply_policy(&self, report: &ProjectionReport, step: usize, stage: Stage) -> Result<()> {
        match self.config.policy {
            ConvergencePolicy::Strict => report.check(step, stage),
            ConvergencePolicy::Lenient => {
                if !report.converged {
                    warn!(
                        step,
                        %stage,
                        residual = report.residual,
                        tolerance = report.threshold,
                        iterations = report.iterations,
                        "pressure solve did not converge, continuing with the best correction"
                    );
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::DVec3;

    use crate::{boundary::BoundarySet, obstacle::cylinder::Cylinder, pressure::SolverConfig};

    use super::*;

    fn small_config() -> SimulationConfig {
        SimulationConfig {
            extents: vec![(0.0, 8.0), (0.0, 4.0)],
            resolution: vec![32, 16],
            cylinder: Some(Cylinder::new(DVec3::new(2.0, 2.0, 0.0), 0.5, 2)),
            steps: 5,
            dt: 0.1,
            ..Default::default()
        }
    }

    #[test]
    fn trajectory_has_one_state_per_step() {
        let trajectory = Simulation::new(small_config()).unwrap().run().unwrap();
        assert_eq!(trajectory.len(), 5);
        assert_eq!(trajectory.reports().len(), 5);

        for (n, (state, report)) in trajectory.states().iter().zip(trajectory.reports()).enumerate() {
            assert_eq!(report.step, n);
            assert!((state.time - 0.1 * (n + 1) as f64).abs() < 1e-12);
        }
    }

    #[test]
    fn observer_can_cancel() {
        let simulation = Simulation::new(small_config()).unwrap();
        let mut seen = Vec::new();

        let err = simulation
            .run_with(|report| {
                seen.push(report.step);
                if report.step == 2 { ControlFlow::Break(()) } else { ControlFlow::Continue(()) }
            })
            .unwrap_err();

        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(err.source, FluidError::Cancelled);
        assert_eq!(err.last_completed_step(), Some(2));
    }

    #[test]
    fn lenient_policy_continues_past_unconverged_solves() {
        let config = SimulationConfig {
            solver: SolverConfig { tolerance: 1e-12, absolute_tolerance: 0.0, max_iterations: 1 },
            steps: 2,
            ..small_config()
        };

        let trajectory = Simulation::new(config).unwrap().run().unwrap();
        assert_eq!(trajectory.len(), 2);
        assert!(!trajectory.bootstrap_report().converged);
        assert!(trajectory.reports().iter().all(|r| r.projection.iterations == 1));
    }

    #[test]
    fn obstacle_covering_the_domain_is_rejected() {
        let config = SimulationConfig {
            extents: vec![(0.0, 1.0), (0.0, 1.0)],
            resolution: vec![2, 2],
            boundaries: Some(BoundarySet::periodic()),
            inflow: DVec3::ZERO,
            cylinder: Some(Cylinder::new(DVec3::new(0.5, 0.5, 0.0), 0.5, 2)),
            ..Default::default()
        };
        assert!(matches!(Simulation::new(config), Err(FluidError::Configuration(_))));
    }
}
