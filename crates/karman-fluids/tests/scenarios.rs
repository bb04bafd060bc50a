use std::{f64::consts::TAU, sync::Arc};

use glam::DVec3;
use karman_fluids::{
    boundary::BoundarySet,
    config::SimulationConfig,
    error::{FluidError, Stage},
    extract::extract,
    field::VelocityField,
    grid::Grid,
    integrate::{ConvergencePolicy, Simulation},
    obstacle::{cylinder::Cylinder, ObstacleMask},
    pressure::{Projector, SolverConfig},
    step::{SimulationState, StepOperator},
};
use ndarray::{Array3, Axis};

fn small_wake(steps: usize) -> SimulationConfig {
    SimulationConfig {
        extents: vec![(0.0, 8.0), (0.0, 4.0)],
        resolution: vec![32, 16],
        cylinder: Some(Cylinder::new(DVec3::new(2.0, 2.0, 0.0), 0.5, 2)),
        steps,
        dt: 0.1,
        ..Default::default()
    }
}

#[test]
fn reference_wake_stays_divergence_free() {
    let config = SimulationConfig {
        solver: SolverConfig { tolerance: 1e-6, ..Default::default() },
        policy: ConvergencePolicy::Strict,
        ..Default::default()
    };

    let simulation = Simulation::new(config).unwrap();
    let trajectory = simulation.run().unwrap();
    let grid = trajectory.grid();
    let mask = trajectory.mask();

    assert_eq!(trajectory.len(), 50);

    for (state, report) in trajectory.states().iter().zip(trajectory.reports()) {
        assert!(report.projection.converged);
        let div = state.velocity.max_divergence(grid, mask);
        assert!(div <= 1e-4, "divergence {div} at step {}", report.step);

        for ((i, j, k), &solid) in mask.solid().indexed_iter() {
            if solid {
                assert_eq!(state.velocity.component(0)[(i, j, k)], 0.0);
                assert_eq!(state.velocity.component(0)[(i + 1, j, k)], 0.0);
                assert_eq!(state.velocity.component(1)[(i, j, k)], 0.0);
                assert_eq!(state.velocity.component(1)[(i, (j + 1) % grid.ny, k)], 0.0);
            }
        }
    }
}

#[test]
fn reference_wake_with_default_solver_settings() {
    let trajectory = Simulation::new(SimulationConfig::default()).unwrap().run().unwrap();
    let grid = trajectory.grid();
    let mask = trajectory.mask();

    assert_eq!(trajectory.len(), 50);

    for (state, report) in trajectory.states().iter().zip(trajectory.reports()) {
        assert!(report.projection.converged, "step {} did not converge", report.step);
        let div = state.velocity.max_divergence(grid, mask);
        assert!(div <= 1e-4, "divergence {div} at step {}", report.step);
    }
}

#[test]
fn strict_policy_aborts_on_a_starved_solver() {
    let config = SimulationConfig {
        solver: SolverConfig { tolerance: 1e-12, max_iterations: 1, ..Default::default() },
        policy: ConvergencePolicy::Strict,
        ..Default::default()
    };

    let err = Simulation::new(config).unwrap().run().unwrap_err();

    assert_eq!(err.completed_steps, 0);
    assert_eq!(err.last_completed_step(), None);
    match err.source {
        FluidError::Convergence { step, stage, iterations, .. } => {
            assert_eq!(step, 0);
            assert_eq!(stage, Stage::Bootstrap);
            assert_eq!(iterations, 1);
        }
        other => panic!("expected a convergence error, got {other:?}"),
    }
}

#[test]
fn oversized_cylinder_is_rejected_before_stepping() {
    let config = SimulationConfig {
        cylinder: Some(Cylinder::new(DVec3::new(3.0, 5.0, 0.0), 6.0, 2)),
        ..Default::default()
    };

    assert!(matches!(Simulation::new(config), Err(FluidError::Configuration(_))));
}

#[test]
fn identical_configurations_give_identical_trajectories() {
    let a = Simulation::new(small_wake(4)).unwrap().run().unwrap();
    let b = Simulation::new(small_wake(4)).unwrap().run().unwrap();

    assert_eq!(a.states(), b.states());
    assert_eq!(a.reports(), b.reports());
}

fn inviscid_periodic_operator(n: usize) -> (Arc<Grid>, StepOperator) {
    let grid = Arc::new(Grid::new(&[(0.0, 1.0), (0.0, 1.0)], &[n, n], BoundarySet::periodic()).unwrap());
    let mask = Arc::new(ObstacleMask::empty(&grid));
    let operator = StepOperator::new(Projector::new(grid.clone(), mask), SolverConfig::default());
    (grid, operator)
}

#[test]
fn inviscid_shear_flow_keeps_its_energy() {
    let (grid, operator) = inviscid_periodic_operator(16);
    let mut state = SimulationState {
        velocity: VelocityField::from_fn(&grid, |axis, p| if axis == 0 { (TAU * p.y).sin() } else { 0.0 }),
        pressure: Array3::zeros(grid.cell_shape()),
        time: 0.0,
    };
    let initial = state.velocity.kinetic_energy(&grid);

    for step in 0..10 {
        state = operator.advance(step, &state, 0.05, 0.0).unwrap().state;
        let energy = state.velocity.kinetic_energy(&grid);
        assert!((energy - initial).abs() <= 1e-10 * initial, "energy {energy} drifted from {initial}");
    }
}

#[test]
fn inviscid_vortex_array_does_not_gain_energy() {
    let (grid, operator) = inviscid_periodic_operator(32);
    let mut state = SimulationState {
        velocity: VelocityField::from_fn(&grid, |axis, p| {
            let (x, y) = (TAU * p.x, TAU * p.y);
            if axis == 0 { x.sin() * y.cos() } else { -x.cos() * y.sin() }
        }),
        pressure: Array3::zeros(grid.cell_shape()),
        time: 0.0,
    };
    let mut previous = state.velocity.kinetic_energy(&grid);

    for step in 0..10 {
        let advanced = operator.advance(step, &state, 0.02, 0.0).unwrap();
        assert!(advanced.report.converged);
        state = advanced.state;

        let energy = state.velocity.kinetic_energy(&grid);
        assert!(energy <= previous * (1.0 + 1e-12), "energy rose from {previous} to {energy} at step {step}");
        previous = energy;
    }
}

#[test]
fn explicit_diffusion_beyond_its_stability_limit_ends_the_run() {
    let config = SimulationConfig { viscosity: 1e4, ..small_wake(200) };

    let err = Simulation::new(config).unwrap().run().unwrap_err();

    assert!(err.completed_steps < 200);
    match err.source {
        FluidError::NumericalInstability { step, .. } => assert_eq!(step, err.completed_steps),
        other => panic!("expected a numerical instability, got {other:?}"),
    }
}

#[test]
fn three_dimensional_run_is_sliced_to_the_plane() {
    let config = SimulationConfig {
        extents: vec![(0.0, 8.0), (0.0, 4.0), (0.0, 2.0)],
        resolution: vec![24, 12, 4],
        cylinder: Some(Cylinder::new(DVec3::new(2.0, 2.0, 1.0), 0.5, 2)),
        steps: 2,
        dt: 0.1,
        ..Default::default()
    };

    let trajectory = Simulation::new(config).unwrap().run().unwrap();
    let grid = trajectory.grid();
    assert_eq!(trajectory.states()[0].velocity.dim(), 3);
    assert_eq!(trajectory.metadata().grid_z, Some(4));

    let fields = extract(&trajectory, None).unwrap();
    assert_eq!(fields.slice_index, 2);

    for (_, array) in fields.datasets() {
        assert_eq!(array.dim(), (2, 24, 12));
    }

    for (t, state) in trajectory.states().iter().enumerate() {
        let u = state.velocity.cell_centered(grid, 0);
        assert_eq!(fields.velocity_x.index_axis(Axis(0), t), u.index_axis(Axis(2), 2));
        assert_eq!(fields.pressure.index_axis(Axis(0), t), state.pressure.index_axis(Axis(2), 2));
    }

    assert!(matches!(extract(&trajectory, Some(4)), Err(FluidError::Configuration(_))));
}

#[test]
fn metadata_reports_the_reynolds_number() {
    for re in [50.0, 100.0, 250.0] {
        let config = small_wake(1).with_reynolds(re).unwrap();
        let simulation = Simulation::new(config).unwrap();
        let meta = simulation.metadata();

        let radius = meta.cylinder_radius.unwrap();
        let expected = meta.inflow_velocity * 2.0 * radius / meta.viscosity;
        let reynolds_number = meta.reynolds_number.unwrap();
        assert!((reynolds_number - expected).abs() <= 1e-9 * expected);
        assert!((reynolds_number - re).abs() <= 1e-9 * re);
    }
}
