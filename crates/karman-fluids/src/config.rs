use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::{
    boundary::{Boundary, BoundarySet},
    error::{FluidError, Result},
    grid::Grid,
    integrate::ConvergencePolicy,
    obstacle::cylinder::Cylinder,
    pressure::SolverConfig,
};

/// Everything needed to set up and run one simulation. Threaded explicitly through every call;
/// nothing is read from global state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Velocity imposed on the `x-` face.
    pub inflow: DVec3,
    /// Kinematic viscosity.
    pub viscosity: f64,
    /// `(min, max)` per axis. Two entries for a 2D run, three for 3D.
    pub extents: Vec<(f64, f64)>,
    /// Cells per axis, one entry per extent.
    pub resolution: Vec<usize>,
    pub cylinder: Option<Cylinder>,
    /// Overrides the default inflow/outflow/periodic layout. A fixed `x-` face must then carry
    /// `inflow`, and any other `x-` face needs a zero `inflow`.
    pub boundaries: Option<BoundarySet>,
    /// Number of states in the trajectory.
    pub steps: usize,
    /// Time step size.
    pub dt: f64,
    /// Velocity the bootstrap projection starts from.
    pub initial_velocity: DVec3,
    pub solver: SolverConfig,
    pub policy: ConvergencePolicy,
    /// Index along `z` of the extracted cross-section. Defaults to the middle layer.
    pub slice_index: Option<usize>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            inflow: DVec3::X,
            viscosity: 0.01,
            extents: vec![(0.0, 20.0), (0.0, 10.0)],
            resolution: vec![64, 64],
            cylinder: Some(Cylinder::new(DVec3::new(3.0, 5.0, 0.0), 0.5, 2)),
            boundaries: None,
            steps: 50,
            dt: 0.2,
            initial_velocity: DVec3::X,
            solver: SolverConfig::default(),
            policy: ConvergencePolicy::default(),
            slice_index: None,
        }
    }
}

impl SimulationConfig {
    #[inline]
    pub fn inflow_speed(&self) -> f64 {
        self.inflow.length()
    }

    /// Sets the viscosity from a Reynolds number: `ν = |inflow| · D / Re`.
    pub fn with_reynolds(mut self, reynolds_number: f64) -> Result<Self> {
        if !reynolds_number.is_finite() || reynolds_number <= 0.0 {
            return Err(FluidError::config(format!("Reynolds number must be positive, got {reynolds_number}")));
        }

        let cylinder = self.cylinder.ok_or_else(|| {
            FluidError::config("a Reynolds number needs a cylinder to define the length scale")
        })?;

        self.viscosity = self.inflow_speed() * cylinder.diameter() / reynolds_number;
        Ok(self)
    }

    /// `|inflow| · D / ν`. `None` without an obstacle or for an inviscid run.
    pub fn reynolds_number(&self) -> Option<f64> {
        let cylinder = self.cylinder?;
        (self.viscosity > 0.0).then(|| self.inflow_speed() * cylinder.diameter() / self.viscosity)
    }

    pub fn boundary_set(&self) -> BoundarySet {
        self.boundaries.unwrap_or_else(|| BoundarySet::wake(self.inflow))
    }

    /// Validates the numeric parameters and builds the grid.
    pub fn build_grid(&self) -> Result<Grid> {
        if !self.inflow.is_finite() || !self.initial_velocity.is_finite() {
            return Err(FluidError::config("inflow and initial velocity must be finite"));
        }

        if !self.viscosity.is_finite() || self.viscosity < 0.0 {
            return Err(FluidError::config(format!("viscosity must be non-negative, got {}", self.viscosity)));
        }

        if !self.dt.is_finite() || self.dt <= 0.0 {
            return Err(FluidError::config(format!("time step must be positive, got {}", self.dt)));
        }

        if self.steps == 0 {
            return Err(FluidError::config("step count must be at least 1"));
        }

        self.solver.validate()?;
        self.check_inflow_face()?;

        let grid = Grid::new(&self.extents, &self.resolution, self.boundary_set())?;

        if let Some(cylinder) = &self.cylinder {
            cylinder.validate(&grid)?;
        }

        if let Some(slice) = self.slice_index {
            if slice >= grid.nz {
                return Err(FluidError::config(format!("slice index {slice} is outside 0..{}", grid.nz)));
            }
        }

        Ok(grid)
    }

    fn check_inflow_face(&self) -> Result<()> {
        let Some(boundaries) = &self.boundaries else {
            return Ok(());
        };

        match boundaries.axis(0).lower {
            Boundary::Fixed(v) if v != self.inflow => Err(FluidError::config(format!(
                "x- face is fixed at {v} but the inflow is {}",
                self.inflow,
            ))),
            Boundary::Fixed(_) => Ok(()),
            _ if self.inflow != DVec3::ZERO => Err(FluidError::config(format!(
                "inflow {} has no fixed x- face to enter through",
                self.inflow,
            ))),
            _ => Ok(()),
        }
    }

    pub fn metadata(&self) -> RunMetadata {
        let axis = |i: usize| self.extents.get(i).copied();
        let cells = |i: usize| self.resolution.get(i).copied();

        RunMetadata {
            inflow_velocity: self.inflow_speed(),
            viscosity: self.viscosity,
            domain_size_x: axis(0).unwrap_or_default(),
            domain_size_y: axis(1).unwrap_or_default(),
            domain_size_z: axis(2),
            grid_x: cells(0).unwrap_or_default(),
            grid_y: cells(1).unwrap_or_default(),
            grid_z: cells(2),
            cylinder_radius: self.cylinder.map(|c| c.radius),
            cylinder_x: self.cylinder.map(|c| c.center.x),
            cylinder_y: self.cylinder.map(|c| c.center.y),
            time_steps: self.steps,
            dt_step: self.dt,
            reynolds_number: self.reynolds_number(),
        }
    }
}

/// Scalar description of a run, attached to its extracted output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Inflow speed `|inflow|`.
    pub inflow_velocity: f64,
    pub viscosity: f64,
    pub domain_size_x: (f64, f64),
    pub domain_size_y: (f64, f64),
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub domain_size_z: Option<(f64, f64)>,
    pub grid_x: usize,
    pub grid_y: usize,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub grid_z: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cylinder_radius: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cylinder_x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cylinder_y: Option<f64>,
    pub time_steps: usize,
    pub dt_step: f64,
    /// Absent without a cylinder and for inviscid runs.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reynolds_number: Option<f64>,
}
