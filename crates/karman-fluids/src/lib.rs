pub mod boundary;
pub mod config;
pub mod error;
pub mod extract;
pub mod field;
pub mod grid;
pub mod integrate;
pub mod obstacle;
pub mod pressure;
pub mod step;

pub use config::{RunMetadata, SimulationConfig};
pub use error::{FluidError, RunError, Stage};
pub use extract::{extract, ExtractedFields};
pub use integrate::{ConvergencePolicy, Simulation, StepReport, Trajectory};
