use std::path::PathBuf;

use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod run;

/// Simulates the wake behind a cylinder for a sweep of Reynolds numbers and stores every run in
/// one experiment file.
#[derive(Parser, Debug)]
#[command(name = "karman", version, about, long_about = None)]
pub struct Cli {
    /// Reynolds numbers to simulate. May be repeated.
    #[arg(short, long = "reynolds", value_name = "RE", default_values_t = [100.0, 200.0, 300.0, 400.0, 500.0, 600.0, 700.0, 800.0, 900.0, 1000.0])]
    pub reynolds: Vec<f64>,

    /// Number of time steps per run.
    #[arg(long)]
    pub steps: Option<usize>,

    /// Time step size.
    #[arg(long)]
    pub dt: Option<f64>,

    /// Cells along x and y, e.g. `128,128`.
    #[arg(long, value_name = "NX,NY", value_delimiter = ',')]
    pub grid: Option<Vec<usize>>,

    /// Cells along z. Turns the run into a 3D simulation with a periodic z axis.
    #[arg(long)]
    pub depth: Option<usize>,

    /// Directory the experiment file is written to.
    #[arg(short, long, default_value = "dataset")]
    pub output: PathBuf,

    /// Name of the experiment file inside the output directory.
    #[arg(short, long, default_value = "navier_strokes_2d_cylinder_wake")]
    pub filename: String,

    /// JSON file with the base simulation configuration.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Abort a run when a pressure solve does not converge.
    #[arg(long)]
    pub strict: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    pub log_level: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    run::run_sweep(&cli)
}
