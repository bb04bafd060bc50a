use std::{fs, ops::ControlFlow};

use anyhow::{bail, Context, Result};
use glam::DVec3;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use karman_fluids::{
    config::SimulationConfig,
    extract::extract,
    integrate::{ConvergencePolicy, Simulation},
    obstacle::cylinder::Cylinder,
};
use karman_io::{append_experiment, reynolds_group_name};

use crate::Cli;

/// Base configuration of the sweep: a 20 × 10 channel with the cylinder near the inlet.
fn sweep_defaults() -> SimulationConfig {
    SimulationConfig {
        inflow: DVec3::X,
        extents: vec![(0.0, 20.0), (0.0, 10.0)],
        resolution: vec![128, 128],
        cylinder: Some(Cylinder::new(DVec3::new(3.0, 5.0, 0.0), 0.5, 2)),
        steps: 2000,
        dt: 0.2,
        initial_velocity: DVec3::X,
        ..Default::default()
    }
}

fn base_config(cli: &Cli) -> Result<SimulationConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let json = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&json).with_context(|| format!("failed to parse {}", path.display()))?
        }
        None => sweep_defaults(),
    };

    if let Some(steps) = cli.steps {
        config.steps = steps;
    }

    if let Some(dt) = cli.dt {
        config.dt = dt;
    }

    if let Some(grid) = &cli.grid {
        let &[nx, ny] = grid.as_slice() else {
            bail!("--grid expects two cell counts, got {}", grid.len());
        };
        if config.resolution.len() < 2 {
            config.resolution.resize(2, 0);
        }
        config.resolution[0] = nx;
        config.resolution[1] = ny;
    }

    if let Some(depth) = cli.depth {
        config.extents.truncate(2);
        config.resolution.truncate(2);
        config.extents.push((0.0, 5.0));
        config.resolution.push(depth);

        if let Some(cylinder) = &mut config.cylinder {
            cylinder.center.z = 2.5;
        }
    }

    if cli.strict {
        config.policy = ConvergencePolicy::Strict;
    }

    Ok(config)
}

pub fn run_sweep(cli: &Cli) -> Result<()> {
    let base = base_config(cli)?;

    fs::create_dir_all(&cli.output)?;
    let path = cli.output.join(&cli.filename);

    let bar_template = "Re {prefix:>6} {spinner:.green} [{elapsed}] [{bar:50.white/white}] {pos}/{len} ({eta})";
    let style = ProgressStyle::with_template(bar_template)?
        .progress_chars("=> ")
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");

    for &re in &cli.reynolds {
        let config = base.clone().with_reynolds(re)?;
        let slice_index = config.slice_index;
        let simulation = Simulation::new(config)?;

        let progress = ProgressBar::new(simulation.config().steps as u64)
            .with_style(style.clone())
            .with_prefix(re.to_string());

        let trajectory = simulation.run_with(|report| {
            progress.set_position(report.step as u64 + 1);
            ControlFlow::Continue(())
        });
        progress.finish();

        let trajectory = trajectory.with_context(|| format!("run at Re = {re} failed"))?;
        let fields = extract(&trajectory, slice_index)?;

        let group = reynolds_group_name(re);
        append_experiment(&path, &group, &fields)?;

        info!(group = %group, path = %path.display(), "saved run");
    }

    Ok(())
}
