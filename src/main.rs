//! Prosumer dispatch entry point: CLI wiring and config-driven engine construction.

use std::fs;
use std::process;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use prosumer_dispatch::cli::Cli;
use prosumer_dispatch::config::{ConfigError, ScenarioConfig};
use prosumer_dispatch::forecast::MeasurementHistory;
use prosumer_dispatch::io::export::{export_meters, export_reports};
use prosumer_dispatch::sim::engine::Engine;
use prosumer_dispatch::sim::kpi::KpiReport;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .compact()
        .with_writer(std::io::stderr)
        .init();
}

/// `--scenario` takes priority, then `--preset`, then the baseline.
fn load_scenario(cli: &Cli) -> Result<ScenarioConfig, ConfigError> {
    let mut scenario = if let Some(path) = &cli.scenario {
        ScenarioConfig::from_toml_file(path)?
    } else if let Some(name) = &cli.preset {
        ScenarioConfig::from_preset(name)?
    } else {
        ScenarioConfig::baseline()
    };

    if let Some(seed) = cli.seed {
        scenario.simulation.seed = seed;
    }
    if let Some(intervals) = cli.intervals {
        scenario.simulation.intervals = intervals;
    }
    if cli.sequential {
        scenario.simulation.parallel = false;
    }
    Ok(scenario)
}

fn run(cli: &Cli, scenario: &ScenarioConfig) -> prosumer_dispatch::Result<()> {
    let mut engine = match &cli.history {
        Some(path) => Engine::with_history(scenario, MeasurementHistory::from_csv_path(path)?)?,
        None => Engine::from_config(scenario)?,
    };
    if let Some(dir) = &cli.state_in {
        engine.resume_from(dir)?;
    }
    let outcome = engine.run();

    if !cli.quiet {
        for r in &outcome.reports {
            println!("{r}");
        }
    }
    let kpi = KpiReport::from_outcome(&outcome);
    println!("\n{kpi}");

    if let Some(path) = &cli.report_out {
        export_reports(&outcome.reports, path)?;
        info!(path = %path.display(), "interval reports written");
    }
    if let Some(path) = &cli.meters_out {
        export_meters(&outcome.reports, path)?;
        info!(path = %path.display(), "meter readings written");
    }
    if let Some(dir) = &cli.state_out {
        fs::create_dir_all(dir)?;
        for agent in engine.agents() {
            agent.state().save(&dir.join(format!("{}.json", agent.id())))?;
        }
        info!(dir = %dir.display(), agents = engine.agents().len(), "agent state written");
    }
    Ok(())
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let scenario = match load_scenario(&cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };

    let errors = scenario.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("{e}");
        }
        process::exit(1);
    }

    if let Err(e) = run(&cli, &scenario) {
        error!(error = %e, "run failed");
        process::exit(1);
    }
}
