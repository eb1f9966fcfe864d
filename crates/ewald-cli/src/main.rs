//! Command-line driver for periodic Coulomb electrostatics.
//!
//! Evaluate energies and forces from TOML job files:
//! ```sh
//! ewald-cli run job.toml
//! ewald-cli validate job.toml
//! ewald-cli tune --accuracy 1e-5 --particles 1000 --box-length 30
//! ```

mod config;
mod runner;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use ewald_core::tuning::{suggested_mesh_width, tune};
use ewald_core::Domain;

#[derive(Parser)]
#[command(name = "ewald-cli")]
#[command(about = "Ewald and SPME electrostatics for periodic particle systems")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a configuration from a TOML job file.
    Run {
        /// Path to the job configuration file.
        config: PathBuf,
        /// Output directory (overrides config file setting).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate a configuration file without evaluating it.
    Validate {
        /// Path to the job configuration file.
        config: PathBuf,
    },
    /// Print the split parameters chosen for a target accuracy.
    Tune {
        /// Target relative accuracy.
        #[arg(long, default_value_t = 1e-5)]
        accuracy: f64,
        /// Number of particles.
        #[arg(long)]
        particles: usize,
        /// Edge length of the cubic box.
        #[arg(long)]
        box_length: f64,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, output } => {
            println!("Ewald Electrostatics");
            println!("====================");
            let job = config::load_config(&config)?;
            println!("Configuration: {}", config.display());

            let result = runner::run_job(&job)?;

            let out_dir = output.unwrap_or_else(|| PathBuf::from(&job.output.directory));

            if job.output.save_forces {
                let csv_path = out_dir.join("forces.csv");
                runner::write_forces_csv(&result.records, &csv_path, &result.report)?;
            }

            if job.output.save_json {
                let json_path = out_dir.join("energy.json");
                runner::write_energy_json(&result.report, &json_path)?;
            }

            println!("Evaluation complete.");
            Ok(())
        }
        Commands::Validate { config } => {
            let _job = config::load_config(&config)?;
            println!("Configuration is valid: {}", config.display());
            Ok(())
        }
        Commands::Tune {
            accuracy,
            particles,
            box_length,
        } => {
            let domain = Domain::cubic(box_length)?;
            let params = tune(accuracy, particles, &domain)?;
            println!("alpha      = {:.6}", params.alpha);
            println!("r_max      = {:.6}", params.r_max);
            println!("k_max      = {:.6}", params.k_max);
            println!(
                "mesh_width = {}",
                suggested_mesh_width(params.alpha, box_length, accuracy)
            );
            Ok(())
        }
    }
}
