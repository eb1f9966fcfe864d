//! TOML configuration deserialisation for electrostatics jobs.

use serde::Deserialize;

/// Top-level job configuration.
#[derive(Debug, Deserialize)]
pub struct JobConfig {
    pub system: SystemConfig,
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Periodic box and the particles in it.
#[derive(Debug, Deserialize)]
pub struct SystemConfig {
    /// Edge lengths of a box anchored at the origin.
    #[serde(rename = "box")]
    pub box_lengths: Option<[f64; 3]>,
    /// Explicit lower corner (use together with `box_hi`).
    pub box_lo: Option<[f64; 3]>,
    /// Explicit upper corner.
    pub box_hi: Option<[f64; 3]>,
    /// Path to a charged `.xyz` file.
    pub particles: Option<String>,
    /// Generated configuration, used instead of `particles`.
    pub lattice: Option<LatticeConfig>,
}

/// Built-in configuration generators.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LatticeConfig {
    /// Rock-salt crystal; the box follows from `cells` and `spacing`.
    RockSalt {
        cells: usize,
        spacing: f64,
        #[serde(default = "default_charge")]
        charge: f64,
    },
    /// Random neutral gas filling the configured cubic box.
    RandomGas {
        pairs: usize,
        #[serde(default = "default_charge")]
        charge: f64,
        #[serde(default)]
        seed: u64,
    },
}

fn default_charge() -> f64 {
    1.0
}

/// Method and split parameters.
///
/// Give either `accuracy` or all of `alpha`, `r_max` and `k_max`. With
/// neither, the parameters are tuned for an accuracy of 1e-5.
#[derive(Debug, Deserialize)]
pub struct SolverConfig {
    /// "ewald" or "spme". Default: "spme".
    #[serde(default = "default_method")]
    pub method: String,
    pub accuracy: Option<f64>,
    pub alpha: Option<f64>,
    pub r_max: Option<f64>,
    pub k_max: Option<f64>,
    /// Relative permittivity of the medium. Default: 1.
    #[serde(default = "default_eps_r")]
    pub eps_r: f64,
    /// SPME mesh points per axis; derived from the accuracy when absent.
    pub mesh_width: Option<usize>,
    /// FFT backend: "auto", "cpu", or "gpu". Default: "auto".
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Number of in-process ranks. Default: 1.
    #[serde(default = "default_ranks")]
    pub ranks: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            method: default_method(),
            accuracy: None,
            alpha: None,
            r_max: None,
            k_max: None,
            eps_r: default_eps_r(),
            mesh_width: None,
            backend: default_backend(),
            ranks: default_ranks(),
        }
    }
}

impl SolverConfig {
    /// Whether the split parameters are set explicitly rather than tuned.
    pub fn has_explicit_params(&self) -> bool {
        self.alpha.is_some() && self.r_max.is_some() && self.k_max.is_some()
    }

    /// Accuracy to tune for (and to size the SPME mesh with).
    pub fn target_accuracy(&self) -> f64 {
        self.accuracy.unwrap_or_else(default_accuracy)
    }
}

fn default_method() -> String {
    "spme".into()
}
fn default_accuracy() -> f64 {
    1e-5
}
fn default_eps_r() -> f64 {
    1.0
}
fn default_backend() -> String {
    "auto".into()
}
fn default_ranks() -> usize {
    1
}

/// Output configuration.
#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    /// Output directory (default: "./output").
    #[serde(default = "default_output_dir")]
    pub directory: String,
    /// Whether to save per-particle potentials and forces as CSV (default: true).
    #[serde(default = "default_true")]
    pub save_forces: bool,
    /// Whether to save the energy report as JSON (default: false).
    #[serde(default)]
    pub save_json: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            save_forces: true,
            save_json: false,
        }
    }
}

fn default_output_dir() -> String {
    "./output".into()
}
fn default_true() -> bool {
    true
}

impl JobConfig {
    /// Check that the sections are mutually consistent.
    pub fn validate(&self) -> anyhow::Result<()> {
        let system = &self.system;
        match (&system.particles, &system.lattice) {
            (Some(_), Some(_)) => {
                anyhow::bail!("[system] sets both 'particles' and 'lattice'; choose one")
            }
            (None, None) => anyhow::bail!("[system] needs either 'particles' or 'lattice'"),
            _ => {}
        }
        if system.box_lo.is_some() != system.box_hi.is_some() {
            anyhow::bail!("[system] 'box_lo' and 'box_hi' must be given together");
        }
        if system.box_lengths.is_some() && system.box_lo.is_some() {
            anyhow::bail!("[system] sets both 'box' and 'box_lo'/'box_hi'");
        }
        let has_box = system.box_lengths.is_some() || system.box_lo.is_some();
        let needs_box = !matches!(system.lattice, Some(LatticeConfig::RockSalt { .. }));
        if needs_box && !has_box {
            anyhow::bail!("[system] needs 'box' or 'box_lo'/'box_hi'");
        }

        let solver = &self.solver;
        let explicit = [solver.alpha, solver.r_max, solver.k_max];
        let n_explicit = explicit.iter().filter(|v| v.is_some()).count();
        match (solver.accuracy, n_explicit) {
            (_, 0) | (None, 3) => {}
            (Some(_), _) => {
                anyhow::bail!("[solver] give either 'accuracy' or 'alpha'/'r_max'/'k_max', not both")
            }
            (None, _) => anyhow::bail!("[solver] 'alpha', 'r_max' and 'k_max' must all be given"),
        }
        if solver.ranks == 0 {
            anyhow::bail!("[solver] 'ranks' must be at least 1");
        }
        ewald_core::SolverKind::from_name(&solver.method)?;
        ewald_compute::BackendType::from_preference(&solver.backend)?;
        Ok(())
    }
}

/// Load and parse a TOML job configuration file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<JobConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: JobConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rock_salt_job_with_defaults() {
        let job: JobConfig = toml::from_str(
            r#"
            [system]
            lattice = { type = "rock_salt", cells = 2, spacing = 2.8 }
            "#,
        )
        .unwrap();
        job.validate().unwrap();
        assert_eq!(job.solver.method, "spme");
        assert_eq!(job.solver.target_accuracy(), 1e-5);
        assert!(!job.solver.has_explicit_params());
        assert_eq!(job.solver.ranks, 1);
        assert!(job.output.save_forces);
        match job.system.lattice {
            Some(LatticeConfig::RockSalt { cells, charge, .. }) => {
                assert_eq!(cells, 2);
                assert_eq!(charge, 1.0);
            }
            other => panic!("unexpected lattice {:?}", other),
        }
    }

    #[test]
    fn test_explicit_parameters() {
        let job: JobConfig = toml::from_str(
            r#"
            [system]
            box = [10.0, 10.0, 10.0]
            particles = "ions.xyz"

            [solver]
            method = "ewald"
            alpha = 0.5
            r_max = 9.0
            k_max = 5.0
            eps_r = 78.5
            ranks = 4
            "#,
        )
        .unwrap();
        job.validate().unwrap();
        assert!(job.solver.has_explicit_params());
        assert_eq!(job.solver.eps_r, 78.5);
        assert_eq!(job.solver.ranks, 4);
    }

    #[test]
    fn test_inconsistent_sections_rejected() {
        let partial: JobConfig = toml::from_str(
            r#"
            [system]
            box = [10.0, 10.0, 10.0]
            particles = "ions.xyz"

            [solver]
            alpha = 0.5
            "#,
        )
        .unwrap();
        assert!(partial.validate().is_err());

        let no_box: JobConfig = toml::from_str(
            r#"
            [system]
            lattice = { type = "random_gas", pairs = 10 }
            "#,
        )
        .unwrap();
        assert!(no_box.validate().is_err());

        let bad_method: JobConfig = toml::from_str(
            r#"
            [system]
            box = [10.0, 10.0, 10.0]
            particles = "ions.xyz"

            [solver]
            method = "p3m"
            "#,
        )
        .unwrap();
        assert!(bad_method.validate().is_err());
    }
}
