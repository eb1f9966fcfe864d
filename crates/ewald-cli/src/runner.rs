//! Job runner: ties together configuration input, rank layout and solver.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use ewald_compute::{BackendType, Communicator, ComputeError, LocalGroup, SingleProcess};
use ewald_core::decomposition::CartesianTopology;
use ewald_core::tuning::{implied_accuracy, suggested_mesh_width, tune};
use ewald_core::types::ParticleRecord;
use ewald_core::{
    create_solver, Domain, EnergyBreakdown, EwaldParams, SolverError, SolverKind, SolverOptions,
};
use ewald_geometry::lattice::{random_gas, rock_salt};

use crate::config::{JobConfig, LatticeConfig, SystemConfig};

/// Global particle configuration in its periodic box.
pub struct Configuration {
    pub domain: Domain,
    pub positions: Vec<[f64; 3]>,
    pub charges: Vec<f64>,
}

/// Summary of one evaluation, written as JSON.
#[derive(Debug, Serialize)]
pub struct EnergyReport {
    pub method: String,
    pub params: EwaldParams,
    pub mesh_width: Option<usize>,
    pub ranks: usize,
    pub particles: usize,
    pub net_charge: f64,
    pub energy: EnergyBreakdown,
    pub total: f64,
}

/// Results from a job run.
pub struct JobOutput {
    pub report: EnergyReport,
    /// Per-particle results from all ranks, sorted by id.
    pub records: Vec<ParticleRecord>,
}

/// Run a full evaluation from a parsed job configuration.
pub fn run_job(job: &JobConfig) -> Result<JobOutput> {
    let config = build_configuration(&job.system)?;
    let n = config.positions.len();
    if n == 0 {
        anyhow::bail!("No particles in the configuration");
    }
    let lengths = config.domain.lengths();
    println!(
        "System: {} particles in a {:.4} x {:.4} x {:.4} box",
        n, lengths[0], lengths[1], lengths[2]
    );

    let kind = SolverKind::from_name(&job.solver.method)?;
    let params = resolve_params(job, &config)?;
    let mesh_width = match kind {
        SolverKind::Spme => {
            let width = match job.solver.mesh_width {
                Some(width) => width,
                None => {
                    let accuracy = if job.solver.has_explicit_params() {
                        implied_accuracy(&params)
                    } else {
                        job.solver.target_accuracy()
                    };
                    suggested_mesh_width(params.alpha, config.domain.cubic_length()?, accuracy)
                }
            };
            Some(width)
        }
        SolverKind::Ewald => None,
    };
    println!(
        "Parameters: alpha={:.6}, r_max={:.6}, k_max={:.6}, eps_r={}",
        params.alpha, params.r_max, params.k_max, params.eps_r
    );
    if let Some(width) = mesh_width {
        println!("Mesh: {}^3", width);
    }

    let options = SolverOptions {
        half_neighbor_list: true,
        mesh_width,
        fft_backend: BackendType::from_preference(&job.solver.backend)?,
    };

    let ranks = job.solver.ranks;
    println!("Ranks: {}", ranks);
    let (energy, records) = evaluate(kind, params, config.domain, options, &config, ranks)?;

    println!(
        "Energy: real={:.10e}, reciprocal={:.10e}, self={:.10e}",
        energy.real, energy.reciprocal, energy.self_energy
    );
    println!("Total:  {:.10e}", energy.total());

    let report = EnergyReport {
        method: format!("{:?}", kind).to_lowercase(),
        params,
        mesh_width,
        ranks,
        particles: n,
        net_charge: config.charges.iter().sum(),
        energy,
        total: energy.total(),
    };
    Ok(JobOutput { report, records })
}

/// Build the box and particles described by the `[system]` section.
pub fn build_configuration(system: &SystemConfig) -> Result<Configuration> {
    let configured_domain = match (system.box_lengths, system.box_lo, system.box_hi) {
        (Some(lengths), _, _) => Some(Domain::from_lengths(lengths)?),
        (None, Some(lo), Some(hi)) => Some(Domain::new(lo, hi)?),
        _ => None,
    };

    if let Some(path) = &system.particles {
        let domain = configured_domain.context("[system] 'particles' requires a box")?;
        let particles = ewald_geometry::parsers::load(Path::new(path))
            .with_context(|| format!("Failed to read particles from '{}'", path))?;
        return Ok(Configuration {
            domain,
            positions: particles.iter().map(|p| p.position).collect(),
            charges: particles.iter().map(|p| p.charge).collect(),
        });
    }

    let lattice = system
        .lattice
        .as_ref()
        .context("[system] needs either 'particles' or 'lattice'")?;
    let crystal = match lattice {
        LatticeConfig::RockSalt {
            cells,
            spacing,
            charge,
        } => rock_salt(*cells, *spacing, *charge),
        LatticeConfig::RandomGas {
            pairs,
            charge,
            seed,
        } => {
            let domain = configured_domain.context("[system] 'random_gas' requires a box")?;
            let length = domain
                .cubic_length()
                .context("'random_gas' fills a cubic box")?;
            random_gas(*pairs, length, *charge, *seed)
        }
    };
    let domain = match configured_domain {
        Some(domain) => domain,
        None => Domain::cubic(crystal.box_length)?,
    };
    Ok(Configuration {
        domain,
        positions: crystal.positions(),
        charges: crystal.charges(),
    })
}

/// Tuned or explicit split parameters, with the medium's permittivity.
fn resolve_params(job: &JobConfig, config: &Configuration) -> Result<EwaldParams> {
    let solver = &job.solver;
    let params = match (solver.alpha, solver.r_max, solver.k_max) {
        (Some(alpha), Some(r_max), Some(k_max)) => EwaldParams::new(alpha, r_max, k_max)?,
        _ => tune(
            solver.target_accuracy(),
            config.positions.len(),
            &config.domain,
        )?,
    };
    Ok(params.with_eps_r(solver.eps_r)?)
}

/// Evaluate the configuration on `ranks` cooperating ranks.
///
/// Returns the global energy and the per-particle records of every rank.
fn evaluate(
    kind: SolverKind,
    params: EwaldParams,
    domain: Domain,
    options: SolverOptions,
    config: &Configuration,
    ranks: usize,
) -> Result<(EnergyBreakdown, Vec<ParticleRecord>)> {
    let positions = config.positions.as_slice();
    let charges = config.charges.as_slice();

    if ranks == 1 {
        return evaluate_rank(
            Arc::new(SingleProcess),
            kind,
            params,
            domain,
            options,
            positions,
            charges,
        );
    }

    let group = LocalGroup::new(ranks)?;
    let results: Vec<Result<(EnergyBreakdown, Vec<ParticleRecord>)>> =
        std::thread::scope(|scope| {
            let handles: Vec<_> = group
                .into_iter()
                .map(|rank| {
                    scope.spawn(move || {
                        evaluate_rank(
                            Arc::new(rank),
                            kind,
                            params,
                            domain,
                            options,
                            positions,
                            charges,
                        )
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(anyhow::anyhow!("a rank thread panicked")))
                })
                .collect()
        });

    let mut energy = None;
    let mut records = Vec::with_capacity(positions.len());
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok((rank_energy, rank_records)) => {
                // Energies are already reduced; every rank reports the same value.
                energy.get_or_insert(rank_energy);
                records.extend(rank_records);
            }
            Err(err) => errors.push(err),
        }
    }
    if !errors.is_empty() {
        // Report the rank that failed, not the ones it left waiting.
        let root = errors.iter().position(|e| !left_waiting(e)).unwrap_or(0);
        return Err(errors.swap_remove(root));
    }
    records.sort_by_key(|r| r.id);
    let energy = energy.context("rank group returned no results")?;
    Ok((energy, records))
}

fn left_waiting(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<SolverError>(),
        Some(SolverError::Compute(ComputeError::CommunicationError(_)))
    )
}

fn evaluate_rank(
    comm: Arc<dyn Communicator>,
    kind: SolverKind,
    params: EwaldParams,
    domain: Domain,
    options: SolverOptions,
    positions: &[[f64; 3]],
    charges: &[f64],
) -> Result<(EnergyBreakdown, Vec<ParticleRecord>)> {
    let topology = CartesianTopology::new(comm.size(), comm.rank(), domain)?;
    let mut system = topology.local_system(positions, charges)?;
    log::debug!(
        "rank {}: {} local particles",
        comm.rank(),
        system.n_local()
    );
    let solver = create_solver(kind, params, domain, options, comm)?;
    let energy = solver
        .compute(&mut system)
        .with_context(|| format!("{} evaluation failed", solver.name()))?;
    let mut records = system.records();
    records.sort_by_key(|r| r.id);
    Ok((energy, records))
}

/// Write per-particle potentials and forces to CSV with a metadata header.
pub fn write_forces_csv(records: &[ParticleRecord], path: &Path, report: &EnergyReport) -> Result<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = std::fs::File::create(path)?;

    // Metadata header
    writeln!(file, "# Ewald electrostatics: per-particle results")?;
    writeln!(file, "# Version: {}", env!("CARGO_PKG_VERSION"))?;
    writeln!(file, "# method: {}", report.method)?;
    writeln!(
        file,
        "# alpha: {}, r_max: {}, k_max: {}, eps_r: {}",
        report.params.alpha, report.params.r_max, report.params.k_max, report.params.eps_r
    )?;
    if let Some(width) = report.mesh_width {
        writeln!(file, "# mesh_width: {}", width)?;
    }
    writeln!(file, "# total_energy: {:.12e}", report.total)?;
    writeln!(file, "#")?;
    writeln!(file, "id,x,y,z,charge,potential,fx,fy,fz")?;

    for r in records {
        writeln!(
            file,
            "{},{:.10},{:.10},{:.10},{:.6},{:.10e},{:.10e},{:.10e},{:.10e}",
            r.id,
            r.position[0],
            r.position[1],
            r.position[2],
            r.charge,
            r.potential,
            r.force[0],
            r.force[1],
            r.force[2]
        )?;
    }

    println!("Forces written to: {}", path.display());
    Ok(())
}

/// Write the energy report as pretty-printed JSON.
pub fn write_energy_json(report: &EnergyReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(report).context("Failed to serialise energy report")?;
    std::fs::write(path, json)?;
    println!("Energy report written to: {}", path.display());
    Ok(())
}
