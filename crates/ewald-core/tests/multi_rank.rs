//! Integration test: decomposed evaluations over in-process rank groups
//! match the single-rank result.

use std::sync::Arc;

use approx::assert_relative_eq;
use ewald_compute::{Communicator, LocalGroup, SingleProcess};
use ewald_core::decomposition::CartesianTopology;
use ewald_core::types::ParticleRecord;
use ewald_core::{
    create_solver, Domain, EwaldParams, SolverError, SolverKind, SolverOptions,
};
use ewald_geometry::lattice::random_gas;

const LENGTH: f64 = 8.0;

fn evaluate_rank(
    comm: Arc<dyn Communicator>,
    kind: SolverKind,
    positions: &[[f64; 3]],
    charges: &[f64],
) -> (f64, Vec<ParticleRecord>) {
    let domain = Domain::cubic(LENGTH).unwrap();
    let params = EwaldParams::new(0.6, 3.5, 4.5).unwrap();
    let options = SolverOptions {
        mesh_width: Some(16),
        ..Default::default()
    };
    let topology = CartesianTopology::new(comm.size(), comm.rank(), domain).unwrap();
    let mut system = topology.local_system(positions, charges).unwrap();
    let solver = create_solver(kind, params, domain, options, comm).unwrap();
    let energy = solver.compute(&mut system).unwrap();
    assert_eq!(system.n_max(), system.n_local(), "ghosts left behind");
    (energy.total(), system.records())
}

fn evaluate_group(n_ranks: usize, kind: SolverKind) -> (Vec<f64>, Vec<ParticleRecord>) {
    let gas = random_gas(12, LENGTH, 1.0, 5);
    let positions = gas.positions();
    let charges = gas.charges();

    let results: Vec<(f64, Vec<ParticleRecord>)> = if n_ranks == 1 {
        vec![evaluate_rank(Arc::new(SingleProcess), kind, &positions, &charges)]
    } else {
        let group = LocalGroup::new(n_ranks).unwrap();
        std::thread::scope(|scope| {
            let handles: Vec<_> = group
                .into_iter()
                .map(|rank| {
                    let positions = &positions;
                    let charges = &charges;
                    scope.spawn(move || evaluate_rank(Arc::new(rank), kind, positions, charges))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    };

    let energies = results.iter().map(|(e, _)| *e).collect();
    let mut records: Vec<ParticleRecord> = results.into_iter().flat_map(|(_, r)| r).collect();
    records.sort_by_key(|r| r.id);
    (energies, records)
}

fn assert_matches_single_rank(n_ranks: usize, kind: SolverKind) {
    let (reference_energy, reference) = evaluate_group(1, kind);
    let (energies, records) = evaluate_group(n_ranks, kind);

    assert_eq!(records.len(), reference.len());
    for e in &energies {
        assert_relative_eq!(*e, reference_energy[0], max_relative = 1e-10);
    }
    let potential_sum: f64 = records.iter().map(|r| r.potential).sum();
    assert_relative_eq!(potential_sum, reference_energy[0], max_relative = 1e-8);

    for (a, b) in records.iter().zip(&reference) {
        assert_eq!(a.id, b.id);
        assert_relative_eq!(a.potential, b.potential, epsilon = 1e-9, max_relative = 1e-8);
        for d in 0..3 {
            assert_relative_eq!(a.force[d], b.force[d], epsilon = 1e-9, max_relative = 1e-8);
        }
    }
}

#[test]
fn test_two_ranks_direct_ewald() {
    assert_matches_single_rank(2, SolverKind::Ewald);
}

#[test]
fn test_eight_ranks_direct_ewald() {
    assert_matches_single_rank(8, SolverKind::Ewald);
}

#[test]
fn test_four_ranks_spme() {
    assert_matches_single_rank(4, SolverKind::Spme);
}

#[test]
fn test_failing_rank_does_not_block_the_group() {
    let domain = Domain::cubic(LENGTH).unwrap();
    let params = EwaldParams::new(0.6, 3.5, 4.5).unwrap();
    let group = LocalGroup::new(2).unwrap();

    let results: Vec<Result<_, SolverError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = group
            .into_iter()
            .map(|rank| {
                scope.spawn(move || {
                    let comm: Arc<dyn Communicator> = Arc::new(rank);
                    let topology = CartesianTopology::new(2, comm.rank(), domain).unwrap();
                    let mut system = topology.local_system(&[[1.0, 1.0, 1.0]], &[1.0]).unwrap();
                    if comm.rank() == 0 {
                        // Owned by rank 1.
                        system.push([6.0, 6.0, 6.0], -1.0, 1).unwrap();
                    }
                    let solver =
                        create_solver(SolverKind::Ewald, params, domain, SolverOptions::default(), comm)
                            .unwrap();
                    let energy = solver.compute(&mut system);
                    assert_eq!(system.n_max(), system.n_local());
                    energy
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(matches!(results[0], Err(SolverError::Configuration(_))));
    assert!(matches!(results[1], Err(SolverError::Compute(_))));
}
