//! Process communication for distributed evaluations.
//!
//! The solvers only need a handful of blocking collectives: an element-wise
//! sum over a flat `f64` array (reciprocal-space partial sums, mesh charge,
//! energy terms) and an all-gather used by the halo exchange. The
//! [`Communicator`] trait captures exactly that, so an MPI binding can slot
//! in without touching the physics.
//!
//! Two implementations ship with the crate:
//!
//! - [`SingleProcess`]: one rank, every collective is a no-op copy.
//! - [`LocalGroup`]: `n` ranks living on threads of one process, synchronised
//!   at a rendezvous that fails instead of blocking once a rank drops out.
//!   Used to exercise multi-rank code paths in tests and by the CLI's
//!   `ranks` setting.

use std::sync::{Arc, Condvar, Mutex};

use crate::backend::ComputeError;

/// Blocking collective operations over a fixed group of ranks.
///
/// Every rank of the group must call each collective in the same order.
/// Results are identical on all ranks: reductions are summed in rank order.
pub trait Communicator: Send + Sync {
    /// This process's rank in `0..size()`.
    fn rank(&self) -> usize;

    /// Number of ranks in the group.
    fn size(&self) -> usize;

    /// Element-wise sum of `values` over all ranks, written back in place.
    fn all_reduce_sum(&self, values: &mut [f64]) -> Result<(), ComputeError>;

    /// Collect one payload from every rank, indexed by rank.
    fn all_gather(&self, payload: Vec<f64>) -> Result<Vec<Vec<f64>>, ComputeError>;
}

/// A group of exactly one rank.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl Communicator for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_reduce_sum(&self, _values: &mut [f64]) -> Result<(), ComputeError> {
        Ok(())
    }

    fn all_gather(&self, payload: Vec<f64>) -> Result<Vec<Vec<f64>>, ComputeError> {
        Ok(vec![payload])
    }
}

/// Arrival count of the current rendezvous.
struct Rendezvous {
    arrived: usize,
    generation: u64,
    /// Ranks dropped before the group finished; nobody can complete a
    /// collective with them any more.
    departed: usize,
}

/// Shared mailbox of an in-process rank group.
struct GroupState {
    size: usize,
    rendezvous: Mutex<Rendezvous>,
    turnstile: Condvar,
    slots: Mutex<Vec<Vec<f64>>>,
}

impl GroupState {
    /// Block until every rank arrives, or fail once any rank has left.
    fn wait(&self) -> Result<(), ComputeError> {
        let mut state = self.rendezvous.lock().map_err(poisoned)?;
        if state.departed > 0 {
            return Err(departed(state.departed));
        }
        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.size {
            state.arrived = 0;
            state.generation += 1;
            self.turnstile.notify_all();
            return Ok(());
        }
        while state.generation == generation {
            if state.departed > 0 {
                return Err(departed(state.departed));
            }
            state = self.turnstile.wait(state).map_err(poisoned)?;
        }
        Ok(())
    }
}

/// Factory for in-process rank groups.
pub struct LocalGroup;

impl LocalGroup {
    /// Create `size` connected ranks. Hand one to each worker thread.
    ///
    /// Dropping a rank (for example because its worker returned an error)
    /// makes every pending and future collective of the group fail with
    /// [`ComputeError::CommunicationError`] instead of blocking.
    pub fn new(size: usize) -> Result<Vec<LocalRank>, ComputeError> {
        if size == 0 {
            return Err(ComputeError::CommunicationError(
                "a rank group needs at least one rank".into(),
            ));
        }
        let state = Arc::new(GroupState {
            size,
            rendezvous: Mutex::new(Rendezvous {
                arrived: 0,
                generation: 0,
                departed: 0,
            }),
            turnstile: Condvar::new(),
            slots: Mutex::new(vec![Vec::new(); size]),
        });
        Ok((0..size)
            .map(|rank| LocalRank {
                rank,
                state: Arc::clone(&state),
            })
            .collect())
    }
}

/// One rank of a [`LocalGroup`].
pub struct LocalRank {
    rank: usize,
    state: Arc<GroupState>,
}

impl LocalRank {
    /// Deposit `payload`, wait for everyone, and read all slots.
    ///
    /// The second rendezvous keeps a fast rank from overwriting its slot for
    /// the next collective while slower ranks are still reading this one.
    fn exchange(&self, payload: Vec<f64>) -> Result<Vec<Vec<f64>>, ComputeError> {
        {
            let mut slots = self.state.slots.lock().map_err(poisoned)?;
            slots[self.rank] = payload;
        }
        self.state.wait()?;
        let gathered = {
            let slots = self.state.slots.lock().map_err(poisoned)?;
            slots.clone()
        };
        self.state.wait()?;
        Ok(gathered)
    }
}

impl Drop for LocalRank {
    fn drop(&mut self) {
        let mut state = match self.state.rendezvous.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };
        state.departed += 1;
        self.state.turnstile.notify_all();
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> ComputeError {
    ComputeError::CommunicationError("rank group mailbox poisoned by a panicked rank".into())
}

fn departed(count: usize) -> ComputeError {
    ComputeError::CommunicationError(format!(
        "{} rank(s) left the group before the collective completed",
        count
    ))
}

impl Communicator for LocalRank {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.state.size
    }

    fn all_reduce_sum(&self, values: &mut [f64]) -> Result<(), ComputeError> {
        let gathered = self.exchange(values.to_vec())?;
        for (rank, contribution) in gathered.iter().enumerate() {
            if contribution.len() != values.len() {
                return Err(ComputeError::CommunicationError(format!(
                    "all-reduce length mismatch: rank {} sent {} values, rank {} expects {}",
                    rank,
                    contribution.len(),
                    self.rank,
                    values.len()
                )));
            }
        }
        // Sum in rank order so every rank produces bit-identical results.
        values.iter_mut().for_each(|v| *v = 0.0);
        for contribution in &gathered {
            for (v, c) in values.iter_mut().zip(contribution) {
                *v += c;
            }
        }
        Ok(())
    }

    fn all_gather(&self, payload: Vec<f64>) -> Result<Vec<Vec<f64>>, ComputeError> {
        self.exchange(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_single_process_collectives() {
        let comm = SingleProcess;
        let mut values = vec![1.0, 2.0];
        comm.all_reduce_sum(&mut values).unwrap();
        assert_eq!(values, vec![1.0, 2.0]);
        assert_eq!(comm.all_gather(vec![3.0]).unwrap(), vec![vec![3.0]]);
        assert_eq!(comm.size(), 1);
    }

    #[test]
    fn test_local_group_all_reduce() {
        let ranks = LocalGroup::new(4).unwrap();
        let results: Vec<Vec<f64>> = thread::scope(|s| {
            let handles: Vec<_> = ranks
                .iter()
                .map(|comm| {
                    s.spawn(move || {
                        let r = comm.rank() as f64;
                        let mut values = vec![r, 10.0 * r, 1.0];
                        comm.all_reduce_sum(&mut values).unwrap();
                        // A second collective must not observe stale slots.
                        let mut again = vec![1.0];
                        comm.all_reduce_sum(&mut again).unwrap();
                        values.push(again[0]);
                        values
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for values in &results {
            assert_eq!(values, &vec![6.0, 60.0, 4.0, 4.0]);
        }
    }

    #[test]
    fn test_local_group_all_gather_is_rank_ordered() {
        let ranks = LocalGroup::new(3).unwrap();
        let results: Vec<Vec<Vec<f64>>> = thread::scope(|s| {
            let handles: Vec<_> = ranks
                .iter()
                .map(|comm| s.spawn(move || comm.all_gather(vec![comm.rank() as f64; comm.rank() + 1]).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for gathered in &results {
            assert_eq!(gathered.len(), 3);
            for (rank, payload) in gathered.iter().enumerate() {
                assert_eq!(payload.len(), rank + 1);
                assert!(payload.iter().all(|&v| v == rank as f64));
            }
        }
    }

    #[test]
    fn test_dropped_rank_releases_waiting_ranks() {
        let mut ranks = LocalGroup::new(3).unwrap();
        let failed = ranks.remove(0);
        let results: Vec<Result<Vec<Vec<f64>>, ComputeError>> = thread::scope(|s| {
            let handles: Vec<_> = ranks
                .iter()
                .map(|comm| s.spawn(move || comm.all_gather(vec![comm.rank() as f64])))
                .collect();
            drop(failed);
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for result in results {
            assert!(matches!(result, Err(ComputeError::CommunicationError(_))));
        }
    }

    #[test]
    fn test_finished_group_does_not_report_departures() {
        let ranks = LocalGroup::new(2).unwrap();
        let sums: Vec<f64> = thread::scope(|s| {
            let handles: Vec<_> = ranks
                .into_iter()
                .map(|comm| {
                    s.spawn(move || {
                        let mut values = vec![1.0];
                        comm.all_reduce_sum(&mut values).unwrap();
                        values[0]
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(sums, vec![2.0, 2.0]);
    }

    #[test]
    fn test_empty_group_rejected() {
        assert!(LocalGroup::new(0).is_err());
    }
}
