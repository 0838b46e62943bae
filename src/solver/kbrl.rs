// src/solver/kbrl.rs
//
// Direct (KBRL) fixed point: Jacobi-style value-iteration sweeps at full
// sample resolution.
//
// Each sweep computes, for every sampled transition, the backed-up value
// of its end state against the *previous* snapshot (never a value updated
// in the same sweep), then freezes the new arrays into the next snapshot.
// The concurrent variant shards each action's own index range, so the
// per-action lists may have different lengths.

use std::thread;

use tracing::{debug, info, warn};

use crate::config::SolverConfig;
use crate::error::{Result, SolverError};
use crate::kernel::KernelValueFunction;
use crate::mdp::{ActionSpace, Mdp};

use super::shard_ranges;

/// Run value-iteration sweeps from the given initial snapshot (bandwidth
/// and metric are read off it) until the snapshot difference falls below
/// `cfg.kbrl_tolerance` or `cfg.step_cap` sweeps have run.
pub fn solve<M>(qvf: KernelValueFunction<M>, cfg: &SolverConfig) -> Result<KernelValueFunction<M>>
where
    M: Mdp + Send + Sync,
{
    if qvf.metric().len() != M::Action::count() {
        return Err(SolverError::MetricArity {
            expected: M::Action::count(),
            found: qvf.metric().len(),
        });
    }
    if qvf.samples().is_empty() {
        return Err(SolverError::EmptySamples);
    }
    // Every distance the sweeps will evaluate targets a start or end
    // vector; let caching metrics precompute them once.
    for a in 0..M::Action::count() {
        for t in qvf.samples().for_index(a) {
            qvf.metric().memoize(t.start());
            qvf.metric().memoize(t.end());
        }
    }

    let mut qvf = qvf;
    for sweep in 0..cfg.step_cap {
        let news = if cfg.threads > 1 {
            sweep_sharded(&qvf, cfg.threads)?
        } else {
            sweep_serial(&qvf)
        };
        let next = qvf.update(news);
        let diff = qvf.difference(&next);
        qvf = next;
        debug!(sweep, diff, "kbrl sweep finished");
        if diff < cfg.kbrl_tolerance {
            info!(sweeps = sweep + 1, "kbrl value iteration converged");
            return Ok(qvf);
        }
    }
    warn!(
        step_cap = cfg.step_cap,
        "kbrl value iteration hit the step cap without converging"
    );
    Ok(qvf)
}

/// Backed-up value of one transition's end state under the previous
/// snapshot: zero for terminal ends, otherwise the best action value.
fn backed_up<M: Mdp>(qvf: &KernelValueFunction<M>, action_index: usize, i: usize) -> f64 {
    let t = &qvf.samples().for_index(action_index)[i];
    if qvf.mdp().is_terminal(t.end_state()) {
        return 0.0;
    }
    M::Action::ALL
        .iter()
        .map(|&a2| qvf.value_at_vector(t.end(), a2))
        .fold(f64::NEG_INFINITY, f64::max)
}

fn sweep_serial<M>(qvf: &KernelValueFunction<M>) -> Vec<Vec<f64>>
where
    M: Mdp,
{
    (0..M::Action::count())
        .map(|a| {
            (0..qvf.samples().for_index(a).len())
                .map(|i| backed_up(qvf, a, i))
                .collect()
        })
        .collect()
}

fn sweep_sharded<M>(qvf: &KernelValueFunction<M>, workers: usize) -> Result<Vec<Vec<f64>>>
where
    M: Mdp + Send + Sync,
{
    let action_count = M::Action::count();
    // Shard each action's own index range; the direct path does not
    // require aligned list lengths.
    let shards: Vec<Vec<std::ops::Range<usize>>> = (0..action_count)
        .map(|a| shard_ranges(qvf.samples().for_index(a).len(), workers))
        .collect();

    let mut parts: Vec<Option<Vec<Vec<f64>>>> = (0..workers).map(|_| None).collect();
    let mut failed = false;
    thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|w| {
                let shards = &shards;
                scope.spawn(move || {
                    (0..action_count)
                        .map(|a| {
                            shards[a][w]
                                .clone()
                                .map(|i| backed_up(qvf, a, i))
                                .collect::<Vec<f64>>()
                        })
                        .collect::<Vec<Vec<f64>>>()
                })
            })
            .collect();
        for (slot, handle) in parts.iter_mut().zip(handles) {
            match handle.join() {
                Ok(part) => *slot = Some(part),
                Err(_) => failed = true,
            }
        }
    });
    if failed {
        return Err(SolverError::WorkerPanicked { phase: "kbrl sweep" });
    }

    // Positional merge: worker w's slice for action a lands at the shard's
    // start offset, in shard order.
    let mut news: Vec<Vec<f64>> = (0..action_count)
        .map(|a| vec![0.0; qvf.samples().for_index(a).len()])
        .collect();
    for (w, part) in parts.into_iter().enumerate() {
        let part = part.unwrap_or_default();
        for (a, slice) in part.into_iter().enumerate() {
            let start = shards[a][w].start;
            news[a][start..start + slice.len()].copy_from_slice(&slice);
        }
    }
    Ok(news)
}
