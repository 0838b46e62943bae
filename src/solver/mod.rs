// src/solver/mod.rs
//
// Fixed-point value-iteration engines and the single solve entry point.
//
// Concurrency model, shared by both engines: a fork-join worker set sized
// by `SolverConfig::threads`. Work is split into positional index shards
// (`start = w * n / workers`), every round is a hard barrier (the calling
// thread joins all workers and merges their outputs positionally before
// the next immutable snapshot exists), and the only object shared
// mid-round is the previous snapshot, which is never mutated. The shard
// arithmetic is positional so the worker count cannot change results.

use std::ops::Range;
use std::sync::Arc;

use tracing::debug;

use crate::config::{RelaxConfig, SolverConfig};
use crate::error::Result;
use crate::kernel::KernelValueFunction;
use crate::mdp::{Mdp, SampleTransitions};
use crate::metric::ActionDistanceFn;
use crate::relax;

pub mod kbrl;
pub mod kbsf;

/// Positional index shards for `workers` workers over `0..n`. Every index
/// appears in exactly one shard; shard boundaries depend only on `n` and
/// `workers`.
pub(crate) fn shard_ranges(n: usize, workers: usize) -> Vec<Range<usize>> {
    let workers = workers.max(1);
    (0..workers)
        .map(|w| (w * n / workers)..((w + 1) * n / workers))
        .collect()
}

/// Solve an MDP from a sampled-transition corpus.
///
/// With `rep_states` the reduced (KBSF) engine projects the problem onto
/// the representative set; without it the direct (KBRL) engine iterates at
/// full sample resolution. `cfg.threads > 1` selects the concurrent
/// variants. Non-convergence within `cfg.step_cap` is not an error: the
/// best value function found is returned and the convergence status is
/// only observable in the logs.
pub fn solve<M>(
    mdp: &Arc<M>,
    samples: &Arc<SampleTransitions<M::State, M::Action>>,
    metric: &Arc<ActionDistanceFn>,
    rep_states: Option<&[M::State]>,
    cfg: &SolverConfig,
) -> Result<KernelValueFunction<M>>
where
    M: Mdp + Send + Sync + 'static,
{
    match rep_states {
        Some(reps) => kbsf::solve(mdp, reps, samples, metric, cfg),
        None => {
            let qvf = KernelValueFunction::zeroed(
                Arc::clone(mdp),
                Arc::clone(samples),
                Arc::clone(metric),
                cfg.bandwidth,
            );
            kbrl::solve(qvf, cfg)
        }
    }
}

/// Adaptive solve: alternate solving and metric relaxation.
///
/// Round 0 solves under `initial_metric`; each further round derives a
/// relaxed per-action metric from the converged value function and solves
/// again under it. Returns the value function of the final round.
pub fn solve_adaptive<M>(
    mdp: &Arc<M>,
    samples: &Arc<SampleTransitions<M::State, M::Action>>,
    initial_metric: &Arc<ActionDistanceFn>,
    rep_states: Option<&[M::State]>,
    rounds: usize,
    cfg: &SolverConfig,
    relax_cfg: &RelaxConfig,
) -> Result<KernelValueFunction<M>>
where
    M: Mdp + Send + Sync + 'static,
{
    let mut metric = Arc::clone(initial_metric);
    let mut qvf = solve(mdp, samples, &metric, rep_states, cfg)?;
    for round in 1..rounds.max(1) {
        let relaxed = relax::relaxed_metric(
            &qvf,
            &metric,
            samples,
            rep_states.unwrap_or(&[]),
            relax_cfg,
        )?;
        metric = Arc::new(relaxed);
        qvf = solve(mdp, samples, &metric, rep_states, cfg)?;
        debug!(round, "finished adaptive solve round");
    }
    Ok(qvf)
}
