// src/solver/kbsf.rs
//
// Reduced (KBSF) fixed point: project the sample-resolution problem onto a
// small set of representative states, iterate there, then lift back.
//
// Per action a, with n aligned samples and m representatives:
//   K(a): m x n  row-normalized kernel weights, representative -> sample start
//   D(a): n x m  row-normalized kernel weights, sample end -> representative
//   repReward(a) = K(a) . rewards(a)
//   P(a) = K(a) . D(a)
// Bellman iteration on the m-vector of representative values, then one
// application of D per action lifts the converged action values back to
// per-sample resolution.
//
// Any row whose raw weight sum underflows to zero gets full weight on its
// single nearest column; no row is ever left all-zero or divided by zero.

use std::sync::Arc;
use std::thread;

use ndarray::{Array1, Array2};
use tracing::{debug, info, warn};

use crate::config::SolverConfig;
use crate::error::{Result, SolverError};
use crate::geom::Vector;
use crate::kernel::{gaussian_kernel, KernelValueFunction};
use crate::mdp::{ActionSpace, Mdp, SampleTransitions};
use crate::metric::{ActionDistanceFn, DistanceFn};

use super::shard_ranges;

/// Solve by kernel-based stochastic factorization. Requires the corpus to
/// satisfy `aligned_starts` and at least one representative state.
pub fn solve<M>(
    mdp: &Arc<M>,
    rep_states: &[M::State],
    samples: &Arc<SampleTransitions<M::State, M::Action>>,
    metric: &Arc<ActionDistanceFn>,
    cfg: &SolverConfig,
) -> Result<KernelValueFunction<M>>
where
    M: Mdp + Send + Sync,
{
    let action_count = M::Action::count();
    if metric.len() != action_count {
        return Err(SolverError::MetricArity {
            expected: action_count,
            found: metric.len(),
        });
    }
    if rep_states.is_empty() {
        return Err(SolverError::NoRepresentatives);
    }
    if samples.for_index(0).is_empty() {
        return Err(SolverError::EmptySamples);
    }
    if !samples.aligned_starts() {
        return Err(SolverError::MisalignedSamples);
    }

    let n = samples.for_index(0).len();
    let m = rep_states.len();
    let gamma = mdp.discount_factor();

    // Start vectors are index-aligned across actions; memoize them and the
    // representative vectors on every action's metric.
    let xs: Vec<Vector> = samples.for_index(0).iter().map(|t| t.start().clone()).collect();
    for x in &xs {
        metric.memoize(x);
    }
    let rxs: Vec<Vector> = rep_states.iter().map(|s| mdp.vector_from_state(s)).collect();
    for rx in &rxs {
        metric.memoize(rx);
    }

    let mut ys: Vec<Vec<Vector>> = Vec::with_capacity(action_count);
    let mut rewards: Vec<Array1<f64>> = Vec::with_capacity(action_count);
    for a in 0..action_count {
        let df = metric.for_index(a);
        let transitions = samples.for_index(a);
        let mut ends = Vec::with_capacity(n);
        let mut rs = Vec::with_capacity(n);
        for t in transitions {
            df.memoize(t.end());
            ends.push(t.end().clone());
            rs.push(t.reward());
        }
        ys.push(ends);
        rewards.push(Array1::from_vec(rs));
    }
    debug!(n, m, "kbsf vectors prepared");

    // K is identical across actions when they all alias one metric.
    let shared_metric = metric.shares_single_fn();
    let mut k_shared: Option<Arc<Array2<f64>>> = None;
    let mut k_mats: Vec<Arc<Array2<f64>>> = Vec::with_capacity(action_count);
    let mut d_mats: Vec<Array2<f64>> = Vec::with_capacity(action_count);
    let mut rep_rewards: Vec<Array1<f64>> = Vec::with_capacity(action_count);
    for a in 0..action_count {
        let df = metric.for_index(a);
        let k = if let (true, Some(k)) = (shared_metric, &k_shared) {
            Arc::clone(k)
        } else {
            let k = Arc::new(weight_matrix(
                &rxs,
                &xs,
                df.as_ref(),
                cfg.bandwidth,
                cfg.threads,
            )?);
            if shared_metric {
                k_shared = Some(Arc::clone(&k));
            }
            k
        };
        rep_rewards.push(k.dot(&rewards[a]));
        d_mats.push(weight_matrix(
            &ys[a],
            &rxs,
            df.as_ref(),
            cfg.bandwidth,
            cfg.threads,
        )?);
        k_mats.push(k);
        debug!(action = a, "kbsf weight matrices built");
    }

    let p_mats = transition_products(&k_mats, &d_mats, cfg.threads)?;

    // Bellman iteration on the representative values.
    let mut action_values: Vec<Array1<f64>> = rep_rewards.clone();
    let mut values: Array1<f64> = Array1::zeros(m);
    for step in 0..cfg.step_cap {
        for a in 0..action_count {
            action_values[a] = &rep_rewards[a] + &(p_mats[a].dot(&values) * gamma);
        }
        let new_values = Array1::from_shape_fn(m, |j| {
            action_values
                .iter()
                .map(|q| q[j])
                .fold(f64::NEG_INFINITY, f64::max)
        });
        let delta = &new_values - &values;
        let max = delta.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = delta.iter().copied().fold(f64::INFINITY, f64::min);
        values = new_values;
        if max - min < cfg.kbsf_tolerance {
            info!(steps = step + 1, "kbsf inner iteration converged");
            break;
        }
        if step + 1 == cfg.step_cap {
            warn!(
                step_cap = cfg.step_cap,
                "kbsf inner iteration hit the step cap without converging"
            );
        }
    }

    // Lift back to sample resolution: one application of D per action.
    let lifted: Vec<Vec<f64>> = (0..action_count)
        .map(|a| d_mats[a].dot(&action_values[a]).to_vec())
        .collect();

    let qvf = KernelValueFunction::zeroed(
        Arc::clone(mdp),
        Arc::clone(samples),
        Arc::clone(metric),
        cfg.bandwidth,
    );
    Ok(qvf.update(lifted))
}

/// One row-normalized kernel-weight row: weights of `row_v` against every
/// column vector, normalized to sum to one, with the underflow fallback.
fn weight_row(row_v: &Vector, cols: &[Vector], df: &dyn DistanceFn, bandwidth: f64) -> Vec<f64> {
    let mut row: Vec<f64> = cols
        .iter()
        .map(|c| gaussian_kernel(df.distance(row_v, c), bandwidth))
        .collect();
    let sum: f64 = row.iter().sum();
    if sum == 0.0 {
        warn!("all-zero kernel row; bandwidth too small for this spacing");
        let mut nearest = 0;
        let mut closest = f64::INFINITY;
        for (j, c) in cols.iter().enumerate() {
            let dist = df.distance(row_v, c);
            if dist < closest {
                closest = dist;
                nearest = j;
            }
        }
        row[nearest] = 1.0;
    } else {
        for w in row.iter_mut() {
            *w /= sum;
        }
    }
    row
}

/// The full row-normalized weight matrix, rows built sequentially or in
/// positional shards across the worker set.
fn weight_matrix(
    rows: &[Vector],
    cols: &[Vector],
    df: &dyn DistanceFn,
    bandwidth: f64,
    workers: usize,
) -> Result<Array2<f64>> {
    let mut mat = Array2::zeros((rows.len(), cols.len()));
    if workers <= 1 {
        for (i, row_v) in rows.iter().enumerate() {
            let row = weight_row(row_v, cols, df, bandwidth);
            for (j, w) in row.into_iter().enumerate() {
                mat[[i, j]] = w;
            }
        }
        return Ok(mat);
    }

    let shards = shard_ranges(rows.len(), workers);
    let mut parts: Vec<Option<Vec<Vec<f64>>>> = (0..workers).map(|_| None).collect();
    let mut failed = false;
    thread::scope(|scope| {
        let handles: Vec<_> = shards
            .iter()
            .map(|shard| {
                let shard = shard.clone();
                scope.spawn(move || {
                    shard
                        .map(|i| weight_row(&rows[i], cols, df, bandwidth))
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
        return Err(SolverError::WorkerPanicked {
            phase: "kbsf matrix construction",
        });
    }
    for (shard, part) in shards.iter().zip(parts) {
        let part = part.unwrap_or_default();
        for (i, row) in shard.clone().zip(part) {
            for (j, w) in row.into_iter().enumerate() {
                mat[[i, j]] = w;
            }
        }
    }
    Ok(mat)
}

/// `P(a) = K(a) . D(a)`, one multiplication task per action when running
/// concurrently.
fn transition_products(
    k_mats: &[Arc<Array2<f64>>],
    d_mats: &[Array2<f64>],
    workers: usize,
) -> Result<Vec<Array2<f64>>> {
    if workers <= 1 {
        return Ok(k_mats
            .iter()
            .zip(d_mats)
            .map(|(k, d)| k.dot(d))
            .collect());
    }

    let mut products: Vec<Option<Array2<f64>>> = (0..k_mats.len()).map(|_| None).collect();
    let mut failed = false;
    thread::scope(|scope| {
        let handles: Vec<_> = k_mats
            .iter()
            .zip(d_mats)
            .map(|(k, d)| scope.spawn(move || k.dot(d)))
            .collect();
        for (slot, handle) in products.iter_mut().zip(handles) {
            match handle.join() {
                Ok(p) => *slot = Some(p),
                Err(_) => failed = true,
            }
        }
    });
    if failed {
        return Err(SolverError::WorkerPanicked {
            phase: "kbsf matrix product",
        });
    }
    Ok(products.into_iter().flatten().collect())
}
