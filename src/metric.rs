// src/metric.rs
//
// Distance abstractions for the kernel machinery:
// - DistanceFn: a (roughly symmetric, non-negative) distance with a
//   `memoize` hook for vectors that will be queried repeatedly
// - EuclideanDf / NormalizedDf: the positional baselines
// - ActionDistanceFn: the per-action metric table
//
// Distance evaluation dominates the cost of every solve, which is why the
// memoize hook is part of the contract rather than an implementation detail.

use std::sync::Arc;

use crate::geom::{Cell, Vector};
use crate::mdp::ActionSpace;

/// A distance over state vectors.
///
/// Not required to be a true metric (the triangle inequality may only hold
/// approximately) but must be non-negative with `distance(v, v) == 0`.
/// Implementations are shared across worker shards, so any internal caching
/// must be safe behind `&self`.
pub trait DistanceFn: Send + Sync {
    fn distance(&self, a: &Vector, b: &Vector) -> f64;

    /// Note a vector that will be queried repeatedly. Implementations may
    /// precompute and cache per-vector state; the default does nothing.
    fn memoize(&self, _v: &Vector) {}
}

/// Plain Euclidean distance.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanDf;

impl DistanceFn for EuclideanDf {
    fn distance(&self, a: &Vector, b: &Vector) -> f64 {
        a.squared_distance(b).sqrt()
    }
}

/// Euclidean distance in domain-normalized coordinates: every axis is
/// rescaled by its bounding-interval width, so a full sweep of any one
/// dimension contributes 1 to the squared distance.
#[derive(Debug, Clone)]
pub struct NormalizedDf {
    inv_widths: Vec<f64>,
}

impl NormalizedDf {
    pub fn for_domain(domain: &Cell) -> Self {
        let inv_widths = (0..domain.dimensions())
            .map(|i| {
                let w = domain.interval(i).width();
                if w > 0.0 {
                    1.0 / w
                } else {
                    0.0
                }
            })
            .collect();
        Self { inv_widths }
    }
}

impl DistanceFn for NormalizedDf {
    fn distance(&self, a: &Vector, b: &Vector) -> f64 {
        self.inv_widths
            .iter()
            .enumerate()
            .map(|(i, inv)| {
                let d = (a.get(i) - b.get(i)) * inv;
                d * d
            })
            .sum::<f64>()
            .sqrt()
    }
}

/// Immutable mapping from action ordinal to distance function.
#[derive(Clone)]
pub struct ActionDistanceFn {
    fns: Vec<Arc<dyn DistanceFn>>,
}

impl ActionDistanceFn {
    pub fn from_fns(fns: Vec<Arc<dyn DistanceFn>>) -> Self {
        Self { fns }
    }

    /// Use one shared distance function for every action.
    pub fn of_shared(action_count: usize, df: Arc<dyn DistanceFn>) -> Self {
        Self {
            fns: (0..action_count).map(|_| Arc::clone(&df)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.fns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fns.is_empty()
    }

    pub fn get<A: ActionSpace>(&self, action: A) -> &Arc<dyn DistanceFn> {
        &self.fns[action.index()]
    }

    pub fn for_index(&self, action_index: usize) -> &Arc<dyn DistanceFn> {
        &self.fns[action_index]
    }

    /// Broadcast `memoize` to every entry.
    pub fn memoize(&self, v: &Vector) {
        for df in &self.fns {
            df.memoize(v);
        }
    }

    /// True when every action aliases one underlying instance. The reduced
    /// solver uses this to build its representative-weight matrix once.
    pub fn shares_single_fn(&self) -> bool {
        self.fns
            .iter()
            .skip(1)
            .all(|df| Arc::ptr_eq(df, &self.fns[0]))
    }
}
