// src/relax.rs
//
// Metric relaxation: reshape a per-action distance so that states whose
// values disagree are pushed apart, approximating the effect of latent
// extra state dimensions.
//
//   d'(x, y)^2 = (d(x, y)^2 + c1 * |V_a(x) - V_a(y)|^2) / (1 + alpha^2)
//   c1         = alpha^2 / target_slope^2
//
// Value lookups dominate the cost of the relaxed metric, so every vector
// the next solve round will query is memoized at construction time, one
// worker task per action.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::config::{CacheMode, RelaxConfig};
use crate::error::{Result, SolverError};
use crate::geom::Vector;
use crate::kernel::{KernelValueFunction, StateValueFn};
use crate::mdp::{ActionSpace, Mdp, SampleTransitions};
use crate::metric::{ActionDistanceFn, DistanceFn};

enum ValueCache {
    Serial(RwLock<HashMap<Vector, f64>>),
    Concurrent(DashMap<Vector, f64>),
}

impl ValueCache {
    fn new(mode: CacheMode) -> Self {
        match mode {
            CacheMode::Serial => ValueCache::Serial(RwLock::new(HashMap::new())),
            CacheMode::Concurrent => ValueCache::Concurrent(DashMap::new()),
        }
    }

    fn get(&self, v: &Vector) -> Option<f64> {
        match self {
            ValueCache::Serial(map) => map.read().get(v).copied(),
            ValueCache::Concurrent(map) => map.get(v).map(|entry| *entry),
        }
    }

    fn insert(&self, v: Vector, value: f64) {
        match self {
            ValueCache::Serial(map) => {
                map.write().insert(v, value);
            }
            ValueCache::Concurrent(map) => {
                map.insert(v, value);
            }
        }
    }
}

/// A distance that blends a base metric with value disagreement under a
/// fixed scalar field.
pub struct ValueSmoothingDf {
    base: Arc<dyn DistanceFn>,
    vf: Box<dyn StateValueFn>,
    c1: f64,
    alpha_sq: f64,
    cache: ValueCache,
}

impl ValueSmoothingDf {
    /// `target_slope` is the expected value change per unit of positional
    /// distance, `(max - min) / diam`; it normalizes the value term so
    /// `alpha` is a dimensionless blend rate. A zero or non-finite slope
    /// (a flat field) degrades to the positional metric.
    pub fn new(
        base: Arc<dyn DistanceFn>,
        vf: Box<dyn StateValueFn>,
        target_slope: f64,
        alpha: f64,
        cache: CacheMode,
    ) -> Self {
        let alpha_sq = alpha * alpha;
        let c1 = if target_slope.is_finite() && target_slope > 0.0 {
            alpha_sq / (target_slope * target_slope)
        } else {
            0.0
        };
        Self {
            base,
            vf,
            c1,
            alpha_sq,
            cache: ValueCache::new(cache),
        }
    }

    fn value(&self, v: &Vector) -> f64 {
        if let Some(cached) = self.cache.get(v) {
            return cached;
        }
        let value = self.vf.value(v);
        self.cache.insert(v.clone(), value);
        value
    }
}

impl DistanceFn for ValueSmoothingDf {
    fn distance(&self, a: &Vector, b: &Vector) -> f64 {
        let dx = self.base.distance(a, b);
        let dy = (self.value(a) - self.value(b)).abs();
        ((dx * dx + dy * dy * self.c1) / (1.0 + self.alpha_sq)).sqrt()
    }

    fn memoize(&self, v: &Vector) {
        self.value(v);
    }
}

/// Build the relaxed per-action metric for a converged value function.
///
/// One construction task is dispatched per action; each builds that
/// action's [`ValueSmoothingDf`] and memoizes every vector the next round
/// of value iteration will query: the action's own start vectors, the end
/// vectors of *every* action, and the given extra (representative) states.
/// The calling thread joins all tasks before assembling the table; a
/// failed task aborts the whole round.
pub fn relaxed_metric<M>(
    qvf: &KernelValueFunction<M>,
    previous: &ActionDistanceFn,
    samples: &SampleTransitions<M::State, M::Action>,
    extra_states: &[M::State],
    cfg: &RelaxConfig,
) -> Result<ActionDistanceFn>
where
    M: Mdp + Send + Sync + 'static,
{
    let action_count = M::Action::count();
    if previous.len() != action_count {
        return Err(SolverError::MetricArity {
            expected: action_count,
            found: previous.len(),
        });
    }
    let mdp = qvf.mdp();
    let x_spread = (mdp.state_dimensions() as f64).sqrt();

    let mut fns: Vec<Option<Arc<dyn DistanceFn>>> = (0..action_count).map(|_| None).collect();
    let mut failed = false;
    thread::scope(|scope| {
        let handles: Vec<_> = M::Action::ALL
            .iter()
            .map(|&action| {
                scope.spawn(move || {
                    let y_spread = qvf.max_value(action) - qvf.min_value(action);
                    let slope = y_spread / x_spread;
                    let df = ValueSmoothingDf::new(
                        Arc::clone(previous.get(action)),
                        Box::new(qvf.action_value_fn(action)),
                        slope,
                        cfg.alpha,
                        cfg.cache,
                    );
                    for t in samples.get(action) {
                        df.memoize(t.start());
                    }
                    for a in 0..action_count {
                        for t in samples.for_index(a) {
                            df.memoize(t.end());
                        }
                    }
                    for state in extra_states {
                        df.memoize(&mdp.vector_from_state(state));
                    }
                    debug!(action = action.index(), slope, "relaxed action metric built");
                    Arc::new(df) as Arc<dyn DistanceFn>
                })
            })
            .collect();
        for (slot, handle) in fns.iter_mut().zip(handles) {
            match handle.join() {
                Ok(df) => *slot = Some(df),
                Err(_) => failed = true,
            }
        }
    });
    if failed {
        return Err(SolverError::WorkerPanicked {
            phase: "metric relaxation",
        });
    }
    Ok(ActionDistanceFn::from_fns(
        fns.into_iter().flatten().collect(),
    ))
}
