// src/config.rs
//
// Central configuration for the solver stack.
//
// The convergence tolerances and step caps were hard-coded study constants
// in the system this crate descends from; here they are ordinary fields
// with those constants as defaults, so experiment drivers can load and
// sweep them.

use serde::{Deserialize, Serialize};

/// Configuration shared by both value-iteration engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Gaussian kernel bandwidth (scale of the smoothing).
    pub bandwidth: f64,
    /// Maximum number of value-iteration sweeps per solve.
    pub step_cap: usize,
    /// Early-stop threshold on the snapshot difference for the direct
    /// (KBRL) engine.
    pub kbrl_tolerance: f64,
    /// Early-stop threshold on the representative-value change for the
    /// reduced (KBSF) engine's inner loop.
    pub kbsf_tolerance: f64,
    /// Worker count for the concurrent engines. `1` selects the sequential
    /// code paths; larger values shard sweeps and matrix rows across a
    /// fork-join pool of this size.
    pub threads: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            bandwidth: 0.01,
            step_cap: 300,
            kbrl_tolerance: 1e-4,
            kbsf_tolerance: 1e-5,
            threads: 1,
        }
    }
}

impl SolverConfig {
    /// Default configuration with the given worker count.
    pub fn threaded(threads: usize) -> Self {
        Self {
            threads,
            ..Self::default()
        }
    }
}

/// Backing store for the memoized value cache inside a relaxed metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheMode {
    /// Plain locked map. Only appropriate for strictly single-threaded
    /// solves.
    Serial,
    /// Sharded concurrent map, safe under concurrent relaxation rounds.
    Concurrent,
}

/// Configuration for the metric-relaxation step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaxConfig {
    /// Relaxation rate alpha: how strongly value disagreement is blended
    /// into the positional distance.
    pub alpha: f64,
    /// Cache backing for the per-action value lookups.
    pub cache: CacheMode,
}

impl Default for RelaxConfig {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            cache: CacheMode::Concurrent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_study_constants() {
        let cfg = SolverConfig::default();
        assert_eq!(cfg.step_cap, 300);
        assert_eq!(cfg.kbrl_tolerance, 1e-4);
        assert_eq!(cfg.kbsf_tolerance, 1e-5);
        assert_eq!(cfg.threads, 1);

        let threaded = SolverConfig::threaded(8);
        assert_eq!(threaded.threads, 8);
        assert_eq!(threaded.bandwidth, cfg.bandwidth);
    }
}
