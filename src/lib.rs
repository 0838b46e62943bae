//! Kerval: kernel-based value-function approximation for continuous-state
//! MDPs.
//!
//! The crate approximates the optimal value function of an MDP from a
//! frozen corpus of sampled transitions, three ways:
//!
//! - **KBRL** (`solver::kbrl`): direct kernel regression, Jacobi value
//!   iteration at full sample resolution.
//! - **KBSF** (`solver::kbsf`): reduced-rank projection onto a small set
//!   of representative states, dense fixed-point iteration there, and a
//!   lift back to sample resolution.
//! - **DAVR** (`relax`): iterative metric relaxation; after each solve,
//!   the per-action distance is reshaped by the learned value function's
//!   local sensitivity and the problem is solved again
//!   (`solver::solve_adaptive`).
//!
//! # Architecture
//!
//! - **Geometry** (`geom`): immutable vectors and bounding cells.
//! - **MDP contract** (`mdp`): the `Mdp`/`ActionSpace` traits the solver
//!   consumes, plus the frozen transition corpus. The solvers never call
//!   `simulate`; only the sampling utilities do.
//! - **Metrics** (`metric`): the `DistanceFn` abstraction with its
//!   `memoize` hook, and the per-action metric table.
//! - **Coverage filter** (`filter`): grid-bucketed point store used to
//!   thin random walks into spatially even sample and representative sets.
//! - **Value function** (`kernel`): immutable kernel-smoothed Q snapshots;
//!   every sweep produces a new snapshot, so concurrent readers never need
//!   a lock and convergence is a pure diff.
//! - **Engines** (`solver`): sequential and fork-join concurrent variants
//!   of both fixed points, behind one `solve` entry point.
//!
//! Determinism: identical inputs produce identical value functions
//! regardless of worker count (work is sharded positionally), and all
//! randomized tie-breaking takes a caller-supplied RNG.

pub mod config;
pub mod error;
pub mod filter;
pub mod geom;
pub mod kernel;
pub mod mdp;
pub mod metric;
pub mod relax;
pub mod sampler;
pub mod solver;

pub use config::{CacheMode, RelaxConfig, SolverConfig};
pub use error::{Result, SolverError};
pub use filter::GridFilter;
pub use geom::{Cell, Interval, Vector};
pub use kernel::{ActionValueFn, KernelValueFunction, StateValueFn};
pub use mdp::{ActionSpace, Mdp, SampleTransitions, Transition};
pub use metric::{ActionDistanceFn, DistanceFn, EuclideanDf, NormalizedDf};
pub use relax::{relaxed_metric, ValueSmoothingDf};
pub use sampler::{generate_transitions, sample_states, SamplingStrategy};
pub use solver::{solve, solve_adaptive};
