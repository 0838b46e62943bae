// src/error.rs
//
// Library error surface. Degenerate numerics (underflowed kernel rows) are
// recovered locally and never reach this type; what does reach it are the
// conditions a caller can actually act on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SolverError {
    /// A worker thread died mid-round. The whole round is aborted; no
    /// partial results are kept.
    #[error("worker thread panicked during {phase}")]
    WorkerPanicked { phase: &'static str },

    /// The reduced (KBSF) solver requires every action's transition list to
    /// have identical length and index-aligned start states.
    #[error("sample transitions are not index-aligned across actions")]
    MisalignedSamples,

    /// The per-action metric table does not cover the action set.
    #[error("metric table covers {found} actions, expected {expected}")]
    MetricArity { expected: usize, found: usize },

    #[error("no sample transitions were provided")]
    EmptySamples,

    #[error("the reduced solver requires at least one representative state")]
    NoRepresentatives,
}

pub type Result<T> = std::result::Result<T, SolverError>;
