// src/mdp.rs
//
// The external-MDP contract and the frozen transition corpus.
//
// The solver core never simulates dynamics itself; it consumes an `Mdp`
// implementation through this trait (discount factor, terminal test, the
// state <-> vector bijection and the bounding cell). `simulate` exists on
// the trait for the sampling utilities in `sampler`, which are the only
// call sites.

use crate::geom::{Cell, Vector};

/// A closed, finite, enumerable action set.
///
/// Implementors are expected to be field-less enums: `ALL` lists every
/// variant in its natural order and `index` must be the position of the
/// variant in `ALL` (a bijection with `0..count()`).
pub trait ActionSpace: Copy + Eq + Send + Sync + 'static {
    const ALL: &'static [Self];

    /// Stable zero-based ordinal of this action.
    fn index(self) -> usize;

    fn count() -> usize {
        Self::ALL.len()
    }
}

/// A continuous-state Markov decision process.
pub trait Mdp {
    type State: Clone + Send + Sync + 'static;
    type Action: ActionSpace;

    /// A draw from the start-state distribution.
    fn start_state(&self) -> Self::State;

    /// Number of dimensions in the vector representation of a state.
    fn state_dimensions(&self) -> usize;

    /// Discount factor gamma, in `(0, 1]`.
    fn discount_factor(&self) -> f64;

    /// `R(s, a, s')`. Terminal states self-transition and accrue no
    /// further reward.
    fn reward(&self, start: &Self::State, action: Self::Action, end: &Self::State) -> f64;

    fn is_terminal(&self, state: &Self::State) -> bool;

    /// One step of the dynamics; a draw when the result is stochastic.
    fn simulate(&self, state: &Self::State, action: Self::Action) -> Self::State;

    fn state_from_vector(&self, v: &Vector) -> Self::State;

    fn vector_from_state(&self, state: &Self::State) -> Vector;

    /// The smallest cell bounding the state space.
    fn state_space(&self) -> Cell;
}

/// One observed transition `(s, a, s')` with its reward computed once at
/// construction and frozen, plus the cached vector forms of both states.
#[derive(Debug, Clone)]
pub struct Transition<S, A> {
    start_state: S,
    action: A,
    end_state: S,
    start: Vector,
    end: Vector,
    reward: f64,
}

impl<S, A> Transition<S, A> {
    pub fn new(
        start_state: S,
        action: A,
        end_state: S,
        start: Vector,
        end: Vector,
        reward: f64,
    ) -> Self {
        Self {
            start_state,
            action,
            end_state,
            start,
            end,
            reward,
        }
    }

    /// Freeze a transition, reading the reward and vector forms off `mdp`.
    pub fn of<M>(mdp: &M, start_state: S, action: A, end_state: S) -> Self
    where
        M: Mdp<State = S, Action = A>,
        A: Copy,
    {
        let reward = mdp.reward(&start_state, action, &end_state);
        let start = mdp.vector_from_state(&start_state);
        let end = mdp.vector_from_state(&end_state);
        Self::new(start_state, action, end_state, start, end, reward)
    }

    pub fn start_state(&self) -> &S {
        &self.start_state
    }

    pub fn action(&self) -> &A {
        &self.action
    }

    pub fn end_state(&self) -> &S {
        &self.end_state
    }

    pub fn start(&self) -> &Vector {
        &self.start
    }

    pub fn end(&self) -> &Vector {
        &self.end
    }

    pub fn reward(&self) -> f64 {
        self.reward
    }
}

/// Immutable sample-transition corpus, partitioned by action ordinal.
///
/// The direct (KBRL) solver places no constraint on the per-action lists.
/// The reduced (KBSF) solver additionally requires `aligned_starts`: every
/// action's list has the same length and index `i` denotes the same start
/// state across all of them.
#[derive(Debug, Clone)]
pub struct SampleTransitions<S, A> {
    by_action: Vec<Vec<Transition<S, A>>>,
}

impl<S, A: ActionSpace> SampleTransitions<S, A> {
    /// `by_action[a]` holds the transitions for the action with ordinal `a`.
    pub fn new(by_action: Vec<Vec<Transition<S, A>>>) -> Self {
        assert_eq!(
            by_action.len(),
            A::count(),
            "transition corpus must cover every action exactly once"
        );
        Self { by_action }
    }

    pub fn get(&self, action: A) -> &[Transition<S, A>] {
        &self.by_action[action.index()]
    }

    pub fn for_index(&self, action_index: usize) -> &[Transition<S, A>] {
        &self.by_action[action_index]
    }

    pub fn action_count(&self) -> usize {
        self.by_action.len()
    }

    /// Total number of transitions across all actions.
    pub fn len(&self) -> usize {
        self.by_action.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_action.iter().all(Vec::is_empty)
    }

    /// True when every action's list has identical length and index-aligned
    /// start vectors. Precondition of the reduced (KBSF) solving path.
    pub fn aligned_starts(&self) -> bool {
        let first = &self.by_action[0];
        self.by_action.iter().skip(1).all(|list| {
            list.len() == first.len()
                && list
                    .iter()
                    .zip(first.iter())
                    .all(|(t, f)| t.start() == f.start())
        })
    }
}
