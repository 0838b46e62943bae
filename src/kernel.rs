// src/kernel.rs
//
// Kernel-smoothed state-action value representation.
//
// Q(x, a) is the Gaussian-weighted average, over the sampled transitions
// for action a, of the one-step bootstrap targets r_i + gamma * v_i, where
// the v_i arrays are supplied by the value-iteration engines. Snapshots are
// immutable: `update` returns a new instance, so a sweep's workers can read
// the previous snapshot without any locking and convergence is a pure diff
// between two snapshots.

use std::sync::Arc;

use crate::geom::Vector;
use crate::mdp::{ActionSpace, Mdp, SampleTransitions};
use crate::metric::ActionDistanceFn;

/// `exp(-(x / sigma)^2)`, the unnormalized Gaussian kernel weight.
pub fn gaussian_kernel(x: f64, sigma: f64) -> f64 {
    (-x * x / (sigma * sigma)).exp()
}

/// A scalar field over state vectors. The per-action slice of a
/// [`KernelValueFunction`] implements this; the metric relaxer smooths
/// against it.
pub trait StateValueFn: Send + Sync {
    fn value(&self, v: &Vector) -> f64;
}

/// Immutable snapshot of a kernel-smoothed Q-function.
pub struct KernelValueFunction<M: Mdp> {
    mdp: Arc<M>,
    samples: Arc<SampleTransitions<M::State, M::Action>>,
    metric: Arc<ActionDistanceFn>,
    bandwidth: f64,
    /// Cached bootstrap end-state values, `[action ordinal][sample index]`.
    end_state_values: Arc<Vec<Vec<f64>>>,
}

impl<M: Mdp> Clone for KernelValueFunction<M> {
    fn clone(&self) -> Self {
        Self {
            mdp: Arc::clone(&self.mdp),
            samples: Arc::clone(&self.samples),
            metric: Arc::clone(&self.metric),
            bandwidth: self.bandwidth,
            end_state_values: Arc::clone(&self.end_state_values),
        }
    }
}

impl<M: Mdp> KernelValueFunction<M> {
    /// A fresh snapshot with all-zero end-state values.
    pub fn zeroed(
        mdp: Arc<M>,
        samples: Arc<SampleTransitions<M::State, M::Action>>,
        metric: Arc<ActionDistanceFn>,
        bandwidth: f64,
    ) -> Self {
        let end_state_values = (0..M::Action::count())
            .map(|a| vec![0.0; samples.for_index(a).len()])
            .collect();
        Self {
            mdp,
            samples,
            metric,
            bandwidth,
            end_state_values: Arc::new(end_state_values),
        }
    }

    /// A new snapshot with the end-state value arrays replaced. `self` is
    /// untouched.
    pub fn update(&self, end_state_values: Vec<Vec<f64>>) -> Self {
        Self {
            mdp: Arc::clone(&self.mdp),
            samples: Arc::clone(&self.samples),
            metric: Arc::clone(&self.metric),
            bandwidth: self.bandwidth,
            end_state_values: Arc::new(end_state_values),
        }
    }

    pub fn mdp(&self) -> &Arc<M> {
        &self.mdp
    }

    pub fn samples(&self) -> &Arc<SampleTransitions<M::State, M::Action>> {
        &self.samples
    }

    pub fn metric(&self) -> &Arc<ActionDistanceFn> {
        &self.metric
    }

    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    /// `Q(x, a)` for a state already in vector form.
    ///
    /// When every kernel weight underflows to zero (bandwidth far below all
    /// sample distances) the single nearest sample's target is returned
    /// instead; this never yields NaN and never divides by zero.
    pub fn value_at_vector(&self, x: &Vector, action: M::Action) -> f64 {
        let a = action.index();
        let transitions = self.samples.for_index(a);
        if transitions.is_empty() {
            return 0.0;
        }
        let df = self.metric.for_index(a);
        let gamma = self.mdp.discount_factor();
        let values = &self.end_state_values[a];

        let mut sum = 0.0;
        let mut acc = 0.0;
        let mut min_dist = f64::INFINITY;
        let mut nearest_target = 0.0;
        for (i, t) in transitions.iter().enumerate() {
            let dist = df.distance(x, t.start());
            let target = t.reward() + gamma * values[i];
            if dist < min_dist {
                min_dist = dist;
                nearest_target = target;
            }
            let w = gaussian_kernel(dist, self.bandwidth);
            sum += w;
            acc += w * target;
        }
        if sum == 0.0 {
            nearest_target
        } else {
            acc / sum
        }
    }

    /// `Q(state, action)`.
    pub fn value_for(&self, state: &M::State, action: M::Action) -> f64 {
        self.value_at_vector(&self.mdp.vector_from_state(state), action)
    }

    /// `V(state) = max over actions of Q(state, action)`.
    pub fn value(&self, state: &M::State) -> f64 {
        let x = self.mdp.vector_from_state(state);
        M::Action::ALL
            .iter()
            .map(|&a| self.value_at_vector(&x, a))
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Greedy action; ties broken by the fixed enumeration order (the first
    /// maximal action wins).
    pub fn greedy_action(&self, state: &M::State) -> M::Action {
        let x = self.mdp.vector_from_state(state);
        let mut best = M::Action::ALL[0];
        let mut best_value = f64::NEG_INFINITY;
        for &a in M::Action::ALL {
            let value = self.value_at_vector(&x, a);
            if value > best_value {
                best_value = value;
                best = a;
            }
        }
        best
    }

    /// Largest stored end-state value for `action`.
    pub fn max_value(&self, action: M::Action) -> f64 {
        self.end_state_values[action.index()]
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Smallest stored end-state value for `action`.
    pub fn min_value(&self, action: M::Action) -> f64 {
        self.end_state_values[action.index()]
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min)
    }

    /// Convergence signal between two snapshots: the spread (max minus min)
    /// of the elementwise differences of the stored arrays. Not a metric.
    pub fn difference(&self, other: &Self) -> f64 {
        let mut max = f64::NEG_INFINITY;
        let mut min = f64::INFINITY;
        for (ours, theirs) in self.end_state_values.iter().zip(other.end_state_values.iter()) {
            for (a, b) in ours.iter().zip(theirs.iter()) {
                let d = a - b;
                max = max.max(d);
                min = min.min(d);
            }
        }
        max - min
    }

    /// The scalar field `V_a(x) = Q(x, a)` for a fixed action.
    pub fn action_value_fn(&self, action: M::Action) -> ActionValueFn<M> {
        ActionValueFn {
            qvf: self.clone(),
            action,
        }
    }
}

/// A [`KernelValueFunction`] restricted to one action.
pub struct ActionValueFn<M: Mdp> {
    qvf: KernelValueFunction<M>,
    action: M::Action,
}

impl<M: Mdp + Send + Sync> StateValueFn for ActionValueFn<M> {
    fn value(&self, v: &Vector) -> f64 {
        self.qvf.value_at_vector(v, self.action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::{Cell, Vector};
    use crate::mdp::Transition;
    use crate::metric::EuclideanDf;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Dir {
        Left,
        Right,
    }

    impl ActionSpace for Dir {
        const ALL: &'static [Self] = &[Dir::Left, Dir::Right];

        fn index(self) -> usize {
            match self {
                Dir::Left => 0,
                Dir::Right => 1,
            }
        }
    }

    struct Line;

    impl Mdp for Line {
        type State = f64;
        type Action = Dir;

        fn start_state(&self) -> f64 {
            0.0
        }

        fn state_dimensions(&self) -> usize {
            1
        }

        fn discount_factor(&self) -> f64 {
            0.5
        }

        fn reward(&self, _start: &f64, _action: Dir, _end: &f64) -> f64 {
            -1.0
        }

        fn is_terminal(&self, _state: &f64) -> bool {
            false
        }

        fn simulate(&self, state: &f64, action: Dir) -> f64 {
            match action {
                Dir::Left => state - 0.1,
                Dir::Right => state + 0.1,
            }
        }

        fn state_from_vector(&self, v: &Vector) -> f64 {
            v.get(0)
        }

        fn vector_from_state(&self, state: &f64) -> Vector {
            Vector::new(vec![*state])
        }

        fn state_space(&self) -> Cell {
            Cell::unit(1)
        }
    }

    fn fixture(rewards: [f64; 2]) -> KernelValueFunction<Line> {
        let mdp = Arc::new(Line);
        let by_action = Dir::ALL
            .iter()
            .enumerate()
            .map(|(a, &action)| {
                vec![
                    Transition::new(
                        0.2,
                        action,
                        0.3,
                        Vector::new(vec![0.2]),
                        Vector::new(vec![0.3]),
                        rewards[a],
                    ),
                    Transition::new(
                        0.8,
                        action,
                        0.7,
                        Vector::new(vec![0.8]),
                        Vector::new(vec![0.7]),
                        rewards[a],
                    ),
                ]
            })
            .collect();
        let samples = Arc::new(SampleTransitions::new(by_action));
        let metric = Arc::new(ActionDistanceFn::of_shared(2, Arc::new(EuclideanDf)));
        KernelValueFunction::zeroed(mdp, samples, metric, 0.1)
    }

    #[test]
    fn state_value_is_max_over_actions() {
        let qvf = fixture([-1.0, -2.0]).update(vec![vec![1.0, 3.0], vec![5.0, -2.0]]);
        for state in [0.1, 0.25, 0.5, 0.77] {
            let by_action: Vec<f64> = Dir::ALL
                .iter()
                .map(|&a| qvf.value_for(&state, a))
                .collect();
            let expected = by_action.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            assert_eq!(qvf.value(&state), expected);
        }
    }

    #[test]
    fn ties_break_toward_first_action() {
        let qvf = fixture([-1.0, -1.0]);
        // Identical samples and targets for both actions: exact tie.
        assert_eq!(qvf.greedy_action(&0.5), Dir::Left);
    }

    #[test]
    fn underflowed_kernel_falls_back_to_nearest_sample() {
        let qvf = fixture([-1.0, -1.0]).update(vec![vec![10.0, 20.0], vec![0.0, 0.0]]);
        // Bandwidth 0.1 but the query sits ~40 bandwidths from either
        // sample: every weight underflows to zero.
        let far = 5.0;
        let value = qvf.value_for(&far, Dir::Left);
        assert!(value.is_finite());
        // Nearest sample is the one at 0.8: target -1 + 0.5 * 20.
        assert_eq!(value, 9.0);
    }

    #[test]
    fn update_leaves_old_snapshot_untouched() {
        let old = fixture([-1.0, -1.0]);
        let new = old.update(vec![vec![1.0, 1.0], vec![1.0, 1.0]]);
        assert_eq!(old.max_value(Dir::Left), 0.0);
        assert_eq!(new.max_value(Dir::Left), 1.0);
        assert_eq!(old.difference(&new), 0.0);

        let skewed = old.update(vec![vec![2.0, -1.0], vec![0.0, 0.0]]);
        // Differences span [-2, 1]: spread 3.
        assert_eq!(skewed.difference(&old), 3.0);
    }
}
