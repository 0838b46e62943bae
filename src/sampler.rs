// src/sampler.rs
//
// State sampling strategies and one-step transition generation.
//
// These utilities build the two point sets the solvers consume: the start
// states of the transition corpus and the representative set for the
// reduced solver. They are the only place the crate calls
// `Mdp::simulate`; the solvers themselves never touch the dynamics.

use rand::Rng;
use tracing::debug;

use crate::filter::GridFilter;
use crate::geom::{Cell, Vector};
use crate::mdp::{ActionSpace, Mdp, SampleTransitions, Transition};

/// How to pick start / representative states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingStrategy {
    /// A regular lattice over the bounding cell.
    Tiling,
    /// Independent uniform draws from the bounding cell.
    Random,
    /// A random walk through the dynamics, thinned to an even covering set.
    Coverage,
}

/// Walk length used by [`SamplingStrategy::Coverage`] when none is given.
const COVERAGE_WALK_ITERS: usize = 1_500_000;
/// Restart cap for walks that never reach a terminal state.
const COVERAGE_WALK_RESTART: usize = 300_000;

/// Points per axis for the smallest lattice with at least `samples` points.
fn tiles(samples: usize, dimensions: usize) -> usize {
    let mut per = 1 + (samples.saturating_sub(1) as f64)
        .powf(1.0 / dimensions as f64)
        .floor() as usize;
    // powf can land a hair under an exact integer root.
    while per.pow(dimensions as u32) < samples {
        per += 1;
    }
    per
}

/// A vector drawn uniformly at random from `domain`.
pub fn sample_uniform(domain: &Cell, rng: &mut impl Rng) -> Vector {
    let data = (0..domain.dimensions())
        .map(|i| {
            let itv = domain.interval(i);
            itv.start() + rng.gen::<f64>() * itv.width()
        })
        .collect();
    Vector::new(data)
}

/// The cell-centered lattice with `per_dim` points per axis.
pub fn tiling_vectors(domain: &Cell, per_dim: usize) -> Vec<Vector> {
    let dimensions = domain.dimensions();
    let mut ret = Vec::new();
    let mut counter = vec![0_usize; dimensions];
    loop {
        let point = (0..dimensions)
            .map(|i| {
                let itv = domain.interval(i);
                let step = itv.width() / per_dim as f64;
                itv.start() + step * (counter[i] as f64 + 0.5)
            })
            .collect();
        ret.push(Vector::new(point));

        let mut i = 0;
        loop {
            if i == dimensions {
                return ret;
            }
            counter[i] += 1;
            if counter[i] < per_dim {
                break;
            }
            counter[i] = 0;
            i += 1;
        }
    }
}

/// Sample `n` states with the given strategy. Tiling may return slightly
/// more than `n`: the smallest lattice that tiles the space evenly.
pub fn sample_states<M: Mdp>(
    mdp: &M,
    strategy: SamplingStrategy,
    n: usize,
    rng: &mut impl Rng,
) -> Vec<M::State> {
    match strategy {
        SamplingStrategy::Tiling => tiling_sample(mdp, n),
        SamplingStrategy::Random => random_sample(mdp, n, rng),
        SamplingStrategy::Coverage => {
            coverage_sample(mdp, n, COVERAGE_WALK_ITERS, COVERAGE_WALK_RESTART, rng)
        }
    }
}

/// States on the smallest even lattice with at least `n` points.
pub fn tiling_sample<M: Mdp>(mdp: &M, n: usize) -> Vec<M::State> {
    let per_dim = tiles(n, mdp.state_dimensions());
    tiling_vectors(&mdp.state_space(), per_dim)
        .iter()
        .map(|v| mdp.state_from_vector(v))
        .collect()
}

/// `n` states drawn independently and uniformly from the bounding cell.
pub fn random_sample<M: Mdp>(mdp: &M, n: usize, rng: &mut impl Rng) -> Vec<M::State> {
    (0..n)
        .map(|_| mdp.state_from_vector(&sample_uniform(&mdp.state_space(), rng)))
        .collect()
}

/// `n` states covering the *reachable* part of the state space: a long
/// random walk bucketed through a [`GridFilter`], re-gridded finer when the
/// walk occupies too few buckets, then coverage-subsampled.
pub fn coverage_sample<M: Mdp>(
    mdp: &M,
    n: usize,
    walk_iters: usize,
    restart_cap: usize,
    rng: &mut impl Rng,
) -> Vec<M::State> {
    assert!(walk_iters >= n, "walk must visit at least n states");
    let dimensions = mdp.state_dimensions();
    let mut cells = tiles(n.min(20_000), dimensions).saturating_sub(1).max(1);

    let walk = random_walk(mdp, walk_iters, restart_cap, rng);
    let mut filter = GridFilter::new(mdp.state_space(), cells);
    filter.insert_all(walk.iter().map(|s| mdp.vector_from_state(s)));

    if filter.occupied_buckets() * 4 < n {
        // The walk concentrated in few buckets; re-grid finer so the
        // subsample has enough buckets to spread over.
        let factor = 1 + (n as f64 / filter.occupied_buckets() as f64)
            .powf(1.0 / dimensions as f64) as usize;
        cells *= factor;
        debug!(cells, "re-gridding sparse coverage filter");
        filter = GridFilter::new(mdp.state_space(), cells);
        filter.insert_all(walk.iter().map(|s| mdp.vector_from_state(s)));
    }
    debug!(
        occupied = filter.occupied_buckets(),
        total = cells.pow(dimensions as u32),
        "coverage walk bucket occupancy"
    );

    filter
        .subsample(n, rng)
        .iter()
        .map(|v| mdp.state_from_vector(v))
        .collect()
}

/// Random walk under uniformly random actions, restarting from the start
/// state on termination or after `restart_cap` steps without one.
pub fn random_walk<M: Mdp>(
    mdp: &M,
    iters: usize,
    restart_cap: usize,
    rng: &mut impl Rng,
) -> Vec<M::State> {
    let actions = M::Action::ALL;
    let mut states = Vec::with_capacity(iters);
    let mut state = mdp.start_state();
    states.push(state.clone());
    let mut since_restart = 0;
    while states.len() < iters {
        let action = actions[rng.gen_range(0..actions.len())];
        state = mdp.simulate(&state, action);
        states.push(state.clone());
        since_restart += 1;
        if mdp.is_terminal(&state) || since_restart >= restart_cap {
            state = mdp.start_state();
            since_restart = 0;
        }
    }
    states
}

/// Simulate one step from every start state under every action and freeze
/// the results into a corpus. Index `i` of every action's list shares start
/// state `states[i]`, so the result satisfies the reduced solver's
/// alignment requirement.
pub fn generate_transitions<M: Mdp>(
    mdp: &M,
    states: &[M::State],
) -> SampleTransitions<M::State, M::Action> {
    let by_action = M::Action::ALL
        .iter()
        .map(|&action| {
            states
                .iter()
                .map(|state| {
                    let end = mdp.simulate(state, action);
                    Transition::of(mdp, state.clone(), action, end)
                })
                .collect()
        })
        .collect();
    SampleTransitions::new(by_action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mdp::ActionSpace;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Step {
        Down,
        Up,
    }

    impl ActionSpace for Step {
        const ALL: &'static [Self] = &[Step::Down, Step::Up];

        fn index(self) -> usize {
            match self {
                Step::Down => 0,
                Step::Up => 1,
            }
        }
    }

    /// Unbounded drift on [0, 1]; never terminates, so walks only restart
    /// at the cap.
    struct Drift;

    impl Mdp for Drift {
        type State = f64;
        type Action = Step;

        fn start_state(&self) -> f64 {
            0.5
        }

        fn state_dimensions(&self) -> usize {
            1
        }

        fn discount_factor(&self) -> f64 {
            0.95
        }

        fn reward(&self, _start: &f64, _action: Step, _end: &f64) -> f64 {
            0.0
        }

        fn is_terminal(&self, _state: &f64) -> bool {
            false
        }

        fn simulate(&self, state: &f64, action: Step) -> f64 {
            let delta = match action {
                Step::Down => -0.03,
                Step::Up => 0.03,
            };
            (state + delta).clamp(0.0, 1.0)
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

    #[test]
    fn coverage_sample_returns_n_reachable_states() {
        let mut rng = ChaCha8Rng::seed_from_u64(13);
        let states = coverage_sample(&Drift, 12, 4000, 800, &mut rng);
        assert_eq!(states.len(), 12);
        for s in &states {
            assert!((0.0..=1.0).contains(s));
        }
    }

    #[test]
    fn random_walk_restarts_at_the_cap() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        // With a restart cap of 1 every step begins from the start state,
        // so every visited state is one action away from 0.5.
        let walk = random_walk(&Drift, 50, 1, &mut rng);
        assert_eq!(walk.len(), 50);
        for s in &walk[1..] {
            assert!((s - 0.5).abs() > 0.02 && (s - 0.5).abs() < 0.04);
        }
    }

    #[test]
    fn generated_transitions_are_aligned() {
        let states = [0.1, 0.4, 0.7];
        let samples = generate_transitions(&Drift, &states);
        assert!(samples.aligned_starts());
        assert_eq!(samples.get(Step::Up).len(), 3);
        assert!((samples.get(Step::Up)[1].end().get(0) - 0.43).abs() < 1e-12);
    }

    #[test]
    fn tiles_covers_request() {
        assert_eq!(tiles(50, 1), 50);
        assert_eq!(tiles(1, 3), 1);
        // 7^2 = 49 < 50, so two dimensions need 8 per axis.
        assert_eq!(tiles(50, 2), 8);
    }

    #[test]
    fn tiling_vectors_are_cell_centered() {
        let domain = Cell::regular(1, 2.0, 1.0);
        let vs = tiling_vectors(&domain, 4);
        assert_eq!(vs.len(), 4);
        assert!((vs[0].get(0) - 2.125).abs() < 1e-12);
        assert!((vs[3].get(0) - 2.875).abs() < 1e-12);
    }

    #[test]
    fn uniform_draws_stay_in_domain() {
        let domain = Cell::of(vec![
            crate::geom::Interval::new(-2.0, 4.0),
            crate::geom::Interval::new(10.0, 0.5),
        ]);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..200 {
            assert!(domain.contains(&sample_uniform(&domain, &mut rng)));
        }
    }
}
