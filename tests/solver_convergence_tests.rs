// tests/solver_convergence_tests.rs
//
// Integration tests for both value-iteration engines:
// 1. KBRL converges to the closed-form value of a 1-D absorbing chain, and
//    the error shrinks as the sample density rises (with bandwidth scaled
//    to the spacing).
// 2. KBSF matches the closed form when the representative set equals the
//    sample set, and preserves the greedy policy under a genuine reduction.
// 3. Sequential and concurrent solves of identical inputs agree to within
//    floating-point noise (the sharding is positional, so they are in fact
//    identical).
// 4. End-to-end: the greedy policy on an interval MDP moves every interior
//    sample toward its nearer boundary.

mod common;

use std::sync::Arc;

use common::{chain_grid, ChainAction, ChainMdp, IntervalMdp, Shift, INTERVAL_SPAN};
use kerval::{
    generate_transitions, solve, ActionDistanceFn, ActionSpace, EuclideanDf, KernelValueFunction,
    Mdp, SampleTransitions, SolverConfig,
};

fn chain_setup(
    spacing: f64,
    include_goal: bool,
) -> (
    Arc<ChainMdp>,
    Vec<f64>,
    Arc<SampleTransitions<f64, ChainAction>>,
    Arc<ActionDistanceFn>,
) {
    let mdp = Arc::new(ChainMdp::new(0.9));
    let states = chain_grid(spacing, include_goal);
    let samples = Arc::new(generate_transitions(mdp.as_ref(), &states));
    let metric = Arc::new(ActionDistanceFn::of_shared(2, Arc::new(EuclideanDf)));
    (mdp, states, samples, metric)
}

fn max_chain_error(mdp: &ChainMdp, states: &[f64], qvf: &KernelValueFunction<ChainMdp>) -> f64 {
    states
        .iter()
        .filter(|x| !mdp.is_terminal(x))
        .map(|x| (qvf.value_for(x, ChainAction::Advance) - mdp.closed_form_value(*x)).abs())
        .fold(0.0, f64::max)
}

#[test]
fn kbrl_converges_to_chain_closed_form() {
    let (mdp, states, samples, metric) = chain_setup(0.025, false);
    let cfg = SolverConfig {
        bandwidth: 0.008,
        ..SolverConfig::default()
    };
    let qvf = solve(&mdp, &samples, &metric, None, &cfg).expect("kbrl solve");
    assert!(
        max_chain_error(&mdp, &states, &qvf) < 0.02,
        "max error {} too large",
        max_chain_error(&mdp, &states, &qvf)
    );
}

#[test]
fn kbrl_error_shrinks_with_sample_density() {
    // Coarse sampling with a bandwidth two spacings wide smears the value
    // function; dense sampling with a tight bandwidth recovers it.
    let (mdp, coarse_states, coarse_samples, metric) = chain_setup(0.1, false);
    let coarse_cfg = SolverConfig {
        bandwidth: 0.05,
        ..SolverConfig::default()
    };
    let coarse = solve(&mdp, &coarse_samples, &metric, None, &coarse_cfg).expect("coarse solve");
    let coarse_error = max_chain_error(&mdp, &coarse_states, &coarse);

    let (_, fine_states, fine_samples, _) = chain_setup(0.025, false);
    let fine_cfg = SolverConfig {
        bandwidth: 0.008,
        ..SolverConfig::default()
    };
    let fine = solve(&mdp, &fine_samples, &metric, None, &fine_cfg).expect("fine solve");
    let fine_error = max_chain_error(&mdp, &fine_states, &fine);

    assert!(coarse_error < 0.3, "coarse error {coarse_error}");
    assert!(fine_error < 0.02, "fine error {fine_error}");
    assert!(fine_error < coarse_error);
}

#[test]
fn kbsf_with_full_representative_set_matches_closed_form() {
    let (mdp, states, samples, metric) = chain_setup(0.05, true);
    let cfg = SolverConfig {
        bandwidth: 0.015,
        ..SolverConfig::default()
    };
    let qvf = solve(&mdp, &samples, &metric, Some(&states), &cfg).expect("kbsf solve");
    assert!(
        max_chain_error(&mdp, &states, &qvf) < 0.02,
        "max error {} too large",
        max_chain_error(&mdp, &states, &qvf)
    );
}

#[test]
fn kbsf_reduction_preserves_the_greedy_policy() {
    let (mdp, states, samples, metric) = chain_setup(0.05, true);
    // Genuine reduction: representatives at half the sample density.
    let reps = chain_grid(0.1, true);
    let cfg = SolverConfig {
        bandwidth: 0.015,
        ..SolverConfig::default()
    };
    let qvf = solve(&mdp, &samples, &metric, Some(&reps), &cfg).expect("kbsf solve");

    for x in states.iter().filter(|x| **x <= 0.9) {
        assert_eq!(
            qvf.greedy_action(x),
            ChainAction::Advance,
            "expected to advance from {x}"
        );
    }
    // The halved representative density blurs values near the goal by up
    // to half a rep-value gap; the policy must survive it regardless.
    assert!(max_chain_error(&mdp, &states, &qvf) < 0.6);
}

#[test]
fn kbsf_rejects_misaligned_samples() {
    let (mdp, states, _, metric) = chain_setup(0.05, true);
    // Drop one transition from the second action's list.
    let full = generate_transitions(mdp.as_ref(), &states);
    let by_action = vec![
        full.for_index(0).to_vec(),
        full.for_index(1)[1..].to_vec(),
    ];
    let broken = Arc::new(SampleTransitions::new(by_action));
    let cfg = SolverConfig::default();
    let result = solve(&mdp, &broken, &metric, Some(&states), &cfg);
    assert!(matches!(
        result,
        Err(kerval::SolverError::MisalignedSamples)
    ));
}

#[test]
fn threaded_kbrl_matches_sequential() {
    let (mdp, states, samples, metric) = chain_setup(0.025, false);
    let sequential_cfg = SolverConfig {
        bandwidth: 0.008,
        ..SolverConfig::default()
    };
    let threaded_cfg = SolverConfig {
        threads: 4,
        ..sequential_cfg.clone()
    };
    let sequential = solve(&mdp, &samples, &metric, None, &sequential_cfg).expect("sequential");
    let threaded = solve(&mdp, &samples, &metric, None, &threaded_cfg).expect("threaded");

    assert!(sequential.difference(&threaded).abs() <= 1e-9);
    for x in &states {
        for &a in ChainAction::ALL {
            assert!(
                (sequential.value_for(x, a) - threaded.value_for(x, a)).abs() <= 1e-9,
                "value mismatch at {x}"
            );
        }
    }
}

#[test]
fn threaded_kbsf_matches_sequential() {
    let (mdp, states, samples, metric) = chain_setup(0.05, true);
    let sequential_cfg = SolverConfig {
        bandwidth: 0.015,
        ..SolverConfig::default()
    };
    let threaded_cfg = SolverConfig {
        threads: 3,
        ..sequential_cfg.clone()
    };
    let sequential =
        solve(&mdp, &samples, &metric, Some(&states), &sequential_cfg).expect("sequential");
    let threaded = solve(&mdp, &samples, &metric, Some(&states), &threaded_cfg).expect("threaded");
    assert!(sequential.difference(&threaded).abs() <= 1e-9);
}

#[test]
fn interval_policy_moves_toward_the_nearer_boundary() {
    let mdp = Arc::new(IntervalMdp::new(0.9));
    // 50 uniformly tiled interior samples: 0.1, 0.3, ..., 9.9.
    let states: Vec<f64> = (0..50)
        .map(|i| INTERVAL_SPAN * (i as f64 + 0.5) / 50.0)
        .collect();
    let samples = Arc::new(generate_transitions(mdp.as_ref(), &states));
    let metric = Arc::new(ActionDistanceFn::of_shared(3, Arc::new(EuclideanDf)));
    let cfg = SolverConfig {
        bandwidth: 0.05,
        step_cap: 200,
        ..SolverConfig::default()
    };
    let qvf = solve(&mdp, &samples, &metric, None, &cfg).expect("interval solve");

    for x in states.iter().filter(|x| !mdp.is_terminal(x)) {
        let expected = if *x < INTERVAL_SPAN / 2.0 {
            Shift::Neg
        } else {
            Shift::Pos
        };
        assert_eq!(
            qvf.greedy_action(x),
            expected,
            "policy at {x} should move toward the nearer boundary"
        );
    }
}
