use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use layerloom::{
    optimize_once, BinarySpec, CompositeSpec, Design, DesignSpec, DispatchParameters,
    OptimizeParameters, Optimizer, OptimizerError, OptimizerState, OutputSpec, PlanOp,
    LIFE3_VALUE, STACK_MAX_COST,
};

/// Ten chained commutative binaries; plenty of legal moves for the annealer.
fn ten_composite_design() -> Arc<Design> {
    let mut composites = vec![CompositeSpec::Binary(BinarySpec {
        tmp: 1,
        rhs_source: 1,
        lhs_source: 2,
    })];
    for link in 1..10 {
        composites.push(CompositeSpec::Binary(BinarySpec {
            tmp: 1,
            rhs_source: 2 + link,
            lhs_source: 2,
        }));
    }
    Arc::new(
        DesignSpec {
            work_slots: 4,
            storage_slots: 6,
            storage_slot_overhead_penalty: 1.0,
            constant_values: vec![LIFE3_VALUE],
            input_storage_slots: vec![0, 1],
            composites,
            outputs: vec![OutputSpec {
                source: 12,
                storage_slot: 3,
            }],
            ..DesignSpec::default()
        }
        .build()
        .unwrap(),
    )
}

#[test]
fn zero_iterations_return_the_input_state() {
    let design = ten_composite_design();
    let state = Arc::new(design.initial());
    let mut rng = StdRng::seed_from_u64(1);
    let out = optimize_once(
        &mut rng,
        Arc::clone(&state),
        OptimizeParameters {
            iteration_count: 0,
            temperature_initial: 1.0,
            temperature_final: 0.95,
            temperature_loss: 1e-7,
        },
    );
    assert_eq!(out.state.layers(), state.layers());
    assert_eq!(out.temperature, 1.0);
    assert_eq!(out.state.energy().part_count, state.energy().part_count);
}

#[test]
fn fixed_seeds_replay_identical_passes() {
    let design = ten_composite_design();
    let params = OptimizeParameters {
        iteration_count: 500,
        temperature_initial: 1.0,
        temperature_final: 0.5,
        temperature_loss: 1e-4,
    };
    let mut first_rng = StdRng::seed_from_u64(42);
    let mut second_rng = StdRng::seed_from_u64(42);
    let first = optimize_once(&mut first_rng, Arc::new(design.initial()), params);
    let second = optimize_once(&mut second_rng, Arc::new(design.initial()), params);
    assert_eq!(first.state.layers(), second.state.layers());
    assert_eq!(first.temperature, second.temperature);
    assert_eq!(
        first.state.energy().part_count,
        second.state.energy().part_count
    );
}

#[test]
fn annealing_never_worsens_the_published_state() {
    let design = ten_composite_design();
    let initial = design.initial();
    let initial_linear = initial.energy().linear;
    let mut optimizer = Optimizer::new(
        7,
        1,
        OptimizerState {
            state: Arc::new(initial),
            temperature: 1.0,
        },
    );
    optimizer
        .dispatch(DispatchParameters {
            iteration_count: 2000,
            temperature_final: 0.95,
            temperature_loss: 1e-5,
        })
        .unwrap();
    optimizer.wait();
    assert!(optimizer.ready());
    let finished = optimizer.peek_state();
    assert!(finished.temperature <= 0.95 + 1e-9);
    assert!(finished.state.energy().linear <= initial_linear);

    // the annealed state must still assemble into a budget-respecting plan
    let plan = finished.state.schedule().to_plan().unwrap();
    let mut stack_cost = 0;
    for step in &plan.steps {
        match step.op {
            PlanOp::Bottom => stack_cost = step.op.cost(),
            PlanOp::Top => assert!(stack_cost + step.op.cost() <= STACK_MAX_COST),
            _ => stack_cost += step.op.cost(),
        }
    }
}

#[test]
fn poke_is_rejected_while_dispatched() {
    let design = ten_composite_design();
    let initial = OptimizerState {
        state: Arc::new(design.initial()),
        temperature: 1.0,
    };
    let mut optimizer = Optimizer::new(3, 2, initial.clone());
    assert!(!optimizer.dispatched());
    assert!(!optimizer.ready());
    optimizer
        .dispatch(DispatchParameters {
            iteration_count: 500,
            temperature_final: 0.99,
            temperature_loss: 1e-6,
        })
        .unwrap();
    assert!(optimizer.dispatched());
    assert_eq!(
        optimizer.poke_state(initial.clone()),
        Err(OptimizerError::Dispatched)
    );
    assert_eq!(
        optimizer.dispatch(DispatchParameters {
            iteration_count: 1,
            temperature_final: 0.99,
            temperature_loss: 1e-6,
        }),
        Err(OptimizerError::Dispatched)
    );
    optimizer.cancel();
    assert!(!optimizer.dispatched());
    assert!(optimizer.poke_state(initial).is_ok());
}

#[test]
fn random_walks_stay_evaluable() {
    let design = ten_composite_design();
    let mut rng = StdRng::seed_from_u64(5);
    let mut state = design.initial();
    for _ in 0..200 {
        state = state.random_neighbour(&mut rng);
        assert!(state.energy().part_count > 0);
    }
}

#[test]
fn cancel_stops_at_a_round_boundary() {
    let design = ten_composite_design();
    let mut optimizer = Optimizer::new(
        11,
        2,
        OptimizerState {
            state: Arc::new(design.initial()),
            temperature: 1.0,
        },
    );
    optimizer
        .dispatch(DispatchParameters {
            iteration_count: 1000,
            temperature_final: 0.1,
            temperature_loss: 1e-7,
        })
        .unwrap();
    optimizer.cancel();
    assert!(!optimizer.dispatched());
    assert!(optimizer.ready());
    // the held state is still usable after cancellation
    let held = optimizer.peek_state();
    assert!(held.state.schedule().to_plan().is_ok());
}
