use std::sync::Arc;

use layerloom::{
    BinarySpec, CompositeSpec, Design, DesignSpec, OutputSpec, Plan, PlanError, PlanOp,
    LIFE3_VALUE, STACK_MAX_COST,
};

fn single_binary() -> Arc<Design> {
    Arc::new(
        DesignSpec {
            work_slots: 2,
            storage_slots: 4,
            storage_slot_overhead_penalty: 1.0,
            constant_values: vec![LIFE3_VALUE],
            input_storage_slots: vec![2, 3],
            composites: vec![CompositeSpec::Binary(BinarySpec {
                tmp: 0,
                rhs_source: 1,
                lhs_source: 2,
            })],
            outputs: vec![OutputSpec {
                source: 3,
                storage_slot: 0,
            }],
            ..DesignSpec::default()
        }
        .build()
        .unwrap(),
    )
}

/// A chain of `length` binaries, each consuming the previous result and the
/// second input. One layer per composite in the initial state.
fn binary_chain(length: usize) -> Arc<Design> {
    let mut composites = vec![CompositeSpec::Binary(BinarySpec {
        tmp: 1,
        rhs_source: 1,
        lhs_source: 2,
    })];
    for link in 1..length {
        composites.push(CompositeSpec::Binary(BinarySpec {
            tmp: 1,
            rhs_source: 2 + link,
            lhs_source: 2,
        }));
    }
    Arc::new(
        DesignSpec {
            work_slots: 2,
            storage_slots: 4,
            storage_slot_overhead_penalty: 1.0,
            constant_values: vec![LIFE3_VALUE],
            input_storage_slots: vec![0, 1],
            composites,
            outputs: vec![OutputSpec {
                source: 2 + length,
                storage_slot: 3,
            }],
            ..DesignSpec::default()
        }
        .build()
        .unwrap(),
    )
}

fn count_ops(plan: &Plan, matcher: impl Fn(&PlanOp) -> bool) -> usize {
    plan.steps.iter().filter(|step| matcher(&step.op)).count()
}

/// Property: every stack fits the hard ceiling and the reported cost is the
/// sum of the step costs.
fn assert_plan_invariants(plan: &Plan) {
    assert_eq!(
        plan.cost,
        plan.steps.iter().map(|step| step.op.cost()).sum::<i32>()
    );
    let mut stack_cost = None;
    let mut stacks_seen = 0;
    for step in &plan.steps {
        match step.op {
            PlanOp::Bottom => {
                assert!(stack_cost.is_none(), "nested stack");
                stack_cost = Some(step.op.cost());
            }
            PlanOp::Top => {
                let cost = stack_cost.take().expect("top without bottom") + step.op.cost();
                assert!(cost <= STACK_MAX_COST, "stack cost {cost} over budget");
                stacks_seen += 1;
            }
            _ => {
                if let Some(cost) = &mut stack_cost {
                    *cost += step.op.cost();
                }
            }
        }
    }
    assert!(stack_cost.is_none(), "unterminated stack");
    assert_eq!(stacks_seen, plan.stack_count);
}

#[test]
fn single_binary_plan_shape() {
    let plan = single_binary().initial().schedule().to_plan().unwrap();
    assert_eq!(count_ops(&plan, |op| matches!(op, PlanOp::Aray)), 1);
    assert_eq!(count_ops(&plan, |op| matches!(op, PlanOp::East)), 1);
    assert_eq!(count_ops(&plan, |op| matches!(op, PlanOp::West)), 1);
    assert_eq!(count_ops(&plan, |op| matches!(op, PlanOp::Clear)), 1);
    assert_eq!(count_ops(&plan, |op| matches!(op, PlanOp::Mode { .. })), 1);
    assert_eq!(count_ops(&plan, |op| matches!(op, PlanOp::Load { .. })), 2);
    assert_eq!(count_ops(&plan, |op| matches!(op, PlanOp::Store { .. })), 1);
    assert_eq!(count_ops(&plan, |op| matches!(op, PlanOp::Cload { .. })), 0);
    assert_eq!(count_ops(&plan, |op| matches!(op, PlanOp::Rfilt { .. })), 4);
    assert_eq!(count_ops(&plan, |op| matches!(op, PlanOp::Lfilt { .. })), 2);
    assert_eq!(plan.stack_count, 1);
    assert_plan_invariants(&plan);
}

#[test]
fn plan_opens_with_marker_capture_and_filters() {
    let plan = single_binary().initial().schedule().to_plan().unwrap();
    // the marker constant was allocated to slot 1: slot 0 is output-pinned
    // and slots 2 and 3 hold the inputs
    assert_eq!(plan.steps[0].op, PlanOp::Lcap { life3_index: 1 });
    assert_eq!(
        plan.steps[2].op,
        PlanOp::Rfilt {
            storage_slot: 1,
            constant_value: LIFE3_VALUE,
        }
    );
}

#[test]
fn long_chains_split_into_multiple_stacks() {
    let plan = binary_chain(60).initial().schedule().to_plan().unwrap();
    assert_eq!(count_ops(&plan, |op| matches!(op, PlanOp::Bottom)), 2);
    assert_eq!(count_ops(&plan, |op| matches!(op, PlanOp::Top)), 2);
    assert_eq!(plan.stack_count, 2);
    assert_plan_invariants(&plan);
}

#[test]
fn short_chains_fit_one_stack() {
    let plan = binary_chain(10).initial().schedule().to_plan().unwrap();
    assert_eq!(plan.stack_count, 1);
    assert_plan_invariants(&plan);
}

#[test]
fn arena_overflow_fails_plan_assembly() {
    // two composites both alive at once, but only three storage slots:
    // the constant, both inputs, and both intermediate results cannot fit
    let design = Arc::new(
        DesignSpec {
            work_slots: 2,
            storage_slots: 3,
            storage_slot_overhead_penalty: 1.0,
            constant_values: vec![LIFE3_VALUE],
            input_storage_slots: vec![0, 1],
            composites: vec![
                CompositeSpec::Binary(BinarySpec {
                    tmp: 0,
                    rhs_source: 1,
                    lhs_source: 2,
                }),
                CompositeSpec::Binary(BinarySpec {
                    tmp: 1,
                    rhs_source: 1,
                    lhs_source: 2,
                }),
            ],
            outputs: vec![
                OutputSpec {
                    source: 3,
                    storage_slot: 0,
                },
                OutputSpec {
                    source: 4,
                    storage_slot: 1,
                },
            ],
            ..DesignSpec::default()
        }
        .build()
        .unwrap(),
    );
    let state = design.initial();
    assert!(state.energy().storage_slot_count > design.storage_slots());
    assert_eq!(
        state.schedule().to_plan(),
        Err(PlanError::StorageSlotBudgetExceeded)
    );
}

#[test]
fn too_many_remaps_fail_plan_assembly() {
    // one result pinned to four different slots: three remaps, but only
    // two work slots to carry them through the fix-up layer
    let design = Arc::new(
        DesignSpec {
            work_slots: 2,
            storage_slots: 7,
            storage_slot_overhead_penalty: 1.0,
            constant_values: vec![LIFE3_VALUE],
            input_storage_slots: vec![4, 5],
            composites: vec![CompositeSpec::Binary(BinarySpec {
                tmp: 0,
                rhs_source: 1,
                lhs_source: 2,
            })],
            outputs: (0..4)
                .map(|slot| OutputSpec {
                    source: 3,
                    storage_slot: slot,
                })
                .collect(),
            ..DesignSpec::default()
        }
        .build()
        .unwrap(),
    );
    assert_eq!(
        design.initial().schedule().to_plan(),
        Err(PlanError::OutputRemappingFailed)
    );
}

#[test]
fn remapped_outputs_get_a_fixup_layer() {
    // result pinned to slots 0 and 1; the store lands in 0, so one
    // load/store pair moves it to 1 in a final layer
    let design = Arc::new(
        DesignSpec {
            work_slots: 2,
            storage_slots: 5,
            storage_slot_overhead_penalty: 1.0,
            constant_values: vec![LIFE3_VALUE],
            input_storage_slots: vec![2, 3],
            clobber_storage_slots: vec![0],
            composites: vec![CompositeSpec::Binary(BinarySpec {
                tmp: 0,
                rhs_source: 1,
                lhs_source: 2,
            })],
            outputs: vec![
                OutputSpec {
                    source: 3,
                    storage_slot: 0,
                },
                OutputSpec {
                    source: 3,
                    storage_slot: 1,
                },
            ],
        }
        .build()
        .unwrap(),
    );
    let plan = design.initial().schedule().to_plan().unwrap();
    // base layer: two loads and a store; fix-up layer: one load, one store
    assert_eq!(count_ops(&plan, |op| matches!(op, PlanOp::Load { .. })), 3);
    assert_eq!(count_ops(&plan, |op| matches!(op, PlanOp::Store { .. })), 2);
    assert!(plan.steps.iter().any(|step| step.op
        == PlanOp::Store {
            work_slot: 0,
            storage_slot: 1,
        }));
    assert_plan_invariants(&plan);
}
