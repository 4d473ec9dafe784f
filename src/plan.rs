//! The externalisable plan: a linear, stack-packetised step sequence.
//!
//! [`Schedule::to_plan`] post-processes an evaluated schedule into the exact
//! wire form the target executes. The plan opens with the marker-constant
//! capture (`Lcap`), the per-storage-slot `Rfilt` row and per-work-slot
//! `Lfilt` row, and then packs each layer's steps into bounded stacks. A
//! stack is delimited by `Bottom`/`Top` and must never cost more than
//! [`STACK_MAX_COST`]; layers are never split across stacks.

use crate::design::LIFE3_VALUE;
use crate::energy::{Schedule, StepKind};
use crate::error::PlanError;

pub(crate) const LOAD_COST: i32 = 2;
pub(crate) const CLOAD_COST: i32 = 1;
pub(crate) const MODE_COST: i32 = 2;
pub(crate) const STORE_COST: i32 = 2;
pub(crate) const CSTORE_COST: i32 = 1;
const ARAY_COST: i32 = 5;
const EAST_COST: i32 = 6;
const WEST_COST: i32 = 6;
const CLEAR_COST: i32 = 1;
const TOP_COST: i32 = 1;
const BOTTOM_COST: i32 = 4;
const LCAP_COST: i32 = 2;
const LFILT_COST: i32 = 1;
const RFILT_COST: i32 = 1;

/// Cost of the commit sequence closing every layer.
pub(crate) const COMMIT_COST: i32 = ARAY_COST + EAST_COST + WEST_COST + CLEAR_COST;

/// Hard ceiling on the cost of one stack, `Bottom`/`Top` included.
pub const STACK_MAX_COST: i32 = 1495;
/// Cost of the `Bottom`/`Top` pair delimiting a stack.
pub const BOTTOM_TOP_COST: i32 = BOTTOM_COST + TOP_COST;
/// Ceiling on the accumulated layer steps within one stack.
pub const STACK_LAYERS_MAX_COST: i32 = STACK_MAX_COST - BOTTOM_TOP_COST;

/// One target micro-operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlanOp {
    Load { work_slot: usize, storage_slot: usize },
    Cload { work_slot: usize },
    Mode { tmp: usize },
    Store { work_slot: usize, storage_slot: usize },
    Cstore { work_slot: usize, storage_slot: usize },
    Aray,
    East,
    West,
    Clear,
    Top,
    Bottom,
    /// Captures the storage slot holding the marker constant.
    Lcap { life3_index: usize },
    Lfilt { work_slot: usize },
    Rfilt { storage_slot: usize, constant_value: i32 },
}

impl PlanOp {
    /// Particle cost of this operation.
    pub fn cost(&self) -> i32 {
        match self {
            PlanOp::Load { .. } => LOAD_COST,
            PlanOp::Cload { .. } => CLOAD_COST,
            PlanOp::Mode { .. } => MODE_COST,
            PlanOp::Store { .. } => STORE_COST,
            PlanOp::Cstore { .. } => CSTORE_COST,
            PlanOp::Aray => ARAY_COST,
            PlanOp::East => EAST_COST,
            PlanOp::West => WEST_COST,
            PlanOp::Clear => CLEAR_COST,
            PlanOp::Top => TOP_COST,
            PlanOp::Bottom => BOTTOM_COST,
            PlanOp::Lcap { .. } => LCAP_COST,
            PlanOp::Lfilt { .. } => LFILT_COST,
            PlanOp::Rfilt { .. } => RFILT_COST,
        }
    }

    /// Ordinal of this operation in the plan text format.
    pub fn tag(&self) -> u8 {
        match self {
            PlanOp::Load { .. } => 0,
            PlanOp::Cload { .. } => 1,
            PlanOp::Mode { .. } => 2,
            PlanOp::Store { .. } => 3,
            PlanOp::Cstore { .. } => 4,
            PlanOp::Aray => 5,
            PlanOp::East => 6,
            PlanOp::West => 7,
            PlanOp::Clear => 8,
            PlanOp::Top => 9,
            PlanOp::Bottom => 10,
            PlanOp::Lcap { .. } => 11,
            PlanOp::Lfilt { .. } => 12,
            PlanOp::Rfilt { .. } => 13,
        }
    }
}

/// A plan step: the operation plus the stack it belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlanStep {
    pub stack: usize,
    pub op: PlanOp,
}

/// The assembled plan.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
    /// Sum of every step's cost.
    pub cost: i32,
    /// Number of `Bottom`/`Top` stacks emitted.
    pub stack_count: usize,
}

#[derive(Default)]
struct Buffer {
    steps: Vec<PlanStep>,
    cost: i32,
}

impl Buffer {
    fn push(&mut self, step: PlanStep) {
        self.cost += step.op.cost();
        self.steps.push(step);
    }
}

struct Assembler {
    steps: Vec<PlanStep>,
    stack_buffer: Buffer,
    layer_buffer: Buffer,
    stack_index: usize,
    layer_open: bool,
    began_store: bool,
}

impl Assembler {
    fn push_to_layer(&mut self, op: PlanOp) {
        self.layer_buffer.push(PlanStep {
            stack: self.stack_index,
            op,
        });
    }

    fn flush_stack(&mut self) {
        if self.stack_buffer.cost != 0 {
            self.steps.push(PlanStep {
                stack: self.stack_index,
                op: PlanOp::Bottom,
            });
            self.steps.append(&mut self.stack_buffer.steps);
            self.steps.push(PlanStep {
                stack: self.stack_index,
                op: PlanOp::Top,
            });
            self.stack_index += 1;
            self.stack_buffer = Buffer::default();
        }
    }

    fn flush_layer(&mut self) {
        if self.layer_open {
            self.layer_open = false;
            self.began_store = false;
            self.push_to_layer(PlanOp::West);
            self.push_to_layer(PlanOp::Clear);
            debug_assert!(self.layer_buffer.cost <= STACK_LAYERS_MAX_COST);
            if self.stack_buffer.cost + self.layer_buffer.cost > STACK_LAYERS_MAX_COST {
                self.flush_stack();
            }
            self.stack_buffer.cost += self.layer_buffer.cost;
            self.stack_buffer.steps.append(&mut self.layer_buffer.steps);
            self.layer_buffer = Buffer::default();
        }
    }

    fn begin_layer(&mut self) {
        self.layer_open = true;
    }

    fn begin_store(&mut self) {
        self.begin_layer();
        if !self.began_store {
            self.began_store = true;
            self.push_to_layer(PlanOp::Aray);
            self.push_to_layer(PlanOp::East);
        }
    }
}

impl Schedule {
    /// Reorder and packetise the schedule into the final plan.
    ///
    /// Fails with [`PlanError::OutputRemappingFailed`] when more output
    /// remaps accumulated than work slots exist to carry them, and with
    /// [`PlanError::StorageSlotBudgetExceeded`] when the arena grew past
    /// the design's storage budget.
    pub fn to_plan(&self) -> Result<Plan, PlanError> {
        if self.output_remap_failed {
            return Err(PlanError::OutputRemappingFailed);
        }
        if self.design.storage_slots() < self.energy.storage_slot_count {
            return Err(PlanError::StorageSlotBudgetExceeded);
        }

        let mut life3_index = None;
        let mut constant_value = vec![0i32; self.design.storage_slots()];
        for step in self.steps() {
            if let StepKind::Constant {
                storage_slot,
                value,
            } = step.kind
            {
                constant_value[storage_slot] = value;
                if value == LIFE3_VALUE {
                    life3_index = Some(storage_slot);
                }
            }
        }

        let mut assembler = Assembler {
            steps: Vec::new(),
            stack_buffer: Buffer::default(),
            layer_buffer: Buffer::default(),
            stack_index: 0,
            layer_open: false,
            began_store: false,
        };
        assembler.steps.push(PlanStep {
            stack: 0,
            op: PlanOp::Lcap {
                life3_index: life3_index.expect("every design carries the marker constant"),
            },
        });
        for (storage_slot, &value) in constant_value.iter().enumerate() {
            assembler.steps.push(PlanStep {
                stack: assembler.stack_index,
                op: PlanOp::Rfilt {
                    storage_slot,
                    constant_value: value,
                },
            });
        }
        for work_slot in 0..self.design.work_slots() {
            assembler.steps.push(PlanStep {
                stack: assembler.stack_index,
                op: PlanOp::Lfilt { work_slot },
            });
        }

        for step in self.steps() {
            match step.kind {
                StepKind::Commit => assembler.flush_layer(),
                StepKind::Load {
                    work_slot,
                    storage_slot,
                    ..
                } => {
                    assembler.begin_layer();
                    assembler.push_to_layer(PlanOp::Load {
                        work_slot,
                        storage_slot,
                    });
                }
                StepKind::Cload { work_slot, .. } => {
                    assembler.begin_layer();
                    assembler.push_to_layer(PlanOp::Cload { work_slot });
                }
                StepKind::Store {
                    work_slot,
                    storage_slot,
                } => {
                    assembler.begin_store();
                    assembler.push_to_layer(PlanOp::Store {
                        work_slot,
                        storage_slot,
                    });
                }
                StepKind::Cstore {
                    work_slot,
                    storage_slot,
                } => {
                    assembler.begin_store();
                    assembler.push_to_layer(PlanOp::Cstore {
                        work_slot,
                        storage_slot,
                    });
                }
                StepKind::Mode { tmp, .. } => {
                    assembler.begin_layer();
                    assembler.push_to_layer(PlanOp::Mode { tmp });
                }
                StepKind::Constant { .. } | StepKind::AllocStorage { .. } | StepKind::UseStorage { .. } => {}
            }
        }
        assembler.flush_stack();

        let cost = assembler.steps.iter().map(|step| step.op.cost()).sum();
        Ok(Plan {
            stack_count: assembler.stack_index,
            steps: assembler.steps,
            cost,
        })
    }
}
