//! # Layerloom
//!
//! A **layout and scheduling compiler** for a very constrained dataflow
//! target: a machine that evaluates a fixed graph of binary and multiplexing
//! ("select") operators using a tiny register file of *work slots* and a
//! persistent memory of *storage slots*. Layerloom ingests a [`Design`]
//! (the graph plus the target's budgets) and produces a linear [`Plan`]: a
//! totally ordered, stack-packetised sequence of micro-operations that
//! evaluates every output while minimising the physical particle cost.
//!
//! The optimisation is framed as simulated annealing over *layerings* of
//! the graph: partitions of the nodes into ordered layers the target
//! evaluates one commit at a time.
//!
//! ## Quick start
//!
//! ```
//! use std::sync::Arc;
//! use layerloom::{BinarySpec, CompositeSpec, DesignSpec, OutputSpec, LIFE3_VALUE};
//!
//! # fn main() -> anyhow::Result<()> {
//! // One binary operator over two inputs.
//! let design = Arc::new(
//!     DesignSpec {
//!         work_slots: 2,
//!         storage_slots: 4,
//!         storage_slot_overhead_penalty: 1.0,
//!         constant_values: vec![LIFE3_VALUE],
//!         input_storage_slots: vec![2, 3],
//!         composites: vec![CompositeSpec::Binary(BinarySpec {
//!             tmp: 0,
//!             rhs_source: 1,
//!             lhs_source: 2,
//!         })],
//!         outputs: vec![OutputSpec { source: 3, storage_slot: 0 }],
//!         ..DesignSpec::default()
//!     }
//!     .build()?,
//! );
//!
//! let state = design.initial();
//! let energy = state.energy();
//! let plan = state.schedule().to_plan()?;
//! assert_eq!(plan.cost, plan.steps.iter().map(|s| s.op.cost()).sum::<i32>());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! Layerloom uses a strict pipeline:
//! 1. A [`DesignSpec`] is validated and wired into an immutable [`Design`]
//!    shared read-only by every worker.
//! 2. [`Design::initial`] produces the canonical [`State`]; the annealer
//!    explores neighbouring layerings through
//!    [`State::random_neighbour`].
//! 3. [`State::energy`] deterministically prices a layering;
//!    [`State::schedule`] additionally records the ordered micro-events.
//! 4. [`Schedule::to_plan`](crate::Schedule::to_plan) packetises the
//!    schedule into bounded stacks, enforcing the hard per-stack ceiling.
//! 5. [`Optimizer`] drives parallel annealing workers and publishes the
//!    best state after every fork-join round.
//!
//! ## Module overview
//!
//! - [`design`] - the immutable graph model and layer legality check
//! - [`state`] - layerings and the annealer's move space
//! - [`energy`] - the schedule/energy evaluator
//! - [`plan`] - the externalisable plan and its assembler
//! - [`optimizer`] - single-pass annealing and the parallel driver
//! - [`io`] - the textual design and plan formats
//! - [`error`] - typed failures for every stage

pub mod design;
pub mod energy;
pub mod error;
pub mod io;
pub mod optimizer;
pub mod plan;
mod render;
pub mod state;

pub use design::{
    BinarySpec, CompositeSpec, Design, DesignSpec, OutputSpec, SelectSpec, LIFE3_VALUE, TMP_COUNT,
};
pub use energy::{Energy, Schedule, ScheduleStep, StepKind};
pub use error::{DesignError, OptimizerError, ParseError, PlanError};
pub use io::{parse_design, read_design};
pub use optimizer::{
    optimize_once, DispatchParameters, OptimizeParameters, Optimizer, OptimizerState,
};
pub use plan::{
    Plan, PlanOp, PlanStep, BOTTOM_TOP_COST, STACK_LAYERS_MAX_COST, STACK_MAX_COST,
};
pub use state::State;
