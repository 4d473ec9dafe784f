//! Crate-wide error types.
//!
//! Each stage of the compiler has its own error enum so callers can match on
//! failures precisely: [`DesignError`] for structural violations while
//! building a [`Design`](crate::Design), [`ParseError`] for the textual
//! formats, [`PlanError`] for plan-assembly failures, and [`OptimizerError`]
//! for misuse of the optimizer handle. The binary maps these onto process
//! exit codes (parse/build failures exit 2, plan failures exit 1).

use thiserror::Error;

/// Structural or range violation while building a [`Design`](crate::Design).
#[derive(Debug, Error)]
pub enum DesignError {
    /// A scalar fell outside its allowed half-open range.
    #[error("{what} is {value}, expected a value in [{min}, {max})")]
    Range {
        /// Human-readable name of the violating quantity.
        what: &'static str,
        value: i64,
        /// Inclusive lower bound.
        min: i64,
        /// Exclusive upper bound.
        max: i64,
    },

    /// The marker constant `0x10000003` must appear exactly once among the
    /// design's constants; its storage slot anchors the plan's `Lcap` step.
    #[error("marker constant 0x10000003 must appear exactly once, found {found} occurrences")]
    MarkerConstant { found: usize },
}

/// Failure while reading the textual design format or the plan format.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unexpected end of input")]
    UnexpectedEnd,

    #[error("bad token {token:?}, expected {expected}")]
    BadToken { token: String, expected: &'static str },

    /// A plan line carried a step tag outside the known discriminator range.
    #[error("unknown plan step tag {tag}")]
    UnknownStepTag { tag: i64 },

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Design(#[from] DesignError),
}

/// Plan assembly failure.
///
/// Neither case is recoverable within a single annealing run; the caller may
/// re-run the optimizer from a different seed.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PlanError {
    /// More output-pin remaps accumulated than there are work slots to
    /// carry them through the final fix-up layer.
    #[error("output remapping failed")]
    OutputRemappingFailed,

    /// The storage arena grew beyond the design's storage slot budget.
    #[error("storage slot budget exceeded")]
    StorageSlotBudgetExceeded,
}

/// Misuse of the [`Optimizer`](crate::Optimizer) handle.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerError {
    /// The operation requires the optimizer to be idle, but a dispatch is
    /// still in flight.
    #[error("optimizer is dispatched")]
    Dispatched,
}
