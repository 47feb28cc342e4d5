//! # fcp-algo: Optimization Pipeline
//!
//! The three-stage optimization core of the fleet charge planner:
//!
//! 1. **Feasible-sequence enumeration** ([`sequences`]) under the pluggable
//!    constraint system ([`constraints`]).
//! 2. **Set-partition allocation** ([`allocation`]): which vehicle runs
//!    which route sequence, maximizing routes covered then quality score.
//! 3. **Time-slotted charge scheduling** ([`scheduling`]): per-vehicle,
//!    per-slot power minimizing cost under checkpoint, capacity, rate, and
//!    availability constraints.
//!
//! [`unified`] fuses stages 2 and 3 into one weighted-sum model.
//!
//! ## Solver backends
//!
//! Exact models are built with `good_lp` on the HiGHS backend (cargo
//! feature `solver-highs`, on by default). Every solver also ships a greedy
//! fallback that produces a feasible answer when the MILP backend is
//! compiled out, disabled via `FCP_SOLVER=greedy`, or errors at runtime —
//! the run then reports `greedy_fallback` instead of `optimal`.

use thiserror::Error;

pub mod allocation;
pub mod constraints;
pub mod scheduling;
pub mod sequences;
pub mod solver;
pub mod unified;

pub use allocation::{solve_allocation, AllocationProblem, AllocationSolution};
pub use constraints::{ConstraintSet, EvalContext, SequenceConstraint, SequenceEvaluation};
pub use scheduling::{solve_scheduling, SchedulingProblem, SchedulingSolution};
pub use sequences::{enumerate_sequences, SequenceCandidate};
pub use solver::{engine_available, init_solver};
pub use unified::{solve_unified, OptimizationMode, UnifiedProblem, UnifiedSolution};

/// Errors raised by model construction and solving.
#[derive(Error, Debug)]
pub enum AlgoError {
    /// Inputs that cannot form a model (empty grid, missing data).
    #[error("Invalid problem: {0}")]
    InvalidProblem(String),

    /// The backend failed or returned no usable solution.
    #[error("Solver error: {0}")]
    Solver(String),
}

/// Convenience alias for Results using [`AlgoError`].
pub type AlgoResult<T> = Result<T, AlgoError>;
