//! # fcp-engine: Run Orchestration
//!
//! Controllers that turn a store plus a planning instant into persisted
//! results, one run at a time:
//!
//! 1. create the monitor record,
//! 2. load site configuration and the planning window,
//! 3. load fleet, as-of vehicle state, routes, chargers, forecast, tariff,
//! 4. build solver inputs and run the solver,
//! 5. validate the result,
//! 6. replace the previous result set inside one transaction,
//! 7. finalize the monitor.
//!
//! Any error marks the monitor failed and propagates unchanged. A run
//! honors cooperative cancellation between the major phases; nothing is
//! interrupted mid-transaction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

pub mod allocation;
pub mod inputs;
pub mod report;
pub mod scheduling;
pub mod unified;
pub mod validate;

pub use allocation::{run_allocation, AllocationRunArgs};
pub use report::{schedule_report, ScheduleReport, VehicleScheduleReport};
pub use scheduling::{run_scheduling, RouteSource, SchedulingRunArgs};
pub use unified::{run_unified, UnifiedRunArgs, UnifiedRunOutput};

/// Application name under which site configuration is filed.
pub const APPLICATION_NAME: &str = "fleet_charge_planner";

/// Errors surfaced by run orchestration.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Bad inputs or configuration; nothing was solved or persisted.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A referenced record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The run was cancelled between phases.
    #[error("interrupted")]
    Interrupted,

    #[error(transparent)]
    Core(#[from] fcp_core::CoreError),

    #[error(transparent)]
    Algo(#[from] fcp_algo::AlgoError),

    #[error(transparent)]
    Store(#[from] fcp_store::StoreError),
}

/// Convenience alias for Results using [`EngineError`].
pub type EngineResult<T> = Result<T, EngineError>;

/// Cooperative cancellation flag, checked between run phases.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Errors with [`EngineError::Interrupted`] when cancelled.
    pub fn check(&self) -> EngineResult<()> {
        if self.is_cancelled() {
            Err(EngineError::Interrupted)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_flag_trips_once_set() {
        let flag = CancelFlag::new();
        assert!(flag.check().is_ok());
        flag.cancel();
        assert!(matches!(flag.check(), Err(EngineError::Interrupted)));
        // Clones share the state.
        let clone = flag.clone();
        assert!(clone.is_cancelled());
    }
}
