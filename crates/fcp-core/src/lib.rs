//! # fcp-core: Depot Charge Planning Core
//!
//! Fundamental data structures shared by the fleet charge planner: the fleet
//! and route model, charge schedules on the 30-minute slot grid, allocation
//! results, and the typed site-parameter layer.
//!
//! ## Design notes
//!
//! - Every element carries a newtype id ([`VehicleId`], [`RouteId`], ...) so
//!   a vehicle id can never be confused with a charger id at a call site.
//! - All mutable fleet state is read *as of* an explicit timestamp; nothing
//!   in this crate calls the system clock, which keeps planning runs
//!   deterministic and testable.
//! - Site parameters arrive as strings and are reconstituted into
//!   [`params::ParamValue`] before anything downstream touches them.
//!
//! ## Modules
//!
//! - [`vehicle`] - Vehicles and per-vehicle charge state
//! - [`route`] - Planned delivery routes
//! - [`schedule`] - Slot grid, charge slots, schedule outcomes
//! - [`allocation`] - Route-to-vehicle allocation results
//! - [`params`] - Typed site-parameter parsing (MAF document)
//! - [`config`] - Run configuration records and defaults
//! - [`error`] - Unified error type

use serde::{Deserialize, Serialize};

pub mod allocation;
pub mod config;
pub mod error;
pub mod params;
pub mod route;
pub mod schedule;
pub mod vehicle;

pub use allocation::{AllocationOutcome, RouteAllocation, RunStatus};
pub use config::{AllocationSettings, SchedulerConfig, UnifiedWeights};
pub use error::{CoreError, CoreResult};
pub use params::{ConstraintConfig, ParamValue, SiteParams};
pub use route::{Route, RouteStatus};
pub use schedule::{
    snap_up_to_slot, AvailabilityMask, ChargeSlot, DataHorizon, RouteEnergyRequirement,
    ScheduleOutcome, SlotGrid, SolveStatus, ValidationReport, VehicleChargeSchedule,
};
pub use vehicle::{Charger, Vehicle, VehicleChargeState, VehicleStatus};

macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident, $inner:ty) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name($inner);

        impl $name {
            pub const fn new(value: $inner) -> Self {
                Self(value)
            }

            pub const fn value(self) -> $inner {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Depot site identifier.
    SiteId, i64
);
define_id!(
    /// Vehicle identifier.
    VehicleId, i64
);
define_id!(
    /// Charger identifier.
    ChargerId, i64
);
define_id!(
    /// Allocation run identifier (surrogate key of the allocation monitor).
    AllocationId, i64
);
define_id!(
    /// Charge schedule identifier (surrogate key of the scheduler record).
    ScheduleId, i64
);

/// Route identifier. Routes carry externally-assigned string ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteId(pub String);

impl RouteId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RouteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RouteId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// What caused an allocation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Initial,
    Cancellation,
    Arrival,
    EstimatedArrival,
    DifferentAllocation,
}

impl TriggerType {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerType::Initial => "initial",
            TriggerType::Cancellation => "cancellation",
            TriggerType::Arrival => "arrival",
            TriggerType::EstimatedArrival => "estimated_arrival",
            TriggerType::DifferentAllocation => "different_allocation",
        }
    }
}

impl std::str::FromStr for TriggerType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial" => Ok(TriggerType::Initial),
            "cancellation" => Ok(TriggerType::Cancellation),
            "arrival" => Ok(TriggerType::Arrival),
            "estimated_arrival" => Ok(TriggerType::EstimatedArrival),
            "different_allocation" => Ok(TriggerType::DifferentAllocation),
            other => Err(CoreError::Validation(format!(
                "unknown trigger type: {other}"
            ))),
        }
    }
}
