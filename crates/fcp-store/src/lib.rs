//! # fcp-store: Persistent Store Adapter
//!
//! Read and write operations the planner needs from the relational store,
//! expressed as the [`Store`] trait so controllers are testable against an
//! in-memory database. [`SqliteStore`] is the shipped implementation.
//!
//! Two rules hold for every operation:
//!
//! - Reads of mutable fleet state take an explicit `as-of` timestamp;
//!   nothing here consults the system clock.
//! - Replacement writes (`replace_allocations`, `replace_schedule`) run
//!   delete-then-insert inside a single transaction, so concurrent readers
//!   never observe a partially replaced result set.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use fcp_core::{
    AllocationId, Charger, ChargerId, Route, RouteAllocation, RouteId, RunStatus, ScheduleId,
    SiteId, TriggerType, Vehicle, VehicleId,
};

pub mod schema;
pub mod sqlite;

pub use sqlite::SqliteStore;

/// Errors from the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Convenience alias for Results using [`StoreError`].
pub type StoreResult<T> = Result<T, StoreError>;

/// One vehicle-state-monitor row.
#[derive(Debug, Clone)]
pub struct VsmRow {
    pub vehicle_id: VehicleId,
    pub at: DateTime<Utc>,
    pub status: String,
    pub route_id: Option<RouteId>,
    pub estimated_soc_pct: Option<f64>,
    pub return_eta: Option<DateTime<Utc>>,
    pub return_soc_pct: Option<f64>,
}

/// One persisted allocation row.
#[derive(Debug, Clone)]
pub struct AllocationRow {
    pub route_id: RouteId,
    pub vehicle_id: VehicleId,
    pub status: String,
    pub estimated_arrival: DateTime<Utc>,
    pub estimated_arrival_soc_pct: f64,
}

/// Scheduler header record.
#[derive(Debug, Clone)]
pub struct SchedulerRow {
    pub schedule_id: ScheduleId,
    pub site_id: SiteId,
    pub kind: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// One (vehicle, slot) row of a persisted charge schedule. The grid is
/// dense: idle slots carry zero power.
#[derive(Debug, Clone)]
pub struct ChargeScheduleRow {
    pub schedule_id: ScheduleId,
    pub vehicle_id: VehicleId,
    pub slot_start: DateTime<Utc>,
    pub power_kw: f64,
    pub connector_id: Option<String>,
}

/// One persisted route-energy checkpoint.
#[derive(Debug, Clone)]
pub struct CheckpointRow {
    pub schedule_id: ScheduleId,
    pub vehicle_id: VehicleId,
    pub route_id: RouteId,
    pub checkpoint_at: DateTime<Utc>,
    pub required_cumulative_kwh: f64,
    pub route_energy_buffer_kwh: f64,
    pub efficiency_kwh_per_mile: f64,
}

/// Store operations consumed by the controllers.
pub trait Store: Send + Sync {
    // ----- reads -----

    /// New routes with `plan_start ∈ [t0, t1]`, ascending by start.
    fn routes_in_window(
        &self,
        site: SiteId,
        t0: DateTime<Utc>,
        t1: DateTime<Utc>,
    ) -> StoreResult<Vec<Route>>;

    /// Vehicles with `active ∧ ¬vor`, telematic label joined in.
    fn active_vehicles(&self, site: SiteId) -> StoreResult<Vec<Vehicle>>;

    /// Every vehicle of the site, regardless of flags.
    fn all_vehicles(&self, site: SiteId) -> StoreResult<Vec<Vehicle>>;

    /// Latest state-monitor row at or before `t`.
    fn vsm_at(&self, vehicle: VehicleId, t: DateTime<Utc>) -> StoreResult<Option<VsmRow>>;

    /// A vehicle's planned routes (status N or A) in the window.
    fn routes_for_vehicle_plan(
        &self,
        vehicle: VehicleId,
        t0: DateTime<Utc>,
        t1: DateTime<Utc>,
    ) -> StoreResult<Vec<Route>>;

    /// A vehicle's routes joined through the allocation table.
    fn routes_for_vehicle_allocated(
        &self,
        vehicle: VehicleId,
        t0: DateTime<Utc>,
        t1: DateTime<Utc>,
    ) -> StoreResult<Vec<Route>>;

    /// Allocation rows for the given routes of a site.
    fn allocations_for_routes(
        &self,
        site: SiteId,
        route_ids: &[RouteId],
    ) -> StoreResult<Vec<AllocationRow>>;

    /// Latest forecast timestamp on record for the site.
    fn forecast_max(&self, site: SiteId) -> StoreResult<Option<DateTime<Utc>>>;

    /// Latest tariff timestamp on record.
    fn price_max(&self) -> StoreResult<Option<DateTime<Utc>>>;

    /// (slot, forecast kW) series in the window, ascending.
    fn forecast(
        &self,
        site: SiteId,
        t0: DateTime<Utc>,
        t1: DateTime<Utc>,
    ) -> StoreResult<Vec<(DateTime<Utc>, f64)>>;

    /// (slot, price, is_triad) series in the window, ascending.
    fn price(
        &self,
        t0: DateTime<Utc>,
        t1: DateTime<Utc>,
    ) -> StoreResult<Vec<(DateTime<Utc>, f64, bool)>>;

    /// Agreed site capacity in kVA.
    fn site_asc(&self, site: SiteId) -> StoreResult<Option<f64>>;

    fn site_chargers(&self, site: SiteId) -> StoreResult<Vec<Charger>>;

    /// (vehicle count, mean efficiency) over vehicles with a figure.
    fn fleet_efficiency(&self, site: SiteId) -> StoreResult<(i64, Option<f64>)>;

    /// Latest charger per vehicle in `[t − 18h, t)`, deduplicated so that
    /// a charger claimed by several vehicles stays with the most recent
    /// start; the losers resolve to `None`.
    fn vehicle_chargers_in_window(
        &self,
        vehicles: &[VehicleId],
        t: DateTime<Utc>,
    ) -> StoreResult<HashMap<VehicleId, Option<ChargerId>>>;

    /// Hierarchical configuration document for an application name.
    fn module_params(&self, application: &str) -> StoreResult<Option<serde_json::Value>>;

    fn scheduler_row(&self, schedule_id: ScheduleId) -> StoreResult<Option<SchedulerRow>>;

    fn charge_schedule_rows(
        &self,
        schedule_id: ScheduleId,
    ) -> StoreResult<Vec<ChargeScheduleRow>>;

    fn checkpoint_rows(&self, schedule_id: ScheduleId) -> StoreResult<Vec<CheckpointRow>>;

    // ----- writes -----

    fn create_allocation_monitor(
        &self,
        site: SiteId,
        trigger: TriggerType,
        run_at: DateTime<Utc>,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> StoreResult<AllocationId>;

    fn update_allocation_monitor(
        &self,
        id: AllocationId,
        status: RunStatus,
        score: f64,
        routes_in_window: usize,
        routes_allocated: usize,
        routes_overlapping: usize,
    ) -> StoreResult<()>;

    /// Replaces the site's allocations: delete everything for the site,
    /// then insert into both the live and the history table, atomically.
    fn replace_allocations(
        &self,
        site: SiteId,
        allocation_id: AllocationId,
        rows: &[RouteAllocation],
    ) -> StoreResult<()>;

    fn create_scheduler(&self, site: SiteId, kind: &str, status: &str)
        -> StoreResult<ScheduleId>;

    fn update_scheduler_status(&self, id: ScheduleId, status: &str) -> StoreResult<()>;

    /// Replaces the schedule's slot grid and checkpoints atomically.
    fn replace_schedule(
        &self,
        schedule_id: ScheduleId,
        slots: &[ChargeScheduleRow],
        checkpoints: &[CheckpointRow],
    ) -> StoreResult<()>;

    fn log_error(&self, module: &str, message: &str, at: DateTime<Utc>) -> StoreResult<()>;
}
