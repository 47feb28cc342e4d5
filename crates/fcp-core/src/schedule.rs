//! The 30-minute slot grid and charge-schedule outputs.
//!
//! All charge scheduling happens on a deterministic half-open grid of
//! 30-minute slots: slot `i` covers `[start + 30i min, start + 30(i+1) min)`.
//! The grid start is the earliest 30-minute boundary at or after the
//! planning instant, so slot indices are reproducible from timestamps alone.

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};

use crate::{ChargerId, RouteId, ScheduleId, SiteId, VehicleId};

/// Duration of one slot.
pub const SLOT_MINUTES: i64 = 30;
/// Hours of energy delivered per kW over one slot.
pub const SLOT_HOURS: f64 = 0.5;

/// Snaps an instant up to the earliest 30-minute boundary at or after it.
pub fn snap_up_to_slot(t: DateTime<Utc>) -> DateTime<Utc> {
    let floored = t
        .duration_trunc(Duration::minutes(SLOT_MINUTES))
        .expect("30-minute truncation cannot overflow");
    if floored == t {
        t
    } else {
        floored + Duration::minutes(SLOT_MINUTES)
    }
}

/// Deterministic 30-minute slot grid over a half-open window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotGrid {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SlotGrid {
    /// Builds the grid for `[t, end)`, snapping the start up to the grid.
    pub fn new(t: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: snap_up_to_slot(t),
            end,
        }
    }

    /// Number of whole slots in the window.
    pub fn len(&self) -> usize {
        let seconds = (self.end - self.start).num_seconds();
        if seconds <= 0 {
            0
        } else {
            (seconds / (SLOT_MINUTES * 60)) as usize
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hours(&self) -> f64 {
        self.len() as f64 * SLOT_HOURS
    }

    /// Start instant of slot `idx`.
    pub fn slot_start(&self, idx: usize) -> DateTime<Utc> {
        self.start + Duration::minutes(SLOT_MINUTES * idx as i64)
    }

    /// Index of the first slot whose start is at or after `t`, when inside
    /// the grid.
    pub fn index_at(&self, t: DateTime<Utc>) -> Option<usize> {
        (0..self.len()).find(|&idx| self.slot_start(idx) >= t)
    }

    /// All slot starts, in order.
    pub fn iter(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        (0..self.len()).map(|idx| self.slot_start(idx))
    }
}

/// Solver result quality for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    Optimal,
    Feasible,
    GreedyFallback,
    Infeasible,
}

impl SolveStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SolveStatus::Optimal => "optimal",
            SolveStatus::Feasible => "feasible",
            SolveStatus::GreedyFallback => "greedy_fallback",
            SolveStatus::Infeasible => "infeasible",
        }
    }
}

/// Energy a vehicle must have banked before departing on one of its routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteEnergyRequirement {
    pub route_id: RouteId,
    pub vehicle_id: VehicleId,
    pub departure: DateTime<Utc>,
    pub arrival: DateTime<Utc>,
    pub mileage: f64,
    pub efficiency_kwh_per_mile: f64,
    /// Buffered energy for this route alone (mileage · efficiency · safety).
    pub energy_kwh: f64,
    /// Prefix sum of `energy_kwh` in departure order; non-decreasing.
    pub cumulative_kwh: f64,
    pub sequence_index: usize,
    pub is_back_to_back: bool,
    pub gap_to_next_minutes: Option<f64>,
}

/// Per-vehicle availability mask over the slot grid (true = may charge).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityMask {
    pub vehicle_id: VehicleId,
    pub slots: Vec<bool>,
}

impl AvailabilityMask {
    pub fn available_at(&self, idx: usize) -> bool {
        self.slots.get(idx).copied().unwrap_or(false)
    }

    pub fn available_count(&self) -> usize {
        self.slots.iter().filter(|s| **s).count()
    }
}

/// Charging power allocated to one vehicle in one slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeSlot {
    pub slot_start: DateTime<Utc>,
    pub power_kw: f64,
    pub cumulative_kwh: f64,
    pub price: f64,
    pub is_triad: bool,
}

impl ChargeSlot {
    pub fn energy_kwh(&self) -> f64 {
        self.power_kw * SLOT_HOURS
    }
}

/// Charging plan for a single vehicle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleChargeSchedule {
    pub vehicle_id: VehicleId,
    pub schedule_id: ScheduleId,
    pub initial_soc_kwh: f64,
    pub target_soc_kwh: f64,
    pub energy_needed_kwh: f64,
    pub checkpoints: Vec<RouteEnergyRequirement>,
    pub has_routes: bool,
    /// Only slots with meaningful power (> 0.01 kW) are kept here; the
    /// persisted form is densified with zero rows.
    pub slots: Vec<ChargeSlot>,
    pub energy_scheduled_kwh: f64,
    pub charger_id: Option<ChargerId>,
    pub charger_is_dc: bool,
    pub meets_requirements: bool,
    pub shortfall_kwh: f64,
}

/// Validation output attached to a schedule run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub passed: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn passing() -> Self {
        Self {
            passed: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.passed = false;
        self.errors.push(message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// Fleet-wide result of one charge-scheduling run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleOutcome {
    pub schedule_id: ScheduleId,
    pub site_id: SiteId,
    pub grid: SlotGrid,
    pub actual_window_hours: f64,
    pub vehicles: Vec<VehicleChargeSchedule>,
    /// Pure tariff cost: Σ 0.5·p·price. Synthetic and TRIAD terms live only
    /// in `objective_value`.
    pub total_cost: f64,
    pub objective_value: f64,
    pub total_energy_kwh: f64,
    pub solve_time_seconds: f64,
    pub status: SolveStatus,
    pub validation: ValidationReport,
    pub vehicles_scheduled: usize,
    pub routes_considered: usize,
    pub checkpoints_created: usize,
}

/// Data-availability horizon limiting the planning window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DataHorizon {
    pub now: DateTime<Utc>,
    pub max_forecast: Option<DateTime<Utc>>,
    pub max_price: Option<DateTime<Utc>>,
}

impl DataHorizon {
    /// Earliest limiting timestamp, if any horizon is known.
    pub fn effective_end(&self) -> Option<DateTime<Utc>> {
        match (self.max_forecast, self.max_price) {
            (Some(f), Some(p)) => Some(f.min(p)),
            (Some(f), None) => Some(f),
            (None, Some(p)) => Some(p),
            (None, None) => None,
        }
    }

    /// Caps a target window end by the data horizons.
    pub fn cap(&self, target_end: DateTime<Utc>) -> DateTime<Utc> {
        match self.effective_end() {
            Some(limit) => target_end.min(limit),
            None => target_end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 16, h, m, 0).unwrap()
    }

    #[test]
    fn snap_up_is_identity_on_boundaries() {
        assert_eq!(snap_up_to_slot(at(4, 0)), at(4, 0));
        assert_eq!(snap_up_to_slot(at(4, 30)), at(4, 30));
        assert_eq!(snap_up_to_slot(at(4, 1)), at(4, 30));
        assert_eq!(snap_up_to_slot(at(4, 31)), at(5, 0));
    }

    #[test]
    fn grid_is_exactly_the_30_minute_lattice() {
        let grid = SlotGrid::new(at(4, 10), at(8, 10));
        assert_eq!(grid.start, at(4, 30));
        // [04:30, 08:10) holds 7 whole slots.
        assert_eq!(grid.len(), 7);
        let starts: Vec<_> = grid.iter().collect();
        assert_eq!(starts[0], at(4, 30));
        assert_eq!(starts[6], at(7, 30));
        for (i, s) in starts.iter().enumerate() {
            assert_eq!(*s, grid.start + Duration::minutes(30 * i as i64));
        }
    }

    #[test]
    fn index_at_finds_first_slot_not_before() {
        let grid = SlotGrid::new(at(4, 0), at(10, 0));
        assert_eq!(grid.index_at(at(4, 0)), Some(0));
        assert_eq!(grid.index_at(at(6, 0)), Some(4));
        assert_eq!(grid.index_at(at(6, 15)), Some(5));
        assert_eq!(grid.index_at(at(11, 0)), None);
    }

    #[test]
    fn horizon_cap_takes_earliest() {
        let horizon = DataHorizon {
            now: at(4, 0),
            max_forecast: Some(at(10, 0)),
            max_price: Some(at(22, 0)),
        };
        assert_eq!(horizon.cap(at(22, 0)), at(10, 0));
        assert_eq!(horizon.cap(at(8, 0)), at(8, 0));
    }

    #[test]
    fn empty_grid_when_window_collapses() {
        let grid = SlotGrid::new(at(4, 10), at(4, 20));
        assert!(grid.is_empty());
        assert_eq!(grid.index_at(at(4, 10)), None);
    }
}
