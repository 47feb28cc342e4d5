//! Read-only schedule reporting over persisted rows.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use fcp_core::schedule::SLOT_HOURS;
use fcp_core::{Route, RouteId, ScheduleId, SiteId, VehicleId};
use fcp_store::Store;

use crate::inputs::fleet_efficiency;
use crate::{EngineError, EngineResult};

/// Per-vehicle slice of a schedule report.
#[derive(Debug, Clone, Serialize)]
pub struct VehicleScheduleReport {
    pub vehicle_id: VehicleId,
    pub initial_soc_kwh: Option<f64>,
    pub initial_soc_percent: Option<f64>,
    pub battery_capacity_kwh: Option<f64>,
    pub total_energy_scheduled_kwh: f64,
    pub charging_minutes_before_first_route: f64,
    pub charging_minutes_between_routes: Vec<f64>,
    pub total_charging_minutes_between_routes: f64,
    pub estimated_final_soc_kwh: Option<f64>,
    pub estimated_final_soc_percent: Option<f64>,
    pub energy_required_for_routes_kwh: f64,
    pub charge_rate_kw: f64,
    pub allocated_routes: Vec<ReportedRoute>,
}

/// Route listing entry inside a vehicle report.
#[derive(Debug, Clone, Serialize)]
pub struct ReportedRoute {
    pub route_id: RouteId,
    pub plan_start: DateTime<Utc>,
    pub plan_end: DateTime<Utc>,
    pub plan_mileage: f64,
}

/// Fleet-wide report for one persisted schedule.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleReport {
    pub schedule_id: ScheduleId,
    pub site_id: SiteId,
    pub report_timestamp: DateTime<Utc>,
    pub schedule_status: String,
    pub planning_start: Option<DateTime<Utc>>,
    pub planning_end: Option<DateTime<Utc>>,
    pub vehicles_scheduled: usize,
    pub total_energy_scheduled_kwh: f64,
    pub routes_in_window: usize,
    pub routes_allocated: usize,
    pub vehicles_with_routes: usize,
    pub total_charging_minutes_fleet: f64,
    pub vehicles: Vec<VehicleScheduleReport>,
    pub notes: Vec<String>,
}

/// Builds the read-only report for a persisted schedule. Vehicle state is
/// read as of `timestamp`.
pub fn schedule_report(
    store: &dyn Store,
    schedule_id: ScheduleId,
    timestamp: DateTime<Utc>,
) -> EngineResult<ScheduleReport> {
    let header = store
        .scheduler_row(schedule_id)?
        .ok_or_else(|| EngineError::NotFound(format!("schedule {schedule_id}")))?;
    let site = header.site_id;

    let rows = store.charge_schedule_rows(schedule_id)?;
    if rows.is_empty() {
        return Ok(ScheduleReport {
            schedule_id,
            site_id: site,
            report_timestamp: timestamp,
            schedule_status: header.status,
            planning_start: None,
            planning_end: None,
            vehicles_scheduled: 0,
            total_energy_scheduled_kwh: 0.0,
            routes_in_window: 0,
            routes_allocated: 0,
            vehicles_with_routes: 0,
            total_charging_minutes_fleet: 0.0,
            vehicles: Vec::new(),
            notes: vec!["No charge data for this schedule.".to_string()],
        });
    }

    // Planning window back from the dense grid.
    let planning_start = rows.iter().map(|r| r.slot_start).min();
    let planning_end = rows
        .iter()
        .map(|r| r.slot_start)
        .max()
        .map(|t| t + Duration::minutes(30));

    // Per-vehicle slot series and energy totals.
    let mut slots_by_vehicle: HashMap<VehicleId, Vec<(DateTime<Utc>, f64)>> = HashMap::new();
    for row in &rows {
        slots_by_vehicle
            .entry(row.vehicle_id)
            .or_default()
            .push((row.slot_start, row.power_kw));
    }
    for series in slots_by_vehicle.values_mut() {
        series.sort_by_key(|(t, _)| *t);
    }

    // Route context: allocated routes inside the window, per vehicle.
    let (window_start, window_end) = (
        planning_start.unwrap_or(timestamp),
        planning_end.unwrap_or(timestamp),
    );
    let window_routes = store.routes_in_window(site, window_start, window_end)?;
    let route_ids: Vec<RouteId> = window_routes.iter().map(|r| r.id.clone()).collect();
    let allocations = store.allocations_for_routes(site, &route_ids)?;

    let mut routes_by_vehicle: HashMap<VehicleId, Vec<Route>> = HashMap::new();
    for vehicle_id in slots_by_vehicle.keys() {
        let routes =
            store.routes_for_vehicle_allocated(*vehicle_id, window_start, window_end)?;
        if !routes.is_empty() {
            routes_by_vehicle.insert(*vehicle_id, routes);
        }
    }

    let fleet_eff = fleet_efficiency(store, site)?;
    let vehicles_on_site = store.all_vehicles(site)?;
    let vehicle_rows: HashMap<VehicleId, _> =
        vehicles_on_site.into_iter().map(|v| (v.id, v)).collect();

    let mut vehicle_reports = Vec::new();
    let mut total_charging_minutes_fleet = 0.0;
    let mut total_energy = 0.0;

    let mut vehicle_ids: Vec<VehicleId> = slots_by_vehicle.keys().copied().collect();
    vehicle_ids.sort();

    for vehicle_id in vehicle_ids {
        let series = &slots_by_vehicle[&vehicle_id];
        let scheduled_kwh: f64 = series.iter().map(|(_, p)| p * SLOT_HOURS).sum();
        total_energy += scheduled_kwh;

        let (battery, charge_rate, efficiency, initial_soc_pct) =
            match vehicle_rows.get(&vehicle_id) {
                Some(vehicle) => {
                    let soc = store
                        .vsm_at(vehicle_id, timestamp)?
                        .and_then(|vsm| vsm.estimated_soc_pct);
                    (
                        Some(vehicle.battery_kwh),
                        vehicle.charge_power_ac_kw,
                        vehicle.efficiency_kwh_per_mile.unwrap_or(fleet_eff),
                        soc,
                    )
                }
                None => (None, 11.0, fleet_eff, None),
            };
        let initial_soc_kwh =
            match (initial_soc_pct, battery) {
                (Some(pct), Some(capacity)) => Some(pct / 100.0 * capacity),
                _ => None,
            };

        let routes = routes_by_vehicle
            .get(&vehicle_id)
            .map(Vec::as_slice)
            .unwrap_or_default();

        // Charging minutes = energy delivered / rate, per segment.
        let minutes_of = |energy_kwh: f64| {
            if charge_rate > 0.0 {
                energy_kwh / charge_rate * 60.0
            } else {
                0.0
            }
        };

        let (before_first, between): (f64, Vec<f64>) = if let Some(first) = routes.first() {
            let energy_before: f64 = series
                .iter()
                .filter(|(t, p)| *t < first.plan_start && *p > 0.0)
                .map(|(_, p)| p * SLOT_HOURS)
                .sum();
            let mut between = Vec::new();
            for pair in routes.windows(2) {
                let energy: f64 = series
                    .iter()
                    .filter(|(t, p)| {
                        *t >= pair[0].plan_end && *t < pair[1].plan_start && *p > 0.0
                    })
                    .map(|(_, p)| p * SLOT_HOURS)
                    .sum();
                between.push(minutes_of(energy));
            }
            (minutes_of(energy_before), between)
        } else {
            (minutes_of(scheduled_kwh), Vec::new())
        };

        let total_between: f64 = between.iter().sum();
        total_charging_minutes_fleet += before_first + total_between;

        let energy_for_routes: f64 = routes
            .iter()
            .map(|r| r.plan_mileage * efficiency)
            .sum();

        let (final_kwh, final_pct) = match (initial_soc_kwh, battery) {
            (Some(initial), Some(capacity)) if capacity > 0.0 => {
                let final_kwh =
                    (initial + scheduled_kwh - energy_for_routes).clamp(0.0, capacity);
                (Some(final_kwh), Some(100.0 * final_kwh / capacity))
            }
            _ => (None, None),
        };

        vehicle_reports.push(VehicleScheduleReport {
            vehicle_id,
            initial_soc_kwh,
            initial_soc_percent: initial_soc_pct,
            battery_capacity_kwh: battery,
            total_energy_scheduled_kwh: scheduled_kwh,
            charging_minutes_before_first_route: before_first,
            charging_minutes_between_routes: between,
            total_charging_minutes_between_routes: total_between,
            estimated_final_soc_kwh: final_kwh,
            estimated_final_soc_percent: final_pct,
            energy_required_for_routes_kwh: energy_for_routes,
            charge_rate_kw: charge_rate,
            allocated_routes: routes
                .iter()
                .map(|r| ReportedRoute {
                    route_id: r.id.clone(),
                    plan_start: r.plan_start,
                    plan_end: r.plan_end,
                    plan_mileage: r.plan_mileage,
                })
                .collect(),
        });
    }

    Ok(ScheduleReport {
        schedule_id,
        site_id: site,
        report_timestamp: timestamp,
        schedule_status: header.status,
        planning_start,
        planning_end,
        vehicles_scheduled: slots_by_vehicle.len(),
        total_energy_scheduled_kwh: total_energy,
        routes_in_window: window_routes.len(),
        routes_allocated: allocations.len(),
        vehicles_with_routes: routes_by_vehicle.len(),
        total_charging_minutes_fleet,
        vehicles: vehicle_reports,
        notes: Vec::new(),
    })
}
