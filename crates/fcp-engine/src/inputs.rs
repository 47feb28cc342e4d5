//! Shared input derivation for the controllers: site parameters, planning
//! windows, as-of vehicle state, energy requirements, and availability
//! masks.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use fcp_core::config::{DEFAULT_FLEET_EFFICIENCY_KWH_MILE, MINIMUM_PLANNING_WINDOW_HOURS};
use fcp_core::params::parse_config_document;
use fcp_core::schedule::snap_up_to_slot;
use fcp_core::{
    AvailabilityMask, ChargerId, DataHorizon, Route, RouteEnergyRequirement, SiteId, SiteParams,
    SlotGrid, Vehicle, VehicleChargeState, VehicleId, VehicleStatus,
};
use fcp_store::Store;

use crate::{EngineError, EngineResult, APPLICATION_NAME};

/// Loads the site's typed parameters from the configuration source.
/// A missing or malformed document degrades to defaults.
pub fn load_site_params(store: &dyn Store, site: SiteId) -> EngineResult<SiteParams> {
    match store.module_params(APPLICATION_NAME)? {
        Some(document) => {
            let mut configs = parse_config_document(&document);
            match configs.remove(&site) {
                Some(params) => {
                    info!(
                        %site,
                        parameters = params.values.len(),
                        enabled_vehicles = params.enabled_vehicles.len(),
                        "site configuration loaded"
                    );
                    Ok(params)
                }
                None => {
                    warn!(%site, "no configuration for site, using defaults");
                    Ok(SiteParams::default())
                }
            }
        }
        None => {
            warn!("no configuration document found, using defaults");
            Ok(SiteParams::default())
        }
    }
}

/// The effective planning window: start snapped up to the slot grid, end
/// capped by the forecast and tariff horizons.
#[derive(Debug, Clone, Copy)]
pub struct PlanningWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub target_hours: f64,
    pub actual_hours: f64,
}

impl PlanningWindow {
    pub fn grid(&self) -> SlotGrid {
        SlotGrid::new(self.start, self.end)
    }
}

/// Computes the planning window for a run, enforcing the minimum-window
/// and half-window rules.
pub fn planning_window(
    store: &dyn Store,
    site: SiteId,
    now: DateTime<Utc>,
    target_hours: f64,
) -> EngineResult<PlanningWindow> {
    let start = snap_up_to_slot(now);
    let target_end = start + Duration::seconds((target_hours * 3600.0) as i64);

    let horizon = DataHorizon {
        now: start,
        max_forecast: store.forecast_max(site)?,
        max_price: store.price_max()?,
    };
    let end = horizon.cap(target_end);
    let actual_hours = (end - start).num_seconds() as f64 / 3600.0;

    if actual_hours < target_hours {
        warn!(
            %site,
            target_hours,
            actual_hours,
            "planning window reduced by data availability"
        );
    }
    if actual_hours < MINIMUM_PLANNING_WINDOW_HOURS {
        return Err(EngineError::Validation(format!(
            "planning window too short: {actual_hours:.1}h < {MINIMUM_PLANNING_WINDOW_HOURS:.1}h minimum"
        )));
    }
    if actual_hours < target_hours / 2.0 {
        return Err(EngineError::Validation(format!(
            "planning window is less than half of the requested window: \
             {actual_hours:.1}h < {:.1}h; check forecast and tariff data for site {site}",
            target_hours / 2.0
        )));
    }

    Ok(PlanningWindow {
        start,
        end,
        target_hours,
        actual_hours,
    })
}

/// Fleet-average efficiency, falling back to the system default.
pub fn fleet_efficiency(store: &dyn Store, site: SiteId) -> EngineResult<f64> {
    let (count, mean) = store.fleet_efficiency(site)?;
    match mean {
        Some(value) => {
            info!(%site, vehicles = count, efficiency = value, "fleet efficiency");
            Ok(value)
        }
        None => {
            warn!(%site, "no vehicle efficiency data, using default");
            Ok(DEFAULT_FLEET_EFFICIENCY_KWH_MILE)
        }
    }
}

/// Merges as-of state-monitor data into a vehicle record.
pub fn merge_vehicle_state(
    store: &dyn Store,
    vehicle: &mut Vehicle,
    as_of: DateTime<Utc>,
) -> EngineResult<()> {
    if let Some(vsm) = store.vsm_at(vehicle.id, as_of)? {
        vehicle.status = VehicleStatus::from_label(&vsm.status);
        vehicle.current_route_id = vsm.route_id;
        vehicle.estimated_soc_pct = vsm.estimated_soc_pct;
        vehicle.return_eta = vsm.return_eta;
        vehicle.return_soc_pct = vsm.return_soc_pct;
        vehicle.available_from = match (vehicle.status, vehicle.return_eta) {
            (VehicleStatus::OnRoute, Some(eta)) => Some(eta),
            _ => Some(as_of),
        };
    } else {
        vehicle.available_from = Some(as_of);
    }
    vehicle.available_energy_kwh = Some(vehicle.available_energy());
    Ok(())
}

/// Loads the site fleet for allocation: active vehicles, restricted by the
/// enabled-vehicle list, with as-of state and charger bindings merged in.
pub fn load_allocation_fleet(
    store: &dyn Store,
    site: SiteId,
    params: &SiteParams,
    as_of: DateTime<Utc>,
) -> EngineResult<(Vec<Vehicle>, HashMap<VehicleId, Option<ChargerId>>)> {
    let mut vehicles: Vec<Vehicle> = store
        .active_vehicles(site)?
        .into_iter()
        .filter(|v| params.vehicle_enabled(v.id))
        .collect();

    for vehicle in &mut vehicles {
        merge_vehicle_state(store, vehicle, as_of)?;
    }

    let ids: Vec<VehicleId> = vehicles.iter().map(|v| v.id).collect();
    let chargers = store.vehicle_chargers_in_window(&ids, as_of)?;
    for vehicle in &mut vehicles {
        vehicle.charger_id = chargers.get(&vehicle.id).copied().flatten();
    }

    info!(%site, vehicles = vehicles.len(), "allocation fleet loaded");
    Ok((vehicles, chargers))
}

/// Builds the charging state for each vehicle, dropping VOR vehicles and
/// the sentinel-SOC exclusions.
pub fn load_charge_states(
    store: &dyn Store,
    vehicles: &[Vehicle],
    chargers: &HashMap<VehicleId, Option<ChargerId>>,
    as_of: DateTime<Utc>,
) -> EngineResult<Vec<VehicleChargeState>> {
    let mut states = Vec::new();

    for vehicle in vehicles {
        if vehicle.vor || vehicle.status == VehicleStatus::Vor {
            debug!(vehicle = %vehicle.id, "vehicle out of rotation, skipped");
            continue;
        }
        let soc_pct = match store.vsm_at(vehicle.id, as_of)? {
            Some(vsm) => vsm.estimated_soc_pct.unwrap_or(50.0),
            None => vehicle.estimated_soc_pct.unwrap_or(50.0),
        };
        let mut state = VehicleChargeState::from_vehicle(vehicle, soc_pct);
        if state.is_excluded() {
            debug!(vehicle = %vehicle.id, "sentinel SOC, excluded from scheduling");
            continue;
        }
        state.charger_id = chargers.get(&vehicle.id).copied().flatten();
        states.push(state);
    }

    Ok(states)
}

/// Marks charger bindings as DC where the bound charger is a DC unit.
pub fn apply_charger_kinds(states: &mut [VehicleChargeState], chargers: &[fcp_core::Charger]) {
    for state in states {
        if let Some(charger_id) = state.charger_id {
            state.charger_is_dc = chargers
                .iter()
                .find(|c| c.id == charger_id)
                .map(|c| c.dc)
                .unwrap_or(false);
        }
    }
}

/// Cumulative route-energy requirements per vehicle, in departure order.
pub fn energy_requirements(
    routes_by_vehicle: &HashMap<VehicleId, Vec<Route>>,
    states: &[VehicleChargeState],
    safety_factor: f64,
    fleet_efficiency: f64,
    back_to_back_threshold_minutes: i64,
) -> HashMap<VehicleId, Vec<RouteEnergyRequirement>> {
    let state_of: HashMap<VehicleId, &VehicleChargeState> =
        states.iter().map(|s| (s.vehicle_id, s)).collect();

    let mut requirements = HashMap::new();

    for (vehicle_id, routes) in routes_by_vehicle {
        let Some(state) = state_of.get(vehicle_id) else {
            continue;
        };
        if routes.is_empty() {
            requirements.insert(*vehicle_id, Vec::new());
            continue;
        }

        let efficiency = state.efficiency_kwh_per_mile.unwrap_or(fleet_efficiency);
        let mut sorted: Vec<&Route> = routes.iter().collect();
        sorted.sort_by_key(|r| r.plan_start);

        let mut cumulative = 0.0;
        let mut rows = Vec::with_capacity(sorted.len());
        for (idx, route) in sorted.iter().enumerate() {
            let energy = route.plan_mileage * efficiency * safety_factor;
            cumulative += energy;

            let gap_to_next_minutes = sorted.get(idx + 1).map(|next| {
                (next.plan_start - route.plan_end).num_seconds() as f64 / 60.0
            });
            let is_back_to_back = gap_to_next_minutes
                .map(|gap| gap < back_to_back_threshold_minutes as f64)
                .unwrap_or(false);
            if is_back_to_back {
                warn!(
                    vehicle = %vehicle_id,
                    route = %route.id,
                    gap_minutes = gap_to_next_minutes.unwrap_or(0.0),
                    "back-to-back routes detected"
                );
            }

            rows.push(RouteEnergyRequirement {
                route_id: route.id.clone(),
                vehicle_id: *vehicle_id,
                departure: route.plan_start,
                arrival: route.plan_end,
                mileage: route.plan_mileage,
                efficiency_kwh_per_mile: efficiency,
                energy_kwh: energy,
                cumulative_kwh: cumulative,
                sequence_index: idx,
                is_back_to_back,
                gap_to_next_minutes,
            });
        }
        requirements.insert(*vehicle_id, rows);
    }

    requirements
}

/// Per-vehicle availability over the slot grid: VOR vehicles never charge;
/// a vehicle on route is unavailable until its return ETA; planned routes
/// block `[plan_start − departure_buffer, plan_end)`.
pub fn availability_masks(
    states: &[VehicleChargeState],
    routes_by_vehicle: &HashMap<VehicleId, Vec<Route>>,
    grid: &SlotGrid,
    min_departure_buffer_minutes: i64,
) -> HashMap<VehicleId, AvailabilityMask> {
    let buffer = Duration::minutes(min_departure_buffer_minutes);
    let mut masks = HashMap::new();

    for state in states {
        let mut slots = vec![true; grid.len()];

        if state.status == VehicleStatus::Vor {
            slots.fill(false);
        } else {
            if state.status == VehicleStatus::OnRoute {
                if let Some(eta) = state.return_eta {
                    for (idx, slot_start) in grid.iter().enumerate() {
                        if slot_start < eta {
                            slots[idx] = false;
                        }
                    }
                }
            }
            for route in routes_by_vehicle
                .get(&state.vehicle_id)
                .map(Vec::as_slice)
                .unwrap_or_default()
            {
                let blocked_from = route.plan_start - buffer;
                for (idx, slot_start) in grid.iter().enumerate() {
                    if slot_start >= blocked_from && slot_start < route.plan_end {
                        slots[idx] = false;
                    }
                }
            }
        }

        masks.insert(
            state.vehicle_id,
            AvailabilityMask {
                vehicle_id: state.vehicle_id,
                slots,
            },
        );
    }

    masks
}

/// Estimated SOC percentage at each route arrival, from the same battery
/// walk the energy-feasibility constraint runs.
pub fn arrival_socs(
    vehicle: &Vehicle,
    routes: &[Route],
    charger_cap_kw: Option<f64>,
    fleet_efficiency: f64,
) -> Vec<f64> {
    let charge_power = vehicle.charge_power(true, charger_cap_kw);
    let mut energy = vehicle
        .available_energy_kwh
        .unwrap_or_else(|| vehicle.available_energy());

    if let (Some(available_from), Some(first)) = (vehicle.available_from, routes.first()) {
        let hours = (first.plan_start - available_from).num_seconds() as f64 / 3600.0;
        if hours > 0.0 {
            energy = (energy + hours * charge_power).min(vehicle.battery_kwh);
        }
    }

    let mut socs = Vec::with_capacity(routes.len());
    for (idx, route) in routes.iter().enumerate() {
        energy -= vehicle.energy_required(route.plan_mileage, fleet_efficiency);
        socs.push((energy / vehicle.battery_kwh * 100.0).max(0.0));

        if let Some(next) = routes.get(idx + 1) {
            let hours = (next.plan_start - route.plan_end).num_seconds() as f64 / 3600.0;
            if hours > 0.0 {
                energy = (energy + hours * charge_power).min(vehicle.battery_kwh);
            }
        }
    }
    socs
}

/// Number of routes that overlap (with turnaround padding) at least one
/// other route in the window.
pub fn overlapping_route_count(routes: &[Route], turnaround_minutes: i64) -> usize {
    routes
        .iter()
        .filter(|a| {
            routes
                .iter()
                .any(|b| a.id != b.id && a.overlaps_with(b, turnaround_minutes))
        })
        .count()
}

/// Collects a window series into the lookup map the solvers consume.
pub fn series_to_map<T: Copy>(series: Vec<(DateTime<Utc>, T)>) -> HashMap<DateTime<Utc>, T> {
    series.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use fcp_core::{RouteId, RouteStatus, ScheduleId};
    use fcp_store::SqliteStore;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 16, h, m, 0).unwrap()
    }

    fn state(id: i64, soc_kwh: f64) -> VehicleChargeState {
        VehicleChargeState {
            vehicle_id: VehicleId::new(id),
            soc_pct: soc_kwh,
            soc_kwh,
            battery_kwh: 100.0,
            ac_rate_kw: 11.0,
            dc_rate_kw: 50.0,
            efficiency_kwh_per_mile: Some(0.35),
            status: VehicleStatus::Idle,
            return_eta: None,
            charger_id: None,
            charger_is_dc: false,
        }
    }

    fn route(id: &str, vehicle: i64, start: DateTime<Utc>, end: DateTime<Utc>, miles: f64) -> Route {
        Route {
            id: RouteId::from(id),
            site_id: SiteId::new(10),
            alias: id.to_string(),
            status: RouteStatus::New,
            plan_start: start,
            plan_end: end,
            plan_mileage: miles,
            n_orders: 0,
            vehicle_id: Some(VehicleId::new(vehicle)),
            energy_kwh: None,
        }
    }

    #[test]
    fn window_caps_to_horizon_and_enforces_half_rule() {
        let store = SqliteStore::open_in_memory().unwrap();
        let site = SiteId::new(10);
        // 6 hours of data from 04:00.
        for i in 0..12 {
            let slot = at(4, 0) + Duration::minutes(30 * i);
            store.insert_forecast_point(site, slot, 0.0).unwrap();
            store.insert_price_point(slot, 0.1, false).unwrap();
        }

        // Target 10h -> capped to 5.5h actual (last point 09:30), passes
        // the half rule.
        let window = planning_window(&store, site, at(4, 0), 10.0).unwrap();
        assert!((window.actual_hours - 5.5).abs() < 1e-9);

        // Target 18h -> 5.5 < 9: half-window violation.
        let err = planning_window(&store, site, at(4, 0), 18.0).unwrap_err();
        assert!(err.to_string().contains("half"));
    }

    #[test]
    fn window_too_short_is_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        let site = SiteId::new(10);
        for i in 0..4 {
            let slot = at(4, 0) + Duration::minutes(30 * i);
            store.insert_forecast_point(site, slot, 0.0).unwrap();
            store.insert_price_point(slot, 0.1, false).unwrap();
        }
        let err = planning_window(&store, site, at(4, 0), 3.0).unwrap_err();
        assert!(err.to_string().contains("too short"));
    }

    #[test]
    fn window_start_snaps_up() {
        let store = SqliteStore::open_in_memory().unwrap();
        let window = planning_window(&store, SiteId::new(10), at(4, 10), 8.0).unwrap();
        assert_eq!(window.start, at(4, 30));
        // No horizons on record: the target stands.
        assert!((window.actual_hours - 8.0).abs() < 1e-9);
    }

    #[test]
    fn energy_requirements_accumulate_in_departure_order() {
        let states = vec![state(1, 40.0)];
        let mut routes = HashMap::new();
        routes.insert(
            VehicleId::new(1),
            vec![
                // Inserted out of order on purpose.
                route("B", 1, at(12, 0), at(15, 0), 30.0),
                route("A", 1, at(6, 0), at(9, 0), 50.0),
            ],
        );
        let requirements = energy_requirements(&routes, &states, 1.15, 0.35, 90);
        let rows = &requirements[&VehicleId::new(1)];
        assert_eq!(rows[0].route_id, RouteId::from("A"));
        assert!((rows[0].energy_kwh - 50.0 * 0.35 * 1.15).abs() < 1e-9);
        assert!((rows[1].cumulative_kwh - (50.0 + 30.0) * 0.35 * 1.15).abs() < 1e-9);
        assert_eq!(rows[1].sequence_index, 1);
        // Gap 09:00 -> 12:00 is 180 min: not back to back at threshold 90.
        assert!(!rows[0].is_back_to_back);
    }

    #[test]
    fn back_to_back_detection_uses_threshold() {
        let states = vec![state(1, 40.0)];
        let mut routes = HashMap::new();
        routes.insert(
            VehicleId::new(1),
            vec![
                route("A", 1, at(6, 0), at(9, 0), 50.0),
                route("B", 1, at(9, 30), at(12, 0), 30.0),
            ],
        );
        let requirements = energy_requirements(&routes, &states, 1.15, 0.35, 90);
        assert!(requirements[&VehicleId::new(1)][0].is_back_to_back);
    }

    #[test]
    fn availability_blocks_routes_with_buffer() {
        let grid = SlotGrid::new(at(4, 0), at(12, 0));
        let states = vec![state(1, 40.0)];
        let mut routes = HashMap::new();
        routes.insert(
            VehicleId::new(1),
            vec![route("A", 1, at(8, 0), at(10, 0), 50.0)],
        );
        let masks = availability_masks(&states, &routes, &grid, 60);
        let mask = &masks[&VehicleId::new(1)];
        // Blocked from 07:00 (buffer) through 09:30 inclusive.
        assert!(mask.available_at(grid.index_at(at(6, 30)).unwrap()));
        assert!(!mask.available_at(grid.index_at(at(7, 0)).unwrap()));
        assert!(!mask.available_at(grid.index_at(at(9, 30)).unwrap()));
        assert!(mask.available_at(grid.index_at(at(10, 0)).unwrap()));
    }

    #[test]
    fn on_route_vehicle_blocked_until_return() {
        let grid = SlotGrid::new(at(4, 0), at(12, 0));
        let mut s = state(1, 40.0);
        s.status = VehicleStatus::OnRoute;
        s.return_eta = Some(at(6, 0));
        let masks = availability_masks(&[s], &HashMap::new(), &grid, 60);
        let mask = &masks[&VehicleId::new(1)];
        assert!(!mask.available_at(0));
        assert!(mask.available_at(grid.index_at(at(6, 0)).unwrap()));
    }

    #[test]
    fn vor_vehicle_never_available() {
        let grid = SlotGrid::new(at(4, 0), at(12, 0));
        let mut s = state(1, 40.0);
        s.status = VehicleStatus::Vor;
        let masks = availability_masks(&[s], &HashMap::new(), &grid, 60);
        assert_eq!(masks[&VehicleId::new(1)].available_count(), 0);
    }

    #[test]
    fn overlap_count_flags_both_members() {
        let routes = vec![
            route("A", 1, at(6, 0), at(9, 0), 50.0),
            route("B", 2, at(8, 0), at(11, 0), 30.0),
            route("C", 3, at(12, 0), at(13, 0), 20.0),
        ];
        assert_eq!(overlapping_route_count(&routes, 0), 2);
    }

    #[test]
    fn scheduler_ids_are_distinct_per_run() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = store.create_scheduler(SiteId::new(10), "dynamic", "running").unwrap();
        let b = store.create_scheduler(SiteId::new(10), "dynamic", "running").unwrap();
        assert_ne!(a, b);
        assert_eq!(a, ScheduleId::new(a.value()));
    }
}
