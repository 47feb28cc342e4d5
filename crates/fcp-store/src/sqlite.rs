//! SQLite implementation of the [`Store`] trait.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use fcp_core::{
    AllocationId, Charger, ChargerId, Route, RouteAllocation, RouteId, RouteStatus, RunStatus,
    ScheduleId, SiteId, TriggerType, Vehicle, VehicleId, VehicleStatus,
};

use crate::schema::SCHEMA;
use crate::{
    AllocationRow, ChargeScheduleRow, CheckpointRow, SchedulerRow, Store, StoreError, StoreResult,
    VsmRow,
};

/// SQLite-backed store. The connection is serialized behind a mutex; every
/// replace operation runs inside one transaction.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (creating if needed) a file-backed store.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Opens a fresh in-memory store. Used by tests and dry runs.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        info!("store schema ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("store connection mutex poisoned")
    }

    fn vehicle_from_row(row: &Row<'_>) -> rusqlite::Result<Vehicle> {
        Ok(Vehicle {
            id: VehicleId::new(row.get(0)?),
            site_id: SiteId::new(row.get(1)?),
            active: row.get(2)?,
            vor: row.get(3)?,
            charge_power_ac_kw: row.get::<_, Option<f64>>(4)?.unwrap_or(11.0),
            charge_power_dc_kw: row.get::<_, Option<f64>>(5)?.unwrap_or(50.0),
            battery_kwh: row.get::<_, Option<f64>>(6)?.unwrap_or(80.0),
            efficiency_kwh_per_mile: row.get(7)?,
            telematic_label: row.get(8)?,
            status: VehicleStatus::Idle,
            current_route_id: None,
            estimated_soc_pct: None,
            return_eta: None,
            return_soc_pct: None,
            available_from: None,
            available_energy_kwh: None,
            charger_id: None,
        })
    }

    fn route_from_row(row: &Row<'_>) -> rusqlite::Result<Route> {
        let status: String = row.get(3)?;
        Ok(Route {
            id: RouteId::new(row.get::<_, String>(0)?),
            site_id: SiteId::new(row.get(1)?),
            vehicle_id: row.get::<_, Option<i64>>(2)?.map(VehicleId::new),
            status: RouteStatus::from_code(&status),
            alias: row
                .get::<_, Option<String>>(4)?
                .unwrap_or_else(|| row.get::<_, String>(0).unwrap_or_default()),
            plan_start: row.get(5)?,
            plan_end: row.get(6)?,
            plan_mileage: row.get(7)?,
            n_orders: row.get(8)?,
            energy_kwh: None,
        })
    }

    const VEHICLE_COLUMNS: &'static str = "v.vehicle_id, v.site_id, v.active, v.vor, \
         v.charge_power_ac, v.charge_power_dc, v.battery_capacity, v.efficiency_kwh_mile, \
         vt.telematic_label";

    const ROUTE_COLUMNS: &'static str = "route_id, site_id, vehicle_id, route_status, \
         route_alias, plan_start_date_time, plan_end_date_time, plan_mileage, n_orders";
}

impl Store for SqliteStore {
    fn routes_in_window(
        &self,
        site: SiteId,
        t0: DateTime<Utc>,
        t1: DateTime<Utc>,
    ) -> StoreResult<Vec<Route>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM t_route_plan
             WHERE site_id = ?1 AND route_status = 'N'
               AND plan_start_date_time >= ?2 AND plan_start_date_time <= ?3
             ORDER BY plan_start_date_time ASC",
            Self::ROUTE_COLUMNS
        ))?;
        let routes = stmt
            .query_map(params![site.value(), t0, t1], Self::route_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(routes)
    }

    fn active_vehicles(&self, site: SiteId) -> StoreResult<Vec<Vehicle>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM t_vehicle v
             LEFT JOIN t_vehicle_telematics vt
               ON v.vehicle_id = vt.vehicle_id AND vt.telematic_id = 2
             WHERE v.site_id = ?1 AND v.active = 1 AND v.vor = 0",
            Self::VEHICLE_COLUMNS
        ))?;
        let vehicles = stmt
            .query_map(params![site.value()], Self::vehicle_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(vehicles)
    }

    fn all_vehicles(&self, site: SiteId) -> StoreResult<Vec<Vehicle>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM t_vehicle v
             LEFT JOIN t_vehicle_telematics vt
               ON v.vehicle_id = vt.vehicle_id AND vt.telematic_id = 2
             WHERE v.site_id = ?1",
            Self::VEHICLE_COLUMNS
        ))?;
        let vehicles = stmt
            .query_map(params![site.value()], Self::vehicle_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(vehicles)
    }

    fn vsm_at(&self, vehicle: VehicleId, t: DateTime<Utc>) -> StoreResult<Option<VsmRow>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT vehicle_id, date_time, status, route_id,
                        estimated_soc, return_eta, return_soc
                 FROM t_vsm
                 WHERE vehicle_id = ?1 AND date_time <= ?2
                 ORDER BY date_time DESC LIMIT 1",
                params![vehicle.value(), t],
                |row| {
                    Ok(VsmRow {
                        vehicle_id: VehicleId::new(row.get(0)?),
                        at: row.get(1)?,
                        status: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                        route_id: row.get::<_, Option<String>>(3)?.map(RouteId::new),
                        estimated_soc_pct: row.get(4)?,
                        return_eta: row.get(5)?,
                        return_soc_pct: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn routes_for_vehicle_plan(
        &self,
        vehicle: VehicleId,
        t0: DateTime<Utc>,
        t1: DateTime<Utc>,
    ) -> StoreResult<Vec<Route>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM t_route_plan
             WHERE vehicle_id = ?1
               AND plan_start_date_time BETWEEN ?2 AND ?3
               AND route_status IN ('N', 'A')
             ORDER BY plan_start_date_time ASC",
            Self::ROUTE_COLUMNS
        ))?;
        let routes = stmt
            .query_map(params![vehicle.value(), t0, t1], Self::route_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(routes)
    }

    fn routes_for_vehicle_allocated(
        &self,
        vehicle: VehicleId,
        t0: DateTime<Utc>,
        t1: DateTime<Utc>,
    ) -> StoreResult<Vec<Route>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT rp.route_id, rp.site_id, ra.vehicle_id_allocated, rp.route_status,
                    rp.route_alias, rp.plan_start_date_time, rp.plan_end_date_time,
                    rp.plan_mileage, rp.n_orders
             FROM t_route_plan rp
             INNER JOIN t_route_allocated ra ON rp.route_id = ra.route_id
             WHERE ra.vehicle_id_allocated = ?1
               AND rp.plan_start_date_time BETWEEN ?2 AND ?3
               AND rp.route_status IN ('N', 'A')
             ORDER BY rp.plan_start_date_time ASC",
        )?;
        let routes = stmt
            .query_map(params![vehicle.value(), t0, t1], Self::route_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(routes)
    }

    fn allocations_for_routes(
        &self,
        site: SiteId,
        route_ids: &[RouteId],
    ) -> StoreResult<Vec<AllocationRow>> {
        if route_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn();
        let placeholders = vec!["?"; route_ids.len()].join(", ");
        let mut stmt = conn.prepare(&format!(
            "SELECT route_id, vehicle_id_allocated, status,
                    estimated_arrival, estimated_arrival_soc
             FROM t_route_allocated
             WHERE site_id = {} AND route_id IN ({placeholders})",
            site.value()
        ))?;
        let rows = stmt
            .query_map(
                params_from_iter(route_ids.iter().map(|r| r.as_str())),
                |row| {
                    Ok(AllocationRow {
                        route_id: RouteId::new(row.get::<_, String>(0)?),
                        vehicle_id: VehicleId::new(row.get(1)?),
                        status: row.get(2)?,
                        estimated_arrival: row.get(3)?,
                        estimated_arrival_soc_pct: row.get(4)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn forecast_max(&self, site: SiteId) -> StoreResult<Option<DateTime<Utc>>> {
        let conn = self.conn();
        let max: Option<DateTime<Utc>> = conn.query_row(
            "SELECT MAX(forecasted_date_time) FROM t_site_energy_forecast WHERE site_id = ?1",
            params![site.value()],
            |row| row.get(0),
        )?;
        Ok(max)
    }

    fn price_max(&self) -> StoreResult<Option<DateTime<Utc>>> {
        let conn = self.conn();
        let max: Option<DateTime<Utc>> = conn.query_row(
            "SELECT MAX(date_time) FROM t_electricity_price",
            [],
            |row| row.get(0),
        )?;
        Ok(max)
    }

    fn forecast(
        &self,
        site: SiteId,
        t0: DateTime<Utc>,
        t1: DateTime<Utc>,
    ) -> StoreResult<Vec<(DateTime<Utc>, f64)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT forecasted_date_time, forecasted_consumption
             FROM t_site_energy_forecast
             WHERE site_id = ?1 AND forecasted_date_time BETWEEN ?2 AND ?3
             ORDER BY forecasted_date_time ASC",
        )?;
        let series = stmt
            .query_map(params![site.value(), t0, t1], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(series)
    }

    fn price(
        &self,
        t0: DateTime<Utc>,
        t1: DateTime<Utc>,
    ) -> StoreResult<Vec<(DateTime<Utc>, f64, bool)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT date_time, electricity_price_fixed, triad
             FROM t_electricity_price
             WHERE date_time BETWEEN ?1 AND ?2
             ORDER BY date_time ASC",
        )?;
        let series = stmt
            .query_map(params![t0, t1], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(series)
    }

    fn site_asc(&self, site: SiteId) -> StoreResult<Option<f64>> {
        let conn = self.conn();
        let asc = conn
            .query_row(
                "SELECT asc_kva FROM t_site WHERE site_id = ?1",
                params![site.value()],
                |row| row.get::<_, Option<f64>>(0),
            )
            .optional()?;
        Ok(asc.flatten())
    }

    fn site_chargers(&self, site: SiteId) -> StoreResult<Vec<Charger>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT charger_id, site_id, max_power, dc_flag FROM t_charger WHERE site_id = ?1",
        )?;
        let chargers = stmt
            .query_map(params![site.value()], |row| {
                Ok(Charger {
                    id: ChargerId::new(row.get(0)?),
                    site_id: SiteId::new(row.get(1)?),
                    max_power_kw: row.get(2)?,
                    dc: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(chargers)
    }

    fn fleet_efficiency(&self, site: SiteId) -> StoreResult<(i64, Option<f64>)> {
        let conn = self.conn();
        let result = conn.query_row(
            "SELECT COUNT(*), AVG(efficiency_kwh_mile)
             FROM t_vehicle
             WHERE site_id = ?1 AND efficiency_kwh_mile IS NOT NULL",
            params![site.value()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(result)
    }

    fn vehicle_chargers_in_window(
        &self,
        vehicles: &[VehicleId],
        t: DateTime<Utc>,
    ) -> StoreResult<HashMap<VehicleId, Option<ChargerId>>> {
        if vehicles.is_empty() {
            return Ok(HashMap::new());
        }

        let window_start = t - Duration::hours(18);
        let conn = self.conn();
        let placeholders = vec!["?"; vehicles.len()].join(", ");
        let mut stmt = conn.prepare(&format!(
            "SELECT vehicle_id, charger_id, MAX(start_date_time)
             FROM t_vehicle_charge
             WHERE vehicle_id IN ({placeholders})
               AND start_date_time < ? AND start_date_time > ?
             GROUP BY vehicle_id"
        ))?;

        let ids: Vec<i64> = vehicles.iter().map(|v| v.value()).collect();
        let mut args: Vec<&dyn rusqlite::ToSql> =
            ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
        args.push(&t);
        args.push(&window_start);

        let latest: Vec<(VehicleId, ChargerId, DateTime<Utc>)> = stmt
            .query_map(&args[..], |row| {
                Ok((
                    VehicleId::new(row.get(0)?),
                    ChargerId::new(row.get(1)?),
                    row.get(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        // One vehicle per charger: a charger used by several vehicles stays
        // with the most recent start; the rest become disconnected.
        let mut best_per_charger: HashMap<ChargerId, (VehicleId, DateTime<Utc>)> = HashMap::new();
        for (vehicle_id, charger_id, started) in &latest {
            match best_per_charger.get(charger_id) {
                Some((_, existing)) if *existing >= *started => {}
                _ => {
                    best_per_charger.insert(*charger_id, (*vehicle_id, *started));
                }
            }
        }

        let mut map: HashMap<VehicleId, Option<ChargerId>> =
            vehicles.iter().map(|v| (*v, None)).collect();
        for (vehicle_id, charger_id, _) in latest {
            let keeps = best_per_charger
                .get(&charger_id)
                .is_some_and(|(winner, _)| *winner == vehicle_id);
            map.insert(vehicle_id, if keeps { Some(charger_id) } else { None });
        }

        debug!(vehicles = vehicles.len(), bound = map.values().filter(|c| c.is_some()).count(),
               "resolved vehicle charger bindings");
        Ok(map)
    }

    fn module_params(&self, application: &str) -> StoreResult<Option<serde_json::Value>> {
        let conn = self.conn();
        let raw: Option<String> = conn
            .query_row(
                "SELECT params_json FROM t_module_params WHERE application_name = ?1",
                params![application],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(text) => {
                let value = serde_json::from_str(&text)
                    .map_err(|e| StoreError::Parse(format!("module params: {e}")))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn scheduler_row(&self, schedule_id: ScheduleId) -> StoreResult<Option<SchedulerRow>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT schedule_id, site_id, scheduler_type, status, created_datetime
                 FROM t_scheduler WHERE schedule_id = ?1",
                params![schedule_id.value()],
                |row| {
                    Ok(SchedulerRow {
                        schedule_id: ScheduleId::new(row.get(0)?),
                        site_id: SiteId::new(row.get(1)?),
                        kind: row.get(2)?,
                        status: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn charge_schedule_rows(
        &self,
        schedule_id: ScheduleId,
    ) -> StoreResult<Vec<ChargeScheduleRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT schedule_id, vehicle_id, charge_start_date_time, charge_power, connector_id
             FROM t_charge_schedule
             WHERE schedule_id = ?1
             ORDER BY vehicle_id, charge_start_date_time",
        )?;
        let rows = stmt
            .query_map(params![schedule_id.value()], |row| {
                Ok(ChargeScheduleRow {
                    schedule_id: ScheduleId::new(row.get(0)?),
                    vehicle_id: VehicleId::new(row.get(1)?),
                    slot_start: row.get(2)?,
                    power_kw: row.get(3)?,
                    connector_id: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn checkpoint_rows(&self, schedule_id: ScheduleId) -> StoreResult<Vec<CheckpointRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT schedule_id, vehicle_id, route_id, checkpoint_datetime_utc,
                    required_cumulative_energy_kwh, route_energy_buffer_kwh,
                    efficiency_used_kwh_mile
             FROM t_schedule_route_checkpoints
             WHERE schedule_id = ?1
             ORDER BY vehicle_id, checkpoint_datetime_utc",
        )?;
        let rows = stmt
            .query_map(params![schedule_id.value()], |row| {
                Ok(CheckpointRow {
                    schedule_id: ScheduleId::new(row.get(0)?),
                    vehicle_id: VehicleId::new(row.get(1)?),
                    route_id: RouteId::new(row.get::<_, String>(2)?),
                    checkpoint_at: row.get(3)?,
                    required_cumulative_kwh: row.get(4)?,
                    route_energy_buffer_kwh: row.get(5)?,
                    efficiency_kwh_per_mile: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn create_allocation_monitor(
        &self,
        site: SiteId,
        trigger: TriggerType,
        run_at: DateTime<Utc>,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> StoreResult<AllocationId> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO t_allocation_monitor
               (site_id, status, trigger_type, run_datetime,
                allocation_window_start, allocation_window_end)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                site.value(),
                RunStatus::New.code(),
                trigger.as_str(),
                run_at,
                window_start,
                window_end
            ],
        )?;
        Ok(AllocationId::new(conn.last_insert_rowid()))
    }

    fn update_allocation_monitor(
        &self,
        id: AllocationId,
        status: RunStatus,
        score: f64,
        routes_in_window: usize,
        routes_allocated: usize,
        routes_overlapping: usize,
    ) -> StoreResult<()> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE t_allocation_monitor
             SET status = ?1, score = ?2, routes_in_window = ?3,
                 routes_allocated = ?4, routes_overlapping_count = ?5
             WHERE allocation_id = ?6",
            params![
                status.code(),
                score,
                routes_in_window as i64,
                routes_allocated as i64,
                routes_overlapping as i64,
                id.value()
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("allocation monitor {id}")));
        }
        Ok(())
    }

    fn replace_allocations(
        &self,
        site: SiteId,
        allocation_id: AllocationId,
        rows: &[RouteAllocation],
    ) -> StoreResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM t_route_allocated WHERE site_id = ?1",
            params![site.value()],
        )?;

        for alloc in rows {
            tx.execute(
                "INSERT INTO t_route_allocated
                   (allocation_id, route_id, site_id, vehicle_id_allocated,
                    status, estimated_arrival, estimated_arrival_soc)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    allocation_id.value(),
                    alloc.route_id.as_str(),
                    site.value(),
                    alloc.vehicle_id.value(),
                    "N",
                    alloc.estimated_arrival,
                    alloc.estimated_arrival_soc_pct
                ],
            )?;
            tx.execute(
                "INSERT INTO t_route_allocated_history
                   (allocation_id, route_id, site_id, vehicle_id_allocated,
                    status, estimated_arrival, estimated_arrival_soc)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    allocation_id.value(),
                    alloc.route_id.as_str(),
                    site.value(),
                    alloc.vehicle_id.value(),
                    "N",
                    alloc.estimated_arrival,
                    alloc.estimated_arrival_soc_pct
                ],
            )?;
        }

        tx.commit()?;
        info!(site = %site, rows = rows.len(), "allocations replaced");
        Ok(())
    }

    fn create_scheduler(
        &self,
        site: SiteId,
        kind: &str,
        status: &str,
    ) -> StoreResult<ScheduleId> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO t_scheduler (site_id, scheduler_type, status, created_datetime)
             VALUES (?1, ?2, ?3, ?4)",
            params![site.value(), kind, status, Utc::now()],
        )?;
        Ok(ScheduleId::new(conn.last_insert_rowid()))
    }

    fn update_scheduler_status(&self, id: ScheduleId, status: &str) -> StoreResult<()> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE t_scheduler SET status = ?1, modified_datetime = ?2 WHERE schedule_id = ?3",
            params![status, Utc::now(), id.value()],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("scheduler {id}")));
        }
        Ok(())
    }

    fn replace_schedule(
        &self,
        schedule_id: ScheduleId,
        slots: &[ChargeScheduleRow],
        checkpoints: &[CheckpointRow],
    ) -> StoreResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM t_charge_schedule WHERE schedule_id = ?1",
            params![schedule_id.value()],
        )?;
        tx.execute(
            "DELETE FROM t_schedule_route_checkpoints WHERE schedule_id = ?1",
            params![schedule_id.value()],
        )?;

        for slot in slots {
            tx.execute(
                "INSERT INTO t_charge_schedule
                   (schedule_id, vehicle_id, charge_start_date_time, charge_power, connector_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    slot.schedule_id.value(),
                    slot.vehicle_id.value(),
                    slot.slot_start,
                    slot.power_kw,
                    slot.connector_id
                ],
            )?;
        }

        for checkpoint in checkpoints {
            tx.execute(
                "INSERT INTO t_schedule_route_checkpoints
                   (schedule_id, vehicle_id, route_id, checkpoint_datetime_utc,
                    required_cumulative_energy_kwh, route_energy_buffer_kwh,
                    efficiency_used_kwh_mile)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    checkpoint.schedule_id.value(),
                    checkpoint.vehicle_id.value(),
                    checkpoint.route_id.as_str(),
                    checkpoint.checkpoint_at,
                    checkpoint.required_cumulative_kwh,
                    checkpoint.route_energy_buffer_kwh,
                    checkpoint.efficiency_kwh_per_mile
                ],
            )?;
        }

        tx.commit()?;
        info!(
            schedule = %schedule_id,
            slots = slots.len(),
            checkpoints = checkpoints.len(),
            "schedule replaced"
        );
        Ok(())
    }

    fn log_error(&self, module: &str, message: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO t_error_log (error_datetime, module_no, error_message)
             VALUES (?1, ?2, ?3)",
            params![at, module, message],
        )?;
        Ok(())
    }
}

/// Seeding helpers. Operational systems own these tables in production;
/// tests and local fixtures write through this interface.
impl SqliteStore {
    pub fn insert_site(&self, site: SiteId, asc_kva: Option<f64>) -> StoreResult<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO t_site (site_id, asc_kva) VALUES (?1, ?2)",
            params![site.value(), asc_kva],
        )?;
        Ok(())
    }

    pub fn insert_vehicle(&self, vehicle: &Vehicle) -> StoreResult<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO t_vehicle
               (vehicle_id, site_id, active, vor, charge_power_ac, charge_power_dc,
                battery_capacity, efficiency_kwh_mile)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                vehicle.id.value(),
                vehicle.site_id.value(),
                vehicle.active,
                vehicle.vor,
                vehicle.charge_power_ac_kw,
                vehicle.charge_power_dc_kw,
                vehicle.battery_kwh,
                vehicle.efficiency_kwh_per_mile
            ],
        )?;
        Ok(())
    }

    pub fn insert_route(&self, route: &Route) -> StoreResult<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO t_route_plan
               (route_id, site_id, vehicle_id, route_status, route_alias,
                plan_start_date_time, plan_end_date_time, plan_mileage, n_orders)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                route.id.as_str(),
                route.site_id.value(),
                route.vehicle_id.map(VehicleId::value),
                route.status.code(),
                route.alias,
                route.plan_start,
                route.plan_end,
                route.plan_mileage,
                route.n_orders
            ],
        )?;
        Ok(())
    }

    pub fn insert_vsm(&self, row: &VsmRow) -> StoreResult<()> {
        self.conn().execute(
            "INSERT INTO t_vsm
               (vehicle_id, date_time, status, route_id, estimated_soc, return_eta, return_soc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                row.vehicle_id.value(),
                row.at,
                row.status,
                row.route_id.as_ref().map(RouteId::as_str),
                row.estimated_soc_pct,
                row.return_eta,
                row.return_soc_pct
            ],
        )?;
        Ok(())
    }

    pub fn insert_charger(&self, charger: &Charger) -> StoreResult<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO t_charger (charger_id, site_id, max_power, dc_flag)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                charger.id.value(),
                charger.site_id.value(),
                charger.max_power_kw,
                charger.dc
            ],
        )?;
        Ok(())
    }

    pub fn insert_vehicle_charge(
        &self,
        vehicle: VehicleId,
        charger: ChargerId,
        started: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.conn().execute(
            "INSERT INTO t_vehicle_charge (vehicle_id, charger_id, start_date_time)
             VALUES (?1, ?2, ?3)",
            params![vehicle.value(), charger.value(), started],
        )?;
        Ok(())
    }

    pub fn insert_forecast_point(
        &self,
        site: SiteId,
        at: DateTime<Utc>,
        consumption_kw: f64,
    ) -> StoreResult<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO t_site_energy_forecast
               (site_id, forecasted_date_time, forecasted_consumption)
             VALUES (?1, ?2, ?3)",
            params![site.value(), at, consumption_kw],
        )?;
        Ok(())
    }

    pub fn insert_price_point(
        &self,
        at: DateTime<Utc>,
        price: f64,
        triad: bool,
    ) -> StoreResult<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO t_electricity_price
               (date_time, electricity_price_fixed, triad)
             VALUES (?1, ?2, ?3)",
            params![at, price, triad],
        )?;
        Ok(())
    }

    pub fn insert_module_params(
        &self,
        application: &str,
        document: &serde_json::Value,
    ) -> StoreResult<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO t_module_params (application_name, params_json)
             VALUES (?1, ?2)",
            params![application, document.to_string()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use fcp_core::RouteStatus;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 16, h, m, 0).unwrap()
    }

    fn vehicle(id: i64, site: i64) -> Vehicle {
        Vehicle {
            id: VehicleId::new(id),
            site_id: SiteId::new(site),
            active: true,
            vor: false,
            charge_power_ac_kw: 11.0,
            charge_power_dc_kw: 50.0,
            battery_kwh: 100.0,
            efficiency_kwh_per_mile: Some(0.35),
            telematic_label: None,
            status: VehicleStatus::Idle,
            current_route_id: None,
            estimated_soc_pct: None,
            return_eta: None,
            return_soc_pct: None,
            available_from: None,
            available_energy_kwh: None,
            charger_id: None,
        }
    }

    fn route(id: &str, site: i64, start: DateTime<Utc>, end: DateTime<Utc>) -> Route {
        Route {
            id: RouteId::from(id),
            site_id: SiteId::new(site),
            alias: id.to_string(),
            status: RouteStatus::New,
            plan_start: start,
            plan_end: end,
            plan_mileage: 50.0,
            n_orders: 10,
            vehicle_id: None,
            energy_kwh: None,
        }
    }

    #[test]
    fn routes_in_window_filters_status_and_bounds() {
        let store = SqliteStore::open_in_memory().unwrap();
        let site = SiteId::new(10);
        store.insert_route(&route("A", 10, at(6, 0), at(9, 0))).unwrap();
        store.insert_route(&route("B", 10, at(23, 0), at(23, 30))).unwrap();
        let mut done = route("C", 10, at(7, 0), at(8, 0));
        done.status = RouteStatus::Allocated;
        store.insert_route(&done).unwrap();
        store.insert_route(&route("D", 99, at(6, 0), at(9, 0))).unwrap();

        let routes = store.routes_in_window(site, at(4, 0), at(22, 0)).unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].id.as_str(), "A");
    }

    #[test]
    fn active_vehicles_excludes_vor() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_vehicle(&vehicle(1, 10)).unwrap();
        let mut vor = vehicle(2, 10);
        vor.vor = true;
        store.insert_vehicle(&vor).unwrap();
        let mut inactive = vehicle(3, 10);
        inactive.active = false;
        store.insert_vehicle(&inactive).unwrap();

        let vehicles = store.active_vehicles(SiteId::new(10)).unwrap();
        assert_eq!(vehicles.len(), 1);
        assert_eq!(vehicles[0].id, VehicleId::new(1));

        let all = store.all_vehicles(SiteId::new(10)).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn vsm_as_of_picks_latest_at_or_before() {
        let store = SqliteStore::open_in_memory().unwrap();
        let vehicle_id = VehicleId::new(1);
        for (hour, soc) in [(2, 90.0), (4, 70.0), (6, 50.0)] {
            store
                .insert_vsm(&VsmRow {
                    vehicle_id,
                    at: at(hour, 0),
                    status: "Idle".into(),
                    route_id: None,
                    estimated_soc_pct: Some(soc),
                    return_eta: None,
                    return_soc_pct: None,
                })
                .unwrap();
        }

        let row = store.vsm_at(vehicle_id, at(5, 0)).unwrap().unwrap();
        assert_eq!(row.at, at(4, 0));
        assert_eq!(row.estimated_soc_pct, Some(70.0));
        assert!(store.vsm_at(vehicle_id, at(1, 0)).unwrap().is_none());
    }

    #[test]
    fn vehicle_route_queries_follow_their_mapping() {
        let store = SqliteStore::open_in_memory().unwrap();
        let site = SiteId::new(10);

        // Route P is planned directly on vehicle 1; route Q is allocated to
        // vehicle 1 through the allocation table but planned on nobody.
        let mut planned = route("P", 10, at(6, 0), at(9, 0));
        planned.vehicle_id = Some(VehicleId::new(1));
        store.insert_route(&planned).unwrap();
        store.insert_route(&route("Q", 10, at(10, 0), at(12, 0))).unwrap();

        let monitor = store
            .create_allocation_monitor(site, TriggerType::Initial, at(4, 0), at(4, 0), at(22, 0))
            .unwrap();
        store
            .replace_allocations(
                site,
                monitor,
                &[RouteAllocation {
                    route_id: RouteId::from("Q"),
                    vehicle_id: VehicleId::new(1),
                    estimated_arrival: at(12, 0),
                    estimated_arrival_soc_pct: 55.0,
                    cost: 0.0,
                }],
            )
            .unwrap();

        let plan = store
            .routes_for_vehicle_plan(VehicleId::new(1), at(4, 0), at(22, 0))
            .unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].id.as_str(), "P");

        let allocated = store
            .routes_for_vehicle_allocated(VehicleId::new(1), at(4, 0), at(22, 0))
            .unwrap();
        assert_eq!(allocated.len(), 1);
        assert_eq!(allocated[0].id.as_str(), "Q");
        assert_eq!(allocated[0].vehicle_id, Some(VehicleId::new(1)));
    }

    #[test]
    fn charger_dedupe_keeps_most_recent_vehicle() {
        let store = SqliteStore::open_in_memory().unwrap();
        let v1 = VehicleId::new(1);
        let v2 = VehicleId::new(2);
        let charger = ChargerId::new(87);
        store.insert_vehicle_charge(v1, charger, at(0, 0)).unwrap();
        store.insert_vehicle_charge(v2, charger, at(2, 0)).unwrap();

        let map = store
            .vehicle_chargers_in_window(&[v1, v2], at(4, 0))
            .unwrap();
        assert_eq!(map[&v1], None);
        assert_eq!(map[&v2], Some(charger));
    }

    #[test]
    fn charger_window_excludes_old_rows() {
        let store = SqliteStore::open_in_memory().unwrap();
        let v1 = VehicleId::new(1);
        // 19 hours before reference: outside the 18 hour lookback.
        let old = at(4, 0) - Duration::hours(19);
        store
            .insert_vehicle_charge(v1, ChargerId::new(5), old)
            .unwrap();
        let map = store.vehicle_chargers_in_window(&[v1], at(4, 0)).unwrap();
        assert_eq!(map[&v1], None);
    }

    #[test]
    fn replace_allocations_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let site = SiteId::new(10);
        let rows = vec![RouteAllocation {
            route_id: RouteId::from("A"),
            vehicle_id: VehicleId::new(1),
            estimated_arrival: at(9, 0),
            estimated_arrival_soc_pct: 60.0,
            cost: -1.0,
        }];

        let id1 = store
            .create_allocation_monitor(site, TriggerType::Initial, at(4, 0), at(4, 0), at(22, 0))
            .unwrap();
        store.replace_allocations(site, id1, &rows).unwrap();
        let id2 = store
            .create_allocation_monitor(site, TriggerType::Initial, at(4, 0), at(4, 0), at(22, 0))
            .unwrap();
        store.replace_allocations(site, id2, &rows).unwrap();

        let live = store
            .allocations_for_routes(site, &[RouteId::from("A")])
            .unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].vehicle_id, VehicleId::new(1));

        // History accumulates, the live table is replaced.
        let history: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM t_route_allocated_history", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(history, 2);
    }

    #[test]
    fn replace_schedule_round_trips_dense_grid() {
        let store = SqliteStore::open_in_memory().unwrap();
        let schedule_id = store.create_scheduler(SiteId::new(10), "dynamic", "running").unwrap();
        let slots: Vec<ChargeScheduleRow> = (0..4)
            .map(|i| ChargeScheduleRow {
                schedule_id,
                vehicle_id: VehicleId::new(1),
                slot_start: at(4, 0) + Duration::minutes(30 * i),
                power_kw: if i == 1 { 11.0 } else { 0.0 },
                connector_id: Some("87".into()),
            })
            .collect();
        store.replace_schedule(schedule_id, &slots, &[]).unwrap();
        store.replace_schedule(schedule_id, &slots, &[]).unwrap();

        let rows = store.charge_schedule_rows(schedule_id).unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows.iter().filter(|r| r.power_kw > 0.0).count(), 1);

        store.update_scheduler_status(schedule_id, "completed").unwrap();
        let header = store.scheduler_row(schedule_id).unwrap().unwrap();
        assert_eq!(header.status, "completed");
    }

    #[test]
    fn horizons_and_series_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let site = SiteId::new(10);
        for i in 0..4 {
            let slot = at(4, 0) + Duration::minutes(30 * i);
            store.insert_forecast_point(site, slot, 5.0 * i as f64).unwrap();
            store.insert_price_point(slot, 0.10 + 0.01 * i as f64, i == 2).unwrap();
        }

        assert_eq!(store.forecast_max(site).unwrap(), Some(at(5, 30)));
        assert_eq!(store.price_max().unwrap(), Some(at(5, 30)));

        let forecast = store.forecast(site, at(4, 0), at(6, 0)).unwrap();
        assert_eq!(forecast.len(), 4);
        let price = store.price(at(4, 0), at(6, 0)).unwrap();
        assert_eq!(price.len(), 4);
        assert!(price[2].2);
    }

    #[test]
    fn module_params_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let document = serde_json::json!({"clients": []});
        store.insert_module_params("fleet_charge_planner", &document).unwrap();
        let loaded = store.module_params("fleet_charge_planner").unwrap().unwrap();
        assert_eq!(loaded, document);
        assert!(store.module_params("unknown").unwrap().is_none());
    }

    #[test]
    fn site_asc_missing_is_none() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.site_asc(SiteId::new(10)).unwrap(), None);
        store.insert_site(SiteId::new(10), Some(200.0)).unwrap();
        assert_eq!(store.site_asc(SiteId::new(10)).unwrap(), Some(200.0));
    }
}
