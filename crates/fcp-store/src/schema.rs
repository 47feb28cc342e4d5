//! SQLite schema for the planner's store.
//!
//! Table and column names follow the operational database the planner
//! integrates with. Timestamps are stored as RFC 3339 UTC text, which
//! keeps lexicographic and chronological order identical.

/// Idempotent DDL batch executed on open.
pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS t_vehicle (
    vehicle_id           INTEGER PRIMARY KEY,
    site_id              INTEGER NOT NULL,
    active               BOOLEAN NOT NULL DEFAULT 1,
    vor                  BOOLEAN NOT NULL DEFAULT 0,
    charge_power_ac      REAL,
    charge_power_dc      REAL,
    battery_capacity     REAL,
    efficiency_kwh_mile  REAL
);

CREATE TABLE IF NOT EXISTS t_vehicle_telematics (
    vehicle_id      INTEGER NOT NULL,
    telematic_id    INTEGER NOT NULL,
    telematic_label TEXT,
    PRIMARY KEY (vehicle_id, telematic_id)
);

CREATE TABLE IF NOT EXISTS t_route_plan (
    route_id               TEXT PRIMARY KEY,
    site_id                INTEGER NOT NULL,
    vehicle_id             INTEGER,
    route_status           TEXT NOT NULL DEFAULT 'N',
    route_alias            TEXT,
    plan_start_date_time   TEXT NOT NULL,
    plan_end_date_time     TEXT NOT NULL,
    plan_mileage           REAL NOT NULL DEFAULT 0,
    n_orders               INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_route_plan_site_start
    ON t_route_plan(site_id, plan_start_date_time);

CREATE TABLE IF NOT EXISTS t_vsm (
    vsm_id        INTEGER PRIMARY KEY AUTOINCREMENT,
    vehicle_id    INTEGER NOT NULL,
    date_time     TEXT NOT NULL,
    status        TEXT,
    route_id      TEXT,
    estimated_soc REAL,
    return_eta    TEXT,
    return_soc    REAL
);
CREATE INDEX IF NOT EXISTS idx_vsm_vehicle_time ON t_vsm(vehicle_id, date_time DESC);

CREATE TABLE IF NOT EXISTS t_vehicle_charge (
    charge_id       INTEGER PRIMARY KEY AUTOINCREMENT,
    vehicle_id      INTEGER NOT NULL,
    charger_id      INTEGER NOT NULL,
    start_date_time TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_vehicle_charge_vehicle
    ON t_vehicle_charge(vehicle_id, start_date_time DESC);

CREATE TABLE IF NOT EXISTS t_charger (
    charger_id INTEGER PRIMARY KEY,
    site_id    INTEGER NOT NULL,
    max_power  REAL,
    dc_flag    BOOLEAN NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS t_site (
    site_id INTEGER PRIMARY KEY,
    asc_kva REAL
);

CREATE TABLE IF NOT EXISTS t_site_energy_forecast (
    site_id                INTEGER NOT NULL,
    forecasted_date_time   TEXT NOT NULL,
    forecasted_consumption REAL NOT NULL,
    PRIMARY KEY (site_id, forecasted_date_time)
);

CREATE TABLE IF NOT EXISTS t_electricity_price (
    date_time               TEXT PRIMARY KEY,
    electricity_price_fixed REAL NOT NULL,
    triad                   BOOLEAN NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS t_allocation_monitor (
    allocation_id             INTEGER PRIMARY KEY AUTOINCREMENT,
    site_id                   INTEGER NOT NULL,
    status                    TEXT NOT NULL,
    trigger_type              TEXT NOT NULL,
    run_datetime              TEXT NOT NULL,
    allocation_window_start   TEXT NOT NULL,
    allocation_window_end     TEXT NOT NULL,
    score                     REAL,
    routes_in_window          INTEGER,
    routes_allocated          INTEGER,
    routes_overlapping_count  INTEGER
);

CREATE TABLE IF NOT EXISTS t_route_allocated (
    allocation_id         INTEGER NOT NULL,
    route_id              TEXT NOT NULL,
    site_id               INTEGER NOT NULL,
    vehicle_id_allocated  INTEGER NOT NULL,
    status                TEXT NOT NULL,
    estimated_arrival     TEXT NOT NULL,
    estimated_arrival_soc REAL NOT NULL,
    PRIMARY KEY (allocation_id, route_id)
);
CREATE INDEX IF NOT EXISTS idx_route_allocated_site ON t_route_allocated(site_id);

CREATE TABLE IF NOT EXISTS t_route_allocated_history (
    history_id            INTEGER PRIMARY KEY AUTOINCREMENT,
    allocation_id         INTEGER NOT NULL,
    route_id              TEXT NOT NULL,
    site_id               INTEGER NOT NULL,
    vehicle_id_allocated  INTEGER NOT NULL,
    status                TEXT NOT NULL,
    estimated_arrival     TEXT NOT NULL,
    estimated_arrival_soc REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS t_scheduler (
    schedule_id       INTEGER PRIMARY KEY AUTOINCREMENT,
    site_id           INTEGER NOT NULL,
    scheduler_type    TEXT NOT NULL,
    status            TEXT NOT NULL,
    created_datetime  TEXT NOT NULL,
    modified_datetime TEXT
);

CREATE TABLE IF NOT EXISTS t_charge_schedule (
    schedule_id            INTEGER NOT NULL,
    vehicle_id             INTEGER NOT NULL,
    charge_start_date_time TEXT NOT NULL,
    charge_power           REAL NOT NULL,
    connector_id           TEXT,
    created_date_time      TEXT,
    PRIMARY KEY (schedule_id, vehicle_id, charge_start_date_time)
);

CREATE TABLE IF NOT EXISTS t_schedule_route_checkpoints (
    checkpoint_id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    schedule_id                    INTEGER NOT NULL,
    vehicle_id                     INTEGER NOT NULL,
    route_id                       TEXT NOT NULL,
    checkpoint_datetime_utc        TEXT NOT NULL,
    required_cumulative_energy_kwh REAL NOT NULL,
    route_energy_buffer_kwh        REAL NOT NULL,
    efficiency_used_kwh_mile       REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_checkpoints_schedule
    ON t_schedule_route_checkpoints(schedule_id);

CREATE TABLE IF NOT EXISTS t_module_params (
    application_name TEXT PRIMARY KEY,
    params_json      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS t_error_log (
    error_id       INTEGER PRIMARY KEY AUTOINCREMENT,
    error_datetime TEXT NOT NULL,
    module_no      TEXT NOT NULL,
    error_message  TEXT NOT NULL
);
";
