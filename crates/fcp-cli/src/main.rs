//! Command-line interface for the fleet charge planner.
//!
//! Three run variants share the same store and engine as the HTTP façade:
//!
//! ```text
//! fcp allocate --db fcp.db --site-id 10 --start-time "2026-02-16 04:30:00"
//! fcp schedule --db fcp.db --site-id 10 --route-source allocated
//! fcp unified  --db fcp.db --site-id 10 --mode integrated --no-persist
//! ```
//!
//! Exit codes: 0 success (and validation passed), 1 failure or validation
//! failed, 130 interrupted.

use std::process::ExitCode;

use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, Utc};
use clap::{Args, Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use fcp_algo::unified::OptimizationMode;
use fcp_core::{RunStatus, ScheduleId, SiteId, TriggerType, UnifiedWeights};
use fcp_engine::{
    run_allocation, run_scheduling, run_unified, AllocationRunArgs, CancelFlag, EngineError,
    RouteSource, SchedulingRunArgs, UnifiedRunArgs,
};
use fcp_store::SqliteStore;

const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "fcp", about = "Electric fleet allocation and charge planning", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Path to the planner database.
    #[arg(long, default_value = "fcp.db")]
    db: String,

    /// Planning instant (format: YYYY-MM-DD HH:MM:SS, default: now).
    #[arg(long)]
    start_time: Option<String>,

    /// Planning window length in hours.
    #[arg(long)]
    window_hours: Option<f64>,

    /// Run without persisting results.
    #[arg(long)]
    no_persist: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Allocate window routes to vehicles.
    Allocate {
        #[command(flatten)]
        common: CommonArgs,

        #[arg(long)]
        site_id: i64,

        /// What triggered this run.
        #[arg(long, default_value = "initial")]
        trigger_type: String,
    },
    /// Build a charge schedule for the fleet.
    Schedule {
        #[command(flatten)]
        common: CommonArgs,

        /// Site for a new schedule.
        #[arg(long, conflicts_with = "schedule_id")]
        site_id: Option<i64>,

        /// Existing schedule to re-run.
        #[arg(long)]
        schedule_id: Option<i64>,

        /// Vehicle-route mapping source.
        #[arg(long, default_value = "route_plan", value_parser = ["route_plan", "allocated"])]
        route_source: String,
    },
    /// Combined allocation + scheduling optimization.
    Unified {
        #[command(flatten)]
        common: CommonArgs,

        #[arg(long)]
        site_id: i64,

        /// Optimization mode.
        #[arg(
            long,
            default_value = "integrated",
            value_parser = [
                "allocation_only", "allocation", "scheduling_only",
                "scheduling", "integrated", "both",
            ]
        )]
        mode: String,

        #[arg(long, default_value = "initial")]
        trigger_type: String,

        /// Existing schedule to re-run (scheduling modes).
        #[arg(long)]
        schedule_id: Option<i64>,
    },
}

fn parse_start_time(value: Option<&str>) -> anyhow::Result<DateTime<Utc>> {
    match value {
        Some(raw) => {
            let parsed = NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M:%S")
                .with_context(|| {
                    format!("invalid start time {raw:?}; use YYYY-MM-DD HH:MM:SS")
                })?;
            Ok(parsed.and_utc())
        }
        None => Ok(Utc::now()),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    fcp_algo::init_solver();

    let cli = Cli::parse();
    match run(cli) {
        Ok(exit) => exit,
        Err(err) => {
            if err
                .downcast_ref::<EngineError>()
                .is_some_and(|e| matches!(e, EngineError::Interrupted))
            {
                error!("run interrupted");
                return ExitCode::from(EXIT_INTERRUPTED);
            }
            error!(%err, "run failed");
            eprintln!("ERROR: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Command::Allocate {
            common,
            site_id,
            trigger_type,
        } => {
            let store = open_store(&common.db)?;
            let args = AllocationRunArgs {
                site: SiteId::new(site_id),
                trigger: trigger_type.parse::<TriggerType>()?,
                at: parse_start_time(common.start_time.as_deref())?,
                window_hours: common.window_hours,
                persist: !common.no_persist,
                cancel: CancelFlag::new(),
            };
            let outcome = run_allocation(&store, &args)?;
            print_allocation_summary(&outcome);
            Ok(if outcome.status == RunStatus::Accepted {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Schedule {
            common,
            site_id,
            schedule_id,
            route_source,
        } => {
            if site_id.is_none() && schedule_id.is_none() {
                anyhow::bail!("either --site-id or --schedule-id is required");
            }
            let store = open_store(&common.db)?;
            let args = SchedulingRunArgs {
                site: site_id.map(SiteId::new),
                schedule_id: schedule_id.map(ScheduleId::new),
                at: parse_start_time(common.start_time.as_deref())?,
                route_source: route_source.parse::<RouteSource>()?,
                window_hours: common.window_hours,
                persist: !common.no_persist,
                cancel: CancelFlag::new(),
            };
            let outcome = run_scheduling(&store, &args)?;
            print_schedule_summary(&outcome);
            Ok(if outcome.validation.passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Unified {
            common,
            site_id,
            mode,
            trigger_type,
            schedule_id,
        } => {
            let store = open_store(&common.db)?;
            let args = UnifiedRunArgs {
                site: SiteId::new(site_id),
                mode: mode.parse::<OptimizationMode>()?,
                trigger: trigger_type.parse::<TriggerType>()?,
                at: parse_start_time(common.start_time.as_deref())?,
                schedule_id: schedule_id.map(ScheduleId::new),
                window_hours: common.window_hours,
                persist: !common.no_persist,
                weights: UnifiedWeights::default(),
                cancel: CancelFlag::new(),
            };
            let output = run_unified(&store, &args)?;

            println!("{:=<70}", "");
            println!("UNIFIED OPTIMIZATION COMPLETED");
            println!("{:=<70}", "");
            println!("Mode:             {}", output.unified.mode.as_str());
            println!("Status:           {}", output.unified.status.as_str());
            println!("Objective value:  {:.2}", output.unified.objective_value);
            println!(
                "Solve time:       {:.2}s",
                output.unified.solve_time_seconds
            );
            if let Some(allocation) = &output.allocation {
                print_allocation_summary(allocation);
            }
            if let Some(schedule) = &output.schedule {
                print_schedule_summary(schedule);
            }

            let allocation_ok = output
                .allocation
                .as_ref()
                .map(|a| a.status == RunStatus::Accepted)
                .unwrap_or(true);
            let schedule_ok = output
                .schedule
                .as_ref()
                .map(|s| s.validation.passed)
                .unwrap_or(true);
            Ok(if allocation_ok && schedule_ok {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

fn open_store(path: &str) -> anyhow::Result<SqliteStore> {
    SqliteStore::open(path).with_context(|| format!("failed to open store at {path}"))
}

fn print_allocation_summary(outcome: &fcp_core::AllocationOutcome) {
    println!("{:-<70}", "");
    println!("ALLOCATION  (id {})", outcome.allocation_id);
    println!("Status:             {}", outcome.status.code());
    println!("Total score:        {:.2}", outcome.total_score);
    println!("Routes in window:   {}", outcome.routes_in_window);
    println!("Routes allocated:   {}", outcome.routes_allocated);
    println!("Routes unallocated: {}", outcome.unallocated.len());
    println!("Routes overlapping: {}", outcome.routes_overlapping);
    for (vehicle_id, routes) in outcome.vehicle_sequences() {
        println!("  vehicle {vehicle_id}: {} route(s)", routes.len());
    }
}

fn print_schedule_summary(outcome: &fcp_core::ScheduleOutcome) {
    println!("{:-<70}", "");
    println!("CHARGE SCHEDULE  (id {})", outcome.schedule_id);
    println!("Window:             {} -> {}", outcome.grid.start, outcome.grid.end);
    println!("Actual hours:       {:.1}", outcome.actual_window_hours);
    println!("Vehicles scheduled: {}", outcome.vehicles_scheduled);
    println!("Routes considered:  {}", outcome.routes_considered);
    println!("Checkpoints:        {}", outcome.checkpoints_created);
    println!("Total energy:       {:.2} kWh", outcome.total_energy_kwh);
    println!("Total cost:         {:.2}", outcome.total_cost);
    println!("Solver status:      {}", outcome.status.as_str());
    println!(
        "Validation:         {}",
        if outcome.validation.passed { "passed" } else { "FAILED" }
    );
    for err in &outcome.validation.errors {
        println!("  ! {err}");
    }
    for vehicle in &outcome.vehicles {
        let marker = if vehicle.meets_requirements { " " } else { "!" };
        println!(
            "{marker} vehicle {:>4}: {:5.1} -> {:5.1} kWh | {:5.1} kWh in {} slots | routes: {}",
            vehicle.vehicle_id.value(),
            vehicle.initial_soc_kwh,
            vehicle.initial_soc_kwh + vehicle.energy_scheduled_kwh,
            vehicle.energy_scheduled_kwh,
            vehicle.slots.len(),
            vehicle.checkpoints.len(),
        );
        if !vehicle.meets_requirements {
            println!("    energy shortfall: {:.2} kWh", vehicle.shortfall_kwh);
        }
    }
}
