//! Request and response bodies for the HTTP façade.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use fcp_core::{AllocationOutcome, ScheduleOutcome, UnifiedWeights};

/// Body for `POST /optimize/unified`. Everything except `site_id` is
/// optional with server-side defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct OptimizeRequest {
    pub site_id: i64,
    #[serde(default = "default_trigger")]
    pub trigger_type: String,
    pub schedule_id: Option<i64>,
    /// Simulated "now" for the run; server time when omitted.
    pub test_start_time: Option<String>,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_true")]
    pub persist_to_database: bool,
    #[serde(default = "default_window_hours")]
    pub window_hours: f64,

    // Optimization weight overrides.
    pub route_count_weight: Option<f64>,
    pub allocation_score_weight: Option<f64>,
    pub scheduling_cost_weight: Option<f64>,
    pub target_soc_shortfall_penalty: Option<f64>,
}

fn default_trigger() -> String {
    "initial".to_string()
}

fn default_mode() -> String {
    "integrated".to_string()
}

fn default_true() -> bool {
    true
}

fn default_window_hours() -> f64 {
    24.0
}

impl OptimizeRequest {
    pub fn weights(&self) -> UnifiedWeights {
        let defaults = UnifiedWeights::default();
        UnifiedWeights {
            route_count_weight: self.route_count_weight.unwrap_or(defaults.route_count_weight),
            allocation_score_weight: self
                .allocation_score_weight
                .unwrap_or(defaults.allocation_score_weight),
            scheduling_cost_weight: self
                .scheduling_cost_weight
                .unwrap_or(defaults.scheduling_cost_weight),
            soc_shortfall_penalty: self
                .target_soc_shortfall_penalty
                .unwrap_or(defaults.soc_shortfall_penalty),
        }
    }
}

/// Parses `test_start_time`: ISO 8601 or `YYYY-MM-DD HH:MM:SS` (UTC).
pub fn parse_start_time(value: &str) -> Result<DateTime<Utc>, String> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&value.replace('Z', "+00:00")) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = value.parse::<NaiveDateTime>() {
        return Ok(parsed.and_utc());
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(parsed.and_utc());
    }
    Err(format!(
        "invalid timestamp {value:?}; use ISO 8601 (e.g. 2026-02-16T04:30:00) \
         or 'YYYY-MM-DD HH:MM:SS'"
    ))
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Summary of the unified solve, independent of persistence.
#[derive(Debug, Serialize)]
pub struct UnifiedResultBody {
    pub mode: String,
    pub status: String,
    pub solve_time_seconds: f64,
    pub allocation_score: f64,
    pub routes_allocated: usize,
    pub routes_total: usize,
    pub total_charging_cost: f64,
    pub total_energy_kwh: f64,
    pub objective_value: f64,
}

#[derive(Debug, Serialize)]
pub struct AllocationBody {
    pub allocation_id: i64,
    pub status: String,
    pub total_score: f64,
    pub routes_in_window: usize,
    pub routes_allocated: usize,
    pub acceptable: bool,
}

impl AllocationBody {
    pub fn from_outcome(outcome: &AllocationOutcome) -> Self {
        Self {
            allocation_id: outcome.allocation_id.value(),
            status: outcome.status.code().to_string(),
            total_score: outcome.total_score,
            routes_in_window: outcome.routes_in_window,
            routes_allocated: outcome.routes_allocated,
            acceptable: outcome.status == fcp_core::RunStatus::Accepted,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ScheduleBody {
    pub schedule_id: i64,
    pub optimization_status: String,
    pub total_cost: f64,
    pub total_energy_kwh: f64,
    pub vehicles_scheduled: usize,
    pub validation_passed: bool,
}

impl ScheduleBody {
    pub fn from_outcome(outcome: &ScheduleOutcome) -> Self {
        Self {
            schedule_id: outcome.schedule_id.value(),
            optimization_status: outcome.status.as_str().to_string(),
            total_cost: outcome.total_cost,
            total_energy_kwh: outcome.total_energy_kwh,
            vehicles_scheduled: outcome.vehicles_scheduled,
            validation_passed: outcome.validation.passed,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OptimizeResponse {
    pub success: bool,
    pub unified_result: UnifiedResultBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocation: Option<AllocationBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleBody>,
    pub allocation_id: Option<i64>,
    pub schedule_id: Option<i64>,
}

/// Query for `GET /report/schedule`.
#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub schedule_id: i64,
    pub timestamp: Option<String>,
}
