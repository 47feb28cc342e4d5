//! Run configuration records and system defaults.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::params::SiteParams;

pub const DEFAULT_ALLOCATION_WINDOW_HOURS: f64 = 18.0;
pub const DEFAULT_MAX_ROUTES_PER_VEHICLE: usize = 5;
pub const DEFAULT_TURNAROUND_TIME_MINUTES: i64 = 45;

pub const DEFAULT_PLANNING_WINDOW_HOURS: f64 = 24.0;
pub const DEFAULT_ROUTE_ENERGY_SAFETY_FACTOR: f64 = 1.15;
pub const DEFAULT_MIN_DEPARTURE_BUFFER_MINUTES: i64 = 60;
pub const DEFAULT_BACK_TO_BACK_THRESHOLD_MINUTES: i64 = 90;
pub const DEFAULT_TARGET_SOC_PERCENT: f64 = 75.0;
pub const DEFAULT_MIN_SOC_PERCENT: f64 = 75.0;
pub const DEFAULT_POWER_FACTOR: f64 = 0.85;
pub const DEFAULT_SITE_USAGE_FACTOR: f64 = 0.90;
pub const DEFAULT_TRIAD_PENALTY_FACTOR: f64 = 100.0;
pub const DEFAULT_SYNTHETIC_TIME_PRICE_FACTOR: f64 = 0.01;
pub const DEFAULT_FLEET_EFFICIENCY_KWH_MILE: f64 = 0.35;
pub const MINIMUM_PLANNING_WINDOW_HOURS: f64 = 4.0;

pub const DEFAULT_ALLOCATION_TIME_LIMIT_SECONDS: u64 = 30;
pub const DEFAULT_SCHEDULING_TIME_LIMIT_SECONDS: u64 = 300;
pub const DEFAULT_INTEGRATED_TIME_LIMIT_SECONDS: u64 = 330;

/// Settings for an allocation run, resolved from site parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationSettings {
    pub window_hours: f64,
    pub max_routes_per_vehicle: usize,
    pub turnaround_minutes: i64,
    pub min_acceptable_score: f64,
    pub time_limit_seconds: u64,
}

impl Default for AllocationSettings {
    fn default() -> Self {
        Self {
            window_hours: DEFAULT_ALLOCATION_WINDOW_HOURS,
            max_routes_per_vehicle: DEFAULT_MAX_ROUTES_PER_VEHICLE,
            turnaround_minutes: DEFAULT_TURNAROUND_TIME_MINUTES,
            min_acceptable_score: crate::allocation::DEFAULT_MIN_ACCEPTABLE_SCORE,
            time_limit_seconds: DEFAULT_ALLOCATION_TIME_LIMIT_SECONDS,
        }
    }
}

impl AllocationSettings {
    pub fn from_site_params(params: &SiteParams) -> Self {
        let defaults = Self::default();
        Self {
            window_hours: params.f64_or("allocation_window_hours", defaults.window_hours),
            max_routes_per_vehicle: params
                .i64_or(
                    "max_routes_per_vehicle_in_window",
                    defaults.max_routes_per_vehicle as i64,
                )
                .max(1) as usize,
            turnaround_minutes: params
                .i64_or("turnaround_time_minutes", defaults.turnaround_minutes),
            min_acceptable_score: defaults.min_acceptable_score,
            time_limit_seconds: defaults.time_limit_seconds,
        }
    }
}

/// Configuration for a charge-scheduling run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub planning_window_hours: f64,
    pub route_energy_safety_factor: f64,
    pub min_departure_buffer_minutes: i64,
    pub back_to_back_threshold_minutes: i64,
    pub target_soc_percent: f64,
    pub min_soc_percent: f64,
    pub agreed_site_capacity_kva: Option<f64>,
    pub power_factor: f64,
    pub site_usage_factor: f64,
    pub time_limit_seconds: u64,
    pub triad_penalty_factor: f64,
    pub synthetic_time_price_factor: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            planning_window_hours: DEFAULT_PLANNING_WINDOW_HOURS,
            route_energy_safety_factor: DEFAULT_ROUTE_ENERGY_SAFETY_FACTOR,
            min_departure_buffer_minutes: DEFAULT_MIN_DEPARTURE_BUFFER_MINUTES,
            back_to_back_threshold_minutes: DEFAULT_BACK_TO_BACK_THRESHOLD_MINUTES,
            target_soc_percent: DEFAULT_TARGET_SOC_PERCENT,
            min_soc_percent: DEFAULT_MIN_SOC_PERCENT,
            agreed_site_capacity_kva: None,
            power_factor: DEFAULT_POWER_FACTOR,
            site_usage_factor: DEFAULT_SITE_USAGE_FACTOR,
            time_limit_seconds: DEFAULT_SCHEDULING_TIME_LIMIT_SECONDS,
            triad_penalty_factor: DEFAULT_TRIAD_PENALTY_FACTOR,
            synthetic_time_price_factor: DEFAULT_SYNTHETIC_TIME_PRICE_FACTOR,
        }
    }
}

impl SchedulerConfig {
    /// Usable import capacity in kW derived from the agreed site capacity.
    pub fn site_capacity_kw(&self) -> f64 {
        match self.agreed_site_capacity_kva {
            Some(kva) => kva * self.power_factor * self.site_usage_factor,
            None => 0.0,
        }
    }

    /// Validates parameter ranges; all violations are collected.
    pub fn validate(&self) -> CoreResult<()> {
        let mut errors = Vec::new();

        if !(MINIMUM_PLANNING_WINDOW_HOURS..=24.0).contains(&self.planning_window_hours) {
            errors.push(format!(
                "planning_window_hours must be between 4.0 and 24.0, got {}",
                self.planning_window_hours
            ));
        }
        if !(1.0..=2.0).contains(&self.route_energy_safety_factor) {
            errors.push(format!(
                "route_energy_safety_factor must be between 1.0 and 2.0, got {}",
                self.route_energy_safety_factor
            ));
        }
        if !(15..=180).contains(&self.min_departure_buffer_minutes) {
            errors.push(format!(
                "min_departure_buffer_minutes must be between 15 and 180, got {}",
                self.min_departure_buffer_minutes
            ));
        }
        if !(30..=240).contains(&self.back_to_back_threshold_minutes) {
            errors.push(format!(
                "back_to_back_threshold_minutes must be between 30 and 240, got {}",
                self.back_to_back_threshold_minutes
            ));
        }
        if !(50.0..=100.0).contains(&self.target_soc_percent) {
            errors.push(format!(
                "target_soc_percent must be between 50.0 and 100.0, got {}",
                self.target_soc_percent
            ));
        }
        if !(0.0..=100.0).contains(&self.min_soc_percent) {
            errors.push(format!(
                "min_soc_percent must be between 0.0 and 100.0, got {}",
                self.min_soc_percent
            ));
        }
        if self.min_soc_percent > self.target_soc_percent {
            errors.push(format!(
                "min_soc_percent ({}) must be <= target_soc_percent ({})",
                self.min_soc_percent, self.target_soc_percent
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Config(errors.join("; ")))
        }
    }
}

/// Weighted-sum objective weights for the unified optimizer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UnifiedWeights {
    /// α: weight of the allocation term.
    pub allocation_score_weight: f64,
    /// β: weight of the scheduling cost term.
    pub scheduling_cost_weight: f64,
    /// Priority weight making route coverage dominate sequence scores.
    pub route_count_weight: f64,
    /// λ: penalty per kWh of end-of-window target shortfall.
    pub soc_shortfall_penalty: f64,
}

impl Default for UnifiedWeights {
    fn default() -> Self {
        Self {
            allocation_score_weight: 1.0,
            scheduling_cost_weight: 1.0,
            route_count_weight: 1e2,
            soc_shortfall_penalty: 0.2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(SchedulerConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_collects_all_violations() {
        let config = SchedulerConfig {
            planning_window_hours: 2.0,
            min_departure_buffer_minutes: 5,
            min_soc_percent: 90.0,
            target_soc_percent: 80.0,
            ..SchedulerConfig::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("planning_window_hours"));
        assert!(err.contains("min_departure_buffer_minutes"));
        assert!(err.contains("min_soc_percent"));
    }

    #[test]
    fn site_capacity_applies_derating_factors() {
        let config = SchedulerConfig {
            agreed_site_capacity_kva: Some(200.0),
            ..SchedulerConfig::default()
        };
        assert!((config.site_capacity_kw() - 200.0 * 0.85 * 0.90).abs() < 1e-9);
        assert_eq!(SchedulerConfig::default().site_capacity_kw(), 0.0);
    }

    #[test]
    fn allocation_settings_read_site_params() {
        use crate::params::{parse_parameter, SiteParams};
        let mut params = SiteParams::default();
        params.values.insert(
            "allocation_window_hours".into(),
            parse_parameter("allocation_window_hours", "12"),
        );
        params.values.insert(
            "max_routes_per_vehicle_in_window".into(),
            parse_parameter("max_routes_per_vehicle_in_window", "3"),
        );
        let settings = AllocationSettings::from_site_params(&params);
        assert!((settings.window_hours - 12.0).abs() < 1e-9);
        assert_eq!(settings.max_routes_per_vehicle, 3);
        assert_eq!(settings.turnaround_minutes, 45);
    }
}
