//! Planned delivery routes.
//!
//! Routes are inputs to the planner: each has a fixed plan start/end and a
//! planned mileage. The planner never edits routes; it only decides which
//! vehicle runs them and how the vehicle is charged beforehand.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::{RouteId, SiteId, VehicleId};

/// Route lifecycle status as stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteStatus {
    /// Newly planned, not yet allocated ('N').
    New,
    /// Allocated to a vehicle ('A').
    Allocated,
    /// Any other status code; carried through untouched.
    Other(char),
}

impl RouteStatus {
    pub fn from_code(code: &str) -> Self {
        match code {
            "N" => RouteStatus::New,
            "A" => RouteStatus::Allocated,
            other => RouteStatus::Other(other.chars().next().unwrap_or('?')),
        }
    }

    pub fn code(self) -> String {
        match self {
            RouteStatus::New => "N".to_string(),
            RouteStatus::Allocated => "A".to_string(),
            RouteStatus::Other(c) => c.to_string(),
        }
    }
}

/// A planned delivery trip with fixed timing and mileage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub id: RouteId,
    pub site_id: SiteId,
    pub alias: String,
    pub status: RouteStatus,
    /// Inclusive departure instant (UTC).
    pub plan_start: DateTime<Utc>,
    /// Exclusive end instant (UTC).
    pub plan_end: DateTime<Utc>,
    pub plan_mileage: f64,
    pub n_orders: i64,
    /// Preassigned or allocated vehicle, when known.
    pub vehicle_id: Option<VehicleId>,
    /// Pre-computed route energy, when the store carries one.
    pub energy_kwh: Option<f64>,
}

impl Route {
    /// Checks the structural invariants: `plan_start < plan_end`, mileage ≥ 0.
    pub fn validate(&self) -> CoreResult<()> {
        if self.plan_start >= self.plan_end {
            return Err(CoreError::Validation(format!(
                "route {}: plan_start {} is not before plan_end {}",
                self.id, self.plan_start, self.plan_end
            )));
        }
        if self.plan_mileage < 0.0 {
            return Err(CoreError::Validation(format!(
                "route {}: negative plan_mileage {}",
                self.id, self.plan_mileage
            )));
        }
        Ok(())
    }

    pub fn duration_hours(&self) -> f64 {
        (self.plan_end - self.plan_start).num_seconds() as f64 / 3600.0
    }

    pub fn duration_minutes(&self) -> f64 {
        (self.plan_end - self.plan_start).num_seconds() as f64 / 60.0
    }

    /// True when the two routes cannot be run back to back by one vehicle,
    /// even allowing `turnaround_minutes` between them in either order.
    pub fn overlaps_with(&self, other: &Route, turnaround_minutes: i64) -> bool {
        let turnaround = Duration::minutes(turnaround_minutes);
        if self.plan_end + turnaround <= other.plan_start {
            return false;
        }
        if other.plan_end + turnaround <= self.plan_start {
            return false;
        }
        true
    }

    /// True when this route can directly precede `next` with the given
    /// minimum turnaround.
    pub fn can_precede(&self, next: &Route, turnaround_minutes: i64) -> bool {
        self.plan_end + Duration::minutes(turnaround_minutes) <= next.plan_start
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::TimeZone;

    /// Builds a route on 2026-02-16 with hour-resolution start/end.
    pub fn route(id: &str, start_hour: u32, end_hour: u32, mileage: f64) -> Route {
        let day = |h| Utc.with_ymd_and_hms(2026, 2, 16, h, 0, 0).unwrap();
        Route {
            id: RouteId::from(id),
            site_id: SiteId::new(10),
            alias: id.to_string(),
            status: RouteStatus::New,
            plan_start: day(start_hour),
            plan_end: day(end_hour),
            plan_mileage: mileage,
            n_orders: 0,
            vehicle_id: None,
            energy_kwh: None,
        }
    }
}
