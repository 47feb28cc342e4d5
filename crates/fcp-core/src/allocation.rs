//! Route-to-vehicle allocation results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AllocationId, RouteId, SiteId, VehicleId};

/// Minimum acceptable total score for an allocation run.
pub const DEFAULT_MIN_ACCEPTABLE_SCORE: f64 = -4.0;

/// Run status codes shared by the allocation monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Created, run in progress ('N').
    New,
    /// Pending persistence ('P').
    Pending,
    /// Accepted and persisted ('A').
    Accepted,
    /// Failed or rejected ('F').
    Failed,
}

impl RunStatus {
    pub fn code(self) -> &'static str {
        match self {
            RunStatus::New => "N",
            RunStatus::Pending => "P",
            RunStatus::Accepted => "A",
            RunStatus::Failed => "F",
        }
    }
}

/// A single route assigned to a vehicle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteAllocation {
    pub route_id: RouteId,
    pub vehicle_id: VehicleId,
    /// Estimated arrival back at the depot; the route's planned end.
    pub estimated_arrival: DateTime<Utc>,
    pub estimated_arrival_soc_pct: f64,
    pub cost: f64,
}

/// Fleet-wide allocation result for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationOutcome {
    pub allocation_id: AllocationId,
    pub site_id: SiteId,
    pub run_at: DateTime<Utc>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub allocations: Vec<RouteAllocation>,
    pub unallocated: Vec<RouteId>,
    pub total_score: f64,
    pub routes_in_window: usize,
    pub routes_allocated: usize,
    pub routes_overlapping: usize,
    pub status: RunStatus,
}

impl AllocationOutcome {
    pub fn empty(
        allocation_id: AllocationId,
        site_id: SiteId,
        run_at: DateTime<Utc>,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Self {
        Self {
            allocation_id,
            site_id,
            run_at,
            window_start,
            window_end,
            allocations: Vec::new(),
            unallocated: Vec::new(),
            total_score: 0.0,
            routes_in_window: 0,
            routes_allocated: 0,
            routes_overlapping: 0,
            status: RunStatus::New,
        }
    }

    pub fn push_allocation(&mut self, allocation: RouteAllocation) {
        self.total_score += allocation.cost;
        self.allocations.push(allocation);
        self.routes_allocated += 1;
    }

    pub fn mark_unallocated(&mut self, route_id: RouteId) {
        self.unallocated.push(route_id);
    }

    /// Quality gate: runs scoring below `min_score` are rejected and not
    /// persisted.
    pub fn is_acceptable(&self, min_score: f64) -> bool {
        self.total_score >= min_score
    }

    /// Routes grouped per vehicle, preserving insertion order.
    pub fn vehicle_sequences(&self) -> Vec<(VehicleId, Vec<RouteId>)> {
        let mut order: Vec<VehicleId> = Vec::new();
        let mut grouped: std::collections::HashMap<VehicleId, Vec<RouteId>> =
            std::collections::HashMap::new();
        for alloc in &self.allocations {
            if !grouped.contains_key(&alloc.vehicle_id) {
                order.push(alloc.vehicle_id);
            }
            grouped
                .entry(alloc.vehicle_id)
                .or_default()
                .push(alloc.route_id.clone());
        }
        order
            .into_iter()
            .map(|v| {
                let routes = grouped.remove(&v).unwrap_or_default();
                (v, routes)
            })
            .collect()
    }
}
