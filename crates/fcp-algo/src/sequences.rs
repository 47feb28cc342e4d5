//! Feasible-sequence enumeration.
//!
//! For each vehicle, every singleton and every k-subset of window routes
//! (k up to the configured cap, members sorted by departure) is pushed
//! through the constraint set; the feasible ones become allocation
//! candidates. Enumeration is exhaustive on purpose: the constraints are
//! non-convex over sequences and the cap keeps k small, so an exact
//! feasibility map is affordable and makes the downstream set-partition
//! model exact.

use tracing::{debug, info};

use fcp_core::{Route, RouteId, Vehicle, VehicleId};

use crate::constraints::{ConstraintSet, EvalContext};

/// One feasible (vehicle, route-sequence, cost) triple.
#[derive(Debug, Clone)]
pub struct SequenceCandidate {
    pub vehicle_id: VehicleId,
    /// Routes in departure order.
    pub routes: Vec<Route>,
    pub cost: f64,
}

impl SequenceCandidate {
    pub fn route_ids(&self) -> impl Iterator<Item = &RouteId> {
        self.routes.iter().map(|r| &r.id)
    }

    pub fn contains_route(&self, route_id: &RouteId) -> bool {
        self.routes.iter().any(|r| &r.id == route_id)
    }
}

/// Enumerates all feasible sequences for the fleet.
///
/// `routes` are sorted by `plan_start` before subset generation, so every
/// emitted sequence is in departure order.
pub fn enumerate_sequences(
    vehicles: &[Vehicle],
    routes: &[Route],
    constraints: &ConstraintSet,
    max_routes_per_vehicle: usize,
    ctx: &EvalContext<'_>,
) -> Vec<SequenceCandidate> {
    let mut sorted_routes: Vec<Route> = routes.to_vec();
    sorted_routes.sort_by(|a, b| a.plan_start.cmp(&b.plan_start));

    let mut candidates = Vec::new();

    for vehicle in vehicles {
        let mut vehicle_feasible = 0usize;

        // Singletons first.
        for route in &sorted_routes {
            let sequence = std::slice::from_ref(route);
            let eval = constraints.evaluate(vehicle, sequence, ctx);
            if eval.feasible {
                candidates.push(SequenceCandidate {
                    vehicle_id: vehicle.id,
                    routes: vec![route.clone()],
                    cost: eval.total_cost,
                });
                vehicle_feasible += 1;
            }
        }

        // k-subsets for 2 <= k <= cap. Subsets of an already-sorted slice
        // are generated in index order, so sequences stay sorted.
        let max_len = max_routes_per_vehicle.min(sorted_routes.len());
        for k in 2..=max_len {
            for combo in Combinations::new(sorted_routes.len(), k) {
                let sequence: Vec<Route> =
                    combo.iter().map(|&i| sorted_routes[i].clone()).collect();
                let eval = constraints.evaluate(vehicle, &sequence, ctx);
                if eval.feasible {
                    candidates.push(SequenceCandidate {
                        vehicle_id: vehicle.id,
                        routes: sequence,
                        cost: eval.total_cost,
                    });
                    vehicle_feasible += 1;
                }
            }
        }

        debug!(
            vehicle = %vehicle.id,
            feasible = vehicle_feasible,
            "sequence enumeration for vehicle done"
        );
    }

    info!(
        vehicles = vehicles.len(),
        routes = routes.len(),
        candidates = candidates.len(),
        "feasible sequence enumeration complete"
    );

    candidates
}

/// Iterative k-combination generator over `0..n`, lexicographic order.
struct Combinations {
    n: usize,
    k: usize,
    indices: Vec<usize>,
    done: bool,
}

impl Combinations {
    fn new(n: usize, k: usize) -> Self {
        Self {
            n,
            k,
            indices: (0..k).collect(),
            done: k > n || k == 0,
        }
    }
}

impl Iterator for Combinations {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let current = self.indices.clone();

        // Advance: find the rightmost index that can still move.
        let mut i = self.k;
        loop {
            if i == 0 {
                self.done = true;
                break;
            }
            i -= 1;
            if self.indices[i] != i + self.n - self.k {
                self.indices[i] += 1;
                for j in i + 1..self.k {
                    self.indices[j] = self.indices[j - 1] + 1;
                }
                break;
            }
        }

        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::test_support::{route, vehicle, CtxFixture};
    use std::collections::HashMap;

    fn constraint_set() -> ConstraintSet {
        ConstraintSet::from_configs(&HashMap::new())
    }

    #[test]
    fn combinations_cover_all_subsets() {
        let combos: Vec<_> = Combinations::new(4, 2).collect();
        assert_eq!(combos.len(), 6);
        assert_eq!(combos.first().unwrap(), &vec![0, 1]);
        assert_eq!(combos.last().unwrap(), &vec![2, 3]);
        assert_eq!(Combinations::new(3, 3).count(), 1);
        assert_eq!(Combinations::new(2, 3).count(), 0);
    }

    #[test]
    fn enumerator_emits_singletons_and_pairs() {
        // Two well-separated routes: both singletons and the pair pass.
        let fixture = CtxFixture::new(
            vec![route("A", 6, 0, 9, 40.0), route("B", 11, 0, 13, 30.0)],
            vec![vehicle(1, 100.0, 90.0)],
        );
        let candidates = enumerate_sequences(
            &fixture.vehicles,
            &fixture.routes,
            &constraint_set(),
            5,
            &fixture.ctx(),
        );
        assert_eq!(candidates.len(), 3);
        let pair = candidates.iter().find(|c| c.routes.len() == 2).unwrap();
        assert_eq!(pair.routes[0].id.as_str(), "A");
        assert_eq!(pair.routes[1].id.as_str(), "B");
    }

    #[test]
    fn overlapping_pair_is_not_emitted() {
        let fixture = CtxFixture::new(
            vec![route("A", 6, 0, 9, 40.0), route("B", 8, 0, 11, 30.0)],
            vec![vehicle(1, 100.0, 90.0)],
        );
        let candidates = enumerate_sequences(
            &fixture.vehicles,
            &fixture.routes,
            &constraint_set(),
            5,
            &fixture.ctx(),
        );
        // Only the two singletons survive.
        assert_eq!(candidates.len(), 2);
        assert!(candidates.iter().all(|c| c.routes.len() == 1));
    }

    #[test]
    fn cap_limits_sequence_length() {
        let fixture = CtxFixture::new(
            vec![
                route("A", 5, 0, 6, 10.0),
                route("B", 8, 0, 9, 10.0),
                route("C", 11, 0, 12, 10.0),
            ],
            vec![vehicle(1, 100.0, 90.0)],
        );
        let candidates = enumerate_sequences(
            &fixture.vehicles,
            &fixture.routes,
            &constraint_set(),
            2,
            &fixture.ctx(),
        );
        assert!(candidates.iter().all(|c| c.routes.len() <= 2));
    }

    #[test]
    fn emitted_sequences_satisfy_hard_constraints() {
        let fixture = CtxFixture::new(
            vec![
                route("A", 6, 0, 9, 40.0),
                route("B", 9, 30, 12, 30.0),
                route("C", 13, 0, 15, 30.0),
            ],
            vec![vehicle(1, 100.0, 90.0)],
        );
        let set = constraint_set();
        let ctx = fixture.ctx();
        let candidates =
            enumerate_sequences(&fixture.vehicles, &fixture.routes, &set, 5, &ctx);
        for candidate in &candidates {
            let eval = set.evaluate(&fixture.vehicles[0], &candidate.routes, &ctx);
            assert!(eval.feasible, "emitted sequence must re-evaluate feasible");
        }
        // B follows A after 30 minutes: the strict turnaround (45) must have
        // rejected the A,B pair.
        assert!(!candidates.iter().any(|c| {
            c.routes.len() == 2
                && c.routes[0].id.as_str() == "A"
                && c.routes[1].id.as_str() == "B"
        }));
    }
}
