//! Charger preference: put vehicles on high-value chargers onto the routes
//! that leave first.
//!
//! Routes inside the configured time-of-day window are ranked globally by
//! departure time; vehicles are ranked by the cost of their currently bound
//! charger (highest first, unbound vehicles use the `DISC` entry). A
//! vehicle earns its charger cost whenever one of its targeted routes sits
//! at the global position equal to the vehicle's rank, so the r-th leaving
//! route attracts the r-th most expensive charger.

use std::collections::HashMap;

use fcp_core::params::ConstraintConfig;
use fcp_core::{Route, Vehicle, VehicleId};
use tracing::warn;

use super::{EvalContext, SequenceConstraint};

/// Map key used for vehicles with no charger binding.
const DISCONNECTED_KEY: &str = "DISC";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApplyTo {
    First,
    All,
    Longest,
}

pub struct ChargerPreference {
    cost_map: HashMap<String, f64>,
    time_window_start: u32,
    time_window_end: u32,
    apply_to: ApplyTo,
}

impl ChargerPreference {
    pub fn new(config: &ConstraintConfig) -> Self {
        // The map param arrives either as a parsed JSON object (flat
        // `{"87": "3"}` syntax) or as raw text (grouped `[87,86]:3` syntax,
        // which is not valid JSON).
        let parsed = match config.params.get("map") {
            Some(fcp_core::ParamValue::Json(value)) => json_cost_map(value),
            Some(fcp_core::ParamValue::Text(raw)) => parse_cost_map(raw.trim()),
            _ => Ok(HashMap::new()),
        };
        let cost_map = match parsed {
            Ok(map) => map,
            Err(err) => {
                warn!(%err, "invalid charger preference map, using empty map");
                HashMap::new()
            }
        };

        let apply_to = match config.param_text("apply_to_position") {
            Some("all") => ApplyTo::All,
            Some("longest") => ApplyTo::Longest,
            Some("first") | None => ApplyTo::First,
            Some(other) => {
                warn!(value = other, "invalid apply_to_position, using 'first'");
                ApplyTo::First
            }
        };

        Self {
            cost_map,
            time_window_start: config.param_i64("time_window_start", 0).clamp(0, 24) as u32,
            time_window_end: config.param_i64("time_window_end", 24).clamp(0, 24) as u32,
            apply_to,
        }
    }

    fn in_time_window(&self, hour: u32) -> bool {
        if self.time_window_start <= self.time_window_end {
            hour >= self.time_window_start && hour < self.time_window_end
        } else {
            // Window wraps midnight, e.g. 22:00 to 06:00.
            hour >= self.time_window_start || hour < self.time_window_end
        }
    }

    fn charger_cost(&self, ctx: &EvalContext<'_>, vehicle_id: VehicleId) -> f64 {
        let key = match ctx.vehicle_chargers.get(&vehicle_id) {
            Some(Some(charger_id)) => charger_id.to_string(),
            _ => DISCONNECTED_KEY.to_string(),
        };
        self.cost_map.get(&key).copied().unwrap_or(0.0)
    }

    fn target_routes<'s>(&self, sequence: &'s [Route]) -> Vec<&'s Route> {
        match self.apply_to {
            ApplyTo::First => sequence.first().into_iter().collect(),
            ApplyTo::All => sequence.iter().collect(),
            ApplyTo::Longest => sequence
                .iter()
                .max_by_key(|r| (r.plan_end - r.plan_start).num_seconds())
                .into_iter()
                .collect(),
        }
    }
}

impl SequenceConstraint for ChargerPreference {
    fn name(&self) -> &'static str {
        "charger_preference"
    }

    fn hard(&self) -> bool {
        false
    }

    fn evaluate(&self, vehicle: &Vehicle, sequence: &[Route], ctx: &EvalContext<'_>) -> f64 {
        if sequence.is_empty() || self.cost_map.is_empty() {
            return 0.0;
        }
        if ctx.all_routes.is_empty() || ctx.all_vehicles.is_empty() {
            return 0.0;
        }

        let vehicle_cost = self.charger_cost(ctx, vehicle.id);
        if vehicle_cost == 0.0 {
            return 0.0;
        }

        // Global departure order of routes inside the time window.
        let mut in_window: Vec<&Route> = ctx
            .all_routes
            .iter()
            .filter(|r| self.in_time_window(hour_of(r)))
            .collect();
        if in_window.is_empty() {
            return 0.0;
        }
        in_window.sort_by_key(|r| r.plan_start);
        let positions: HashMap<&str, usize> = in_window
            .iter()
            .enumerate()
            .map(|(idx, r)| (r.id.as_str(), idx))
            .collect();

        // Vehicles ranked by charger cost, highest first; sort is stable so
        // ties keep the input order.
        let mut ranked: Vec<(VehicleId, f64)> = ctx
            .all_vehicles
            .iter()
            .map(|v| (v.id, self.charger_cost(ctx, v.id)))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let Some(vehicle_rank) = ranked.iter().position(|(id, _)| *id == vehicle.id) else {
            return 0.0;
        };

        let mut total = 0.0;
        for route in self.target_routes(sequence) {
            if !self.in_time_window(hour_of(route)) {
                continue;
            }
            if positions.get(route.id.as_str()) == Some(&vehicle_rank) {
                total += vehicle_cost;
            }
        }
        total
    }
}

fn hour_of(route: &Route) -> u32 {
    use chrono::Timelike;
    route.plan_start.hour()
}

/// Parses the cost map. Two syntaxes are accepted:
/// a flat JSON object `{"87": "3", "DISC": "-3"}`, or the grouped form
/// `[87,86]:3,[85,83]:0,[DISC]:2`.
fn parse_cost_map(raw: &str) -> Result<HashMap<String, f64>, String> {
    if raw.is_empty() || raw == "{}" {
        return Ok(HashMap::new());
    }

    if raw.starts_with('[') {
        return parse_grouped_map(raw);
    }

    let parsed: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| format!("not valid JSON: {e}"))?;
    json_cost_map(&parsed)
}

fn json_cost_map(value: &serde_json::Value) -> Result<HashMap<String, f64>, String> {
    let object = value
        .as_object()
        .ok_or_else(|| "expected a JSON object".to_string())?;

    let mut map = HashMap::new();
    for (key, value) in object {
        let cost = match value {
            serde_json::Value::Number(n) => n.as_f64().ok_or("non-finite cost")?,
            serde_json::Value::String(s) => {
                s.parse::<f64>().map_err(|e| format!("bad cost {s:?}: {e}"))?
            }
            other => return Err(format!("unsupported cost value: {other}")),
        };
        map.insert(key.clone(), cost);
    }
    Ok(map)
}

/// `[87,86]:3,[DISC]:2` — a list of charger ids per cost.
fn parse_grouped_map(raw: &str) -> Result<HashMap<String, f64>, String> {
    let mut map = HashMap::new();
    let mut rest = raw;

    while let Some(open) = rest.find('[') {
        let Some(close_rel) = rest[open..].find(']') else {
            return Err("unclosed bracket".to_string());
        };
        let close = open + close_rel;
        let keys = &rest[open + 1..close];

        let after = &rest[close + 1..];
        let Some(colon) = after.find(':') else {
            return Err("missing cost after group".to_string());
        };
        let value_str: String = after[colon + 1..]
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '-' || *c == '.')
            .collect();
        if value_str.is_empty() {
            return Err("empty cost after group".to_string());
        }
        let cost = value_str
            .parse::<f64>()
            .map_err(|e| format!("bad cost {value_str:?}: {e}"))?;

        for part in keys.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            if part.eq_ignore_ascii_case(DISCONNECTED_KEY) {
                map.insert(DISCONNECTED_KEY.to_string(), cost);
            } else {
                // Normalize numeric ids; anything else kept verbatim.
                match part.parse::<i64>() {
                    Ok(id) => map.insert(id.to_string(), cost),
                    Err(_) => map.insert(part.to_string(), cost),
                };
            }
        }

        rest = &after[colon + 1 + value_str.len()..];
    }

    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{route, vehicle, CtxFixture};
    use super::*;
    use fcp_core::params::{parse_parameter, ConstraintConfig};
    use fcp_core::ChargerId;

    fn preference(map: &str, extra: &[(&str, &str)]) -> ChargerPreference {
        let mut config = ConstraintConfig::disabled();
        config.enabled = true;
        config.penalty = 3.0;
        config
            .params
            .insert("map".to_string(), parse_parameter("map", map));
        for (key, value) in extra {
            config
                .params
                .insert((*key).to_string(), parse_parameter(key, value));
        }
        ChargerPreference::new(&config)
    }

    #[test]
    fn grouped_map_syntax() {
        let map = parse_cost_map("[87,86]:3,[85,83]:0,[DISC]:2").unwrap();
        assert_eq!(map.get("87"), Some(&3.0));
        assert_eq!(map.get("86"), Some(&3.0));
        assert_eq!(map.get("85"), Some(&0.0));
        assert_eq!(map.get("DISC"), Some(&2.0));
    }

    #[test]
    fn flat_json_map_syntax() {
        let map = parse_cost_map(r#"{"87": "3", "DISC": "-3"}"#).unwrap();
        assert_eq!(map.get("87"), Some(&3.0));
        assert_eq!(map.get("DISC"), Some(&-3.0));
    }

    #[test]
    fn invalid_map_becomes_empty() {
        // Map is the raw string param here, so broken input degrades to an
        // empty map and the constraint is a no-op.
        let constraint = preference("[87:oops", &[]);
        assert!(constraint.cost_map.is_empty());
    }

    #[test]
    fn rank_matching_earns_cost() {
        // Vehicle 1 on charger 87 (cost 3) is rank 0; vehicle 2 is
        // disconnected (cost 0), rank 1. Route A leaves first.
        let routes = vec![route("A", 6, 0, 9, 40.0), route("B", 8, 0, 11, 40.0)];
        let mut fixture = CtxFixture::new(
            routes.clone(),
            vec![vehicle(1, 100.0, 80.0), vehicle(2, 100.0, 80.0)],
        );
        fixture
            .chargers
            .insert(fixture.vehicles[0].id, Some(ChargerId::new(87)));
        fixture.chargers.insert(fixture.vehicles[1].id, None);

        let constraint = preference("[87]:3", &[]);
        let ctx = fixture.ctx();

        // Vehicle 1 serving the first-leaving route: bonus applies.
        let seq_first = vec![routes[0].clone()];
        assert_eq!(
            constraint.evaluate(&fixture.vehicles[0], &seq_first, &ctx),
            3.0
        );
        // Vehicle 1 serving the second-leaving route: position mismatch.
        let seq_second = vec![routes[1].clone()];
        assert_eq!(
            constraint.evaluate(&fixture.vehicles[0], &seq_second, &ctx),
            0.0
        );
        // Vehicle 2 has zero cost: always neutral.
        assert_eq!(
            constraint.evaluate(&fixture.vehicles[1], &seq_first, &ctx),
            0.0
        );
    }

    #[test]
    fn time_window_filters_routes() {
        let routes = vec![route("A", 6, 0, 9, 40.0), route("B", 14, 0, 17, 40.0)];
        let mut fixture = CtxFixture::new(routes.clone(), vec![vehicle(1, 100.0, 80.0)]);
        fixture
            .chargers
            .insert(fixture.vehicles[0].id, Some(ChargerId::new(87)));

        // Window 12:00-24:00: only route B is ranked, at position 0.
        let constraint = preference(
            "[87]:3",
            &[("time_window_start", "12"), ("time_window_end", "24")],
        );
        let ctx = fixture.ctx();
        assert_eq!(
            constraint.evaluate(&fixture.vehicles[0], &[routes[1].clone()], &ctx),
            3.0
        );
        assert_eq!(
            constraint.evaluate(&fixture.vehicles[0], &[routes[0].clone()], &ctx),
            0.0
        );
    }

    #[test]
    fn wrapping_window_covers_midnight() {
        let constraint = preference(
            "[87]:3",
            &[("time_window_start", "22"), ("time_window_end", "6")],
        );
        assert!(constraint.in_time_window(23));
        assert!(constraint.in_time_window(3));
        assert!(!constraint.in_time_window(12));
    }

    #[test]
    fn longest_position_picks_longest_route() {
        let routes = vec![route("A", 6, 0, 9, 40.0), route("B", 10, 0, 16, 40.0)];
        let mut fixture = CtxFixture::new(routes.clone(), vec![vehicle(1, 100.0, 80.0)]);
        fixture
            .chargers
            .insert(fixture.vehicles[0].id, Some(ChargerId::new(87)));

        // Rank 0 vehicle; longest route B sits at global position 1, so no
        // bonus even though the sequence contains both routes.
        let constraint = preference("[87]:3", &[("apply_to_position", "longest")]);
        let ctx = fixture.ctx();
        assert_eq!(constraint.evaluate(&fixture.vehicles[0], &routes, &ctx), 0.0);
    }
}
