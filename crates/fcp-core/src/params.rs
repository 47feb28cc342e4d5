//! Typed site-parameter parsing.
//!
//! The configuration source hands every parameter over as a `{name, value}`
//! pair of strings. The type of a value is inferred from the parameter
//! name's suffix (and a few value patterns), reconstituting a tagged
//! [`ParamValue`] so the rest of the system never touches raw strings.

use std::collections::HashMap;

use chrono::NaiveTime;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::{SiteId, VehicleId};

/// Name suffixes that force numeric parsing.
const NUMERIC_SUFFIXES: &[&str] = &[
    "_minutes",
    "_hours",
    "_seconds",
    "_kwh",
    "_penalty",
    "_weight",
    "_bonus",
    "_threshold",
    "_count",
    "_margin",
];

/// A parsed parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Json(Value),
    TimeOfDay(NaiveTime),
    Text(String),
}

impl ParamValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(i) => Some(*i as f64),
            ParamValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(i) => Some(*i),
            ParamValue::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Parses one string parameter into its typed form.
///
/// Rules, in order: none-markers, boolean by suffix or value, JSON array or
/// object by leading bracket, numeric by name suffix, time-of-day for
/// `_period` keys containing a colon, otherwise plain text.
pub fn parse_parameter(key: &str, value: &str) -> ParamValue {
    if matches!(value, "NONE" | "None" | "none" | "NO_VALUE" | "") {
        return ParamValue::None;
    }

    let lowered = value.to_ascii_lowercase();
    if key.ends_with("_enabled")
        || key.ends_with("_flag")
        || matches!(lowered.as_str(), "true" | "false" | "yes" | "no")
    {
        return ParamValue::Bool(matches!(lowered.as_str(), "true" | "yes" | "1"));
    }

    let trimmed = value.trim();
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        return match serde_json::from_str::<Value>(trimmed) {
            Ok(parsed) => ParamValue::Json(parsed),
            Err(err) => {
                error!(key, %err, "failed to parse JSON parameter, keeping raw text");
                ParamValue::Text(value.to_string())
            }
        };
    }

    if NUMERIC_SUFFIXES.iter().any(|s| key.ends_with(s)) {
        let parsed = if value.contains('.') {
            value.parse::<f64>().map(ParamValue::Float)
        } else {
            value.parse::<i64>().map(ParamValue::Int).or_else(|_| {
                // Integer-suffixed keys occasionally carry scientific notation.
                value.parse::<f64>().map(ParamValue::Float)
            })
        };
        return match parsed {
            Ok(v) => v,
            Err(err) => {
                error!(key, value, %err, "failed to parse numeric parameter");
                ParamValue::None
            }
        };
    }

    if key.ends_with("_period") && value.contains(':') {
        return match NaiveTime::parse_from_str(value, "%H:%M:%S") {
            Ok(t) => ParamValue::TimeOfDay(t),
            Err(err) => {
                error!(key, value, %err, "failed to parse time parameter");
                ParamValue::None
            }
        };
    }

    ParamValue::Text(value.to_string())
}

/// Typed parameters for one site plus the site's enabled-vehicle list.
#[derive(Debug, Clone, Default)]
pub struct SiteParams {
    pub values: HashMap<String, ParamValue>,
    /// When non-empty, restricts planning to the listed vehicles.
    pub enabled_vehicles: Vec<VehicleId>,
}

impl SiteParams {
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key)
    }

    pub fn f64_or(&self, key: &str, default: f64) -> f64 {
        self.get(key).and_then(ParamValue::as_f64).unwrap_or(default)
    }

    pub fn i64_or(&self, key: &str, default: i64) -> i64 {
        self.get(key).and_then(ParamValue::as_i64).unwrap_or(default)
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(ParamValue::as_bool).unwrap_or(default)
    }

    pub fn vehicle_enabled(&self, id: VehicleId) -> bool {
        self.enabled_vehicles.is_empty() || self.enabled_vehicles.contains(&id)
    }
}

/// Configuration for a single named constraint.
#[derive(Debug, Clone)]
pub struct ConstraintConfig {
    pub enabled: bool,
    pub penalty: f64,
    pub params: HashMap<String, ParamValue>,
}

impl ConstraintConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            penalty: 0.0,
            params: HashMap::new(),
        }
    }

    pub fn param_f64(&self, key: &str, default: f64) -> f64 {
        self.params
            .get(key)
            .and_then(ParamValue::as_f64)
            .unwrap_or(default)
    }

    pub fn param_i64(&self, key: &str, default: i64) -> i64 {
        self.params
            .get(key)
            .and_then(ParamValue::as_i64)
            .unwrap_or(default)
    }

    pub fn param_bool(&self, key: &str, default: bool) -> bool {
        self.params
            .get(key)
            .and_then(ParamValue::as_bool)
            .unwrap_or(default)
    }

    pub fn param_text(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| match v {
            ParamValue::Text(s) => Some(s.as_str()),
            _ => None,
        })
    }
}

/// The constraints the planner knows about, in evaluation order.
pub const CONSTRAINT_NAMES: &[&str] = &[
    "energy_feasibility",
    "turnaround_time_strict",
    "turnaround_time_preferred",
    "shift_hours_strict",
    "route_overlap",
    "charger_preference",
];

fn default_penalty(name: &str) -> f64 {
    match name {
        "energy_feasibility" => -20.0,
        "turnaround_time_strict" => -22.0,
        "turnaround_time_preferred" => -2.0,
        "shift_hours_strict" => -20.0,
        "route_overlap" => -20.0,
        "charger_preference" => 3.0,
        _ => -20.0,
    }
}

fn default_enabled(name: &str) -> bool {
    // Charger preference opts in; everything else is on by default.
    name != "charger_preference"
}

/// Extracts one constraint's configuration from the site parameters.
///
/// `constraint_<name>_enabled` gates the constraint; the remaining
/// `constraint_<name>_*` keys become its parameter map, with
/// `constraint_<name>_penalty` overriding the built-in penalty.
pub fn constraint_config(site_id: SiteId, name: &str, params: &SiteParams) -> ConstraintConfig {
    let enabled_key = format!("constraint_{name}_enabled");
    let enabled = params.bool_or(&enabled_key, default_enabled(name));

    if !enabled {
        info!(%site_id, constraint = name, "constraint disabled");
        return ConstraintConfig::disabled();
    }

    let prefix = format!("constraint_{name}_");
    let mut constraint_params = HashMap::new();
    for (key, value) in &params.values {
        if key.starts_with(&prefix) && key != &enabled_key {
            constraint_params.insert(key[prefix.len()..].to_string(), value.clone());
        }
    }

    let penalty = constraint_params
        .get("penalty")
        .and_then(ParamValue::as_f64)
        .unwrap_or_else(|| default_penalty(name));

    ConstraintConfig {
        enabled: true,
        penalty,
        params: constraint_params,
    }
}

/// All known constraint configurations for a site.
pub fn all_constraint_configs(
    site_id: SiteId,
    params: &SiteParams,
) -> Vec<(&'static str, ConstraintConfig)> {
    CONSTRAINT_NAMES
        .iter()
        .map(|name| (*name, constraint_config(site_id, name, params)))
        .collect()
}

/// Parses the hierarchical configuration document
/// (client → site → parameters/vehicles) into per-site typed parameters.
///
/// Malformed sites are logged and skipped; a malformed document yields an
/// empty map rather than failing the run.
pub fn parse_config_document(document: &Value) -> HashMap<SiteId, SiteParams> {
    let mut site_configs = HashMap::new();

    let Some(clients) = document.get("clients").and_then(Value::as_array) else {
        warn!("configuration document has no clients array");
        return site_configs;
    };

    for client in clients {
        let Some(sites) = client.get("sites").and_then(Value::as_array) else {
            continue;
        };
        for site in sites {
            let Some(site_id) = site.get("site_id").and_then(Value::as_i64) else {
                warn!("site entry without site_id skipped");
                continue;
            };
            let site_id = SiteId::new(site_id);

            let mut values = HashMap::new();
            if let Some(parameters) = site.get("parameters").and_then(Value::as_array) {
                for param in parameters {
                    let name = param.get("parameter_name").and_then(Value::as_str);
                    let value = param.get("parameter_value").and_then(Value::as_str);
                    if let (Some(name), Some(value)) = (name, value) {
                        values.insert(name.to_string(), parse_parameter(name, value));
                    }
                }
            }

            let mut enabled_vehicles = Vec::new();
            if let Some(vehicles) = site.get("vehicles").and_then(Value::as_array) {
                for vehicle in vehicles {
                    let id = vehicle.get("vehicle_id").and_then(Value::as_i64);
                    let enabled = vehicle
                        .get("enabled")
                        .and_then(Value::as_str)
                        .map(|v| matches!(parse_parameter("enabled", v), ParamValue::Bool(true)))
                        .unwrap_or(true);
                    if let (Some(id), true) = (id, enabled) {
                        enabled_vehicles.push(VehicleId::new(id));
                    }
                }
            }

            site_configs.insert(
                site_id,
                SiteParams {
                    values,
                    enabled_vehicles,
                },
            );
        }
    }

    site_configs
}
