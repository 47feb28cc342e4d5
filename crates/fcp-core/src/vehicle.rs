//! Vehicles and per-vehicle charge state.
//!
//! A [`Vehicle`] row is static fleet data owned by external operational
//! systems; the planner only reads it. Runtime state (SOC, current route,
//! return ETA) is merged in from the vehicle state monitor *as of* the
//! planning instant and never read implicitly from "now".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ChargerId, RouteId, SiteId, VehicleId};

/// Sentinel SOC value meaning "exclude this vehicle from scheduling".
pub const EXCLUDED_SOC_SENTINEL: f64 = -111.0;

/// Vehicle operational status from the state monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum VehicleStatus {
    #[default]
    Idle,
    OnRoute,
    Charging,
    Vor,
}

impl VehicleStatus {
    /// Parses the store's status strings; anything unrecognized is Idle.
    pub fn from_label(label: &str) -> Self {
        match label {
            "On-Route" => VehicleStatus::OnRoute,
            "Charging" => VehicleStatus::Charging,
            "VOR" => VehicleStatus::Vor,
            _ => VehicleStatus::Idle,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            VehicleStatus::Idle => "Idle",
            VehicleStatus::OnRoute => "On-Route",
            VehicleStatus::Charging => "Charging",
            VehicleStatus::Vor => "VOR",
        }
    }
}

/// A delivery vehicle with its battery and charging characteristics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: VehicleId,
    pub site_id: SiteId,
    pub active: bool,
    /// Vehicle out of rotation: excluded from allocation and scheduling.
    pub vor: bool,
    pub charge_power_ac_kw: f64,
    pub charge_power_dc_kw: f64,
    pub battery_kwh: f64,
    pub efficiency_kwh_per_mile: Option<f64>,
    pub telematic_label: Option<String>,

    // Runtime state merged from the vehicle state monitor.
    pub status: VehicleStatus,
    pub current_route_id: Option<RouteId>,
    pub estimated_soc_pct: Option<f64>,
    pub return_eta: Option<DateTime<Utc>>,
    pub return_soc_pct: Option<f64>,

    /// Earliest instant the vehicle is free for a new route (return ETA when
    /// on route, the planning instant otherwise).
    pub available_from: Option<DateTime<Utc>>,
    pub available_energy_kwh: Option<f64>,

    /// Charger the vehicle is currently bound to, if any.
    pub charger_id: Option<ChargerId>,
}

impl Vehicle {
    pub fn is_available_for_allocation(&self) -> bool {
        self.active && !self.vor
    }

    /// Energy on board in kWh, preferring the live SOC estimate, then the
    /// projected return SOC, then a full battery.
    pub fn available_energy(&self) -> f64 {
        if let Some(soc) = self.estimated_soc_pct {
            (soc / 100.0) * self.battery_kwh
        } else if let Some(soc) = self.return_soc_pct {
            (soc / 100.0) * self.battery_kwh
        } else {
            self.battery_kwh
        }
    }

    /// Energy required to drive `mileage` miles with this vehicle's own
    /// efficiency (falls back to `default_efficiency`).
    pub fn energy_required(&self, mileage: f64, default_efficiency: f64) -> f64 {
        mileage * self.efficiency_kwh_per_mile.unwrap_or(default_efficiency)
    }

    /// Charge power available to this vehicle, optionally capped by the
    /// bound charger's maximum output.
    pub fn charge_power(&self, use_dc: bool, charger_cap_kw: Option<f64>) -> f64 {
        let rate = if use_dc {
            self.charge_power_dc_kw
        } else {
            self.charge_power_ac_kw
        };
        match charger_cap_kw {
            Some(cap) if cap > 0.0 => rate.min(cap),
            _ => rate,
        }
    }
}

/// A depot charger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Charger {
    pub id: ChargerId,
    pub site_id: SiteId,
    pub max_power_kw: Option<f64>,
    pub dc: bool,
}

/// Charging-relevant vehicle state at the planning instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleChargeState {
    pub vehicle_id: VehicleId,
    pub soc_pct: f64,
    pub soc_kwh: f64,
    pub battery_kwh: f64,
    pub ac_rate_kw: f64,
    pub dc_rate_kw: f64,
    pub efficiency_kwh_per_mile: Option<f64>,
    pub status: VehicleStatus,
    pub return_eta: Option<DateTime<Utc>>,
    pub charger_id: Option<ChargerId>,
    pub charger_is_dc: bool,
}

impl VehicleChargeState {
    /// Builds a state record from a vehicle and an SOC percentage, clamping
    /// the stored energy into `[0, battery]`.
    pub fn from_vehicle(vehicle: &Vehicle, soc_pct: f64) -> Self {
        let soc_kwh = ((soc_pct / 100.0) * vehicle.battery_kwh).clamp(0.0, vehicle.battery_kwh);
        Self {
            vehicle_id: vehicle.id,
            soc_pct,
            soc_kwh,
            battery_kwh: vehicle.battery_kwh,
            ac_rate_kw: vehicle.charge_power_ac_kw,
            dc_rate_kw: vehicle.charge_power_dc_kw,
            efficiency_kwh_per_mile: vehicle.efficiency_kwh_per_mile,
            status: vehicle.status,
            return_eta: vehicle.return_eta,
            charger_id: vehicle.charger_id,
            charger_is_dc: false,
        }
    }

    /// Vehicles reporting the sentinel SOC are dropped from scheduling.
    pub fn is_excluded(&self) -> bool {
        self.soc_pct == EXCLUDED_SOC_SENTINEL
    }

    pub fn headroom_kwh(&self) -> f64 {
        (self.battery_kwh - self.soc_kwh).max(0.0)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn vehicle(id: i64, battery_kwh: f64, soc_pct: f64) -> Vehicle {
        Vehicle {
            id: VehicleId::new(id),
            site_id: SiteId::new(10),
            active: true,
            vor: false,
            charge_power_ac_kw: 11.0,
            charge_power_dc_kw: 50.0,
            battery_kwh,
            efficiency_kwh_per_mile: Some(0.35),
            telematic_label: None,
            status: VehicleStatus::Idle,
            current_route_id: None,
            estimated_soc_pct: Some(soc_pct),
            return_eta: None,
            return_soc_pct: None,
            available_from: None,
            available_energy_kwh: None,
            charger_id: None,
        }
    }
}
