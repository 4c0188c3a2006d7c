//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Readings and advisory recommendations carried by the live stream."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One telemetry snapshot of the microgrid.
///
/// Power figures are kilowatts. `battery_power_kw` is positive while charging
/// and negative while discharging. Grid import and export are never both
/// non-zero in well-formed data, but nothing here relies on that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Sample instant, always UTC.
    pub timestamp: DateTime<Utc>,
    pub solar_kw: f64,
    pub wind_kw: f64,
    pub load_kw: f64,
    /// Battery state of charge, 0..=100.
    pub battery_soc_pct: f64,
    pub battery_power_kw: f64,
    pub grid_import_kw: f64,
    pub grid_export_kw: f64,
    /// Share of load served by local generation, 0..=100.
    pub self_consumption_pct: f64,
    /// CO2 avoided (kg) in this sample; sum over readings for a total.
    pub co2_saved_kg: f64,
    /// Server-side generation total; `solar + wind` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_generation_kw: Option<f64>,
    /// Cost saving (INR) avoided in this sample.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_saved_inr: Option<f64>,
    /// Name of the dispatch strategy the controller is running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_strategy: Option<String>,
}

impl Reading {
    /// Total local generation in kW.
    pub fn generation_kw(&self) -> f64 {
        self.total_generation_kw
            .unwrap_or(self.solar_kw + self.wind_kw)
    }

    /// Generation minus load; positive means a surplus.
    pub fn net_balance_kw(&self) -> f64 {
        self.generation_kw() - self.load_kw
    }
}

/// Advisory action kinds emitted by the energy controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendationAction {
    Charge,
    Discharge,
    Curtail,
    ShiftLoad,
    Import,
    Optimal,
}

impl RecommendationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationAction::Charge => "CHARGE",
            RecommendationAction::Discharge => "DISCHARGE",
            RecommendationAction::Curtail => "CURTAIL",
            RecommendationAction::ShiftLoad => "SHIFT_LOAD",
            RecommendationAction::Import => "IMPORT",
            RecommendationAction::Optimal => "OPTIMAL",
        }
    }
}

impl fmt::Display for RecommendationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Urgency of a recommendation. Ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Medium => "MEDIUM",
            Priority::High => "HIGH",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single advisory item. Recommendations are only meaningful as part of the
/// batch they arrived with; the batch is replaced wholesale on every frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: RecommendationAction,
    pub priority: Priority,
    pub message: String,
    pub reason: String,
}
