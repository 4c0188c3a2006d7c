//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Windowed aggregates and point-in-time reading transforms."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Two kinds of totals exist and must not be mixed. Window figures are summed
//! over whatever the [`HistoryWindow`] currently holds and stop counting
//! anything evicted from it. Lifetime figures come from the server summary
//! and cover the whole session. [`SessionAggregate`] carries both side by side.

use std::time::Duration;

use chrono::{DateTime, Utc};
use gz_msg::{site_hour, Forecast, Reading, SessionSummary};
use serde::Serialize;

use crate::history::HistoryWindow;

/// Power below this magnitude counts as no flow.
pub const FLOW_DEADBAND_KW: f64 = 0.05;

/// Server look-ahead used for the surplus figure.
pub const SURPLUS_LOOKAHEAD_HOURS: usize = 3;

/// Sum of `co2_saved_kg` over the readings currently in the window.
///
/// Recomputed on every call. Once the window has evicted readings this is
/// smaller than the session total.
pub fn total_co2_saved(window: &HistoryWindow<Reading>) -> f64 {
    window.iter().map(|reading| reading.co2_saved_kg).sum()
}

/// Aggregates over the current window contents.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowAggregate {
    pub readings: usize,
    pub co2_saved_kg: f64,
    /// Generation integrated over the nominal sample interval.
    pub renewable_kwh: f64,
    pub cost_saved_inr: f64,
    pub avg_self_consumption_pct: Option<f64>,
    pub peak_load_kw: Option<f64>,
    /// Set once the window has dropped readings; totals then cover only the
    /// retained tail.
    pub undercounts: bool,
}

impl WindowAggregate {
    pub fn compute(window: &HistoryWindow<Reading>, sample_interval: Duration) -> Self {
        let hours_per_sample = sample_interval.as_secs_f64() / 3600.0;
        let readings = window.len();

        let mut renewable_kwh = 0.0;
        let mut cost_saved_inr = 0.0;
        let mut self_consumption = 0.0;
        let mut peak_load_kw: Option<f64> = None;
        for reading in window {
            renewable_kwh += reading.generation_kw() * hours_per_sample;
            cost_saved_inr += reading.cost_saved_inr.unwrap_or(0.0);
            self_consumption += reading.self_consumption_pct;
            peak_load_kw = Some(peak_load_kw.map_or(reading.load_kw, |peak| peak.max(reading.load_kw)));
        }

        Self {
            readings,
            co2_saved_kg: total_co2_saved(window),
            renewable_kwh,
            cost_saved_inr,
            avg_self_consumption_pct: (readings > 0).then(|| self_consumption / readings as f64),
            peak_load_kw,
            undercounts: window.has_evicted(),
        }
    }
}

/// Window figures paired with the server's lifetime summary, when one has
/// been fetched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionAggregate {
    pub window: WindowAggregate,
    pub lifetime: Option<SessionSummary>,
}

impl SessionAggregate {
    pub fn new(window: WindowAggregate, lifetime: Option<SessionSummary>) -> Self {
        Self { window, lifetime }
    }

    pub fn window_co2_saved_kg(&self) -> f64 {
        self.window.co2_saved_kg
    }

    pub fn lifetime_co2_saved_kg(&self) -> Option<f64> {
        self.lifetime.as_ref().map(|summary| summary.total_co2_saved_kg)
    }
}

/// Battery direction derived from signed power (positive charges).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatteryMode {
    Charging,
    Discharging,
    Idle,
}

impl BatteryMode {
    pub fn of(reading: &Reading) -> Self {
        match reading.battery_power_kw {
            kw if kw > FLOW_DEADBAND_KW => BatteryMode::Charging,
            kw if kw < -FLOW_DEADBAND_KW => BatteryMode::Discharging,
            _ => BatteryMode::Idle,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatteryMode::Charging => "charging",
            BatteryMode::Discharging => "discharging",
            BatteryMode::Idle => "idle",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GridFlow {
    Importing,
    Exporting,
    Balanced,
}

impl GridFlow {
    /// Import wins when both directions are reported.
    pub fn of(reading: &Reading) -> Self {
        if reading.grid_import_kw > FLOW_DEADBAND_KW {
            GridFlow::Importing
        } else if reading.grid_export_kw > FLOW_DEADBAND_KW {
            GridFlow::Exporting
        } else {
            GridFlow::Balanced
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GridFlow::Importing => "importing",
            GridFlow::Exporting => "exporting",
            GridFlow::Balanced => "balanced",
        }
    }
}

/// Generation as a share of load, capped at 100. Zero load yields zero.
pub fn renewable_share_pct(reading: &Reading) -> f64 {
    if reading.load_kw <= 0.0 {
        return 0.0;
    }
    (reading.generation_kw() / reading.load_kw * 100.0).clamp(0.0, 100.0)
}

/// `value` as a percentage of `capacity`, clamped to 0..=100.
pub fn percent_of_capacity(value: f64, capacity: f64) -> f64 {
    if capacity <= 0.0 || !value.is_finite() {
        return 0.0;
    }
    (value / capacity * 100.0).clamp(0.0, 100.0)
}

/// Expected surplus energy over the `hours` forecast points starting at the
/// site hour containing `now`.
///
/// A server-provided three-hour figure is preferred for the default
/// look-ahead; otherwise the positive hourly surplus is summed locally.
/// Points whose stamp does not parse never start the look-ahead.
pub fn forecast_surplus_kwh(forecast: &Forecast, hours: usize, now: DateTime<Utc>) -> f64 {
    if hours == SURPLUS_LOOKAHEAD_HOURS {
        if let Some(server) = forecast.forecast_surplus_kwh_3h {
            return server;
        }
    }
    let current = site_hour(now);
    forecast
        .points()
        .skip_while(|point| point.local_time().map_or(true, |time| time < current))
        .take(hours)
        .map(|point| point.surplus_kw())
        .sum()
}
