//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Documents served by the forecast, summary, and health REST resources."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use chrono::{DateTime, FixedOffset, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// UTC offset of the site clock used by `hourly_time` (IST, no DST).
pub const SITE_UTC_OFFSET_SECS: i32 = 5 * 3600 + 1800;

/// Start of the site-local hour containing `at`, in `hourly_time` terms.
pub fn site_hour(at: DateTime<Utc>) -> NaiveDateTime {
    let local = FixedOffset::east_opt(SITE_UTC_OFFSET_SECS)
        .map_or(at.naive_utc(), |offset| at.with_timezone(&offset).naive_local());
    local
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(local)
}

/// Hourly generation and weather forecast (`GET /api/v1/forecast?hours=N`).
///
/// Every series is index-aligned with `hourly_time`; call [`Forecast::validate`]
/// before relying on that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    /// Site-local hour stamps as sent by the server (no offset).
    pub hourly_time: Vec<String>,
    pub forecast_solar_kw: Vec<f64>,
    pub forecast_wind_kw: Vec<f64>,
    pub cloudcover: Vec<f64>,
    pub forecast_load_kw: Vec<f64>,
    /// Server-computed surplus over the next three hours.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forecast_surplus_kwh_3h: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_2m: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shortwave_radiation: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub windspeed_10m: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<ForecastLocation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastLocation {
    pub lat: f64,
    pub lon: f64,
    pub city: String,
}

/// A series whose length differs from `hourly_time`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("forecast series `{field}` has {actual} entries, expected {expected}")]
pub struct ShapeError {
    pub field: &'static str,
    pub expected: usize,
    pub actual: usize,
}

/// One hour of a forecast, borrowed from the aligned series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastPoint<'a> {
    pub time: &'a str,
    pub solar_kw: f64,
    pub wind_kw: f64,
    pub cloudcover_pct: f64,
    pub load_kw: f64,
}

impl ForecastPoint<'_> {
    pub fn generation_kw(&self) -> f64 {
        self.solar_kw + self.wind_kw
    }

    /// Positive surplus for the hour, zero when load exceeds generation.
    pub fn surplus_kw(&self) -> f64 {
        (self.generation_kw() - self.load_kw).max(0.0)
    }

    /// Parses the hour stamp; the server omits seconds.
    pub fn local_time(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(self.time, "%Y-%m-%dT%H:%M")
            .or_else(|_| NaiveDateTime::parse_from_str(self.time, "%Y-%m-%dT%H:%M:%S"))
            .ok()
    }
}

impl Forecast {
    pub fn len(&self) -> usize {
        self.hourly_time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hourly_time.is_empty()
    }

    pub fn validate(&self) -> Result<(), ShapeError> {
        let expected = self.hourly_time.len();
        let required = [
            ("forecast_solar_kw", Some(&self.forecast_solar_kw)),
            ("forecast_wind_kw", Some(&self.forecast_wind_kw)),
            ("cloudcover", Some(&self.cloudcover)),
            ("forecast_load_kw", Some(&self.forecast_load_kw)),
            ("temperature_2m", self.temperature_2m.as_ref()),
            ("shortwave_radiation", self.shortwave_radiation.as_ref()),
            ("windspeed_10m", self.windspeed_10m.as_ref()),
        ];
        for (field, series) in required {
            if let Some(series) = series {
                if series.len() != expected {
                    return Err(ShapeError {
                        field,
                        expected,
                        actual: series.len(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Hourly points in series order. Stops at the shortest series, so a
    /// misaligned document yields fewer points rather than panicking.
    pub fn points(&self) -> impl Iterator<Item = ForecastPoint<'_>> + '_ {
        self.hourly_time
            .iter()
            .zip(&self.forecast_solar_kw)
            .zip(&self.forecast_wind_kw)
            .zip(&self.cloudcover)
            .zip(&self.forecast_load_kw)
            .map(|((((time, solar), wind), cloud), load)| ForecastPoint {
                time: time.as_str(),
                solar_kw: *solar,
                wind_kw: *wind,
                cloudcover_pct: *cloud,
                load_kw: *load,
            })
    }
}

/// Lifetime totals held by the server (`GET /api/v1/summary`).
///
/// These cover every stored reading, unlike the client's windowed figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub total_co2_saved_kg: f64,
    pub total_cost_saved_inr: f64,
    pub avg_self_consumption_pct: f64,
    pub total_solar_kwh: f64,
    pub total_wind_kwh: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_load_kwh: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_grid_import_kwh: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_readings: Option<u64>,
}

impl SessionSummary {
    pub fn total_renewable_kwh(&self) -> f64 {
        self.total_solar_kwh + self.total_wind_kwh
    }
}

/// Liveness document (`GET /api/v1/health`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
    pub timestamp: DateTime<Utc>,
}

impl HealthStatus {
    pub fn is_ok(&self) -> bool {
        self.status.eq_ignore_ascii_case("ok")
    }
}
