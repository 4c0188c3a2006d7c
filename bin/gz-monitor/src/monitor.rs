//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Stream event handling and dashboard assembly for the live monitor."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use gz_common::AppConfig;
use gz_core::aggregate::SURPLUS_LOOKAHEAD_HOURS;
use gz_core::{
    forecast_surplus_kwh, renewable_share_pct, BatteryMode, GridFlow, LiveState,
    RecommendationView,
};
use gz_metrics::MonitorMetrics;
use gz_msg::{Forecast, RecommendationAction, SessionSummary};
use gz_net::{ConnectionState, FetchError, Resource, StreamEvent};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Metric label for a fetch result.
pub fn fetch_outcome<T>(result: &Result<T, FetchError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(err) => err.kind(),
    }
}

/// One rendered view of the monitor: the latest reading and everything
/// derived from it, next to the independently fetched resources.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardLine {
    pub reading_at: DateTime<Utc>,
    pub connection: ConnectionState,
    pub generation_kw: f64,
    pub load_kw: f64,
    pub battery_soc_pct: f64,
    pub battery_mode: BatteryMode,
    pub grid_flow: GridFlow,
    pub renewable_share_pct: f64,
    pub window_readings: usize,
    pub window_co2_saved_kg: f64,
    pub window_undercounts: bool,
    /// `None` until the summary resource has answered once.
    pub lifetime_co2_saved_kg: Option<f64>,
    pub summary_stale: bool,
    pub recommendations: &'static str,
    /// The batch shown came with an earlier frame than `reading_at`.
    pub recommendations_stale: bool,
    pub recommendation_count: usize,
    pub top_action: Option<RecommendationAction>,
    pub forecast_surplus_kwh: Option<f64>,
    pub forecast_error: Option<String>,
}

pub struct Monitor {
    live: LiveState,
    metrics: Option<MonitorMetrics>,
    connection: ConnectionState,
    connect_attempts: u64,
}

impl Monitor {
    pub fn new(config: &AppConfig, metrics: Option<MonitorMetrics>) -> Self {
        Self {
            live: LiveState::from_config(&config.history, &config.recommendations),
            metrics,
            connection: ConnectionState::Disconnected,
            connect_attempts: 0,
        }
    }

    pub fn live(&self) -> &LiveState {
        &self.live
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    /// Apply one stream event. Returns true when a reading was applied.
    pub fn handle(&mut self, event: StreamEvent) -> bool {
        match event {
            StreamEvent::State(state) => {
                if state == ConnectionState::Connecting {
                    self.connect_attempts += 1;
                    if self.connect_attempts > 1 {
                        if let Some(metrics) = &self.metrics {
                            metrics.inc_reconnect();
                        }
                    }
                }
                self.connection = state;
                if let Some(metrics) = &self.metrics {
                    metrics.set_connection_state(state.as_gauge());
                }
                match state {
                    ConnectionState::Connected => info!(state = %state, "live stream up"),
                    ConnectionState::Connecting => {
                        debug!(state = %state, attempt = self.connect_attempts, "connecting")
                    }
                    ConnectionState::Disconnected => {
                        warn!(state = %state, "live stream not connected")
                    }
                }
                false
            }
            StreamEvent::Update(update) => {
                let outcome = self.live.apply(update);
                if let Some(metrics) = &self.metrics {
                    metrics.record_frame("accepted");
                    metrics.observe_window(
                        self.live.history().len(),
                        gz_core::total_co2_saved(self.live.history()),
                    );
                }
                debug!(sequence = outcome.sequence, "reading applied");
                true
            }
            StreamEvent::Rejected { reason } => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_rejection(reason);
                }
                false
            }
            StreamEvent::Unrecognized { kind } => {
                debug!(kind = %kind, "unrecognized frame skipped");
                if let Some(metrics) = &self.metrics {
                    metrics.record_frame("unrecognized");
                }
                false
            }
        }
    }

    /// Nothing to show until the first reading arrives.
    pub fn dashboard(
        &self,
        summary: &Resource<SessionSummary>,
        forecast: &Resource<Forecast>,
    ) -> Option<DashboardLine> {
        let reading = self.live.latest()?;
        let session = self.live.session_aggregate(summary.data.clone());
        let view = self.live.recommendations();
        let (recommendation_count, top_action) = match view {
            RecommendationView::Active(items) => (
                items.len(),
                // first of the most urgent, in server order
                items
                    .iter()
                    .rev()
                    .max_by_key(|item| item.priority)
                    .map(|item| item.action),
            ),
            _ => (0, None),
        };

        Some(DashboardLine {
            reading_at: reading.timestamp,
            connection: self.connection,
            generation_kw: reading.generation_kw(),
            load_kw: reading.load_kw,
            battery_soc_pct: reading.battery_soc_pct,
            battery_mode: BatteryMode::of(reading),
            grid_flow: GridFlow::of(reading),
            renewable_share_pct: renewable_share_pct(reading),
            window_readings: session.window.readings,
            window_co2_saved_kg: session.window_co2_saved_kg(),
            window_undercounts: session.window.undercounts,
            lifetime_co2_saved_kg: session.lifetime_co2_saved_kg(),
            summary_stale: summary.is_stale(),
            recommendations: view.label(),
            recommendations_stale: self.live.correlator().is_stale(self.live.sequence()),
            recommendation_count,
            top_action,
            forecast_surplus_kwh: forecast
                .data
                .as_ref()
                .map(|data| {
                    forecast_surplus_kwh(data, SURPLUS_LOOKAHEAD_HOURS, reading.timestamp)
                }),
            forecast_error: forecast.error.clone(),
        })
    }
}

impl DashboardLine {
    pub fn log(&self) {
        info!(
            reading_at = %self.reading_at,
            connection = %self.connection,
            generation_kw = self.generation_kw,
            load_kw = self.load_kw,
            soc_pct = self.battery_soc_pct,
            battery = self.battery_mode.as_str(),
            grid = self.grid_flow.as_str(),
            renewable_share_pct = self.renewable_share_pct,
            window_readings = self.window_readings,
            window_co2_kg = self.window_co2_saved_kg,
            window_undercounts = self.window_undercounts,
            lifetime_co2_kg = ?self.lifetime_co2_saved_kg,
            summary_stale = self.summary_stale,
            recommendations = self.recommendations,
            recommendations_stale = self.recommendations_stale,
            recommendation_count = self.recommendation_count,
            top_action = ?self.top_action,
            forecast_surplus_kwh = ?self.forecast_surplus_kwh,
            forecast_error = ?self.forecast_error,
            "dashboard"
        );
    }
}
