//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Client-side live state for the microgrid monitor."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Rolling history, derived aggregates, and recommendation correlation.
//!
//! Everything here is synchronous and owned by a single consumer. The
//! connection layer hands decoded frames to [`LiveState::apply`], which
//! updates history and recommendations together.

pub mod aggregate;
pub mod correlator;
pub mod history;
pub mod live;

pub use aggregate::{
    forecast_surplus_kwh, percent_of_capacity, renewable_share_pct, total_co2_saved, BatteryMode,
    GridFlow, SessionAggregate, WindowAggregate,
};
pub use correlator::{CorrelatedBatch, RecommendationCorrelator, RecommendationView};
pub use history::HistoryWindow;
pub use live::{ApplyOutcome, LiveState};
