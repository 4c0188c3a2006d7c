//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Per-frame application of stream updates to history and recommendations."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use gz_common::{HistoryConfig, RecommendationConfig};
use gz_msg::{Reading, SessionSummary, StreamUpdate};
use tracing::{debug, warn};

use crate::aggregate::{SessionAggregate, WindowAggregate};
use crate::correlator::{RecommendationCorrelator, RecommendationView};
use crate::history::HistoryWindow;

/// What one call to [`LiveState::apply`] changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub sequence: u64,
    /// The reading is older than the one before it. It is kept anyway.
    pub out_of_order: bool,
    pub batch_replaced: bool,
}

/// The monitor's view of the stream: history window plus the current
/// recommendation batch, updated together for each accepted frame.
#[derive(Debug, Clone)]
pub struct LiveState {
    history: HistoryWindow<Reading>,
    correlator: RecommendationCorrelator,
    sample_interval: Duration,
    sequence: u64,
}

impl LiveState {
    pub fn new(capacity: usize, max_recommendations: usize, sample_interval: Duration) -> Self {
        Self {
            history: HistoryWindow::new(capacity),
            correlator: RecommendationCorrelator::new(max_recommendations),
            sample_interval,
            sequence: 0,
        }
    }

    pub fn from_config(history: &HistoryConfig, recommendations: &RecommendationConfig) -> Self {
        Self::new(
            history.capacity,
            recommendations.max_items,
            history.sample_interval,
        )
    }

    /// Apply one decoded frame. History is appended first, then the batch (if
    /// the frame carried one) replaces the held batch. A frame without a batch
    /// leaves the previous batch in place.
    pub fn apply(&mut self, update: StreamUpdate) -> ApplyOutcome {
        self.sequence += 1;
        let StreamUpdate {
            reading,
            recommendations,
        } = update;

        let out_of_order = self
            .history
            .latest()
            .is_some_and(|previous| reading.timestamp < previous.timestamp);
        if out_of_order {
            warn!(
                sequence = self.sequence,
                timestamp = %reading.timestamp,
                "reading arrived out of order; keeping arrival order"
            );
        }

        let reading_timestamp = reading.timestamp;
        self.history.append(reading);

        let batch_replaced = match recommendations {
            Some(batch) => {
                self.correlator
                    .on_batch(self.sequence, reading_timestamp, batch);
                true
            }
            None => false,
        };

        debug!(
            sequence = self.sequence,
            history_len = self.history.len(),
            batch_replaced,
            "stream update applied"
        );
        ApplyOutcome {
            sequence: self.sequence,
            out_of_order,
            batch_replaced,
        }
    }

    pub fn latest(&self) -> Option<&Reading> {
        self.history.latest()
    }

    pub fn history(&self) -> &HistoryWindow<Reading> {
        &self.history
    }

    pub fn correlator(&self) -> &RecommendationCorrelator {
        &self.correlator
    }

    pub fn recommendations(&self) -> RecommendationView<'_> {
        self.correlator.view()
    }

    /// Number of frames applied so far.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn window_aggregate(&self) -> WindowAggregate {
        WindowAggregate::compute(&self.history, self.sample_interval)
    }

    pub fn session_aggregate(&self, lifetime: Option<SessionSummary>) -> SessionAggregate {
        SessionAggregate::new(self.window_aggregate(), lifetime)
    }
}
