//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Latest recommendation batch paired with the reading it arrived with."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use gz_msg::Recommendation;

/// A batch and the frame it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelatedBatch {
    /// Sequence number of the frame that carried the batch.
    pub sequence: u64,
    pub reading_timestamp: DateTime<Utc>,
    pub recommendations: Vec<Recommendation>,
}

/// What a consumer should show for the recommendation feed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecommendationView<'a> {
    /// No batch has arrived since the monitor started.
    AwaitingFirstBatch,
    /// The latest batch was empty.
    Clear,
    Active(&'a [Recommendation]),
}

impl RecommendationView<'_> {
    pub fn label(&self) -> &'static str {
        match self {
            RecommendationView::AwaitingFirstBatch => "awaiting",
            RecommendationView::Clear => "clear",
            RecommendationView::Active(_) => "active",
        }
    }
}

/// Holds exactly one batch. A new batch replaces the old one wholesale.
#[derive(Debug, Clone)]
pub struct RecommendationCorrelator {
    current: Option<CorrelatedBatch>,
    max_items: usize,
}

impl RecommendationCorrelator {
    pub fn new(max_items: usize) -> Self {
        Self {
            current: None,
            max_items: max_items.max(1),
        }
    }

    pub fn on_batch(
        &mut self,
        sequence: u64,
        reading_timestamp: DateTime<Utc>,
        recommendations: Vec<Recommendation>,
    ) {
        self.current = Some(CorrelatedBatch {
            sequence,
            reading_timestamp,
            recommendations,
        });
    }

    pub fn current(&self) -> Option<&CorrelatedBatch> {
        self.current.as_ref()
    }

    /// The feed, truncated to `max_items` in server order.
    pub fn view(&self) -> RecommendationView<'_> {
        match &self.current {
            None => RecommendationView::AwaitingFirstBatch,
            Some(batch) if batch.recommendations.is_empty() => RecommendationView::Clear,
            Some(batch) => {
                let shown = batch.recommendations.len().min(self.max_items);
                RecommendationView::Active(&batch.recommendations[..shown])
            }
        }
    }

    /// True when the held batch arrived with an earlier frame than `sequence`.
    pub fn is_stale(&self, sequence: u64) -> bool {
        self.current
            .as_ref()
            .is_some_and(|batch| batch.sequence < sequence)
    }
}
