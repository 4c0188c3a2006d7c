//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Telemetry data model and stream frame codec."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
pub mod api;
pub mod codec;
pub mod types;

/// Shared result type for frame decoding.
pub type Result<T> = std::result::Result<T, DecodeError>;

/// Reasons an inbound stream frame is discarded.
///
/// None of these ever reach the connection manager as a failure; they are
/// counted, logged, and the frame is dropped.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The payload is not JSON at all.
    #[error("frame is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    /// The payload is JSON but not an object.
    #[error("frame is not a json object")]
    NotAnObject,
    /// The object carries no string `type` field.
    #[error("frame has no type discriminator")]
    MissingDiscriminator,
    /// A reading frame without a `data` object.
    #[error("reading frame has no data")]
    MissingData,
    /// The `data` object does not describe a valid reading.
    #[error("invalid reading: {0}")]
    InvalidReading(String),
    /// The recommendation batch does not match the recommendation shape.
    #[error("invalid recommendation batch: {0}")]
    InvalidRecommendations(String),
}

impl DecodeError {
    /// Stable label used for log fields and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            DecodeError::Json(_) => "json",
            DecodeError::NotAnObject => "not_object",
            DecodeError::MissingDiscriminator => "missing_type",
            DecodeError::MissingData => "missing_data",
            DecodeError::InvalidReading(_) => "invalid_reading",
            DecodeError::InvalidRecommendations(_) => "invalid_recommendations",
        }
    }
}

pub use api::{
    site_hour, Forecast, ForecastLocation, ForecastPoint, HealthStatus, SessionSummary, ShapeError,
    SITE_UTC_OFFSET_SECS,
};
pub use codec::{decode_frame, decode_frame_at, FrameCodec, FrameStats, InboundFrame, StreamUpdate};
pub use types::{Priority, Reading, Recommendation, RecommendationAction};
