//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Network connectivity for the live stream and REST resources."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! The stream side keeps one WebSocket session alive with a fixed reconnect
//! delay and hands decoded frames to the consumer over a channel. The REST side
//! polls the forecast and summary resources independently of the stream and
//! of each other.

pub mod fetch;
pub mod stream;

pub use fetch::{ApiClient, FetchError, Resource, ResourcePoller, FORECAST_PATH, HEALTH_PATH, SUMMARY_PATH};
pub use stream::{
    ConnectionManager, ConnectionState, Connector, FrameSource, StreamEvent, TransportError,
    TransportEvent, WebSocketConnector,
};
