//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared configuration and logging primitives."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Shared primitives for the GridZen live monitor workspace.
//! This crate exposes configuration loading and tracing initialisation
//! consumed by the stream client, the pollers, and the CLI.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, EndpointConfig, FetchConfig, HistoryConfig, LoadedAppConfig, LoggingConfig,
    MetricsConfig, RecommendationConfig, StreamConfig,
};
pub use logging::{init_tracing, LogFormat};
