//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "REST client and independent pollers for forecast and summary resources."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use gz_common::config::FORECAST_HOURS_RANGE;
use gz_common::{EndpointConfig, FetchConfig};
use gz_msg::{Forecast, HealthStatus, SessionSummary, ShapeError};
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};
use url::Url;

pub const FORECAST_PATH: &str = "/api/v1/forecast";
pub const SUMMARY_PATH: &str = "/api/v1/summary";
pub const HEALTH_PATH: &str = "/api/v1/health";

/// Failure of one request. Scoped to the resource that issued it.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("unexpected body from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Misaligned(#[from] ShapeError),
}

impl FetchError {
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Request { source, .. } if source.is_timeout() => "timeout",
            FetchError::Request { .. } => "request",
            FetchError::Status { .. } => "status",
            FetchError::Decode { .. } => "decode",
            FetchError::Misaligned(_) => "misaligned",
        }
    }
}

/// Read-only client for the backend's REST resources.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    forecast_url: Url,
    summary_url: Url,
    health_url: Url,
}

impl ApiClient {
    /// `timeout` bounds each whole request; `None` waits indefinitely.
    pub fn new(endpoint: &EndpointConfig, timeout: Option<Duration>) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().context("failed to build http client")?;
        Ok(Self {
            http,
            forecast_url: endpoint.resource_url(FORECAST_PATH)?,
            summary_url: endpoint.resource_url(SUMMARY_PATH)?,
            health_url: endpoint.resource_url(HEALTH_PATH)?,
        })
    }

    pub fn from_config(endpoint: &EndpointConfig, fetch: &FetchConfig) -> anyhow::Result<Self> {
        Self::new(endpoint, fetch.timeout())
    }

    /// Hourly forecast; `hours` is clamped to what the server accepts.
    pub async fn forecast(&self, hours: u32) -> Result<Forecast, FetchError> {
        let hours = hours.clamp(*FORECAST_HOURS_RANGE.start(), *FORECAST_HOURS_RANGE.end());
        let mut url = self.forecast_url.clone();
        url.query_pairs_mut()
            .append_pair("hours", &hours.to_string());
        let forecast: Forecast = self.get_json(url).await?;
        forecast.validate()?;
        Ok(forecast)
    }

    pub async fn summary(&self) -> Result<SessionSummary, FetchError> {
        self.get_json(self.summary_url.clone()).await
    }

    pub async fn health(&self) -> Result<HealthStatus, FetchError> {
        self.get_json(self.health_url.clone()).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, FetchError> {
        let request_error = |source| FetchError::Request {
            url: url.to_string(),
            source,
        };
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response.bytes().await.map_err(request_error)?;
        serde_json::from_slice(&body).map_err(|source| FetchError::Decode {
            url: url.to_string(),
            source,
        })
    }
}

/// Observable state of one polled resource.
#[derive(Debug, Clone)]
pub struct Resource<T> {
    /// Last successfully fetched value. Kept when a later fetch fails.
    pub data: Option<T>,
    pub loading: bool,
    /// Message of the most recent failure; cleared by the next success.
    pub error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl<T> Default for Resource<T> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
            updated_at: None,
        }
    }
}

impl<T> Resource<T> {
    /// Data is present but the latest attempt failed.
    pub fn is_stale(&self) -> bool {
        self.data.is_some() && self.error.is_some()
    }
}

/// Background fetch loop for one resource: once immediately, then every
/// `interval` (if any) and whenever [`ResourcePoller::refresh`] is called.
///
/// Tearing the poller down cancels an in-flight request; its response is
/// never applied.
pub struct ResourcePoller<T> {
    name: &'static str,
    state: watch::Receiver<Resource<T>>,
    refresh: mpsc::Sender<()>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl<T> ResourcePoller<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn spawn<F, Fut>(name: &'static str, interval: Option<Duration>, fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let (state_tx, state) = watch::channel(Resource::default());
        // Capacity one: refresh requests made while one is pending collapse into it.
        let (refresh, refresh_rx) = mpsc::channel(1);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(poll_loop(
            name,
            interval,
            fetch,
            state_tx,
            refresh_rx,
            shutdown_rx,
        ));
        Self {
            name,
            state,
            refresh,
            shutdown,
            task: Some(task),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Ask for a fetch now. Coalesced with any request already queued.
    pub fn refresh(&self) {
        if self.refresh.try_send(()).is_err() {
            debug!(resource = self.name, "refresh already pending");
        }
    }

    pub fn state(&self) -> Resource<T> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Resource<T>> {
        self.state.clone()
    }

    /// Stop polling and wait for the task to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    warn!(resource = self.name, error = %err, "poller task failed");
                }
            }
        }
    }
}

impl<T> Drop for ResourcePoller<T> {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn poll_loop<T, F, Fut>(
    name: &'static str,
    interval: Option<Duration>,
    fetch: F,
    state: watch::Sender<Resource<T>>,
    mut refresh: mpsc::Receiver<()>,
    mut shutdown: watch::Receiver<bool>,
) where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut ticker = interval.map(|period| {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    loop {
        state.send_modify(|resource| resource.loading = true);
        let outcome = tokio::select! {
            biased;
            _ = shutdown.changed() => return,
            outcome = fetch() => outcome,
        };
        match outcome {
            Ok(data) => {
                debug!(resource = name, "fetch succeeded");
                state.send_modify(|resource| {
                    resource.data = Some(data);
                    resource.error = None;
                    resource.loading = false;
                    resource.updated_at = Some(Utc::now());
                });
            }
            Err(err) => {
                warn!(resource = name, reason = err.kind(), error = %err, "fetch failed; keeping previous data");
                state.send_modify(|resource| {
                    resource.error = Some(err.to_string());
                    resource.loading = false;
                });
            }
        }

        tokio::select! {
            biased;
            _ = shutdown.changed() => return,
            request = refresh.recv() => {
                if request.is_none() {
                    return;
                }
            }
            _ = next_tick(&mut ticker) => {}
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
