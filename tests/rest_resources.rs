//! ---
//! ems_section: "15-testing-qa-runbook"
//! ems_subsection: "integration-tests"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "REST client and resource pollers against an in-process JSON server."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use gz_common::EndpointConfig;
use gz_core::forecast_surplus_kwh;
use gz_net::{ApiClient, FetchError, ResourcePoller};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::time::timeout;
use url::Url;

#[derive(Default)]
struct Backend {
    forecast_hours: Mutex<Vec<String>>,
    summary_calls: AtomicUsize,
    /// Summary requests after this many answer 503.
    summary_failures_after: Option<usize>,
    misaligned: bool,
    slow: bool,
}

async fn spawn_backend(backend: Arc<Backend>) -> SocketAddr {
    let app = Router::new()
        .route("/api/v1/forecast", get(forecast))
        .route("/api/v1/summary", get(summary))
        .route("/api/v1/health", get(health))
        .with_state(backend);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn forecast(
    State(backend): State<Arc<Backend>>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    backend
        .forecast_hours
        .lock()
        .unwrap()
        .push(params.get("hours").cloned().unwrap_or_default());
    if backend.slow {
        tokio::time::sleep(Duration::from_secs(3)).await;
    }
    let load = if backend.misaligned {
        json!([20.0])
    } else {
        json!([20.0, 45.0, 30.0])
    };
    Json(json!({
        "hourly_time": ["2024-05-01T10:00", "2024-05-01T11:00", "2024-05-01T12:00"],
        "forecast_solar_kw": [30.0, 40.0, 10.0],
        "forecast_wind_kw": [5.0, 0.0, 2.0],
        "cloudcover": [10.0, 0.0, 80.0],
        "forecast_load_kw": load,
        "temperature_2m": [31.0, 33.5, 34.0],
        "location": {"lat": 26.9124, "lon": 75.7873, "city": "Jaipur"}
    }))
}

async fn summary(State(backend): State<Arc<Backend>>) -> Response {
    let call = backend.summary_calls.fetch_add(1, Ordering::SeqCst);
    if backend
        .summary_failures_after
        .is_some_and(|after| call >= after)
    {
        return (StatusCode::SERVICE_UNAVAILABLE, "database unavailable").into_response();
    }
    Json(json!({
        "total_solar_kwh": 80.25,
        "total_wind_kwh": 12.5,
        "total_load_kwh": 101.0,
        "total_grid_import_kwh": 9.0,
        "total_co2_saved_kg": 66.1,
        "total_cost_saved_inr": 512.0,
        "avg_self_consumption_pct": 91.2,
        "n_readings": 7200 + call
    }))
    .into_response()
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "GridZen VPP API",
        "timestamp": "2024-05-01T10:00:00.000000+00:00"
    }))
}

fn client(addr: SocketAddr, request_timeout: Option<Duration>) -> ApiClient {
    let endpoint = EndpointConfig::from_base(Url::parse(&format!("http://{addr}")).unwrap());
    ApiClient::new(&endpoint, request_timeout).unwrap()
}

#[tokio::test]
async fn forecast_is_fetched_validated_and_clamped() {
    let backend = Arc::new(Backend::default());
    let addr = spawn_backend(Arc::clone(&backend)).await;
    let api = client(addr, Some(Duration::from_secs(5)));

    let forecast = api.forecast(24).await.unwrap();
    assert_eq!(forecast.len(), 3);
    let site_ten_am = Utc.with_ymd_and_hms(2024, 5, 1, 4, 30, 0).unwrap();
    assert_eq!(forecast_surplus_kwh(&forecast, 3, site_ten_am), 15.0);
    assert_eq!(forecast.location.as_ref().unwrap().city, "Jaipur");

    api.forecast(100).await.unwrap();
    api.forecast(1).await.unwrap();
    assert_eq!(
        *backend.forecast_hours.lock().unwrap(),
        vec!["24".to_owned(), "48".to_owned(), "6".to_owned()]
    );
}

#[tokio::test]
async fn misaligned_forecast_is_a_fetch_failure() {
    let backend = Arc::new(Backend {
        misaligned: true,
        ..Backend::default()
    });
    let addr = spawn_backend(backend).await;
    let err = client(addr, None).forecast(24).await.unwrap_err();
    assert!(matches!(err, FetchError::Misaligned(_)), "got {err}");
}

#[tokio::test]
async fn summary_and_health_decode() {
    let backend = Arc::new(Backend::default());
    let addr = spawn_backend(backend).await;
    let api = client(addr, None);

    let summary = api.summary().await.unwrap();
    assert_eq!(summary.total_co2_saved_kg, 66.1);
    assert_eq!(summary.total_renewable_kwh(), 92.75);
    assert_eq!(summary.n_readings, Some(7200));

    let health = api.health().await.unwrap();
    assert!(health.is_ok());
    assert_eq!(health.service, "GridZen VPP API");
}

#[tokio::test]
async fn non_success_status_is_reported() {
    let backend = Arc::new(Backend {
        summary_failures_after: Some(0),
        ..Backend::default()
    });
    let addr = spawn_backend(backend).await;
    let err = client(addr, None).summary().await.unwrap_err();
    match err {
        FetchError::Status { status, .. } => assert_eq!(status, 503),
        other => panic!("unexpected error {other}"),
    }
}

#[tokio::test]
async fn request_timeout_bounds_stuck_requests() {
    let backend = Arc::new(Backend {
        slow: true,
        ..Backend::default()
    });
    let addr = spawn_backend(backend).await;
    let err = client(addr, Some(Duration::from_millis(200)))
        .forecast(24)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "timeout");
}

#[tokio::test]
async fn summary_poller_keeps_stale_data_after_failure() {
    let backend = Arc::new(Backend {
        summary_failures_after: Some(1),
        ..Backend::default()
    });
    let addr = spawn_backend(Arc::clone(&backend)).await;
    let api = client(addr, Some(Duration::from_secs(5)));
    let poller = ResourcePoller::spawn("summary", None, move || {
        let api = api.clone();
        async move { api.summary().await }
    });
    let mut state = poller.subscribe();

    let first = timeout(Duration::from_secs(5), state.wait_for(|r| r.data.is_some() && !r.loading))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert_eq!(first.data.as_ref().unwrap().n_readings, Some(7200));
    assert!(first.error.is_none());

    poller.refresh();
    let second = timeout(Duration::from_secs(5), state.wait_for(|r| r.error.is_some()))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert!(second.is_stale());
    assert_eq!(second.data.unwrap().total_co2_saved_kg, 66.1);
    assert!(second.error.unwrap().contains("503"));

    poller.shutdown().await;
    assert_eq!(backend.summary_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn forecast_and_summary_fail_independently() {
    let backend = Arc::new(Backend {
        summary_failures_after: Some(0),
        ..Backend::default()
    });
    let addr = spawn_backend(backend).await;
    let api = client(addr, Some(Duration::from_secs(5)));

    let forecast_poller = {
        let api = api.clone();
        ResourcePoller::spawn("forecast", None, move || {
            let api = api.clone();
            async move { api.forecast(24).await }
        })
    };
    let summary_poller = ResourcePoller::spawn("summary", None, move || {
        let api = api.clone();
        async move { api.summary().await }
    });

    let mut forecast_state = forecast_poller.subscribe();
    let mut summary_state = summary_poller.subscribe();
    timeout(Duration::from_secs(5), forecast_state.wait_for(|r| r.data.is_some()))
        .await
        .unwrap()
        .unwrap();
    timeout(Duration::from_secs(5), summary_state.wait_for(|r| r.error.is_some()))
        .await
        .unwrap()
        .unwrap();

    assert!(forecast_poller.state().error.is_none());
    assert!(summary_poller.state().data.is_none());

    forecast_poller.shutdown().await;
    summary_poller.shutdown().await;
}
