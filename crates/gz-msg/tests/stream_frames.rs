//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "integration-tests"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Frame decoding against payloads shaped like the backend's live feed."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use anyhow::Result;
use gz_msg::{FrameCodec, FrameStats, InboundFrame, Priority, RecommendationAction};

const BACKEND_TICK: &str = r#"{
  "type": "SENSOR_UPDATE",
  "data": {
    "timestamp_utc": "2024-05-01T13:45:10.481223",
    "solar_kw": 41.37,
    "wind_kw": 6.02,
    "total_generation_kw": 47.39,
    "load_kw": 52.8,
    "battery_soc_pct": 18.4,
    "battery_power_kw": -5.41,
    "grid_import_kw": 0.0,
    "grid_export_kw": 0.0,
    "self_consumption_pct": 89.75,
    "co2_saved_kg": 0.0547,
    "cost_saved_inr": 0.4977,
    "active_strategy": "peak-shave"
  },
  "recommendations": [
    {"action": "IMPORT", "priority": "HIGH", "message": "Battery critically low (18%).", "reason": "SOC below 20%"},
    {"action": "SHIFT_LOAD", "priority": "MEDIUM", "message": "Defer HVAC pre-cooling.", "reason": "Evening peak tariff"}
  ]
}"#;

#[test]
fn backend_tick_decodes_completely() -> Result<()> {
    let codec = FrameCodec::new();
    let InboundFrame::Update(update) = codec.decode(BACKEND_TICK)? else {
        panic!("backend tick should decode as a reading");
    };
    let reading = &update.reading;
    assert_eq!(reading.generation_kw(), 47.39);
    assert_eq!(reading.active_strategy.as_deref(), Some("peak-shave"));
    assert_eq!(reading.timestamp.to_rfc3339(), "2024-05-01T13:45:10.481223+00:00");

    let recs = update.recommendations.expect("batch present");
    assert_eq!(recs.len(), 2);
    assert_eq!(recs[0].action, RecommendationAction::Import);
    assert!(recs[0].priority > recs[1].priority);
    assert_eq!(recs[1].priority, Priority::Medium);
    Ok(())
}

#[test]
fn codec_survives_a_noisy_feed() {
    let codec = FrameCodec::new();
    let feed = [
        BACKEND_TICK,
        "",
        "null",
        r#"{"type": 7, "data": {}}"#,
        r#"{"type": "reading", "data": null}"#,
        r#"{"type": "ALERT", "data": {"level": "warn"}}"#,
        BACKEND_TICK,
    ];
    let accepted = feed
        .iter()
        .filter(|raw| matches!(codec.decode(raw), Ok(InboundFrame::Update(_))))
        .count();
    assert_eq!(accepted, 2);
    assert_eq!(
        codec.stats(),
        FrameStats {
            accepted: 2,
            unrecognized: 1,
            rejected: 4
        }
    );
}
