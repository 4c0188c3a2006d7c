//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Decoder for live stream frames with rejection accounting."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Frames arrive as JSON objects with a `type` discriminator. Reading frames
//! (`"reading"` or the backend's `"SENSOR_UPDATE"`) carry a `data` object and
//! optionally a recommendation batch under `recs` or `recommendations`. Every
//! other frame type is ignored. A frame is decoded completely or not at all.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::types::{Reading, Recommendation};
use crate::{DecodeError, Result};

/// Discriminator values that mark a reading frame.
pub const READING_FRAME_TYPES: [&str; 2] = ["reading", "SENSOR_UPDATE"];

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// A decoded reading frame.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamUpdate {
    pub reading: Reading,
    /// `None` when the frame carried no batch; `Some(vec![])` is an explicit
    /// "nothing to recommend".
    pub recommendations: Option<Vec<Recommendation>>,
}

/// Outcome of decoding one well-formed frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Update(StreamUpdate),
    /// A frame type this client does not handle.
    Unrecognized { kind: String },
}

/// Decode a frame, stamping readings without a timestamp with the current time.
pub fn decode_frame(raw: &str) -> Result<InboundFrame> {
    decode_frame_at(raw, Utc::now())
}

/// Decode a frame, stamping readings without a timestamp with `received_at`.
pub fn decode_frame_at(raw: &str, received_at: DateTime<Utc>) -> Result<InboundFrame> {
    let value: Value = serde_json::from_str(raw)?;
    let Value::Object(mut object) = value else {
        return Err(DecodeError::NotAnObject);
    };

    let kind = match object.get("type") {
        Some(Value::String(kind)) => kind.clone(),
        _ => return Err(DecodeError::MissingDiscriminator),
    };
    if !READING_FRAME_TYPES.contains(&kind.as_str()) {
        return Ok(InboundFrame::Unrecognized { kind });
    }

    let data = match object.remove("data") {
        Some(Value::Object(data)) => data,
        None | Some(Value::Null) => return Err(DecodeError::MissingData),
        Some(_) => {
            return Err(DecodeError::InvalidReading(
                "data is not an object".to_owned(),
            ))
        }
    };
    let reading = WireReading::deserialize(Value::Object(data))
        .map_err(|err| DecodeError::InvalidReading(err.to_string()))?
        .into_reading(received_at)?;

    let recommendations = take_batch(&mut object)
        .map(serde_json::from_value::<Vec<Recommendation>>)
        .transpose()
        .map_err(|err| DecodeError::InvalidRecommendations(err.to_string()))?;

    Ok(InboundFrame::Update(StreamUpdate {
        reading,
        recommendations,
    }))
}

fn take_batch(object: &mut Map<String, Value>) -> Option<Value> {
    ["recs", "recommendations"]
        .into_iter()
        .filter_map(|key| object.remove(key))
        .find(|value| !value.is_null())
}

/// Wire shape of a reading; more permissive than [`Reading`].
#[derive(Debug, Deserialize)]
struct WireReading {
    #[serde(default, alias = "timestamp_utc", deserialize_with = "lenient_timestamp")]
    timestamp: Option<DateTime<Utc>>,
    solar_kw: f64,
    wind_kw: f64,
    load_kw: f64,
    battery_soc_pct: f64,
    battery_power_kw: f64,
    grid_import_kw: f64,
    grid_export_kw: f64,
    self_consumption_pct: f64,
    co2_saved_kg: f64,
    #[serde(default)]
    total_generation_kw: Option<f64>,
    #[serde(default)]
    cost_saved_inr: Option<f64>,
    #[serde(default)]
    active_strategy: Option<String>,
}

impl WireReading {
    fn into_reading(self, received_at: DateTime<Utc>) -> Result<Reading> {
        let reading = Reading {
            timestamp: self.timestamp.unwrap_or(received_at),
            solar_kw: finite("solar_kw", self.solar_kw)?,
            wind_kw: finite("wind_kw", self.wind_kw)?,
            load_kw: finite("load_kw", self.load_kw)?,
            battery_soc_pct: percentage("battery_soc_pct", self.battery_soc_pct)?,
            battery_power_kw: finite("battery_power_kw", self.battery_power_kw)?,
            grid_import_kw: finite("grid_import_kw", self.grid_import_kw)?,
            grid_export_kw: finite("grid_export_kw", self.grid_export_kw)?,
            self_consumption_pct: percentage("self_consumption_pct", self.self_consumption_pct)?,
            co2_saved_kg: non_negative("co2_saved_kg", self.co2_saved_kg)?,
            total_generation_kw: self
                .total_generation_kw
                .map(|value| finite("total_generation_kw", value))
                .transpose()?,
            cost_saved_inr: self
                .cost_saved_inr
                .map(|value| finite("cost_saved_inr", value))
                .transpose()?,
            active_strategy: self.active_strategy,
        };
        Ok(reading)
    }
}

fn finite(field: &str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(DecodeError::InvalidReading(format!("{field} is not finite")))
    }
}

fn percentage(field: &str, value: f64) -> Result<f64> {
    let value = finite(field, value)?;
    if (0.0..=100.0).contains(&value) {
        Ok(value)
    } else {
        Err(DecodeError::InvalidReading(format!(
            "{field} = {value} outside 0..=100"
        )))
    }
}

fn non_negative(field: &str, value: f64) -> Result<f64> {
    let value = finite(field, value)?;
    if value >= 0.0 {
        Ok(value)
    } else {
        Err(DecodeError::InvalidReading(format!("{field} is negative")))
    }
}

/// Accepts RFC 3339 timestamps and offset-less ISO timestamps, which are
/// taken to be UTC.
fn lenient_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    parse_timestamp(&raw)
        .map(Some)
        .ok_or_else(|| serde::de::Error::custom(format!("unparseable timestamp `{raw}`")))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

struct Counters {
    accepted: AtomicU64,
    unrecognized: AtomicU64,
    rejected: AtomicU64,
}

impl Counters {
    fn new() -> Self {
        Self {
            accepted: AtomicU64::new(0),
            unrecognized: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    fn snapshot(&self) -> FrameStats {
        FrameStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            unrecognized: self.unrecognized.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time frame counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub accepted: u64,
    pub unrecognized: u64,
    pub rejected: u64,
}

impl FrameStats {
    pub fn total(&self) -> u64 {
        self.accepted + self.unrecognized + self.rejected
    }
}

/// Decoder that counts and logs what it sees. Shared across reconnects so the
/// counters describe the whole session.
pub struct FrameCodec {
    counters: Counters,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FrameCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCodec")
            .field("stats", &self.stats())
            .finish()
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            counters: Counters::new(),
        }
    }

    pub fn decode(&self, raw: &str) -> Result<InboundFrame> {
        let result = decode_frame(raw);
        match &result {
            Ok(InboundFrame::Update(update)) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                debug!(
                    timestamp = %update.reading.timestamp,
                    recommendations = update.recommendations.as_ref().map(Vec::len),
                    "stream reading decoded"
                );
            }
            Ok(InboundFrame::Unrecognized { kind }) => {
                self.counters.unrecognized.fetch_add(1, Ordering::Relaxed);
                debug!(kind = %kind, "ignoring unrecognized stream frame");
            }
            Err(err) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(reason = err.kind(), error = %err, "dropping malformed stream frame");
            }
        }
        result
    }

    pub fn stats(&self) -> FrameStats {
        self.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Priority, RecommendationAction};
    use chrono::TimeZone;
    use serde_json::json;

    fn reading_data() -> Value {
        json!({
            "timestamp": "2024-05-01T10:00:00Z",
            "solar_kw": 42.5,
            "wind_kw": 3.0,
            "load_kw": 40.0,
            "battery_soc_pct": 61.2,
            "battery_power_kw": 5.5,
            "grid_import_kw": 0.0,
            "grid_export_kw": 0.0,
            "self_consumption_pct": 100.0,
            "co2_saved_kg": 12.4
        })
    }

    fn update(raw: &Value) -> StreamUpdate {
        match decode_frame(&raw.to_string()).unwrap() {
            InboundFrame::Update(update) => update,
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn decodes_reading_without_batch() {
        let decoded = update(&json!({ "type": "reading", "data": reading_data() }));
        assert_eq!(decoded.reading.solar_kw, 42.5);
        assert_eq!(
            decoded.reading.timestamp,
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
        );
        assert!(decoded.recommendations.is_none());
    }

    #[test]
    fn decodes_backend_sensor_update_with_recommendations() {
        let mut data = reading_data();
        let data_obj = data.as_object_mut().unwrap();
        data_obj.remove("timestamp");
        data_obj.insert("timestamp_utc".into(), json!("2024-05-01T10:00:05.250000"));
        data_obj.insert("active_strategy".into(), json!("solar-first"));
        let decoded = update(&json!({
            "type": "SENSOR_UPDATE",
            "data": data,
            "recommendations": [
                {"action": "CHARGE", "priority": "HIGH", "message": "Charge now", "reason": "Surplus"}
            ]
        }));
        assert_eq!(decoded.reading.timestamp.timestamp_subsec_millis(), 250);
        assert_eq!(decoded.reading.active_strategy.as_deref(), Some("solar-first"));
        let recs = decoded.recommendations.unwrap();
        assert_eq!(recs[0].action, RecommendationAction::Charge);
        assert_eq!(recs[0].priority, Priority::High);
    }

    #[test]
    fn empty_batch_is_distinct_from_absent_batch() {
        let decoded = update(&json!({ "type": "reading", "data": reading_data(), "recs": [] }));
        assert_eq!(decoded.recommendations, Some(Vec::new()));
        let decoded = update(&json!({ "type": "reading", "data": reading_data(), "recs": null }));
        assert_eq!(decoded.recommendations, None);
    }

    #[test]
    fn missing_timestamp_uses_arrival_time() {
        let mut data = reading_data();
        data.as_object_mut().unwrap().remove("timestamp");
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let raw = json!({ "type": "reading", "data": data }).to_string();
        match decode_frame_at(&raw, at).unwrap() {
            InboundFrame::Update(update) => assert_eq!(update.reading.timestamp, at),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_unrecognized_even_with_bad_payload() {
        let frame = decode_frame(r#"{"type":"heartbeat","recs":"nonsense"}"#).unwrap();
        assert_eq!(
            frame,
            InboundFrame::Unrecognized {
                kind: "heartbeat".into()
            }
        );
    }

    #[test]
    fn malformed_frames_are_classified() {
        let cases = [
            ("not json", "json"),
            ("[1,2]", "not_object"),
            (r#"{"data":{}}"#, "missing_type"),
            (r#"{"type":"reading"}"#, "missing_data"),
            (r#"{"type":"reading","data":{"solar_kw":"x"}}"#, "invalid_reading"),
        ];
        for (raw, kind) in cases {
            let err = decode_frame(raw).unwrap_err();
            assert_eq!(err.kind(), kind, "frame {raw}");
        }
    }

    #[test]
    fn out_of_range_values_reject_the_frame() {
        let mut data = reading_data();
        data["battery_soc_pct"] = json!(140.0);
        let err = decode_frame(&json!({ "type": "reading", "data": data }).to_string()).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidReading(_)));

        let mut data = reading_data();
        data["co2_saved_kg"] = json!(-1.0);
        assert!(decode_frame(&json!({ "type": "reading", "data": data }).to_string()).is_err());
    }

    #[test]
    fn unknown_action_rejects_whole_frame() {
        let raw = json!({
            "type": "reading",
            "data": reading_data(),
            "recs": [{"action": "PANIC", "priority": "LOW", "message": "m", "reason": "r"}]
        });
        let err = decode_frame(&raw.to_string()).unwrap_err();
        assert_eq!(err.kind(), "invalid_recommendations");
    }

    #[test]
    fn codec_counts_each_outcome() {
        let codec = FrameCodec::new();
        let good = json!({ "type": "reading", "data": reading_data() }).to_string();
        assert!(codec.decode(&good).is_ok());
        assert!(codec.decode(r#"{"type":"ping"}"#).is_ok());
        assert!(codec.decode("{").is_err());
        let stats = codec.stats();
        assert_eq!(
            stats,
            FrameStats {
                accepted: 1,
                unrecognized: 1,
                rejected: 1
            }
        );
        assert_eq!(stats.total(), 3);
    }
}
