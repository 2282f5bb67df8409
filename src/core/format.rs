// Wire messages and data structures for the sample stream

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::core::constants::{EXCELLENT_LOSS_PCT, GOOD_LOSS_PCT};
use crate::core::error::{MonitorError, Result};

/// One timestamped reading with its filtered counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub seq: u64,
    /// Signal clock, seconds.
    pub timestamp: f64,
    pub raw: f64,
    pub filtered: f64,
    /// Sender wall clock, epoch seconds.
    pub server_send_time: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DataMessage {
    pub seq: u64,
    pub timestamp: f64,
    pub raw: f64,
    pub filtered: f64,
    pub server_time: f64,
}

impl DataMessage {
    pub fn to_sample(&self) -> Sample {
        Sample {
            seq: self.seq,
            timestamp: self.timestamp,
            raw: self.raw,
            filtered: self.filtered,
            server_send_time: self.server_time,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConfigMessage {
    client_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Config { client_id: String },
    Data(DataMessage),
}

impl InboundMessage {
    /// Decode one text frame. Anything that is not `{"type":"config",..}`
    /// is treated as a data message.
    pub fn decode(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| MonitorError::Protocol(format!("invalid JSON: {}", e)))?;

        if value.get("type").and_then(Value::as_str) == Some("config") {
            let msg: ConfigMessage = serde_json::from_value(value)
                .map_err(|e| MonitorError::Protocol(format!("bad config message: {}", e)))?;
            return Ok(InboundMessage::Config {
                client_id: msg.client_id,
            });
        }

        let msg: DataMessage = serde_json::from_value(value)
            .map_err(|e| MonitorError::Protocol(format!("bad data message: {}", e)))?;
        Ok(InboundMessage::Data(msg))
    }
}

/// Liveness acknowledgement, one per data message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    #[serde(rename = "type")]
    pub kind: String,
    pub seq: u64,
    pub client_time: f64,
}

impl Ack {
    pub fn new(seq: u64, client_time: f64) -> Self {
        Self {
            kind: "ack".to_string(),
            seq,
            client_time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QualitySnapshot {
    pub loss_rate_pct: f64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_lost: u64,
    pub latency_avg_ms: f64,
    pub latency_min_ms: f64,
    pub latency_max_ms: f64,
    pub jitter_ms: f64,
    pub uptime_seconds: f64,
}

impl QualitySnapshot {
    pub fn band(&self) -> QualityBand {
        QualityBand::from_loss_rate(self.loss_rate_pct)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityBand {
    Excellent,
    Good,
    Poor,
}

impl QualityBand {
    pub fn from_loss_rate(loss_rate_pct: f64) -> Self {
        if loss_rate_pct < EXCELLENT_LOSS_PCT {
            QualityBand::Excellent
        } else if loss_rate_pct < GOOD_LOSS_PCT {
            QualityBand::Good
        } else {
            QualityBand::Poor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityBand::Excellent => "excellent",
            QualityBand::Good => "good",
            QualityBand::Poor => "poor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub timestamp: DateTime<Utc>,
    pub loss_rate_pct: f64,
    pub latency_avg_ms: f64,
    pub jitter_ms: f64,
}

/// Published to the render layer when new samples are ready.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SnapshotNotice {
    pub last_seq: Option<u64>,
    pub buffered: usize,
    pub latest_timestamp: Option<f64>,
    pub quality: QualitySnapshot,
}

/// Per-client record returned by the quality polling endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteClientStats {
    pub client_id: String,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_lost: u64,
    #[serde(default)]
    pub packets_pending: u64,
    pub loss_rate: f64,
    pub latency_avg: f64,
    pub latency_min: f64,
    pub latency_max: f64,
    pub jitter: f64,
    pub uptime_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteQualityStats {
    pub global_seq: u64,
    pub active_clients: usize,
    pub clients: HashMap<String, RemoteClientStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_config() {
        let msg = InboundMessage::decode(r#"{"type":"config","client_id":"client_0_17"}"#).unwrap();
        assert_eq!(
            msg,
            InboundMessage::Config {
                client_id: "client_0_17".to_string()
            }
        );
    }

    #[test]
    fn test_decode_data_without_type() {
        let msg = InboundMessage::decode(
            r#"{"seq":7,"timestamp":1.5,"raw":512.0,"filtered":3.25,"server_time":1700000000.5}"#,
        )
        .unwrap();

        match msg {
            InboundMessage::Data(data) => {
                assert_eq!(data.seq, 7);
                assert_eq!(data.to_sample().server_send_time, 1700000000.5);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            InboundMessage::decode("not json"),
            Err(MonitorError::Protocol(_))
        ));
        assert!(matches!(
            InboundMessage::decode(r#"{"seq":-1,"timestamp":0,"raw":0,"filtered":0,"server_time":0}"#),
            Err(MonitorError::Protocol(_))
        ));
        assert!(matches!(
            InboundMessage::decode(r#"{"type":"config"}"#),
            Err(MonitorError::Protocol(_))
        ));
    }

    #[test]
    fn test_ack_wire_shape() {
        let json = serde_json::to_value(Ack::new(42, 12.5)).unwrap();
        assert_eq!(json["type"], "ack");
        assert_eq!(json["seq"], 42);
        assert_eq!(json["client_time"], 12.5);
    }

    #[test]
    fn test_quality_band_thresholds() {
        assert_eq!(QualityBand::from_loss_rate(0.0), QualityBand::Excellent);
        assert_eq!(QualityBand::from_loss_rate(0.99), QualityBand::Excellent);
        assert_eq!(QualityBand::from_loss_rate(1.0), QualityBand::Good);
        assert_eq!(QualityBand::from_loss_rate(4.99), QualityBand::Good);
        assert_eq!(QualityBand::from_loss_rate(5.0), QualityBand::Poor);
    }
}
