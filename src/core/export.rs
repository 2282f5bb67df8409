// CSV and JSON report serialization of session state

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::fmt::Write;

use crate::core::constants::CSV_HEADER;
use crate::core::format::{HistoryPoint, QualitySnapshot, Sample};
use crate::core::quality::{recommendations, Recommendation};

/// `timestamp,raw,filtered`, one row per sample in the given order.
pub fn samples_to_csv<'a>(samples: impl IntoIterator<Item = &'a Sample>) -> String {
    let mut csv = String::with_capacity(64);
    csv.push_str(CSV_HEADER);
    csv.push('\n');
    for s in samples {
        // writing into a String cannot fail
        let _ = writeln!(csv, "{},{},{}", s.timestamp, s.raw, s.filtered);
    }
    csv
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryArrays {
    pub timestamps: Vec<String>,
    pub loss_rates: Vec<f64>,
    pub latencies: Vec<f64>,
    pub jitters: Vec<f64>,
}

impl HistoryArrays {
    pub fn from_points(points: &[HistoryPoint]) -> Self {
        Self {
            timestamps: points
                .iter()
                .map(|p| p.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true))
                .collect(),
            loss_rates: points.iter().map(|p| p.loss_rate_pct).collect(),
            latencies: points.iter().map(|p| p.latency_avg_ms).collect(),
            jitters: points.iter().map(|p| p.jitter_ms).collect(),
        }
    }
}

/// Metric text as displayed, rounded to two decimals.
#[derive(Debug, Serialize)]
pub struct MetricText {
    pub packets_sent: String,
    pub packets_received: String,
    pub packets_lost: String,
    pub loss_rate: String,
    pub latency_avg: String,
    pub latency_min: String,
    pub latency_max: String,
    pub jitter: String,
}

impl From<&QualitySnapshot> for MetricText {
    fn from(q: &QualitySnapshot) -> Self {
        Self {
            packets_sent: q.packets_sent.to_string(),
            packets_received: q.packets_received.to_string(),
            packets_lost: q.packets_lost.to_string(),
            loss_rate: format!("{:.2}%", q.loss_rate_pct),
            latency_avg: format!("{:.2} ms", q.latency_avg_ms),
            latency_min: format!("{:.2} ms", q.latency_min_ms),
            latency_max: format!("{:.2} ms", q.latency_max_ms),
            jitter: format!("{:.2} ms", q.jitter_ms),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QualityReport {
    pub client_id: Option<String>,
    pub timestamp: String,
    pub history: HistoryArrays,
    pub current_metrics: MetricText,
    pub quality_level: &'static str,
    pub recommendations: Vec<Recommendation>,
}

impl QualityReport {
    pub fn build(
        client_id: Option<String>,
        generated_at: DateTime<Utc>,
        history: &[HistoryPoint],
        current: &QualitySnapshot,
    ) -> Self {
        Self {
            client_id,
            timestamp: generated_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            history: HistoryArrays::from_points(history),
            current_metrics: MetricText::from(current),
            quality_level: current.band().as_str(),
            recommendations: recommendations(current),
        }
    }
}
