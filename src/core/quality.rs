// Quality aggregation and history

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

use crate::core::constants::*;
use crate::core::format::{HistoryPoint, QualitySnapshot};
use crate::core::latency::LatencyJitterEstimator;

/// `lost / (received + lost) * 100`, zero when nothing was expected.
pub fn loss_rate_pct(packets_received: u64, packets_lost: u64) -> f64 {
    let total = packets_received as f64 + packets_lost as f64;
    if total == 0.0 {
        return 0.0;
    }
    packets_lost as f64 * 100.0 / total
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub severity: Severity,
    pub message: &'static str,
}

pub struct QualityAggregator {
    history: VecDeque<HistoryPoint>,
    capacity: usize,
}

impl QualityAggregator {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn snapshot(
        &self,
        packets_received: u64,
        packets_lost: u64,
        latency: &LatencyJitterEstimator,
        uptime_seconds: f64,
    ) -> QualitySnapshot {
        let (latency_min_ms, latency_max_ms) = latency.min_max();

        QualitySnapshot {
            loss_rate_pct: loss_rate_pct(packets_received, packets_lost),
            packets_sent: packets_received.saturating_add(packets_lost),
            packets_received,
            packets_lost,
            latency_avg_ms: latency.average(),
            latency_min_ms,
            latency_max_ms,
            jitter_ms: latency.jitter(),
            uptime_seconds,
        }
    }

    /// Append one history point for `snapshot` taken at `now`.
    pub fn tick(&mut self, now: DateTime<Utc>, snapshot: &QualitySnapshot) {
        self.history.push_back(HistoryPoint {
            timestamp: now,
            loss_rate_pct: snapshot.loss_rate_pct,
            latency_avg_ms: snapshot.latency_avg_ms,
            jitter_ms: snapshot.jitter_ms,
        });
        if self.history.len() > self.capacity {
            self.history.pop_front();
        }
    }

    pub fn history(&self) -> Vec<HistoryPoint> {
        self.history.iter().copied().collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn reset_history(&mut self) {
        self.history.clear();
    }
}

impl Default for QualityAggregator {
    fn default() -> Self {
        Self::new()
    }
}

pub fn recommendations(snapshot: &QualitySnapshot) -> Vec<Recommendation> {
    let mut out = Vec::new();

    if snapshot.loss_rate_pct > GOOD_LOSS_PCT {
        out.push(Recommendation {
            severity: Severity::High,
            message: "High packet loss. Check the network connection.",
        });
    } else if snapshot.loss_rate_pct > EXCELLENT_LOSS_PCT {
        out.push(Recommendation {
            severity: Severity::Medium,
            message: "Moderate packet loss. Close other applications using the network.",
        });
    } else {
        out.push(Recommendation {
            severity: Severity::Low,
            message: "Connection quality is excellent.",
        });
    }

    if snapshot.latency_avg_ms > HIGH_LATENCY_MS {
        out.push(Recommendation {
            severity: Severity::High,
            message: "High latency. Use a faster network or move closer to the access point.",
        });
    } else if snapshot.latency_avg_ms > MODERATE_LATENCY_MS {
        out.push(Recommendation {
            severity: Severity::Medium,
            message: "Moderate latency. Display should remain usable.",
        });
    }

    if snapshot.jitter_ms > HIGH_JITTER_MS {
        out.push(Recommendation {
            severity: Severity::High,
            message: "High jitter. The link is unstable; avoid congested WiFi.",
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::format::QualityBand;

    #[test]
    fn test_loss_rate() {
        assert_eq!(loss_rate_pct(0, 0), 0.0);
        assert_eq!(loss_rate_pct(98, 2), 2.0);
        assert_eq!(loss_rate_pct(0, 7), 100.0);
        assert_eq!(loss_rate_pct(10, 0), 0.0);
    }

    #[test]
    fn test_snapshot_with_saturated_counters() {
        let agg = QualityAggregator::new();
        let est = LatencyJitterEstimator::new();
        let snap = agg.snapshot(4, u64::MAX, &est, 1.0);

        assert_eq!(snap.packets_sent, u64::MAX);
        assert!(snap.loss_rate_pct > 99.0 && snap.loss_rate_pct <= 100.0);
        assert_eq!(snap.band(), QualityBand::Poor);
    }

    #[test]
    fn test_snapshot_band() {
        let agg = QualityAggregator::new();
        let est = LatencyJitterEstimator::new();
        let snap = agg.snapshot(98, 2, &est, 3.0);

        assert_eq!(snap.loss_rate_pct, 2.0);
        assert_eq!(snap.packets_sent, 100);
        assert_eq!(snap.band(), QualityBand::Good);
        assert_eq!(snap.latency_avg_ms, 0.0);
        assert_eq!(snap.uptime_seconds, 3.0);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut agg = QualityAggregator::new();
        let est = LatencyJitterEstimator::new();
        let start = Utc::now();

        for i in 0..75 {
            let snap = agg.snapshot(i, 0, &est, i as f64);
            agg.tick(start + chrono::Duration::seconds(i as i64), &snap);
        }

        let history = agg.history();
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history[0].timestamp, start + chrono::Duration::seconds(15));

        agg.reset_history();
        assert_eq!(agg.history_len(), 0);
    }

    #[test]
    fn test_recommendations() {
        let calm = QualitySnapshot::default();
        let recs = recommendations(&calm);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].severity, Severity::Low);

        let rough = QualitySnapshot {
            loss_rate_pct: 6.0,
            latency_avg_ms: 120.0,
            jitter_ms: 25.0,
            ..QualitySnapshot::default()
        };
        let severities: Vec<Severity> = recommendations(&rough).iter().map(|r| r.severity).collect();
        assert_eq!(severities, vec![Severity::High, Severity::High, Severity::High]);

        let mid = QualitySnapshot {
            loss_rate_pct: 3.0,
            latency_avg_ms: 60.0,
            ..QualitySnapshot::default()
        };
        let severities: Vec<Severity> = recommendations(&mid).iter().map(|r| r.severity).collect();
        assert_eq!(severities, vec![Severity::Medium, Severity::Medium]);
    }
}
