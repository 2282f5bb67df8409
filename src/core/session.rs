// Per-connection ingestion state machine

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::buffer::SampleBuffer;
use crate::core::constants::*;
use crate::core::error::Result;
use crate::core::format::*;
use crate::core::latency::LatencyJitterEstimator;
use crate::core::quality::QualityAggregator;
use crate::core::sequence::SequenceTracker;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSettings {
    pub max_points: usize,
    pub render_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_points: DEFAULT_MAX_POINTS,
            render_interval: Duration::from_millis(RENDER_INTERVAL_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SessionState {
    pub session_id: Uuid,
    pub client_id: Option<String>,
    pub connected: bool,
    pub paused: bool,
    pub last_seq: Option<u64>,
    pub packets_received: u64,
    pub packets_lost: u64,
}

/// Rate limiter for "snapshot ready" notifications. Only evaluated when a
/// sample arrives, so it never fires on an idle stream.
#[derive(Debug, Clone)]
pub struct RenderThrottle {
    interval: Duration,
    last_fire: Option<Instant>,
}

impl RenderThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_fire: None,
        }
    }

    pub fn ready(&mut self, now: Instant) -> bool {
        let due = match self.last_fire {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if due {
            self.last_fire = Some(now);
        }
        due
    }
}

/// Result of feeding one data message through the session.
#[derive(Debug, Clone, PartialEq)]
pub struct Ingested {
    pub ack: Option<Ack>,
    pub lost: u64,
    pub notify: bool,
}

pub struct StreamSession {
    state: SessionState,
    buffer: SampleBuffer,
    sequence: SequenceTracker,
    latency: LatencyJitterEstimator,
    quality: QualityAggregator,
    throttle: RenderThrottle,
    started_at: Instant,
}

impl StreamSession {
    pub fn new(settings: SessionSettings, started_at: Instant) -> Self {
        let session_id = Uuid::new_v4();
        info!("Session {} created (buffer: {} points)", session_id, settings.max_points);

        Self {
            state: SessionState {
                session_id,
                client_id: None,
                connected: true,
                paused: false,
                last_seq: None,
                packets_received: 0,
                packets_lost: 0,
            },
            buffer: SampleBuffer::new(settings.max_points),
            sequence: SequenceTracker::new(),
            latency: LatencyJitterEstimator::new(),
            quality: QualityAggregator::new(),
            throttle: RenderThrottle::new(settings.render_interval),
            started_at,
        }
    }

    /// Decode and apply one inbound frame. `received_at` is local wall
    /// clock in epoch seconds.
    ///
    /// Returns `Ok(None)` for config messages.
    pub fn on_message(
        &mut self,
        raw: &str,
        received_at: f64,
        now: Instant,
    ) -> Result<Option<Ingested>> {
        match InboundMessage::decode(raw)? {
            InboundMessage::Config { client_id } => {
                self.apply_config(client_id);
                Ok(None)
            }
            InboundMessage::Data(data) => Ok(Some(self.on_data(&data, received_at, now))),
        }
    }

    fn apply_config(&mut self, client_id: String) {
        match &self.state.client_id {
            Some(existing) => {
                debug!("Ignoring repeated config (client id stays {})", existing);
            }
            None => {
                info!("Session {} assigned client id {}", self.state.session_id, client_id);
                self.state.client_id = Some(client_id);
            }
        }
    }

    pub fn on_data(&mut self, data: &DataMessage, received_at: f64, now: Instant) -> Ingested {
        let expected = self.state.last_seq.map(|s| s.saturating_add(1));
        let lost = self.sequence.observe(data.seq);
        if lost > 0 {
            warn!(
                "Packets lost: {} (expected: {:?}, received: {})",
                lost, expected, data.seq
            );
        }

        self.state.last_seq = self.sequence.last_seq();
        self.state.packets_lost = self.sequence.packets_lost();
        self.state.packets_received = self.state.packets_received.saturating_add(1);

        let latency_ms = (received_at - data.server_time) * 1000.0;
        self.latency.observe(latency_ms);

        let mut notify = false;
        if !self.state.paused {
            self.buffer.append(data.to_sample());
            notify = self.throttle.ready(now);
        }

        let ack = self
            .state
            .connected
            .then(|| Ack::new(data.seq, received_at));

        Ingested { ack, lost, notify }
    }

    pub fn set_paused(&mut self, paused: bool) {
        if self.state.paused != paused {
            info!("Session {} {}", self.state.session_id, if paused { "paused" } else { "resumed" });
        }
        self.state.paused = paused;
    }

    pub fn mark_disconnected(&mut self) {
        if self.state.connected {
            info!("Session {} disconnected", self.state.session_id);
        }
        self.state.connected = false;
    }

    pub fn snapshot(&self, now: Instant) -> QualitySnapshot {
        let uptime = now.saturating_duration_since(self.started_at).as_secs_f64();
        self.quality.snapshot(
            self.state.packets_received,
            self.state.packets_lost,
            &self.latency,
            uptime,
        )
    }

    pub fn notice(&self, now: Instant) -> SnapshotNotice {
        SnapshotNotice {
            last_seq: self.state.last_seq,
            buffered: self.buffer.len(),
            latest_timestamp: self.buffer.latest().map(|s| s.timestamp),
            quality: self.snapshot(now),
        }
    }

    /// One diagnostics tick: snapshot the current quality into history.
    pub fn tick(&mut self, wall: DateTime<Utc>, now: Instant) -> QualitySnapshot {
        let snapshot = self.snapshot(now);
        self.quality.tick(wall, &snapshot);
        snapshot
    }

    pub fn window_view(&self, window_seconds: f64) -> Vec<Sample> {
        self.buffer.window_view(window_seconds)
    }

    pub fn history(&self) -> Vec<HistoryPoint> {
        self.quality.history()
    }

    pub fn reset_history(&mut self) {
        self.quality.reset_history();
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn buffer(&self) -> &SampleBuffer {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(seq: u64, timestamp: f64, server_time: f64) -> String {
        format!(
            r#"{{"seq":{},"timestamp":{},"raw":{},"filtered":{},"server_time":{}}}"#,
            seq,
            timestamp,
            100.0 + seq as f64,
            seq as f64,
            server_time
        )
    }

    fn session(max_points: usize) -> (StreamSession, Instant) {
        let start = Instant::now();
        let settings = SessionSettings {
            max_points,
            ..SessionSettings::default()
        };
        (StreamSession::new(settings, start), start)
    }

    #[test]
    fn test_gap_scenario() {
        let (mut s, start) = session(100);
        for seq in [1, 2, 3, 5, 6] {
            s.on_message(&frame(seq, seq as f64, 10.0), 10.0, start).unwrap();
        }
        assert_eq!(s.state().packets_lost, 1);
        assert_eq!(s.state().last_seq, Some(6));
        assert_eq!(s.state().packets_received, 5);
    }

    #[test]
    fn test_full_range_sequence_numbers() {
        let (mut s, start) = session(100);
        for seq in [0, u64::MAX, 0, u64::MAX] {
            s.on_message(&frame(seq, 1.0, 10.0), 10.0, start).unwrap();
        }
        assert_eq!(s.state().packets_lost, u64::MAX);
        assert_eq!(s.state().packets_received, 4);

        let snap = s.snapshot(start);
        assert_eq!(snap.packets_sent, u64::MAX);
        assert!((0.0..=100.0).contains(&snap.loss_rate_pct));
    }

    #[test]
    fn test_latency_from_server_time() {
        let (mut s, start) = session(100);
        s.on_message(&frame(1, 0.0, 100.0), 100.025, start).unwrap();
        let snap = s.snapshot(start);
        assert!((snap.latency_avg_ms - 25.0).abs() < 1e-6);
    }

    #[test]
    fn test_ack_for_every_data_message() {
        let (mut s, start) = session(100);
        let out = s.on_message(&frame(9, 0.0, 1.0), 1.5, start).unwrap().unwrap();
        assert_eq!(out.ack, Some(Ack::new(9, 1.5)));
    }

    #[test]
    fn test_pause_freezes_buffer_but_not_accounting() {
        let (mut s, start) = session(100);
        for seq in 1..=3 {
            s.on_message(&frame(seq, seq as f64, 0.0), 0.01, start).unwrap();
        }
        s.set_paused(true);

        let mut acks = 0;
        for seq in [4, 5, 7] {
            let out = s.on_message(&frame(seq, seq as f64, 0.0), 0.01, start).unwrap().unwrap();
            assert!(!out.notify);
            if out.ack.is_some() {
                acks += 1;
            }
        }

        assert_eq!(acks, 3);
        assert_eq!(s.buffer().len(), 3);
        assert_eq!(s.state().packets_received, 6);
        assert_eq!(s.state().packets_lost, 1);

        s.set_paused(false);
        s.on_message(&frame(8, 8.0, 0.0), 0.01, start).unwrap();
        assert_eq!(s.buffer().len(), 4);
    }

    #[test]
    fn test_config_is_stored_once() {
        let (mut s, start) = session(10);
        let first = s
            .on_message(r#"{"type":"config","client_id":"a"}"#, 0.0, start)
            .unwrap();
        assert!(first.is_none());
        s.on_message(r#"{"type":"config","client_id":"b"}"#, 0.0, start).unwrap();
        assert_eq!(s.state().client_id.as_deref(), Some("a"));
    }

    #[test]
    fn test_malformed_frame_leaves_state_untouched() {
        let (mut s, start) = session(10);
        s.on_message(&frame(1, 1.0, 0.0), 0.0, start).unwrap();
        assert!(s.on_message("{\"seq\": \"x\"}", 0.0, start).is_err());
        assert!(s.on_message("", 0.0, start).is_err());
        assert_eq!(s.state().packets_received, 1);
        assert_eq!(s.buffer().len(), 1);
    }

    #[test]
    fn test_no_ack_after_disconnect() {
        let (mut s, start) = session(10);
        s.mark_disconnected();
        let out = s.on_message(&frame(1, 1.0, 0.0), 0.0, start).unwrap().unwrap();
        assert!(out.ack.is_none());
        assert!(!s.state().connected);
    }

    #[test]
    fn test_render_throttle() {
        let (mut s, start) = session(100);
        let notify_at = |s: &mut StreamSession, seq: u64, ms: u64| {
            s.on_message(&frame(seq, seq as f64, 0.0), 0.0, start + Duration::from_millis(ms))
                .unwrap()
                .unwrap()
                .notify
        };

        assert!(notify_at(&mut s, 1, 0));
        assert!(!notify_at(&mut s, 2, 10));
        assert!(!notify_at(&mut s, 3, 49));
        assert!(notify_at(&mut s, 4, 50));
        assert!(!notify_at(&mut s, 5, 60));
        assert!(notify_at(&mut s, 6, 120));
    }

    #[test]
    fn test_tick_records_history() {
        let (mut s, start) = session(10);
        s.on_message(&frame(1, 1.0, 0.0), 0.0, start).unwrap();
        s.on_message(&frame(3, 2.0, 0.0), 0.0, start).unwrap();

        let snap = s.tick(Utc::now(), start + Duration::from_secs(2));
        assert_eq!(snap.packets_lost, 1);
        assert_eq!(snap.loss_rate_pct, 100.0 / 3.0);
        assert_eq!(snap.uptime_seconds, 2.0);
        assert_eq!(s.history().len(), 1);

        s.reset_history();
        assert!(s.history().is_empty());
    }
}
