use serde::{Deserialize, Serialize};
use std::time::Duration;

use ppg_monitor::core::constants::*;
use ppg_monitor::{LoopSettings, SessionSettings};

#[derive(Debug, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub name: String,
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub connection: Connection,
    #[serde(default)]
    pub stream: StreamConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Connection {
    pub ip: String,
    pub port: u16,
    /// Upstream stream server
    pub target: String,
    pub target_port: u16,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    #[serde(skip_serializing)]
    pub password: String,
    pub auto_connect: bool,
    pub max_points: usize,
    pub window_seconds: f64,
    pub ack_queue: usize,
    pub render_interval_ms: u64,
    pub tick_interval_ms: u64,
    pub remote_poll_secs: u64,
    /// Upper bound for `/auth`, `/quality/stats` and the stream handshake
    pub connect_timeout_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            password: String::new(),
            auto_connect: true,
            max_points: DEFAULT_MAX_POINTS,
            window_seconds: DEFAULT_WINDOW_SECONDS,
            ack_queue: ACK_QUEUE_CAPACITY,
            render_interval_ms: RENDER_INTERVAL_MS,
            tick_interval_ms: TICK_INTERVAL_MS,
            remote_poll_secs: 15,
            connect_timeout_secs: 10,
        }
    }
}

impl StreamConfig {
    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            session: SessionSettings {
                max_points: self.max_points,
                render_interval: Duration::from_millis(self.render_interval_ms),
            },
            tick_interval: Duration::from_millis(self.tick_interval_ms.max(1)),
            ack_queue: self.ack_queue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_defaults_apply() {
        let json = r#"{
            "name": "PPG Monitor",
            "id": "ppg_monitor",
            "version": "0.1.0",
            "connection": {"ip": "127.0.0.1", "port": 0, "target": "127.0.0.1", "target_port": 8765},
            "stream": {"password": "secret", "max_points": 500}
        }"#;
        let config: MonitorConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.stream.max_points, 500);
        assert_eq!(config.stream.window_seconds, DEFAULT_WINDOW_SECONDS);
        assert!(config.stream.auto_connect);
        assert_eq!(config.stream.connect_timeout_secs, 10);

        let settings = config.stream.loop_settings();
        assert_eq!(settings.session.render_interval, Duration::from_millis(50));
        assert_eq!(settings.tick_interval, Duration::from_secs(1));

        let exposed = serde_json::to_value(&config).unwrap();
        assert!(exposed["stream"].get("password").is_none());
    }
}
