// PPG stream quality monitor
// Main library entry point

pub mod core;

// Re-export main types
pub use crate::core::error::{MonitorError, Result};
pub use crate::core::format::{Ack, HistoryPoint, QualityBand, QualitySnapshot, Sample, SnapshotNotice};
pub use crate::core::session::{SessionSettings, SessionState, StreamSession};
pub use crate::core::session_loop::{spawn_session, LoopSettings, QualityView, SessionHandle};
pub use crate::core::data_handle::{connect_stream, handle_ws_live, handle_ws_stream};

#[cfg(test)]
mod tests {
    #[test]
    fn test_constants() {
        use crate::core::constants::*;
        assert_eq!(DEFAULT_MAX_POINTS, 10_000);
        assert_eq!(LATENCY_WINDOW, 100);
        assert_eq!(HISTORY_CAPACITY, 60);
        assert_eq!(CSV_HEADER, "timestamp,raw,filtered");
    }
}
