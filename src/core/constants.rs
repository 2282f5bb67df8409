// Stream and quality constants

/// Default capacity of the visualization buffer.
pub const DEFAULT_MAX_POINTS: usize = 10_000;

/// Number of latency observations kept for rolling statistics.
pub const LATENCY_WINDOW: usize = 100;

/// Number of points kept in the quality history (one per tick).
pub const HISTORY_CAPACITY: usize = 60;

/// Default display window, in seconds of signal time.
pub const DEFAULT_WINDOW_SECONDS: f64 = 10.0;

// Scheduling (milliseconds)
pub const RENDER_INTERVAL_MS: u64 = 50;
pub const TICK_INTERVAL_MS: u64 = 1_000;

// Outbound ack queue depth before acks are dropped
pub const ACK_QUEUE_CAPACITY: usize = 256;

// Session inbox depth
pub const INBOX_CAPACITY: usize = 1_024;

// Quality band thresholds (loss rate, percent)
pub const EXCELLENT_LOSS_PCT: f64 = 1.0;
pub const GOOD_LOSS_PCT: f64 = 5.0;

// Recommendation thresholds
pub const HIGH_LATENCY_MS: f64 = 100.0;
pub const MODERATE_LATENCY_MS: f64 = 50.0;
pub const HIGH_JITTER_MS: f64 = 20.0;

pub const CSV_HEADER: &str = "timestamp,raw,filtered";
