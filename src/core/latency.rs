// Rolling latency and jitter statistics

use std::collections::VecDeque;

use crate::core::constants::LATENCY_WINDOW;

#[derive(Debug, Clone)]
pub struct LatencyJitterEstimator {
    window: VecDeque<f64>,
    capacity: usize,
}

impl LatencyJitterEstimator {
    pub fn new() -> Self {
        Self::with_capacity(LATENCY_WINDOW)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn observe(&mut self, latency_ms: f64) {
        self.window.push_back(latency_ms);
        if self.window.len() > self.capacity {
            self.window.pop_front();
        }
    }

    pub fn average(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.window.iter().sum::<f64>() / self.window.len() as f64
    }

    /// `(0.0, 0.0)` when nothing has been observed.
    pub fn min_max(&self) -> (f64, f64) {
        let mut iter = self.window.iter().copied();
        let first = match iter.next() {
            Some(v) => v,
            None => return (0.0, 0.0),
        };
        iter.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)))
    }

    /// Mean absolute difference between consecutive latencies in the window.
    pub fn jitter(&self) -> f64 {
        if self.window.len() < 2 {
            return 0.0;
        }
        let total: f64 = self
            .window
            .iter()
            .zip(self.window.iter().skip(1))
            .map(|(a, b)| (b - a).abs())
            .sum();
        total / (self.window.len() - 1) as f64
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

impl Default for LatencyJitterEstimator {
    fn default() -> Self {
        Self::new()
    }
}
