// Bounded visualization buffer

use std::collections::VecDeque;

use crate::core::format::Sample;

/// FIFO store of the most recent samples, in arrival order.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl SampleBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity.min(4_096)),
            capacity,
        }
    }

    /// Pause is the caller's concern; this always stores.
    pub fn append(&mut self, sample: Sample) {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Samples with `timestamp >= latest - window_seconds`, where `latest`
    /// is the timestamp of the most recently appended sample.
    pub fn window_view(&self, window_seconds: f64) -> Vec<Sample> {
        let latest = match self.samples.back() {
            Some(s) => s.timestamp,
            None => return Vec::new(),
        };
        let start = latest - window_seconds;

        self.samples
            .iter()
            .filter(|s| s.timestamp >= start)
            .copied()
            .collect()
    }

    /// Sample rate over the buffered span, as shown in the info bar.
    pub fn effective_rate_hz(&self) -> Option<f64> {
        if self.samples.len() < 2 {
            return None;
        }
        let first = self.samples.front()?.timestamp;
        let last = self.samples.back()?.timestamp;
        let span = last - first;
        if span <= 0.0 {
            return None;
        }
        Some(self.samples.len() as f64 / span)
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
