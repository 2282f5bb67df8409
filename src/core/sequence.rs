// Sequence gap detection

/// Infers loss from gaps in strictly increasing sequence numbers.
///
/// Duplicates and reordered packets are never counted and never reduce
/// the loss total.
#[derive(Debug, Clone, Default)]
pub struct SequenceTracker {
    last_seq: Option<u64>,
    packets_lost: u64,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `seq` and return the number of packets newly inferred lost.
    pub fn observe(&mut self, seq: u64) -> u64 {
        let lost = match self.last_seq {
            None => 0,
            Some(last) => {
                let expected = last.saturating_add(1);
                if seq > expected {
                    seq - expected
                } else {
                    0
                }
            }
        };

        self.packets_lost = self.packets_lost.saturating_add(lost);
        self.last_seq = Some(seq);
        lost
    }

    pub fn last_seq(&self) -> Option<u64> {
        self.last_seq
    }

    pub fn packets_lost(&self) -> u64 {
        self.packets_lost
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_gap() {
        let mut tracker = SequenceTracker::new();
        for seq in [1, 2, 3, 5, 6] {
            tracker.observe(seq);
        }
        assert_eq!(tracker.packets_lost(), 1);
        assert_eq!(tracker.last_seq(), Some(6));
    }

    #[test]
    fn test_first_observation_is_free() {
        let mut tracker = SequenceTracker::new();
        assert_eq!(tracker.observe(1_000), 0);
        assert_eq!(tracker.packets_lost(), 0);
    }

    #[test]
    fn test_reorder_and_duplicate_not_counted() {
        let mut tracker = SequenceTracker::new();
        assert_eq!(tracker.observe(10), 0);
        assert_eq!(tracker.observe(14), 3);
        // reordered late arrival, then duplicate
        assert_eq!(tracker.observe(12), 0);
        assert_eq!(tracker.observe(12), 0);
        // last_seq moved back to 12, so 15 reports 14 missing
        assert_eq!(tracker.observe(15), 2);
        assert_eq!(tracker.packets_lost(), 5);
        assert_eq!(tracker.last_seq(), Some(15));
    }

    #[test]
    fn test_extreme_sequence_numbers_saturate() {
        let mut tracker = SequenceTracker::new();
        assert_eq!(tracker.observe(0), 0);
        assert_eq!(tracker.observe(u64::MAX), u64::MAX - 1);
        assert_eq!(tracker.observe(0), 0);
        tracker.observe(u64::MAX);
        assert_eq!(tracker.packets_lost(), u64::MAX);
        assert_eq!(tracker.last_seq(), Some(u64::MAX));
    }

    #[test]
    fn test_loss_is_sum_of_positive_gaps() {
        let seqs = [3u64, 4, 9, 9, 7, 8, 20, 21, 2, 30];
        let mut tracker = SequenceTracker::new();
        let mut expected_total = 0;
        let mut previous_total = 0;
        let mut last: Option<u64> = None;

        for seq in seqs {
            if let Some(l) = last {
                if seq > l + 1 {
                    expected_total += seq - (l + 1);
                }
            }
            last = Some(seq);

            tracker.observe(seq);
            assert!(tracker.packets_lost() >= previous_total);
            previous_total = tracker.packets_lost();
        }

        assert_eq!(tracker.packets_lost(), expected_total);
    }
}
