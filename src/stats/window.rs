//! Fixed-capacity window of recent latency samples

use std::collections::VecDeque;

/// Rolling window over the most recent latency samples, in milliseconds.
///
/// Pushing into a full window evicts the oldest sample.
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl LatencyWindow {
    pub fn new() -> Self {
        Self::with_capacity(crate::defaults::LATENCY_WINDOW)
    }

    /// Create a window holding at most `capacity` samples (at least one)
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, latency_ms: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(latency_ms);
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

    /// Oldest sample still held
    pub fn oldest(&self) -> Option<f64> {
        self.samples.front().copied()
    }

    pub fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    pub fn min(&self) -> Option<f64> {
        self.samples.iter().copied().reduce(f64::min)
    }

    pub fn max(&self) -> Option<f64> {
        self.samples.iter().copied().reduce(f64::max)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl Default for LatencyWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_window() {
        let window = LatencyWindow::new();
        assert!(window.is_empty());
        assert_eq!(window.average(), None);
        assert_eq!(window.min(), None);
        assert_eq!(window.max(), None);
    }

    #[test]
    fn test_evicts_oldest_first() {
        let mut window = LatencyWindow::new();
        for i in 0..1500 {
            window.push(i as f64);
        }

        assert_eq!(window.len(), 1000);
        assert_eq!(window.oldest(), Some(500.0));
        assert_eq!(window.min(), Some(500.0));
        assert_eq!(window.max(), Some(1499.0));
        assert_eq!(window.average(), Some(999.5));
    }

    #[test]
    fn test_summary_values() {
        let mut window = LatencyWindow::with_capacity(4);
        for value in [12.0, 3.0, 9.0] {
            window.push(value);
        }
        assert_eq!(window.average(), Some(8.0));
        assert_eq!(window.min(), Some(3.0));
        assert_eq!(window.max(), Some(12.0));

        window.clear();
        assert!(window.is_empty());
    }

    proptest! {
        #[test]
        fn prop_window_never_exceeds_capacity(
            capacity in 1usize..64,
            samples in proptest::collection::vec(0.0f64..10_000.0, 0..256),
        ) {
            let mut window = LatencyWindow::with_capacity(capacity);
            for sample in &samples {
                window.push(*sample);
                prop_assert!(window.len() <= capacity);
            }

            let kept = samples.len().min(capacity);
            prop_assert_eq!(window.len(), kept);
            if kept > 0 {
                prop_assert_eq!(window.oldest(), Some(samples[samples.len() - kept]));
            }
        }
    }
}
