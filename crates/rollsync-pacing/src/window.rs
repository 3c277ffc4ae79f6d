//! Bounded window of recent round-trip latencies.

use std::collections::VecDeque;
use std::time::Duration;

/// The last `capacity` latency samples, oldest first.
///
/// Only the arithmetic mean is ever read, so samples are stored as
/// milliseconds.
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl LatencyWindow {
    /// Creates an empty window. A capacity of 0 is raised to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a sample, evicting the oldest once full.
    pub fn push(&mut self, latency: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(latency.as_secs_f64() * 1000.0);
    }

    /// Mean of the samples in milliseconds, or `None` when empty.
    pub fn mean_ms(&self) -> Option<f64> {
        if self.samples.is_empty() {
            None
        } else {
            Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
        }
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
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_mean_ms_empty_is_none() {
        assert_eq!(LatencyWindow::new(10).mean_ms(), None);
    }

    #[test]
    fn test_push_evicts_oldest_when_full() {
        let mut w = LatencyWindow::new(3);
        for n in [100, 200, 300, 400] {
            w.push(ms(n));
        }
        assert_eq!(w.len(), 3);
        assert!((w.mean_ms().unwrap() - 300.0).abs() < 1e-9);
    }

    #[test]
    fn test_new_zero_capacity_is_raised_to_one() {
        let mut w = LatencyWindow::new(0);
        w.push(ms(10));
        w.push(ms(20));
        assert_eq!(w.capacity(), 1);
        assert!((w.mean_ms().unwrap() - 20.0).abs() < 1e-9);
    }
}
