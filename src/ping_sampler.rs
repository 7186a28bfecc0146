use std::collections::VecDeque;
use std::time::Duration;

/// A bounded ring of recent RTT samples yielding an average.
///
/// Ported from the Python source's `PingSampler`: a fixed-capacity window
/// that drops the oldest sample once full, plus an `average` that is
/// undefined (here `None`) until at least one sample has arrived.
#[derive(Debug)]
pub struct PingSampler {
    capacity: usize,
    samples: VecDeque<Duration>,
}

impl PingSampler {
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "PingSampler capacity must be positive");
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, sample: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn average(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let total: Duration = self.samples.iter().sum();
        Some(total / self.samples.len() as u32)
    }
}

impl Default for PingSampler {
    fn default() -> Self {
        Self::new(5)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn average_is_none_when_empty() {
        let sampler = PingSampler::new(5);
        assert_eq!(sampler.average(), None);
    }

    #[test]
    fn average_over_window() {
        let mut sampler = PingSampler::new(2);
        sampler.push(Duration::from_millis(100));
        sampler.push(Duration::from_millis(200));
        sampler.push(Duration::from_millis(300));
        // oldest sample (100ms) was evicted
        assert_eq!(sampler.len(), 2);
        assert_eq!(sampler.average(), Some(Duration::from_millis(250)));
    }
}
