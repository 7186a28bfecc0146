use std::time::Instant;

/// A sliding-windowed throughput counter (byte/packet/message rates).
///
/// Per spec.md §1 this is an opaque collaborator: [`Endpoint`](crate::Endpoint)
/// feeds it but no invariant in this crate depends on its output. Ported
/// from the Python source's `Measurement`.
#[derive(Debug)]
pub struct Measurement {
    interval: f64,
    interval_count: usize,
    samples: Vec<u64>,
    current_interval: u64,
    total_sample_count: u64,
    total: u64,
    beginning: Option<Instant>,
}

impl Measurement {
    /// # Panics
    /// Panics if `interval` is not positive or `interval_count` is zero.
    pub fn new(interval: f64, interval_count: usize) -> Self {
        assert!(interval > 0.0, "interval must be a positive value");
        assert!(interval_count > 0, "interval_count must be a positive integer");
        Self {
            interval,
            interval_count,
            samples: Vec::new(),
            current_interval: 0,
            total_sample_count: 0,
            total: 0,
            beginning: None,
        }
    }

    pub fn add(&mut self, value: u64) {
        if self.beginning.is_none() {
            self.beginning = Some(Instant::now());
        }
        self.roll();
        self.current_interval += value;
        self.total += value;
    }

    fn roll(&mut self) {
        let Some(beginning) = self.beginning else {
            return;
        };
        let elapsed = beginning.elapsed().as_secs_f64();
        let dt = elapsed - self.total_sample_count as f64 * self.interval;
        let n = (dt / self.interval).floor() as i64;
        if n > 0 {
            self.samples.push(self.current_interval);
            for _ in 1..n {
                self.samples.push(0);
            }
            self.current_interval = 0;
            let keep_from = self.samples.len().saturating_sub(self.interval_count);
            self.samples.drain(..keep_from);
            self.total_sample_count += n as u64;
        }
    }

    /// Average rate since the first sample was recorded.
    pub fn average(&self) -> f64 {
        match self.beginning {
            Some(beginning) => {
                let elapsed = beginning.elapsed().as_secs_f64();
                if elapsed == 0.0 {
                    self.total as f64
                } else {
                    self.total as f64 / elapsed
                }
            }
            None => 0.0,
        }
    }

    /// Rate over the rolling window only.
    pub fn current(&mut self) -> f64 {
        self.roll();
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.samples.iter().sum();
        sum as f64 / (self.samples.len() as f64 * self.interval)
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn is_running(&self) -> bool {
        self.beginning.is_some()
    }
}

impl Default for Measurement {
    fn default() -> Self {
        Self::new(1.0, 6)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn starts_idle() {
        let m = Measurement::default();
        assert!(!m.is_running());
        assert_eq!(m.total(), 0);
        assert_eq!(m.average(), 0.0);
    }

    #[test]
    fn add_starts_the_clock_and_accumulates() {
        let mut m = Measurement::default();
        m.add(100);
        m.add(50);
        assert!(m.is_running());
        assert_eq!(m.total(), 150);
    }
}
