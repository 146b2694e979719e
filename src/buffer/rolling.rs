use std::collections::VecDeque;

/// Fixed-capacity FIFO of the most recent samples.
pub struct RollingBuffer {
    samples: VecDeque<f64>,
    capacity: usize,
    evicted: u64,
}

impl RollingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            evicted: 0,
        }
    }

    /// Sizes the buffer to hold `window_secs` of samples at `sample_rate`.
    pub fn for_window(sample_rate: f64, window_secs: f64) -> Self {
        Self::new((sample_rate * window_secs).round() as usize)
    }

    pub fn push(&mut self, sample: f64) {
        self.samples.push_back(sample);
        self.evict_old();
    }

    fn evict_old(&mut self) {
        while self.samples.len() > self.capacity {
            if self.samples.pop_front().is_some() {
                self.evicted += 1;
            } else {
                break;
            }
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

    /// True once at least half of the nominal capacity is filled.
    pub fn is_half_full(&self) -> bool {
        self.len() * 2 >= self.capacity
    }

    pub fn mean(&self) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.len() as f64)
    }

    /// The last `n` samples in arrival order, or `None` if fewer are held.
    pub fn tail(&self, n: usize) -> Option<Vec<f64>> {
        let len = self.samples.len();
        if len < n {
            return None;
        }
        Some(self.samples.range(len - n..).copied().collect())
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.samples.iter().copied().collect()
    }

    /// Number of samples dropped from the front so far.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}
