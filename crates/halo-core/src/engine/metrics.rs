use std::time::Duration;

/// Per-generation throughput counters. Reset at every `start_completion`.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    elapsed: Duration,
    n_tokens: usize,
}

impl Metrics {
    pub fn reset(&mut self) {
        self.elapsed = Duration::ZERO;
        self.n_tokens = 0;
    }

    /// Count one emitted token that took `spent` from sample to piece.
    pub fn record(&mut self, spent: Duration) {
        self.elapsed += spent;
        self.n_tokens += 1;
    }

    #[inline]
    pub fn n_tokens(&self) -> usize {
        self.n_tokens
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn tokens_per_second(&self) -> f32 {
        let secs = self.elapsed.as_secs_f32();
        if self.n_tokens == 0 || secs <= 0.0 {
            0.0
        } else {
            self.n_tokens as f32 / secs
        }
    }
}
