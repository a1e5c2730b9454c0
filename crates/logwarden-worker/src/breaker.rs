use std::time::Duration;

/// Throttles the worker after consecutive failed cycles
#[derive(Clone, Debug)]
pub struct CircuitBreaker {
    consecutive_failures: u32,
    base_delay: Duration,
    max_delay: Duration,
    trip_threshold: u32,
    cooldown: Duration,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self {
            consecutive_failures: 0,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            trip_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Count a failed cycle and return how long to pause before the next one.
    /// Reaching the threshold adds the cooldown and starts counting afresh.
    pub fn record_failure(&mut self) -> Duration {
        self.consecutive_failures += 1;
        let factor = 2u32.saturating_pow(self.consecutive_failures - 1);
        let mut delay = self.base_delay.saturating_mul(factor).min(self.max_delay);

        if self.consecutive_failures >= self.trip_threshold {
            delay += self.cooldown;
            self.consecutive_failures = 0;
        }
        delay
    }
}
