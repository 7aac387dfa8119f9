use std::time::Duration;

use rand::Rng;

/// Exponential backoff with jitter, bounded by policy min/max.
///
/// The jittered delay for attempt `n` lands in `[base/2, base]` where
/// `base = min(min_ms << n, max_ms)`, so concurrent devices never
/// synchronize their retries.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    min: Duration,
    max: Duration,
}

impl BackoffPolicy {
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        let min_ms = min_ms.max(1);
        Self {
            min: Duration::from_millis(min_ms),
            max: Duration::from_millis(max_ms.max(min_ms)),
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self
            .min
            .checked_mul(1u32 << attempt.min(20))
            .unwrap_or(self.max)
            .min(self.max);
        let base_ms = base.as_millis() as u64;
        let jittered = rand::thread_rng().gen_range(base_ms / 2..=base_ms.max(1));
        Duration::from_millis(jittered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_is_bounded() {
        let backoff = BackoffPolicy::new(100, 5_000);
        for attempt in 0..16 {
            let delay = backoff.delay(attempt);
            assert!(delay >= Duration::from_millis(50));
            assert!(delay <= Duration::from_millis(5_000));
        }
    }

    #[test]
    fn test_delay_grows_with_attempts() {
        let backoff = BackoffPolicy::new(100, 60_000);
        // Attempt 4 has base 1600ms, so even fully jittered it exceeds the
        // attempt-0 ceiling of 100ms.
        assert!(backoff.delay(4) >= Duration::from_millis(800));
        assert!(backoff.delay(0) <= Duration::from_millis(100));
    }
}
