use std::time::Duration;

/// Exponential backoff policy.
///
/// - initial_delay: base delay for attempt 0
/// - multiplier: factor by which delay grows each attempt (> 1.0)
/// - max_delay: cap for the computed delay
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    pub const fn new(initial_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            multiplier,
            max_delay,
        }
    }

    pub fn next_delay(&self, attempt: u32) -> Duration {
        let pow = self.multiplier.powi(attempt as i32);
        let scaled = if pow.is_finite() {
            self.initial_delay.mul_f64(pow)
        } else {
            self.max_delay
        };
        scaled.min(self.max_delay)
    }

    /// The delay before retrying `attempt`, preferring the server's hint when
    /// one was given. Hints are capped to `max_delay` as well.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(hint) => hint.min(self.max_delay),
            None => self.next_delay(attempt),
        }
    }
}

impl Default for BackoffPolicy {
    /// Starts at 100ms and doubles up to 30 seconds.
    fn default() -> Self {
        Self::new(Duration::from_millis(100), 2.0, Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_progression_and_cap() {
        let p = BackoffPolicy::default();

        let cases = vec![
            (0, 100),
            (1, 200),
            (2, 400),
            (5, 3200),
            (8, 25600),
            (9, 30000), // 51200 capped to 30000
            (40, 30000),
        ];

        for (attempt, expected_ms) in cases {
            let d = p.next_delay(attempt);
            assert_eq!(d.as_millis(), expected_ms, "attempt {attempt}");
        }
    }

    #[test]
    fn test_custom_policy_progression() {
        let p = BackoffPolicy::new(Duration::from_secs(5), 3.0, Duration::from_secs(70));
        let cases = vec![
            (0, 5),  // 5
            (1, 15), // 5*3
            (2, 45), // 5*9
            (3, 70), // 5*27=135 -> cap 70
            (4, 70),
        ];
        for (attempt, expected_secs) in cases {
            let d = p.next_delay(attempt);
            assert_eq!(d.as_secs(), expected_secs, "attempt {attempt}");
        }
    }

    #[test]
    fn test_retry_after_hint_is_preferred_and_capped() {
        let p = BackoffPolicy::new(Duration::from_secs(1), 2.0, Duration::from_secs(10));

        assert_eq!(
            p.delay_for(0, Some(Duration::from_secs(3))),
            Duration::from_secs(3)
        );
        assert_eq!(
            p.delay_for(0, Some(Duration::from_secs(120))),
            Duration::from_secs(10)
        );
        assert_eq!(p.delay_for(2, None), Duration::from_secs(4));
    }

    #[test]
    fn test_zero_policy_never_waits() {
        let p = BackoffPolicy::new(Duration::ZERO, 1.0, Duration::ZERO);
        for attempt in 0..5 {
            assert_eq!(p.next_delay(attempt), Duration::ZERO);
        }
    }
}
