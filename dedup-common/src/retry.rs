use std::time;

/// Backoff policy used when a group mutation loses an optimistic concurrency
/// race and must be retried against the freshly-read group state.
#[derive(Copy, Clone, Debug)]
pub struct RetryPolicy {
    /// Coefficient to multiply initial_interval with for every past attempt.
    backoff_coefficient: u32,
    /// The backoff interval for the first retry.
    initial_interval: time::Duration,
    /// The maximum possible backoff between retries.
    maximum_interval: Option<time::Duration>,
    /// The maximum number of attempts before giving up and surfacing a conflict error.
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(
        backoff_coefficient: u32,
        initial_interval: time::Duration,
        maximum_interval: Option<time::Duration>,
        max_attempts: u32,
    ) -> Self {
        Self {
            backoff_coefficient,
            initial_interval,
            maximum_interval,
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Calculate the time to wait before a given retry attempt (0-indexed).
    pub fn time_until_next_retry(&self, attempt: u32) -> time::Duration {
        let candidate_interval = self.initial_interval * self.backoff_coefficient.pow(attempt);

        match self.maximum_interval {
            Some(max_interval) => std::cmp::min(candidate_interval, max_interval),
            None => candidate_interval,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_coefficient: 2,
            initial_interval: time::Duration::from_millis(20),
            maximum_interval: Some(time::Duration::from_secs(1)),
            max_attempts: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::new(
            2,
            time::Duration::from_millis(10),
            Some(time::Duration::from_millis(30)),
            5,
        );

        assert_eq!(policy.time_until_next_retry(0), time::Duration::from_millis(10));
        assert_eq!(policy.time_until_next_retry(1), time::Duration::from_millis(20));
        assert_eq!(policy.time_until_next_retry(2), time::Duration::from_millis(30));
        assert_eq!(policy.time_until_next_retry(3), time::Duration::from_millis(30));
    }
}
