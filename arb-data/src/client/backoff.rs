use std::time::Duration;

/// Exponential backoff policy for exchange WebSocket reconnection (component design §4.1).
///
/// `retry_cap` bounds the number of consecutive failed attempts before the client gives up and
/// emits [`crate::client::ClientEvent::MaxRetriesReached`]; `canRetry` gates every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectionBackoffPolicy {
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub retry_cap: u32,
}

impl Default for ReconnectionBackoffPolicy {
    fn default() -> Self {
        Self {
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            retry_cap: 10,
        }
    }
}

/// Mutable state threaded through a client's reconnect loop: tracks the current backoff duration
/// and attempt count against the policy's retry cap.
#[derive(Debug, Clone)]
pub struct ReconnectionState {
    policy: ReconnectionBackoffPolicy,
    backoff_current: Duration,
    attempt: u32,
}

impl From<ReconnectionBackoffPolicy> for ReconnectionState {
    fn from(policy: ReconnectionBackoffPolicy) -> Self {
        Self {
            backoff_current: policy.backoff_initial,
            attempt: 0,
            policy,
        }
    }
}

impl ReconnectionState {
    pub fn reset(&mut self) {
        self.backoff_current = self.policy.backoff_initial;
        self.attempt = 0;
    }

    /// Whether another reconnect attempt is permitted under the retry cap.
    pub fn can_retry(&self) -> bool {
        self.attempt < self.policy.retry_cap
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Record an attempt and compute the backoff to sleep before the *next* one, doubling the
    /// current duration and capping at `backoff_max`.
    pub fn next_backoff(&mut self) -> Duration {
        self.attempt += 1;
        let current = self.backoff_current;
        self.backoff_current = std::cmp::min(current * 2, self.policy.backoff_max);
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = ReconnectionBackoffPolicy {
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(10),
            retry_cap: 10,
        };
        let mut state = ReconnectionState::from(policy);

        assert_eq!(state.next_backoff(), Duration::from_secs(1));
        assert_eq!(state.next_backoff(), Duration::from_secs(2));
        assert_eq!(state.next_backoff(), Duration::from_secs(4));
        assert_eq!(state.next_backoff(), Duration::from_secs(8));
        assert_eq!(state.next_backoff(), Duration::from_secs(10));
    }

    #[test]
    fn test_retry_cap_gates_further_attempts() {
        let policy = ReconnectionBackoffPolicy {
            backoff_initial: Duration::from_millis(1),
            backoff_max: Duration::from_millis(10),
            retry_cap: 3,
        };
        let mut state = ReconnectionState::from(policy);

        for _ in 0..3 {
            assert!(state.can_retry());
            state.next_backoff();
        }
        assert!(!state.can_retry());
    }

    #[test]
    fn test_reset_restores_initial_backoff() {
        let policy = ReconnectionBackoffPolicy::default();
        let mut state = ReconnectionState::from(policy);
        state.next_backoff();
        state.next_backoff();
        state.reset();

        assert_eq!(state.attempt(), 0);
        assert!(state.can_retry());
    }
}
