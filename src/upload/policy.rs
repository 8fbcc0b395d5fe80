//! The retry/backoff policy: maps a ping's attempt history to what the
//! worker does next.

use std::time::Duration;

use crate::upload::UploadResult;

/// What the upload worker should do next with a ping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NextAction {
    /// Attempt the upload.
    Upload,
    /// Hold off for the given duration, then ask again.
    Wait(Duration),
    /// Stop processing this ping and drop it.
    Done,
}

/// The retry/backoff policy of the upload manager.
#[derive(Clone, Debug)]
pub struct Policy {
    /// How many recoverable failures one ping may accumulate before it is
    /// dropped.
    pub max_recoverable_failures: u32,
    /// How many consecutive waits one ping may be handed before it is
    /// dropped.
    pub max_wait_attempts: u32,
    /// The first retry delay; later retries double it.
    pub backoff_base: Duration,
    /// The retry delay is never longer than this.
    pub backoff_cap: Duration,
    /// How many pings may go out per rate-limiter window.
    pub max_pings_per_interval: u32,
    /// The rate-limiter window.
    pub rate_limiter_interval: Duration,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            max_recoverable_failures: 3,
            max_wait_attempts: 3,
            backoff_base: Duration::from_secs(15),
            backoff_cap: Duration::from_secs(120),
            max_pings_per_interval: 40,
            rate_limiter_interval: Duration::from_secs(60),
        }
    }
}

impl Policy {
    /// The backoff before retry number `failures` (1-based), exponential
    /// and capped.
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.saturating_sub(1));
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_cap)
    }

    /// Maps the attempt history of a ping to its next action.
    pub fn next_action(&self, failures: u32, last_result: Option<&UploadResult>) -> NextAction {
        match last_result {
            None => NextAction::Upload,
            Some(result) if result.is_success() || result.is_unrecoverable_failure() => {
                NextAction::Done
            }
            Some(_) if failures > self.max_recoverable_failures => NextAction::Done,
            Some(_) => NextAction::Wait(self.backoff(failures)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = Policy::default();
        assert_eq!(Duration::from_secs(15), policy.backoff(1));
        assert_eq!(Duration::from_secs(30), policy.backoff(2));
        assert_eq!(Duration::from_secs(60), policy.backoff(3));
        assert_eq!(Duration::from_secs(120), policy.backoff(4));
        assert_eq!(Duration::from_secs(120), policy.backoff(10));
    }

    #[test]
    fn actions_follow_the_attempt_history() {
        let policy = Policy::default();
        assert_eq!(NextAction::Upload, policy.next_action(0, None));
        assert_eq!(
            NextAction::Done,
            policy.next_action(0, Some(&UploadResult::Success))
        );
        assert_eq!(
            NextAction::Done,
            policy.next_action(1, Some(&UploadResult::HttpStatus(400)))
        );
        assert_eq!(
            NextAction::Wait(Duration::from_secs(15)),
            policy.next_action(1, Some(&UploadResult::HttpStatus(503)))
        );
        assert_eq!(
            NextAction::Wait(Duration::from_secs(30)),
            policy.next_action(2, Some(&UploadResult::RecoverableFailure))
        );
        assert_eq!(
            NextAction::Done,
            policy.next_action(4, Some(&UploadResult::HttpStatus(503)))
        );
    }
}
