//! Retry Scheduler: exponential backoff and terminal-failure decision.
//!
//! No I/O: time comes in through `Clock`, so schedules are testable exactly.

use chrono::{DateTime, TimeDelta, Utc};
use std::{sync::Mutex, time::Duration};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(5 * 60);

/// Caps the exponent so the multiplication cannot overflow.
const MAX_BACKOFF_EXPONENT: u32 = 30;

/// Source of "now" for the engine.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let delta = TimeDelta::from_std(by).unwrap_or(TimeDelta::MAX);
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now = now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

/// Outcome of one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    /// Attempt count after this failure.
    pub attempts: u32,
    /// Retry budget exhausted; the record becomes `Failed`.
    pub terminal: bool,
    /// Backoff for this attempt number, `base * 2^(attempts - 1)`.
    pub delay: Duration,
    /// `now + delay`, only when not terminal.
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    pub fn delay_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        self.base_delay.saturating_mul(2u32.saturating_pow(exponent))
    }

    pub fn decide(&self, attempts_so_far: u32, now: DateTime<Utc>) -> RetryDecision {
        let attempts = attempts_so_far.saturating_add(1);
        let delay = self.delay_for(attempts);
        let terminal = attempts >= self.max_attempts;
        let next_retry_at = (!terminal).then(|| {
            let delta = TimeDelta::from_std(delay).unwrap_or(TimeDelta::MAX);
            now.checked_add_signed(delta)
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        });

        RetryDecision {
            attempts,
            terminal,
            delay,
            next_retry_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn default_schedule_is_5_10_then_terminal() {
        let policy = RetryPolicy::default();
        let now = Utc::now();

        let decisions: Vec<_> = (0..3).map(|so_far| policy.decide(so_far, now)).collect();

        let delays: Vec<_> = decisions.iter().map(|d| d.delay).collect();
        assert_eq!(delays, vec![5 * MINUTE, 10 * MINUTE, 20 * MINUTE]);
        let terminal: Vec<_> = decisions.iter().map(|d| d.terminal).collect();
        assert_eq!(terminal, vec![false, false, true]);
        let attempts: Vec<_> = decisions.iter().map(|d| d.attempts).collect();
        assert_eq!(attempts, vec![1, 2, 3]);
    }

    #[test]
    fn next_retry_is_strictly_in_the_future() {
        let policy = RetryPolicy::default();
        let now = Utc::now();
        let decision = policy.decide(0, now);
        assert_eq!(
            decision.next_retry_at,
            Some(now + TimeDelta::minutes(5))
        );
        assert!(decision.next_retry_at.unwrap() > now);
        assert_eq!(policy.decide(2, now).next_retry_at, None);
    }

    #[test]
    fn huge_attempt_counts_saturate() {
        let policy = RetryPolicy::new(u32::MAX, Duration::from_secs(300));
        let decision = policy.decide(u32::MAX - 1, Utc::now());
        assert!(decision.terminal);
        assert!(policy.delay_for(1_000) >= policy.delay_for(31));
    }

    #[test]
    fn manual_clock_advances() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        clock.advance(MINUTE);
        assert_eq!(clock.now(), start + TimeDelta::minutes(1));
    }
}
