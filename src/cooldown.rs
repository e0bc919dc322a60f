use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::model::TargetKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied { remaining: Duration },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// Last successful submission per target. Checking never records; callers
/// record only once the store has accepted the write.
#[derive(Debug, Default)]
pub struct RateLimiter {
    last_success: Mutex<HashMap<TargetKey, DateTime<Utc>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, key: &TargetKey, now: DateTime<Utc>, cooldown: Duration) -> Decision {
        let last = self.last_success.lock().get(key).copied();
        let Some(last) = last else {
            return Decision::Allowed;
        };
        // A clock that moved backwards counts as no time elapsed.
        let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
        match cooldown.checked_sub(elapsed) {
            Some(remaining) if !remaining.is_zero() => Decision::Denied { remaining },
            _ => Decision::Allowed,
        }
    }

    pub fn record_success(&self, key: TargetKey, now: DateTime<Utc>) {
        self.last_success.lock().insert(key, now);
    }

    pub fn last_success(&self, key: &TargetKey) -> Option<DateTime<Utc>> {
        self.last_success.lock().get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.last_success.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(8);

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(millis).unwrap()
    }

    fn key() -> TargetKey {
        TargetKey::Comment("p1".into())
    }

    #[test]
    fn unknown_key_is_allowed() {
        let limiter = RateLimiter::new();
        assert_eq!(limiter.check(&key(), at(0), COOLDOWN), Decision::Allowed);
        assert!(limiter.is_empty());
    }

    #[test]
    fn checking_does_not_record() {
        let limiter = RateLimiter::new();
        limiter.check(&key(), at(0), COOLDOWN);
        assert_eq!(limiter.check(&key(), at(1), COOLDOWN), Decision::Allowed);
        assert_eq!(limiter.last_success(&key()), None);
    }

    #[test]
    fn remaining_shrinks_to_zero_at_boundary() {
        let limiter = RateLimiter::new();
        limiter.record_success(key(), at(0));

        let mut previous = COOLDOWN + Duration::from_millis(1);
        for millis in [0, 1_000, 3_000, 7_999] {
            match limiter.check(&key(), at(millis), COOLDOWN) {
                Decision::Denied { remaining } => {
                    assert!(remaining < previous);
                    assert_eq!(remaining, COOLDOWN - Duration::from_millis(millis as u64));
                    previous = remaining;
                }
                Decision::Allowed => panic!("allowed at {millis}ms"),
            }
        }
        assert_eq!(limiter.check(&key(), at(8_000), COOLDOWN), Decision::Allowed);
    }

    #[test]
    fn keys_do_not_share_a_budget() {
        let limiter = RateLimiter::new();
        limiter.record_success(key(), at(0));
        assert!(limiter
            .check(&TargetKey::Reply("p1".into()), at(1), COOLDOWN)
            .is_allowed());
        assert!(limiter
            .check(&TargetKey::Comment("p2".into()), at(1), COOLDOWN)
            .is_allowed());
    }

    #[test]
    fn backwards_clock_keeps_full_cooldown() {
        let limiter = RateLimiter::new();
        limiter.record_success(key(), at(10_000));
        assert_eq!(
            limiter.check(&key(), at(9_000), COOLDOWN),
            Decision::Denied {
                remaining: COOLDOWN
            }
        );
    }
}
