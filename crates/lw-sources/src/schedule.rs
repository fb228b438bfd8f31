//! Refresh scheduling: expiry clamping, retry backoff and jitter.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use lw_core::hash::murmur3_32;

const HOUR: Duration = Duration::from_secs(60 * 60);

/// Timing knobs for source refreshes. Durations are given in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulePolicy {
    /// Lower bound applied to a list's declared expiry.
    #[serde(with = "secs")]
    pub min_expiry: Duration,
    /// Upper bound applied to a list's declared expiry.
    #[serde(with = "secs")]
    pub max_expiry: Duration,
    /// Random delay in `[0, max_jitter)` added to every schedule.
    #[serde(with = "secs")]
    pub max_jitter: Duration,
    /// Delay before retrying after a failed fetch.
    #[serde(with = "secs")]
    pub fail_retry: Duration,
    /// Delay for the first fetch of a source that is already due.
    #[serde(with = "secs")]
    pub initial_delay: Duration,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self {
            min_expiry: 6 * HOUR,
            max_expiry: 14 * 24 * HOUR,
            max_jitter: Duration::from_secs(30 * 60),
            fail_retry: 6 * HOUR,
            initial_delay: Duration::from_secs(60),
        }
    }
}

impl SchedulePolicy {
    pub fn clamp_expiry(&self, expires: Duration) -> Duration {
        expires.clamp(self.min_expiry, self.max_expiry.max(self.min_expiry))
    }

    /// Next fetch after a successful compile at `now`.
    pub fn next_after_success(
        &self,
        now: SystemTime,
        expires: Duration,
        jitter: &dyn Jitter,
    ) -> SystemTime {
        now + self.clamp_expiry(expires) + jitter.sample(self.max_jitter)
    }

    /// Next fetch after a failed attempt at `now`.
    pub fn next_after_failure(&self, now: SystemTime, jitter: &dyn Jitter) -> SystemTime {
        now + self.fail_retry + jitter.sample(self.max_jitter)
    }

    /// Schedule for a source that has none yet. May lie in the past.
    pub fn initial_next_fetch(
        &self,
        last_update: SystemTime,
        expires: Duration,
        jitter: &dyn Jitter,
    ) -> SystemTime {
        last_update + self.clamp_expiry(expires) + jitter.sample(self.max_jitter)
    }

    /// Delay used instead of "now" when a source is due at startup.
    pub fn startup_delay(&self, jitter: &dyn Jitter) -> Duration {
        self.initial_delay + jitter.sample(self.max_jitter)
    }
}

/// Source of schedule jitter.
pub trait Jitter: Send + Sync {
    /// A duration in `[0, max)`, or zero when `max` is zero.
    fn sample(&self, max: Duration) -> Duration;
}

/// Clock-seeded jitter, mixed through murmur3.
#[derive(Debug, Default)]
pub struct RandomJitter {
    counter: AtomicU32,
}

impl RandomJitter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Jitter for RandomJitter {
    fn sample(&self, max: Duration) -> Duration {
        let max_nanos = max.as_nanos().min(u64::MAX as u128) as u64;
        if max_nanos == 0 {
            return Duration::ZERO;
        }

        let clock = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        let count = self.counter.fetch_add(1, Ordering::Relaxed);
        let hash = murmur3_32(&clock.to_le_bytes(), count);

        let nanos = (u128::from(hash) * u128::from(max_nanos)) >> 32;
        Duration::from_nanos(nanos as u64)
    }
}

/// Always returns the same fraction of the allowed range.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub Duration);

impl Jitter for FixedJitter {
    fn sample(&self, max: Duration) -> Duration {
        if max.is_zero() {
            Duration::ZERO
        } else {
            self.0.min(max - Duration::from_nanos(1))
        }
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    #[test]
    fn expiry_is_clamped() {
        let policy = SchedulePolicy::default();
        assert_eq!(policy.clamp_expiry(Duration::from_secs(60)), 6 * HOUR);
        assert_eq!(policy.clamp_expiry(4 * DAY), 4 * DAY);
        assert_eq!(policy.clamp_expiry(60 * DAY), 14 * DAY);
    }

    #[test]
    fn success_and_failure_schedules() {
        let policy = SchedulePolicy::default();
        let now = SystemTime::UNIX_EPOCH + 1000 * DAY;
        let jitter = FixedJitter(Duration::from_secs(90));

        assert_eq!(
            policy.next_after_success(now, 4 * DAY, &jitter),
            now + 4 * DAY + Duration::from_secs(90)
        );
        assert_eq!(
            policy.next_after_failure(now, &jitter),
            now + 6 * HOUR + Duration::from_secs(90)
        );
        assert_eq!(policy.startup_delay(&jitter), Duration::from_secs(150));
    }

    #[test]
    fn initial_schedule_counts_from_last_update() {
        let policy = SchedulePolicy::default();
        let last_update = SystemTime::UNIX_EPOCH + 1000 * DAY;
        let jitter = FixedJitter(Duration::from_secs(90));
        let jittered = Duration::from_secs(90);

        assert_eq!(
            policy.initial_next_fetch(last_update, 2 * DAY, &jitter),
            last_update + 2 * DAY + jittered
        );
        assert_eq!(
            policy.initial_next_fetch(last_update, Duration::from_secs(60), &jitter),
            last_update + 6 * HOUR + jittered
        );
        assert_eq!(
            policy.initial_next_fetch(last_update, 30 * DAY, &jitter),
            last_update + 14 * DAY + jittered
        );
        assert_eq!(
            policy.initial_next_fetch(SystemTime::UNIX_EPOCH, 2 * DAY, &FixedJitter(Duration::ZERO)),
            SystemTime::UNIX_EPOCH + 2 * DAY
        );
    }

    #[test]
    fn random_jitter_stays_in_range() {
        let jitter = RandomJitter::new();
        let max = Duration::from_secs(30 * 60);
        for _ in 0..1000 {
            assert!(jitter.sample(max) < max);
        }
        assert_eq!(jitter.sample(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn fixed_jitter_respects_bound() {
        let jitter = FixedJitter(Duration::from_secs(3600));
        assert!(jitter.sample(Duration::from_secs(60)) < Duration::from_secs(60));
        assert_eq!(jitter.sample(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn policy_reads_partial_overrides() {
        let policy: SchedulePolicy =
            serde_json::from_str(r#"{"fail_retry": 600, "initial_delay": 5}"#).unwrap();
        assert_eq!(policy.fail_retry, Duration::from_secs(600));
        assert_eq!(policy.initial_delay, Duration::from_secs(5));
        assert_eq!(policy.min_expiry, SchedulePolicy::default().min_expiry);
    }
}
