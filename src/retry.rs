//! Retry / backoff policy.
//!
//! Exponential backoff with jitter and a ceiling, using `rand` for a
//! uniformly distributed jitter term.

use std::time::Duration;

use rand::Rng;

use crate::classify::ErrorKind;
use crate::config::EngineConfig;

/// `backoff(attempt) = min(MaxBackoff, BaseInterval * 2^attempt) + U[0, JitterMax)`.
///
/// `attempt` starts at 0 for the first retry after the initial try.
pub fn backoff(config: &EngineConfig, attempt: u32) -> Duration {
    let exp = config.base_interval.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    let capped = exp.min(config.max_backoff);
    let jitter = jitter(config.jitter_max);
    capped + jitter
}

fn jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let mut rng = rand::rng();
    let nanos = rng.random_range(0..max.as_nanos().max(1));
    Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
}

/// `should_retry(err_kind, attempt) := err_kind != Permanent && attempt < MaxRetries`.
pub fn should_retry(kind: ErrorKind, attempt: u32, config: &EngineConfig) -> bool {
    kind.should_retry(attempt, config.max_retries)
}

/// Compute the sleep duration for the next retry, honoring a `Retry-After`
/// hint when present and larger than the computed backoff.
pub fn backoff_with_retry_after(
    config: &EngineConfig,
    attempt: u32,
    retry_after: Option<Duration>,
) -> Duration {
    let computed = backoff(config, attempt);
    match retry_after {
        Some(hint) if hint > computed => hint,
        _ => computed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> EngineConfig {
        EngineConfig {
            base_interval: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            jitter_max: Duration::from_secs(1),
            max_retries: 3,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn backoff_is_monotonic_up_to_ceiling() {
        let config = cfg();
        let mut last = Duration::ZERO;
        for attempt in 0..20 {
            let d = backoff(&config, attempt).saturating_sub(config.jitter_max);
            assert!(d >= last, "attempt {attempt}: {d:?} < {last:?}");
            last = d;
        }
    }

    #[test]
    fn backoff_never_exceeds_ceiling_plus_jitter() {
        let config = cfg();
        for attempt in 0..50 {
            let d = backoff(&config, attempt);
            assert!(d <= config.max_backoff + config.jitter_max);
        }
    }

    #[test]
    fn backoff_does_not_overflow_on_large_attempt() {
        let config = cfg();
        let d = backoff(&config, u32::MAX);
        assert!(d <= config.max_backoff + config.jitter_max);
    }

    #[test]
    fn should_retry_respects_ceiling() {
        let config = cfg();
        assert!(should_retry(ErrorKind::Transient, 2, &config));
        assert!(!should_retry(ErrorKind::Transient, 3, &config));
        assert!(!should_retry(ErrorKind::Permanent, 0, &config));
    }

    #[test]
    fn retry_after_overrides_when_larger() {
        let config = cfg();
        let hint = Duration::from_secs(60);
        assert_eq!(backoff_with_retry_after(&config, 0, Some(hint)), hint);
    }

    #[test]
    fn retry_after_ignored_when_smaller_than_floor() {
        let config = cfg();
        let hint = Duration::from_millis(1);
        let d = backoff_with_retry_after(&config, 0, Some(hint));
        assert!(d >= config.base_interval);
    }
}
