//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

use super::profile::ResilienceProfile;

/// Compute the backoff delay for a 1-indexed attempt number, per the
/// `min(max, min_backoff * multiplier^(attempt-1))` rule, with up to ±10%
/// jitter layered on top.
pub fn backoff_delay(profile: &ResilienceProfile, attempt: u32) -> Duration {
    let base_ms = profile.backoff_min.as_secs_f64() * 1000.0;
    let mult = profile.backoff_multiplier.powi((attempt.saturating_sub(1)) as i32);
    let max_ms = profile.backoff_max.as_secs_f64() * 1000.0;
    let backoff_ms = (base_ms * mult).min(max_ms).max(0.0);

    let jitter_fraction = rand::thread_rng().gen_range(-0.1..=0.1);
    let jittered_ms = (backoff_ms * (1.0 + jitter_fraction)).max(0.0);

    Duration::from_secs_f64(jittered_ms / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::profile::DependencyKind;

    #[test]
    fn backoff_never_exceeds_configured_max() {
        let profile = DependencyKind::Llm.profile();
        for attempt in 1..=10 {
            let d = backoff_delay(&profile, attempt);
            assert!(d <= profile.backoff_max + profile.backoff_max.mul_f64(0.1));
        }
    }

    #[test]
    fn first_attempt_backoff_is_near_minimum() {
        let profile = DependencyKind::Rag.profile();
        let d = backoff_delay(&profile, 1);
        assert!(d.as_secs_f64() >= profile.backoff_min.as_secs_f64() * 0.9);
        assert!(d.as_secs_f64() <= profile.backoff_min.as_secs_f64() * 1.1);
    }
}
