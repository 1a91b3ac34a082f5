//! Reconnection budget and delay computation.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use rand::Rng;

use super::options::ReconnectPolicy;

// ============================================================================
// ReconnectPlan
// ============================================================================

/// Tracks automatic attempts against a [`ReconnectPolicy`].
///
/// The counter only grows through [`next_delay`](Self::next_delay) and only
/// returns to zero through [`reset`](Self::reset), which the client calls
/// after a successful connect or an explicit `connect()`/`disconnect()`.
#[derive(Debug, Clone)]
pub struct ReconnectPlan {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl ReconnectPlan {
    /// Creates a plan with no attempts used.
    #[inline]
    #[must_use]
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Attempts consumed since the last reset.
    #[inline]
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns `true` once the budget is spent.
    #[inline]
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.policy.max_attempts
    }

    /// Returns the policy.
    #[inline]
    #[must_use]
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Consumes one attempt and returns its delay, or `None` if exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.next_delay_with(&mut rand::rng())
    }

    /// [`next_delay`](Self::next_delay) with a caller-supplied RNG.
    pub fn next_delay_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempt += 1;

        let base = self.policy.delay_for(self.attempt);
        let jitter_ms = u64::try_from(self.policy.jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = Duration::from_millis(rng.random_range(0..=jitter_ms));

        Some(base.saturating_add(jitter).min(self.policy.max_delay))
    }

    /// Restores the full budget.
    #[inline]
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_budget_is_bounded() {
        let mut plan = ReconnectPlan::new(ReconnectPolicy::default().with_max_attempts(3));
        let mut rng = StdRng::seed_from_u64(7);

        assert!(plan.next_delay_with(&mut rng).is_some());
        assert!(plan.next_delay_with(&mut rng).is_some());
        assert!(plan.next_delay_with(&mut rng).is_some());
        assert!(plan.is_exhausted());
        assert_eq!(plan.next_delay_with(&mut rng), None);
        assert_eq!(plan.attempt(), 3);
    }

    #[test]
    fn test_reset_restores_budget() {
        let mut plan = ReconnectPlan::new(ReconnectPolicy::default().with_max_attempts(1));
        assert!(plan.next_delay().is_some());
        assert!(plan.next_delay().is_none());
        plan.reset();
        assert_eq!(plan.attempt(), 0);
        assert!(plan.next_delay().is_some());
    }

    #[test]
    fn test_disabled_policy_never_schedules() {
        let mut plan = ReconnectPlan::new(ReconnectPolicy::disabled());
        assert!(plan.is_exhausted());
        assert_eq!(plan.next_delay(), None);
    }

    #[test]
    fn test_delay_within_jitter_window() {
        let mut plan = ReconnectPlan::new(ReconnectPolicy::default());
        let mut rng = StdRng::seed_from_u64(42);

        let first = plan.next_delay_with(&mut rng).unwrap();
        assert!(first >= Duration::from_millis(5_000));
        assert!(first <= Duration::from_millis(6_000));

        let second = plan.next_delay_with(&mut rng).unwrap();
        assert!(second >= Duration::from_millis(10_000));
        assert!(second <= Duration::from_millis(11_000));
    }

    #[test]
    fn test_delay_clamped_to_max() {
        let mut plan = ReconnectPlan::new(ReconnectPolicy::default().with_max_attempts(10));
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..10 {
            let delay = plan.next_delay_with(&mut rng).unwrap();
            assert!(delay <= Duration::from_millis(30_000));
        }
    }

    #[test]
    fn test_zero_jitter_is_deterministic() {
        let policy = ReconnectPolicy::default().with_jitter(Duration::ZERO);
        let mut plan = ReconnectPlan::new(policy);
        assert_eq!(plan.next_delay(), Some(Duration::from_millis(5_000)));
        assert_eq!(plan.next_delay(), Some(Duration::from_millis(10_000)));
    }

    proptest! {
        #[test]
        fn prop_every_delay_bounded(seed in any::<u64>(), max_attempts in 0u32..20) {
            let policy = ReconnectPolicy::default().with_max_attempts(max_attempts);
            let mut plan = ReconnectPlan::new(policy);
            let mut rng = StdRng::seed_from_u64(seed);

            let mut scheduled = 0;
            while let Some(delay) = plan.next_delay_with(&mut rng) {
                prop_assert!(delay >= policy.base_delay);
                prop_assert!(delay <= policy.max_delay);
                scheduled += 1;
            }
            prop_assert_eq!(scheduled, max_attempts);
        }
    }
}
