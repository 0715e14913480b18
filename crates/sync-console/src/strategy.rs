//! # Update Strategies
//!
//! How often a dependency is refetched while something is watching it.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateStrategy {
    /// Fetched on demand only.
    #[default]
    Manual,
    /// Refetched every `interval`.
    Poll { interval: Duration },
    /// Like `Poll`, doubling the wait after each consecutive failure up to
    /// `max`.
    Backoff { interval: Duration, max: Duration },
}

impl UpdateStrategy {
    pub fn should_poll(&self) -> bool {
        !matches!(self, UpdateStrategy::Manual)
    }

    /// Wait before the next refresh. `None` for manual dependencies.
    pub fn delay_after(&self, consecutive_failures: u32) -> Option<Duration> {
        match *self {
            UpdateStrategy::Manual => None,
            UpdateStrategy::Poll { interval } => Some(interval),
            UpdateStrategy::Backoff { interval, max } => {
                let factor = 1u32.checked_shl(consecutive_failures).unwrap_or(u32::MAX);
                Some(interval.saturating_mul(factor).min(max))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_never_polls() {
        assert!(!UpdateStrategy::Manual.should_poll());
        assert_eq!(UpdateStrategy::Manual.delay_after(0), None);
    }

    #[test]
    fn poll_is_constant() {
        let strategy = UpdateStrategy::Poll {
            interval: Duration::from_secs(30),
        };
        assert!(strategy.should_poll());
        assert_eq!(strategy.delay_after(5), Some(Duration::from_secs(30)));
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let strategy = UpdateStrategy::Backoff {
            interval: Duration::from_secs(10),
            max: Duration::from_secs(60),
        };
        assert_eq!(strategy.delay_after(0), Some(Duration::from_secs(10)));
        assert_eq!(strategy.delay_after(1), Some(Duration::from_secs(20)));
        assert_eq!(strategy.delay_after(2), Some(Duration::from_secs(40)));
        assert_eq!(strategy.delay_after(3), Some(Duration::from_secs(60)));
        assert_eq!(strategy.delay_after(40), Some(Duration::from_secs(60)));
    }
}
