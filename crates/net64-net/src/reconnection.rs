//! Reconnection backoff.
//!
//! [`ReconnectState`] produces exponentially growing, jittered delays between
//! reconnect attempts. [`ReconnectState::next_delay_at_least`] lets the caller
//! raise a delay to a floor, used to honour a server-mandated auth throttle.

use std::time::Duration;

use rand::Rng;

/// Backoff policy for automatic reconnects.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first attempt. Default: 1 s.
    pub initial_delay: Duration,
    /// Growth factor applied after each attempt. Default: 2.0.
    pub backoff_multiplier: f64,
    /// Upper bound for a single delay. Default: 30 s.
    pub max_delay: Duration,
    /// Attempts before giving up. Default: 5.
    pub max_attempts: u32,
    /// Jitter factor (0.0–1.0), applied as ±jitter. Default: 0.25.
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
            jitter: 0.25,
        }
    }
}

impl ReconnectConfig {
    /// Clamp values that would make the delay arithmetic misbehave: the
    /// multiplier to at least 1.0, jitter into `0.0..=1.0`, and `max_delay`
    /// to at least `initial_delay`.
    pub fn sanitized(mut self) -> Self {
        let original = self.clone();
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            self.backoff_multiplier = 1.0;
        }
        self.jitter = if self.jitter.is_nan() {
            0.0
        } else {
            self.jitter.clamp(0.0, 1.0)
        };
        self.max_delay = self.max_delay.max(self.initial_delay);
        if self != original {
            tracing::warn!(?original, adjusted = ?self, "Reconnect config out of range");
        }
        self
    }
}

/// Attempt counter and current backoff.
#[derive(Debug, Clone)]
pub struct ReconnectState {
    config: ReconnectConfig,
    attempts: u32,
    current_delay: Duration,
}

impl ReconnectState {
    pub fn new(config: ReconnectConfig) -> Self {
        let config = config.sanitized();
        let initial = config.initial_delay;
        Self {
            config,
            attempts: 0,
            current_delay: initial,
        }
    }

    /// Next delay, advancing the counter. `None` once attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.config.max_attempts {
            return None;
        }
        self.attempts += 1;

        let max = self.config.max_delay;
        let base = self.current_delay;
        let delay = if self.config.jitter > 0.0 {
            let jitter = self.config.jitter;
            let factor = rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter));
            scale(base, factor, max)
        } else {
            base
        };

        self.current_delay = scale(base, self.config.backoff_multiplier, max);

        Some(delay.min(max))
    }

    /// Like [`next_delay`](Self::next_delay) but never shorter than `floor`.
    ///
    /// The floor may exceed `max_delay`.
    pub fn next_delay_at_least(&mut self, floor: Duration) -> Option<Duration> {
        self.next_delay().map(|d| d.max(floor))
    }

    /// Start over after a successful connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current_delay = self.config.initial_delay;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// `d * factor`, saturating at `max` instead of overflowing.
fn scale(d: Duration, factor: f64, max: Duration) -> Duration {
    Duration::try_from_secs_f64(d.as_secs_f64() * factor).map_or(max, |d| d.min(max))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_no_jitter() -> ReconnectConfig {
        ReconnectConfig {
            jitter: 0.0,
            max_attempts: 20,
            ..Default::default()
        }
    }

    #[test]
    fn test_backoff_sequence_is_exponential() {
        let mut state = ReconnectState::new(config_no_jitter());
        let delays: Vec<_> = (0..4).map(|_| state.next_delay().unwrap()).collect();
        assert_eq!(
            delays,
            [1, 2, 4, 8].map(Duration::from_secs).to_vec(),
        );
    }

    #[test]
    fn test_max_backoff_is_capped() {
        let mut state = ReconnectState::new(config_no_jitter());
        let last = (0..15).filter_map(|_| state.next_delay()).last().unwrap();
        assert_eq!(last, Duration::from_secs(30));
    }

    #[test]
    fn test_max_attempts_exhausted() {
        let mut state = ReconnectState::new(ReconnectConfig {
            max_attempts: 3,
            jitter: 0.0,
            ..Default::default()
        });

        assert!(state.next_delay().is_some());
        assert!(state.next_delay().is_some());
        assert!(state.next_delay().is_some());
        assert!(state.next_delay().is_none());
        assert_eq!(state.attempts(), 3);
    }

    #[test]
    fn test_reset_restores_initial_delay() {
        let mut state = ReconnectState::new(config_no_jitter());
        state.next_delay();
        state.next_delay();

        state.reset();
        assert_eq!(state.attempts(), 0);
        assert_eq!(state.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_floor_raises_delay_past_cap() {
        let mut state = ReconnectState::new(config_no_jitter());
        let delay = state.next_delay_at_least(Duration::from_secs(45)).unwrap();
        assert_eq!(delay, Duration::from_secs(45));

        // Below the backoff the floor has no effect.
        let delay = state.next_delay_at_least(Duration::from_millis(10)).unwrap();
        assert_eq!(delay, Duration::from_secs(2));
    }

    #[test]
    fn test_shrinking_multiplier_is_clamped() {
        let mut state = ReconnectState::new(ReconnectConfig {
            backoff_multiplier: -2.0,
            jitter: 0.0,
            ..Default::default()
        });
        assert_eq!(state.next_delay(), Some(Duration::from_secs(1)));
        assert_eq!(state.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_nan_and_huge_values_do_not_panic() {
        let mut state = ReconnectState::new(ReconnectConfig {
            backoff_multiplier: f64::MAX,
            jitter: f64::NAN,
            max_delay: Duration::MAX,
            max_attempts: 4,
            ..Default::default()
        });
        let delays: Vec<_> = std::iter::from_fn(|| state.next_delay()).collect();
        assert_eq!(delays.len(), 4);
        assert_eq!(delays[0], Duration::from_secs(1));
        assert_eq!(delays[1], Duration::MAX);

        // Full jitter on a saturated delay saturates instead of overflowing.
        let mut state = ReconnectState::new(ReconnectConfig {
            backoff_multiplier: f64::MAX,
            jitter: 1.0,
            max_delay: Duration::MAX,
            max_attempts: 8,
            ..Default::default()
        });
        let delays: Vec<_> = std::iter::from_fn(|| state.next_delay()).collect();
        assert_eq!(delays.len(), 8);
        assert!(delays[0] <= Duration::from_secs(2));
    }

    #[test]
    fn test_sanitized_clamps_out_of_range_fields() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(1),
            jitter: 3.0,
            backoff_multiplier: 0.5,
            max_attempts: 1,
        }
        .sanitized();
        assert_eq!(config.max_delay, Duration::from_secs(5));
        assert_eq!(config.jitter, 1.0);
        assert_eq!(config.backoff_multiplier, 1.0);
        assert_eq!(ReconnectConfig::default().sanitized(), ReconnectConfig::default());
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        for _ in 0..50 {
            let mut state = ReconnectState::new(ReconnectConfig::default());
            let delay = state.next_delay().unwrap();
            assert!(delay >= Duration::from_millis(750), "{delay:?}");
            assert!(delay <= Duration::from_millis(1250), "{delay:?}");
        }
    }
}
