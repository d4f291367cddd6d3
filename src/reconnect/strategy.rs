use crate::error::{Error, ErrorCategory};
use rand::Rng;
use std::collections::VecDeque;
use std::time::Duration;

/// Classifies an `Error` for the strategies below. Thin wrapper over
/// `Error::category`/`Error::severity` rather than its own taxonomy, so the
/// classification rules live in one place (`error.rs`) and the strategies only
/// consume them.
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn is_recoverable(error: &Error) -> bool {
        error.category() == ErrorCategory::Recoverable
    }

    pub fn severity(error: &Error) -> u8 {
        error.severity()
    }
}

/// Outcome fed to `AdaptiveBackoff::record` after a reconnect attempt resolves,
/// so its quality history reflects what actually happened rather than being
/// inferred from `should_reconnect`'s own query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    Succeeded,
    Failed,
}

/// A reconnect backoff policy. `should_reconnect` and `delay_before` are pure
/// queries; `reset` clears any internal state after a successful reconnect so
/// the next failure starts the schedule fresh.
pub trait ReconnectStrategy: Send + Sync {
    fn should_reconnect(&self, error: &Error, attempt: u32) -> bool;
    fn delay_before(&self, attempt: u32) -> Duration;
    fn reset(&mut self);

    /// Only `AdaptiveBackoff` uses this; every other strategy ignores it. Kept
    /// on the trait (default no-op) rather than on a separate trait so the
    /// manager can call it uniformly without downcasting.
    fn record(&mut self, _outcome: ReconnectOutcome) {}
}

fn jitter(base: Duration, range: std::ops::Range<f64>) -> Duration {
    let factor = rand::thread_rng().gen_range(range);
    base.mul_f64(factor)
}

/// `delay = min(base * 2^(attempt-1), max) * jitter`, jitter uniform in
/// `[0.8, 1.2]` by default.
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: u32,
    pub jitter_range: std::ops::Range<f64>,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max,
            max_attempts,
            jitter_range: 0.8..1.2,
        }
    }
}

impl ReconnectStrategy for ExponentialBackoff {
    fn should_reconnect(&self, _error: &Error, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    fn delay_before(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let scaled = self.base.mul_f64(2f64.powi(exponent as i32));
        jitter(scaled.min(self.max), self.jitter_range.clone())
    }

    fn reset(&mut self) {}
}

/// `delay = min(base + (attempt-1) * increment, max)`.
pub struct LinearBackoff {
    pub base: Duration,
    pub increment: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl ReconnectStrategy for LinearBackoff {
    fn should_reconnect(&self, _error: &Error, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    fn delay_before(&self, attempt: u32) -> Duration {
        let extra = self.increment.mul_f64((attempt.saturating_sub(1)) as f64);
        (self.base + extra).min(self.max)
    }

    fn reset(&mut self) {}
}

/// Constant delay, bounded by `max_attempts`.
pub struct FixedInterval {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectStrategy for FixedInterval {
    fn should_reconnect(&self, _error: &Error, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    fn delay_before(&self, _attempt: u32) -> Duration {
        self.delay
    }

    fn reset(&mut self) {}
}

/// Never reconnects.
pub struct NoReconnect;

impl ReconnectStrategy for NoReconnect {
    fn should_reconnect(&self, _error: &Error, _attempt: u32) -> bool {
        false
    }

    fn delay_before(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }

    fn reset(&mut self) {}
}

const QUALITY_HISTORY_LEN: usize = 20;

/// `delay = min(base * 1.5^(attempt-1) * (2 - quality), max)`, where `quality`
/// is a recency-weighted score in `[0, 1]` over recent reconnect outcomes.
/// Gates reconnection on `quality > 0.1 || severity <= 5` — a run of failures
/// alone won't give up as long as the triggering errors are mild.
///
/// `quality` is updated only through `record(outcome)`, called by the
/// `ReconnectManager` after each attempt resolves, rather than inferred inside
/// `should_reconnect`'s own query — that keeps `should_reconnect` a pure
/// function of the error and attempt count, and makes the history update an
/// explicit, observable step the manager controls.
pub struct AdaptiveBackoff {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: u32,
    history: VecDeque<ReconnectOutcome>,
}

impl AdaptiveBackoff {
    pub fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max,
            max_attempts,
            history: VecDeque::with_capacity(QUALITY_HISTORY_LEN),
        }
    }

    fn quality(&self) -> f64 {
        if self.history.is_empty() {
            return 1.0;
        }
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        for (i, outcome) in self.history.iter().rev().enumerate() {
            let weight = 1.0 / (i as f64 + 1.0);
            let value = match outcome {
                ReconnectOutcome::Succeeded => 1.0,
                ReconnectOutcome::Failed => 0.0,
            };
            weighted_sum += weight * value;
            weight_total += weight;
        }
        weighted_sum / weight_total
    }
}

impl ReconnectStrategy for AdaptiveBackoff {
    fn should_reconnect(&self, error: &Error, attempt: u32) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        self.quality() > 0.1 || ErrorClassifier::severity(error) <= 5
    }

    fn delay_before(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let scaled = self.base.mul_f64(1.5f64.powi(exponent as i32));
        let penalty = 2.0 - self.quality();
        scaled.mul_f64(penalty).min(self.max)
    }

    fn reset(&mut self) {
        self.history.clear();
    }

    fn record(&mut self, outcome: ReconnectOutcome) {
        if self.history.len() == QUALITY_HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_error() -> Error {
        Error::ConnectionTimeout
    }

    #[test]
    fn exponential_backoff_doubles_each_attempt_within_jitter() {
        let strategy = ExponentialBackoff::new(
            Duration::from_millis(100),
            Duration::from_secs(10),
            5,
        );
        let first = strategy.delay_before(1).as_secs_f64();
        let second = strategy.delay_before(2).as_secs_f64();
        assert!(first >= 0.08 && first <= 0.12);
        assert!(second >= 0.16 && second <= 0.24);
    }

    #[test]
    fn exponential_backoff_is_capped_at_max() {
        let strategy =
            ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(5), 20);
        let delay = strategy.delay_before(10);
        assert!(delay <= Duration::from_secs(6));
    }

    #[test]
    fn exponential_backoff_stops_after_max_attempts() {
        // §8 scenario 5: with max_attempts=5, should_reconnect is true for
        // attempts 1..4 and false at 5.
        let strategy =
            ExponentialBackoff::new(Duration::from_millis(10), Duration::from_secs(1), 5);
        assert!(strategy.should_reconnect(&sample_error(), 4));
        assert!(!strategy.should_reconnect(&sample_error(), 5));
    }

    #[test]
    fn linear_backoff_increases_by_a_fixed_increment() {
        let strategy = LinearBackoff {
            base: Duration::from_millis(100),
            increment: Duration::from_millis(50),
            max: Duration::from_secs(10),
            max_attempts: 10,
        };
        assert_eq!(strategy.delay_before(1), Duration::from_millis(100));
        assert_eq!(strategy.delay_before(3), Duration::from_millis(200));
    }

    #[test]
    fn fixed_interval_never_changes() {
        let strategy = FixedInterval {
            delay: Duration::from_secs(2),
            max_attempts: 5,
        };
        assert_eq!(strategy.delay_before(1), strategy.delay_before(10));
    }

    #[test]
    fn no_reconnect_never_reconnects() {
        let strategy = NoReconnect;
        assert!(!strategy.should_reconnect(&sample_error(), 1));
    }

    #[test]
    fn adaptive_backoff_quality_defaults_to_one_with_no_history() {
        let strategy = AdaptiveBackoff::new(Duration::from_millis(100), Duration::from_secs(10), 5);
        assert!(strategy.should_reconnect(&sample_error(), 1));
    }

    #[test]
    fn adaptive_backoff_lowers_quality_after_repeated_failures() {
        let mut strategy =
            AdaptiveBackoff::new(Duration::from_millis(100), Duration::from_secs(10), 5);
        for _ in 0..10 {
            strategy.record(ReconnectOutcome::Failed);
        }
        let delay_after_failures = strategy.delay_before(1);

        let mut fresh = AdaptiveBackoff::new(Duration::from_millis(100), Duration::from_secs(10), 5);
        fresh.record(ReconnectOutcome::Succeeded);
        let delay_after_success = fresh.delay_before(1);

        assert!(delay_after_failures > delay_after_success);
    }

    #[test]
    fn adaptive_backoff_still_retries_low_severity_errors_despite_bad_history() {
        let mut strategy =
            AdaptiveBackoff::new(Duration::from_millis(100), Duration::from_secs(10), 5);
        for _ in 0..10 {
            strategy.record(ReconnectOutcome::Failed);
        }
        assert!(strategy.should_reconnect(&Error::ConnectionTimeout, 1));
    }

    #[test]
    fn adaptive_backoff_reset_clears_history() {
        let mut strategy =
            AdaptiveBackoff::new(Duration::from_millis(100), Duration::from_secs(10), 5);
        strategy.record(ReconnectOutcome::Failed);
        strategy.reset();
        assert!((strategy.quality() - 1.0).abs() < f64::EPSILON);
    }
}
