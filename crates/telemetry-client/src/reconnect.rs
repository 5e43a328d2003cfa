//! Reconnection scheduler: backoff strategies, jitter, and circuit breaker
//! (spec §4.F, testable properties 4 and 5, scenario S1).
//!
//! Grounded in shape (not code) on the pack's reconnecting RPC client
//! (`finito::{ExponentialBackoff, FibonacciBackoff, FixedInterval}` seen in
//! `subxt`'s `reconnecting_rpc_client`): a small enum of pluggable delay
//! strategies feeding a single scheduler, plus an independent circuit
//! breaker state machine so property 5 is testable without the backoff
//! math involved.

use std::time::Duration;

/// Delay computation strategy (spec §4.F).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    Constant,
    Linear,
    Exponential,
    Fibonacci,
}

/// How randomization is layered on top of the computed base delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterMode {
    None,
    Full,
    Equal,
    Decorrelated,
}

#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub strategy: BackoffStrategy,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    pub factor: f64,
    pub jitter_type: JitterMode,
    pub jitter_factor: f64,
    pub reset_timeout: Duration,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_timeout: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig {
            strategy: BackoffStrategy::Exponential,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
            factor: 2.0,
            jitter_type: JitterMode::Full,
            jitter_factor: 1.0,
            reset_timeout: Duration::from_secs(60),
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout: Duration::from_secs(30),
        }
    }
}

/// Pure delay computation for `attempt` (0-indexed), before jitter.
pub fn base_delay(strategy: BackoffStrategy, attempt: u32, cfg: &ReconnectConfig) -> Duration {
    let capped = |d: f64| Duration::from_millis(d.min(cfg.max_delay.as_millis() as f64).max(0.0) as u64);
    let base_ms = cfg.base_delay.as_millis() as f64;
    match strategy {
        BackoffStrategy::Constant => cfg.base_delay.min(cfg.max_delay),
        BackoffStrategy::Linear => capped(base_ms * (1.0 + attempt as f64)),
        BackoffStrategy::Exponential => capped(base_ms * cfg.factor.powi(attempt as i32)),
        BackoffStrategy::Fibonacci => capped(fib(attempt) as f64 * base_ms),
    }
}

fn fib(n: u32) -> u64 {
    let (mut a, mut b) = (1u64, 1u64);
    for _ in 0..n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    a
}

/// Apply a jitter mode on top of a computed base delay.
///
/// `rand01` is a caller-supplied source of a uniform `[0,1)` sample so
/// delay sequences are deterministic in tests (property 4: "with jitter
/// none, the sequence is deterministic").
pub fn apply_jitter(
    mode: JitterMode,
    delay: Duration,
    previous: Duration,
    max_delay: Duration,
    mut rand01: impl FnMut() -> f64,
) -> Duration {
    match mode {
        JitterMode::None => delay,
        JitterMode::Full => Duration::from_secs_f64(delay.as_secs_f64() * rand01()),
        JitterMode::Equal => {
            Duration::from_secs_f64(delay.as_secs_f64() / 2.0 + (delay.as_secs_f64() / 2.0) * rand01())
        }
        JitterMode::Decorrelated => {
            let candidate = previous.as_secs_f64().max(delay.as_secs_f64().min(1.0)) * 3.0 * rand01();
            Duration::from_secs_f64(candidate.min(max_delay.as_secs_f64()))
        }
    }
}

/// Circuit breaker state (spec §3, §4.F, property 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Tracks consecutive failures and gates scheduling independent of the
/// delay math, so it can be unit tested against property 5 in isolation.
pub struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    threshold: u32,
    timeout: Duration,
    opened_at: Option<Duration>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, timeout: Duration) -> Self {
        CircuitBreaker {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            threshold,
            timeout,
            opened_at: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// May an attempt be scheduled right now, given `elapsed` time since
    /// the process started (or any monotonic clock)? CLOSED and HALF_OPEN
    /// both permit; OPEN permits only after `timeout` has elapsed, at
    /// which point it flips to HALF_OPEN and permits.
    pub fn allow_attempt(&mut self, elapsed: Duration) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if let Some(opened_at) = self.opened_at {
                    if elapsed.saturating_sub(opened_at) >= self.timeout {
                        self.state = CircuitState::HalfOpen;
                        return true;
                    }
                }
                false
            }
        }
    }

    /// Record a failed attempt at `elapsed` time.
    pub fn record_failure(&mut self, elapsed: Duration) {
        self.consecutive_failures += 1;
        match self.state {
            CircuitState::HalfOpen => {
                self.state = CircuitState::Open;
                self.opened_at = Some(elapsed);
            }
            CircuitState::Closed if self.consecutive_failures >= self.threshold => {
                self.state = CircuitState::Open;
                self.opened_at = Some(elapsed);
            }
            _ => {}
        }
    }

    /// Record a successful attempt: resets failure count and always closes.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.state = CircuitState::Closed;
        self.opened_at = None;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

/// Owns the attempt counter, circuit breaker, and last-computed delay for
/// decorrelated jitter. One instance per connection.
pub struct ReconnectScheduler {
    cfg: ReconnectConfig,
    attempt: u32,
    last_delay: Duration,
    breaker: CircuitBreaker,
    last_attempt_at: Option<Duration>,
}

impl ReconnectScheduler {
    pub fn new(cfg: ReconnectConfig) -> Self {
        let breaker = CircuitBreaker::new(cfg.circuit_breaker_threshold, cfg.circuit_breaker_timeout);
        ReconnectScheduler {
            cfg,
            attempt: 0,
            last_delay: Duration::ZERO,
            breaker,
            last_attempt_at: None,
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn attempt_number(&self) -> u32 {
        self.attempt
    }

    /// Compute the next delay and advance the attempt counter, or `None`
    /// if the circuit breaker currently rejects scheduling or
    /// `max_attempts` has been reached (which also opens the breaker).
    pub fn next_delay(&mut self, elapsed: Duration, mut rand01: impl FnMut() -> f64) -> Option<Duration> {
        if let Some(last) = self.last_attempt_at {
            if elapsed.saturating_sub(last) >= self.cfg.reset_timeout {
                self.attempt = 0;
            }
        }

        if !self.breaker.allow_attempt(elapsed) {
            return None;
        }
        if self.attempt >= self.cfg.max_attempts {
            self.breaker.record_failure(elapsed);
            self.breaker.state = CircuitState::Open;
            self.breaker.opened_at = Some(elapsed);
            return None;
        }

        let base = base_delay(self.cfg.strategy, self.attempt, &self.cfg);
        let delay = apply_jitter(self.cfg.jitter_type, base, self.last_delay, self.cfg.max_delay, &mut rand01);
        self.last_delay = delay;
        self.attempt += 1;
        self.last_attempt_at = Some(elapsed);
        Some(delay)
    }

    /// Report the outcome of the attempt just made.
    pub fn record_failure(&mut self, elapsed: Duration) {
        self.breaker.record_failure(elapsed);
    }

    pub fn record_success(&mut self) {
        self.attempt = 0;
        self.last_delay = Duration::ZERO;
        self.breaker.record_success();
    }

    /// Full reset, e.g. on an explicit `reconnect()` call (spec §4.L).
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.last_delay = Duration::ZERO;
        self.last_attempt_at = None;
        self.breaker = CircuitBreaker::new(self.cfg.circuit_breaker_threshold, self.cfg.circuit_breaker_timeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter_cfg() -> ReconnectConfig {
        ReconnectConfig {
            strategy: BackoffStrategy::Exponential,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            max_attempts: 6,
            factor: 2.0,
            jitter_type: JitterMode::None,
            jitter_factor: 0.0,
            reset_timeout: Duration::from_secs(3600),
            circuit_breaker_threshold: 6,
            circuit_breaker_timeout: Duration::from_secs(30),
        }
    }

    /// Scenario S1: exponential, base=100, factor=2, max=1000, jitter=none,
    /// maxAttempts=6 -> delays [100,200,400,800,1000,1000] then circuit opens.
    #[test]
    fn s1_exponential_backoff_sequence_then_circuit_opens() {
        let mut sched = ReconnectScheduler::new(no_jitter_cfg());
        let expected_ms = [100u64, 200, 400, 800, 1000, 1000];
        let mut elapsed = Duration::ZERO;
        for expected in expected_ms {
            let delay = sched.next_delay(elapsed, || 0.0).expect("attempt permitted");
            assert_eq!(delay.as_millis() as u64, expected);
            sched.record_failure(elapsed);
            elapsed += delay;
        }
        // 7th attempt: max_attempts reached -> rejected and circuit opens.
        assert!(sched.next_delay(elapsed, || 0.0).is_none());
        assert_eq!(sched.circuit_state(), CircuitState::Open);
    }

    #[test]
    fn delay_never_exceeds_max_delay() {
        let cfg = no_jitter_cfg();
        for attempt in 0..20 {
            let d = base_delay(BackoffStrategy::Exponential, attempt, &cfg);
            assert!(d <= cfg.max_delay);
        }
    }

    #[test]
    fn linear_strategy_grows_linearly_until_capped() {
        let mut cfg = no_jitter_cfg();
        cfg.strategy = BackoffStrategy::Linear;
        cfg.max_delay = Duration::from_millis(10_000);
        assert_eq!(base_delay(BackoffStrategy::Linear, 0, &cfg).as_millis(), 100);
        assert_eq!(base_delay(BackoffStrategy::Linear, 1, &cfg).as_millis(), 200);
        assert_eq!(base_delay(BackoffStrategy::Linear, 2, &cfg).as_millis(), 300);
    }

    #[test]
    fn fibonacci_strategy_follows_fibonacci_sequence() {
        let cfg = no_jitter_cfg();
        let delays: Vec<u128> = (0..6)
            .map(|a| base_delay(BackoffStrategy::Fibonacci, a, &cfg).as_millis())
            .collect();
        assert_eq!(delays, vec![100, 100, 200, 300, 500, 800]);
    }

    #[test]
    fn constant_strategy_never_changes() {
        let cfg = no_jitter_cfg();
        for attempt in 0..5 {
            assert_eq!(base_delay(BackoffStrategy::Constant, attempt, &cfg), cfg.base_delay);
        }
    }

    /// Property 5: CLOSED->OPEN exactly at threshold, OPEN->HALF_OPEN after
    /// timeout, HALF_OPEN->CLOSED on success, HALF_OPEN->OPEN on failure.
    #[test]
    fn circuit_breaker_transition_property() {
        let mut cb = CircuitBreaker::new(3, Duration::from_secs(10));
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure(Duration::from_secs(0));
        cb.record_failure(Duration::from_secs(1));
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure(Duration::from_secs(2));
        assert_eq!(cb.state(), CircuitState::Open);

        assert!(!cb.allow_attempt(Duration::from_secs(5)));
        assert!(cb.allow_attempt(Duration::from_secs(12)));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_failure(Duration::from_secs(12));
        assert_eq!(cb.state(), CircuitState::Open);

        assert!(cb.allow_attempt(Duration::from_secs(25)));
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
    }

    #[test]
    fn jitter_full_is_bounded_by_base_delay() {
        let d = apply_jitter(JitterMode::Full, Duration::from_millis(1000), Duration::ZERO, Duration::from_secs(10), || 0.5);
        assert_eq!(d.as_millis(), 500);
    }

    #[test]
    fn jitter_equal_is_between_half_and_full() {
        let d_low = apply_jitter(JitterMode::Equal, Duration::from_millis(1000), Duration::ZERO, Duration::from_secs(10), || 0.0);
        let d_high = apply_jitter(JitterMode::Equal, Duration::from_millis(1000), Duration::ZERO, Duration::from_secs(10), || 1.0);
        assert_eq!(d_low.as_millis(), 500);
        assert_eq!(d_high.as_millis(), 1000);
    }

    #[test]
    fn reset_timeout_idle_window_resets_attempt_counter() {
        let mut cfg = no_jitter_cfg();
        cfg.reset_timeout = Duration::from_secs(5);
        cfg.max_attempts = 100;
        let mut sched = ReconnectScheduler::new(cfg);
        sched.next_delay(Duration::from_secs(0), || 0.0);
        sched.record_failure(Duration::from_secs(0));
        assert_eq!(sched.attempt_number(), 1);
        // long idle gap before the next attempt
        sched.next_delay(Duration::from_secs(100), || 0.0);
        assert_eq!(sched.attempt_number(), 1); // reset to 0, then incremented by this call
    }
}
