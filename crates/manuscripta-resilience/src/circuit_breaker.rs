//! Circuit Breaker Implementation
//!
//! Implements the circuit breaker pattern to prevent cascade failures.
//! The circuit breaker has three states:
//! - Closed: Normal operation, outcomes are sampled
//! - Open: Too many failures, requests are rejected immediately
//! - HalfOpen: Testing recovery, a single trial call is allowed
//!
//! State transitions:
//! - Closed → Open: failure ratio over the sampling window reaches the
//!   threshold with at least `minimum_throughput` calls sampled
//! - Open → HalfOpen: after `break_duration` expires
//! - HalfOpen → Closed: the trial call succeeds
//! - HalfOpen → Open: the trial call fails

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{ResilienceError, Stage};
use crate::metrics::{Telemetry, events};
use crate::options::CircuitBreakerOptions;
use crate::strategy::{Next, Outcome, Strategy, is_transient_outcome};

/// Number of buckets the sampling window is divided into
const SAMPLING_BUCKETS: u32 = 10;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed,
    /// Failing - requests rejected immediately
    Open,
    /// Testing recovery - one trial request allowed
    HalfOpen,
}

#[derive(Debug)]
struct Bucket {
    started: Instant,
    successes: u32,
    failures: u32,
}

/// Outcome counts over the trailing sampling duration
#[derive(Debug, Default)]
struct SamplingWindow {
    buckets: VecDeque<Bucket>,
}

impl SamplingWindow {
    fn record(&mut self, now: Instant, sampling: Duration, bucket_width: Duration, failed: bool) {
        self.evict(now, sampling);
        let fresh = match self.buckets.back() {
            Some(bucket) => now.saturating_duration_since(bucket.started) >= bucket_width,
            None => true,
        };
        if fresh {
            self.buckets.push_back(Bucket {
                started: now,
                successes: 0,
                failures: 0,
            });
        }
        if let Some(bucket) = self.buckets.back_mut() {
            if failed {
                bucket.failures += 1;
            } else {
                bucket.successes += 1;
            }
        }
    }

    fn evict(&mut self, now: Instant, sampling: Duration) {
        while self
            .buckets
            .front()
            .is_some_and(|b| now.saturating_duration_since(b.started) >= sampling)
        {
            self.buckets.pop_front();
        }
    }

    /// (total, failures)
    fn totals(&self) -> (u32, u32) {
        self.buckets.iter().fold((0, 0), |(total, failures), b| {
            (total + b.successes + b.failures, failures + b.failures)
        })
    }

    fn clear(&mut self) {
        self.buckets.clear();
    }
}

#[derive(Debug)]
struct BreakerState {
    circuit: CircuitState,
    last_state_change: Instant,
    trial_in_flight: bool,
    window: SamplingWindow,
}

/// Circuit breaker implementation
///
/// Thread-safe circuit breaker that samples call outcomes, automatically
/// opening and closing the circuit based on the failure ratio. The state
/// lock is never held across an `.await`.
#[derive(Debug)]
pub struct CircuitBreaker {
    options: CircuitBreakerOptions,
    bucket_width: Duration,
    state: Mutex<BreakerState>,
    telemetry: Telemetry,
}

impl CircuitBreaker {
    pub(crate) fn new(options: CircuitBreakerOptions, telemetry: Telemetry) -> Self {
        let bucket_width =
            (options.sampling_duration / SAMPLING_BUCKETS).max(Duration::from_millis(1));
        Self {
            options,
            bucket_width,
            state: Mutex::new(BreakerState {
                circuit: CircuitState::Closed,
                last_state_change: Instant::now(),
                trial_in_flight: false,
                window: SamplingWindow::default(),
            }),
            telemetry,
        }
    }

    /// Get the current circuit state
    pub fn state(&self) -> CircuitState {
        self.state.lock().circuit
    }

    /// Get the time since last state change
    pub fn time_since_state_change(&self) -> Duration {
        self.state.lock().last_state_change.elapsed()
    }

    /// Ask to let one call through.
    ///
    /// An open circuit whose break duration has elapsed moves to half-open
    /// and hands out the single trial permit. Rejections return the time
    /// left until the next trial may be attempted and never extend the
    /// break.
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>, Duration> {
        let mut state = self.state.lock();
        match state.circuit {
            CircuitState::Closed => Ok(self.permit(false)),
            CircuitState::Open => {
                let elapsed = state.last_state_change.elapsed();
                if elapsed >= self.options.break_duration {
                    self.transition(&mut state, CircuitState::HalfOpen);
                    state.trial_in_flight = true;
                    Ok(self.permit(true))
                } else {
                    Err(self.options.break_duration - elapsed)
                }
            }
            CircuitState::HalfOpen => {
                if state.trial_in_flight {
                    Err(Duration::ZERO)
                } else {
                    state.trial_in_flight = true;
                    Ok(self.permit(true))
                }
            }
        }
    }

    fn permit(&self, trial: bool) -> BreakerPermit<'_> {
        BreakerPermit {
            breaker: self,
            trial,
            settled: false,
        }
    }

    fn on_success(&self, trial: bool) {
        let mut state = self.state.lock();
        if trial {
            state.trial_in_flight = false;
            if state.circuit == CircuitState::HalfOpen {
                self.transition(&mut state, CircuitState::Closed);
            }
        } else {
            self.sample(&mut state, false);
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut state = self.state.lock();
        if trial {
            state.trial_in_flight = false;
            if state.circuit == CircuitState::HalfOpen {
                self.transition(&mut state, CircuitState::Open);
            }
            return;
        }

        self.sample(&mut state, true);
    }

    /// Record a closed-state outcome and open once the window holds enough
    /// calls at or above the failure ratio. Either outcome can be the sample
    /// that crosses the threshold.
    fn sample(&self, state: &mut BreakerState, failed: bool) {
        if state.circuit != CircuitState::Closed {
            return;
        }
        state.window.record(
            Instant::now(),
            self.options.sampling_duration,
            self.bucket_width,
            failed,
        );
        let (total, failures) = state.window.totals();
        if total >= self.options.minimum_throughput
            && failures > 0
            && f64::from(failures) / f64::from(total) >= self.options.failure_ratio
        {
            self.transition(state, CircuitState::Open);
        }
    }

    fn on_ignored(&self, trial: bool) {
        if trial {
            self.state.lock().trial_in_flight = false;
        }
    }

    fn transition(&self, state: &mut BreakerState, to: CircuitState) {
        let (total, failures) = state.window.totals();
        state.circuit = to;
        state.last_state_change = Instant::now();
        state.window.clear();

        let pipeline = self.telemetry.pipeline();
        match to {
            CircuitState::Open => {
                self.telemetry.record(events::CIRCUIT_OPENED);
                warn!(
                    pipeline,
                    sampled = total,
                    failures,
                    break_ms = self.options.break_duration.as_millis() as u64,
                    "Circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                self.telemetry.record(events::CIRCUIT_HALF_OPENED);
                info!(pipeline, "Circuit breaker half-open (testing recovery)");
            }
            CircuitState::Closed => {
                self.telemetry.record(events::CIRCUIT_CLOSED);
                info!(pipeline, "Circuit breaker closed (recovered)");
            }
        }
    }
}

/// Admission ticket for one call through the breaker.
///
/// Settle it with [`success`](Self::success), [`failure`](Self::failure) or
/// [`ignore`](Self::ignore). A trial permit dropped unsettled, for example
/// because an outer timeout abandoned the call, counts as a failed trial.
///
/// A closed-state permit dropped unsettled records nothing. The timeout
/// stage sits outside the breaker, so a call it abandons never produced an
/// outcome here and shows up as `timeout.triggered` instead. Calls that only
/// ever hang therefore do not open a closed breaker; a per-attempt deadline
/// belongs in the operation itself.
#[derive(Debug)]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl BreakerPermit<'_> {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial);
    }

    /// Outcome says nothing about upstream health (cancellation, local
    /// configuration errors)
    pub fn ignore(mut self) {
        self.settled = true;
        self.breaker.on_ignored(self.trial);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.on_failure(true);
        }
    }
}

#[derive(Debug)]
pub struct CircuitBreakerStrategy {
    breaker: Arc<CircuitBreaker>,
    telemetry: Telemetry,
}

impl CircuitBreakerStrategy {
    pub(crate) fn new(breaker: Arc<CircuitBreaker>, telemetry: Telemetry) -> Self {
        Self { breaker, telemetry }
    }
}

impl Strategy for CircuitBreakerStrategy {
    fn stage(&self) -> Stage {
        Stage::CircuitBreaker
    }

    fn execute<'a>(&'a self, next: Next<'a>) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let permit = match self.breaker.try_acquire() {
                Ok(permit) => permit,
                Err(remaining) => {
                    self.telemetry.record(events::CIRCUIT_REJECTED);
                    debug!(
                        pipeline = self.telemetry.pipeline(),
                        remaining_ms = remaining.as_millis() as u64,
                        "Circuit open, failing fast"
                    );
                    return Err(ResilienceError::CircuitOpen {
                        pipeline: self.telemetry.pipeline().to_string(),
                        remaining,
                    });
                }
            };

            let outcome = next.run().await;
            if is_transient_outcome(&outcome) {
                permit.failure();
            } else if outcome.is_ok() {
                permit.success();
            } else {
                permit.ignore();
            }
            outcome
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ResilienceMetrics;

    fn breaker(minimum_throughput: u32, break_ms: u64) -> (CircuitBreaker, Arc<ResilienceMetrics>) {
        let metrics = Arc::new(ResilienceMetrics::new());
        let options = CircuitBreakerOptions {
            enabled: true,
            failure_ratio: 0.5,
            minimum_throughput,
            sampling_duration: Duration::from_secs(10),
            break_duration: Duration::from_millis(break_ms),
        };
        let telemetry = Telemetry::new("test", Arc::clone(&metrics));
        (CircuitBreaker::new(options, telemetry), metrics)
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_state_is_closed() {
        let (cb, _) = breaker(2, 100);
        assert_eq!(cb.state(), CircuitState::Closed);
        let permit = cb.try_acquire().unwrap();
        assert!(!permit.is_trial());
        permit.success();
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_on_failure_ratio_with_throughput() {
        let (cb, metrics) = breaker(4, 100);

        cb.try_acquire().unwrap().success();
        cb.try_acquire().unwrap().failure();
        cb.try_acquire().unwrap().failure();
        // 2 of 3 failed, but the minimum throughput is not reached yet
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.try_acquire().unwrap().success();
        // 2 of 4 reaches the threshold even though the last sample succeeded
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(metrics.get("test.circuit_breaker.opened"), 1);
        assert!(cb.try_acquire().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_below_threshold_keeps_closed() {
        let (cb, _) = breaker(4, 100);
        cb.try_acquire().unwrap().failure();
        for _ in 0..3 {
            cb.try_acquire().unwrap().success();
        }
        // 1 of 4 failed
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_old_samples_leave_the_window() {
        let (cb, _) = breaker(2, 100);
        cb.try_acquire().unwrap().failure();

        tokio::time::advance(Duration::from_secs(11)).await;
        cb.try_acquire().unwrap().success();
        cb.try_acquire().unwrap().success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_rejects_without_extending_break() {
        let (cb, _) = breaker(1, 100);
        cb.try_acquire().unwrap().failure();
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(60)).await;
        let remaining = cb.try_acquire().unwrap_err();
        assert_eq!(remaining, Duration::from_millis(40));

        tokio::time::advance(Duration::from_millis(40)).await;
        let trial = cb.try_acquire().unwrap();
        assert!(trial.is_trial());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_allows_single_trial() {
        let (cb, metrics) = breaker(1, 10);
        cb.try_acquire().unwrap().failure();
        tokio::time::advance(Duration::from_millis(10)).await;

        let trial = cb.try_acquire().unwrap();
        assert!(cb.try_acquire().is_err());

        trial.success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(metrics.get("test.circuit_breaker.half_opened"), 1);
        assert_eq!(metrics.get("test.circuit_breaker.closed"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens() {
        let (cb, metrics) = breaker(1, 10);
        cb.try_acquire().unwrap().failure();
        tokio::time::advance(Duration::from_millis(10)).await;

        cb.try_acquire().unwrap().failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(metrics.get("test.circuit_breaker.opened"), 2);
        assert!(cb.try_acquire().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignored_trial_frees_the_slot() {
        let (cb, _) = breaker(1, 10);
        cb.try_acquire().unwrap().failure();
        tokio::time::advance(Duration::from_millis(10)).await;

        cb.try_acquire().unwrap().ignore();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.try_acquire().unwrap().is_trial());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_counts_as_failure() {
        let (cb, _) = breaker(1, 10);
        cb.try_acquire().unwrap().failure();
        tokio::time::advance(Duration::from_millis(10)).await;

        drop(cb.try_acquire().unwrap());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_closed_permit_is_not_sampled() {
        let (cb, _) = breaker(1, 10);
        for _ in 0..5 {
            drop(cb.try_acquire().unwrap());
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.state.lock().window.totals(), (0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_since_state_change() {
        let (cb, _) = breaker(1, 10);
        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(cb.time_since_state_change() >= Duration::from_millis(50));
    }

    #[test]
    fn test_thread_safety() {
        let (cb, _) = breaker(1_000_000, 100);
        let cb = Arc::new(cb);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cb = Arc::clone(&cb);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        if let Ok(permit) = cb.try_acquire() {
                            if i % 2 == 0 {
                                permit.success();
                            } else {
                                permit.failure();
                            }
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.state.lock().window.totals(), (800, 400));
    }
}
