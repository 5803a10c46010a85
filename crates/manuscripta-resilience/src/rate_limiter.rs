//! Sliding-window rate limiter
//!
//! The window is split into `segments_per_window` segments. Permits taken
//! during a segment come back when that segment slides out of the window,
//! one full window later. Callers that find no permit either wait in a
//! bounded queue until the next segment boundary or are rejected.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{CancelStage, ResilienceError, Stage};
use crate::metrics::{Telemetry, events};
use crate::options::RateLimitingOptions;
use crate::strategy::{Next, Outcome, Strategy};

/// Why a permit could not be acquired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireError {
    /// No permit and the queue is full
    Rejected { retry_after: Duration },
    /// The caller's token fired while queued
    Cancelled,
}

#[derive(Debug)]
pub struct SlidingWindowRateLimiter {
    permit_limit: u32,
    queue_limit: u32,
    segment: Duration,
    window: Mutex<Window>,
    queued: AtomicU32,
    telemetry: Telemetry,
}

#[derive(Debug)]
struct Window {
    segments: Vec<u32>,
    current: usize,
    segment_started: Instant,
    in_use: u32,
}

impl Window {
    /// Slide forward to the segment containing `now`, releasing the permits
    /// of every segment that left the window
    fn advance(&mut self, now: Instant, segment: Duration) {
        let elapsed = now.saturating_duration_since(self.segment_started);
        let segment_nanos = segment.as_nanos().max(1);
        let steps = elapsed.as_nanos() / segment_nanos;
        if steps == 0 {
            return;
        }

        let len = self.segments.len();
        for _ in 0..steps.min(len as u128) {
            self.current = (self.current + 1) % len;
            self.in_use -= self.segments[self.current];
            self.segments[self.current] = 0;
        }
        let into_segment = (elapsed.as_nanos() % segment_nanos) as u64;
        self.segment_started = now - Duration::from_nanos(into_segment);
    }
}

impl SlidingWindowRateLimiter {
    pub(crate) fn new(options: &RateLimitingOptions, telemetry: Telemetry) -> Self {
        let segments = options.segments_per_window.max(1);
        let segment = (options.window / segments).max(Duration::from_millis(1));
        Self {
            permit_limit: options.permit_limit,
            queue_limit: options.queue_limit,
            segment,
            window: Mutex::new(Window {
                segments: vec![0; segments as usize],
                current: 0,
                segment_started: Instant::now(),
                in_use: 0,
            }),
            queued: AtomicU32::new(0),
            telemetry,
        }
    }

    /// Take a permit without waiting.
    ///
    /// On failure returns the time until the next segment boundary.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let now = Instant::now();
        let mut window = self.window.lock();
        window.advance(now, self.segment);

        if window.in_use < self.permit_limit {
            let current = window.current;
            window.segments[current] += 1;
            window.in_use += 1;
            Ok(())
        } else {
            Err((window.segment_started + self.segment).saturating_duration_since(now))
        }
    }

    /// Permits left in the current window
    pub fn available(&self) -> u32 {
        let mut window = self.window.lock();
        window.advance(Instant::now(), self.segment);
        self.permit_limit.saturating_sub(window.in_use)
    }

    /// Callers currently waiting for a permit
    pub fn queued(&self) -> u32 {
        self.queued.load(Ordering::Acquire)
    }

    /// Take a permit, queueing when allowed.
    ///
    /// A caller whose token has already fired gets no permit.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), AcquireError> {
        if cancel.is_cancelled() {
            return Err(AcquireError::Cancelled);
        }
        let mut slot: Option<QueueSlot<'_>> = None;
        loop {
            let wait = match self.try_acquire() {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };

            if slot.is_none() {
                slot = Some(
                    self.enter_queue()
                        .ok_or(AcquireError::Rejected { retry_after: wait })?,
                );
                self.telemetry.record(events::RATE_LIMIT_QUEUED);
                debug!(
                    pipeline = self.telemetry.pipeline(),
                    wait_ms = wait.as_millis() as u64,
                    "Waiting for rate limiter permit"
                );
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AcquireError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    fn enter_queue(&self) -> Option<QueueSlot<'_>> {
        let mut current = self.queued.load(Ordering::Acquire);
        loop {
            if current >= self.queue_limit {
                return None;
            }
            match self.queued.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(QueueSlot(&self.queued)),
                Err(actual) => current = actual,
            }
        }
    }
}

/// A place in the wait queue, released on drop
struct QueueSlot<'a>(&'a AtomicU32);

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug)]
pub struct RateLimiterStrategy {
    limiter: SlidingWindowRateLimiter,
    telemetry: Telemetry,
}

impl RateLimiterStrategy {
    pub(crate) fn new(options: &RateLimitingOptions, telemetry: Telemetry) -> Self {
        Self {
            limiter: SlidingWindowRateLimiter::new(options, telemetry.clone()),
            telemetry,
        }
    }
}

impl Strategy for RateLimiterStrategy {
    fn stage(&self) -> Stage {
        Stage::RateLimiter
    }

    fn execute<'a>(&'a self, next: Next<'a>) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            match self.limiter.acquire(next.cancel_token()).await {
                Ok(()) => next.run().await,
                Err(AcquireError::Cancelled) => Err(ResilienceError::Cancelled {
                    stage: CancelStage::RateLimiterQueue,
                }),
                Err(AcquireError::Rejected { retry_after }) => {
                    self.telemetry.record(events::RATE_LIMIT_REJECTED);
                    warn!(
                        pipeline = self.telemetry.pipeline(),
                        retry_after_ms = retry_after.as_millis() as u64,
                        "Rate limit exceeded"
                    );
                    Err(ResilienceError::RateLimited {
                        pipeline: self.telemetry.pipeline().to_string(),
                        retry_after: Some(retry_after),
                    })
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ResilienceMetrics;
    use std::sync::Arc;

    fn limiter(permit_limit: u32, queue_limit: u32) -> (SlidingWindowRateLimiter, Arc<ResilienceMetrics>) {
        let metrics = Arc::new(ResilienceMetrics::new());
        let options = RateLimitingOptions {
            enabled: true,
            permit_limit,
            window: Duration::from_secs(1),
            segments_per_window: 4,
            queue_limit,
        };
        let telemetry = Telemetry::new("test", Arc::clone(&metrics));
        (SlidingWindowRateLimiter::new(&options, telemetry), metrics)
    }

    #[tokio::test(start_paused = true)]
    async fn test_permits_return_after_full_window() {
        let (limiter, _) = limiter(2, 0);
        assert!(limiter.try_acquire().is_ok());
        assert!(limiter.try_acquire().is_ok());
        assert!(limiter.try_acquire().is_err());
        assert_eq!(limiter.available(), 0);

        // Still inside the window after three of four segments
        tokio::time::advance(Duration::from_millis(750)).await;
        assert!(limiter.try_acquire().is_err());

        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(limiter.available(), 2);
        assert!(limiter.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_segments_release_independently() {
        let (limiter, _) = limiter(2, 0);
        assert!(limiter.try_acquire().is_ok());

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(limiter.try_acquire().is_ok());
        assert!(limiter.try_acquire().is_err());

        // The first permit's segment leaves the window at t=1s
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(limiter.available(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_without_queue() {
        let (limiter, _) = limiter(1, 0);
        let cancel = CancellationToken::new();
        assert!(limiter.acquire(&cancel).await.is_ok());

        let err = limiter.acquire(&cancel).await.unwrap_err();
        match err {
            AcquireError::Rejected { retry_after } => {
                assert!(retry_after <= Duration::from_millis(250));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_caller_gets_permit_later() {
        let (limiter, metrics) = limiter(1, 1);
        let cancel = CancellationToken::new();
        limiter.acquire(&cancel).await.unwrap();

        let started = Instant::now();
        limiter.acquire(&cancel).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(750));
        assert_eq!(limiter.queued(), 0);
        assert_eq!(metrics.get("test.rate_limit.queued"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_caller_takes_no_permit() {
        let (limiter, _) = limiter(1, 1);
        let cancelled = CancellationToken::new();
        cancelled.cancel();

        assert_eq!(
            limiter.acquire(&cancelled).await.unwrap_err(),
            AcquireError::Cancelled
        );
        assert_eq!(limiter.available(), 1);
        assert!(limiter.acquire(&CancellationToken::new()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_queued() {
        let (limiter, _) = limiter(1, 1);
        let cancel = CancellationToken::new();
        limiter.acquire(&cancel).await.unwrap();

        let waiter = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waiter.cancel();
        });

        let err = limiter.acquire(&cancel).await.unwrap_err();
        assert_eq!(err, AcquireError::Cancelled);
        assert_eq!(limiter.queued(), 0);
    }
}
