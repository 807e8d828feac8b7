#![deny(missing_docs)]
//! Logical clock abstraction for voicecore.
//!
//! Every bounded wait in the core is expressed against an absolute deadline
//! read from a [`Clock`], never against a relative sleep measured at call
//! time, so a logical clock can be jumped forward in tests without changing
//! outcomes. [`RealClock`] drives wall time via `tokio::time`; [`FakeClock`]
//! gives tests a fully deterministic, manually-advanced clock.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Instant;
use tokio::sync::oneshot;

/// Logical time source. Implementations must be cheap to clone/share
/// (`Arc<dyn Clock>`) since every component that waits on anything holds one.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current logical time in milliseconds since the clock was created.
    fn now_ms(&self) -> u64;

    /// Sleep for `ms` logical milliseconds.
    async fn sleep_ms(&self, ms: u64);

    /// Sleep until an absolute deadline. A deadline at or before `now_ms()`
    /// returns immediately.
    async fn sleep_until_ms(&self, deadline_ms: u64) {
        let now = self.now_ms();
        if deadline_ms > now {
            self.sleep_ms(deadline_ms - now).await;
        }
    }
}

/// Returned when [`run_with_deadline`] loses the race to the deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlineElapsed;

impl std::fmt::Display for DeadlineElapsed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "deadline elapsed")
    }
}

impl std::error::Error for DeadlineElapsed {}

/// Race `fut` against an absolute deadline on `clock`. This is the only
/// sanctioned way to bound an async operation in the core — no component
/// should call `tokio::time::timeout` directly against wall time.
///
/// A `deadline_ms` at or before the current time still gives `fut` one poll
/// via `tokio::select!`'s biased-free race; callers that need "expired
/// means fail immediately" should check `clock.now_ms() >= deadline_ms`
/// themselves before calling.
pub async fn run_with_deadline<C, Fut, T>(
    clock: &C,
    fut: Fut,
    deadline_ms: u64,
) -> Result<T, DeadlineElapsed>
where
    C: Clock + ?Sized,
    Fut: Future<Output = T>,
{
    tokio::pin!(fut);
    let now = clock.now_ms();
    let remaining = deadline_ms.saturating_sub(now);
    tokio::select! {
        v = &mut fut => Ok(v),
        _ = clock.sleep_ms(remaining) => Err(DeadlineElapsed),
    }
}

/// Wall-clock implementation backed by `tokio::time`.
///
/// `now_ms()` is monotonic, anchored to the instant the clock was
/// constructed, not to the Unix epoch.
pub struct RealClock {
    start: Instant,
}

impl RealClock {
    /// Create a new real-time clock anchored to the current instant.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for RealClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for RealClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    async fn sleep_ms(&self, ms: u64) {
        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
    }
}

struct Sleeper {
    wake_at_ms: u64,
    tx: Option<oneshot::Sender<()>>,
}

struct FakeClockInner {
    now_ms: u64,
    sleepers: Vec<Sleeper>,
}

/// Deterministic clock for tests. `now_ms()` only moves when [`FakeClock::advance`]
/// is called; `sleep_ms` registers a waiter that is woken once `advance` crosses
/// its wake time. Mirrors the reference implementation's `FakeClock`.
#[derive(Clone)]
pub struct FakeClock {
    inner: Arc<Mutex<FakeClockInner>>,
}

impl FakeClock {
    /// Create a fake clock starting at `start_ms`.
    pub fn new(start_ms: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeClockInner {
                now_ms: start_ms,
                sleepers: Vec::new(),
            })),
        }
    }

    /// Advance the clock by `ms` and wake any sleepers whose deadline has passed.
    pub async fn advance(&self, ms: u64) {
        // Yield once before advancing so tasks scheduled in the same tick
        // can register their sleepers against the pre-advance time.
        tokio::task::yield_now().await;

        let ready = {
            let mut inner = self.inner.lock().expect("fake clock poisoned");
            inner.now_ms += ms;
            let now = inner.now_ms;
            let mut ready = Vec::new();
            inner.sleepers.retain_mut(|s| {
                if s.wake_at_ms <= now {
                    if let Some(tx) = s.tx.take() {
                        ready.push(tx);
                    }
                    false
                } else {
                    true
                }
            });
            ready
        };

        for tx in ready {
            let _ = tx.send(());
        }

        // Yield once after waking sleepers so resumed tasks can run without
        // requiring callers to sprinkle extra yields.
        tokio::task::yield_now().await;
    }
}

#[async_trait]
impl Clock for FakeClock {
    fn now_ms(&self) -> u64 {
        self.inner.lock().expect("fake clock poisoned").now_ms
    }

    async fn sleep_ms(&self, ms: u64) {
        if ms == 0 {
            tokio::task::yield_now().await;
            return;
        }

        let rx = {
            let mut inner = self.inner.lock().expect("fake clock poisoned");
            let wake_at_ms = inner.now_ms + ms;
            if wake_at_ms <= inner.now_ms {
                None
            } else {
                let (tx, rx) = oneshot::channel();
                inner.sleepers.push(Sleeper { wake_at_ms, tx: Some(tx) });
                Some(rx)
            }
        };

        if let Some(rx) = rx {
            let _ = rx.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn real_clock_now_advances_monotonically() {
        let clock = RealClock::new();
        let t0 = clock.now_ms();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(clock.now_ms() >= t0);
    }

    #[tokio::test]
    async fn fake_clock_does_not_advance_on_its_own() {
        let clock = FakeClock::new(100);
        assert_eq!(clock.now_ms(), 100);
        tokio::task::yield_now().await;
        assert_eq!(clock.now_ms(), 100);
    }

    #[tokio::test]
    async fn fake_clock_sleep_wakes_on_advance() {
        let clock = FakeClock::new(0);
        let waiter = clock.clone();
        let handle = tokio::spawn(async move {
            waiter.sleep_ms(50).await;
            waiter.now_ms()
        });

        // Give the spawned task a chance to register its sleeper.
        tokio::task::yield_now().await;
        clock.advance(20).await;
        assert!(!handle.is_finished());
        clock.advance(40).await;

        let woke_at = handle.await.unwrap();
        assert_eq!(woke_at, 60);
    }

    #[tokio::test]
    async fn run_with_deadline_returns_ok_when_future_wins() {
        let clock = FakeClock::new(0);
        let result = run_with_deadline(&clock, async { 42 }, 1000).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn run_with_deadline_times_out_when_deadline_wins() {
        let clock = FakeClock::new(0);
        let fut = async {
            // Never completes on its own within this test.
            std::future::pending::<()>().await;
        };
        let task = tokio::spawn({
            let clock = clock.clone();
            async move { run_with_deadline(&clock, fut, 10).await }
        });
        tokio::task::yield_now().await;
        clock.advance(10).await;
        let result = task.await.unwrap();
        assert_eq!(result, Err(DeadlineElapsed));
    }

    #[tokio::test]
    async fn sleep_until_ms_no_ops_for_past_deadline() {
        let clock = FakeClock::new(500);
        clock.sleep_until_ms(100).await;
        assert_eq!(clock.now_ms(), 500);
    }
}
