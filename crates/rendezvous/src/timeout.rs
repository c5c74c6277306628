//! Connection timeouts with a pausable clock.
//!
//! One [`TimeoutScheduler`] task serves every in-flight attempt. Attempts are
//! entries in an id-indexed table; a [`Watchdog`] is the attempt's handle to
//! its entry and removes it when the last clone is dropped, so the scheduler
//! never holds onto a finished attempt.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type AttemptId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Registered, clock not started.
    Idle,
    Armed { deadline: Instant },
    Paused { remaining: Duration },
    Disarmed,
    Fired,
}

struct Entry {
    phase: Phase,
    budget: Duration,
    pauses: u32,
    fired: CancellationToken,
}

#[derive(Default)]
struct Shared {
    entries: Mutex<HashMap<AttemptId, Entry>>,
    notify: Notify,
    next_id: AtomicU64,
}

impl Shared {
    fn entries(&self) -> MutexGuard<'_, HashMap<AttemptId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fires every entry whose deadline has passed and returns the earliest
    /// deadline still pending.
    fn expire_due(&self, now: Instant) -> Option<Instant> {
        let mut entries = self.entries();
        let mut next: Option<Instant> = None;
        for (id, entry) in entries.iter_mut() {
            if let Phase::Armed { deadline } = entry.phase {
                if deadline <= now {
                    warn!(attempt = id, budget = ?entry.budget, "connection attempt timed out");
                    entry.phase = Phase::Fired;
                    entry.fired.cancel();
                } else {
                    next = Some(next.map_or(deadline, |n| n.min(deadline)));
                }
            }
        }
        next
    }
}

struct ShutdownGuard(CancellationToken);

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Shared timer for all connection attempts.
///
/// Cloning is cheap. The background task stops once the scheduler and every
/// watchdog created from it are dropped.
#[derive(Clone)]
pub struct TimeoutScheduler {
    shared: Arc<Shared>,
    _guard: Arc<ShutdownGuard>,
}

impl TimeoutScheduler {
    /// Spawns the scheduler task. Must be called inside a tokio runtime.
    pub fn new() -> Self {
        let shared = Arc::new(Shared::default());
        let shutdown = CancellationToken::new();
        tokio::spawn(run(Arc::clone(&shared), shutdown.clone()));
        Self {
            shared,
            _guard: Arc::new(ShutdownGuard(shutdown)),
        }
    }

    /// Registers an attempt allowed `budget` of unpaused time once started.
    pub fn watchdog(&self, budget: Duration) -> Watchdog {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let fired = CancellationToken::new();
        self.shared.entries().insert(
            id,
            Entry {
                phase: Phase::Idle,
                budget,
                pauses: 0,
                fired: fired.clone(),
            },
        );
        Watchdog {
            inner: Arc::new(WatchdogInner {
                id,
                scheduler: self.clone(),
                fired,
            }),
        }
    }

    #[cfg(test)]
    fn active(&self) -> usize {
        self.shared.entries().len()
    }
}

impl Default for TimeoutScheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn run(shared: Arc<Shared>, shutdown: CancellationToken) {
    loop {
        let next = shared.expire_due(Instant::now());
        let wait_deadline = async {
            match next {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = shared.notify.notified() => {}
            _ = wait_deadline => {}
        }
    }
    debug!("timeout scheduler stopped");
}

struct WatchdogInner {
    id: AttemptId,
    scheduler: TimeoutScheduler,
    fired: CancellationToken,
}

impl Drop for WatchdogInner {
    fn drop(&mut self) {
        self.scheduler.shared.entries().remove(&self.id);
        self.scheduler.shared.notify.notify_one();
    }
}

/// One attempt's timeout clock.
#[derive(Clone)]
pub struct Watchdog {
    inner: Arc<WatchdogInner>,
}

impl Watchdog {
    fn update<R>(&self, f: impl FnOnce(&mut Entry, Instant) -> R) -> Option<R> {
        let shared = &self.inner.scheduler.shared;
        let result = shared
            .entries()
            .get_mut(&self.inner.id)
            .map(|entry| f(entry, Instant::now()));
        shared.notify.notify_one();
        result
    }

    /// Starts the clock. Does nothing if already started.
    pub fn start(&self) {
        self.update(|entry, now| {
            if entry.phase == Phase::Idle {
                entry.phase = if entry.pauses > 0 {
                    Phase::Paused {
                        remaining: entry.budget,
                    }
                } else {
                    Phase::Armed {
                        deadline: now + entry.budget,
                    }
                };
                debug!(attempt = self.inner.id, budget = ?entry.budget, "timeout clock started");
            }
        });
    }

    /// Stops the clock, keeping the time left. Pauses nest.
    pub fn pause(&self) {
        self.update(|entry, now| {
            entry.pauses += 1;
            if let Phase::Armed { deadline } = entry.phase {
                entry.phase = Phase::Paused {
                    remaining: deadline.saturating_duration_since(now),
                };
            }
        });
    }

    /// Undoes one [`pause`](Self::pause). The clock restarts with the time
    /// that was left when the outermost pause began.
    pub fn resume(&self) {
        self.update(|entry, now| {
            entry.pauses = entry.pauses.saturating_sub(1);
            if entry.pauses == 0 {
                if let Phase::Paused { remaining } = entry.phase {
                    entry.phase = Phase::Armed {
                        deadline: now + remaining,
                    };
                }
            }
        });
    }

    /// Pauses the clock until the returned guard is dropped.
    pub fn pause_guard(&self) -> PauseGuard {
        self.pause();
        PauseGuard {
            watchdog: self.clone(),
        }
    }

    /// Stops the clock for good. Returns `false` if it had already fired.
    pub fn disarm(&self) -> bool {
        self.update(|entry, _| {
            if entry.phase == Phase::Fired {
                false
            } else {
                entry.phase = Phase::Disarmed;
                true
            }
        })
        .unwrap_or(false)
    }

    pub fn has_fired(&self) -> bool {
        self.inner.fired.is_cancelled()
    }

    /// Completes when the clock runs out. Never completes once disarmed.
    pub fn fired(&self) -> impl Future<Output = ()> + Send + '_ {
        self.inner.fired.cancelled()
    }
}

/// Keeps a [`Watchdog`] paused while alive.
pub struct PauseGuard {
    watchdog: Watchdog,
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        self.watchdog.resume();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUDGET: Duration = Duration::from_secs(10);

    #[tokio::test(start_paused = true)]
    async fn fires_after_budget() {
        let scheduler = TimeoutScheduler::new();
        let wd = scheduler.watchdog(BUDGET);
        let started = Instant::now();
        wd.start();

        wd.fired().await;
        assert!(wd.has_fired());
        assert!(started.elapsed() >= BUDGET);
        assert!(!wd.disarm());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_clock_never_fires() {
        let scheduler = TimeoutScheduler::new();
        let wd = scheduler.watchdog(BUDGET);
        tokio::time::sleep(BUDGET * 5).await;
        assert!(!wd.has_fired());
    }

    #[tokio::test(start_paused = true)]
    async fn disarm_prevents_firing() {
        let scheduler = TimeoutScheduler::new();
        let wd = scheduler.watchdog(BUDGET);
        wd.start();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(wd.disarm());
        tokio::time::sleep(BUDGET * 2).await;
        assert!(!wd.has_fired());
    }

    #[tokio::test(start_paused = true)]
    async fn paused_time_does_not_count() {
        let scheduler = TimeoutScheduler::new();
        let wd = scheduler.watchdog(BUDGET);
        wd.start();

        tokio::time::sleep(Duration::from_secs(4)).await;
        wd.pause();
        // Far longer than the budget in wall-clock terms.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!wd.has_fired());
        wd.resume();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!wd.has_fired());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(wd.has_fired());
    }

    #[tokio::test(start_paused = true)]
    async fn pause_guard_resumes_on_drop() {
        let scheduler = TimeoutScheduler::new();
        let wd = scheduler.watchdog(BUDGET);
        wd.start();
        {
            let _outer = wd.pause_guard();
            let inner = wd.pause_guard();
            drop(inner);
            // Still held by the outer guard.
            tokio::time::sleep(BUDGET * 2).await;
            assert!(!wd.has_fired());
        }
        tokio::time::sleep(BUDGET + Duration::from_secs(1)).await;
        assert!(wd.has_fired());
    }

    #[tokio::test(start_paused = true)]
    async fn pause_before_start_holds_clock() {
        let scheduler = TimeoutScheduler::new();
        let wd = scheduler.watchdog(BUDGET);
        let guard = wd.pause_guard();
        wd.start();
        tokio::time::sleep(BUDGET * 2).await;
        assert!(!wd.has_fired());
        drop(guard);
        tokio::time::sleep(BUDGET + Duration::from_secs(1)).await;
        assert!(wd.has_fired());
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_independent() {
        let scheduler = TimeoutScheduler::new();
        let short = scheduler.watchdog(Duration::from_secs(1));
        let long = scheduler.watchdog(Duration::from_secs(60));
        short.start();
        long.start();

        short.fired().await;
        assert!(!long.has_fired());
    }

    #[tokio::test]
    async fn dropping_watchdog_removes_entry() {
        let scheduler = TimeoutScheduler::new();
        let wd = scheduler.watchdog(BUDGET);
        let copy = wd.clone();
        assert_eq!(scheduler.active(), 1);
        drop(wd);
        assert_eq!(scheduler.active(), 1);
        drop(copy);
        assert_eq!(scheduler.active(), 0);
    }
}
