use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

/// Default sampling interval for [`ProgressTicker`].
const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

/// Live position inside a byte range `[start, start + length)`.
///
/// Cloning shares the same position, so the task moving bytes and any
/// number of observers see one value.
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    inner: Arc<ProgressInner>,
}

#[derive(Debug)]
struct ProgressInner {
    start: u64,
    length: u64,
    position: AtomicU64,
}

impl ProgressHandle {
    pub fn new(start: u64, length: u64) -> Self {
        Self {
            inner: Arc::new(ProgressInner {
                start,
                length,
                position: AtomicU64::new(start),
            }),
        }
    }

    pub fn start(&self) -> u64 {
        self.inner.start
    }

    pub fn length(&self) -> u64 {
        self.inner.length
    }

    /// Absolute end of the range.
    pub fn end(&self) -> u64 {
        self.inner.start + self.inner.length
    }

    /// Current absolute position.
    pub fn position(&self) -> u64 {
        self.inner.position.load(Ordering::Acquire)
    }

    pub fn set_position(&self, position: u64) {
        self.inner.position.store(position, Ordering::Release);
    }

    /// Bytes moved since `start`.
    pub fn transferred(&self) -> u64 {
        self.position().saturating_sub(self.inner.start)
    }

    /// Fraction of the range completed, in `[0.0, 1.0]`.
    pub fn fraction(&self) -> f64 {
        if self.inner.length == 0 {
            return 1.0;
        }
        (self.transferred() as f64 / self.inner.length as f64).min(1.0)
    }

    pub fn is_complete(&self) -> bool {
        self.position() >= self.end()
    }
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

struct PositionSample {
    position: u64,
    at: Instant,
}

/// Transfer speed over a sliding window of position samples.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    samples: Vec<PositionSample>,
    max_samples: usize,
    window: Duration,
}

impl SpeedCalculator {
    /// `window` defaults to 5 s, `max_samples` to 100.
    pub fn new(window: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: Vec::new(),
                max_samples: max_samples.unwrap_or(100),
                window: window.unwrap_or(Duration::from_secs(5)),
            }),
        }
    }

    /// Records the absolute position observed now.
    pub fn record(&self, position: u64) {
        self.record_at(position, Instant::now());
    }

    fn record_at(&self, position: u64, at: Instant) {
        let mut s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        s.samples.push(PositionSample { position, at });

        if let Some(cutoff) = at.checked_sub(s.window) {
            s.samples.retain(|sample| sample.at >= cutoff);
        }
        if s.samples.len() > s.max_samples {
            let excess = s.samples.len() - s.max_samples;
            s.samples.drain(..excess);
        }
    }

    /// Average bytes per second across the window; 0.0 with fewer than two
    /// samples.
    pub fn bytes_per_second(&self) -> f64 {
        let s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let (Some(first), Some(last)) = (s.samples.first(), s.samples.last()) else {
            return 0.0;
        };
        let elapsed = last.at.duration_since(first.at);
        if elapsed.is_zero() {
            return 0.0;
        }
        last.position.saturating_sub(first.position) as f64 / elapsed.as_secs_f64()
    }

    /// Time left to move `remaining` bytes at the current speed.
    pub fn eta(&self, remaining: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining as f64 / speed))
    }

    pub fn reset(&self) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .samples
            .clear();
    }
}

// ---------------------------------------------------------------------------
// ProgressTicker
// ---------------------------------------------------------------------------

/// Point-in-time view of a tracked range.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub name: String,
    pub position: u64,
    pub end: u64,
    pub bytes_per_second: f64,
    pub eta: Option<Duration>,
}

pub type ProgressCallback = Box<dyn Fn(ProgressSnapshot) + Send + Sync>;

struct Tracked {
    handle: ProgressHandle,
    speed: SpeedCalculator,
}

/// Samples registered progress handles on an interval and reports them.
pub struct ProgressTicker {
    inner: Arc<Mutex<TickerInner>>,
    stop: Mutex<Option<CancellationToken>>,
}

struct TickerInner {
    callbacks: Vec<ProgressCallback>,
    tracked: HashMap<String, Tracked>,
    interval: Duration,
}

impl TickerInner {
    fn tick(&self) {
        for (name, t) in &self.tracked {
            let position = t.handle.position();
            t.speed.record(position);
            let snapshot = ProgressSnapshot {
                name: name.clone(),
                position,
                end: t.handle.end(),
                bytes_per_second: t.speed.bytes_per_second(),
                eta: t.speed.eta(t.handle.end().saturating_sub(position)),
            };
            for cb in &self.callbacks {
                cb(snapshot.clone());
            }
        }
    }
}

impl ProgressTicker {
    /// `interval` defaults to 500 ms.
    pub fn new(interval: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TickerInner {
                callbacks: Vec::new(),
                tracked: HashMap::new(),
                interval: interval.unwrap_or(DEFAULT_INTERVAL),
            })),
            stop: Mutex::new(None),
        }
    }

    pub fn on_progress(&self, callback: ProgressCallback) {
        self.lock().callbacks.push(callback);
    }

    /// Starts reporting `handle` under `name`, replacing any earlier entry.
    pub fn track(&self, name: impl Into<String>, handle: ProgressHandle) {
        self.lock().tracked.insert(
            name.into(),
            Tracked {
                handle,
                speed: SpeedCalculator::new(None, None),
            },
        );
    }

    pub fn untrack(&self, name: &str) {
        self.lock().tracked.remove(name);
    }

    /// Reports every tracked range once, immediately.
    pub fn notify(&self) {
        self.lock().tick();
    }

    /// Spawns the periodic reporting task. Must be called inside a tokio
    /// runtime.
    pub fn start(&self) {
        let token = CancellationToken::new();
        if let Some(previous) = self
            .stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token.clone())
        {
            previous.cancel();
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let interval = inner.lock().unwrap_or_else(PoisonError::into_inner).interval;
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        inner.lock().unwrap_or_else(PoisonError::into_inner).tick();
                    }
                }
            }
        });
    }

    pub fn stop(&self) {
        if let Some(token) = self
            .stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TickerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ProgressTicker {
    fn drop(&mut self) {
        self.stop();
    }
}
