use std::time::Duration;

use tokio::sync::watch;

use crate::PAUSE_WAIT;

/// Shared pause flag for a running transfer.
///
/// Pausing never interrupts a chunk already in flight; the transfer loop
/// checks the flag between chunks and parks until it clears.
#[derive(Debug)]
pub struct PauseHelper {
    paused: watch::Sender<bool>,
}

impl Default for PauseHelper {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseHelper {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self { paused }
    }

    pub fn set_paused(&self, paused: bool) {
        let previous = self.paused.send_replace(paused);
        if previous != paused {
            tracing::debug!(paused, "pause state changed");
        }
    }

    pub fn pause(&self) {
        self.set_paused(true);
    }

    pub fn resume(&self) {
        self.set_paused(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Waits up to [`PAUSE_WAIT`] for the flag to clear.
    ///
    /// Returns `false` immediately when not paused, `true` once a wait
    /// happened (whether or not the flag actually cleared).
    pub async fn wait_until_unpause(&self) -> bool {
        self.wait_until_unpause_for(PAUSE_WAIT).await
    }

    pub async fn wait_until_unpause_for(&self, limit: Duration) -> bool {
        let mut rx = self.paused.subscribe();
        if !*rx.borrow_and_update() {
            return false;
        }
        // Sender lives in self, so the channel cannot close while we wait.
        let _ = tokio::time::timeout(limit, rx.wait_for(|paused| !*paused)).await;
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn not_paused_returns_immediately() {
        let pause = PauseHelper::new();
        assert!(!pause.is_paused());
        assert!(!pause.wait_until_unpause().await);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_gives_up_after_limit() {
        let pause = PauseHelper::new();
        pause.pause();
        let started = tokio::time::Instant::now();
        assert!(pause.wait_until_unpause_for(Duration::from_secs(2)).await);
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(pause.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn resume_wakes_waiter() {
        let pause = Arc::new(PauseHelper::new());
        pause.pause();

        let waiter = {
            let pause = Arc::clone(&pause);
            tokio::spawn(async move {
                let started = tokio::time::Instant::now();
                pause.wait_until_unpause().await;
                started.elapsed()
            })
        };

        tokio::time::sleep(Duration::from_millis(300)).await;
        pause.resume();
        let waited = waiter.await.unwrap();
        assert!(waited < PAUSE_WAIT);
        assert!(!pause.is_paused());
    }
}
