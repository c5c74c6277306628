//! Set-once terminal state for a pipeline stage.

use std::sync::{Mutex, PoisonError};

use tracing::{info, warn};

use crate::error::FailureReason;
use crate::events::Stage;

/// Terminal outcome of a stage.
#[derive(Debug)]
pub enum StateInfo<T> {
    Successful(T),
    Failed(FailureReason),
}

impl<T> StateInfo<T> {
    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            Self::Successful(_) => None,
            Self::Failed(reason) => Some(reason),
        }
    }
}

impl<T> From<Result<T, FailureReason>> for StateInfo<T> {
    fn from(result: Result<T, FailureReason>) -> Self {
        match result {
            Ok(value) => Self::Successful(value),
            Err(reason) => Self::Failed(reason),
        }
    }
}

type Listener<T> = Box<dyn FnOnce(&StateInfo<T>) + Send>;

struct Inner<T> {
    settled: bool,
    state: Option<StateInfo<T>>,
    listeners: Vec<Listener<T>>,
}

/// Holds at most one terminal [`StateInfo`].
///
/// The first [`set`](Self::set) wins and runs the registered listeners;
/// later attempts are logged and dropped. Listeners run under the
/// controller's lock and must not call back into it.
pub struct StateController<T> {
    stage: Stage,
    inner: Mutex<Inner<T>>,
}

impl<T> StateController<T> {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            inner: Mutex::new(Inner {
                settled: false,
                state: None,
                listeners: Vec::new(),
            }),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Registers a callback run once when the state settles. Registering
    /// after that point runs nothing.
    pub fn add_listener(&self, listener: impl FnOnce(&StateInfo<T>) + Send + 'static) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.settled {
            warn!(stage = ?self.stage, "listener added after state settled");
            return;
        }
        inner.listeners.push(Box::new(listener));
    }

    /// Settles the state. Returns `false`, leaving the earlier state in
    /// place, if it was already settled.
    pub fn set(&self, state: StateInfo<T>) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.settled {
            warn!(
                stage = ?self.stage,
                ignored = ?state.failure(),
                "stage already settled, ignoring new state"
            );
            return false;
        }

        match state.failure() {
            None => info!(stage = ?self.stage, "stage succeeded"),
            Some(reason) => info!(stage = ?self.stage, %reason, "stage failed"),
        }

        inner.settled = true;
        for listener in std::mem::take(&mut inner.listeners) {
            listener(&state);
        }
        inner.state = Some(state);
        true
    }

    pub fn is_settled(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .settled
    }

    /// The failure reason, if the stage settled as failed.
    pub fn failure(&self) -> Option<FailureReason> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
            .as_ref()
            .and_then(|s| s.failure().cloned())
    }

    /// Moves the settled state out. The controller stays settled.
    pub fn take(&self) -> Option<StateInfo<T>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
            .take()
    }
}
