//! Chains connection establishment into the transfer protocol.

use std::sync::Arc;

use oscar_transfer::PauseHelper;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connection::RvConnection;
use crate::connector::Connector;
use crate::controller::{ConnectionController, ControllerHandle};
use crate::driver::{DriverContext, FileMapper, OutgoingFile, ReceiveDriver, SendDriver};
use crate::error::FailureReason;
use crate::events::{CompletedFile, EventPost, RvEvent, Stage};
use crate::state::{StateController, StateInfo};
use crate::timeout::TimeoutScheduler;

/// What this side does once connected.
pub enum TransferRole {
    Send(Vec<OutgoingFile>),
    Receive(Arc<dyn FileMapper>),
}

/// Control over a running pipeline.
pub struct PipelineHandle {
    cancel: CancellationToken,
    pause: Arc<PauseHelper>,
    controller: ControllerHandle,
    task: JoinHandle<Result<Vec<CompletedFile>, FailureReason>>,
}

impl PipelineHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this pipeline, for wiring into signal handlers.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn pause(&self) {
        self.pause.pause();
    }

    pub fn resume(&self) {
        self.pause.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }

    /// See [`ControllerHandle::start_timeout_timer`].
    pub fn start_timeout_timer(&self) {
        self.controller.start_timeout_timer();
    }

    /// Waits for the terminal outcome.
    pub async fn join(self) -> Result<Vec<CompletedFile>, FailureReason> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(FailureReason::Exception(e.to_string())),
        }
    }
}

/// Spawns a full transfer attempt: connect with `connector`, then send or
/// receive according to `role`.
pub fn spawn_pipeline<C: Connector>(
    conn: Arc<RvConnection>,
    connector: Arc<C>,
    role: TransferRole,
    scheduler: &TimeoutScheduler,
) -> PipelineHandle {
    let cancel = CancellationToken::new();
    let pause = Arc::new(PauseHelper::new());
    let controller =
        ConnectionController::new(Arc::clone(&conn), connector, scheduler, cancel.clone());
    let controller_handle = controller.handle();

    let task = tokio::spawn(run_pipeline(
        conn,
        controller,
        role,
        Arc::clone(&pause),
        cancel.clone(),
    ));

    PipelineHandle {
        cancel,
        pause,
        controller: controller_handle,
        task,
    }
}

/// Runs both stages in order. Exactly one terminal event is posted:
/// `Failed` from whichever stage failed, or `Succeeded` with the files.
pub async fn run_pipeline<C: Connector>(
    conn: Arc<RvConnection>,
    controller: ConnectionController<C>,
    role: TransferRole,
    pause: Arc<PauseHelper>,
    cancel: CancellationToken,
) -> Result<Vec<CompletedFile>, FailureReason> {
    let connection = StateController::new(Stage::Connection);
    connection.add_listener(report_failure(conn.events().clone(), Stage::Connection));
    connection.set(controller.run().await.into());
    let established = settled(&connection)?;

    let ctx = DriverContext::new(
        Arc::clone(&conn),
        established.watchdog,
        established.connection_type,
        pause,
        cancel,
    );
    let stream = established.stream.into_stream();

    let transfer = StateController::new(Stage::Transfer);
    transfer.add_listener(report_failure(conn.events().clone(), Stage::Transfer));
    {
        let events = conn.events().clone();
        transfer.add_listener(move |state: &StateInfo<Vec<CompletedFile>>| {
            if let StateInfo::Successful(files) = state {
                events.post(RvEvent::Succeeded {
                    files: files.clone(),
                });
            }
        });
    }

    let outcome = match role {
        TransferRole::Send(files) => SendDriver::new(ctx, stream, files).run().await,
        TransferRole::Receive(mapper) => ReceiveDriver::new(ctx, stream, mapper).run().await,
    };
    transfer.set(outcome.into());
    settled(&transfer)
}

fn report_failure<T: 'static>(
    events: EventPost,
    stage: Stage,
) -> impl FnOnce(&StateInfo<T>) + Send + 'static {
    move |state| {
        if let Some(reason) = state.failure() {
            events.post(RvEvent::Failed {
                stage,
                reason: reason.clone(),
            });
        }
    }
}

fn settled<T>(state: &StateController<T>) -> Result<T, FailureReason> {
    match state.take() {
        Some(StateInfo::Successful(value)) => Ok(value),
        Some(StateInfo::Failed(reason)) => Err(reason),
        None => Err(FailureReason::UnknownError),
    }
}
