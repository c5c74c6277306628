//! Connection establishment: drives one connector to an open stream.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::connection::RvConnection;
use crate::connector::Connector;
use crate::error::FailureReason;
use crate::events::RvEvent;
use crate::stream::StreamInfo;
use crate::timeout::{TimeoutScheduler, Watchdog};
use crate::types::ConnectionType;

/// A stream ready for the transfer protocol.
///
/// The watchdog is still running: the attempt only counts as connected
/// once the first header arrives from the peer.
pub struct Established {
    pub stream: StreamInfo,
    pub watchdog: Watchdog,
    pub connection_type: ConnectionType,
}

/// Control over a running [`ConnectionController`].
#[derive(Clone)]
pub struct ControllerHandle {
    watchdog: Watchdog,
    cancel: CancellationToken,
}

impl ControllerHandle {
    /// Starts the timeout clock for connectors that do not start it
    /// themselves. Call once the peer has been told where to connect.
    pub fn start_timeout_timer(&self) {
        self.watchdog.start();
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Runs `check → resolve → prepare → connect` for one connector under the
/// connection-type timeout.
pub struct ConnectionController<C> {
    conn: Arc<RvConnection>,
    connector: Arc<C>,
    watchdog: Watchdog,
    cancel: CancellationToken,
}

impl<C: Connector> ConnectionController<C> {
    pub fn new(
        conn: Arc<RvConnection>,
        connector: Arc<C>,
        scheduler: &TimeoutScheduler,
        cancel: CancellationToken,
    ) -> Self {
        let budget = conn
            .settings()
            .per_connection_timeout(connector.connection_type());
        Self {
            conn,
            connector,
            watchdog: scheduler.watchdog(budget),
            cancel,
        }
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            watchdog: self.watchdog.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Runs the attempt to completion. Fails exactly once, with the first of
    /// cancellation, timeout, or the connector's own error.
    pub async fn run(self) -> Result<Established, FailureReason> {
        let connection_type = self.connector.connection_type();

        if let Err(e) = self.connector.check_connection_info(&self.conn) {
            warn!(?connection_type, error = %e, "connection info rejected");
            return Err(e.failure_reason());
        }

        let host = self.connector.target_host(&self.conn);
        info!(%host, ?connection_type, buddy = self.conn.buddy(), "resolving rendezvous peer");
        self.conn.post(RvEvent::Resolving { host });

        if self.connector.starts_timer_automatically() {
            self.watchdog.start();
        }

        let worker = {
            let conn = Arc::clone(&self.conn);
            let connector = Arc::clone(&self.connector);
            tokio::spawn(async move {
                connector.prepare_stream(&conn).await?;
                let (host, port) = connector.endpoint(&conn);
                info!(%host, port, "connecting");
                conn.post(RvEvent::Connecting { host, port });
                connector.create_stream(&conn).await
            })
        };
        let abort = worker.abort_handle();

        let stream = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                abort.abort();
                info!(?connection_type, "connection attempt cancelled");
                Err(FailureReason::LocallyCancelled)
            }
            _ = self.watchdog.fired() => {
                // The worker's own error, if any, is never reported.
                abort.abort();
                Err(FailureReason::ConnectionTimedOut)
            }
            joined = worker => match joined {
                Ok(Ok(stream)) => Ok(stream),
                Ok(Err(e)) => {
                    warn!(?connection_type, error = %e, "connection attempt failed");
                    Err(e.failure_reason())
                }
                Err(e) => {
                    warn!(?connection_type, error = %e, "connection worker died");
                    Err(FailureReason::Exception(e.to_string()))
                }
            },
        }?;

        Ok(Established {
            stream,
            watchdog: self.watchdog,
            connection_type,
        })
    }
}
