//! The per-file OFT handshake run over an established stream.
//!
//! [`SendDriver`] and [`ReceiveDriver`] share a [`DriverContext`] holding the
//! attempt's watchdog, pause flag and cancel token. Every step observes the
//! cancel token; the watchdog is disarmed when the first header arrives from
//! the peer and is paused while a checksum is being computed.

mod receive;
mod send;

pub use receive::{DownloadDirMapper, FileMapper, ReceiveDriver};
pub use send::{OutgoingFile, SendDriver};

use std::future::Future;
use std::sync::Arc;

use oscar_protocol::{
    FileTransferHeader, HeaderType, IcbmCookie, ProtocolError, SegmentedFilename,
};
use oscar_transfer::{ByteTransferrer, Checksummer, Direction, PauseHelper, TransferError};
use tokio::io::{AsyncRead, AsyncSeek, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::RvConnection;
use crate::error::FailureReason;
use crate::events::{CompletedFile, RvEvent};
use crate::timeout::Watchdog;
use crate::types::ConnectionType;

/// Failures inside the protocol task, before they are reduced to a
/// [`FailureReason`].
#[derive(Debug, thiserror::Error)]
pub(crate) enum DriverError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("local file error: {0}")]
    LocalFile(TransferError),

    #[error("expected {expected} header, got {got:?}")]
    UnexpectedHeader {
        expected: &'static str,
        got: HeaderType,
    },

    #[error("header carries cookie {got}, expected {expected}")]
    ForeignCookie {
        expected: IcbmCookie,
        got: IcbmCookie,
    },

    #[error("{0}")]
    Mismatch(String),

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Fatal(FailureReason),
}

impl DriverError {
    fn into_failure(self) -> FailureReason {
        match self {
            Self::Cancelled => FailureReason::LocallyCancelled,
            Self::Fatal(reason) => reason,
            Self::LocalFile(e) => FailureReason::Exception(e.to_string()),
            _ => FailureReason::UnknownError,
        }
    }
}

pub(crate) fn expect_header(
    header: &FileTransferHeader,
    expected: HeaderType,
    name: &'static str,
) -> Result<(), DriverError> {
    if header.header_type == expected {
        Ok(())
    } else {
        Err(DriverError::UnexpectedHeader {
            expected: name,
            got: header.header_type,
        })
    }
}

/// State shared by both driver roles for one attempt.
pub struct DriverContext {
    conn: Arc<RvConnection>,
    watchdog: Watchdog,
    pause: Arc<PauseHelper>,
    cancel: CancellationToken,
    connection_type: ConnectionType,
    connected: bool,
}

impl DriverContext {
    pub fn new(
        conn: Arc<RvConnection>,
        watchdog: Watchdog,
        connection_type: ConnectionType,
        pause: Arc<PauseHelper>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            conn,
            watchdog,
            pause,
            cancel,
            connection_type,
            connected: false,
        }
    }

    pub(crate) fn conn(&self) -> &RvConnection {
        &self.conn
    }

    /// Reads the next header. The first one marks the attempt connected.
    ///
    /// A header whose cookie is not this rendezvous's is rejected like any
    /// other header arriving out of turn.
    pub(crate) async fn read_header<S>(
        &mut self,
        stream: &mut S,
    ) -> Result<FileTransferHeader, DriverError>
    where
        S: AsyncRead + Unpin,
    {
        let header = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(DriverError::Cancelled),
            header = FileTransferHeader::read_from(stream) => header?,
        };
        debug!(
            header_type = ?header.header_type,
            file = %header.filename,
            size = header.file_size,
            bytes_received = header.bytes_received,
            files_left = header.files_left,
            parts_left = header.parts_left,
            "header received"
        );
        let expected = self.conn.cookie();
        if header.cookie != expected {
            return Err(DriverError::ForeignCookie {
                expected,
                got: header.cookie,
            });
        }

        if !self.connected {
            if !self.watchdog.disarm() {
                return Err(DriverError::Fatal(FailureReason::ConnectionTimedOut));
            }
            self.connected = true;
            info!(connection_type = ?self.connection_type, "rendezvous connected");
            self.conn.post(RvEvent::Connected {
                connection_type: self.connection_type,
            });
        }
        Ok(header)
    }

    pub(crate) async fn write_header<S>(
        &self,
        stream: &mut S,
        header: &FileTransferHeader,
    ) -> Result<(), DriverError>
    where
        S: AsyncWrite + Unpin,
    {
        debug!(
            header_type = ?header.header_type,
            file = %header.filename,
            bytes_received = header.bytes_received,
            files_left = header.files_left,
            parts_left = header.parts_left,
            "sending header"
        );
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DriverError::Cancelled),
            written = header.write_to(stream) => Ok(written?),
        }
    }

    /// Checksums `[0, length)` of `file` with the timeout clock paused.
    pub(crate) async fn checksum<F>(
        &self,
        file: &mut F,
        name: &SegmentedFilename,
        length: u64,
    ) -> Result<u32, DriverError>
    where
        F: AsyncRead + AsyncSeek + Unpin,
    {
        let summer = Checksummer::new(length);
        self.conn.post(RvEvent::Checksumming {
            file: name.clone(),
            progress: summer.progress(),
        });
        let _paused = self.watchdog.pause_guard();

        let value = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(DriverError::Cancelled),
            value = summer.compute(file) => value.map_err(DriverError::LocalFile)?,
        };
        debug!(
            file = %name,
            length,
            checksum = format_args!("{value:#010x}"),
            "checksum computed"
        );
        Ok(value)
    }

    /// Moves exactly `length` bytes starting at `offset`.
    pub(crate) async fn move_bytes<F, S>(
        &self,
        file: &mut F,
        stream: &mut S,
        direction: Direction,
        name: &SegmentedFilename,
        offset: u64,
        length: u64,
    ) -> Result<u64, DriverError>
    where
        F: AsyncRead + AsyncWrite + AsyncSeek + Unpin,
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut transferrer = ByteTransferrer::new(
            file,
            stream,
            direction,
            offset,
            length,
            Arc::clone(&self.pause),
            self.cancel.clone(),
        );
        self.conn.post(RvEvent::TransferringFile {
            file: name.clone(),
            progress: transferrer.progress(),
        });
        info!(file = %name, ?direction, offset, length, "transferring file");

        let moved = transferrer.transfer().await?;
        if self.cancel.is_cancelled() {
            return Err(DriverError::Cancelled);
        }
        if moved != length {
            return Err(DriverError::Mismatch(format!(
                "moved {moved} of {length} bytes for {name}"
            )));
        }
        Ok(moved)
    }
}

/// Runs a protocol task until it finishes or the watchdog fires, whichever
/// comes first, and reduces the outcome to a [`FailureReason`].
pub(crate) async fn supervise<F>(
    watchdog: Watchdog,
    protocol: F,
) -> Result<Vec<CompletedFile>, FailureReason>
where
    F: Future<Output = Result<Vec<CompletedFile>, DriverError>> + Send + 'static,
{
    let task = tokio::spawn(protocol);
    let abort = task.abort_handle();

    tokio::select! {
        biased;
        _ = watchdog.fired() => {
            abort.abort();
            Err(FailureReason::ConnectionTimedOut)
        }
        joined = task => match joined {
            Ok(Ok(files)) => Ok(files),
            Ok(Err(e)) => {
                warn!(error = %e, "file transfer failed");
                Err(e.into_failure())
            }
            Err(e) => {
                warn!(error = %e, "file transfer task died");
                Err(FailureReason::Exception(e.to_string()))
            }
        },
    }
}
