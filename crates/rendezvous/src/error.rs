//! Error and failure types for rendezvous transfers.

use oscar_protocol::{ProtocolError, ProxyErrorCode};
use oscar_transfer::TransferError;

use crate::types::ConnectionType;

/// Errors raised while setting up or running one stage of a transfer.
#[derive(Debug, thiserror::Error)]
pub enum RendezvousError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("SOCKS proxy error: {0}")]
    Socks(#[from] tokio_socks::Error),

    #[error("invalid settings: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no {0:?} address in connection info")]
    MissingAddress(ConnectionType),

    #[error("no port in connection info")]
    MissingPort,

    #[error("connection type {0:?} is not handled by this connector")]
    UnsupportedConnectionType(ConnectionType),

    #[error("could not resolve {0}")]
    Unresolved(String),

    #[error("proxy error: {0}")]
    Proxy(ProxyErrorCode),

    #[error("unexpected {0} packet from proxy")]
    UnexpectedProxyPacket(&'static str),

    #[error("connector used before prepare_stream")]
    NotPrepared,
}

impl RendezvousError {
    /// Terminal reason reported when this error ends a stage.
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            Self::Proxy(code) if code.is_timeout() => FailureReason::ProxyTimedOut,
            Self::Proxy(code) => FailureReason::ProxyError(*code),
            other => FailureReason::Exception(other.to_string()),
        }
    }
}

/// Why a pipeline stage failed. Reported exactly once per attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureReason {
    #[error("connection timed out")]
    ConnectionTimedOut,

    #[error("cancelled locally")]
    LocallyCancelled,

    #[error("{0}")]
    Exception(String),

    #[error("checksum mismatch after transfer")]
    CorruptTransfer,

    #[error("unexpected protocol state")]
    UnknownError,

    #[error("proxy timed out")]
    ProxyTimedOut,

    #[error("proxy error: {0}")]
    ProxyError(ProxyErrorCode),

    #[error("peer claimed resume offset {claimed} beyond local length {local}")]
    InvalidResumeOffset { claimed: u64, local: u64 },
}
