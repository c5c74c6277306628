//! Lifecycle and progress events posted by every stage.

use std::net::IpAddr;
use std::path::PathBuf;

use oscar_protocol::SegmentedFilename;
use oscar_transfer::ProgressHandle;
use tokio::sync::mpsc;

use crate::error::FailureReason;
use crate::types::ConnectionType;

/// Pipeline stage a terminal event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Connection,
    Transfer,
}

/// A file that made it to disk (receiver) or was acknowledged (sender).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedFile {
    pub name: SegmentedFilename,
    pub path: PathBuf,
    pub size: u64,
    /// Offset the transfer resumed from; 0 for a fresh transfer.
    pub start_offset: u64,
    /// Bytes that actually crossed the wire for this file.
    pub bytes_transferred: u64,
}

/// Something observers of a transfer attempt may want to know.
#[derive(Debug, Clone)]
pub enum RvEvent {
    Resolving {
        host: String,
    },
    Connecting {
        host: String,
        port: u16,
    },
    WaitingForConnection {
        port: u16,
        addresses: Vec<IpAddr>,
    },
    /// The relay assigned an address the peer must be told about.
    ProxyAcknowledged {
        ip: IpAddr,
        port: u16,
    },
    Connected {
        connection_type: ConnectionType,
    },
    Checksumming {
        file: SegmentedFilename,
        progress: ProgressHandle,
    },
    TransferringFile {
        file: SegmentedFilename,
        progress: ProgressHandle,
    },
    FileComplete {
        file: SegmentedFilename,
        bytes: u64,
    },
    ResumeChecksumFailed {
        file: SegmentedFilename,
    },
    CorruptTransfer {
        file: SegmentedFilename,
        expected: u32,
        actual: u32,
    },
    Succeeded {
        files: Vec<CompletedFile>,
    },
    Failed {
        stage: Stage,
        reason: FailureReason,
    },
}

/// Fire-and-forget event sink. Posting never blocks and never fails; events
/// posted after the receiver is gone are dropped.
#[derive(Debug, Clone)]
pub struct EventPost {
    tx: Option<mpsc::UnboundedSender<RvEvent>>,
}

impl EventPost {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RvEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops everything.
    pub fn discard() -> Self {
        Self { tx: None }
    }

    pub fn post(&self, event: RvEvent) {
        tracing::trace!(?event, "rendezvous event");
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
