//! Rendezvous file transfers over OSCAR.
//!
//! A transfer attempt runs as a two-stage pipeline:
//!
//! 1. [`ConnectionController`] drives one [`Connector`] (outgoing, passive or
//!    proxy) to an open stream under the timeout for its
//!    [`ConnectionType`].
//! 2. [`SendDriver`] or [`ReceiveDriver`] runs the OFT handshake for every
//!    file in the batch over that stream: declare, resume negotiation, bulk
//!    transfer, checksum verification, acknowledgement.
//!
//! Progress and lifecycle are reported as [`RvEvent`]s through the
//! connection's [`EventPost`]. Files already written when a batch fails are
//! left on disk.

pub mod connection;
pub mod connector;
pub mod controller;
pub mod driver;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod settings;
pub mod state;
pub mod stream;
pub mod timeout;
pub mod types;

pub use connection::RvConnection;
pub use connector::{Connector, OutgoingConnector, PassiveConnector, ProxyConnector, ProxyMode};
pub use controller::{ConnectionController, ControllerHandle, Established};
pub use driver::{
    DownloadDirMapper, DriverContext, FileMapper, OutgoingFile, ReceiveDriver, SendDriver,
};
pub use error::{FailureReason, RendezvousError};
pub use events::{CompletedFile, EventPost, RvEvent, Stage};
pub use pipeline::{PipelineHandle, TransferRole, run_pipeline, spawn_pipeline};
pub use settings::{Settings, SocksProxy};
pub use state::{StateController, StateInfo};
pub use stream::StreamInfo;
pub use timeout::{PauseGuard, TimeoutScheduler, Watchdog};
pub use types::{ConnectionInfo, ConnectionType, Initiator};
