//! Wire formats for OSCAR rendezvous file transfers.
//!
//! Two binary protocols travel over a rendezvous stream:
//!
//! - [`oft`]: the OFT2 header exchanged once per protocol step of every file
//!   (send, ack, resume, resume-sendheader, resume-ack, received).
//! - [`proxy`]: the init / ack / ready / error handshake spoken to a
//!   rendezvous proxy relay before the stream carries OFT traffic.
//!
//! All integers on the wire are big-endian.

mod codec;

pub mod capability;
pub mod cookie;
pub mod error;
pub mod filename;
pub mod oft;
pub mod proxy;

pub use capability::CAP_FILE_TRANSFER;
pub use cookie::IcbmCookie;
pub use error::ProtocolError;
pub use filename::SegmentedFilename;
pub use oft::{CHECKSUM_EMPTY, Charset, FileTransferHeader, HeaderType};
pub use proxy::{ProxyErrorCode, ProxyPacket};
