//! Error types for the wire codecs.

/// Errors produced while encoding or decoding rendezvous wire records.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad OFT magic: {0:02x?}")]
    BadMagic([u8; 4]),

    #[error("unknown OFT header type: 0x{0:04x}")]
    UnknownHeaderType(u16),

    #[error("header length {0} out of range")]
    BadHeaderLength(usize),

    #[error("unsupported proxy protocol version: 0x{0:04x}")]
    BadProxyVersion(u16),

    #[error("unknown proxy command: 0x{0:04x}")]
    UnknownProxyCommand(u16),

    #[error("truncated {0}")]
    Truncated(&'static str),

    #[error("invalid cookie: {0}")]
    InvalidCookie(String),

    #[error("{field} too long: {len} bytes (max {max})")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
}
