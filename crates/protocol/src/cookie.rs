//! ICBM cookies correlating a transfer with its rendezvous exchange.

use std::fmt;

use rand::Rng;

use crate::error::ProtocolError;

/// Cookie length in bytes.
pub const COOKIE_LEN: usize = 8;

/// The 8-byte ICBM message id shared by the rendezvous invitation, the
/// proxy init packets and every OFT header of the transfer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IcbmCookie([u8; COOKIE_LEN]);

impl IcbmCookie {
    pub const fn new(bytes: [u8; COOKIE_LEN]) -> Self {
        Self(bytes)
    }

    /// Generates a random cookie for a locally initiated rendezvous.
    pub fn generate() -> Self {
        let mut bytes = [0u8; COOKIE_LEN];
        rand::thread_rng().fill(&mut bytes);
        Self(bytes)
    }

    /// Parses a 16-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, ProtocolError> {
        let raw = hex::decode(s).map_err(|e| ProtocolError::InvalidCookie(e.to_string()))?;
        let bytes: [u8; COOKIE_LEN] = raw.as_slice().try_into().map_err(|_| {
            ProtocolError::InvalidCookie(format!(
                "expected {COOKIE_LEN} bytes, got {}",
                raw.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; COOKIE_LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; COOKIE_LEN]
    }
}

impl fmt::Display for IcbmCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for IcbmCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IcbmCookie({self})")
    }
}
