//! OFT rolling checksum.
//!
//! Both peers run the same arithmetic over the same byte range, so a sender
//! can tell whether a receiver's partial file is a true prefix of its own
//! before agreeing to resume.

use std::io::SeekFrom;
use std::sync::OnceLock;

use oscar_protocol::CHECKSUM_EMPTY;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

use crate::progress::ProgressHandle;
use crate::{CHECKSUM_BUFFER_SIZE, TransferError};

/// Incremental OFT checksum state.
///
/// The running 32-bit value is kept unfolded between calls; folding it early
/// would turn an all-ones sum into zero at a chunk boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OftChecksum {
    check: u32,
    position: u64,
}

impl Default for OftChecksum {
    fn default() -> Self {
        Self::new()
    }
}

impl OftChecksum {
    pub fn new() -> Self {
        Self {
            check: (CHECKSUM_EMPTY >> 16) & 0xffff,
            position: 0,
        }
    }

    /// Feeds the next bytes of the range. Byte parity is taken from the
    /// absolute position, so callers may split the range anywhere.
    pub fn update(&mut self, data: &[u8]) {
        let mut check = self.check;
        for (i, &byte) in data.iter().enumerate() {
            let previous = check;
            let value = if (self.position + i as u64) % 2 == 0 {
                u32::from(byte) << 8
            } else {
                u32::from(byte)
            };
            check = check.wrapping_sub(value);
            if check > previous {
                check = check.wrapping_sub(1);
            }
        }
        self.check = check;
        self.position += data.len() as u64;
    }

    pub fn value(&self) -> u32 {
        let mut check = self.check;
        check = (check & 0xffff) + (check >> 16);
        check = (check & 0xffff) + (check >> 16);
        check << 16
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> u64 {
        self.position
    }
}

/// Computes the checksum of an in-memory buffer.
pub fn checksum_bytes(data: &[u8]) -> u32 {
    let mut sum = OftChecksum::new();
    sum.update(data);
    sum.value()
}

/// Checksums the first `length` bytes of one file channel.
///
/// The result is computed at most once; later calls return the cached
/// value. Progress can be sampled from another task while it runs.
#[derive(Debug)]
pub struct Checksummer {
    length: u64,
    progress: ProgressHandle,
    result: OnceLock<u32>,
}

impl Checksummer {
    pub fn new(length: u64) -> Self {
        Self {
            length,
            progress: ProgressHandle::new(0, length),
            result: OnceLock::new(),
        }
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn progress(&self) -> ProgressHandle {
        self.progress.clone()
    }

    /// The computed checksum, once [`compute`](Self::compute) has finished.
    pub fn checksum(&self) -> Option<u32> {
        self.result.get().copied()
    }

    /// Reads `[0, length)` from `channel` and returns its checksum.
    ///
    /// Fails with [`TransferError::UnexpectedEof`] if the channel is shorter
    /// than the requested length.
    pub async fn compute<R>(&self, channel: &mut R) -> Result<u32, TransferError>
    where
        R: AsyncRead + AsyncSeek + Unpin,
    {
        if let Some(value) = self.checksum() {
            return Ok(value);
        }

        channel.seek(SeekFrom::Start(0)).await?;
        let mut sum = OftChecksum::new();
        let mut buf = vec![0u8; CHECKSUM_BUFFER_SIZE];
        while sum.position() < self.length {
            let want = (self.length - sum.position()).min(buf.len() as u64) as usize;
            let n = channel.read(&mut buf[..want]).await?;
            if n == 0 {
                return Err(TransferError::UnexpectedEof {
                    expected: self.length,
                    actual: sum.position(),
                });
            }
            sum.update(&buf[..n]);
            self.progress.set_position(sum.position());
        }

        let value = *self.result.get_or_init(|| sum.value());
        Ok(value)
    }
}
