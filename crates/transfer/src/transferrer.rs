use std::io::SeekFrom;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::pause::PauseHelper;
use crate::progress::ProgressHandle;
use crate::{CHUNK_SIZE, POLL_INTERVAL, TransferError};

/// Which way bytes flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// File to socket.
    Upload,
    /// Socket to file.
    Download,
}

/// Moves a byte range between a file and a socket in [`CHUNK_SIZE`] pieces.
///
/// Pause and cancel are checked before every chunk, and each socket
/// operation waits at most [`POLL_INTERVAL`] before the loop looks at them
/// again, so a stop request is noticed within one polling interval.
pub struct ByteTransferrer<'a, F, S> {
    file: &'a mut F,
    socket: &'a mut S,
    direction: Direction,
    offset: u64,
    length: u64,
    progress: ProgressHandle,
    pause: Arc<PauseHelper>,
    cancel: CancellationToken,
}

impl<'a, F, S> ByteTransferrer<'a, F, S>
where
    F: AsyncRead + AsyncWrite + AsyncSeek + Unpin,
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Prepares a transfer of `length` bytes starting at file offset `offset`.
    pub fn new(
        file: &'a mut F,
        socket: &'a mut S,
        direction: Direction,
        offset: u64,
        length: u64,
        pause: Arc<PauseHelper>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            file,
            socket,
            direction,
            offset,
            length,
            progress: ProgressHandle::new(offset, length),
            pause,
            cancel,
        }
    }

    /// Live absolute file position, safe to sample from other tasks.
    pub fn progress(&self) -> ProgressHandle {
        self.progress.clone()
    }

    /// Runs the transfer and returns the number of bytes moved.
    ///
    /// Cancellation is not an error: the partial count is returned and the
    /// caller decides what it means. The sink side is flushed on every exit
    /// path.
    pub async fn transfer(&mut self) -> Result<u64, TransferError> {
        self.file.seek(SeekFrom::Start(self.offset)).await?;

        let result = self.run().await;
        let flushed = match self.direction {
            Direction::Upload => self.socket.flush().await,
            Direction::Download => self.file.flush().await,
        };

        let moved = result?;
        flushed?;
        tracing::debug!(
            direction = ?self.direction,
            offset = self.offset,
            moved,
            requested = self.length,
            "byte transfer finished"
        );
        Ok(moved)
    }

    async fn run(&mut self) -> Result<u64, TransferError> {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut moved = 0u64;

        while moved < self.length {
            if !self.checkpoint().await {
                tracing::debug!(moved, "byte transfer cancelled");
                return Ok(moved);
            }

            let want = (self.length - moved).min(CHUNK_SIZE as u64) as usize;
            let n = match self.direction {
                Direction::Upload => self.upload_chunk(&mut buf[..want], moved).await?,
                Direction::Download => self.download_chunk(&mut buf[..want], moved).await?,
            };
            moved += n as u64;
            self.progress.set_position(self.offset + moved);
        }

        Ok(moved)
    }

    /// Returns `false` once cancelled; parks while paused.
    async fn checkpoint(&self) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            if !self.pause.is_paused() {
                return true;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = self.pause.wait_until_unpause() => {}
            }
        }
    }

    async fn upload_chunk(&mut self, buf: &mut [u8], moved: u64) -> Result<usize, TransferError> {
        let n = self.file.read(buf).await?;
        if n == 0 {
            return Err(TransferError::UnexpectedEof {
                expected: self.offset + self.length,
                actual: self.offset + moved,
            });
        }

        let mut written = 0;
        while written < n {
            if self.cancel.is_cancelled() {
                break;
            }
            match timeout(POLL_INTERVAL, self.socket.write(&buf[written..n])).await {
                Err(_) => continue,
                Ok(Ok(0)) => {
                    return Err(TransferError::ChannelClosed {
                        moved: moved + written as u64,
                    });
                }
                Ok(Ok(k)) => written += k,
                Ok(Err(e)) => return Err(e.into()),
            }
        }
        Ok(written)
    }

    /// Zero means the poll interval elapsed with nothing to read.
    async fn download_chunk(&mut self, buf: &mut [u8], moved: u64) -> Result<usize, TransferError> {
        match timeout(POLL_INTERVAL, self.socket.read(buf)).await {
            Err(_) => Ok(0),
            Ok(Ok(0)) => Err(TransferError::ChannelClosed { moved }),
            Ok(Ok(n)) => {
                self.file.write_all(&buf[..n]).await?;
                Ok(n)
            }
            Ok(Err(e)) => Err(e.into()),
        }
    }
}
