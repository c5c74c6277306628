use std::path::PathBuf;
use std::sync::Arc;

use oscar_protocol::oft::FLAG_DONE;
use oscar_protocol::{FileTransferHeader, HeaderType, SegmentedFilename};
use oscar_transfer::{Direction, TransferError, TransferredFile, validate_filename};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{info, warn};

use super::{DriverContext, DriverError, expect_header, supervise};
use crate::error::FailureReason;
use crate::events::{CompletedFile, RvEvent};

/// Decides where an incoming file is written.
pub trait FileMapper: Send + Sync {
    fn map(&self, name: &SegmentedFilename) -> Result<PathBuf, TransferError>;
}

/// Writes incoming files below one directory, rejecting names that would
/// escape it.
#[derive(Debug, Clone)]
pub struct DownloadDirMapper {
    root: PathBuf,
}

impl DownloadDirMapper {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FileMapper for DownloadDirMapper {
    fn map(&self, name: &SegmentedFilename) -> Result<PathBuf, TransferError> {
        Ok(self.root.join(validate_filename(name)?))
    }
}

/// Receiving side of a batch. Files are discovered one at a time from the
/// sender's headers.
pub struct ReceiveDriver<S> {
    ctx: DriverContext,
    stream: S,
    mapper: Arc<dyn FileMapper>,
}

impl<S> ReceiveDriver<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
{
    pub fn new(ctx: DriverContext, stream: S, mapper: Arc<dyn FileMapper>) -> Self {
        Self { ctx, stream, mapper }
    }

    /// Receives files until the sender's counters reach zero.
    pub async fn run(self) -> Result<Vec<CompletedFile>, FailureReason> {
        let watchdog = self.ctx.watchdog.clone();
        supervise(watchdog, self.receive_all()).await
    }

    async fn receive_all(mut self) -> Result<Vec<CompletedFile>, DriverError> {
        let mut completed = Vec::new();
        loop {
            let (file, received) = self.receive_one().await?;
            completed.push(file);
            if received.files_left == 0 && received.parts_left == 0 {
                info!(files = completed.len(), "batch received");
                return Ok(completed);
            }
        }
    }

    async fn receive_one(&mut self) -> Result<(CompletedFile, FileTransferHeader), DriverError> {
        let offer = self.ctx.read_header(&mut self.stream).await?;
        expect_header(&offer, HeaderType::Send, "SEND")?;

        let name = offer.filename.clone();
        let path = self.mapper.map(&name)?;
        let size = u64::from(offer.file_size);
        let mut local = TransferredFile::open_for_receive(
            &path,
            name.clone(),
            offer.file_size,
            offer.last_modified,
        )
        .await
        .map_err(DriverError::LocalFile)?;

        let existing = local.current_length().await.map_err(DriverError::LocalFile)?;
        let start = if existing > 0 && existing <= size {
            self.negotiate_resume(&mut local, &offer, existing).await?
        } else {
            local.truncate(0).await.map_err(DriverError::LocalFile)?;
            let mut ack = offer.reply(HeaderType::Ack);
            ack.bytes_received = 0;
            self.ctx.write_header(&mut self.stream, &ack).await?;
            0
        };

        let moved = self
            .ctx
            .move_bytes(
                local.channel(),
                &mut self.stream,
                Direction::Download,
                &name,
                start,
                size - start,
            )
            .await?;

        let actual = self.ctx.checksum(local.channel(), &name, size).await?;
        if actual != offer.checksum {
            warn!(
                file = %name,
                expected = format_args!("{:#010x}", offer.checksum),
                actual = format_args!("{actual:#010x}"),
                "received file is corrupt"
            );
            self.ctx.conn().post(RvEvent::CorruptTransfer {
                file: name,
                expected: offer.checksum,
                actual,
            });
            return Err(DriverError::Fatal(FailureReason::CorruptTransfer));
        }

        let path = local.finish().await.map_err(DriverError::LocalFile)?;
        info!(file = %name, path = %path.display(), size, start, moved, "file received");
        self.ctx.conn().post(RvEvent::FileComplete {
            file: name.clone(),
            bytes: moved,
        });

        let mut received = offer.reply(HeaderType::Received);
        received.files_left = offer.files_left.saturating_sub(1);
        received.parts_left = offer.parts_left.saturating_sub(1);
        received.bytes_received = offer.file_size;
        received.received_checksum = actual;
        received.flags |= FLAG_DONE;
        self.ctx.write_header(&mut self.stream, &received).await?;

        Ok((
            CompletedFile {
                name,
                path,
                size,
                start_offset: start,
                bytes_transferred: moved,
            },
            received,
        ))
    }

    /// Offers our partial copy for resumption and returns the agreed offset.
    ///
    /// The sender may lower the offset (its checksum of our prefix did not
    /// match) but never raise it past what we have on disk.
    async fn negotiate_resume(
        &mut self,
        local: &mut TransferredFile,
        offer: &FileTransferHeader,
        existing: u64,
    ) -> Result<u64, DriverError> {
        let name = &offer.filename;
        let prefix = self.ctx.checksum(local.channel(), name, existing).await?;

        let mut resume = offer.reply(HeaderType::Resume);
        resume.bytes_received = existing as u32;
        resume.received_checksum = prefix;
        self.ctx.write_header(&mut self.stream, &resume).await?;

        let reply = self.ctx.read_header(&mut self.stream).await?;
        expect_header(&reply, HeaderType::ResumeSendHeader, "RESUME_SENDHEADER")?;
        let offered = u64::from(reply.bytes_received);
        if offered > existing {
            warn!(
                file = %name,
                claimed = offered,
                local = existing,
                "peer offset exceeds local file"
            );
            return Err(DriverError::Fatal(FailureReason::InvalidResumeOffset {
                claimed: offered,
                local: existing,
            }));
        }

        let mut ack = reply.reply(HeaderType::ResumeAck);
        ack.bytes_received = reply.bytes_received;
        self.ctx.write_header(&mut self.stream, &ack).await?;

        if offered < existing {
            local.truncate(offered).await.map_err(DriverError::LocalFile)?;
        }
        info!(file = %name, offset = offered, "resuming transfer");
        Ok(offered)
    }
}
