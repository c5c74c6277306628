use std::path::{Path, PathBuf};

use oscar_protocol::{CHECKSUM_EMPTY, FileTransferHeader, HeaderType, SegmentedFilename};
use oscar_transfer::{Direction, TransferError, TransferredFile};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{info, warn};

use super::{DriverContext, DriverError, expect_header, supervise};
use crate::error::FailureReason;
use crate::events::{CompletedFile, RvEvent};

/// A local file offered to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingFile {
    pub path: PathBuf,
    pub name: SegmentedFilename,
}

impl OutgoingFile {
    /// Offers `path` under its bare file name.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| SegmentedFilename::from_path(Path::new(n)))
            .unwrap_or_default();
        Self { path, name }
    }

    pub fn with_name(path: impl Into<PathBuf>, name: SegmentedFilename) -> Self {
        Self {
            path: path.into(),
            name,
        }
    }
}

/// Sending side of a batch.
pub struct SendDriver<S> {
    ctx: DriverContext,
    stream: S,
    files: Vec<OutgoingFile>,
}

impl<S> SendDriver<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
{
    pub fn new(ctx: DriverContext, stream: S, files: Vec<OutgoingFile>) -> Self {
        Self { ctx, stream, files }
    }

    /// Sends every file in order. Succeeds only if the peer acknowledged the
    /// whole batch.
    pub async fn run(self) -> Result<Vec<CompletedFile>, FailureReason> {
        let watchdog = self.ctx.watchdog.clone();
        supervise(watchdog, self.send_all()).await
    }

    async fn send_all(mut self) -> Result<Vec<CompletedFile>, DriverError> {
        if self.files.is_empty() {
            return Err(DriverError::Fatal(FailureReason::Exception(
                "no files to send".into(),
            )));
        }
        let total_files = u16::try_from(self.files.len())
            .map_err(|_| {
                DriverError::Mismatch(format!("{} files in one batch", self.files.len()))
            })?;

        let mut total_size = 0u64;
        for file in &self.files {
            total_size += tokio::fs::metadata(&file.path)
                .await
                .map_err(|e| DriverError::LocalFile(e.into()))?
                .len();
        }
        let total_size = u32::try_from(total_size)
            .map_err(|_| DriverError::LocalFile(TransferError::FileTooLarge { size: total_size }))?;

        let files = std::mem::take(&mut self.files);
        let mut completed = Vec::with_capacity(files.len());
        for (index, file) in files.into_iter().enumerate() {
            let files_left = total_files - index as u16;
            let done = self
                .send_one(file, total_files, files_left, total_size, &mut completed)
                .await?;
            let last = usize::from(files_left) == 1;
            if done != last {
                return Err(DriverError::Mismatch(format!(
                    "peer reported batch done={done} with {} files left",
                    files_left - 1
                )));
            }
        }

        info!(files = completed.len(), "batch sent");
        Ok(completed)
    }

    /// Returns whether the peer's RECEIVED header closed the batch.
    async fn send_one(
        &mut self,
        file: OutgoingFile,
        total_files: u16,
        files_left: u16,
        total_size: u32,
        completed: &mut Vec<CompletedFile>,
    ) -> Result<bool, DriverError> {
        let mut local = TransferredFile::open_for_send(&file.path, file.name.clone())
            .await
            .map_err(DriverError::LocalFile)?;
        let name = file.name;
        let size = u64::from(local.size());

        let checksum = self.ctx.checksum(local.channel(), &name, size).await?;

        let mut header = FileTransferHeader::new(HeaderType::Send, self.ctx.conn().cookie());
        header.total_files = total_files;
        header.files_left = files_left;
        header.total_parts = 1;
        header.parts_left = 1;
        header.total_size = total_size;
        header.file_size = local.size();
        header.last_modified = local.last_modified();
        header.checksum = checksum;
        header.set_filename(name.clone());
        self.ctx.write_header(&mut self.stream, &header).await?;

        let reply = self.ctx.read_header(&mut self.stream).await?;
        let start = match reply.header_type {
            HeaderType::Ack => 0,
            HeaderType::Resume => self.negotiate_resume(&mut local, &header, &reply).await?,
            other => {
                return Err(DriverError::UnexpectedHeader {
                    expected: "ACK or RESUME",
                    got: other,
                });
            }
        };

        let moved = self
            .ctx
            .move_bytes(
                local.channel(),
                &mut self.stream,
                Direction::Upload,
                &name,
                start,
                size - start,
            )
            .await?;

        let received = self.ctx.read_header(&mut self.stream).await?;
        expect_header(&received, HeaderType::Received, "RECEIVED")?;
        if received.bytes_received != header.file_size || received.received_checksum != checksum {
            return Err(DriverError::Mismatch(format!(
                "peer received {} bytes with checksum {:#010x}, sent {} with {:#010x}",
                received.bytes_received, received.received_checksum, header.file_size, checksum
            )));
        }

        info!(file = %name, size, start, moved, "file sent");
        self.ctx.conn().post(RvEvent::FileComplete {
            file: name.clone(),
            bytes: moved,
        });
        completed.push(CompletedFile {
            name,
            path: file.path,
            size,
            start_offset: start,
            bytes_transferred: moved,
        });

        Ok(received.files_left == 0 && received.parts_left == 0)
    }

    /// Verifies the peer's claimed prefix against our own copy and agrees on
    /// a start offset. A prefix that does not match restarts the file from
    /// zero.
    async fn negotiate_resume(
        &mut self,
        local: &mut TransferredFile,
        header: &FileTransferHeader,
        resume: &FileTransferHeader,
    ) -> Result<u64, DriverError> {
        let name = header.filename.clone();
        let claimed = u64::from(resume.bytes_received);
        let size = u64::from(header.file_size);

        let (start, prefix_checksum) = if claimed > size {
            warn!(file = %name, claimed, size, "peer claims more than the whole file, restarting");
            self.ctx.conn().post(RvEvent::ResumeChecksumFailed { file: name.clone() });
            (0, CHECKSUM_EMPTY)
        } else {
            let ours = self.ctx.checksum(local.channel(), &name, claimed).await?;
            if ours == resume.received_checksum {
                info!(file = %name, offset = claimed, "resuming transfer");
                (claimed, ours)
            } else {
                warn!(
                    file = %name,
                    claimed,
                    theirs = format_args!("{:#010x}", resume.received_checksum),
                    ours = format_args!("{ours:#010x}"),
                    "resume checksum mismatch, restarting"
                );
                self.ctx.conn().post(RvEvent::ResumeChecksumFailed { file: name.clone() });
                (0, CHECKSUM_EMPTY)
            }
        };

        let mut offer = header.reply(HeaderType::ResumeSendHeader);
        offer.bytes_received = start as u32;
        offer.received_checksum = prefix_checksum;
        self.ctx.write_header(&mut self.stream, &offer).await?;

        let ack = self.ctx.read_header(&mut self.stream).await?;
        expect_header(&ack, HeaderType::ResumeAck, "RESUME_ACK")?;
        if u64::from(ack.bytes_received) != start {
            return Err(DriverError::Mismatch(format!(
                "peer acknowledged offset {} instead of {start}",
                ack.bytes_received
            )));
        }
        Ok(start)
    }
}
