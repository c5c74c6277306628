use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use oscar_protocol::SegmentedFilename;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::TransferError;

/// One file taking part in a batch, with its open channel.
///
/// Owned by the protocol driver for the duration of that file's exchange;
/// dropping it closes the channel.
#[derive(Debug)]
pub struct TransferredFile {
    path: PathBuf,
    name: SegmentedFilename,
    size: u32,
    last_modified: u32,
    file: File,
}

impl TransferredFile {
    /// Opens a local file to be offered to the peer under `name`.
    pub async fn open_for_send(
        path: &Path,
        name: SegmentedFilename,
    ) -> Result<Self, TransferError> {
        let file = File::open(path).await?;
        let meta = file.metadata().await?;
        let size = u32::try_from(meta.len())
            .map_err(|_| TransferError::FileTooLarge { size: meta.len() })?;
        let last_modified = meta.modified().map(unix_seconds).unwrap_or(0);

        Ok(Self {
            path: path.to_path_buf(),
            name,
            size,
            last_modified,
            file,
        })
    }

    /// Opens (creating if needed) the destination of an incoming file.
    ///
    /// Existing content is kept so a partial download can be resumed;
    /// callers truncate once the start offset is agreed.
    pub async fn open_for_receive(
        path: &Path,
        name: SegmentedFilename,
        size: u32,
        last_modified: u32,
    ) -> Result<Self, TransferError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .await?;

        Ok(Self {
            path: path.to_path_buf(),
            name,
            size,
            last_modified,
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &SegmentedFilename {
        &self.name
    }

    /// Declared size of the complete file.
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn last_modified(&self) -> u32 {
        self.last_modified
    }

    /// Bytes currently on disk.
    pub async fn current_length(&self) -> Result<u64, TransferError> {
        Ok(self.file.metadata().await?.len())
    }

    pub async fn truncate(&mut self, len: u64) -> Result<(), TransferError> {
        self.file.set_len(len).await?;
        Ok(())
    }

    /// Random-access channel for checksumming and byte transfer.
    pub fn channel(&mut self) -> &mut File {
        &mut self.file
    }

    /// Flushes a received file to disk and stamps the sender's modification
    /// time on it.
    pub async fn finish(mut self) -> Result<PathBuf, TransferError> {
        self.file.flush().await?;
        self.file.sync_all().await?;

        if self.last_modified != 0 {
            let modified = UNIX_EPOCH + Duration::from_secs(u64::from(self.last_modified));
            let std_file = self.file.into_std().await;
            let stamped = tokio::task::spawn_blocking(move || std_file.set_modified(modified))
                .await
                .map_err(std::io::Error::other)?;
            if let Err(e) = stamped {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "could not set modification time"
                );
            }
        }

        Ok(self.path)
    }
}

fn unix_seconds(t: SystemTime) -> u32 {
    t.duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| u32::try_from(d.as_secs()).ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

    use super::*;

    fn name(s: &str) -> SegmentedFilename {
        SegmentedFilename::from_segments([s])
    }

    #[tokio::test]
    async fn send_side_reads_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, vec![7u8; 1234]).unwrap();

        let f = TransferredFile::open_for_send(&path, name("a.bin")).await.unwrap();
        assert_eq!(f.size(), 1234);
        assert!(f.last_modified() > 0);
        assert_eq!(f.name().file_name(), Some("a.bin"));
    }

    #[tokio::test]
    async fn send_side_refuses_files_beyond_u32() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.img");
        let sparse = std::fs::File::create(&path).unwrap();
        sparse.set_len(1 << 32).unwrap();

        let result = TransferredFile::open_for_send(&path, name("huge.img")).await;
        assert!(matches!(
            result,
            Err(TransferError::FileTooLarge { size }) if size == 1 << 32
        ));
    }

    #[tokio::test]
    async fn receive_side_keeps_existing_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.bin");
        std::fs::write(&path, b"hello").unwrap();

        let mut f = TransferredFile::open_for_receive(&path, name("partial.bin"), 10, 0)
            .await
            .unwrap();
        assert_eq!(f.current_length().await.unwrap(), 5);

        f.truncate(2).await.unwrap();
        assert_eq!(f.current_length().await.unwrap(), 2);

        let ch = f.channel();
        ch.seek(std::io::SeekFrom::Start(0)).await.unwrap();
        let mut buf = Vec::new();
        ch.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"he");
    }

    #[tokio::test]
    async fn receive_side_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("x.txt");
        let f = TransferredFile::open_for_receive(&path, name("x.txt"), 0, 0)
            .await
            .unwrap();
        assert_eq!(f.current_length().await.unwrap(), 0);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn finish_stamps_modification_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stamped.txt");
        let stamp = 1_100_000_000u32;

        let mut f = TransferredFile::open_for_receive(&path, name("stamped.txt"), 3, stamp)
            .await
            .unwrap();
        f.channel().write_all(b"abc").await.unwrap();
        let written = f.finish().await.unwrap();

        let modified = std::fs::metadata(&written).unwrap().modified().unwrap();
        assert_eq!(unix_seconds(modified), stamp);
        assert_eq!(std::fs::read(&written).unwrap(), b"abc");
    }
}
