use std::{
    io::SeekFrom,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    sync::Mutex,
};

use crate::VlogStorageError;

use super::StorageBackend;

/// A basic file-backed [StorageBackend]. The space is a single file; the
/// handle is opened once and shared by clones.
#[derive(Clone, Debug)]
pub struct FileSystemStorageBackend {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl FileSystemStorageBackend {
    /// Opens (creating if needed) the file at `path`, along with any missing
    /// parent directories.
    pub async fn new<Pathlike>(path: Pathlike) -> Result<Self, VlogStorageError>
    where
        Pathlike: AsRef<Path>,
    {
        let path = path.as_ref().to_owned();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    /// The path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StorageBackend for FileSystemStorageBackend {
    async fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>, VlogStorageError> {
        let mut file = self.file.lock().await;
        let size = file.metadata().await?.len();
        if offset.saturating_add(length) > size {
            return Err(VlogStorageError::NotFound { offset, length });
        }

        let mut buffer = vec![0u8; length as usize];
        file.seek(SeekFrom::Start(offset)).await?;
        file.read_exact(&mut buffer).await?;
        Ok(buffer)
    }

    async fn write(&self, offset: u64, bytes: &[u8]) -> Result<(), VlogStorageError> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(())
    }

    async fn len(&self) -> Result<u64, VlogStorageError> {
        let file = self.file.lock().await;
        Ok(file.metadata().await?.len())
    }
}
