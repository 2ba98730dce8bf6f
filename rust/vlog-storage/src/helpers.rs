use anyhow::Result;

use crate::FileSystemStorageProvider;

/// Creates a file-system [`crate::StorageProvider`] rooted in a fresh temporary
/// directory, for use in tests. The directory is removed when the returned
/// guard is dropped.
pub async fn make_target_storage() -> Result<(FileSystemStorageProvider, tempfile::TempDir)> {
    let root = tempfile::tempdir()?;
    let provider = FileSystemStorageProvider::new(root.path());
    Ok((provider, root))
}
