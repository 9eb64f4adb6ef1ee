//! Filesystem primitives for cache artifacts.
//!
//! Cache files are never edited in place: they are written once by the create
//! script and afterwards only copied or removed. Copies into a shared slot go
//! through a temporary sibling and a rename, so readers see either the old or
//! the new file, never a partial one.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;
use uuid::Uuid;

/// Create the parent directory of `path` if it is missing.
pub async fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    Ok(())
}

/// Size of the file at `path`, or `None` if nothing is there.
pub async fn file_size(path: &Path) -> io::Result<Option<u64>> {
    match fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Copy `src` over `dst` atomically, returning the number of bytes copied.
pub async fn atomic_copy(src: &Path, dst: &Path) -> io::Result<u64> {
    ensure_parent_dir(dst).await?;

    let staging = staging_path(dst);
    let copied = match fs::copy(src, &staging).await {
        Ok(n) => n,
        Err(e) => {
            let _ = fs::remove_file(&staging).await;
            return Err(e);
        }
    };

    if let Err(e) = fs::rename(&staging, dst).await {
        let _ = fs::remove_file(&staging).await;
        return Err(e);
    }

    debug!(
        src = %src.display(),
        dst = %dst.display(),
        size = copied,
        "Copied cache file"
    );

    Ok(copied)
}

/// Delete `path`; returns whether a file was actually removed.
pub async fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "Removed file");
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Hidden sibling of `dst` on the same filesystem, so the rename is atomic.
fn staging_path(dst: &Path) -> PathBuf {
    let name = dst
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "cache".to_string());
    dst.with_file_name(format!(".{name}.{}.tmp", Uuid::new_v4().simple()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_atomic_copy_overwrites() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("new.bin");
        let dst = tmp.path().join("master").join("master_cache.bin");

        fs::write(&src, vec![7u8; 4096]).await.unwrap();
        ensure_parent_dir(&dst).await.unwrap();
        fs::write(&dst, b"old master").await.unwrap();

        let copied = atomic_copy(&src, &dst).await.unwrap();
        assert_eq!(copied, 4096);
        assert_eq!(fs::read(&dst).await.unwrap(), vec![7u8; 4096]);

        // No staging files left behind.
        let mut entries = fs::read_dir(dst.parent().unwrap()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name());
        }
        assert_eq!(names.len(), 1);
    }

    #[tokio::test]
    async fn test_atomic_copy_missing_source() {
        let tmp = TempDir::new().unwrap();
        let dst = tmp.path().join("master_cache.bin");

        let result = atomic_copy(&tmp.path().join("absent.bin"), &dst).await;
        assert!(result.is_err());
        assert!(!dst.exists());
    }

    #[tokio::test]
    async fn test_remove_if_exists_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("chunk.txt");
        fs::write(&path, b"text").await.unwrap();

        assert!(remove_if_exists(&path).await.unwrap());
        assert!(!remove_if_exists(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_file_size() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.bin");
        assert_eq!(file_size(&path).await.unwrap(), None);

        fs::write(&path, vec![0u8; 10]).await.unwrap();
        assert_eq!(file_size(&path).await.unwrap(), Some(10));
        assert_eq!(file_size(tmp.path()).await.unwrap(), None);
    }
}
