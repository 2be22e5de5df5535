//! File access for probes

use super::error::{is_exhaustion, FactError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

/// What a path resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    /// Regular file with any execute bit set.
    Executable,
    Directory,
    Other,
}

/// Reads host files on behalf of probes.
///
/// Missing, unreadable and empty files all read as `None`. Only descriptor
/// exhaustion is an error.
#[async_trait]
pub trait FileReader: Send + Sync {
    async fn read(&self, path: &Path) -> Result<Option<String>, FactError>;

    async fn exists(&self, path: &Path) -> bool;

    /// Sorted entry names of a directory; empty when absent.
    async fn list_dir(&self, path: &Path) -> Result<Vec<String>, FactError>;

    async fn read_link(&self, path: &Path) -> Option<PathBuf>;

    /// Kind of the file `path` points at; `None` when absent.
    async fn file_kind(&self, path: &Path) -> Option<FileKind>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemFileReader;

#[async_trait]
impl FileReader for SystemFileReader {
    async fn read(&self, path: &Path) -> Result<Option<String>, FactError> {
        match fs::read(path).await {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if is_exhaustion(&e) => Err(FactError::from_io(
                format!("read {}", path.display()),
                e,
            )),
            Err(_) => Ok(None),
        }
    }

    async fn exists(&self, path: &Path) -> bool {
        fs::symlink_metadata(path).await.is_ok()
    }

    async fn list_dir(&self, path: &Path) -> Result<Vec<String>, FactError> {
        let mut entries = match fs::read_dir(path).await {
            Ok(entries) => entries,
            Err(e) if is_exhaustion(&e) => {
                return Err(FactError::from_io(format!("list {}", path.display()), e))
            }
            Err(_) => return Ok(Vec::new()),
        };

        let mut names = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn read_link(&self, path: &Path) -> Option<PathBuf> {
        fs::read_link(path).await.ok()
    }

    async fn file_kind(&self, path: &Path) -> Option<FileKind> {
        let metadata = fs::metadata(path).await.ok()?;
        if metadata.is_dir() {
            return Some(FileKind::Directory);
        }
        if !metadata.is_file() {
            return Some(FileKind::Other);
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if metadata.permissions().mode() & 0o111 != 0 {
                return Some(FileKind::Executable);
            }
        }
        Some(FileKind::Regular)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_empty_and_missing_files_are_absent() {
        let dir = TempDir::new().unwrap();
        let empty = dir.path().join("empty");
        std::fs::write(&empty, "").unwrap();

        let reader = SystemFileReader;
        assert_eq!(reader.read(&empty).await.unwrap(), None);
        assert_eq!(reader.read(&dir.path().join("missing")).await.unwrap(), None);
        assert!(reader.exists(&empty).await);
    }

    #[tokio::test]
    async fn test_reads_contents_and_lists_sorted() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b"), "two").unwrap();
        std::fs::write(dir.path().join("a"), "one").unwrap();

        let reader = SystemFileReader;
        assert_eq!(
            reader.read(&dir.path().join("a")).await.unwrap().as_deref(),
            Some("one")
        );
        assert_eq!(reader.list_dir(dir.path()).await.unwrap(), vec!["a", "b"]);
        assert!(reader
            .list_dir(&dir.path().join("nope"))
            .await
            .unwrap()
            .is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_kinds() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let plain = dir.path().join("plain");
        let script = dir.path().join("script");
        std::fs::write(&plain, "data").unwrap();
        std::fs::write(&script, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let reader = SystemFileReader;
        assert_eq!(reader.file_kind(&plain).await, Some(FileKind::Regular));
        assert_eq!(reader.file_kind(&script).await, Some(FileKind::Executable));
        assert_eq!(reader.file_kind(dir.path()).await, Some(FileKind::Directory));
        assert_eq!(reader.file_kind(&dir.path().join("gone")).await, None);
    }
}
