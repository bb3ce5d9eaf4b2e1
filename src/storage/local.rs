//! Local-directory storage backend.
//!
//! Keys are paths relative to the data root. Every operation re-resolves
//! the joined path and verifies it still lies under the root before
//! touching the filesystem.

use std::path::{Component, Path, PathBuf};

use bytes::Bytes;

use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: PathBuf) -> Self {
        LocalStorage { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative key, rejecting anything that would escape the
    /// data root (absolute paths, `..`, drive prefixes).
    fn resolve(&self, rel_path: &str) -> AppResult<PathBuf> {
        let rel = Path::new(rel_path);
        let escapes = rel.components().any(|c| {
            !matches!(c, Component::Normal(_) | Component::CurDir)
        });
        if rel_path.is_empty() || escapes {
            tracing::warn!(rel_path = %rel_path, "Rejected unsafe local storage path");
            return Err(AppError::Validation("Invalid storage path".into()));
        }

        let joined = self.root.join(rel);
        debug_assert!(joined.starts_with(&self.root));
        Ok(joined)
    }

    pub async fn put(&self, rel_path: &str, bytes: &[u8]) -> AppResult<()> {
        let path = self.resolve(rel_path)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                tracing::error!(path = ?parent, error = ?e, "Failed to create storage directory");
                AppError::Internal
            })?;
        }
        tokio::fs::write(&path, bytes).await.map_err(|e| {
            tracing::error!(path = ?path, error = ?e, "Failed to write local file");
            AppError::Internal
        })
    }

    pub async fn get(&self, rel_path: &str) -> AppResult<Bytes> {
        let path = self.resolve(rel_path)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::NotFound("File not found".into()))
            }
            Err(e) => {
                tracing::error!(path = ?path, error = ?e, "Failed to read local file");
                Err(AppError::Internal)
            }
        }
    }

    /// Delete a file; missing files are treated as already deleted.
    pub async fn delete(&self, rel_path: &str) -> AppResult<()> {
        let path = self.resolve(rel_path)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                tracing::error!(path = ?path, error = ?e, "Failed to delete local file");
                Err(AppError::Internal)
            }
        }
    }

    /// List file names directly under a relative directory. A missing
    /// directory is an empty listing, matching the remote backend.
    pub async fn list(&self, rel_prefix: &str) -> AppResult<Vec<String>> {
        let dir = self.resolve(rel_prefix)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                tracing::error!(path = ?dir, error = ?e, "Failed to list local directory");
                return Err(AppError::Internal);
            }
        };

        let mut names = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await.map_err(|e| {
            tracing::warn!(path = ?dir, error = ?e, "Failed to read directory entry");
            e
        }) {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> (tempfile::TempDir, LocalStorage) {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = LocalStorage::new(dir.path().to_path_buf());
        (dir, storage)
    }

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let (_dir, storage) = storage();
        storage.put("files/abc/note.txt", b"hello").await.unwrap();

        let data = storage.get("files/abc/note.txt").await.unwrap();
        assert_eq!(&data[..], b"hello");

        storage.delete("files/abc/note.txt").await.unwrap();
        assert!(matches!(
            storage.get("files/abc/note.txt").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_missing_file_is_noop() {
        let (_dir, storage) = storage();
        storage.delete("files/none/missing.bin").await.unwrap();
    }

    #[tokio::test]
    async fn traversal_paths_are_rejected() {
        let (_dir, storage) = storage();
        for bad in ["../escape.txt", "files/../../etc/passwd", "/etc/passwd", ""] {
            assert!(
                matches!(storage.get(bad).await, Err(AppError::Validation(_))),
                "accepted unsafe path: {bad}"
            );
        }
    }

    #[tokio::test]
    async fn list_returns_sorted_names() {
        let (_dir, storage) = storage();
        storage.put("files/ch/b.txt", b"b").await.unwrap();
        storage.put("files/ch/a.txt", b"a").await.unwrap();

        let names = storage.list("files/ch").await.unwrap();
        assert_eq!(names, vec!["a.txt".to_string(), "b.txt".to_string()]);

        assert!(storage.list("files/empty").await.unwrap().is_empty());
    }
}
