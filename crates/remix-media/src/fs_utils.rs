//! File contracts checked around every stage invocation.

use std::path::Path;

use crate::error::{MediaError, MediaResult};

/// True when `path` is a regular file with at least one byte.
pub async fn is_non_empty_file(path: &Path) -> bool {
    matches!(tokio::fs::metadata(path).await, Ok(meta) if meta.is_file() && meta.len() > 0)
}

/// Fail with `MissingInput` unless the input is present and non-empty.
pub async fn require_input(path: &Path) -> MediaResult<()> {
    if is_non_empty_file(path).await {
        Ok(())
    } else {
        Err(MediaError::MissingInput(path.to_path_buf()))
    }
}

/// Fail with `OutputNotProduced` when a tool reported success but left
/// nothing usable behind.
pub async fn require_output(tool: &str, path: &Path) -> MediaResult<()> {
    if is_non_empty_file(path).await {
        Ok(())
    } else {
        Err(MediaError::output_not_produced(tool, path))
    }
}

/// Create the parent directory of `path` if needed.
pub async fn ensure_parent(path: &Path) -> MediaResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_empty_file_is_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.mp3");
        tokio::fs::write(&path, b"").await.unwrap();

        assert!(matches!(require_input(&path).await, Err(MediaError::MissingInput(_))));
        assert!(matches!(
            require_output("ffmpeg", &path).await,
            Err(MediaError::OutputNotProduced { .. })
        ));

        tokio::fs::write(&path, b"ID3").await.unwrap();
        assert!(require_input(&path).await.is_ok());
    }

    #[tokio::test]
    async fn test_directory_is_not_an_input() {
        let dir = TempDir::new().unwrap();
        assert!(require_input(dir.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_ensure_parent_creates_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/c.wav");
        ensure_parent(&path).await.unwrap();
        assert!(dir.path().join("a/b").is_dir());
    }
}
