use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

#[async_trait]
pub trait Storage: Send + Sync {
    async fn read_to_string(&self, path: &Path) -> Result<String>;
    async fn write(&self, path: &Path, content: &[u8]) -> Result<()>;
    async fn append_line(&self, path: &Path, line: &str) -> Result<()>;
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// `dir/stem.ext`, or `dir/stem_2.ext`, `dir/stem_3.ext`, ... if taken.
    async fn unique_path(&self, dir: &Path, stem: &str, ext: &str) -> Result<PathBuf> {
        let first = dir.join(format!("{}.{}", stem, ext));
        if !self.exists(&first).await? {
            return Ok(first);
        }
        let mut n = 2;
        loop {
            let candidate = dir.join(format!("{}_{}.{}", stem, n, ext));
            if !self.exists(&candidate).await? {
                return Ok(candidate);
            }
            n += 1;
        }
    }
}

pub struct NativeStorage;

impl NativeStorage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NativeStorage {
    fn default() -> Self {
        Self::new()
    }
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

#[async_trait]
impl Storage for NativeStorage {
    async fn read_to_string(&self, path: &Path) -> Result<String> {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }

    async fn write(&self, path: &Path, content: &[u8]) -> Result<()> {
        ensure_parent(path).await?;
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    async fn append_line(&self, path: &Path, line: &str) -> Result<()> {
        ensure_parent(path).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        file.write_all(format!("{}\n", line).as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_line_creates_and_appends() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("names.txt");
        let storage = NativeStorage::new();

        storage.append_line(&path, "Elena").await?;
        storage.append_line(&path, "Marcus").await?;
        assert_eq!(storage.read_to_string(&path).await?, "Elena\nMarcus\n");
        Ok(())
    }

    #[tokio::test]
    async fn test_unique_path_skips_taken_names() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = NativeStorage::new();

        let first = storage.unique_path(dir.path(), "Elena", "txt").await?;
        assert!(first.ends_with("Elena.txt"));
        storage.write(&first, b"one").await?;

        let second = storage.unique_path(dir.path(), "Elena", "txt").await?;
        assert!(second.ends_with("Elena_2.txt"));
        Ok(())
    }
}
