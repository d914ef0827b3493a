use async_trait::async_trait;

use crate::core::error::Result;

#[async_trait]
pub trait Storage: Send + Sync {
    async fn read(&self, path: &str) -> Result<Vec<u8>>;
    async fn write(&self, path: &str, content: &[u8]) -> Result<()>;
    async fn exists(&self, path: &str) -> Result<bool>;
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

#[async_trait]
impl Storage for NativeStorage {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(path).await?)
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_creates_parent_directories() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested/out/strip.png");
        let path_str = path.to_string_lossy().to_string();

        let storage = NativeStorage::new();
        assert!(!storage.exists(&path_str).await?);

        storage.write(&path_str, b"png bytes").await?;
        assert!(storage.exists(&path_str).await?);
        assert_eq!(storage.read(&path_str).await?, b"png bytes");
        Ok(())
    }

    #[tokio::test]
    async fn test_read_missing_file_is_io_error() {
        let storage = NativeStorage::new();
        let err = storage.read("/definitely/not/here.png").await.unwrap_err();
        assert!(matches!(err, crate::core::error::ComicError::Io(_)));
    }
}
