use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use uuid::Uuid;

use super::{validate_key, ByteSource, ByteStream, StorageError, StorageProvider};

/// Byte store on a local directory. Writes go to a scratch file next to the
/// target and are renamed into place, so readers never observe a partial
/// object.
pub struct LocalDiskStorage {
    root: PathBuf,
    provider_id: String,
}

impl LocalDiskStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            provider_id: "local_disk".to_string(),
        }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(Path::new(key)))
    }
}

#[async_trait]
impl StorageProvider for LocalDiskStorage {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    async fn put(
        &self,
        key: &str,
        mut reader: ByteSource<'_>,
        _content_type: Option<&str>,
    ) -> Result<u64, StorageError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let scratch = path.with_extension(format!("partial-{}", Uuid::new_v4().simple()));
        let mut file = fs::File::create(&scratch).await?;
        let written = match tokio::io::copy(&mut reader, &mut file).await {
            Ok(n) => n,
            Err(e) => {
                drop(file);
                let _ = fs::remove_file(&scratch).await;
                return Err(e.into());
            }
        };
        file.sync_all().await?;
        drop(file);

        fs::rename(&scratch, &path).await?;
        Ok(written)
    }

    async fn open_read(&self, key: &str) -> Result<Option<ByteStream>, StorageError> {
        let path = self.resolve(key)?;
        match fs::File::open(&path).await {
            Ok(file) => Ok(Some(Box::pin(file))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.size(key).await?.is_some())
    }

    async fn size(&self, key: &str) -> Result<Option<i64>, StorageError> {
        let path = self.resolve(key)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(Some(meta.len() as i64)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::pin;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn put_read_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalDiskStorage::new(dir.path());

        let written = storage
            .put(
                "ws/proj/files/a.ifc",
                pin!(&b"hello ifc"[..]),
                Some("application/x-step"),
            )
            .await
            .unwrap();
        assert_eq!(written, 9);
        assert!(storage.exists("ws/proj/files/a.ifc").await.unwrap());
        assert_eq!(storage.size("ws/proj/files/a.ifc").await.unwrap(), Some(9));

        let mut out = Vec::new();
        storage
            .open_read("ws/proj/files/a.ifc")
            .await
            .unwrap()
            .unwrap()
            .read_to_end(&mut out)
            .await
            .unwrap();
        assert_eq!(out, b"hello ifc");

        assert!(storage.delete("ws/proj/files/a.ifc").await.unwrap());
        assert!(!storage.delete("ws/proj/files/a.ifc").await.unwrap());
        assert!(storage.open_read("ws/proj/files/a.ifc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_overwrites_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalDiskStorage::new(dir.path());

        storage.put("k", pin!(&b"one"[..]), None).await.unwrap();
        storage.put("k", pin!(&b"twotwo"[..]), None).await.unwrap();
        assert_eq!(storage.size("k").await.unwrap(), Some(6));
    }

    #[tokio::test]
    async fn rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalDiskStorage::new(dir.path());
        assert!(matches!(
            storage.open_read("../outside").await,
            Err(StorageError::InvalidKey(_))
        ));
    }
}
