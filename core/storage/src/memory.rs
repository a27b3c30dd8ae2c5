//! In-memory object backend for testing.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use uuid::Uuid;

use artifactstore_common::{Error, FileInfo, Result, StorageKind, StoragePath};

use crate::backend::ObjectBackend;
use crate::client::ByteStream;
use crate::stream::bytes_stream;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    modified: DateTime<Utc>,
    etag: String,
}

impl StoredObject {
    fn info(&self, path: &StoragePath) -> FileInfo {
        FileInfo::new(path.clone(), self.data.len() as u64, Some(self.modified))
            .with_checksum(Some(self.etag.clone()))
    }
}

/// In-memory object backend.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop. Clones share the same objects.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    objects: Arc<RwLock<BTreeMap<StoragePath, StoredObject>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_objects(&self) -> Result<RwLockReadGuard<'_, BTreeMap<StoragePath, StoredObject>>> {
        self.objects
            .read()
            .map_err(|_| Error::Backend("memory store lock poisoned".to_string()))
    }

    fn write_objects(
        &self,
    ) -> Result<RwLockWriteGuard<'_, BTreeMap<StoragePath, StoredObject>>> {
        self.objects
            .write()
            .map_err(|_| Error::Backend("memory store lock poisoned".to_string()))
    }

    fn store(&self, path: &StoragePath, data: Bytes) -> Result<()> {
        if path.is_root() {
            return Err(Error::InvalidPath("cannot write an object at the root".to_string()));
        }
        let object = StoredObject {
            data,
            modified: Utc::now(),
            etag: Uuid::new_v4().simple().to_string(),
        };
        self.write_objects()?.insert(path.clone(), object);
        Ok(())
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.read_objects().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    fn kind(&self) -> StorageKind {
        StorageKind::Memory
    }

    async fn list_info(&self, prefix: &StoragePath) -> Result<Vec<FileInfo>> {
        let objects = self.read_objects()?;
        Ok(objects
            .iter()
            .filter(|(path, _)| path.starts_with(prefix))
            .map(|(path, object)| object.info(path))
            .collect())
    }

    async fn head(&self, path: &StoragePath) -> Result<Option<FileInfo>> {
        Ok(self.read_objects()?.get(path).map(|object| object.info(path)))
    }

    async fn read(&self, path: &StoragePath, chunk_size: usize) -> Result<ByteStream> {
        let data = self
            .read_objects()?
            .get(path)
            .map(|object| object.data.clone())
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        Ok(bytes_stream(data, chunk_size))
    }

    async fn write(&self, path: &StoragePath, mut stream: ByteStream) -> Result<()> {
        let mut data = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk?);
        }
        self.store(path, data.freeze())
    }

    async fn copy_object(&self, src: &StoragePath, dest: &StoragePath) -> Result<()> {
        let data = self
            .read_objects()?
            .get(src)
            .map(|object| object.data.clone())
            .ok_or_else(|| Error::NotFound(src.to_string()))?;
        self.store(dest, data)
    }

    async fn delete_object(&self, path: &StoragePath) -> Result<()> {
        self.write_objects()?.remove(path);
        Ok(())
    }

    async fn presign(&self, path: &StoragePath, expires_in: Duration) -> Result<String> {
        if !self.read_objects()?.contains_key(path) {
            return Err(Error::NotFound(path.to_string()));
        }
        Ok(format!(
            "memory:///{}?expires_in={}",
            path.as_key(),
            expires_in.as_secs()
        ))
    }
}
