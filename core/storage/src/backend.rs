//! Primitive operations of a flat key-value object store.
//!
//! Object stores have no directories. A backend only has to list, read,
//! write, copy and delete single objects; [`PrefixStore`](crate::PrefixStore)
//! builds the full client contract on top of these.

use async_trait::async_trait;
use std::time::Duration;

use artifactstore_common::{FileInfo, Result, StorageKind, StoragePath};

use crate::client::ByteStream;

/// A flat key space addressed by [`StoragePath`].
///
/// Paths are relative to the backend's configured prefix. Listings may be
/// returned in any order.
#[async_trait]
pub trait ObjectBackend: Send + Sync + 'static {
    fn kind(&self) -> StorageKind;

    /// Every object at or under `prefix`, with metadata.
    ///
    /// A prefix with nothing under it yields an empty list.
    async fn list_info(&self, prefix: &StoragePath) -> Result<Vec<FileInfo>>;

    /// Every object at or under `prefix`.
    async fn list(&self, prefix: &StoragePath) -> Result<Vec<StoragePath>> {
        Ok(self
            .list_info(prefix)
            .await?
            .into_iter()
            .map(|info| info.path)
            .collect())
    }

    /// Metadata for the object at exactly `path`, if there is one.
    async fn head(&self, path: &StoragePath) -> Result<Option<FileInfo>> {
        Ok(self
            .list_info(path)
            .await?
            .into_iter()
            .find(|info| &info.path == path))
    }

    /// Open the object for streaming.
    async fn read(&self, path: &StoragePath, chunk_size: usize) -> Result<ByteStream>;

    /// Create or replace the object with the contents of `stream`.
    async fn write(&self, path: &StoragePath, stream: ByteStream) -> Result<()>;

    /// Server-side copy of one object.
    async fn copy_object(&self, src: &StoragePath, dest: &StoragePath) -> Result<()>;

    /// Delete one object. Deleting a missing object succeeds.
    async fn delete_object(&self, path: &StoragePath) -> Result<()>;

    /// Signed read URL for one object.
    async fn presign(&self, path: &StoragePath, expires_in: Duration) -> Result<String>;
}
