//! Storage client contract.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::path::Path;
use std::pin::Pin;

use artifactstore_common::{FileInfo, PresignedUrl, Result, StorageKind, StoragePath};

/// Byte stream type for streaming reads and uploads.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// The capability set every storage backend implements.
///
/// Paths are root-relative [`StoragePath`]s. A "directory" is any path
/// with at least one object below it; no backend needs a native folder
/// primitive for these semantics to hold.
///
/// Implementations own their connection or session and must be safe to
/// share across tasks.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Backend this client talks to.
    fn kind(&self) -> StorageKind;

    /// List every object at or under `path`, recursively.
    ///
    /// `None` lists the whole root. The result is sorted by path and a
    /// path with nothing under it yields an empty list, not an error.
    async fn find(&self, path: Option<&StoragePath>) -> Result<Vec<StoragePath>>;

    /// Same traversal as [`find`](Self::find), with size and timestamps.
    async fn find_info(&self, path: Option<&StoragePath>) -> Result<Vec<FileInfo>>;

    /// True if `path` is an object or has at least one object below it.
    async fn exists(&self, path: &StoragePath) -> Result<bool>;

    /// Upload a local file or directory tree.
    ///
    /// A directory maps each file to `remote_path/<relative path>`.
    /// Existing objects are overwritten.
    ///
    /// # Errors
    /// - `NotFound` if `local_path` does not exist
    /// - `Transfer` on the first failed file of a directory upload; files
    ///   already uploaded stay in place
    async fn put(&self, local_path: &Path, remote_path: &StoragePath) -> Result<()>;

    /// Upload a byte stream as a single object.
    async fn put_stream(&self, stream: ByteStream, remote_path: &StoragePath) -> Result<()>;

    /// Download an object, or with `recursive` a whole subtree.
    ///
    /// # Errors
    /// - `NotFound` if nothing exists at `remote_path`
    /// - `InvalidOperation` if `remote_path` is a directory and `recursive` is false
    /// - `Transfer` on the first failed file of a recursive download
    async fn get(&self, local_path: &Path, remote_path: &StoragePath, recursive: bool)
        -> Result<()>;

    /// Copy without routing bytes through the caller where the backend allows.
    ///
    /// # Errors
    /// - `NotFound` if nothing exists at `src`
    /// - `InvalidOperation` if `src` has descendants and `recursive` is false
    async fn copy(&self, src: &StoragePath, dest: &StoragePath, recursive: bool) -> Result<()>;

    /// Delete an object, or with `recursive` a whole subtree.
    ///
    /// Deleting a path that does not exist succeeds. The root with
    /// `recursive = true` empties the entire bucket.
    ///
    /// # Errors
    /// - `InvalidOperation` if `path` has descendants and `recursive` is false
    async fn rm(&self, path: &StoragePath, recursive: bool) -> Result<()>;

    /// Create a time-limited link to one object.
    ///
    /// # Errors
    /// - `NotFound` if the object does not exist
    /// - `Unsupported` if the backend cannot sign links
    async fn generate_presigned_url(
        &self,
        path: &StoragePath,
        expiration_secs: u64,
    ) -> Result<PresignedUrl>;

    /// Stream an object in chunks of at most `chunk_size` bytes.
    ///
    /// The stream is single-pass. Dropping it releases the underlying
    /// reader or connection.
    ///
    /// # Errors
    /// - `NotFound` if the object does not exist when called
    /// - `InvalidOperation` if `chunk_size` is zero
    async fn iterfile(&self, path: &StoragePath, chunk_size: usize) -> Result<ByteStream>;
}
