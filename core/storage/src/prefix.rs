//! Directory semantics over a flat key space.
//!
//! [`PrefixStore`] implements [`StorageClient`] for any [`ObjectBackend`].
//! A directory is the set of keys sharing a segment prefix; empty
//! directories do not exist. Every backend call goes through the retry
//! executor and multi-object work runs on the transfer engine.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};

use artifactstore_common::{
    Error, FileInfo, PresignedUrl, Result, StorageKind, StoragePath, TransferSettings,
};

use crate::backend::ObjectBackend;
use crate::client::{ByteStream, StorageClient};
use crate::retry::{RetryConfig, RetryExecutor};
use crate::stream::{
    check_chunk_size, check_object_name, file_stream, rechunk, write_atomic, DOWNLOAD_CHUNK_SIZE,
    UPLOAD_CHUNK_SIZE,
};
use crate::transfer::{CopyItem, TransferEngine, TransferItem};

/// Storage client over a flat object backend.
pub struct PrefixStore<B: ObjectBackend> {
    backend: Arc<B>,
    retry: Arc<RetryExecutor>,
    engine: TransferEngine,
}

impl<B: ObjectBackend> PrefixStore<B> {
    pub fn new(backend: B, transfer: TransferSettings) -> Self {
        Self::with_retry(backend, transfer, RetryConfig::from_transfer(&transfer))
    }

    pub fn with_retry(backend: B, transfer: TransferSettings, retry: RetryConfig) -> Self {
        Self {
            backend: Arc::new(backend),
            retry: Arc::new(RetryExecutor::new(retry)),
            engine: TransferEngine::new(transfer.max_concurrency),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    async fn listing(&self, path: &StoragePath) -> Result<Vec<FileInfo>> {
        let backend = &self.backend;
        let mut infos = self
            .retry
            .execute(|| async move { backend.list_info(path).await })
            .await?;
        infos.sort_by(|a, b| a.path.cmp(&b.path));
        infos.dedup_by(|a, b| a.path == b.path);
        Ok(infos)
    }

    async fn paths(&self, path: &StoragePath) -> Result<Vec<StoragePath>> {
        let backend = &self.backend;
        let mut paths = self
            .retry
            .execute(|| async move { backend.list(path).await })
            .await?;
        paths.sort();
        paths.dedup();
        Ok(paths)
    }

    async fn head(&self, path: &StoragePath) -> Result<Option<FileInfo>> {
        if path.is_root() {
            return Ok(None);
        }
        let backend = &self.backend;
        self.retry
            .execute(|| async move { backend.head(path).await })
            .await
    }

    async fn delete_one(&self, path: &StoragePath) -> Result<()> {
        delete_object(&*self.backend, &self.retry, path).await
    }
}

async fn upload_file<B: ObjectBackend>(
    backend: &B,
    retry: &RetryExecutor,
    local: &Path,
    remote: &StoragePath,
) -> Result<()> {
    retry
        .execute(|| async move {
            let stream = file_stream(local, UPLOAD_CHUNK_SIZE).await?;
            backend.write(remote, stream).await
        })
        .await
}

async fn download_file<B: ObjectBackend>(
    backend: &B,
    retry: &RetryExecutor,
    remote: &StoragePath,
    local: &Path,
) -> Result<()> {
    retry
        .execute(|| async move {
            let stream = backend.read(remote, DOWNLOAD_CHUNK_SIZE).await?;
            write_atomic(local, stream).await.map(|_| ())
        })
        .await
}

async fn copy_object<B: ObjectBackend>(
    backend: &B,
    retry: &RetryExecutor,
    src: &StoragePath,
    dest: &StoragePath,
) -> Result<()> {
    retry
        .execute(|| async move { backend.copy_object(src, dest).await })
        .await
}

async fn delete_object<B: ObjectBackend>(
    backend: &B,
    retry: &RetryExecutor,
    path: &StoragePath,
) -> Result<()> {
    retry
        .execute(|| async move { backend.delete_object(path).await })
        .await
}

#[async_trait]
impl<B: ObjectBackend> StorageClient for PrefixStore<B> {
    fn kind(&self) -> StorageKind {
        self.backend.kind()
    }

    async fn find(&self, path: Option<&StoragePath>) -> Result<Vec<StoragePath>> {
        let root = StoragePath::root();
        self.paths(path.unwrap_or(&root)).await
    }

    async fn find_info(&self, path: Option<&StoragePath>) -> Result<Vec<FileInfo>> {
        let root = StoragePath::root();
        self.listing(path.unwrap_or(&root)).await
    }

    async fn exists(&self, path: &StoragePath) -> Result<bool> {
        if self.head(path).await?.is_some() {
            return Ok(true);
        }
        Ok(!self.paths(path).await?.is_empty())
    }

    async fn put(&self, local_path: &Path, remote_path: &StoragePath) -> Result<()> {
        let metadata = fs::metadata(local_path)
            .await
            .map_err(|e| Error::from_io(e, local_path.display()))?;

        if !metadata.is_dir() {
            if remote_path.is_root() {
                return Err(Error::InvalidPath(
                    "cannot upload a file to the storage root".to_string(),
                ));
            }
            check_object_name(remote_path)?;
            debug!(local = %local_path.display(), remote = %remote_path, "Uploading file");
            return upload_file(&*self.backend, &self.retry, local_path, remote_path).await;
        }

        let items = TransferEngine::plan_upload(local_path, remote_path).await?;
        info!(
            local = %local_path.display(),
            remote = %remote_path,
            files = items.len(),
            "Uploading directory"
        );
        let backend = self.backend.clone();
        let retry = self.retry.clone();
        self.engine
            .run(items, move |item: TransferItem| {
                let backend = backend.clone();
                let retry = retry.clone();
                async move { upload_file(&*backend, &retry, &item.local, &item.remote).await }
            })
            .await?;
        Ok(())
    }

    async fn put_stream(&self, stream: ByteStream, remote_path: &StoragePath) -> Result<()> {
        if remote_path.is_root() {
            return Err(Error::InvalidPath(
                "cannot upload a stream to the storage root".to_string(),
            ));
        }
        check_object_name(remote_path)?;
        self.backend.write(remote_path, stream).await
    }

    async fn get(
        &self,
        local_path: &Path,
        remote_path: &StoragePath,
        recursive: bool,
    ) -> Result<()> {
        if self.head(remote_path).await?.is_some() {
            debug!(remote = %remote_path, local = %local_path.display(), "Downloading file");
            return download_file(&*self.backend, &self.retry, remote_path, local_path).await;
        }

        let objects = self.paths(remote_path).await?;
        if objects.is_empty() {
            return Err(Error::NotFound(remote_path.to_string()));
        }
        if !recursive {
            return Err(Error::InvalidOperation(format!(
                "'{}' is a directory; pass recursive to download it",
                remote_path
            )));
        }

        let items = TransferEngine::plan_download(remote_path, objects, local_path)?;
        info!(
            remote = %remote_path,
            local = %local_path.display(),
            files = items.len(),
            "Downloading directory"
        );
        let backend = self.backend.clone();
        let retry = self.retry.clone();
        self.engine
            .run(items, move |item: TransferItem| {
                let backend = backend.clone();
                let retry = retry.clone();
                async move { download_file(&*backend, &retry, &item.remote, &item.local).await }
            })
            .await?;
        Ok(())
    }

    async fn copy(&self, src: &StoragePath, dest: &StoragePath, recursive: bool) -> Result<()> {
        if src == dest {
            return Err(Error::InvalidOperation(format!(
                "cannot copy '{}' onto itself",
                src
            )));
        }

        let file = self.head(src).await?;
        let descendants: Vec<StoragePath> = self
            .paths(src)
            .await?
            .into_iter()
            .filter(|p| p != src)
            .collect();

        if file.is_none() && descendants.is_empty() {
            return Err(Error::NotFound(src.to_string()));
        }
        if !descendants.is_empty() && !recursive {
            return Err(Error::InvalidOperation(format!(
                "'{}' is a directory; pass recursive to copy it",
                src
            )));
        }
        if file.is_some() && dest.is_root() {
            return Err(Error::InvalidPath(
                "cannot copy a file to the storage root".to_string(),
            ));
        }

        if file.is_some() {
            check_object_name(dest)?;
            copy_object(&*self.backend, &self.retry, src, dest).await?;
        }
        if descendants.is_empty() {
            return Ok(());
        }

        let items = TransferEngine::plan_copy(src, descendants, dest)?;
        info!(src = %src, dest = %dest, objects = items.len(), "Copying directory");
        let backend = self.backend.clone();
        let retry = self.retry.clone();
        self.engine
            .run(items, move |item: CopyItem| {
                let backend = backend.clone();
                let retry = retry.clone();
                async move { copy_object(&*backend, &retry, &item.src, &item.dest).await }
            })
            .await?;
        Ok(())
    }

    async fn rm(&self, path: &StoragePath, recursive: bool) -> Result<()> {
        let objects = self.paths(path).await?;
        if objects.is_empty() {
            debug!(path = %path, "Nothing to delete");
            return Ok(());
        }

        let has_descendants = objects.iter().any(|p| p != path);
        if has_descendants && !recursive {
            return Err(Error::InvalidOperation(format!(
                "'{}' is a directory; pass recursive to delete it",
                path
            )));
        }
        if !has_descendants {
            return self.delete_one(path).await;
        }

        info!(path = %path, objects = objects.len(), "Deleting directory");
        let backend = self.backend.clone();
        let retry = self.retry.clone();
        self.engine
            .run(objects, move |object: StoragePath| {
                let backend = backend.clone();
                let retry = retry.clone();
                async move { delete_object(&*backend, &retry, &object).await }
            })
            .await?;
        Ok(())
    }

    async fn generate_presigned_url(
        &self,
        path: &StoragePath,
        expiration_secs: u64,
    ) -> Result<PresignedUrl> {
        if path.is_root() {
            return Err(Error::InvalidOperation(
                "cannot presign the storage root".to_string(),
            ));
        }
        if self.head(path).await?.is_none() {
            return Err(Error::NotFound(path.to_string()));
        }

        let expires_in = Duration::from_secs(expiration_secs);
        let backend = &self.backend;
        let url = self
            .retry
            .execute(|| async move { backend.presign(path, expires_in).await })
            .await?;
        Ok(PresignedUrl::new(url, expires_in))
    }

    async fn iterfile(&self, path: &StoragePath, chunk_size: usize) -> Result<ByteStream> {
        check_chunk_size(chunk_size)?;
        if self.head(path).await?.is_none() {
            return Err(Error::NotFound(path.to_string()));
        }

        let backend = &self.backend;
        let stream = self
            .retry
            .execute(|| async move { backend.read(path, chunk_size).await })
            .await?;
        Ok(rechunk(stream, chunk_size))
    }
}
