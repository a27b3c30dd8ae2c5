//! Local filesystem storage client.
//!
//! Storage paths never leave the root directory: a path with a symbolic
//! link among its components is treated as absent when read and refused
//! when written.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};
use url::Url;
use walkdir::WalkDir;

use artifactstore_common::{
    Error, FileInfo, PresignedUrl, Result, StorageKind, StoragePath, TransferSettings,
};

use crate::client::{ByteStream, StorageClient};
use crate::retry::{RetryConfig, RetryExecutor};
use crate::stream::{
    check_chunk_size, check_object_name, copy_atomic, file_stream, is_partial, write_atomic,
};
use crate::transfer::{walk_error, CopyItem, TransferEngine, TransferItem};

/// Local filesystem storage client.
///
/// Objects are regular files under a root directory; a directory exists
/// for the contract only while it holds at least one file.
pub struct LocalClient {
    root: PathBuf,
    engine: TransferEngine,
    retry: Arc<RetryExecutor>,
}

impl LocalClient {
    /// Create a new local client with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        Self::with_transfer(root, TransferSettings::default())
    }

    pub fn with_transfer(root: impl AsRef<Path>, transfer: TransferSettings) -> Result<Self> {
        Self::with_retry(root, transfer, RetryConfig::from_transfer(&transfer))
    }

    pub fn with_retry(
        root: impl AsRef<Path>,
        transfer: TransferSettings,
        retry: RetryConfig,
    ) -> Result<Self> {
        let root = root.as_ref();

        // sync for constructor
        std::fs::create_dir_all(root).map_err(|e| Error::from_io(e, root.display()))?;
        let root = std::fs::canonicalize(root).map_err(|e| Error::from_io(e, root.display()))?;

        Ok(Self {
            root,
            engine: TransferEngine::new(transfer.max_concurrency),
            retry: Arc::new(RetryExecutor::new(retry)),
        })
    }

    /// Absolute root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every file at or under `path`, sorted.
    async fn walk(&self, path: &StoragePath) -> Result<Vec<FileInfo>> {
        let start = match resolve(&self.root, path).await? {
            Some(start) => start,
            None => return Ok(Vec::new()),
        };
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || walk_files(&root, &start))
            .await
            .map_err(|e| Error::Backend(format!("directory walk failed: {}", e)))?
    }

    async fn walk_paths(&self, path: &StoragePath) -> Result<Vec<StoragePath>> {
        Ok(self.walk(path).await?.into_iter().map(|i| i.path).collect())
    }

    /// Remove the files of a tree in parallel, then its empty directories.
    async fn remove_tree(&self, path: &StoragePath, dir: &Path) -> Result<()> {
        let files = self.walk_paths(path).await?;
        info!(path = %path, files = files.len(), "Deleting directory");

        let root = self.root.clone();
        let retry = self.retry.clone();
        self.engine
            .run(files, move |file: StoragePath| {
                let target = file.to_local_path(&root);
                let retry = retry.clone();
                async move { retry.execute(|| remove_file_if_exists(&target)).await }
            })
            .await?;

        if path.is_root() {
            let mut entries = fs::read_dir(dir)
                .await
                .map_err(|e| Error::from_io(e, dir.display()))?;
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    fs::remove_dir_all(entry.path()).await?;
                } else {
                    fs::remove_file(entry.path()).await?;
                }
            }
        } else {
            match fs::remove_dir_all(dir).await {
                Ok(()) => {}
                Err(e) if is_absent(&e) => {}
                Err(e) => return Err(Error::from_io(e, dir.display())),
            }
        }
        Ok(())
    }
}

/// Filesystem location of `path` under `root`, or `None` when one of its
/// components is a symbolic link.
///
/// Components past the first missing one, or past a regular file, are not
/// inspected; such paths do not exist.
async fn resolve(root: &Path, path: &StoragePath) -> Result<Option<PathBuf>> {
    let mut current = root.to_path_buf();
    for segment in path.components() {
        current.push(segment);
        match fs::symlink_metadata(&current).await {
            Ok(metadata) if metadata.file_type().is_symlink() => {
                debug!(path = %path, link = %current.display(), "Refusing to follow symlink");
                return Ok(None);
            }
            Ok(metadata) if metadata.is_dir() => {}
            Ok(_) => break,
            Err(e) if is_absent(&e) => break,
            Err(e) => return Err(Error::from_io(e, current.display())),
        }
    }
    Ok(Some(path.to_local_path(root)))
}

/// Destination for a write to `path`.
///
/// # Errors
/// - `InvalidPath` if the path runs through a symbolic link
async fn writable(root: &Path, path: &StoragePath) -> Result<PathBuf> {
    resolve(root, path).await?.ok_or_else(|| {
        Error::InvalidPath(format!("'{}' runs through a symbolic link", path))
    })
}

/// Missing, or reached through a regular file.
fn is_absent(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

fn walk_files(root: &Path, start: &Path) -> Result<Vec<FileInfo>> {
    match std::fs::symlink_metadata(start) {
        Ok(_) => {}
        Err(e) if is_absent(&e) => return Ok(Vec::new()),
        Err(e) => return Err(Error::from_io(e, start.display())),
    }

    let mut infos = Vec::new();
    for entry in WalkDir::new(start)
        .follow_links(false)
        .follow_root_links(false)
    {
        let entry = entry.map_err(walk_error)?;
        if !entry.file_type().is_file() || is_partial(entry.file_name()) {
            continue;
        }

        let relative = entry.path().strip_prefix(root).map_err(|_| {
            Error::InvalidPath(format!("{} is outside the root", entry.path().display()))
        })?;
        let path = StoragePath::from_relative_path(relative)?;
        let metadata = entry.metadata().map_err(walk_error)?;
        let modified: Option<DateTime<Utc>> = metadata.modified().ok().map(|t| t.into());
        infos.push(FileInfo::new(path, metadata.len(), modified));
    }

    infos.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(infos)
}

async fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if is_absent(&e) => Ok(()),
        Err(e) => Err(Error::from_io(e, path.display())),
    }
}

async fn copy_file(retry: &RetryExecutor, from: &Path, to: &Path) -> Result<()> {
    retry
        .execute(|| async move { copy_atomic(from, to).await.map(|_| ()) })
        .await
}

#[async_trait]
impl StorageClient for LocalClient {
    fn kind(&self) -> StorageKind {
        StorageKind::Local
    }

    async fn find(&self, path: Option<&StoragePath>) -> Result<Vec<StoragePath>> {
        let root = StoragePath::root();
        self.walk_paths(path.unwrap_or(&root)).await
    }

    async fn find_info(&self, path: Option<&StoragePath>) -> Result<Vec<FileInfo>> {
        let root = StoragePath::root();
        self.walk(path.unwrap_or(&root)).await
    }

    async fn exists(&self, path: &StoragePath) -> Result<bool> {
        let fs_path = match resolve(&self.root, path).await? {
            Some(fs_path) => fs_path,
            None => return Ok(false),
        };
        match fs::symlink_metadata(&fs_path).await {
            Ok(metadata) if metadata.is_file() => Ok(true),
            Ok(_) => Ok(!self.walk(path).await?.is_empty()),
            Err(e) if is_absent(&e) => Ok(false),
            Err(e) => Err(Error::from_io(e, path)),
        }
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
            let dest = writable(&self.root, remote_path).await?;
            debug!(local = %local_path.display(), remote = %remote_path, "Uploading file");
            return copy_file(&self.retry, local_path, &dest).await;
        }

        writable(&self.root, remote_path).await?;
        let items = TransferEngine::plan_upload(local_path, remote_path).await?;
        info!(
            local = %local_path.display(),
            remote = %remote_path,
            files = items.len(),
            "Uploading directory"
        );
        let root = self.root.clone();
        let retry = self.retry.clone();
        self.engine
            .run(items, move |item: TransferItem| {
                let root = root.clone();
                let retry = retry.clone();
                async move {
                    let dest = writable(&root, &item.remote).await?;
                    copy_file(&retry, &item.local, &dest).await
                }
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
        let dest = writable(&self.root, remote_path).await?;
        write_atomic(&dest, stream).await?;
        Ok(())
    }

    async fn get(
        &self,
        local_path: &Path,
        remote_path: &StoragePath,
        recursive: bool,
    ) -> Result<()> {
        let src = resolve(&self.root, remote_path)
            .await?
            .ok_or_else(|| Error::NotFound(remote_path.to_string()))?;
        let metadata = fs::symlink_metadata(&src)
            .await
            .map_err(|e| Error::from_io(e, remote_path))?;

        if metadata.is_file() {
            debug!(remote = %remote_path, local = %local_path.display(), "Downloading file");
            return copy_file(&self.retry, &src, local_path).await;
        }

        let files = self.walk_paths(remote_path).await?;
        if files.is_empty() {
            return Err(Error::NotFound(remote_path.to_string()));
        }
        if !recursive {
            return Err(Error::InvalidOperation(format!(
                "'{}' is a directory; pass recursive to download it",
                remote_path
            )));
        }

        let items = TransferEngine::plan_download(remote_path, files, local_path)?;
        info!(
            remote = %remote_path,
            local = %local_path.display(),
            files = items.len(),
            "Downloading directory"
        );
        let root = self.root.clone();
        let retry = self.retry.clone();
        self.engine
            .run(items, move |item: TransferItem| {
                let src = item.remote.to_local_path(&root);
                let retry = retry.clone();
                async move { copy_file(&retry, &src, &item.local).await }
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

        let src_path = resolve(&self.root, src)
            .await?
            .ok_or_else(|| Error::NotFound(src.to_string()))?;
        let metadata = fs::symlink_metadata(&src_path)
            .await
            .map_err(|e| Error::from_io(e, src))?;

        if metadata.is_file() {
            if dest.is_root() {
                return Err(Error::InvalidPath(
                    "cannot copy a file to the storage root".to_string(),
                ));
            }
            check_object_name(dest)?;
            let dest_path = writable(&self.root, dest).await?;
            return copy_file(&self.retry, &src_path, &dest_path).await;
        }

        let files = self.walk_paths(src).await?;
        if files.is_empty() {
            return Err(Error::NotFound(src.to_string()));
        }
        if !recursive {
            return Err(Error::InvalidOperation(format!(
                "'{}' is a directory; pass recursive to copy it",
                src
            )));
        }

        writable(&self.root, dest).await?;
        let items = TransferEngine::plan_copy(src, files, dest)?;
        info!(src = %src, dest = %dest, files = items.len(), "Copying directory");
        let root = self.root.clone();
        let retry = self.retry.clone();
        self.engine
            .run(items, move |item: CopyItem| {
                let root = root.clone();
                let retry = retry.clone();
                async move {
                    let from = item.src.to_local_path(&root);
                    let to = writable(&root, &item.dest).await?;
                    copy_file(&retry, &from, &to).await
                }
            })
            .await?;
        Ok(())
    }

    async fn rm(&self, path: &StoragePath, recursive: bool) -> Result<()> {
        let fs_path = match resolve(&self.root, path).await? {
            Some(fs_path) => fs_path,
            None => {
                debug!(path = %path, "Nothing to delete");
                return Ok(());
            }
        };
        let metadata = match fs::symlink_metadata(&fs_path).await {
            Ok(metadata) => metadata,
            Err(e) if is_absent(&e) => {
                debug!(path = %path, "Nothing to delete");
                return Ok(());
            }
            Err(e) => return Err(Error::from_io(e, path)),
        };

        if !metadata.is_dir() {
            return self
                .retry
                .execute(|| remove_file_if_exists(&fs_path))
                .await;
        }

        let has_files = !self.walk(path).await?.is_empty();
        if has_files && !recursive {
            return Err(Error::InvalidOperation(format!(
                "'{}' is a directory; pass recursive to delete it",
                path
            )));
        }
        self.remove_tree(path, &fs_path).await
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
        let fs_path = resolve(&self.root, path)
            .await?
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        match fs::symlink_metadata(&fs_path).await {
            Ok(metadata) if metadata.is_file() => {}
            Ok(_) => return Err(Error::NotFound(path.to_string())),
            Err(e) => return Err(Error::from_io(e, path)),
        }

        let url = Url::from_file_path(&fs_path).map_err(|_| {
            Error::InvalidPath(format!("{} cannot be expressed as a URL", fs_path.display()))
        })?;
        Ok(PresignedUrl::new(
            url.to_string(),
            Duration::from_secs(expiration_secs),
        ))
    }

    async fn iterfile(&self, path: &StoragePath, chunk_size: usize) -> Result<ByteStream> {
        check_chunk_size(chunk_size)?;
        let fs_path = resolve(&self.root, path)
            .await?
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        self.retry
            .execute(|| file_stream(&fs_path, chunk_size))
            .await
            .map_err(|e| match e {
                Error::NotFound(_) => Error::NotFound(path.to_string()),
                other => other,
            })
    }
}
