//! Bounded fan-out of per-file work for directory transfers.
//!
//! Work items run on a worker pool capped at `max_concurrency`. The first
//! failure stops new items from being scheduled; items already in flight
//! are allowed to finish and nothing is rolled back.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use artifactstore_common::{Error, Result, StoragePath};

use crate::stream::check_object_name;

/// One file moving between local disk and a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TransferItem {
    pub local: PathBuf,
    pub remote: StoragePath,
}

impl fmt::Display for TransferItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.local.display(), self.remote)
    }
}

/// One object being copied inside a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CopyItem {
    pub src: StoragePath,
    pub dest: StoragePath,
}

impl fmt::Display for CopyItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src, self.dest)
    }
}

/// Worker pool for multi-file operations.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TransferEngine {
    max_concurrency: usize,
}

impl TransferEngine {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Map every regular file under `local_root` to `remote_root/<relative path>`.
    ///
    /// `local_root` itself may be a symlink; links below it are not
    /// followed. Items come back in path order.
    ///
    /// # Errors
    /// - `InvalidPath` if a file would land on a name reserved for
    ///   partial writes
    pub async fn plan_upload(
        local_root: &Path,
        remote_root: &StoragePath,
    ) -> Result<Vec<TransferItem>> {
        let local_root = local_root.to_path_buf();
        let remote_root = remote_root.clone();
        tokio::task::spawn_blocking(move || walk_upload(&local_root, &remote_root))
            .await
            .map_err(|e| Error::Backend(format!("directory walk failed: {}", e)))?
    }

    /// Map objects under `remote_root` to `local_root/<relative path>`.
    pub fn plan_download(
        remote_root: &StoragePath,
        objects: Vec<StoragePath>,
        local_root: &Path,
    ) -> Result<Vec<TransferItem>> {
        objects
            .into_iter()
            .map(|remote| {
                let relative = remote.relative_to(remote_root)?;
                Ok(TransferItem {
                    local: relative.to_local_path(local_root),
                    remote,
                })
            })
            .collect()
    }

    /// Map objects under `src_root` to the same relative paths under `dest_root`.
    pub fn plan_copy(
        src_root: &StoragePath,
        objects: Vec<StoragePath>,
        dest_root: &StoragePath,
    ) -> Result<Vec<CopyItem>> {
        objects
            .into_iter()
            .map(|src| {
                let relative = src.relative_to(src_root)?;
                Ok(CopyItem {
                    dest: dest_root.join(&relative),
                    src,
                })
            })
            .collect()
    }

    /// Run `op` over every item with at most `max_concurrency` in flight.
    ///
    /// Returns the number of completed items.
    ///
    /// # Errors
    /// - `Transfer` naming the first item that failed, its cause, and how
    ///   many items were never scheduled
    pub async fn run<T, F, Fut>(&self, items: Vec<T>, op: F) -> Result<usize>
    where
        T: fmt::Display + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let total = items.len();
        if total == 0 {
            return Ok(0);
        }
        info!(
            items = total,
            max_concurrency = self.max_concurrency,
            "Starting transfer"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let failed = Arc::new(AtomicBool::new(false));
        let first_failure: Arc<Mutex<Option<(String, Error)>>> = Arc::new(Mutex::new(None));
        let op = Arc::new(op);
        let mut tasks = JoinSet::new();
        let mut scheduled = 0usize;

        for item in items {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| Error::Backend(format!("Semaphore error: {}", e)))?;
            if failed.load(Ordering::SeqCst) {
                break;
            }
            scheduled += 1;

            let op = op.clone();
            let failed = failed.clone();
            let first_failure = first_failure.clone();
            tasks.spawn(async move {
                let label = item.to_string();
                let result = op(item).await;
                let ok = match result {
                    Ok(()) => {
                        debug!(item = %label, "Transfer item done");
                        true
                    }
                    Err(err) => {
                        warn!(item = %label, error = %err, "Transfer item failed");
                        failed.store(true, Ordering::SeqCst);
                        let mut slot = first_failure.lock().await;
                        if slot.is_none() {
                            *slot = Some((label, err));
                        }
                        false
                    }
                };
                drop(permit);
                ok
            });
        }

        let mut completed = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => completed += 1,
                Ok(false) => {}
                Err(e) => {
                    let mut slot = first_failure.lock().await;
                    if slot.is_none() {
                        *slot = Some((
                            "worker".to_string(),
                            Error::Backend(format!("transfer task failed: {}", e)),
                        ));
                    }
                }
            }
        }

        let failure = first_failure.lock().await.take();
        match failure {
            Some((item, cause)) => {
                let unattempted = total - scheduled;
                warn!(
                    item = %item,
                    completed,
                    unattempted,
                    "Transfer stopped at first failure"
                );
                Err(Error::Transfer {
                    item,
                    cause: Box::new(cause),
                    unattempted,
                })
            }
            None => {
                info!(items = completed, "Transfer complete");
                Ok(completed)
            }
        }
    }
}

fn walk_upload(local_root: &Path, remote_root: &StoragePath) -> Result<Vec<TransferItem>> {
    let mut items = Vec::new();

    for entry in WalkDir::new(local_root)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(walk_error)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry.path().strip_prefix(local_root).map_err(|_| {
            Error::InvalidPath(format!(
                "{} is outside {}",
                entry.path().display(),
                local_root.display()
            ))
        })?;
        let remote = remote_root.join(&StoragePath::from_relative_path(relative)?);
        check_object_name(&remote)?;
        items.push(TransferItem {
            local: entry.path().to_path_buf(),
            remote,
        });
    }

    items.sort_by(|a, b| a.remote.cmp(&b.remote));
    Ok(items)
}

/// Map a directory walk failure onto the common error type.
pub(crate) fn walk_error(err: walkdir::Error) -> Error {
    let target = err
        .path()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    match err.into_io_error() {
        Some(io) => Error::from_io(io, target),
        None => Error::Backend(format!("filesystem loop at {}", target)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_plan_upload_maps_relative_paths() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("nested/really/deep")).unwrap();
        std::fs::write(dir.path().join("cats.jpg"), b"1").unwrap();
        std::fs::write(dir.path().join("nested/really/deep/cats-2.jpg"), b"2").unwrap();

        let remote = StoragePath::parse("abc123").unwrap();
        let items = TransferEngine::plan_upload(dir.path(), &remote).await.unwrap();

        let remotes: Vec<String> = items.iter().map(|i| i.remote.to_string()).collect();
        assert_eq!(
            remotes,
            vec!["abc123/cats.jpg", "abc123/nested/really/deep/cats-2.jpg"]
        );
        assert_eq!(items[0].local, dir.path().join("cats.jpg"));
    }

    #[tokio::test]
    async fn test_plan_upload_rejects_reserved_names() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("cats.jpg"), b"1").unwrap();
        std::fs::write(dir.path().join(".cats.jpg.9c1e.artifactstore-part"), b"2").unwrap();

        let result =
            TransferEngine::plan_upload(dir.path(), &StoragePath::parse("abc123").unwrap()).await;
        assert!(matches!(result, Err(Error::InvalidPath(_))));
    }

    #[tokio::test]
    async fn test_plan_upload_missing_root() {
        let dir = TempDir::new().unwrap();
        let result =
            TransferEngine::plan_upload(&dir.path().join("missing"), &StoragePath::root()).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_plan_download_and_copy() {
        let root = StoragePath::parse("abc123").unwrap();
        let objects = vec![
            StoragePath::parse("abc123/cats.jpg").unwrap(),
            StoragePath::parse("abc123/nested/dogs.jpg").unwrap(),
        ];

        let downloads =
            TransferEngine::plan_download(&root, objects.clone(), Path::new("/tmp/out")).unwrap();
        assert_eq!(downloads[1].local, Path::new("/tmp/out/nested/dogs.jpg"));

        let dest = StoragePath::parse("backup/v1").unwrap();
        let copies = TransferEngine::plan_copy(&root, objects, &dest).unwrap();
        assert_eq!(copies[1].dest.to_string(), "backup/v1/nested/dogs.jpg");
        assert_eq!(copies[1].to_string(), "abc123/nested/dogs.jpg -> backup/v1/nested/dogs.jpg");
    }

    #[tokio::test]
    async fn test_run_respects_concurrency_limit() {
        let engine = TransferEngine::new(3);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (cur, max) = (in_flight.clone(), peak.clone());
        let done = engine
            .run((0..20).collect::<Vec<u32>>(), move |_item| {
                let cur = cur.clone();
                let max = max.clone();
                async move {
                    let now = cur.fetch_add(1, Ordering::SeqCst) + 1;
                    max.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    cur.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert_eq!(done, 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_run_stops_after_first_failure() {
        let engine = TransferEngine::new(1);
        let attempted = Arc::new(AtomicUsize::new(0));

        let counter = attempted.clone();
        let result = engine
            .run((0..10).collect::<Vec<u32>>(), move |item| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if item == 2 {
                        Err(Error::PermissionDenied("bucket".to_string()))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        match result {
            Err(Error::Transfer {
                item,
                cause,
                unattempted,
            }) => {
                assert_eq!(item, "2");
                assert!(matches!(*cause, Error::PermissionDenied(_)));
                assert!(unattempted > 0);
                assert_eq!(unattempted + attempted.load(Ordering::SeqCst), 10);
            }
            other => panic!("expected transfer error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_empty() {
        let engine = TransferEngine::new(4);
        let done = engine
            .run(Vec::<u32>::new(), |_item| async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(done, 0);
    }
}
