//! Byte streams to and from local files.
//!
//! Local writes never leave a truncated file behind: bytes land in a
//! temporary sibling that is renamed over the destination once complete.

use bytes::Bytes;
use futures::{stream, StreamExt};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

use artifactstore_common::{Error, Result, StoragePath};

use crate::client::ByteStream;

/// Chunk size for reading local files during uploads.
pub const UPLOAD_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Chunk size for downloads to local files.
pub const DOWNLOAD_CHUNK_SIZE: usize = 1024 * 1024;

/// Suffix of in-flight temporary files.
pub(crate) const PARTIAL_SUFFIX: &str = ".artifactstore-part";

/// Reject a zero chunk size before any I/O happens.
pub fn check_chunk_size(chunk_size: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(Error::InvalidOperation(
            "chunk_size must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

/// Split every item of `stream` into pieces of at most `chunk_size` bytes.
///
/// Empty chunks are dropped. Errors pass through unchanged.
pub fn rechunk(stream: ByteStream, chunk_size: usize) -> ByteStream {
    let chunk_size = chunk_size.max(1);
    Box::pin(stream.flat_map(move |item| {
        let pieces: Vec<Result<Bytes>> = match item {
            Ok(bytes) => split_bytes(bytes, chunk_size).into_iter().map(Ok).collect(),
            Err(err) => vec![Err(err)],
        };
        stream::iter(pieces)
    }))
}

fn split_bytes(mut bytes: Bytes, chunk_size: usize) -> Vec<Bytes> {
    let mut pieces = Vec::with_capacity(bytes.len() / chunk_size + 1);
    while bytes.len() > chunk_size {
        pieces.push(bytes.split_to(chunk_size));
    }
    if !bytes.is_empty() {
        pieces.push(bytes);
    }
    pieces
}

/// Stream an in-memory buffer in chunks of at most `chunk_size` bytes.
pub fn bytes_stream(data: Bytes, chunk_size: usize) -> ByteStream {
    let pieces: Vec<Result<Bytes>> = split_bytes(data, chunk_size.max(1))
        .into_iter()
        .map(Ok)
        .collect();
    Box::pin(stream::iter(pieces))
}

/// Open a local file as a chunked byte stream.
pub async fn file_stream(path: &Path, chunk_size: usize) -> Result<ByteStream> {
    let file = fs::File::open(path)
        .await
        .map_err(|e| Error::from_io(e, path.display()))?;
    let metadata = file
        .metadata()
        .await
        .map_err(|e| Error::from_io(e, path.display()))?;
    if metadata.is_dir() {
        return Err(Error::NotFound(format!("{} is a directory", path.display())));
    }

    let chunk_size = chunk_size.max(1);
    let reader = ReaderStream::with_capacity(file, chunk_size).map(|r| r.map_err(Error::Io));
    Ok(rechunk(Box::pin(reader), chunk_size))
}

/// Temporary sibling path used while `dest` is being written.
pub(crate) fn partial_path(dest: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    if let Some(file_name) = dest.file_name() {
        name.push(file_name);
    }
    name.push(format!(".{}{}", Uuid::new_v4().simple(), PARTIAL_SUFFIX));
    dest.with_file_name(name)
}

/// Whether a file name belongs to an in-flight write.
pub(crate) fn is_partial(name: &OsStr) -> bool {
    name.to_str()
        .map(|n| n.starts_with('.') && n.ends_with(PARTIAL_SUFFIX))
        .unwrap_or(false)
}

/// Refuse object names that collide with in-flight write files.
///
/// # Errors
/// - `InvalidPath` if the last segment looks like a partial write
pub fn check_object_name(path: &StoragePath) -> Result<()> {
    match path.name() {
        Some(name) if is_partial(OsStr::new(name)) => Err(Error::InvalidPath(format!(
            "'{}' uses a name reserved for partial writes",
            path
        ))),
        _ => Ok(()),
    }
}

async fn ensure_parent(dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::from_io(e, parent.display()))?;
    }
    Ok(())
}

async fn discard(tmp: &Path) {
    if let Err(e) = fs::remove_file(tmp).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %tmp.display(), error = %e, "Failed to remove partial file");
        }
    }
}

/// Write a byte stream to `dest`, replacing it only once every byte is on disk.
///
/// Parent directories are created as needed. Returns the number of bytes
/// written.
pub async fn write_atomic(dest: &Path, mut stream: ByteStream) -> Result<u64> {
    ensure_parent(dest).await?;
    let tmp = partial_path(dest);

    let result: Result<u64> = async {
        let mut file = fs::File::create(&tmp)
            .await
            .map_err(|e| Error::from_io(e, tmp.display()))?;
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
    .await;

    match result {
        Ok(written) => {
            if let Err(e) = fs::rename(&tmp, dest).await {
                discard(&tmp).await;
                return Err(Error::from_io(e, dest.display()));
            }
            debug!(path = %dest.display(), bytes = written, "Wrote file");
            Ok(written)
        }
        Err(err) => {
            discard(&tmp).await;
            Err(err)
        }
    }
}

/// Copy a local file to `dest` through a temporary sibling.
pub async fn copy_atomic(src: &Path, dest: &Path) -> Result<u64> {
    ensure_parent(dest).await?;
    let tmp = partial_path(dest);

    let copied = match fs::copy(src, &tmp).await {
        Ok(n) => n,
        Err(e) => {
            discard(&tmp).await;
            return Err(Error::from_io(e, src.display()));
        }
    };
    if let Err(e) = fs::rename(&tmp, dest).await {
        discard(&tmp).await;
        return Err(Error::from_io(e, dest.display()));
    }
    Ok(copied)
}

/// Drain a stream into memory.
pub async fn collect(mut stream: ByteStream) -> Result<Bytes> {
    let mut buffer = bytes::BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buffer.extend_from_slice(&chunk?);
    }
    Ok(buffer.freeze())
}
