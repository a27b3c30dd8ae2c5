//! S3 and GCS object backends built on OpenDAL.
//!
//! The configured key prefix becomes the operator root, so every
//! [`StoragePath`] handed to the operator is relative to it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use opendal::layers::LoggingLayer;
use opendal::services::{Gcs, S3};
use opendal::{ErrorKind, Operator};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use artifactstore_common::{Error, FileInfo, Result, StorageKind, StoragePath, StorageSettings};

use crate::backend::ObjectBackend;
use crate::client::ByteStream;
use crate::stream::UPLOAD_CHUNK_SIZE;

const DEFAULT_S3_REGION: &str = "us-east-1";

/// Object backend over an S3 or GCS bucket.
#[derive(Clone)]
pub struct CloudBackend {
    operator: Operator,
    kind: StorageKind,
    bucket: String,
    prefix: Option<String>,
}

impl CloudBackend {
    /// Build the backend selected by `settings.kind`.
    pub fn from_settings(settings: &StorageSettings) -> Result<Self> {
        match settings.kind {
            StorageKind::S3 => Self::s3(settings),
            StorageKind::Gcs => Self::gcs(settings),
            other => Err(Error::Config(format!(
                "{} is not a cloud storage kind",
                other
            ))),
        }
    }

    /// S3 bucket, or any S3-compatible service when an endpoint is set.
    pub fn s3(settings: &StorageSettings) -> Result<Self> {
        let creds = &settings.credentials;
        let mut builder = S3::default()
            .bucket(&settings.root)
            .root(&operator_root(settings.prefix.as_deref()))
            .region(creds.region.as_deref().unwrap_or(DEFAULT_S3_REGION));

        if let Some(endpoint) = &creds.endpoint {
            builder = builder.endpoint(endpoint);
        }
        if let Some(key_id) = &creds.access_key_id {
            builder = builder.access_key_id(key_id);
        }
        if let Some(secret) = &creds.secret_access_key {
            builder = builder.secret_access_key(secret.expose());
        }

        let operator = Operator::new(builder)
            .map_err(|e| map_opendal_error(e, &settings.root))?
            .layer(LoggingLayer::default())
            .finish();

        Ok(Self::with_operator(operator, StorageKind::S3, settings))
    }

    /// GCS bucket with service account or ambient credentials.
    pub fn gcs(settings: &StorageSettings) -> Result<Self> {
        let creds = &settings.credentials;
        let mut builder = Gcs::default()
            .bucket(&settings.root)
            .root(&operator_root(settings.prefix.as_deref()));

        if let Some(path) = &creds.credential_path {
            builder = builder.credential_path(path);
        }
        if let Some(credential) = &creds.credential {
            builder = builder.credential(credential.expose());
        }
        if let Some(endpoint) = &creds.endpoint {
            builder = builder.endpoint(endpoint);
        }

        let operator = Operator::new(builder)
            .map_err(|e| map_opendal_error(e, &settings.root))?
            .layer(LoggingLayer::default())
            .finish();

        Ok(Self::with_operator(operator, StorageKind::Gcs, settings))
    }

    fn with_operator(operator: Operator, kind: StorageKind, settings: &StorageSettings) -> Self {
        debug!(kind = %kind, bucket = %settings.root, "Built object store operator");
        Self {
            operator,
            kind,
            bucket: settings.root.clone(),
            prefix: settings.prefix.clone(),
        }
    }

    /// Fully qualified URI of an object, e.g. `s3://bucket/prefix/key`.
    pub fn object_uri(&self, path: &StoragePath) -> String {
        let scheme = match self.kind {
            StorageKind::Gcs => "gs",
            _ => "s3",
        };
        let mut key = String::new();
        if let Some(prefix) = &self.prefix {
            key.push_str(prefix);
            key.push('/');
        }
        key.push_str(&path.as_key());
        format!("{}://{}/{}", scheme, self.bucket, key)
    }
}

fn operator_root(prefix: Option<&str>) -> String {
    match prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
        Some(prefix) => format!("/{}/", prefix),
        None => "/".to_string(),
    }
}

/// Listing key for everything under `path`.
fn dir_key(path: &StoragePath) -> String {
    if path.is_root() {
        "/".to_string()
    } else {
        format!("{}/", path.as_key())
    }
}

/// Map an OpenDAL error observed while touching `target`.
pub(crate) fn map_opendal_error(err: opendal::Error, target: impl fmt::Display) -> Error {
    match err.kind() {
        ErrorKind::NotFound => Error::NotFound(target.to_string()),
        ErrorKind::PermissionDenied => Error::PermissionDenied(format!("{}: {}", target, err)),
        ErrorKind::Unsupported => Error::Unsupported(format!("{}: {}", target, err)),
        ErrorKind::ConfigInvalid => Error::Config(err.to_string()),
        ErrorKind::IsADirectory | ErrorKind::NotADirectory | ErrorKind::AlreadyExists => {
            Error::InvalidOperation(format!("{}: {}", target, err))
        }
        ErrorKind::RateLimited => Error::Transient(format!("{}: {}", target, err)),
        _ if err.is_temporary() => Error::Transient(format!("{}: {}", target, err)),
        _ => Error::Backend(format!("{}: {}", target, err)),
    }
}

fn to_file_info(path: StoragePath, metadata: &opendal::Metadata) -> FileInfo {
    let modified = metadata
        .last_modified()
        .and_then(|t| DateTime::<Utc>::from_timestamp(t.timestamp(), 0));
    FileInfo::new(path, metadata.content_length(), modified)
        .with_checksum(metadata.etag().map(|s| s.trim_matches('"').to_string()))
}

#[async_trait]
impl ObjectBackend for CloudBackend {
    fn kind(&self) -> StorageKind {
        self.kind
    }

    async fn list_info(&self, prefix: &StoragePath) -> Result<Vec<FileInfo>> {
        let mut infos = Vec::new();
        if let Some(info) = self.head(prefix).await? {
            infos.push(info);
        }

        let mut lister = match self.operator.lister_with(&dir_key(prefix)).recursive(true).await {
            Ok(lister) => lister,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(infos),
            Err(e) => return Err(map_opendal_error(e, prefix)),
        };

        while let Some(entry) = lister
            .try_next()
            .await
            .map_err(|e| map_opendal_error(e, prefix))?
        {
            let metadata = entry.metadata();
            if metadata.is_dir() || entry.path().ends_with('/') {
                continue;
            }
            let path = StoragePath::parse(entry.path())?;
            infos.push(to_file_info(path, metadata));
        }

        Ok(infos)
    }

    async fn head(&self, path: &StoragePath) -> Result<Option<FileInfo>> {
        if path.is_root() {
            return Ok(None);
        }
        match self.operator.stat(&path.as_key()).await {
            Ok(metadata) if metadata.is_file() => Ok(Some(to_file_info(path.clone(), &metadata))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(map_opendal_error(e, path)),
        }
    }

    async fn read(&self, path: &StoragePath, chunk_size: usize) -> Result<ByteStream> {
        let reader = self
            .operator
            .reader_with(&path.as_key())
            .chunk(chunk_size)
            .await
            .map_err(|e| map_opendal_error(e, path))?;
        let stream = reader
            .into_bytes_stream(..)
            .await
            .map_err(|e| map_opendal_error(e, path))?;

        Ok(Box::pin(stream.map(|chunk| chunk.map_err(Error::Io))))
    }

    async fn write(&self, path: &StoragePath, mut stream: ByteStream) -> Result<()> {
        let mut writer = self
            .operator
            .writer_with(&path.as_key())
            .chunk(UPLOAD_CHUNK_SIZE)
            .await
            .map_err(|e| map_opendal_error(e, path))?;

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = writer.abort().await;
                    return Err(err);
                }
            };
            if let Err(e) = writer.write(chunk).await {
                let _ = writer.abort().await;
                return Err(map_opendal_error(e, path));
            }
        }

        writer.close().await.map_err(|e| map_opendal_error(e, path))?;
        Ok(())
    }

    async fn copy_object(&self, src: &StoragePath, dest: &StoragePath) -> Result<()> {
        self.operator
            .copy(&src.as_key(), &dest.as_key())
            .await
            .map_err(|e| map_opendal_error(e, src))
    }

    async fn delete_object(&self, path: &StoragePath) -> Result<()> {
        match self.operator.delete(&path.as_key()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(map_opendal_error(e, path)),
        }
    }

    async fn presign(&self, path: &StoragePath, expires_in: Duration) -> Result<String> {
        let request = self
            .operator
            .presign_read(&path.as_key(), expires_in)
            .await
            .map_err(|e| map_opendal_error(e, path))?;
        Ok(request.uri().to_string())
    }
}
