use async_trait::async_trait;
use std::time::Duration;

use artifactstore_common::{Error, FileInfo, Result, StorageKind, StoragePath, StorageSettings};

use super::client::ApiClient;
use crate::backend::ObjectBackend;
use crate::client::ByteStream;

/// Object backend that proxies every primitive to a storage API.
pub struct HttpBackend {
    client: ApiClient,
}

impl HttpBackend {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Build from `settings.http` and the bearer token in `settings.credentials`.
    pub fn from_settings(settings: &StorageSettings) -> Result<Self> {
        let http = settings.http.as_ref().ok_or_else(|| {
            Error::Config("http storage requires base_url settings".to_string())
        })?;
        let client = ApiClient::new(http, settings.credentials.token.clone())?;
        Ok(Self::new(client))
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }
}

#[async_trait]
impl ObjectBackend for HttpBackend {
    fn kind(&self) -> StorageKind {
        StorageKind::Http
    }

    async fn list_info(&self, prefix: &StoragePath) -> Result<Vec<FileInfo>> {
        self.client.list_info(prefix).await
    }

    async fn list(&self, prefix: &StoragePath) -> Result<Vec<StoragePath>> {
        self.client.list(prefix).await
    }

    async fn head(&self, path: &StoragePath) -> Result<Option<FileInfo>> {
        self.client.stat(path).await
    }

    async fn read(&self, path: &StoragePath, _chunk_size: usize) -> Result<ByteStream> {
        self.client.download(path).await
    }

    async fn write(&self, path: &StoragePath, stream: ByteStream) -> Result<()> {
        self.client.upload(path, stream).await
    }

    async fn copy_object(&self, src: &StoragePath, dest: &StoragePath) -> Result<()> {
        self.client.copy(src, dest).await
    }

    async fn delete_object(&self, path: &StoragePath) -> Result<()> {
        self.client.delete(path).await
    }

    async fn presign(&self, path: &StoragePath, expires_in: Duration) -> Result<String> {
        self.client.presign(path, expires_in).await
    }
}
