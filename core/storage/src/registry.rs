//! Client registry for resolving a storage client from settings.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use artifactstore_common::{Error, Result, StorageKind, StorageSettings};

use crate::client::StorageClient;
use crate::cloud::CloudBackend;
use crate::http::HttpBackend;
use crate::local::LocalClient;
use crate::memory::MemoryBackend;
use crate::prefix::PrefixStore;

/// S3 or GCS client.
pub type CloudClient = PrefixStore<CloudBackend>;
/// Client for a remote storage API.
pub type HttpClient = PrefixStore<HttpBackend>;
/// In-memory client.
pub type MemoryClient = PrefixStore<MemoryBackend>;

/// Factory function type for creating clients.
pub type ClientFactory =
    Box<dyn Fn(&StorageSettings) -> Result<Arc<dyn StorageClient>> + Send + Sync>;

/// Registry of client factories keyed by backend kind.
pub struct ClientRegistry {
    factories: HashMap<StorageKind, ClientFactory>,
}

impl ClientRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with a factory for every built-in backend.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.factories.insert(
            StorageKind::Local,
            Box::new(|s: &StorageSettings| {
                Ok(Arc::new(LocalClient::with_transfer(&s.root, s.transfer)?)
                    as Arc<dyn StorageClient>)
            }),
        );
        registry.factories.insert(
            StorageKind::S3,
            Box::new(|s: &StorageSettings| {
                Ok(Arc::new(CloudClient::new(CloudBackend::s3(s)?, s.transfer))
                    as Arc<dyn StorageClient>)
            }),
        );
        registry.factories.insert(
            StorageKind::Gcs,
            Box::new(|s: &StorageSettings| {
                Ok(Arc::new(CloudClient::new(CloudBackend::gcs(s)?, s.transfer))
                    as Arc<dyn StorageClient>)
            }),
        );
        registry.factories.insert(
            StorageKind::Http,
            Box::new(|s: &StorageSettings| {
                Ok(Arc::new(HttpClient::new(HttpBackend::from_settings(s)?, s.transfer))
                    as Arc<dyn StorageClient>)
            }),
        );
        registry.factories.insert(
            StorageKind::Memory,
            Box::new(|s: &StorageSettings| {
                Ok(Arc::new(MemoryClient::new(MemoryBackend::new(), s.transfer))
                    as Arc<dyn StorageClient>)
            }),
        );
        registry
    }

    /// Register or replace the factory for a backend kind.
    pub fn register(&mut self, kind: StorageKind, factory: ClientFactory) {
        self.factories.insert(kind, factory);
    }

    /// Build a client for `settings`.
    ///
    /// # Errors
    /// - `Config` if the settings are invalid for their backend
    /// - `Unsupported` if no factory is registered for the kind
    pub fn resolve(&self, settings: &StorageSettings) -> Result<Arc<dyn StorageClient>> {
        settings.validate()?;
        let factory = self.factories.get(&settings.kind).ok_or_else(|| {
            Error::Unsupported(format!("no client registered for {} storage", settings.kind))
        })?;
        info!(kind = %settings.kind, "Creating storage client");
        factory(settings)
    }

    pub fn has_kind(&self, kind: StorageKind) -> bool {
        self.factories.contains_key(&kind)
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Build a storage client for `settings` with the built-in backends.
pub fn create_client(settings: &StorageSettings) -> Result<Arc<dyn StorageClient>> {
    ClientRegistry::with_defaults().resolve(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use artifactstore_common::StoragePath;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_local_client() {
        let dir = TempDir::new().unwrap();
        let settings = StorageSettings::local(dir.path().to_string_lossy().to_string());

        let client = create_client(&settings).unwrap();
        assert_eq!(client.kind(), StorageKind::Local);
        assert!(client.find(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_memory_client() {
        let client = create_client(&StorageSettings::memory()).unwrap();
        assert_eq!(client.kind(), StorageKind::Memory);
        assert!(!client
            .exists(&StoragePath::parse("anything").unwrap())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_create_from_uri() {
        let settings = StorageSettings::from_uri("http://127.0.0.1:9/opsml").unwrap();
        let client = create_client(&settings).unwrap();
        assert_eq!(client.kind(), StorageKind::Http);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let result = create_client(&StorageSettings::s3(""));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_empty_registry() {
        let registry = ClientRegistry::new();
        assert!(!registry.has_kind(StorageKind::Memory));
        assert!(matches!(
            registry.resolve(&StorageSettings::memory()),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn test_register_override() {
        let mut registry = ClientRegistry::new();
        registry.register(
            StorageKind::Memory,
            Box::new(|s: &StorageSettings| {
                Ok(Arc::new(MemoryClient::new(MemoryBackend::new(), s.transfer))
                    as Arc<dyn StorageClient>)
            }),
        );
        assert!(registry.resolve(&StorageSettings::memory()).is_ok());
    }
}
