//! Settings a storage client is built from.
//!
//! Resolving these values (environment, secret stores, config files) is
//! the caller's job. This module only describes them and checks that they
//! are consistent.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::Secret;
use crate::{Error, Result};

/// Which backend a client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Directory tree on local disk.
    Local,
    /// Amazon S3 or an S3-compatible service.
    S3,
    /// Google Cloud Storage.
    Gcs,
    /// Remote store fronted by an HTTP API.
    Http,
    /// In-process object map, for tests and development.
    Memory,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Local => "local",
            StorageKind::S3 => "s3",
            StorageKind::Gcs => "gcs",
            StorageKind::Http => "http",
            StorageKind::Memory => "memory",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication material for the cloud and HTTP backends.
///
/// Fields a backend does not use are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    /// S3 access key ID.
    #[serde(default)]
    pub access_key_id: Option<String>,
    /// S3 secret access key.
    #[serde(default)]
    pub secret_access_key: Option<Secret>,
    /// S3 region.
    #[serde(default)]
    pub region: Option<String>,
    /// Custom endpoint (MinIO, fake-gcs-server, ...).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Path to a GCS service account file.
    #[serde(default)]
    pub credential_path: Option<String>,
    /// Base64 encoded GCS service account JSON.
    #[serde(default)]
    pub credential: Option<Secret>,
    /// Bearer token for the HTTP backend.
    #[serde(default)]
    pub token: Option<Secret>,
}

/// Where the HTTP backend sends its requests.
///
/// Every request URL is `base_url/path_prefix/<path>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    pub base_url: String,
    #[serde(default)]
    pub path_prefix: String,
    /// Per-request timeout in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Tuning for multi-file transfers and retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Upper bound on per-file operations in flight.
    pub max_concurrency: usize,
    /// Retries for transient failures of a single backend call.
    pub max_retries: u32,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            max_retries: 3,
        }
    }
}

/// Everything needed to construct a storage client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Backend selection.
    pub kind: StorageKind,
    /// Local root directory or bucket name. Unused by HTTP and memory.
    #[serde(default)]
    pub root: String,
    /// Key prefix inside the bucket.
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(default)]
    pub http: Option<HttpSettings>,
    #[serde(default)]
    pub transfer: TransferSettings,
}

impl StorageSettings {
    fn with_kind(kind: StorageKind, root: impl Into<String>) -> Self {
        Self {
            kind,
            root: root.into(),
            prefix: None,
            credentials: Credentials::default(),
            http: None,
            transfer: TransferSettings::default(),
        }
    }

    /// Local directory rooted at `root`.
    pub fn local(root: impl Into<String>) -> Self {
        Self::with_kind(StorageKind::Local, root)
    }

    /// S3 bucket.
    pub fn s3(bucket: impl Into<String>) -> Self {
        Self::with_kind(StorageKind::S3, bucket)
    }

    /// GCS bucket.
    pub fn gcs(bucket: impl Into<String>) -> Self {
        Self::with_kind(StorageKind::Gcs, bucket)
    }

    /// HTTP remote reached at `base_url/path_prefix`.
    pub fn http(base_url: impl Into<String>, path_prefix: impl Into<String>) -> Self {
        let mut settings = Self::with_kind(StorageKind::Http, "");
        settings.http = Some(HttpSettings {
            base_url: base_url.into(),
            path_prefix: path_prefix.into(),
            timeout_secs: None,
        });
        settings
    }

    /// In-memory object map.
    pub fn memory() -> Self {
        Self::with_kind(StorageKind::Memory, "")
    }

    /// Derive settings from a storage URI.
    ///
    /// `s3://bucket/prefix` and `gs://bucket/prefix` select the cloud
    /// backends, `http(s)://host/prefix` the HTTP remote, `memory://` the
    /// in-memory map. Anything else is treated as a local directory.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(Error::Config("storage URI is empty".to_string()));
        }

        if let Some(rest) = uri.strip_prefix("s3://") {
            let (bucket, prefix) = split_bucket(rest)?;
            return Ok(Self::s3(bucket).with_prefix(prefix));
        }
        if let Some(rest) = uri.strip_prefix("gs://") {
            let (bucket, prefix) = split_bucket(rest)?;
            return Ok(Self::gcs(bucket).with_prefix(prefix));
        }
        if uri.starts_with("http://") || uri.starts_with("https://") {
            let scheme_end = uri.find("://").map(|idx| idx + 3).unwrap_or(0);
            let (base_url, path_prefix) = match uri[scheme_end..].find('/') {
                Some(idx) => {
                    let split = scheme_end + idx;
                    (&uri[..split], uri[split..].trim_matches('/'))
                }
                None => (uri, ""),
            };
            return Ok(Self::http(base_url, path_prefix));
        }
        if uri.starts_with("memory://") {
            return Ok(Self::memory());
        }

        let root = uri.strip_prefix("file://").unwrap_or(uri);
        Ok(Self::local(root))
    }

    pub fn with_prefix(mut self, prefix: Option<String>) -> Self {
        self.prefix = prefix
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty());
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_transfer(mut self, transfer: TransferSettings) -> Self {
        self.transfer = transfer;
        self
    }

    /// Attach a bearer token for the HTTP backend.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.credentials.token = Some(Secret::new(token));
        self
    }

    /// Check that the settings carry what the selected backend needs.
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            StorageKind::Local | StorageKind::S3 | StorageKind::Gcs => {
                if self.root.trim().is_empty() {
                    return Err(Error::Config(format!(
                        "{} storage requires a root",
                        self.kind
                    )));
                }
            }
            StorageKind::Http => {
                let http = self.http.as_ref().ok_or_else(|| {
                    Error::Config("http storage requires base_url settings".to_string())
                })?;
                if http.base_url.trim().is_empty() {
                    return Err(Error::Config("http base_url is empty".to_string()));
                }
            }
            StorageKind::Memory => {}
        }

        if self.transfer.max_concurrency == 0 {
            return Err(Error::Config(
                "max_concurrency must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Serialize settings to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize settings from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }
}

fn split_bucket(rest: &str) -> Result<(String, Option<String>)> {
    let rest = rest.trim_matches('/');
    let (bucket, prefix) = match rest.split_once('/') {
        Some((bucket, prefix)) => (bucket, Some(prefix.to_string())),
        None => (rest, None),
    };
    if bucket.is_empty() {
        return Err(Error::Config("storage URI has no bucket".to_string()));
    }
    Ok((bucket.to_string(), prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_uri_cloud() {
        let s3 = StorageSettings::from_uri("s3://models/opsml/registry/").unwrap();
        assert_eq!(s3.kind, StorageKind::S3);
        assert_eq!(s3.root, "models");
        assert_eq!(s3.prefix.as_deref(), Some("opsml/registry"));

        let gcs = StorageSettings::from_uri("gs://bucket").unwrap();
        assert_eq!(gcs.kind, StorageKind::Gcs);
        assert_eq!(gcs.root, "bucket");
        assert_eq!(gcs.prefix, None);

        assert!(StorageSettings::from_uri("s3://").is_err());
    }

    #[test]
    fn test_from_uri_http_and_local() {
        let http = StorageSettings::from_uri("https://registry.example.com/opsml/files").unwrap();
        assert_eq!(http.kind, StorageKind::Http);
        let params = http.http.unwrap();
        assert_eq!(params.base_url, "https://registry.example.com");
        assert_eq!(params.path_prefix, "opsml/files");

        let local = StorageSettings::from_uri("/var/lib/registry").unwrap();
        assert_eq!(local.kind, StorageKind::Local);
        assert_eq!(local.root, "/var/lib/registry");

        let file = StorageSettings::from_uri("file:///tmp/store").unwrap();
        assert_eq!(file.root, "/tmp/store");
    }

    #[test]
    fn test_validate() {
        assert!(StorageSettings::local("/tmp/x").validate().is_ok());
        assert!(StorageSettings::local("").validate().is_err());
        assert!(StorageSettings::memory().validate().is_ok());
        assert!(StorageSettings::http("", "p").validate().is_err());

        let zero = StorageSettings::memory().with_transfer(TransferSettings {
            max_concurrency: 0,
            max_retries: 1,
        });
        assert!(matches!(zero.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_settings_json_roundtrip_keeps_secrets_out_of_debug() {
        let settings = StorageSettings::http("http://localhost:3000", "opsml").with_token("tok");
        let json = settings.to_json().unwrap();
        let restored = StorageSettings::from_json(&json).unwrap();

        assert_eq!(restored.kind, StorageKind::Http);
        assert_eq!(
            restored.credentials.token.as_ref().map(|t| t.expose()),
            Some("tok")
        );
        assert!(!format!("{:?}", restored).contains("\"tok\""));
    }

    #[test]
    fn test_minimal_json_uses_defaults() {
        let settings = StorageSettings::from_json(r#"{"kind": "local", "root": "/tmp/a"}"#).unwrap();
        assert_eq!(settings.transfer, TransferSettings::default());
        assert!(settings.http.is_none());
    }
}
