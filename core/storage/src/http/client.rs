//! Storage API client.

use futures::StreamExt;
use reqwest::{Body, Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

use artifactstore_common::{Error, FileInfo, HttpSettings, Result, Secret, StoragePath};

use crate::client::ByteStream;

/// Response to `GET <path>?op=list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileListResponse {
    pub files: Vec<StoragePath>,
}

/// Response to `GET <path>?op=info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoListResponse {
    pub files: Vec<FileInfo>,
}

/// Body of `POST <src>?op=copy`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyRequest {
    pub dest: StoragePath,
}

/// Response to `GET <path>?op=presign`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresignResponse {
    pub url: String,
}

/// HTTP client for a remote storage API.
pub struct ApiClient {
    http: Client,
    base: Url,
    token: Option<Secret>,
}

impl ApiClient {
    /// Create a client for `settings.base_url/settings.path_prefix`.
    ///
    /// # Errors
    /// - `Config` if the base URL does not parse or cannot carry a path
    pub fn new(settings: &HttpSettings, token: Option<Secret>) -> Result<Self> {
        let mut builder =
            Client::builder().user_agent(concat!("artifactstore/", env!("CARGO_PKG_VERSION")));
        if let Some(secs) = settings.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let http = builder
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        let mut base = Url::parse(settings.base_url.trim())
            .map_err(|e| Error::Config(format!("invalid base_url '{}': {}", settings.base_url, e)))?;
        {
            let mut segments = base.path_segments_mut().map_err(|_| {
                Error::Config(format!("base_url '{}' cannot carry a path", settings.base_url))
            })?;
            segments.pop_if_empty();
            for segment in settings.path_prefix.split('/').filter(|s| !s.is_empty()) {
                segments.push(segment);
            }
        }

        Ok(Self { http, base, token })
    }

    /// Request URL for a storage path.
    pub fn object_url(&self, path: &StoragePath) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("{} cannot carry a path", self.base)))?
            .pop_if_empty()
            .extend(path.components());
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token.expose()),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, target: &StoragePath) -> Result<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        check_status(response, target).await
    }

    /// Paths of every object at or under `path`.
    pub async fn list(&self, path: &StoragePath) -> Result<Vec<StoragePath>> {
        let url = self.object_url(path)?;
        let request = self.http.get(url).query(&[("op", "list")]);
        let response = self.send(request, path).await?;
        let body: FileListResponse = response.json().await.map_err(map_reqwest_error)?;
        Ok(body.files)
    }

    /// Metadata of every object at or under `path`.
    pub async fn list_info(&self, path: &StoragePath) -> Result<Vec<FileInfo>> {
        let url = self.object_url(path)?;
        let request = self.http.get(url).query(&[("op", "info")]);
        let response = self.send(request, path).await?;
        let body: InfoListResponse = response.json().await.map_err(map_reqwest_error)?;
        Ok(body.files)
    }

    /// Metadata of the object at exactly `path`, without listing below it.
    pub async fn stat(&self, path: &StoragePath) -> Result<Option<FileInfo>> {
        let url = self.object_url(path)?;
        let request = self.http.get(url).query(&[("op", "stat")]);
        let response = match self.send(request, path).await {
            Ok(response) => response,
            Err(Error::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let info: FileInfo = response.json().await.map_err(map_reqwest_error)?;
        Ok(Some(info))
    }

    /// Stream the bytes of one object.
    pub async fn download(&self, path: &StoragePath) -> Result<ByteStream> {
        let url = self.object_url(path)?;
        let response = self.send(self.http.get(url), path).await?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(map_reqwest_error));
        Ok(Box::pin(stream))
    }

    /// Upload a byte stream as one object.
    pub async fn upload(&self, path: &StoragePath, stream: ByteStream) -> Result<()> {
        let url = self.object_url(path)?;
        let request = self.http.put(url).body(Body::wrap_stream(stream));
        self.send(request, path).await?;
        debug!(path = %path, "Uploaded object");
        Ok(())
    }

    /// Server-side copy of one object.
    pub async fn copy(&self, src: &StoragePath, dest: &StoragePath) -> Result<()> {
        let url = self.object_url(src)?;
        let request = self
            .http
            .post(url)
            .query(&[("op", "copy")])
            .json(&CopyRequest { dest: dest.clone() });
        self.send(request, src).await?;
        Ok(())
    }

    /// Delete one object. A missing object is not an error.
    pub async fn delete(&self, path: &StoragePath) -> Result<()> {
        let url = self.object_url(path)?;
        match self.send(self.http.delete(url), path).await {
            Ok(_) => Ok(()),
            Err(Error::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Ask the remote for a signed link to one object.
    pub async fn presign(&self, path: &StoragePath, expires_in: Duration) -> Result<String> {
        let url = self.object_url(path)?;
        let expiration = expires_in.as_secs().to_string();
        let request = self
            .http
            .get(url)
            .query(&[("op", "presign"), ("expiration", expiration.as_str())]);
        let response = self.send(request, path).await?;
        let body: PresignResponse = response.json().await.map_err(map_reqwest_error)?;
        Ok(body.url)
    }
}

async fn check_status(response: Response, target: &StoragePath) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, target, &body))
}

/// Map a non-success status onto the common error type.
pub(crate) fn status_error(status: StatusCode, target: &StoragePath, body: &str) -> Error {
    match status {
        StatusCode::NOT_FOUND => Error::NotFound(target.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::PermissionDenied(format!("{}: {} {}", target, status, body))
        }
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
            Error::InvalidOperation(format!("{}: {} {}", target, status, body))
        }
        StatusCode::NOT_IMPLEMENTED => Error::Unsupported(format!("{}: {}", target, body)),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            Error::Transient(format!("{}: {}", target, status))
        }
        s if s.is_server_error() => Error::Transient(format!("{}: {} {}", target, status, body)),
        _ => Error::Backend(format!("API error: {} - {}", status, body)),
    }
}

fn map_reqwest_error(err: reqwest::Error) -> Error {
    if err.is_decode() {
        Error::Serialization(format!("Failed to parse response: {}", err))
    } else if err.is_builder() {
        Error::Config(format!("Failed to build request: {}", err))
    } else {
        Error::Transient(format!("Request failed: {}", err))
    }
}
