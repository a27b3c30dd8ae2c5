//! Remote store fronted by an HTTP API.
//!
//! Every request targets `base_url/path_prefix/<path>`. The query
//! parameter `op` selects listing, metadata, copy and presign
//! operations; plain `GET`, `PUT` and `DELETE` move and remove bytes.

mod backend;
mod client;

pub use backend::HttpBackend;
pub use client::{ApiClient, CopyRequest, FileListResponse, InfoListResponse, PresignResponse};
