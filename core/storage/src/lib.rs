//! Storage clients for artifact storage.
//!
//! This crate provides one capability contract, [`StorageClient`], and the
//! backends that implement it: a local directory tree, S3 and GCS buckets,
//! a remote store behind an HTTP API, and an in-memory map for tests.
//!
//! # Design Principles
//! - One contract: identical path semantics and error behaviour everywhere
//! - Directory emulation for flat key spaces is written once ([`PrefixStore`])
//! - Multi-file work runs on a bounded worker pool and stops at the first failure
//! - Reads stream in bounded chunks; nothing buffers a whole object

pub mod backend;
pub mod client;
pub mod cloud;
pub mod http;
pub mod local;
pub mod memory;
pub mod prefix;
pub mod registry;
pub mod retry;
pub mod stream;
mod transfer;

pub use backend::ObjectBackend;
pub use client::{ByteStream, StorageClient};
pub use cloud::CloudBackend;
pub use http::{ApiClient, HttpBackend};
pub use local::LocalClient;
pub use memory::MemoryBackend;
pub use prefix::PrefixStore;
pub use registry::{create_client, ClientRegistry, CloudClient, HttpClient, MemoryClient};
pub use retry::{RetryConfig, RetryExecutor};

pub use artifactstore_common::{
    Error, FileInfo, PresignedUrl, Result, StorageKind, StoragePath, StorageSettings,
    TransferSettings,
};
