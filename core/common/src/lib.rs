//! Common types shared by the artifact storage crates.
//!
//! This crate holds the backend-independent pieces every storage client
//! agrees on: the canonical path model, listing metadata, the error
//! taxonomy and the settings a client is built from.

pub mod error;
pub mod settings;
pub mod types;

pub use error::{Error, Result};
pub use settings::{Credentials, HttpSettings, StorageKind, StorageSettings, TransferSettings};
pub use types::{FileInfo, PresignedUrl, Secret, StoragePath};
