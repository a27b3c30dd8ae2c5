//! Common types used throughout artifact storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{Error, Result};

/// A path within the storage root, independent of the backend.
///
/// Segments are never empty, `.` or `..`, so a `StoragePath` cannot point
/// outside the root it is resolved against. Equality and ordering compare
/// segment by segment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StoragePath {
    components: Vec<String>,
}

impl StoragePath {
    /// Create a root path.
    pub fn root() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Parse and normalize a user-supplied path.
    ///
    /// Both `/` and `\` separate segments. Empty and `.` segments are
    /// dropped, `..` removes the previous segment. Leading and trailing
    /// separators carry no meaning.
    ///
    /// # Errors
    /// - `InvalidPath` if a `..` would climb above the root
    /// - `InvalidPath` if a segment contains a NUL byte
    pub fn parse(raw: &str) -> Result<Self> {
        let mut components: Vec<String> = Vec::new();

        for segment in raw.split(['/', '\\']) {
            match segment {
                "" | "." => continue,
                ".." => {
                    if components.pop().is_none() {
                        return Err(Error::InvalidPath(format!(
                            "'{}' escapes the storage root",
                            raw
                        )));
                    }
                }
                segment => {
                    validate_segment(segment)?;
                    components.push(segment.to_string());
                }
            }
        }

        Ok(Self { components })
    }

    /// Build a path from a relative local filesystem path.
    ///
    /// Only plain components are accepted; absolute paths, drive prefixes
    /// and `..` are rejected.
    pub fn from_relative_path(path: &Path) -> Result<Self> {
        let mut components = Vec::new();

        for component in path.components() {
            match component {
                Component::Normal(part) => {
                    let part = part.to_str().ok_or_else(|| {
                        Error::InvalidPath(format!("{} is not valid UTF-8", path.display()))
                    })?;
                    validate_segment(part)?;
                    components.push(part.to_string());
                }
                Component::CurDir => continue,
                _ => {
                    return Err(Error::InvalidPath(format!(
                        "{} is not a relative path",
                        path.display()
                    )));
                }
            }
        }

        Ok(Self { components })
    }

    /// Check if this is the root path.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Get the parent path, if any.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            let mut components = self.components.clone();
            components.pop();
            Some(Self { components })
        }
    }

    /// Get the last segment.
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(|s| s.as_str())
    }

    /// Get the extension of the last segment, without the dot.
    pub fn extension(&self) -> Option<&str> {
        let name = self.name()?;
        match name.rfind('.') {
            Some(0) | None => None,
            Some(idx) => Some(&name[idx + 1..]),
        }
    }

    /// Concatenate the segments of `child` onto this path.
    pub fn join(&self, child: &StoragePath) -> Self {
        let mut components = self.components.clone();
        components.extend(child.components.iter().cloned());
        Self { components }
    }

    /// Append a single segment.
    pub fn push(&mut self, segment: &str) -> Result<()> {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(Error::InvalidPath(format!(
                "'{}' is not a valid path segment",
                segment
            )));
        }
        if segment.contains('/') || segment.contains('\\') {
            return Err(Error::InvalidPath(format!(
                "'{}' contains a separator",
                segment
            )));
        }
        validate_segment(segment)?;
        self.components.push(segment.to_string());
        Ok(())
    }

    /// Check whether `prefix` is a segment-wise prefix of this path.
    pub fn starts_with(&self, prefix: &StoragePath) -> bool {
        self.components.starts_with(&prefix.components)
    }

    /// Strip `root` from the front of this path.
    ///
    /// # Errors
    /// - `InvalidPath` if `root` is not a prefix of this path
    pub fn relative_to(&self, root: &StoragePath) -> Result<Self> {
        if !self.starts_with(root) {
            return Err(Error::InvalidPath(format!(
                "'{}' is not under '{}'",
                self, root
            )));
        }
        Ok(Self {
            components: self.components[root.components.len()..].to_vec(),
        })
    }

    /// Resolve this path under a local directory.
    pub fn to_local_path(&self, base: &Path) -> PathBuf {
        let mut path = base.to_path_buf();
        for component in &self.components {
            path.push(component);
        }
        path
    }

    /// Get the path components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Slash-joined form without leading or trailing separators.
    ///
    /// The root renders as the empty string.
    pub fn as_key(&self) -> String {
        self.components.join("/")
    }
}

fn validate_segment(segment: &str) -> Result<()> {
    if segment.contains('\0') {
        return Err(Error::InvalidPath(format!(
            "segment '{}' contains a NUL byte",
            segment.escape_default()
        )));
    }
    Ok(())
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_key())
    }
}

impl FromStr for StoragePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for StoragePath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for StoragePath {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<StoragePath> for String {
    fn from(path: StoragePath) -> Self {
        path.as_key()
    }
}

/// Listing metadata for one stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Root-relative path of the object.
    pub path: StoragePath,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time, when the backend reports one.
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,
    /// Content checksum or etag, when the backend reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl FileInfo {
    pub fn new(path: StoragePath, size: u64, modified: Option<DateTime<Utc>>) -> Self {
        Self {
            path,
            size,
            modified,
            checksum: None,
        }
    }

    pub fn with_checksum(mut self, checksum: Option<String>) -> Self {
        self.checksum = checksum;
        self
    }

    /// File name (last path segment).
    pub fn name(&self) -> &str {
        self.path.name().unwrap_or("")
    }

    /// File extension, empty when there is none.
    pub fn suffix(&self) -> &str {
        self.path.extension().unwrap_or("")
    }

    /// Listings only ever contain objects.
    pub fn object_type(&self) -> &'static str {
        "file"
    }
}

/// A time-limited link to one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedUrl {
    url: String,
    expires_in: Duration,
}

impl PresignedUrl {
    pub fn new(url: impl Into<String>, expires_in: Duration) -> Self {
        Self {
            url: url.into(),
            expires_in,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn expires_in(&self) -> Duration {
        self.expires_in
    }

    pub fn into_string(self) -> String {
        self.url
    }
}

impl fmt::Display for PresignedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Credential string that zeroizes on drop and never prints.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the secret value.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}
