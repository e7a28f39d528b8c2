//! Turning a finished module into something a user can take away.
//!
//! Two interchangeable strategies:
//!
//! - [`BlobPublisher`]: stage the bytes as a file with a fixed name and hand
//!   out a revocable [`BlobHandle`] to it.
//! - [`UrlPublisher`]: encode the bytes with the alphabet-43 [`codec`] and
//!   embed them in a viewer URL as `?c=<encoded>`.
//!
//! [`PublishSlot`] keeps at most one published reference alive and revokes
//! the previous one whenever a new one is stored.

pub mod codec;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use uuid::Uuid;

use crate::error::{Error, Result};

/// File name every published module is offered under.
pub const ARTIFACT_FILENAME: &str = "main.wasm";

/// Query parameter carrying the encoded module.
pub const URL_PARAM: &str = "c";

/// Largest module the URL publisher will encode.
pub const MAX_URL_MODULE_BYTES: usize = 16 * 1024;

/// Longest encoded text accepted back from a URL (43^3 > 256^2).
const MAX_ENCODED_LEN: usize = MAX_URL_MODULE_BYTES * 3 / 2 + 1;

/// Which publishing strategy a deployment uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishMode {
    #[default]
    Blob,
    Url,
}

/// A strategy for publishing artifact bytes.
pub trait ArtifactPublisher {
    /// Publish `bytes`, returning a live reference to them.
    fn publish(&self, bytes: &[u8]) -> Result<Published>;
}

/// Create the publisher for `mode`.
pub fn publisher_for(mode: PublishMode, viewer_url: &str) -> Result<Box<dyn ArtifactPublisher>> {
    Ok(match mode {
        PublishMode::Blob => Box::new(BlobPublisher::new()?),
        PublishMode::Url => Box::new(UrlPublisher::new(viewer_url)),
    })
}

/// A live reference to a published artifact.
#[derive(Debug)]
pub enum Published {
    /// A staged file.
    Blob(BlobHandle),
    /// A self-contained viewer URL.
    Url(String),
}

impl Published {
    /// Release the reference. Idempotent.
    pub fn revoke(&mut self) {
        if let Published::Blob(handle) = self {
            handle.revoke();
        }
    }
}

impl fmt::Display for Published {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Published::Blob(handle) => write!(f, "{}", handle.path().display()),
            Published::Url(url) => f.write_str(url),
        }
    }
}

/// Revocable reference to a staged artifact file.
#[derive(Debug)]
pub struct BlobHandle {
    id: Uuid,
    dir: PathBuf,
    size: usize,
    revoked: bool,
}

impl BlobHandle {
    /// Unique id of this reference.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Path of the staged file.
    pub fn path(&self) -> PathBuf {
        self.dir.join(ARTIFACT_FILENAME)
    }

    /// Size of the staged bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether [`Self::revoke`] has run.
    pub fn is_revoked(&self) -> bool {
        self.revoked
    }

    /// Copy the artifact out. A directory destination gets the fixed file name.
    pub fn save_as(&self, dest: &Path) -> Result<PathBuf> {
        if self.revoked {
            return Err(Error::Publish(format!("blob {} was revoked", self.id)));
        }

        let target = if dest.is_dir() {
            dest.join(ARTIFACT_FILENAME)
        } else {
            dest.to_path_buf()
        };
        if let Some(parent) = target.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::copy(self.path(), &target)?;
        Ok(target)
    }

    /// Delete the staged file. Idempotent.
    pub fn revoke(&mut self) {
        if self.revoked {
            return;
        }
        self.revoked = true;
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            tracing::warn!("failed to revoke blob {}: {}", self.id, e);
        } else {
            tracing::debug!("revoked blob {}", self.id);
        }
    }
}

/// Stages artifacts in a private temporary directory.
///
/// Dropping the publisher removes everything it staged.
pub struct BlobPublisher {
    staging: TempDir,
}

impl BlobPublisher {
    /// Create a publisher with a fresh staging directory.
    pub fn new() -> Result<Self> {
        let staging = tempfile::Builder::new().prefix("scorecard-").tempdir()?;
        Ok(Self { staging })
    }
}

impl ArtifactPublisher for BlobPublisher {
    fn publish(&self, bytes: &[u8]) -> Result<Published> {
        let id = Uuid::new_v4();
        let dir = self.staging.path().join(id.to_string());
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(ARTIFACT_FILENAME), bytes)?;

        tracing::debug!("staged {} bytes as blob {}", bytes.len(), id);
        Ok(Published::Blob(BlobHandle {
            id,
            dir,
            size: bytes.len(),
            revoked: false,
        }))
    }
}

/// Embeds artifacts in a viewer URL.
#[derive(Debug, Clone)]
pub struct UrlPublisher {
    viewer_base: String,
}

impl UrlPublisher {
    /// Create a publisher for the viewer at `viewer_base`.
    pub fn new(viewer_base: impl Into<String>) -> Self {
        Self {
            viewer_base: viewer_base.into(),
        }
    }

    /// `<viewer-base>?c=<encoded>` for `bytes`.
    pub fn url_for(&self, bytes: &[u8]) -> String {
        let encoded = codec::escape_query(&codec::encode(bytes));
        format!("{}?{}={}", self.viewer_base, URL_PARAM, encoded)
    }
}

impl ArtifactPublisher for UrlPublisher {
    fn publish(&self, bytes: &[u8]) -> Result<Published> {
        if bytes.len() > MAX_URL_MODULE_BYTES {
            return Err(Error::Publish(format!(
                "module is {} bytes, URL publishing is limited to {}",
                bytes.len(),
                MAX_URL_MODULE_BYTES
            )));
        }
        Ok(Published::Url(self.url_for(bytes)))
    }
}

/// Recover module bytes from a viewer URL.
pub fn decode_viewer_url(url: &str) -> Result<Vec<u8>> {
    let query = url
        .split_once('?')
        .map(|(_, query)| query)
        .ok_or_else(|| Error::Publish("viewer URL has no query string".to_string()))?;

    let value = query
        .split('&')
        .find_map(|pair| pair.strip_prefix(URL_PARAM).and_then(|rest| rest.strip_prefix('=')))
        .ok_or_else(|| Error::Publish(format!("viewer URL has no `{URL_PARAM}` parameter")))?;

    let encoded = codec::unescape_query(value);
    if encoded.len() > MAX_ENCODED_LEN {
        return Err(Error::Publish(format!(
            "encoded module is {} characters, more than a {MAX_URL_MODULE_BYTES} byte module needs",
            encoded.len()
        )));
    }

    codec::decode(&encoded)
}

/// Holds at most one live published reference.
#[derive(Debug, Default)]
pub struct PublishSlot {
    current: Option<Published>,
}

impl PublishSlot {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Revoke the current reference, then store `next`.
    pub fn replace(&mut self, next: Published) -> &Published {
        self.clear();
        self.current.insert(next)
    }

    /// Revoke and forget the current reference.
    pub fn clear(&mut self) {
        if let Some(mut previous) = self.current.take() {
            previous.revoke();
        }
    }

    /// The live reference, if any.
    pub fn current(&self) -> Option<&Published> {
        self.current.as_ref()
    }
}

impl Drop for PublishSlot {
    fn drop(&mut self) {
        self.clear();
    }
}
