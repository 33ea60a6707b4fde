use std::collections::BTreeMap;

use crate::error::Result;

pub mod local;

pub use local::LocalBucket;

/// Metadata key holding the asset version of a stored object.
pub const VERSION_METADATA: &str = "version";

/// An object as read back from the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    #[allow(dead_code)]
    pub key: String,
    pub body: Vec<u8>,
    pub metadata: BTreeMap<String, String>,
    pub size: u64,
    pub version_id: String,
    #[allow(dead_code)]
    pub content_type: String,
    #[allow(dead_code)]
    pub content_encoding: Option<String>,
}

impl StoredObject {
    /// Asset version recorded in the object metadata; missing or garbled values read as 0.
    pub fn asset_version(&self) -> u64 {
        self.metadata
            .get(VERSION_METADATA)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(0)
    }
}

/// A write request. Objects are always published world-readable.
#[derive(Clone, Debug)]
pub struct PutObject {
    pub key: String,
    pub body: Vec<u8>,
    pub content_type: String,
    pub metadata: BTreeMap<String, String>,
    pub content_encoding: Option<String>,
}

impl PutObject {
    pub fn new(key: impl Into<String>, body: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            body,
            content_type: content_type.into(),
            metadata: BTreeMap::new(),
            content_encoding: None,
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_owned(), value.into());
        self
    }

    pub fn with_encoding(mut self, encoding: &str) -> Self {
        self.content_encoding = Some(encoding.to_owned());
        self
    }
}

/// Versioned key/value blob store the release is published to.
///
/// Every call is awaited in sequence by the release flow; implementations do
/// not need to be `Send`.
#[allow(async_fn_in_trait)]
pub trait ObjectStore {
    /// Human readable bucket name, used in logs.
    fn bucket(&self) -> &str;

    async fn list_keys(&self) -> Result<Vec<String>>;

    /// # Errors
    /// `ReleaseError::ObjectNotFound` when `key` does not exist.
    async fn get(&self, key: &str) -> Result<StoredObject>;

    async fn put(&self, object: PutObject) -> Result<()>;

    /// Stable public locator for one specific write of `key`.
    fn locator(&self, key: &str, version_id: &str) -> String;
}
