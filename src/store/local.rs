use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::debug;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use walkdir::WalkDir;

use crate::error::{ReleaseError, Result};

use super::{ObjectStore, PutObject, StoredObject};

const META_DIR: &str = ".meta";
const VERSIONS_DIR: &str = ".versions";
/// Version id reported for objects written without a sidecar, as S3 does for unversioned writes.
const NULL_VERSION: &str = "null";

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ObjectMeta {
    content_type: String,
    #[serde(default)]
    content_encoding: Option<String>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    size: u64,
    version_id: String,
}

/// A versioned bucket kept in a local directory (`<root>/<bucket>`).
///
/// Object bodies sit at their key path; `.meta/<key>.json` holds the headers
/// and current version id, and `.versions/<key>/<id>` keeps every write.
/// Locators are `file://` URLs of those archived writes.
#[derive(Clone, Debug)]
pub struct LocalBucket {
    bucket: String,
    base_dir: PathBuf,
}

impl LocalBucket {
    pub fn new(root: impl AsRef<Path>, bucket: &str) -> Self {
        let base_dir = root.as_ref().join(bucket);
        Self {
            bucket: bucket.to_owned(),
            base_dir: std::path::absolute(&base_dir).unwrap_or(base_dir),
        }
    }

    #[allow(dead_code)]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        let segments = key_segments(key)?;
        Ok(segments
            .iter()
            .fold(self.base_dir.clone(), |path, segment| path.join(segment)))
    }

    fn meta_path(&self, key: &str) -> Result<PathBuf> {
        let segments = key_segments(key)?;
        let (last, parents) = segments
            .split_last()
            .ok_or_else(|| ReleaseError::Store(format!("invalid key `{key}`")))?;
        let dir = parents
            .iter()
            .fold(self.base_dir.join(META_DIR), |path, segment| path.join(segment));
        Ok(dir.join(format!("{last}.json")))
    }

    fn version_path(&self, key: &str, version_id: &str) -> Result<PathBuf> {
        key_segments(key)?;
        Ok(self.archived_path(key, version_id))
    }

    fn archived_path(&self, key: &str, version_id: &str) -> PathBuf {
        key.split('/')
            .fold(self.base_dir.join(VERSIONS_DIR), |path, segment| path.join(segment))
            .join(version_id)
    }

    async fn read_meta(&self, key: &str, body_len: u64) -> Result<ObjectMeta> {
        let path = self.meta_path(key)?;
        match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                ReleaseError::Store(format!("corrupt metadata for `{key}`: {e}"))
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(ObjectMeta {
                content_type: "application/octet-stream".into(),
                content_encoding: None,
                metadata: BTreeMap::new(),
                size: body_len,
                version_id: NULL_VERSION.into(),
            }),
            Err(err) => Err(ReleaseError::io(path, err)),
        }
    }
}

impl ObjectStore for LocalBucket {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        if fs::metadata(&self.base_dir).await.is_err() {
            debug!("store: bucket dir {} does not exist yet", self.base_dir.display());
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        let walker = WalkDir::new(&self.base_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                !(entry.depth() == 1
                    && matches!(entry.file_name().to_str(), Some(META_DIR | VERSIONS_DIR)))
            });
        for entry in walker {
            let entry = entry.map_err(|e| ReleaseError::io(&self.base_dir, e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.base_dir) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            keys.push(key);
        }
        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<StoredObject> {
        let path = self.object_path(key)?;
        let body = match fs::read(&path).await {
            Ok(body) => body,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(ReleaseError::ObjectNotFound(key.to_owned()));
            }
            Err(err) => return Err(ReleaseError::io(path, err)),
        };
        let meta = self.read_meta(key, body.len() as u64).await?;
        Ok(StoredObject {
            key: key.to_owned(),
            size: body.len() as u64,
            body,
            metadata: meta.metadata,
            version_id: meta.version_id,
            content_type: meta.content_type,
            content_encoding: meta.content_encoding,
        })
    }

    async fn put(&self, object: PutObject) -> Result<()> {
        let version_id = new_version_id(&object.body);
        let meta = ObjectMeta {
            content_type: object.content_type,
            content_encoding: object.content_encoding,
            metadata: object.metadata,
            size: object.body.len() as u64,
            version_id: version_id.clone(),
        };
        let meta_json = serde_json::to_vec_pretty(&meta)
            .map_err(|e| ReleaseError::Store(format!("unable to encode metadata: {e}")))?;

        let targets = [
            (self.version_path(&object.key, &version_id)?, object.body.as_slice()),
            (self.object_path(&object.key)?, object.body.as_slice()),
            (self.meta_path(&object.key)?, meta_json.as_slice()),
        ];
        for (path, bytes) in targets {
            write_file(&path, bytes).await?;
        }
        debug!(
            "store: wrote `{}` ({} bytes) as version {version_id}",
            object.key, meta.size
        );
        Ok(())
    }

    fn locator(&self, key: &str, version_id: &str) -> String {
        let path = self.archived_path(key, version_id);
        let path = path.to_string_lossy().replace('\\', "/");
        if path.starts_with('/') {
            format!("file://{path}")
        } else {
            format!("file:///{path}")
        }
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| ReleaseError::io(parent, e))?;
    }
    fs::write(path, bytes)
        .await
        .map_err(|e| ReleaseError::io(path, e))
}

fn key_segments(key: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = key.split('/').collect();
    let reserved = matches!(segments.first(), Some(&(META_DIR | VERSIONS_DIR)));
    if reserved
        || segments
            .iter()
            .any(|segment| segment.is_empty() || *segment == "." || *segment == "..")
    {
        return Err(ReleaseError::Store(format!("invalid key `{key}`")));
    }
    Ok(segments)
}

fn new_version_id(body: &[u8]) -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(nanos.to_be_bytes());
    hasher.update(body);
    let digest = format!("{:x}", hasher.finalize());
    digest[..32].to_owned()
}
