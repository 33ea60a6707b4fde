use std::collections::{BTreeMap, HashMap};

use log::{info, warn};

use crate::assets::COMPRESSED_SUFFIX;
use crate::error::Result;
use crate::manifest::{MANIFEST_PREFIX, Manifest, ManifestEntry};
use crate::store::{ObjectStore, PutObject};

/// Store prefix under which asset payloads live.
pub const ASSET_PREFIX: &str = "assets";

const MANIFEST_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Manifests keyed by store key, in key order.
pub type ManifestSet = BTreeMap<String, ManifestEntry>;

/// What the store currently holds for one asset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteAsset {
    pub content: Vec<u8>,
    pub version: u64,
    pub version_id: String,
    pub size: u64,
    pub compressed: bool,
}

/// Snapshot of the bucket taken at the start of a run.
#[derive(Clone, Debug, Default)]
pub struct RemoteState {
    pub manifests: ManifestSet,
    pub assets: HashMap<String, RemoteAsset>,
}

impl RemoteState {
    pub fn manifest_keys(&self) -> impl Iterator<Item = &str> {
        self.manifests.keys().map(String::as_str)
    }
}

/// Store key of an asset name (`/a.json` -> `assets/a.json`).
pub fn asset_key(name: &str) -> String {
    format!("{ASSET_PREFIX}{name}")
}

pub fn compressed_key(name: &str) -> String {
    format!("{ASSET_PREFIX}{name}{COMPRESSED_SUFFIX}")
}

/// List the bucket and rebuild every manifest and asset it holds.
///
/// Compressed siblings are attached in a second pass, so the order in which
/// the store lists keys does not matter.
pub async fn read_state<S: ObjectStore>(store: &S) -> Result<RemoteState> {
    let keys = store.list_keys().await?;
    info!("remote: {} objects in bucket `{}`", keys.len(), store.bucket());

    let mut state = RemoteState::default();
    let mut compressed_names = Vec::new();

    for key in &keys {
        if let Some(name) = key.strip_prefix(MANIFEST_PREFIX) {
            if name.is_empty() {
                continue;
            }
            let object = store.get(key).await?;
            let content = Manifest::from_json(key, &object.body)?;
            state.manifests.insert(
                key.clone(),
                ManifestEntry {
                    key: key.clone(),
                    content,
                    updated: false,
                },
            );
            info!("remote: parsed existing manifest `{key}`");
        } else if let Some(rest) = key.strip_prefix(ASSET_PREFIX)
            && rest.len() > 1
            && rest.starts_with('/')
        {
            if let Some(base) = rest.strip_suffix(COMPRESSED_SUFFIX) {
                compressed_names.push(base.to_owned());
                continue;
            }
            let object = store.get(key).await?;
            let asset = RemoteAsset {
                version: object.asset_version(),
                version_id: object.version_id,
                size: object.size,
                content: object.body,
                compressed: false,
            };
            state.assets.insert(rest.to_owned(), asset);
            info!("remote: parsed existing asset `{rest}`");
        }
    }

    for name in compressed_names {
        match state.assets.get_mut(&name) {
            Some(asset) => asset.compressed = true,
            None => warn!("remote: compressed object for `{name}` has no base object"),
        }
    }

    Ok(state)
}

/// Store every manifest flagged as updated; the rest are left untouched.
///
/// Returns the keys that were written.
pub async fn write_updated<'a, S, I>(store: &S, manifests: I) -> Result<Vec<String>>
where
    S: ObjectStore,
    I: IntoIterator<Item = &'a ManifestEntry>,
{
    let mut written = Vec::new();
    for entry in manifests {
        if !entry.updated {
            continue;
        }
        info!("remote: uploading manifest `{}`", entry.key);
        let body = entry.content.to_json(&entry.key)?;
        store
            .put(PutObject::new(&entry.key, body, MANIFEST_CONTENT_TYPE))
            .await?;
        written.push(entry.key.clone());
    }
    Ok(written)
}
