use std::collections::HashMap;

use chrono::Utc;
use log::info;
use serde::{Deserialize, Serialize};

use crate::assets::AssetType;
use crate::error::{ReleaseError, Result};

pub mod dev;

/// Store prefix under which every manifest lives.
pub const MANIFEST_PREFIX: &str = "config/";

/// Location of the gzip-encoded copy of an asset. Both fields travel together.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressedVariant {
    pub zsize: u64,
    pub zurl: String,
}

/// One published file as listed in a manifest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub asset_type: Option<AssetType>,
    pub url: String,
    pub version: u64,
    #[serde(flatten)]
    pub compressed: Option<CompressedVariant>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub files: Vec<AssetRecord>,
    #[serde(rename = "lastUpdatedAt")]
    pub last_updated_at: i64,
}

impl Manifest {
    pub fn empty() -> Self {
        Self {
            files: Vec::new(),
            last_updated_at: unix_now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_updated_at = unix_now();
    }

    pub fn to_json(&self, key: &str) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|source| ReleaseError::Manifest {
            key: key.to_owned(),
            source,
        })
    }

    pub fn from_json(key: &str, bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|source| ReleaseError::Manifest {
            key: key.to_owned(),
            source,
        })
    }
}

/// A manifest held in memory during a run, with its store key and dirty flag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestEntry {
    pub key: String,
    pub content: Manifest,
    pub updated: bool,
}

/// Asset records keyed by name, iterated in first-insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AssetSet {
    records: Vec<AssetRecord>,
    index: HashMap<String, usize>,
}

impl AssetSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record; a record with the same name is replaced in place.
    pub fn insert(&mut self, record: AssetRecord) {
        match self.index.get(&record.name) {
            Some(&idx) => self.records[idx] = record,
            None => {
                self.index.insert(record.name.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&AssetRecord> {
        self.index.get(name).map(|&idx| &self.records[idx])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AssetRecord> {
        self.records.iter()
    }
}

impl FromIterator<AssetRecord> for AssetSet {
    fn from_iter<T: IntoIterator<Item = AssetRecord>>(iter: T) -> Self {
        let mut set = AssetSet::new();
        for record in iter {
            set.insert(record);
        }
        set
    }
}

pub fn manifest_key(version: &str) -> String {
    format!("{MANIFEST_PREFIX}{version}.json")
}

/// Build the release manifest for `version` out of every processed asset.
pub fn build_release(assets: &AssetSet, version: &str) -> ManifestEntry {
    let mut content = Manifest::empty();
    content.files.extend(assets.iter().cloned());
    let key = manifest_key(version);
    info!("manifest: built `{key}` with {} files", content.files.len());
    ManifestEntry {
        key,
        content,
        updated: true,
    }
}

pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}
