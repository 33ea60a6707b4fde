use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::{ReleaseError, Result};

/// Suffix of the gzip-encoded sibling kept next to an asset.
pub const COMPRESSED_SUFFIX: &str = ".gz";
/// Any path containing this marker is skipped (it also hides the manifest output dir).
const EXCLUDED_MARKER: &str = "config";

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Json,
    Image,
    Text,
}

const ASSET_TYPES: &[(AssetType, &[&str])] = &[
    (AssetType::Json, &[".json"]),
    (AssetType::Image, &[".png", ".gif", ".jpg"]),
    (AssetType::Text, &[".txt"]),
];

impl AssetType {
    pub fn label(self) -> &'static str {
        match self {
            AssetType::Json => "json",
            AssetType::Image => "image",
            AssetType::Text => "text",
        }
    }
}

/// Classify a file name by its final extension. Unknown extensions map to `None`.
#[must_use]
pub fn classify(file_name: &str) -> Option<AssetType> {
    let extension = extension_of(file_name)?;
    ASSET_TYPES
        .iter()
        .find(|(_, extensions)| extensions.contains(&extension.as_str()))
        .map(|(asset_type, _)| *asset_type)
}

/// Content type sent to the store. Unclassified assets fall back to JSON.
#[must_use]
pub fn content_type(file_name: &str, asset_type: Option<AssetType>) -> &'static str {
    match asset_type {
        Some(AssetType::Image) => match extension_of(file_name).as_deref() {
            Some(".png") => "image/png",
            Some(".jpg") => "image/jpeg",
            Some(".gif") => "image/gif",
            _ => JSON_CONTENT_TYPE,
        },
        Some(AssetType::Text) => "text/plain; charset=utf-8",
        Some(AssetType::Json) | None => JSON_CONTENT_TYPE,
    }
}

fn extension_of(file_name: &str) -> Option<String> {
    file_name
        .rfind('.')
        .map(|idx| file_name[idx..].to_ascii_lowercase())
}

/// A file found under the asset root: the directory holding it and its bare name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScannedAsset {
    pub dir: PathBuf,
    pub file_name: String,
}

impl ScannedAsset {
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }

    /// Published asset name, always rooted at `/`.
    pub fn name(&self) -> String {
        format!("/{}", self.file_name)
    }

    pub fn compressed_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}{COMPRESSED_SUFFIX}", self.file_name))
    }

    pub fn is_compressed_sibling(&self) -> bool {
        self.file_name.ends_with(COMPRESSED_SUFFIX)
    }

    pub fn asset_type(&self) -> Option<AssetType> {
        classify(&self.file_name)
    }
}

/// Recursively collect every publishable file below `root`, sorted by file name.
pub fn scan(root: &Path) -> Result<Vec<ScannedAsset>> {
    let mut assets = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| ReleaseError::io(root, e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if file_name.starts_with('.') || is_excluded(entry.path()) {
            continue;
        }
        let dir = entry
            .path()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| root.to_path_buf());
        assets.push(ScannedAsset { dir, file_name });
    }
    assets.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    debug!("scan: {} files under {}", assets.len(), root.display());
    Ok(assets)
}

pub fn is_excluded(path: &Path) -> bool {
    path.to_string_lossy().contains(EXCLUDED_MARKER)
}
