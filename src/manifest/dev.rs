use std::path::{Path, PathBuf};

use log::info;
use tokio::fs;

use crate::assets::{self, AssetType, COMPRESSED_SUFFIX};
use crate::error::{ReleaseError, Result};

use super::{AssetRecord, CompressedVariant, Manifest};

const DEV_HOST: &str = "http://localhost:8080";

/// Build a manifest pointing at a local development server, straight from disk.
pub async fn build(asset_dir: &Path) -> Result<Manifest> {
    let scanned = assets::scan(asset_dir)?;
    info!("dev: retrieved {} assets", scanned.len());

    let mut manifest = Manifest::empty();
    for asset in scanned.iter().filter(|a| !a.is_compressed_sibling()) {
        let asset_type = asset.asset_type();
        let type_label = asset_type.map(AssetType::label).unwrap_or("unknown");
        let size = file_size(&asset.path()).await?;
        let compressed = match fs::metadata(asset.compressed_path()).await {
            Ok(meta) => Some(CompressedVariant {
                zsize: meta.len(),
                zurl: format!(
                    "{DEV_HOST}/{type_label}/{}{COMPRESSED_SUFFIX}",
                    asset.file_name
                ),
            }),
            Err(_) => None,
        };
        manifest.files.push(AssetRecord {
            name: asset.name(),
            size,
            asset_type,
            url: format!("{DEV_HOST}/{type_label}/{}", asset.file_name),
            version: 1,
            compressed,
        });
    }
    Ok(manifest)
}

/// Build the dev manifest and write it as pretty JSON to `output_dir/filename`.
pub async fn write(asset_dir: &Path, output_dir: &Path, filename: &str) -> Result<PathBuf> {
    let manifest = build(asset_dir).await?;

    info!("dev: creating output directory `{}`", output_dir.display());
    fs::create_dir_all(output_dir)
        .await
        .map_err(|e| ReleaseError::io(output_dir, e))?;

    let path = output_dir.join(filename);
    let json = serde_json::to_string_pretty(&manifest).map_err(|source| {
        ReleaseError::Manifest {
            key: filename.to_owned(),
            source,
        }
    })?;
    info!("dev: dumping manifest to `{}`", path.display());
    fs::write(&path, json)
        .await
        .map_err(|e| ReleaseError::io(&path, e))?;
    Ok(path)
}

async fn file_size(path: &Path) -> Result<u64> {
    fs::metadata(path)
        .await
        .map(|meta| meta.len())
        .map_err(|e| ReleaseError::io(path, e))
}
