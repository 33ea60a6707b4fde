use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use flate2::Compression;
use flate2::write::GzEncoder;
use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::assets::{self, AssetType, COMPRESSED_SUFFIX};
use crate::error::{ReleaseError, Result};

#[derive(Clone, Debug, Default)]
pub struct StageOptions {
    /// External command run as `<cmd> <asset_dir> <output_dir>`.
    pub minifier: Option<String>,
    /// Write gzip siblings for JSON and text assets that lack one.
    pub gzip: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StageReport {
    pub copied: usize,
    pub compressed: usize,
}

/// Rebuild `output_dir` from `asset_dir`, either through the external
/// minifier or by copying the publishable tree.
pub fn stage(asset_dir: &Path, output_dir: &Path, options: &StageOptions) -> Result<StageReport> {
    if same_dir(asset_dir, output_dir) {
        return Err(ReleaseError::Staging(format!(
            "output dir `{}` is the asset dir",
            output_dir.display()
        )));
    }

    if output_dir.exists() {
        info!("stage: cleaning output directory `{}`", output_dir.display());
        fs::remove_dir_all(output_dir).map_err(|e| ReleaseError::io(output_dir, e))?;
    }
    fs::create_dir_all(output_dir).map_err(|e| ReleaseError::io(output_dir, e))?;

    match options.minifier.as_deref() {
        Some(cmd) => {
            run_minifier(cmd, asset_dir, output_dir)?;
            Ok(StageReport::default())
        }
        None => copy_tree(asset_dir, output_dir, options.gzip),
    }
}

fn run_minifier(cmd: &str, asset_dir: &Path, output_dir: &Path) -> Result<()> {
    info!(
        "stage: running `{cmd}` from `{}` to `{}`",
        asset_dir.display(),
        output_dir.display()
    );
    let status = Command::new(cmd)
        .arg(asset_dir)
        .arg(output_dir)
        .stdin(Stdio::null())
        .status()
        .map_err(|e| ReleaseError::Staging(format!("failed to start `{cmd}`: {e}")))?;
    if !status.success() {
        warn!("stage: `{cmd}` exited with {status}");
        return Err(ReleaseError::Staging(format!("`{cmd}` exited with {status}")));
    }
    Ok(())
}

fn copy_tree(asset_dir: &Path, output_dir: &Path, gzip: bool) -> Result<StageReport> {
    let output_abs = fs::canonicalize(output_dir).map_err(|e| ReleaseError::io(output_dir, e))?;
    let mut report = StageReport::default();
    let mut compressible = Vec::new();

    let walker = WalkDir::new(asset_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            fs::canonicalize(entry.path())
                .map(|path| path != output_abs)
                .unwrap_or(true)
        });
    for entry in walker {
        let entry = entry.map_err(|e| ReleaseError::io(asset_dir, e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy();
        if file_name.starts_with('.') || assets::is_excluded(entry.path()) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(asset_dir) else {
            continue;
        };
        let dest = output_dir.join(relative);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| ReleaseError::io(parent, e))?;
        }
        fs::copy(entry.path(), &dest).map_err(|e| ReleaseError::io(entry.path(), e))?;
        report.copied += 1;

        if matches!(
            assets::classify(&file_name),
            Some(AssetType::Json | AssetType::Text)
        ) {
            compressible.push(dest);
        }
    }

    if gzip {
        for path in compressible {
            let sibling = sibling_path(&path);
            if sibling.exists() {
                continue;
            }
            write_gzip(&path, &sibling)?;
            report.compressed += 1;
        }
    }

    info!(
        "stage: copied {} files, compressed {}",
        report.copied, report.compressed
    );
    Ok(report)
}

fn sibling_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(COMPRESSED_SUFFIX);
    PathBuf::from(name)
}

/// Gzip `src` into `dest`. The header carries no timestamp, so unchanged
/// input always produces identical bytes.
fn write_gzip(src: &Path, dest: &Path) -> Result<()> {
    let content = fs::read(src).map_err(|e| ReleaseError::io(src, e))?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder
        .write_all(&content)
        .map_err(|e| ReleaseError::io(dest, e))?;
    let bytes = encoder.finish().map_err(|e| ReleaseError::io(dest, e))?;
    fs::write(dest, bytes).map_err(|e| ReleaseError::io(dest, e))?;
    debug!("stage: compressed `{}`", dest.display());
    Ok(())
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
