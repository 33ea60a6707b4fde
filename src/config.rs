use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::reconcile::ReconcileOptions;
use crate::staging::StageOptions;
use crate::store::LocalBucket;

pub const DEFAULT_STORE_ROOT: &str = "buckets";
pub const STORE_ROOT_ENV: &str = "ASSET_RELEASE_STORE";

pub const DEV_ASSET_DIR: &str = "../assets_dev/";
pub const DEV_OUTPUT_DIR: &str = "../assets_dev/config";
pub const DEV_FILENAME: &str = "dev.json";

/// Everything a publish run needs, passed explicitly to each step.
#[derive(Clone, Debug)]
pub struct ReleaseConfig {
    pub bucket: String,
    pub store_root: PathBuf,
    pub asset_dir: PathBuf,
    pub output_dir: PathBuf,
    pub version_token: String,
    pub only: Option<BTreeSet<String>>,
    pub build_manifest: bool,
    pub compatible: bool,
    pub minifier: Option<String>,
    pub gzip: bool,
}

impl ReleaseConfig {
    pub fn new(
        bucket: impl Into<String>,
        asset_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        version_token: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            store_root: PathBuf::from(DEFAULT_STORE_ROOT),
            asset_dir: asset_dir.into(),
            output_dir: output_dir.into(),
            version_token: version_token.into(),
            only: None,
            build_manifest: true,
            compatible: false,
            minifier: None,
            gzip: true,
        }
    }

    pub fn store(&self) -> LocalBucket {
        LocalBucket::new(&self.store_root, &self.bucket)
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            only: self.only.clone(),
            compatible: self.compatible,
        }
    }

    pub fn stage_options(&self) -> StageOptions {
        StageOptions {
            minifier: self.minifier.clone(),
            gzip: self.gzip,
        }
    }
}

/// Parse a comma separated `--only` list into asset names rooted at `/`.
pub fn parse_only(list: &str) -> BTreeSet<String> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            if name.starts_with('/') {
                name.to_owned()
            } else {
                format!("/{name}")
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_only_list_into_rooted_names() {
        let only = parse_only("/a.json, b.png,,/c.txt");
        assert_eq!(
            only.into_iter().collect::<Vec<_>>(),
            vec!["/a.json", "/b.png", "/c.txt"]
        );
    }

    #[test]
    fn defaults_match_release_flow() {
        let config = ReleaseConfig::new("releases", "assets", "out", "patch");
        assert!(config.build_manifest);
        assert!(!config.compatible);
        assert!(config.reconcile_options().only.is_none());
        assert!(config.stage_options().gzip);
        assert!(
            config
                .store()
                .base_dir()
                .ends_with(PathBuf::from(DEFAULT_STORE_ROOT).join("releases"))
        );
    }
}
