use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::Path;

use log::{debug, info};
use tokio::fs;

use crate::assets::{self, ScannedAsset};
use crate::error::{ReleaseError, Result};
use crate::manifest::{AssetRecord, AssetSet, CompressedVariant};
use crate::remote::{self, ManifestSet, RemoteAsset, RemoteState};
use crate::store::{ObjectStore, PutObject, VERSION_METADATA};

pub mod patch;

const GZIP_ENCODING: &str = "gzip";

#[derive(Clone, Debug, Default)]
pub struct ReconcileOptions {
    /// Asset names (`/name`) to process; everything when `None`.
    pub only: Option<BTreeSet<String>>,
    /// Patch existing manifests to reference new uploads.
    pub compatible: bool,
}

#[derive(Clone, Debug)]
pub struct ProgressUpdate {
    pub name: String,
    pub position: usize,
    pub total: usize,
    pub uploaded: bool,
}

pub type ProgressCallback<'a> = Option<&'a mut dyn FnMut(ProgressUpdate)>;

fn emit_progress(cb: &mut ProgressCallback<'_>, update: ProgressUpdate) {
    if let Some(callback) = cb.as_deref_mut() {
        callback(update);
    }
}

#[derive(Clone, Debug)]
pub struct ReconcileOutcome {
    pub assets: AssetSet,
    pub manifests: ManifestSet,
    /// Names uploaded during this run, in processing order.
    pub uploaded: Vec<String>,
}

/// Local bytes of one asset and of its gzip sibling, if any.
struct LocalContent {
    body: Vec<u8>,
    compressed: Option<Vec<u8>>,
}

/// Upload every scanned asset whose content differs from the store and
/// collect the record each one should be published with.
pub async fn reconcile<S: ObjectStore>(
    store: &S,
    scanned: &[ScannedAsset],
    remote: RemoteState,
    options: &ReconcileOptions,
    mut progress: ProgressCallback<'_>,
) -> Result<ReconcileOutcome> {
    let selected: Vec<&ScannedAsset> = scanned
        .iter()
        .filter(|asset| {
            options
                .only
                .as_ref()
                .is_none_or(|only| only.contains(&asset.name()))
        })
        .filter(|asset| !asset.is_compressed_sibling())
        .collect();
    info!("reconcile: {} assets selected", selected.len());

    let RemoteState {
        mut manifests,
        assets: remote_assets,
    } = remote;
    let mut records = AssetSet::new();
    let mut uploaded = Vec::new();

    for (idx, asset) in selected.iter().enumerate() {
        let name = asset.name();
        let local = read_local(asset).await?;
        let existing = remote_assets.get(&name);

        // Only the base content decides whether a new version is published.
        let (record, was_uploaded) = match existing {
            Some(existing) if existing.content == local.body => {
                match (&local.compressed, existing.compressed) {
                    (Some(zcontent), false) => {
                        info!("reconcile: `{name}` unchanged, adding its gzip sibling");
                        upload_sibling(store, asset, zcontent, existing.version).await?;
                        uploaded.push(name.clone());
                        (unchanged_record(store, asset, existing, true).await?, true)
                    }
                    (local_sibling, remote_sibling) => {
                        debug!("reconcile: `{name}` unchanged at v{}", existing.version);
                        let with_sibling = local_sibling.is_some() && remote_sibling;
                        (
                            unchanged_record(store, asset, existing, with_sibling).await?,
                            false,
                        )
                    }
                }
            }
            _ => {
                let version = existing.map(|e| e.version).unwrap_or(0) + 1;
                let record = upload(store, asset, &local, version).await?;
                if options.compatible {
                    patch::apply(&mut manifests, &record);
                }
                uploaded.push(name.clone());
                (record, true)
            }
        };

        emit_progress(
            &mut progress,
            ProgressUpdate {
                name,
                position: idx + 1,
                total: selected.len(),
                uploaded: was_uploaded,
            },
        );
        records.insert(record);
    }

    info!(
        "reconcile: {} of {} assets uploaded",
        uploaded.len(),
        records.len()
    );
    Ok(ReconcileOutcome {
        assets: records,
        manifests,
        uploaded,
    })
}

async fn read_local(asset: &ScannedAsset) -> Result<LocalContent> {
    let path = asset.path();
    let body = fs::read(&path)
        .await
        .map_err(|e| ReleaseError::io(&path, e))?;
    let compressed = read_optional(&asset.compressed_path()).await?;
    Ok(LocalContent { body, compressed })
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(ReleaseError::io(path, err)),
    }
}

/// Record for an asset left at its stored version. A stale remote sibling is
/// not referenced once the local tree stops shipping one.
async fn unchanged_record<S: ObjectStore>(
    store: &S,
    asset: &ScannedAsset,
    existing: &RemoteAsset,
    with_sibling: bool,
) -> Result<AssetRecord> {
    let name = asset.name();
    let compressed = if with_sibling {
        Some(compressed_variant(store, &name).await?)
    } else {
        None
    };
    Ok(AssetRecord {
        url: store.locator(&remote::asset_key(&name), &existing.version_id),
        name,
        size: existing.size,
        asset_type: asset.asset_type(),
        version: existing.version,
        compressed,
    })
}

async fn upload<S: ObjectStore>(
    store: &S,
    asset: &ScannedAsset,
    local: &LocalContent,
    version: u64,
) -> Result<AssetRecord> {
    let name = asset.name();
    let asset_type = asset.asset_type();
    let content_type = assets::content_type(&asset.file_name, asset_type);
    let key = remote::asset_key(&name);

    info!("reconcile: uploading asset `{key}` as v{version}");
    store
        .put(
            PutObject::new(&key, local.body.clone(), content_type)
                .with_metadata(VERSION_METADATA, version.to_string()),
        )
        .await?;

    let compressed = match &local.compressed {
        Some(zcontent) => {
            upload_sibling(store, asset, zcontent, version).await?;
            Some(compressed_variant(store, &name).await?)
        }
        None => None,
    };

    let stored = store.get(&key).await?;
    Ok(AssetRecord {
        url: store.locator(&key, &stored.version_id),
        name,
        size: stored.size,
        asset_type,
        version,
        compressed,
    })
}

async fn upload_sibling<S: ObjectStore>(
    store: &S,
    asset: &ScannedAsset,
    zcontent: &[u8],
    version: u64,
) -> Result<()> {
    let zkey = remote::compressed_key(&asset.name());
    let content_type = assets::content_type(&asset.file_name, asset.asset_type());
    info!("reconcile: uploading asset `{zkey}`");
    store
        .put(
            PutObject::new(&zkey, zcontent.to_vec(), content_type)
                .with_metadata(VERSION_METADATA, version.to_string())
                .with_encoding(GZIP_ENCODING),
        )
        .await
}

async fn compressed_variant<S: ObjectStore>(store: &S, name: &str) -> Result<CompressedVariant> {
    let zkey = remote::compressed_key(name);
    let stored = store.get(&zkey).await?;
    Ok(CompressedVariant {
        zsize: stored.size,
        zurl: store.locator(&zkey, &stored.version_id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{Manifest, ManifestEntry};
    use crate::remote::read_state;
    use crate::store::LocalBucket;
    use std::path::PathBuf;

    struct Fixture {
        _dir: tempfile::TempDir,
        assets: PathBuf,
        store: LocalBucket,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let assets = dir.path().join("out");
            std::fs::create_dir_all(&assets).unwrap();
            let store = LocalBucket::new(dir.path().join("buckets"), "releases");
            Self {
                _dir: dir,
                assets,
                store,
            }
        }

        fn write(&self, name: &str, bytes: &[u8]) {
            std::fs::write(self.assets.join(name), bytes).unwrap();
        }

        async fn run(&self, options: &ReconcileOptions) -> ReconcileOutcome {
            let scanned = assets::scan(&self.assets).unwrap();
            let remote = read_state(&self.store).await.unwrap();
            reconcile(&self.store, &scanned, remote, options, None)
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn uploads_new_assets_as_version_one() {
        let fx = Fixture::new();
        fx.write("a.json", b"{\"a\":1}");
        fx.write("b.txt", b"hello");

        let outcome = fx.run(&ReconcileOptions::default()).await;
        assert_eq!(outcome.uploaded, vec!["/a.json", "/b.txt"]);

        let a = outcome.assets.get("/a.json").unwrap();
        assert_eq!(a.version, 1);
        assert_eq!(a.size, 7);
        assert!(a.url.starts_with("file://"));
        assert!(a.url.contains("/releases/.versions/assets/a.json/"));

        let stored = fx.store.get("assets/b.txt").await.unwrap();
        assert_eq!(stored.asset_version(), 1);
        assert_eq!(stored.content_type, "text/plain; charset=utf-8");
    }

    #[tokio::test]
    async fn second_run_without_changes_uploads_nothing() {
        let fx = Fixture::new();
        fx.write("a.json", b"{}");
        fx.write("x.png", b"png");
        fx.write("x.png.gz", b"gz");

        let first = fx.run(&ReconcileOptions::default()).await;
        let second = fx.run(&ReconcileOptions::default()).await;

        assert!(second.uploaded.is_empty());
        let first_records: Vec<_> = first.assets.iter().cloned().collect();
        let second_records: Vec<_> = second.assets.iter().cloned().collect();
        assert_eq!(first_records, second_records);
    }

    #[tokio::test]
    async fn changed_content_bumps_version_by_one() {
        let fx = Fixture::new();
        fx.write("a.json", b"{\"v\":1}");
        fx.run(&ReconcileOptions::default()).await;
        fx.write("a.json", b"{\"v\":2}");

        let outcome = fx.run(&ReconcileOptions::default()).await;
        assert_eq!(outcome.uploaded, vec!["/a.json"]);
        assert_eq!(outcome.assets.get("/a.json").unwrap().version, 2);
        assert_eq!(fx.store.get("assets/a.json").await.unwrap().body, b"{\"v\":2}");
    }

    #[tokio::test]
    async fn records_compressed_sibling() {
        let fx = Fixture::new();
        fx.write("x.png", b"not-really-a-png");
        fx.write("x.png.gz", b"zz");

        let outcome = fx.run(&ReconcileOptions::default()).await;
        assert_eq!(outcome.uploaded, vec!["/x.png"]);
        assert_eq!(outcome.assets.len(), 1);

        let record = outcome.assets.get("/x.png").unwrap();
        assert_eq!(record.size, 16);
        let compressed = record.compressed.as_ref().unwrap();
        assert_eq!(compressed.zsize, 2);
        assert!(compressed.zurl.contains("/.versions/assets/x.png.gz/"));

        let stored = fx.store.get("assets/x.png.gz").await.unwrap();
        assert_eq!(stored.content_encoding.as_deref(), Some("gzip"));
        assert_eq!(stored.content_type, "image/png");
    }

    #[tokio::test]
    async fn new_sibling_is_uploaded_without_a_version_bump() {
        let fx = Fixture::new();
        fx.write("a.json", b"{}");
        let first = fx.run(&ReconcileOptions::default()).await;
        fx.write("a.json.gz", b"gz");

        let outcome = fx.run(&ReconcileOptions::default()).await;
        assert_eq!(outcome.uploaded, vec!["/a.json"]);
        let record = outcome.assets.get("/a.json").unwrap();
        assert_eq!(record.version, 1);
        assert_eq!(record.url, first.assets.get("/a.json").unwrap().url);
        assert_eq!(record.compressed.as_ref().unwrap().zsize, 2);
        assert_eq!(fx.store.get("assets/a.json.gz").await.unwrap().asset_version(), 1);

        let again = fx.run(&ReconcileOptions::default()).await;
        assert!(again.uploaded.is_empty());
        assert_eq!(again.assets.get("/a.json").unwrap(), record);
    }

    #[tokio::test]
    async fn dropped_sibling_stays_idempotent() {
        let fx = Fixture::new();
        fx.write("a.json", b"{}");
        fx.write("a.json.gz", b"gz");
        fx.run(&ReconcileOptions::default()).await;
        std::fs::remove_file(fx.assets.join("a.json.gz")).unwrap();

        for _ in 0..3 {
            let outcome = fx.run(&ReconcileOptions::default()).await;
            assert!(outcome.uploaded.is_empty());
            let record = outcome.assets.get("/a.json").unwrap();
            assert_eq!(record.version, 1);
            assert!(record.compressed.is_none());
        }
        assert_eq!(fx.store.get("assets/a.json").await.unwrap().asset_version(), 1);
    }

    #[tokio::test]
    async fn only_filter_limits_processed_assets() {
        let fx = Fixture::new();
        fx.write("a.json", b"{}");
        fx.write("b.json", b"{}");

        let options = ReconcileOptions {
            only: Some(BTreeSet::from(["/b.json".to_owned()])),
            ..Default::default()
        };
        let outcome = fx.run(&options).await;
        assert_eq!(outcome.uploaded, vec!["/b.json"]);
        assert!(outcome.assets.get("/a.json").is_none());
    }

    #[tokio::test]
    async fn compatible_update_patches_existing_manifest() {
        let fx = Fixture::new();
        // Remote holds `/a.json` at v3, listed by manifest 1.0.0.
        fx.store
            .put(
                PutObject::new("assets/a.json", b"{\"old\":true}".to_vec(), "application/json")
                    .with_metadata(VERSION_METADATA, "3"),
            )
            .await
            .unwrap();
        let old = fx.store.get("assets/a.json").await.unwrap();
        let manifest = ManifestEntry {
            key: "config/1.0.0.json".into(),
            content: Manifest {
                files: vec![AssetRecord {
                    name: "/a.json".into(),
                    size: old.size,
                    asset_type: Some(assets::AssetType::Json),
                    url: fx.store.locator("assets/a.json", &old.version_id),
                    version: 3,
                    compressed: None,
                }],
                last_updated_at: 1,
            },
            updated: true,
        };
        remote::write_updated(&fx.store, [&manifest]).await.unwrap();

        fx.write("a.json", b"{\"old\":false}");
        let options = ReconcileOptions {
            compatible: true,
            ..Default::default()
        };
        let outcome = fx.run(&options).await;

        let record = outcome.assets.get("/a.json").unwrap();
        assert_eq!(record.version, 4);
        assert_eq!(record.size, 13);

        let patched = &outcome.manifests["config/1.0.0.json"];
        assert!(patched.updated);
        assert!(patched.content.last_updated_at > 1);
        assert_eq!(&patched.content.files[0], record);
    }

    #[tokio::test]
    async fn incompatible_update_leaves_manifests_alone() {
        let fx = Fixture::new();
        fx.write("a.json", b"{}");
        let first = fx.run(&ReconcileOptions::default()).await;
        let entry = crate::manifest::build_release(&first.assets, "1.0.0");
        remote::write_updated(&fx.store, [&entry]).await.unwrap();

        fx.write("a.json", b"{\"changed\":1}");
        let outcome = fx.run(&ReconcileOptions::default()).await;
        let manifest = &outcome.manifests["config/1.0.0.json"];
        assert!(!manifest.updated);
        assert_eq!(manifest.content.files[0].version, 1);
    }

    #[tokio::test]
    async fn reports_progress_per_asset() {
        let fx = Fixture::new();
        fx.write("a.json", b"{}");
        fx.write("b.json", b"{}");
        let scanned = assets::scan(&fx.assets).unwrap();
        let remote = read_state(&fx.store).await.unwrap();

        let mut seen = Vec::new();
        let mut callback = |update: ProgressUpdate| {
            seen.push((update.name, update.position, update.total, update.uploaded));
        };
        reconcile(
            &fx.store,
            &scanned,
            remote,
            &ReconcileOptions::default(),
            Some(&mut callback),
        )
        .await
        .unwrap();

        assert_eq!(
            seen,
            vec![
                ("/a.json".to_owned(), 1, 2, true),
                ("/b.json".to_owned(), 2, 2, true),
            ]
        );
    }
}
