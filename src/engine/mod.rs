use log::{info, warn};

use crate::assets;
use crate::config::ReleaseConfig;
use crate::error::Result;
use crate::manifest::{self, ManifestEntry};
use crate::reconcile::{self, ProgressCallback};
use crate::remote;
use crate::staging;
use crate::store::ObjectStore;
use crate::version;

/// What a publish run changed in the store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub uploaded: Vec<String>,
    pub patched_manifests: Vec<String>,
    pub release_manifest: Option<String>,
}

/// Drives one publish run against a store: stage, read, reconcile, write.
pub struct ReleaseEngine<S> {
    config: ReleaseConfig,
    store: S,
}

impl<S: ObjectStore> ReleaseEngine<S> {
    pub fn new(config: ReleaseConfig, store: S) -> Self {
        Self { config, store }
    }

    #[allow(dead_code)]
    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn run(&self, progress: ProgressCallback<'_>) -> Result<RunSummary> {
        let config = &self.config;
        info!(
            "engine: publishing `{}` to bucket `{}`",
            config.asset_dir.display(),
            self.store.bucket()
        );

        staging::stage(
            &config.asset_dir,
            &config.output_dir,
            &config.stage_options(),
        )?;

        let state = remote::read_state(&self.store).await?;

        // Resolve before uploading so a bad token aborts without side effects.
        let release_version = if config.build_manifest {
            let resolved = version::resolve(&config.version_token, state.manifest_keys())?;
            if state.manifests.contains_key(&manifest::manifest_key(&resolved)) {
                warn!("engine: manifest {resolved} already exists and will be overwritten");
            }
            Some(resolved)
        } else {
            None
        };

        let scanned = assets::scan(&config.output_dir)?;
        info!("engine: retrieved {} assets", scanned.len());
        let outcome = reconcile::reconcile(
            &self.store,
            &scanned,
            state,
            &config.reconcile_options(),
            progress,
        )
        .await?;

        let mut summary = RunSummary {
            uploaded: outcome.uploaded,
            ..Default::default()
        };

        if config.compatible {
            summary.patched_manifests =
                remote::write_updated(&self.store, outcome.manifests.values()).await?;
        }

        if let Some(resolved) = release_version {
            let entry: ManifestEntry = manifest::build_release(&outcome.assets, &resolved);
            remote::write_updated(&self.store, [&entry]).await?;
            summary.release_manifest = Some(entry.key);
        }

        info!(
            "engine: {} uploads, {} manifests patched, release manifest {}",
            summary.uploaded.len(),
            summary.patched_manifests.len(),
            summary.release_manifest.as_deref().unwrap_or("skipped")
        );
        Ok(summary)
    }
}
