use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::error;

mod assets;
mod config;
mod engine;
mod error;
mod manifest;
mod reconcile;
mod remote;
mod staging;
mod store;
mod version;

use config::ReleaseConfig;
use engine::ReleaseEngine;
use reconcile::ProgressUpdate;

#[derive(Parser, Debug)]
#[command(
    name = "asset-release",
    author,
    version,
    about = "Publish versioned static assets and release manifests to an object store bucket"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a manifest for local development without touching the store.
    Dev {
        #[arg(default_value = config::DEV_ASSET_DIR)]
        asset_dir: PathBuf,
        #[arg(default_value = config::DEV_OUTPUT_DIR)]
        output_dir: PathBuf,
        #[arg(default_value = config::DEV_FILENAME)]
        filename: String,
    },
    /// Upload changed assets and publish a release manifest.
    Publish(PublishArgs),
}

#[derive(Args, Debug)]
struct PublishArgs {
    /// Bucket to publish to.
    bucket: String,
    /// Directory holding the source assets.
    asset_dir: PathBuf,
    /// Directory the staged release assets are written to (cleaned first).
    output_dir: PathBuf,
    /// `major`, `minor`, `patch` or an explicit `X.Y.Z`.
    version: String,
    /// Only update the given comma separated asset names.
    #[arg(long, value_name = "NAME1,NAME2")]
    only: Option<String>,
    /// Push changed assets and only update manifests which exist.
    #[arg(long)]
    no_new_config: bool,
    /// Assets changed are compatible with existing manifests; patch them in place.
    #[arg(long)]
    compatible: bool,
    /// Directory holding the local bucket mirror.
    #[arg(long, env = config::STORE_ROOT_ENV, default_value = config::DEFAULT_STORE_ROOT)]
    store_root: PathBuf,
    /// External minifier run as `<cmd> <asset_dir> <output_dir>` instead of copying.
    #[arg(long)]
    minifier: Option<String>,
    /// Do not generate gzip siblings while staging.
    #[arg(long)]
    no_gzip: bool,
}

impl PublishArgs {
    fn into_config(self) -> ReleaseConfig {
        let mut config =
            ReleaseConfig::new(self.bucket, self.asset_dir, self.output_dir, self.version);
        config.store_root = self.store_root;
        config.only = self.only.as_deref().map(config::parse_only);
        config.build_manifest = !self.no_new_config;
        config.compatible = self.compatible;
        config.minifier = self.minifier;
        config.gzip = !self.no_gzip;
        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Dev {
            asset_dir,
            output_dir,
            filename,
        } => manifest::dev::write(&asset_dir, &output_dir, &filename)
            .await
            .map(|_| ()),
        Command::Publish(args) => publish(args.into_config()).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn publish(config: ReleaseConfig) -> error::Result<()> {
    let store = config.store();
    let engine = ReleaseEngine::new(config, store);

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    let mut on_progress = |update: ProgressUpdate| {
        bar.set_length(update.total as u64);
        bar.set_position(update.position as u64);
        let verb = if update.uploaded { "uploaded" } else { "unchanged" };
        bar.set_message(format!("{verb} {}", update.name));
    };

    let summary = engine.run(Some(&mut on_progress)).await;
    bar.finish_and_clear();
    let summary = summary?;

    println!(
        "Uploaded {} assets, patched {} manifests, release manifest: {}",
        summary.uploaded.len(),
        summary.patched_manifests.len(),
        summary.release_manifest.as_deref().unwrap_or("not built")
    );
    Ok(())
}
