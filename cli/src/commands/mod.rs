//! CLI command definitions and dispatch.

mod images;
mod layers;
mod mediatype;
mod pull;
mod push;
mod repackage;
mod size;
mod version;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use restack_core::RestackConfig;
use restack_runtime::{ImageLoader, ImageStore};

/// restack - rewrite the layer stack of container images.
#[derive(Parser)]
#[command(name = "restack", version, about)]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (default: $RESTACK_CONFIG or ~/.restack/config.yaml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// List the layers of an image, newest first
    Layers(layers::LayersArgs),
    /// Show the total size of an image
    Size(size::SizeArgs),
    /// Pick or fix up layers to build a new image
    Repackage(repackage::RepackageArgs),
    /// Pull an image into the local store
    Pull(pull::PullArgs),
    /// Push a stored image to its registry
    Push(push::PushArgs),
    /// List images in the local store
    Images(images::ImagesArgs),
    /// Show the manifest media type of a remote image
    Mediatype(mediatype::MediatypeArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Load configuration from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> restack_core::Result<RestackConfig> {
    match path {
        Some(path) if !path.exists() => Err(restack_core::RestackError::ConfigError(format!(
            "Config file not found: {}",
            path.display()
        ))),
        Some(path) => RestackConfig::load(path),
        None => RestackConfig::discover(),
    }
}

/// Open the local image store.
pub(crate) fn open_image_store(
    config: &RestackConfig,
) -> Result<Arc<ImageStore>, Box<dyn std::error::Error>> {
    let store = ImageStore::open(&config.store_dir, config.store_max_size)?;
    Ok(Arc::new(store))
}

/// Image loader over the local store.
pub(crate) fn image_loader(
    config: &RestackConfig,
) -> Result<ImageLoader, Box<dyn std::error::Error>> {
    Ok(ImageLoader::new(open_image_store(config)?))
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli, config: RestackConfig) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Layers(args) => layers::execute(args, &config).await,
        Command::Size(args) => size::execute(args, &config).await,
        Command::Repackage(args) => repackage::execute(args, &config).await,
        Command::Pull(args) => pull::execute(args, &config).await,
        Command::Push(args) => push::execute(args, &config).await,
        Command::Images(args) => images::execute(args, &config).await,
        Command::Mediatype(args) => mediatype::execute(args).await,
        Command::Version(args) => version::execute(args).await,
    }
}
