//! `restack push` command.

use clap::Args;
use restack_core::RestackConfig;
use restack_runtime::ImageReference;

#[derive(Args)]
pub struct PushArgs {
    /// Reference of a stored image (e.g., "ghcr.io/org/image:tag")
    pub image: String,

    /// Only print the manifest URL
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(args: PushArgs, config: &RestackConfig) -> Result<(), Box<dyn std::error::Error>> {
    let reference = ImageReference::parse(&args.image)?;
    let loader = super::image_loader(config)?;

    if !args.quiet {
        println!("Pushing {reference}...");
    }
    let result = loader.push(&reference).await?;

    if args.quiet {
        println!("{}", result.manifest_url);
    } else {
        println!("Pushed: {} ({})", reference, result.manifest_url);
    }
    Ok(())
}
