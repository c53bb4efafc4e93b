//! `restack pull` command.

use clap::Args;
use restack_core::RestackConfig;
use restack_runtime::ImageReference;

#[derive(Args)]
pub struct PullArgs {
    /// Image reference (e.g., "alpine:latest", "ghcr.io/org/image:tag")
    pub image: String,

    /// Only print the stored digest
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(args: PullArgs, config: &RestackConfig) -> Result<(), Box<dyn std::error::Error>> {
    let reference = ImageReference::parse(&args.image)?;
    let loader = super::image_loader(config)?;

    if !args.quiet {
        println!("Pulling {reference}...");
    }
    let image = loader.pull(&reference).await?;

    if args.quiet {
        println!("{}", image.digest());
    } else {
        println!(
            "Pulled: {} ({}, {} layers)",
            reference,
            image.digest(),
            image.layers().len()
        );
    }
    Ok(())
}
