//! `restack mediatype` command.

use clap::Args;
use restack_runtime::{ImageReference, RegistryClient};

#[derive(Args)]
pub struct MediatypeArgs {
    /// Image reference (e.g., "alpine:3.19")
    pub image: String,
}

pub async fn execute(args: MediatypeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let reference = ImageReference::parse(&args.image)?;
    let client = RegistryClient::for_registry(&reference.registry);
    println!("{}", client.media_type(&reference).await?);
    Ok(())
}
