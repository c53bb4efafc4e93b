//! `restack size` command.

use clap::Args;
use restack_core::RestackConfig;
use restack_runtime::ImageSource;

use crate::output;

#[derive(Args)]
pub struct SizeArgs {
    /// Image reference or OCI layout directory
    pub image: String,

    /// Print sizes in human-readable units
    #[arg(short = 'H', long)]
    pub human: bool,

    /// Report the size of the decompressed layers instead
    #[arg(short, long)]
    pub uncompressed: bool,
}

pub async fn execute(args: SizeArgs, config: &RestackConfig) -> Result<(), Box<dyn std::error::Error>> {
    let loader = super::image_loader(config)?;
    let image = loader.load(&args.image).await?;

    let bytes = if args.uncompressed {
        tokio::task::spawn_blocking(move || image.uncompressed_size()).await??
    } else {
        image.size()
    };

    if args.human {
        println!("{}", output::format_bytes(bytes));
    } else {
        println!("{bytes}");
    }
    Ok(())
}
