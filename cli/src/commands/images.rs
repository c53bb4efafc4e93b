//! `restack images` command.

use clap::Args;
use restack_core::RestackConfig;
use restack_runtime::{ImageReference, StoredImage};

use crate::output;

#[derive(Args)]
pub struct ImagesArgs {
    /// Only show image references (one per line)
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(
    args: ImagesArgs,
    config: &RestackConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_image_store(config)?;
    let images = store.list().await;

    if args.quiet {
        for image in &images {
            println!("{}", image.reference);
        }
        return Ok(());
    }

    let mut table = output::new_table(&["REPOSITORY", "TAG", "DIGEST", "SIZE", "SAVED"]);
    for image in &images {
        let (repository, tag) = split_reference(image);
        table.add_row([
            repository,
            tag,
            output::short_digest(&image.digest),
            output::format_bytes(image.size_bytes),
            output::format_ago(&image.saved_at),
        ]);
    }

    println!("{table}");
    Ok(())
}

fn split_reference(image: &StoredImage) -> (String, String) {
    match ImageReference::parse(&image.reference) {
        Ok(r) => {
            let repository = format!("{}/{}", r.registry, r.repository);
            let tag = r.tag.unwrap_or_else(|| "<none>".to_string());
            (repository, tag)
        }
        Err(_) => (image.reference.clone(), "<none>".to_string()),
    }
}
