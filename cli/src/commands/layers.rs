//! `restack layers` command.

use clap::Args;
use restack_core::RestackConfig;
use restack_runtime::repackage::layer_records;
use restack_runtime::ImageSource;

use crate::output;

#[derive(Args)]
pub struct LayersArgs {
    /// Image reference or OCI layout directory
    pub image: String,

    /// Only show diff IDs
    #[arg(short, long)]
    pub quiet: bool,

    /// Do not truncate the created-by column
    #[arg(long)]
    pub no_trunc: bool,
}

pub async fn execute(
    args: LayersArgs,
    config: &RestackConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let loader = super::image_loader(config)?;
    let image = loader.load(&args.image).await?;
    let records = layer_records(&image)?;

    let layers = records
        .iter()
        .rev()
        .filter_map(|record| record.layer.as_ref().map(|layer| (record, layer)));

    if args.quiet {
        for (_, layer) in layers {
            println!("{}", layer.diff_id);
        }
        return Ok(());
    }

    let mut table = output::new_table(&[
        "INDEX",
        "SIZE",
        "CREATED",
        "CREATED BY",
        "COMMENT",
        "AUTHOR",
    ]);
    for (record, layer) in layers {
        let history = &record.history;
        let created_by = history.created_by_line().replace('\n', " ");
        let created_by = if args.no_trunc {
            created_by
        } else {
            output::truncate_str(&created_by, 60)
        };

        table.add_row([
            record.index.to_string(),
            output::format_bytes(layer.size),
            output::format_created(history.created.as_deref()),
            created_by,
            history.comment.clone().unwrap_or_default(),
            history.author.clone().unwrap_or_default(),
        ]);
    }

    println!("{table}");
    Ok(())
}
