//! `restack repackage` command.
//!
//! Without `-i` or `--plan` the default plan is printed so it can be saved,
//! edited and passed back with `--plan`.

use std::path::{Path, PathBuf};

use clap::Args;
use restack_core::RestackConfig;
use restack_runtime::oci::is_oci_layout;
use restack_runtime::repackage::{edit_plan, layer_records, parse_plan, render_actions, render_plan};
use restack_runtime::{ImageReference, ImageSink, ImageSource, SquashOptions, Squasher};

#[derive(Args)]
pub struct RepackageArgs {
    /// Image reference or OCI layout directory
    pub image: String,

    /// Tag for the result (default: <image>-repackaged)
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Edit the plan in $EDITOR before running it
    #[arg(short, long, conflicts_with = "plan")]
    pub interactive: bool,

    /// Read the plan from a file
    #[arg(long, value_name = "FILE")]
    pub plan: Option<PathBuf>,

    /// Push the result to its registry
    #[arg(long)]
    pub push: bool,
}

pub async fn execute(
    args: RepackageArgs,
    config: &RestackConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let target = target_tag(&args)?;
    let loader = super::image_loader(config)?.with_push(args.push);

    let source = loader.load(&args.image).await?;
    let records = layer_records(&source)?;
    let listing = render_plan(&records);

    let text = match (&args.plan, args.interactive) {
        (Some(path), _) => std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read plan {}: {e}", path.display()))?,
        (None, true) => tokio::task::spawn_blocking(move || edit_plan(&listing)).await??,
        (None, false) => {
            print!("{listing}");
            return Ok(());
        }
    };

    let plan = parse_plan(&text, &records)?;
    if plan.is_empty() {
        println!("Nothing to do");
        return Ok(());
    }
    plan.validate()?;

    print!("{}", render_actions(&plan));

    let staging = loader.store().staging_dir()?;
    let output_dir = staging.path().join("image");
    let squasher = Squasher::new(SquashOptions::from(config));
    let result = {
        let source = source.clone();
        let output_dir = output_dir.clone();
        tokio::task::spawn_blocking(move || squasher.run(&source, &plan, &output_dir)).await??
    };

    let saved = loader.save(&target, &result).await?;

    println!(
        "Repackaged {} ({} layers) as {} ({} layers)",
        args.image,
        source.layers().len(),
        target,
        saved.layers().len()
    );
    if args.push {
        println!("Pushed {target}");
    }
    Ok(())
}

/// Result tag: `--tag`, or the source reference with `-repackaged` appended.
fn target_tag(args: &RepackageArgs) -> Result<String, Box<dyn std::error::Error>> {
    if let Some(tag) = &args.tag {
        return Ok(ImageReference::parse(tag)?.full_reference());
    }
    if is_oci_layout(Path::new(&args.image)) {
        return Err("--tag is required when repackaging an OCI layout directory".into());
    }
    Ok(ImageReference::parse(&args.image)?
        .repackaged()
        .full_reference())
}
