use std::path::PathBuf;

use clap::Parser;
use featex::config;
use featex::dataset::ImageList;
use featex::extract;

/// Extracts local features from a directory of images into an HDF5 feature
/// store, resuming past anything a previous run already committed.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Root directory containing the images.
    #[arg(long)]
    image_dir: PathBuf,

    /// Directory the feature file is written to.
    #[arg(long)]
    export_dir: PathBuf,

    /// Named extraction configuration.
    #[arg(long, default_value = "superpoint_aachen")]
    conf: String,

    /// Store float32 outputs as float16 to save disk space.
    #[arg(long)]
    as_half: bool,

    /// Optional newline-delimited list of image names to extract instead of
    /// scanning the image directory.
    #[arg(long)]
    image_list: Option<PathBuf>,

    /// Explicit feature file path, overriding the export directory and the
    /// configuration's output name.
    #[arg(long)]
    feature_path: Option<PathBuf>,

    /// Re-extract and replace entries that are already stored.
    #[arg(long)]
    overwrite: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let conf = config::preset(&args.conf)?;
    let feature_path = extract::run(
        &conf,
        &args.image_dir,
        Some(&args.export_dir),
        args.as_half,
        args.image_list.map(ImageList::File),
        args.feature_path,
        args.overwrite,
    )?;
    println!("{}", feature_path.display());

    Ok(())
}
