use std::fs::{self, File};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tractree::{BasePhase, CentroidBuilder, CentroidParams, CompactStore, Error, Grid, Roi};

/// Builds a hierarchical tree from seed tractograms with the
/// neighbourhood-restricted centroid method.
#[derive(Debug, Parser)]
#[command(name = "tractree-centroid", version)]
struct Args {
    /// File with the seed voxel coordinates.
    #[arg(long)]
    roi: PathBuf,

    /// Folder holding the single-seed compact tractograms.
    #[arg(long = "in")]
    input: PathBuf,

    /// Folder the tree will be written to.
    #[arg(long)]
    out: PathBuf,

    /// Seed neighbourhood level.
    #[arg(long, value_parser = ["6", "18", "26", "32", "92", "124"])]
    cnb: String,

    /// Memory for the tractogram caches, in GiB.
    #[arg(long = "cache-mem", default_value_t = 2.0)]
    cache_mem: f64,

    /// Relative streamline count under which tract values are noise.
    #[arg(long = "threshold-ratio", default_value_t = 0.001)]
    threshold_ratio: f32,

    /// Maximum dissimilarity a seed may have to its closest neighbour.
    #[arg(long = "max-nb-dist", default_value_t = 0.1)]
    max_nb_dist: f64,

    /// Homogeneous base-node phase: off, size:S or num:N.
    #[arg(long, default_value = "off")]
    base: BasePhase,

    /// Record discarded seeds in the tree file.
    #[arg(long = "keep-discarded")]
    keep_discarded: bool,

    /// Worker threads, 0 meaning all available cores.
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Scratch folder for the mean tracts; a temporary directory under the
    /// output folder by default.
    #[arg(long)]
    tmp: Option<PathBuf>,

    /// Skip the logarithmic normalisation of tract values.
    #[arg(long = "no-log")]
    no_log: bool,

    /// Gzip the mean tract files.
    #[arg(long)]
    zip: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> tractree::Result<()> {
    if !(0.1..=50.0).contains(&args.cache_mem) {
        return Err(Error::ParamOutOfRange { name: "cache_mem", value: args.cache_mem });
    }
    if args.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.threads)
            .build_global()
            .expect("the global thread pool is only initialized here");
    }

    let mut roi = Roi::read(&args.roi)?;
    if roi.grid == Grid::Surf {
        // surface seeds are tracked in the volume frame
        roi.to_grid(Grid::Nifti);
    }

    fs::create_dir_all(&args.out)?;
    let scratch;
    let node_dir = match &args.tmp {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            dir.clone()
        }
        None => {
            scratch = tempfile::tempdir_in(&args.out)?;
            scratch.path().to_path_buf()
        }
    };

    let store = CompactStore::new(&args.input, &node_dir, &roi, args.zip);
    let params = CentroidParams {
        nb_level: args.cnb.parse().expect("clap only accepts valid levels"),
        cache_bytes: (args.cache_mem * 1024.0 * 1024.0 * 1024.0) as usize,
        threshold_ratio: args.threshold_ratio,
        max_nb_dist: args.max_nb_dist,
        base: args.base,
        keep_discarded: args.keep_discarded,
        no_log: args.no_log,
    };

    let tree = CentroidBuilder::new(&roi, &store, params)?.build()?;
    let tree_path = args.out.join(format!("{}.txt", tree.name));
    tree.write(&tree_path)?;
    println!("tree written to {}", tree_path.display());

    File::create(args.out.join("success"))?;
    Ok(())
}
