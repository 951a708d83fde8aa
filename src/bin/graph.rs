use std::fs::{self, File};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tractree::{GraphBuilder, Linkage, Roi};

/// Builds a hierarchical tree from a precomputed pairwise distance matrix.
#[derive(Debug, Parser)]
#[command(name = "tractree-graph", version)]
struct Args {
    /// File with the seed voxel coordinates.
    #[arg(long)]
    roi: PathBuf,

    /// Folder holding the distance matrix index and blocks.
    #[arg(long = "in")]
    input: PathBuf,

    /// Folder the tree will be written to.
    #[arg(long)]
    out: PathBuf,

    /// Linkage rule: single, complete, average, weighted or ward.
    #[arg(long)]
    linkage: Linkage,

    /// Worker threads, 0 meaning all available cores.
    #[arg(long, default_value_t = 0)]
    threads: usize,
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
    if args.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.threads)
            .build_global()
            .expect("the global thread pool is only initialized here");
    }

    let roi = Roi::read(&args.roi)?;
    fs::create_dir_all(&args.out)?;

    let tree = GraphBuilder::new(roi, &args.input)?.build(args.linkage)?;
    let tree_path = args.out.join(format!("{}.txt", tree.name));
    tree.write(&tree_path)?;
    println!("tree written to {}", tree_path.display());

    File::create(args.out.join("success"))?;
    Ok(())
}
