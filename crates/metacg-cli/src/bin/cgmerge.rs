//! `cgmerge`: merge MetaCG call graphs by function name.

use std::path::PathBuf;
use std::process;

use clap::Parser;

/// Merge call graphs into one file.
///
/// The format version of the first input decides the reader and writer;
/// inputs with other versions are read anyway and reported.
#[derive(Parser)]
#[command(name = "cgmerge", version, about = "Merge MetaCG call graphs")]
struct Cli {
    /// File to write the merged call graph to.
    output: PathBuf,

    /// Call graph files to merge.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Sort array values for deterministic output.
    #[arg(long)]
    sorted: bool,
}

fn main() {
    let cli = Cli::parse();
    metacg_cli::init_logging();
    process::exit(metacg_cli::run_merge(&cli.output, &cli.inputs, cli.sorted));
}
