//! `cgconvert`: rewrite a MetaCG call graph in another format version.

use std::path::PathBuf;
use std::process;

use clap::Parser;

use metacg_cli::ConvertOptions;
use metacg_io::WriterOptions;

/// Convert a call graph between format versions.
#[derive(Parser)]
#[command(name = "cgconvert", version, about = "Convert MetaCG call graphs between format versions")]
struct Cli {
    /// Call graph file to read (any supported version).
    input: PathBuf,

    /// File to write.
    output: PathBuf,

    /// Format version to write: 2, 3 or 4.
    #[arg(id = "target_version", value_name = "VERSION", default_value_t = 4, value_parser = clap::value_parser!(u32).range(2..=4))]
    version: u32,

    /// Sort array values for deterministic output.
    #[arg(long)]
    sorted: bool,

    /// Key version 4 nodes by function name.
    #[arg(long)]
    names_as_ids: bool,

    /// Write the version 3 debug variant.
    #[arg(long)]
    debug: bool,

    /// Write Graphviz DOT instead of JSON.
    #[arg(long)]
    dot: bool,

    /// Indent the JSON output.
    #[arg(long)]
    pretty: bool,
}

fn main() {
    let cli = Cli::parse();
    metacg_cli::init_logging();

    let options = ConvertOptions {
        version: cli.version,
        writer: WriterOptions {
            export_sorted: cli.sorted,
            use_names_as_ids: cli.names_as_ids,
            debug: cli.debug,
        },
        dot: cli.dot,
        pretty: cli.pretty,
    };
    process::exit(metacg_cli::run_convert(&cli.input, &cli.output, options));
}
