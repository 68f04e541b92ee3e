//! Command-line front ends for MetaCG call graphs.
//!
//! Provides the logic behind two binaries:
//!
//! - `cgmerge <outfile> <infile>...` merges call graphs by function name and
//!   writes the result in the version of the first input.
//! - `cgconvert <input> <output> [version]` rewrites a call graph in another
//!   format version, or as Graphviz DOT.
//!
//! Both return a process exit code instead of exiting so they can be driven
//! from tests.

use std::fs;
use std::path::{Path, PathBuf};

use metacg_core::{Graph, GraphRegistry, MergeByName};
use metacg_io::{
    create_writer_with, read_dot_file, try_create_reader, DotGenerator, FileInfo, FileSource, FormatError,
    FormatVersion, JsonSink, ReaderSource, WriterOptions,
};
use tracing_subscriber::EnvFilter;

/// Name of the merge target inside the graph registry.
const MERGED_GRAPH: &str = "merged";

/// Installs the stderr log subscriber. `RUST_LOG` overrides the `info`
/// default.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn writer_info(major: u32) -> Result<FileInfo, FormatError> {
    FormatVersion::for_major(major)
        .map(FileInfo::for_version)
        .ok_or_else(|| FormatError::UnsupportedVersion {
            version: major.to_string(),
        })
}

fn write_graph(graph: &Graph, info: FileInfo, options: WriterOptions) -> Result<JsonSink, FormatError> {
    let version = info.format;
    let writer = create_writer_with(info, options).ok_or_else(|| FormatError::UnsupportedVersion {
        version: version.to_string(),
    })?;
    let mut sink = JsonSink::new();
    writer.write(graph, &mut sink)?;
    Ok(sink)
}

fn read_graph(path: &Path) -> Result<(FormatVersion, Graph), FormatError> {
    let mut source = FileSource::new(path);
    let version = source.format_version()?;
    let graph = try_create_reader(Box::new(source))?.read()?;
    tracing::info!(path = %path.display(), %version, nodes = graph.size(), "read call graph");
    Ok((version, graph))
}

// -----------------------------------------------------------------------
// cgmerge
// -----------------------------------------------------------------------

/// Merges `inputs` into one graph and serializes it in the first input's
/// version.
pub fn merge_files(inputs: &[PathBuf], sorted: bool) -> Result<JsonSink, FormatError> {
    let first = inputs.first().ok_or_else(|| FormatError::Malformed {
        reason: "no input files given".to_string(),
    })?;
    let version = FileSource::new(first).format_version()?;
    let info = writer_info(version.major)?;

    let mut registry = GraphRegistry::new();
    registry.add_graph(MERGED_GRAPH, Graph::new(), true);
    for (index, path) in inputs.iter().enumerate() {
        let (input_version, graph) = read_graph(path)?;
        if input_version.major != version.major {
            tracing::warn!(
                path = %path.display(),
                expected = %version,
                found = %input_version,
                "input format version differs from the first input"
            );
        }
        registry.add_graph(format!("{index}:{}", path.display()), graph, false);
    }

    let recorders = registry.merge_into_active(&MergeByName)?;
    for (name, recorder) in &recorders {
        tracing::debug!(
            graph = %name,
            matched = recorder.matched_count(),
            copied = recorder.copied_count(),
            "merged input"
        );
    }

    let merged = registry.active().ok_or(metacg_core::CoreError::NoActiveGraph)?;
    tracing::info!(nodes = merged.size(), edges = merged.edge_count(), inputs = inputs.len(), "merge complete");
    let options = WriterOptions {
        export_sorted: sorted,
        ..WriterOptions::default()
    };
    write_graph(merged, info, options)
}

/// Runs `cgmerge`. Returns 0 on success and 1 on any failure.
pub fn run_merge(output: &Path, inputs: &[PathBuf], sorted: bool) -> i32 {
    let result = merge_files(inputs, sorted).and_then(|sink| sink.write_file(output, false));
    match result {
        Ok(()) => {
            tracing::info!(path = %output.display(), "wrote merged call graph");
            0
        }
        Err(e) => {
            tracing::error!(error = %e, "merge failed");
            1
        }
    }
}

// -----------------------------------------------------------------------
// cgconvert
// -----------------------------------------------------------------------

/// Output settings for `cgconvert`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertOptions {
    /// Target format major version.
    pub version: u32,
    pub writer: WriterOptions,
    /// Emit Graphviz DOT instead of JSON.
    pub dot: bool,
    pub pretty: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        ConvertOptions {
            version: 4,
            writer: WriterOptions::default(),
            dot: false,
            pretty: false,
        }
    }
}

fn is_dot_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("dot"))
}

/// Reads `input` in whatever version it declares and writes it to `output`.
///
/// A `.dot` input is read as Graphviz and yields nodes and edges only.
pub fn convert_file(input: &Path, output: &Path, options: ConvertOptions) -> Result<(), FormatError> {
    let (version, graph) = if is_dot_file(input) {
        let graph = read_dot_file(input)?;
        tracing::info!(path = %input.display(), nodes = graph.size(), "read dot graph");
        (None, graph)
    } else {
        let (version, graph) = read_graph(input)?;
        (Some(version), graph)
    };
    if options.dot {
        let dot = DotGenerator::new(&graph).generate();
        return fs::write(output, dot).map_err(|source| FormatError::Io {
            path: output.to_path_buf(),
            source,
        });
    }
    let info = writer_info(options.version)?;
    if let Some(version) = version.filter(|v| v.major == options.version) {
        tracing::info!(%version, "input already has the requested version, rewriting it");
    }
    write_graph(&graph, info, options.writer)?.write_file(output, options.pretty)
}

/// Runs `cgconvert`. Returns 0 on success and 1 on any failure.
pub fn run_convert(input: &Path, output: &Path, options: ConvertOptions) -> i32 {
    match convert_file(input, output, options) {
        Ok(()) => {
            tracing::info!(path = %output.display(), "wrote converted call graph");
            0
        }
        Err(e) => {
            tracing::error!(error = %e, "conversion failed");
            1
        }
    }
}
