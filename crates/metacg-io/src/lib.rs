//! Reading and writing MetaCG call-graph files.
//!
//! Three on-disk versions are supported. Version 4 is the canonical shape;
//! version 2 is upgraded to it on read and downgraded from it on write;
//! version 3 stores nodes and edges as arrays keyed by hashed ids.
//!
//! # Modules
//!
//! - [`error`]: FormatError enum with all failure modes
//! - [`format`]: format version, generator info and the `_MetaCG` header
//! - [`source`]: where readers get JSON from
//! - [`sink`]: where writers put JSON
//! - [`id_mapping`]: node id to textual id projection and its inverse
//! - [`hash`]: blake3 node hashes used by version 3
//! - [`sort`]: deterministic JSON ordering for sorted export
//! - [`v2`], [`v3`], [`v4`]: the format codecs
//! - [`dot`]: Graphviz export
//! - [`dot_reader`]: Graphviz import

pub mod dot;
pub mod dot_reader;
pub mod error;
pub mod format;
pub mod hash;
pub mod id_mapping;
pub mod sink;
pub mod sort;
pub mod source;
pub mod v2;
pub mod v3;
pub mod v4;

use metacg_core::metadata::registry::global_snapshot;
use metacg_core::{Graph, MetadataRegistry};

pub use dot::DotGenerator;
pub use dot_reader::{read_dot_file, DotFileSource, DotParser, DotReader, DotSource, DotStringSource};
pub use error::FormatError;
pub use format::{FileInfo, FormatVersion, GeneratorInfo};
pub use id_mapping::{IdProjection, IdStrategy, StrToNodeMapping};
pub use sink::JsonSink;
pub use source::{FileSource, JsonSource, ReaderSource};
pub use v2::{VersionTwoReader, VersionTwoWriter};
pub use v3::{VersionThreeReader, VersionThreeWriter};
pub use v4::{VersionFourReader, VersionFourWriter};

/// Produces a graph from a source.
pub trait McgReader {
    /// Reads the whole graph. Either succeeds completely or fails.
    fn read(&mut self) -> Result<Graph, FormatError>;
}

/// Serializes a graph into a sink.
pub trait McgWriter {
    fn write(&self, graph: &Graph, sink: &mut JsonSink) -> Result<(), FormatError>;
}

/// Flags shared by the writer factory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterOptions {
    pub export_sorted: bool,
    /// Version 4 only; version 2 always uses names.
    pub use_names_as_ids: bool,
    /// Version 3 only.
    pub debug: bool,
}

// -----------------------------------------------------------------------
// Factories
// -----------------------------------------------------------------------

/// Creates the reader matching the version declared by `source`, decoding
/// metadata with `registry`.
pub fn try_create_reader_with(
    mut source: Box<dyn ReaderSource>,
    registry: MetadataRegistry,
) -> Result<Box<dyn McgReader>, FormatError> {
    let version = source.format_version()?;
    let reader: Box<dyn McgReader> = match version.major {
        2 => Box::new(VersionTwoReader::new(source).with_registry(registry)),
        3 => Box::new(VersionThreeReader::new(source).with_registry(registry)),
        4 => Box::new(VersionFourReader::new(source).with_registry(registry)),
        _ => {
            return Err(FormatError::UnsupportedVersion {
                version: version.to_string(),
            })
        }
    };
    Ok(reader)
}

/// [`try_create_reader_with`] using a snapshot of the global registry.
pub fn try_create_reader(source: Box<dyn ReaderSource>) -> Result<Box<dyn McgReader>, FormatError> {
    try_create_reader_with(source, global_snapshot())
}

/// Like [`try_create_reader`], logging the failure instead of returning it.
pub fn create_reader(source: Box<dyn ReaderSource>) -> Option<Box<dyn McgReader>> {
    match try_create_reader(source) {
        Ok(reader) => Some(reader),
        Err(e) => {
            tracing::error!(error = %e, "cannot create reader");
            None
        }
    }
}

/// Creates a writer for `version` with default settings.
pub fn create_writer(version: u32) -> Option<Box<dyn McgWriter>> {
    let format = FormatVersion::for_major(version)?;
    create_writer_with(FileInfo::for_version(format), WriterOptions::default())
}

/// Creates a writer for `info.format`, or `None` if that version is unknown.
pub fn create_writer_with(info: FileInfo, options: WriterOptions) -> Option<Box<dyn McgWriter>> {
    let writer: Box<dyn McgWriter> = match info.format.major {
        2 => Box::new(VersionTwoWriter::new(info).export_sorted(options.export_sorted)),
        3 => Box::new(
            VersionThreeWriter::new(info)
                .export_sorted(options.export_sorted)
                .debug(options.debug),
        ),
        4 => Box::new(
            VersionFourWriter::new(info)
                .export_sorted(options.export_sorted)
                .use_names_as_ids(options.use_names_as_ids),
        ),
        other => {
            tracing::error!(version = other, "no writer for format version");
            return None;
        }
    };
    Some(writer)
}

/// Reads the graph stored at `path`, whatever its version.
pub fn read_file(path: impl Into<std::path::PathBuf>) -> Result<Graph, FormatError> {
    try_create_reader(Box::new(FileSource::new(path)))?.read()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn header(version: &str) -> serde_json::Value {
        json!({"version": version, "generator": {"name": "t", "version": "1.0"}})
    }

    #[test]
    fn reader_dispatches_on_declared_version() {
        let v2 = json!({"_MetaCG": header("2.0"), "_CG": {
            "main": {"callees": [], "isVirtual": false, "hasBody": true, "meta": null}
        }});
        let v3 = json!({"_MetaCG": header("3.0"), "_CG": {"nodes": [], "edges": []}});
        let v4 = json!({"_MetaCG": header("4.0"), "_CG": {}});

        let g = create_reader(Box::new(JsonSource::new(v2))).unwrap().read().unwrap();
        assert_eq!(g.size(), 1);
        assert!(create_reader(Box::new(JsonSource::new(v3))).unwrap().read().unwrap().is_empty());
        assert!(create_reader(Box::new(JsonSource::new(v4))).unwrap().read().unwrap().is_empty());
    }

    #[test]
    fn unknown_versions_yield_nothing() {
        let v9 = json!({"_MetaCG": header("9.0"), "_CG": {}});
        assert!(create_reader(Box::new(JsonSource::new(v9.clone()))).is_none());
        assert!(matches!(
            try_create_reader(Box::new(JsonSource::new(v9))),
            Err(FormatError::UnsupportedVersion { version }) if version == "9.0"
        ));
        assert!(create_writer(1).is_none());
        assert!(create_writer(5).is_none());
    }

    #[test]
    fn writers_stamp_their_version() {
        let g = Graph::new();
        for version in [2, 3, 4] {
            let mut sink = JsonSink::new();
            create_writer(version).unwrap().write(&g, &mut sink).unwrap();
            assert_eq!(sink.json()["_MetaCG"]["version"], json!(format!("{version}.0")));
            assert_eq!(sink.json()["_MetaCG"]["generator"]["name"], json!("MetaCG"));
        }
    }

    #[test]
    fn missing_header_is_reported() {
        let doc = json!({"_CG": {}});
        assert!(matches!(
            try_create_reader(Box::new(JsonSource::new(doc))),
            Err(FormatError::MissingSection { section }) if section == "_MetaCG"
        ));
    }
}
