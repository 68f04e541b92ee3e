//! Error types for metacg-io.
//!
//! [`FormatError`] covers every terminal failure of a read or write call:
//! I/O, JSON syntax, missing sections, unsupported versions and dangling node
//! references. Readers never return a partially populated graph.

use std::path::PathBuf;

use metacg_core::CoreError;
use thiserror::Error;

/// Errors produced while reading or writing MetaCG files.
#[derive(Debug, Error)]
pub enum FormatError {
    /// JSON syntax or shape error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading or writing a file failed.
    #[error("i/o error on '{path}': {source}", path = path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Writing to an output stream failed.
    #[error("write error: {0}")]
    Write(#[source] std::io::Error),

    /// A required top-level section is missing or null.
    #[error("section '{section}' is missing or null")]
    MissingSection { section: String },

    /// The declared format version is not supported at all.
    #[error("unsupported format version '{version}'")]
    UnsupportedVersion { version: String },

    /// The file has a different major version than this reader handles.
    #[error("reader for version {expected} cannot read a version {found} file")]
    VersionMismatch { expected: u32, found: String },

    /// A node entry is malformed.
    #[error("malformed node '{node}': {reason}")]
    MalformedNode { node: String, reason: String },

    /// Any other structural problem in the graph section.
    #[error("malformed call graph: {reason}")]
    Malformed { reason: String },

    /// An edge references a node id that is never defined.
    #[error("edge from '{caller}' references unknown node '{callee}'")]
    UnknownCallee { caller: String, callee: String },

    /// Two nodes share the same textual id.
    #[error("duplicate node id '{id}'")]
    DuplicateNodeId { id: String },

    /// Metadata (de)serialization or graph mutation failed.
    #[error(transparent)]
    Core(#[from] CoreError),
}
