//! Core error types for metacg-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering
//! misuse of the graph API and metadata (de)serialization failures.

use crate::id::{EdgeId, NodeId};
use thiserror::Error;

/// Core errors produced by the metacg-core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A node id was not found in the graph.
    #[error("node not found: NodeId({id})", id = id.0)]
    NodeNotFound { id: NodeId },

    /// An edge was not found in the graph.
    #[error("edge not found: {id}")]
    EdgeNotFound { id: EdgeId },

    /// A metadata container already holds an entry with this key.
    #[error("duplicate metadata: '{key}' is already attached")]
    DuplicateMetadata { key: String },

    /// A metadata type was registered twice under the same key.
    #[error("duplicate metadata registration: '{key}'")]
    DuplicateRegistration { key: String },

    /// A metadata entry exists under `key` but is not of the requested type.
    #[error("metadata '{key}' has an unexpected type")]
    MetadataTypeMismatch { key: String },

    /// A metadata JSON value could not be decoded.
    #[error("failed to decode metadata '{key}': {reason}")]
    MetadataDecode { key: String, reason: String },

    /// A metadata instance could not be encoded to JSON.
    #[error("failed to encode metadata '{key}': {reason}")]
    MetadataEncode { key: String, reason: String },

    /// A node id referenced during a merge has no entry in the graph mapping.
    #[error("node {id} has no entry in the graph mapping", id = id.0)]
    UnmappedNode { id: NodeId },

    /// The graph has no node recognised as the program entry.
    #[error("graph has no main node")]
    NoMainNode,

    /// A named graph is not managed by the registry.
    #[error("graph not found: '{name}'")]
    GraphNotFound { name: String },

    /// The registry has no active graph.
    #[error("no active graph")]
    NoActiveGraph,
}
