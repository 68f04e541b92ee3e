//! Version 4: the canonical format.
//!
//! ```json
//! "_CG": {
//!   "<id>": {
//!     "functionName": "main",
//!     "origin": "main.cpp",
//!     "hasBody": true,
//!     "meta": {"numStatements": 4},
//!     "edges": {"<callee id>": {}}
//!   }
//! }
//! ```
//!
//! The other versions convert to and from this shape, so the node and
//! metadata helpers here are shared with [`crate::v2`] and [`crate::v3`].

use metacg_core::metadata::registry::global_snapshot;
use metacg_core::{CoreError, EdgeId, Graph, MetadataMap, MetadataRegistry, NodeId, StrToNode};
use serde_json::{json, Map, Value};

use crate::error::FormatError;
use crate::format::{section, FileInfo, FormatVersion, MetaInfo, CG_FIELD, GRAPH_META_FIELD, META_INFO_FIELD};
use crate::hash::UNKNOWN_ORIGIN;
use crate::id_mapping::{IdProjection, IdStrategy, StrToNodeMapping};
use crate::sink::JsonSink;
use crate::sort::{sort_array, sort_array_fields};
use crate::source::ReaderSource;
use crate::{McgReader, McgWriter};

// -----------------------------------------------------------------------
// Writer
// -----------------------------------------------------------------------

/// Writes graphs in the version 4 format.
#[derive(Debug, Clone)]
pub struct VersionFourWriter {
    info: FileInfo,
    use_names_as_ids: bool,
    export_sorted: bool,
}

impl Default for VersionFourWriter {
    fn default() -> Self {
        VersionFourWriter::new(FileInfo::for_version(FormatVersion::V4))
    }
}

impl VersionFourWriter {
    pub fn new(info: FileInfo) -> Self {
        VersionFourWriter {
            info,
            use_names_as_ids: false,
            export_sorted: false,
        }
    }

    /// Key nodes by (disambiguated) function name instead of numeric id.
    pub fn use_names_as_ids(mut self, enabled: bool) -> Self {
        self.use_names_as_ids = enabled;
        self
    }

    /// Sort array values for diff-friendly output.
    pub fn export_sorted(mut self, enabled: bool) -> Self {
        self.export_sorted = enabled;
        self
    }

    fn strategy(&self) -> IdStrategy {
        if self.use_names_as_ids {
            IdStrategy::Names
        } else {
            IdStrategy::Numeric
        }
    }
}

impl McgWriter for VersionFourWriter {
    fn write(&self, graph: &Graph, sink: &mut JsonSink) -> Result<(), FormatError> {
        let ids = IdProjection::new(graph, self.strategy());
        let cg = encode_nodes(graph, &ids, self.export_sorted)?;
        let header = header_with_graph_meta(&self.info, graph, &ids, self.export_sorted)?;
        sink.set_json(json!({ META_INFO_FIELD: header, CG_FIELD: Value::Object(cg) }));
        tracing::debug!(nodes = graph.size(), edges = graph.edge_count(), "wrote version 4 graph");
        Ok(())
    }
}

/// Encodes every node of `graph` into the canonical `_CG` object.
pub(crate) fn encode_nodes(
    graph: &Graph,
    ids: &IdProjection,
    export_sorted: bool,
) -> Result<Map<String, Value>, FormatError> {
    let mut out = Map::new();
    for node in graph.nodes() {
        let mut edges = Map::new();
        for callee in graph.callees(node.id()) {
            let edge_meta = match graph.edge_meta(node.id(), callee) {
                Some(meta) => encode_meta(meta, ids, export_sorted)?,
                None => Map::new(),
            };
            edges.insert(ids.text(callee)?.to_string(), Value::Object(edge_meta));
        }
        let mut entry = json!({
            "functionName": node.function_name(),
            "origin": node.origin(),
            "hasBody": node.has_body(),
            "meta": Value::Object(encode_meta(&node.meta, ids, export_sorted)?),
            "edges": Value::Object(edges),
        });
        if export_sorted {
            sort_array_fields(&mut entry);
        }
        out.insert(ids.text(node.id())?.to_string(), entry);
    }
    Ok(out)
}

/// Serializes a metadata map, skipping entries that encode to nothing.
pub(crate) fn encode_meta(
    meta: &MetadataMap,
    ids: &IdProjection,
    export_sorted: bool,
) -> Result<Map<String, Value>, FormatError> {
    let mut out = Map::new();
    for (key, md) in meta.iter() {
        let mut value = md.to_json(ids)?;
        if is_empty_json(&value) {
            tracing::warn!(key, "metadata encoded to an empty value, skipping");
            continue;
        }
        if export_sorted {
            match &mut value {
                Value::Array(items) => sort_array(items),
                Value::Object(_) => sort_array_fields(&mut value),
                _ => {}
            }
        }
        out.insert(key.to_string(), value);
    }
    Ok(out)
}

fn is_empty_json(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// The `_MetaCG` object, carrying graph-level metadata when there is any.
pub(crate) fn header_with_graph_meta(
    info: &FileInfo,
    graph: &Graph,
    ids: &IdProjection,
    export_sorted: bool,
) -> Result<Value, FormatError> {
    let mut header = info.header();
    let meta = encode_meta(graph.meta(), ids, export_sorted)?;
    if !meta.is_empty() {
        if let Value::Object(fields) = &mut header {
            fields.insert(GRAPH_META_FIELD.to_string(), Value::Object(meta));
        }
    }
    Ok(header)
}

// -----------------------------------------------------------------------
// Reader
// -----------------------------------------------------------------------

/// Reads version 4 files.
pub struct VersionFourReader {
    source: Box<dyn ReaderSource>,
    registry: MetadataRegistry,
}

impl VersionFourReader {
    /// Creates a reader decoding metadata with a snapshot of the global
    /// registry.
    pub fn new(source: Box<dyn ReaderSource>) -> Self {
        VersionFourReader {
            source,
            registry: global_snapshot(),
        }
    }

    pub fn with_registry(mut self, registry: MetadataRegistry) -> Self {
        self.registry = registry;
        self
    }
}

impl McgReader for VersionFourReader {
    fn read(&mut self) -> Result<Graph, FormatError> {
        let doc = self.source.get()?;
        let info = MetaInfo::from_document(&doc)?;
        info.expect_major(4)?;
        let cg = section(&doc, CG_FIELD)?;
        let graph = decode_graph(cg, info.graph_meta(), &self.registry)?;
        tracing::debug!(nodes = graph.size(), edges = graph.edge_count(), "read version 4 graph");
        Ok(graph)
    }
}

/// The common node fields of versions 3 and 4.
pub(crate) struct NodeFields<'a> {
    pub name: &'a str,
    pub origin: Option<String>,
    pub has_body: bool,
    pub meta: Option<&'a Map<String, Value>>,
}

fn malformed(node: &str, reason: impl Into<String>) -> FormatError {
    FormatError::MalformedNode {
        node: node.to_string(),
        reason: reason.into(),
    }
}

/// Parses `functionName`, `origin`, `hasBody` and `meta` of a node entry.
pub(crate) fn parse_node_fields<'a>(node: &str, entry: &'a Value) -> Result<NodeFields<'a>, FormatError> {
    let fields = entry
        .as_object()
        .ok_or_else(|| malformed(node, "node entry is not an object"))?;
    let name = fields
        .get("functionName")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed(node, "missing or non-string 'functionName'"))?;
    let origin = match fields.get("origin") {
        None => return Err(malformed(node, "missing 'origin'")),
        Some(Value::Null) => None,
        Some(Value::String(origin)) => normalize_origin(node, origin),
        Some(_) => return Err(malformed(node, "'origin' must be a string or null")),
    };
    let has_body = fields
        .get("hasBody")
        .and_then(Value::as_bool)
        .ok_or_else(|| malformed(node, "missing or non-boolean 'hasBody'"))?;
    let meta = match fields.get("meta") {
        None => return Err(malformed(node, "missing 'meta'")),
        Some(Value::Null) => None,
        Some(Value::Object(meta)) => Some(meta),
        Some(_) => return Err(malformed(node, "'meta' must be an object or null")),
    };
    Ok(NodeFields {
        name,
        origin,
        has_body,
        meta,
    })
}

/// Empty and sentinel origins mean "unknown".
pub(crate) fn normalize_origin(node: &str, origin: &str) -> Option<String> {
    if origin.is_empty() {
        tracing::warn!(node, "empty origin, treating as unknown");
        return None;
    }
    if origin == UNKNOWN_ORIGIN {
        return None;
    }
    Some(origin.to_string())
}

type EdgeEntry<'a> = (&'a str, Option<&'a Map<String, Value>>);

/// Outgoing edges of a v4 node, from `edges` or the older `callees`.
fn parse_edges<'a>(node: &str, entry: &'a Value) -> Result<Vec<EdgeEntry<'a>>, FormatError> {
    let edges = entry
        .get("edges")
        .or_else(|| entry.get("callees"))
        .ok_or_else(|| malformed(node, "missing 'edges'"))?;
    match edges {
        Value::Null => Ok(Vec::new()),
        Value::Object(edges) => edges
            .iter()
            .map(|(callee, meta)| match meta {
                Value::Null => Ok((callee.as_str(), None)),
                Value::Object(meta) => Ok((callee.as_str(), Some(meta))),
                _ => Err(malformed(node, format!("metadata of edge to '{callee}' must be an object"))),
            })
            .collect(),
        Value::Array(callees) => callees
            .iter()
            .map(|callee| {
                callee
                    .as_str()
                    .map(|callee| (callee, None))
                    .ok_or_else(|| malformed(node, "callee ids must be strings"))
            })
            .collect(),
        _ => Err(malformed(node, "'edges' must be an object")),
    }
}

/// Decodes every entry of `meta` through `registry` into `target`.
pub(crate) fn decode_meta_into(
    target: &mut MetadataMap,
    meta: &Map<String, Value>,
    registry: &MetadataRegistry,
    ids: &dyn StrToNode,
) -> Result<(), FormatError> {
    for (key, value) in meta {
        if value.is_null() {
            tracing::warn!(key = key.as_str(), "null metadata value, skipping");
            continue;
        }
        target.add(registry.decode(key, value, ids)?)?;
    }
    Ok(())
}

/// Builds a graph from a canonical `_CG` object.
///
/// Nodes are created first, then edges, then metadata, so metadata may
/// reference any node of the file.
pub(crate) fn decode_graph(
    cg: &Value,
    graph_meta: Option<&Map<String, Value>>,
    registry: &MetadataRegistry,
) -> Result<Graph, FormatError> {
    let entries = cg.as_object().ok_or_else(|| FormatError::Malformed {
        reason: format!("'{CG_FIELD}' must be an object"),
    })?;

    // Numeric ids are materialized in numeric order so they survive a
    // read-write cycle unchanged.
    let mut keys: Vec<&String> = entries.keys().collect();
    if keys.iter().all(|key| key.parse::<u64>().is_ok()) {
        keys.sort_by_key(|key| key.parse::<u64>().ok());
    }

    let mut graph = Graph::new();
    let mut ids = StrToNodeMapping::new();
    let mut pending = Vec::with_capacity(keys.len());
    for text in keys {
        let entry = &entries[text.as_str()];
        let fields = parse_node_fields(text, entry)?;
        let edges = parse_edges(text, entry)?;
        let id = graph.insert(fields.name, fields.origin, false, fields.has_body);
        ids.register(text.as_str(), id)?;
        pending.push((id, text, fields.meta, edges));
    }

    let mut edge_meta = Vec::new();
    for (caller, text, _, edges) in &pending {
        for (callee_text, meta) in edges {
            let callee = ids
                .get(callee_text)
                .ok_or_else(|| FormatError::UnknownCallee {
                    caller: text.to_string(),
                    callee: callee_text.to_string(),
                })?;
            graph.add_edge(*caller, callee)?;
            if let Some(meta) = meta {
                edge_meta.push((*caller, callee, *meta));
            }
        }
    }

    for (id, _, meta, _) in &pending {
        if let Some(meta) = meta {
            let node = graph.node_mut(*id).ok_or(CoreError::NodeNotFound { id: *id })?;
            decode_meta_into(&mut node.meta, meta, registry, &ids)?;
        }
    }
    for (caller, callee, meta) in edge_meta {
        decode_edge_meta(&mut graph, caller, callee, meta, registry, &ids)?;
    }
    if let Some(meta) = graph_meta {
        decode_meta_into(graph.meta_mut(), meta, registry, &ids)?;
    }
    Ok(graph)
}

pub(crate) fn decode_edge_meta(
    graph: &mut Graph,
    caller: NodeId,
    callee: NodeId,
    meta: &Map<String, Value>,
    registry: &MetadataRegistry,
    ids: &dyn StrToNode,
) -> Result<(), FormatError> {
    let target = graph
        .edge_meta_mut(caller, callee)
        .ok_or(CoreError::EdgeNotFound {
            id: EdgeId::new(caller, callee),
        })?;
    decode_meta_into(target, meta, registry, ids)
}
