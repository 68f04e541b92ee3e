//! Version 2: the legacy name-keyed format.
//!
//! ```json
//! "_CG": {
//!   "main": {
//!     "callees": ["foo"], "callers": [],
//!     "isVirtual": false, "doesOverride": false, "overrides": [], "overriddenBy": [],
//!     "hasBody": true,
//!     "meta": {"fileProperties": {"origin": "main.cpp", "systemInclude": false}}
//!   }
//! }
//! ```
//!
//! Nodes are keyed by function name, so same-named functions cannot be told
//! apart. Reading upgrades the document to the version 4 shape and decodes
//! it with the canonical decoder; writing encodes canonically with name ids
//! and downgrades the result.

use std::collections::BTreeMap;

use metacg_core::metadata::registry::global_snapshot;
use metacg_core::metadata::{FilePropertiesMd, OverrideMd};
use metacg_core::{Graph, MetadataKind, MetadataRegistry};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::error::FormatError;
use crate::format::{section, FileInfo, FormatVersion, MetaInfo, CG_FIELD, META_INFO_FIELD};
use crate::hash::UNKNOWN_ORIGIN;
use crate::id_mapping::IdProjection;
use crate::sink::JsonSink;
use crate::source::ReaderSource;
use crate::v4::{decode_graph, encode_nodes};
use crate::{McgReader, McgWriter};

/// One node of a version 2 file.
///
/// `callers` and `doesOverride` are derivable from the other fields and are
/// not read.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct V2Node {
    callees: Vec<String>,
    is_virtual: bool,
    #[serde(default)]
    overrides: Vec<String>,
    #[serde(default)]
    overridden_by: Vec<String>,
    has_body: bool,
    #[serde(default)]
    meta: Option<Map<String, Value>>,
}

// -----------------------------------------------------------------------
// Reader
// -----------------------------------------------------------------------

/// Reads version 2 files.
pub struct VersionTwoReader {
    source: Box<dyn ReaderSource>,
    registry: MetadataRegistry,
}

impl VersionTwoReader {
    pub fn new(source: Box<dyn ReaderSource>) -> Self {
        VersionTwoReader {
            source,
            registry: global_snapshot(),
        }
    }

    pub fn with_registry(mut self, registry: MetadataRegistry) -> Self {
        self.registry = registry;
        self
    }
}

impl McgReader for VersionTwoReader {
    fn read(&mut self) -> Result<Graph, FormatError> {
        let doc = self.source.get()?;
        let info = MetaInfo::from_document(&doc)?;
        info.expect_major(2)?;
        let cg = section(&doc, CG_FIELD)?;
        let upgraded = upgrade(cg)?;
        let graph = decode_graph(&upgraded, None, &self.registry)?;
        tracing::debug!(nodes = graph.size(), edges = graph.edge_count(), "read version 2 graph");
        Ok(graph)
    }
}

/// Converts a version 2 `_CG` object into the canonical shape.
pub(crate) fn upgrade(cg: &Value) -> Result<Value, FormatError> {
    let entries = cg.as_object().ok_or_else(|| FormatError::Malformed {
        reason: format!("'{CG_FIELD}' must be an object"),
    })?;
    let mut nodes = BTreeMap::new();
    for (name, entry) in entries {
        let node = V2Node::deserialize(entry).map_err(|e| FormatError::MalformedNode {
            node: name.clone(),
            reason: e.to_string(),
        })?;
        nodes.insert(name.as_str(), node);
    }

    let mut out = Map::new();
    for (name, node) in &nodes {
        let mut meta = node.meta.clone().unwrap_or_default();
        let origin = meta
            .get(FilePropertiesMd::KEY)
            .and_then(|props| props.get("origin"))
            .and_then(Value::as_str)
            .filter(|origin| !origin.is_empty() && *origin != UNKNOWN_ORIGIN)
            .map(str::to_string);

        if node.is_virtual {
            let known = |list: &[String]| -> Vec<Value> {
                list.iter()
                    .filter(|other| {
                        let exists = nodes.contains_key(other.as_str());
                        if !exists {
                            tracing::warn!(node = %name, missing = %other, "dropping override of an unknown function");
                        }
                        exists
                    })
                    .map(|other| Value::from(other.as_str()))
                    .collect()
            };
            meta.insert(
                OverrideMd::KEY.to_string(),
                json!({
                    "overrides": known(&node.overrides),
                    "overriddenBy": known(&node.overridden_by),
                }),
            );
        }

        let edges: Map<String, Value> = node
            .callees
            .iter()
            .map(|callee| (callee.clone(), json!({})))
            .collect();
        out.insert(
            name.to_string(),
            json!({
                "functionName": name,
                "origin": origin,
                "hasBody": node.has_body,
                "meta": Value::Object(meta),
                "edges": Value::Object(edges),
            }),
        );
    }
    Ok(Value::Object(out))
}

// -----------------------------------------------------------------------
// Writer
// -----------------------------------------------------------------------

/// Writes graphs in the version 2 format.
#[derive(Debug, Clone)]
pub struct VersionTwoWriter {
    info: FileInfo,
    export_sorted: bool,
}

impl Default for VersionTwoWriter {
    fn default() -> Self {
        VersionTwoWriter::new(FileInfo::for_version(FormatVersion::V2))
    }
}

impl VersionTwoWriter {
    pub fn new(info: FileInfo) -> Self {
        VersionTwoWriter {
            info,
            export_sorted: false,
        }
    }

    pub fn export_sorted(mut self, enabled: bool) -> Self {
        self.export_sorted = enabled;
        self
    }
}

impl McgWriter for VersionTwoWriter {
    fn write(&self, graph: &Graph, sink: &mut JsonSink) -> Result<(), FormatError> {
        if graph.has_duplicate_names() {
            tracing::warn!("duplicate function names cannot be represented in version 2, suffixing them");
        }
        if !graph.meta().is_empty() {
            tracing::warn!(entries = graph.meta().len(), "version 2 has no graph metadata, dropping it");
        }
        let ids = IdProjection::names(graph);
        let mut cg = encode_nodes(graph, &ids, self.export_sorted)?;
        downgrade(&mut cg, self.export_sorted);
        sink.set_json(json!({ META_INFO_FIELD: self.info.header(), CG_FIELD: Value::Object(cg) }));
        tracing::debug!(nodes = graph.size(), edges = graph.edge_count(), "wrote version 2 graph");
        Ok(())
    }
}

/// Converts a canonical, name-keyed `_CG` object into the version 2 shape.
pub(crate) fn downgrade(cg: &mut Map<String, Value>, sort_callers: bool) {
    for node in cg.values_mut() {
        let Value::Object(fields) = node else { continue };
        fields.remove("functionName");

        let callees: Vec<Value> = match fields.remove("edges") {
            Some(Value::Object(edges)) => edges.into_iter().map(|(callee, _)| Value::String(callee)).collect(),
            _ => Vec::new(),
        };
        fields.insert("callees".into(), Value::Array(callees));
        fields.insert("callers".into(), Value::Array(Vec::new()));

        let origin = fields.remove("origin").unwrap_or(Value::Null);
        let mut meta = match fields.remove("meta") {
            Some(Value::Object(meta)) => meta,
            _ => Map::new(),
        };
        relocate_origin(&mut meta, origin);

        let mut is_virtual = false;
        let mut does_override = false;
        let mut overrides = Value::Array(Vec::new());
        let mut overridden_by = Value::Array(Vec::new());
        if let Some(md) = meta.remove(OverrideMd::KEY) {
            is_virtual = true;
            if let Some(list) = md.get("overrides").filter(|list| is_non_empty_array(list)) {
                does_override = true;
                overrides = list.clone();
            }
            if let Some(list) = md.get("overriddenBy") {
                overridden_by = list.clone();
            }
        }
        fields.insert("isVirtual".into(), Value::Bool(is_virtual));
        fields.insert("doesOverride".into(), Value::Bool(does_override));
        fields.insert("overrides".into(), overrides);
        fields.insert("overriddenBy".into(), overridden_by);
        fields.insert(
            "meta".into(),
            if meta.is_empty() { Value::Null } else { Value::Object(meta) },
        );
    }

    let mut callers: Vec<(String, String)> = Vec::new();
    for (caller, node) in cg.iter() {
        if let Some(Value::Array(callees)) = node.get("callees") {
            for callee in callees.iter().filter_map(Value::as_str) {
                callers.push((callee.to_string(), caller.clone()));
            }
        }
    }
    for (callee, caller) in callers {
        if let Some(Value::Array(list)) = cg.get_mut(&callee).and_then(|node| node.get_mut("callers")) {
            list.push(Value::String(caller));
        }
    }

    if sort_callers {
        for node in cg.values_mut() {
            if let Some(Value::Array(list)) = node.get_mut("callers") {
                list.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
            }
        }
    }
}

fn is_non_empty_array(value: &Value) -> bool {
    value.as_array().is_some_and(|items| !items.is_empty())
}

/// Moves the node origin into `meta.fileProperties.origin`.
///
/// The `unknownOrigin` sentinel counts as no origin.
fn relocate_origin(meta: &mut Map<String, Value>, origin: Value) {
    let origin = match origin {
        Value::String(text) if text == UNKNOWN_ORIGIN => Value::Null,
        other => other,
    };
    match meta.get_mut(FilePropertiesMd::KEY) {
        Some(Value::Object(props)) => {
            let origin = if origin.is_null() { Value::from("") } else { origin };
            props.insert("origin".into(), origin);
        }
        _ if origin.is_null() => {}
        _ => {
            meta.insert(
                FilePropertiesMd::KEY.to_string(),
                json!({"origin": origin, "systemInclude": false}),
            );
        }
    }
}
