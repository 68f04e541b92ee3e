//! Version 3: node and edge arrays keyed by hashed ids.
//!
//! ```json
//! "_CG": {
//!   "nodes": [[8764512, {"functionName": "main", "hasBody": true, "meta": null, "origin": "main.cpp"}]],
//!   "edges": [[[8764512, 1290331], null]]
//! }
//! ```
//!
//! Node ids are [`node_hash`](crate::hash::node_hash) values. The debug
//! variant keys nodes by function name and adds redundant `callers` and
//! `calleeNames` lists for human readers; its edges keep the numeric ids.

use std::collections::HashMap;

use metacg_core::metadata::registry::global_snapshot;
use metacg_core::{CoreError, Graph, MetadataRegistry, NodeId};
use serde_json::{json, Value};

use crate::error::FormatError;
use crate::format::{section, FileInfo, FormatVersion, MetaInfo, CG_FIELD, META_INFO_FIELD};
use crate::hash::IdAllocator;
use crate::id_mapping::{IdProjection, StrToNodeMapping};
use crate::sink::JsonSink;
use crate::sort::{sort_array, sort_array_fields};
use crate::source::ReaderSource;
use crate::v4::{decode_edge_meta, decode_meta_into, encode_meta, header_with_graph_meta, parse_node_fields};
use crate::{McgReader, McgWriter};

/// Writes graphs in the version 3 format.
#[derive(Debug, Clone)]
pub struct VersionThreeWriter {
    info: FileInfo,
    export_sorted: bool,
    debug: bool,
}

impl Default for VersionThreeWriter {
    fn default() -> Self {
        VersionThreeWriter::new(FileInfo::for_version(FormatVersion::V3))
    }
}

impl VersionThreeWriter {
    pub fn new(info: FileInfo) -> Self {
        VersionThreeWriter {
            info,
            export_sorted: false,
            debug: false,
        }
    }

    pub fn export_sorted(mut self, enabled: bool) -> Self {
        self.export_sorted = enabled;
        self
    }

    /// Emit the human-readable debug variant.
    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    fn hash_ids(graph: &Graph) -> (IdProjection, Vec<(NodeId, u64)>) {
        let mut alloc = IdAllocator::new();
        let hashes: Vec<_> = graph
            .nodes()
            .map(|node| (node.id(), alloc.allocate(node.function_name(), node.origin())))
            .collect();
        let ids = IdProjection::from_pairs(hashes.iter().map(|(id, hash)| (*id, hash.to_string())));
        (ids, hashes)
    }
}

impl McgWriter for VersionThreeWriter {
    fn write(&self, graph: &Graph, sink: &mut JsonSink) -> Result<(), FormatError> {
        let (ids, hashes) = Self::hash_ids(graph);

        let mut nodes = Vec::with_capacity(hashes.len());
        let mut name_of: HashMap<u64, &str> = HashMap::with_capacity(hashes.len());
        for (id, hash) in &hashes {
            let node = graph.node(*id).ok_or(CoreError::NodeNotFound { id: *id })?;
            let meta = encode_meta(&node.meta, &ids, self.export_sorted)?;
            let mut entry = json!({
                "functionName": node.function_name(),
                "hasBody": node.has_body(),
                "meta": if meta.is_empty() { Value::Null } else { Value::Object(meta) },
                "origin": node.origin(),
            });
            if self.debug {
                let names = |list: Vec<NodeId>| -> Vec<Value> {
                    list.into_iter()
                        .filter_map(|other| graph.node(other))
                        .map(|other| Value::from(other.function_name()))
                        .collect()
                };
                if let Value::Object(fields) = &mut entry {
                    fields.insert("callers".into(), Value::Array(names(graph.callers(*id))));
                    fields.insert("calleeNames".into(), Value::Array(names(graph.callees(*id))));
                }
                if self.export_sorted {
                    sort_array_fields(&mut entry);
                }
                name_of.insert(*hash, node.function_name());
            }
            nodes.push(json!([hash, entry]));
        }
        let hash_of: HashMap<NodeId, u64> = hashes.iter().copied().collect();
        let mut edges = Vec::with_capacity(graph.edge_count());
        for (edge, meta) in graph.edges() {
            let meta = encode_meta(meta, &ids, self.export_sorted)?;
            let caller = hash_of
                .get(&edge.caller)
                .ok_or(CoreError::NodeNotFound { id: edge.caller })?;
            let callee = hash_of
                .get(&edge.callee)
                .ok_or(CoreError::NodeNotFound { id: edge.callee })?;
            let meta = if meta.is_empty() { Value::Null } else { Value::Object(meta) };
            edges.push(json!([[caller, callee], meta]));
        }

        // Sort on numeric ids before substituting names: the debug reader
        // re-allocates colliding hashes in file order.
        if self.export_sorted {
            sort_array(&mut nodes);
            sort_array(&mut edges);
        }
        if self.debug {
            for entry in &mut nodes {
                let Some(slot) = entry.get_mut(0) else { continue };
                if let Some(name) = slot.as_u64().and_then(|hash| name_of.get(&hash)) {
                    *slot = Value::from(*name);
                }
            }
        }

        let header = header_with_graph_meta(&self.info, graph, &ids, self.export_sorted)?;
        sink.set_json(json!({
            META_INFO_FIELD: header,
            CG_FIELD: {"nodes": nodes, "edges": edges},
        }));
        tracing::debug!(nodes = graph.size(), edges = graph.edge_count(), debug = self.debug, "wrote version 3 graph");
        Ok(())
    }
}

/// Reads version 3 files, including the debug variant.
pub struct VersionThreeReader {
    source: Box<dyn ReaderSource>,
    registry: MetadataRegistry,
}

impl VersionThreeReader {
    pub fn new(source: Box<dyn ReaderSource>) -> Self {
        VersionThreeReader {
            source,
            registry: global_snapshot(),
        }
    }

    pub fn with_registry(mut self, registry: MetadataRegistry) -> Self {
        self.registry = registry;
        self
    }
}

fn array_field<'a>(cg: &'a Value, field: &str) -> Result<&'a Vec<Value>, FormatError> {
    cg.get(field)
        .and_then(Value::as_array)
        .ok_or_else(|| FormatError::Malformed {
            reason: format!("'{field}' must be present and an array"),
        })
}

fn malformed(reason: impl Into<String>) -> FormatError {
    FormatError::Malformed { reason: reason.into() }
}

impl McgReader for VersionThreeReader {
    fn read(&mut self) -> Result<Graph, FormatError> {
        let doc = self.source.get()?;
        let info = MetaInfo::from_document(&doc)?;
        info.expect_major(3)?;
        let cg = section(&doc, CG_FIELD)?;
        let nodes = array_field(cg, "nodes")?;
        let edges = array_field(cg, "edges")?;

        let debug = nodes
            .first()
            .and_then(|entry| entry.get(0))
            .is_some_and(Value::is_string);
        if debug {
            tracing::info!("reading debug variant, recomputing node hashes");
        }

        let mut graph = Graph::new();
        let mut ids = StrToNodeMapping::new();
        let mut alloc = IdAllocator::new();
        let mut pending = Vec::with_capacity(nodes.len());
        for entry in nodes {
            let (key, body) = match entry.as_array().map(Vec::as_slice) {
                Some([key, body]) => (key, body),
                _ => return Err(malformed("node entries must be [id, node] pairs")),
            };
            let label = match key {
                Value::String(name) => name.clone(),
                other => other.to_string(),
            };
            let fields = parse_node_fields(&label, body)?;
            let text = if debug {
                alloc.allocate(fields.name, fields.origin.as_deref()).to_string()
            } else {
                key.as_u64()
                    .ok_or_else(|| malformed(format!("node id {key} is not an unsigned integer")))?
                    .to_string()
            };
            let id = graph.insert(fields.name, fields.origin, false, fields.has_body);
            ids.register(text, id)?;
            pending.push((id, fields.meta));
        }

        let mut edge_meta = Vec::new();
        for entry in edges {
            let (pair, meta) = match entry.as_array().map(Vec::as_slice) {
                Some([pair, meta]) => (pair, meta),
                _ => return Err(malformed("edge entries must be [[caller, callee], meta] pairs")),
            };
            let (caller_text, callee_text) = match pair.as_array().map(Vec::as_slice) {
                Some([caller, callee]) => (caller.to_string(), callee.to_string()),
                _ => return Err(malformed("edge endpoints must be a two-element array")),
            };
            let caller = ids
                .get(&caller_text)
                .ok_or_else(|| malformed(format!("edge from undefined node {caller_text}")))?;
            let callee = ids.get(&callee_text).ok_or_else(|| FormatError::UnknownCallee {
                caller: caller_text.clone(),
                callee: callee_text.clone(),
            })?;
            graph.add_edge(caller, callee)?;
            match meta {
                Value::Null => {}
                Value::Object(meta) => edge_meta.push((caller, callee, meta)),
                _ => return Err(malformed(format!("metadata of edge {caller_text}->{callee_text} must be an object"))),
            }
        }

        for (id, meta) in pending {
            if let Some(meta) = meta {
                let node = graph.node_mut(id).ok_or(CoreError::NodeNotFound { id })?;
                decode_meta_into(&mut node.meta, meta, &self.registry, &ids)?;
            }
        }
        for (caller, callee, meta) in edge_meta {
            decode_edge_meta(&mut graph, caller, callee, meta, &self.registry, &ids)?;
        }
        if let Some(meta) = info.graph_meta() {
            decode_meta_into(graph.meta_mut(), meta, &self.registry, &ids)?;
        }

        tracing::debug!(nodes = graph.size(), edges = graph.edge_count(), "read version 3 graph");
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::GeneratorInfo;
    use crate::hash::node_hash;
    use crate::source::JsonSource;
    use metacg_core::metadata::NumStatementsMd;

    fn info() -> FileInfo {
        FileInfo::new(FormatVersion::V3, GeneratorInfo::new("Test", 0, 1, "TestSha"))
    }

    fn sample() -> Graph {
        let mut g = Graph::new();
        let main = g.insert("main", Some("main.cpp".into()), false, true);
        let foo = g.insert_named("foo");
        let bar = g.insert_named("bar");
        g.add_edge(main, foo).unwrap();
        g.add_edge(main, bar).unwrap();
        g.add_edge(foo, bar).unwrap();
        g.node_mut(foo).unwrap().meta.insert(NumStatementsMd::new(3)).unwrap();
        g
    }

    fn read(doc: Value) -> Result<Graph, FormatError> {
        VersionThreeReader::new(Box::new(JsonSource::new(doc)))
            .with_registry(MetadataRegistry::with_builtins())
            .read()
    }

    #[test]
    fn nodes_are_keyed_by_hash() {
        let mut sink = JsonSink::new();
        VersionThreeWriter::new(info()).write(&sample(), &mut sink).unwrap();
        let nodes = sink.json()["_CG"]["nodes"].as_array().unwrap();
        let main_hash = node_hash("main", Some("main.cpp"));
        assert_eq!(
            nodes[0],
            json!([main_hash, {"functionName": "main", "hasBody": true, "meta": null, "origin": "main.cpp"}])
        );
        assert_eq!(nodes[1][1]["meta"], json!({"numStatements": 3}));
        assert_eq!(sink.json()["_CG"]["edges"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn round_trip_normal_and_debug() {
        for debug in [false, true] {
            let mut sink = JsonSink::new();
            VersionThreeWriter::new(info())
                .debug(debug)
                .export_sorted(true)
                .write(&sample(), &mut sink)
                .unwrap();
            let g = read(sink.into_json()).unwrap();
            assert_eq!(g.size(), 3);
            assert_eq!(g.edge_count(), 3);
            assert!(g.exists_any_edge("main", "foo"));
            assert!(g.exists_any_edge("foo", "bar"));
            let foo = g.single_node("foo").unwrap();
            assert_eq!(g.node(foo).unwrap().meta.get::<NumStatementsMd>().unwrap().count(), 3);
            assert_eq!(g.main_node().unwrap().origin(), Some("main.cpp"));
        }
    }

    #[test]
    fn debug_variant_lists_names() {
        let mut sink = JsonSink::new();
        VersionThreeWriter::new(info())
            .debug(true)
            .export_sorted(true)
            .write(&sample(), &mut sink)
            .unwrap();
        let nodes = sink.json()["_CG"]["nodes"].as_array().unwrap();
        let bar = nodes.iter().find(|n| n[0] == json!("bar")).unwrap();
        assert_eq!(bar[1]["callers"], json!(["foo", "main"]));
        assert_eq!(bar[1]["calleeNames"], json!([]));
        let main = nodes.iter().find(|n| n[0] == json!("main")).unwrap();
        assert_eq!(main[1]["calleeNames"], json!(["bar", "foo"]));
    }

    #[test]
    fn debug_variant_keeps_same_named_nodes_apart() {
        let mut g = Graph::new();
        let main = g.insert_named("main");
        let defined = g.insert("f", None, false, true);
        let leaf = g.insert_named("leaf");
        g.insert("f", None, false, false);
        g.add_edge(main, defined).unwrap();
        g.add_edge(defined, leaf).unwrap();

        for sorted in [false, true] {
            let mut sink = JsonSink::new();
            VersionThreeWriter::new(info())
                .debug(true)
                .export_sorted(sorted)
                .write(&g, &mut sink)
                .unwrap();
            let back = read(sink.into_json()).unwrap();
            assert_eq!(back.size(), 4);
            let leaf = back.single_node("leaf").unwrap();
            let callers = back.callers(leaf);
            assert_eq!(callers.len(), 1);
            assert!(back.node(callers[0]).unwrap().has_body());
            let bodies: Vec<bool> = back
                .node_ids_by_name("f")
                .iter()
                .map(|&id| back.node(id).unwrap().has_body())
                .collect();
            assert_eq!(bodies.iter().filter(|b| **b).count(), 1);
        }
    }

    #[test]
    fn debug_variant_reads_back_empty_origins() {
        let mut g = Graph::new();
        let main = g.insert("main", Some(String::new()), false, true);
        let f = g.insert("f", Some(String::new()), false, true);
        g.add_edge(main, f).unwrap();

        let mut sink = JsonSink::new();
        VersionThreeWriter::new(info()).debug(true).write(&g, &mut sink).unwrap();
        let back = read(sink.into_json()).unwrap();
        assert!(back.exists_any_edge("main", "f"));
        assert_eq!(back.main_node().unwrap().origin(), None);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let doc = json!({
            "_MetaCG": {"version": "3.0", "generator": {"name": "t", "version": "1.0"}},
            "_CG": {
                "nodes": [
                    [1, {"functionName": "a", "hasBody": true, "meta": null, "origin": null}],
                    [1, {"functionName": "b", "hasBody": true, "meta": null, "origin": null}]
                ],
                "edges": []
            }
        });
        assert!(matches!(read(doc), Err(FormatError::DuplicateNodeId { id }) if id == "1"));
    }

    #[test]
    fn missing_arrays_and_dangling_edges() {
        let no_edges = json!({
            "_MetaCG": {"version": "3.0", "generator": {"name": "t", "version": "1.0"}},
            "_CG": {"nodes": []}
        });
        assert!(matches!(read(no_edges), Err(FormatError::Malformed { .. })));

        let dangling = json!({
            "_MetaCG": {"version": "3.0", "generator": {"name": "t", "version": "1.0"}},
            "_CG": {
                "nodes": [[1, {"functionName": "a", "hasBody": true, "meta": null, "origin": null}]],
                "edges": [[[1, 2], null]]
            }
        });
        assert!(matches!(read(dangling), Err(FormatError::UnknownCallee { callee, .. }) if callee == "2"));
    }
}
