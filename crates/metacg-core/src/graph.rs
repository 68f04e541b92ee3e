//! Graph: the call-graph container.
//!
//! [`Graph`] owns every node, every edge and all attached metadata. Nodes
//! live in a petgraph `StableGraph` and are addressed only by [`NodeId`];
//! edges carry their [`MetadataMap`] as the edge weight. Two side indices are
//! maintained on every mutation:
//!
//! - an edge index from the `(caller, callee)` pair to the petgraph edge, so
//!   parallel edges are never created and edge lookups do not scan adjacency
//!   lists;
//! - a name index from function name to every node carrying that name, in
//!   insertion order.
//!
//! Nodes and edges cannot be removed individually. [`Graph::clear`] resets
//! the whole container in place.

use std::collections::{BTreeMap, HashMap};

use petgraph::graph::EdgeIndex;
use petgraph::stable_graph::StableGraph;
use petgraph::{Directed, Direction};
use smallvec::SmallVec;

use crate::error::CoreError;
use crate::id::{EdgeId, NodeId};
use crate::merge::{MergePolicy, MergeRecorder};
use crate::metadata::{Metadata, MetadataKind, MetadataMap};
use crate::node::{known_origin, CgNode};

/// Function names recognised as the program entry.
pub const MAIN_NAMES: [&str; 3] = ["main", "_Z4main", "_ZSt4mainiPPc"];

type NameList = SmallVec<[NodeId; 1]>;

/// Whole-program call graph.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    inner: StableGraph<CgNode, MetadataMap, Directed, u32>,
    edge_index: BTreeMap<EdgeId, EdgeIndex<u32>>,
    name_index: HashMap<String, NameList>,
    has_duplicate_names: bool,
    main: Option<NodeId>,
    meta: MetadataMap,
    /// Bumped on every structural mutation.
    generation: u64,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Node insertion
    // -----------------------------------------------------------------------

    /// Inserts a new node, even if a node with the same name exists.
    ///
    /// An empty or `unknownOrigin` origin is stored as `None`.
    pub fn insert(
        &mut self,
        function_name: impl Into<String>,
        origin: Option<String>,
        is_virtual: bool,
        has_body: bool,
    ) -> NodeId {
        let function_name = function_name.into();
        let mut node = CgNode::new(NodeId(0), function_name.clone(), known_origin(origin));
        node.has_body = has_body;
        node.set_virtual(is_virtual);
        let idx = self.inner.add_node(node);
        let id = NodeId::from(idx);
        self.inner[idx].id = id;

        if MAIN_NAMES.contains(&function_name.as_str()) {
            match self.main {
                None => self.main = Some(id),
                Some(existing) => tracing::warn!(
                    name = %function_name,
                    existing = %existing,
                    "multiple main nodes, keeping the first"
                ),
            }
        }

        let ids = self.name_index.entry(function_name).or_default();
        ids.push(id);
        if ids.len() > 1 {
            self.has_duplicate_names = true;
        }

        self.generation += 1;
        id
    }

    /// Shorthand for [`insert`](Self::insert) with default flags.
    pub fn insert_named(&mut self, function_name: impl Into<String>) -> NodeId {
        self.insert(function_name, None, false, false)
    }

    /// Returns the first node named `function_name`, inserting one if none
    /// exists.
    pub fn get_or_insert_node(
        &mut self,
        function_name: &str,
        origin: Option<String>,
    ) -> NodeId {
        if let Some(ids) = self.name_index.get(function_name) {
            if ids.len() > 1 {
                tracing::warn!(
                    name = function_name,
                    count = ids.len(),
                    "ambiguous name lookup, using the first node"
                );
            }
            if let Some(&first) = ids.first() {
                return first;
            }
        }
        self.insert(function_name, origin, false, false)
    }

    // -----------------------------------------------------------------------
    // Node lookup
    // -----------------------------------------------------------------------

    pub fn node(&self, id: NodeId) -> Option<&CgNode> {
        self.inner.node_weight(id.into())
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut CgNode> {
        self.inner.node_weight_mut(id.into())
    }

    pub fn has_node(&self, id: NodeId) -> bool {
        self.inner.contains_node(id.into())
    }

    /// All nodes named `function_name`, in insertion order.
    pub fn node_ids_by_name(&self, function_name: &str) -> &[NodeId] {
        self.name_index
            .get(function_name)
            .map(|ids| ids.as_slice())
            .unwrap_or(&[])
    }

    /// The node named `function_name` if exactly one exists.
    pub fn single_node(&self, function_name: &str) -> Option<NodeId> {
        match self.node_ids_by_name(function_name) {
            [id] => Some(*id),
            _ => None,
        }
    }

    /// True if any name is carried by more than one node.
    pub fn has_duplicate_names(&self) -> bool {
        self.has_duplicate_names
    }

    /// The program entry node, if one was inserted.
    pub fn main(&self) -> Option<NodeId> {
        self.main
    }

    pub fn main_node(&self) -> Option<&CgNode> {
        self.main.and_then(|id| self.node(id))
    }

    /// Iterates nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &CgNode> {
        self.inner.node_indices().map(move |idx| &self.inner[idx])
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.inner.node_indices().map(NodeId::from)
    }

    pub fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    /// Alias of [`node_count`](Self::node_count).
    pub fn size(&self) -> usize {
        self.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.node_count() == 0
    }

    /// Counter incremented on every node or edge insertion and on clear.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    // -----------------------------------------------------------------------
    // Edges
    // -----------------------------------------------------------------------

    /// Adds the edge `caller -> callee`.
    ///
    /// Returns `Ok(false)` if the edge already exists. Both ids must belong
    /// to this graph.
    pub fn add_edge(&mut self, caller: NodeId, callee: NodeId) -> Result<bool, CoreError> {
        for id in [caller, callee] {
            if !self.has_node(id) {
                return Err(CoreError::NodeNotFound { id });
            }
        }
        let key = EdgeId::new(caller, callee);
        if self.edge_index.contains_key(&key) {
            return Ok(false);
        }
        let idx = self
            .inner
            .add_edge(caller.into(), callee.into(), MetadataMap::new());
        self.edge_index.insert(key, idx);
        self.generation += 1;
        Ok(true)
    }

    /// Adds an edge between two names, each of which must resolve to exactly
    /// one node. Returns false otherwise or if the edge exists.
    pub fn add_edge_by_name(&mut self, caller: &str, callee: &str) -> bool {
        match (self.single_node(caller), self.single_node(callee)) {
            (Some(from), Some(to)) => self.add_edge(from, to).unwrap_or(false),
            _ => {
                tracing::debug!(caller, callee, "edge by name skipped, names are missing or ambiguous");
                false
            }
        }
    }

    pub fn exists_edge(&self, caller: NodeId, callee: NodeId) -> bool {
        self.edge_index.contains_key(&EdgeId::new(caller, callee))
    }

    /// True if any node named `caller` has an edge to any node named `callee`.
    pub fn exists_any_edge(&self, caller: &str, callee: &str) -> bool {
        let callees = self.node_ids_by_name(callee);
        self.node_ids_by_name(caller)
            .iter()
            .any(|&from| callees.iter().any(|&to| self.exists_edge(from, to)))
    }

    /// Callees of `id`, sorted by id. Empty for unknown ids.
    pub fn callees(&self, id: NodeId) -> Vec<NodeId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Callers of `id`, sorted by id. Empty for unknown ids.
    pub fn callers(&self, id: NodeId) -> Vec<NodeId> {
        self.neighbors(id, Direction::Incoming)
    }

    fn neighbors(&self, id: NodeId, dir: Direction) -> Vec<NodeId> {
        if !self.has_node(id) {
            return Vec::new();
        }
        let mut out: Vec<NodeId> = self
            .inner
            .neighbors_directed(id.into(), dir)
            .map(NodeId::from)
            .collect();
        out.sort_unstable();
        out
    }

    /// Iterates edges ordered by `(caller, callee)`.
    pub fn edges(&self) -> impl Iterator<Item = (EdgeId, &MetadataMap)> {
        self.edge_index
            .iter()
            .map(move |(id, idx)| (*id, &self.inner[*idx]))
    }

    pub fn edge_count(&self) -> usize {
        self.edge_index.len()
    }

    // -----------------------------------------------------------------------
    // Metadata
    // -----------------------------------------------------------------------

    /// Metadata of the edge `caller -> callee`.
    pub fn edge_meta(&self, caller: NodeId, callee: NodeId) -> Option<&MetadataMap> {
        let idx = self.edge_index.get(&EdgeId::new(caller, callee))?;
        self.inner.edge_weight(*idx)
    }

    pub fn edge_meta_mut(&mut self, caller: NodeId, callee: NodeId) -> Option<&mut MetadataMap> {
        let idx = self.edge_index.get(&EdgeId::new(caller, callee))?;
        self.inner.edge_weight_mut(*idx)
    }

    /// Attaches metadata to an existing edge.
    ///
    /// Fails if the edge does not exist or already holds the same key.
    pub fn add_edge_metadata(
        &mut self,
        caller: NodeId,
        callee: NodeId,
        md: Box<dyn Metadata>,
    ) -> Result<(), CoreError> {
        let id = EdgeId::new(caller, callee);
        self.edge_meta_mut(caller, callee)
            .ok_or(CoreError::EdgeNotFound { id })?
            .add(md)
    }

    /// Typed edge metadata lookup.
    pub fn edge_metadata<T: MetadataKind>(&self, caller: NodeId, callee: NodeId) -> Option<&T> {
        self.edge_meta(caller, callee)?.get::<T>()
    }

    pub fn has_edge_metadata<T: MetadataKind>(&self, caller: NodeId, callee: NodeId) -> bool {
        self.edge_metadata::<T>(caller, callee).is_some()
    }

    /// Graph-level metadata.
    pub fn meta(&self) -> &MetadataMap {
        &self.meta
    }

    pub fn meta_mut(&mut self) -> &mut MetadataMap {
        &mut self.meta
    }

    // -----------------------------------------------------------------------
    // Whole-graph operations
    // -----------------------------------------------------------------------

    /// Empties the graph in place. Existing node ids become invalid.
    pub fn clear(&mut self) {
        self.inner.clear();
        self.edge_index.clear();
        self.name_index.clear();
        self.has_duplicate_names = false;
        self.main = None;
        self.meta.clear();
        self.generation += 1;
    }

    /// Merges `src` into this graph. See [`crate::merge::merge`].
    pub fn merge(
        &mut self,
        src: &Graph,
        policy: &dyn MergePolicy,
    ) -> Result<MergeRecorder, CoreError> {
        crate::merge::merge(self, src, policy)
    }

    /// Returns true if the edge and name indices agree with the petgraph
    /// storage.
    pub fn is_consistent(&self) -> bool {
        if self.edge_index.len() != self.inner.edge_count() {
            return false;
        }
        let edges_ok = self.edge_index.iter().all(|(id, idx)| {
            self.inner
                .edge_endpoints(*idx)
                .map(|(from, to)| (NodeId::from(from), NodeId::from(to)))
                == Some((id.caller, id.callee))
        });
        let indexed: usize = self.name_index.values().map(|ids| ids.len()).sum();
        edges_ok && indexed == self.inner.node_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{NumStatementsMd, OverrideMd};

    fn chain() -> (Graph, NodeId, NodeId, NodeId) {
        let mut g = Graph::new();
        let main = g.insert("main", None, false, true);
        let foo = g.insert("foo", None, false, false);
        let bar = g.insert("bar", None, false, true);
        g.add_edge(main, foo).unwrap();
        (g, main, foo, bar)
    }

    #[test]
    fn insert_always_creates_a_node() {
        let mut g = Graph::new();
        let a = g.insert("overload", Some("a.cpp".into()), false, true);
        assert!(!g.has_duplicate_names());
        let b = g.insert("overload", Some("b.cpp".into()), false, false);
        assert_ne!(a, b);
        assert_eq!(g.size(), 2);
        assert!(g.has_duplicate_names());
        assert_eq!(g.node_ids_by_name("overload"), &[a, b]);
        assert_eq!(g.node(b).unwrap().origin(), Some("b.cpp"));
    }

    #[test]
    fn insert_drops_placeholder_origins() {
        let mut g = Graph::new();
        let empty = g.insert("f", Some(String::new()), false, true);
        let sentinel = g.insert("g", Some("unknownOrigin".into()), false, true);
        assert_eq!(g.node(empty).unwrap().origin(), None);
        assert_eq!(g.node(sentinel).unwrap().origin(), None);
    }

    #[test]
    fn corrupted_edge_index_is_detected() {
        let (mut g, ..) = chain();
        assert!(g.is_consistent());
        g.edge_index.clear();
        assert!(!g.is_consistent());
    }

    #[test]
    fn insert_sets_flags() {
        let mut g = Graph::new();
        let id = g.insert("v", None, true, true);
        let node = g.node(id).unwrap();
        assert_eq!(node.id(), id);
        assert!(node.is_virtual());
        assert!(node.has_body());
        assert!(node.meta.has_kind::<OverrideMd>());
    }

    #[test]
    fn main_detection() {
        let mut g = Graph::new();
        g.insert_named("foo");
        assert_eq!(g.main(), None);
        let m = g.insert_named("_Z4main");
        assert_eq!(g.main(), Some(m));
        g.insert_named("main");
        assert_eq!(g.main(), Some(m));
        assert_eq!(g.main_node().unwrap().function_name(), "_Z4main");
    }

    #[test]
    fn get_or_insert_node_reuses_first_match() {
        let mut g = Graph::new();
        let first = g.insert_named("f");
        g.insert_named("f");
        assert_eq!(g.get_or_insert_node("f", None), first);
        let fresh = g.get_or_insert_node("g", Some("g.c".into()));
        assert_eq!(g.node(fresh).unwrap().origin(), Some("g.c"));
        assert_eq!(g.size(), 3);
    }

    #[test]
    fn add_edge_deduplicates() {
        let (mut g, main, foo, _) = chain();
        assert!(!g.add_edge(main, foo).unwrap());
        assert_eq!(g.edge_count(), 1);
        assert!(g.exists_edge(main, foo));
        assert!(!g.exists_edge(foo, main));
        assert!(g.is_consistent());
    }

    #[test]
    fn add_edge_with_unknown_node_is_an_error() {
        let (mut g, main, _, _) = chain();
        let err = g.add_edge(main, NodeId(99)).unwrap_err();
        assert!(matches!(err, CoreError::NodeNotFound { id } if id == NodeId(99)));
    }

    #[test]
    fn add_edge_by_name_requires_unique_names() {
        let (mut g, _, foo, bar) = chain();
        assert!(g.add_edge_by_name("foo", "bar"));
        assert!(g.exists_edge(foo, bar));
        assert!(!g.add_edge_by_name("foo", "missing"));

        g.insert_named("bar");
        assert!(!g.add_edge_by_name("main", "bar"));
    }

    #[test]
    fn exists_any_edge_checks_all_like_named_pairs() {
        let mut g = Graph::new();
        let a1 = g.insert_named("a");
        let _a2 = g.insert_named("a");
        let _b1 = g.insert_named("b");
        let b2 = g.insert_named("b");
        assert!(!g.exists_any_edge("a", "b"));
        g.add_edge(a1, b2).unwrap();
        assert!(g.exists_any_edge("a", "b"));
        assert!(!g.exists_any_edge("b", "a"));
    }

    #[test]
    fn adjacency_queries() {
        let (mut g, main, foo, bar) = chain();
        g.add_edge(main, bar).unwrap();
        g.add_edge(bar, foo).unwrap();
        assert_eq!(g.callees(main), vec![foo, bar]);
        assert_eq!(g.callers(foo), vec![main, bar]);
        assert!(g.callees(NodeId(42)).is_empty());
    }

    #[test]
    fn edge_metadata_rejects_duplicates_and_missing_edges() {
        let (mut g, main, foo, bar) = chain();
        g.add_edge_metadata(main, foo, Box::new(NumStatementsMd::new(1)))
            .unwrap();
        assert!(g.has_edge_metadata::<NumStatementsMd>(main, foo));
        assert_eq!(
            g.edge_metadata::<NumStatementsMd>(main, foo).unwrap().count(),
            1
        );

        let dup = g.add_edge_metadata(main, foo, Box::new(NumStatementsMd::new(2)));
        assert!(matches!(dup, Err(CoreError::DuplicateMetadata { .. })));

        let missing = g.add_edge_metadata(foo, bar, Box::new(NumStatementsMd::new(2)));
        assert!(matches!(missing, Err(CoreError::EdgeNotFound { .. })));
    }

    #[test]
    fn edges_iterate_in_pair_order() {
        let (mut g, main, foo, bar) = chain();
        g.add_edge(bar, main).unwrap();
        g.add_edge(main, bar).unwrap();
        let ids: Vec<EdgeId> = g.edges().map(|(id, _)| id).collect();
        assert_eq!(
            ids,
            vec![
                EdgeId::new(main, foo),
                EdgeId::new(main, bar),
                EdgeId::new(bar, main)
            ]
        );
    }

    #[test]
    fn clear_resets_in_place() {
        let (mut g, _, _, _) = chain();
        g.meta_mut().insert(NumStatementsMd::new(1)).unwrap();
        let before = g.generation();
        g.clear();
        assert!(g.is_empty());
        assert_eq!(g.edge_count(), 0);
        assert_eq!(g.main(), None);
        assert!(g.meta().is_empty());
        assert!(g.node_ids_by_name("main").is_empty());
        assert!(g.generation() > before);

        let again = g.insert_named("main");
        assert_eq!(g.main(), Some(again));
        assert!(g.is_consistent());
    }

    #[test]
    fn generation_tracks_structural_changes() {
        let (mut g, main, foo, _) = chain();
        let g0 = g.generation();
        g.add_edge(main, foo).unwrap();
        assert_eq!(g.generation(), g0);
        g.node_mut(foo).unwrap().set_has_body(true);
        assert_eq!(g.generation(), g0);
        g.add_edge(foo, main).unwrap();
        assert_eq!(g.generation(), g0 + 1);
    }
}
