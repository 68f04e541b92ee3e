//! Graph merging.
//!
//! [`merge`] folds a source graph into a destination graph in four phases:
//!
//! 1. **Match**: the [`MergePolicy`] looks for a destination node for every
//!    source node and returns a [`MergeAction`] when it finds one.
//! 2. **Materialize**: unmatched nodes are copied; matched nodes keep or take
//!    over the core attributes depending on [`MergeAction::replace`].
//! 3. **Edges**: every source edge is re-inserted between mapped endpoints.
//! 4. **Metadata**: node, edge and graph metadata are merged key by key, or
//!    copied with node ids rewritten through the resulting [`GraphMapping`].
//!
//! The [`MergeRecorder`] returned to the caller holds the decision taken for
//! every matched node and the complete source-to-destination id mapping.

use std::collections::HashMap;

use crate::error::CoreError;
use crate::graph::Graph;
use crate::id::NodeId;
use crate::metadata::MetadataMap;
use crate::node::CgNode;

/// Decision for one matched source node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeAction {
    /// Destination node the source node merges into.
    pub target: NodeId,
    /// Overwrite the destination's core attributes with the source's.
    pub replace: bool,
}

/// Source id to destination id table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphMapping {
    ids: HashMap<NodeId, NodeId>,
}

impl GraphMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, src: NodeId, dst: NodeId) {
        self.ids.insert(src, dst);
    }

    pub fn get(&self, src: NodeId) -> Option<NodeId> {
        self.ids.get(&src).copied()
    }

    /// Like [`get`](Self::get), failing with [`CoreError::UnmappedNode`].
    pub fn map(&self, src: NodeId) -> Result<NodeId, CoreError> {
        self.get(src).ok_or(CoreError::UnmappedNode { id: src })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.ids.iter().map(|(s, d)| (*s, *d))
    }
}

/// Record of one merge run.
#[derive(Debug, Clone, Default)]
pub struct MergeRecorder {
    actions: HashMap<NodeId, MergeAction>,
    mapping: GraphMapping,
}

impl MergeRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `src` matched and the action chosen for it.
    pub fn record_action(&mut self, src: NodeId, action: MergeAction) {
        self.actions.insert(src, action);
        self.mapping.insert(src, action.target);
    }

    /// Records that `src` was copied to the fresh node `dst`.
    pub fn record_copy(&mut self, src: NodeId, dst: NodeId) {
        self.mapping.insert(src, dst);
    }

    /// The action taken for `src`, or `None` if it was copied.
    pub fn action(&self, src: NodeId) -> Option<&MergeAction> {
        self.actions.get(&src)
    }

    pub fn matched_count(&self) -> usize {
        self.actions.len()
    }

    pub fn copied_count(&self) -> usize {
        self.mapping.len() - self.actions.len()
    }

    pub fn mapping(&self) -> &GraphMapping {
        &self.mapping
    }

    pub fn into_mapping(self) -> GraphMapping {
        self.mapping
    }
}

/// Strategy for finding the destination counterpart of a source node.
pub trait MergePolicy {
    fn find_matching_node(&self, dst: &Graph, node: &CgNode) -> Option<MergeAction>;
}

/// Matches nodes by function name.
///
/// With several destination candidates the first in name-index order is
/// used and a warning is logged; that tie-break is not a stable contract.
/// For a match, the destination wins if it already has a body or the source
/// has none; otherwise the source replaces it. A replacing node supplies
/// `has_body`, marks the target virtual if it is virtual itself, and
/// supplies its origin when it has one.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeByName;

impl MergePolicy for MergeByName {
    fn find_matching_node(&self, dst: &Graph, node: &CgNode) -> Option<MergeAction> {
        let candidates = dst.node_ids_by_name(node.function_name());
        let &target = candidates.first()?;
        if candidates.len() > 1 {
            tracing::warn!(
                name = node.function_name(),
                count = candidates.len(),
                "several merge candidates share this name, merging with the first"
            );
        }
        let dst_node = dst.node(target)?;
        let replace = !dst_node.has_body() && node.has_body();
        Some(MergeAction { target, replace })
    }
}

/// Merges `src` into `dst` using `policy`.
pub fn merge(
    dst: &mut Graph,
    src: &Graph,
    policy: &dyn MergePolicy,
) -> Result<MergeRecorder, CoreError> {
    let mut recorder = MergeRecorder::new();

    // Phase 1: match everything before touching the destination, so source
    // nodes never match nodes copied during this merge.
    let matches: Vec<(NodeId, Option<MergeAction>)> = src
        .nodes()
        .map(|node| (node.id(), policy.find_matching_node(dst, node)))
        .collect();

    // Phase 2
    for (src_id, action) in matches {
        let src_node = src.node(src_id).ok_or(CoreError::NodeNotFound { id: src_id })?;
        match action {
            Some(action) => {
                if action.replace {
                    let dst_node = dst
                        .node_mut(action.target)
                        .ok_or(CoreError::NodeNotFound { id: action.target })?;
                    dst_node.has_body = src_node.has_body();
                    // Override metadata is only ever added here; phase 4
                    // merges the lists.
                    if src_node.is_virtual() {
                        dst_node.set_virtual(true);
                    }
                    if src_node.origin.is_some() {
                        dst_node.origin = src_node.origin.clone();
                    }
                }
                recorder.record_action(src_id, action);
            }
            None => {
                let new_id = dst.insert(
                    src_node.function_name(),
                    src_node.origin.clone(),
                    false,
                    src_node.has_body(),
                );
                recorder.record_copy(src_id, new_id);
            }
        }
    }

    // Phase 3
    let mapping = recorder.mapping().clone();
    for (edge, _) in src.edges() {
        dst.add_edge(mapping.map(edge.caller)?, mapping.map(edge.callee)?)?;
    }

    // Phase 4
    for node in src.nodes() {
        let target = mapping.map(node.id())?;
        let action = recorder.action(node.id());
        let dst_node = dst
            .node_mut(target)
            .ok_or(CoreError::NodeNotFound { id: target })?;
        merge_metadata(&mut dst_node.meta, &node.meta, action, &mapping)?;
    }
    for (edge, src_meta) in src.edges() {
        let (caller, callee) = (mapping.map(edge.caller)?, mapping.map(edge.callee)?);
        let dst_meta = dst
            .edge_meta_mut(caller, callee)
            .ok_or(CoreError::EdgeNotFound { id: (caller, callee).into() })?;
        merge_metadata(dst_meta, src_meta, None, &mapping)?;
    }
    merge_metadata(dst.meta_mut(), src.meta(), None, &mapping)?;

    debug_assert!(dst.is_consistent(), "graph indices out of sync after merge");

    tracing::debug!(
        matched = recorder.matched_count(),
        copied = recorder.copied_count(),
        "merged graph"
    );
    Ok(recorder)
}

fn merge_metadata(
    dst: &mut MetadataMap,
    src: &MetadataMap,
    action: Option<&MergeAction>,
    mapping: &GraphMapping,
) -> Result<(), CoreError> {
    for (key, src_md) in src.iter() {
        match dst.get_dyn_mut(key) {
            Some(dst_md) => dst_md.merge(src_md, action, mapping)?,
            None => {
                let mut copy = src_md.clone_box();
                copy.apply_mapping(mapping)?;
                dst.add(copy)?;
            }
        }
    }
    Ok(())
}
