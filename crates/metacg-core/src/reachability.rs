//! Reachability queries over the callee relation.
//!
//! [`ReachabilityAnalysis`] memoizes one BFS result per source node. Each
//! cached set remembers the [`Graph::generation`] it was computed for and is
//! recomputed transparently once the graph has changed; `force_update`
//! recomputes unconditionally.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::CoreError;
use crate::graph::Graph;
use crate::id::NodeId;

#[derive(Debug, Clone)]
struct Reachable {
    generation: u64,
    nodes: HashSet<NodeId>,
}

/// Per-source cache of reachable node sets.
#[derive(Debug, Clone, Default)]
pub struct ReachabilityAnalysis {
    cache: HashMap<NodeId, Reachable>,
}

impl ReachabilityAnalysis {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recomputes the set reachable from the graph's main node.
    pub fn compute_reachable_from_main(&mut self, graph: &Graph) -> Result<(), CoreError> {
        let main = graph.main().ok_or(CoreError::NoMainNode)?;
        self.compute(graph, main);
        Ok(())
    }

    /// True if `node` is reachable from main. Main reaches itself.
    ///
    /// Returns false (with a warning) if the graph has no main node.
    pub fn is_reachable_from_main(&mut self, graph: &Graph, node: NodeId, force_update: bool) -> bool {
        let Some(main) = graph.main() else {
            tracing::warn!("reachability from main queried on a graph without main");
            return false;
        };
        self.exists_path_between(graph, main, node, force_update)
    }

    /// True if `dest` is reachable from `src` along caller-to-callee edges.
    pub fn exists_path_between(
        &mut self,
        graph: &Graph,
        src: NodeId,
        dest: NodeId,
        force_update: bool,
    ) -> bool {
        self.reachable_from(graph, src, force_update).contains(&dest)
    }

    /// The set of nodes reachable from `src`, including `src` itself.
    ///
    /// Unknown ids yield an empty set.
    pub fn reachable_from(&mut self, graph: &Graph, src: NodeId, force_update: bool) -> &HashSet<NodeId> {
        let stale = match self.cache.get(&src) {
            Some(entry) => force_update || entry.generation != graph.generation(),
            None => true,
        };
        if stale {
            self.compute(graph, src);
        }
        &self.cache[&src].nodes
    }

    /// True if a result for `src` is cached and still current.
    pub fn is_cached(&self, graph: &Graph, src: NodeId) -> bool {
        self.cache
            .get(&src)
            .is_some_and(|entry| entry.generation == graph.generation())
    }

    /// Drops every cached result.
    pub fn invalidate(&mut self) {
        self.cache.clear();
    }

    fn compute(&mut self, graph: &Graph, src: NodeId) {
        let mut nodes = HashSet::new();
        if graph.has_node(src) {
            let mut queue = VecDeque::from([src]);
            nodes.insert(src);
            while let Some(current) = queue.pop_front() {
                for callee in graph.callees(current) {
                    if nodes.insert(callee) {
                        queue.push_back(callee);
                    }
                }
            }
        }
        tracing::debug!(source = %src, reachable = nodes.len(), "computed reachable set");
        self.cache.insert(
            src,
            Reachable {
                generation: graph.generation(),
                nodes,
            },
        );
    }
}
