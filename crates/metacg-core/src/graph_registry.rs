//! Named graphs with one active graph.
//!
//! Applications that juggle several call graphs (one per input file, plus the
//! merge result) keep them in a [`GraphRegistry`]. The registry is an ordinary
//! value owned by the application; nothing about it is process-wide.

use indexmap::IndexMap;

use crate::error::CoreError;
use crate::graph::Graph;
use crate::merge::{MergePolicy, MergeRecorder};

/// Insertion-ordered collection of named graphs.
#[derive(Debug, Clone, Default)]
pub struct GraphRegistry {
    graphs: IndexMap<String, Graph>,
    active: Option<String>,
}

impl GraphRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) the graph stored under `name`.
    ///
    /// With `set_active` the graph becomes the active one.
    pub fn add_graph(&mut self, name: impl Into<String>, graph: Graph, set_active: bool) {
        let name = name.into();
        if self.graphs.insert(name.clone(), graph).is_some() {
            tracing::warn!(name = %name, "replacing managed graph");
        }
        if set_active {
            self.active = Some(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Graph> {
        self.graphs.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Graph> {
        self.graphs.get_mut(name)
    }

    /// Returns the graph stored under `name`, creating an empty one first.
    pub fn get_or_create(&mut self, name: &str) -> &mut Graph {
        self.graphs.entry(name.to_string()).or_default()
    }

    /// Makes `name` the active graph.
    pub fn set_active(&mut self, name: &str) -> Result<(), CoreError> {
        if !self.graphs.contains_key(name) {
            return Err(CoreError::GraphNotFound {
                name: name.to_string(),
            });
        }
        self.active = Some(name.to_string());
        Ok(())
    }

    pub fn active_name(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn active(&self) -> Option<&Graph> {
        self.graphs.get(self.active.as_deref()?)
    }

    pub fn active_mut(&mut self) -> Option<&mut Graph> {
        let name = self.active.as_deref()?;
        self.graphs.get_mut(name)
    }

    /// Names of all managed graphs, in insertion order.
    pub fn graph_names(&self) -> impl Iterator<Item = &str> {
        self.graphs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }

    /// Clears the active graph in place.
    pub fn reset_active(&mut self) -> Result<(), CoreError> {
        self.active_mut().ok_or(CoreError::NoActiveGraph)?.clear();
        Ok(())
    }

    /// Drops every managed graph.
    pub fn reset(&mut self) {
        self.graphs.clear();
        self.active = None;
    }

    /// Merges every other managed graph into the active one, in insertion
    /// order, and returns one recorder per merged graph.
    pub fn merge_into_active(
        &mut self,
        policy: &dyn MergePolicy,
    ) -> Result<Vec<(String, MergeRecorder)>, CoreError> {
        let active_name = self.active.clone().ok_or(CoreError::NoActiveGraph)?;
        let mut target = std::mem::take(
            self.graphs
                .get_mut(&active_name)
                .ok_or(CoreError::NoActiveGraph)?,
        );

        let mut recorders = Vec::new();
        let mut result = Ok(());
        for (name, graph) in &self.graphs {
            if *name == active_name {
                continue;
            }
            tracing::info!(graph = %name, into = %active_name, "merging graph");
            match target.merge(graph, policy) {
                Ok(recorder) => recorders.push((name.clone(), recorder)),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        if let Some(slot) = self.graphs.get_mut(&active_name) {
            *slot = target;
        }
        result.map(|()| recorders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::MergeByName;

    fn named(names: &[&str]) -> Graph {
        let mut g = Graph::new();
        for name in names {
            g.insert(*name, None, false, true);
        }
        g
    }

    #[test]
    fn active_graph_tracking() {
        let mut reg = GraphRegistry::new();
        assert!(reg.active().is_none());
        reg.add_graph("a", named(&["main"]), false);
        assert!(reg.active().is_none());
        reg.add_graph("b", named(&["f", "g"]), true);
        assert_eq!(reg.active_name(), Some("b"));
        assert_eq!(reg.active().unwrap().size(), 2);

        reg.set_active("a").unwrap();
        assert_eq!(reg.active().unwrap().size(), 1);
        assert!(matches!(
            reg.set_active("nope"),
            Err(CoreError::GraphNotFound { .. })
        ));
        assert_eq!(reg.graph_names().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn reset_active_clears_in_place() {
        let mut reg = GraphRegistry::new();
        reg.add_graph("a", named(&["main"]), true);
        reg.reset_active().unwrap();
        assert!(reg.active().unwrap().is_empty());
        assert_eq!(reg.len(), 1);

        reg.reset();
        assert!(reg.is_empty());
        assert!(matches!(reg.reset_active(), Err(CoreError::NoActiveGraph)));
    }

    #[test]
    fn get_or_create_adds_empty_graph() {
        let mut reg = GraphRegistry::new();
        reg.get_or_create("x").insert_named("f");
        assert_eq!(reg.get("x").unwrap().size(), 1);
        assert_eq!(reg.get_or_create("x").size(), 1);
    }

    #[test]
    fn merge_into_active_combines_all_graphs() {
        let mut reg = GraphRegistry::new();
        reg.add_graph("merged", Graph::new(), true);
        reg.add_graph("one", named(&["main", "foo"]), false);
        reg.add_graph("two", named(&["foo", "bar"]), false);

        let recorders = reg.merge_into_active(&MergeByName).unwrap();
        assert_eq!(recorders.len(), 2);
        assert_eq!(recorders[0].0, "one");

        let merged = reg.active().unwrap();
        assert_eq!(merged.size(), 3);
        assert!(merged.single_node("foo").is_some());
        assert_eq!(reg.get("one").unwrap().size(), 2);
    }

    #[test]
    fn merge_without_active_graph_fails() {
        let mut reg = GraphRegistry::new();
        reg.add_graph("one", named(&["main"]), false);
        assert!(matches!(
            reg.merge_into_active(&MergeByName),
            Err(CoreError::NoActiveGraph)
        ));
    }
}
