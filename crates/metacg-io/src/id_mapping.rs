//! Translation between node ids and the textual ids used in a file.
//!
//! Writers project every [`NodeId`] to a string once, up front, through an
//! [`IdProjection`]. Readers collect the strings they see into a
//! [`StrToNodeMapping`] before any edge or metadata is decoded.

use std::collections::HashMap;

use metacg_core::{Graph, NodeId, NodeToStr, StrToNode};

use crate::error::FormatError;

/// Separator between a function name and its disambiguating index.
///
/// Cannot occur in a linker symbol.
pub const NAME_INDEX_SEPARATOR: char = '#';

/// How node ids are rendered as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdStrategy {
    /// The decimal node id.
    #[default]
    Numeric,
    /// The function name, suffixed with `#<index>` when the name is shared.
    Names,
}

/// Precomputed node id to text table for one graph.
#[derive(Debug, Clone, Default)]
pub struct IdProjection {
    ids: HashMap<NodeId, String>,
}

impl IdProjection {
    pub fn new(graph: &Graph, strategy: IdStrategy) -> Self {
        let ids = graph
            .nodes()
            .map(|node| {
                let text = match strategy {
                    IdStrategy::Numeric => node.id().to_string(),
                    IdStrategy::Names => name_id(graph, node.id(), node.function_name()),
                };
                (node.id(), text)
            })
            .collect();
        IdProjection { ids }
    }

    pub fn numeric(graph: &Graph) -> Self {
        Self::new(graph, IdStrategy::Numeric)
    }

    pub fn names(graph: &Graph) -> Self {
        Self::new(graph, IdStrategy::Names)
    }

    /// Projection with explicitly chosen texts, e.g. v3 hash ids.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (NodeId, String)>) -> Self {
        IdProjection {
            ids: pairs.into_iter().collect(),
        }
    }

    /// The text for `id`, or a malformed-graph error for foreign ids.
    pub fn text(&self, id: NodeId) -> Result<&str, FormatError> {
        self.ids
            .get(&id)
            .map(String::as_str)
            .ok_or_else(|| FormatError::Malformed {
                reason: format!("node {id} is not part of the graph being written"),
            })
    }
}

impl NodeToStr for IdProjection {
    fn node_to_str(&self, id: NodeId) -> Option<String> {
        self.ids.get(&id).cloned()
    }
}

fn name_id(graph: &Graph, id: NodeId, name: &str) -> String {
    let same_name = graph.node_ids_by_name(name);
    if same_name.len() <= 1 {
        return name.to_string();
    }
    let index = same_name.iter().position(|&other| other == id).unwrap_or(0);
    format!("{name}{NAME_INDEX_SEPARATOR}{index}")
}

/// Text to node id table filled while reading.
#[derive(Debug, Clone, Default)]
pub struct StrToNodeMapping {
    ids: HashMap<String, NodeId>,
}

impl StrToNodeMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `text` names `id`. A text may be registered only once.
    pub fn register(&mut self, text: impl Into<String>, id: NodeId) -> Result<(), FormatError> {
        let text = text.into();
        if self.ids.contains_key(&text) {
            return Err(FormatError::DuplicateNodeId { id: text });
        }
        self.ids.insert(text, id);
        Ok(())
    }

    pub fn get(&self, text: &str) -> Option<NodeId> {
        self.ids.get(text).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl StrToNode for StrToNodeMapping {
    fn str_to_node(&self, id: &str) -> Option<NodeId> {
        self.get(id)
    }
}
