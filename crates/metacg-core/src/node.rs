//! Call-graph node: one function.

use crate::id::NodeId;
use crate::metadata::{MetadataKind, MetadataMap, OverrideMd};

/// Origin written by tools that did not know a function's source file.
pub const UNKNOWN_ORIGIN: &str = "unknownOrigin";

/// Maps empty and [`UNKNOWN_ORIGIN`] origins to `None`.
pub fn known_origin(origin: Option<String>) -> Option<String> {
    origin.filter(|o| !o.is_empty() && o != UNKNOWN_ORIGIN)
}

/// A function in the call graph.
///
/// Nodes are created only through [`Graph`](crate::graph::Graph) insertion
/// methods; the id is assigned by the graph and never changes.
#[derive(Debug, Clone)]
pub struct CgNode {
    pub(crate) id: NodeId,
    function_name: String,
    /// Source file or translation unit the function came from, if known.
    pub origin: Option<String>,
    pub has_body: bool,
    pub meta: MetadataMap,
}

impl CgNode {
    pub(crate) fn new(id: NodeId, function_name: String, origin: Option<String>) -> Self {
        CgNode {
            id,
            function_name,
            origin,
            has_body: false,
            meta: MetadataMap::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn has_body(&self) -> bool {
        self.has_body
    }

    pub fn set_has_body(&mut self, has_body: bool) {
        self.has_body = has_body;
    }

    /// A node is virtual iff it carries override metadata.
    pub fn is_virtual(&self) -> bool {
        self.meta.has(OverrideMd::KEY)
    }

    /// Marks the node virtual by attaching empty override metadata, or
    /// non-virtual by removing it.
    pub fn set_virtual(&mut self, is_virtual: bool) {
        if is_virtual {
            if !self.is_virtual() {
                // Cannot collide: the key was just checked.
                let _ = self.meta.insert(OverrideMd::default());
            }
        } else {
            self.meta.remove(OverrideMd::KEY);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_flag_follows_override_metadata() {
        let mut node = CgNode::new(NodeId(0), "f".into(), None);
        assert!(!node.is_virtual());

        node.set_virtual(true);
        assert!(node.is_virtual());
        assert!(node.meta.get::<OverrideMd>().is_some());

        node.set_virtual(true);
        assert_eq!(node.meta.len(), 1);

        node.set_virtual(false);
        assert!(!node.is_virtual());
        assert!(node.meta.is_empty());
    }

    #[test]
    fn placeholder_origins_are_unknown() {
        assert_eq!(known_origin(Some(String::new())), None);
        assert_eq!(known_origin(Some(UNKNOWN_ORIGIN.into())), None);
        assert_eq!(known_origin(None), None);
        assert_eq!(known_origin(Some("a.cpp".into())), Some("a.cpp".to_string()));
    }
}
