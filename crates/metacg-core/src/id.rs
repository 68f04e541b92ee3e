//! Stable ID newtypes for call-graph entities.
//!
//! A [`NodeId`] is only meaningful inside the [`Graph`](crate::graph::Graph)
//! that produced it. Edges have no storage of their own identity beyond the
//! ordered `(caller, callee)` pair, which is what [`EdgeId`] captures.

use std::fmt;

use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};

/// Node identifier. Maps to a petgraph `NodeIndex<u32>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// Edge identity: the ordered (caller, callee) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeId {
    pub caller: NodeId,
    pub callee: NodeId,
}

impl EdgeId {
    pub fn new(caller: NodeId, callee: NodeId) -> Self {
        EdgeId { caller, callee }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.caller, self.callee)
    }
}

impl From<(NodeId, NodeId)> for EdgeId {
    fn from((caller, callee): (NodeId, NodeId)) -> Self {
        EdgeId { caller, callee }
    }
}

// Bridge between NodeId and petgraph's NodeIndex<u32>.

impl From<NodeIndex<u32>> for NodeId {
    fn from(idx: NodeIndex<u32>) -> Self {
        NodeId(idx.index() as u32)
    }
}

impl From<NodeId> for NodeIndex<u32> {
    fn from(id: NodeId) -> Self {
        NodeIndex::new(id.0 as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_to_node_index_roundtrip() {
        let idx = NodeIndex::<u32>::new(42);
        let node_id = NodeId::from(idx);
        assert_eq!(node_id.0, 42);

        let back: NodeIndex<u32> = node_id.into();
        assert_eq!(back.index(), 42);
    }

    #[test]
    fn display() {
        assert_eq!(format!("{}", NodeId(7)), "7");
        assert_eq!(format!("{}", EdgeId::new(NodeId(1), NodeId(2))), "1->2");
    }

    #[test]
    fn edge_ids_order_by_caller_then_callee() {
        let a = EdgeId::new(NodeId(0), NodeId(5));
        let b = EdgeId::new(NodeId(1), NodeId(0));
        let c = EdgeId::new(NodeId(1), NodeId(2));
        let mut ids = vec![c, a, b];
        ids.sort();
        assert_eq!(ids, vec![a, b, c]);
    }
}
