pub mod error;
pub mod graph;
pub mod graph_registry;
pub mod id;
pub mod merge;
pub mod metadata;
pub mod node;
pub mod reachability;

// Re-export commonly used types
pub use error::CoreError;
pub use graph::Graph;
pub use graph_registry::GraphRegistry;
pub use id::{EdgeId, NodeId};
pub use merge::{merge, GraphMapping, MergeAction, MergeByName, MergePolicy, MergeRecorder};
pub use metadata::{Metadata, MetadataKind, MetadataMap, MetadataRegistry, NodeToStr, StrToNode};
pub use node::CgNode;
pub use reachability::ReachabilityAnalysis;
