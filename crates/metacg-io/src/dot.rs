//! Graphviz export.

use std::collections::BTreeSet;
use std::io::Write;

use metacg_core::Graph;

use crate::error::FormatError;

/// Renders a call graph as a Graphviz `digraph`.
///
/// Nodes are labelled by function name, so same-named functions collapse
/// into one DOT node. Output is sorted by name.
#[derive(Debug, Clone)]
pub struct DotGenerator<'g> {
    graph: &'g Graph,
    name: String,
}

impl<'g> DotGenerator<'g> {
    pub fn new(graph: &'g Graph) -> Self {
        DotGenerator {
            graph,
            name: "callgraph".to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn generate(&self) -> String {
        let names: BTreeSet<&str> = self.graph.nodes().map(|n| n.function_name()).collect();
        let edges: BTreeSet<(&str, &str)> = self
            .graph
            .edges()
            .filter_map(|(edge, _)| {
                let caller = self.graph.node(edge.caller)?.function_name();
                let callee = self.graph.node(edge.callee)?.function_name();
                Some((caller, callee))
            })
            .collect();

        let mut out = format!("digraph {} {{\n", quote(&self.name));
        for name in &names {
            out.push_str(&format!("  {}\n", quote(name)));
        }
        if !edges.is_empty() {
            out.push('\n');
        }
        for (caller, callee) in &edges {
            out.push_str(&format!("  {} -> {}\n", quote(caller), quote(callee)));
        }
        out.push_str("}\n");
        tracing::debug!(nodes = names.len(), edges = edges.len(), "generated dot graph");
        out
    }

    pub fn output(&self, out: &mut impl Write) -> Result<(), FormatError> {
        out.write_all(self.generate().as_bytes())
            .map_err(FormatError::Write)
    }
}

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}
