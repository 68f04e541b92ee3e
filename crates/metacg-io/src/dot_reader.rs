//! Graphviz import.
//!
//! Reads the plain `digraph` subset that [`DotGenerator`](crate::DotGenerator)
//! writes back into a [`Graph`]: node statements, edge chains such as
//! `a -> b -> c`, quoted or bare identifiers, and `//`, `#` or `/* */`
//! comments. Attribute lists are skipped. Undirected graphs and subgraphs
//! are rejected.

use std::fs;
use std::path::PathBuf;

use metacg_core::{Graph, NodeId};

use crate::error::FormatError;
use crate::McgReader;

/// Classification of a DOT token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// A node name, keyword or attribute value.
    Entity,
    /// The directed edge operator `->`.
    Connector,
    /// Punctuation: braces, brackets, `=`, `;` and `,`.
    Punct,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DotToken {
    pub kind: TokenKind,
    pub spelling: String,
    /// Whether the spelling came from a double-quoted string.
    pub quoted: bool,
}

impl DotToken {
    fn entity(spelling: impl Into<String>, quoted: bool) -> Self {
        DotToken {
            kind: TokenKind::Entity,
            spelling: spelling.into(),
            quoted,
        }
    }

    fn punct(c: char) -> Self {
        DotToken {
            kind: TokenKind::Punct,
            spelling: c.to_string(),
            quoted: false,
        }
    }

    fn is_punct(&self, c: char) -> bool {
        self.kind == TokenKind::Punct && self.spelling.len() == 1 && self.spelling.starts_with(c)
    }

    fn is_keyword(&self, word: &str) -> bool {
        self.kind == TokenKind::Entity && !self.quoted && self.spelling.eq_ignore_ascii_case(word)
    }
}

fn is_punct_char(c: char) -> bool {
    matches!(c, '{' | '}' | '[' | ']' | '=' | ';' | ',')
}

// -----------------------------------------------------------------------
// Tokenizer
// -----------------------------------------------------------------------

/// Splits DOT text into tokens.
pub fn tokenize(text: &str) -> Result<Vec<DotToken>, FormatError> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    let mut line = 1usize;

    while let Some(c) = chars.next() {
        match c {
            '\n' => line += 1,
            c if c.is_whitespace() => {}
            '#' => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        line += 1;
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        line += 1;
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '\n' {
                        line += 1;
                    }
                    if prev == '*' && c == '/' {
                        closed = true;
                        break;
                    }
                    prev = c;
                }
                if !closed {
                    return Err(malformed(line, "unterminated comment"));
                }
            }
            '"' => {
                let mut spelling = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some(escaped @ ('"' | '\\')) => spelling.push(escaped),
                            // Line continuation.
                            Some('\n') => line += 1,
                            Some(other) => {
                                spelling.push('\\');
                                spelling.push(other);
                            }
                            None => break,
                        },
                        '\n' => {
                            line += 1;
                            spelling.push(c);
                        }
                        _ => spelling.push(c),
                    }
                }
                if !closed {
                    return Err(malformed(line, "unterminated string"));
                }
                tokens.push(DotToken::entity(spelling, true));
            }
            '-' if chars.peek() == Some(&'>') => {
                chars.next();
                tokens.push(DotToken {
                    kind: TokenKind::Connector,
                    spelling: "->".to_string(),
                    quoted: false,
                });
            }
            '-' if chars.peek() == Some(&'-') => {
                return Err(malformed(line, "undirected edges are not supported"));
            }
            c if is_punct_char(c) => tokens.push(DotToken::punct(c)),
            c => {
                let mut spelling = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_whitespace() || is_punct_char(next) || next == '"' {
                        break;
                    }
                    if next == '-' && edge_follows(&chars) {
                        break;
                    }
                    spelling.push(next);
                    chars.next();
                }
                tokens.push(DotToken::entity(spelling, false));
            }
        }
    }
    Ok(tokens)
}

/// True if the upcoming `-` starts an edge operator.
fn edge_follows(chars: &std::iter::Peekable<std::str::Chars<'_>>) -> bool {
    let mut ahead = chars.clone();
    ahead.next();
    matches!(ahead.peek(), Some('>') | Some('-'))
}

fn malformed(line: usize, reason: &str) -> FormatError {
    FormatError::Malformed {
        reason: format!("dot line {line}: {reason}"),
    }
}

// -----------------------------------------------------------------------
// Parser
// -----------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// Before the `digraph` keyword.
    Init,
    /// After `digraph`, before `{`.
    Header,
    /// Inside the graph body.
    Body,
    /// Past the closing brace.
    Done,
}

/// Builds a graph from a DOT token stream.
///
/// Nodes are created by name on first mention, so a name maps to exactly
/// one node. Repeated edges are kept once.
#[derive(Debug)]
pub struct DotParser {
    graph: Graph,
    state: ParseState,
    graph_name: Option<String>,
    /// Identifier not yet committed; it may turn out to be an `id = value`
    /// attribute name.
    held: Option<String>,
    /// Last node of the current statement, the source of a following `->`.
    last: Option<NodeId>,
    pending_edge: bool,
    /// The next identifier is an attribute value.
    skip_value: bool,
    /// Nesting depth of `[...]` attribute lists being skipped.
    attr_depth: usize,
}

impl Default for DotParser {
    fn default() -> Self {
        Self::new()
    }
}

impl DotParser {
    pub fn new() -> Self {
        DotParser {
            graph: Graph::new(),
            state: ParseState::Init,
            graph_name: None,
            held: None,
            last: None,
            pending_edge: false,
            skip_value: false,
            attr_depth: 0,
        }
    }

    /// Feeds all tokens of `text` to the parser.
    pub fn parse(&mut self, text: &str) -> Result<(), FormatError> {
        for token in tokenize(text)? {
            self.feed(token)?;
        }
        Ok(())
    }

    /// The name given after `digraph`, if any.
    pub fn graph_name(&self) -> Option<&str> {
        self.graph_name.as_deref()
    }

    /// Returns the graph once the closing brace has been seen.
    pub fn finish(self) -> Result<Graph, FormatError> {
        if self.state != ParseState::Done {
            return Err(FormatError::Malformed {
                reason: "dot graph is not closed".to_string(),
            });
        }
        Ok(self.graph)
    }

    fn feed(&mut self, token: DotToken) -> Result<(), FormatError> {
        match self.state {
            ParseState::Init => {
                if token.is_keyword("strict") {
                    return Ok(());
                }
                if token.is_keyword("digraph") {
                    self.state = ParseState::Header;
                    return Ok(());
                }
                Err(unexpected(&token, "expected 'digraph'"))
            }
            ParseState::Header => {
                if token.is_punct('{') {
                    self.state = ParseState::Body;
                    Ok(())
                } else if token.kind == TokenKind::Entity && self.graph_name.is_none() {
                    self.graph_name = Some(token.spelling);
                    Ok(())
                } else {
                    Err(unexpected(&token, "expected '{'"))
                }
            }
            ParseState::Body => self.feed_body(token),
            ParseState::Done => Err(unexpected(&token, "content after closing brace")),
        }
    }

    fn feed_body(&mut self, token: DotToken) -> Result<(), FormatError> {
        if self.attr_depth > 0 {
            if token.is_punct('[') {
                self.attr_depth += 1;
            } else if token.is_punct(']') {
                self.attr_depth -= 1;
            }
            return Ok(());
        }
        if self.skip_value {
            self.skip_value = false;
            if token.kind == TokenKind::Entity {
                return Ok(());
            }
        }

        match token.kind {
            TokenKind::Entity => {
                if token.is_keyword("subgraph") {
                    return Err(unexpected(&token, "subgraphs are not supported"));
                }
                self.commit_held()?;
                if ["node", "edge", "graph"].iter().any(|kw| token.is_keyword(kw)) {
                    if self.pending_edge {
                        return Err(unexpected(&token, "edge target missing"));
                    }
                    self.last = None;
                } else {
                    self.held = Some(token.spelling);
                }
            }
            TokenKind::Connector => {
                self.commit_held()?;
                if self.last.is_none() || self.pending_edge {
                    return Err(unexpected(&token, "edge without a source node"));
                }
                self.pending_edge = true;
            }
            TokenKind::Punct => match token.spelling.as_str() {
                "=" => {
                    if self.held.take().is_none() || self.pending_edge {
                        return Err(unexpected(&token, "attribute without a name"));
                    }
                    self.last = None;
                    self.skip_value = true;
                }
                "[" => {
                    self.commit_held()?;
                    self.attr_depth = 1;
                }
                ";" | "," => self.end_statement(&token)?,
                "}" => {
                    self.end_statement(&token)?;
                    self.state = ParseState::Done;
                }
                _ => return Err(unexpected(&token, "unexpected punctuation")),
            },
        }
        Ok(())
    }

    /// Inserts the held identifier as a node, closing a pending edge to it.
    fn commit_held(&mut self) -> Result<(), FormatError> {
        let Some(name) = self.held.take() else {
            return Ok(());
        };
        let id = self.graph.get_or_insert_node(&name, None);
        if self.pending_edge {
            self.pending_edge = false;
            let Some(caller) = self.last else {
                return Err(FormatError::Malformed {
                    reason: format!("edge to '{name}' has no source"),
                });
            };
            if !self.graph.add_edge(caller, id)? {
                tracing::debug!(callee = %name, "repeated dot edge ignored");
            }
        }
        self.last = Some(id);
        Ok(())
    }

    fn end_statement(&mut self, token: &DotToken) -> Result<(), FormatError> {
        self.commit_held()?;
        if self.pending_edge {
            return Err(unexpected(token, "edge target missing"));
        }
        self.last = None;
        Ok(())
    }
}

fn unexpected(token: &DotToken, reason: &str) -> FormatError {
    FormatError::Malformed {
        reason: format!("unexpected dot token '{}': {reason}", token.spelling),
    }
}

// -----------------------------------------------------------------------
// Sources and reader
// -----------------------------------------------------------------------

/// Supplier of DOT text.
pub trait DotSource {
    fn text(&mut self) -> Result<String, FormatError>;

    /// Human-readable origin for log messages.
    fn description(&self) -> String;
}

/// DOT text stored in a file.
#[derive(Debug, Clone)]
pub struct DotFileSource {
    path: PathBuf,
}

impl DotFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DotFileSource { path: path.into() }
    }
}

impl DotSource for DotFileSource {
    fn text(&mut self) -> Result<String, FormatError> {
        fs::read_to_string(&self.path).map_err(|source| FormatError::Io {
            path: self.path.clone(),
            source,
        })
    }

    fn description(&self) -> String {
        self.path.display().to_string()
    }
}

/// DOT text held in memory.
#[derive(Debug, Clone)]
pub struct DotStringSource {
    text: String,
}

impl DotStringSource {
    pub fn new(text: impl Into<String>) -> Self {
        DotStringSource { text: text.into() }
    }
}

impl DotSource for DotStringSource {
    fn text(&mut self) -> Result<String, FormatError> {
        Ok(self.text.clone())
    }

    fn description(&self) -> String {
        "dot string".to_string()
    }
}

/// Reads a call graph from DOT text. Nodes get no origin and no metadata.
pub struct DotReader {
    source: Box<dyn DotSource>,
}

impl DotReader {
    pub fn new(source: Box<dyn DotSource>) -> Self {
        DotReader { source }
    }
}

impl McgReader for DotReader {
    fn read(&mut self) -> Result<Graph, FormatError> {
        let text = self.source.text()?;
        let mut parser = DotParser::new();
        parser.parse(&text)?;
        let name = parser.graph_name().unwrap_or_default().to_string();
        let graph = parser.finish()?;
        tracing::debug!(
            source = %self.source.description(),
            graph = %name,
            nodes = graph.size(),
            edges = graph.edge_count(),
            "read dot graph"
        );
        Ok(graph)
    }
}

/// Reads the DOT graph stored at `path`.
pub fn read_dot_file(path: impl Into<PathBuf>) -> Result<Graph, FormatError> {
    DotReader::new(Box::new(DotFileSource::new(path))).read()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DotGenerator;

    fn spellings(text: &str) -> Vec<String> {
        tokenize(text).unwrap().into_iter().map(|t| t.spelling).collect()
    }

    fn read_str(text: &str) -> Result<Graph, FormatError> {
        DotReader::new(Box::new(DotStringSource::new(text))).read()
    }

    fn has_edge(g: &Graph, caller: &str, callee: &str) -> bool {
        g.exists_any_edge(caller, callee)
    }

    #[test]
    fn tokenizer_splits_on_punctuation_and_edges() {
        assert_eq!(
            spellings("digraph callgraph {\nn\n1\n}\n"),
            ["digraph", "callgraph", "{", "n", "1", "}"]
        );
        assert_eq!(
            spellings("digraph callgraph {n [attribute=\"asdf\"]\n}\n"),
            ["digraph", "callgraph", "{", "n", "[", "attribute", "=", "asdf", "]", "}"]
        );
        assert_eq!(
            spellings("digraph callgraph {a -> b -> c}\n"),
            ["digraph", "callgraph", "{", "a", "->", "b", "->", "c", "}"]
        );
        assert_eq!(spellings("{a->b}"), ["{", "a", "->", "b", "}"]);
    }

    #[test]
    fn tokenizer_classifies_tokens() {
        let tokens = tokenize("{ a -> \"b c\" }").unwrap();
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            [
                TokenKind::Punct,
                TokenKind::Entity,
                TokenKind::Connector,
                TokenKind::Entity,
                TokenKind::Punct
            ]
        );
        assert!(!tokens[1].quoted);
        assert!(tokens[3].quoted);
        assert_eq!(tokens[3].spelling, "b c");
    }

    #[test]
    fn tokenizer_handles_escapes_and_comments() {
        assert_eq!(
            spellings("// header\n\"op\\\"x\" # trailing\n/* block\n */ n"),
            ["op\"x", "n"]
        );
        assert!(tokenize("\"open").is_err());
        assert!(tokenize("/* open").is_err());
        assert!(tokenize("a -- b").is_err());
    }

    #[test]
    fn reads_empty_graph() {
        let g = read_str("digraph callgraph {\n}\n").unwrap();
        assert!(g.is_empty());
    }

    #[test]
    fn reads_nodes_without_edges() {
        let g = read_str("digraph callgraph {\n\"node_one\"\n    \"node_two\"\n}\n").unwrap();
        assert_eq!(g.size(), 2);
        assert_eq!(g.edge_count(), 0);
        assert!(g.single_node("node_one").is_some());
        assert!(g.single_node("node_two").is_some());
    }

    #[test]
    fn reads_edges_across_whitespace_and_lines() {
        for text in [
            "digraph callgraph {\na -> b\n}\n",
            "digraph callgraph {\na       ->\tb\n}\n",
            "digraph callgraph {\na\n->\nb\n}\n",
        ] {
            let g = read_str(text).unwrap();
            assert_eq!(g.size(), 2, "{text:?}");
            assert!(has_edge(&g, "a", "b"), "{text:?}");
        }
    }

    #[test]
    fn edge_chains_connect_consecutive_nodes() {
        let g = read_str("digraph { n; zz; a -> b -> c; a -> b }").unwrap();
        assert_eq!(g.size(), 5);
        assert_eq!(g.edge_count(), 2);
        assert!(has_edge(&g, "a", "b"));
        assert!(has_edge(&g, "b", "c"));
        assert!(!has_edge(&g, "a", "c"));
    }

    #[test]
    fn attributes_and_defaults_are_skipped() {
        let text = "strict digraph cg {\n  rankdir = LR\n  node [shape=box, label=\"x\"]\n  \
                    main [color=red]\n  main -> foo [weight=2]\n}\n";
        let g = read_str(text).unwrap();
        assert_eq!(g.size(), 2);
        assert!(g.single_node("box").is_none());
        assert!(g.single_node("LR").is_none());
        assert!(has_edge(&g, "main", "foo"));
    }

    #[test]
    fn parser_reports_graph_name() {
        let mut parser = DotParser::new();
        parser.parse("digraph \"my graph\" { a }").unwrap();
        assert_eq!(parser.graph_name(), Some("my graph"));
        assert_eq!(parser.finish().unwrap().size(), 1);
    }

    #[test]
    fn malformed_input_is_rejected() {
        for text in [
            "graph g { a -- b }",
            "graph g { a }",
            "digraph g { a -> }",
            "digraph g { -> b }",
            "digraph g { a",
            "digraph g { a } b",
            "digraph g { subgraph s { a } }",
        ] {
            assert!(
                matches!(read_str(text), Err(FormatError::Malformed { .. })),
                "{text:?}"
            );
        }
    }

    #[test]
    fn generator_output_reads_back_into_the_same_graph() {
        let mut g = Graph::new();
        let main = g.insert_named("main");
        let foo = g.insert_named("ns::foo<int>");
        let bar = g.insert_named("operator\"\"_x");
        let lonely = g.insert_named("unreachable");
        g.add_edge(main, foo).unwrap();
        g.add_edge(foo, bar).unwrap();
        g.add_edge(bar, main).unwrap();
        assert!(g.node(lonely).is_some());

        let dot = DotGenerator::new(&g).generate();
        let back = read_str(&dot).unwrap();

        let mut names: Vec<&str> = back.nodes().map(|n| n.function_name()).collect();
        names.sort_unstable();
        assert_eq!(names, ["main", "ns::foo<int>", "operator\"\"_x", "unreachable"]);
        assert_eq!(back.edge_count(), 3);
        assert!(has_edge(&back, "main", "ns::foo<int>"));
        assert!(has_edge(&back, "ns::foo<int>", "operator\"\"_x"));
        assert!(has_edge(&back, "operator\"\"_x", "main"));
        assert_eq!(DotGenerator::new(&back).generate(), dot);
    }

    #[test]
    fn reads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cg.dot");
        fs::write(&path, "digraph callgraph {\n  \"main\"\n\n  \"main\" -> \"foo\"\n}\n").unwrap();
        let g = read_dot_file(&path).unwrap();
        assert!(has_edge(&g, "main", "foo"));

        let missing = dir.path().join("missing.dot");
        assert!(matches!(read_dot_file(&missing), Err(FormatError::Io { .. })));
    }
}
