//! Graph data model shared by ingestion and layout.
//!
//! Edges refer to nodes by id. An edge whose endpoint is missing from the
//! node set is *dangling*: it is kept in the snapshot as received but every
//! consumer skips it.

use std::collections::HashMap;

use crate::vector::Vec2;

/// Default cap on local search results.
pub const DEFAULT_SEARCH_LIMIT: usize = 50;

/// A code entity in the graph.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GraphNode {
    /// Stable identity
    pub id: String,
    /// Display name
    pub name: String,
    /// Fully qualified name, if the peer knows it
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub qualified_name: Option<String>,
    /// Category tag (function, class, ...)
    pub kind: String,
    /// Source file
    pub file: String,
    /// First line, inclusive
    #[cfg_attr(feature = "serde", serde(alias = "line_start"))]
    pub start_line: u32,
    /// Last line, inclusive
    #[cfg_attr(feature = "serde", serde(alias = "line_end"))]
    pub end_line: u32,
    /// Signature text
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub signature: Option<String>,
    /// Centrality score in [0, 1]; missing or null reads as 0
    #[cfg_attr(
        feature = "serde",
        serde(default, deserialize_with = "null_as_zero")
    )]
    pub centrality: f64,
    /// Layout position, owned by the simulation
    #[cfg_attr(feature = "serde", serde(skip))]
    pub position: Vec2,
    /// Layout velocity, owned by the simulation
    #[cfg_attr(feature = "serde", serde(skip))]
    pub velocity: Vec2,
}

impl GraphNode {
    /// Create a node with the required fields; everything else defaults.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: impl Into<String>,
        file: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: kind.into(),
            file: file.into(),
            ..Default::default()
        }
    }

    /// Place the node at a position.
    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = Vec2::new(x, y);
        self
    }

    /// Whether a lowercase query matches name, kind or file.
    fn matches(&self, needle: &str) -> bool {
        self.name.to_lowercase().contains(needle)
            || self.kind.to_lowercase().contains(needle)
            || self.file.to_lowercase().contains(needle)
    }
}

#[cfg(feature = "serde")]
fn null_as_zero<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or_default())
}

/// A directed relation between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GraphEdge {
    /// Source node id
    pub source: String,
    /// Target node id
    pub target: String,
    /// Relation kind (calls, imports, ...)
    pub kind: String,
}

impl GraphEdge {
    /// Create an edge.
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind: kind.into(),
        }
    }
}

/// A complete graph materialized at one ingestion-session boundary.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GraphSnapshot {
    /// Always false: snapshots replace, never patch
    pub is_delta: bool,
    pub node_count: usize,
    pub edge_count: usize,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    /// Milliseconds since the Unix epoch at emission
    pub timestamp: u64,
}

impl GraphSnapshot {
    /// Build a full (non-delta) snapshot, deriving the counts.
    pub fn new(nodes: Vec<GraphNode>, edges: Vec<GraphEdge>, timestamp: u64) -> Self {
        Self {
            is_delta: false,
            node_count: nodes.len(),
            edge_count: edges.len(),
            nodes,
            edges,
            timestamp,
        }
    }

    /// Id lookup over the node list.
    pub fn index(&self) -> NodeIndex {
        NodeIndex::build(&self.nodes)
    }

    /// Edges whose endpoints both resolve, in arrival order.
    pub fn live_edges(&self) -> Vec<&GraphEdge> {
        let index = self.index();
        self.edges
            .iter()
            .filter(|e| index.resolve(e).is_some())
            .collect()
    }
}

/// Id to arena-slot lookup for a node list.
#[derive(Debug, Clone, Default)]
pub struct NodeIndex {
    slots: HashMap<String, usize>,
}

impl NodeIndex {
    /// Index the given nodes. On duplicate ids the last occurrence wins.
    pub fn build(nodes: &[GraphNode]) -> Self {
        let slots = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();
        Self { slots }
    }

    /// Slot of a node id.
    pub fn get(&self, id: &str) -> Option<usize> {
        self.slots.get(id).copied()
    }

    /// Whether a node id is present.
    pub fn contains(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    /// Slots of both endpoints, or `None` for a dangling edge.
    pub fn resolve(&self, edge: &GraphEdge) -> Option<(usize, usize)> {
        Some((self.get(&edge.source)?, self.get(&edge.target)?))
    }

    /// Number of indexed ids.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Indices of nodes whose name, kind or file contains `query`
/// (case-insensitive), in node order, at most `limit` of them.
///
/// An empty query matches nothing.
pub fn search(nodes: &[GraphNode], query: &str, limit: usize) -> Vec<usize> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }

    nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.matches(&needle))
        .map(|(i, _)| i)
        .take(limit)
        .collect()
}
