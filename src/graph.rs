//! Graph model of an inspected pipeline
//!
//! The shared data structure produced by the inspector and consumed by the
//! tracer, the analyzer, and diagram renderers. A [`GraphModel`] is immutable
//! after construction and owned by one debug session.
//!
//! Renderers never see this type directly; they consume the [`GraphExport`]
//! contract: nodes in inspector-assigned order plus `(from, to)` edge pairs.
//! That ordering is stable across calls for the same pipeline, so a
//! regenerated diagram is byte-identical.

use crate::pipeline::{StageKind, StagePath};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of a node within one graph model instance.
///
/// Ids are assigned by the inspector in pre-order and are only meaningful
/// relative to the graph they came from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// One pipeline component in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageNode {
    /// Stable identifier within this graph instance
    pub id: NodeId,
    /// Classified role
    pub kind: StageKind,
    /// Human-readable name
    pub label: String,
    /// Pre-order position in the composition tree
    pub path: StagePath,
    /// Publicly exposed configuration, ordered for stable export
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl StageNode {
    /// The model identifier attribute, if present.
    #[must_use]
    pub fn model(&self) -> Option<&str> {
        self.attributes
            .get(crate::pipeline::ATTR_MODEL)
            .map(String::as_str)
    }

    /// Whether this node is eligible to carry token/cost metrics.
    #[must_use]
    pub fn is_model_call(&self) -> bool {
        self.kind == StageKind::ModelCall
    }
}

/// Directed edge: `from` must emit before `to` consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Upstream node
    pub from: NodeId,
    /// Downstream node
    pub to: NodeId,
}

/// Overall shape of the graph, derived from edge topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Structure {
    /// One uncomposed stage
    Single,
    /// A linear chain of stages
    Sequence,
    /// A flat fan-out of single-stage branches
    Parallel,
    /// A composition containing further compositions
    Nested,
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Sequence => write!(f, "sequence"),
            Self::Parallel => write!(f, "parallel"),
            Self::Nested => write!(f, "nested"),
        }
    }
}

/// Directed acyclic graph of pipeline stages.
///
/// Created once per inspection, immutable afterwards. Node order is the
/// inspector's pre-order id assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphModel {
    nodes: Vec<StageNode>,
    edges: Vec<GraphEdge>,
    structure: Structure,
}

impl GraphModel {
    /// Assemble a graph model. Used by the inspector; not public because a
    /// model must only come from an inspection.
    pub(crate) fn new(nodes: Vec<StageNode>, edges: Vec<GraphEdge>, structure: Structure) -> Self {
        debug_assert!(
            edges.iter().all(|edge| edge.from != edge.to),
            "graph must not contain self-loops"
        );
        Self {
            nodes,
            edges,
            structure,
        }
    }

    /// Nodes in inspector-assigned order.
    #[must_use]
    pub fn nodes(&self) -> &[StageNode] {
        &self.nodes
    }

    /// Edges in discovery order.
    #[must_use]
    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    /// Derived topology tag.
    #[must_use]
    pub fn structure(&self) -> Structure {
        self.structure
    }

    /// Look up a node by id.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&StageNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes eligible for token/cost metrics.
    pub fn model_call_nodes(&self) -> impl Iterator<Item = &StageNode> {
        self.nodes.iter().filter(|node| node.is_model_call())
    }

    /// Produce the renderer-facing export of this graph.
    #[must_use]
    pub fn export(&self) -> GraphExport {
        GraphExport {
            nodes: self
                .nodes
                .iter()
                .map(|node| ExportNode {
                    id: node.id,
                    label: node.label.clone(),
                    kind: node.kind.clone(),
                    attributes: node.attributes.clone(),
                })
                .collect(),
            edges: self.edges.iter().map(|edge| (edge.from, edge.to)).collect(),
        }
    }
}

// ============================================================================
// Diagram export contract
// ============================================================================

/// One node as seen by diagram consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportNode {
    /// Node identifier
    pub id: NodeId,
    /// Human-readable name
    pub label: String,
    /// Classified role
    pub kind: StageKind,
    /// Configuration attributes, ordered
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

/// Structural contract consumed by any diagram renderer.
///
/// Consumers must not assume a rendering format, only this structure. The
/// same pipeline always exports the same byte sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphExport {
    /// Nodes in inspector-assigned order
    pub nodes: Vec<ExportNode>,
    /// Directed `(from, to)` pairs
    pub edges: Vec<(NodeId, NodeId)>,
}

impl GraphExport {
    /// Serialize the export to JSON.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Serialization`] if encoding fails.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Re-read an export previously produced by [`GraphExport::to_json`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Serialization`] on malformed input.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
