//! Structural inspection
//!
//! Walks a composed [`Pipeline`] and produces a [`GraphModel`] without
//! executing anything. Ids are assigned by a stable pre-order traversal, so
//! inspecting a structurally identical pipeline twice yields identical ids,
//! node order, and edges, which is the property diagram reproducibility
//! depends on.
//!
//! Inspection never fails. A stage that cannot be classified arrives here
//! already tagged `unknown` and still yields a node; missing attributes are
//! omitted, not errors.

use crate::graph::{GraphEdge, GraphModel, NodeId, StageNode, Structure};
use crate::pipeline::{Pipeline, PipelineVisitor, Stage, StagePath};

/// Produces graph models from pipelines.
///
/// Stateless; the unit struct exists so callers can name the operation and
/// future options have somewhere to live.
///
/// # Example
///
/// ```
/// use chainlens::inspector::Inspector;
/// use chainlens::pipeline::{Pipeline, Stage};
///
/// let pipeline = Pipeline::sequence(vec![
///     Stage::transform("prompt").into(),
///     Stage::model_call("llm").with_model("gpt-4").into(),
/// ]);
/// let graph = Inspector::inspect(&pipeline);
/// assert_eq!(graph.len(), 2);
/// assert_eq!(graph.edges().len(), 1);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Inspector;

impl Inspector {
    /// Inspect a pipeline and build its graph model.
    #[must_use]
    pub fn inspect(pipeline: &Pipeline) -> GraphModel {
        let mut builder = GraphBuilder::default();
        pipeline.walk(&mut builder);
        let structure = classify_structure(pipeline);
        GraphModel::new(builder.nodes, builder.edges, structure)
    }
}

/// Entry/exit node sets of one fully-built subtree.
///
/// For a leaf both sets are the single node. For a sequence, entries come
/// from the first element and exits from the last. For a parallel block,
/// both are the union over branches (fan-out on entry, fan-in on exit).
#[derive(Debug, Clone, Default)]
struct Span {
    entries: Vec<NodeId>,
    exits: Vec<NodeId>,
}

enum Frame {
    Sequence { children: Vec<Span> },
    Parallel { children: Vec<Span> },
}

#[derive(Default)]
struct GraphBuilder {
    nodes: Vec<StageNode>,
    edges: Vec<GraphEdge>,
    stack: Vec<Frame>,
}

impl GraphBuilder {
    fn attach(&mut self, span: Span) {
        match self.stack.last_mut() {
            Some(Frame::Sequence { children }) | Some(Frame::Parallel { children }) => {
                children.push(span);
            }
            // Root-level span; nothing to connect it to.
            None => {}
        }
    }
}

impl PipelineVisitor for GraphBuilder {
    fn visit_stage(&mut self, path: &StagePath, stage: &Stage) {
        let id = NodeId(self.nodes.len());
        self.nodes.push(StageNode {
            id,
            kind: stage.kind.clone(),
            label: stage.label.clone(),
            path: path.clone(),
            attributes: stage.attributes.clone(),
        });
        self.attach(Span {
            entries: vec![id],
            exits: vec![id],
        });
    }

    fn enter_sequence(&mut self, _path: &StagePath, _len: usize) {
        self.stack.push(Frame::Sequence {
            children: Vec::new(),
        });
    }

    fn exit_sequence(&mut self, _path: &StagePath) {
        let Some(Frame::Sequence { children }) = self.stack.pop() else {
            debug_assert!(false, "visitor enter/exit calls must be balanced");
            return;
        };

        // Each element's exits feed the next element's entries.
        for pair in children.windows(2) {
            for &from in &pair[0].exits {
                for &to in &pair[1].entries {
                    self.edges.push(GraphEdge { from, to });
                }
            }
        }

        let span = Span {
            entries: children.first().map(|s| s.entries.clone()).unwrap_or_default(),
            exits: children.last().map(|s| s.exits.clone()).unwrap_or_default(),
        };
        self.attach(span);
    }

    fn enter_parallel(&mut self, _path: &StagePath, _keys: &[&str]) {
        self.stack.push(Frame::Parallel {
            children: Vec::new(),
        });
    }

    fn exit_parallel(&mut self, _path: &StagePath) {
        let Some(Frame::Parallel { children }) = self.stack.pop() else {
            debug_assert!(false, "visitor enter/exit calls must be balanced");
            return;
        };

        let mut span = Span::default();
        for child in children {
            span.entries.extend(child.entries);
            span.exits.extend(child.exits);
        }
        self.attach(span);
    }
}

/// Classify the overall topology of a pipeline.
fn classify_structure(pipeline: &Pipeline) -> Structure {
    fn is_composite(pipeline: &Pipeline) -> bool {
        !matches!(pipeline, Pipeline::Stage(_))
    }

    match pipeline {
        Pipeline::Stage(_) => Structure::Single,
        Pipeline::Sequence(steps) => {
            if steps.iter().any(is_composite) {
                Structure::Nested
            } else {
                Structure::Sequence
            }
        }
        Pipeline::Parallel(branches) => {
            if branches.iter().any(|(_, branch)| is_composite(branch)) {
                Structure::Nested
            } else {
                Structure::Parallel
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StageKind;

    fn chain() -> Pipeline {
        Pipeline::sequence(vec![
            Stage::transform("prompt").into(),
            Stage::model_call("llm").with_model("gpt-3.5-turbo").into(),
            Stage::parser("json").into(),
        ])
    }

    #[test]
    fn test_single_stage() {
        let graph = Inspector::inspect(&Stage::model_call("solo").into());
        assert_eq!(graph.len(), 1);
        assert!(graph.edges().is_empty());
        assert_eq!(graph.structure(), Structure::Single);
        assert_eq!(graph.nodes()[0].id, NodeId(0));
        assert_eq!(graph.nodes()[0].path.to_string(), "root");
    }

    #[test]
    fn test_sequence_chain_edges() {
        let graph = Inspector::inspect(&chain());
        assert_eq!(graph.structure(), Structure::Sequence);
        let ids: Vec<NodeId> = graph.nodes().iter().map(|node| node.id).collect();
        assert_eq!(ids, vec![NodeId(0), NodeId(1), NodeId(2)]);
        assert_eq!(
            graph.edges(),
            &[
                GraphEdge {
                    from: NodeId(0),
                    to: NodeId(1)
                },
                GraphEdge {
                    from: NodeId(1),
                    to: NodeId(2)
                },
            ]
        );
    }

    #[test]
    fn test_parallel_flat() {
        let pipeline = Pipeline::parallel(vec![
            ("a", Pipeline::Stage(Stage::model_call("m1"))),
            ("b", Pipeline::Stage(Stage::model_call("m2"))),
        ]);
        let graph = Inspector::inspect(&pipeline);
        assert_eq!(graph.structure(), Structure::Parallel);
        assert_eq!(graph.len(), 2);
        // Flat fan-out has no internal edges: branches never feed each other.
        assert!(graph.edges().is_empty());
    }

    #[test]
    fn test_nested_fan_out_fan_in() {
        // prompt -> { a: llm_a, b: llm_b } -> aggregate
        let pipeline = Pipeline::sequence(vec![
            Stage::transform("prompt").into(),
            Pipeline::parallel(vec![
                ("a", Pipeline::Stage(Stage::model_call("llm_a"))),
                ("b", Pipeline::Stage(Stage::model_call("llm_b"))),
            ]),
            Stage::aggregator("aggregate").into(),
        ]);
        let graph = Inspector::inspect(&pipeline);
        assert_eq!(graph.structure(), Structure::Nested);
        assert_eq!(graph.len(), 4);

        let edges = graph.edges();
        // Fan-out from prompt to both branches, fan-in from both to aggregate.
        assert!(edges.contains(&GraphEdge {
            from: NodeId(0),
            to: NodeId(1)
        }));
        assert!(edges.contains(&GraphEdge {
            from: NodeId(0),
            to: NodeId(2)
        }));
        assert!(edges.contains(&GraphEdge {
            from: NodeId(1),
            to: NodeId(3)
        }));
        assert!(edges.contains(&GraphEdge {
            from: NodeId(2),
            to: NodeId(3)
        }));
        assert_eq!(edges.len(), 4);
    }

    #[test]
    fn test_nested_sequence_in_parallel() {
        let pipeline = Pipeline::parallel(vec![
            ("direct", Pipeline::Stage(Stage::model_call("m"))),
            ("chained", chain()),
        ]);
        let graph = Inspector::inspect(&pipeline);
        assert_eq!(graph.structure(), Structure::Nested);
        assert_eq!(graph.len(), 4);
        // Only the inner chain contributes edges.
        assert_eq!(graph.edges().len(), 2);
    }

    #[test]
    fn test_unclassified_stage_degrades_to_unknown() {
        let pipeline = Pipeline::sequence(vec![
            Stage::opaque("mystery").into(),
            Stage::model_call("llm").into(),
        ]);
        let graph = Inspector::inspect(&pipeline);
        assert_eq!(graph.nodes()[0].kind, StageKind::Unknown);
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_inspection_is_idempotent() {
        let pipeline = Pipeline::sequence(vec![
            chain(),
            Pipeline::parallel(vec![
                ("x", Pipeline::Stage(Stage::model_call("mx"))),
                ("y", chain()),
            ]),
        ]);
        let first = Inspector::inspect(&pipeline);
        let second = Inspector::inspect(&pipeline);
        assert_eq!(first, second);
    }

    #[test]
    fn test_attributes_carried_onto_nodes() {
        let graph = Inspector::inspect(&chain());
        assert_eq!(graph.nodes()[1].model(), Some("gpt-3.5-turbo"));
        assert!(graph.nodes()[0].attributes.is_empty());
    }

    #[test]
    fn test_no_self_loops() {
        let pipeline = Pipeline::sequence(vec![chain(), chain()]);
        let graph = Inspector::inspect(&pipeline);
        assert!(graph.edges().iter().all(|edge| edge.from != edge.to));
    }
}
