//! Pipeline descriptions and the execution hook contract
//!
//! This module defines the closed set of tagged stage variants that the rest
//! of the crate operates on:
//!
//! - [`Stage`] - one unit of work (prompt formatting, a model call, parsing)
//! - [`Pipeline`] - a composed tree of stages: single, sequence, or parallel
//! - [`PipelineVisitor`] - pre-order traversal seam used by the inspector
//! - [`ExecutionObserver`] - the per-stage start/end/error hook contract an
//!   execution engine calls into
//!
//! The execution engine itself lives outside this crate. It only needs to
//! call the observer hooks for every stage invocation, passing a
//! [`StageIdentity`] derived from the same pre-order position the inspector
//! sees, which is what keeps traced events aligned with inspected nodes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// High-level role of a pipeline stage.
///
/// `ModelCall` stages are the only ones that carry token and cost metrics.
/// Unrecognized components map to `Unknown` rather than failing inspection.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Produces input data (retriever, loader, constant)
    Source,
    /// Reshapes data without calling a model (prompt formatting, mapping)
    Transform,
    /// Invokes a generative model; sole source of token/cost metrics
    ModelCall,
    /// Decodes structured output from model text
    Parser,
    /// Reduces multiple inputs into one (fan-in, summarization over branches)
    Aggregator,
    /// Could not be classified; inspection degrades here instead of failing
    Unknown,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Transform => write!(f, "transform"),
            Self::ModelCall => write!(f, "model_call"),
            Self::Parser => write!(f, "parser"),
            Self::Aggregator => write!(f, "aggregator"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Well-known attribute key for the model identifier.
pub const ATTR_MODEL: &str = "model";
/// Well-known attribute key for sampling temperature.
pub const ATTR_TEMPERATURE: &str = "temperature";
/// Well-known attribute key for the completion token cap.
pub const ATTR_MAX_TOKENS: &str = "max_tokens";

/// One pipeline component: a role, a human-readable label, and whatever
/// configuration the component exposes publicly.
///
/// Attributes are stored in an ordered map so that exports of the same
/// pipeline are byte-identical. Absent configuration is simply omitted.
///
/// # Example
///
/// ```
/// use chainlens::pipeline::Stage;
///
/// let stage = Stage::model_call("summarize")
///     .with_model("gpt-3.5-turbo")
///     .with_temperature(0.2);
/// assert_eq!(stage.model(), Some("gpt-3.5-turbo"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    /// Classified role of this stage
    pub kind: StageKind,
    /// Human-readable name
    pub label: String,
    /// Publicly exposed configuration (model, temperature, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl Stage {
    fn new(kind: StageKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// A data source stage.
    pub fn source(label: impl Into<String>) -> Self {
        Self::new(StageKind::Source, label)
    }

    /// A prompt-formatting or other data-shaping stage.
    pub fn transform(label: impl Into<String>) -> Self {
        Self::new(StageKind::Transform, label)
    }

    /// A generative model call.
    pub fn model_call(label: impl Into<String>) -> Self {
        Self::new(StageKind::ModelCall, label)
    }

    /// A structured-output decoding stage.
    pub fn parser(label: impl Into<String>) -> Self {
        Self::new(StageKind::Parser, label)
    }

    /// A reduction stage joining multiple upstream outputs.
    pub fn aggregator(label: impl Into<String>) -> Self {
        Self::new(StageKind::Aggregator, label)
    }

    /// A stage whose role could not be determined.
    pub fn opaque(label: impl Into<String>) -> Self {
        Self::new(StageKind::Unknown, label)
    }

    /// Set the model identifier attribute.
    #[must_use]
    pub fn with_model(self, model: impl Into<String>) -> Self {
        self.with_attribute(ATTR_MODEL, model.into())
    }

    /// Set the sampling temperature attribute.
    #[must_use]
    pub fn with_temperature(self, temperature: f64) -> Self {
        self.with_attribute(ATTR_TEMPERATURE, temperature.to_string())
    }

    /// Set the completion token cap attribute.
    #[must_use]
    pub fn with_max_tokens(self, max_tokens: u64) -> Self {
        self.with_attribute(ATTR_MAX_TOKENS, max_tokens.to_string())
    }

    /// Set an arbitrary attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// The model identifier, if this stage exposes one.
    #[must_use]
    pub fn model(&self) -> Option<&str> {
        self.attributes.get(ATTR_MODEL).map(String::as_str)
    }
}

/// Position of a stage within the composition tree.
///
/// Each element is the child index at one composition level, in pre-order;
/// a bare single-stage pipeline has the empty path. Paths are the stable
/// identity shared between inspection and tracing: two walks of the same
/// structure always assign the same paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StagePath(Vec<usize>);

impl StagePath {
    /// The root path (a pipeline that is a single bare stage).
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Path extended by one child index.
    #[must_use]
    pub fn child(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(index);
        Self(segments)
    }

    /// Path segments, outermost first.
    #[must_use]
    pub fn segments(&self) -> &[usize] {
        &self.0
    }
}

impl fmt::Display for StagePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "root");
        }
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "{}", parts.join("."))
    }
}

/// A composed pipeline: a single stage, a linear sequence, or a keyed
/// parallel fan-out whose branch outputs are joined into a mapping.
///
/// Nesting is arbitrary: any sequence element or parallel branch may itself
/// be a composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pipeline {
    /// A single uncomposed stage
    Stage(Stage),
    /// Elements run in order, each feeding the next
    Sequence(Vec<Pipeline>),
    /// Named branches fed the same input, outputs joined by key
    Parallel(Vec<(String, Pipeline)>),
}

impl Pipeline {
    /// Build a sequence pipeline from parts.
    #[must_use]
    pub fn sequence(steps: Vec<Pipeline>) -> Self {
        Self::Sequence(steps)
    }

    /// Build a parallel pipeline from named branches.
    pub fn parallel(branches: Vec<(impl Into<String>, Pipeline)>) -> Self {
        Self::Parallel(
            branches
                .into_iter()
                .map(|(key, branch)| (key.into(), branch))
                .collect(),
        )
    }

    /// Number of leaf stages in this pipeline.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        match self {
            Self::Stage(_) => 1,
            Self::Sequence(steps) => steps.iter().map(Self::stage_count).sum(),
            Self::Parallel(branches) => {
                branches.iter().map(|(_, branch)| branch.stage_count()).sum()
            }
        }
    }

    /// Walk the pipeline in pre-order, driving the visitor.
    ///
    /// This is the single traversal both the inspector and any external
    /// consumer use, so path assignment can never diverge between them.
    pub fn walk<V: PipelineVisitor + ?Sized>(&self, visitor: &mut V) {
        self.walk_at(&StagePath::root(), visitor);
    }

    fn walk_at<V: PipelineVisitor + ?Sized>(&self, path: &StagePath, visitor: &mut V) {
        match self {
            Self::Stage(stage) => visitor.visit_stage(path, stage),
            Self::Sequence(steps) => {
                visitor.enter_sequence(path, steps.len());
                for (index, step) in steps.iter().enumerate() {
                    step.walk_at(&path.child(index), visitor);
                }
                visitor.exit_sequence(path);
            }
            Self::Parallel(branches) => {
                let keys: Vec<&str> = branches.iter().map(|(key, _)| key.as_str()).collect();
                visitor.enter_parallel(path, &keys);
                for (index, (_, branch)) in branches.iter().enumerate() {
                    branch.walk_at(&path.child(index), visitor);
                }
                visitor.exit_parallel(path);
            }
        }
    }
}

impl From<Stage> for Pipeline {
    fn from(stage: Stage) -> Self {
        Self::Stage(stage)
    }
}

/// Visitor over a pipeline's composition tree.
///
/// All methods have no-op defaults, so new consumers implement only the
/// callbacks they care about, and new composition variants can grow new
/// callbacks without touching existing implementations.
pub trait PipelineVisitor {
    /// Called before a sequence's elements are visited.
    fn enter_sequence(&mut self, path: &StagePath, len: usize) {
        let _ = (path, len);
    }

    /// Called after a sequence's elements were visited.
    fn exit_sequence(&mut self, path: &StagePath) {
        let _ = path;
    }

    /// Called before a parallel block's branches are visited.
    fn enter_parallel(&mut self, path: &StagePath, keys: &[&str]) {
        let _ = (path, keys);
    }

    /// Called after a parallel block's branches were visited.
    fn exit_parallel(&mut self, path: &StagePath) {
        let _ = path;
    }

    /// Called for every leaf stage, in pre-order.
    fn visit_stage(&mut self, path: &StagePath, stage: &Stage) {
        let _ = (path, stage);
    }
}

// ============================================================================
// Execution hook contract
// ============================================================================

/// Identity an execution engine attaches to each stage invocation.
///
/// The path is the stage's pre-order position; kind and label travel along
/// so that an invocation of a stage the inspector never saw can still be
/// turned into a useful ad-hoc node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageIdentity {
    /// Pre-order position within the composition tree
    pub path: StagePath,
    /// Role of the invoked stage
    pub kind: StageKind,
    /// Human-readable name
    pub label: String,
}

impl StageIdentity {
    /// Identity for a stage at the given path.
    #[must_use]
    pub fn of(stage: &Stage, path: StagePath) -> Self {
        Self {
            path,
            kind: stage.kind.clone(),
            label: stage.label.clone(),
        }
    }
}

/// Provider-reported token usage for one model call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt (input) tokens
    pub prompt_tokens: u64,
    /// Completion (output) tokens
    pub completion_tokens: u64,
}

impl TokenUsage {
    /// Create a usage record.
    #[must_use]
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    /// Total tokens (prompt + completion).
    #[must_use]
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Output of a completed stage invocation, as reported by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    /// Textual output of the stage (used for token estimation fallback)
    pub text: String,
    /// Provider-reported usage, when the provider supplies it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    /// Provider-reported cost in dollars, when directly available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl StageOutput {
    /// Output with no provider-reported usage.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
            cost: None,
        }
    }

    /// Attach provider-reported usage.
    #[must_use]
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Attach a provider-reported cost.
    #[must_use]
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }
}

/// Per-stage hooks an execution engine calls during a run.
///
/// Implementations must be safe to call from concurrently executing
/// branches. Hooks return nothing: observation can never alter, retry, or
/// swallow the engine's own control flow, and an engine error must be
/// re-raised by the engine unchanged after `on_stage_error`.
pub trait ExecutionObserver: Send + Sync {
    /// A stage invocation began.
    fn on_stage_start(&self, identity: &StageIdentity, input: &str);

    /// A stage invocation completed.
    fn on_stage_end(&self, identity: &StageIdentity, output: &StageOutput);

    /// A stage invocation failed. The engine re-raises the error itself.
    fn on_stage_error(&self, identity: &StageIdentity, error: &str);
}

/// Observer that ignores every event.
///
/// Useful for running an instrumented engine without an active session.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ExecutionObserver for NoopObserver {
    fn on_stage_start(&self, _identity: &StageIdentity, _input: &str) {}
    fn on_stage_end(&self, _identity: &StageIdentity, _output: &StageOutput) {}
    fn on_stage_error(&self, _identity: &StageIdentity, _error: &str) {}
}
