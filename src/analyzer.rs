//! Performance and cost analysis
//!
//! Consumes a frozen [`GraphModel`] and a completed [`EventLog`] and produces
//! a read-only [`Report`]: latency breakdown, cost breakdown, token
//! efficiency, and ranked optimization suggestions.
//!
//! Every recoverable condition degrades into a flag on the report instead of
//! failing it: an unknown model prices at zero and lands in
//! `unpriced_nodes`, a node that never ran simply contributes nothing, and
//! drifting invocations arrive pre-synthesized by the tracer.

use crate::graph::{GraphModel, NodeId, StageNode};
use crate::pricing::PricingTable;
use crate::tracer::{EventLog, EventType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

/// Prompt-token count below which a prompt is considered optimized.
pub const PROMPT_TOKENS_OPTIMIZED: u64 = 100;
/// Prompt-token count at which a prompt becomes excessive.
pub const PROMPT_TOKENS_EXCESSIVE: u64 = 500;
/// Prompt-token count warranting an urgent reduction suggestion.
const PROMPT_TOKENS_SEVERE: u64 = 1000;
/// Prompt size the reduction suggestions treat as achievable.
const PROMPT_TOKENS_TARGET: u64 = 300;
/// Dollar cost per model call above which cost is flagged.
const COST_PER_CALL_HIGH: f64 = 0.01;
/// Total run latency in seconds above which latency is flagged.
const TOTAL_LATENCY_HIGH: f64 = 3.0;
/// Model call count above which combining prompts is suggested.
const MANY_MODEL_CALLS: usize = 3;

/// How urgent a suggestion is.
///
/// Ordered so that `High > Medium > Low`; reports sort descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational, often a confirmation that nothing is wrong
    Low,
    /// Worth addressing
    Medium,
    /// Significant cost or latency impact
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// One ranked optimization suggestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    /// Urgency of the suggestion
    pub severity: Severity,
    /// Human-readable recommendation
    pub message: String,
    /// Rough estimate of what acting on it saves, when quantifiable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_savings: Option<String>,
}

impl Suggestion {
    fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            estimated_savings: None,
        }
    }

    fn with_savings(mut self, savings: impl Into<String>) -> Self {
        self.estimated_savings = Some(savings.into());
        self
    }
}

/// Coarse bucketing of total prompt tokens.
///
/// Drives suggestion text only; not a precise metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EfficiencyScore {
    /// Under 100 prompt tokens
    Optimized,
    /// Under 500 prompt tokens
    Acceptable,
    /// 500 prompt tokens or more
    Excessive,
}

impl EfficiencyScore {
    fn from_prompt_tokens(prompt_tokens: u64) -> Self {
        if prompt_tokens < PROMPT_TOKENS_OPTIMIZED {
            Self::Optimized
        } else if prompt_tokens < PROMPT_TOKENS_EXCESSIVE {
            Self::Acceptable
        } else {
            Self::Excessive
        }
    }
}

/// Token counts across the whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTotals {
    /// Total prompt tokens
    pub prompt: u64,
    /// Total completion tokens
    pub completion: u64,
    /// Prompt + completion
    pub total: u64,
}

/// Token and cost totals attributed to one model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelTotals {
    /// Prompt tokens sent to this model
    pub prompt_tokens: u64,
    /// Completion tokens received from this model
    pub completion_tokens: u64,
    /// Dollar cost attributed to this model
    pub cost: f64,
    /// Completed calls to this model
    pub calls: usize,
}

/// Cost extrapolations assuming this run is representative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostProjection {
    /// Average cost per model call in this run
    pub per_call: f64,
    /// Projected cost of 1,000 runs
    pub per_1k_runs: f64,
    /// Projected monthly cost at roughly 1,000 runs per day
    pub per_month: f64,
}

/// Read-only analysis of one traced run.
///
/// Computed once from a frozen graph and completed log; never mutated.
/// Serializes to JSON with seconds, dollars-as-decimal, and integer token
/// counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Wall-clock span of the run in seconds (not a sum: branches overlap)
    pub total_latency: f64,
    /// Per-node latency in seconds, summed over that node's invocations
    pub per_node_latency: BTreeMap<NodeId, f64>,
    /// Nodes that errored or were left mid-flight when the run ended
    pub errored_nodes: Vec<NodeId>,
    /// Total dollar cost of the run
    pub total_cost: f64,
    /// Per-node dollar cost
    pub per_node_cost: BTreeMap<NodeId, f64>,
    /// Model-call nodes whose cost could not be estimated (missing pricing)
    pub unpriced_nodes: Vec<NodeId>,
    /// Token counts across the run
    pub token_totals: TokenTotals,
    /// Prompt tokens per completion token
    pub prompt_completion_ratio: f64,
    /// Per-model token/cost totals
    pub per_model: BTreeMap<String, ModelTotals>,
    /// Completed model calls in this run
    pub model_calls: usize,
    /// Cost extrapolations
    pub cost_projection: CostProjection,
    /// Coarse prompt-size bucket
    pub efficiency_score: EfficiencyScore,
    /// Ranked suggestions, severity descending, insertion-stable on ties
    pub suggestions: Vec<Suggestion>,
    /// Structural-drift warnings carried over from the tracer
    pub drift_warnings: Vec<String>,
    /// When this report was generated
    pub generated_at: DateTime<Utc>,
}

impl Report {
    /// Serialize the report to pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Serialization`] if encoding fails.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Performance ===")?;
        writeln!(f, "total latency: {:.3}s", self.total_latency)?;
        writeln!(f, "model calls:   {}", self.model_calls)?;
        if self.model_calls > 0 {
            writeln!(
                f,
                "avg per call:  {:.3}s",
                self.total_latency / self.model_calls as f64
            )?;
        }
        writeln!(f, "\n=== Cost ===")?;
        writeln!(f, "total:         ${:.6}", self.total_cost)?;
        writeln!(f, "per call:      ${:.6}", self.cost_projection.per_call)?;
        writeln!(f, "per 1k runs:   ${:.2}", self.cost_projection.per_1k_runs)?;
        writeln!(f, "\n=== Tokens ===")?;
        writeln!(
            f,
            "prompt {} / completion {} / total {}",
            self.token_totals.prompt, self.token_totals.completion, self.token_totals.total
        )?;
        writeln!(f, "efficiency: {:?}", self.efficiency_score)?;
        writeln!(f, "\n=== Suggestions ===")?;
        for (index, suggestion) in self.suggestions.iter().enumerate() {
            writeln!(
                f,
                "{}. [{}] {}",
                index + 1,
                suggestion.severity,
                suggestion.message
            )?;
            if let Some(savings) = &suggestion.estimated_savings {
                writeln!(f, "   estimated savings: {savings}")?;
            }
        }
        for warning in &self.drift_warnings {
            writeln!(f, "drift: {warning}")?;
        }
        Ok(())
    }
}

/// Aggregates an event log against a graph model into a [`Report`].
#[derive(Debug, Clone, Default)]
pub struct Analyzer {
    pricing: PricingTable,
}

impl Analyzer {
    /// Create an analyzer with the given pricing table.
    #[must_use]
    pub fn new(pricing: PricingTable) -> Self {
        Self { pricing }
    }

    /// Analyze one completed (or failed) run.
    #[must_use]
    pub fn analyze(&self, graph: &GraphModel, log: &EventLog) -> Report {
        let nodes: HashMap<NodeId, &StageNode> = graph
            .nodes()
            .iter()
            .chain(log.synthesized_nodes())
            .map(|node| (node.id, node))
            .collect();

        let mut per_node_latency: BTreeMap<NodeId, f64> = BTreeMap::new();
        let mut errored: Vec<NodeId> = Vec::new();
        let mut open: HashMap<NodeId, Vec<Duration>> = HashMap::new();
        let mut per_node_cost: BTreeMap<NodeId, f64> = BTreeMap::new();
        let mut unpriced: Vec<NodeId> = Vec::new();
        let mut per_model: BTreeMap<String, ModelTotals> = BTreeMap::new();
        let mut per_node_calls: HashMap<NodeId, usize> = HashMap::new();
        let mut totals = TokenTotals::default();
        let mut total_cost = 0.0;
        let mut model_calls = 0usize;

        for event in log.events() {
            match event.event_type {
                EventType::Start => {
                    open.entry(event.node_id).or_default().push(event.timestamp);
                }
                EventType::End | EventType::Error => {
                    if let Some(start) = open.get_mut(&event.node_id).and_then(Vec::pop) {
                        let elapsed = event.timestamp.saturating_sub(start).as_secs_f64();
                        *per_node_latency.entry(event.node_id).or_insert(0.0) += elapsed;
                    }
                    if event.event_type == EventType::Error
                        && !errored.contains(&event.node_id)
                    {
                        errored.push(event.node_id);
                    }
                }
            }

            let Some(payload) = event.payload else {
                continue;
            };
            // Payloads only appear on End events for model-call nodes.
            model_calls += 1;
            *per_node_calls.entry(event.node_id).or_insert(0) += 1;
            totals.prompt += payload.prompt_tokens;
            totals.completion += payload.completion_tokens;

            let model = nodes
                .get(&event.node_id)
                .and_then(|node| node.model())
                .map(str::to_string);
            let cost = match payload.reported_cost {
                Some(cost) => Some(cost),
                None => model.as_deref().and_then(|model| {
                    self.pricing
                        .resolve(model)
                        .map(|pricing| pricing.cost(payload.prompt_tokens, payload.completion_tokens))
                }),
            };

            match cost {
                Some(cost) => {
                    *per_node_cost.entry(event.node_id).or_insert(0.0) += cost;
                    total_cost += cost;
                    if let Some(model) = &model {
                        let entry = per_model.entry(model.clone()).or_default();
                        entry.prompt_tokens += payload.prompt_tokens;
                        entry.completion_tokens += payload.completion_tokens;
                        entry.cost += cost;
                        entry.calls += 1;
                    }
                }
                None => {
                    // Pricing miss: flagged zero-cost contribution.
                    per_node_cost.entry(event.node_id).or_insert(0.0);
                    if !unpriced.contains(&event.node_id) {
                        unpriced.push(event.node_id);
                        tracing::debug!(node = %event.node_id, "cost estimate unavailable");
                    }
                    if let Some(model) = &model {
                        let entry = per_model.entry(model.clone()).or_default();
                        entry.prompt_tokens += payload.prompt_tokens;
                        entry.completion_tokens += payload.completion_tokens;
                        entry.calls += 1;
                    }
                }
            }
        }

        // A start with no matching end means the run aborted mid-stage.
        for (node_id, starts) in &open {
            if !starts.is_empty() && !errored.contains(node_id) {
                errored.push(*node_id);
            }
        }
        errored.sort_unstable();

        totals.total = totals.prompt + totals.completion;
        let total_latency = run_span(log);
        let efficiency_score = EfficiencyScore::from_prompt_tokens(totals.prompt);
        let prompt_completion_ratio = if totals.completion > 0 {
            totals.prompt as f64 / totals.completion as f64
        } else {
            0.0
        };

        let cost_projection = CostProjection {
            per_call: total_cost / model_calls.max(1) as f64,
            per_1k_runs: total_cost * 1000.0,
            per_month: total_cost * 30_000.0,
        };

        let suggestions = self.build_suggestions(SuggestionInput {
            nodes: &nodes,
            errored: &errored,
            per_node_calls: &per_node_calls,
            totals,
            total_cost,
            total_latency,
            model_calls,
        });

        Report {
            total_latency,
            per_node_latency,
            errored_nodes: errored,
            total_cost,
            per_node_cost,
            unpriced_nodes: unpriced,
            token_totals: totals,
            prompt_completion_ratio,
            per_model,
            model_calls,
            cost_projection,
            efficiency_score,
            suggestions,
            drift_warnings: log.drift_warnings().to_vec(),
            generated_at: Utc::now(),
        }
    }

    fn build_suggestions(&self, input: SuggestionInput<'_>) -> Vec<Suggestion> {
        let mut suggestions = Vec::new();

        // Failed stages first; everything below is tuning advice.
        if !input.errored.is_empty() {
            let labels: Vec<&str> = input
                .errored
                .iter()
                .filter_map(|id| input.nodes.get(id).map(|node| node.label.as_str()))
                .collect();
            suggestions.push(Suggestion::new(
                Severity::High,
                format!(
                    "{} stage(s) failed or did not finish ({}); latencies are measured up to the failure point",
                    input.errored.len(),
                    labels.join(", ")
                ),
            ));
        }

        if input.model_calls > 0 {
            let per_call = input.total_cost / input.model_calls as f64;
            if per_call > COST_PER_CALL_HIGH {
                suggestions.push(
                    Suggestion::new(
                        Severity::High,
                        format!(
                            "high cost per model call (${per_call:.4}); consider a cheaper model or response caching"
                        ),
                    )
                    .with_savings("50-90%"),
                );
            }
        }

        // Model-variant rules are structural: they read the model attribute
        // off the graph, so they fire even for a run that skipped the node.
        for node in input.model_call_nodes() {
            if let Some(model) = node.model() {
                let lower = model.to_lowercase();
                if lower.contains("gpt-4") && !lower.contains("turbo") && !lower.contains("gpt-4o")
                {
                    suggestions.push(
                        Suggestion::new(
                            Severity::High,
                            format!(
                                "'{}' uses {model}; gpt-4-turbo offers comparable quality at a fraction of the price",
                                node.label
                            ),
                        )
                        .with_savings("67%"),
                    );
                } else if lower.contains("gpt-3.5-turbo") && !lower.contains("instruct") {
                    suggestions.push(
                        Suggestion::new(
                            Severity::Low,
                            format!(
                                "'{}' uses {model}; gpt-3.5-turbo-instruct responds faster for completion-style prompts",
                                node.label
                            ),
                        )
                        .with_savings("up to 50% latency reduction"),
                    );
                }
            }
        }

        // Prompt size tiers.
        let prompt = input.totals.prompt;
        if prompt >= PROMPT_TOKENS_SEVERE {
            let reduction = (prompt - PROMPT_TOKENS_EXCESSIVE) * 100 / prompt;
            suggestions.push(
                Suggestion::new(
                    Severity::High,
                    format!(
                        "prompts total {prompt} tokens; summarize context or use retrieval for token reduction"
                    ),
                )
                .with_savings(format!("{reduction}% token reduction")),
            );
        } else if prompt >= PROMPT_TOKENS_EXCESSIVE {
            let reduction = (prompt - PROMPT_TOKENS_TARGET) * 100 / prompt;
            suggestions.push(
                Suggestion::new(
                    Severity::Medium,
                    format!(
                        "prompts total {prompt} tokens; review for unnecessary content to get a token reduction"
                    ),
                )
                .with_savings(format!("{reduction}% token reduction")),
            );
        } else if prompt < PROMPT_TOKENS_OPTIMIZED && input.model_calls > 0 {
            suggestions.push(Suggestion::new(
                Severity::Low,
                format!("prompt size ({prompt} tokens) is well optimized"),
            ));
        }

        // Cacheability. The generic note fires whenever the graph has a
        // model-call node at all, so a report over such a graph is never
        // silent about caching even if the run skipped the model.
        if let Some(node) = input
            .model_call_nodes()
            .find(|node| input.per_node_calls.get(&node.id).copied().unwrap_or(0) >= 2)
        {
            let calls = input.per_node_calls[&node.id];
            suggestions.push(
                Suggestion::new(
                    Severity::Medium,
                    format!(
                        "'{}' made {calls} identical-model calls in one run; cache responses for repeated inputs",
                        node.label
                    ),
                )
                .with_savings("50-90%"),
            );
        } else if input.model_call_nodes().next().is_some() {
            suggestions.push(
                Suggestion::new(
                    Severity::Medium,
                    "cache model responses for repeated queries to cut recurring cost",
                )
                .with_savings("50-90%"),
            );
        }

        if input.model_calls > MANY_MODEL_CALLS {
            let reduction = (input.model_calls - 1) * 100 / input.model_calls;
            suggestions.push(
                Suggestion::new(
                    Severity::Medium,
                    format!(
                        "run makes {} model calls; combining prompts would reduce round trips",
                        input.model_calls
                    ),
                )
                .with_savings(format!("{reduction}% call reduction")),
            );
        }

        if input.total_latency > TOTAL_LATENCY_HIGH {
            suggestions.push(
                Suggestion::new(
                    Severity::High,
                    format!(
                        "total latency is {:.2}s; consider streaming responses or parallelizing independent stages",
                        input.total_latency
                    ),
                )
                .with_savings("30-50% latency reduction"),
            );
        }

        // Faster-provider rule, matching the classic advice for OpenAI-style
        // models.
        if input
            .model_call_nodes()
            .any(|node| node.model().is_some_and(|m| !m.to_lowercase().contains("claude")))
        {
            suggestions.push(
                Suggestion::new(
                    Severity::Low,
                    "for latency-sensitive paths, a fast-inference provider (e.g. Groq-hosted llama-3) may help",
                )
                .with_savings("up to 90% latency reduction"),
            );
        }

        // Stable sort keeps insertion order within a severity.
        suggestions.sort_by(|a, b| b.severity.cmp(&a.severity));
        suggestions
    }
}

/// Borrowed bundle of everything the suggestion rules look at.
struct SuggestionInput<'a> {
    nodes: &'a HashMap<NodeId, &'a StageNode>,
    errored: &'a [NodeId],
    per_node_calls: &'a HashMap<NodeId, usize>,
    totals: TokenTotals,
    total_cost: f64,
    total_latency: f64,
    model_calls: usize,
}

impl<'a> SuggestionInput<'a> {
    /// Model-call nodes in id order so suggestion output is deterministic.
    /// Includes synthesized nodes and nodes the run never reached.
    fn model_call_nodes(&self) -> impl Iterator<Item = &'a StageNode> + '_ {
        let mut nodes: Vec<&'a StageNode> = self
            .nodes
            .values()
            .filter(|node| node.is_model_call())
            .copied()
            .collect();
        nodes.sort_by_key(|node| node.id);
        nodes.into_iter()
    }
}

/// Wall-clock span of the run: latest minus earliest timestamp.
fn run_span(log: &EventLog) -> f64 {
    let timestamps = log.events().iter().map(|event| event.timestamp);
    match (timestamps.clone().min(), timestamps.max()) {
        (Some(first), Some(last)) => last.saturating_sub(first).as_secs_f64(),
        _ => 0.0,
    }
}
