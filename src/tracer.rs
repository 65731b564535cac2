//! Runtime tracing
//!
//! A [`TraceSession`] attaches to one execution of a pipeline through the
//! [`ExecutionObserver`] hook contract and records a time-ordered
//! [`EventLog`] keyed to the graph model's node ids.
//!
//! The tracer is strictly observational: hooks append an event and return.
//! The only serialization point is the mutex around the shared log append;
//! the traced work itself is never serialized, delayed, or retried, and an
//! engine error is recorded and then re-raised by the engine unchanged.
//!
//! Invocations are mapped to node ids by stage path, the same pre-order
//! identity the inspector assigned, so traced nodes align 1:1 with graph
//! nodes even though the two analyses run independently. An invocation whose
//! path the inspector never produced (structure decided at execution time,
//! e.g. conditional branching) synthesizes an ad-hoc node and flags
//! structural drift instead of dropping the event.

use crate::graph::{GraphModel, NodeId, StageNode};
use crate::pipeline::{ExecutionObserver, StageIdentity, StageKind, StageOutput, StagePath};
use crate::tokens::TokenCounter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of monotonic timestamps for a session.
///
/// The default implementation reads a monotonic OS clock; tests inject a
/// manually advanced clock to script exact latencies.
pub trait Clock: Send + Sync {
    /// Time elapsed since the session's origin.
    fn now(&self) -> Duration;
}

/// Real monotonic clock anchored at session start.
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Anchor a clock at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Kind of observed occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Stage invocation began
    Start,
    /// Stage invocation completed
    End,
    /// Stage invocation failed
    Error,
}

/// Token/cost measurements attached to an `End` event on a model-call node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    /// Prompt tokens (provider-reported or estimated)
    pub prompt_tokens: u64,
    /// Completion tokens (provider-reported or estimated)
    pub completion_tokens: u64,
    /// Dollar cost directly reported by the provider, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reported_cost: Option<f64>,
}

/// One observed occurrence during execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Node this event belongs to
    pub node_id: NodeId,
    /// Start, end, or error
    pub event_type: EventType,
    /// Monotonic offset from session start, in seconds
    #[serde(with = "duration_secs")]
    pub timestamp: Duration,
    /// Token/cost measurements (end events on model-call nodes only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<EventPayload>,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// The ordered collection of events recorded for one execution session.
///
/// Carries any ad-hoc nodes synthesized for drifting invocations alongside
/// the events that reference them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventLog {
    events: Vec<Event>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    synthesized_nodes: Vec<StageNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    drift_warnings: Vec<String>,
}

impl EventLog {
    /// Assemble a log directly. Normally a log comes from
    /// [`TraceSession::events`]; this constructor exists for analyzer tests
    /// and for engines that persist and replay logs.
    #[must_use]
    pub fn from_parts(
        events: Vec<Event>,
        synthesized_nodes: Vec<StageNode>,
        drift_warnings: Vec<String>,
    ) -> Self {
        Self {
            events,
            synthesized_nodes,
            drift_warnings,
        }
    }

    /// Events in recording order.
    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Ad-hoc nodes synthesized for invocations the inspector never saw.
    #[must_use]
    pub fn synthesized_nodes(&self) -> &[StageNode] {
        &self.synthesized_nodes
    }

    /// Structural-drift warnings, one per synthesized path.
    #[must_use]
    pub fn drift_warnings(&self) -> &[String] {
        &self.drift_warnings
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether no event was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// An open (unmatched) start for one invocation of a node.
#[derive(Debug)]
struct OpenCall {
    prompt_tokens: Option<u64>,
}

#[derive(Debug, Default)]
struct TraceState {
    events: Vec<Event>,
    /// Per-node stacks of unmatched starts; a node inside a loop-like
    /// upstream structure may have several invocations in flight.
    open: HashMap<NodeId, Vec<OpenCall>>,
    synthesized: Vec<StageNode>,
    synth_index: HashMap<StagePath, NodeId>,
    drift: Vec<String>,
}

/// Live tracing handle for one pipeline execution.
///
/// Install it as the engine's observer, run the pipeline, then read
/// [`TraceSession::events`]. Reading works on every exit path, including
/// after an engine error or panic, as long as the handle is alive.
pub struct TraceSession {
    node_index: HashMap<StagePath, NodeId>,
    /// Token counters for inspected model-call nodes, keyed by id.
    counters: HashMap<NodeId, TokenCounter>,
    fallback_counter: TokenCounter,
    base_node_count: usize,
    clock: Arc<dyn Clock>,
    state: Mutex<TraceState>,
}

impl std::fmt::Debug for TraceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceSession")
            .field("nodes", &self.base_node_count)
            .field("events", &self.state.lock().events.len())
            .finish()
    }
}

impl TraceSession {
    /// Start a session against an inspected graph, using the real clock.
    #[must_use]
    pub fn start(graph: &GraphModel) -> Self {
        Self::start_with_clock(graph, Arc::new(MonotonicClock::new()))
    }

    /// Start a session with an injected clock.
    #[must_use]
    pub fn start_with_clock(graph: &GraphModel, clock: Arc<dyn Clock>) -> Self {
        let node_index = graph
            .nodes()
            .iter()
            .map(|node| (node.path.clone(), node.id))
            .collect();

        // Built eagerly so no tokenizer work ever happens under the lock.
        let counters = graph
            .model_call_nodes()
            .map(|node| {
                let counter = node
                    .model()
                    .map(TokenCounter::for_model)
                    .unwrap_or_default();
                (node.id, counter)
            })
            .collect();

        Self {
            node_index,
            counters,
            fallback_counter: TokenCounter::default(),
            base_node_count: graph.len(),
            clock,
            state: Mutex::new(TraceState::default()),
        }
    }

    /// Snapshot the event log recorded so far.
    ///
    /// Callable at any time and on every exit path; after the run completes
    /// this is the session's final log.
    #[must_use]
    pub fn events(&self) -> EventLog {
        let state = self.state.lock();
        EventLog {
            events: state.events.clone(),
            synthesized_nodes: state.synthesized.clone(),
            drift_warnings: state.drift.clone(),
        }
    }

    fn counter_for(&self, id: Option<NodeId>) -> &TokenCounter {
        id.and_then(|id| self.counters.get(&id))
            .unwrap_or(&self.fallback_counter)
    }

    /// Resolve an identity to a node id, synthesizing an ad-hoc node for
    /// paths the inspector never produced. Must be called under the lock.
    fn resolve_locked(&self, state: &mut TraceState, identity: &StageIdentity) -> NodeId {
        if let Some(&id) = self.node_index.get(&identity.path) {
            return id;
        }
        if let Some(&id) = state.synth_index.get(&identity.path) {
            return id;
        }

        let id = NodeId(self.base_node_count + state.synthesized.len());
        state.synthesized.push(StageNode {
            id,
            kind: identity.kind.clone(),
            label: identity.label.clone(),
            path: identity.path.clone(),
            attributes: Default::default(),
        });
        state.synth_index.insert(identity.path.clone(), id);
        let warning = format!(
            "stage '{}' at path {} executed but was never inspected; recorded as ad-hoc node {}",
            identity.label, identity.path, id
        );
        tracing::warn!(path = %identity.path, label = %identity.label, "structural drift detected");
        state.drift.push(warning);
        id
    }
}

impl ExecutionObserver for TraceSession {
    fn on_stage_start(&self, identity: &StageIdentity, input: &str) {
        let timestamp = self.clock.now();

        // Tokenize outside the lock; only model calls need a prompt count.
        let prompt_tokens = if identity.kind == StageKind::ModelCall {
            let known = self.node_index.get(&identity.path).copied();
            Some(self.counter_for(known).count(input))
        } else {
            None
        };

        let mut state = self.state.lock();
        let id = self.resolve_locked(&mut state, identity);
        state
            .open
            .entry(id)
            .or_default()
            .push(OpenCall { prompt_tokens });
        state.events.push(Event {
            node_id: id,
            event_type: EventType::Start,
            timestamp,
            payload: None,
        });
    }

    fn on_stage_end(&self, identity: &StageIdentity, output: &StageOutput) {
        let timestamp = self.clock.now();

        // Provider-reported usage wins; otherwise estimate completion tokens
        // from the output text before taking the lock.
        let estimated_completion = if identity.kind == StageKind::ModelCall
            && output.usage.is_none()
        {
            let known = self.node_index.get(&identity.path).copied();
            Some(self.counter_for(known).count(&output.text))
        } else {
            None
        };

        let mut state = self.state.lock();
        let id = self.resolve_locked(&mut state, identity);
        let open = state.open.get_mut(&id).and_then(Vec::pop);

        let payload = if identity.kind == StageKind::ModelCall {
            let (prompt_tokens, completion_tokens) = match output.usage {
                Some(usage) => (usage.prompt_tokens, usage.completion_tokens),
                None => (
                    open.and_then(|call| call.prompt_tokens).unwrap_or(0),
                    estimated_completion.unwrap_or(0),
                ),
            };
            Some(EventPayload {
                prompt_tokens,
                completion_tokens,
                reported_cost: output.cost,
            })
        } else {
            None
        };

        state.events.push(Event {
            node_id: id,
            event_type: EventType::End,
            timestamp,
            payload,
        });
    }

    fn on_stage_error(&self, identity: &StageIdentity, error: &str) {
        let timestamp = self.clock.now();
        let mut state = self.state.lock();
        let id = self.resolve_locked(&mut state, identity);
        state.open.get_mut(&id).and_then(Vec::pop);
        state.events.push(Event {
            node_id: id,
            event_type: EventType::Error,
            timestamp,
            payload: None,
        });
        tracing::debug!(node = %id, %error, "stage error recorded");
    }
}
