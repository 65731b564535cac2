//! Debug session façade
//!
//! [`DebugSession`] wires the inspector, tracer, and analyzer together behind
//! one handle: construct it around a pipeline, run the pipeline once through
//! [`DebugSession::trace`], then pull the [`Report`] and graph export.
//!
//! The façade adds no semantics of its own. Every capability remains
//! reachable through the underlying components; sessions exist so the common
//! inspect-run-analyze flow is three calls instead of ten.

use crate::analyzer::{Analyzer, Report};
use crate::error::Error;
use crate::graph::{GraphExport, GraphModel};
use crate::pipeline::{ExecutionObserver, Pipeline};
use crate::pricing::PricingTable;
use crate::tracer::{Clock, EventLog, TraceSession};
use std::sync::Arc;
use uuid::Uuid;

/// One debugging session around one pipeline.
///
/// The graph model is built eagerly at construction and never changes; each
/// [`trace`](DebugSession::trace) call replaces the session's event log and
/// invalidates any cached report.
///
/// # Example
///
/// ```
/// use chainlens::pipeline::{Pipeline, Stage};
/// use chainlens::session::DebugSession;
///
/// let pipeline = Pipeline::sequence(vec![
///     Stage::transform("prompt").into(),
///     Stage::model_call("llm").with_model("gpt-3.5-turbo").into(),
/// ]);
/// let mut session = DebugSession::new(pipeline);
/// assert_eq!(session.graph().len(), 2);
///
/// // Hand the observer to whatever engine executes the pipeline; the
/// // engine's result passes through unchanged.
/// let result: Result<&str, &str> = session.trace(|_observer| Ok("final output"));
/// assert_eq!(result, Ok("final output"));
/// ```
pub struct DebugSession {
    session_id: Uuid,
    pipeline: Pipeline,
    graph: GraphModel,
    analyzer: Analyzer,
    clock: Option<Arc<dyn Clock>>,
    log: Option<EventLog>,
    report: Option<Report>,
}

impl std::fmt::Debug for DebugSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugSession")
            .field("session_id", &self.session_id)
            .field("nodes", &self.graph.len())
            .field("traced", &self.log.is_some())
            .finish()
    }
}

impl DebugSession {
    /// Open a session around a pipeline with the built-in pricing table.
    #[must_use]
    pub fn new(pipeline: Pipeline) -> Self {
        Self::with_pricing(pipeline, PricingTable::defaults())
    }

    /// Open a session with a caller-supplied pricing table.
    #[must_use]
    pub fn with_pricing(pipeline: Pipeline, pricing: PricingTable) -> Self {
        let graph = crate::inspector::Inspector::inspect(&pipeline);
        let session_id = Uuid::new_v4();
        tracing::debug!(%session_id, nodes = graph.len(), "debug session opened");
        Self {
            session_id,
            pipeline,
            graph,
            analyzer: Analyzer::new(pricing),
            clock: None,
            log: None,
            report: None,
        }
    }

    /// Inject a clock for the next trace. Tests use this to script exact
    /// latencies.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Identifier of this session.
    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// The pipeline under inspection.
    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// The graph model built at construction.
    #[must_use]
    pub fn graph(&self) -> &GraphModel {
        &self.graph
    }

    /// Renderer-facing structural export of the graph.
    #[must_use]
    pub fn export_graph(&self) -> GraphExport {
        self.graph.export()
    }

    /// Event log of the most recent trace, if any.
    #[must_use]
    pub fn event_log(&self) -> Option<&EventLog> {
        self.log.as_ref()
    }

    /// Run one pipeline execution under observation.
    ///
    /// The closure receives the observer to install into the engine and
    /// returns the engine's own result, which passes through unchanged. The
    /// event log is captured on every exit path: success, engine error, and
    /// engine panic (the panic resumes after the log is stored), so an
    /// aborted run still yields a partial report.
    pub fn trace<T, E, F>(&mut self, run: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&dyn ExecutionObserver) -> std::result::Result<T, E>,
    {
        let tracer = match &self.clock {
            Some(clock) => TraceSession::start_with_clock(&self.graph, Arc::clone(clock)),
            None => TraceSession::start(&self.graph),
        };
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| run(&tracer)));
        self.log = Some(tracer.events());
        self.report = None;
        match outcome {
            Ok(result) => {
                if result.is_err() {
                    tracing::debug!(session_id = %self.session_id, "traced run failed; partial log captured");
                }
                result
            }
            Err(panic) => {
                tracing::debug!(session_id = %self.session_id, "traced run panicked; partial log captured");
                std::panic::resume_unwind(panic)
            }
        }
    }

    /// Analyze the most recent trace.
    ///
    /// The report is computed once per trace and cached until the next
    /// [`trace`](DebugSession::trace) call.
    ///
    /// # Errors
    ///
    /// [`Error::NotTraced`] if no execution has been traced yet, and
    /// [`Error::EmptySession`] if a trace ran but recorded no events.
    pub fn report(&mut self) -> crate::Result<&Report> {
        let log = self.log.as_ref().ok_or(Error::NotTraced)?;
        if log.is_empty() {
            return Err(Error::EmptySession {
                session_id: self.session_id,
            });
        }
        let report = self
            .report
            .get_or_insert_with(|| self.analyzer.analyze(&self.graph, log));
        Ok(report)
    }
}
