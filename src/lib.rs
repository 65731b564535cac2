//! # chainlens
//!
//! Structural inspection, runtime tracing, and cost analysis for composed
//! LLM pipelines.
//!
//! A pipeline is described as a tree of tagged stages ([`pipeline`]). Three
//! independent analyses hang off that description:
//!
//! - **Inspection** ([`inspector`]) walks the tree without executing it and
//!   produces an immutable directed graph ([`graph`]) suitable for diagram
//!   rendering.
//! - **Tracing** ([`tracer`]) observes one execution through the
//!   [`ExecutionObserver`](pipeline::ExecutionObserver) hook contract and
//!   records a time-ordered event log, estimating token usage when the
//!   provider does not report it ([`tokens`]).
//! - **Analysis** ([`analyzer`]) joins the graph with the event log and
//!   yields latency, cost ([`pricing`]), and token breakdowns plus ranked
//!   optimization suggestions.
//!
//! The [`session`] façade bundles the three into one handle for the common
//! inspect-run-analyze flow.
//!
//! ## Quick start
//!
//! ```
//! use std::sync::Arc;
//! use chainlens::pipeline::{Pipeline, Stage};
//! use chainlens::session::DebugSession;
//! use chainlens::testing::{ManualClock, ScriptedExecutor, StageScript};
//!
//! let pipeline = Pipeline::sequence(vec![
//!     Stage::transform("prompt").into(),
//!     Stage::model_call("llm").with_model("gpt-3.5-turbo").into(),
//!     Stage::parser("json").into(),
//! ]);
//!
//! let clock = Arc::new(ManualClock::new());
//! let mut session = DebugSession::new(pipeline.clone()).with_clock(clock.clone());
//!
//! // A real deployment hands the observer to its execution engine; here a
//! // scripted engine stands in.
//! let executor = ScriptedExecutor::new(clock)
//!     .script("llm", StageScript::respond("answer").with_latency_secs(1.2));
//! session.trace(|observer| executor.run(&pipeline, observer, "question"))?;
//!
//! let report = session.report()?;
//! assert_eq!(report.model_calls, 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Design notes
//!
//! Stage paths are the alignment key: the inspector and the tracer both
//! derive node identity from the same pre-order traversal, so traced events
//! map 1:1 onto graph nodes without any registration step. Observation is
//! strictly passive; hooks never alter the engine's control flow, and a
//! failed run still yields a partial report.

pub mod analyzer;
pub mod error;
pub mod graph;
pub mod inspector;
pub mod pipeline;
pub mod pricing;
pub mod session;
pub mod testing;
pub mod tokens;
pub mod tracer;

pub use analyzer::{Analyzer, Report, Severity, Suggestion};
pub use error::{Error, Result};
pub use graph::{GraphExport, GraphModel, NodeId};
pub use inspector::Inspector;
pub use pipeline::{ExecutionObserver, Pipeline, Stage, StageKind, StageOutput, TokenUsage};
pub use pricing::{Pricing, PricingTable};
pub use session::DebugSession;
pub use tracer::{Event, EventLog, EventType, TraceSession};
