//! Deterministic harness for exercising sessions without a real engine
//!
//! [`ManualClock`] replaces the monotonic clock with one advanced by hand,
//! and [`ScriptedExecutor`] plays the role of an execution engine: it walks a
//! pipeline, fires the observer hooks in engine order, and applies per-stage
//! scripts (latency, output, injected failure). Parallel blocks are timed the
//! way a real engine overlaps branches: every branch starts at the block's
//! start time and the block ends at the latest branch end.
//!
//! This module ships in the library (not `#[cfg(test)]`) so downstream
//! engines can reuse the same harness for their own integration tests.

use crate::pipeline::{ExecutionObserver, Pipeline, Stage, StageIdentity, StageOutput, StagePath};
use crate::tracer::Clock;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Manually advanced clock.
///
/// Starts at zero and only moves when told to. Shared between the test body
/// and the tracer through an `Arc`.
#[derive(Debug, Default)]
pub struct ManualClock {
    elapsed: Mutex<Duration>,
}

impl ManualClock {
    /// A clock at offset zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance by a duration.
    pub fn advance(&self, by: Duration) {
        *self.elapsed.lock() += by;
    }

    /// Advance by a whole number of seconds expressed as a float.
    pub fn advance_secs(&self, secs: f64) {
        self.advance(Duration::from_secs_f64(secs));
    }

    /// Jump to an absolute offset. Used when replaying overlapped branches.
    pub fn set(&self, to: Duration) {
        *self.elapsed.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.elapsed.lock()
    }
}

/// Failure raised by a scripted stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("stage '{stage}' failed: {message}")]
pub struct ExecError {
    /// Label of the failing stage
    pub stage: String,
    /// Scripted failure message
    pub message: String,
}

/// Scripted behavior of one stage.
#[derive(Debug, Clone)]
pub struct StageScript {
    latency: Duration,
    output: StageOutput,
    failure: Option<String>,
}

impl Default for StageScript {
    fn default() -> Self {
        Self {
            latency: Duration::ZERO,
            output: StageOutput::text("ok"),
            failure: None,
        }
    }
}

impl StageScript {
    /// A script that completes instantly with the given output text.
    pub fn respond(text: impl Into<String>) -> Self {
        Self {
            output: StageOutput::text(text),
            ..Self::default()
        }
    }

    /// Set the simulated latency of the stage.
    #[must_use]
    pub fn with_latency_secs(mut self, secs: f64) -> Self {
        self.latency = Duration::from_secs_f64(secs);
        self
    }

    /// Replace the full output (to attach usage or a reported cost).
    #[must_use]
    pub fn with_output(mut self, output: StageOutput) -> Self {
        self.output = output;
        self
    }

    /// A script that fails after its latency elapses.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    /// Set the failure message on an existing script.
    #[must_use]
    pub fn with_failure(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }
}

/// Minimal in-process execution engine driven by per-label scripts.
///
/// Walks the pipeline tree recursively. Sequences thread each stage's output
/// text into the next stage's input. Parallel branches all receive the
/// block's input and their outputs are joined with newlines in branch order.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use chainlens::pipeline::{NoopObserver, Pipeline, Stage};
/// use chainlens::testing::{ManualClock, ScriptedExecutor, StageScript};
///
/// let clock = Arc::new(ManualClock::new());
/// let executor = ScriptedExecutor::new(Arc::clone(&clock))
///     .script("llm", StageScript::respond("answer").with_latency_secs(1.0));
///
/// let pipeline = Pipeline::Stage(Stage::model_call("llm"));
/// let output = executor.run(&pipeline, &NoopObserver, "question").unwrap();
/// assert_eq!(output, "answer");
/// ```
#[derive(Debug)]
pub struct ScriptedExecutor {
    clock: std::sync::Arc<ManualClock>,
    scripts: HashMap<String, StageScript>,
}

impl ScriptedExecutor {
    /// An executor advancing the given clock.
    #[must_use]
    pub fn new(clock: std::sync::Arc<ManualClock>) -> Self {
        Self {
            clock,
            scripts: HashMap::new(),
        }
    }

    /// Attach a script to the stage with the given label. Unscripted stages
    /// complete instantly with output `"ok"`.
    #[must_use]
    pub fn script(mut self, label: impl Into<String>, script: StageScript) -> Self {
        self.scripts.insert(label.into(), script);
        self
    }

    /// Execute the pipeline, firing observer hooks along the way.
    ///
    /// # Errors
    ///
    /// Returns the first scripted [`ExecError`] encountered; the observer
    /// sees `on_stage_error` for that stage and the error then propagates
    /// out unchanged.
    pub fn run(
        &self,
        pipeline: &Pipeline,
        observer: &dyn ExecutionObserver,
        input: &str,
    ) -> Result<String, ExecError> {
        self.run_at(pipeline, &StagePath::root(), observer, input)
    }

    fn run_at(
        &self,
        pipeline: &Pipeline,
        path: &StagePath,
        observer: &dyn ExecutionObserver,
        input: &str,
    ) -> Result<String, ExecError> {
        match pipeline {
            Pipeline::Stage(stage) => self.run_stage(stage, path, observer, input),
            Pipeline::Sequence(steps) => {
                let mut current = input.to_string();
                for (index, step) in steps.iter().enumerate() {
                    current = self.run_at(step, &path.child(index), observer, &current)?;
                }
                Ok(current)
            }
            Pipeline::Parallel(branches) => {
                // Branches overlap: each starts at the block's start time and
                // the block ends at the latest branch end.
                let block_start = self.clock.now();
                let mut block_end = block_start;
                let mut outputs = Vec::with_capacity(branches.len());
                let mut first_error = None;

                for (index, (_, branch)) in branches.iter().enumerate() {
                    self.clock.set(block_start);
                    match self.run_at(branch, &path.child(index), observer, input) {
                        Ok(output) => outputs.push(output),
                        Err(error) => {
                            if first_error.is_none() {
                                first_error = Some(error);
                            }
                        }
                    }
                    block_end = block_end.max(self.clock.now());
                }

                self.clock.set(block_end);
                match first_error {
                    Some(error) => Err(error),
                    None => Ok(outputs.join("\n")),
                }
            }
        }
    }

    fn run_stage(
        &self,
        stage: &Stage,
        path: &StagePath,
        observer: &dyn ExecutionObserver,
        input: &str,
    ) -> Result<String, ExecError> {
        let script = self.scripts.get(&stage.label).cloned().unwrap_or_default();
        let identity = StageIdentity::of(stage, path.clone());

        observer.on_stage_start(&identity, input);
        self.clock.advance(script.latency);

        if let Some(message) = script.failure {
            observer.on_stage_error(&identity, &message);
            return Err(ExecError {
                stage: stage.label.clone(),
                message,
            });
        }

        observer.on_stage_end(&identity, &script.output);
        Ok(script.output.text)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::graph::NodeId;
    use crate::inspector::Inspector;
    use crate::pipeline::TokenUsage;
    use crate::tracer::{EventType, TraceSession};
    use std::sync::Arc;

    #[test]
    fn test_manual_clock_advances_and_sets() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), Duration::ZERO);
        clock.advance_secs(1.5);
        assert_eq!(clock.now(), Duration::from_millis(1500));
        clock.set(Duration::from_secs(1));
        assert_eq!(clock.now(), Duration::from_secs(1));
    }

    #[test]
    fn test_sequence_threads_outputs() {
        let clock = Arc::new(ManualClock::new());
        let executor = ScriptedExecutor::new(Arc::clone(&clock))
            .script("a", StageScript::respond("from-a"))
            .script("b", StageScript::respond("from-b"));
        let pipeline = Pipeline::sequence(vec![
            Stage::transform("a").into(),
            Stage::transform("b").into(),
        ]);

        struct InputRecorder(Mutex<Vec<String>>);
        impl ExecutionObserver for InputRecorder {
            fn on_stage_start(&self, _identity: &StageIdentity, input: &str) {
                self.0.lock().push(input.to_string());
            }
            fn on_stage_end(&self, _identity: &StageIdentity, _output: &StageOutput) {}
            fn on_stage_error(&self, _identity: &StageIdentity, _error: &str) {}
        }

        let recorder = InputRecorder(Mutex::new(Vec::new()));
        let output = executor.run(&pipeline, &recorder, "seed").unwrap();
        assert_eq!(output, "from-b");
        assert_eq!(*recorder.0.lock(), vec!["seed", "from-a"]);
    }

    #[test]
    fn test_parallel_branches_overlap_on_clock() {
        let clock = Arc::new(ManualClock::new());
        let executor = ScriptedExecutor::new(Arc::clone(&clock))
            .script("slow", StageScript::respond("s").with_latency_secs(2.0))
            .script("fast", StageScript::respond("f").with_latency_secs(0.5));
        let pipeline = Pipeline::parallel(vec![
            ("slow", Pipeline::Stage(Stage::model_call("slow"))),
            ("fast", Pipeline::Stage(Stage::model_call("fast"))),
        ]);

        let output = executor
            .run(&pipeline, &crate::pipeline::NoopObserver, "in")
            .unwrap();
        assert_eq!(output, "s\nf");
        // Block ends at the slowest branch, not the sum.
        assert_eq!(clock.now(), Duration::from_secs(2));
    }

    #[test]
    fn test_scripted_failure_fires_error_hook_and_propagates() {
        let clock = Arc::new(ManualClock::new());
        let executor = ScriptedExecutor::new(Arc::clone(&clock))
            .script("llm", StageScript::failing("rate limited").with_latency_secs(0.3));
        let pipeline = Pipeline::sequence(vec![
            Stage::model_call("llm").into(),
            Stage::parser("never-reached").into(),
        ]);
        let graph = Inspector::inspect(&pipeline);
        let tracer = TraceSession::start_with_clock(&graph, Arc::clone(&clock) as Arc<dyn Clock>);

        let error = executor.run(&pipeline, &tracer, "in").unwrap_err();
        assert_eq!(error.stage, "llm");
        assert_eq!(error.message, "rate limited");

        let log = tracer.events();
        // Failing stage recorded start + error; downstream stage never ran.
        assert_eq!(log.len(), 2);
        assert_eq!(log.events()[1].event_type, EventType::Error);
        assert!(log.events().iter().all(|e| e.node_id == NodeId(0)));
    }

    #[test]
    fn test_executor_drives_tracer_with_usage() {
        let clock = Arc::new(ManualClock::new());
        let executor = ScriptedExecutor::new(Arc::clone(&clock)).script(
            "llm",
            StageScript::default()
                .with_latency_secs(1.23)
                .with_output(StageOutput::text("answer").with_usage(TokenUsage::new(45, 105))),
        );
        let pipeline = Pipeline::Stage(Stage::model_call("llm").with_model("gpt-3.5-turbo"));
        let graph = Inspector::inspect(&pipeline);
        let tracer = TraceSession::start_with_clock(&graph, Arc::clone(&clock) as Arc<dyn Clock>);

        executor.run(&pipeline, &tracer, "question").unwrap();

        let log = tracer.events();
        let end = &log.events()[1];
        assert!((end.timestamp.as_secs_f64() - 1.23).abs() < 1e-9);
        let payload = end.payload.unwrap();
        assert_eq!(payload.prompt_tokens, 45);
        assert_eq!(payload.completion_tokens, 105);
    }

    #[test]
    fn test_unscripted_stage_defaults() {
        let clock = Arc::new(ManualClock::new());
        let executor = ScriptedExecutor::new(Arc::clone(&clock));
        let pipeline = Pipeline::Stage(Stage::transform("anything"));
        let output = executor
            .run(&pipeline, &crate::pipeline::NoopObserver, "in")
            .unwrap();
        assert_eq!(output, "ok");
        assert_eq!(clock.now(), Duration::ZERO);
    }
}
