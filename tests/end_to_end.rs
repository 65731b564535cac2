//! End-to-end flows through the session façade with a scripted engine.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use chainlens::analyzer::EfficiencyScore;
use chainlens::graph::{NodeId, Structure};
use chainlens::pipeline::{Pipeline, Stage, StageIdentity, StageOutput, TokenUsage};
use chainlens::pricing::{Pricing, PricingTable};
use chainlens::session::DebugSession;
use chainlens::testing::{ExecError, ManualClock, ScriptedExecutor, StageScript};
use chainlens::{Error, StageKind};

fn qa_pipeline() -> Pipeline {
    Pipeline::sequence(vec![
        Stage::transform("prompt").into(),
        Stage::model_call("llm").with_model("gpt-3.5-turbo").into(),
        Stage::parser("json").into(),
    ])
}

fn per_token_pricing() -> PricingTable {
    PricingTable::new().with_model("gpt-3.5-turbo", Pricing::per_token(0.0000005, 0.0000015))
}

#[test]
fn chain_run_yields_full_report() {
    let pipeline = qa_pipeline();
    let clock = Arc::new(ManualClock::new());
    let mut session =
        DebugSession::with_pricing(pipeline.clone(), per_token_pricing()).with_clock(clock.clone());

    let executor = ScriptedExecutor::new(clock)
        .script("prompt", StageScript::respond("formatted").with_latency_secs(0.01))
        .script(
            "llm",
            StageScript::default().with_latency_secs(1.23).with_output(
                StageOutput::text("the answer").with_usage(TokenUsage::new(45, 105)),
            ),
        )
        .script("json", StageScript::respond("{\"answer\": 1}").with_latency_secs(0.01));

    let output = session
        .trace(|observer| executor.run(&pipeline, observer, "question"))
        .unwrap();
    assert_eq!(output, "{\"answer\": 1}");

    let report = session.report().unwrap();
    assert_eq!(report.token_totals.prompt, 45);
    assert_eq!(report.token_totals.completion, 105);
    assert_eq!(report.token_totals.total, 150);
    assert_eq!(report.model_calls, 1);

    let expected_cost = 45.0 * 0.0000005 + 105.0 * 0.0000015;
    assert!((report.total_cost - expected_cost).abs() < 1e-12);
    assert!((report.per_node_latency[&NodeId(1)] - 1.23).abs() < 1e-9);
    assert!((report.total_latency - 1.25).abs() < 1e-9);

    assert_eq!(report.efficiency_score, EfficiencyScore::Optimized);
    assert!(report
        .suggestions
        .iter()
        .any(|s| s.message.contains("well optimized")));
    assert!(report
        .suggestions
        .iter()
        .any(|s| s.message.to_lowercase().contains("cache")));
    assert!(report.drift_warnings.is_empty());
    assert!(report.errored_nodes.is_empty());
}

#[test]
fn parallel_branches_overlap_in_total_latency() {
    let pipeline = Pipeline::sequence(vec![
        Stage::transform("fan").into(),
        Pipeline::parallel(vec![
            (
                "slow",
                Pipeline::Stage(Stage::model_call("slow").with_model("gpt-3.5-turbo")),
            ),
            (
                "fast",
                Pipeline::Stage(Stage::model_call("fast").with_model("gpt-3.5-turbo")),
            ),
        ]),
        Stage::aggregator("merge").into(),
    ]);
    let clock = Arc::new(ManualClock::new());
    let mut session =
        DebugSession::with_pricing(pipeline.clone(), per_token_pricing()).with_clock(clock.clone());

    let executor = ScriptedExecutor::new(clock)
        .script(
            "slow",
            StageScript::default()
                .with_latency_secs(2.0)
                .with_output(StageOutput::text("s").with_usage(TokenUsage::new(10, 10))),
        )
        .script(
            "fast",
            StageScript::default()
                .with_latency_secs(1.0)
                .with_output(StageOutput::text("f").with_usage(TokenUsage::new(10, 10))),
        );

    session
        .trace(|observer| executor.run(&pipeline, observer, "in"))
        .unwrap();

    let report = session.report().unwrap();
    let summed: f64 = report.per_node_latency.values().sum();
    assert!((report.total_latency - 2.0).abs() < 1e-9);
    assert!(report.total_latency < summed);
    assert_eq!(report.model_calls, 2);
}

#[test]
fn engine_error_passes_through_and_report_is_partial() {
    let pipeline = qa_pipeline();
    let clock = Arc::new(ManualClock::new());
    let mut session =
        DebugSession::with_pricing(pipeline.clone(), per_token_pricing()).with_clock(clock.clone());

    let executor = ScriptedExecutor::new(clock)
        .script("prompt", StageScript::respond("formatted").with_latency_secs(0.1))
        .script(
            "llm",
            StageScript::failing("rate limited").with_latency_secs(0.7),
        );

    let error: ExecError = session
        .trace(|observer| executor.run(&pipeline, observer, "question"))
        .unwrap_err();
    assert_eq!(error.stage, "llm");
    assert_eq!(error.message, "rate limited");

    let report = session.report().unwrap();
    assert_eq!(report.errored_nodes, vec![NodeId(1)]);
    // The failing stage still contributes latency up to the failure point.
    assert!((report.per_node_latency[&NodeId(1)] - 0.7).abs() < 1e-9);
    assert!((report.per_node_latency[&NodeId(0)] - 0.1).abs() < 1e-9);
    // The parser never ran and is absent rather than errored.
    assert!(!report.per_node_latency.contains_key(&NodeId(2)));
    assert!(report
        .suggestions
        .iter()
        .any(|s| s.message.contains("failed")));
}

#[test]
fn uninspected_invocation_synthesizes_node_and_warns() {
    let pipeline = qa_pipeline();
    let clock = Arc::new(ManualClock::new());
    let mut session = DebugSession::with_pricing(pipeline, per_token_pricing())
        .with_clock(clock.clone());

    // The engine takes a branch the static structure never declared.
    let phantom = StageIdentity {
        path: chainlens::pipeline::StagePath::root().child(9),
        kind: StageKind::ModelCall,
        label: "conditional-retry".to_string(),
    };
    let _: Result<(), ()> = session.trace(|observer| {
        observer.on_stage_start(&phantom, "retry input");
        clock.advance_secs(0.4);
        observer.on_stage_end(
            &phantom,
            &StageOutput::text("retried").with_usage(TokenUsage::new(5, 5)),
        );
        Ok(())
    });

    let log = session.event_log().unwrap();
    assert_eq!(log.synthesized_nodes().len(), 1);
    // Ids continue past the inspected graph.
    assert_eq!(log.synthesized_nodes()[0].id, NodeId(3));

    let report = session.report().unwrap();
    assert_eq!(report.drift_warnings.len(), 1);
    assert!(report.drift_warnings[0].contains("conditional-retry"));
    assert!((report.per_node_latency[&NodeId(3)] - 0.4).abs() < 1e-9);
}

#[test]
fn skipped_model_stage_still_gets_suggestions() {
    // Upstream logic bailed before the model stage: only the prompt
    // transform ran. The report still carries structural advice for the
    // model-call node instead of an empty suggestion list.
    let pipeline = qa_pipeline();
    let clock = Arc::new(ManualClock::new());
    let mut session =
        DebugSession::with_pricing(pipeline, per_token_pricing()).with_clock(clock.clone());
    let prompt = {
        let node = &session.graph().nodes()[0];
        StageIdentity {
            path: node.path.clone(),
            kind: node.kind.clone(),
            label: node.label.clone(),
        }
    };

    let _: Result<(), ()> = session.trace(|observer| {
        observer.on_stage_start(&prompt, "question");
        clock.advance_secs(0.1);
        observer.on_stage_end(&prompt, &StageOutput::text("formatted"));
        Ok(())
    });

    let report = session.report().unwrap();
    assert_eq!(report.model_calls, 0);
    assert!(!report.suggestions.is_empty());
    assert!(report
        .suggestions
        .iter()
        .any(|s| s.message.to_lowercase().contains("cache")));
}

#[test]
fn report_requires_a_traced_run() {
    let mut session = DebugSession::new(qa_pipeline());
    assert!(matches!(session.report(), Err(Error::NotTraced)));

    let _: Result<(), ()> = session.trace(|_observer| Ok(()));
    assert!(matches!(session.report(), Err(Error::EmptySession { .. })));
}

#[test]
fn graph_export_is_stable_and_round_trips() {
    let session = DebugSession::new(qa_pipeline());
    assert_eq!(session.graph().structure(), Structure::Sequence);

    let export = session.export_graph();
    let json = export.to_json().unwrap();
    let again = DebugSession::new(qa_pipeline()).export_graph().to_json().unwrap();
    assert_eq!(json, again);

    let reread = chainlens::GraphExport::from_json(&json).unwrap();
    assert_eq!(reread, export);
    assert_eq!(reread.nodes[1].attributes.get("model").unwrap(), "gpt-3.5-turbo");
}

#[test]
fn report_json_has_expected_shape() {
    let pipeline = qa_pipeline();
    let clock = Arc::new(ManualClock::new());
    let mut session =
        DebugSession::with_pricing(pipeline.clone(), per_token_pricing()).with_clock(clock.clone());
    let executor = ScriptedExecutor::new(clock).script(
        "llm",
        StageScript::default()
            .with_latency_secs(1.0)
            .with_output(StageOutput::text("out").with_usage(TokenUsage::new(45, 105))),
    );
    session
        .trace(|observer| executor.run(&pipeline, observer, "q"))
        .unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&session.report().unwrap().to_json().unwrap()).unwrap();
    assert_eq!(json["token_totals"]["total"], 150);
    assert_eq!(json["model_calls"], 1);
    assert!(json["suggestions"].as_array().unwrap().iter().all(|s| {
        matches!(
            s["severity"].as_str().unwrap(),
            "low" | "medium" | "high"
        )
    }));
}
