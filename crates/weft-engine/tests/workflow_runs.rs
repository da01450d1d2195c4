use std::sync::Arc;
use std::time::Duration;

use weft_core::config::EngineConfig;
use weft_core::error::WeftError;
use weft_core::types::{
    FunctionResponse, NodeId, NodeStatus, PortMap, RunEvent, Severity, Strategy,
};
use weft_engine::{
    Edge, Graph, Node, NodeOutput, RunLogWriter, Stage, StagePlan, TransformOp, WorkflowEngine,
};
use weft_test_utils::{temp_log_dir, MockAgent, MockFunctions, MockTools, Trace};

fn engine_with(agent: MockAgent, functions: MockFunctions) -> WorkflowEngine {
    WorkflowEngine::new(Arc::new(agent), Arc::new(functions), Arc::new(MockTools::new()))
}

fn engine(agent: MockAgent) -> WorkflowEngine {
    engine_with(agent, MockFunctions::new())
}

fn output_of(graph: &Graph, id: &str) -> Option<String> {
    graph.node(&NodeId::new(id)).and_then(|n| n.primary_output())
}

fn status_of(graph: &Graph, id: &str) -> NodeStatus {
    graph
        .node(&NodeId::new(id))
        .map(|n| n.status)
        .unwrap_or_default()
}

fn ids(names: &[&str]) -> Vec<NodeId> {
    names.iter().map(|n| NodeId::new(*n)).collect()
}

fn echo_chain() -> Graph {
    Graph::default()
        .with_node(Node::input("in", "hello"))
        .with_node(Node::agent("ag", "echo", "{input}"))
        .with_node(Node::output("out"))
        .with_edge(Edge::new("in", "ag"))
        .with_edge(Edge::new("ag", "out"))
}

#[tokio::test]
async fn test_input_agent_output_chain() {
    let mut graph = echo_chain();
    let engine = engine(MockAgent::echo().respond("echo", "HELLO BACK"));
    let log = engine.run_log();

    let report = engine.run_ready(&mut graph, "", &log).await.unwrap();

    assert!(report.succeeded);
    assert_eq!(output_of(&graph, "in").as_deref(), Some("hello"));
    assert_eq!(output_of(&graph, "ag").as_deref(), Some("HELLO BACK"));
    assert_eq!(output_of(&graph, "out").as_deref(), Some("HELLO BACK"));
    for id in ["in", "ag", "out"] {
        assert_eq!(status_of(&graph, id), NodeStatus::Success);
    }

    let last = log.entries().pop().unwrap();
    assert_eq!(last.severity, Severity::Success);
    assert_eq!(last.message, "Workflow execution completed");
}

#[tokio::test]
async fn test_agent_receives_upstream_output() {
    let mut graph = echo_chain();
    let agent = Arc::new(MockAgent::echo());
    let engine = WorkflowEngine::new(
        agent.clone(),
        Arc::new(MockFunctions::new()),
        Arc::new(MockTools::new()),
    );
    let log = engine.run_log();
    engine.run_ready(&mut graph, "", &log).await.unwrap();

    let requests = agent.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].user_prompt, "hello");
}

#[tokio::test]
async fn test_fan_in_join_uses_edge_order() {
    let mut graph = Graph::default()
        .with_node(Node::input("x", "a"))
        .with_node(Node::input("y", "b"))
        .with_node(Node::join("j"))
        .with_edge(Edge::new("x", "j"))
        .with_edge(Edge::new("y", "j"));
    let engine = engine(MockAgent::echo());
    let log = engine.run_log();

    let report = engine.run_ready(&mut graph, "", &log).await.unwrap();
    assert_eq!(report.waves, 2);
    assert_eq!(output_of(&graph, "j").as_deref(), Some("a\n\n---\n\nb"));

    // Same graph, edges listed the other way round.
    let mut reversed = Graph::new(graph.nodes.clone(), vec![Edge::new("y", "j"), Edge::new("x", "j")]);
    engine.run_ready(&mut reversed, "", &log).await.unwrap();
    assert_eq!(output_of(&reversed, "j").as_deref(), Some("b\n\n---\n\na"));
}

#[tokio::test]
async fn test_self_loop_aborts_readiness_run() {
    let mut graph = Graph::default()
        .with_node(Node::agent("f", "loop", "{input}"))
        .with_edge(Edge::new("f", "f"));
    let engine = engine(MockAgent::echo());
    let mut rx = engine.event_bus().subscribe();
    let log = engine.run_log();

    let err = engine.run_ready(&mut graph, "", &log).await.unwrap_err();
    assert!(matches!(err, WeftError::Unschedulable { .. }));
    assert_eq!(status_of(&graph, "f"), NodeStatus::Idle);
    assert!(output_of(&graph, "f").is_none());

    let mut failed = false;
    while let Ok(event) = rx.try_recv() {
        if let RunEvent::RunFailed { error, .. } = event {
            assert!(error.contains("f"));
            failed = true;
        }
    }
    assert!(failed);
    assert_eq!(log.entries().pop().unwrap().severity, Severity::Error);
}

#[tokio::test]
async fn test_two_cycle_keeps_earlier_results() {
    let mut graph = Graph::default()
        .with_node(Node::input("src", "seed"))
        .with_node(Node::join("a"))
        .with_node(Node::join("b"))
        .with_edge(Edge::new("src", "a"))
        .with_edge(Edge::new("a", "b"))
        .with_edge(Edge::new("b", "a"));
    let engine = engine(MockAgent::echo());
    let log = engine.run_log();

    let err = engine.run_ready(&mut graph, "", &log).await.unwrap_err();
    match err {
        WeftError::Unschedulable { pending } => assert_eq!(pending, vec!["a", "b"]),
        other => panic!("expected unschedulable, got {:?}", other),
    }
    assert_eq!(status_of(&graph, "src"), NodeStatus::Success);
    assert_eq!(status_of(&graph, "a"), NodeStatus::Idle);
    assert_eq!(status_of(&graph, "b"), NodeStatus::Idle);
}

#[tokio::test]
async fn test_failed_agent_does_not_stop_siblings() {
    let mut graph = Graph::default()
        .with_node(Node::input("in", "q"))
        .with_node(Node::agent("bad", "broken", "{input}"))
        .with_node(Node::agent("good", "fine", "{input}"))
        .with_node(Node::output("after_bad"))
        .with_edge(Edge::new("in", "bad"))
        .with_edge(Edge::new("in", "good"))
        .with_edge(Edge::new("bad", "after_bad"));
    let engine = engine(MockAgent::echo().fail("broken", "upstream 503"));
    let log = engine.run_log();

    let report = engine.run_ready(&mut graph, "", &log).await.unwrap();

    assert!(!report.succeeded);
    assert_eq!(status_of(&graph, "bad"), NodeStatus::Error);
    let bad_output = output_of(&graph, "bad").unwrap();
    assert!(bad_output.starts_with("Error: "));
    assert!(bad_output.contains("upstream 503"));
    assert_eq!(status_of(&graph, "good"), NodeStatus::Success);
    assert_eq!(output_of(&graph, "good").as_deref(), Some("q"));

    // The error text flows downstream as ordinary input.
    assert_eq!(status_of(&graph, "after_bad"), NodeStatus::Success);
    assert_eq!(output_of(&graph, "after_bad"), Some(bad_output));
}

#[tokio::test]
async fn test_staged_run_finishes_each_stage_before_the_next() {
    let trace = Trace::new();
    let agent = MockAgent::echo()
        .with_delay("slow", 50)
        .with_delay("fast", 5)
        .with_trace(trace.clone());
    let mut graph = Graph::default()
        .with_node(Node::input("in", "go"))
        .with_node(Node::agent("s", "slow", "{input}"))
        .with_node(Node::agent("f", "fast", "{input}"))
        .with_node(Node::agent("next", "next", "{input}"))
        .with_edge(Edge::new("in", "s"))
        .with_edge(Edge::new("in", "f"))
        .with_edge(Edge::new("f", "next"));
    let plan = StagePlan::new(vec![
        Stage::new("s1", "Inputs", ids(&["in"])),
        Stage::new("s2", "Research", ids(&["s", "f"])),
        Stage::new("s3", "Follow-up", ids(&["next"])),
    ]);
    let engine = engine(agent);
    let log = engine.run_log();

    let report = engine.run_staged(&mut graph, &plan, "", &log).await.unwrap();
    assert_eq!(report.strategy, Strategy::Staged);
    assert_eq!(report.waves, 3);

    // Both stage-two nodes start before either finishes.
    let start_slow = trace.position("start:slow").unwrap();
    let start_fast = trace.position("start:fast").unwrap();
    let end_fast = trace.position("end:fast").unwrap();
    assert!(start_slow < end_fast && start_fast < end_fast);

    // `next` only depends on `fast`, yet waits for the slow sibling.
    let end_slow = trace.position("end:slow").unwrap();
    let start_next = trace.position("start:next").unwrap();
    assert!(end_slow < start_next);
    assert!(log
        .entries()
        .iter()
        .any(|e| e.message.starts_with("Starting Follow-up")));
}

#[tokio::test]
async fn test_readiness_run_waits_for_slowest_in_wave() {
    let trace = Trace::new();
    let agent = MockAgent::echo()
        .with_delay("slow", 50)
        .with_trace(trace.clone());
    let mut graph = Graph::default()
        .with_node(Node::agent("s", "slow", "{input}"))
        .with_node(Node::agent("f", "fast", "{input}"))
        .with_node(Node::agent("next", "next", "{input}"))
        .with_edge(Edge::new("f", "next"));
    let engine = engine(agent);
    let log = engine.run_log();

    engine.run_ready(&mut graph, "seed", &log).await.unwrap();
    assert!(trace.position("end:slow").unwrap() < trace.position("start:next").unwrap());
    assert_eq!(output_of(&graph, "s").as_deref(), Some("seed"));
}

#[tokio::test]
async fn test_staged_run_leaves_unstaged_nodes_idle() {
    let mut graph = Graph::default()
        .with_node(Node::input("a", "x"))
        .with_node(Node::output("orphan"));
    let plan = StagePlan::new(vec![Stage::new("s1", "Only", ids(&["a"]))]);
    let engine = engine(MockAgent::echo());
    let log = engine.run_log();

    engine.run_staged(&mut graph, &plan, "", &log).await.unwrap();
    assert_eq!(status_of(&graph, "a"), NodeStatus::Success);
    assert_eq!(status_of(&graph, "orphan"), NodeStatus::Idle);
    assert!(log
        .entries()
        .iter()
        .any(|e| e.severity == Severity::Warning && e.message.contains("orphan")));
}

#[tokio::test]
async fn test_staged_run_rejects_invalid_plan() {
    let mut graph = echo_chain();
    let plan = StagePlan::new(vec![
        Stage::new("s1", "A", ids(&["in", "ag"])),
        Stage::new("s2", "B", ids(&["ag", "out"])),
    ]);
    let engine = engine(MockAgent::echo());
    let log = engine.run_log();
    let err = engine.run_staged(&mut graph, &plan, "", &log).await.unwrap_err();
    assert!(matches!(err, WeftError::InvalidGraph(_)));
}

#[tokio::test]
async fn test_rerun_resets_state() {
    let mut graph = echo_chain();
    let engine = engine(MockAgent::echo());
    let log = engine.run_log();

    engine.run_ready(&mut graph, "", &log).await.unwrap();
    let first: Vec<_> = graph.nodes.iter().map(|n| (n.status, n.output.clone())).collect();

    engine.run_ready(&mut graph, "", &log).await.unwrap();
    let second: Vec<_> = graph.nodes.iter().map(|n| (n.status, n.output.clone())).collect();
    assert_eq!(first, second);

    // Stale outputs from a previous run never leak into a new one.
    graph.set_state(&"ag".into(), NodeStatus::Error, Some(NodeOutput::from("stale")));
    let plan = StagePlan::new(vec![Stage::new("s1", "Only", ids(&["in"]))]);
    engine.run_staged(&mut graph, &plan, "", &log).await.unwrap();
    assert_eq!(status_of(&graph, "ag"), NodeStatus::Idle);
    assert!(output_of(&graph, "ag").is_none());
}

#[tokio::test]
async fn test_port_addressed_edges() {
    let mut ports = PortMap::new();
    ports.insert("summary".to_string(), "short".to_string());
    ports.insert("detail".to_string(), "long".to_string());
    let functions = MockFunctions::new().respond("split", FunctionResponse::ok(ports));

    let mut graph = Graph::default()
        .with_node(Node::input("in", "doc"))
        .with_node(Node::function("fn", serde_json::json!({"name": "split"})))
        .with_node(Node::output("summary_out"))
        .with_node(Node::output("whole_out"))
        .with_node(Node::output("missing_out"))
        .with_edge(Edge::new("in", "fn"))
        .with_edge(Edge::from_port("fn", "summary", "summary_out"))
        .with_edge(Edge::new("fn", "whole_out"))
        .with_edge(Edge::from_port("fn", "nope", "missing_out"));
    let engine = engine_with(MockAgent::echo(), functions);
    let log = engine.run_log();

    engine.run_ready(&mut graph, "", &log).await.unwrap();

    assert_eq!(output_of(&graph, "summary_out").as_deref(), Some("short"));
    // Primary output of a multi-port node joins ports in the order reported.
    assert_eq!(output_of(&graph, "whole_out").as_deref(), Some("short\n\n---\n\nlong"));
    assert_eq!(output_of(&graph, "missing_out").as_deref(), Some(""));
    assert!(log
        .entries()
        .iter()
        .any(|e| e.severity == Severity::Warning && e.message.contains("fn[nope]")));
}

#[tokio::test]
async fn test_transform_in_pipeline() {
    let mut graph = Graph::default()
        .with_node(Node::input("in", "  shout this  "))
        .with_node(Node::transform("trim", TransformOp::Trim))
        .with_node(Node::transform("upper", TransformOp::Uppercase))
        .with_edge(Edge::new("in", "trim"))
        .with_edge(Edge::new("trim", "upper"));
    let engine = engine(MockAgent::echo());
    let log = engine.run_log();
    engine.run_ready(&mut graph, "", &log).await.unwrap();
    assert_eq!(output_of(&graph, "upper").as_deref(), Some("SHOUT THIS"));
}

#[tokio::test]
async fn test_run_node_uses_first_edge_only() {
    let mut graph = Graph::default()
        .with_node(Node::input("a", "first"))
        .with_node(Node::input("b", "second"))
        .with_node(Node::join("j"))
        .with_edge(Edge::new("a", "j"))
        .with_edge(Edge::new("b", "j"));
    graph.set_state(&"a".into(), NodeStatus::Success, Some(NodeOutput::from("first")));
    graph.set_state(&"b".into(), NodeStatus::Success, Some(NodeOutput::from("second")));
    let engine = engine(MockAgent::echo());
    let log = engine.run_log();

    let result = engine
        .run_node(&mut graph, &"j".into(), "", &log)
        .await
        .unwrap();
    assert!(result.succeeded());
    assert_eq!(result.output, NodeOutput::from("first"));
    // Other nodes keep their state.
    assert_eq!(output_of(&graph, "b").as_deref(), Some("second"));
}

#[tokio::test]
async fn test_run_node_keeps_single_port_names() {
    let mut graph = Graph::default()
        .with_node(Node::input("in", "v"))
        .with_node(Node::function("f", serde_json::json!({})))
        .with_node(Node::output("wrong_port"))
        .with_node(Node::output("right_port"))
        .with_edge(Edge::new("in", "f"))
        .with_edge(Edge::from_port("f", "other", "wrong_port"))
        .with_edge(Edge::from_port("f", "result", "right_port"));
    let engine = engine(MockAgent::echo());

    let log = engine.run_log();
    engine.run_ready(&mut graph, "", &log).await.unwrap();
    assert_eq!(output_of(&graph, "wrong_port").as_deref(), Some(""));
    assert_eq!(output_of(&graph, "right_port").as_deref(), Some("v"));
    let f = graph.node(&"f".into()).unwrap();
    assert_eq!(f.ports.get("result").map(String::as_str), Some("v"));

    // A single-node run sees the same port addressing as the full run.
    let log = engine.run_log();
    let result = engine
        .run_node(&mut graph, &"wrong_port".into(), "", &log)
        .await
        .unwrap();
    assert_eq!(result.output, NodeOutput::from(""));
    assert!(log
        .entries()
        .iter()
        .any(|e| e.severity == Severity::Warning && e.message.contains("f[other]")));

    let log = engine.run_log();
    let result = engine
        .run_node(&mut graph, &"right_port".into(), "", &log)
        .await
        .unwrap();
    assert_eq!(result.output, NodeOutput::from("v"));
}

#[tokio::test]
async fn test_run_node_without_upstream_output() {
    let mut graph = echo_chain();
    let engine = engine(MockAgent::echo());
    let log = engine.run_log();

    let result = engine
        .run_node(&mut graph, &"ag".into(), "", &log)
        .await
        .unwrap();
    assert!(result.succeeded());
    assert_eq!(result.output, NodeOutput::from(""));
    assert_eq!(status_of(&graph, "in"), NodeStatus::Idle);
    assert!(log
        .entries()
        .iter()
        .any(|e| e.severity == Severity::Warning && e.message.contains("in")));
}

#[tokio::test]
async fn test_cancel_aborts_run() {
    let mut graph = Graph::default()
        .with_node(Node::input("in", "q"))
        .with_node(Node::agent("stuck", "stuck", "{input}"))
        .with_node(Node::output("out"))
        .with_edge(Edge::new("in", "stuck"))
        .with_edge(Edge::new("stuck", "out"));
    let engine = engine(MockAgent::echo().hang("stuck")).with_config(EngineConfig {
        node_timeout_secs: 0,
        wave_pause_ms: 0,
    });
    let token = engine.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });
    let log = engine.run_log();

    let err = engine.run_ready(&mut graph, "", &log).await.unwrap_err();
    assert!(matches!(err, WeftError::Cancelled));
    assert_eq!(status_of(&graph, "in"), NodeStatus::Success);
    assert_eq!(status_of(&graph, "stuck"), NodeStatus::Error);
    assert!(output_of(&graph, "stuck").unwrap().contains("cancelled"));
    assert_eq!(status_of(&graph, "out"), NodeStatus::Idle);
}

#[tokio::test]
async fn test_auto_stages_match_readiness_waves() {
    let mut graph = Graph::default()
        .with_node(Node::input("a", "1"))
        .with_node(Node::input("b", "2"))
        .with_node(Node::join("j"))
        .with_node(Node::output("o"))
        .with_edge(Edge::new("a", "j"))
        .with_edge(Edge::new("b", "j"))
        .with_edge(Edge::new("j", "o"));
    let plan = StagePlan::auto(&graph).unwrap();
    let engine = engine(MockAgent::echo());
    let log = engine.run_log();

    let staged = engine.run_staged(&mut graph, &plan, "", &log).await.unwrap();
    let staged_out = output_of(&graph, "o");
    let ready = engine.run_ready(&mut graph, "", &log).await.unwrap();
    assert_eq!(staged.waves, ready.waves);
    assert_eq!(staged_out, output_of(&graph, "o"));
}

#[tokio::test]
async fn test_run_log_writer_persists_jsonl() {
    let dir = temp_log_dir();
    let mut graph = echo_chain();
    let engine = engine(MockAgent::echo());
    let cancel = tokio_util::sync::CancellationToken::new();

    let writer = RunLogWriter::new(dir.path().to_path_buf());
    let handle = writer.spawn(
        engine.event_bus(),
        weft_core::types::RunId::from_str("test-run"),
        cancel.clone(),
    );

    let log = engine.run_log();
    engine.run_ready(&mut graph, "", &log).await.unwrap();

    let path = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(path.starts_with(dir.path().join("test-run")));

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<serde_json::Value> = content
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.first().unwrap()["event_type"], "run_started");
    assert_eq!(lines.last().unwrap()["event_type"], "run_complete");
    assert!(lines.iter().any(|l| l["detail"]["message"] == "Workflow execution completed"));
}

#[tokio::test]
async fn test_staged_run_warns_on_same_stage_connection() {
    let mut graph = Graph::default()
        .with_node(Node::input("a", "x"))
        .with_node(Node::output("b"))
        .with_edge(Edge::new("a", "b"));
    let plan = StagePlan::new(vec![Stage::new("s1", "Both", ids(&["a", "b"]))]);
    let engine = engine(MockAgent::echo());
    let log = engine.run_log();

    let report = engine.run_staged(&mut graph, &plan, "", &log).await.unwrap();

    assert_eq!(report.waves, 1);
    assert!(log.entries().iter().any(|e| e.severity == Severity::Warning
        && e.message == "Connection a -> b does not point to a later stage"));
    // Both nodes start together, so b never sees a's output.
    assert_eq!(output_of(&graph, "b").as_deref(), Some(""));
}

#[tokio::test]
async fn test_wave_pause_between_readiness_waves() {
    let mut graph = echo_chain();
    let engine = engine(MockAgent::echo()).with_config(EngineConfig {
        node_timeout_secs: 0,
        wave_pause_ms: 30,
    });
    let log = engine.run_log();

    let report = engine.run_ready(&mut graph, "", &log).await.unwrap();

    assert!(report.succeeded);
    assert_eq!(report.waves, 3);
    assert!(report.total_elapsed_ms >= 90, "elapsed {}ms", report.total_elapsed_ms);
}
