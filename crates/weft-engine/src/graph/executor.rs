use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use weft_core::config::EngineConfig;
use weft_core::error::{Result, WeftError};
use weft_core::event::EventBus;
use weft_core::traits::{AgentInvoker, FunctionExecutor, ToolInvoker};
use weft_core::types::{NodeId, NodeStatus, RunEvent, RunId, Severity, Strategy};

use super::dispatch::{ExecContext, Outcome};
use super::model::Graph;
use super::node::{NodeKind, NodeOutput};
use super::resolve::{resolve_input, InputMode, ResolvedInput};
use super::schedule::{Progress, ReadinessSchedule, Schedule, StagedSchedule, Wave};
use super::stage::StagePlan;
use super::store::RunOutputStore;
use crate::run_log::RunLog;

/// Result of executing a single node.
#[derive(Debug, Clone)]
pub struct NodeResult {
    /// Which node was executed.
    pub node_id: NodeId,
    pub status: NodeStatus,
    pub output: NodeOutput,
    /// Execution time in milliseconds.
    pub elapsed_ms: u64,
}

impl NodeResult {
    pub fn succeeded(&self) -> bool {
        self.status == NodeStatus::Success
    }
}

/// Result of executing an entire graph.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: RunId,
    pub strategy: Strategy,
    /// Per-node results in completion order.
    pub node_results: Vec<NodeResult>,
    /// Number of waves (stages) dispatched.
    pub waves: usize,
    /// Total execution time in milliseconds.
    pub total_elapsed_ms: u64,
    /// Whether every executed node succeeded.
    pub succeeded: bool,
}

impl RunReport {
    pub fn result(&self, node: &NodeId) -> Option<&NodeResult> {
        self.node_results.iter().find(|r| &r.node_id == node)
    }
}

/// Executes workflow graphs against the external collaborators.
///
/// Nodes within one wave run concurrently on the calling task; waves run
/// strictly one after another. Node failures are carried downstream as
/// data; only structural problems and cancellation abort a run.
pub struct WorkflowEngine {
    agent: Arc<dyn AgentInvoker>,
    functions: Arc<dyn FunctionExecutor>,
    tools: Arc<dyn ToolInvoker>,
    config: EngineConfig,
    event_bus: Arc<EventBus>,
    cancel: CancellationToken,
}

impl WorkflowEngine {
    pub fn new(
        agent: Arc<dyn AgentInvoker>,
        functions: Arc<dyn FunctionExecutor>,
        tools: Arc<dyn ToolInvoker>,
    ) -> Self {
        Self {
            agent,
            functions,
            tools,
            config: EngineConfig::default(),
            event_bus: Arc::new(EventBus::default()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    /// Get a clone of the cancellation token; cancelling it aborts the run.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// A fresh run log wired to this engine's event bus.
    pub fn run_log(&self) -> RunLog {
        RunLog::with_bus(self.event_bus.clone())
    }

    /// Run the graph stage by stage; all nodes of a stage start together.
    pub async fn run_staged(
        &self,
        graph: &mut Graph,
        plan: &StagePlan,
        seed: &str,
        log: &RunLog,
    ) -> Result<RunReport> {
        graph.validate()?;
        plan.validate(graph)?;

        for edge in plan.violations(graph) {
            log.warning(format!(
                "Connection {} -> {} does not point to a later stage",
                edge.source, edge.target
            ));
        }
        for node in plan.unstaged(graph) {
            log.node(
                Severity::Warning,
                &node,
                format!("Node {} is not assigned to a stage and will not run", node),
            );
        }

        let mut schedule = StagedSchedule::new(plan);
        self.drive(graph, &mut schedule, seed, log).await
    }

    /// Run the graph by readiness: repeatedly execute every node whose
    /// upstream nodes have all finished.
    pub async fn run_ready(&self, graph: &mut Graph, seed: &str, log: &RunLog) -> Result<RunReport> {
        graph.validate()?;
        let mut schedule = ReadinessSchedule::new();
        self.drive(graph, &mut schedule, seed, log).await
    }

    /// Execute one node in isolation, reading only the first incoming
    /// edge from outputs already present on the graph.
    pub async fn run_node(
        &self,
        graph: &mut Graph,
        node_id: &NodeId,
        seed: &str,
        log: &RunLog,
    ) -> Result<NodeResult> {
        graph.validate()?;
        let kind = graph
            .node(node_id)
            .map(|n| n.kind.clone())
            .ok_or_else(|| WeftError::NodeNotFound(node_id.0.clone()))?;

        let run_id = RunId::new();
        self.event_bus.publish(RunEvent::RunStarted {
            run_id: run_id.clone(),
            strategy: Strategy::SingleNode,
        });
        info!(run_id = %run_id, node_id = %node_id, "Starting single-node run");

        let store = RunOutputStore::from_graph(graph);
        let input = resolve_input(graph, &store, node_id, seed, InputMode::FirstEdge, log);

        self.mark_running(graph, node_id, &kind, log);
        let (outcome, elapsed_ms) = self.execute_step(node_id, &kind, &input, seed, log).await;
        let result = self.apply(graph, node_id, outcome, elapsed_ms, log);

        if self.cancel.is_cancelled() {
            return Err(self.abort(&run_id, WeftError::Cancelled, log));
        }
        self.event_bus.publish(RunEvent::RunComplete {
            run_id,
            succeeded: result.succeeded(),
            total_elapsed_ms: result.elapsed_ms,
        });
        Ok(result)
    }

    /// Shared driver: ask the schedule for waves until it is exhausted.
    async fn drive(
        &self,
        graph: &mut Graph,
        schedule: &mut dyn Schedule,
        seed: &str,
        log: &RunLog,
    ) -> Result<RunReport> {
        let run_id = RunId::new();
        let strategy = schedule.strategy();
        let start = Instant::now();

        graph.reset();
        self.event_bus.publish(RunEvent::RunStarted {
            run_id: run_id.clone(),
            strategy,
        });
        info!(run_id = %run_id, ?strategy, nodes = graph.nodes.len(), "Starting workflow run");
        log.info(format!("Starting workflow run over {} nodes", graph.nodes.len()));

        let mut store = RunOutputStore::new();
        let mut progress = Progress::default();
        let mut node_results = Vec::new();
        let mut waves = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(self.abort(&run_id, WeftError::Cancelled, log));
            }

            let wave = match schedule.next_wave(graph, &progress) {
                Ok(Some(wave)) => wave,
                Ok(None) => break,
                Err(e) => return Err(self.abort(&run_id, e, log)),
            };
            if wave.nodes.is_empty() {
                debug!(wave = %wave.label, "Skipping empty wave");
                continue;
            }

            waves += 1;
            log.log(
                Severity::Running,
                format!("Starting {} ({} nodes)", wave.label, wave.nodes.len()),
            );
            let results = self
                .run_wave(graph, &wave, &mut store, &mut progress, seed, log)
                .await;
            let failed = results.iter().filter(|r| !r.succeeded()).count();
            node_results.extend(results);

            if self.cancel.is_cancelled() {
                return Err(self.abort(&run_id, WeftError::Cancelled, log));
            }
            if failed == 0 {
                log.success(format!("Completed {}", wave.label));
            } else {
                log.warning(format!("Completed {} with {} failed node(s)", wave.label, failed));
            }

            if strategy == Strategy::Readiness && self.config.wave_pause_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.wave_pause_ms)).await;
            }
        }

        let total_elapsed_ms = start.elapsed().as_millis() as u64;
        let succeeded = node_results.iter().all(NodeResult::succeeded);
        log.success("Workflow execution completed");
        info!(run_id = %run_id, waves, total_elapsed_ms, succeeded, "Workflow run complete");
        self.event_bus.publish(RunEvent::RunComplete {
            run_id: run_id.clone(),
            succeeded,
            total_elapsed_ms,
        });

        Ok(RunReport {
            run_id,
            strategy,
            node_results,
            waves,
            total_elapsed_ms,
            succeeded,
        })
    }

    /// Start every node of the wave together and record each as it finishes.
    async fn run_wave(
        &self,
        graph: &mut Graph,
        wave: &Wave,
        store: &mut RunOutputStore,
        progress: &mut Progress,
        seed: &str,
        log: &RunLog,
    ) -> Vec<NodeResult> {
        // Inputs are resolved up front; nothing in this wave feeds another.
        let mut started = Vec::with_capacity(wave.nodes.len());
        for id in &wave.nodes {
            let Some(node) = graph.node(id) else {
                warn!(node_id = %id, "Scheduled node missing from graph");
                continue;
            };
            let kind = node.kind.clone();
            let input = resolve_input(graph, store, id, seed, InputMode::AllEdges, log);
            started.push((id.clone(), kind, input));
        }

        for (id, kind, _) in &started {
            progress.start(id);
            self.mark_running(graph, id, kind, log);
        }

        let mut pending: FuturesUnordered<_> = started
            .iter()
            .map(|(id, kind, input)| async move {
                let (outcome, elapsed_ms) = self.execute_step(id, kind, input, seed, log).await;
                (id, outcome, elapsed_ms)
            })
            .collect();

        let mut results = Vec::with_capacity(started.len());
        while let Some((id, outcome, elapsed_ms)) = pending.next().await {
            progress.finish(id);
            store.record(id, &outcome.output, &outcome.ports);
            results.push(self.apply(graph, id, outcome, elapsed_ms, log));
        }
        results
    }

    fn mark_running(&self, graph: &mut Graph, id: &NodeId, kind: &NodeKind, log: &RunLog) {
        graph.set_state(id, NodeStatus::Running, None);
        self.event_bus.publish(RunEvent::NodeStatus {
            node_id: id.clone(),
            status: NodeStatus::Running,
        });
        log.node(Severity::Running, id, format!("Executing {} node {}", kind, id));
    }

    /// Run one node under the engine's timeout and cancellation token.
    async fn execute_step(
        &self,
        id: &NodeId,
        kind: &NodeKind,
        input: &ResolvedInput,
        seed: &str,
        log: &RunLog,
    ) -> (Outcome, u64) {
        let start = Instant::now();
        let ctx = ExecContext {
            node_id: id,
            seed,
            agent: self.agent.as_ref(),
            functions: self.functions.as_ref(),
            tools: self.tools.as_ref(),
            log,
        };

        let timeout_secs = self.config.node_timeout_secs;
        let execution = async {
            if timeout_secs == 0 {
                return kind.execute(&ctx, input).await;
            }
            match tokio::time::timeout(Duration::from_secs(timeout_secs), kind.execute(&ctx, input))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => Outcome::failed(&WeftError::NodeTimeout {
                    node: id.0.clone(),
                    timeout_secs,
                }),
            }
        };

        let outcome = tokio::select! {
            outcome = execution => outcome,
            _ = self.cancel.cancelled() => Outcome::failed(&WeftError::Cancelled),
        };
        (outcome, start.elapsed().as_millis() as u64)
    }

    /// Write a finished node's outcome to the graph, bus and log.
    fn apply(
        &self,
        graph: &mut Graph,
        id: &NodeId,
        outcome: Outcome,
        elapsed_ms: u64,
        log: &RunLog,
    ) -> NodeResult {
        graph.set_state(id, outcome.status, Some(outcome.output.clone()));
        graph.set_ports(id, outcome.ports.clone());
        self.event_bus.publish(RunEvent::NodeStatus {
            node_id: id.clone(),
            status: outcome.status,
        });

        if outcome.is_success() {
            log.node(Severity::Success, id, format!("Node {} completed", id));
        } else {
            log.node(
                Severity::Error,
                id,
                format!("Node {} failed: {}", id, outcome.output.primary()),
            );
        }
        debug!(node_id = %id, status = %outcome.status, elapsed_ms, "Node execution complete");

        NodeResult {
            node_id: id.clone(),
            status: outcome.status,
            output: outcome.output,
            elapsed_ms,
        }
    }

    /// Log and publish a run-level failure, handing the error back.
    fn abort(&self, run_id: &RunId, error: WeftError, log: &RunLog) -> WeftError {
        warn!(run_id = %run_id, error = %error, "Workflow run aborted");
        log.error(format!("Workflow execution aborted: {}", error));
        self.event_bus.publish(RunEvent::RunFailed {
            run_id: run_id.clone(),
            error: error.to_string(),
        });
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::edge::Edge;
    use crate::graph::node::Node;
    use weft_test_utils::{MockAgent, MockFunctions, MockTools};

    fn engine(agent: MockAgent) -> WorkflowEngine {
        WorkflowEngine::new(
            Arc::new(agent),
            Arc::new(MockFunctions::new()),
            Arc::new(MockTools::new()),
        )
    }

    #[tokio::test]
    async fn test_run_ready_chain() {
        let mut graph = Graph::default()
            .with_node(Node::input("in", "hello"))
            .with_node(Node::agent("ag", "echo", "{input}"))
            .with_node(Node::output("out"))
            .with_edge(Edge::new("in", "ag"))
            .with_edge(Edge::new("ag", "out"));
        let engine = engine(MockAgent::echo());
        let log = engine.run_log();

        let report = engine.run_ready(&mut graph, "", &log).await.unwrap();
        assert!(report.succeeded);
        assert_eq!(report.waves, 3);
        assert_eq!(report.strategy, Strategy::Readiness);
        let out = graph.node(&"out".into()).unwrap();
        assert_eq!(out.primary_output().as_deref(), Some("hello"));
        assert_eq!(out.status, NodeStatus::Success);
    }

    #[tokio::test]
    async fn test_invalid_graph_rejected_before_running() {
        let mut graph = Graph::default()
            .with_node(Node::input("a", "x"))
            .with_edge(Edge::new("a", "missing"));
        let engine = engine(MockAgent::echo());
        let log = engine.run_log();
        let err = engine.run_ready(&mut graph, "", &log).await.unwrap_err();
        assert!(matches!(err, WeftError::InvalidGraph(_)));
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_run_node_unknown_id() {
        let mut graph = Graph::default().with_node(Node::input("a", "x"));
        let engine = engine(MockAgent::echo());
        let log = engine.run_log();
        let err = engine
            .run_node(&mut graph, &"nope".into(), "", &log)
            .await
            .unwrap_err();
        assert!(matches!(err, WeftError::NodeNotFound(_)));
    }

    #[tokio::test]
    async fn test_timeout_becomes_node_error() {
        let mut graph = Graph::default()
            .with_node(Node::agent("slow", "stuck", "{input}"))
            .with_node(Node::input("fast", "ok"));
        let engine = engine(MockAgent::echo().hang("stuck")).with_config(EngineConfig {
            node_timeout_secs: 1,
            wave_pause_ms: 0,
        });
        let log = engine.run_log();

        let report = engine.run_ready(&mut graph, "", &log).await.unwrap();
        assert!(!report.succeeded);
        let slow = report.result(&"slow".into()).unwrap();
        assert_eq!(slow.status, NodeStatus::Error);
        assert!(slow.output.primary().contains("timed out after 1s"));
        assert!(report.result(&"fast".into()).unwrap().succeeded());
    }

    #[tokio::test]
    async fn test_status_events_published() {
        let mut graph = Graph::default().with_node(Node::input("a", "x"));
        let engine = engine(MockAgent::echo());
        let mut rx = engine.event_bus().subscribe();
        let log = engine.run_log();
        engine.run_ready(&mut graph, "", &log).await.unwrap();

        let mut statuses = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let RunEvent::NodeStatus { status, .. } = event {
                statuses.push(status);
            }
        }
        assert_eq!(statuses, vec![NodeStatus::Running, NodeStatus::Success]);
    }

    #[tokio::test]
    async fn test_run_node_publishes_single_node_run() {
        let mut graph = Graph::default().with_node(Node::input("a", "x"));
        let engine = engine(MockAgent::echo());
        let mut rx = engine.event_bus().subscribe();
        let log = engine.run_log();
        engine.run_node(&mut graph, &"a".into(), "", &log).await.unwrap();

        let mut started = None;
        let mut completed = None;
        while let Ok(event) = rx.try_recv() {
            match event {
                RunEvent::RunStarted { run_id, strategy } => started = Some((run_id, strategy)),
                RunEvent::RunComplete { run_id, succeeded, .. } => {
                    completed = Some((run_id, succeeded))
                }
                _ => {}
            }
        }
        let (started_id, strategy) = started.unwrap();
        assert_eq!(strategy, Strategy::SingleNode);
        let (completed_id, succeeded) = completed.unwrap();
        assert_eq!(completed_id, started_id);
        assert!(succeeded);
    }
}
