use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use weft_core::config::AppConfig;
use weft_core::types::{NodeId, NodeStatus, RunId};
use weft_engine::graph::NodeKind;
use weft_engine::{Graph, RunLogWriter, RunReport, StagePlan, WorkflowEngine};

#[derive(Parser)]
#[command(name = "weft", version, about = "Run node-and-edge AI workflows")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "weft.toml", env = "WEFT_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a whole workflow
    Run {
        /// Workflow file (JSON)
        workflow: PathBuf,
        /// Seed input for nodes without upstream connections
        #[arg(short, long, default_value = "")]
        input: String,
        /// Run by the workflow's stages instead of by readiness
        #[arg(long)]
        staged: bool,
    },
    /// Run a single node against outputs stored in the workflow file
    Node {
        workflow: PathBuf,
        node_id: String,
        #[arg(short, long, default_value = "")]
        input: String,
    },
    /// Check a workflow for structural problems
    Validate { workflow: PathBuf },
    /// Print the automatic stage plan for a workflow
    Stages { workflow: PathBuf },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// On-disk workflow: a graph plus an optional user-authored stage plan.
#[derive(Debug, Serialize, Deserialize)]
struct Workflow {
    graph: Graph,
    #[serde(default)]
    stages: Option<StagePlan>,
}

impl Workflow {
    fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read {}: {}", path.display(), e))?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("weft=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Handle commands that need no config
    match &cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "weft", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Validate { workflow } => return validate(workflow),
        Commands::Stages { workflow } => {
            let workflow = Workflow::load(workflow)?;
            let plan = stage_plan(&workflow.graph, None)?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
            return Ok(());
        }
        _ => {}
    }

    let config = AppConfig::load_or_default(&cli.config)?;
    if !cli.config.exists() {
        warn!(path = %cli.config.display(), "No config file found, using defaults");
    }

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Run {
            workflow,
            input,
            staged,
        } => {
            let Workflow { mut graph, stages } = Workflow::load(&workflow)?;
            let engine = build_engine(&config)?;
            let (writer_cancel, writer) = spawn_log_writer(&config, &engine);

            let log = engine.run_log();
            let result = if staged {
                let plan = stage_plan(&graph, stages)?;
                engine.run_staged(&mut graph, &plan, &input, &log).await
            } else {
                engine.run_ready(&mut graph, &input, &log).await
            };

            finish_log_writer(writer_cancel, writer).await;
            let report = result?;
            print_report(&graph, &report);
        }
        Commands::Node {
            workflow,
            node_id,
            input,
        } => {
            let Workflow { mut graph, .. } = Workflow::load(&workflow)?;
            let engine = build_engine(&config)?;
            let log = engine.run_log();
            let result = engine
                .run_node(&mut graph, &NodeId::new(node_id), &input, &log)
                .await?;
            println!("[{}] {} ({}ms)", result.status, result.node_id, result.elapsed_ms);
            println!("{}", result.output.primary());
        }
        Commands::Completions { .. } | Commands::Validate { .. } | Commands::Stages { .. } => {
            unreachable!("handled before config load")
        }
    }

    Ok(())
}

fn build_engine(config: &AppConfig) -> anyhow::Result<WorkflowEngine> {
    let collaborators = weft_llm::create_collaborators(config)?;
    let engine = WorkflowEngine::new(
        collaborators.agent,
        collaborators.functions,
        collaborators.tools,
    )
    .with_config(config.engine.clone());

    // Graceful shutdown on Ctrl-C
    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Cancelling workflow run...");
        cancel.cancel();
    });

    Ok(engine)
}

/// Spawn the JSONL writer if logging is enabled.
fn spawn_log_writer(
    config: &AppConfig,
    engine: &WorkflowEngine,
) -> (
    CancellationToken,
    Option<tokio::task::JoinHandle<Option<PathBuf>>>,
) {
    let cancel = CancellationToken::new();
    let handle = match &config.log {
        Some(log_config) if log_config.enabled => {
            let writer = RunLogWriter::new(log_config.resolved_dir());
            Some(writer.spawn(engine.event_bus(), RunId::new(), cancel.clone()))
        }
        _ => None,
    };
    (cancel, handle)
}

async fn finish_log_writer(
    cancel: CancellationToken,
    handle: Option<tokio::task::JoinHandle<Option<PathBuf>>>,
) {
    let Some(handle) = handle else { return };
    // A run rejected before it started never ends the writer on its own.
    let abort = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        cancel.cancel();
    });
    match handle.await {
        Ok(Some(path)) => info!(path = %path.display(), "Run log written"),
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Run log writer task failed"),
    }
    abort.abort();
}

/// The workflow's own stages, or stages derived from a structurally valid graph.
fn stage_plan(graph: &Graph, stages: Option<StagePlan>) -> anyhow::Result<StagePlan> {
    if let Some(plan) = stages {
        return Ok(plan);
    }
    graph.validate()?;
    info!("Workflow has no stages, deriving them from the graph");
    Ok(StagePlan::auto(graph)?)
}

fn validate(path: &Path) -> anyhow::Result<()> {
    let workflow = Workflow::load(path)?;
    workflow.graph.validate()?;
    let levels = weft_engine::graph::level(&workflow.graph)?;
    println!(
        "Graph OK: {} nodes, {} edges, {} waves",
        workflow.graph.nodes.len(),
        workflow.graph.edges.len(),
        levels.len()
    );

    if let Some(plan) = &workflow.stages {
        plan.validate(&workflow.graph)?;
        for edge in plan.violations(&workflow.graph) {
            println!(
                "warning: connection {} -> {} does not point to a later stage",
                edge.source, edge.target
            );
        }
        for node in plan.unstaged(&workflow.graph) {
            println!("warning: node {} is not in any stage", node);
        }
        println!("Stages OK: {} stages", plan.stages.len());
    }
    Ok(())
}

fn print_report(graph: &Graph, report: &RunReport) {
    for result in &report.node_results {
        println!(
            "[{}] {} ({}ms)",
            result.status, result.node_id, result.elapsed_ms
        );
    }

    let outputs: Vec<_> = graph
        .nodes
        .iter()
        .filter(|n| matches!(n.kind, NodeKind::Output) && n.status == NodeStatus::Success)
        .collect();
    for node in outputs {
        let label = if node.name.is_empty() {
            node.id.as_str()
        } else {
            node.name.as_str()
        };
        println!("\n=== {} ===\n{}", label, node.primary_output().unwrap_or_default());
    }

    println!(
        "\n{} in {} wave(s), {}ms",
        if report.succeeded {
            "Workflow succeeded"
        } else {
            "Workflow finished with errors"
        },
        report.waves,
        report.total_elapsed_ms
    );
}
