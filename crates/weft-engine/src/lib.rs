pub mod graph;
pub mod run_log;

pub use graph::{
    Edge, Graph, Node, NodeKind, NodeOutput, NodeResult, OutputKey, RunReport, Stage, StagePlan,
    TransformOp, WorkflowEngine,
};
pub use run_log::{RunLog, RunLogWriter};
