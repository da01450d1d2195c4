//! Workflow graphs and their execution.
//!
//! A workflow is a directed graph of typed `Node`s connected by `Edge`s.
//! Each edge carries the source's primary output, or one named port of it,
//! into the target's input. `WorkflowEngine` runs a graph either stage by
//! stage against a user-authored `StagePlan`, or by readiness, starting
//! every node whose upstream nodes have finished.

pub mod dispatch;
pub mod edge;
pub mod executor;
pub mod model;
pub mod node;
pub mod resolve;
pub mod schedule;
pub mod stage;
pub mod store;
pub mod transform;

pub use dispatch::{ExecContext, Outcome};
pub use edge::Edge;
pub use executor::{NodeResult, RunReport, WorkflowEngine};
pub use model::Graph;
pub use node::{Node, NodeKind, NodeOutput};
pub use resolve::{InputMode, ResolvedInput};
pub use schedule::{level, ReadinessSchedule, Schedule, StagedSchedule, Wave};
pub use stage::{Stage, StagePlan};
pub use store::{OutputKey, RunOutputStore};
pub use transform::TransformOp;
