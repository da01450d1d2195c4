use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use weft_core::error::{Result, WeftError};
use weft_core::types::NodeId;

use super::edge::Edge;
use super::model::Graph;
use super::schedule::level;
use crate::run_log::RunLog;

/// A user-ordered group of nodes that only depends on earlier stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<NodeId>,
}

impl Stage {
    pub fn new(id: impl Into<String>, name: impl Into<String>, nodes: Vec<NodeId>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            nodes,
        }
    }
}

/// Ordered stage partition for stage-ordered runs.
///
/// Invariant: every edge between staged nodes goes from a lower stage index
/// to a strictly higher one. Edits that break it drop the offending edges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StagePlan {
    pub stages: Vec<Stage>,
}

impl StagePlan {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    /// Derive stages from the graph's topological levels.
    pub fn auto(graph: &Graph) -> Result<Self> {
        let stages = level(graph)?
            .into_iter()
            .enumerate()
            .map(|(i, nodes)| Stage::new(format!("stage-{}", i + 1), format!("Stage {}", i + 1), nodes))
            .collect();
        Ok(Self { stages })
    }

    pub fn stage_index(&self, node: &NodeId) -> Option<usize> {
        self.stages.iter().position(|s| s.nodes.contains(node))
    }

    /// Check membership: every member exists and belongs to one stage only.
    pub fn validate(&self, graph: &Graph) -> Result<()> {
        let mut owner: HashMap<&NodeId, &str> = HashMap::new();
        for stage in &self.stages {
            for node in &stage.nodes {
                if !graph.contains(node) {
                    return Err(WeftError::InvalidGraph(format!(
                        "stage '{}' references unknown node '{}'",
                        stage.id, node
                    )));
                }
                if let Some(previous) = owner.insert(node, &stage.id) {
                    return Err(WeftError::InvalidGraph(format!(
                        "node '{}' is in both stage '{}' and stage '{}'",
                        node, previous, stage.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Graph nodes not assigned to any stage.
    pub fn unstaged(&self, graph: &Graph) -> Vec<NodeId> {
        graph
            .node_ids()
            .filter(|id| self.stage_index(id).is_none())
            .cloned()
            .collect()
    }

    /// Edges that point backward or stay within one stage.
    pub fn violations<'g>(&self, graph: &'g Graph) -> Vec<&'g Edge> {
        graph
            .edges
            .iter()
            .filter(|e| self.violates(e))
            .collect()
    }

    fn violates(&self, edge: &Edge) -> bool {
        match (self.stage_index(&edge.source), self.stage_index(&edge.target)) {
            (Some(source), Some(target)) => source >= target,
            _ => false,
        }
    }

    /// Drop every edge that breaks the forward-only invariant, logging each.
    pub fn repair(&self, graph: &mut Graph, log: &RunLog) -> Vec<Edge> {
        let dropped = graph.remove_edges(|e| self.violates(e));
        for edge in &dropped {
            log.warning(format!(
                "Removed connection {} -> {}: source stage must come before target stage",
                edge.source, edge.target
            ));
        }
        dropped
    }

    /// Move the stage at `from` to position `to`, then repair.
    pub fn move_stage(
        &mut self,
        from: usize,
        to: usize,
        graph: &mut Graph,
        log: &RunLog,
    ) -> Result<Vec<Edge>> {
        let len = self.stages.len();
        if from >= len || to >= len {
            return Err(WeftError::InvalidGraph(format!(
                "stage index out of range (from {}, to {}, {} stages)",
                from, to, len
            )));
        }
        let stage = self.stages.remove(from);
        self.stages.insert(to, stage);
        Ok(self.repair(graph, log))
    }

    /// Move `node` into the stage at `stage`, then repair.
    pub fn assign(
        &mut self,
        node: &NodeId,
        stage: usize,
        graph: &mut Graph,
        log: &RunLog,
    ) -> Result<Vec<Edge>> {
        if !graph.contains(node) {
            return Err(WeftError::NodeNotFound(node.0.clone()));
        }
        if stage >= self.stages.len() {
            return Err(WeftError::InvalidGraph(format!(
                "stage index {} out of range ({} stages)",
                stage,
                self.stages.len()
            )));
        }
        for s in &mut self.stages {
            s.nodes.retain(|n| n != node);
        }
        self.stages[stage].nodes.push(node.clone());
        Ok(self.repair(graph, log))
    }
}
