use std::collections::HashSet;

use weft_core::error::{Result, WeftError};
use weft_core::types::{NodeId, Strategy};

use super::model::Graph;
use super::stage::StagePlan;

/// A batch of nodes started together.
#[derive(Debug, Clone, PartialEq)]
pub struct Wave {
    pub label: String,
    pub nodes: Vec<NodeId>,
}

/// Bookkeeping the driver shares with a schedule.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    pub done: HashSet<NodeId>,
    pub in_flight: HashSet<NodeId>,
}

impl Progress {
    pub fn start(&mut self, node: &NodeId) {
        self.in_flight.insert(node.clone());
    }

    pub fn finish(&mut self, node: &NodeId) {
        self.in_flight.remove(node);
        self.done.insert(node.clone());
    }
}

/// Decides which nodes run next.
///
/// The driver drains every in-flight node before asking for the next wave.
pub trait Schedule {
    fn strategy(&self) -> Strategy;

    /// The next wave, or `None` once the run is complete.
    fn next_wave(&mut self, graph: &Graph, progress: &Progress) -> Result<Option<Wave>>;
}

/// Runs user-authored stages in order; the partition is the schedule.
pub struct StagedSchedule<'a> {
    plan: &'a StagePlan,
    next: usize,
}

impl<'a> StagedSchedule<'a> {
    pub fn new(plan: &'a StagePlan) -> Self {
        Self { plan, next: 0 }
    }
}

impl Schedule for StagedSchedule<'_> {
    fn strategy(&self) -> Strategy {
        Strategy::Staged
    }

    fn next_wave(&mut self, graph: &Graph, _progress: &Progress) -> Result<Option<Wave>> {
        let Some(stage) = self.plan.stages.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;

        let label = if stage.name.is_empty() {
            format!("stage {}", self.next)
        } else {
            stage.name.clone()
        };
        Ok(Some(Wave {
            label,
            nodes: stage
                .nodes
                .iter()
                .filter(|id| graph.contains(id))
                .cloned()
                .collect(),
        }))
    }
}

/// Runs whatever is ready: every node whose upstream nodes are all done.
#[derive(Debug, Default)]
pub struct ReadinessSchedule {
    wave: usize,
}

impl ReadinessSchedule {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Schedule for ReadinessSchedule {
    fn strategy(&self) -> Strategy {
        Strategy::Readiness
    }

    fn next_wave(&mut self, graph: &Graph, progress: &Progress) -> Result<Option<Wave>> {
        let ready = ready_nodes(graph, progress);
        if ready.is_empty() {
            if progress.done.len() >= graph.nodes.len() {
                return Ok(None);
            }
            let pending = graph
                .node_ids()
                .filter(|id| !progress.done.contains(*id))
                .map(|id| id.0.clone())
                .collect();
            return Err(WeftError::Unschedulable { pending });
        }

        self.wave += 1;
        Ok(Some(Wave {
            label: format!("wave {}", self.wave),
            nodes: ready,
        }))
    }
}

/// Nodes not yet done or in flight whose every incoming edge has a done source.
fn ready_nodes(graph: &Graph, progress: &Progress) -> Vec<NodeId> {
    graph
        .node_ids()
        .filter(|id| !progress.done.contains(*id) && !progress.in_flight.contains(*id))
        .filter(|id| graph.incoming(id).all(|e| progress.done.contains(&e.source)))
        .cloned()
        .collect()
}

/// Topological leveling: the waves a readiness run would execute, computed
/// without running anything. Fails on cycles.
pub fn level(graph: &Graph) -> Result<Vec<Vec<NodeId>>> {
    let mut schedule = ReadinessSchedule::new();
    let mut progress = Progress::default();
    let mut levels = Vec::new();
    while let Some(wave) = schedule.next_wave(graph, &progress)? {
        for id in &wave.nodes {
            progress.finish(id);
        }
        levels.push(wave.nodes);
    }
    Ok(levels)
}
