use weft_core::types::{NodeId, Severity, JOIN_SEPARATOR, NO_INPUT};

use super::model::Graph;
use super::store::{OutputKey, RunOutputStore};
use crate::run_log::RunLog;

/// How incoming edges are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    /// Every incoming edge, joined in edge-list order (full runs).
    AllEdges,
    /// Only the first incoming edge (single-node test runs).
    FirstEdge,
}

/// A node's input once upstream values are looked up.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedInput {
    /// All parts joined with the separator.
    pub text: String,
    /// Individual upstream values, in edge order.
    pub parts: Vec<String>,
}

impl ResolvedInput {
    pub fn from_parts(parts: Vec<String>) -> Self {
        Self {
            text: parts.join(JOIN_SEPARATOR),
            parts,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::from_parts(vec![text.into()])
    }
}

/// The seed input as seen by source nodes.
pub fn seed_or_default(seed: &str) -> &str {
    if seed.trim().is_empty() {
        NO_INPUT
    } else {
        seed
    }
}

/// Resolve the input for `node` from the outputs recorded so far.
///
/// Nodes without incoming edges receive the seed input. Upstream values
/// that are not available are skipped with a warning.
pub fn resolve_input(
    graph: &Graph,
    store: &RunOutputStore,
    node: &NodeId,
    seed: &str,
    mode: InputMode,
    log: &RunLog,
) -> ResolvedInput {
    let incoming: Vec<_> = graph.incoming(node).collect();
    if incoming.is_empty() {
        return ResolvedInput::text(seed_or_default(seed));
    }

    let take = match mode {
        InputMode::AllEdges => incoming.len(),
        InputMode::FirstEdge => 1,
    };

    let mut parts = Vec::with_capacity(take);
    for edge in incoming.into_iter().take(take) {
        let key = OutputKey {
            node: edge.source.clone(),
            port: edge.source_port.clone(),
        };
        match store.get(&key) {
            Some(value) => parts.push(value.to_string()),
            None => log.node(
                Severity::Warning,
                node,
                format!("Input from {} is not available", key),
            ),
        }
    }
    ResolvedInput::from_parts(parts)
}
