use std::collections::{BTreeSet, HashMap};

use anyhow::{Result, bail};

/// Entity codes associated with a thought node. Ordered so traces and
/// answers render deterministically.
pub type CandidateSet = BTreeSet<String>;

/// How many trailing history lines the graph summary shows the oracle.
const SUMMARY_HISTORY_LINES: usize = 6;

pub const ROOT_ID: &str = "root";

// ── Nodes ─────────────────────────────────────────────────────────────────────

/// One vertex of the reasoning DAG: a candidate set plus where it came from.
#[derive(Debug, Clone)]
pub struct ThoughtNode {
    pub node_id: String,
    pub description: String,
    pub candidates: CandidateSet,
    pub parent_ids: Vec<String>,
}

impl ThoughtNode {
    pub fn new(
        node_id: impl Into<String>,
        description: impl Into<String>,
        candidates: CandidateSet,
        parent_ids: Vec<String>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            description: description.into(),
            candidates,
            parent_ids,
        }
    }
}

// ── Graph ─────────────────────────────────────────────────────────────────────

/// The reasoning DAG of one question. Nodes are append-only; nothing is ever
/// mutated or removed, so the graph doubles as the question's audit trail.
pub struct ThoughtGraph {
    nodes: HashMap<String, ThoughtNode>,
    /// Insertion order; the last entry is the FINISH fallback node.
    order: Vec<String>,
    edges: Vec<(String, String)>,
    history: Vec<String>,
    next_suffix: u64,
}

impl ThoughtGraph {
    pub fn new() -> Self {
        let mut graph = Self {
            nodes: HashMap::new(),
            order: Vec::new(),
            edges: Vec::new(),
            history: Vec::new(),
            next_suffix: 0,
        };
        // Root: empty candidate set, no parents.
        let root = ThoughtNode::new(ROOT_ID, "Start", CandidateSet::new(), Vec::new());
        graph.nodes.insert(root.node_id.clone(), root);
        graph.order.push(ROOT_ID.to_string());
        graph
    }

    /// Allocate a collision-free node id. The monotonic suffix keeps ids
    /// unique even when the same constraint is applied twice.
    pub fn fresh_id(&mut self, prefix: &str) -> String {
        self.next_suffix += 1;
        format!("{prefix}_{}", self.next_suffix)
    }

    /// Append a node. Every referenced parent must already exist and the id
    /// must be unused — violations are errors, not panics, because node ids
    /// come (indirectly) from the oracle.
    pub fn add_node(&mut self, node: ThoughtNode) -> Result<()> {
        if self.nodes.contains_key(&node.node_id) {
            bail!("duplicate node id '{}'", node.node_id);
        }
        for parent in &node.parent_ids {
            if !self.nodes.contains_key(parent) {
                bail!("parent node '{parent}' does not exist");
            }
        }
        for parent in &node.parent_ids {
            self.edges.push((parent.clone(), node.node_id.clone()));
        }
        self.order.push(node.node_id.clone());
        self.nodes.insert(node.node_id.clone(), node);
        Ok(())
    }

    pub fn get(&self, node_id: &str) -> Option<&ThoughtNode> {
        self.nodes.get(node_id)
    }

    /// Most recently added node (the FINISH fallback).
    pub fn last_added(&self) -> Option<&ThoughtNode> {
        self.order.last().and_then(|id| self.nodes.get(id))
    }

    /// Nodes without outgoing edges, in insertion order.
    pub fn leaves(&self) -> Vec<&ThoughtNode> {
        self.order
            .iter()
            .filter(|id| !self.edges.iter().any(|(parent, _)| parent == *id))
            .filter_map(|id| self.nodes.get(id))
            .collect()
    }

    /// Latest leaf's candidates — the answer of record when the step budget
    /// or deadline runs out before FINISH.
    pub fn latest_leaf_candidates(&self) -> CandidateSet {
        self.leaves()
            .last()
            .map(|n| n.candidates.clone())
            .unwrap_or_default()
    }

    pub fn push_history(&mut self, line: String) {
        self.history.push(line);
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// Graph summary the oracle reads each step: nodes with candidate counts
    /// and parents, plus the most recent history lines.
    pub fn summary(&self) -> String {
        let mut out = String::from("Current Graph State:\n");
        if self.order.len() <= 1 {
            out.push_str("  (Empty Graph)\n");
        }
        for id in &self.order {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            if node.node_id == ROOT_ID {
                continue;
            }
            let parents = if node.parent_ids.is_empty() {
                " (no parents)".to_string()
            } else {
                format!(" <- {:?}", node.parent_ids)
            };
            out.push_str(&format!(
                "  - [{}] {}: Found {} entities.{parents}\n",
                node.node_id,
                node.description,
                node.candidates.len()
            ));
        }
        if !self.history.is_empty() {
            out.push_str("Recent History:\n");
            let start = self.history.len().saturating_sub(SUMMARY_HISTORY_LINES);
            for line in &self.history[start..] {
                out.push_str(&format!("  {line}\n"));
            }
        }
        out
    }
}

impl Default for ThoughtGraph {
    fn default() -> Self {
        Self::new()
    }
}
