pub mod decide;
pub mod oracle;
pub mod prompt;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::critic::Critic;
use crate::environment::GraphEnvironment;
use crate::graph::{CandidateSet, ROOT_ID, ThoughtGraph, ThoughtNode};
use crate::types::Constraint;
use decide::{Action, Decision, parse_decision};
use oracle::Oracle;

/// Answer of one question: the final candidate set plus the textual trace of
/// every applied action.
#[derive(Debug)]
pub struct Solution {
    pub answers: CandidateSet,
    pub trace: Vec<String>,
}

/// Drives the bounded observe → advise → decide → act loop over the thought
/// graph. The oracle chooses; the agent enforces safety (step budget,
/// deadline, guarded dispatch) but not the semantic quality of the choice.
pub struct ReasoningAgent {
    env: GraphEnvironment,
    oracle: Arc<dyn Oracle>,
    max_steps: usize,
    deadline: Option<Duration>,
}

impl ReasoningAgent {
    pub fn new(
        env: GraphEnvironment,
        oracle: Arc<dyn Oracle>,
        max_steps: usize,
        deadline: Option<Duration>,
    ) -> Self {
        Self {
            env,
            oracle,
            max_steps,
            deadline,
        }
    }

    pub async fn solve(&self, question: &str, mut constraints: Vec<Constraint>) -> Solution {
        let mut graph = ThoughtGraph::new();
        let started = Instant::now();

        for step in 0..self.max_steps {
            if let Some(deadline) = self.deadline
                && started.elapsed() >= deadline
            {
                tracing::warn!(step, "question deadline exceeded, returning latest leaf");
                break;
            }

            // Observe + consult the critic, then ask the oracle.
            let summary = graph.summary();
            let advice = Critic::evaluate(&constraints);
            let prompt = prompt::build_decision_prompt(
                question,
                &constraints,
                &summary,
                &advice,
                step,
                self.max_steps,
            );

            let raw = match self.oracle.decide(&prompt).await {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(step, "oracle call failed: {e}");
                    continue;
                }
            };
            let decision = match parse_decision(&raw) {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!(step, "unusable oracle decision: {e}");
                    continue;
                }
            };

            match self
                .apply(&decision, &mut graph, &mut constraints, step)
                .await
            {
                StepOutcome::Finished(answers) => {
                    tracing::info!(step, "agent decided to FINISH");
                    return Solution {
                        answers,
                        trace: graph.history().to_vec(),
                    };
                }
                StepOutcome::Applied => {
                    graph.push_history(format!("Step {step}: {}", decision.reasoning));
                }
                StepOutcome::Skipped => {}
            }
        }

        tracing::warn!("max steps or deadline reached without FINISH");
        Solution {
            answers: graph.latest_leaf_candidates(),
            trace: graph.history().to_vec(),
        }
    }

    /// Dispatch one decision. Invalid references and gateway failures are
    /// logged and skipped; the loop must survive anything the oracle says.
    async fn apply(
        &self,
        decision: &Decision,
        graph: &mut ThoughtGraph,
        constraints: &mut [Constraint],
        step: usize,
    ) -> StepOutcome {
        let by_id: HashMap<String, usize> = constraints
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.clone(), i))
            .collect();

        match &decision.action {
            Action::SearchAnchor { constraint_id } => {
                let Some(&idx) = by_id.get(constraint_id) else {
                    tracing::warn!(step, %constraint_id, "SEARCH_ANCHOR on unknown constraint");
                    return StepOutcome::Skipped;
                };
                let c = &constraints[idx];
                let candidates = match self.env.search_anchor(c).await {
                    Ok(candidates) => candidates,
                    Err(e) => {
                        tracing::warn!(step, "anchor failed: {e}");
                        return StepOutcome::Skipped;
                    }
                };
                let node_id = graph.fresh_id(&format!("node_{constraint_id}"));
                let node = ThoughtNode::new(
                    node_id,
                    format!("Search {}", c.property_label),
                    candidates,
                    vec![ROOT_ID.to_string()],
                );
                self.insert(graph, node, step)
            }

            Action::Filter {
                parent_node_id,
                constraint_id,
            } => {
                let Some(&idx) = by_id.get(constraint_id) else {
                    tracing::warn!(step, %constraint_id, "FILTER on unknown constraint");
                    return StepOutcome::Skipped;
                };
                let Some(parent) = graph.get(parent_node_id) else {
                    tracing::warn!(step, %parent_node_id, "FILTER on unknown parent node");
                    return StepOutcome::Skipped;
                };
                let parent_candidates = parent.candidates.clone();
                let c = &constraints[idx];
                let kept = match self.env.filter(&parent_candidates, c).await {
                    Ok(kept) => kept,
                    Err(e) => {
                        tracing::warn!(step, "filter failed: {e}");
                        return StepOutcome::Skipped;
                    }
                };
                let node_id = graph.fresh_id(&format!("node_{constraint_id}"));
                let node = ThoughtNode::new(
                    node_id,
                    format!("Filter {}", c.property_label),
                    kept,
                    vec![parent_node_id.clone()],
                );
                self.insert(graph, node, step)
            }

            Action::Intersect { node_id_1, node_id_2 } => {
                let (Some(a), Some(b)) = (graph.get(node_id_1), graph.get(node_id_2)) else {
                    tracing::warn!(step, %node_id_1, %node_id_2, "INTERSECT on unknown nodes");
                    return StepOutcome::Skipped;
                };
                let merged = self.env.intersect(&a.candidates, &b.candidates);
                let node_id = graph.fresh_id(&format!("merge_{node_id_1}_{node_id_2}"));
                let node = ThoughtNode::new(node_id, "Intersection", merged, vec![
                    node_id_1.clone(),
                    node_id_2.clone(),
                ]);
                self.insert(graph, node, step)
            }

            Action::RelaxConstraint { constraint_id } => {
                let Some(&idx) = by_id.get(constraint_id) else {
                    tracing::warn!(step, %constraint_id, "RELAX_CONSTRAINT on unknown constraint");
                    return StepOutcome::Skipped;
                };
                let relaxed = self.env.relax(&constraints[idx]);
                let description = format!(
                    "Relaxed {constraint_id} ({}) -> {} {}",
                    relaxed.property_label,
                    relaxed.operator.symbol(),
                    relaxed.value
                );
                // The constraint list is the single source of truth the next
                // prompt is built from; adopt the weakened form in place.
                constraints[idx] = relaxed;
                let node_id = graph.fresh_id(&format!("relax_{constraint_id}"));
                let node = ThoughtNode::new(node_id, description, CandidateSet::new(), Vec::new());
                self.insert(graph, node, step)
            }

            Action::Finish { final_node_id } => {
                let target = final_node_id
                    .as_deref()
                    .and_then(|id| graph.get(id))
                    .or_else(|| {
                        tracing::warn!(
                            step,
                            ?final_node_id,
                            "FINISH with invalid node id, using last node"
                        );
                        graph.last_added()
                    });
                let answers = target.map(|n| n.candidates.clone()).unwrap_or_default();
                graph.push_history(format!("Step {step}: {}", decision.reasoning));
                StepOutcome::Finished(answers)
            }
        }
    }

    fn insert(&self, graph: &mut ThoughtGraph, node: ThoughtNode, step: usize) -> StepOutcome {
        match graph.add_node(node) {
            Ok(()) => StepOutcome::Applied,
            Err(e) => {
                tracing::warn!(step, "rejected node: {e}");
                StepOutcome::Skipped
            }
        }
    }
}

enum StepOutcome {
    Applied,
    Skipped,
    Finished(CandidateSet),
}
