use crate::types::Constraint;

/// Fixed part of the decision prompt. Defines the agent's identity, the tool
/// vocabulary, the loop-avoidance / dead-end contract, and the exact response
/// format. The oracle is told the rules; the agent only enforces safety.
const DECISION_PROMPT_TEMPLATE: &str = "\
Role: You are an autonomous Graph of Thoughts agent over a knowledge graph.
Goal: Find the entity set that satisfies ALL user constraints.

User Query: \"{QUERY}\"

## Constraint definitions (reference)
{DEFINITIONS}

## Current graph state
{GRAPH}

## Statistical critic advice
{ADVICE}

## Decision instructions
1. ANALYZE HISTORY: check the graph state above. Which constraints have ALREADY been applied?
2. CHECK COMPLETION: if the remaining candidates satisfy all constraint definitions
   (typically 1-5 candidates left with every necessary filter applied), output FINISH.
3. AVOID LOOPS: do NOT apply a constraint that is already present in the history of the current path.
4. NEXT STEP: if constraints remain unapplied, choose the best one based on the critic advice.
5. HANDLE DEAD ENDS: if a FILTER produced 0 candidates, the next action MUST be
   RELAX_CONSTRAINT on that constraint.

Available actions:
1. SEARCH_ANCHOR   params: {\"constraint_id\": \"...\"}            start a new search path
2. FILTER          params: {\"parent_node_id\": \"...\", \"constraint_id\": \"...\"}
3. INTERSECT       params: {\"node_id_1\": \"...\", \"node_id_2\": \"...\"}
4. RELAX_CONSTRAINT params: {\"constraint_id\": \"...\"}           weaken a constraint that dead-ended
5. FINISH          params: {\"final_node_id\": \"...\"}            return that node's candidates

This is step {STEP} of at most {MAX_STEPS}.

Respond with EXACTLY one JSON object, nothing else:
{\"reasoning\": \"step-by-step reasoning\", \"action\": \"ACTION_NAME\", \"params\": { ... }}";

/// Render the full decision prompt for one step.
pub fn build_decision_prompt(
    question: &str,
    constraints: &[Constraint],
    graph_summary: &str,
    advice: &str,
    step: usize,
    max_steps: usize,
) -> String {
    let definitions = constraints
        .iter()
        .map(|c| format!("- {}", c.describe()))
        .collect::<Vec<_>>()
        .join("\n");

    DECISION_PROMPT_TEMPLATE
        .replace("{QUERY}", question)
        .replace("{DEFINITIONS}", &definitions)
        .replace("{GRAPH}", graph_summary.trim_end())
        .replace("{ADVICE}", advice.trim_end())
        .replace("{STEP}", &step.to_string())
        .replace("{MAX_STEPS}", &max_steps.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Constraint, Operator};

    #[test]
    fn prompt_contains_question_definitions_and_step() {
        let constraints = vec![
            Constraint::new("c1", "P57", "director", Operator::Eq, "Q25191"),
            Constraint::new("c2", "P577", "publication date", Operator::Gt, "2020"),
        ];
        let prompt = build_decision_prompt(
            "films by Hitchcock after 2020",
            &constraints,
            "Current Graph State:\n  (Empty Graph)",
            "Dynamic Probing Analysis:",
            0,
            15,
        );
        assert!(prompt.contains("films by Hitchcock after 2020"));
        assert!(prompt.contains("- c1: director = Q25191"));
        assert!(prompt.contains("- c2: publication date > 2020"));
        assert!(prompt.contains("step 0 of at most 15"));
        assert!(prompt.contains("RELAX_CONSTRAINT"));
    }
}
