use crate::types::{Constraint, RowEstimate};

const STRONG_ANCHOR_ROWS: u64 = 1000;
const ACCEPTABLE_ANCHOR_ROWS: u64 = 10_000;
const INEFFICIENT_FILTER_ROWS: u64 = 100_000;
const RELAXABLE_SOFTNESS: f64 = 0.5;

/// Turns planner metadata into advisory sentences for the reasoning oracle.
/// Never executes queries; it reads only what the planner attached.
pub struct Critic;

impl Critic {
    /// `constraints` must already be planner-ordered (best anchor first).
    pub fn evaluate(constraints: &[Constraint]) -> String {
        let mut advice = String::from("Dynamic Probing Analysis:\n");
        let Some(best) = constraints.first() else {
            advice.push_str("  (no constraints to analyze)\n");
            return advice;
        };

        let rows = best.estimated_rows.rows();
        if rows < STRONG_ANCHOR_ROWS {
            advice.push_str(&format!(
                "  1. [STRONG ANCHOR] '{}' is excellent. It yields only {rows} results.\n",
                best.property_label
            ));
        } else if rows < ACCEPTABLE_ANCHOR_ROWS {
            advice.push_str(&format!(
                "  1. [ACCEPTABLE ANCHOR] '{}' yields {rows} results. Use it if no better option.\n",
                best.property_label
            ));
        } else {
            advice.push_str(&format!(
                "  1. [CAUTION] No highly selective anchor found. Best is '{}' ({rows} rows).\n",
                best.property_label
            ));
        }

        for c in constraints {
            if c.estimated_rows == RowEstimate::Unbounded {
                advice.push_str(&format!(
                    "  - WARNING: '{}' is too expensive or timed out. Apply as late as possible.\n",
                    c.property_label
                ));
            } else if c.estimated_rows.rows() >= INEFFICIENT_FILTER_ROWS {
                advice.push_str(&format!(
                    "  - NOTE: '{}' has {} results. Inefficient as a filter.\n",
                    c.property_label,
                    c.estimated_rows.rows()
                ));
            }
        }

        let relaxable: Vec<String> = constraints
            .iter()
            .filter(|c| c.softness > RELAXABLE_SOFTNESS)
            .map(|c| format!("{} ({})", c.id, c.property_label))
            .collect();
        if !relaxable.is_empty() {
            advice.push_str(&format!(
                "  - Relaxation candidates (soft constraints): {}.\n",
                relaxable.join(", ")
            ));
        }

        advice
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Constraint, Operator};

    fn probed(id: &str, label: &str, estimate: RowEstimate) -> Constraint {
        let mut c = Constraint::new(id, "P31", label, Operator::Eq, "Q11424");
        c.estimated_rows = estimate;
        c
    }

    #[test]
    fn small_anchor_is_strong() {
        let advice = Critic::evaluate(&[probed("c1", "director", RowEstimate::Exact(8))]);
        assert!(advice.contains("[STRONG ANCHOR]"));
        assert!(advice.contains("only 8 results"));
    }

    #[test]
    fn unprobed_everything_is_caution() {
        let advice = Critic::evaluate(&[probed("c1", "instance of", RowEstimate::Unbounded)]);
        assert!(advice.contains("[CAUTION]"));
        assert!(advice.contains("WARNING: 'instance of'"));
    }

    #[test]
    fn soft_constraints_are_listed_as_relaxable() {
        let mut soft = probed("c2", "publication date", RowEstimate::Exact(500));
        soft.softness = 0.8;
        let hard = probed("c1", "director", RowEstimate::Exact(8));
        let advice = Critic::evaluate(&[hard, soft]);
        assert!(advice.contains("Relaxation candidates"));
        assert!(advice.contains("c2 (publication date)"));
    }

    #[test]
    fn empty_constraint_list_does_not_panic() {
        let advice = Critic::evaluate(&[]);
        assert!(advice.contains("no constraints"));
    }
}
