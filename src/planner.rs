use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;

use crate::environment::compile::{ValueClass, ValuePatterns, date_literal, escape_literal};
use crate::kg::{KgClient, ProbeOutcome};
use crate::types::{Constraint, Operator, RowEstimate};

/// Orders constraints so the first becomes a good anchor (small, cheap set)
/// and the rest apply as filters, by probing the live KG for per-constraint
/// cardinality.
pub struct CostPlanner {
    kg: Arc<dyn KgClient>,
    patterns: ValuePatterns,
    probe_limit: u64,
    fanout: usize,
}

impl CostPlanner {
    pub fn new(kg: Arc<dyn KgClient>, probe_limit: u64, fanout: usize) -> Result<Self> {
        Ok(Self {
            kg,
            patterns: ValuePatterns::new().context("value patterns failed to compile")?,
            probe_limit,
            fanout: fanout.max(1),
        })
    }

    /// Probe every constraint (bounded fan-out) and return the list sorted by
    /// descending priority. Ties keep input order, so the ordering is
    /// deterministic regardless of probe completion order.
    pub async fn plan(&self, mut constraints: Vec<Constraint>) -> Vec<Constraint> {
        tracing::info!("planner: dynamic probing of {} constraints", constraints.len());

        let semaphore = Arc::new(Semaphore::new(self.fanout));
        let mut handles = Vec::with_capacity(constraints.len());
        for (idx, c) in constraints.iter().enumerate() {
            if c.operator == Operator::Ignore {
                handles.push(None);
                continue;
            }
            let query = self.probe_query(c);
            let kg = Arc::clone(&self.kg);
            let semaphore = Arc::clone(&semaphore);
            handles.push(Some(tokio::spawn(async move {
                // Closed only when the planner itself is dropped mid-plan.
                let _permit = semaphore.acquire_owned().await;
                (idx, kg.probe_count(&query).await)
            })));
        }

        for handle in handles {
            let Some(handle) = handle else {
                continue;
            };
            let Ok((idx, outcome)) = handle.await else {
                continue;
            };
            let c = &mut constraints[idx];
            apply_probe(c, outcome, self.probe_limit);
        }
        for c in &mut constraints {
            if c.operator == Operator::Ignore {
                c.estimated_rows = RowEstimate::Unbounded;
                c.priority_score = 0.0;
            }
        }

        constraints.sort_by(|a, b| {
            b.priority_score
                .partial_cmp(&a.priority_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for c in &constraints {
            tracing::info!(
                id = %c.id,
                rows = c.estimated_rows.rows(),
                score = c.priority_score,
                "planner: {}",
                c.property_label
            );
        }
        constraints
    }

    /// `LIMIT L+1` probe for one constraint. Returning more than `L` rows (or
    /// nothing within the time box) marks the constraint as unusable for
    /// anchoring.
    fn probe_query(&self, c: &Constraint) -> String {
        let pid = &c.property_code;
        let op = c.operator.symbol();
        let mut triple = format!("?item wdt:{pid} ?v .");
        let mut filter_clause = String::new();

        match c.operator {
            Operator::Eq => {
                if self.patterns.classify(&c.value) == ValueClass::EntityCode {
                    triple = format!("?item wdt:{pid} wd:{} .", c.value);
                } else {
                    filter_clause = format!("FILTER(?v = '{}')", escape_literal(&c.value));
                }
            }
            Operator::Gt | Operator::Lt | Operator::Ge | Operator::Le => {
                filter_clause = match self.patterns.classify(&c.value) {
                    ValueClass::Year => format!("FILTER(YEAR(?v) {op} {})", c.value),
                    ValueClass::FullDate => {
                        format!("FILTER(?v {op} {})", date_literal(&c.value))
                    }
                    _ => format!("FILTER(?v {op} {})", c.value),
                };
            }
            Operator::Contains => {
                filter_clause = format!(
                    "FILTER(CONTAINS(LCASE(STR(?v)), LCASE('{}')))",
                    escape_literal(&c.value)
                );
            }
            Operator::Ignore => {}
        }

        format!(
            "SELECT DISTINCT ?item WHERE {{\n  {triple}\n  {filter_clause}\n}}\nLIMIT {}",
            self.probe_limit + 1
        )
    }
}

fn apply_probe(c: &mut Constraint, outcome: ProbeOutcome, probe_limit: u64) {
    match outcome {
        ProbeOutcome::Rows(n) if n <= probe_limit => {
            c.estimated_rows = RowEstimate::Exact(n);
            c.priority_score = priority_score(n);
            tracing::info!(id = %c.id, rows = n, "probe: anchor candidate");
        }
        ProbeOutcome::Rows(_) => {
            c.estimated_rows = RowEstimate::Unbounded;
            c.priority_score = 0.0;
            tracing::info!(id = %c.id, limit = probe_limit, "probe: hit limit");
        }
        ProbeOutcome::Infeasible => {
            // A timed-out probe counts as infinitely expensive: sort it last.
            c.estimated_rows = RowEstimate::Unbounded;
            c.priority_score = 0.0;
            tracing::info!(id = %c.id, "probe: timeout or error");
        }
    }
}

/// Strictly decreasing in `rows`, finite at zero (`+2` keeps the log away
/// from 0 and 1).
pub fn priority_score(rows: u64) -> f64 {
    1.0 / ((rows as f64) + 2.0).log10()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kg::{BindingRow, GatewayError};
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Fake KG whose probe answers depend on which property the query names.
    struct ProbeKg {
        counts: HashMap<String, ProbeOutcome>,
    }

    #[async_trait]
    impl KgClient for ProbeKg {
        async fn execute(&self, _query: &str) -> Result<Vec<BindingRow>, GatewayError> {
            Ok(Vec::new())
        }
        async fn probe_count(&self, query: &str) -> ProbeOutcome {
            for (pid, outcome) in &self.counts {
                if query.contains(&format!("wdt:{pid}")) {
                    return *outcome;
                }
            }
            ProbeOutcome::Infeasible
        }
        async fn search_entity(&self, _label: &str) -> Result<Option<String>, GatewayError> {
            Ok(None)
        }
        async fn search_property(&self, _label: &str) -> Result<Option<String>, GatewayError> {
            Ok(None)
        }
        async fn resolve_labels(
            &self,
            _codes: &[String],
        ) -> Result<HashMap<String, String>, GatewayError> {
            Ok(HashMap::new())
        }
    }

    fn planner_with(counts: &[(&str, ProbeOutcome)]) -> CostPlanner {
        let kg = Arc::new(ProbeKg {
            counts: counts
                .iter()
                .map(|(pid, o)| (pid.to_string(), *o))
                .collect(),
        });
        CostPlanner::new(kg, 1000, 4).expect("planner")
    }

    fn constraints() -> Vec<Constraint> {
        vec![
            Constraint::new("c1", "P1082", "population", Operator::Gt, "1000000"),
            Constraint::new("c2", "P57", "director", Operator::Eq, "Q25191"),
            Constraint::new("c3", "P31", "instance of", Operator::Eq, "Q11424"),
        ]
    }

    #[test]
    fn priority_score_is_strictly_decreasing() {
        let mut prev = f64::INFINITY;
        for rows in [0u64, 1, 5, 50, 500, 1000] {
            let score = priority_score(rows);
            assert!(score < prev, "score must fall as rows grow");
            assert!(score > 0.0);
            prev = score;
        }
    }

    #[tokio::test]
    async fn selective_constraint_becomes_the_anchor() {
        let planner = planner_with(&[
            ("P1082", ProbeOutcome::Infeasible),
            ("P57", ProbeOutcome::Rows(8)),
            ("P31", ProbeOutcome::Rows(900)),
        ]);
        let planned = planner.plan(constraints()).await;
        assert_eq!(planned[0].id, "c2");
        assert_eq!(planned[0].estimated_rows, RowEstimate::Exact(8));
        assert_eq!(planned[2].id, "c1");
        assert_eq!(planned[2].estimated_rows, RowEstimate::Unbounded);
        assert_eq!(planned[2].priority_score, 0.0);
    }

    #[tokio::test]
    async fn probe_over_limit_is_unbounded() {
        let planner = planner_with(&[("P31", ProbeOutcome::Rows(1001))]);
        let planned = planner
            .plan(vec![Constraint::new(
                "c1", "P31", "instance of", Operator::Eq, "Q11424",
            )])
            .await;
        assert_eq!(planned[0].estimated_rows, RowEstimate::Unbounded);
        assert_eq!(planned[0].priority_score, 0.0);
    }

    #[tokio::test]
    async fn ties_keep_input_order() {
        let planner = planner_with(&[
            ("P57", ProbeOutcome::Rows(10)),
            ("P31", ProbeOutcome::Rows(10)),
        ]);
        let input = vec![
            Constraint::new("a", "P57", "director", Operator::Eq, "Q1"),
            Constraint::new("b", "P31", "instance of", Operator::Eq, "Q2"),
        ];
        let planned = planner.plan(input).await;
        assert_eq!(planned[0].id, "a");
        assert_eq!(planned[1].id, "b");
    }

    #[tokio::test]
    async fn plan_of_permutation_matches_plan_of_original() {
        let counts = [
            ("P1082", ProbeOutcome::Rows(700)),
            ("P57", ProbeOutcome::Rows(8)),
            ("P31", ProbeOutcome::Rows(950)),
        ];
        let planner = planner_with(&counts);
        let forward = planner.plan(constraints()).await;
        let mut shuffled = constraints();
        shuffled.reverse();
        let backward = planner_with(&counts).plan(shuffled).await;
        let forward_ids: Vec<&str> = forward.iter().map(|c| c.id.as_str()).collect();
        let backward_ids: Vec<&str> = backward.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(forward_ids, backward_ids);
    }

    #[test]
    fn probe_query_shapes() {
        let planner = planner_with(&[]);
        let qid = Constraint::new("c1", "P57", "director", Operator::Eq, "Q25191");
        assert!(planner.probe_query(&qid).contains("?item wdt:P57 wd:Q25191 ."));
        assert!(planner.probe_query(&qid).contains("LIMIT 1001"));

        let year = Constraint::new("c2", "P577", "publication date", Operator::Gt, "2020");
        assert!(planner.probe_query(&year).contains("FILTER(YEAR(?v) > 2020)"));

        let date = Constraint::new("c3", "P577", "publication date", Operator::Lt, "2020-06-01");
        assert!(
            planner
                .probe_query(&date)
                .contains("'2020-06-01T00:00:00Z'^^xsd:dateTime")
        );

        let text = Constraint::new("c4", "P1476", "title", Operator::Contains, "night");
        assert!(
            planner
                .probe_query(&text)
                .contains("CONTAINS(LCASE(STR(?v)), LCASE('night'))")
        );
    }
}
