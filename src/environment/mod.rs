pub mod align;
pub mod compile;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::graph::CandidateSet;
use crate::kg::{BindingRow, KgClient, code_from_uri};
use crate::types::{Constraint, Operator};
use compile::{ValueClass, ValuePatterns};

/// Row cap on anchor queries; keeps anchor runtime bounded.
const ANCHOR_LIMIT: u64 = 1000;
/// Alignment samples at most this many property values.
const ALIGN_SAMPLE_LIMIT: usize = 10;

/// The query environment: compiles constraints into SPARQL fragments and
/// exposes the four algebraic tools the agent dispatches on.
pub struct GraphEnvironment {
    kg: Arc<dyn KgClient>,
    patterns: ValuePatterns,
    max_relaxations: u32,
}

impl GraphEnvironment {
    pub fn new(kg: Arc<dyn KgClient>, max_relaxations: u32) -> Result<Self> {
        Ok(Self {
            kg,
            patterns: ValuePatterns::new().context("value patterns failed to compile")?,
            max_relaxations,
        })
    }

    // ── Tool 1: Anchor ───────────────────────────────────────────────────────

    /// Seed a candidate set from a single constraint.
    pub async fn search_anchor(&self, c: &Constraint) -> Result<CandidateSet> {
        if c.operator == Operator::Ignore {
            tracing::warn!(id = %c.id, "anchor requested on an IGNORE constraint");
            return Ok(CandidateSet::new());
        }
        tracing::info!(
            id = %c.id,
            "[anchor] searching {} ({}) {} {}",
            c.property_label,
            c.property_code,
            c.operator.symbol(),
            c.value
        );
        let query = compile::anchor_query(c, &self.patterns, ANCHOR_LIMIT);
        let rows = self.kg.execute(&query).await?;
        let candidates = entity_codes(&rows, "item");
        tracing::info!(id = %c.id, "[anchor] found {} candidates", candidates.len());
        Ok(candidates)
    }

    // ── Tool 2: Filter ───────────────────────────────────────────────────────

    /// Keep the members of `parents` that satisfy `c`. An empty result is a
    /// first-class signal (dead end), not an error.
    pub async fn filter(&self, parents: &CandidateSet, c: &Constraint) -> Result<CandidateSet> {
        if c.operator == Operator::Ignore {
            tracing::info!(id = %c.id, "[filter] constraint is IGNORE, passing parents through");
            return Ok(parents.clone());
        }
        if parents.is_empty() {
            return Ok(CandidateSet::new());
        }

        // Rewrites only a per-call copy; the caller's constraint keeps the
        // user's original threshold.
        let aligned = self.align_magnitude(c, parents).await;
        let c = aligned.as_ref().unwrap_or(c);

        tracing::info!(
            id = %c.id,
            "[filter] filtering {} items by {} {} {}",
            parents.len(),
            c.property_label,
            c.operator.symbol(),
            c.value
        );
        let query = compile::filter_query(parents, c, &self.patterns);
        let rows = self.kg.execute(&query).await?;
        let kept: CandidateSet = entity_codes(&rows, "item")
            .into_iter()
            .filter(|qid| parents.contains(qid))
            .collect();
        tracing::info!(id = %c.id, "[filter] {} items remain", kept.len());
        Ok(kept)
    }

    /// Probe what the KG actually stores for this property across the parent
    /// set and rewrite the threshold when the mismatch matches a known
    /// factor. Returns `None` when no rewrite applies.
    async fn align_magnitude(
        &self,
        c: &Constraint,
        parents: &CandidateSet,
    ) -> Option<Constraint> {
        if !c.operator.is_strict_range() {
            return None;
        }
        let user_value: f64 = c.value.parse().ok()?;
        if user_value == 0.0 {
            return None;
        }

        let query = compile::sample_values_query(parents, &c.property_code, ALIGN_SAMPLE_LIMIT);
        let rows = match self.kg.execute(&query).await {
            Ok(rows) => rows,
            Err(e) => {
                // Alignment is best-effort; a failed probe must not sink the filter.
                tracing::warn!(id = %c.id, "[auto-align] sampling failed: {e}");
                return None;
            }
        };
        let samples: Vec<f64> = rows
            .iter()
            .filter_map(|row| row.get("v"))
            .filter_map(|v| v.value.parse::<f64>().ok())
            .collect();
        let median = align::positive_median(&samples)?;
        let (factor, reason) = align::alignment_factor(median, user_value)?;

        let mut aligned = c.clone();
        aligned.value = format_threshold(user_value * factor);
        tracing::warn!(
            id = %c.id,
            "[auto-align] {}: {} -> {} ({reason}, median={median})",
            c.property_label,
            c.value,
            aligned.value
        );
        Some(aligned)
    }

    // ── Tool 3: Intersect ────────────────────────────────────────────────────

    /// Pure set intersection; no I/O.
    pub fn intersect(&self, a: &CandidateSet, b: &CandidateSet) -> CandidateSet {
        let result: CandidateSet = a.intersection(b).cloned().collect();
        tracing::info!(
            "[intersect] merging {} and {} sets -> {} remaining",
            a.len(),
            b.len(),
            result.len()
        );
        result
    }

    // ── Tool 4: Relax ────────────────────────────────────────────────────────

    /// Produce a weakened copy of `c`. The caller decides whether to adopt
    /// it; identity (`id`, property) is always preserved.
    pub fn relax(&self, c: &Constraint) -> Constraint {
        let mut relaxed = c.clone();
        let class = self.patterns.classify(&c.value);

        if c.operator.is_strict_range() && class != ValueClass::EntityCode {
            match c.value.parse::<f64>() {
                Ok(value) if c.numeric_relaxations < self.max_relaxations => {
                    let widened = match c.operator {
                        Operator::Lt => value * 1.5,
                        _ => value * 0.5,
                    };
                    relaxed.value = format_threshold(widened);
                    relaxed.numeric_relaxations += 1;
                    tracing::info!(
                        id = %c.id,
                        "[relax] widened {} threshold {} -> {}",
                        c.operator.symbol(),
                        c.value,
                        relaxed.value
                    );
                }
                Ok(_) => {
                    // Widening has not helped several times; stop paying for it.
                    relaxed.operator = Operator::Ignore;
                    tracing::warn!(id = %c.id, "[relax] relaxation budget spent, now IGNORE");
                }
                Err(_) => {
                    relaxed.operator = Operator::Ignore;
                    tracing::warn!(id = %c.id, "[relax] non-numeric range value, now IGNORE");
                }
            }
        } else if class == ValueClass::EntityCode {
            // Subclass closure already ran and still produced nothing; entity
            // ids are discrete, so the only weaker form is a no-op.
            relaxed.operator = Operator::Ignore;
            tracing::info!(id = %c.id, "[relax] entity constraint degraded to IGNORE");
        } else if c.operator == Operator::Eq {
            relaxed.operator = Operator::Contains;
            tracing::info!(id = %c.id, "[relax] '=' relaxed to 'contains'");
        } else {
            relaxed.operator = Operator::Ignore;
            tracing::info!(id = %c.id, "[relax] no weaker form, now IGNORE");
        }
        relaxed
    }
}

/// Pull entity codes out of a result column, skipping literal bindings.
fn entity_codes(rows: &[BindingRow], var: &str) -> CandidateSet {
    rows.iter()
        .filter_map(|row| row.get(var))
        .filter_map(|v| code_from_uri(&v.value))
        .map(str::to_string)
        .collect()
}

/// Thresholds render without a trailing `.0` so queries stay tidy.
fn format_threshold(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kg::{GatewayError, ProbeOutcome};
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Fake KG that answers every query with a fixed set of item rows.
    struct FixedKg {
        items: Vec<String>,
    }

    fn item_rows(codes: &[&str]) -> Vec<BindingRow> {
        codes
            .iter()
            .map(|code| {
                let mut row = BindingRow::new();
                row.insert(
                    "item".to_string(),
                    crate::kg::BindingValue {
                        kind: "uri".to_string(),
                        value: format!("http://www.wikidata.org/entity/{code}"),
                    },
                );
                row
            })
            .collect()
    }

    #[async_trait]
    impl KgClient for FixedKg {
        async fn execute(&self, _query: &str) -> Result<Vec<BindingRow>, GatewayError> {
            Ok(item_rows(
                &self.items.iter().map(String::as_str).collect::<Vec<_>>(),
            ))
        }
        async fn probe_count(&self, _query: &str) -> ProbeOutcome {
            ProbeOutcome::Rows(self.items.len() as u64)
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

    fn env_with(items: &[&str]) -> GraphEnvironment {
        let kg = Arc::new(FixedKg {
            items: items.iter().map(|s| s.to_string()).collect(),
        });
        GraphEnvironment::new(kg, 3).expect("environment")
    }

    fn set(codes: &[&str]) -> CandidateSet {
        codes.iter().map(|c| c.to_string()).collect()
    }

    #[tokio::test]
    async fn filter_result_is_subset_of_parents() {
        // KG claims Q1, Q2, Q9 match, but Q9 is not in the parent set.
        let env = env_with(&["Q1", "Q2", "Q9"]);
        let c = Constraint::new("c1", "P31", "instance of", Operator::Eq, "Q11424");
        let parents = set(&["Q1", "Q2", "Q3"]);
        let kept = env.filter(&parents, &c).await.expect("filter");
        assert!(kept.is_subset(&parents));
        assert_eq!(kept, set(&["Q1", "Q2"]));
    }

    #[tokio::test]
    async fn filter_ignore_passes_parents_through() {
        let env = env_with(&[]);
        let c = Constraint::new("c1", "P31", "instance of", Operator::Ignore, "Q11424");
        let parents = set(&["Q1", "Q2"]);
        let kept = env.filter(&parents, &c).await.expect("filter");
        assert_eq!(kept, parents);
    }

    #[tokio::test]
    async fn anchor_on_ignore_is_empty() {
        let env = env_with(&["Q1"]);
        let c = Constraint::new("c1", "P161", "cast member", Operator::Ignore, "Q143716");
        let out = env.search_anchor(&c).await.expect("anchor");
        assert!(out.is_empty());
    }

    #[test]
    fn intersect_is_exact_set_intersection() {
        let env = env_with(&[]);
        let a = set(&["Q1", "Q2", "Q3"]);
        let b = set(&["Q2", "Q3", "Q4"]);
        assert_eq!(env.intersect(&a, &b), set(&["Q2", "Q3"]));
    }

    #[test]
    fn relax_lt_widens_by_half_again() {
        let env = env_with(&[]);
        let c = Constraint::new("c1", "P2047", "duration", Operator::Lt, "7200");
        let relaxed = env.relax(&c);
        assert_eq!(relaxed.value, "10800");
        assert_eq!(relaxed.operator, Operator::Lt);
        assert_eq!(relaxed.numeric_relaxations, 1);
    }

    #[test]
    fn relax_entity_becomes_ignore() {
        let env = env_with(&[]);
        let c = Constraint::new("c1", "P136", "genre", Operator::Eq, "Q188473");
        let relaxed = env.relax(&c);
        assert_eq!(relaxed.operator, Operator::Ignore);
        assert_eq!(relaxed.value, "Q188473");
    }

    #[test]
    fn relax_eq_string_becomes_contains() {
        let env = env_with(&[]);
        let c = Constraint::new("c1", "P1476", "title", Operator::Eq, "the dark knight");
        assert_eq!(env.relax(&c).operator, Operator::Contains);
    }

    #[test]
    fn relax_is_idempotent_on_ignore() {
        let env = env_with(&[]);
        let c = Constraint::new("c1", "P136", "genre", Operator::Ignore, "Q188473");
        let once = env.relax(&c);
        let twice = env.relax(&once);
        assert_eq!(once.operator, Operator::Ignore);
        assert_eq!(twice.operator, Operator::Ignore);
        assert_eq!(once.value, twice.value);
    }

    #[test]
    fn relax_numeric_budget_degrades_to_ignore() {
        let env = env_with(&[]);
        let mut c = Constraint::new("c1", "P2047", "duration", Operator::Gt, "100");
        for _ in 0..3 {
            c = env.relax(&c);
            assert_eq!(c.operator, Operator::Gt);
        }
        let exhausted = env.relax(&c);
        assert_eq!(exhausted.operator, Operator::Ignore);
    }
}
