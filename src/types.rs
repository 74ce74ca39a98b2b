use serde::Deserialize;

// ── Constraint operators ──────────────────────────────────────────────────────

/// Comparison operator of an atomic constraint.
/// `Ignore` marks a constraint that has been relaxed into a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Gt,
    Lt,
    Ge,
    Le,
    Contains,
    Ignore,
}

impl Operator {
    /// Parse the parser front-end's wire spelling.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "=" | "==" => Some(Self::Eq),
            ">" => Some(Self::Gt),
            "<" => Some(Self::Lt),
            ">=" => Some(Self::Ge),
            "<=" => Some(Self::Le),
            "contains" => Some(Self::Contains),
            "IGNORE" => Some(Self::Ignore),
            _ => None,
        }
    }

    /// SPARQL-compatible spelling (also used in prompts and traces).
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Contains => "contains",
            Self::Ignore => "IGNORE",
        }
    }

    /// True for the strict range operators that magnitude alignment and
    /// numeric relaxation apply to.
    pub fn is_strict_range(&self) -> bool {
        matches!(self, Self::Gt | Self::Lt)
    }
}

// ── Planner metadata ──────────────────────────────────────────────────────────

/// Probed cardinality of a constraint.
/// `Unbounded` covers both "hit the probe limit" and "timed out / failed":
/// either way the constraint is useless as an anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowEstimate {
    Unprobed,
    Exact(u64),
    Unbounded,
}

/// Sentinel row count shown for unprobed/unbounded constraints, matching the
/// ceiling used in advice text.
pub const UNBOUNDED_ROWS: u64 = 999_999_999;

impl RowEstimate {
    /// Row count used for advice text and threshold checks.
    pub fn rows(&self) -> u64 {
        match self {
            Self::Unprobed | Self::Unbounded => UNBOUNDED_ROWS,
            Self::Exact(n) => *n,
        }
    }

}

// ── Constraint ────────────────────────────────────────────────────────────────

/// One atomic `(property, operator, value)` filter of a question.
///
/// Created by the parser boundary, mutated only by the planner (metadata) and
/// by Relax (operator/value), retained for the whole question.
#[derive(Debug, Clone)]
pub struct Constraint {
    pub id: String,
    /// Opaque KG property code (`P…`), linked from the label when absent.
    pub property_code: String,
    pub property_label: String,
    pub operator: Operator,
    pub value: String,
    /// Unit token attached to numeric values; cleared by the normalizer.
    pub unit: Option<String>,
    /// 0 = hard constraint, 1 = fully relaxable.
    pub softness: f64,
    pub estimated_rows: RowEstimate,
    pub priority_score: f64,
    /// How many times Relax has widened this constraint numerically.
    pub numeric_relaxations: u32,
}

impl Constraint {
    pub fn new(
        id: impl Into<String>,
        property_code: impl Into<String>,
        property_label: impl Into<String>,
        operator: Operator,
        value: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            property_code: property_code.into(),
            property_label: property_label.into(),
            operator,
            value: value.into(),
            unit: None,
            softness: 0.0,
            estimated_rows: RowEstimate::Unprobed,
            priority_score: 0.0,
            numeric_relaxations: 0,
        }
    }

    /// One-line rendering for prompts, advice and the action trace.
    pub fn describe(&self) -> String {
        format!(
            "{}: {} {} {}",
            self.id,
            self.property_label,
            self.operator.symbol(),
            self.value
        )
    }
}

// ── Parser wire format ────────────────────────────────────────────────────────

/// One question as emitted by the NL parsing front-end.
#[derive(Debug, Clone, Deserialize)]
pub struct QuestionRecord {
    pub question: String,
    pub constraints: Vec<ConstraintRecord>,
}

/// Raw constraint record before linking and validation.
/// `property_code` may be absent; the label is then linked against the KG.
#[derive(Debug, Clone, Deserialize)]
pub struct ConstraintRecord {
    pub id: String,
    pub property_label: String,
    #[serde(default)]
    pub property_code: Option<String>,
    pub operator: String,
    pub value: String,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub softness: Option<f64>,
}

impl ConstraintRecord {
    /// Validate the record into a `Constraint`, given an already-linked
    /// property code. Returns `None` (with a warning) for records the engine
    /// cannot use; dropping a constraint is never fatal.
    pub fn into_constraint(self, property_code: String) -> Option<Constraint> {
        let Some(operator) = Operator::parse(&self.operator) else {
            tracing::warn!(
                id = %self.id,
                operator = %self.operator,
                "dropping constraint with unknown operator"
            );
            return None;
        };
        if self.value.trim().is_empty() {
            tracing::warn!(id = %self.id, "dropping constraint with empty value");
            return None;
        }
        let mut c = Constraint::new(
            self.id,
            property_code,
            self.property_label,
            operator,
            self.value,
        );
        c.unit = self.unit;
        c.softness = self.softness.unwrap_or(0.0).clamp(0.0, 1.0);
        Some(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_parse_covers_wire_spellings() {
        assert_eq!(Operator::parse("="), Some(Operator::Eq));
        assert_eq!(Operator::parse(">="), Some(Operator::Ge));
        assert_eq!(Operator::parse("IGNORE"), Some(Operator::Ignore));
        assert_eq!(Operator::parse("between"), None);
    }

    #[test]
    fn record_with_bad_operator_is_dropped() {
        let rec = ConstraintRecord {
            id: "c1".into(),
            property_label: "genre".into(),
            property_code: Some("P136".into()),
            operator: "~".into(),
            value: "Q188473".into(),
            unit: None,
            softness: None,
        };
        assert!(rec.into_constraint("P136".into()).is_none());
    }

    #[test]
    fn record_softness_is_clamped() {
        let rec = ConstraintRecord {
            id: "c2".into(),
            property_label: "duration".into(),
            property_code: None,
            operator: "<".into(),
            value: "7200".into(),
            unit: None,
            softness: Some(3.0),
        };
        let c = rec.into_constraint("P2047".into()).expect("valid record");
        assert_eq!(c.softness, 1.0);
        assert_eq!(c.estimated_rows, RowEstimate::Unprobed);
    }
}
