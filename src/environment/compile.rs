use anyhow::Result;
use regex::Regex;

use crate::graph::CandidateSet;
use crate::types::{Constraint, Operator};

// ── Value classification ──────────────────────────────────────────────────────

/// What kind of literal a constraint value is. Classification drives which
/// SPARQL fragment shape gets emitted; precedence is entity code > year >
/// full date > number > free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueClass {
    EntityCode,
    Year,
    FullDate,
    Number,
    Text,
}

pub struct ValuePatterns {
    entity_code: Regex,
    year: Regex,
    full_date: Regex,
}

impl ValuePatterns {
    pub fn new() -> Result<Self> {
        Ok(Self {
            entity_code: Regex::new(r"^Q\d+$")?,
            year: Regex::new(r"^\d{4}$")?,
            full_date: Regex::new(r"^\d{4}-\d{2}-\d{2}")?,
        })
    }

    pub fn classify(&self, value: &str) -> ValueClass {
        let value = value.trim();
        if self.entity_code.is_match(value) {
            ValueClass::EntityCode
        } else if self.year.is_match(value) {
            ValueClass::Year
        } else if self.full_date.is_match(value) {
            ValueClass::FullDate
        } else if value.parse::<f64>().is_ok() {
            ValueClass::Number
        } else {
            ValueClass::Text
        }
    }
}

/// Year extraction only makes sense on date-valued properties; anything else
/// named "2020" is just a number.
pub fn is_date_like_label(label: &str) -> bool {
    let label = label.to_lowercase();
    label.contains("date") || label.contains("publication")
}

pub fn escape_literal(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

/// `'2020-06-01'` -> `'2020-06-01T00:00:00Z'^^xsd:dateTime`.
pub fn date_literal(value: &str) -> String {
    let iso = if value.contains('T') {
        value.to_string()
    } else {
        format!("{value}T00:00:00Z")
    };
    format!("'{iso}'^^xsd:dateTime")
}

fn values_clause(candidates: &CandidateSet) -> String {
    let members = candidates
        .iter()
        .map(|qid| format!("wd:{qid}"))
        .collect::<Vec<_>>()
        .join(" ");
    format!("VALUES ?item {{ {members} }}")
}

// ── Anchor compilation ────────────────────────────────────────────────────────

/// Compile the seed query for a constraint applied on its own.
pub fn anchor_query(c: &Constraint, patterns: &ValuePatterns, limit: u64) -> String {
    let pid = &c.property_code;
    let op = c.operator.symbol();
    let where_clause = match patterns.classify(&c.value) {
        ValueClass::EntityCode => format!("?item wdt:{pid} wd:{} .", c.value),
        ValueClass::Year if is_date_like_label(&c.property_label) => format!(
            "?item wdt:{pid} ?v .\n  FILTER(YEAR(?v) {op} {})",
            c.value
        ),
        ValueClass::Year => format!("?item wdt:{pid} ?v .\n  FILTER(?v {op} {})", c.value),
        ValueClass::FullDate => format!(
            "?item wdt:{pid} ?v .\n  FILTER(?v {op} {})",
            date_literal(&c.value)
        ),
        ValueClass::Number => format!("?item wdt:{pid} ?v .\n  FILTER(?v {op} {})", c.value),
        ValueClass::Text => {
            // Resolve the target entity and compare its English label.
            let value = escape_literal(&c.value);
            let comparison = if c.operator == Operator::Contains {
                format!("CONTAINS(LCASE(STR(?targetLabel)), LCASE('{value}'))")
            } else {
                format!("LCASE(STR(?targetLabel)) = LCASE('{value}')")
            };
            format!(
                "?item wdt:{pid} ?target .\n  ?target rdfs:label ?targetLabel .\n  FILTER({comparison}) .\n  FILTER(LANG(?targetLabel) = \"en\") ."
            )
        }
    };
    format!("SELECT DISTINCT ?item WHERE {{\n  {where_clause}\n}}\nLIMIT {limit}")
}

// ── Filter compilation ────────────────────────────────────────────────────────

/// Compile the query that keeps the members of `parents` satisfying `c`.
pub fn filter_query(parents: &CandidateSet, c: &Constraint, patterns: &ValuePatterns) -> String {
    let pid = &c.property_code;
    let op = c.operator.symbol();
    let values = values_clause(parents);

    let (triple, filter_clause) = match patterns.classify(&c.value) {
        ValueClass::EntityCode => {
            // Subclass closure: the stored value may be a narrower class than
            // the one the user named ("horror film" vs "film").
            let triple = format!(
                "?item wdt:{pid} ?actual_val .\n  ?actual_val wdt:P279* wd:{} .",
                c.value
            );
            (triple, String::new())
        }
        ValueClass::Year if is_date_like_label(&c.property_label) => (
            format!("?item wdt:{pid} ?val ."),
            format!("FILTER(YEAR(?val) {op} {})", c.value),
        ),
        ValueClass::Year | ValueClass::Number => (
            format!("?item wdt:{pid} ?val ."),
            format!("FILTER(?val {op} {})", c.value),
        ),
        ValueClass::FullDate => (
            format!("?item wdt:{pid} ?val ."),
            format!("FILTER(?val {op} {})", date_literal(&c.value)),
        ),
        ValueClass::Text => {
            let value = escape_literal(&c.value);
            let clause = if c.operator == Operator::Contains {
                format!("FILTER(CONTAINS(LCASE(?val), LCASE('{value}')))")
            } else {
                format!("FILTER(?val = '{value}')")
            };
            (format!("?item wdt:{pid} ?val ."), clause)
        }
    };

    format!("SELECT DISTINCT ?item WHERE {{\n  {values}\n  {triple}\n  {filter_clause}\n}}")
}

/// Compile the sampling query magnitude alignment uses to see what the KG
/// actually stores for a property across some of the parent candidates.
pub fn sample_values_query(parents: &CandidateSet, property_code: &str, sample_limit: usize) -> String {
    let members = parents
        .iter()
        .take(20)
        .map(|qid| format!("wd:{qid}"))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "SELECT ?v WHERE {{\n  VALUES ?item {{ {members} }}\n  ?item wdt:{property_code} ?v .\n  FILTER(isNumeric(?v))\n}} LIMIT {sample_limit}"
    )
}
