pub mod cache;
pub mod error;
pub mod gateway;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use error::GatewayError;

// ── Result rows ───────────────────────────────────────────────────────────────

/// One typed cell of a SPARQL JSON result row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingValue {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub value: String,
}

/// One variable-bindings row, keyed by variable name.
pub type BindingRow = HashMap<String, BindingValue>;

/// Outcome of a time-boxed cardinality probe. A probe that cannot answer
/// within its deadline is not an error; it is a statement about the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Rows(u64),
    Infeasible,
}

// ── Client seam ───────────────────────────────────────────────────────────────

/// Every outbound KG call funnels through this trait. The production
/// implementation is `gateway::WikidataGateway`; tests drive the planner,
/// environment and agent with in-memory fakes.
#[async_trait]
pub trait KgClient: Send + Sync {
    /// Submit a graph query and return its bindings rows.
    async fn execute(&self, query: &str) -> Result<Vec<BindingRow>, GatewayError>;

    /// Run `query` under a short wall-clock timeout and report how many rows
    /// came back. Never retries; timeouts and errors map to `Infeasible`.
    async fn probe_count(&self, query: &str) -> ProbeOutcome;

    /// Keyword-search entity labels, returning the top-1 entity code.
    async fn search_entity(&self, label: &str) -> Result<Option<String>, GatewayError>;

    /// Keyword-search property labels, returning the top-1 property code.
    async fn search_property(&self, label: &str) -> Result<Option<String>, GatewayError>;

    /// Batch label lookup for presentation.
    async fn resolve_labels(
        &self,
        codes: &[String],
    ) -> Result<HashMap<String, String>, GatewayError>;
}

/// Extract the trailing entity/property code from a KG concept URI.
pub fn code_from_uri(uri: &str) -> Option<&str> {
    if !uri.contains("/entity/") && !uri.contains("/prop/") {
        return None;
    }
    uri.rsplit('/').next().filter(|c| !c.is_empty())
}
