use std::{collections::HashMap, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::time::{sleep, timeout};

use crate::config::Config;
use crate::kg::{BindingRow, GatewayError, KgClient, ProbeOutcome, cache::QueryCache, code_from_uri};

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SparqlResponse {
    results: SparqlResults,
}

#[derive(Deserialize)]
struct SparqlResults {
    bindings: Vec<BindingRow>,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    id: String,
}

/// Per-request failure classification driving the retry loop.
enum RequestFailure {
    /// 429 — honor the server's delay when it names one.
    RateLimited(Option<Duration>),
    /// Transport error or 5xx — worth retrying with backoff.
    Transient(String),
    /// Anything retrying cannot fix.
    Fatal(GatewayError),
}

// ── Gateway ───────────────────────────────────────────────────────────────────

/// Authenticated, retrying, rate-limit-aware, disk-cached access to Wikidata.
pub struct WikidataGateway {
    client: reqwest::Client,
    cache: QueryCache,
    endpoint: String,
    search_endpoint: String,
    user_agent: String,
    max_retries: u32,
    initial_backoff: Duration,
    probe_timeout: Duration,
    courtesy_delay: Duration,
}

impl WikidataGateway {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        let cache = QueryCache::open(&config.cache_path)?;
        Ok(Self {
            client,
            cache,
            endpoint: config.sparql_endpoint.clone(),
            search_endpoint: config.search_endpoint.clone(),
            user_agent: config.user_agent.clone(),
            max_retries: config.gateway_max_retries,
            initial_backoff: config.gateway_initial_backoff,
            probe_timeout: config.probe_timeout,
            courtesy_delay: config.courtesy_delay,
        })
    }

    pub fn flush_cache(&self) {
        if let Err(e) = self.cache.flush() {
            tracing::warn!("cache flush failed: {e}");
        }
    }

    /// One request against the SPARQL endpoint, classified for the retry loop.
    async fn request_once(&self, query: &str) -> Result<Vec<BindingRow>, RequestFailure> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("format", "json"), ("query", query)])
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|e| RequestFailure::Transient(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(RequestFailure::RateLimited(retry_after));
        }
        if status.is_client_error() {
            let message = response.text().await.unwrap_or_default();
            return Err(RequestFailure::Fatal(GatewayError::BadRequest {
                status: status.as_u16(),
                message: truncate(&message, 400),
            }));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RequestFailure::Transient(format!(
                "HTTP {status}: {}",
                truncate(&message, 200)
            )));
        }

        let parsed: SparqlResponse = response.json().await.map_err(|e| {
            RequestFailure::Fatal(GatewayError::BadResponse(format!(
                "cannot parse SPARQL JSON: {e}"
            )))
        })?;
        Ok(parsed.results.bindings)
    }

    async fn execute_with_retries(&self, query: &str) -> Result<Vec<BindingRow>, GatewayError> {
        let mut backoff = self.initial_backoff;
        let mut last_error = String::from("no attempt made");
        for attempt in 1..=self.max_retries {
            match self.request_once(query).await {
                Ok(rows) => return Ok(rows),
                Err(RequestFailure::Fatal(e)) => return Err(e),
                Err(RequestFailure::RateLimited(retry_after)) => {
                    let wait = retry_after.unwrap_or(backoff);
                    tracing::warn!(
                        attempt,
                        wait_secs = wait.as_secs_f64(),
                        "rate limited by KG endpoint, backing off"
                    );
                    last_error = "rate limited (HTTP 429)".to_string();
                    sleep(wait).await;
                    backoff *= 2;
                }
                Err(RequestFailure::Transient(msg)) => {
                    tracing::warn!(attempt, error = %msg, "transient KG failure, retrying");
                    last_error = msg;
                    sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
        Err(GatewayError::Unavailable {
            attempts: self.max_retries,
            last_error,
        })
    }

    /// Single-attempt keyword search against the labels endpoint.
    async fn search_top1(
        &self,
        label: &str,
        entity_type: &str,
        cache_mode: &str,
    ) -> Result<Option<String>, GatewayError> {
        if let Some(hit) = self.cache.get(cache_mode, label) {
            return Ok(hit.as_str().map(str::to_string));
        }

        let mut params = vec![
            ("action", "wbsearchentities"),
            ("format", "json"),
            ("language", "en"),
            ("limit", "1"),
            ("search", label),
        ];
        if entity_type == "property" {
            params.push(("type", "property"));
        }

        let response = self
            .client
            .get(&self.search_endpoint)
            .query(&params)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable {
                attempts: 1,
                last_error: e.to_string(),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::BadRequest {
                status: status.as_u16(),
                message: format!("label search for '{label}' failed"),
            });
        }
        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::BadResponse(format!("cannot parse search JSON: {e}")))?;

        let code = parsed.search.into_iter().next().map(|hit| hit.id);
        let cached = match code.as_deref() {
            Some(c) => json!(c),
            None => json!(null),
        };
        self.cache.put(cache_mode, label, cached);
        Ok(code)
    }
}

#[async_trait]
impl KgClient for WikidataGateway {
    async fn execute(&self, query: &str) -> Result<Vec<BindingRow>, GatewayError> {
        if let Some(hit) = self.cache.get("sparql", query) {
            if let Ok(rows) = serde_json::from_value::<Vec<BindingRow>>(hit) {
                tracing::debug!("cache hit for SPARQL query");
                return Ok(rows);
            }
            // Wrong shape: treat as a discarded corrupt entry and re-fetch.
        }

        let rows = self.execute_with_retries(query).await?;
        if let Ok(value) = serde_json::to_value(&rows) {
            self.cache.put("sparql", query, value);
        }
        if !self.courtesy_delay.is_zero() {
            sleep(self.courtesy_delay).await;
        }
        Ok(rows)
    }

    async fn probe_count(&self, query: &str) -> ProbeOutcome {
        if let Some(hit) = self.cache.get("probe", query)
            && let Some(n) = hit.as_u64()
        {
            return ProbeOutcome::Rows(n);
        }

        // The point of a probe is the time box: one attempt, no retries.
        let outcome = match timeout(self.probe_timeout, self.request_once(query)).await {
            Ok(Ok(rows)) => ProbeOutcome::Rows(rows.len() as u64),
            Ok(Err(_)) => ProbeOutcome::Infeasible,
            Err(_) => ProbeOutcome::Infeasible,
        };
        // Only positive outcomes are worth remembering; an infeasible probe
        // may just have been a slow network moment.
        if let ProbeOutcome::Rows(n) = outcome {
            self.cache.put("probe", query, json!(n));
        }
        outcome
    }

    async fn search_entity(&self, label: &str) -> Result<Option<String>, GatewayError> {
        self.search_top1(label, "item", "entity-search").await
    }

    async fn search_property(&self, label: &str) -> Result<Option<String>, GatewayError> {
        self.search_top1(label, "property", "property-search").await
    }

    async fn resolve_labels(
        &self,
        codes: &[String],
    ) -> Result<HashMap<String, String>, GatewayError> {
        if codes.is_empty() {
            return Ok(HashMap::new());
        }
        let values = codes
            .iter()
            .map(|c| format!("wd:{c}"))
            .collect::<Vec<_>>()
            .join(" ");
        let query = format!(
            "SELECT ?item ?itemLabel WHERE {{\n  VALUES ?item {{ {values} }}\n  SERVICE wikibase:label {{ bd:serviceParam wikibase:language \"en\". }}\n}}"
        );
        let rows = self.execute(&query).await?;
        let mut labels = HashMap::new();
        for row in rows {
            let Some(code) = row
                .get("item")
                .and_then(|v| code_from_uri(&v.value))
                .map(str::to_string)
            else {
                continue;
            };
            if let Some(label) = row.get("itemLabel") {
                labels.insert(code, label.value.clone());
            }
        }
        Ok(labels)
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.chars().take(max_chars).collect()
}
