use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// System message sent with every decision request.
const ORACLE_SYSTEM_PROMPT: &str = "\
You are the control oracle of a knowledge-graph reasoning engine.
Every reply must be a single JSON object with keys \"reasoning\", \"action\", \"params\".
Never add prose, markdown, or code fences around the JSON.";

// ── Oracle seam ───────────────────────────────────────────────────────────────

/// External language-model oracle for control decisions: one request per
/// agent step, raw text back. Parsing and guarding live in the agent.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn decide(&self, prompt: &str) -> Result<String>;
}

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    temperature: f32,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
}

#[derive(Deserialize)]
struct ApiChoiceMessage {
    content: Option<String>,
}

// ── HTTP implementation ───────────────────────────────────────────────────────

/// Chat-completions backed oracle. Any OpenAI-compatible endpoint works;
/// the default points at the GLM coding endpoint.
pub struct HttpOracle {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpOracle {
    pub fn from_env() -> Result<Self> {
        const DEFAULT_BASE_URL: &str = "https://open.bigmodel.cn/api/paas/v4";
        const DEFAULT_MODEL: &str = "glm-4-plus";

        let base_url =
            std::env::var("CGOT_ORACLE_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let api_key =
            std::env::var("CGOT_ORACLE_API_KEY").context("CGOT_ORACLE_API_KEY env var not set")?;
        let model =
            std::env::var("CGOT_ORACLE_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        let mut builder = reqwest::Client::builder();
        if let Ok(proxy_url) = std::env::var("HTTP_PROXY") {
            builder = builder.proxy(reqwest::Proxy::all(&proxy_url)?);
        }
        if let Ok(ms) = std::env::var("API_TIMEOUT_MS")
            && let Ok(ms) = ms.parse::<u64>()
        {
            builder = builder
                .timeout(std::time::Duration::from_millis(ms))
                .connect_timeout(std::time::Duration::from_secs(10));
        }

        Ok(Self {
            client: builder.build()?,
            base_url,
            api_key,
            model,
        })
    }
}

#[async_trait]
impl Oracle for HttpOracle {
    async fn decide(&self, prompt: &str) -> Result<String> {
        let body = ApiRequest {
            model: self.model.clone(),
            messages: vec![
                ApiMessage {
                    role: "system",
                    content: ORACLE_SYSTEM_PROMPT.to_string(),
                },
                ApiMessage {
                    role: "user",
                    content: prompt.to_string(),
                },
            ],
            max_tokens: Some(2048),
            temperature: 0.0,
        };

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .context("oracle HTTP request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("oracle API error {status}: {text}"));
        }

        let parsed: ApiResponse = resp
            .json()
            .await
            .context("failed to parse oracle API response")?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if text.is_empty() {
            return Err(anyhow!("oracle returned empty content"));
        }
        Ok(text)
    }
}
