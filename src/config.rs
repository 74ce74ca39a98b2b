use std::{env, fs, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

const DEFAULT_SPARQL_ENDPOINT: &str = "https://query.wikidata.org/sparql";
const DEFAULT_SEARCH_ENDPOINT: &str = "https://www.wikidata.org/w/api.php";
const CONFIG_FILE: &str = "cgot.toml";

/// Engine configuration.
///
/// Resolution order: built-in defaults, then `cgot.toml` (if present), then
/// `CGOT_*` environment variables. Validation failures here are fatal; the
/// engine refuses to start rather than run half-configured.
#[derive(Debug, Clone)]
pub struct Config {
    /// Sent with every KG request. Wikidata requires an identifying value.
    pub user_agent: String,
    pub cache_path: PathBuf,
    pub sparql_endpoint: String,
    pub search_endpoint: String,
    /// Upper bound on reasoning-loop steps.
    pub max_agent_steps: usize,
    /// `L` of the planner's `LIMIT L+1` probes.
    pub probe_limit: u64,
    pub probe_timeout: Duration,
    /// Concurrent probe fan-out during planning.
    pub probe_fanout: usize,
    pub gateway_max_retries: u32,
    pub gateway_initial_backoff: Duration,
    /// Pause after each successful uncached query; politeness to the public
    /// endpoint. Zero disables.
    pub courtesy_delay: Duration,
    /// Optional per-question wall-clock budget.
    pub question_deadline: Option<Duration>,
    /// Numeric relaxations allowed per constraint before Relax degrades it
    /// to IGNORE.
    pub max_relaxations: u32,
}

/// Optional on-disk overrides, all fields optional.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    user_agent: Option<String>,
    cache_path: Option<String>,
    sparql_endpoint: Option<String>,
    search_endpoint: Option<String>,
    max_agent_steps: Option<usize>,
    probe_limit: Option<u64>,
    probe_timeout_seconds: Option<f64>,
    probe_fanout: Option<usize>,
    gateway_max_retries: Option<u32>,
    gateway_initial_backoff_seconds: Option<f64>,
    courtesy_delay_seconds: Option<f64>,
    question_deadline_seconds: Option<f64>,
    max_relaxations_per_constraint: Option<u32>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let file = match fs::read_to_string(CONFIG_FILE) {
            Ok(text) => {
                toml::from_str::<FileConfig>(&text).context("cgot.toml is not valid TOML")?
            }
            Err(_) => FileConfig::default(),
        };

        let user_agent = env::var("CGOT_USER_AGENT")
            .ok()
            .or(file.user_agent)
            .unwrap_or_default();
        let cache_path = env::var("CGOT_CACHE_PATH")
            .ok()
            .or(file.cache_path)
            .unwrap_or_else(|| "wikidata_cache.json".to_string());

        let config = Self {
            user_agent,
            cache_path: PathBuf::from(cache_path),
            sparql_endpoint: env::var("CGOT_SPARQL_ENDPOINT")
                .ok()
                .or(file.sparql_endpoint)
                .unwrap_or_else(|| DEFAULT_SPARQL_ENDPOINT.to_string()),
            search_endpoint: env::var("CGOT_SEARCH_ENDPOINT")
                .ok()
                .or(file.search_endpoint)
                .unwrap_or_else(|| DEFAULT_SEARCH_ENDPOINT.to_string()),
            max_agent_steps: env_parse("CGOT_MAX_AGENT_STEPS")
                .or(file.max_agent_steps)
                .unwrap_or(15),
            probe_limit: env_parse("CGOT_PROBE_LIMIT")
                .or(file.probe_limit)
                .unwrap_or(1000),
            probe_timeout: secs(
                env_parse("CGOT_PROBE_TIMEOUT_SECONDS")
                    .or(file.probe_timeout_seconds)
                    .unwrap_or(2.0),
            ),
            probe_fanout: env_parse("CGOT_PROBE_FANOUT")
                .or(file.probe_fanout)
                .unwrap_or(4),
            gateway_max_retries: env_parse("CGOT_GATEWAY_MAX_RETRIES")
                .or(file.gateway_max_retries)
                .unwrap_or(5),
            gateway_initial_backoff: secs(
                env_parse("CGOT_GATEWAY_INITIAL_BACKOFF_SECONDS")
                    .or(file.gateway_initial_backoff_seconds)
                    .unwrap_or(1.0),
            ),
            courtesy_delay: secs(
                env_parse("CGOT_COURTESY_DELAY_SECONDS")
                    .or(file.courtesy_delay_seconds)
                    .unwrap_or(0.5),
            ),
            question_deadline: env_parse("CGOT_QUESTION_DEADLINE_SECONDS")
                .or(file.question_deadline_seconds)
                .map(secs),
            max_relaxations: env_parse("CGOT_MAX_RELAXATIONS")
                .or(file.max_relaxations_per_constraint)
                .unwrap_or(3),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.user_agent.trim().is_empty() {
            bail!(
                "no user agent configured; set CGOT_USER_AGENT (the KG requires an identifying user agent)"
            );
        }
        if self.max_agent_steps == 0 {
            bail!("max_agent_steps must be at least 1");
        }
        if self.probe_fanout == 0 {
            bail!("probe_fanout must be at least 1");
        }
        if self.gateway_max_retries < 3 {
            bail!("gateway_max_retries must be at least 3");
        }
        if let Some(parent) = self.cache_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).with_context(|| {
                format!("cache path {} is not usable", self.cache_path.display())
            })?;
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn secs(v: f64) -> Duration {
    Duration::from_secs_f64(v.max(0.0))
}
