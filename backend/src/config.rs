use std::path::PathBuf;
use std::time::Duration;

use crate::poller::PollConfig;

pub const DEFAULT_TRACES_INDEX: &str = "otel-v1-apm-span-*";
pub const DEFAULT_RUN_ID_FIELD: &str = "span.attributes.gen_ai@agent@run_id";

/// Connection details for an OpenSearch cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSearchConfig {
    /// Base URL without trailing slash
    pub endpoint: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl OpenSearchConfig {
    fn from_env(prefix: &str) -> anyhow::Result<Option<Self>> {
        let Some(endpoint) = env_opt(&format!("{prefix}_ENDPOINT")) else {
            return Ok(None);
        };
        Ok(Some(Self {
            endpoint: validate_endpoint(&format!("{prefix}_ENDPOINT"), &endpoint)?,
            username: env_opt(&format!("{prefix}_USERNAME")),
            password: env_opt(&format!("{prefix}_PASSWORD")),
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub cluster: OpenSearchConfig,
    pub index_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservabilityConfig {
    pub cluster: OpenSearchConfig,
    pub traces_index: String,
    /// Span document field holding the agent run id
    pub run_id_field: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Agent/model catalog file. Searched upward from the working directory when unset.
    pub catalog_path: Option<PathBuf>,
    /// Result storage cluster; in-memory storage when unset.
    pub storage: Option<StorageConfig>,
    /// Trace store; trace polling and metrics are disabled when unset.
    pub observability: Option<ObservabilityConfig>,
    pub trace_poll: PollConfig,
    /// External judge service; the built-in rubric judge is used when unset.
    pub judge_endpoint: Option<String>,
    pub agent_timeout: Duration,
    pub cors_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4001,
            catalog_path: None,
            storage: None,
            observability: None,
            trace_poll: PollConfig::default(),
            judge_endpoint: None,
            agent_timeout: Duration::from_secs(300),
            cors_origins: vec![
                "http://localhost:4000".to_string(),
                "http://127.0.0.1:4000".to_string(),
            ],
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let storage = OpenSearchConfig::from_env("OPENSEARCH_STORAGE")?.map(|cluster| StorageConfig {
            cluster,
            index_prefix: env_str("OPENSEARCH_STORAGE_INDEX_PREFIX", "evals"),
        });

        let observability =
            OpenSearchConfig::from_env("OPENSEARCH_LOGS")?.map(|cluster| ObservabilityConfig {
                cluster,
                traces_index: env_str("OPENSEARCH_LOGS_TRACES_INDEX", DEFAULT_TRACES_INDEX),
                run_id_field: env_str("OPENSEARCH_LOGS_RUN_ID_FIELD", DEFAULT_RUN_ID_FIELD),
            });

        let judge_endpoint = match env_opt("JUDGE_ENDPOINT") {
            Some(raw) => Some(validate_endpoint("JUDGE_ENDPOINT", &raw)?),
            None => None,
        };

        let max_attempts: u32 = env_parse("TRACE_POLL_MAX_ATTEMPTS", defaults.trace_poll.max_attempts)?;
        if max_attempts == 0 {
            anyhow::bail!("TRACE_POLL_MAX_ATTEMPTS must be at least 1");
        }

        Ok(Self {
            host: env_str("AGENT_HEALTH_HOST", &defaults.host),
            port: env_parse("AGENT_HEALTH_PORT", defaults.port)?,
            catalog_path: env_opt("AGENT_HEALTH_CONFIG_PATH").map(PathBuf::from),
            storage,
            observability,
            trace_poll: PollConfig {
                interval: Duration::from_millis(env_parse(
                    "TRACE_POLL_INTERVAL_MS",
                    defaults.trace_poll.interval.as_millis() as u64,
                )?),
                max_attempts,
            },
            judge_endpoint,
            agent_timeout: Duration::from_secs(env_parse(
                "AGENT_TIMEOUT_SECS",
                defaults.agent_timeout.as_secs(),
            )?),
            cors_origins: env_csv(
                "CORS_ORIGINS",
                &["http://localhost:4000", "http://127.0.0.1:4000"],
            ),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Reject endpoints that are not absolute http(s) URLs; strips a trailing slash.
pub fn validate_endpoint(key: &str, raw: &str) -> anyhow::Result<String> {
    let parsed = url::Url::parse(raw.trim())
        .map_err(|e| anyhow::anyhow!("Invalid {key} '{raw}': {e}"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(raw.trim().trim_end_matches('/').to_string()),
        other => Err(anyhow::anyhow!(
            "Invalid {key} '{raw}': unsupported scheme '{other}'"
        )),
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_str(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match env_opt(key) {
        Some(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        None => Ok(default),
    }
}

fn env_csv(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect(),
        Err(_) => default.iter().map(|s| (*s).to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_endpoint_strips_trailing_slash() {
        let endpoint = validate_endpoint("X", "https://search.local:9200/").unwrap();
        assert_eq!(endpoint, "https://search.local:9200");
    }

    #[test]
    fn test_validate_endpoint_rejects_garbage() {
        assert!(validate_endpoint("X", "not a url").is_err());
        assert!(validate_endpoint("X", "ftp://search.local").is_err());
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:4001");
        assert_eq!(config.trace_poll.interval, Duration::from_secs(30));
        assert_eq!(config.trace_poll.max_attempts, 20);
        assert!(config.storage.is_none());
        assert!(config.observability.is_none());
    }
}
