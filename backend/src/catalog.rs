//! Agent and model catalog loaded from TOML.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use shared_types::{AgentConfig, ModelConfig};

pub const DEFAULT_CATALOG_PATH: &str = "backend/config/agent-health.toml";
const BUILTIN_CATALOG_TOML: &str = include_str!("../config/agent-health.example.toml");

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct AgentCatalog {
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

impl AgentCatalog {
    pub fn agent(&self, key: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|agent| agent.key == key)
    }

    pub fn model(&self, id: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|model| model.id == id)
    }

    /// Pricing lookup used by trace metrics. Span model names often carry a
    /// provider prefix or version suffix, so fall back to a substring match.
    pub fn pricing_for(&self, model_name: &str) -> Option<&ModelConfig> {
        self.model(model_name).or_else(|| {
            self.models
                .iter()
                .find(|model| model_name.contains(&model.id))
        })
    }

    pub fn built_in() -> Self {
        toml::from_str(BUILTIN_CATALOG_TOML).unwrap_or_else(|err| {
            tracing::error!(error = %err, "Failed to parse built-in agent catalog");
            AgentCatalog::default()
        })
    }
}

/// Load the catalog from `explicit_path`, or the default path searched upward
/// from the working directory. Falls back to the built-in catalog.
pub fn load_catalog(explicit_path: Option<&Path>) -> AgentCatalog {
    let path = explicit_path
        .map(Path::to_path_buf)
        .or_else(|| find_default_config_path(DEFAULT_CATALOG_PATH))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CATALOG_PATH));

    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "Failed to load agent catalog file; using built-in defaults"
            );
            return AgentCatalog::built_in();
        }
    };
    match toml::from_str(&content) {
        Ok(catalog) => {
            tracing::info!(path = %path.display(), "Loaded agent catalog");
            catalog
        }
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "Failed to parse agent catalog TOML; using built-in defaults"
            );
            AgentCatalog::built_in()
        }
    }
}

fn find_default_config_path(relative_path: &str) -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;
    loop {
        let candidate = current.join(relative_path);
        if candidate.exists() && candidate.is_file() {
            return Some(candidate);
        }
        if !current.pop() {
            break;
        }
    }
    None
}
