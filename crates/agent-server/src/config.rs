//! Server Configuration

use std::path::PathBuf;
use std::time::Duration;

use agent_core::OrchestratorConfig;

/// Settings read from the environment at startup
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: String,

    /// Root for conversations, projects, blobs and images
    pub data_dir: PathBuf,

    pub round_timeout: Duration,

    pub max_iterations: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".into(),
            data_dir: PathBuf::from("./data"),
            round_timeout: Duration::from_secs(180),
            max_iterations: 12,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            data_dir: std::env::var("DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            round_timeout: env_parse("ROUND_TIMEOUT_SECS")
                .map_or(defaults.round_timeout, Duration::from_secs),
            max_iterations: env_parse("MAX_ITERATIONS").unwrap_or(defaults.max_iterations),
        }
    }

    /// Orchestrator settings for the studio assistant
    pub fn orchestrator_config(&self, model: &str) -> OrchestratorConfig {
        let mut config = OrchestratorConfig {
            system_prompt: card_studio::STUDIO_ASSISTANT_PROMPT.into(),
            max_iterations: self.max_iterations,
            round_timeout: self.round_timeout,
            ..Default::default()
        };
        config.generation.model = model.to_string();
        config
    }

    pub fn conversations_dir(&self) -> PathBuf {
        self.data_dir.join("conversations")
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.data_dir.join("projects")
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }

    pub fn images_dir(&self) -> PathBuf {
        self.data_dir.join("images")
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(key, value = %raw, "Ignoring unparsable setting");
                None
            }
        },
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orchestrator_config_uses_studio_prompt() {
        let config = ServerConfig {
            max_iterations: 4,
            ..Default::default()
        };
        let orchestrator = config.orchestrator_config("gemini-2.5-pro");
        assert_eq!(orchestrator.max_iterations, 4);
        assert_eq!(orchestrator.generation.model, "gemini-2.5-pro");
        assert!(orchestrator.system_prompt.contains("generate_card_image"));
        assert!(config.blobs_dir().ends_with("blobs"));
    }
}
