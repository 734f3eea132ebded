//! Process configuration from the environment (and `.env`, if present)

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use thiserror::Error;

const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";
const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_PORT: u16 = 8000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Configuration for the chat model endpoint
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub system_prompt: Option<String>,
}

impl LlmConfig {
    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            base_url: "http://localhost:9/v1/".to_string(),
            api_key: "test-key".to_string(),
            model: "test-model".to_string(),
            temperature: Some(DEFAULT_TEMPERATURE),
            max_tokens: None,
            system_prompt: None,
        }
    }
}

/// Top-level application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub listen_addr: SocketAddr,
    pub llm: LlmConfig,
}

impl AppConfig {
    /// Load from the process environment, reading `.env` first
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "Loaded .env");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let db_path = var("THREADCHAT_DB_PATH").map_or_else(
            || {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".threadchat").join("chatbot.db")
            },
            PathBuf::from,
        );

        let port = match var("THREADCHAT_PORT") {
            Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
                var: "THREADCHAT_PORT",
                value,
            })?,
            None => DEFAULT_PORT,
        };

        let ip = match var("THREADCHAT_BIND") {
            Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
                var: "THREADCHAT_BIND",
                value,
            })?,
            None => IpAddr::V4(Ipv4Addr::LOCALHOST),
        };

        let temperature = match var("LLM_TEMPERATURE") {
            Some(value) => Some(value.trim().parse::<f32>().map_err(|_| ConfigError::Invalid {
                var: "LLM_TEMPERATURE",
                value,
            })?),
            None => Some(DEFAULT_TEMPERATURE),
        };

        let max_tokens = match var("LLM_MAX_TOKENS") {
            Some(value) => Some(value.trim().parse::<u32>().map_err(|_| ConfigError::Invalid {
                var: "LLM_MAX_TOKENS",
                value,
            })?),
            None => None,
        };

        let llm = LlmConfig {
            base_url: var("LLM_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key: var("GROQ_API_KEY")
                .or_else(|| var("LLM_API_KEY"))
                .or_else(|| var("OPENAI_API_KEY"))
                .unwrap_or_default(),
            model: var("LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            temperature,
            max_tokens,
            system_prompt: var("LLM_SYSTEM_PROMPT"),
        };

        Ok(Self {
            db_path,
            listen_addr: SocketAddr::new(ip, port),
            llm,
        })
    }
}
