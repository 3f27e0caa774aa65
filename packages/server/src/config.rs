use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub worker_count: usize,
    pub stream_poll_interval: Duration,
    pub artifact_dir: PathBuf,
    pub cors_allowed_origins: Vec<String>,
    pub llm_api_key: String,
    pub llm_base_url: String,
    pub llm_model: String,
    pub fetch_timeout: Duration,
    pub stage_timeout: Duration,
    /// Overrides every stage's retry budget when set
    pub stage_max_retries: Option<u32>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            worker_count: env::var("WORKER_COUNT")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .context("WORKER_COUNT must be a valid number")?,
            stream_poll_interval: Duration::from_millis(
                env::var("STREAM_POLL_INTERVAL_MS")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse()
                    .context("STREAM_POLL_INTERVAL_MS must be a valid number")?,
            ),
            artifact_dir: env::var("ARTIFACT_DIR")
                .unwrap_or_else(|_| "artifacts".to_string())
                .into(),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .map(|s| parse_list(&s))
                .unwrap_or_default(),
            llm_api_key: env::var("LLM_API_KEY").context("LLM_API_KEY must be set")?,
            llm_base_url: env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.groq.com/openai/v1".to_string()),
            llm_model: env::var("LLM_MODEL")
                .unwrap_or_else(|_| crate::kernel::DEFAULT_LLM_MODEL.to_string()),
            fetch_timeout: Duration::from_secs(
                env::var("FETCH_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .context("FETCH_TIMEOUT_SECS must be a valid number")?,
            ),
            stage_timeout: Duration::from_secs(
                env::var("STAGE_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "180".to_string())
                    .parse()
                    .context("STAGE_TIMEOUT_SECS must be a valid number")?,
            ),
            stage_max_retries: env::var("STAGE_MAX_RETRIES")
                .ok()
                .map(|s| s.parse())
                .transpose()
                .context("STAGE_MAX_RETRIES must be a valid number")?,
        })
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
