use serde::Deserialize;
use std::env;
use validator::Validate;

use crate::services::block_partitioner::{BlockStructure, STANDARD_BLOCKS};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub bind_addr: String,
    pub upstream_api_url: String,
    pub exam: ExamSettings,
}

/// Exam rules and timing. Every field can be overridden with `APP__EXAM__<FIELD>`.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct ExamSettings {
    #[validate(length(min = 1))]
    pub block_structure: Vec<usize>,
    #[validate(range(min = 1))]
    pub total_duration_secs: u64,
    #[validate(range(min = 1))]
    pub alert_interval_secs: u64,
    pub warning_threshold_secs: u64,
    #[validate(range(min = 10, max = 60000))]
    pub tick_interval_ms: u64,
    pub shuffle_choices: bool,
    #[validate(range(min = 1, max = 10))]
    pub submit_retry_attempts: usize,
    #[validate(length(min = 1))]
    pub fallback_redirect: String,
}

impl Default for ExamSettings {
    fn default() -> Self {
        Self {
            block_structure: STANDARD_BLOCKS.to_vec(),
            total_duration_secs: 2 * 60 * 60,
            alert_interval_secs: 30 * 60,
            warning_threshold_secs: 10 * 60,
            tick_interval_ms: 1000,
            shuffle_choices: true,
            submit_retry_attempts: 1,
            fallback_redirect: "/".to_string(),
        }
    }
}

impl ExamSettings {
    pub fn blocks(&self) -> Result<BlockStructure, config::ConfigError> {
        BlockStructure::new(self.block_structure.clone())
            .map_err(|e| config::ConfigError::Message(format!("exam.block_structure: {}", e)))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8081".to_string(),
            upstream_api_url: "http://localhost:5000".to_string(),
            exam: ExamSettings::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load .env from the repository root first, then the local directory
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        // Determine environment (defaults to dev)
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // Build configuration from config/*.toml + ENV overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", app_env)).required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("exam.block_structure"),
            )
            .build()?;

        let bind_addr = settings
            .get_string("server.bind_addr")
            .or_else(|_| env::var("BIND_ADDR"))
            .unwrap_or_else(|_| "0.0.0.0:8081".to_string());

        let upstream_api_url = settings
            .get_string("upstream.base_url")
            .or_else(|_| env::var("UPSTREAM_API_URL"))
            .unwrap_or_else(|_| {
                eprintln!("WARNING: UPSTREAM_API_URL not set, using http://localhost:5000");
                "http://localhost:5000".to_string()
            });

        let exam = match settings.get::<ExamSettings>("exam") {
            Ok(exam) => exam,
            Err(config::ConfigError::NotFound(_)) => ExamSettings::default(),
            Err(e) => return Err(e),
        };

        let config = Config {
            bind_addr,
            upstream_api_url,
            exam,
        };
        config.validate()?;

        Ok(config)
    }

    /// Checks the values `load` cannot express through serde alone.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        url::Url::parse(&self.upstream_api_url).map_err(|e| {
            config::ConfigError::Message(format!(
                "upstream.base_url '{}' is not a valid URL: {}",
                self.upstream_api_url, e
            ))
        })?;

        Validate::validate(&self.exam)
            .map_err(|e| config::ConfigError::Message(format!("invalid exam settings: {}", e)))?;

        self.exam.blocks()?;
        Ok(())
    }
}
