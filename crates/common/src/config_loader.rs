//! Configuration loader
//!
//! Priority order, lowest first:
//! 1. Defaults
//! 2. TOML file (explicit path, or the first `genai.toml` on the search path)
//! 3. Environment variables prefixed with `GENAI_` (`.env` is honored)
//!
//! The merged result is validated before it is returned.

use crate::config_base::OrchestratorSettings;
use crate::errors::{ConfigError, ConfigResult};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

const CONFIG_FILE_NAME: &str = "genai.toml";

pub struct ConfigurationLoader {
    search_paths: Vec<PathBuf>,
    env_prefix: String,
    load_dotenv: bool,
}

impl Default for ConfigurationLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigurationLoader {
    pub fn new() -> Self {
        let mut search_paths = Vec::new();

        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("genai"));
        }
        search_paths.push(PathBuf::from("."));

        Self {
            search_paths,
            env_prefix: "GENAI".to_string(),
            load_dotenv: true,
        }
    }

    /// Loader that only looks where it is told to, for tests and embedding
    pub fn isolated() -> Self {
        Self {
            search_paths: Vec::new(),
            env_prefix: "GENAI".to_string(),
            load_dotenv: false,
        }
    }

    pub fn add_search_path<P: AsRef<Path>>(&mut self, path: P) -> &mut Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    pub fn env_prefix<S: Into<String>>(&mut self, prefix: S) -> &mut Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Load using the search path
    pub fn load(&self) -> ConfigResult<OrchestratorSettings> {
        let file = self.find_configuration_file();
        self.load_layers(file.as_deref())
    }

    /// Load with an explicit file; a missing file is an error here
    pub fn load_from(&self, path: impl AsRef<Path>) -> ConfigResult<OrchestratorSettings> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                file_path: path.display().to_string(),
            });
        }
        self.load_layers(Some(path))
    }

    fn load_layers(&self, file: Option<&Path>) -> ConfigResult<OrchestratorSettings> {
        if self.load_dotenv {
            dotenv::dotenv().ok();
        }

        let mut settings = match file {
            Some(path) => {
                info!(path = %path.display(), "Loading orchestrator configuration");
                Self::parse_file(path)?
            }
            None => {
                debug!("No configuration file found, using defaults");
                OrchestratorSettings::default()
            }
        };

        self.apply_environment_variables(&mut settings)?;
        settings.validate()?;

        Ok(settings)
    }

    fn parse_file(path: &Path) -> ConfigResult<OrchestratorSettings> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::ParsingFailed {
            format: "toml".to_string(),
            reason: format!("cannot read {}: {}", path.display(), e),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParsingFailed {
            format: "toml".to_string(),
            reason: e.to_string(),
        })
    }

    fn find_configuration_file(&self) -> Option<PathBuf> {
        self.search_paths
            .iter()
            .map(|dir| dir.join(CONFIG_FILE_NAME))
            .find(|candidate| candidate.is_file())
    }

    fn apply_environment_variables(&self, settings: &mut OrchestratorSettings) -> ConfigResult<()> {
        if let Some(v) = self.env_value("RETRY_MAX_ATTEMPTS")? {
            settings.retry.max_attempts = v;
        }
        if let Some(v) = self.env_value("RETRY_INITIAL_DELAY_MS")? {
            settings.retry.initial_delay_ms = v;
        }
        if let Some(v) = self.env_value("RETRY_MAX_DELAY_MS")? {
            settings.retry.max_delay_ms = v;
        }
        if let Some(v) = self.env_value("RETRY_BACKOFF_MULTIPLIER")? {
            settings.retry.backoff_multiplier = v;
        }
        if let Some(v) = self.env_value("RETRY_MAX_JITTER_MS")? {
            settings.retry.max_jitter_ms = v;
        }
        if let Some(v) = self.env_value("CIRCUIT_FAILURE_THRESHOLD")? {
            settings.circuit_breaker.failure_threshold = v;
        }
        if let Some(v) = self.env_value("CIRCUIT_RECOVERY_TIMEOUT_MS")? {
            settings.circuit_breaker.recovery_timeout_ms = v;
        }
        if let Some(v) = self.env_value("CACHE_IMAGE_CAPACITY")? {
            settings.cache.image_capacity = v;
        }
        if let Some(v) = self.env_value("CACHE_TEXT_CAPACITY")? {
            settings.cache.text_capacity = v;
        }
        if let Some(v) = self.env_value("CACHE_IMAGE_QUALITY")? {
            settings.cache.image_quality = v;
        }
        if let Some(v) = self.env_value("CACHE_ADAPT_TO_DEVICE")? {
            settings.cache.adapt_to_device = v;
        }
        if let Some(v) = self.env_value::<usize>("SCHEDULER_MAX_CONCURRENT")? {
            settings.scheduler.max_concurrent_tasks = Some(v);
        }
        if let Some(v) = self.env_value("TELEMETRY_RECENT_CAPACITY")? {
            settings.telemetry.recent_metrics_capacity = v;
        }
        if let Some(v) = self.env_value("TELEMETRY_FRAME_DROP_THRESHOLD_MS")? {
            settings.telemetry.frame_drop_threshold_ms = v;
        }

        Ok(())
    }

    fn env_value<T: FromStr>(&self, suffix: &str) -> ConfigResult<Option<T>>
    where
        T::Err: std::fmt::Display,
    {
        let var_name = format!("{}_{}", self.env_prefix, suffix);
        match env::var(&var_name) {
            Ok(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| ConfigError::EnvVarError {
                    var_name,
                    reason: e.to_string(),
                }),
            Err(_) => Ok(None),
        }
    }
}
