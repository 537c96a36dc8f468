//! Configuration loading and resolution
//!
//! Two layers, read once at startup:
//! 1. **TOML bootstrap file** located by priority (CLI flag → `CALLFLOW_CONFIG`
//!    → user config dir → `/etc/callflow`), falling back to compiled defaults
//! 2. **Environment overrides** for secrets and deployment-specific values
//!
//! The resulting [`Config`] is immutable. Services wrap it in an `Arc` and pass
//! it explicitly to every component that needs it.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "CALLFLOW_CONFIG";

const DEFAULT_SYSTEM_PROMPT: &str = "You extract structured fields from a phone call \
transcript or a free-text request of a services company customer. Reply with a single \
JSON object with the keys client_name, client_phone, address, scheduled_at, price, \
service_type. Use null for anything that is not stated explicitly. Do not add comments.";

/// Full service configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub webhook: WebhookConfig,
    pub pipeline: PipelineConfig,
    pub provider: ProviderConfig,
    pub ai: AiConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5780,
        }
    }
}

/// Database location
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Inbound webhook access rules
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Shared secret expected in `secret_header`. `None` disables the check.
    pub secret: Option<String>,
    pub secret_header: String,
    /// Internal lines / called numbers this deployment handles. Empty accepts all.
    pub target_lines: Vec<String>,
    pub max_body_bytes: usize,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: None,
            secret_header: "X-Webhook-Secret".to_string(),
            target_lines: Vec::new(),
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Deal synthesis settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Stable identifier of the intake stage, verified at startup
    pub intake_stage_id: String,
    /// Lookback window for "a deal was already created for this number"
    pub dedup_window_secs: u64,
    pub source_tag: String,
    /// How often the recording fetcher re-checks for a call record that has not arrived yet
    pub record_lookup_retries: u32,
    pub record_lookup_delay_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            intake_stage_id: "intake".to_string(),
            dedup_window_secs: 3600,
            source_tag: "telephony".to_string(),
            record_lookup_retries: 3,
            record_lookup_delay_ms: 2000,
        }
    }
}

impl PipelineConfig {
    pub fn dedup_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.dedup_window_secs.min(i64::MAX as u64) as i64)
    }

    pub fn record_lookup_delay(&self) -> Duration {
        Duration::from_millis(self.record_lookup_delay_ms)
    }
}

/// Request signature algorithm used against the telephony provider API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureScheme {
    /// `base64(hex(hmac_sha1(secret, path + query + md5(query))))` in an Authorization header
    #[default]
    HmacSha1,
    /// `md5(query + secret)` appended as a `sign` query parameter
    Md5,
}

/// Telephony provider API access
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub recording_path: String,
    pub app_id: Option<String>,
    pub secret: Option<String>,
    pub signature: SignatureScheme,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.zadarma.com".to_string(),
            recording_path: "/v1/pbx/record/request/".to_string(),
            app_id: None,
            secret: None,
            signature: SignatureScheme::default(),
            timeout_secs: 15,
        }
    }
}

impl ProviderConfig {
    pub fn has_credentials(&self) -> bool {
        is_set(&self.app_id) && is_set(&self.secret)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// AI collaborator (speech-to-text + field extraction)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub transcription_model: String,
    pub temperature: f32,
    pub system_prompt: String,
    pub language: String,
    /// Transcribe recordings automatically once their URL is known
    pub auto_transcribe: bool,
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            transcription_model: "whisper-1".to_string(),
            temperature: 0.1,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            language: "ru".to_string(),
            auto_transcribe: false,
            timeout_secs: 60,
        }
    }
}

impl AiConfig {
    pub fn has_credentials(&self) -> bool {
        is_set(&self.api_key)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn is_set(value: &Option<String>) -> bool {
    value.as_deref().map(|v| !v.trim().is_empty()).unwrap_or(false)
}

impl Config {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Read and parse a TOML config file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Resolve, read and validate configuration
    ///
    /// An explicitly named file (CLI or `CALLFLOW_CONFIG`) must exist. A missing
    /// default-location file is not an error: compiled defaults are used.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let explicit = cli_path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => {
                info!("Loading config from {}", path.display());
                Self::load_from_file(&path)?
            }
            None => match default_config_file() {
                Some(path) => {
                    info!("Loading config from {}", path.display());
                    Self::load_from_file(&path)?
                }
                None => {
                    warn!("No config file found, using compiled defaults");
                    Self::default()
                }
            },
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup` (normally `std::env::var`)
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup("CALLFLOW_WEBHOOK_SECRET") {
            self.webhook.secret = Some(secret);
        }
        if let Some(key) = lookup("CALLFLOW_PROVIDER_KEY") {
            self.provider.app_id = Some(key);
        }
        if let Some(secret) = lookup("CALLFLOW_PROVIDER_SECRET") {
            self.provider.secret = Some(secret);
        }
        if let Some(key) = lookup("CALLFLOW_AI_API_KEY") {
            self.ai.api_key = Some(key);
        }
        if let Some(path) = lookup("CALLFLOW_DATABASE") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(port) = lookup("CALLFLOW_PORT") {
            match port.parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!("Ignoring invalid CALLFLOW_PORT value: {}", port),
            }
        }
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.intake_stage_id.trim().is_empty() {
            return Err(Error::Config("pipeline.intake_stage_id must be set".to_string()));
        }
        if self.pipeline.dedup_window_secs == 0 {
            return Err(Error::Config(
                "pipeline.dedup_window_secs must be greater than zero".to_string(),
            ));
        }
        if self.webhook.secret_header.trim().is_empty() {
            return Err(Error::Config("webhook.secret_header must be set".to_string()));
        }
        Ok(())
    }
}

/// First existing config file in the platform search order
fn default_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("callflow").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(unix) {
        let system_config = PathBuf::from("/etc/callflow/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// OS-dependent default database location
fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("callflow"))
        .unwrap_or_else(|| PathBuf::from("./callflow_data"))
        .join("callflow.db")
}
