//! Configuration loaded from `reportflow.toml`.
//!
//! Every field has a default; a missing file means "all defaults". Secrets
//! read from the environment take precedence over the file, so they never
//! have to be committed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "reportflow.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportflowConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub cdn: CdnConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Start listening for orders as soon as the server is up.
    #[serde(default)]
    pub autostart: bool,
}

/// Remote text files holding the short-lived credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub token_url: String,
    #[serde(default)]
    pub cookie_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Project URL, e.g. `https://<project>.supabase.co`.
    #[serde(default)]
    pub base_url: String,
    /// Publishable API key sent as the `apikey` header. `STORAGE_API_KEY` wins.
    #[serde(default)]
    pub api_key: String,
    /// Namespace for uploads; also sent as `uid` to the analysis service.
    #[serde(default)]
    pub workflow_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_analysis_url")]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdnConfig {
    #[serde(default = "default_cdn_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub cloud_name: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default = "default_cdn_folder")]
    pub folder: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Base delay in milliseconds for reconnect backoff.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound for a single reconnect delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Reconnects attempted before the listener gives up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    /// Page-removal executable, invoked with qpdf's argument syntax.
    #[serde(default = "default_page_tool")]
    pub page_tool: PathBuf,
    /// Scratch directory for downloads; the system temp dir when unset.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

fn default_port() -> u16 {
    3000
}

fn default_analysis_url() -> String {
    "https://ryne.ai/api/deep-check".to_string()
}

fn default_cdn_base_url() -> String {
    "https://api.cloudinary.com/v1_1".to_string()
}

fn default_cdn_folder() -> String {
    "homework_reports".to_string()
}

fn default_poll_interval_secs() -> u64 {
    60
}

// Six minutes.
fn default_max_wait_secs() -> u64 {
    360
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    10
}

fn default_page_tool() -> PathBuf {
    PathBuf::from("qpdf")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            autostart: false,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            url: default_analysis_url(),
        }
    }
}

impl Default for CdnConfig {
    fn default() -> Self {
        Self {
            base_url: default_cdn_base_url(),
            cloud_name: String::new(),
            api_key: String::new(),
            api_secret: String::new(),
            folder: default_cdn_folder(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval_secs(),
            max_wait_secs: default_max_wait_secs(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            page_tool: default_page_tool(),
            temp_dir: None,
        }
    }
}

impl ArtifactsConfig {
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl ReportflowConfig {
    /// Loads `path` if it exists, defaults otherwise, then applies the
    /// environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<ReportflowConfig>(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let overrides: [(&str, &mut String); 4] = [
            ("STORAGE_API_KEY", &mut self.storage.api_key),
            ("CLOUDINARY_CLOUD_NAME", &mut self.cdn.cloud_name),
            ("CLOUDINARY_API_KEY", &mut self.cdn.api_key),
            ("CLOUDINARY_API_SECRET", &mut self.cdn.api_secret),
        ];
        for (name, field) in overrides {
            if let Some(value) = lookup(name)
                && !value.is_empty()
            {
                *field = value;
            }
        }
    }

    /// Checks that everything the pipeline talks to has been configured.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("credentials.token_url", &self.credentials.token_url),
            ("credentials.cookie_url", &self.credentials.cookie_url),
            ("storage.base_url", &self.storage.base_url),
            ("storage.api_key", &self.storage.api_key),
            ("storage.workflow_id", &self.storage.workflow_id),
            ("analysis.url", &self.analysis.url),
            ("cdn.cloud_name", &self.cdn.cloud_name),
            ("cdn.api_key", &self.cdn.api_key),
            ("cdn.api_secret", &self.cdn.api_secret),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            bail!("missing configuration: {}", missing.join(", "));
        }
        if self.polling.interval_secs == 0 {
            bail!("polling.interval_secs must be greater than zero");
        }
        Ok(())
    }

    /// Copy safe to print: secrets replaced by a marker.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for secret in [
            &mut copy.storage.api_key,
            &mut copy.cdn.api_key,
            &mut copy.cdn.api_secret,
        ] {
            if !secret.is_empty() {
                *secret = "<redacted>".to_string();
            }
        }
        copy
    }
}
