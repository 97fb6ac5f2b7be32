use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

const TOKEN_PATH: &str = "data/.api_token";

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Base of the download links handed out on upload
    #[serde(default)]
    pub public_url: Option<String>,
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    /// Days without a download before a file is evicted
    #[serde(default = "default_retention_days")]
    pub days: u64,
    #[serde(default = "default_sweep_interval_hours")]
    pub sweep_interval_hours: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthConfig {
    /// Shared bearer token for uploads and stats
    #[serde(default)]
    pub token: String,
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_max_upload_mb() -> u64 {
    1024
}

fn default_storage_path() -> String {
    "data/uploads".to_string()
}

fn default_retention_days() -> u64 {
    30
}

fn default_sweep_interval_hours() -> u64 {
    24
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: None,
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            days: default_retention_days(),
            sweep_interval_hours: default_sweep_interval_hours(),
        }
    }
}

impl ServerConfig {
    /// Base URL for download links, without a trailing slash
    pub fn public_url(&self) -> String {
        match &self.public_url {
            Some(url) if !url.trim().is_empty() => url.trim().trim_end_matches('/').to_string(),
            _ => format!("http://localhost:{}", self.port),
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        usize::try_from(self.max_upload_mb.saturating_mul(1024 * 1024)).unwrap_or(usize::MAX)
    }
}

impl RetentionConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.days.saturating_mul(24 * 60 * 60))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_hours.saturating_mul(60 * 60))
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| env::var(key).ok());
        config.ensure_retention_defaults();
        config.ensure_directories()?;
        config.ensure_auth_token(Path::new(TOKEN_PATH))?;
        tracing::info!(
            "Retention: {} days, sweep every {} hours",
            config.retention.days,
            config.retention.sweep_interval_hours
        );
        Ok(config)
    }

    /// Ensure a bearer token exists. An unset token is read back from
    /// `token_path`, or generated and persisted there on first start.
    fn ensure_auth_token(&mut self, token_path: &Path) -> anyhow::Result<()> {
        if !self.auth.token.trim().is_empty() {
            return Ok(());
        }

        if token_path.exists() {
            let token = fs::read_to_string(token_path)?;
            self.auth.token = token.trim().to_string();
            tracing::info!("Loaded persisted API token from {}", token_path.display());
        }

        if self.auth.token.is_empty() {
            let token = uuid::Uuid::new_v4().to_string();
            if let Some(parent) = token_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(token_path, &token)?;
            self.auth.token = token;
            tracing::info!("Generated and persisted new API token to {}", token_path.display());
        }
        Ok(())
    }

    /// Load configuration from filedrop.toml or config.toml
    fn load_from_file() -> anyhow::Result<Self> {
        let config_paths = [
            "filedrop.toml",
            "config.toml",
            "data/filedrop.toml",
            "data/config.toml",
        ];

        for path in config_paths {
            if Path::new(path).exists() {
                let content = fs::read_to_string(path)?;
                let config: Config = toml::from_str(&content)?;
                tracing::info!("Loaded configuration from {}", path);
                return Ok(config);
            }
        }

        tracing::info!("No configuration file found, using defaults");
        Ok(Config::default())
    }

    /// Apply overrides looked up by variable name
    /// Format: FD_CONF_<SECTION>_<KEY>. Unparsable numbers are ignored.
    fn apply_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server overrides
        if let Some(val) = var("FD_CONF_SERVER_HOST") {
            self.server.host = val;
        }
        if let Some(port) = var("FD_CONF_SERVER_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(val) = var("FD_CONF_SERVER_PUBLIC_URL") {
            self.server.public_url = Some(val);
        }
        if let Some(mb) = var("FD_CONF_SERVER_MAX_UPLOAD_MB").and_then(|v| v.parse().ok()) {
            self.server.max_upload_mb = mb;
        }

        // Storage overrides
        if let Some(val) = var("FD_CONF_STORAGE_PATH") {
            self.storage.path = val;
        }

        // Retention overrides
        if let Some(days) = var("FD_CONF_RETENTION_DAYS").and_then(|v| v.parse().ok()) {
            self.retention.days = days;
        }
        if let Some(hours) = var("FD_CONF_RETENTION_SWEEP_INTERVAL_HOURS").and_then(|v| v.parse().ok()) {
            self.retention.sweep_interval_hours = hours;
        }

        // Auth overrides
        if let Some(val) = var("FD_CONF_AUTH_TOKEN") {
            self.auth.token = val;
        }
    }

    /// Zero would evict everything on every sweep, or spin the sweeper
    fn ensure_retention_defaults(&mut self) {
        if self.retention.days == 0 {
            tracing::warn!("retention.days must be positive, using default");
            self.retention.days = default_retention_days();
        }
        if self.retention.sweep_interval_hours == 0 {
            tracing::warn!("retention.sweep_interval_hours must be positive, using default");
            self.retention.sweep_interval_hours = default_sweep_interval_hours();
        }
    }

    /// Ensure required directories exist
    fn ensure_directories(&self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.storage.path)?;
        Ok(())
    }
}
