use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub server: ServerConfig,

    pub auth: AuthConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub mail: MailConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub database_path: String,

    pub log_level: String,

    /// Event bus buffer size (default: 100)
    pub event_bus_buffer_size: usize,

    /// Number of tokio worker threads (default: 2)
    /// Set to 0 to use the number of CPU cores
    pub worker_threads: usize,

    /// Maximum database connections (default: 5)
    pub max_db_connections: u32,

    /// Minimum database connections (default: 1)
    pub min_db_connections: u32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            database_path: "sqlite:data/u4i.db".to_string(),
            log_level: "info".to_string(),
            event_bus_buffer_size: 100,
            worker_threads: 2,
            max_db_connections: 5,
            min_db_connections: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,

    /// Absolute URL prefix used when building links embedded in emails.
    pub base_url: String,

    pub cors_allowed_origins: Vec<String>,

    /// Whether to set the Secure flag on session cookies.
    /// Default: true for production safety. Set to false for local development without HTTPS.
    pub secure_cookies: bool,

    /// Session inactivity lifetime in minutes.
    pub session_lifetime_minutes: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 6789,
            base_url: "http://localhost:6789".to_string(),
            cors_allowed_origins: vec![
                "http://localhost:6789".to_string(),
                "http://127.0.0.1:6789".to_string(),
            ],
            secure_cookies: true,
            session_lifetime_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Token signing key. Overridden by the U4I_SECRET_KEY environment variable.
    pub secret_key: String,

    pub min_username_length: usize,

    pub max_username_length: usize,

    pub min_password_length: usize,

    pub max_password_length: usize,

    /// Cap on validation emails per user per hour.
    pub max_email_attempts_in_hour: i32,

    /// Inter-send gap for validation emails (seconds).
    pub wait_to_retry_before_max_attempts: i64,

    /// Cool-down after hitting the cap (seconds); also the validation-token TTL.
    pub wait_to_attempt_after_max_attempts: i64,

    /// Cap on reset emails per rolling window.
    pub password_reset_attempts: i32,

    /// Reset inter-send gap (seconds).
    pub wait_to_retry_forgot_password_min: i64,

    /// Reset window size (seconds); also the reset-token TTL.
    pub wait_to_retry_forgot_password_max: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_key: "change-me".to_string(),
            min_username_length: 3,
            max_username_length: 20,
            min_password_length: 12,
            max_password_length: 64,
            max_email_attempts_in_hour: 5,
            wait_to_retry_before_max_attempts: 60,
            wait_to_attempt_after_max_attempts: 3600,
            password_reset_attempts: 5,
            wait_to_retry_forgot_password_min: 60,
            wait_to_retry_forgot_password_max: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Argon2 memory cost in KiB (default: 8192 = 8MB)
    /// Lower values reduce memory usage but decrease GPU resistance.
    pub argon2_memory_cost_kib: u32,

    /// Argon2 time cost (iterations) - higher = more CPU work
    pub argon2_time_cost: u32,

    /// Argon2 parallelism (default: 1)
    pub argon2_parallelism: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            argon2_memory_cost_kib: 8192,
            argon2_time_cost: 3,
            argon2_parallelism: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    /// When false, emails are logged instead of delivered (dev/test).
    pub enabled: bool,

    pub api_key: String,

    pub api_secret: String,

    pub sender_email: String,

    pub sender_name: String,

    /// Request timeout in seconds (default: 10)
    pub request_timeout_seconds: u64,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            api_secret: String::new(),
            sender_email: "noreply@urls4irl.app".to_string(),
            sender_name: "URLS4IRL".to_string(),
            request_timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            security: SecurityConfig::default(),
            mail: MailConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let paths = Self::config_paths();

        let mut config = None;
        for path in &paths {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                config = Some(Self::load_from_path(path)?);
                break;
            }
        }

        let mut config = config.unwrap_or_else(|| {
            info!("No config file found, using defaults");
            Self::default()
        });

        if let Ok(secret) = std::env::var("U4I_SECRET_KEY")
            && !secret.is_empty()
        {
            config.auth.secret_key = secret;
        }

        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Config saved to: {}", path.display());
        Ok(())
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![];

        paths.push(PathBuf::from("config.toml"));

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("u4i").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".u4i").join("config.toml"));
        }

        paths
    }

    fn default_config_path() -> PathBuf {
        PathBuf::from("config.toml")
    }

    pub fn create_default_if_missing() -> Result<bool> {
        let path = Self::default_config_path();
        if path.exists() {
            Ok(false)
        } else {
            let config = Self::default();
            config.save_to_path(&path)?;
            info!("Created default config file: {}", path.display());
            Ok(true)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.auth.min_username_length > self.auth.max_username_length {
            anyhow::bail!("Minimum username length cannot exceed the maximum");
        }

        if self.auth.min_password_length > self.auth.max_password_length {
            anyhow::bail!("Minimum password length cannot exceed the maximum");
        }

        if self.mail.enabled && (self.mail.api_key.is_empty() || self.mail.api_secret.is_empty()) {
            anyhow::bail!("Mailjet credentials must be set when mail is enabled");
        }

        if self.mail.enabled && self.auth.secret_key == "change-me" {
            anyhow::bail!("The default secret key cannot be used outside local development");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.auth.max_email_attempts_in_hour, 5);
        assert_eq!(config.auth.wait_to_retry_before_max_attempts, 60);
        assert_eq!(config.auth.wait_to_attempt_after_max_attempts, 3600);
        assert_eq!(config.server.session_lifetime_minutes, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[auth]"));
        assert!(toml_str.contains("[mail]"));
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [general]
            log_level = "debug"

            [auth]
            min_password_length = 8
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.auth.min_password_length, 8);

        assert_eq!(config.auth.max_username_length, 20);
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let mut config = Config::default();
        config.auth.min_password_length = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_mail_credentials() {
        let mut config = Config::default();
        config.mail.enabled = true;
        config.auth.secret_key = "a-real-secret".to_string();
        assert!(config.validate().is_err());

        config.mail.api_key = "key".to_string();
        config.mail.api_secret = "secret".to_string();
        assert!(config.validate().is_ok());
    }
}
