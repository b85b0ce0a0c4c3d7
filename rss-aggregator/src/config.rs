//! Settings for one run, loaded once and passed down explicitly.

use crate::types::{AggregatorError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides `delivery.smtp_password`.
pub const SMTP_PASSWORD_ENV: &str = "EPISTLE_SMTP_PASSWORD";

pub const DEFAULT_CONFIG_PATH: &str = "configs/settings.json";

/// Which entry body goes into the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleMode {
    /// Prefer the entry summary, fall back to its content.
    #[default]
    Summary,
    /// Download each linked page and extract the article text. When that
    /// fails the entry content is used, then its summary.
    Full,
}

/// Identity policy for entries that carry no id of their own.
///
/// `LinkOrHash` uses the entry link when it is unique within the fetch and a
/// SHA-256 of feed identifier, title and link otherwise. `Hash` always uses
/// the SHA-256 form. Switching policies changes the fallback guids, so
/// entries without ids would be delivered once more.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuidFallback {
    #[default]
    LinkOrHash,
    Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub connect_timeout_seconds: u64,
    pub max_feed_size_mb: usize,
    pub max_redirects: usize,
    pub concurrent: bool,
    /// Per-article budget for page downloads in `full` mode.
    pub article_timeout_seconds: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "Epistle/0.1 (RSS to EPUB)".to_string(),
            timeout_seconds: 30,
            connect_timeout_seconds: 10,
            max_feed_size_mb: 10,
            max_redirects: 5,
            concurrent: false,
            article_timeout_seconds: 20,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn article_timeout(&self) -> Duration {
        Duration::from_secs(self.article_timeout_seconds)
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub smtp_server: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub from_address: Option<String>,
    pub target_email: String,
    /// Set to false only for a local relay without TLS.
    pub smtp_starttls: bool,
    pub timeout_seconds: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            smtp_server: String::new(),
            smtp_port: 587,
            smtp_username: String::new(),
            smtp_password: String::new(),
            from_address: None,
            target_email: String::new(),
            smtp_starttls: true,
            timeout_seconds: 60,
        }
    }
}

// Hand-written so the password never reaches logs.
impl fmt::Debug for DeliveryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let password = if self.smtp_password.is_empty() { "" } else { "<redacted>" };
        f.debug_struct("DeliveryConfig")
            .field("smtp_server", &self.smtp_server)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_username", &self.smtp_username)
            .field("smtp_password", &password)
            .field("from_address", &self.from_address)
            .field("target_email", &self.target_email)
            .field("smtp_starttls", &self.smtp_starttls)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

impl DeliveryConfig {
    pub fn sender(&self) -> &str {
        self.from_address.as_deref().unwrap_or(&self.smtp_username)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub run_label: String,
    pub language: String,
    pub author: String,
    pub article_mode: ArticleMode,
    pub guid_fallback: GuidFallback,
    pub feeds_path: PathBuf,
    pub ledger_path: PathBuf,
    pub output_dir: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub fetch: FetchConfig,
    pub delivery: Option<DeliveryConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            run_label: "Epistle".to_string(),
            language: "en".to_string(),
            author: "Epistle".to_string(),
            article_mode: ArticleMode::default(),
            guid_fallback: GuidFallback::default(),
            feeds_path: PathBuf::from("configs/feeds.json"),
            ledger_path: PathBuf::from("state/ledger.db"),
            output_dir: PathBuf::from("newspapers"),
            log_dir: None,
            fetch: FetchConfig::default(),
            delivery: None,
        }
    }
}

impl AppConfig {
    /// Read the settings file, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AggregatorError::Config(format!("cannot read settings file {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_json(&raw)?;

        if let Ok(password) = std::env::var(SMTP_PASSWORD_ENV) {
            if let Some(delivery) = config.delivery.as_mut() {
                delivery.smtp_password = password;
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| AggregatorError::Config(format!("invalid settings file: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.run_label.trim().is_empty() {
            return Err(AggregatorError::Config("run_label must not be empty".to_string()));
        }
        if self.fetch.timeout_seconds == 0 {
            return Err(AggregatorError::Config("fetch.timeout_seconds must be positive".to_string()));
        }
        if self.fetch.article_timeout_seconds == 0 {
            return Err(AggregatorError::Config(
                "fetch.article_timeout_seconds must be positive".to_string(),
            ));
        }
        if let Some(delivery) = &self.delivery {
            if delivery.smtp_server.trim().is_empty() {
                return Err(AggregatorError::Config("delivery.smtp_server must not be empty".to_string()));
            }
            if delivery.target_email.trim().is_empty() {
                return Err(AggregatorError::Config("delivery.target_email must not be empty".to_string()));
            }
            if delivery.timeout_seconds == 0 {
                return Err(AggregatorError::Config("delivery.timeout_seconds must be positive".to_string()));
            }
        }
        Ok(())
    }
}
