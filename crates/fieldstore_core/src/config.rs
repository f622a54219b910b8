//! Runtime configuration for the field store.
//!
//! # Responsibility
//! - Hold every tunable of the store in one serde-friendly value.
//! - Validate settings that end up inside SQL text or drive retries.
//!
//! # Invariants
//! - Every field has a default, so `{}` is a valid configuration.
//! - `read_table_hint` is either `ORIGINAL`/empty or limited to
//!   `[A-Za-z0-9_ ()]`, so it cannot inject statements.

use crate::db::{IdentifierQuoting, SqlDialect, ORIGINAL_READ_HINT};
use crate::logging::LoggingConfig;
use crate::model::field::TemplateId;
use crate::model::item::LANGUAGE_TEMPLATE_ID;
use crate::service::retry::{Backoff, RetryPolicy};
use crate::sharing::DefaultSharingRegistry;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

static READ_HINT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_ ()]+$").expect("valid read hint regex"));

/// Configuration loading/validation errors.
#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid config json: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Store-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Table hint appended to maintenance and event queue reads.
    /// `ORIGINAL` means no hint.
    pub read_table_hint: String,
    pub identifier_quoting: IdentifierQuoting,
    pub busy_timeout_ms: u64,
    pub retry: RetryPolicy,
    /// Template whose items are language definitions.
    pub language_template_id: TemplateId,
    /// Fallback sharing for fields saved without a resolvable definition.
    pub default_sharing: DefaultSharingRegistry,
    pub logging: LoggingConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            read_table_hint: ORIGINAL_READ_HINT.to_string(),
            identifier_quoting: IdentifierQuoting::default(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            retry: RetryPolicy::default(),
            language_template_id: LANGUAGE_TEMPLATE_ID,
            default_sharing: DefaultSharingRegistry::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Parses and validates a JSON configuration document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: StoreConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let hint = self.read_table_hint.trim();
        if !hint.is_empty()
            && !hint.eq_ignore_ascii_case(ORIGINAL_READ_HINT)
            && !READ_HINT_RE.is_match(hint)
        {
            return Err(ConfigError::Invalid(format!(
                "read_table_hint `{hint}` may only contain letters, digits, `_`, spaces and parentheses"
            )));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if let Backoff::Exponential { base_ms, max_ms } = self.retry.backoff {
            if base_ms > max_ms {
                return Err(ConfigError::Invalid(format!(
                    "retry.backoff.base_ms ({base_ms}) exceeds max_ms ({max_ms})"
                )));
            }
        }

        self.logging.validate().map_err(ConfigError::Invalid)?;
        Ok(())
    }

    /// Builds the SQL dialect shared by repositories of this store.
    pub fn dialect(&self) -> SqlDialect {
        SqlDialect::new(self.identifier_quoting, self.read_table_hint.as_str())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}
