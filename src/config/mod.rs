use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

use crate::error::AppError;
use crate::identity::IdentityKind;
use crate::progress::ProgressPolicy;

/// Upper bound for `MAX_RETRIES`.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Experiment platform server.
    pub server: ServerConfig,
    /// Durable profile store.
    pub store: StoreConfig,
    /// Log output.
    pub logging: LoggingConfig,
    /// HTTP timeouts and retries.
    pub request: RequestConfig,
    /// Identity and progress behavior.
    pub sync: SyncConfig,
}

/// Experiment platform server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server root every route is joined to.
    pub base_url: String,
    /// Token sent as `X-CSRFToken` with every POST.
    pub csrf_token: String,
}

/// Durable browser-profile store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// SQLite database file.
    pub path: PathBuf,
    /// Pool size.
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default filter directive.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    /// Human-readable lines.
    Pretty,
    /// One JSON object per event.
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    /// Per-request timeout.
    pub timeout_ms: u64,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base delay of the exponential backoff.
    pub retry_delay_ms: u64,
}

/// Identity and progress synchronization behavior
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Identity provisioned on page load.
    pub identity_kind: IdentityKind,
    /// When progress records are created.
    pub progress_policy: ProgressPolicy,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let server = ServerConfig {
            base_url: env::var("EXPE_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            csrf_token: env::var("EXPE_CSRF_TOKEN").map_err(|_| AppError::Config {
                message: "EXPE_CSRF_TOKEN is required".to_string(),
            })?,
        };

        let store = StoreConfig {
            path: PathBuf::from(
                env::var("EXPE_STORE_PATH")
                    .unwrap_or_else(|_| "./data/browser-profile.db".to_string()),
            ),
            max_connections: env::var("EXPE_STORE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1),
        };

        let logging = LoggingConfig::from_env();

        let defaults = RequestConfig::default();
        let max_retries = parse_setting(
            "MAX_RETRIES",
            env::var("MAX_RETRIES").ok(),
            defaults.max_retries,
        );
        if max_retries > MAX_RETRIES_LIMIT {
            warn!(
                requested = max_retries,
                limit = MAX_RETRIES_LIMIT,
                "MAX_RETRIES above limit, clamping"
            );
        }
        let request = RequestConfig {
            timeout_ms: parse_setting(
                "REQUEST_TIMEOUT_MS",
                env::var("REQUEST_TIMEOUT_MS").ok(),
                defaults.timeout_ms,
            ),
            max_retries: max_retries.min(MAX_RETRIES_LIMIT),
            retry_delay_ms: parse_setting(
                "RETRY_DELAY_MS",
                env::var("RETRY_DELAY_MS").ok(),
                defaults.retry_delay_ms,
            ),
        };

        let sync = SyncConfig {
            identity_kind: parse_setting(
                "IDENTITY_KIND",
                env::var("IDENTITY_KIND").ok(),
                IdentityKind::default(),
            ),
            progress_policy: parse_setting(
                "PROGRESS_POLICY",
                env::var("PROGRESS_POLICY").ok(),
                ProgressPolicy::default(),
            ),
        };

        Ok(Config {
            server,
            store,
            logging,
            request,
            sync,
        })
    }
}

impl LoggingConfig {
    /// Read `LOG_LEVEL` and `LOG_FORMAT`.
    ///
    /// Usable before the rest of the configuration so logging is up while
    /// other settings are validated.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Self {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        }
    }
}

/// Parse an optional setting, keeping `default` when it is unset or invalid.
fn parse_setting<T>(name: &str, raw: Option<String>, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse() {
        Ok(value) => value,
        Err(e) => {
            warn!(
                setting = %name,
                value = %raw,
                default = %default,
                error = %e,
                "Invalid setting, using default"
            );
            default
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10000,
            max_retries: 2,
            retry_delay_ms: 250,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            identity_kind: IdentityKind::default(),
            progress_policy: ProgressPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_config_defaults() {
        let config = RequestConfig::default();
        assert_eq!(config.timeout_ms, 10000);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.retry_delay_ms, 250);
    }

    #[test]
    fn test_parse_setting() {
        assert_eq!(parse_setting("MAX_RETRIES", None, 2_u32), 2);
        assert_eq!(parse_setting("MAX_RETRIES", Some(" 5 ".to_string()), 2_u32), 5);
        assert_eq!(parse_setting("MAX_RETRIES", Some("five".to_string()), 2_u32), 2);
        assert_eq!(
            parse_setting(
                "PROGRESS_POLICY",
                Some("merge_misssing".to_string()),
                ProgressPolicy::FirstVisitOnly
            ),
            ProgressPolicy::FirstVisitOnly
        );
        assert_eq!(
            parse_setting("IDENTITY_KIND", Some("user".to_string()), IdentityKind::Participant),
            IdentityKind::User
        );
    }

    #[test]
    fn test_sync_config_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.identity_kind, IdentityKind::Participant);
        assert_eq!(config.progress_policy, ProgressPolicy::FirstVisitOnly);
    }
}
