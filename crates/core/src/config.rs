//! TOML-based configuration for the kyso client.
//!
//! The session token is never stored in the file itself: `api.token_env`
//! names an environment variable that is read at runtime by
//! [`KysoConfig::resolve_env_vars`]. The resolved configuration is passed
//! explicitly to every command; there is no process-wide config state.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level client configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KysoConfig {
    /// Backend API settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Merge GUI settings.
    #[serde(default)]
    pub web: WebConfig,
}

// ---------------------------------------------------------------------------
// API
// ---------------------------------------------------------------------------

/// Backend (Parse Server) connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Parse Server base URL, e.g. `https://api.kyso.io/parse`.
    #[serde(default = "default_api_url")]
    pub url: String,

    /// Parse application id sent as `X-Parse-Application-Id`.
    #[serde(default = "default_app_id")]
    pub app_id: String,

    /// Environment variable holding the session token.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Resolved session token (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub token: Option<String>,
}

fn default_api_url() -> String {
    "https://api.kyso.io/parse".into()
}
fn default_app_id() -> String {
    "kyso".into()
}
fn default_token_env() -> String {
    "KYSO_TOKEN".into()
}
fn default_timeout() -> u64 {
    60
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: default_api_url(),
            app_id: default_app_id(),
            token_env: default_token_env(),
            timeout_secs: default_timeout(),
            token: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Web GUI
// ---------------------------------------------------------------------------

/// Merge GUI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Listen address (default `127.0.0.1:8765`).
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:8765".into()
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl KysoConfig {
    /// Default location: `~/.kyso/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".kyso").join("config.toml"))
    }

    /// Load a [`KysoConfig`] from a TOML file. A missing file yields the
    /// defaults, since every field has one.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            debug!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Self::default());
        }

        info!(path = %path.display(), "loading configuration");
        let contents = std::fs::read_to_string(path)?;
        let config: KysoConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve `*_env` fields from the environment. A missing token only
    /// logs: public studies can be read anonymously.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        self.api.token = resolve_optional_env(&self.api.token_env, "api.token_env");
        Ok(())
    }

    /// Validate that all fields are sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.api.url.trim();
        if url.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "api.url".into(),
                detail: "API URL must not be empty".into(),
            });
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                field: "api.url".into(),
                detail: "API URL must start with http:// or https://".into(),
            });
        }
        if self.api.app_id.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "api.app_id".into(),
                detail: "application id must not be empty".into(),
            });
        }
        if self.api.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "api.timeout_secs".into(),
                detail: "timeout must be > 0".into(),
            });
        }
        if self.web.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::InvalidValue {
                field: "web.listen".into(),
                detail: format!("'{}' is not a socket address", self.web.listen),
            });
        }
        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs and returns `None` if the variable is unset or empty.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            debug!(field, env_name, "env var not set");
            None
        }
    }
}
