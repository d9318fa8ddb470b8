//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use asmo_notion::NOTION_API_URL;
use secrecy::SecretString;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Configuration for the relay server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"0.0.0.0"`).
    pub host: String,
    /// Port to bind (default `3000`, `0` for auto-assign).
    pub port: u16,
    /// Browser origin allowed by CORS. `None` means same-origin only.
    pub frontend_url: Option<String>,
    /// PIN guarding the UI session cookie.
    pub pin: SecretString,
    /// Shared secret expected in the `api-key` header of memory routes.
    pub api_secret_key: Option<SecretString>,
    /// Server-side Notion token used by the memory routes.
    pub notion_token: Option<SecretString>,
    pub chat_memories_db: Option<String>,
    pub memory_areas_db: Option<String>,
    pub memory_groups_db: Option<String>,
    /// Built frontend served for unknown paths.
    pub static_dir: Option<PathBuf>,
    pub notion_api_url: String,
    /// How long a relayed webhook waits for the browser.
    pub relay_timeout_secs: u64,
    /// Refuse to relay until the browser has sent its Notion token.
    pub require_notion_token: bool,
    pub max_send_queue: usize,
    pub heartbeat_interval_secs: u64,
    /// Connections silent for this long are dropped.
    pub client_timeout_secs: u64,
    pub cleanup_interval_secs: u64,
    /// Requests allowed per client IP per window.
    pub rate_limit_requests: u32,
    pub rate_limit_window_secs: u64,
    pub session_ttl_days: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            frontend_url: None,
            pin: SecretString::from("0723"),
            api_secret_key: None,
            notion_token: None,
            chat_memories_db: None,
            memory_areas_db: None,
            memory_groups_db: None,
            static_dir: None,
            notion_api_url: NOTION_API_URL.into(),
            relay_timeout_secs: 30,
            require_notion_token: true,
            max_send_queue: 256,
            heartbeat_interval_secs: 30,
            client_timeout_secs: 90,
            cleanup_interval_secs: 60,
            rate_limit_requests: 100,
            rate_limit_window_secs: 60,
            session_ttl_days: 7,
        }
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { key, value })
}

fn parse_bool(key: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid { key, value }),
    }
}

impl ServerConfig {
    /// Defaults overridden by process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns. Empty values count
    /// as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut cfg = Self::default();

        if let Some(v) = get("HOST") {
            cfg.host = v;
        }
        if let Some(v) = get("PORT") {
            cfg.port = parse("PORT", v)?;
        }
        cfg.frontend_url = get("FRONTEND_URL");
        if let Some(v) = get("ASMO_PIN").or_else(|| get("VITE_PIN")) {
            cfg.pin = SecretString::from(v);
        }
        cfg.api_secret_key = get("API_SECRET_KEY").map(SecretString::from);
        cfg.notion_token = get("NOTION_TOKEN").map(SecretString::from);
        cfg.chat_memories_db = get("DB_CHAT_MEMORIES");
        cfg.memory_areas_db = get("DB_MEMORY_AREAS");
        cfg.memory_groups_db = get("DB_MEMORY_GROUPS");
        cfg.static_dir = get("STATIC_DIR").map(PathBuf::from);
        if let Some(v) = get("NOTION_API_URL") {
            cfg.notion_api_url = v;
        }
        if let Some(v) = get("RELAY_TIMEOUT_SECS") {
            cfg.relay_timeout_secs = parse("RELAY_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = get("REQUIRE_NOTION_TOKEN") {
            cfg.require_notion_token = parse_bool("REQUIRE_NOTION_TOKEN", v)?;
        }
        if let Some(v) = get("RATE_LIMIT_REQUESTS") {
            cfg.rate_limit_requests = parse("RATE_LIMIT_REQUESTS", v)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relay_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "RELAY_TIMEOUT_SECS",
                value: "0".into(),
            });
        }
        if let Some(origin) = &self.frontend_url {
            if origin.parse::<axum::http::HeaderValue>().is_err() {
                return Err(ConfigError::Invalid {
                    key: "FRONTEND_URL",
                    value: origin.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_secs(self.relay_timeout_secs)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
