//! Client configuration from the environment

use crate::state_machine::state::DEFAULT_RECONNECT_DELAY;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}: expected a boolean, got {value:?}")]
    InvalidBool { key: &'static str, value: String },
    #[error("{key}: expected milliseconds, got {value:?}")]
    InvalidDuration { key: &'static str, value: String },
    #[error("{key}: expected a JSON object: {reason}")]
    InvalidJson { key: &'static str, reason: String },
}

/// Client settings
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// `ws(s)://` or `http(s)://` base of the message server
    pub server_url: String,
    pub db_path: PathBuf,
    pub user_id: String,
    /// Sender id of the remote actor
    pub actor_id: String,
    pub actor_name: String,
    pub reconnect_delay: Duration,
    pub debug_mode: bool,
    /// Sent in the `init` frame
    pub session_config: Value,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        Self {
            server_url: "ws://localhost:8000".to_string(),
            db_path: PathBuf::from(format!("{home}/.rin/client.db")),
            user_id: "user".to_string(),
            actor_id: "rin".to_string(),
            actor_name: "Rin".to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            debug_mode: false,
            session_config: Value::Object(serde_json::Map::new()),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable values are logged and replaced
    /// by defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("RIN_SERVER_URL") {
            config.server_url = url;
        }
        if let Some(path) = get("RIN_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(user) = get("RIN_USER_ID") {
            config.user_id = user;
        }
        if let Some(actor) = get("RIN_ACTOR_ID") {
            config.actor_id = actor;
        }
        if let Some(name) = get("RIN_ACTOR_NAME") {
            config.actor_name = name;
        }

        if let Some(raw) = get("RIN_RECONNECT_DELAY_MS") {
            match parse_millis("RIN_RECONNECT_DELAY_MS", &raw) {
                Ok(delay) => config.reconnect_delay = delay,
                Err(e) => tracing::warn!(error = %e, "Using default reconnect delay"),
            }
        }
        if let Some(raw) = get("RIN_DEBUG") {
            match parse_bool("RIN_DEBUG", &raw) {
                Ok(enabled) => config.debug_mode = enabled,
                Err(e) => tracing::warn!(error = %e, "Debug mode stays off"),
            }
        }
        if let Some(raw) = get("RIN_SESSION_CONFIG") {
            match parse_object("RIN_SESSION_CONFIG", &raw) {
                Ok(value) => config.session_config = value,
                Err(e) => tracing::warn!(error = %e, "Using empty session config"),
            }
        }

        config
    }
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            key,
            value: raw.to_string(),
        }),
    }
}

fn parse_millis(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| ConfigError::InvalidDuration {
            key,
            value: raw.to_string(),
        })
}

fn parse_object(key: &'static str, raw: &str) -> Result<Value, ConfigError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(other) => Err(ConfigError::InvalidJson {
            key,
            reason: format!("got {other}"),
        }),
        Err(e) => Err(ConfigError::InvalidJson {
            key,
            reason: e.to_string(),
        }),
    }
}
