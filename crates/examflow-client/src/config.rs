//! Client configuration.
//!
//! All settings live in a single `config.toml` file at
//! `~/.config/examflow/config.toml` by default.
//!
//! The `[auth] token` value supports secret references:
//! - `pass::path/in/store`: resolved via `pass show`
//! - `env::VAR_NAME`: resolved from the environment
//! - plain text: used as-is

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use examflow_protocol::HeartBeat;

use crate::facade::SessionConfig;
use crate::session::{ReconnectPolicy, StaffCredential};
use crate::transport::TransportKind;

// ---------------------------------------------------------------------------
// ClientConfig (config.toml)
// ---------------------------------------------------------------------------

/// Configuration for the examflow client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Debug mode.
    pub debug: bool,

    /// Broker endpoint settings.
    pub server: ServerSettings,

    /// Staff credential.
    pub auth: AuthSettings,

    /// Reconnect, heart-beat and command timing.
    pub session: SessionSettings,
}

/// Broker endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Base URL of the exam-workflow server.
    pub base_url: String,

    /// `sockjs` (WebSocket with HTTP polling fallback) or `websocket`.
    pub transport: TransportKind,

    /// Connection timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            transport: TransportKind::default(),
            connect_timeout_secs: 10,
        }
    }
}

/// Credential settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Bearer token or staff id (supports `pass::` and `env::` prefixes).
    pub token: Option<String>,
}

/// Session timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    /// How often we promise to send; 0 disables.
    pub heartbeat_outgoing_ms: u64,
    /// How often we want to hear from the broker; 0 disables.
    pub heartbeat_incoming_ms: u64,
    pub command_timeout_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 3000,
            max_reconnect_attempts: 5,
            heartbeat_outgoing_ms: 10_000,
            heartbeat_incoming_ms: 10_000,
            command_timeout_secs: 15,
        }
    }
}

impl ClientConfig {
    /// Loads configuration from the default path.
    pub fn load() -> Result<Self, String> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, String> {
        let content =
            std::fs::read_to_string(path).map_err(|e| format!("failed to read config: {}", e))?;
        toml::from_str(&content).map_err(|e| format!("failed to parse config: {}", e))
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("examflow")
    }

    /// Validates the settings and builds a [`SessionConfig`].
    pub fn to_session_config(&self) -> Result<SessionConfig, String> {
        let base_url = Url::parse(&self.server.base_url)
            .map_err(|e| format!("invalid base_url `{}`: {}", self.server.base_url, e))?;
        match base_url.scheme() {
            "http" | "https" | "ws" | "wss" => {}
            other => return Err(format!("unsupported base_url scheme `{}`", other)),
        }

        let session = &self.session;
        if session.command_timeout_secs == 0 {
            return Err("command_timeout_secs must be greater than zero".to_string());
        }
        if self.server.connect_timeout_secs == 0 {
            return Err("connect_timeout_secs must be greater than zero".to_string());
        }

        Ok(SessionConfig::new(base_url)
            .with_transport(self.server.transport)
            .with_connect_timeout(Duration::from_secs(self.server.connect_timeout_secs))
            .with_reconnect(ReconnectPolicy::new(
                Duration::from_millis(session.reconnect_delay_ms),
                session.max_reconnect_attempts,
            ))
            .with_heart_beat(HeartBeat::new(
                Duration::from_millis(session.heartbeat_outgoing_ms),
                Duration::from_millis(session.heartbeat_incoming_ms),
            ))
            .with_command_timeout(Duration::from_secs(session.command_timeout_secs)))
    }

    /// Resolves `[auth] token` into a credential.
    pub fn resolve_token(&self) -> Result<StaffCredential, String> {
        let raw = self.auth.token.as_deref().ok_or_else(|| {
            format!(
                "no staff token configured. Add to {}:\n  \
                 [auth]\n  \
                 token = \"env::EXAMFLOW_STAFF_TOKEN\"\n\n  \
                 Or pass --token",
                Self::default_path().display()
            )
        })?;
        let token =
            crate::secret::resolve(raw).map_err(|e| format!("failed to resolve token: {}", e))?;
        if token.trim().is_empty() {
            return Err("staff token is empty".to_string());
        }
        Ok(StaffCredential::new(token.trim()))
    }
}
