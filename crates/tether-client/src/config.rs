//! Client configuration: TOML file + defaults.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tether_core::{TetherError, TetherResult};

/// Configuration for a supervised relay connection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientConfig {
    pub server: ServerSection,
    pub client: ClientSection,
    #[serde(default)]
    pub websocket: WebSocketSection,
}

/// `[server]` section: where the relay lives.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerSection {
    /// Relay URL, e.g. `ws://relay.example.com:8080/ws`.
    pub url: String,
}

/// `[client]` section: who we are.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientSection {
    /// Registered client id.
    pub id: String,
    /// Private key PEM, inline. Usually loaded via `private_key_file`.
    #[serde(default)]
    pub private_key: Option<String>,
    /// Path to the private key PEM file.
    #[serde(default)]
    pub private_key_file: Option<String>,
}

/// `[websocket]` section: connection behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketSection {
    /// Heartbeat interval in seconds (0 = disabled).
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    /// Seconds allowed for dial + handshake before the attempt fails.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    /// First reconnect delay in seconds.
    #[serde(default = "default_reconnect_initial")]
    pub reconnect_initial_delay: u64,
    /// Reconnect delay ceiling in seconds.
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_delay: u64,
}

impl Default for WebSocketSection {
    fn default() -> Self {
        Self {
            ping_interval: default_ping_interval(),
            connect_timeout: default_connect_timeout(),
            reconnect_initial_delay: default_reconnect_initial(),
            reconnect_max_delay: default_reconnect_max(),
        }
    }
}

fn default_ping_interval() -> u64 {
    30
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_reconnect_initial() -> u64 {
    1
}
fn default_reconnect_max() -> u64 {
    60
}

impl ClientConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> TetherResult<Self> {
        let expanded = expand_tilde(path);
        let content = std::fs::read_to_string(&expanded).map_err(|e| {
            TetherError::Other(format!("cannot read config {}: {e}", expanded.display()))
        })?;
        let config: ClientConfig = toml::from_str(&content)
            .map_err(|e| TetherError::Other(format!("config parse error: {e}")))?;
        if config.server.url.is_empty() {
            return Err(TetherError::Other("config is missing server.url".into()));
        }
        if config.client.id.is_empty() {
            return Err(TetherError::Other("config is missing client.id".into()));
        }
        Ok(config)
    }

    /// Resolve the private key PEM, reading the key file if needed.
    pub fn private_key_pem(&self) -> TetherResult<String> {
        match (&self.client.private_key, &self.client.private_key_file) {
            (Some(pem), _) => Ok(pem.clone()),
            (None, Some(path)) => {
                let expanded = expand_tilde(Path::new(path));
                std::fs::read_to_string(&expanded).map_err(|e| {
                    TetherError::Other(format!(
                        "cannot read private key {}: {e}",
                        expanded.display()
                    ))
                })
            }
            (None, None) => Err(TetherError::Other(
                "config sets neither private_key nor private_key_file".into(),
            )),
        }
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if s.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(&s[2..]);
        }
    }
    PathBuf::from(s.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config: ClientConfig = toml::from_str(
            r#"
[server]
url = "ws://127.0.0.1:8080/ws"

[client]
id = "alpha"
"#,
        )
        .unwrap();
        assert_eq!(config.websocket.ping_interval, 30);
        assert_eq!(config.websocket.connect_timeout, 10);
        assert_eq!(config.websocket.reconnect_initial_delay, 1);
        assert_eq!(config.websocket.reconnect_max_delay, 60);
    }

    #[test]
    fn inline_private_key_wins_over_file() {
        let config = ClientConfig {
            client: ClientSection {
                id: "alpha".into(),
                private_key: Some("inline".into()),
                private_key_file: Some("/nonexistent".into()),
            },
            ..ClientConfig::default()
        };
        assert_eq!(config.private_key_pem().unwrap(), "inline");
    }

    #[test]
    fn missing_key_source_is_an_error() {
        let config = ClientConfig::default();
        assert!(config.private_key_pem().is_err());
    }

    #[test]
    fn zero_ping_interval_is_allowed() {
        let config: ClientConfig = toml::from_str(
            r#"
[server]
url = "ws://127.0.0.1:8080/ws"

[client]
id = "alpha"

[websocket]
ping_interval = 0
"#,
        )
        .unwrap();
        assert_eq!(config.websocket.ping_interval, 0);
    }
}
