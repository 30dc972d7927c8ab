//! Server configuration: TOML file + CLI overrides.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tether_core::{TetherError, TetherResult, TurnServer};
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub clients: Vec<ClientEntry>,
    #[serde(default)]
    pub turn: Vec<TurnEntry>,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_signal_path")]
    pub signal_path: String,
    #[serde(default = "default_monitor_path")]
    pub monitor_path: String,
    /// Seconds a connection may spend in the admission handshake.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            signal_path: default_signal_path(),
            monitor_path: default_monitor_path(),
            handshake_timeout: default_handshake_timeout(),
        }
    }
}

/// One `[[clients]]` entry: a registered identity. Exactly one of
/// `public_key` (inline PEM) or `public_key_file` must be set.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientEntry {
    pub id: String,
    pub space_id: String,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub public_key_file: Option<String>,
}

/// One `[[turn]]` entry: a TURN credential scoped to a space.
#[derive(Debug, Clone, Deserialize)]
pub struct TurnEntry {
    pub space_id: String,
    pub url: String,
    pub username: String,
    pub password: String,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_signal_path() -> String {
    "/ws".to_string()
}
fn default_monitor_path() -> String {
    "/info".to_string()
}
fn default_handshake_timeout() -> u64 {
    10
}

/// A registered client identity resolved from config.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub id: String,
    pub space_id: String,
    pub public_key_pem: String,
}

/// Resolved server configuration (paths expanded, key files read,
/// CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub signal_path: String,
    pub monitor_path: String,
    pub handshake_timeout: u64,
    pub clients: Vec<ClientIdentity>,
    pub turn: Vec<(String, TurnServer)>,
}

impl ServerConfig {
    /// Load config from a TOML file, then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, cli_bind: Option<&str>) -> TetherResult<Self> {
        let file_config = if let Some(path) = config_path {
            let expanded = expand_tilde(path);
            if expanded.exists() {
                info!(path = %expanded.display(), "loading config file");
                let content = std::fs::read_to_string(&expanded)?;
                toml::from_str::<ConfigFile>(&content)
                    .map_err(|e| TetherError::Other(format!("config parse error: {e}")))?
            } else {
                info!(path = %expanded.display(), "config file not found, using defaults");
                ConfigFile::default()
            }
        } else {
            ConfigFile::default()
        };

        Self::from_file(file_config, cli_bind)
    }

    /// Resolve a parsed config file into a runnable configuration.
    pub fn from_file(file: ConfigFile, cli_bind: Option<&str>) -> TetherResult<Self> {
        let bind_str = cli_bind
            .map(|s| s.to_string())
            .unwrap_or(file.server.bind);
        let bind: SocketAddr = bind_str
            .parse()
            .map_err(|e| TetherError::Other(format!("invalid bind address {bind_str:?}: {e}")))?;

        let mut clients = Vec::with_capacity(file.clients.len());
        for entry in file.clients {
            let public_key_pem = match (entry.public_key, entry.public_key_file) {
                (Some(pem), None) => pem,
                (None, Some(path)) => {
                    let expanded = expand_tilde_str(&path);
                    std::fs::read_to_string(&expanded).map_err(|e| {
                        TetherError::Other(format!(
                            "cannot read public key for client {}: {}: {e}",
                            entry.id,
                            expanded.display()
                        ))
                    })?
                }
                _ => {
                    return Err(TetherError::Other(format!(
                        "client {} must set exactly one of public_key or public_key_file",
                        entry.id
                    )))
                }
            };
            // Fail at startup rather than at first handshake.
            tether_core::crypto::parse_public_key(&public_key_pem)?;
            clients.push(ClientIdentity {
                id: entry.id,
                space_id: entry.space_id,
                public_key_pem,
            });
        }

        let turn = file
            .turn
            .into_iter()
            .map(|t| {
                (
                    t.space_id,
                    TurnServer {
                        url: t.url,
                        username: t.username,
                        password: t.password,
                    },
                )
            })
            .collect();

        Ok(Self {
            bind,
            signal_path: file.server.signal_path,
            monitor_path: file.server.monitor_path,
            handshake_timeout: file.server.handshake_timeout,
            clients,
            turn,
        })
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if s.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(&s[2..]);
        }
    }
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_public_key() -> String {
        let (_, public_pem) = tether_core::crypto::generate_keypair(1024).unwrap();
        public_pem
    }

    #[test]
    fn defaults_apply_when_sections_missing() {
        let file: ConfigFile = toml::from_str("").unwrap();
        let cfg = ServerConfig::from_file(file, None).unwrap();
        assert_eq!(cfg.bind.port(), 8080);
        assert_eq!(cfg.signal_path, "/ws");
        assert_eq!(cfg.monitor_path, "/info");
        assert_eq!(cfg.handshake_timeout, 10);
        assert!(cfg.clients.is_empty());
    }

    #[test]
    fn inline_public_key_and_turn_parse() {
        let pem = test_public_key();
        let toml_text = format!(
            r#"
[server]
bind = "127.0.0.1:9000"

[[clients]]
id = "alpha"
space_id = "s1"
public_key = """
{pem}"""

[[turn]]
space_id = "s1"
url = "turn:turn.example.com:3478"
username = "u"
password = "p"
"#
        );
        let file: ConfigFile = toml::from_str(&toml_text).unwrap();
        let cfg = ServerConfig::from_file(file, None).unwrap();
        assert_eq!(cfg.bind.port(), 9000);
        assert_eq!(cfg.clients.len(), 1);
        assert_eq!(cfg.clients[0].id, "alpha");
        assert_eq!(cfg.turn.len(), 1);
        assert_eq!(cfg.turn[0].0, "s1");
    }

    #[test]
    fn cli_bind_overrides_file() {
        let file: ConfigFile = toml::from_str(r#"[server]
bind = "127.0.0.1:9000""#)
            .unwrap();
        let cfg = ServerConfig::from_file(file, Some("127.0.0.1:7000")).unwrap();
        assert_eq!(cfg.bind.port(), 7000);
    }

    #[test]
    fn client_without_key_is_rejected() {
        let file: ConfigFile = toml::from_str(
            r#"
[[clients]]
id = "alpha"
space_id = "s1"
"#,
        )
        .unwrap();
        assert!(ServerConfig::from_file(file, None).is_err());
    }

    #[test]
    fn garbage_public_key_is_rejected() {
        let file: ConfigFile = toml::from_str(
            r#"
[[clients]]
id = "alpha"
space_id = "s1"
public_key = "not a pem"
"#,
        )
        .unwrap();
        assert!(ServerConfig::from_file(file, None).is_err());
    }
}
