//! Identity and credential lookup.
//!
//! The handshake and router depend on these traits rather than on the
//! config file directly, so tests can supply in-memory fixtures and a
//! future deployment can back them with something other than TOML.

use crate::config::{ClientIdentity, ServerConfig};
use std::collections::HashMap;
use tether_core::TurnServer;

/// Resolves a claimed client id to its registered identity.
pub trait IdentityStore: Send + Sync {
    fn resolve(&self, client_id: &str) -> Option<ClientIdentity>;
}

/// Yields the TURN credentials scoped to a space.
pub trait CredentialStore: Send + Sync {
    fn credentials_for(&self, space_id: &str) -> Vec<TurnServer>;
}

/// Config-backed store: immutable maps built once at startup.
pub struct StaticStore {
    clients: HashMap<String, ClientIdentity>,
    turn: HashMap<String, Vec<TurnServer>>,
}

impl StaticStore {
    pub fn from_config(config: &ServerConfig) -> Self {
        let clients = config
            .clients
            .iter()
            .map(|c| (c.id.clone(), c.clone()))
            .collect();
        let mut turn: HashMap<String, Vec<TurnServer>> = HashMap::new();
        for (space_id, server) in &config.turn {
            turn.entry(space_id.clone()).or_default().push(server.clone());
        }
        Self { clients, turn }
    }

    #[cfg(test)]
    pub fn from_parts(
        clients: Vec<ClientIdentity>,
        turn: Vec<(String, TurnServer)>,
    ) -> Self {
        let clients = clients.into_iter().map(|c| (c.id.clone(), c)).collect();
        let mut map: HashMap<String, Vec<TurnServer>> = HashMap::new();
        for (space_id, server) in turn {
            map.entry(space_id).or_default().push(server);
        }
        Self { clients, turn: map }
    }
}

impl IdentityStore for StaticStore {
    fn resolve(&self, client_id: &str) -> Option<ClientIdentity> {
        self.clients.get(client_id).cloned()
    }
}

impl CredentialStore for StaticStore {
    fn credentials_for(&self, space_id: &str) -> Vec<TurnServer> {
        self.turn.get(space_id).cloned().unwrap_or_default()
    }
}
