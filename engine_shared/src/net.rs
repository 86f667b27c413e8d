//! Network collaborator.
//!
//! The event system decides *whether* an event is replicated and to whom; the
//! actual transmission (encoding, channels, sessions) belongs to whatever
//! implements [`NetworkSystem`].

use std::{
    fmt,
    sync::atomic::{AtomicU32, Ordering},
};

use serde::{Deserialize, Serialize};

use crate::{ecs::EntityRef, event::Event};

static NEXT_CLIENT_ID: AtomicU32 = AtomicU32::new(1);

/// Identifies a connected client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub u32);

impl ClientId {
    pub fn new_unique() -> Self {
        ClientId(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Role of this process in a networked game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkMode {
    /// Single player, no network.
    #[default]
    Standalone,
    /// Connected to a remote server.
    Client,
    /// Dedicated server.
    Server,
    /// Server with a local player.
    ListenServer,
}

impl NetworkMode {
    /// True when this process sends to clients.
    pub fn is_server(self) -> bool {
        matches!(self, NetworkMode::Server | NetworkMode::ListenServer)
    }

    /// True when this process owns the authoritative game state.
    pub fn is_authority(self) -> bool {
        !matches!(self, NetworkMode::Client)
    }
}

/// Marks an entity as known to the network layer. Only such entities have
/// their events replicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkComponent {
    pub net_id: u32,
}

/// What the event system needs from the network layer.
pub trait NetworkSystem: Send + Sync {
    fn mode(&self) -> NetworkMode;

    /// The client that owns `entity`, if any.
    fn owner_of(&self, entity: &EntityRef) -> Option<ClientId>;

    fn connected_clients(&self) -> Vec<ClientId>;

    /// Sends an event about `entity` to one client.
    fn transmit(&self, client: ClientId, event: &dyn Event, entity: &EntityRef);

    /// Sends an event about `entity` up to the server.
    fn transmit_to_server(&self, event: &dyn Event, entity: &EntityRef);
}

/// No network: standalone play and headless tests.
#[derive(Debug, Default)]
pub struct NullNetwork;

impl NetworkSystem for NullNetwork {
    fn mode(&self) -> NetworkMode {
        NetworkMode::Standalone
    }

    fn owner_of(&self, _entity: &EntityRef) -> Option<ClientId> {
        None
    }

    fn connected_clients(&self) -> Vec<ClientId> {
        Vec::new()
    }

    fn transmit(&self, _client: ClientId, _event: &dyn Event, _entity: &EntityRef) {}

    fn transmit_to_server(&self, _event: &dyn Event, _entity: &EntityRef) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_server_is_both_server_and_authority() {
        assert!(NetworkMode::ListenServer.is_server());
        assert!(NetworkMode::ListenServer.is_authority());
        assert!(!NetworkMode::Standalone.is_server());
        assert!(NetworkMode::Standalone.is_authority());
        assert!(!NetworkMode::Client.is_authority());
    }

    #[test]
    fn mode_reads_from_json() {
        let mode: NetworkMode = serde_json::from_str("\"listen_server\"").unwrap();
        assert_eq!(mode, NetworkMode::ListenServer);
    }
}
